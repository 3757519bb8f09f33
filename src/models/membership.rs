//! Membership model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::enums::MembershipType;
use crate::error::{AppError, AppResult};

/// Per-student membership. The barcode is the member ID a student must
/// hold before borrowing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Membership {
    pub id: i32,
    pub user_id: i32,
    pub membership_type: MembershipType,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub barcode: Option<String>,
}

impl Membership {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expiry_date.map_or(true, |expiry| expiry > now)
    }

    pub fn has_barcode(&self) -> bool {
        self.barcode.as_deref().is_some_and(|b| !b.trim().is_empty())
    }

    pub fn has_premium_access(&self, now: DateTime<Utc>) -> bool {
        self.membership_type == MembershipType::Premium && self.is_active_at(now)
    }

    /// Borrowing requires an active, unexpired membership with a barcode
    pub fn check_can_borrow(&self, now: DateTime<Utc>) -> AppResult<()> {
        if !self.is_active_at(now) {
            return Err(AppError::NotEligible(
                "Membership is inactive or expired".to_string(),
            ));
        }
        if !self.has_barcode() {
            return Err(AppError::NotEligible(
                "A member ID is required before borrowing".to_string(),
            ));
        }
        Ok(())
    }
}

/// Register membership request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct RegisterMembership {
    pub membership_type: Option<MembershipType>,
    /// Generated when omitted
    #[validate(length(min = 1, max = 64))]
    pub barcode: Option<String>,
    /// Defaults to one year after registration
    pub expiry_date: Option<DateTime<Utc>>,
}

/// Change membership type request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpgradeMembership {
    pub membership_type: MembershipType,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// Assign barcode request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AssignBarcode {
    #[validate(length(min = 1, max = 64))]
    pub barcode: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn membership(now: DateTime<Utc>) -> Membership {
        Membership {
            id: 1,
            user_id: 7,
            membership_type: MembershipType::Standard,
            is_active: true,
            start_date: now - Duration::days(30),
            expiry_date: Some(now + Duration::days(30)),
            barcode: Some("MEM-000007".to_string()),
        }
    }

    #[test]
    fn test_active_member_can_borrow() {
        let now = Utc::now();
        assert!(membership(now).check_can_borrow(now).is_ok());
    }

    #[test]
    fn test_expired_or_inactive_cannot_borrow() {
        let now = Utc::now();
        let mut m = membership(now);
        m.expiry_date = Some(now - Duration::days(1));
        assert!(matches!(m.check_can_borrow(now), Err(AppError::NotEligible(_))));

        let mut m = membership(now);
        m.is_active = false;
        assert!(matches!(m.check_can_borrow(now), Err(AppError::NotEligible(_))));
    }

    #[test]
    fn test_blank_barcode_cannot_borrow() {
        let now = Utc::now();
        let mut m = membership(now);
        m.barcode = Some("  ".to_string());
        assert!(!m.has_barcode());
        assert!(matches!(m.check_can_borrow(now), Err(AppError::NotEligible(_))));
    }
}
