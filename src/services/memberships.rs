//! Membership registry

use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use validator::Validate;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{AssignBarcode, Membership, MembershipType, RegisterMembership, UpgradeMembership},
    repository::{Repository, UnitOfWork},
};

/// Memberships run for a year unless told otherwise
const DEFAULT_TERM_DAYS: i64 = 365;

fn generate_barcode(user_id: i32) -> String {
    let suffix: u16 = rand::thread_rng().gen();
    format!("MEM-{:06}-{:04X}", user_id, suffix)
}

async fn ensure_barcode_free(
    uow: &mut dyn UnitOfWork,
    barcode: &str,
    user_id: i32,
) -> AppResult<()> {
    match uow.membership_by_barcode(barcode).await? {
        Some(other) if other.user_id != user_id => Err(AppError::DuplicateRequest(format!(
            "Barcode {} is already assigned",
            barcode
        ))),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct MembershipsService {
    repository: Repository,
    clock: Arc<dyn Clock>,
}

impl MembershipsService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub async fn register(&self, user_id: i32, request: RegisterMembership) -> AppResult<Membership> {
        request.validate()?;
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        if uow.membership(user_id).await?.is_some() {
            return Err(AppError::DuplicateRequest(format!(
                "User {} already has a membership",
                user_id
            )));
        }

        let barcode = match request.barcode.as_deref().map(str::trim) {
            Some(barcode) if !barcode.is_empty() => barcode.to_string(),
            _ => generate_barcode(user_id),
        };
        ensure_barcode_free(uow.as_mut(), &barcode, user_id).await?;

        let membership = uow
            .insert_membership(&Membership {
                id: 0,
                user_id,
                membership_type: request.membership_type.unwrap_or(MembershipType::Standard),
                is_active: true,
                start_date: now,
                expiry_date: Some(
                    request
                        .expiry_date
                        .unwrap_or(now + Duration::days(DEFAULT_TERM_DAYS)),
                ),
                barcode: Some(barcode),
            })
            .await?;
        uow.commit().await?;

        tracing::info!(
            user_id,
            membership_id = membership.id,
            membership_type = %membership.membership_type,
            "Membership registered"
        );
        Ok(membership)
    }

    /// Change the membership type. Upgrading also reactivates the membership.
    pub async fn upgrade(&self, user_id: i32, request: UpgradeMembership) -> AppResult<Membership> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;
        let mut membership = self.find(uow.as_mut(), user_id).await?;

        if let Some(expiry) = request.expiry_date {
            if expiry <= now {
                return Err(AppError::Validation(
                    "Expiry date must be in the future".to_string(),
                ));
            }
            membership.expiry_date = Some(expiry);
        }
        membership.membership_type = request.membership_type;
        membership.is_active = true;
        uow.update_membership(&membership).await?;
        uow.commit().await?;

        tracing::info!(user_id, membership_type = %membership.membership_type, "Membership changed");
        Ok(membership)
    }

    pub async fn assign_barcode(&self, user_id: i32, request: AssignBarcode) -> AppResult<Membership> {
        request.validate()?;
        let barcode = request.barcode.trim().to_string();
        if barcode.is_empty() {
            return Err(AppError::Validation("Barcode cannot be blank".to_string()));
        }

        let mut uow = self.repository.begin().await?;
        let mut membership = self.find(uow.as_mut(), user_id).await?;
        ensure_barcode_free(uow.as_mut(), &barcode, user_id).await?;

        membership.barcode = Some(barcode);
        uow.update_membership(&membership).await?;
        uow.commit().await?;

        tracing::info!(user_id, "Member barcode assigned");
        Ok(membership)
    }

    pub async fn deactivate(&self, user_id: i32) -> AppResult<Membership> {
        let mut uow = self.repository.begin().await?;
        let mut membership = self.find(uow.as_mut(), user_id).await?;
        membership.is_active = false;
        uow.update_membership(&membership).await?;
        uow.commit().await?;

        tracing::info!(user_id, "Membership deactivated");
        Ok(membership)
    }

    pub async fn membership(&self, user_id: i32) -> AppResult<Membership> {
        let mut uow = self.repository.begin().await?;
        self.find(uow.as_mut(), user_id).await
    }

    pub async fn list_memberships(&self) -> AppResult<Vec<Membership>> {
        let mut uow = self.repository.begin().await?;
        uow.list_memberships().await
    }

    pub async fn is_active_member(&self, user_id: i32) -> AppResult<bool> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;
        Ok(uow
            .membership(user_id)
            .await?
            .is_some_and(|m| m.is_active_at(now)))
    }

    pub async fn has_member_barcode(&self, user_id: i32) -> AppResult<bool> {
        let mut uow = self.repository.begin().await?;
        Ok(uow.membership(user_id).await?.is_some_and(|m| m.has_barcode()))
    }

    async fn find(&self, uow: &mut dyn UnitOfWork, user_id: i32) -> AppResult<Membership> {
        uow.membership(user_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("User {} has no membership", user_id))
        })
    }
}
