//! Payment attempts against a fine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::enums::{PaymentMethod, PaymentStatus};
use super::fine::Fine;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Payment {
    pub id: i32,
    pub fine_id: i32,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// New payment attempt for the full amount of `fine`.
    /// Cash waits at the counter, mobile payments wait for verification.
    pub fn submit(
        fine: &Fine,
        method: PaymentMethod,
        transaction_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        if fine.is_paid {
            return Err(AppError::AlreadyPaid(format!("Fine {} is already paid", fine.id)));
        }

        let transaction_ref = transaction_ref
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let status = match method {
            PaymentMethod::CashOnDelivery => PaymentStatus::Pending,
            PaymentMethod::MobileReference => {
                if transaction_ref.is_none() {
                    return Err(AppError::Validation(
                        "A transaction reference is required for mobile payments".to_string(),
                    ));
                }
                PaymentStatus::PendingVerification
            }
        };

        Ok(Self {
            id: 0,
            fine_id: fine.id,
            method,
            status,
            amount: fine.amount,
            transaction_ref,
            created_at: now,
            paid_at: None,
        })
    }

    fn ensure_outstanding(&self) -> AppResult<()> {
        if !self.status.is_outstanding() {
            return Err(AppError::Validation(format!(
                "Payment {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub fn confirm(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        self.ensure_outstanding()?;
        self.status = PaymentStatus::Paid;
        self.paid_at = Some(at);
        Ok(())
    }

    pub fn reject(&mut self) -> AppResult<()> {
        self.ensure_outstanding()?;
        self.status = PaymentStatus::Rejected;
        Ok(())
    }
}

/// Record payment request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RecordPayment {
    pub method: PaymentMethod,
    #[validate(length(max = 100))]
    pub transaction_ref: Option<String>,
}

/// Filter for payment listings
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub fine_id: Option<i32>,
    pub outstanding_only: bool,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.fine_id.map_or(true, |id| payment.fine_id == id)
            && (!self.outstanding_only || payment.status.is_outstanding())
    }
}
