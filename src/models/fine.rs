//! Fine model and fine arithmetic

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::enums::PaymentMethod;
use super::issue::IssueRecord;
use super::payment::Payment;

/// Fine for one overdue issue record. At most one per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Fine {
    pub id: i32,
    pub issue_id: i32,
    pub user_id: i32,
    pub amount: Decimal,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethod>,
    /// Most recent payment attempt
    pub last_payment_id: Option<i32>,
}

/// Fine owed for a returned record: overdue days times the daily rate.
/// Records still out accrue nothing here, see [`accrued_fine`].
pub fn compute_fine(issue: &IssueRecord, per_day: Decimal) -> Option<Decimal> {
    let returned_at = issue.return_date?;
    let days = issue.overdue_days(returned_at);
    if days <= 0 {
        return None;
    }
    Some(Decimal::from(days) * per_day)
}

/// Provisional amount a record would owe if it came back at `as_of`.
/// Only used for display; never persisted.
pub fn accrued_fine(issue: &IssueRecord, as_of: DateTime<Utc>, per_day: Decimal) -> Decimal {
    Decimal::from(issue.overdue_days(as_of)) * per_day
}

impl Fine {
    pub fn new(issue: &IssueRecord, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            issue_id: issue.id,
            user_id: issue.user_id,
            amount,
            is_paid: false,
            created_at: now,
            paid_at: None,
            payment_method: None,
            last_payment_id: None,
        }
    }

    /// Bring an unpaid fine up to date. Paid fines are frozen.
    /// Returns whether anything changed.
    pub fn refresh_amount(&mut self, amount: Decimal) -> bool {
        if self.is_paid || self.amount == amount {
            return false;
        }
        self.amount = amount;
        true
    }

    /// Settle the fine with a confirmed payment
    pub fn mark_paid(&mut self, payment: &Payment) {
        self.is_paid = true;
        self.paid_at = payment.paid_at;
        self.payment_method = Some(payment.method);
        self.last_payment_id = Some(payment.id);
    }
}

/// Filter for fine listings
#[derive(Debug, Clone, Default)]
pub struct FineFilter {
    pub user_id: Option<i32>,
    pub is_paid: Option<bool>,
}

impl FineFilter {
    pub fn matches(&self, fine: &Fine) -> bool {
        self.user_id.map_or(true, |id| fine.user_id == id)
            && self.is_paid.map_or(true, |paid| fine.is_paid == paid)
    }
}

/// Sum of unpaid fines and how many members owe them
#[derive(Debug, Clone, Copy, Default, PartialEq, FromRow)]
pub struct UnpaidTotals {
    pub amount: Decimal,
    pub debtors: i64,
}

/// A student's fines, as shown on the pay-fine page
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FineSummary {
    pub total_unpaid: Decimal,
    pub unpaid: Vec<Fine>,
    pub paid: Vec<Fine>,
}
