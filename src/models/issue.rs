//! Issue record (a copy lent to a borrower)

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

use super::enums::IssueStatus;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct IssueRecord {
    pub id: i32,
    pub book_id: i32,
    pub user_id: i32,
    pub issue_date: DateTime<Utc>,
    /// Expected return date
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: IssueStatus,
    pub fine_amount: Decimal,
    /// Reservation this issue fulfilled, if any
    pub reservation_id: Option<i32>,
}

impl IssueRecord {
    /// New `Issued` record. The store assigns the id.
    pub fn open(
        book_id: i32,
        user_id: i32,
        now: DateTime<Utc>,
        loan_period: Duration,
        reservation_id: Option<i32>,
    ) -> Self {
        Self {
            id: 0,
            book_id,
            user_id,
            issue_date: now,
            due_date: now + loan_period,
            return_date: None,
            status: IssueStatus::Issued,
            fine_amount: Decimal::ZERO,
            reservation_id,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == IssueStatus::Issued
    }

    /// `Issued -> Returned`, exactly once
    pub fn mark_returned(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        if self.status == IssueStatus::Returned {
            return Err(AppError::AlreadyReturned(format!(
                "Issue {} was already returned",
                self.id
            )));
        }
        if at < self.issue_date {
            return Err(AppError::Validation(
                "Return date cannot be before the issue date".to_string(),
            ));
        }
        self.return_date = Some(at);
        self.status = IssueStatus::Returned;
        Ok(())
    }

    /// Whole calendar days past the due date: at the return date once
    /// returned, at `as_of` while still out.
    pub fn overdue_days(&self, as_of: DateTime<Utc>) -> i64 {
        let end = self.return_date.unwrap_or(as_of);
        (end.date_naive() - self.due_date.date_naive())
            .num_days()
            .max(0)
    }

    pub fn is_overdue(&self, as_of: DateTime<Utc>) -> bool {
        self.overdue_days(as_of) > 0
    }
}

/// Filter for issue listings
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IssueFilter {
    pub user_id: Option<i32>,
    pub book_id: Option<i32>,
    pub status: Option<IssueStatus>,
    /// Only issues made at or after this instant
    pub issued_from: Option<DateTime<Utc>>,
}

impl IssueFilter {
    pub fn open_for(user_id: i32, book_id: i32) -> Self {
        Self {
            user_id: Some(user_id),
            book_id: Some(book_id),
            status: Some(IssueStatus::Issued),
            issued_from: None,
        }
    }

    pub fn matches(&self, issue: &IssueRecord) -> bool {
        self.user_id.map_or(true, |id| issue.user_id == id)
            && self.book_id.map_or(true, |id| issue.book_id == id)
            && self.status.map_or(true, |s| issue.status == s)
            && self.issued_from.map_or(true, |from| issue.issue_date >= from)
    }
}
