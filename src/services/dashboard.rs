//! Read-only projections for the role dashboards

use std::sync::Arc;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    clock::Clock,
    error::AppResult,
    models::{fine::accrued_fine, Book, IssueFilter, IssueRecord, IssueStatus, Membership},
    repository::Repository,
};

const RECENT_ISSUES: usize = 5;
const PREMIUM_SAMPLE: i64 = 6;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminDashboard {
    pub total_books: i64,
    pub total_issues: i64,
    pub active_members: i64,
    pub total_unpaid_fines: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LibrarianDashboard {
    pub total_books: i64,
    pub issued_today: i64,
    /// Copies still out past their due date
    pub overdue_count: i64,
    /// Pending and Active reservations
    pub active_reservations: i64,
    pub students_with_unpaid_fines: i64,
    pub total_unpaid_fine: Decimal,
    /// Amount of the most recently paid fine
    pub last_fine_collected: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudentDashboard {
    pub membership: Option<Membership>,
    pub is_membership_active: bool,
    pub has_premium_access: bool,
    pub current_issued_count: usize,
    pub overdue_count: usize,
    pub total_books_count: i64,
    /// Fines charged for late returns and not yet paid
    pub total_unpaid_fine: Decimal,
    /// What the copies still out would owe if returned now. Not charged.
    pub projected_fine: Decimal,
    pub recent_issues: Vec<IssueRecord>,
    pub premium_books_sample: Vec<Book>,
}

#[derive(Clone)]
pub struct DashboardService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    fine_per_day: Decimal,
}

impl DashboardService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, fine_per_day: Decimal) -> Self {
        Self {
            repository,
            clock,
            fine_per_day,
        }
    }

    pub async fn admin(&self) -> AppResult<AdminDashboard> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        Ok(AdminDashboard {
            total_books: uow.count_books().await?,
            total_issues: uow.count_issues(&IssueFilter::default()).await?,
            active_members: uow.count_active_members(now).await?,
            total_unpaid_fines: uow.unpaid_totals(None).await?.amount,
        })
    }

    pub async fn librarian(&self) -> AppResult<LibrarianDashboard> {
        let now = self.clock.now();
        let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let mut uow = self.repository.begin().await?;

        let issued_today = uow
            .count_issues(&IssueFilter {
                issued_from: Some(midnight),
                ..Default::default()
            })
            .await?;
        let unpaid = uow.unpaid_totals(None).await?;

        Ok(LibrarianDashboard {
            total_books: uow.count_books().await?,
            issued_today,
            overdue_count: uow.count_overdue(now, None).await?,
            active_reservations: uow.count_open_reservations().await?,
            students_with_unpaid_fines: unpaid.debtors,
            total_unpaid_fine: unpaid.amount,
            last_fine_collected: uow.last_paid_fine().await?.unwrap_or(Decimal::ZERO),
        })
    }

    pub async fn student(&self, user_id: i32) -> AppResult<StudentDashboard> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        let membership = uow.membership(user_id).await?;
        let is_membership_active = membership.as_ref().is_some_and(|m| m.is_active_at(now));
        let has_premium_access = membership
            .as_ref()
            .is_some_and(|m| m.has_premium_access(now));

        let issues = uow
            .list_issues(&IssueFilter {
                user_id: Some(user_id),
                ..Default::default()
            })
            .await?;
        let open: Vec<&IssueRecord> = issues
            .iter()
            .filter(|i| i.status == IssueStatus::Issued)
            .collect();
        let overdue_count = open.iter().filter(|i| i.is_overdue(now)).count();
        let projected_fine: Decimal = open
            .iter()
            .map(|i| accrued_fine(i, now, self.fine_per_day))
            .sum();

        let total_unpaid_fine = uow.unpaid_totals(Some(user_id)).await?.amount;
        let total_books_count = uow.count_books().await?;
        let premium_books_sample = if has_premium_access {
            uow.sample_books(PREMIUM_SAMPLE).await?
        } else {
            Vec::new()
        };

        Ok(StudentDashboard {
            membership,
            is_membership_active,
            has_premium_access,
            current_issued_count: open.len(),
            overdue_count,
            total_books_count,
            total_unpaid_fine,
            projected_fine,
            recent_issues: issues.iter().take(RECENT_ISSUES).cloned().collect(),
            premium_books_sample,
        })
    }
}
