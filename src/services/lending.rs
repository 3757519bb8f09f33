//! Lending engine: borrow requests and returns

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use utoipa::ToSchema;

use super::{
    fines::settle_fine,
    notifications::{report_result, Outcome, OutcomeSink},
    reservations::{self, QueueChanges},
};
use crate::{
    clock::Clock,
    config::LendingConfig,
    error::{AppError, AppResult},
    models::{
        Actor, Book, Fine, IssueFilter, IssueRecord, IssueStatus, Reservation, ReservationStatus,
    },
    repository::Repository,
};

/// Result of a borrow request
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BorrowOutcome {
    /// A copy was lent out
    Issued { issue: IssueRecord, book: Book },
    /// No copy was free, the student joined the queue
    Reserved { reservation: Reservation, book: Book },
}

/// Result of a return
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReturnOutcome {
    pub issue: IssueRecord,
    pub book: Book,
    /// Set when the copy came back late
    pub fine: Option<Fine>,
    /// Reservations that received a held copy
    pub promoted: Vec<Reservation>,
}

#[derive(Clone)]
pub struct LendingService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    outcomes: Arc<dyn OutcomeSink>,
    settings: LendingConfig,
}

impl LendingService {
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        outcomes: Arc<dyn OutcomeSink>,
        settings: LendingConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            outcomes,
            settings,
        }
    }

    fn loan_period(&self) -> Duration {
        Duration::days(self.settings.loan_period_days)
    }

    fn hold_window(&self) -> Duration {
        Duration::hours(self.settings.hold_window_hours)
    }

    /// Lend `book_id` to `user_id`, or queue the request when no copy is
    /// free and `reserve_if_unavailable` is set. A student holding an Active
    /// reservation for the book collects the held copy.
    pub async fn request_borrow(
        &self,
        user_id: i32,
        book_id: i32,
        reserve_if_unavailable: bool,
    ) -> AppResult<BorrowOutcome> {
        let result = self.try_borrow(user_id, book_id, reserve_if_unavailable).await;
        report_result(self.outcomes.as_ref(), user_id, &result, |outcome| match outcome {
            BorrowOutcome::Issued { issue, book } => format!(
                "\"{}\" issued, due back on {}",
                book.title,
                issue.due_date.format("%Y-%m-%d")
            ),
            BorrowOutcome::Reserved { reservation, book } => format!(
                "No copy of \"{}\" is free, you are number {} in the queue",
                book.title, reservation.queue_position
            ),
        });
        result
    }

    async fn try_borrow(
        &self,
        user_id: i32,
        book_id: i32,
        reserve_if_unavailable: bool,
    ) -> AppResult<BorrowOutcome> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        let mut book = uow
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;

        let membership = uow.membership(user_id).await?.ok_or_else(|| {
            AppError::NotEligible("A library membership is required to borrow".to_string())
        })?;
        if let Err(e) = membership.check_can_borrow(now) {
            tracing::warn!(user_id, book_id, "Borrow refused: {}", e);
            return Err(e);
        }

        let mut queue = reservations::load_queue(uow.as_mut(), book_id).await?;
        let mut changes = QueueChanges {
            expired: reservations::expire_lapsed(&mut book, &mut queue, now)?,
            promoted: reservations::promote(&mut book, &mut queue, now + self.hold_window())?,
        };

        let open_issues = uow.list_issues(&IssueFilter::open_for(user_id, book_id)).await?;
        if !open_issues.is_empty() {
            tracing::warn!(user_id, book_id, "Borrow refused: copy already issued");
            return Err(AppError::DuplicateRequest(format!(
                "You already have \"{}\" on loan",
                book.title
            )));
        }

        let existing = queue.entry_for_user(user_id).cloned();
        let outcome = match existing {
            Some(held) if held.status == ReservationStatus::Active => {
                // the copy was taken off the shelf when the hold started
                queue.close(held.id, ReservationStatus::Fulfilled, now)?;
                changes.promoted.retain(|r| r.id != held.id);
                let issue = uow
                    .insert_issue(&IssueRecord::open(
                        book_id,
                        user_id,
                        now,
                        self.loan_period(),
                        Some(held.id),
                    ))
                    .await?;
                tracing::info!(
                    user_id,
                    book_id,
                    issue_id = issue.id,
                    reservation_id = held.id,
                    "Held copy collected"
                );
                BorrowOutcome::Issued { issue, book: book.clone() }
            }
            Some(_) => {
                tracing::warn!(user_id, book_id, "Borrow refused: already queued");
                return Err(AppError::DuplicateRequest(format!(
                    "You are already in the queue for \"{}\"",
                    book.title
                )));
            }
            None if book.available_copies > 0 => {
                book.take_copy()?;
                let issue = uow
                    .insert_issue(&IssueRecord::open(
                        book_id,
                        user_id,
                        now,
                        self.loan_period(),
                        None,
                    ))
                    .await?;
                tracing::info!(user_id, book_id, issue_id = issue.id, "Book issued");
                BorrowOutcome::Issued { issue, book: book.clone() }
            }
            None if reserve_if_unavailable => {
                let reservation = uow
                    .insert_reservation(&Reservation::pending(
                        book_id,
                        user_id,
                        now,
                        queue.next_position(),
                    ))
                    .await?;
                tracing::info!(
                    user_id,
                    book_id,
                    reservation_id = reservation.id,
                    position = reservation.queue_position,
                    "No copy free, reservation queued"
                );
                BorrowOutcome::Reserved { reservation, book: book.clone() }
            }
            None => {
                tracing::warn!(user_id, book_id, "Borrow refused: out of stock");
                return Err(AppError::OutOfStock(format!(
                    "No copy of \"{}\" is available",
                    book.title
                )));
            }
        };

        reservations::write_back(uow.as_mut(), &book, &mut queue).await?;
        uow.commit().await?;

        reservations::announce(self.outcomes.as_ref(), &book, &changes);
        Ok(outcome)
    }

    /// Close an issue record: stamp the return, put the copy back, charge
    /// the fine for a late return and hand the copy to the queue.
    pub async fn return_book(&self, actor: Actor, issue_id: i32) -> AppResult<ReturnOutcome> {
        let result = self.try_return(issue_id).await;
        report_result(self.outcomes.as_ref(), actor.user_id, &result, |outcome| {
            format!("Issue {} closed", outcome.issue.id)
        });
        if let Ok(outcome) = &result {
            let message = match &outcome.fine {
                Some(fine) => format!(
                    "\"{}\" returned late, a fine of {} was charged",
                    outcome.book.title, fine.amount
                ),
                None => format!("\"{}\" returned, thank you", outcome.book.title),
            };
            if outcome.issue.user_id != actor.user_id {
                self.outcomes.report(outcome.issue.user_id, Outcome::info(message));
            }
        }
        result
    }

    async fn try_return(&self, issue_id: i32) -> AppResult<ReturnOutcome> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        let book_id = uow
            .issue(issue_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Issue {} not found", issue_id)))?
            .book_id;

        let mut book = uow
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;
        let mut issue = uow
            .lock_issue(issue_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Issue {} not found", issue_id)))?;

        issue.mark_returned(now)?;
        book.release_copy()?;

        let fine = settle_fine(uow.as_mut(), &mut issue, self.settings.fine_per_day, now).await?;
        uow.update_issue(&issue).await?;

        let mut queue = reservations::load_queue(uow.as_mut(), book_id).await?;
        let changes =
            reservations::settle(uow.as_mut(), &mut book, &mut queue, now, self.hold_window())
                .await?;
        uow.commit().await?;

        tracing::info!(
            issue_id,
            book_id,
            user_id = issue.user_id,
            fine = %issue.fine_amount,
            promoted = changes.promoted.len(),
            "Book returned"
        );
        reservations::announce(self.outcomes.as_ref(), &book, &changes);

        Ok(ReturnOutcome {
            issue,
            book,
            fine,
            promoted: changes.promoted,
        })
    }

    pub async fn issue(&self, issue_id: i32) -> AppResult<IssueRecord> {
        let mut uow = self.repository.begin().await?;
        uow.issue(issue_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Issue {} not found", issue_id)))
    }

    pub async fn issues_for_user(&self, user_id: i32) -> AppResult<Vec<IssueRecord>> {
        self.list_issues(IssueFilter {
            user_id: Some(user_id),
            ..Default::default()
        })
        .await
    }

    /// Issue records, newest first. `status = Returned` gives the returns history.
    pub async fn list_issues(&self, filter: IssueFilter) -> AppResult<Vec<IssueRecord>> {
        let mut uow = self.repository.begin().await?;
        uow.list_issues(&filter).await
    }

    /// Open issue records past their due date
    pub async fn overdue_issues(&self) -> AppResult<Vec<IssueRecord>> {
        let now = self.clock.now();
        let issues = self
            .list_issues(IssueFilter {
                status: Some(IssueStatus::Issued),
                ..Default::default()
            })
            .await?;
        Ok(issues.into_iter().filter(|i| i.is_overdue(now)).collect())
    }
}
