//! Reservation queue service
//!
//! The queue helpers at the top run inside a unit of work opened by the
//! caller, which must already hold the lock on the book row.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::notifications::{report_result, Outcome, OutcomeSink};
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{Actor, Book, BookQueue, IssueFilter, Reservation, ReservationFilter, ReservationStatus},
    repository::{Repository, UnitOfWork},
};

/// What settling a queue changed
#[derive(Debug, Default)]
pub struct QueueChanges {
    pub expired: Vec<Reservation>,
    pub promoted: Vec<Reservation>,
}

pub(crate) async fn load_queue(uow: &mut dyn UnitOfWork, book_id: i32) -> AppResult<BookQueue> {
    let open = uow.open_reservations(book_id).await?;
    Ok(BookQueue::new(book_id, open))
}

/// Expire lapsed holds, releasing their copies
pub(crate) fn expire_lapsed(
    book: &mut Book,
    queue: &mut BookQueue,
    now: DateTime<Utc>,
) -> AppResult<Vec<Reservation>> {
    let mut expired = Vec::new();
    for id in queue.lapsed_holds(now) {
        let reservation = queue.close(id, ReservationStatus::Expired, now)?;
        book.release_copy()?;
        expired.push(reservation);
    }
    Ok(expired)
}

/// Hand shelf copies to the head of the queue, one per Pending reservation
pub(crate) fn promote(
    book: &mut Book,
    queue: &mut BookQueue,
    hold_until: DateTime<Utc>,
) -> AppResult<Vec<Reservation>> {
    let mut promoted = Vec::new();
    while book.available_copies > 0 {
        let Some(reservation) = queue.promote_next(hold_until) else {
            break;
        };
        book.take_copy()?;
        promoted.push(reservation);
    }
    Ok(promoted)
}

/// Expire, promote and renumber the queue of `book`, then write the queue
/// and the book back
pub(crate) async fn settle(
    uow: &mut dyn UnitOfWork,
    book: &mut Book,
    queue: &mut BookQueue,
    now: DateTime<Utc>,
    hold_window: Duration,
) -> AppResult<QueueChanges> {
    let expired = expire_lapsed(book, queue, now)?;
    let promoted = promote(book, queue, now + hold_window)?;
    write_back(uow, book, queue).await?;
    Ok(QueueChanges { expired, promoted })
}

pub(crate) async fn write_back(
    uow: &mut dyn UnitOfWork,
    book: &Book,
    queue: &mut BookQueue,
) -> AppResult<()> {
    for reservation in queue.changes() {
        uow.update_reservation(&reservation).await?;
    }
    uow.update_book(book).await
}

/// Tell reservants what happened to their place in the queue
pub(crate) fn announce(sink: &dyn OutcomeSink, book: &Book, changes: &QueueChanges) {
    for reservation in &changes.expired {
        sink.report(
            reservation.user_id,
            Outcome::info(format!(
                "Your hold on \"{}\" expired and the copy was released",
                book.title
            )),
        );
    }
    for reservation in &changes.promoted {
        let until = reservation
            .hold_expires_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default();
        sink.report(
            reservation.user_id,
            Outcome::success(format!(
                "A copy of \"{}\" is held for you until {}",
                book.title, until
            )),
        );
    }
}

#[derive(Clone)]
pub struct ReservationsService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    outcomes: Arc<dyn OutcomeSink>,
    hold_window: Duration,
}

impl ReservationsService {
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        outcomes: Arc<dyn OutcomeSink>,
        hold_window: Duration,
    ) -> Self {
        Self {
            repository,
            clock,
            outcomes,
            hold_window,
        }
    }

    /// Put `user_id` in the queue of a book without trying to issue a copy
    pub async fn reserve(&self, user_id: i32, book_id: i32) -> AppResult<Reservation> {
        let result = self.try_reserve(user_id, book_id).await;
        report_result(self.outcomes.as_ref(), user_id, &result, |r| {
            format!("Reservation placed at position {}", r.queue_position)
        });
        result
    }

    async fn try_reserve(&self, user_id: i32, book_id: i32) -> AppResult<Reservation> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        let mut book = uow
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;

        let mut queue = load_queue(uow.as_mut(), book_id).await?;
        let mut changes =
            settle(uow.as_mut(), &mut book, &mut queue, now, self.hold_window).await?;

        if queue.entry_for_user(user_id).is_some() {
            return Err(AppError::DuplicateRequest(format!(
                "User {} already has a reservation for \"{}\"",
                user_id, book.title
            )));
        }
        let open_issues = uow.list_issues(&IssueFilter::open_for(user_id, book_id)).await?;
        if !open_issues.is_empty() {
            return Err(AppError::DuplicateRequest(format!(
                "User {} already holds a copy of \"{}\"",
                user_id, book.title
            )));
        }

        let inserted = uow
            .insert_reservation(&Reservation::pending(book_id, user_id, now, queue.next_position()))
            .await?;

        // a copy still on the shelf goes straight to the new reservant
        let mut queue = load_queue(uow.as_mut(), book_id).await?;
        changes
            .promoted
            .extend(promote(&mut book, &mut queue, now + self.hold_window)?);
        write_back(uow.as_mut(), &book, &mut queue).await?;
        let reservation = queue.get(inserted.id).cloned().unwrap_or(inserted);
        uow.commit().await?;

        tracing::info!(
            user_id,
            book_id,
            reservation_id = reservation.id,
            position = reservation.queue_position,
            "Reservation placed"
        );
        announce(self.outcomes.as_ref(), &book, &changes);
        Ok(reservation)
    }

    /// Cancel a reservation. Cancelling an Active hold gives its copy to the
    /// next reservant.
    pub async fn cancel(&self, actor: Actor, reservation_id: i32) -> AppResult<Reservation> {
        let result = self.try_cancel(actor, reservation_id).await;
        report_result(self.outcomes.as_ref(), actor.user_id, &result, |r| {
            format!("Reservation {} cancelled", r.id)
        });
        result
    }

    async fn try_cancel(&self, actor: Actor, reservation_id: i32) -> AppResult<Reservation> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        let found = uow.reservation(reservation_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Reservation {} not found", reservation_id))
        })?;
        if !actor.may_act_for(found.user_id) {
            return Err(AppError::NotAuthorized(
                "Only the reservant or a librarian can cancel a reservation".to_string(),
            ));
        }

        let mut book = uow
            .lock_book(found.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", found.book_id)))?;
        let mut queue = load_queue(uow.as_mut(), found.book_id).await?;

        // re-read under the book lock
        let current = queue.get(reservation_id).cloned().ok_or_else(|| {
            AppError::Validation(format!("Reservation {} is no longer open", reservation_id))
        })?;

        let cancelled = queue.close(reservation_id, ReservationStatus::Cancelled, now)?;
        if current.status == ReservationStatus::Active {
            book.release_copy()?;
        }
        let changes = settle(uow.as_mut(), &mut book, &mut queue, now, self.hold_window).await?;
        uow.commit().await?;

        tracing::info!(
            reservation_id,
            book_id = book.id,
            by = actor.user_id,
            held_copy = current.status == ReservationStatus::Active,
            "Reservation cancelled"
        );
        announce(self.outcomes.as_ref(), &book, &changes);
        Ok(cancelled)
    }

    /// Expire every lapsed hold in the library. Returns how many expired.
    pub async fn expire_holds(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let book_ids = {
            let mut uow = self.repository.begin().await?;
            uow.books_with_lapsed_holds(now).await?
        };

        let mut expired = 0;
        for book_id in book_ids {
            expired += self.expire_book_holds(book_id, now).await?;
        }
        if expired > 0 {
            tracing::info!(expired, "Expired lapsed reservation holds");
        }
        Ok(expired)
    }

    async fn expire_book_holds(&self, book_id: i32, now: DateTime<Utc>) -> AppResult<usize> {
        let mut uow = self.repository.begin().await?;
        let Some(mut book) = uow.lock_book(book_id).await? else {
            return Ok(0);
        };
        let mut queue = load_queue(uow.as_mut(), book_id).await?;
        let changes = settle(uow.as_mut(), &mut book, &mut queue, now, self.hold_window).await?;
        uow.commit().await?;

        announce(self.outcomes.as_ref(), &book, &changes);
        Ok(changes.expired.len())
    }

    /// Open reservations of a book in queue order
    pub async fn queue_for_book(&self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let mut uow = self.repository.begin().await?;
        if uow.book(book_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Book {} not found", book_id)));
        }
        let queue = load_queue(uow.as_mut(), book_id).await?;
        let mut entries = queue.entries().to_vec();
        // positions are rank in request order even if the stored cache is stale
        for (index, reservation) in entries.iter_mut().enumerate() {
            reservation.queue_position = index as i32 + 1;
        }
        Ok(entries)
    }

    pub async fn reservations_for_user(&self, user_id: i32) -> AppResult<Vec<Reservation>> {
        self.list_reservations(ReservationFilter {
            user_id: Some(user_id),
            ..Default::default()
        })
        .await
    }

    pub async fn list_reservations(&self, filter: ReservationFilter) -> AppResult<Vec<Reservation>> {
        let mut uow = self.repository.begin().await?;
        uow.list_reservations(&filter).await
    }
}
