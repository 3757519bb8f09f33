//! Reservations and the per-book waiting queue

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::enums::ReservationStatus;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Reservation {
    pub id: i32,
    pub book_id: i32,
    pub user_id: i32,
    pub requested_at: DateTime<Utc>,
    /// 1-based rank among the open reservations of the book, 0 once closed.
    /// A cache of the `requested_at` ordering, rewritten by [`BookQueue`].
    pub queue_position: i32,
    pub status: ReservationStatus,
    /// Set while Active: the held copy is released after this instant
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// New `Pending` reservation. The store assigns the id.
    pub fn pending(book_id: i32, user_id: i32, now: DateTime<Utc>, position: i32) -> Self {
        Self {
            id: 0,
            book_id,
            user_id,
            requested_at: now,
            queue_position: position,
            status: ReservationStatus::Pending,
            hold_expires_at: None,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active
            && self.hold_expires_at.is_some_and(|until| until <= now)
    }
}

/// Filter for reservation listings
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub user_id: Option<i32>,
    pub book_id: Option<i32>,
    pub open_only: bool,
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        self.user_id.map_or(true, |id| reservation.user_id == id)
            && self.book_id.map_or(true, |id| reservation.book_id == id)
            && (!self.open_only || reservation.is_open())
    }
}

/// Open (Pending/Active) reservations of one book, kept in
/// `(requested_at, id)` order. Positions are derived from that order and
/// every row whose status or position moved is reported by [`Self::changes`].
#[derive(Debug, Clone)]
pub struct BookQueue {
    book_id: i32,
    entries: Vec<Reservation>,
    closed: Vec<Reservation>,
    dirty: BTreeSet<i32>,
}

impl BookQueue {
    pub fn new(book_id: i32, reservations: Vec<Reservation>) -> Self {
        let mut entries: Vec<Reservation> = reservations
            .into_iter()
            .filter(|r| r.book_id == book_id && r.is_open())
            .collect();
        entries.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then(a.id.cmp(&b.id)));

        Self {
            book_id,
            entries,
            closed: Vec::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn book_id(&self) -> i32 {
        self.book_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Reservation] {
        &self.entries
    }

    /// Position a reservation appended now would get
    pub fn next_position(&self) -> i32 {
        self.entries.len() as i32 + 1
    }

    pub fn entry_for_user(&self, user_id: i32) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.user_id == user_id)
    }

    pub fn get(&self, reservation_id: i32) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.id == reservation_id)
    }

    /// Ids of Active holds that lapsed at `now`
    pub fn lapsed_holds(&self, now: DateTime<Utc>) -> Vec<i32> {
        self.entries
            .iter()
            .filter(|r| r.hold_lapsed(now))
            .map(|r| r.id)
            .collect()
    }

    /// Pending reservation with the best rank, promoted to Active with a
    /// hold until `hold_until`
    pub fn promote_next(&mut self, hold_until: DateTime<Utc>) -> Option<Reservation> {
        let next = self
            .entries
            .iter_mut()
            .find(|r| r.status == ReservationStatus::Pending)?;
        next.status = ReservationStatus::Active;
        next.hold_expires_at = Some(hold_until);
        self.dirty.insert(next.id);
        Some(next.clone())
    }

    /// Take a reservation out of the queue into a terminal state
    pub fn close(
        &mut self,
        reservation_id: i32,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        if status.is_open() {
            return Err(AppError::Internal(format!(
                "Cannot close reservation {} as {}",
                reservation_id, status
            )));
        }
        let index = self
            .entries
            .iter()
            .position(|r| r.id == reservation_id)
            .ok_or_else(|| {
                AppError::Validation(format!("Reservation {} is not open", reservation_id))
            })?;

        let mut reservation = self.entries.remove(index);
        reservation.status = status;
        reservation.queue_position = 0;
        reservation.hold_expires_at = None;
        reservation.closed_at = Some(at);
        self.dirty.remove(&reservation_id);
        self.closed.push(reservation.clone());
        Ok(reservation)
    }

    /// Rewrite positions as the dense ranking 1..N
    pub fn renumber(&mut self) {
        for (index, reservation) in self.entries.iter_mut().enumerate() {
            let position = index as i32 + 1;
            if reservation.queue_position != position {
                reservation.queue_position = position;
                self.dirty.insert(reservation.id);
            }
        }
    }

    /// Every reservation that has to be written back: the closed ones and
    /// open ones whose status or position moved. Renumbers first.
    pub fn changes(&mut self) -> Vec<Reservation> {
        self.renumber();
        let mut changed: Vec<Reservation> = self.closed.drain(..).collect();
        changed.extend(
            self.entries
                .iter()
                .filter(|r| self.dirty.contains(&r.id))
                .cloned(),
        );
        self.dirty.clear();
        changed
    }
}
