//! Repository layer: the persistence interface the services run against
//!
//! Every operation happens inside a [`UnitOfWork`]. Dropping a unit of work
//! without calling [`UnitOfWork::commit`] discards everything it did.
//! `lock_*` reads take the row for the rest of the unit of work; callers
//! lock the book row before anything hanging off it.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        Book, Fine, FineFilter, IssueFilter, IssueRecord, Membership, Payment, PaymentFilter,
        Reservation, ReservationFilter, UnpaidTotals,
    },
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Start an atomic unit of work
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>>;

    /// Check the store is reachable
    async fn ping(&self) -> AppResult<()>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    // Books
    async fn book(&mut self, id: i32) -> AppResult<Option<Book>>;
    async fn lock_book(&mut self, id: i32) -> AppResult<Option<Book>>;
    async fn list_books(&mut self) -> AppResult<Vec<Book>>;
    async fn insert_book(&mut self, book: &Book) -> AppResult<Book>;
    async fn update_book(&mut self, book: &Book) -> AppResult<()>;
    async fn delete_book(&mut self, id: i32) -> AppResult<()>;

    // Memberships
    async fn membership(&mut self, user_id: i32) -> AppResult<Option<Membership>>;
    async fn membership_by_barcode(&mut self, barcode: &str) -> AppResult<Option<Membership>>;
    async fn list_memberships(&mut self) -> AppResult<Vec<Membership>>;
    async fn insert_membership(&mut self, membership: &Membership) -> AppResult<Membership>;
    async fn update_membership(&mut self, membership: &Membership) -> AppResult<()>;

    // Issue records, newest first
    async fn issue(&mut self, id: i32) -> AppResult<Option<IssueRecord>>;
    async fn lock_issue(&mut self, id: i32) -> AppResult<Option<IssueRecord>>;
    async fn list_issues(&mut self, filter: &IssueFilter) -> AppResult<Vec<IssueRecord>>;
    async fn insert_issue(&mut self, issue: &IssueRecord) -> AppResult<IssueRecord>;
    async fn update_issue(&mut self, issue: &IssueRecord) -> AppResult<()>;

    // Reservations
    async fn reservation(&mut self, id: i32) -> AppResult<Option<Reservation>>;
    /// Pending and Active reservations of a book, locked
    async fn open_reservations(&mut self, book_id: i32) -> AppResult<Vec<Reservation>>;
    /// Newest first
    async fn list_reservations(&mut self, filter: &ReservationFilter)
        -> AppResult<Vec<Reservation>>;
    /// Books holding at least one Active reservation whose hold lapsed
    async fn books_with_lapsed_holds(&mut self, now: DateTime<Utc>) -> AppResult<Vec<i32>>;
    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<Reservation>;
    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;

    // Fines, newest first
    async fn fine(&mut self, id: i32) -> AppResult<Option<Fine>>;
    async fn lock_fine(&mut self, id: i32) -> AppResult<Option<Fine>>;
    /// Locked
    async fn fine_for_issue(&mut self, issue_id: i32) -> AppResult<Option<Fine>>;
    async fn list_fines(&mut self, filter: &FineFilter) -> AppResult<Vec<Fine>>;
    async fn insert_fine(&mut self, fine: &Fine) -> AppResult<Fine>;
    async fn update_fine(&mut self, fine: &Fine) -> AppResult<()>;

    // Payments, oldest first
    async fn payment(&mut self, id: i32) -> AppResult<Option<Payment>>;
    async fn lock_payment(&mut self, id: i32) -> AppResult<Option<Payment>>;
    async fn list_payments(&mut self, filter: &PaymentFilter) -> AppResult<Vec<Payment>>;
    async fn insert_payment(&mut self, payment: &Payment) -> AppResult<Payment>;
    async fn update_payment(&mut self, payment: &Payment) -> AppResult<()>;

    // Aggregates, computed by the store
    async fn count_books(&mut self) -> AppResult<i64>;
    /// First `limit` books in catalogue order
    async fn sample_books(&mut self, limit: i64) -> AppResult<Vec<Book>>;
    async fn count_issues(&mut self, filter: &IssueFilter) -> AppResult<i64>;
    /// Copies still out whose due date is a calendar day before `now`,
    /// optionally for one user
    async fn count_overdue(&mut self, now: DateTime<Utc>, user_id: Option<i32>)
        -> AppResult<i64>;
    async fn count_active_members(&mut self, now: DateTime<Utc>) -> AppResult<i64>;
    /// Pending and Active reservations
    async fn count_open_reservations(&mut self) -> AppResult<i64>;
    async fn unpaid_totals(&mut self, user_id: Option<i32>) -> AppResult<UnpaidTotals>;
    /// Amount of the most recently paid fine
    async fn last_paid_fine(&mut self) -> AppResult<Option<Decimal>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Shared handle on the configured store
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Repository backed by PostgreSQL
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self::new(Arc::new(postgres::PgStore::new(pool)))
    }

    /// Repository kept in process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(memory::InMemoryStore::new()))
    }

    pub async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        self.store.begin().await
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }
}
