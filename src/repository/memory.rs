//! In-memory store
//!
//! Same interface as the PostgreSQL store. A unit of work holds the store
//! lock for its whole life and works on a copy of the tables, so units of
//! work are fully serialized and a dropped one leaves no trace.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::{
        Book, Fine, FineFilter, IssueFilter, IssueRecord, Membership, Payment, PaymentFilter,
        Reservation, ReservationFilter, UnpaidTotals,
    },
};

#[derive(Debug, Clone, Default)]
struct Sequences {
    book: i32,
    membership: i32,
    issue: i32,
    reservation: i32,
    fine: i32,
    payment: i32,
}

fn next_id(counter: &mut i32) -> i32 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Default)]
struct Tables {
    books: BTreeMap<i32, Book>,
    memberships: BTreeMap<i32, Membership>,
    issues: BTreeMap<i32, IssueRecord>,
    reservations: BTreeMap<i32, Reservation>,
    fines: BTreeMap<i32, Fine>,
    payments: BTreeMap<i32, Payment>,
    sequences: Sequences,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

fn replace<T: Clone>(table: &mut BTreeMap<i32, T>, id: i32, row: &T, what: &str) -> AppResult<()> {
    match table.get_mut(&id) {
        Some(existing) => {
            *existing = row.clone();
            Ok(())
        }
        None => Err(AppError::NotFound(format!("{} {} not found", what, id))),
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn book(&mut self, id: i32) -> AppResult<Option<Book>> {
        Ok(self.working.books.get(&id).cloned())
    }

    async fn lock_book(&mut self, id: i32) -> AppResult<Option<Book>> {
        self.book(id).await
    }

    async fn list_books(&mut self) -> AppResult<Vec<Book>> {
        let mut books: Vec<Book> = self.working.books.values().cloned().collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn insert_book(&mut self, book: &Book) -> AppResult<Book> {
        let mut row = book.clone();
        row.id = next_id(&mut self.working.sequences.book);
        self.working.books.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_book(&mut self, book: &Book) -> AppResult<()> {
        replace(&mut self.working.books, book.id, book, "Book")
    }

    async fn delete_book(&mut self, id: i32) -> AppResult<()> {
        let referenced = self.working.issues.values().any(|i| i.book_id == id)
            || self.working.reservations.values().any(|r| r.book_id == id);
        if referenced {
            return Err(AppError::Validation(
                "Record is still referenced by lending history".to_string(),
            ));
        }
        self.working
            .books
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))
    }

    async fn membership(&mut self, user_id: i32) -> AppResult<Option<Membership>> {
        Ok(self
            .working
            .memberships
            .values()
            .find(|m| m.user_id == user_id)
            .cloned())
    }

    async fn membership_by_barcode(&mut self, barcode: &str) -> AppResult<Option<Membership>> {
        Ok(self
            .working
            .memberships
            .values()
            .find(|m| m.barcode.as_deref() == Some(barcode))
            .cloned())
    }

    async fn list_memberships(&mut self) -> AppResult<Vec<Membership>> {
        Ok(self.working.memberships.values().cloned().collect())
    }

    async fn insert_membership(&mut self, membership: &Membership) -> AppResult<Membership> {
        let mut row = membership.clone();
        row.id = next_id(&mut self.working.sequences.membership);
        self.working.memberships.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_membership(&mut self, membership: &Membership) -> AppResult<()> {
        replace(&mut self.working.memberships, membership.id, membership, "Membership")
    }

    async fn issue(&mut self, id: i32) -> AppResult<Option<IssueRecord>> {
        Ok(self.working.issues.get(&id).cloned())
    }

    async fn lock_issue(&mut self, id: i32) -> AppResult<Option<IssueRecord>> {
        self.issue(id).await
    }

    async fn list_issues(&mut self, filter: &IssueFilter) -> AppResult<Vec<IssueRecord>> {
        let mut issues: Vec<IssueRecord> = self
            .working
            .issues
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        issues.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then(b.id.cmp(&a.id)));
        Ok(issues)
    }

    async fn insert_issue(&mut self, issue: &IssueRecord) -> AppResult<IssueRecord> {
        if !self.working.books.contains_key(&issue.book_id) {
            return Err(AppError::NotFound(format!("Book {} not found", issue.book_id)));
        }
        let mut row = issue.clone();
        row.id = next_id(&mut self.working.sequences.issue);
        self.working.issues.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_issue(&mut self, issue: &IssueRecord) -> AppResult<()> {
        replace(&mut self.working.issues, issue.id, issue, "Issue")
    }

    async fn reservation(&mut self, id: i32) -> AppResult<Option<Reservation>> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn open_reservations(&mut self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let filter = ReservationFilter {
            book_id: Some(book_id),
            open_only: true,
            ..Default::default()
        };
        let mut open: Vec<Reservation> = self
            .working
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        open.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then(a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn list_reservations(
        &mut self,
        filter: &ReservationFilter,
    ) -> AppResult<Vec<Reservation>> {
        let mut reservations: Vec<Reservation> = self
            .working
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        Ok(reservations)
    }

    async fn books_with_lapsed_holds(&mut self, now: DateTime<Utc>) -> AppResult<Vec<i32>> {
        let books: BTreeSet<i32> = self
            .working
            .reservations
            .values()
            .filter(|r| r.hold_lapsed(now))
            .map(|r| r.book_id)
            .collect();
        Ok(books.into_iter().collect())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<Reservation> {
        if !self.working.books.contains_key(&reservation.book_id) {
            return Err(AppError::NotFound(format!(
                "Book {} not found",
                reservation.book_id
            )));
        }
        let mut row = reservation.clone();
        row.id = next_id(&mut self.working.sequences.reservation);
        self.working.reservations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        replace(&mut self.working.reservations, reservation.id, reservation, "Reservation")
    }

    async fn fine(&mut self, id: i32) -> AppResult<Option<Fine>> {
        Ok(self.working.fines.get(&id).cloned())
    }

    async fn lock_fine(&mut self, id: i32) -> AppResult<Option<Fine>> {
        self.fine(id).await
    }

    async fn fine_for_issue(&mut self, issue_id: i32) -> AppResult<Option<Fine>> {
        Ok(self
            .working
            .fines
            .values()
            .find(|f| f.issue_id == issue_id)
            .cloned())
    }

    async fn list_fines(&mut self, filter: &FineFilter) -> AppResult<Vec<Fine>> {
        let mut fines: Vec<Fine> = self
            .working
            .fines
            .values()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        fines.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(fines)
    }

    async fn insert_fine(&mut self, fine: &Fine) -> AppResult<Fine> {
        if self.working.fines.values().any(|f| f.issue_id == fine.issue_id) {
            return Err(AppError::Retryable(format!(
                "Issue {} already has a fine",
                fine.issue_id
            )));
        }
        let mut row = fine.clone();
        row.id = next_id(&mut self.working.sequences.fine);
        self.working.fines.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_fine(&mut self, fine: &Fine) -> AppResult<()> {
        replace(&mut self.working.fines, fine.id, fine, "Fine")
    }

    async fn payment(&mut self, id: i32) -> AppResult<Option<Payment>> {
        Ok(self.working.payments.get(&id).cloned())
    }

    async fn lock_payment(&mut self, id: i32) -> AppResult<Option<Payment>> {
        self.payment(id).await
    }

    async fn list_payments(&mut self, filter: &PaymentFilter) -> AppResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .working
            .payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> AppResult<Payment> {
        if !self.working.fines.contains_key(&payment.fine_id) {
            return Err(AppError::NotFound(format!("Fine {} not found", payment.fine_id)));
        }
        let mut row = payment.clone();
        row.id = next_id(&mut self.working.sequences.payment);
        self.working.payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_payment(&mut self, payment: &Payment) -> AppResult<()> {
        replace(&mut self.working.payments, payment.id, payment, "Payment")
    }

    async fn count_books(&mut self) -> AppResult<i64> {
        Ok(self.working.books.len() as i64)
    }

    async fn sample_books(&mut self, limit: i64) -> AppResult<Vec<Book>> {
        let mut books = self.list_books().await?;
        books.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(books)
    }

    async fn count_issues(&mut self, filter: &IssueFilter) -> AppResult<i64> {
        Ok(self.working.issues.values().filter(|i| filter.matches(i)).count() as i64)
    }

    async fn count_overdue(
        &mut self,
        now: DateTime<Utc>,
        user_id: Option<i32>,
    ) -> AppResult<i64> {
        let count = self
            .working
            .issues
            .values()
            .filter(|i| user_id.map_or(true, |id| i.user_id == id))
            .filter(|i| i.is_open() && i.is_overdue(now))
            .count();
        Ok(count as i64)
    }

    async fn count_active_members(&mut self, now: DateTime<Utc>) -> AppResult<i64> {
        let count = self
            .working
            .memberships
            .values()
            .filter(|m| m.is_active_at(now))
            .count();
        Ok(count as i64)
    }

    async fn count_open_reservations(&mut self) -> AppResult<i64> {
        Ok(self.working.reservations.values().filter(|r| r.is_open()).count() as i64)
    }

    async fn unpaid_totals(&mut self, user_id: Option<i32>) -> AppResult<UnpaidTotals> {
        let filter = FineFilter {
            user_id,
            is_paid: Some(false),
        };
        let mut debtors = BTreeSet::new();
        let amount: Decimal = self
            .working
            .fines
            .values()
            .filter(|f| filter.matches(f))
            .inspect(|f| {
                debtors.insert(f.user_id);
            })
            .map(|f| f.amount)
            .sum();
        Ok(UnpaidTotals {
            amount,
            debtors: debtors.len() as i64,
        })
    }

    async fn last_paid_fine(&mut self) -> AppResult<Option<Decimal>> {
        let amount = self
            .working
            .fines
            .values()
            .filter(|f| f.is_paid)
            .max_by_key(|f| (f.paid_at, f.id))
            .map(|f| f.amount);
        Ok(amount)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewBook;
    use chrono::{Duration, TimeZone};

    fn book() -> Book {
        NewBook {
            title: "Dune".to_string(),
            author: "Herbert".to_string(),
            category: "SF".to_string(),
            total_copies: 2,
            available_copies: None,
        }
        .into_book(Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let inserted = uow.insert_book(&book()).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.book(inserted.id).await.unwrap(), Some(inserted));
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_rolls_back() {
        let store = InMemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_book(&book()).await.unwrap();
        }

        let mut uow = store.begin().await.unwrap();
        assert!(uow.list_books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_aggregates_follow_the_tables() {
        let store = InMemoryStore::new();
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let mut uow = store.begin().await.unwrap();
        let dune = uow.insert_book(&book()).await.unwrap();

        let late = uow
            .insert_issue(&IssueRecord::open(dune.id, 1, start, Duration::days(7), None))
            .await
            .unwrap();
        let recent_start = start + Duration::days(9);
        let recent = IssueRecord::open(dune.id, 2, recent_start, Duration::days(7), None);
        uow.insert_issue(&recent).await.unwrap();

        let now = start + Duration::days(10);
        assert_eq!(uow.count_books().await.unwrap(), 1);
        assert_eq!(uow.count_issues(&IssueFilter::default()).await.unwrap(), 2);
        assert_eq!(uow.count_overdue(now, None).await.unwrap(), 1);
        assert_eq!(uow.count_overdue(now, Some(2)).await.unwrap(), 0);
        // Due day itself is not overdue
        assert_eq!(uow.count_overdue(start + Duration::days(7), None).await.unwrap(), 0);

        let mut paid = Fine::new(&late, Decimal::from(30), now);
        paid.is_paid = true;
        paid.paid_at = Some(now);
        uow.insert_fine(&paid).await.unwrap();
        let mut second = IssueRecord::open(dune.id, 1, start, Duration::days(7), None);
        second.id = late.id + 100;
        uow.insert_fine(&Fine::new(&second, Decimal::from(20), now)).await.unwrap();
        let mut third = IssueRecord::open(dune.id, 3, start, Duration::days(7), None);
        third.id = late.id + 101;
        uow.insert_fine(&Fine::new(&third, Decimal::from(5), now)).await.unwrap();

        let totals = uow.unpaid_totals(None).await.unwrap();
        assert_eq!(totals.amount, Decimal::from(25));
        assert_eq!(totals.debtors, 2);
        assert_eq!(uow.unpaid_totals(Some(1)).await.unwrap().amount, Decimal::from(20));
        assert_eq!(uow.unpaid_totals(Some(9)).await.unwrap(), UnpaidTotals::default());
        assert_eq!(uow.last_paid_fine().await.unwrap(), Some(Decimal::from(30)));
    }

    #[tokio::test]
    async fn test_sample_books_in_catalogue_order() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        for title in ["Middlemarch", "Anathem", "Solaris"] {
            let mut b = book();
            b.title = title.to_string();
            uow.insert_book(&b).await.unwrap();
        }

        let sample = uow.sample_books(2).await.unwrap();
        let titles: Vec<_> = sample.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, ["Anathem", "Middlemarch"]);
        assert_eq!(uow.sample_books(10).await.unwrap().len(), 3);
    }
}
