//! PostgreSQL store
//!
//! One database transaction per unit of work. `lock_*` reads and
//! `open_reservations` use `SELECT ... FOR UPDATE`; partial unique indexes
//! back the one-open-issue and one-open-reservation rules, so a request that
//! loses a race fails with a retryable error instead of slipping through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres, Transaction};

use super::{Store, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::{
        Book, Fine, FineFilter, IssueFilter, IssueRecord, Membership, Payment, PaymentFilter,
        Reservation, ReservationFilter, UnpaidTotals,
    },
};

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

fn issue_conditions(filter: &IssueFilter) -> Vec<String> {
    let mut conditions = Vec::new();
    if filter.user_id.is_some() {
        conditions.push(format!("user_id = ${}", conditions.len() + 1));
    }
    if filter.book_id.is_some() {
        conditions.push(format!("book_id = ${}", conditions.len() + 1));
    }
    if filter.status.is_some() {
        conditions.push(format!("status = ${}", conditions.len() + 1));
    }
    if filter.issued_from.is_some() {
        conditions.push(format!("issue_date >= ${}", conditions.len() + 1));
    }
    conditions
}

fn ensure_updated(rows_affected: u64, what: &str, id: i32) -> AppResult<()> {
    if rows_affected == 0 {
        return Err(AppError::NotFound(format!("{} {} not found", what, id)));
    }
    Ok(())
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    // -----------------------------------------------------------------------
    // Books
    // -----------------------------------------------------------------------

    async fn book(&mut self, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(book)
    }

    async fn lock_book(&mut self, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(book)
    }

    async fn list_books(&mut self) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>("SELECT * FROM books ORDER BY title, id")
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(books)
    }

    async fn insert_book(&mut self, book: &Book) -> AppResult<Book> {
        let row = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (title, author, category, total_copies, available_copies, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.category)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_book(&mut self, book: &Book) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET title = $1, author = $2, category = $3, total_copies = $4, available_copies = $5
            WHERE id = $6
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.category)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .bind(book.id)
        .execute(&mut *self.tx)
        .await?;
        ensure_updated(result.rows_affected(), "Book", book.id)
    }

    async fn delete_book(&mut self, id: i32) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        ensure_updated(result.rows_affected(), "Book", id)
    }

    // -----------------------------------------------------------------------
    // Memberships
    // -----------------------------------------------------------------------

    async fn membership(&mut self, user_id: i32) -> AppResult<Option<Membership>> {
        let membership =
            sqlx::query_as::<_, Membership>("SELECT * FROM memberships WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(membership)
    }

    async fn membership_by_barcode(&mut self, barcode: &str) -> AppResult<Option<Membership>> {
        let membership =
            sqlx::query_as::<_, Membership>("SELECT * FROM memberships WHERE barcode = $1")
                .bind(barcode)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(membership)
    }

    async fn list_memberships(&mut self) -> AppResult<Vec<Membership>> {
        let memberships = sqlx::query_as::<_, Membership>("SELECT * FROM memberships ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(memberships)
    }

    async fn insert_membership(&mut self, membership: &Membership) -> AppResult<Membership> {
        let row = sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO memberships (user_id, membership_type, is_active, start_date, expiry_date, barcode)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(membership.user_id)
        .bind(membership.membership_type)
        .bind(membership.is_active)
        .bind(membership.start_date)
        .bind(membership.expiry_date)
        .bind(&membership.barcode)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_membership(&mut self, membership: &Membership) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET membership_type = $1, is_active = $2, start_date = $3, expiry_date = $4, barcode = $5
            WHERE id = $6
            "#,
        )
        .bind(membership.membership_type)
        .bind(membership.is_active)
        .bind(membership.start_date)
        .bind(membership.expiry_date)
        .bind(&membership.barcode)
        .bind(membership.id)
        .execute(&mut *self.tx)
        .await?;
        ensure_updated(result.rows_affected(), "Membership", membership.id)
    }

    // -----------------------------------------------------------------------
    // Issue records
    // -----------------------------------------------------------------------

    async fn issue(&mut self, id: i32) -> AppResult<Option<IssueRecord>> {
        let issue = sqlx::query_as::<_, IssueRecord>("SELECT * FROM issue_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(issue)
    }

    async fn lock_issue(&mut self, id: i32) -> AppResult<Option<IssueRecord>> {
        let issue = sqlx::query_as::<_, IssueRecord>(
            "SELECT * FROM issue_records WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(issue)
    }

    async fn list_issues(&mut self, filter: &IssueFilter) -> AppResult<Vec<IssueRecord>> {
        let q = format!(
            "SELECT * FROM issue_records {} ORDER BY issue_date DESC, id DESC",
            where_clause(&issue_conditions(filter))
        );
        let mut builder = sqlx::query_as::<_, IssueRecord>(&q);
        if let Some(user_id) = filter.user_id {
            builder = builder.bind(user_id);
        }
        if let Some(book_id) = filter.book_id {
            builder = builder.bind(book_id);
        }
        if let Some(status) = filter.status {
            builder = builder.bind(status);
        }
        if let Some(from) = filter.issued_from {
            builder = builder.bind(from);
        }

        let issues = builder.fetch_all(&mut *self.tx).await?;
        Ok(issues)
    }

    async fn insert_issue(&mut self, issue: &IssueRecord) -> AppResult<IssueRecord> {
        let row = sqlx::query_as::<_, IssueRecord>(
            r#"
            INSERT INTO issue_records
                (book_id, user_id, issue_date, due_date, return_date, status, fine_amount, reservation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(issue.book_id)
        .bind(issue.user_id)
        .bind(issue.issue_date)
        .bind(issue.due_date)
        .bind(issue.return_date)
        .bind(issue.status)
        .bind(issue.fine_amount)
        .bind(issue.reservation_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_issue(&mut self, issue: &IssueRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE issue_records
            SET due_date = $1, return_date = $2, status = $3, fine_amount = $4
            WHERE id = $5
            "#,
        )
        .bind(issue.due_date)
        .bind(issue.return_date)
        .bind(issue.status)
        .bind(issue.fine_amount)
        .bind(issue.id)
        .execute(&mut *self.tx)
        .await?;
        ensure_updated(result.rows_affected(), "Issue", issue.id)
    }

    // -----------------------------------------------------------------------
    // Reservations
    // -----------------------------------------------------------------------

    async fn reservation(&mut self, id: i32) -> AppResult<Option<Reservation>> {
        let reservation =
            sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(reservation)
    }

    async fn open_reservations(&mut self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE book_id = $1 AND status IN (0, 1)
            ORDER BY requested_at, id
            FOR UPDATE
            "#,
        )
        .bind(book_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(reservations)
    }

    async fn list_reservations(
        &mut self,
        filter: &ReservationFilter,
    ) -> AppResult<Vec<Reservation>> {
        let mut conditions = Vec::new();
        if filter.user_id.is_some() {
            conditions.push(format!("user_id = ${}", conditions.len() + 1));
        }
        if filter.book_id.is_some() {
            conditions.push(format!("book_id = ${}", conditions.len() + 1));
        }
        if filter.open_only {
            conditions.push("status IN (0, 1)".to_string());
        }

        let q = format!(
            "SELECT * FROM reservations {} ORDER BY requested_at DESC, id DESC",
            where_clause(&conditions)
        );
        let mut builder = sqlx::query_as::<_, Reservation>(&q);
        if let Some(user_id) = filter.user_id {
            builder = builder.bind(user_id);
        }
        if let Some(book_id) = filter.book_id {
            builder = builder.bind(book_id);
        }

        let reservations = builder.fetch_all(&mut *self.tx).await?;
        Ok(reservations)
    }

    async fn books_with_lapsed_holds(&mut self, now: DateTime<Utc>) -> AppResult<Vec<i32>> {
        let books: Vec<i32> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT book_id FROM reservations
            WHERE status = 1 AND hold_expires_at <= $1
            ORDER BY book_id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(books)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<Reservation> {
        let row = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations
                (book_id, user_id, requested_at, queue_position, status, hold_expires_at, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(reservation.book_id)
        .bind(reservation.user_id)
        .bind(reservation.requested_at)
        .bind(reservation.queue_position)
        .bind(reservation.status)
        .bind(reservation.hold_expires_at)
        .bind(reservation.closed_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET queue_position = $1, status = $2, hold_expires_at = $3, closed_at = $4
            WHERE id = $5
            "#,
        )
        .bind(reservation.queue_position)
        .bind(reservation.status)
        .bind(reservation.hold_expires_at)
        .bind(reservation.closed_at)
        .bind(reservation.id)
        .execute(&mut *self.tx)
        .await?;
        ensure_updated(result.rows_affected(), "Reservation", reservation.id)
    }

    // -----------------------------------------------------------------------
    // Fines
    // -----------------------------------------------------------------------

    async fn fine(&mut self, id: i32) -> AppResult<Option<Fine>> {
        let fine = sqlx::query_as::<_, Fine>("SELECT * FROM fines WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(fine)
    }

    async fn lock_fine(&mut self, id: i32) -> AppResult<Option<Fine>> {
        let fine = sqlx::query_as::<_, Fine>("SELECT * FROM fines WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(fine)
    }

    async fn fine_for_issue(&mut self, issue_id: i32) -> AppResult<Option<Fine>> {
        let fine =
            sqlx::query_as::<_, Fine>("SELECT * FROM fines WHERE issue_id = $1 FOR UPDATE")
                .bind(issue_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(fine)
    }

    async fn list_fines(&mut self, filter: &FineFilter) -> AppResult<Vec<Fine>> {
        let mut conditions = Vec::new();
        if filter.user_id.is_some() {
            conditions.push(format!("user_id = ${}", conditions.len() + 1));
        }
        if filter.is_paid.is_some() {
            conditions.push(format!("is_paid = ${}", conditions.len() + 1));
        }

        let q = format!(
            "SELECT * FROM fines {} ORDER BY created_at DESC, id DESC",
            where_clause(&conditions)
        );
        let mut builder = sqlx::query_as::<_, Fine>(&q);
        if let Some(user_id) = filter.user_id {
            builder = builder.bind(user_id);
        }
        if let Some(is_paid) = filter.is_paid {
            builder = builder.bind(is_paid);
        }

        let fines = builder.fetch_all(&mut *self.tx).await?;
        Ok(fines)
    }

    async fn insert_fine(&mut self, fine: &Fine) -> AppResult<Fine> {
        let row = sqlx::query_as::<_, Fine>(
            r#"
            INSERT INTO fines
                (issue_id, user_id, amount, is_paid, created_at, paid_at, payment_method, last_payment_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(fine.issue_id)
        .bind(fine.user_id)
        .bind(fine.amount)
        .bind(fine.is_paid)
        .bind(fine.created_at)
        .bind(fine.paid_at)
        .bind(fine.payment_method)
        .bind(fine.last_payment_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_fine(&mut self, fine: &Fine) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE fines
            SET amount = $1, is_paid = $2, paid_at = $3, payment_method = $4, last_payment_id = $5
            WHERE id = $6
            "#,
        )
        .bind(fine.amount)
        .bind(fine.is_paid)
        .bind(fine.paid_at)
        .bind(fine.payment_method)
        .bind(fine.last_payment_id)
        .bind(fine.id)
        .execute(&mut *self.tx)
        .await?;
        ensure_updated(result.rows_affected(), "Fine", fine.id)
    }

    // -----------------------------------------------------------------------
    // Payments
    // -----------------------------------------------------------------------

    async fn payment(&mut self, id: i32) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(payment)
    }

    async fn lock_payment(&mut self, id: i32) -> AppResult<Option<Payment>> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(payment)
    }

    async fn list_payments(&mut self, filter: &PaymentFilter) -> AppResult<Vec<Payment>> {
        let mut conditions = Vec::new();
        if filter.fine_id.is_some() {
            conditions.push(format!("fine_id = ${}", conditions.len() + 1));
        }
        if filter.outstanding_only {
            conditions.push("status IN (0, 1)".to_string());
        }

        let q = format!(
            "SELECT * FROM payments {} ORDER BY created_at, id",
            where_clause(&conditions)
        );
        let mut builder = sqlx::query_as::<_, Payment>(&q);
        if let Some(fine_id) = filter.fine_id {
            builder = builder.bind(fine_id);
        }

        let payments = builder.fetch_all(&mut *self.tx).await?;
        Ok(payments)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> AppResult<Payment> {
        let row = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (fine_id, method, status, amount, transaction_ref, created_at, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(payment.fine_id)
        .bind(payment.method)
        .bind(payment.status)
        .bind(payment.amount)
        .bind(&payment.transaction_ref)
        .bind(payment.created_at)
        .bind(payment.paid_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_payment(&mut self, payment: &Payment) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE payments SET status = $1, transaction_ref = $2, paid_at = $3 WHERE id = $4",
        )
        .bind(payment.status)
        .bind(&payment.transaction_ref)
        .bind(payment.paid_at)
        .bind(payment.id)
        .execute(&mut *self.tx)
        .await?;
        ensure_updated(result.rows_affected(), "Payment", payment.id)
    }

    async fn count_books(&mut self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn sample_books(&mut self, limit: i64) -> AppResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>("SELECT * FROM books ORDER BY title, id LIMIT $1")
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(books)
    }

    async fn count_issues(&mut self, filter: &IssueFilter) -> AppResult<i64> {
        let q = format!(
            "SELECT COUNT(*) FROM issue_records {}",
            where_clause(&issue_conditions(filter))
        );
        let mut builder = sqlx::query_scalar::<_, i64>(&q);
        if let Some(user_id) = filter.user_id {
            builder = builder.bind(user_id);
        }
        if let Some(book_id) = filter.book_id {
            builder = builder.bind(book_id);
        }
        if let Some(status) = filter.status {
            builder = builder.bind(status);
        }
        if let Some(from) = filter.issued_from {
            builder = builder.bind(from);
        }

        let count = builder.fetch_one(&mut *self.tx).await?;
        Ok(count)
    }

    async fn count_overdue(
        &mut self,
        now: DateTime<Utc>,
        user_id: Option<i32>,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM issue_records
            WHERE status = 0
              AND (due_date AT TIME ZONE 'UTC')::date < ($1::timestamptz AT TIME ZONE 'UTC')::date
              AND ($2::int IS NULL OR user_id = $2)
            "#,
        )
        .bind(now)
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn count_active_members(&mut self, now: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM memberships
            WHERE is_active AND (expiry_date IS NULL OR expiry_date > $1)
            "#,
        )
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn count_open_reservations(&mut self) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE status IN (0, 1)")
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(count)
    }

    async fn unpaid_totals(&mut self, user_id: Option<i32>) -> AppResult<UnpaidTotals> {
        let totals = sqlx::query_as::<_, UnpaidTotals>(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS amount, COUNT(DISTINCT user_id) AS debtors
            FROM fines
            WHERE NOT is_paid AND ($1::int IS NULL OR user_id = $1)
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(totals)
    }

    async fn last_paid_fine(&mut self) -> AppResult<Option<Decimal>> {
        let amount: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT amount FROM fines
            WHERE is_paid
            ORDER BY paid_at DESC NULLS LAST, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(amount)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
