//! Catalog service

use std::sync::Arc;

use chrono::Duration;
use validator::Validate;

use super::{notifications::OutcomeSink, reservations};
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{Book, IssueFilter, IssueStatus, NewBook, ReservationFilter, UpdateBook},
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    outcomes: Arc<dyn OutcomeSink>,
    hold_window: Duration,
}

impl CatalogService {
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

    /// All books, by title
    pub async fn list_books(&self) -> AppResult<Vec<Book>> {
        let mut uow = self.repository.begin().await?;
        uow.list_books().await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        let mut uow = self.repository.begin().await?;
        uow.book(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))
    }

    pub async fn create_book(&self, book: NewBook) -> AppResult<Book> {
        let book = book.into_book(self.clock.now())?;
        let mut uow = self.repository.begin().await?;
        let book = uow.insert_book(&book).await?;
        uow.commit().await?;

        tracing::info!(book_id = book.id, copies = book.total_copies, "Book added to catalog");
        Ok(book)
    }

    /// Edit a book. A new copy count keeps the lent-out copies and any
    /// added copy goes to the reservation queue first.
    pub async fn update_book(&self, id: i32, update: UpdateBook) -> AppResult<Book> {
        update.validate()?;
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        let mut book = uow
            .lock_book(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

        if let Some(title) = update.title {
            book.title = title.trim().to_string();
        }
        if let Some(author) = update.author {
            book.author = author.trim().to_string();
        }
        if let Some(category) = update.category {
            book.category = category.trim().to_string();
        }
        if let Some(total) = update.total_copies {
            book.set_total_copies(total)?;
        }

        let mut queue = reservations::load_queue(uow.as_mut(), id).await?;
        let changes =
            reservations::settle(uow.as_mut(), &mut book, &mut queue, now, self.hold_window)
                .await?;
        uow.commit().await?;

        tracing::info!(
            book_id = id,
            total = book.total_copies,
            available = book.available_copies,
            "Book updated"
        );
        reservations::announce(self.outcomes.as_ref(), &book, &changes);
        Ok(book)
    }

    /// Remove a book nobody is borrowing or waiting for. Books with lending
    /// history are kept by the store.
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        let mut uow = self.repository.begin().await?;
        let book = uow
            .lock_book(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

        let open_issues = uow
            .list_issues(&IssueFilter {
                book_id: Some(id),
                status: Some(IssueStatus::Issued),
                ..Default::default()
            })
            .await?;
        if !open_issues.is_empty() {
            return Err(AppError::Validation(format!(
                "\"{}\" has {} copies on loan",
                book.title,
                open_issues.len()
            )));
        }
        let open_reservations = uow
            .list_reservations(&ReservationFilter {
                book_id: Some(id),
                open_only: true,
                ..Default::default()
            })
            .await?;
        if !open_reservations.is_empty() {
            return Err(AppError::Validation(format!(
                "\"{}\" has {} open reservations",
                book.title,
                open_reservations.len()
            )));
        }

        uow.delete_book(id).await?;
        uow.commit().await?;

        tracing::info!(book_id = id, "Book removed from catalog");
        Ok(())
    }
}
