//! Book (catalog) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Book record. `0 <= available_copies <= total_copies` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub category: String,
    pub total_copies: i32,
    pub available_copies: i32,
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// Copies currently lent out or held for a reservant
    pub fn copies_out(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    /// Take one copy off the shelf
    pub fn take_copy(&mut self) -> AppResult<()> {
        if self.available_copies <= 0 {
            return Err(AppError::OutOfStock(format!(
                "No copy of \"{}\" is available",
                self.title
            )));
        }
        self.available_copies -= 1;
        Ok(())
    }

    /// Put one copy back on the shelf
    pub fn release_copy(&mut self) -> AppResult<()> {
        if self.available_copies >= self.total_copies {
            return Err(AppError::Internal(format!(
                "Book {} already has all {} copies on the shelf",
                self.id, self.total_copies
            )));
        }
        self.available_copies += 1;
        Ok(())
    }

    /// Change the number of copies owned, keeping the lent-out count intact
    pub fn set_total_copies(&mut self, total: i32) -> AppResult<()> {
        let out = self.copies_out();
        if total < out {
            return Err(AppError::Validation(format!(
                "Cannot reduce copies to {}: {} are lent out or on hold",
                total, out
            )));
        }
        self.total_copies = total;
        self.available_copies = total - out;
        Ok(())
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct NewBook {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(min = 1, max = 255))]
    pub author: String,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub category: String,
    #[validate(range(min = 0))]
    pub total_copies: i32,
    /// Defaults to `total_copies`
    pub available_copies: Option<i32>,
}

impl NewBook {
    /// Build the book to insert. The store assigns the id.
    pub fn into_book(self, now: DateTime<Utc>) -> AppResult<Book> {
        self.validate()?;
        let available = self.available_copies.unwrap_or(self.total_copies);
        if available < 0 || available > self.total_copies {
            return Err(AppError::Validation(format!(
                "available_copies must be between 0 and {}",
                self.total_copies
            )));
        }

        Ok(Book {
            id: 0,
            title: self.title.trim().to_string(),
            author: self.author.trim().to_string(),
            category: self.category.trim().to_string(),
            total_copies: self.total_copies,
            available_copies: available,
            created_at: now,
        })
    }
}

/// Update book request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub author: Option<String>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    #[validate(range(min = 0))]
    pub total_copies: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_book(total: i32, available: Option<i32>) -> NewBook {
        NewBook {
            title: "Algorithms".to_string(),
            author: "Cormen".to_string(),
            category: "CS".to_string(),
            total_copies: total,
            available_copies: available,
        }
    }

    #[test]
    fn test_available_defaults_to_total() {
        let book = new_book(4, None).into_book(Utc::now()).unwrap();
        assert_eq!(book.available_copies, 4);
    }

    #[test]
    fn test_rejects_more_available_than_total() {
        assert!(new_book(2, Some(3)).into_book(Utc::now()).is_err());
        assert!(new_book(2, Some(-1)).into_book(Utc::now()).is_err());
    }

    #[test]
    fn test_take_and_release() {
        let mut book = new_book(1, None).into_book(Utc::now()).unwrap();
        book.take_copy().unwrap();
        assert!(matches!(book.take_copy(), Err(AppError::OutOfStock(_))));
        book.release_copy().unwrap();
        assert!(book.release_copy().is_err());
        assert_eq!(book.available_copies, 1);
    }

    #[test]
    fn test_set_total_keeps_lent_copies() {
        let mut book = new_book(3, Some(1)).into_book(Utc::now()).unwrap();
        book.set_total_copies(5).unwrap();
        assert_eq!(book.available_copies, 3);
        assert!(book.set_total_copies(1).is_err());
        book.set_total_copies(2).unwrap();
        assert_eq!(book.available_copies, 0);
    }
}
