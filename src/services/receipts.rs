//! Payment receipts

use std::fmt::Write;

use crate::{
    error::{AppError, AppResult},
    models::{Book, Fine, IssueRecord, Payment},
};

/// Everything printed on a receipt
#[derive(Debug, Clone)]
pub struct Receipt {
    pub payment: Payment,
    pub fine: Fine,
    pub issue: IssueRecord,
    pub book: Book,
}

impl Receipt {
    pub fn number(&self) -> String {
        format!("RCPT-{:06}", self.payment.id)
    }
}

/// Renders a receipt into a document
pub trait ReceiptBuilder: Send + Sync {
    fn build(&self, receipt: &Receipt) -> AppResult<Vec<u8>>;

    fn content_type(&self) -> &'static str;
}

/// Plain text receipt
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReceiptBuilder;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

impl ReceiptBuilder for TextReceiptBuilder {
    fn build(&self, receipt: &Receipt) -> AppResult<Vec<u8>> {
        let payment = &receipt.payment;
        let issue = &receipt.issue;
        let mut out = String::new();

        let write = |out: &mut String| -> std::fmt::Result {
            writeln!(out, "LIBRARY FINE RECEIPT")?;
            writeln!(out, "Receipt no.:      {}", receipt.number())?;
            writeln!(out, "Created:          {}", payment.created_at.format(DATE_FORMAT))?;
            if let Some(paid_at) = payment.paid_at {
                writeln!(out, "Paid:             {}", paid_at.format(DATE_FORMAT))?;
            }
            writeln!(out, "Status:           {}", payment.status)?;
            writeln!(out, "Method:           {}", payment.method)?;
            writeln!(
                out,
                "Transaction ref.: {}",
                payment.transaction_ref.as_deref().unwrap_or("-")
            )?;
            writeln!(out)?;
            writeln!(out, "Student:          {}", receipt.fine.user_id)?;
            writeln!(out, "Book:             {} ({})", receipt.book.title, receipt.book.author)?;
            writeln!(out, "Issued:           {}", issue.issue_date.format("%Y-%m-%d"))?;
            writeln!(out, "Due:              {}", issue.due_date.format("%Y-%m-%d"))?;
            match issue.return_date {
                Some(returned) => writeln!(out, "Returned:         {}", returned.format("%Y-%m-%d"))?,
                None => writeln!(out, "Returned:         -")?,
            }
            writeln!(out)?;
            writeln!(out, "Amount paid:      {}", payment.amount)
        };

        write(&mut out)
            .map_err(|e| AppError::Internal(format!("Failed to render receipt: {}", e)))?;
        Ok(out.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }
}
