//! Fines, payment attempts and receipts

mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use tokio_test::assert_ok;

use common::Library;
use libraria_server::{
    error::AppError,
    models::{Actor, Fine, PaymentMethod, PaymentStatus, RecordPayment},
    services::lending::BorrowOutcome,
};

const STUDENT: i32 = 301;
const LIBRARIAN: i32 = 900;

/// Borrow, keep the book `late_days` past the due date and return it
async fn late_return(library: &Library, title: &str, late_days: i64) -> Fine {
    let book = library.add_book(title, 1).await;
    let outcome = library
        .services
        .lending
        .request_borrow(STUDENT, book.id, false)
        .await
        .unwrap();
    let BorrowOutcome::Issued { issue, .. } = outcome else {
        panic!("copy should be free");
    };
    library.advance(Duration::days(7 + late_days));
    library
        .services
        .lending
        .return_book(Actor::librarian(LIBRARIAN), issue.id)
        .await
        .unwrap()
        .fine
        .expect("late return is fined")
}

fn cash() -> RecordPayment {
    RecordPayment {
        method: PaymentMethod::CashOnDelivery,
        transaction_ref: None,
    }
}

fn mobile(reference: Option<&str>) -> RecordPayment {
    RecordPayment {
        method: PaymentMethod::MobileReference,
        transaction_ref: reference.map(str::to_string),
    }
}

#[tokio::test]
async fn test_summary_splits_paid_and_unpaid() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    let first = late_return(&library, "Dune", 3).await;
    let second = late_return(&library, "Emma", 1).await;

    let payment = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), first.id, cash())
        .await
        .unwrap();
    library
        .services
        .fines
        .confirm_payment(Actor::librarian(LIBRARIAN), payment.id)
        .await
        .unwrap();

    let summary = library.services.fines.fines_for_user(STUDENT).await.unwrap();
    assert_eq!(summary.total_unpaid, Decimal::from(10));
    assert_eq!(summary.unpaid.len(), 1);
    assert_eq!(summary.unpaid[0].id, second.id);
    assert_eq!(summary.paid.len(), 1);
    assert_eq!(summary.paid[0].payment_method, Some(PaymentMethod::CashOnDelivery));
}

#[tokio::test]
async fn test_reconciling_twice_changes_nothing() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    late_return(&library, "Dune", 2).await;

    let changed = assert_ok!(library.services.fines.reconcile_fines(STUDENT).await);
    assert_eq!(changed, 0);
    library.advance(Duration::days(30));
    let changed = assert_ok!(library.services.fines.reconcile_fines(STUDENT).await);
    assert_eq!(changed, 0);

    let summary = library.services.fines.fines_for_user(STUDENT).await.unwrap();
    assert_eq!(summary.unpaid.len(), 1);
    assert_eq!(summary.total_unpaid, Decimal::from(20));
}

#[tokio::test]
async fn test_mobile_payment_needs_a_reference() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    let fine = late_return(&library, "Dune", 3).await;

    for request in [mobile(None), mobile(Some("   "))] {
        let err = library
            .services
            .fines
            .record_payment(Actor::student(STUDENT), fine.id, request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    let payment = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, mobile(Some(" TX-42 ")))
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::PendingVerification);
    assert_eq!(payment.transaction_ref.as_deref(), Some("TX-42"));
    assert_eq!(payment.amount, Decimal::from(30));
}

#[tokio::test]
async fn test_only_the_debtor_may_pay() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    let fine = late_return(&library, "Dune", 1).await;

    let err = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT + 1), fine.id, cash())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAuthorized(_)));

    let err = library
        .services
        .fines
        .record_payment(Actor::librarian(LIBRARIAN), fine.id, cash())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAuthorized(_)));
}

#[tokio::test]
async fn test_one_outstanding_payment_at_a_time() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    let fine = late_return(&library, "Dune", 1).await;

    let first = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, cash())
        .await
        .unwrap();
    assert_eq!(first.status, PaymentStatus::Pending);

    let err = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, mobile(Some("TX-1")))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateRequest(_)));

    // a rejected attempt frees the fine for another one
    let rejected = library
        .services
        .fines
        .reject_payment(Actor::librarian(LIBRARIAN), first.id)
        .await
        .unwrap();
    assert_eq!(rejected.status, PaymentStatus::Rejected);

    let retry = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, mobile(Some("TX-1")))
        .await
        .unwrap();
    let pending = library.services.fines.pending_payments().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, retry.id);

    let fine = library
        .services
        .fines
        .fine(Actor::student(STUDENT), fine.id)
        .await
        .unwrap();
    assert!(!fine.is_paid);
    assert_eq!(fine.last_payment_id, Some(retry.id));
}

#[tokio::test]
async fn test_confirming_settles_the_fine_once() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    let fine = late_return(&library, "Dune", 3).await;

    let payment = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, cash())
        .await
        .unwrap();
    let confirmed = library
        .services
        .fines
        .confirm_payment(Actor::librarian(LIBRARIAN), payment.id)
        .await
        .unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Paid);
    assert_eq!(confirmed.paid_at, Some(library.now()));

    let fine = library
        .services
        .fines
        .fine(Actor::librarian(LIBRARIAN), fine.id)
        .await
        .unwrap();
    assert!(fine.is_paid);
    assert_eq!(fine.paid_at, Some(library.now()));

    let err = library
        .services
        .fines
        .confirm_payment(Actor::librarian(LIBRARIAN), payment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, cash())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyPaid(_)));

    let messages = library.services.flash.drain(STUDENT);
    assert!(messages.iter().any(|m| m.message.contains("was confirmed")));
}

#[tokio::test]
async fn test_paid_fines_are_frozen_by_reconciliation() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    let fine = late_return(&library, "Dune", 3).await;
    let payment = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, cash())
        .await
        .unwrap();
    library
        .services
        .fines
        .confirm_payment(Actor::librarian(LIBRARIAN), payment.id)
        .await
        .unwrap();

    library.advance(Duration::days(10));
    library.services.fines.reconcile_fines(STUDENT).await.unwrap();

    let summary = library.services.fines.fines_for_user(STUDENT).await.unwrap();
    assert_eq!(summary.total_unpaid, Decimal::ZERO);
    assert_eq!(summary.paid[0].amount, Decimal::from(30));
}

#[tokio::test]
async fn test_receipt_only_for_paid_payments() {
    let library = Library::new();
    library.add_member(STUDENT).await;
    let fine = late_return(&library, "Dune", 3).await;
    let payment = library
        .services
        .fines
        .record_payment(Actor::student(STUDENT), fine.id, mobile(Some("TX-42")))
        .await
        .unwrap();

    let err = library
        .services
        .fines
        .receipt(Actor::student(STUDENT), payment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    library
        .services
        .fines
        .confirm_payment(Actor::librarian(LIBRARIAN), payment.id)
        .await
        .unwrap();

    let err = library
        .services
        .fines
        .receipt(Actor::student(STUDENT + 1), payment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAuthorized(_)));

    let document = library
        .services
        .fines
        .receipt(Actor::student(STUDENT), payment.id)
        .await
        .unwrap();
    let text = String::from_utf8(document).unwrap();
    assert!(text.contains(&format!("RCPT-{:06}", payment.id)));
    assert!(text.contains("TX-42"));
    assert!(text.contains("Dune"));
    assert_eq!(library.services.fines.receipt_content_type(), "text/plain; charset=utf-8");
}
