//! Dashboard figures

mod common;

use chrono::Duration;
use rust_decimal::Decimal;

use common::Library;
use libraria_server::{
    models::{Actor, MembershipType, PaymentMethod, RecordPayment, UpgradeMembership},
    services::lending::BorrowOutcome,
};

const LIBRARIAN: i32 = 900;

async fn borrow(library: &Library, user_id: i32, book_id: i32) -> i32 {
    match library
        .services
        .lending
        .request_borrow(user_id, book_id, true)
        .await
        .unwrap()
    {
        BorrowOutcome::Issued { issue, .. } => issue.id,
        BorrowOutcome::Reserved { .. } => panic!("copy should be free"),
    }
}

#[tokio::test]
async fn test_student_dashboard_projects_fines_for_copies_still_out() {
    let library = Library::new();
    let dune = library.add_book("Dune", 1).await;
    let emma = library.add_book("Emma", 1).await;
    library.add_member(401).await;

    let late = borrow(&library, 401, dune.id).await;
    borrow(&library, 401, emma.id).await;
    library.advance(Duration::days(9));

    let before = library.services.dashboard.student(401).await.unwrap();
    assert_eq!(before.current_issued_count, 2);
    assert_eq!(before.overdue_count, 2);
    assert_eq!(before.projected_fine, Decimal::from(40));
    // nothing is charged until the copies come back
    assert_eq!(before.total_unpaid_fine, Decimal::ZERO);
    assert!(before.is_membership_active);
    assert!(!before.has_premium_access);
    assert!(before.premium_books_sample.is_empty());

    library
        .services
        .lending
        .return_book(Actor::student(401), late)
        .await
        .unwrap();

    let after = library.services.dashboard.student(401).await.unwrap();
    assert_eq!(after.current_issued_count, 1);
    assert_eq!(after.total_unpaid_fine, Decimal::from(20));
    assert_eq!(after.projected_fine, Decimal::from(20));
    assert_eq!(after.recent_issues.len(), 2);
    assert_eq!(after.total_books_count, 2);
}

#[tokio::test]
async fn test_premium_members_see_a_sample_of_the_catalog() {
    let library = Library::new();
    for n in 0..8 {
        library.add_book(&format!("Volume {}", n), 1).await;
    }
    library.add_member(401).await;
    library
        .services
        .memberships
        .upgrade(
            401,
            UpgradeMembership {
                membership_type: MembershipType::Premium,
                expiry_date: None,
            },
        )
        .await
        .unwrap();

    let dashboard = library.services.dashboard.student(401).await.unwrap();
    assert!(dashboard.has_premium_access);
    assert_eq!(dashboard.premium_books_sample.len(), 6);
}

#[tokio::test]
async fn test_student_without_membership_gets_an_empty_dashboard() {
    let library = Library::new();
    library.add_book("Dune", 1).await;

    let dashboard = library.services.dashboard.student(404).await.unwrap();
    assert!(dashboard.membership.is_none());
    assert!(!dashboard.is_membership_active);
    assert_eq!(dashboard.current_issued_count, 0);
    assert_eq!(dashboard.total_books_count, 1);
}

#[tokio::test]
async fn test_librarian_dashboard_counts_the_desk() {
    let library = Library::new();
    let dune = library.add_book("Dune", 1).await;
    let emma = library.add_book("Emma", 2).await;
    for user in [401, 402, 403] {
        library.add_member(user).await;
    }

    let late = borrow(&library, 401, dune.id).await;
    borrow(&library, 402, emma.id).await;
    library
        .services
        .reservations
        .reserve(403, dune.id)
        .await
        .unwrap();

    library.advance(Duration::days(10));
    library
        .services
        .lending
        .return_book(Actor::librarian(LIBRARIAN), late)
        .await
        .unwrap();
    borrow(&library, 401, emma.id).await;

    let dashboard = library.services.dashboard.librarian().await.unwrap();
    assert_eq!(dashboard.total_books, 2);
    assert_eq!(dashboard.issued_today, 1);
    assert_eq!(dashboard.overdue_count, 1);
    // 403 now holds the returned copy
    assert_eq!(dashboard.active_reservations, 1);
    assert_eq!(dashboard.students_with_unpaid_fines, 1);
    assert_eq!(dashboard.total_unpaid_fine, Decimal::from(30));
    assert_eq!(dashboard.last_fine_collected, Decimal::ZERO);

    let fine = library
        .services
        .fines
        .fines_for_user(401)
        .await
        .unwrap()
        .unpaid
        .remove(0);
    let payment = library
        .services
        .fines
        .record_payment(
            Actor::student(401),
            fine.id,
            RecordPayment {
                method: PaymentMethod::CashOnDelivery,
                transaction_ref: None,
            },
        )
        .await
        .unwrap();
    library
        .services
        .fines
        .confirm_payment(Actor::librarian(LIBRARIAN), payment.id)
        .await
        .unwrap();

    let dashboard = library.services.dashboard.librarian().await.unwrap();
    assert_eq!(dashboard.students_with_unpaid_fines, 0);
    assert_eq!(dashboard.last_fine_collected, Decimal::from(30));
}

#[tokio::test]
async fn test_admin_dashboard_totals() {
    let library = Library::new();
    let dune = library.add_book("Dune", 1).await;
    library.add_book("Emma", 1).await;
    library.add_member(401).await;
    library.add_member(402).await;
    library.services.memberships.deactivate(402).await.unwrap();

    let issue = borrow(&library, 401, dune.id).await;
    library.advance(Duration::days(8));
    library
        .services
        .lending
        .return_book(Actor::student(401), issue)
        .await
        .unwrap();

    let dashboard = library.services.dashboard.admin().await.unwrap();
    assert_eq!(dashboard.total_books, 2);
    assert_eq!(dashboard.total_issues, 1);
    assert_eq!(dashboard.active_members, 1);
    assert_eq!(dashboard.total_unpaid_fines, Decimal::from(10));
}
