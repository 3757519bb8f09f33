//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{
    books, dashboard, fines, health, lending, memberships, notifications, reservations,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Libraria API",
        version = "1.0.0",
        description = "Library lending, reservations and fines REST API"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Lending
        lending::request_borrow,
        lending::return_book,
        lending::list_issues,
        lending::get_issue,
        lending::user_issues,
        // Reservations
        reservations::list_reservations,
        reservations::create_reservation,
        reservations::book_queue,
        reservations::user_reservations,
        reservations::cancel_reservation,
        reservations::expire_holds,
        // Fines
        fines::user_fines,
        fines::get_fine,
        fines::record_payment,
        fines::pending_payments,
        fines::get_payment,
        fines::confirm_payment,
        fines::reject_payment,
        fines::payment_receipt,
        // Memberships
        memberships::list_memberships,
        memberships::get_membership,
        memberships::register_membership,
        memberships::upgrade_membership,
        memberships::assign_barcode,
        memberships::deactivate_membership,
        // Dashboards
        dashboard::admin_dashboard,
        dashboard::librarian_dashboard,
        dashboard::student_dashboard,
        // Notifications
        notifications::drain_notifications,
    ),
    components(
        schemas(
            // Books
            crate::models::Book,
            crate::models::NewBook,
            crate::models::UpdateBook,
            // Lending
            lending::BorrowRequest,
            crate::services::lending::BorrowOutcome,
            crate::services::lending::ReturnOutcome,
            crate::models::IssueRecord,
            crate::models::IssueStatus,
            // Reservations
            reservations::CreateReservation,
            reservations::ExpireResponse,
            crate::models::Reservation,
            crate::models::ReservationStatus,
            // Fines
            crate::models::Fine,
            crate::models::FineSummary,
            crate::models::Payment,
            crate::models::PaymentMethod,
            crate::models::PaymentStatus,
            crate::models::RecordPayment,
            // Memberships
            crate::models::Membership,
            crate::models::MembershipType,
            crate::models::RegisterMembership,
            crate::models::UpgradeMembership,
            crate::models::AssignBarcode,
            // Dashboards
            crate::services::dashboard::AdminDashboard,
            crate::services::dashboard::LibrarianDashboard,
            crate::services::dashboard::StudentDashboard,
            // Notifications
            crate::services::notifications::Outcome,
            crate::services::notifications::OutcomeKind,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Catalog management"),
        (name = "lending", description = "Borrowing and returns"),
        (name = "reservations", description = "Reservation queues"),
        (name = "fines", description = "Fines and payments"),
        (name = "memberships", description = "Membership registry"),
        (name = "dashboard", description = "Role dashboards"),
        (name = "notifications", description = "Outcome messages")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
