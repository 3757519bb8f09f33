//! HTTP surface, driven in-process through the router

mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::Library;
use libraria_server::{
    api::{create_router, Claims},
    models::Role,
    AppConfig, AppState,
};

const SECRET: &str = "test-secret";
const LIBRARIAN: i32 = 900;
const STUDENT: i32 = 501;

struct TestApp {
    library: Library,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let library = Library::new();
        let config = AppConfig::from_toml(&format!(
            "[auth]\njwt_secret = \"{}\"\n[lending]\nhold_window_hours = {}\nloan_period_days = 7\n",
            SECRET,
            common::HOLD_WINDOW_HOURS
        ))
        .unwrap();
        let state = AppState {
            config: Arc::new(config),
            services: Arc::new(library.services.clone()),
        };
        Self {
            router: create_router(state),
            library,
        }
    }

    fn token(&self, user_id: i32, role: Role) -> String {
        let now = chrono::Utc::now().timestamp();
        Claims {
            sub: format!("user-{}", user_id),
            user_id,
            role,
            iat: now,
            exp: now + 3600,
        }
        .create_token(SECRET)
        .unwrap()
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = app.call(Method::GET, "/api/v1/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_forged_token_is_unauthorized() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/api/v1/books", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 2);

    let forged = Claims {
        sub: "intruder".to_string(),
        user_id: 1,
        role: Role::Admin,
        iat: 0,
        exp: chrono::Utc::now().timestamp() + 3600,
    }
    .create_token("wrong-secret")
    .unwrap();
    let (status, _) = app
        .call(Method::GET, "/api/v1/books", Some(&forged), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_students_cannot_edit_the_catalog() {
    let app = TestApp::new();
    let student = app.token(STUDENT, Role::Student);
    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/books",
            Some(&student),
            Some(json!({"title": "Dune", "author": "Herbert", "total_copies": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 2);
}

#[tokio::test]
async fn test_borrow_and_late_return_over_http() {
    let app = TestApp::new();
    let librarian = app.token(LIBRARIAN, Role::Librarian);
    let student = app.token(STUDENT, Role::Student);

    let (status, book) = app
        .call(
            Method::POST,
            "/api/v1/books",
            Some(&librarian),
            Some(json!({"title": "Dune", "author": "Herbert", "category": "SF", "total_copies": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let book_id = book["id"].as_i64().unwrap();

    // no membership yet
    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/borrows",
            Some(&student),
            Some(json!({"book_id": book_id})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], 5);

    let (status, membership) = app
        .call(
            Method::POST,
            &format!("/api/v1/users/{}/membership", STUDENT),
            Some(&librarian),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(membership["barcode"].as_str().unwrap().starts_with("MEM-000501-"));

    let (status, borrowed) = app
        .call(
            Method::POST,
            "/api/v1/borrows",
            Some(&student),
            Some(json!({"book_id": book_id})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(borrowed["outcome"], "issued");
    let issue_id = borrowed["issue"]["id"].as_i64().unwrap();

    app.library.advance(Duration::days(10));
    let (status, returned) = app
        .call(
            Method::POST,
            &format!("/api/v1/issues/{}/return", issue_id),
            Some(&librarian),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["issue"]["status"], "returned");
    assert_eq!(returned["fine"]["amount"], "30");

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/issues/{}/return", issue_id),
            Some(&librarian),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, fines) = app
        .call(
            Method::GET,
            &format!("/api/v1/users/{}/fines", STUDENT),
            Some(&student),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fines["total_unpaid"], "30");

    // another student cannot read these fines
    let other = app.token(STUDENT + 1, Role::Student);
    let (status, _) = app
        .call(
            Method::GET,
            &format!("/api/v1/users/{}/fines", STUDENT),
            Some(&other),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, messages) = app
        .call(Method::GET, "/api/v1/notifications", Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!messages.as_array().unwrap().is_empty());
    let (_, messages) = app
        .call(Method::GET, "/api/v1/notifications", Some(&student), None)
        .await;
    assert!(messages.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_payment_flow_ends_with_a_receipt() {
    let app = TestApp::new();
    let librarian = app.token(LIBRARIAN, Role::Librarian);
    let student = app.token(STUDENT, Role::Student);

    let book = app.library.add_book("Dune", 1).await;
    app.library.add_member(STUDENT).await;
    let (_, borrowed) = app
        .call(
            Method::POST,
            "/api/v1/borrows",
            Some(&student),
            Some(json!({"book_id": book.id})),
        )
        .await;
    let issue_id = borrowed["issue"]["id"].as_i64().unwrap();
    app.library.advance(Duration::days(8));
    let (_, returned) = app
        .call(
            Method::POST,
            &format!("/api/v1/issues/{}/return", issue_id),
            Some(&student),
            None,
        )
        .await;
    let fine_id = returned["fine"]["id"].as_i64().unwrap();

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/v1/fines/{}/payments", fine_id),
            Some(&student),
            Some(json!({"method": "mobile_reference"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 10);

    let (status, payment) = app
        .call(
            Method::POST,
            &format!("/api/v1/fines/{}/payments", fine_id),
            Some(&student),
            Some(json!({"method": "mobile_reference", "transaction_ref": "TX-9"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["status"], "pending_verification");
    let payment_id = payment["id"].as_i64().unwrap();

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/payments/{}/confirm", payment_id),
            Some(&student),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, pending) = app
        .call(Method::GET, "/api/v1/payments/pending", Some(&librarian), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, confirmed) = app
        .call(
            Method::POST,
            &format!("/api/v1/payments/{}/confirm", payment_id),
            Some(&librarian),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "paid");

    let request = Request::builder()
        .uri(format!("/api/v1/payments/{}/receipt", payment_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", student))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("TX-9"));
}

#[tokio::test]
async fn test_queue_and_dashboards_respect_roles() {
    let app = TestApp::new();
    let librarian = app.token(LIBRARIAN, Role::Librarian);
    let student = app.token(STUDENT, Role::Student);
    let admin = app.token(1, Role::Admin);

    let book = app.library.add_book("Emma", 1).await;
    app.library.add_member(STUDENT).await;
    app.library.add_member(STUDENT + 1).await;
    app.library
        .services
        .lending
        .request_borrow(STUDENT + 1, book.id, true)
        .await
        .unwrap();

    let (status, reservation) = app
        .call(
            Method::POST,
            "/api/v1/reservations",
            Some(&librarian),
            Some(json!({"user_id": STUDENT, "book_id": book.id})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reservation["status"], "pending");
    assert_eq!(reservation["queue_position"], 1);

    let (status, queue) = app
        .call(
            Method::GET,
            &format!("/api/v1/books/{}/queue", book.id),
            Some(&student),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.as_array().unwrap().len(), 1);

    // a book with open reservations stays in the catalog
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/books/{}", book.id),
            Some(&librarian),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(Method::GET, "/api/v1/dashboard/admin", Some(&librarian), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, totals) = app
        .call(Method::GET, "/api/v1/dashboard/admin", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(totals["total_books"], 1);
    assert_eq!(totals["active_members"], 2);

    let (status, desk) = app
        .call(Method::GET, "/api/v1/dashboard/librarian", Some(&librarian), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(desk["active_reservations"], 1);

    let (status, mine) = app
        .call(Method::GET, "/api/v1/dashboard/student", Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["is_membership_active"], true);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/reservations/{}/cancel", reservation["id"]),
            Some(&app.token(STUDENT + 1, Role::Student)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
