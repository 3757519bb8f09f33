//! Shared fixtures: services over the in-memory store and a manual clock

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use libraria_server::{
    clock::{Clock, ManualClock},
    config::LendingConfig,
    models::{Book, Membership, MembershipType, NewBook, RegisterMembership},
    repository::Repository,
    services::Services,
};

pub const HOLD_WINDOW_HOURS: i64 = 48;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

pub fn lending_config() -> LendingConfig {
    LendingConfig {
        loan_period_days: 7,
        fine_per_day: Decimal::from(10),
        hold_window_hours: HOLD_WINDOW_HOURS,
        hold_sweep_interval_secs: 60,
        max_attempts: 3,
    }
}

pub struct Library {
    pub services: Services,
    pub clock: Arc<ManualClock>,
}

impl Library {
    pub fn new() -> Self {
        Self::with_config(lending_config())
    }

    pub fn with_config(config: LendingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let services = Services::new(Repository::in_memory(), clock.clone(), config);
        Self { services, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn add_book(&self, title: &str, copies: i32) -> Book {
        self.services
            .catalog
            .create_book(NewBook {
                title: title.to_string(),
                author: "Anonymous".to_string(),
                category: "General".to_string(),
                total_copies: copies,
                available_copies: None,
            })
            .await
            .unwrap()
    }

    /// Student with an active membership and a barcode
    pub async fn add_member(&self, user_id: i32) -> Membership {
        self.services
            .memberships
            .register(
                user_id,
                RegisterMembership {
                    membership_type: Some(MembershipType::Standard),
                    barcode: None,
                    expiry_date: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn book(&self, id: i32) -> Book {
        self.services.catalog.get_book(id).await.unwrap()
    }
}
