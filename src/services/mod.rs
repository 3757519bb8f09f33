//! Business logic services

pub mod catalog;
pub mod dashboard;
pub mod fines;
pub mod lending;
pub mod memberships;
pub mod notifications;
pub mod receipts;
pub mod reservations;

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;

use crate::{
    clock::Clock,
    config::LendingConfig,
    error::AppResult,
    repository::Repository,
};

use notifications::{FlashOutcomeSink, Outcome, OutcomeSink};
use receipts::{ReceiptBuilder, TextReceiptBuilder};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub memberships: memberships::MembershipsService,
    pub lending: lending::LendingService,
    pub reservations: reservations::ReservationsService,
    pub fines: fines::FinesService,
    pub dashboard: dashboard::DashboardService,
    pub flash: Arc<FlashOutcomeSink>,
    pub repository: Repository,
    max_attempts: u32,
}

impl Services {
    /// Create all services with the given repository, reporting outcomes
    /// to a flash sink and rendering plain text receipts
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, settings: LendingConfig) -> Self {
        Self::with_receipts(repository, clock, settings, Arc::new(TextReceiptBuilder))
    }

    pub fn with_receipts(
        repository: Repository,
        clock: Arc<dyn Clock>,
        settings: LendingConfig,
        receipts: Arc<dyn ReceiptBuilder>,
    ) -> Self {
        let flash = Arc::new(FlashOutcomeSink::new());
        let outcomes: Arc<dyn notifications::OutcomeSink> = flash.clone();
        let hold_window = Duration::hours(settings.hold_window_hours);

        Self {
            catalog: catalog::CatalogService::new(
                repository.clone(),
                clock.clone(),
                outcomes.clone(),
                hold_window,
            ),
            memberships: memberships::MembershipsService::new(repository.clone(), clock.clone()),
            lending: lending::LendingService::new(
                repository.clone(),
                clock.clone(),
                outcomes.clone(),
                settings.clone(),
            ),
            reservations: reservations::ReservationsService::new(
                repository.clone(),
                clock.clone(),
                outcomes.clone(),
                hold_window,
            ),
            fines: fines::FinesService::new(
                repository.clone(),
                clock.clone(),
                outcomes,
                receipts,
                settings.fine_per_day,
            ),
            dashboard: dashboard::DashboardService::new(
                repository.clone(),
                clock,
                settings.fine_per_day,
            ),
            flash,
            repository,
            max_attempts: settings.max_attempts,
        }
    }

    /// Run `op` again while it fails with a retryable conflict, at most the
    /// configured number of attempts
    pub async fn retry<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        retry_on_conflict(self.max_attempts, op).await
    }

    /// [`Services::retry`] for a request made on behalf of `user_id`. When
    /// every attempt lost a conflict the user is told to try again.
    pub async fn retry_for<T, F, Fut>(&self, user_id: i32, op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let result = self.retry(op).await;
        if let Err(e) = &result {
            if e.is_retryable() {
                self.flash.report(user_id, Outcome::from_error(e));
            }
        }
        result
    }
}

pub async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(attempt, max_attempts, "Retrying after store conflict: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(20 * u64::from(attempt)))
                    .await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::AppError;
    use chrono::Utc;
    use notifications::OutcomeKind;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn services(max_attempts: u32) -> Services {
        let settings = LendingConfig {
            loan_period_days: 14,
            fine_per_day: Decimal::from(10),
            hold_window_hours: 48,
            hold_sweep_interval_secs: 60,
            max_attempts,
        };
        Services::new(
            Repository::in_memory(),
            Arc::new(ManualClock::new(Utc::now())),
            settings,
        )
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_on_conflict(3, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::Retryable("serialization failure".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: AppResult<()> = retry_on_conflict(2, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Retryable("deadlock".into()))
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: AppResult<()> = retry_on_conflict(5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::OutOfStock("no copy".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::OutOfStock(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported_once() {
        let services = services(2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: AppResult<()> = services
            .retry_for(401, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Retryable("could not serialize access".into()))
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let messages = services.flash.drain(401);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, OutcomeKind::Warning);
        assert!(messages[0].message.contains("try again"));
    }

    #[tokio::test]
    async fn test_retry_for_leaves_other_outcomes_to_the_operation() {
        let services = services(3);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = services
            .retry_for(401, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::Retryable("deadlock".into()))
                } else {
                    Ok(1)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);

        let failed: AppResult<()> = services
            .retry_for(401, || async { Err(AppError::OutOfStock("No copy".into())) })
            .await;
        assert!(failed.is_err());
        assert!(services.flash.drain(401).is_empty());
    }
}
