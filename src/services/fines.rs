//! Fine ledger: fines for late returns and the payments settling them

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use validator::Validate;

use super::{
    notifications::{report_result, Outcome, OutcomeSink},
    receipts::{Receipt, ReceiptBuilder},
};
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{
        fine::compute_fine, Actor, Fine, FineFilter, FineSummary, IssueFilter, IssueRecord,
        IssueStatus, Payment, PaymentFilter, PaymentStatus, RecordPayment,
    },
    repository::{Repository, UnitOfWork},
};

/// Create or refresh the fine of a returned record. Returns the fine when the
/// record came back late. Paid fines keep their amount; `issue.fine_amount`
/// mirrors the fine and the caller persists the issue.
pub(crate) async fn settle_fine(
    uow: &mut dyn UnitOfWork,
    issue: &mut IssueRecord,
    per_day: Decimal,
    now: DateTime<Utc>,
) -> AppResult<Option<Fine>> {
    let Some(amount) = compute_fine(issue, per_day) else {
        return Ok(None);
    };

    let fine = match uow.fine_for_issue(issue.id).await? {
        Some(mut fine) => {
            if fine.refresh_amount(amount) {
                uow.update_fine(&fine).await?;
                tracing::info!(fine_id = fine.id, issue_id = issue.id, amount = %amount, "Fine updated");
            }
            fine
        }
        None => {
            let fine = uow.insert_fine(&Fine::new(issue, amount, now)).await?;
            tracing::info!(fine_id = fine.id, issue_id = issue.id, amount = %amount, "Fine charged");
            fine
        }
    };

    issue.fine_amount = fine.amount;
    Ok(Some(fine))
}

#[derive(Clone)]
pub struct FinesService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    outcomes: Arc<dyn OutcomeSink>,
    receipts: Arc<dyn ReceiptBuilder>,
    fine_per_day: Decimal,
}

impl FinesService {
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        outcomes: Arc<dyn OutcomeSink>,
        receipts: Arc<dyn ReceiptBuilder>,
        fine_per_day: Decimal,
    ) -> Self {
        Self {
            repository,
            clock,
            outcomes,
            receipts,
            fine_per_day,
        }
    }

    /// Bring the fines of every late return of `user_id` up to date.
    /// Returns how many fines were created or changed.
    pub async fn reconcile_fines(&self, user_id: i32) -> AppResult<usize> {
        let mut uow = self.repository.begin().await?;
        let changed = self.reconcile_in(uow.as_mut(), user_id).await?;
        uow.commit().await?;
        Ok(changed)
    }

    async fn reconcile_in(&self, uow: &mut dyn UnitOfWork, user_id: i32) -> AppResult<usize> {
        let now = self.clock.now();
        let returned = uow
            .list_issues(&IssueFilter {
                user_id: Some(user_id),
                status: Some(IssueStatus::Returned),
                ..Default::default()
            })
            .await?;

        let mut changed = 0;
        for mut issue in returned.into_iter().filter(|i| i.overdue_days(now) > 0) {
            let before = issue.fine_amount;
            if settle_fine(uow, &mut issue, self.fine_per_day, now).await?.is_some()
                && issue.fine_amount != before
            {
                uow.update_issue(&issue).await?;
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::info!(user_id, changed, "Fines reconciled");
        }
        Ok(changed)
    }

    /// The pay-fine page of a student: fines are reconciled first
    pub async fn fines_for_user(&self, user_id: i32) -> AppResult<FineSummary> {
        let mut uow = self.repository.begin().await?;
        self.reconcile_in(uow.as_mut(), user_id).await?;
        let fines = uow
            .list_fines(&FineFilter {
                user_id: Some(user_id),
                is_paid: None,
            })
            .await?;
        uow.commit().await?;

        let (paid, unpaid): (Vec<Fine>, Vec<Fine>) = fines.into_iter().partition(|f| f.is_paid);
        let total_unpaid: Decimal = unpaid.iter().map(|f| f.amount).sum();
        Ok(FineSummary {
            total_unpaid,
            unpaid,
            paid,
        })
    }

    pub async fn fine(&self, actor: Actor, fine_id: i32) -> AppResult<Fine> {
        let mut uow = self.repository.begin().await?;
        let fine = uow
            .fine(fine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Fine {} not found", fine_id)))?;
        if !actor.may_act_for(fine.user_id) {
            return Err(AppError::NotAuthorized("Not your fine".to_string()));
        }
        Ok(fine)
    }

    /// Submit a payment for the whole fine. Only the student who owes the
    /// fine can pay it, one outstanding attempt at a time.
    pub async fn record_payment(
        &self,
        actor: Actor,
        fine_id: i32,
        request: RecordPayment,
    ) -> AppResult<Payment> {
        let result = self.try_record_payment(actor, fine_id, request).await;
        report_result(self.outcomes.as_ref(), actor.user_id, &result, |payment| {
            match payment.status {
                PaymentStatus::PendingVerification => format!(
                    "Payment of {} submitted, waiting for verification",
                    payment.amount
                ),
                _ => format!(
                    "Payment of {} recorded, please pay at the library counter",
                    payment.amount
                ),
            }
        });
        result
    }

    async fn try_record_payment(
        &self,
        actor: Actor,
        fine_id: i32,
        request: RecordPayment,
    ) -> AppResult<Payment> {
        request.validate()?;
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;

        let mut fine = uow
            .lock_fine(fine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Fine {} not found", fine_id)))?;
        if fine.user_id != actor.user_id {
            return Err(AppError::NotAuthorized(
                "Only the student who owes a fine can pay it".to_string(),
            ));
        }

        let payment = Payment::submit(&fine, request.method, request.transaction_ref.as_deref(), now)?;

        let outstanding = uow
            .list_payments(&PaymentFilter {
                fine_id: Some(fine_id),
                outstanding_only: true,
            })
            .await?;
        if !outstanding.is_empty() {
            return Err(AppError::DuplicateRequest(
                "A payment for this fine is already waiting for verification".to_string(),
            ));
        }

        let payment = uow.insert_payment(&payment).await?;
        fine.last_payment_id = Some(payment.id);
        uow.update_fine(&fine).await?;
        uow.commit().await?;

        tracing::info!(
            fine_id,
            payment_id = payment.id,
            method = %payment.method,
            status = %payment.status,
            "Payment recorded"
        );
        Ok(payment)
    }

    /// Librarian accepts a payment: the payment is Paid and its fine settled
    pub async fn confirm_payment(&self, actor: Actor, payment_id: i32) -> AppResult<Payment> {
        let result = self.try_confirm(payment_id).await;
        report_result(self.outcomes.as_ref(), actor.user_id, &result, |(p, _)| {
            format!("Payment {} confirmed", p.id)
        });
        if let Ok((payment, fine)) = &result {
            self.outcomes.report(
                fine.user_id,
                Outcome::success(format!("Your payment of {} was confirmed", payment.amount)),
            );
        }
        result.map(|(payment, _)| payment)
    }

    async fn try_confirm(&self, payment_id: i32) -> AppResult<(Payment, Fine)> {
        let now = self.clock.now();
        let mut uow = self.repository.begin().await?;
        let (mut fine, mut payment) = lock_payment_and_fine(uow.as_mut(), payment_id).await?;

        payment.confirm(now)?;
        if fine.is_paid {
            return Err(AppError::AlreadyPaid(format!("Fine {} is already paid", fine.id)));
        }
        fine.mark_paid(&payment);

        uow.update_payment(&payment).await?;
        uow.update_fine(&fine).await?;
        uow.commit().await?;

        tracing::info!(payment_id, fine_id = fine.id, amount = %payment.amount, "Payment confirmed");
        Ok((payment, fine))
    }

    /// Librarian turns a payment down; the fine stays open for a new attempt
    pub async fn reject_payment(&self, actor: Actor, payment_id: i32) -> AppResult<Payment> {
        let result = self.try_reject(payment_id).await;
        report_result(self.outcomes.as_ref(), actor.user_id, &result, |(p, _)| {
            format!("Payment {} rejected", p.id)
        });
        if let Ok((payment, fine)) = &result {
            self.outcomes.report(
                fine.user_id,
                Outcome::info(format!(
                    "Your payment of {} was rejected, please pay again",
                    payment.amount
                )),
            );
        }
        result.map(|(payment, _)| payment)
    }

    async fn try_reject(&self, payment_id: i32) -> AppResult<(Payment, Fine)> {
        let mut uow = self.repository.begin().await?;
        let (fine, mut payment) = lock_payment_and_fine(uow.as_mut(), payment_id).await?;

        payment.reject()?;
        uow.update_payment(&payment).await?;
        uow.commit().await?;

        tracing::info!(payment_id, fine_id = fine.id, "Payment rejected");
        Ok((payment, fine))
    }

    /// Payments waiting for a librarian, oldest first
    pub async fn pending_payments(&self) -> AppResult<Vec<Payment>> {
        let mut uow = self.repository.begin().await?;
        uow.list_payments(&PaymentFilter {
            fine_id: None,
            outstanding_only: true,
        })
        .await
    }

    pub async fn payment(&self, actor: Actor, payment_id: i32) -> AppResult<Payment> {
        let mut uow = self.repository.begin().await?;
        let payment = uow
            .payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;
        let fine = uow
            .fine(payment.fine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Fine {} not found", payment.fine_id)))?;
        if !actor.may_act_for(fine.user_id) {
            return Err(AppError::NotAuthorized("Not your payment".to_string()));
        }
        Ok(payment)
    }

    /// Receipt document of a paid payment
    pub async fn receipt(&self, actor: Actor, payment_id: i32) -> AppResult<Vec<u8>> {
        let mut uow = self.repository.begin().await?;
        let payment = uow
            .payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;
        let fine = uow
            .fine(payment.fine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Fine {} not found", payment.fine_id)))?;
        if !actor.may_act_for(fine.user_id) {
            return Err(AppError::NotAuthorized("Not your payment".to_string()));
        }
        if payment.status != PaymentStatus::Paid {
            return Err(AppError::Validation(
                "A receipt is only available once the payment is confirmed".to_string(),
            ));
        }

        let issue = uow
            .issue(fine.issue_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Issue {} not found", fine.issue_id)))?;
        let book = uow
            .book(issue.book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", issue.book_id)))?;

        self.receipts.build(&Receipt {
            payment,
            fine,
            issue,
            book,
        })
    }

    pub fn receipt_content_type(&self) -> &'static str {
        self.receipts.content_type()
    }
}

async fn lock_payment_and_fine(
    uow: &mut dyn UnitOfWork,
    payment_id: i32,
) -> AppResult<(Fine, Payment)> {
    let fine_id = uow
        .payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?
        .fine_id;
    let fine = uow
        .lock_fine(fine_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Fine {} not found", fine_id)))?;
    let payment = uow
        .lock_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;
    Ok((fine, payment))
}
