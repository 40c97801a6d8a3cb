//! Credit ledger accessor: balance checks, atomic deductions, refunds.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::application::pagination::{CursorPage, LedgerCursor, PageRequest};
use crate::application::repos::{CreditLedgerRepo, DeductOutcome, RepoError};
use crate::domain::entities::{CreditBalanceRecord, CreditLedgerEntryRecord};

#[derive(Debug, Error)]
pub enum CreditError {
    /// Policy violation: surfaced to the caller as HTTP 402 with the
    /// shortfall attached; never retried.
    #[error("insufficient credits: required {required}, available {available}")]
    Insufficient { required: i64, available: i64 },
    #[error("credit amount must be positive, got {0}")]
    NonPositiveAmount(i64),
    #[error("no credit balance for account {0}")]
    UnknownAccount(Uuid),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Copy)]
pub struct BalanceCheck {
    pub has_enough: bool,
    pub available: i64,
    pub required: i64,
}

#[derive(Clone)]
pub struct CreditService {
    repo: Arc<dyn CreditLedgerRepo>,
}

impl CreditService {
    pub fn new(repo: Arc<dyn CreditLedgerRepo>) -> Self {
        Self { repo }
    }

    /// Read-only affordability check.
    pub async fn check_balance(
        &self,
        account_id: Uuid,
        required: i64,
    ) -> Result<BalanceCheck, CreditError> {
        let available = self
            .repo
            .balance(account_id)
            .await?
            .map(|balance| balance.remaining)
            .unwrap_or(0);

        Ok(BalanceCheck {
            has_enough: available >= required,
            available,
            required,
        })
    }

    pub async fn balance(&self, account_id: Uuid) -> Result<CreditBalanceRecord, CreditError> {
        self.repo
            .balance(account_id)
            .await?
            .ok_or(CreditError::UnknownAccount(account_id))
    }

    /// Deduct `cost` tokens. The repository applies the decrement under a
    /// row lock, so concurrent requests for one account cannot double-spend.
    pub async fn deduct(
        &self,
        account_id: Uuid,
        cost: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<i64, CreditError> {
        if cost <= 0 {
            return Err(CreditError::NonPositiveAmount(cost));
        }

        match self.repo.deduct(account_id, cost, reason, job_id).await? {
            DeductOutcome::Applied { remaining } => {
                counter!("staffetta_credits_deducted_total").increment(cost as u64);
                Ok(remaining)
            }
            DeductOutcome::Insufficient { available } => Err(CreditError::Insufficient {
                required: cost,
                available,
            }),
        }
    }

    /// Return previously-deducted tokens. At-most-once triggering is the
    /// job state machine's responsibility, not the ledger's.
    pub async fn refund(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
        job_id: Option<Uuid>,
    ) -> Result<CreditBalanceRecord, CreditError> {
        if amount <= 0 {
            return Err(CreditError::NonPositiveAmount(amount));
        }

        let balance = self.repo.refund(account_id, amount, reason, job_id).await?;
        counter!("staffetta_credits_refunded_total").increment(amount as u64);
        info!(
            target = "staffetta::credits",
            account_id = %account_id,
            amount,
            reason,
            "credits refunded"
        );
        Ok(balance)
    }

    /// Operator grant of new tokens; bumps the lifetime total as well.
    pub async fn grant(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
    ) -> Result<CreditBalanceRecord, CreditError> {
        if amount <= 0 {
            return Err(CreditError::NonPositiveAmount(amount));
        }
        self.repo
            .grant(account_id, amount, reason)
            .await
            .map_err(CreditError::from)
    }

    pub async fn list_entries(
        &self,
        account_id: Uuid,
        page: PageRequest<LedgerCursor>,
    ) -> Result<CursorPage<CreditLedgerEntryRecord>, CreditError> {
        self.repo
            .list_entries(account_id, page)
            .await
            .map_err(CreditError::from)
    }
}
