use super::dispatcher::Dispatcher;
use crate::domain::account::{Account, AccountId, Amount, TransferId, Version};
use crate::domain::operation::{
    FinalState, LogPosition, LoggedOperation, Operation, OperationId, TransferDetail,
};
use crate::domain::ports::{AccountStoreRef, OperationStoreRef, SequencerRef};
use crate::error::{LedgerError, Result, StoreError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: std::time::Duration::from_millis(20),
        }
    }
}

/// The synchronous caller-facing entry point.
///
/// A call returns once the submitted operation has a terminal state in
/// the log, or with an `Unavailable` error once the retry budget is
/// spent. Transient storage faults are never surfaced directly; each
/// attempt restarts the whole submission, which is safe because every
/// step tolerates having already happened.
pub struct Submitter {
    accounts: AccountStoreRef,
    operations: OperationStoreRef,
    sequencer: SequencerRef,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
}

impl Submitter {
    pub fn new(
        accounts: AccountStoreRef,
        operations: OperationStoreRef,
        sequencer: SequencerRef,
        dispatcher: Arc<Dispatcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            accounts,
            operations,
            sequencer,
            dispatcher,
            retry,
        }
    }

    pub async fn create_account(&self) -> Result<Account> {
        let account_id = AccountId::generate();
        match self.submit(Operation::CreateAccount { account_id }).await? {
            FinalState::Applied => self.load_created(account_id).await,
            FinalState::Rejected(reason) => Err(LedgerError::Rejected(reason)),
        }
    }

    /// Reads back an account whose creation already applied. Retried on
    /// its own: a fresh submission here would mint a second account.
    async fn load_created(&self, account_id: AccountId) -> Result<Account> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.accounts.find(account_id).await {
                Ok(Some(account)) => return Ok(account),
                Ok(None) => {
                    return Err(LedgerError::Unavailable(
                        "created account could not be loaded".to_string(),
                    ));
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    warn!(account = %account_id, attempt, error = %e, "read-back failed, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => return Err(LedgerError::from(e)),
            }
        }
    }

    pub async fn deposit(&self, account_id: AccountId, amount: Decimal) -> Result<()> {
        let amount = Amount::new(amount)?;
        self.expect_applied(Operation::DepositTo { account_id, amount })
            .await
    }

    pub async fn withdraw(&self, account_id: AccountId, amount: Decimal) -> Result<()> {
        let amount = Amount::new(amount)?;
        self.expect_applied(Operation::WithdrawFrom { account_id, amount })
            .await
    }

    /// Returns once the debit side is terminal. The credit side is
    /// resumed by the worker pool and may still be in flight.
    pub async fn transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Decimal,
    ) -> Result<()> {
        let amount = Amount::new(amount)?;
        let detail = TransferDetail {
            transfer_id: TransferId::generate(),
            from_account_id,
            to_account_id,
            amount,
        };
        self.expect_applied(Operation::TransferFrom(detail)).await
    }

    async fn expect_applied(&self, operation: Operation) -> Result<()> {
        match self.submit(operation).await? {
            FinalState::Applied => Ok(()),
            FinalState::Rejected(reason) => Err(LedgerError::Rejected(reason)),
        }
    }

    /// Runs one submission to its terminal state. The operation identity
    /// is fixed up front so every retry below targets the same log slot.
    async fn submit(&self, operation: Operation) -> Result<FinalState> {
        let operation_id = OperationId::generate();
        let account_id = operation.account_id();
        let mut version: Option<Version> = None;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .try_submit(operation_id, account_id, &operation, &mut version)
                .await
            {
                Ok(state) => {
                    debug!(account = %account_id, attempt, state = ?state, "submission terminal");
                    return Ok(state);
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    warn!(
                        account = %account_id,
                        attempt,
                        error = %e,
                        "submission attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => {
                    return Err(LedgerError::Unavailable(format!(
                        "terminal state could not be loaded: {e}"
                    )));
                }
            }
        }
    }

    async fn try_submit(
        &self,
        operation_id: OperationId,
        account_id: AccountId,
        operation: &Operation,
        version: &mut Option<Version>,
    ) -> Result<FinalState, StoreError> {
        let assigned = match *version {
            Some(assigned) => assigned,
            None => {
                let assigned = self.claim_slot(operation_id, account_id).await?;
                *version = Some(assigned);
                assigned
            }
        };
        let position = LogPosition::new(account_id, assigned);

        let logged = LoggedOperation::unfinished(operation_id, position, operation.clone());
        match self.operations.store(logged).await {
            Ok(()) | Err(StoreError::DuplicateOperation) => {}
            Err(e) => return Err(e),
        }

        // Everything registered before us runs first. The replay may stop
        // past our own slot (a fault, or a later slot still awaiting its
        // body), so our stored terminal state decides this attempt, not
        // the replay's outcome.
        let replayed = self.dispatcher.run_backlog(account_id).await;

        if let Some(LoggedOperation {
            final_state: Some(state),
            ..
        }) = self.operations.find(position).await?
        {
            return Ok(state);
        }
        replayed?;
        Err(StoreError::Unavailable(
            "operation did not reach a terminal state".to_string(),
        ))
    }

    /// Registers the identity. A duplicate means an earlier attempt got
    /// the slot but the response was lost; the assigned version is then
    /// recovered from the unfinished backlog, where a slot without a
    /// stored body always still is.
    async fn claim_slot(
        &self,
        operation_id: OperationId,
        account_id: AccountId,
    ) -> Result<Version, StoreError> {
        match self.sequencer.register(account_id, operation_id).await {
            Ok(version) => Ok(version),
            Err(StoreError::DuplicateOperation) => self
                .sequencer
                .unfinished_positions(account_id)
                .await?
                .into_iter()
                .find(|(id, _)| *id == operation_id)
                .map(|(_, version)| version)
                .ok_or_else(|| {
                    StoreError::Unavailable(
                        "registered operation vanished from the backlog".to_string(),
                    )
                }),
            Err(e) => Err(e),
        }
    }
}
