use super::work_queue::WorkQueue;
use crate::domain::account::{Account, AccountId, Amount, Balance, Version};
use crate::domain::operation::{
    FinalState, LogPosition, LoggedOperation, Operation, OperationId, TransferDetail,
};
use crate::domain::ports::{AccountStoreRef, OperationStoreRef, SequencerRef};
use crate::error::StoreError;
use std::sync::Arc;
use tracing::debug;

/// Extra work an operation performs once its account effect is settled.
enum Completion<'a> {
    None,
    CreditLeg(&'a TransferDetail),
}

/// Routes each logged operation to its handler.
///
/// Handlers are stateless: every invocation re-reads the account, decides
/// against the stored version, and writes through conditional updates.
/// Running a handler again, out of order, or from several workers at once
/// converges on the same terminal state. Errors returned from here are
/// always transient storage faults; business outcomes are persisted on
/// the operation itself.
pub struct Dispatcher {
    accounts: AccountStoreRef,
    operations: OperationStoreRef,
    sequencer: SequencerRef,
    work_queue: Arc<WorkQueue>,
}

impl Dispatcher {
    pub fn new(
        accounts: AccountStoreRef,
        operations: OperationStoreRef,
        sequencer: SequencerRef,
        work_queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            accounts,
            operations,
            sequencer,
            work_queue,
        }
    }

    /// Runs the handler for one `(version, operation)` pair.
    pub async fn dispatch(
        &self,
        version: Version,
        operation: &Operation,
    ) -> Result<(), StoreError> {
        match operation {
            Operation::CreateAccount { account_id } => {
                self.create_account(version, *account_id).await
            }
            Operation::DepositTo { account_id, amount } => {
                let amount = *amount;
                self.settle(
                    version,
                    *account_id,
                    |account| Ok(account.balance.credited(amount)),
                    Completion::None,
                )
                .await
            }
            Operation::WithdrawFrom { account_id, amount } => {
                self.settle(
                    version,
                    *account_id,
                    debit_rule(*amount),
                    Completion::None,
                )
                .await
            }
            Operation::TransferFrom(detail) => {
                self.settle(
                    version,
                    detail.from_account_id,
                    debit_rule(detail.amount),
                    Completion::CreditLeg(detail),
                )
                .await
            }
            Operation::TransferTo(detail) => {
                let amount = detail.amount;
                self.settle(
                    version,
                    detail.to_account_id,
                    move |account| Ok(account.balance.credited(amount)),
                    Completion::None,
                )
                .await
            }
        }
    }

    /// Replays every unfinished operation of the account in ascending
    /// version order. Stops at the first transient fault, and at a slot
    /// whose body has not been stored yet: nothing past that slot may
    /// apply before it, so the account goes back on the queue until the
    /// slot's owner completes it on a retry.
    pub async fn run_backlog(&self, account_id: AccountId) -> Result<(), StoreError> {
        for (_, version) in self.sequencer.unfinished_positions(account_id).await? {
            let position = LogPosition::new(account_id, version);
            let Some(logged) = self.operations.find(position).await? else {
                debug!(position = %position, "replay blocked by a bodyless log slot");
                self.work_queue.add(account_id);
                return Err(StoreError::Unavailable(format!(
                    "log slot {position} is awaiting its body"
                )));
            };
            if logged.is_finalized() {
                continue;
            }
            self.dispatch(version, &logged.operation).await?;
        }
        Ok(())
    }

    /// The shared decision procedure: compare the operation's version to
    /// the account's stored version and act on exactly one of the three
    /// outcomes. `rule` turns the current account into the new balance or
    /// a rejection reason.
    async fn settle<F>(
        &self,
        version: Version,
        account_id: AccountId,
        rule: F,
        completion: Completion<'_>,
    ) -> Result<(), StoreError>
    where
        F: Fn(&Account) -> Result<Balance, String>,
    {
        let position = LogPosition::new(account_id, version);
        loop {
            let Some(account) = self.accounts.find(account_id).await? else {
                self.finalize_rejected(position, format!("Account '{account_id}' does not exist"))
                    .await?;
                return Ok(());
            };

            if version > account.version {
                let new_balance = match rule(&account) {
                    Ok(balance) => balance,
                    Err(reason) => {
                        // Terminal business rejection; the account is not touched.
                        self.finalize_rejected(position, reason).await?;
                        return Ok(());
                    }
                };
                if self
                    .accounts
                    .update_balance(account_id, new_balance, account.version, version)
                    .await?
                {
                    self.run_completion(&completion).await?;
                    self.finalize_applied(position).await?;
                    return Ok(());
                }
                // Lost the race to another writer; re-read and re-decide.
                debug!(position = %position, "balance update contended, re-reading");
            } else if version == account.version {
                // The stored state already reflects this operation. Its own
                // bookkeeping may still be missing, so finish that.
                self.run_completion(&completion).await?;
                self.finalize_applied(position).await?;
                return Ok(());
            } else {
                debug!(position = %position, current = %account.version, "operation superseded");
                return Ok(());
            }
        }
    }

    /// CreateAccount cannot compare versions first since the account may
    /// not exist yet. The create itself is the conditional step; a failed
    /// create is triaged against the record that beat it there.
    async fn create_account(
        &self,
        version: Version,
        account_id: AccountId,
    ) -> Result<(), StoreError> {
        let position = LogPosition::new(account_id, version);
        if self.accounts.create(account_id, version).await? {
            self.finalize_applied(position).await?;
            debug!(account = %account_id, version = %version, "account created");
            return Ok(());
        }

        match self.accounts.find_version(account_id).await? {
            Some(existing) if version > existing => {
                self.finalize_rejected(position, "Account already exists".to_string())
                    .await?;
            }
            Some(existing) if version == existing => {
                // This very operation created it on an earlier attempt.
                self.finalize_applied(position).await?;
            }
            Some(_) => {}
            None => {
                return Err(StoreError::Unavailable(
                    "account exists but could not be read back".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn run_completion(&self, completion: &Completion<'_>) -> Result<(), StoreError> {
        match completion {
            Completion::None => Ok(()),
            Completion::CreditLeg(detail) => self.ensure_credit_leg(detail).await,
        }
    }

    /// Creates the TransferTo leg on the target account and enqueues the
    /// account for a worker. The leg's identity is derived from the
    /// transfer id, so attempts after the first collapse into duplicates;
    /// a duplicate with a missing body (an earlier attempt died between
    /// register and store) is completed here.
    async fn ensure_credit_leg(&self, detail: &TransferDetail) -> Result<(), StoreError> {
        let credit_id = OperationId::for_transfer_credit(detail.transfer_id);
        let credit_version = match self.sequencer.register(detail.to_account_id, credit_id).await {
            Ok(version) => Some(version),
            Err(StoreError::DuplicateOperation) => self
                .sequencer
                .unfinished_positions(detail.to_account_id)
                .await?
                .into_iter()
                .find(|(id, _)| *id == credit_id)
                .map(|(_, version)| version),
            Err(e) => return Err(e),
        };

        if let Some(credit_version) = credit_version {
            let logged = LoggedOperation::unfinished(
                credit_id,
                LogPosition::new(detail.to_account_id, credit_version),
                Operation::TransferTo(*detail),
            );
            match self.operations.store(logged).await {
                Ok(()) | Err(StoreError::DuplicateOperation) => {}
                Err(e) => return Err(e),
            }
            debug!(
                transfer = %detail.transfer_id,
                to = %detail.to_account_id,
                version = %credit_version,
                "credit leg in place"
            );
        }

        self.work_queue.add(detail.to_account_id);
        Ok(())
    }

    async fn finalize_applied(&self, position: LogPosition) -> Result<(), StoreError> {
        if self.operations.mark_applied(position).await? {
            debug!(position = %position, "operation applied");
        }
        Ok(())
    }

    async fn finalize_rejected(
        &self,
        position: LogPosition,
        reason: String,
    ) -> Result<(), StoreError> {
        if self.operations.mark_rejected(position, reason.clone()).await? {
            debug!(position = %position, reason = %reason, "operation rejected");
        }
        Ok(())
    }
}

fn debit_rule(amount: Amount) -> impl Fn(&Account) -> Result<Balance, String> {
    move |account: &Account| {
        account
            .balance
            .debited(amount)
            .ok_or_else(|| format!("Insufficient funds on account '{}'", account.id))
    }
}
