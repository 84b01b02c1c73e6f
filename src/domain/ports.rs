use super::account::{Account, AccountId, Balance, Version};
use super::operation::{LogPosition, LoggedOperation, OperationId};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type OperationStoreRef = Arc<dyn OperationStore>;
pub type SequencerRef = Arc<dyn Sequencer>;

/// Current state of each account. Updates are conditional on the version
/// the caller read, so concurrent writers cannot overwrite each other.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Inserts the account record. Returns `false` if the id already exists.
    async fn create(
        &self,
        account_id: AccountId,
        initial_version: Version,
    ) -> Result<bool, StoreError>;

    /// Sets balance and version only if the stored version still equals
    /// `expected_version`. Returns `false` when another writer got there
    /// first. `new_version` must be greater than `expected_version`.
    async fn update_balance(
        &self,
        account_id: AccountId,
        new_balance: Balance,
        expected_version: Version,
        new_version: Version,
    ) -> Result<bool, StoreError>;

    async fn find(&self, account_id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn find_version(&self, account_id: AccountId) -> Result<Option<Version>, StoreError>;
}

/// Append-only log of operations keyed by `(account, version)`.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persists the operation body at its registered position. Returns
    /// `Err(DuplicateOperation)` if a body is already stored there.
    async fn store(&self, logged: LoggedOperation) -> Result<(), StoreError>;

    async fn find(&self, position: LogPosition) -> Result<Option<LoggedOperation>, StoreError>;

    /// Finalizes the operation as applied. Returns `true` only for the
    /// caller that set the terminal state; later calls see `false`.
    async fn mark_applied(&self, position: LogPosition) -> Result<bool, StoreError>;

    /// Finalizes the operation as rejected with a user-visible reason.
    /// Same first-writer-wins contract as [`mark_applied`](Self::mark_applied).
    async fn mark_rejected(&self, position: LogPosition, reason: String)
        -> Result<bool, StoreError>;
}

/// Hands out log positions: each registration claims the next free
/// version slot on the account's log.
#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Claims a version slot for the operation identity. Returns
    /// `Err(DuplicateOperation)` if the identity was registered before,
    /// regardless of position.
    async fn register(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<Version, StoreError>;

    /// Registered slots on the account's log that have no terminal state
    /// yet, in ascending version order.
    async fn unfinished_positions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<(OperationId, Version)>, StoreError>;
}
