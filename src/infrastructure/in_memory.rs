use crate::domain::account::{Account, AccountId, Balance, Version};
use crate::domain::operation::{FinalState, LogPosition, LoggedOperation, Operation, OperationId};
use crate::domain::ports::{AccountStore, OperationStore, Sequencer};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// How many version slots a registration probes by local increment
/// before re-reading the head of the log.
const MAX_LOCAL_INCREMENTS: usize = 3;

/// Thread-safe in-memory adapter implementing all three storage ports.
///
/// Accounts live in a `DashMap`, whose per-key locking gives the
/// conditional balance update an honest atomic section. The operation
/// log sits behind one mutex; head reads and slot claims take the lock
/// separately, so concurrent registrations really do collide on the
/// same candidate version and retry, the same way independent processes
/// would against shared storage.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    accounts: Arc<DashMap<AccountId, Account>>,
    log: Arc<Mutex<LogTable>>,
}

impl InMemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct LogTable {
    slots: HashMap<AccountId, BTreeMap<Version, LogSlot>>,
    identities: HashMap<OperationId, LogPosition>,
}

struct LogSlot {
    operation_id: OperationId,
    body: Option<Operation>,
    final_state: Option<FinalState>,
}

enum ClaimOutcome {
    Claimed,
    SlotTaken,
    DuplicateIdentity,
}

impl LogTable {
    fn head_version(&self, account_id: AccountId) -> Option<Version> {
        self.slots
            .get(&account_id)
            .and_then(|log| log.keys().next_back().copied())
    }

    fn try_claim(
        &mut self,
        account_id: AccountId,
        version: Version,
        operation_id: OperationId,
    ) -> ClaimOutcome {
        if self.identities.contains_key(&operation_id) {
            return ClaimOutcome::DuplicateIdentity;
        }
        let log = self.slots.entry(account_id).or_default();
        if log.contains_key(&version) {
            return ClaimOutcome::SlotTaken;
        }
        log.insert(
            version,
            LogSlot {
                operation_id,
                body: None,
                final_state: None,
            },
        );
        self.identities
            .insert(operation_id, LogPosition::new(account_id, version));
        ClaimOutcome::Claimed
    }

    fn store_body(&mut self, logged: LoggedOperation) -> Result<(), StoreError> {
        let slot = self
            .slots
            .get_mut(&logged.position.account_id)
            .and_then(|log| log.get_mut(&logged.position.version));
        let Some(slot) = slot else {
            return Err(StoreError::Unavailable(
                "log position was never registered".to_string(),
            ));
        };
        if slot.operation_id != logged.id {
            return Err(StoreError::Unavailable(
                "log position is registered to a different operation".to_string(),
            ));
        }
        if slot.body.is_some() {
            return Err(StoreError::DuplicateOperation);
        }
        slot.body = Some(logged.operation);
        Ok(())
    }

    fn find(&self, position: LogPosition) -> Option<LoggedOperation> {
        let slot = self.slots.get(&position.account_id)?.get(&position.version)?;
        let operation = slot.body.clone()?;
        Some(LoggedOperation {
            id: slot.operation_id,
            position,
            operation,
            final_state: slot.final_state.clone(),
        })
    }

    fn finalize(&mut self, position: LogPosition, state: FinalState) -> bool {
        match self
            .slots
            .get_mut(&position.account_id)
            .and_then(|log| log.get_mut(&position.version))
        {
            Some(slot) if slot.final_state.is_none() => {
                slot.final_state = Some(state);
                true
            }
            _ => false,
        }
    }

    fn unfinished(&self, account_id: AccountId) -> Vec<(OperationId, Version)> {
        self.slots
            .get(&account_id)
            .map(|log| {
                log.iter()
                    .filter(|(_, slot)| slot.final_state.is_none())
                    .map(|(version, slot)| (slot.operation_id, *version))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn create(
        &self,
        account_id: AccountId,
        initial_version: Version,
    ) -> Result<bool, StoreError> {
        match self.accounts.entry(account_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(Account::new(account_id, initial_version));
                Ok(true)
            }
        }
    }

    async fn update_balance(
        &self,
        account_id: AccountId,
        new_balance: Balance,
        expected_version: Version,
        new_version: Version,
    ) -> Result<bool, StoreError> {
        assert!(
            new_version > expected_version,
            "update_balance: new version {new_version} must sort after {expected_version}"
        );
        let Some(mut account) = self.accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        if account.version != expected_version {
            return Ok(false);
        }
        account.balance = new_balance;
        account.version = new_version;
        Ok(true)
    }

    async fn find(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&account_id).map(|entry| entry.clone()))
    }

    async fn find_version(&self, account_id: AccountId) -> Result<Option<Version>, StoreError> {
        Ok(self.accounts.get(&account_id).map(|entry| entry.version))
    }
}

#[async_trait]
impl OperationStore for InMemoryStore {
    async fn store(&self, logged: LoggedOperation) -> Result<(), StoreError> {
        self.log.lock().unwrap().store_body(logged)
    }

    async fn find(&self, position: LogPosition) -> Result<Option<LoggedOperation>, StoreError> {
        Ok(self.log.lock().unwrap().find(position))
    }

    async fn mark_applied(&self, position: LogPosition) -> Result<bool, StoreError> {
        Ok(self.log.lock().unwrap().finalize(position, FinalState::Applied))
    }

    async fn mark_rejected(
        &self,
        position: LogPosition,
        reason: String,
    ) -> Result<bool, StoreError> {
        debug_assert!(!reason.is_empty(), "rejection reason must not be empty");
        Ok(self
            .log
            .lock()
            .unwrap()
            .finalize(position, FinalState::Rejected(reason)))
    }
}

#[async_trait]
impl Sequencer for InMemoryStore {
    async fn register(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<Version, StoreError> {
        loop {
            let head = self.log.lock().unwrap().head_version(account_id);
            let mut candidate = head.map(|v| v.next()).unwrap_or(Version::FIRST);

            for _ in 0..MAX_LOCAL_INCREMENTS {
                let outcome =
                    self.log
                        .lock()
                        .unwrap()
                        .try_claim(account_id, candidate, operation_id);
                match outcome {
                    ClaimOutcome::Claimed => return Ok(candidate),
                    ClaimOutcome::DuplicateIdentity => return Err(StoreError::DuplicateOperation),
                    ClaimOutcome::SlotTaken => candidate = candidate.next(),
                }
            }
            // Heavy contention at this height; start over from a fresh head.
        }
    }

    async fn unfinished_positions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<(OperationId, Version)>, StoreError> {
        Ok(self.log.lock().unwrap().unfinished(account_id))
    }
}
