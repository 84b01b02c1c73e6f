#![allow(dead_code)]

use async_trait::async_trait;
use opledger::application::dispatcher::Dispatcher;
use opledger::application::submitter::{RetryPolicy, Submitter};
use opledger::application::work_queue::WorkQueue;
use opledger::domain::account::{Account, AccountId, Balance, Version};
use opledger::domain::operation::{FinalState, LogPosition, LoggedOperation, OperationId};
use opledger::domain::ports::{
    AccountStore, AccountStoreRef, OperationStore, OperationStoreRef, Sequencer, SequencerRef,
};
use opledger::error::StoreError;
use opledger::infrastructure::in_memory::InMemoryStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A fully wired ledger over a single in-memory store.
pub struct Ledger {
    pub store: Arc<InMemoryStore>,
    pub work_queue: Arc<WorkQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub submitter: Arc<Submitter>,
}

pub fn ledger() -> Ledger {
    let store = Arc::new(InMemoryStore::new());
    wire(store.clone(), store.clone(), store.clone(), store)
}

/// Wires the application services over flaky ports, with a retry policy
/// wide enough to ride out every injected outage.
pub fn flaky_ledger() -> (Arc<FlakyStore>, Ledger) {
    let inner = Arc::new(InMemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(inner.as_ref().clone()));
    let ledger = wire(flaky.clone(), flaky.clone(), flaky.clone(), inner);
    (flaky, ledger)
}

fn wire(
    accounts: AccountStoreRef,
    operations: OperationStoreRef,
    sequencer: SequencerRef,
    store: Arc<InMemoryStore>,
) -> Ledger {
    let work_queue = Arc::new(WorkQueue::new());
    let dispatcher = Arc::new(Dispatcher::new(
        accounts.clone(),
        operations.clone(),
        sequencer.clone(),
        work_queue.clone(),
    ));
    let submitter = Arc::new(Submitter::new(
        accounts,
        operations,
        sequencer,
        dispatcher.clone(),
        RetryPolicy {
            max_attempts: 25,
            backoff: Duration::from_millis(1),
        },
    ));
    Ledger {
        store,
        work_queue,
        dispatcher,
        submitter,
    }
}

impl Ledger {
    pub async fn account(&self, account_id: AccountId) -> Account {
        AccountStore::find(&*self.store, account_id)
            .await
            .unwrap()
            .expect("account should exist")
    }

    pub async fn final_state(&self, position: LogPosition) -> Option<FinalState> {
        OperationStore::find(&*self.store, position)
            .await
            .unwrap()
            .and_then(|logged| logged.final_state)
    }

    /// Runs the backlog of `account_id` until it succeeds, the way a worker
    /// retries an account over transient store failures.
    pub async fn drain_backlog(&self, account_id: AccountId) {
        for _ in 0..50 {
            if self.dispatcher.run_backlog(account_id).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("backlog of {account_id} did not drain");
    }

    /// Blocks until every registered operation on `account_id` has a
    /// terminal state. Used when a background pool owns the draining.
    pub async fn wait_until_settled(&self, account_id: AccountId) {
        for _ in 0..500 {
            let pending = self.store.unfinished_positions(account_id).await.unwrap();
            if pending.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("operations on {account_id} never settled");
    }
}

/// Store decorator that fails each port method exactly once, after the
/// wrapped call has already taken effect. This is the worst case for a
/// caller: the write landed but the acknowledgment was lost.
pub struct FlakyStore {
    inner: InMemoryStore,
    create: AtomicBool,
    update_balance: AtomicBool,
    find_account: AtomicBool,
    find_version: AtomicBool,
    store_op: AtomicBool,
    find_op: AtomicBool,
    mark_applied: AtomicBool,
    mark_rejected: AtomicBool,
    register: AtomicBool,
    unfinished: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            create: AtomicBool::new(false),
            update_balance: AtomicBool::new(false),
            find_account: AtomicBool::new(false),
            find_version: AtomicBool::new(false),
            store_op: AtomicBool::new(false),
            find_op: AtomicBool::new(false),
            mark_applied: AtomicBool::new(false),
            mark_rejected: AtomicBool::new(false),
            register: AtomicBool::new(false),
            unfinished: AtomicBool::new(false),
        }
    }

    /// Re-arms every failure point.
    pub fn reset(&self) {
        for flag in [
            &self.create,
            &self.update_balance,
            &self.find_account,
            &self.find_version,
            &self.store_op,
            &self.find_op,
            &self.mark_applied,
            &self.mark_rejected,
            &self.register,
            &self.unfinished,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }

    fn outage<T>(&self, flag: &AtomicBool, outcome: Result<T, StoreError>) -> Result<T, StoreError> {
        if !flag.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        outcome
    }
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn create(
        &self,
        account_id: AccountId,
        initial_version: Version,
    ) -> Result<bool, StoreError> {
        let outcome = self.inner.create(account_id, initial_version).await;
        self.outage(&self.create, outcome)
    }

    async fn update_balance(
        &self,
        account_id: AccountId,
        new_balance: Balance,
        expected_version: Version,
        new_version: Version,
    ) -> Result<bool, StoreError> {
        let outcome = self
            .inner
            .update_balance(account_id, new_balance, expected_version, new_version)
            .await;
        self.outage(&self.update_balance, outcome)
    }

    async fn find(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let outcome = AccountStore::find(&self.inner, account_id).await;
        self.outage(&self.find_account, outcome)
    }

    async fn find_version(&self, account_id: AccountId) -> Result<Option<Version>, StoreError> {
        let outcome = self.inner.find_version(account_id).await;
        self.outage(&self.find_version, outcome)
    }
}

#[async_trait]
impl OperationStore for FlakyStore {
    async fn store(&self, logged: LoggedOperation) -> Result<(), StoreError> {
        let outcome = self.inner.store(logged).await;
        self.outage(&self.store_op, outcome)
    }

    async fn find(&self, position: LogPosition) -> Result<Option<LoggedOperation>, StoreError> {
        let outcome = OperationStore::find(&self.inner, position).await;
        self.outage(&self.find_op, outcome)
    }

    async fn mark_applied(&self, position: LogPosition) -> Result<bool, StoreError> {
        let outcome = self.inner.mark_applied(position).await;
        self.outage(&self.mark_applied, outcome)
    }

    async fn mark_rejected(
        &self,
        position: LogPosition,
        reason: String,
    ) -> Result<bool, StoreError> {
        let outcome = self.inner.mark_rejected(position, reason).await;
        self.outage(&self.mark_rejected, outcome)
    }
}

#[async_trait]
impl Sequencer for FlakyStore {
    async fn register(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<Version, StoreError> {
        let outcome = self.inner.register(account_id, operation_id).await;
        self.outage(&self.register, outcome)
    }

    async fn unfinished_positions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<(OperationId, Version)>, StoreError> {
        let outcome = self.inner.unfinished_positions(account_id).await;
        self.outage(&self.unfinished, outcome)
    }
}
