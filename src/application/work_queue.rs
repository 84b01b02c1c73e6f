use crate::domain::account::AccountId;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Deduplicating FIFO of accounts awaiting backlog resumption.
///
/// Resuming an account walks its whole unfinished backlog, so one queue
/// entry per account is enough no matter how many operations piled up.
/// The critical section only touches the two collections and never
/// blocks on storage.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    order: VecDeque<AccountId>,
    queued: HashSet<AccountId>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues the account. A no-op while the account is still queued;
    /// an account taken out may be added again.
    pub fn add(&self, account_id: AccountId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.queued.insert(account_id) {
            inner.order.push_back(account_id);
        }
    }

    /// Removes and returns the earliest queued account, if any.
    pub fn take_next_available(&self) -> Option<AccountId> {
        let mut inner = self.inner.lock().unwrap();
        let account_id = inner.order.pop_front()?;
        inner.queued.remove(&account_id);
        Some(account_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
