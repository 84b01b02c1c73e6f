use crate::domain::account::{Account, AccountId, Balance, Version};
use crate::domain::operation::{FinalState, LogPosition, LoggedOperation, Operation, OperationId};
use crate::domain::ports::{AccountStore, OperationStore, Sequencer};
use crate::error::StoreError;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Column family for account records.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column family for log slots, keyed by `(account, version)`.
pub const CF_OPERATIONS: &str = "operations";
/// Column family mapping operation identities to their claimed position.
pub const CF_IDENTITIES: &str = "identities";

const MAX_LOCAL_INCREMENTS: usize = 3;

/// Persistent adapter implementing all three storage ports on RocksDB.
///
/// Values are JSON documents; log slot keys put the version in big-endian
/// after the account id so a prefix scan walks the log in order. RocksDB
/// has no conditional write, so every read-modify-write section serializes
/// through one process-local mutex. That is enough for a single-node
/// deployment, which is what this adapter is for.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

/// On-disk shape of one log slot.
#[derive(Serialize, Deserialize)]
struct SlotRecord {
    operation_id: OperationId,
    operation: Option<Operation>,
    final_state: Option<FinalState>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the given path, ensuring
    /// the three column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_OPERATIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_IDENTITIES, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, descriptors).map_err(unavailable)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("column family '{name}' not found")))
    }

    fn read_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let bytes = self
            .db
            .get_cf(cf, account_key(account_id))
            .map_err(unavailable)?;
        bytes
            .map(|bytes| serde_json::from_slice(&bytes).map_err(unavailable))
            .transpose()
    }

    fn write_account(&self, account: &Account) -> Result<(), StoreError> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let value = serde_json::to_vec(account).map_err(unavailable)?;
        self.db
            .put_cf(cf, account_key(account.id), value)
            .map_err(unavailable)
    }

    fn read_slot(&self, position: LogPosition) -> Result<Option<SlotRecord>, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let bytes = self
            .db
            .get_cf(cf, slot_key(position))
            .map_err(unavailable)?;
        bytes
            .map(|bytes| serde_json::from_slice(&bytes).map_err(unavailable))
            .transpose()
    }

    fn write_slot(&self, position: LogPosition, record: &SlotRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let value = serde_json::to_vec(record).map_err(unavailable)?;
        self.db
            .put_cf(cf, slot_key(position), value)
            .map_err(unavailable)
    }

    fn head_version(&self, account_id: AccountId) -> Result<Option<Version>, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let upper = slot_key(LogPosition::new(account_id, Version::new(u64::MAX)));
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));
        if let Some(item) = iter.next() {
            let (key, _) = item.map_err(unavailable)?;
            if key.len() == 24 && key[..16] == upper[..16] {
                return Ok(Some(parse_slot_version(&key)));
            }
        }
        Ok(None)
    }

    fn finalize(&self, position: LogPosition, state: FinalState) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let Some(mut record) = self.read_slot(position)? else {
            return Ok(false);
        };
        if record.final_state.is_some() {
            return Ok(false);
        }
        record.final_state = Some(state);
        self.write_slot(position, &record)?;
        Ok(true)
    }
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn account_key(account_id: AccountId) -> [u8; 16] {
    *account_id.as_uuid().as_bytes()
}

fn slot_key(position: LogPosition) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(position.account_id.as_uuid().as_bytes());
    key[16..].copy_from_slice(&position.version.value().to_be_bytes());
    key
}

fn identity_key(operation_id: OperationId) -> [u8; 16] {
    *operation_id.as_uuid().as_bytes()
}

fn parse_slot_version(key: &[u8]) -> Version {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[16..24]);
    Version::new(u64::from_be_bytes(bytes))
}

#[async_trait]
impl AccountStore for RocksDbStore {
    async fn create(
        &self,
        account_id: AccountId,
        initial_version: Version,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        if self.read_account(account_id)?.is_some() {
            return Ok(false);
        }
        self.write_account(&Account::new(account_id, initial_version))?;
        Ok(true)
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
        let _guard = self.write_lock.lock().unwrap();
        let Some(mut account) = self.read_account(account_id)? else {
            return Ok(false);
        };
        if account.version != expected_version {
            return Ok(false);
        }
        account.balance = new_balance;
        account.version = new_version;
        self.write_account(&account)?;
        Ok(true)
    }

    async fn find(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        self.read_account(account_id)
    }

    async fn find_version(&self, account_id: AccountId) -> Result<Option<Version>, StoreError> {
        Ok(self.read_account(account_id)?.map(|account| account.version))
    }
}

#[async_trait]
impl OperationStore for RocksDbStore {
    async fn store(&self, logged: LoggedOperation) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let Some(mut record) = self.read_slot(logged.position)? else {
            return Err(StoreError::Unavailable(
                "log position was never registered".to_string(),
            ));
        };
        if record.operation_id != logged.id {
            return Err(StoreError::Unavailable(
                "log position is registered to a different operation".to_string(),
            ));
        }
        if record.operation.is_some() {
            return Err(StoreError::DuplicateOperation);
        }
        record.operation = Some(logged.operation);
        self.write_slot(logged.position, &record)
    }

    async fn find(&self, position: LogPosition) -> Result<Option<LoggedOperation>, StoreError> {
        let Some(record) = self.read_slot(position)? else {
            return Ok(None);
        };
        Ok(record.operation.map(|operation| LoggedOperation {
            id: record.operation_id,
            position,
            operation,
            final_state: record.final_state,
        }))
    }

    async fn mark_applied(&self, position: LogPosition) -> Result<bool, StoreError> {
        self.finalize(position, FinalState::Applied)
    }

    async fn mark_rejected(
        &self,
        position: LogPosition,
        reason: String,
    ) -> Result<bool, StoreError> {
        debug_assert!(!reason.is_empty(), "rejection reason must not be empty");
        self.finalize(position, FinalState::Rejected(reason))
    }
}

#[async_trait]
impl Sequencer for RocksDbStore {
    async fn register(
        &self,
        account_id: AccountId,
        operation_id: OperationId,
    ) -> Result<Version, StoreError> {
        let identities = self.cf(CF_IDENTITIES)?;

        loop {
            let head = {
                let _guard = self.write_lock.lock().unwrap();
                self.head_version(account_id)?
            };
            let mut candidate = head.map(|v| v.next()).unwrap_or(Version::FIRST);

            for _ in 0..MAX_LOCAL_INCREMENTS {
                let _guard = self.write_lock.lock().unwrap();
                if self
                    .db
                    .get_cf(identities, identity_key(operation_id))
                    .map_err(unavailable)?
                    .is_some()
                {
                    return Err(StoreError::DuplicateOperation);
                }
                let position = LogPosition::new(account_id, candidate);
                if self.read_slot(position)?.is_some() {
                    candidate = candidate.next();
                    continue;
                }

                let record = SlotRecord {
                    operation_id,
                    operation: None,
                    final_state: None,
                };
                let mut batch = WriteBatch::default();
                batch.put_cf(
                    self.cf(CF_OPERATIONS)?,
                    slot_key(position),
                    serde_json::to_vec(&record).map_err(unavailable)?,
                );
                batch.put_cf(
                    identities,
                    identity_key(operation_id),
                    serde_json::to_vec(&position).map_err(unavailable)?,
                );
                self.db.write(batch).map_err(unavailable)?;
                return Ok(candidate);
            }
            // Contention from other handles; re-read the head.
        }
    }

    async fn unfinished_positions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<(OperationId, Version)>, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let lower = slot_key(LogPosition::new(account_id, Version::new(0)));

        let mut pending = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&lower, Direction::Forward))
        {
            let (key, value) = item.map_err(unavailable)?;
            if key.len() != 24 || key[..16] != lower[..16] {
                break;
            }
            let record: SlotRecord = serde_json::from_slice(&value).map_err(unavailable)?;
            if record.final_state.is_none() {
                pending.push((record.operation_id, parse_slot_version(&key)));
            }
        }
        Ok(pending)
    }
}
