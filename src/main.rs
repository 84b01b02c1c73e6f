use clap::Parser;
use miette::{IntoDiagnostic, Result};
use opledger::application::dispatcher::Dispatcher;
use opledger::application::submitter::{RetryPolicy, Submitter};
use opledger::application::work_queue::WorkQueue;
use opledger::application::worker::{WorkerConfig, WorkerPool};
use opledger::domain::account::AccountId;
use opledger::domain::ports::{AccountStore, AccountStoreRef, OperationStoreRef, SequencerRef};
use opledger::error::LedgerError;
use opledger::infrastructure::in_memory::InMemoryStore;
#[cfg(feature = "storage-rocksdb")]
use opledger::infrastructure::rocksdb::RocksDbStore;
use opledger::interfaces::csv::account_writer::{AccountRow, AccountWriter};
use opledger::interfaces::csv::request_reader::{RequestKind, RequestReader, RequestRecord};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the input CSV file with the requests to process.
    input: PathBuf,

    /// Number of background workers draining the account queue.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// How long an idle worker sleeps before polling the queue again.
    #[arg(long, default_value_t = 50)]
    idle_timeout_ms: u64,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries the final report, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let (accounts, operations, sequencer) = open_stores(cli.db_path)?;
    let work_queue = Arc::new(WorkQueue::new());
    let dispatcher = Arc::new(Dispatcher::new(
        accounts.clone(),
        operations.clone(),
        sequencer.clone(),
        work_queue.clone(),
    ));
    let submitter = Submitter::new(
        accounts.clone(),
        operations,
        sequencer,
        dispatcher.clone(),
        RetryPolicy::default(),
    );
    let pool = WorkerPool::start(
        work_queue,
        dispatcher,
        WorkerConfig {
            workers: cli.workers,
            idle_timeout: Duration::from_millis(cli.idle_timeout_ms),
        },
    );

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = RequestReader::new(file);

    let mut names: BTreeMap<String, AccountId> = BTreeMap::new();
    for row in reader.requests() {
        let record = match row {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Error reading request: {e}");
                continue;
            }
        };
        if let Err(e) = run_request(&submitter, &mut names, record).await {
            eprintln!("Error processing request: {e}");
        }
    }

    drain(&pool).await;
    pool.shutdown().await;

    let mut rows = Vec::with_capacity(names.len());
    for (name, account_id) in &names {
        if let Some(account) = accounts.find(*account_id).await.into_diagnostic()? {
            rows.push(AccountRow::new(name, &account));
        }
    }
    let mut writer = AccountWriter::new(io::stdout().lock());
    writer.write_accounts(rows).into_diagnostic()?;

    Ok(())
}

fn open_stores(
    db_path: Option<PathBuf>,
) -> Result<(AccountStoreRef, OperationStoreRef, SequencerRef)> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = Arc::new(RocksDbStore::open(path).into_diagnostic()?);
            Ok((store.clone(), store.clone(), store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store.clone(), store))
        }
        None => {
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store.clone(), store))
        }
    }
}

async fn run_request(
    submitter: &Submitter,
    names: &mut BTreeMap<String, AccountId>,
    record: RequestRecord,
) -> Result<(), LedgerError> {
    match record.op {
        RequestKind::Create => {
            if names.contains_key(&record.account) {
                return Err(LedgerError::Validation(format!(
                    "account name '{}' is already taken",
                    record.account
                )));
            }
            let account = submitter.create_account().await?;
            names.insert(record.account, account.id);
            Ok(())
        }
        RequestKind::Deposit => {
            let account_id = lookup(names, &record.account)?;
            let amount = required_amount(&record)?;
            submitter.deposit(account_id, amount).await
        }
        RequestKind::Withdraw => {
            let account_id = lookup(names, &record.account)?;
            let amount = required_amount(&record)?;
            submitter.withdraw(account_id, amount).await
        }
        RequestKind::Transfer => {
            let from = lookup(names, &record.account)?;
            let to_name = record
                .to
                .as_deref()
                .ok_or_else(|| LedgerError::Validation("transfer requires a 'to' account".into()))?;
            let to = lookup(names, to_name)?;
            let amount = required_amount(&record)?;
            submitter.transfer(from, to, amount).await
        }
    }
}

fn lookup(names: &BTreeMap<String, AccountId>, name: &str) -> Result<AccountId, LedgerError> {
    names
        .get(name)
        .copied()
        .ok_or_else(|| LedgerError::Validation(format!("unknown account name '{name}'")))
}

fn required_amount(record: &RequestRecord) -> Result<rust_decimal::Decimal, LedgerError> {
    record
        .amount
        .ok_or_else(|| LedgerError::Validation("amount is required for this request".into()))
}

/// Waits until the queue is empty and no worker holds an account, so every
/// pending credit leg has landed before the report is written.
async fn drain(pool: &WorkerPool) {
    loop {
        let stats = pool.stats();
        if stats.queued == 0 && stats.in_progress == 0 {
            // A worker may sit between taking an account and marking its
            // slot busy; one more quiet read closes that window.
            tokio::time::sleep(Duration::from_millis(20)).await;
            let again = pool.stats();
            if again.queued == 0 && again.in_progress == 0 {
                return;
            }
        } else {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
