use super::dispatcher::Dispatcher;
use super::work_queue::WorkQueue;
use crate::domain::account::AccountId;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    /// How long an idle worker waits before polling the queue again.
    /// Applies only while waiting for work, never to work already taken.
    pub idle_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            idle_timeout: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub queued: usize,
    pub in_progress: usize,
}

/// Fixed set of loops draining the work queue.
///
/// Workers share nothing but the queue and the stores behind the
/// dispatcher. Two workers picking up the same account stays correct
/// because the handlers decide idempotently; the queue's dedup only
/// keeps it from being the common case.
pub struct WorkerPool {
    work_queue: Arc<WorkQueue>,
    current: Vec<Arc<Mutex<Option<AccountId>>>>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        work_queue: Arc<WorkQueue>,
        dispatcher: Arc<Dispatcher>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut current = Vec::with_capacity(config.workers);
        let mut handles = Vec::with_capacity(config.workers);

        for worker_id in 0..config.workers {
            let slot = Arc::new(Mutex::new(None));
            current.push(Arc::clone(&slot));
            let worker = Worker {
                id: worker_id,
                work_queue: Arc::clone(&work_queue),
                dispatcher: Arc::clone(&dispatcher),
                idle_timeout: config.idle_timeout,
                current: slot,
                shutdown: shutdown_rx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        Self {
            work_queue,
            current,
            shutdown,
            handles,
        }
    }

    /// Queue depth plus the number of workers busy on an account.
    pub fn stats(&self) -> WorkerPoolStats {
        let in_progress = self
            .current
            .iter()
            .filter(|slot| slot.lock().unwrap().is_some())
            .count();
        WorkerPoolStats {
            queued: self.work_queue.len(),
            in_progress,
        }
    }

    /// Stops the pool. Workers finish the account they are on; nothing
    /// is interrupted mid-storage-call.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

struct Worker {
    id: usize,
    work_queue: Arc<WorkQueue>,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    current: Arc<Mutex<Option<AccountId>>>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        info!(worker = self.id, "worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let Some(account_id) = self.work_queue.take_next_available() else {
                self.idle().await;
                continue;
            };

            *self.current.lock().unwrap() = Some(account_id);
            match self.dispatcher.run_backlog(account_id).await {
                Ok(()) => {
                    *self.current.lock().unwrap() = None;
                }
                Err(e) => {
                    warn!(
                        worker = self.id,
                        account = %account_id,
                        error = %e,
                        "backlog resumption failed, requeueing account"
                    );
                    // Requeued before the busy slot clears, so the account
                    // is never missing from both stats counts at once.
                    self.work_queue.add(account_id);
                    *self.current.lock().unwrap() = None;
                    // Keep a faulty store from being hammered in a tight loop.
                    self.idle().await;
                }
            }
        }
        info!(worker = self.id, "worker stopped");
    }

    async fn idle(&mut self) {
        tokio::select! {
            _ = self.shutdown.changed() => {}
            _ = tokio::time::sleep(self.idle_timeout) => {}
        }
    }
}
