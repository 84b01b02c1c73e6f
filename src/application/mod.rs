//! Application layer: the operation handlers and everything that drives
//! them.
//!
//! The `Dispatcher` owns the decision procedure every handler shares, the
//! `Submitter` is the synchronous caller-facing surface, and the
//! `WorkerPool` drains the `WorkQueue` of accounts whose backlogs need
//! resumption.

pub mod dispatcher;
pub mod submitter;
pub mod work_queue;
pub mod worker;
