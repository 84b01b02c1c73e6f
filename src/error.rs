use thiserror::Error;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Errors surfaced by the store ports.
///
/// `DuplicateOperation` is an idempotency signal, not a fault: the flows
/// that can receive it (re-registration of an identity, re-creation of a
/// transfer's credit leg) swallow it and carry on. `Unavailable` is a
/// transient fault; the caller retries the whole handler invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("operation identity already registered")]
    DuplicateOperation,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned to callers of the submitter API.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The request never reached storage (e.g. a non-positive amount).
    #[error("invalid request: {0}")]
    Validation(String),
    /// The operation reached a terminal `Rejected` state; the message is
    /// the persisted rejection reason, verbatim.
    #[error("{0}")]
    Rejected(String),
    /// The terminal state of the submitted operation could not be
    /// established before the retry budget ran out.
    #[error("operation outcome unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        // DuplicateOperation never legitimately escapes the submission
        // flow; if it does, report it like any other storage trouble.
        LedgerError::Unavailable(e.to_string())
    }
}
