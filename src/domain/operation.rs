use super::account::{AccountId, Amount, TransferId, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a submitted operation, used for duplicate detection by the
/// sequencer and the operation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Fresh identity for a caller-submitted operation. Retries of the
    /// same submission reuse the value; independent submissions get
    /// independent identities.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Identity of the credit leg of a transfer. Derived from the
    /// transfer id, so every attempt to create the leg produces the same
    /// identity and the store's duplicate check collapses them to one.
    pub fn for_transfer_credit(transfer_id: TransferId) -> Self {
        Self(transfer_id.as_uuid())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Both legs of a transfer share this record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferDetail {
    pub transfer_id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
}

/// The closed set of account-mutating operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    CreateAccount { account_id: AccountId },
    DepositTo { account_id: AccountId, amount: Amount },
    WithdrawFrom { account_id: AccountId, amount: Amount },
    TransferFrom(TransferDetail),
    TransferTo(TransferDetail),
}

impl Operation {
    /// The account whose log this operation is registered against, which
    /// is also the account it mutates.
    pub fn account_id(&self) -> AccountId {
        match self {
            Operation::CreateAccount { account_id } => *account_id,
            Operation::DepositTo { account_id, .. } => *account_id,
            Operation::WithdrawFrom { account_id, .. } => *account_id,
            Operation::TransferFrom(detail) => detail.from_account_id,
            Operation::TransferTo(detail) => detail.to_account_id,
        }
    }
}

/// A slot in one account's operation log: `(account, version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub account_id: AccountId,
    pub version: Version,
}

impl LogPosition {
    pub fn new(account_id: AccountId, version: Version) -> Self {
        Self {
            account_id,
            version,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.account_id, self.version)
    }
}

/// Terminal outcome of a logged operation. Set at most once; `Rejected`
/// always carries a non-empty reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FinalState {
    Applied,
    Rejected(String),
}

impl FinalState {
    pub fn is_applied(&self) -> bool {
        matches!(self, FinalState::Applied)
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            FinalState::Applied => None,
            FinalState::Rejected(reason) => Some(reason),
        }
    }
}

/// An operation as the log stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedOperation {
    pub id: OperationId,
    pub position: LogPosition,
    pub operation: Operation,
    pub final_state: Option<FinalState>,
}

impl LoggedOperation {
    /// A freshly registered, not yet finalized log entry.
    pub fn unfinished(id: OperationId, position: LogPosition, operation: Operation) -> Self {
        Self {
            id,
            position,
            operation,
            final_state: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.final_state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn detail() -> TransferDetail {
        TransferDetail {
            transfer_id: TransferId::generate(),
            from_account_id: AccountId::generate(),
            to_account_id: AccountId::generate(),
            amount: Amount::new(dec!(5.0)).unwrap(),
        }
    }

    #[test]
    fn test_operations_belong_to_the_account_they_mutate() {
        let detail = detail();
        assert_eq!(
            Operation::TransferFrom(detail).account_id(),
            detail.from_account_id
        );
        assert_eq!(
            Operation::TransferTo(detail).account_id(),
            detail.to_account_id
        );

        let account_id = AccountId::generate();
        assert_eq!(
            Operation::CreateAccount { account_id }.account_id(),
            account_id
        );
    }

    #[test]
    fn test_credit_leg_identity_is_deterministic() {
        let transfer_id = TransferId::generate();
        assert_eq!(
            OperationId::for_transfer_credit(transfer_id),
            OperationId::for_transfer_credit(transfer_id)
        );
        assert_ne!(OperationId::generate(), OperationId::generate());
    }

    #[test]
    fn test_final_state_reason_accessors() {
        assert!(FinalState::Applied.is_applied());
        assert_eq!(FinalState::Applied.rejection_reason(), None);

        let rejected = FinalState::Rejected("no such account".into());
        assert!(!rejected.is_applied());
        assert_eq!(rejected.rejection_reason(), Some("no such account"));
    }
}
