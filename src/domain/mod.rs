//! Domain layer: the ledger's value types and the port traits the
//! application core talks through.

pub mod account;
pub mod operation;
pub mod ports;
