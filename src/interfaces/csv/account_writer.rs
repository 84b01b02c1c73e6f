use crate::domain::account::Account;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One line of the final account report.
#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub account: String,
    pub id: String,
    pub balance: Decimal,
    pub version: u64,
}

impl AccountRow {
    pub fn new(name: impl Into<String>, record: &Account) -> Self {
        Self {
            account: name.into(),
            id: record.id.to_string(),
            // Strip trailing zeros so "100.0 - 30.0" reports as "70".
            balance: record.balance.value().normalize(),
            version: record.version.value(),
        }
    }
}

/// Writes the final account report as CSV, sorted by account name so
/// the output is stable across runs.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(target: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(target),
        }
    }

    pub fn write_accounts(&mut self, mut rows: Vec<AccountRow>) -> Result<(), csv::Error> {
        rows.sort_by(|a, b| a.account.cmp(&b.account));
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
