use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of a request batch. `account` and `to` are symbolic names
/// local to the batch; the driver maps them to real account ids.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestRecord {
    pub op: RequestKind,
    pub account: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Create,
    Deposit,
    Withdraw,
    Transfer,
}

/// Reads ledger requests from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record
/// lengths, yielding one `Result` per row so a malformed line does not
/// stop the batch.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    /// Creates a new `RequestReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes requests.
    pub fn requests(self) -> impl Iterator<Item = Result<RequestRecord, csv::Error>> {
        self.reader.into_deserialize()
    }
}
