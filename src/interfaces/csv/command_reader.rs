use crate::domain::money::Currency;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    /// Opens an internal account.
    Open,
    /// Opens an external (settlement) account.
    External,
    Pay,
    Freeze,
    Unfreeze,
    Close,
}

/// One row of a batch file: `type,account,counterparty,amount,currency,key`.
///
/// Accounts are addressed by label. `amount` is in major units.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct CommandRecord {
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub account: String,
    pub counterparty: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub key: Option<String>,
}

/// Reads batch commands from a CSV source.
///
/// Whitespace around fields is trimmed and short rows are accepted; a row
/// that does not deserialize is yielded as an error and reading continues.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands, so large batches stream.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
