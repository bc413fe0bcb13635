use crate::domain::account::{AccountKind, AccountStatus};
use crate::domain::money::Currency;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One output row: an account's closing balance in major units.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct BalanceRecord {
    /// The account's label, or its id when it has none.
    pub account: String,
    pub currency: Currency,
    pub kind: AccountKind,
    pub status: AccountStatus,
    pub balance: Decimal,
    pub version: u64,
}

pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header and all rows, then flushes.
    pub fn write_balances(&mut self, records: &[BalanceRecord]) -> Result<()> {
        if records.is_empty() {
            self.writer
                .write_record(["account", "currency", "kind", "status", "balance", "version"])?;
        }
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let mut out = Vec::new();
        BalanceWriter::new(&mut out)
            .write_balances(&[BalanceRecord {
                account: "alice".into(),
                currency: Currency::Usd,
                kind: AccountKind::Internal,
                status: AccountStatus::Active,
                balance: dec!(6.00),
                version: 4,
            }])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "account,currency,kind,status,balance,version\nalice,USD,internal,active,6.00,4\n"
        );
    }

    #[test]
    fn test_empty_output_still_has_header() {
        let mut out = Vec::new();
        BalanceWriter::new(&mut out).write_balances(&[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "account,currency,kind,status,balance,version\n"
        );
    }
}
