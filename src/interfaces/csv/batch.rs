use crate::application::coordinator::TransactionCoordinator;
use crate::domain::account::{Account, AccountId, AccountStatus};
use crate::domain::money::{Amount, Currency, to_major};
use crate::domain::transaction::{IdempotencyKey, PaymentRequest, TransactionResult};
use crate::error::{PaymentError, Result};
use crate::interfaces::csv::balance_writer::BalanceRecord;
use crate::interfaces::csv::command_reader::{CommandRecord, CommandType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Applies batch commands to a coordinator, addressing accounts by label.
pub struct BatchRunner {
    coordinator: Arc<TransactionCoordinator>,
    labels: HashMap<String, AccountId>,
}

impl BatchRunner {
    /// Picks up the labels of accounts that already exist, so a persistent
    /// ledger can be extended across runs.
    pub async fn new(coordinator: Arc<TransactionCoordinator>) -> Result<Self> {
        let labels = coordinator
            .ledger()
            .all_accounts()
            .await?
            .into_iter()
            .filter_map(|account| account.label.map(|label| (label, account.id)))
            .collect();
        Ok(Self {
            coordinator,
            labels,
        })
    }

    fn resolve(&self, label: &str) -> Result<AccountId> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| PaymentError::ValidationError(format!("Unknown account '{}'", label)))
    }

    fn required<T>(value: Option<T>, field: &str, command: &CommandRecord) -> Result<T> {
        value.ok_or_else(|| {
            PaymentError::ValidationError(format!(
                "{:?} command for '{}' is missing {}",
                command.kind, command.account, field
            ))
        })
    }

    /// Runs one command. Payments return their outcome; account commands
    /// return `None`.
    pub async fn apply(&mut self, command: CommandRecord) -> Result<Option<TransactionResult>> {
        match command.kind {
            CommandType::Open | CommandType::External => {
                let currency = Self::required(command.currency, "a currency", &command)?;
                self.open(&command, currency).await?;
                Ok(None)
            }
            CommandType::Pay => {
                let source = self.resolve(&command.account)?;
                let counterparty =
                    Self::required(command.counterparty.as_deref(), "a counterparty", &command)?;
                let destination = self.resolve(counterparty)?;
                let currency = Self::required(command.currency, "a currency", &command)?;
                let amount = Self::required(command.amount, "an amount", &command)?;
                let amount = Amount::from_major(amount, currency)?;
                let key = Self::required(command.key.clone(), "an idempotency key", &command)?;

                let result = self
                    .coordinator
                    .submit(PaymentRequest {
                        source,
                        destination,
                        amount_minor_units: amount.minor_units(),
                        currency,
                        idempotency_key: IdempotencyKey::new(key)?,
                    })
                    .await?;
                Ok(Some(result))
            }
            CommandType::Freeze => self.set_status(&command, AccountStatus::Frozen).await,
            CommandType::Unfreeze => self.set_status(&command, AccountStatus::Active).await,
            CommandType::Close => self.set_status(&command, AccountStatus::Closed).await,
        }
    }

    async fn open(&mut self, command: &CommandRecord, currency: Currency) -> Result<()> {
        if let Some(existing) = self.labels.get(&command.account) {
            let account = self
                .coordinator
                .ledger()
                .account(*existing)
                .await?
                .ok_or(PaymentError::AccountNotFound(*existing))?;
            if account.currency != currency {
                return Err(PaymentError::ValidationError(format!(
                    "Account '{}' already exists in {}",
                    command.account, account.currency
                )));
            }
            debug!(label = %command.account, "account already open");
            return Ok(());
        }

        let label = Some(command.account.clone());
        let account = match command.kind {
            CommandType::External => {
                self.coordinator
                    .open_external_account(currency, label)
                    .await?
            }
            _ => self.coordinator.open_account(currency, label).await?,
        };
        info!(label = %command.account, id = %account.id, kind = %account.kind, "account opened");
        self.labels.insert(command.account.clone(), account.id);
        Ok(())
    }

    async fn set_status(
        &self,
        command: &CommandRecord,
        status: AccountStatus,
    ) -> Result<Option<TransactionResult>> {
        let id = self.resolve(&command.account)?;
        self.coordinator.set_account_status(id, status).await?;
        Ok(None)
    }

    /// Closing balances of every account, sorted by label.
    pub async fn balances(&self) -> Result<Vec<BalanceRecord>> {
        let accounts = self.coordinator.ledger().all_accounts().await?;
        let mut records = Vec::with_capacity(accounts.len());
        for account in accounts {
            records.push(self.balance_record(account).await?);
        }
        records.sort_by(|a, b| a.account.cmp(&b.account));
        Ok(records)
    }

    async fn balance_record(&self, account: Account) -> Result<BalanceRecord> {
        let balance = self.coordinator.get_balance(account.id).await?;
        Ok(BalanceRecord {
            account: account.label.unwrap_or_else(|| account.id.to_string()),
            currency: account.currency,
            kind: account.kind,
            status: account.status,
            balance: to_major(balance.balance, account.currency),
            version: balance.version,
        })
    }
}
