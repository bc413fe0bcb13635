use clap::Parser;
use creoledger::application::coordinator::{Collaborators, TransactionCoordinator};
use creoledger::application::reconciliation::ReconciliationWorker;
use creoledger::config::EngineConfig;
use creoledger::domain::money::Currency;
use creoledger::domain::ports::{LedgerStoreRef, TransactionStoreRef};
use creoledger::domain::transaction::TransactionState;
use creoledger::infrastructure::directory::LedgerDirectory;
use creoledger::infrastructure::gateway::InstantGateway;
use creoledger::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryTransactionStore};
use creoledger::infrastructure::notifier::TracingNotifier;
use creoledger::interfaces::csv::balance_writer::BalanceWriter;
use creoledger::interfaces::csv::batch::BatchRunner;
use creoledger::interfaces::csv::command_reader::CommandReader;
use creoledger::telemetry;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "CREOLEDGER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// How long completed idempotency keys are remembered, in seconds
    #[arg(long, env = "CREOLEDGER_RETENTION_SECS", default_value_t = 86_400)]
    retention_secs: u64,

    /// Maximum number of cached account balances
    #[arg(long, env = "CREOLEDGER_CACHE_CAPACITY", default_value_t = 10_000)]
    cache_capacity: usize,

    /// Currencies accounts may be opened in
    #[arg(
        long,
        env = "CREOLEDGER_CURRENCIES",
        value_delimiter = ',',
        default_values_t = EngineConfig::default().supported_currencies
    )]
    currencies: Vec<Currency>,
}

impl Cli {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            idempotency_retention: Duration::from_secs(self.retention_secs),
            balance_cache_capacity: self.cache_capacity,
            supported_currencies: self.currencies.clone(),
            ..EngineConfig::default()
        }
    }
}

fn in_memory(config: &EngineConfig) -> (LedgerStoreRef, TransactionStoreRef) {
    let ledger: LedgerStoreRef = Arc::new(InMemoryLedgerStore::with_currencies(
        config.supported_currencies.clone(),
    ));
    let transactions: TransactionStoreRef = Arc::new(InMemoryTransactionStore::new());
    (ledger, transactions)
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(
    db_path: Option<PathBuf>,
    config: &EngineConfig,
) -> Result<(LedgerStoreRef, TransactionStoreRef)> {
    use creoledger::infrastructure::rocksdb::RocksDBStore;

    let Some(path) = db_path else {
        return Ok(in_memory(config));
    };
    let store = Arc::new(
        RocksDBStore::open(&path, config.supported_currencies.clone()).into_diagnostic()?,
    );
    info!(path = %path.display(), "using RocksDB storage");
    let ledger: LedgerStoreRef = store.clone();
    let transactions: TransactionStoreRef = store;
    Ok((ledger, transactions))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(
    db_path: Option<PathBuf>,
    config: &EngineConfig,
) -> Result<(LedgerStoreRef, TransactionStoreRef)> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();
    let config = cli.config();

    let (ledger, transactions) = open_stores(cli.db_path.clone(), &config)?;
    let collaborators = Collaborators {
        gateway: Arc::new(InstantGateway),
        directory: Arc::new(LedgerDirectory::new(ledger.clone())),
        notifier: Arc::new(TracingNotifier),
    };
    let coordinator = Arc::new(TransactionCoordinator::new(
        ledger,
        transactions,
        collaborators,
        config,
    ));
    coordinator.recover().await.into_diagnostic()?;

    // Process commands
    let mut runner = BatchRunner::new(coordinator.clone()).await.into_diagnostic()?;
    let file = File::open(&cli.input).into_diagnostic()?;
    for command in CommandReader::new(file).commands() {
        match command {
            Ok(command) => match runner.apply(command).await {
                Ok(Some(result)) if result.status != TransactionState::Committed => {
                    info!(
                        txn = %result.transaction_id,
                        status = %result.status,
                        reason = ?result.reason,
                        "payment not committed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error processing command: {e}"),
            },
            Err(e) => error!("Error reading command: {e}"),
        }
    }

    // Nothing is in flight any more, so everything left over is stale
    ReconciliationWorker::new(coordinator.clone())
        .with_staleness(Duration::ZERO)
        .run_once()
        .await
        .into_diagnostic()?;

    let balances = runner.balances().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_balances(&balances).into_diagnostic()?;

    Ok(())
}
