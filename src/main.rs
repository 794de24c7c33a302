use clap::{Parser, Subcommand};
use ledger_sync::application::cancel::{CancelToken, cancel_pair};
use ledger_sync::application::scheduler::SweepScheduler;
use ledger_sync::application::{Collaborators, Services};
use ledger_sync::config::ServiceConfig;
use ledger_sync::domain::accrual::Period;
use ledger_sync::domain::identity::{Credential, Identity};
use ledger_sync::domain::ports::{AccrualStoreRef, TransactionStoreRef};
use ledger_sync::infrastructure::cache::InMemoryCache;
use ledger_sync::infrastructure::in_memory::{
    FixedAverageBalance, InMemoryAccrualStore, InMemoryLedger, InMemoryTransactionStore,
    StaticRateTable, StaticTokenVerifier,
};
use ledger_sync::interfaces::csv::request_reader::RequestReader;
use ledger_sync::interfaces::csv::result_writer::ResultWriter;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a CSV file of transaction requests as one batch.
    Process {
        /// Input requests CSV file
        input: PathBuf,
    },
    /// Calculate and apply one month of interest.
    ApplyInterest {
        #[arg(long)]
        user: String,
        #[arg(long)]
        account: String,
        /// Period as YYYY-MM
        #[arg(long)]
        period: String,
        #[arg(long)]
        token: String,
    },
    /// Retry settlement of every PENDING accrual.
    Sweep {
        #[arg(long)]
        token: String,
        /// Keep sweeping every SECS seconds until interrupted.
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path).into_diagnostic()?,
        None => ServiceConfig::default(),
    };
    config.logging.init();

    let (transactions, accruals) = open_stores(cli.db_path)?;
    let collaborators = sandbox_collaborators(&config, transactions, accruals).await?;
    let services = Services::build(collaborators, &config);

    let stdout = io::stdout();
    let mut writer = ResultWriter::new(stdout.lock());

    match cli.command {
        Command::Process { input } => {
            let file = File::open(input).into_diagnostic()?;
            let mut requests = Vec::new();
            for request in RequestReader::new(file).requests() {
                match request {
                    Ok(request) => requests.push(request),
                    Err(e) => eprintln!("Error reading request: {}", e),
                }
            }

            let report = services
                .batch
                .process_batch(requests, &CancelToken::never())
                .await;
            writer.write_batch(&report).into_diagnostic()?;
            eprintln!(
                "Processed {} requests: {} succeeded, {} failed",
                report.total, report.success_count, report.failure_count
            );
        }
        Command::ApplyInterest {
            user,
            account,
            period,
            token,
        } => {
            let period: Period = period.parse().into_diagnostic()?;
            let accrual = services
                .interest
                .apply_interest(
                    &user,
                    &account,
                    period,
                    &Credential::new(token),
                    &CancelToken::never(),
                )
                .await
                .into_diagnostic()?;
            writer.write_accrual(&accrual).into_diagnostic()?;
        }
        Command::Sweep { token, every } => {
            let credential = Credential::new(token);
            match every {
                None => {
                    let report = services
                        .interest
                        .process_pending_accruals(&credential, &CancelToken::never())
                        .await
                        .into_diagnostic()?;
                    writer.write_sweep(&report).into_diagnostic()?;
                    eprintln!(
                        "Swept {} accruals: {} applied, {} failed",
                        report.total, report.success_count, report.failure_count
                    );
                }
                Some(secs) => {
                    let (canceller, cancel) = cancel_pair();
                    let handle = SweepScheduler::new(
                        services.interest.clone(),
                        credential,
                        Duration::from_secs(secs.max(1)),
                    )
                    .start(cancel);
                    tokio::signal::ctrl_c().await.into_diagnostic()?;
                    canceller.cancel();
                    let runs = handle.await.into_diagnostic()?;
                    eprintln!("Stopped after {} sweeps", runs);
                }
            }
        }
    }

    Ok(())
}

fn open_stores(db_path: Option<PathBuf>) -> Result<(TransactionStoreRef, AccrualStoreRef)> {
    match db_path {
        Some(path) => open_persistent(path),
        None => Ok(in_memory_stores()),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_persistent(path: PathBuf) -> Result<(TransactionStoreRef, AccrualStoreRef)> {
    use ledger_sync::infrastructure::rocksdb::RocksDBStore;

    let store = RocksDBStore::open(path).into_diagnostic()?;
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_persistent(_path: PathBuf) -> Result<(TransactionStoreRef, AccrualStoreRef)> {
    eprintln!(
        "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
    );
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (TransactionStoreRef, AccrualStoreRef) {
    (
        Arc::new(InMemoryTransactionStore::new()),
        Arc::new(InMemoryAccrualStore::new()),
    )
}

/// Builds the in-memory ledger, verifier and rate table from `[sandbox]`.
async fn sandbox_collaborators(
    config: &ServiceConfig,
    transactions: TransactionStoreRef,
    accruals: AccrualStoreRef,
) -> Result<Collaborators> {
    let sandbox = &config.sandbox;

    let auth = StaticTokenVerifier::new();
    for grant in &sandbox.tokens {
        let identity = Identity::from_claims(
            grant.user_id.clone(),
            grant.roles.iter().map(String::as_str),
            grant.active,
        );
        auth.grant(grant.token.clone(), identity).await;
    }

    let ledger = InMemoryLedger::new();
    for account in &sandbox.accounts {
        ledger
            .open_account(account.id.clone(), account.available, account.currency.clone())
            .await;
        ledger
            .lock_funds(&account.id, account.locked)
            .await
            .into_diagnostic()?;
    }

    Ok(Collaborators {
        transactions,
        accruals,
        rates: Arc::new(StaticRateTable::new(sandbox.rates.clone())),
        gateway: Arc::new(ledger),
        auth: Arc::new(auth),
        balances: Arc::new(FixedAverageBalance::new(sandbox.average_balance)),
        cache: Arc::new(InMemoryCache::new()),
    })
}
