use chrono::Utc;
use clap::Parser;
use marketplace_ledger::application::context::EngineContext;
use marketplace_ledger::application::engine::MarketplaceEngine;
use marketplace_ledger::config::{
    DEFAULT_FINE_GRACE_MINUTES, DEFAULT_GATEWAY_TIMEOUT_SECS, DEFAULT_ORDER_TTL_MINUTES,
    PolicyConfig,
};
use marketplace_ledger::domain::ports::{
    AccountStoreRef, BookingStoreRef, CatalogStoreRef, CustomerStoreRef, ScheduleStoreRef,
};
use marketplace_ledger::infrastructure::clock::ManualClock;
use marketplace_ledger::infrastructure::in_memory::{
    InMemoryAccountStore, InMemoryBookingStore, InMemoryCatalogStore, InMemoryCustomerStore,
    InMemoryOrderCache, InMemoryScheduleStore,
};
use marketplace_ledger::infrastructure::log_sink::{LogAuditLog, LogNotifier};
#[cfg(feature = "storage-rocksdb")]
use marketplace_ledger::infrastructure::rocksdb::RocksDBStore;
use marketplace_ledger::infrastructure::sandbox::SandboxGateway;
use marketplace_ledger::interfaces::csv::ledger_writer::LedgerWriter;
use marketplace_ledger::interfaces::scenario::{ScenarioReader, ScenarioRunner};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Replays a marketplace scenario against a sandbox gateway and prints the
/// resulting bookings and technician accounts as CSV.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario file, one JSON step per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Key for verify-payment signatures
    #[arg(
        long,
        env = "MARKETPLACE_PAYMENT_SECRET",
        default_value = "sandbox_payment_secret",
        hide_env_values = true
    )]
    payment_secret: String,

    /// Key for webhook body signatures
    #[arg(
        long,
        env = "MARKETPLACE_WEBHOOK_SECRET",
        default_value = "sandbox_webhook_secret",
        hide_env_values = true
    )]
    webhook_secret: String,

    /// Minutes after booking creation from which a paid cancellation is fined
    #[arg(long, default_value_t = DEFAULT_FINE_GRACE_MINUTES)]
    grace_minutes: i64,

    /// Lifetime of a cached onboarding order
    #[arg(long, default_value_t = DEFAULT_ORDER_TTL_MINUTES)]
    order_ttl_minutes: u64,

    /// Upper bound on any single gateway call
    #[arg(long, default_value_t = DEFAULT_GATEWAY_TIMEOUT_SECS)]
    gateway_timeout_secs: u64,
}

struct Ledger {
    bookings: BookingStoreRef,
    schedules: ScheduleStoreRef,
    accounts: AccountStoreRef,
    customers: CustomerStoreRef,
    catalog: CatalogStoreRef,
}

impl Ledger {
    fn in_memory() -> Self {
        Self {
            bookings: Arc::new(InMemoryBookingStore::new()),
            schedules: Arc::new(InMemoryScheduleStore::new()),
            accounts: Arc::new(InMemoryAccountStore::new()),
            customers: Arc::new(InMemoryCustomerStore::new()),
            catalog: Arc::new(InMemoryCatalogStore::new()),
        }
    }

    #[cfg(feature = "storage-rocksdb")]
    fn persistent(path: PathBuf) -> Result<Self> {
        let store = RocksDBStore::open(path).into_diagnostic()?;
        Ok(Self {
            bookings: Arc::new(store.clone()),
            schedules: Arc::new(store.clone()),
            accounts: Arc::new(store.clone()),
            customers: Arc::new(store.clone()),
            catalog: Arc::new(store),
        })
    }
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<Ledger> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ledger::persistent(path),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Ledger::in_memory())
        }
        None => Ok(Ledger::in_memory()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();

    let cli = Cli::parse();

    let policy = PolicyConfig::new(cli.payment_secret, cli.webhook_secret)
        .with_fine_grace_minutes(cli.grace_minutes)
        .with_order_ttl_minutes(cli.order_ttl_minutes)
        .with_gateway_timeout(Duration::from_secs(cli.gateway_timeout_secs));

    let ledger = open_ledger(cli.db_path)?;
    let clock = ManualClock::new(Utc::now());
    let ctx = EngineContext {
        bookings: ledger.bookings,
        schedules: ledger.schedules,
        accounts: ledger.accounts,
        customers: ledger.customers,
        catalog: ledger.catalog,
        gateway: Arc::new(
            SandboxGateway::new(Arc::new(clock.clone()))
                .with_namespace(Utc::now().timestamp_millis().to_string()),
        ),
        cache: Arc::new(InMemoryOrderCache::new()),
        notifier: Arc::new(LogNotifier),
        audit: Arc::new(LogAuditLog),
        clock: Arc::new(clock.clone()),
        policy,
    };
    let mut runner = ScenarioRunner::new(MarketplaceEngine::new(ctx), clock);

    let file = File::open(&cli.input).into_diagnostic()?;
    for (line, step) in ScenarioReader::new(BufReader::new(file)).steps() {
        match step {
            Ok(step) => {
                if let Err(e) = runner.apply(step).await {
                    eprintln!("Error applying step on line {line}: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading step on line {line}: {e}");
            }
        }
    }

    let (bookings, accounts) = runner.engine().snapshot().await.into_diagnostic()?;
    info!(bookings = bookings.len(), accounts = accounts.len(), "Scenario finished");

    let stdout = io::stdout();
    let mut writer = LedgerWriter::new(stdout.lock());
    writer.write_ledger(&bookings, &accounts).into_diagnostic()?;

    Ok(())
}
