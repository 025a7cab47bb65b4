use clap::Parser;
use design_market::config::MarketConfig;
use design_market::infrastructure::database;
use design_market::services::backfill::BackfillService;
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reconcile historical download counters into the purchase ledger.
#[derive(Parser)]
#[command(name = "backfill_entitlements")]
struct Args {
    /// Report what would be created without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backfill_entitlements=info,design_market=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("📜 Starting entitlement backfill (dry_run={})...", args.dry_run);

    let config = MarketConfig::from_env();

    // Missing credentials or an unreachable store is the one unrecoverable
    // failure; per-row problems later only affect the report.
    let db = match database::setup_database().await {
        Ok(db) => db,
        Err(e) => {
            error!("❌ Could not connect to the data store: {}", e);
            std::process::exit(1);
        }
    };

    let service = BackfillService::new(db, config.default_currency);

    match service.run(args.dry_run).await {
        Ok(report) => {
            info!(
                "✅ Backfill complete: {} created, {} skipped, {} failed",
                report.created, report.skipped, report.failed
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ Backfill could not enumerate candidates: {}", e);
            std::process::exit(1);
        }
    }
}
