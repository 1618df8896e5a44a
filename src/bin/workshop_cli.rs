//! Operational CLI: run migrations, check cached stock against the ledger.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use workshop_api::{
    config::load_config,
    db::{establish_connection_from_app_config, run_migrations},
    logging::init_tracing,
    services::stock::StockAggregator,
};

#[derive(Parser)]
#[command(name = "workshop-cli", about = "Workshop API operations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Compare cached stock figures with the replayed ledger
    DriftCheck {
        /// Check a single material instead of all of them
        #[arg(long)]
        material: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config().context("loading configuration")?;
    init_tracing(&config.log_level, config.log_json);

    let db = Arc::new(
        establish_connection_from_app_config(&config)
            .await
            .context("connecting to database")?,
    );

    match cli.command {
        Commands::Migrate => {
            run_migrations(&db).await.context("running migrations")?;
            println!("Migrations applied");
        }
        Commands::DriftCheck { material } => {
            let stock = StockAggregator::new(db.clone(), None);

            let reports = match material {
                Some(material_id) => vec![stock.check_material(material_id).await?],
                None => stock.check_all().await?,
            };

            let mut drifted = 0u64;
            for report in &reports {
                if !report.is_consistent() {
                    drifted += 1;
                    warn!(
                        material_id = %report.material_id,
                        cached = %report.cached,
                        computed = %report.computed,
                        "Drift detected"
                    );
                    println!(
                        "DRIFT material={} cached={} replayed={} ({} movements)",
                        report.material_id, report.cached, report.computed, report.movement_count
                    );
                }
            }

            println!("{} materials checked, {} drifted", reports.len(), drifted);
            if drifted > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
