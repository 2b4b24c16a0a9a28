//! Offline training CLI.
//!
//! Trains a (optionally surface-specific) ensemble, compares it against the
//! active artifact on a held-out year, and deploys on request.
//!
//! Usage:
//!     keiba-train --surface turf
//!     keiba-train --surface dirt --years 4 --deploy
//!     keiba-train --test-year 2023

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keiba_engine::db::pool::init_pool;
use keiba_engine::models::DbMode;
use keiba_engine::train::retrain::run_retrain;
use keiba_engine::{Config, ModelManager, Surface};

#[derive(Parser, Debug)]
#[command(name = "keiba-train", about = "Train and evaluate an ensemble model")]
struct Args {
    /// Surface to train for: mixed, turf or dirt
    #[arg(long, default_value = "mixed")]
    surface: String,

    /// Number of years of training data
    #[arg(long, default_value_t = 3)]
    years: u32,

    /// Backtest year, excluded from training (default: two years back)
    #[arg(long)]
    test_year: Option<i32>,

    /// Promote the new artifact if it wins the comparison
    #[arg(long, default_value_t = false)]
    deploy: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keiba_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let surface = Surface::parse(&args.surface)
        .with_context(|| format!("unknown surface: {}", args.surface))?;
    let test_year = args
        .test_year
        .unwrap_or_else(|| Utc::now().year() - 2);

    let config = Config::from_env()?;
    if config.db_mode == DbMode::Mock {
        bail!("training requires a real store; unset DB_MODE=mock");
    }
    let pool = init_pool(&config).await?;
    let manager = Arc::new(ModelManager::new(config.model_dir.clone()));

    info!(
        "=== Training: surface={}, years={}, test_year={} ===",
        surface.as_str(),
        args.years,
        test_year
    );

    let report = run_retrain(
        &pool,
        &manager,
        args.years,
        surface,
        Some(test_year),
        args.deploy,
    )
    .await?;

    info!("=== Result ===");
    info!("  samples:   {}", report.samples);
    info!("  old score: {:.4}", report.old_score);
    info!("  new score: {:.4}", report.new_score);
    info!(
        "  outcome:   {}",
        if report.promoted {
            "deployed"
        } else if args.deploy {
            "kept current model"
        } else {
            "staged only (use --deploy to promote)"
        }
    );

    Ok(())
}
