//! Backtest CLI: evaluate the active artifact (or compare a candidate
//! against it) on one held-out year and print the composite breakdown.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keiba_engine::db::odds_queries::win_odds_for_year;
use keiba_engine::db::payout_queries::payouts_for_year;
use keiba_engine::db::pool::init_pool;
use keiba_engine::features::FeatureExtractor;
use keiba_engine::model::artifact;
use keiba_engine::models::DbMode;
use keiba_engine::train::evaluator::{compare_models, composite_score, evaluate_model};
use keiba_engine::{Config, ModelManager, Surface};

#[derive(Parser, Debug)]
#[command(name = "keiba-backtest", about = "Evaluate model artifacts on a held-out year")]
struct Args {
    /// Year to backtest
    #[arg(long)]
    test_year: Option<i32>,

    /// Surface filter: mixed, turf or dirt
    #[arg(long, default_value = "mixed")]
    surface: String,

    /// Candidate artifact to compare against the active one
    #[arg(long)]
    candidate: Option<PathBuf>,
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
    let test_year = args.test_year.unwrap_or_else(|| Utc::now().year() - 2);

    let config = Config::from_env()?;
    if config.db_mode == DbMode::Mock {
        bail!("backtesting requires a real store; unset DB_MODE=mock");
    }
    let pool = init_pool(&config).await?;
    let manager = ModelManager::new(config.model_dir.clone());
    let active_path = manager.resolve_path(surface);

    match args.candidate {
        Some(candidate) => {
            let comparison =
                compare_models(&pool, &active_path, &candidate, test_year, surface).await?;
            info!("=== Comparison (year {}) ===", test_year);
            info!("  active:    {:.4}", comparison.old_score);
            info!("  candidate: {:.4}", comparison.new_score);
            info!(
                "  verdict:   {}",
                if comparison.promote {
                    "candidate wins"
                } else {
                    "active wins"
                }
            );
        }
        None => {
            let model = artifact::load(&active_path)
                .with_context(|| format!("no artifact at {}", active_path.display()))?;
            let extractor = FeatureExtractor::new(&pool);
            let rows = extractor.extract_year(test_year, surface, 10000).await?;
            if rows.is_empty() {
                bail!("no finalized data for year {}", test_year);
            }
            let payouts = payouts_for_year(&pool, test_year).await?;
            let odds = win_odds_for_year(&pool, test_year).await?;
            let eval = evaluate_model(&model, &rows, &payouts, &odds, "active model");
            info!("Composite score: {:.4}", composite_score(&eval));
        }
    }

    Ok(())
}
