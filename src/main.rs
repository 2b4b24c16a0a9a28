//! Keiba Engine - race prediction API server.
//!
//! Serves the REST surface, owns the live model artifacts, and runs the
//! weekly retrain scheduler when enabled.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keiba_engine::api::{router, AppState};
use keiba_engine::db::pool::init_pool;
use keiba_engine::middleware::{throttle, RateLimiter};
use keiba_engine::models::DbMode;
use keiba_engine::predict::PredictionService;
use keiba_engine::train::retrain::weekly_retrain_loop;
use keiba_engine::{Config, ModelManager, Surface};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keiba_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        "Starting keiba-engine: port={}, db_mode={:?}, model_dir={}",
        config.port,
        config.db_mode,
        config.model_dir.display()
    );

    let pool = match config.db_mode {
        DbMode::Mock => {
            warn!("DB_MODE=mock: predictions are deterministic mocks, store routes disabled");
            None
        }
        DbMode::Local => Some(
            init_pool(&config)
                .await
                .context("database pool initialization failed")?,
        ),
    };

    let models = Arc::new(ModelManager::new(config.model_dir.clone()));
    if config.db_mode == DbMode::Local {
        // Serving without an artifact is a misconfiguration, not a warning
        models
            .load(Surface::Mixed)
            .context("active model artifact missing or unreadable")?;
    }

    let predictions = Arc::new(PredictionService::new(
        pool.clone(),
        config.clone(),
        Arc::clone(&models),
    ));

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        models: Arc::clone(&models),
        predictions,
    };

    // Weekly retrain runs in its own task and never shares a writable model
    // reference with the inference path.
    if config.retrain_enabled {
        match &pool {
            Some(pool) => {
                info!("Weekly retrain scheduler enabled");
                tokio::spawn(weekly_retrain_loop(pool.clone(), Arc::clone(&models)));
            }
            None => warn!("RETRAIN_ENABLED set but mock mode has no store; scheduler disabled"),
        }
    }

    let rate_limiter = Arc::new(RateLimiter::per_minute(120));
    {
        let limiter = Arc::clone(&rate_limiter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.evict_idle();
            }
        });
    }

    let app = router(state)
        .layer(axum::middleware::from_fn_with_state(rate_limiter, throttle))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
