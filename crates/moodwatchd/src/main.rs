use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod alert;
mod config;
mod engine;
mod error;
mod notifier;
mod pipeline;
mod routes;
mod store;

use config::Config;
use notifier::{LogNotifier, Notifier, SmtpNotifier};
use pipeline::Pipeline;
use routes::AppState;
use store::EmotionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the process environment still applies.
    let dotenv = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "loaded environment file");
    }

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind,
        model_dir = %config.model_dir.display(),
        layout = ?config.classifier_layout,
        "moodwatchd starting"
    );

    let engine = engine::load_engine(&config).context("failed to load emotion models")?;

    let notifier: Arc<dyn Notifier> = if config.mail.is_enabled() {
        Arc::new(SmtpNotifier::new(&config.mail).context("invalid mail configuration")?)
    } else {
        tracing::warn!("MAIL_USERNAME/PARENT_EMAIL not set; alerts will only be logged");
        Arc::new(LogNotifier)
    };

    let store = Arc::new(EmotionStore::new(config.log_capacity));
    let pipeline = Arc::new(Pipeline::new(engine, store, notifier));

    let state = AppState {
        pipeline,
        recent_window: config.recent_window,
    };

    let app = routes::create_router(state, config.max_frame_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "moodwatchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("moodwatchd shutting down");
        })
        .await?;

    Ok(())
}
