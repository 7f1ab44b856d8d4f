//! `bossfightd`: runs the bossfight engine as a standalone daemon.
//!
//! Usage: `bossfightd [CONFIG]`. The config path falls back to
//! `$BOSSFIGHT_CONFIG`, then to built-in defaults. Set
//! `BOSSFIGHT_LOG_FORMAT=json` for JSON log lines.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bossfight_core::SystemClock;
use bossfight_service::events::{self, EngineEvent};
use bossfight_service::{ServiceConfig, Systems, runtime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOSSFIGHT_CONFIG").ok())
        .map(PathBuf::from);
    let config = match &config_path {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    init_tracing(&config.engine.general.log_level);

    if !config.engine.general.enabled {
        info!("Engine disabled in configuration, exiting");
        return Ok(());
    }

    let (engine, store) =
        runtime::bootstrap(&config, Arc::new(SystemClock)).context("starting engine")?;
    let (tx, mut rx) = events::channel();
    let systems = Arc::new(Systems::new(engine, store, tx, &config.service));
    let running = systems.spawn();

    // Stand-in for the host's announcer until one is attached.
    let announcer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Milestone(m) => info!(
                    scope = %m.scope,
                    bucket = m.bucket,
                    hp_current = m.hp_current,
                    hp_max = m.hp_max,
                    "Milestone reached"
                ),
                EngineEvent::IdleWarning(w) => info!(
                    scope = %w.scope,
                    user = %w.user,
                    "Voice presence idle"
                ),
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown requested");

    match systems.shutdown(running).await {
        Ok(outcome) => info!(?outcome, "Systems stopped"),
        Err(e) => warn!(error = %e, "Final flush failed, unflushed activity is lost"),
    }
    info!(
        counters = %systems.engine().counters.snapshot().to_prometheus(),
        "Final counters"
    );
    drop(systems);
    announcer.abort();
    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("BOSSFIGHT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}
