//! Janus admission API server.

use janus_admission::AdmissionController;
use janus_api::config::ApiConfig;
use janus_api::server::{self, AppState};
use janus_recorder::{BatchLedger, DecisionRecorder, InMemoryDecisionLog, JsonlDecisionLog};
use janus_store::{ConfigCache, InMemoryAccountStore, InMemoryStateStore};
use janus_types::{AccountStore, ActiveConfig, DecisionLog, Policy, ServiceStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = ApiConfig::from_env();

    let accounts: Arc<dyn AccountStore + Send + Sync> = Arc::new(InMemoryAccountStore::new());
    if let (Some(path), Some(user)) = (&cfg.default_policy, &cfg.bootstrap_user) {
        let policy = Policy::load(path)?;
        accounts
            .activate_config(
                user,
                ActiveConfig {
                    config_id: "bootstrap".to_string(),
                    config: serde_json::to_value(&policy)?,
                },
            )
            .await?;
        accounts.set_service_status(user, ServiceStatus::Running).await?;
        tracing::info!(user = %user, path = %path.display(), "bootstrap policy activated");
    }

    let decision_log: Arc<dyn DecisionLog + Send + Sync> = match &cfg.decision_log {
        Some(path) => {
            tracing::info!(path = %path.display(), "decision log: jsonl");
            Arc::new(JsonlDecisionLog::new(path))
        }
        None => Arc::new(InMemoryDecisionLog::new()),
    };
    let ledger = Arc::new(BatchLedger::new());
    let recorder = Arc::new(DecisionRecorder::start(
        Arc::clone(&decision_log),
        Arc::clone(&ledger),
        cfg.writers,
        cfg.queue_capacity,
    ));

    let state = Arc::new(AppState {
        controller: Arc::new(AdmissionController::new(Arc::new(InMemoryStateStore::new()))),
        configs: Arc::new(ConfigCache::new(accounts)),
        recorder: recorder.clone(),
        decision_log,
        ledger,
    });

    let app = server::router(state);
    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!("Janus API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
    })
    .await?;

    recorder.shutdown().await;
    Ok(())
}
