//! Orchestration service binary: HTTP admission layer plus the step-result
//! consumer, sharing one orchestrator.

use std::sync::Arc;

use orchestration_service::config::OrchestratorConfig;
use orchestration_service::messaging::{run_result_consumer, KafkaStepDispatcher};
use orchestration_service::repository::{InMemorySagaRepository, PgSagaRepository, SagaRepository};
use orchestration_service::services::SagaOrchestrator;
use orchestration_service::{handlers, AppState};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting saga orchestration service...");

    let config = OrchestratorConfig::from_env();

    let repository: Arc<dyn SagaRepository> =
        match PgSagaRepository::connect(&config.database).await {
            Ok(repository) => Arc::new(repository),
            Err(e) => {
                error!("Failed to initialize Postgres repository: {e}");
                info!("Falling back to in-memory repository...");
                Arc::new(InMemorySagaRepository::new())
            }
        };

    let dispatcher = Arc::new(KafkaStepDispatcher::new(&config.kafka)?);
    let orchestrator = Arc::new(SagaOrchestrator::new(repository, dispatcher));

    let consumer_config = config.kafka.clone();
    let consumer_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_result_consumer(&consumer_config, consumer_orchestrator).await {
            error!("result consumer terminated: {e}");
        }
    });

    let app = handlers::api_router(AppState { orchestrator });
    let addr = format!("0.0.0.0:{}", config.port);
    info!("Orchestration service listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
