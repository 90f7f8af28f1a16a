//! Long-lived consumer of the step-result topic.

use anyhow::{Context, Result};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::services::SagaOrchestrator;

use super::{StepResult, RESULT_TOPIC};

/// Consume worker results and feed them to the orchestrator.
///
/// The offset is committed only after the orchestrator handled the message,
/// so a storage or bus failure leaves it uncommitted for redelivery.
/// Messages that fail to deserialize are logged and committed (dropped after
/// one delivery attempt).
pub async fn run_result_consumer(
    config: &KafkaConfig,
    orchestrator: Arc<SagaOrchestrator>,
) -> Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("client.id", &config.client_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .context("failed to create the result consumer")?;

    consumer
        .subscribe(&[RESULT_TOPIC])
        .context("failed to subscribe to the result topic")?;

    info!("consuming step results from {RESULT_TOPIC}");

    loop {
        let message = match consumer.recv().await {
            Ok(message) => message,
            Err(e) => {
                warn!("failed to read from the result topic: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        let Some(payload) = message.payload() else {
            commit(&consumer, &message);
            continue;
        };

        let result: StepResult = match serde_json::from_slice(payload) {
            Ok(result) => result,
            Err(e) => {
                error!("error deserializing step result: {e}");
                commit(&consumer, &message);
                continue;
            }
        };

        info!(
            execution_id = %result.execution_id,
            step_index = result.step_index,
            "result received: {:?}",
            result.result
        );

        match orchestrator.handle_step_result(result).await {
            Ok(()) => commit(&consumer, &message),
            Err(e) => error!("error handling the step result: {e}"),
        }
    }
}

fn commit(consumer: &StreamConsumer, message: &rdkafka::message::BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
        warn!("error committing result offset: {e}");
    }
}
