//! Publication of step work items to their per-step topics.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::debug;

use crate::config::KafkaConfig;
use crate::models::{SagaExecution, StepExecution};

use super::{step_topic, DispatchError, StepToExecute};

/// Publishes one step's work item to its topic with at-least-once semantics.
///
/// Returning `Ok` means the bus accepted the message; transport failures
/// surface unchanged to the caller.
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    async fn send_step_to_execute(
        &self,
        saga_formatted_name: &str,
        execution: &SagaExecution,
        step: &StepExecution,
        is_compensation: bool,
    ) -> Result<(), DispatchError>;
}

/// Kafka-backed dispatcher. Messages are keyed by execution id so every
/// message of one execution lands on the same partition.
pub struct KafkaStepDispatcher {
    producer: FutureProducer,
}

impl KafkaStepDispatcher {
    pub fn new(config: &KafkaConfig) -> Result<Self, DispatchError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| DispatchError::Configuration(e.to_string()))?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl StepDispatcher for KafkaStepDispatcher {
    async fn send_step_to_execute(
        &self,
        saga_formatted_name: &str,
        execution: &SagaExecution,
        step: &StepExecution,
        is_compensation: bool,
    ) -> Result<(), DispatchError> {
        let message = StepToExecute {
            saga_name: saga_formatted_name.to_string(),
            step_index: step.index,
            execution_id: execution.saga_execution_id,
            payload: execution.payload.clone(),
            is_compensation,
        };

        let topic = step_topic(saga_formatted_name, &step.name);
        let key = execution.saga_execution_id.to_string();
        let payload = serde_json::to_string(&message)?;

        let record = FutureRecord::to(&topic).key(&key).payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => {
                debug!(
                    execution_id = %execution.saga_execution_id,
                    step_index = step.index,
                    is_compensation,
                    "step published to {}:{} at offset {}",
                    topic,
                    partition,
                    offset
                );
                Ok(())
            }
            Err((error, _)) => Err(DispatchError::Transport {
                topic,
                reason: error.to_string(),
            }),
        }
    }
}
