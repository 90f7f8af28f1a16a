//! Wire contract shared with worker services.
//!
//! Workers subscribe to per-step topics named `{saga}-{step}` and publish
//! results to the fixed [`RESULT_TOPIC`].

pub mod consumer;
pub mod dispatch;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use consumer::run_result_consumer;
pub use dispatch::{KafkaStepDispatcher, StepDispatcher};

/// Topic every worker publishes step results to.
pub const RESULT_TOPIC: &str = "sukuna-out";

/// Topic a step's work items are published to.
pub fn step_topic(saga_formatted_name: &str, step_name: &str) -> String {
    format!("{saga_formatted_name}-{step_name}")
}

/// Work item published to a worker.
///
/// The `saga_id` field carries the *execution* id; the historical wire name
/// is kept for compatibility with deployed workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepToExecute {
    pub saga_name: String,
    pub step_index: i32,
    #[serde(rename = "saga_id")]
    pub execution_id: Uuid,
    pub payload: serde_json::Value,
    pub is_compensation: bool,
}

/// Outcome a worker reports for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Error,
    Compensated,

    /// Anything else on the wire; ignored by the orchestrator
    #[serde(other)]
    Unknown,
}

/// Result message consumed from [`RESULT_TOPIC`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub saga_name: String,
    pub step_index: i32,
    pub execution_id: Uuid,
    pub result: StepOutcome,
}

/// Errors raised while publishing a work item.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("error configuring the bus client: {0}")]
    Configuration(String),

    #[error("error serializing the step: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("error publishing to {topic}: {reason}")]
    Transport { topic: String, reason: String },
}
