//! Domain model for saga definitions and their executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A reusable saga definition: a named, ordered, linear transaction.
///
/// Immutable after creation. `payload_schema` is the JSON Schema every
/// execution payload must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    pub saga_id: Uuid,
    pub name: String,
    pub formatted_name: String,
    pub payload_schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One ordered step of a saga definition. `index` is 1-based and contiguous
/// within the parent saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: Uuid,
    pub saga_id: Uuid,
    pub index: i32,
    pub name: String,
}

/// One invocation of a saga, carrying the payload workers will act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution {
    pub saga_execution_id: Uuid,
    pub saga_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Runtime record of one step within one execution. Status is the only
/// mutable field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_execution_id: Uuid,
    pub saga_execution_id: Uuid,
    pub index: i32,
    pub name: String,
    pub status: StepExecutionStatus,
}

/// Lifecycle status of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    /// Created alongside the execution, not yet dispatched
    Registered,

    /// Dispatched to its worker, awaiting a result
    Started,

    /// Worker reported success
    Finished,

    /// Compensation has been dispatched, awaiting acknowledgement
    InCompensation,

    /// Worker acknowledged compensation
    Compensated,

    /// Worker reported failure
    Error,
}

impl StepExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepExecutionStatus::Registered => "registered",
            StepExecutionStatus::Started => "started",
            StepExecutionStatus::Finished => "finished",
            StepExecutionStatus::InCompensation => "in_compensation",
            StepExecutionStatus::Compensated => "compensated",
            StepExecutionStatus::Error => "error",
        }
    }

    /// Check whether moving to `next` is a legal transition.
    ///
    /// Forward activation, success/failure reporting, reverse traversal into
    /// compensation, and compensation acknowledgement are legal; everything
    /// else (including self-transitions) is not.
    pub fn can_transition_to(&self, next: StepExecutionStatus) -> bool {
        use StepExecutionStatus::*;

        matches!(
            (self, next),
            (Registered, Started)
                | (Registered, InCompensation)
                | (Started, Finished)
                | (Started, Error)
                | (Finished, InCompensation)
                | (InCompensation, Compensated)
        )
    }
}

impl std::fmt::Display for StepExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced when a stored status string is not a known status.
#[derive(Debug, thiserror::Error)]
#[error("unknown step execution status: {0:?}")]
pub struct UnknownStatusError(pub String);

impl FromStr for StepExecutionStatus {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(StepExecutionStatus::Registered),
            "started" => Ok(StepExecutionStatus::Started),
            "finished" => Ok(StepExecutionStatus::Finished),
            "in_compensation" => Ok(StepExecutionStatus::InCompensation),
            "compensated" => Ok(StepExecutionStatus::Compensated),
            "error" => Ok(StepExecutionStatus::Error),
            other => Err(UnknownStatusError(other.to_string())),
        }
    }
}

/// Check whether an execution's step set is terminal: either its
/// highest-index step finished, or no step is awaiting a worker
/// (`started` or `in_compensation`).
pub fn execution_is_terminal(steps: &[StepExecution]) -> bool {
    use StepExecutionStatus::*;

    if steps.is_empty() {
        return true;
    }

    let succeeded = steps
        .iter()
        .max_by_key(|step| step.index)
        .map(|last| last.status == Finished)
        .unwrap_or(false);
    let cursor_active = steps
        .iter()
        .any(|step| matches!(step.status, Started | InCompensation));

    succeeded || !cursor_active
}
