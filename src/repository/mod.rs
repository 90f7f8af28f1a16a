//! Durable storage contract for sagas, steps, executions, and step state.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Saga, SagaExecution, SagaStep, StepExecution, StepExecutionStatus, UnknownStatusError,
};

pub use memory::InMemorySagaRepository;
pub use postgres::PgSagaRepository;

/// Errors produced by repository implementations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {id} was not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    CorruptStatus(#[from] UnknownStatusError),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// A saga definition to persist; the repository assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewSaga {
    pub name: String,
    pub formatted_name: String,
    pub payload_schema: serde_json::Value,
}

/// A definition step to persist; the repository assigns the id.
#[derive(Debug, Clone)]
pub struct NewSagaStep {
    pub saga_id: Uuid,
    pub index: i32,
    pub name: String,
}

/// An execution to persist; the repository assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewSagaExecution {
    pub saga_id: Uuid,
    pub payload: serde_json::Value,
}

/// A step execution row to persist; the repository assigns the id.
#[derive(Debug, Clone)]
pub struct NewStepExecution {
    pub saga_execution_id: Uuid,
    pub index: i32,
    pub name: String,
    pub status: StepExecutionStatus,
}

/// Transactional persistence facade over the four domain entities.
///
/// Implementations persist atomically (bulk creates are all-or-nothing) and
/// return step lists ordered by index ascending. Transition legality is the
/// orchestrator's responsibility, not the repository's.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    // Sagas

    async fn get_saga(&self, saga_id: Uuid) -> Result<Saga, RepositoryError>;
    async fn create_saga(&self, saga: NewSaga) -> Result<Saga, RepositoryError>;

    // Saga steps

    async fn get_saga_steps_by_saga_id(
        &self,
        saga_id: Uuid,
    ) -> Result<Vec<SagaStep>, RepositoryError>;
    async fn create_saga_steps(
        &self,
        steps: Vec<NewSagaStep>,
    ) -> Result<Vec<SagaStep>, RepositoryError>;

    // Saga executions

    async fn get_saga_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<SagaExecution, RepositoryError>;
    async fn create_saga_execution(
        &self,
        execution: NewSagaExecution,
    ) -> Result<SagaExecution, RepositoryError>;

    // Step executions

    async fn get_saga_steps_execution_by_execution_id(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError>;
    async fn create_saga_steps_execution(
        &self,
        steps: Vec<NewStepExecution>,
    ) -> Result<Vec<StepExecution>, RepositoryError>;

    /// Atomically set the status of the step execution identified by
    /// `(execution_id, index)`, but only while its current status is still
    /// `expected`.
    ///
    /// Returns `false` when the row exists and another writer got there
    /// first; the caller must not act on a transition it lost. Errors with
    /// not-found when no such row exists. Conflicting calls are serialized
    /// by the implementation, not by the caller's earlier read.
    async fn set_saga_step_execution_status(
        &self,
        status: StepExecutionStatus,
        index: i32,
        execution_id: Uuid,
        expected: StepExecutionStatus,
    ) -> Result<bool, RepositoryError>;
}
