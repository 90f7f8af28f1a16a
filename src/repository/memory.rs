//! In-memory repository used by tests and as the no-database fallback.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Saga, SagaExecution, SagaStep, StepExecution, StepExecutionStatus};

use super::{
    NewSaga, NewSagaExecution, NewSagaStep, NewStepExecution, RepositoryError, SagaRepository,
};

#[derive(Default)]
struct Tables {
    sagas: HashMap<Uuid, Saga>,
    saga_steps: Vec<SagaStep>,
    executions: HashMap<Uuid, SagaExecution>,
    step_executions: Vec<StepExecution>,
}

/// Repository backed by process memory. Ids and timestamps are assigned the
/// same way the Postgres implementation assigns them; step lists come back
/// ordered by index ascending.
#[derive(Default)]
pub struct InMemorySagaRepository {
    tables: RwLock<Tables>,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn get_saga(&self, saga_id: Uuid) -> Result<Saga, RepositoryError> {
        let tables = self.tables.read().await;
        tables
            .sagas
            .get(&saga_id)
            .cloned()
            .ok_or(RepositoryError::NotFound {
                entity: "saga",
                id: saga_id,
            })
    }

    async fn create_saga(&self, saga: NewSaga) -> Result<Saga, RepositoryError> {
        let saved = Saga {
            saga_id: Uuid::new_v4(),
            name: saga.name,
            formatted_name: saga.formatted_name,
            payload_schema: saga.payload_schema,
            created_at: Utc::now(),
        };

        let mut tables = self.tables.write().await;
        tables.sagas.insert(saved.saga_id, saved.clone());
        Ok(saved)
    }

    async fn get_saga_steps_by_saga_id(
        &self,
        saga_id: Uuid,
    ) -> Result<Vec<SagaStep>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut steps: Vec<SagaStep> = tables
            .saga_steps
            .iter()
            .filter(|step| step.saga_id == saga_id)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.index);
        Ok(steps)
    }

    async fn create_saga_steps(
        &self,
        steps: Vec<NewSagaStep>,
    ) -> Result<Vec<SagaStep>, RepositoryError> {
        let saved: Vec<SagaStep> = steps
            .into_iter()
            .map(|step| SagaStep {
                step_id: Uuid::new_v4(),
                saga_id: step.saga_id,
                index: step.index,
                name: step.name,
            })
            .collect();

        let mut tables = self.tables.write().await;
        tables.saga_steps.extend(saved.iter().cloned());
        Ok(saved)
    }

    async fn get_saga_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<SagaExecution, RepositoryError> {
        let tables = self.tables.read().await;
        tables
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or(RepositoryError::NotFound {
                entity: "saga execution",
                id: execution_id,
            })
    }

    async fn create_saga_execution(
        &self,
        execution: NewSagaExecution,
    ) -> Result<SagaExecution, RepositoryError> {
        let saved = SagaExecution {
            saga_execution_id: Uuid::new_v4(),
            saga_id: execution.saga_id,
            payload: execution.payload,
            created_at: Utc::now(),
        };

        let mut tables = self.tables.write().await;
        tables.executions.insert(saved.saga_execution_id, saved.clone());
        Ok(saved)
    }

    async fn get_saga_steps_execution_by_execution_id(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut steps: Vec<StepExecution> = tables
            .step_executions
            .iter()
            .filter(|step| step.saga_execution_id == execution_id)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.index);
        Ok(steps)
    }

    async fn create_saga_steps_execution(
        &self,
        steps: Vec<NewStepExecution>,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let saved: Vec<StepExecution> = steps
            .into_iter()
            .map(|step| StepExecution {
                step_execution_id: Uuid::new_v4(),
                saga_execution_id: step.saga_execution_id,
                index: step.index,
                name: step.name,
                status: step.status,
            })
            .collect();

        let mut tables = self.tables.write().await;
        tables.step_executions.extend(saved.iter().cloned());
        Ok(saved)
    }

    async fn set_saga_step_execution_status(
        &self,
        status: StepExecutionStatus,
        index: i32,
        execution_id: Uuid,
        expected: StepExecutionStatus,
    ) -> Result<bool, RepositoryError> {
        // The write lock makes the compare and the write one atomic step.
        let mut tables = self.tables.write().await;
        let step = tables
            .step_executions
            .iter_mut()
            .find(|step| step.saga_execution_id == execution_id && step.index == index)
            .ok_or(RepositoryError::NotFound {
                entity: "step execution",
                id: execution_id,
            })?;

        if step.status != expected {
            return Ok(false);
        }

        step.status = status;
        Ok(true)
    }
}
