//! The orchestration engine: definition registration, execution start, and
//! the result-driven state machine.

use jsonschema::JSONSchema;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::messaging::{StepDispatcher, StepOutcome, StepResult};
use crate::models::{Saga, SagaExecution, StepExecution, StepExecutionStatus};
use crate::repository::{
    NewSaga, NewSagaExecution, NewSagaStep, NewStepExecution, RepositoryError, SagaRepository,
};

/// An execution together with its per-step runtime state.
#[derive(Debug, Clone)]
pub struct SagaExecutionDetails {
    pub execution: SagaExecution,
    pub steps: Vec<StepExecution>,
}

/// Lower-case a name and map every space and underscore to `-`, producing
/// the identifier-safe form used in topic names.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace([' ', '_'], "-")
}

/// Stateless coordinator over the repository and dispatch seams.
///
/// All mutable state lives in the repository; the HTTP layer and the result
/// consumer call in concurrently.
pub struct SagaOrchestrator {
    repository: Arc<dyn SagaRepository>,
    dispatcher: Arc<dyn StepDispatcher>,
}

impl SagaOrchestrator {
    pub fn new(repository: Arc<dyn SagaRepository>, dispatcher: Arc<dyn StepDispatcher>) -> Self {
        Self {
            repository,
            dispatcher,
        }
    }

    /// Register a saga definition with its ordered steps.
    ///
    /// The payload schema must compile as a JSON Schema document and the step
    /// list must be non-empty. Saga and step names are stored normalized.
    pub async fn create_saga(
        &self,
        name: String,
        payload_schema: serde_json::Value,
        step_names: Vec<String>,
    ) -> Result<Saga, OrchestrationError> {
        compile_schema(&payload_schema)?;
        if step_names.is_empty() {
            return Err(OrchestrationError::EmptySteps);
        }

        let saga = self
            .repository
            .create_saga(NewSaga {
                formatted_name: normalize_name(&name),
                name,
                payload_schema,
            })
            .await
            .map_err(|e| OrchestrationError::repository("error saving saga", e))?;

        let steps: Vec<NewSagaStep> = step_names
            .iter()
            .enumerate()
            .map(|(position, step_name)| NewSagaStep {
                saga_id: saga.saga_id,
                index: position as i32 + 1,
                name: normalize_name(step_name),
            })
            .collect();
        self.repository
            .create_saga_steps(steps)
            .await
            .map_err(|e| OrchestrationError::repository("error saving saga steps", e))?;

        Ok(saga)
    }

    pub async fn get_saga_by_id(&self, saga_id: Uuid) -> Result<Saga, OrchestrationError> {
        self.repository.get_saga(saga_id).await.map_err(|e| match e {
            RepositoryError::NotFound { .. } => OrchestrationError::SagaNotFound(saga_id),
            other => OrchestrationError::repository("error loading saga", other),
        })
    }

    /// Start a new execution of a saga: persist the execution and its step
    /// records, activate step 1, and dispatch it to its worker.
    pub async fn create_saga_execution(
        &self,
        saga_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<SagaExecution, OrchestrationError> {
        let saga = self.get_saga_by_id(saga_id).await?;
        let saga_steps = self
            .repository
            .get_saga_steps_by_saga_id(saga.saga_id)
            .await
            .map_err(|e| OrchestrationError::repository("error loading saga steps", e))?;
        if saga_steps.is_empty() {
            return Err(OrchestrationError::EmptySteps);
        }

        validate_payload(&saga.payload_schema, &payload)?;

        let execution = self
            .repository
            .create_saga_execution(NewSagaExecution {
                saga_id: saga.saga_id,
                payload,
            })
            .await
            .map_err(|e| OrchestrationError::repository("error saving saga execution", e))?;

        let step_rows: Vec<NewStepExecution> = saga_steps
            .iter()
            .map(|step| NewStepExecution {
                saga_execution_id: execution.saga_execution_id,
                index: step.index,
                name: step.name.clone(),
                status: StepExecutionStatus::Registered,
            })
            .collect();
        let step_executions = self
            .repository
            .create_saga_steps_execution(step_rows)
            .await
            .map_err(|e| OrchestrationError::repository("error saving saga step executions", e))?;

        let first_step = &step_executions[0];
        let activated = self
            .repository
            .set_saga_step_execution_status(
                StepExecutionStatus::Started,
                first_step.index,
                execution.saga_execution_id,
                StepExecutionStatus::Registered,
            )
            .await
            .map_err(|e| OrchestrationError::repository("error starting the first step", e))?;
        if !activated {
            warn!(
                execution_id = %execution.saga_execution_id,
                "first step was already activated; skipping dispatch"
            );
            return Ok(execution);
        }

        self.dispatcher
            .send_step_to_execute(&saga.formatted_name, &execution, first_step, false)
            .await
            .map_err(|e| {
                OrchestrationError::dispatch("error sending the first step to be executed", e)
            })?;

        Ok(execution)
    }

    pub async fn get_saga_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<SagaExecutionDetails, OrchestrationError> {
        let (execution, steps) = self.load_execution(execution_id).await?;
        Ok(SagaExecutionDetails { execution, steps })
    }

    /// React to a worker's result for one step, advancing or reversing the
    /// execution.
    ///
    /// The bus delivers at least once, so the incoming transition is checked
    /// against the step's current status first and then applied with a
    /// compare-and-set on that status; an illegal, redundant, or
    /// concurrently-applied transition is dropped without dispatching, so
    /// two deliveries of the same result cannot both activate the neighbor.
    pub async fn handle_step_result(&self, result: StepResult) -> Result<(), OrchestrationError> {
        match result.result {
            StepOutcome::Success => self.on_step_success(result).await,
            StepOutcome::Error => self.on_step_failure(result).await,
            StepOutcome::Compensated => self.on_step_compensated(result).await,
            StepOutcome::Unknown => {
                debug!(
                    execution_id = %result.execution_id,
                    step_index = result.step_index,
                    "ignoring unrecognized step result"
                );
                Ok(())
            }
        }
    }

    async fn on_step_success(&self, result: StepResult) -> Result<(), OrchestrationError> {
        let (execution, steps) = self.load_execution(result.execution_id).await?;

        let Some(current) = step_at(&steps, result.step_index) else {
            warn!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                "success reported for an unknown step"
            );
            return Ok(());
        };
        if !current.status.can_transition_to(StepExecutionStatus::Finished) {
            debug!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                status = %current.status,
                "dropping duplicate or stale success result"
            );
            return Ok(());
        }

        let finished = self
            .set_status(
                StepExecutionStatus::Finished,
                result.step_index,
                result.execution_id,
                current.status,
            )
            .await?;
        if !finished {
            debug!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                "step already finished by a concurrent result; dropping"
            );
            return Ok(());
        }

        let Some(next_step) = find_next_step(result.step_index, &steps) else {
            info!(execution_id = %result.execution_id, "saga was finished");
            return Ok(());
        };
        if !next_step.status.can_transition_to(StepExecutionStatus::Started) {
            debug!(
                execution_id = %result.execution_id,
                step_index = next_step.index,
                status = %next_step.status,
                "next step is already active; skipping dispatch"
            );
            return Ok(());
        }

        let activated = self
            .set_status(
                StepExecutionStatus::Started,
                next_step.index,
                result.execution_id,
                next_step.status,
            )
            .await?;
        if !activated {
            debug!(
                execution_id = %result.execution_id,
                step_index = next_step.index,
                "next step was activated by a concurrent result; skipping dispatch"
            );
            return Ok(());
        }
        self.dispatcher
            .send_step_to_execute(&result.saga_name, &execution, next_step, false)
            .await
            .map_err(|e| {
                OrchestrationError::dispatch("error sending the next step to be executed", e)
            })?;

        Ok(())
    }

    async fn on_step_failure(&self, result: StepResult) -> Result<(), OrchestrationError> {
        let (execution, steps) = self.load_execution(result.execution_id).await?;

        let Some(current) = step_at(&steps, result.step_index) else {
            warn!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                "failure reported for an unknown step"
            );
            return Ok(());
        };
        if !current.status.can_transition_to(StepExecutionStatus::Error) {
            debug!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                status = %current.status,
                "dropping duplicate or stale failure result"
            );
            return Ok(());
        }

        let recorded = self
            .set_status(
                StepExecutionStatus::Error,
                result.step_index,
                result.execution_id,
                current.status,
            )
            .await?;
        if !recorded {
            debug!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                "failure already recorded by a concurrent result; dropping"
            );
            return Ok(());
        }

        self.compensate_previous(&result, &execution, &steps, "saga has nothing to compensate")
            .await
    }

    async fn on_step_compensated(&self, result: StepResult) -> Result<(), OrchestrationError> {
        let (execution, steps) = self.load_execution(result.execution_id).await?;

        let Some(current) = step_at(&steps, result.step_index) else {
            warn!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                "compensation reported for an unknown step"
            );
            return Ok(());
        };
        if !current
            .status
            .can_transition_to(StepExecutionStatus::Compensated)
        {
            debug!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                status = %current.status,
                "dropping duplicate or stale compensation result"
            );
            return Ok(());
        }

        let recorded = self
            .set_status(
                StepExecutionStatus::Compensated,
                result.step_index,
                result.execution_id,
                current.status,
            )
            .await?;
        if !recorded {
            debug!(
                execution_id = %result.execution_id,
                step_index = result.step_index,
                "compensation already recorded by a concurrent result; dropping"
            );
            return Ok(());
        }

        self.compensate_previous(&result, &execution, &steps, "saga finished compensation")
            .await
    }

    /// Move the cursor one step back and dispatch its compensation, or log
    /// `terminal_message` when the reverse traversal has run out of steps.
    async fn compensate_previous(
        &self,
        result: &StepResult,
        execution: &SagaExecution,
        steps: &[StepExecution],
        terminal_message: &str,
    ) -> Result<(), OrchestrationError> {
        let Some(previous_step) = find_previous_step(result.step_index, steps) else {
            info!(execution_id = %result.execution_id, "{terminal_message}");
            return Ok(());
        };
        if !previous_step
            .status
            .can_transition_to(StepExecutionStatus::InCompensation)
        {
            debug!(
                execution_id = %result.execution_id,
                step_index = previous_step.index,
                status = %previous_step.status,
                "previous step is already compensating; skipping dispatch"
            );
            return Ok(());
        }

        let reversed = self
            .set_status(
                StepExecutionStatus::InCompensation,
                previous_step.index,
                result.execution_id,
                previous_step.status,
            )
            .await?;
        if !reversed {
            debug!(
                execution_id = %result.execution_id,
                step_index = previous_step.index,
                "previous step was claimed by a concurrent result; skipping dispatch"
            );
            return Ok(());
        }
        self.dispatcher
            .send_step_to_execute(&result.saga_name, execution, previous_step, true)
            .await
            .map_err(|e| {
                OrchestrationError::dispatch("error sending the step to be compensated", e)
            })?;

        Ok(())
    }

    async fn load_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<(SagaExecution, Vec<StepExecution>), OrchestrationError> {
        let execution = self
            .repository
            .get_saga_execution(execution_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound { .. } => {
                    OrchestrationError::ExecutionNotFound(execution_id)
                }
                other => OrchestrationError::repository("error loading saga execution", other),
            })?;
        let steps = self
            .repository
            .get_saga_steps_execution_by_execution_id(execution_id)
            .await
            .map_err(|e| OrchestrationError::repository("error loading step executions", e))?;

        Ok((execution, steps))
    }

    /// Compare-and-set the step's status, expecting the value this handler
    /// read. `false` means a concurrent handler applied the transition first.
    async fn set_status(
        &self,
        status: StepExecutionStatus,
        index: i32,
        execution_id: Uuid,
        expected: StepExecutionStatus,
    ) -> Result<bool, OrchestrationError> {
        self.repository
            .set_saga_step_execution_status(status, index, execution_id, expected)
            .await
            .map_err(|e| OrchestrationError::repository("error updating step execution status", e))
    }
}

fn compile_schema(schema: &serde_json::Value) -> Result<(), OrchestrationError> {
    JSONSchema::compile(schema)
        .map(|_| ())
        .map_err(|_| OrchestrationError::InvalidJsonSchema)
}

fn validate_payload(
    schema: &serde_json::Value,
    payload: &serde_json::Value,
) -> Result<(), OrchestrationError> {
    let compiled =
        JSONSchema::compile(schema).map_err(|_| OrchestrationError::InvalidJsonSchema)?;

    if let Err(mut errors) = compiled.validate(payload) {
        if let Some(first) = errors.next() {
            return Err(OrchestrationError::PayloadValidation(first.to_string()));
        }
    }

    Ok(())
}

/// The step the worker reported on: position `index - 1` of the
/// index-ordered list.
fn step_at(steps: &[StepExecution], index: i32) -> Option<&StepExecution> {
    if index < 1 {
        return None;
    }
    steps.get(index as usize - 1)
}

/// The forward neighbor: position `index` of the index-ordered list.
fn find_next_step(index: i32, steps: &[StepExecution]) -> Option<&StepExecution> {
    if index < 0 {
        return None;
    }
    steps.get(index as usize)
}

/// The reverse neighbor: position `index - 2` of the index-ordered list.
fn find_previous_step(index: i32, steps: &[StepExecution]) -> Option<&StepExecution> {
    if index < 2 {
        return None;
    }
    steps.get(index as usize - 2)
}
