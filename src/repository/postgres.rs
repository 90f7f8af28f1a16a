//! Postgres-backed repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{Saga, SagaExecution, SagaStep, StepExecution, StepExecutionStatus};

use super::{
    NewSaga, NewSagaExecution, NewSagaStep, NewStepExecution, RepositoryError, SagaRepository,
};

/// Saga repository over a Postgres connection pool.
#[derive(Clone)]
pub struct PgSagaRepository {
    pool: PgPool,
}

impl PgSagaRepository {
    /// Connect to the database and run pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.connection_timeout_seconds,
            ))
            .connect(&config.connection_string)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| RepositoryError::Database(e.into()))?;

        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SagaRow {
    saga_id: Uuid,
    name: String,
    formatted_name: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<SagaRow> for Saga {
    fn from(row: SagaRow) -> Self {
        Saga {
            saga_id: row.saga_id,
            name: row.name,
            formatted_name: row.formatted_name,
            payload_schema: row.payload,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SagaStepRow {
    step_id: Uuid,
    saga_id: Uuid,
    index: i32,
    name: String,
}

impl From<SagaStepRow> for SagaStep {
    fn from(row: SagaStepRow) -> Self {
        SagaStep {
            step_id: row.step_id,
            saga_id: row.saga_id,
            index: row.index,
            name: row.name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SagaExecutionRow {
    saga_execution_id: Uuid,
    saga_id: Uuid,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<SagaExecutionRow> for SagaExecution {
    fn from(row: SagaExecutionRow) -> Self {
        SagaExecution {
            saga_execution_id: row.saga_execution_id,
            saga_id: row.saga_id,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepExecutionRow {
    step_execution_id: Uuid,
    saga_execution_id: Uuid,
    index: i32,
    name: String,
    status: String,
}

impl TryFrom<StepExecutionRow> for StepExecution {
    type Error = RepositoryError;

    fn try_from(row: StepExecutionRow) -> Result<Self, Self::Error> {
        Ok(StepExecution {
            step_execution_id: row.step_execution_id,
            saga_execution_id: row.saga_execution_id,
            index: row.index,
            name: row.name,
            status: row.status.parse::<StepExecutionStatus>()?,
        })
    }
}

#[async_trait]
impl SagaRepository for PgSagaRepository {
    async fn get_saga(&self, saga_id: Uuid) -> Result<Saga, RepositoryError> {
        let row = sqlx::query_as::<_, SagaRow>(
            "SELECT saga_id, name, formatted_name, payload, created_at
             FROM sagas WHERE saga_id = $1",
        )
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Saga::from).ok_or(RepositoryError::NotFound {
            entity: "saga",
            id: saga_id,
        })
    }

    async fn create_saga(&self, saga: NewSaga) -> Result<Saga, RepositoryError> {
        let row = sqlx::query_as::<_, SagaRow>(
            "INSERT INTO sagas (name, formatted_name, payload)
             VALUES ($1, $2, $3)
             RETURNING saga_id, name, formatted_name, payload, created_at",
        )
        .bind(&saga.name)
        .bind(&saga.formatted_name)
        .bind(&saga.payload_schema)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_saga_steps_by_saga_id(
        &self,
        saga_id: Uuid,
    ) -> Result<Vec<SagaStep>, RepositoryError> {
        let rows = sqlx::query_as::<_, SagaStepRow>(
            "SELECT step_id, saga_id, \"index\", name
             FROM saga_steps WHERE saga_id = $1
             ORDER BY \"index\" ASC",
        )
        .bind(saga_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SagaStep::from).collect())
    }

    async fn create_saga_steps(
        &self,
        steps: Vec<NewSagaStep>,
    ) -> Result<Vec<SagaStep>, RepositoryError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        let mut saved = Vec::with_capacity(steps.len());
        for step in &steps {
            let row = sqlx::query_as::<_, SagaStepRow>(
                "INSERT INTO saga_steps (saga_id, \"index\", name)
                 VALUES ($1, $2, $3)
                 RETURNING step_id, saga_id, \"index\", name",
            )
            .bind(step.saga_id)
            .bind(step.index)
            .bind(&step.name)
            .fetch_one(&mut *tx)
            .await?;
            saved.push(row.into());
        }

        tx.commit().await?;
        Ok(saved)
    }

    async fn get_saga_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<SagaExecution, RepositoryError> {
        let row = sqlx::query_as::<_, SagaExecutionRow>(
            "SELECT saga_execution_id, saga_id, payload, created_at
             FROM saga_executions WHERE saga_execution_id = $1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SagaExecution::from).ok_or(RepositoryError::NotFound {
            entity: "saga execution",
            id: execution_id,
        })
    }

    async fn create_saga_execution(
        &self,
        execution: NewSagaExecution,
    ) -> Result<SagaExecution, RepositoryError> {
        let row = sqlx::query_as::<_, SagaExecutionRow>(
            "INSERT INTO saga_executions (saga_id, payload)
             VALUES ($1, $2)
             RETURNING saga_execution_id, saga_id, payload, created_at",
        )
        .bind(execution.saga_id)
        .bind(&execution.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_saga_steps_execution_by_execution_id(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query_as::<_, StepExecutionRow>(
            "SELECT step_execution_id, saga_execution_id, \"index\", name, status
             FROM saga_step_executions WHERE saga_execution_id = $1
             ORDER BY \"index\" ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StepExecution::try_from).collect()
    }

    async fn create_saga_steps_execution(
        &self,
        steps: Vec<NewStepExecution>,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        let mut saved = Vec::with_capacity(steps.len());
        for step in &steps {
            let row = sqlx::query_as::<_, StepExecutionRow>(
                "INSERT INTO saga_step_executions (saga_execution_id, \"index\", name, status)
                 VALUES ($1, $2, $3, $4)
                 RETURNING step_execution_id, saga_execution_id, \"index\", name, status",
            )
            .bind(step.saga_execution_id)
            .bind(step.index)
            .bind(&step.name)
            .bind(step.status.as_str())
            .fetch_one(&mut *tx)
            .await?;
            saved.push(StepExecution::try_from(row)?);
        }

        tx.commit().await?;
        Ok(saved)
    }

    async fn set_saga_step_execution_status(
        &self,
        status: StepExecutionStatus,
        index: i32,
        execution_id: Uuid,
        expected: StepExecutionStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE saga_step_executions SET status = $1
             WHERE saga_execution_id = $2 AND \"index\" = $3 AND status = $4",
        )
        .bind(status.as_str())
        .bind(execution_id)
        .bind(index)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let row_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM saga_step_executions
             WHERE saga_execution_id = $1 AND \"index\" = $2",
        )
        .bind(execution_id)
        .bind(index)
        .fetch_one(&self.pool)
        .await?;

        if row_count == 0 {
            return Err(RepositoryError::NotFound {
                entity: "step execution",
                id: execution_id,
            });
        }

        // The row exists but its status moved on; the caller lost the race.
        Ok(false)
    }
}
