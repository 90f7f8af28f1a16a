//! End-to-end orchestration scenarios over the in-memory repository and a
//! recording dispatcher.


use axum::http::StatusCode;
use axum_test::TestServer;
use proptest::prelude::*;
use serde_json::json;

use orchestration_service::error::OrchestrationError;
use orchestration_service::messaging::StepOutcome;
use orchestration_service::models::execution_is_terminal;
use orchestration_service::repository::SagaRepository;
use orchestration_service::services::normalize_name;

use test_utils::{result, TestEnvironment};

#[tokio::test]
async fn test_happy_path_runs_all_steps_forward() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let execution = env.start_trip_execution(&saga).await;
    let execution_id = execution.saga_execution_id;

    for index in 1..=3 {
        env.orchestrator
            .handle_step_result(result(&saga, execution_id, index, StepOutcome::Success))
            .await
            .unwrap();
    }

    assert_eq!(
        env.statuses(execution_id).await,
        vec!["finished", "finished", "finished"]
    );

    let sent = env.dispatcher.sent.lock().await;
    let topics: Vec<&str> = sent.iter().map(|s| s.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec!["saga-book-hotel", "saga-book-flight", "saga-pay"]
    );
    assert!(sent.iter().all(|s| !s.message.is_compensation));
    assert!(sent.iter().all(|s| s.message.execution_id == execution_id));
}

#[tokio::test]
async fn test_failure_at_step_two_compensates_step_one() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let execution = env.start_trip_execution(&saga).await;
    let execution_id = execution.saga_execution_id;

    env.orchestrator
        .handle_step_result(result(&saga, execution_id, 1, StepOutcome::Success))
        .await
        .unwrap();
    env.orchestrator
        .handle_step_result(result(&saga, execution_id, 2, StepOutcome::Error))
        .await
        .unwrap();

    assert_eq!(
        env.statuses(execution_id).await,
        vec!["in_compensation", "error", "registered"]
    );

    env.orchestrator
        .handle_step_result(result(&saga, execution_id, 1, StepOutcome::Compensated))
        .await
        .unwrap();

    assert_eq!(
        env.statuses(execution_id).await,
        vec!["compensated", "error", "registered"]
    );

    let sent = env.dispatcher.sent.lock().await;
    let dispatches: Vec<(&str, bool)> = sent
        .iter()
        .map(|s| (s.topic.as_str(), s.message.is_compensation))
        .collect();
    assert_eq!(
        dispatches,
        vec![
            ("saga-book-hotel", false),
            ("saga-book-flight", false),
            ("saga-book-hotel", true),
        ]
    );
}

#[tokio::test]
async fn test_failure_at_step_one_has_nothing_to_compensate() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let execution = env.start_trip_execution(&saga).await;
    let execution_id = execution.saga_execution_id;

    env.orchestrator
        .handle_step_result(result(&saga, execution_id, 1, StepOutcome::Error))
        .await
        .unwrap();

    assert_eq!(
        env.statuses(execution_id).await,
        vec!["error", "registered", "registered"]
    );

    // Only the initial forward dispatch of step 1
    assert_eq!(env.dispatcher.sent_count().await, 1);
}

#[tokio::test]
async fn test_duplicate_success_dispatches_the_next_step_once() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let execution = env.start_trip_execution(&saga).await;
    let execution_id = execution.saga_execution_id;

    for _ in 0..2 {
        env.orchestrator
            .handle_step_result(result(&saga, execution_id, 1, StepOutcome::Success))
            .await
            .unwrap();
    }

    assert_eq!(
        env.statuses(execution_id).await,
        vec!["finished", "started", "registered"]
    );
    assert_eq!(
        env.dispatcher.sent_topics().await,
        vec!["saga-book-hotel", "saga-book-flight"]
    );
}

#[tokio::test]
async fn test_duplicate_error_compensates_once() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let execution = env.start_trip_execution(&saga).await;
    let execution_id = execution.saga_execution_id;

    env.orchestrator
        .handle_step_result(result(&saga, execution_id, 1, StepOutcome::Success))
        .await
        .unwrap();
    for _ in 0..2 {
        env.orchestrator
            .handle_step_result(result(&saga, execution_id, 2, StepOutcome::Error))
            .await
            .unwrap();
    }

    assert_eq!(
        env.statuses(execution_id).await,
        vec!["in_compensation", "error", "registered"]
    );
    assert_eq!(env.dispatcher.sent_count().await, 3);
}

#[tokio::test]
async fn test_unknown_result_values_are_ignored() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let execution = env.start_trip_execution(&saga).await;
    let execution_id = execution.saga_execution_id;

    env.orchestrator
        .handle_step_result(result(&saga, execution_id, 1, StepOutcome::Unknown))
        .await
        .unwrap();

    assert_eq!(
        env.statuses(execution_id).await,
        vec!["started", "registered", "registered"]
    );
    assert_eq!(env.dispatcher.sent_count().await, 1);
}

#[tokio::test]
async fn test_every_result_sequence_reaches_a_terminal_state() {
    // Fail at each step after a prefix of successes, then acknowledge the
    // compensation chain; every run must settle.
    for failing_step in 1..=3 {
        let env = TestEnvironment::new();
        let saga = env.create_trip_saga().await;
        let execution = env.start_trip_execution(&saga).await;
        let execution_id = execution.saga_execution_id;

        for index in 1..failing_step {
            env.orchestrator
                .handle_step_result(result(&saga, execution_id, index, StepOutcome::Success))
                .await
                .unwrap();
        }
        env.orchestrator
            .handle_step_result(result(&saga, execution_id, failing_step, StepOutcome::Error))
            .await
            .unwrap();
        for index in (1..failing_step).rev() {
            env.orchestrator
                .handle_step_result(result(&saga, execution_id, index, StepOutcome::Compensated))
                .await
                .unwrap();
        }

        let details = env
            .orchestrator
            .get_saga_execution(execution_id)
            .await
            .unwrap();
        assert!(
            execution_is_terminal(&details.steps),
            "failure at step {failing_step} did not settle: {:?}",
            details.steps
        );
    }
}

#[tokio::test]
async fn test_execution_step_records_mirror_the_definition() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let execution = env.start_trip_execution(&saga).await;

    let details = env
        .orchestrator
        .get_saga_execution(execution.saga_execution_id)
        .await
        .unwrap();

    let indices: Vec<i32> = details.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);

    let names: Vec<&str> = details.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["book-hotel", "book-flight", "pay"]);
}

#[tokio::test]
async fn test_payload_mismatch_rejects_the_execution() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;

    let err = env
        .orchestrator
        .create_saga_execution(saga.saga_id, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::PayloadValidation(_)));
    assert_eq!(env.dispatcher.sent_count().await, 0);
}

#[tokio::test]
async fn test_invalid_schema_rejects_the_definition() {
    let env = TestEnvironment::new();

    let err = env
        .orchestrator
        .create_saga(
            "Saga".to_string(),
            json!("not-a-schema"),
            vec!["Book Hotel".to_string()],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::InvalidJsonSchema));
}

#[tokio::test]
async fn test_empty_step_list_rejects_the_definition() {
    let env = TestEnvironment::new();

    let err = env
        .orchestrator
        .create_saga("Saga".to_string(), json!({"type": "object"}), vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::EmptySteps));
}

#[tokio::test]
async fn test_dispatch_failure_surfaces_to_the_caller() {
    let env = TestEnvironment::failing_dispatch();
    let saga = env.create_trip_saga().await;

    let err = env
        .orchestrator
        .create_saga_execution(saga.saga_id, json!({"hotel_name": "X"}))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::Dispatch { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Registering any step list yields contiguous 1..N indices with
    // normalized names.
    #[test]
    fn test_registered_steps_are_contiguous_and_normalized(
        names in proptest::collection::vec("[A-Za-z][A-Za-z0-9 _]{0,20}", 1..8)
    ) {
        tokio_test::block_on(async {
            let env = TestEnvironment::new();
            let saga = env
                .orchestrator
                .create_saga(
                    "Property Saga".to_string(),
                    json!({"type": "object"}),
                    names.clone(),
                )
                .await
                .unwrap();

            let steps = env
                .repository
                .get_saga_steps_by_saga_id(saga.saga_id)
                .await
                .unwrap();

            assert_eq!(steps.len(), names.len());
            for (position, step) in steps.iter().enumerate() {
                assert_eq!(step.index, position as i32 + 1);
                assert_eq!(step.name, normalize_name(&names[position]));
            }
        });
    }
}

#[tokio::test]
async fn test_http_create_and_fetch_saga() {
    let env = TestEnvironment::new();
    let server = TestServer::new(orchestration_service::handlers::api_router(env.app_state()))
        .unwrap();

    let created = server
        .post("/api/v1/sagas")
        .json(&json!({
            "name": "Trip Saga",
            "payload": {"type": "object", "required": ["hotel_name"]},
            "steps": [{"name": "Book Hotel"}, {"name": "Pay"}]
        }))
        .await;
    created.assert_status(StatusCode::CREATED);

    let body: serde_json::Value = created.json();
    assert_eq!(body["name"], "Trip Saga");
    let saga_id = body["id"].as_str().unwrap().to_string();

    let fetched = server.get(&format!("/api/v1/sagas/{saga_id}")).await;
    fetched.assert_status(StatusCode::OK);

    let saga: serde_json::Value = fetched.json();
    assert_eq!(saga["formatted_name"], "trip-saga");
    assert_eq!(saga["payload"]["required"][0], "hotel_name");
}

#[tokio::test]
async fn test_http_rejects_invalid_schema() {
    let env = TestEnvironment::new();
    let server = TestServer::new(orchestration_service::handlers::api_router(env.app_state()))
        .unwrap();

    let response = server
        .post("/api/v1/sagas")
        .json(&json!({
            "name": "Saga",
            "payload": "not-a-schema",
            "steps": [{"name": "Book Hotel"}]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid json schema");
}

#[tokio::test]
async fn test_http_rejects_mismatched_payload() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let server = TestServer::new(orchestration_service::handlers::api_router(env.app_state()))
        .unwrap();

    let response = server
        .post(&format!("/api/v1/sagas/{}/executions", saga.saga_id))
        .json(&json!({"payload": {}}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(env.dispatcher.sent_count().await, 0);
}

#[tokio::test]
async fn test_http_rejects_missing_body_fields() {
    let env = TestEnvironment::new();
    let server = TestServer::new(orchestration_service::handlers::api_router(env.app_state()))
        .unwrap();

    let response = server
        .post("/api/v1/sagas")
        .json(&json!({"name": "Saga"}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_rejects_malformed_identifiers() {
    let env = TestEnvironment::new();
    let server = TestServer::new(orchestration_service::handlers::api_router(env.app_state()))
        .unwrap();

    let response = server.get("/api/v1/sagas/not-a-uuid").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_http_execution_lifecycle_is_observable() {
    let env = TestEnvironment::new();
    let saga = env.create_trip_saga().await;
    let server = TestServer::new(orchestration_service::handlers::api_router(env.app_state()))
        .unwrap();

    let started = server
        .post(&format!("/api/v1/sagas/{}/executions", saga.saga_id))
        .json(&json!({"payload": {"hotel_name": "X", "payment_amount": 100}}))
        .await;
    started.assert_status(StatusCode::CREATED);

    let body: serde_json::Value = started.json();
    let execution_id = body["saga_execution_id"].as_str().unwrap().to_string();

    let fetched = server
        .get(&format!(
            "/api/v1/sagas/{}/executions/{execution_id}",
            saga.saga_id
        ))
        .await;
    fetched.assert_status(StatusCode::OK);

    let execution: serde_json::Value = fetched.json();
    let steps = execution["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0]["name"], "book-hotel");
    assert_eq!(steps[0]["status"], "started");
    assert_eq!(steps[1]["status"], "registered");
}
