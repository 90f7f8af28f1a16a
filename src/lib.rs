//! Saga orchestration service library.
//!
//! Coordinates long-running, multi-step transactions across worker services:
//! clients register saga definitions and start executions over HTTP, steps
//! run out-of-process in workers reached through per-step topics, and a
//! result consumer drives the state machine forward or back into
//! compensation.

pub mod config;
pub mod error;
pub mod handlers;
pub mod messaging;
pub mod models;
pub mod repository;
pub mod services;

use std::sync::Arc;

use services::SagaOrchestrator;

/// Shared application state for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SagaOrchestrator>,
}
