//! # stepflow-core
//!
//! Workflow state machine engine.
//!
//! This crate provides:
//! - Definition parsing, checksumming and validation
//! - Single-instance transition rules
//! - Optimistic-concurrency execution with bounded retry
//! - The storage contract and an in-memory store

pub mod coordinator;
pub mod definition;
pub mod engine;
pub mod error;
pub mod graph;
pub mod instance;
pub mod machine;
pub mod store;
pub mod validator;

pub use coordinator::{ExecutionCoordinator, RetryPolicy};
pub use definition::{Definition, DefinitionRequest, State, Transition};
pub use engine::{EngineConfig, WorkflowEngine};
pub use error::{CoreError, Violation};
pub use instance::{HistoryRecord, Instance, STARTED};
pub use store::{MemoryStore, SaveOutcome, Store, StoreError};
pub use validator::{Limits, Validator};
