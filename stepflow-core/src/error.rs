//! Core error types.

use crate::store::StoreError;
use thiserror::Error;

/// A specific rule a definition or a transition attempt broke.
///
/// Every variant names the offending identifiers so the caller can fix its
/// input without guessing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    // --- structural ---
    #[error("definition declares no states")]
    NoStates,

    #[error("definition declares no transitions")]
    NoTransitions,

    #[error("definition has no initial state")]
    NoInitialState,

    #[error("definition has more than one initial state: {}", .states.join(", "))]
    MultipleInitialStates { states: Vec<String> },

    #[error("duplicate state '{state}'")]
    DuplicateState { state: String },

    #[error("duplicate transition '{transition}'")]
    DuplicateTransition { transition: String },

    #[error("transition '{transition}' has no source states")]
    NoSourceStates { transition: String },

    #[error("transition '{transition}' lists source '{state}' more than once")]
    DuplicateSource { transition: String, state: String },

    #[error("transition '{transition}' references unknown state '{state}'")]
    UnknownStateReference { transition: String, state: String },

    // --- input shape ---
    #[error("invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("too many states: {count} (max {max})")]
    TooManyStates { count: usize, max: usize },

    #[error("too many transitions: {count} (max {max})")]
    TooManyTransitions { count: usize, max: usize },

    #[error("transition '{transition}' has too many source states: {count} (max {max})")]
    TooManySources {
        transition: String,
        count: usize,
        max: usize,
    },

    // --- graph ---
    #[error("cycle detected: state '{from}' loops back to '{state}'")]
    Cycle { state: String, from: String },

    #[error("unreachable states: {}", .states.join(", "))]
    Unreachable { states: Vec<String> },

    #[error("dead-end states (non-final with no outgoing transition): {}", .states.join(", "))]
    DeadEnd { states: Vec<String> },

    // --- creation ---
    #[error("definition '{definition}' already exists with different content")]
    DefinitionExists { definition: String },

    // --- execution ---
    #[error("unknown transition '{transition}'")]
    UnknownTransition { transition: String },

    #[error("unknown state '{state}'")]
    UnknownState { state: String },

    #[error("transition '{transition}' is disabled")]
    TransitionDisabled { transition: String },

    #[error("transition '{transition}' cannot fire from state '{state}'")]
    NotFromState { transition: String, state: String },

    #[error("state '{state}' is final")]
    FinalState { state: String },

    #[error("state '{state}' is disabled")]
    StateDisabled { state: String },

    #[error("transition '{transition}' targets disabled state '{state}'")]
    TargetDisabled { transition: String, state: String },
}

impl Violation {
    /// Returns the identifiers this violation is about.
    pub fn offending(&self) -> Vec<&str> {
        match self {
            Violation::NoStates | Violation::NoTransitions | Violation::NoInitialState => vec![],
            Violation::TooManyStates { .. } | Violation::TooManyTransitions { .. } => vec![],
            Violation::MultipleInitialStates { states }
            | Violation::Unreachable { states }
            | Violation::DeadEnd { states } => states.iter().map(String::as_str).collect(),
            Violation::DuplicateState { state }
            | Violation::UnknownState { state }
            | Violation::FinalState { state }
            | Violation::StateDisabled { state } => vec![state.as_str()],
            Violation::DuplicateTransition { transition }
            | Violation::NoSourceStates { transition }
            | Violation::TooManySources { transition, .. }
            | Violation::UnknownTransition { transition }
            | Violation::TransitionDisabled { transition } => vec![transition.as_str()],
            Violation::DuplicateSource { transition, state }
            | Violation::UnknownStateReference { transition, state }
            | Violation::NotFromState { transition, state }
            | Violation::TargetDisabled { transition, state } => {
                vec![transition.as_str(), state.as_str()]
            }
            Violation::InvalidIdentifier { identifier, .. } => vec![identifier.as_str()],
            Violation::Cycle { state, from } => vec![state.as_str(), from.as_str()],
            Violation::DefinitionExists { definition } => vec![definition.as_str()],
        }
    }

    /// Short machine-readable name of the broken rule.
    pub fn rule(&self) -> &'static str {
        match self {
            Violation::NoStates
            | Violation::NoTransitions
            | Violation::NoInitialState
            | Violation::MultipleInitialStates { .. }
            | Violation::DuplicateState { .. }
            | Violation::DuplicateTransition { .. }
            | Violation::NoSourceStates { .. }
            | Violation::DuplicateSource { .. }
            | Violation::UnknownStateReference { .. } => "structure",
            Violation::InvalidIdentifier { .. }
            | Violation::TooManyStates { .. }
            | Violation::TooManyTransitions { .. }
            | Violation::TooManySources { .. } => "shape",
            Violation::Cycle { .. } => "cycle",
            Violation::Unreachable { .. } => "reachability",
            Violation::DeadEnd { .. } => "dead_end",
            Violation::DefinitionExists { .. } => "immutable",
            Violation::UnknownTransition { .. }
            | Violation::UnknownState { .. }
            | Violation::TransitionDisabled { .. }
            | Violation::NotFromState { .. }
            | Violation::FinalState { .. }
            | Violation::StateDisabled { .. }
            | Violation::TargetDisabled { .. } => "transition",
        }
    }
}

/// Errors from the workflow engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("definition not found: {definition}")]
    DefinitionNotFound { definition: String },

    #[error("instance not found: {instance}")]
    InstanceNotFound { instance: String },

    #[error("validation rejected: {0}")]
    Rejected(#[from] Violation),

    #[error("concurrency retries exhausted for instance {instance} after {attempts} attempts")]
    ConcurrencyExhausted { instance: String, attempts: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether the caller should resubmit the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyExhausted { .. })
    }

    /// Returns whether this error reports a missing definition or instance.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::DefinitionNotFound { .. } | CoreError::InstanceNotFound { .. }
        )
    }

    /// Returns the violation behind a rejection, if any.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            CoreError::Rejected(v) => Some(v),
            _ => None,
        }
    }

    /// Returns an error code suitable for external responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DefinitionNotFound { .. } => "DEFINITION_NOT_FOUND",
            CoreError::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            CoreError::Rejected(_) => "VALIDATION_REJECTED",
            CoreError::ConcurrencyExhausted { .. } => "CONFLICT",
            CoreError::Store(_) => "STORE_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}
