//! Definition validation.
//!
//! Checks run in a fixed order and stop at the first violation:
//!
//! 1. structure (initial state, non-empty, unique ids, resolvable references)
//! 2. input shape (identifier syntax and size limits)
//! 3. no cycle reachable from the initial state
//! 4. every state reachable from the initial state
//! 5. every non-final state has an outgoing transition

use crate::definition::{Definition, DefinitionRequest};
use crate::error::Violation;
use crate::graph::Graph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bounds on definition size. They cap the cost of validation, they
/// are not business rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_states: usize,
    pub max_transitions: usize,
    pub max_identifier_length: usize,
    pub max_sources_per_transition: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_states: 256,
            max_transitions: 1024,
            max_identifier_length: 64,
            max_sources_per_transition: 64,
        }
    }
}

/// Validates definition requests against a set of [`Limits`].
#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: Limits,
}

impl Validator {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Runs every check and returns the resolved definition on success.
    pub fn validate(&self, request: DefinitionRequest) -> Result<Definition, Violation> {
        check_structure(&request)?;
        self.check_shape(&request)?;

        let graph = Graph::build(&request.states, &request.transitions);
        let roots: Vec<&str> = request
            .states
            .iter()
            .filter(|s| s.is_initial)
            .map(|s| s.id.as_str())
            .collect();

        check_acyclic(&graph, &roots)?;
        check_reachable(&graph, &roots)?;
        check_dead_ends(&graph, &request)?;

        tracing::debug!(
            definition = %request.id,
            states = request.states.len(),
            transitions = request.transitions.len(),
            "definition accepted"
        );

        Ok(Definition::from_validated(request))
    }

    /// Checks a single identifier against the syntax and length rules.
    pub fn check_identifier(&self, id: &str) -> Result<(), Violation> {
        let reject = |reason: String| {
            Err(Violation::InvalidIdentifier {
                identifier: id.to_string(),
                reason,
            })
        };

        if id.is_empty() {
            return reject("must not be empty".into());
        }
        if id.len() > self.limits.max_identifier_length {
            return reject(format!(
                "longer than {} characters",
                self.limits.max_identifier_length
            ));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return reject(format!(
                "character {:?} not allowed (use letters, digits, '_' or '-')",
                c
            ));
        }
        Ok(())
    }

    fn check_shape(&self, request: &DefinitionRequest) -> Result<(), Violation> {
        let limits = &self.limits;

        if request.states.len() > limits.max_states {
            return Err(Violation::TooManyStates {
                count: request.states.len(),
                max: limits.max_states,
            });
        }
        if request.transitions.len() > limits.max_transitions {
            return Err(Violation::TooManyTransitions {
                count: request.transitions.len(),
                max: limits.max_transitions,
            });
        }

        self.check_identifier(&request.id)?;
        for state in &request.states {
            self.check_identifier(&state.id)?;
        }
        for t in &request.transitions {
            self.check_identifier(&t.id)?;
            if t.from.len() > limits.max_sources_per_transition {
                return Err(Violation::TooManySources {
                    transition: t.id.clone(),
                    count: t.from.len(),
                    max: limits.max_sources_per_transition,
                });
            }
        }

        Ok(())
    }
}

fn check_structure(request: &DefinitionRequest) -> Result<(), Violation> {
    if request.states.is_empty() {
        return Err(Violation::NoStates);
    }
    if request.transitions.is_empty() {
        return Err(Violation::NoTransitions);
    }

    let initial: Vec<String> = request
        .states
        .iter()
        .filter(|s| s.is_initial)
        .map(|s| s.id.clone())
        .collect();
    match initial.len() {
        0 => return Err(Violation::NoInitialState),
        1 => {}
        _ => return Err(Violation::MultipleInitialStates { states: initial }),
    }

    let mut states = HashSet::with_capacity(request.states.len());
    for state in &request.states {
        if !states.insert(state.id.as_str()) {
            return Err(Violation::DuplicateState {
                state: state.id.clone(),
            });
        }
    }

    let mut transitions = HashSet::with_capacity(request.transitions.len());
    for t in &request.transitions {
        if !transitions.insert(t.id.as_str()) {
            return Err(Violation::DuplicateTransition {
                transition: t.id.clone(),
            });
        }
    }

    for t in &request.transitions {
        if t.from.is_empty() {
            return Err(Violation::NoSourceStates {
                transition: t.id.clone(),
            });
        }

        let mut sources = HashSet::with_capacity(t.from.len());
        for from in &t.from {
            if !sources.insert(from.as_str()) {
                return Err(Violation::DuplicateSource {
                    transition: t.id.clone(),
                    state: from.clone(),
                });
            }
            if !states.contains(from.as_str()) {
                return Err(Violation::UnknownStateReference {
                    transition: t.id.clone(),
                    state: from.clone(),
                });
            }
        }

        if !states.contains(t.to.as_str()) {
            return Err(Violation::UnknownStateReference {
                transition: t.id.clone(),
                state: t.to.clone(),
            });
        }
    }

    Ok(())
}

fn check_acyclic(graph: &Graph<'_>, roots: &[&str]) -> Result<(), Violation> {
    match graph.find_cycle(roots) {
        Some(edge) => Err(Violation::Cycle {
            state: edge.to.to_string(),
            from: edge.from.to_string(),
        }),
        None => Ok(()),
    }
}

fn check_reachable(graph: &Graph<'_>, roots: &[&str]) -> Result<(), Violation> {
    let unreachable = graph.unreachable_from(roots);
    if unreachable.is_empty() {
        Ok(())
    } else {
        Err(Violation::Unreachable {
            states: unreachable.into_iter().map(String::from).collect(),
        })
    }
}

fn check_dead_ends(graph: &Graph<'_>, request: &DefinitionRequest) -> Result<(), Violation> {
    let dead_ends: Vec<String> = request
        .states
        .iter()
        .filter(|s| !s.is_final && graph.out_degree(&s.id) == 0)
        .map(|s| s.id.clone())
        .collect();

    if dead_ends.is_empty() {
        Ok(())
    } else {
        Err(Violation::DeadEnd { states: dead_ends })
    }
}
