//! Workflow engine - the operations exposed to callers.

use crate::coordinator::{ExecutionCoordinator, RetryPolicy};
use crate::definition::{Definition, DefinitionRequest};
use crate::error::{CoreError, Violation};
use crate::instance::Instance;
use crate::machine;
use crate::store::{SaveOutcome, Store};
use crate::validator::{Limits, Validator};
use std::sync::Arc;

/// Engine configuration injected by the embedding application.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub limits: Limits,
    pub retry: RetryPolicy,
}

/// The workflow engine.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    validator: Validator,
    coordinator: ExecutionCoordinator,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            validator: Validator::new(config.limits),
            coordinator: ExecutionCoordinator::new(store.clone(), config.retry),
            store,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Validates and stores a definition.
    ///
    /// Resubmitting identical content is an idempotent success that returns
    /// the stored definition; different content under an existing id is
    /// rejected. Concurrent creates under one id resolve to a single stored
    /// definition.
    pub fn create_definition(&self, request: DefinitionRequest) -> Result<Definition, CoreError> {
        if let Some(existing) = self.store.load_definition(&request.id)? {
            return Self::resolve_existing(existing, &request.checksum());
        }

        let definition = self.validator.validate(request).map_err(|v| {
            tracing::debug!(rule = v.rule(), reason = %v, "definition rejected");
            v
        })?;

        if let Some(existing) = self.store.insert_definition(&definition)? {
            return Self::resolve_existing(existing, &definition.checksum);
        }

        tracing::info!(
            definition = %definition.id,
            checksum = %definition.checksum,
            "definition created"
        );
        Ok(definition)
    }

    fn resolve_existing(existing: Definition, checksum: &str) -> Result<Definition, CoreError> {
        if existing.checksum == checksum {
            tracing::debug!(definition = %existing.id, "definition unchanged");
            return Ok(existing);
        }
        Err(Violation::DefinitionExists {
            definition: existing.id,
        }
        .into())
    }

    pub fn get_definition(&self, id: &str) -> Result<Definition, CoreError> {
        self.store
            .load_definition(id)?
            .ok_or_else(|| CoreError::DefinitionNotFound {
                definition: id.to_string(),
            })
    }

    /// Lists all definitions, sorted by id.
    pub fn list_definitions(&self) -> Result<Vec<Definition>, CoreError> {
        let mut definitions = self.store.load_all_definitions()?;
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Starts a new instance of a stored definition.
    pub fn start_instance(&self, definition_id: &str) -> Result<Instance, CoreError> {
        let definition = self.get_definition(definition_id)?;
        let instance = Instance::start(uuid::Uuid::new_v4().to_string(), &definition)?;

        match self.store.save_instance_if_version_matches(&instance, 0)? {
            SaveOutcome::Saved => {}
            // A v4 UUID collision; treat it like any other lost race.
            SaveOutcome::Conflict { .. } => {
                return Err(CoreError::ConcurrencyExhausted {
                    instance: instance.id,
                    attempts: 1,
                })
            }
        }

        tracing::info!(
            instance = %instance.id,
            definition = %definition.id,
            state = %instance.current_state,
            "instance started"
        );
        Ok(instance)
    }

    /// Fires a transition on an instance.
    pub fn execute(&self, instance_id: &str, transition_id: &str) -> Result<Instance, CoreError> {
        self.coordinator.execute(instance_id, transition_id)
    }

    pub fn get_instance_status(&self, instance_id: &str) -> Result<Instance, CoreError> {
        self.store
            .load_instance(instance_id)?
            .ok_or_else(|| CoreError::InstanceNotFound {
                instance: instance_id.to_string(),
            })
    }

    /// Returns the transitions that may fire from the instance's current
    /// state.
    pub fn available_transitions(&self, instance_id: &str) -> Result<Vec<String>, CoreError> {
        let instance = self.get_instance_status(instance_id)?;
        let definition = self.get_definition(&instance.definition_id)?;
        Ok(machine::available_transitions(&instance, &definition)
            .into_iter()
            .map(String::from)
            .collect())
    }
}
