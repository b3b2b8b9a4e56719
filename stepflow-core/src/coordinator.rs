//! Execution coordinator: read, check, apply, conditional save, retry.

use crate::error::{CoreError, Violation};
use crate::instance::Instance;
use crate::machine;
use crate::store::{SaveOutcome, Store};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Bounded retry schedule for version conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first conflict. Doubles after each further conflict.
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Applies transitions to stored instances under optimistic concurrency.
pub struct ExecutionCoordinator {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl ExecutionCoordinator {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fires `transition_id` on `instance_id`.
    ///
    /// Each attempt re-reads the instance and its definition, re-checks
    /// legality, and commits with a save conditional on the version it read.
    /// Only version conflicts are retried; rejections and store failures
    /// return immediately and leave the store untouched.
    pub fn execute(&self, instance_id: &str, transition_id: &str) -> Result<Instance, CoreError> {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            let instance = self.store.load_instance(instance_id)?.ok_or_else(|| {
                CoreError::InstanceNotFound {
                    instance: instance_id.to_string(),
                }
            })?;

            let definition = self
                .store
                .load_definition(&instance.definition_id)?
                .ok_or_else(|| CoreError::DefinitionNotFound {
                    definition: instance.definition_id.clone(),
                })?;

            let transition = definition.transition(transition_id).ok_or_else(|| {
                Violation::UnknownTransition {
                    transition: transition_id.to_string(),
                }
            })?;

            machine::can_fire(&instance, transition, &definition)?;

            let expected_version = instance.version;
            let mut next = instance;
            next.apply(transition);

            match self
                .store
                .save_instance_if_version_matches(&next, expected_version)?
            {
                SaveOutcome::Saved => {
                    tracing::debug!(
                        instance = %instance_id,
                        transition = %transition_id,
                        state = %next.current_state,
                        version = next.version,
                        attempt,
                        "transition committed"
                    );
                    return Ok(next);
                }
                SaveOutcome::Conflict { actual } => {
                    tracing::warn!(
                        instance = %instance_id,
                        transition = %transition_id,
                        expected_version,
                        actual_version = ?actual,
                        attempt,
                        "version conflict"
                    );
                    if attempt < attempts {
                        let delay = self.retry.backoff(attempt);
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                }
            }
        }

        tracing::warn!(
            instance = %instance_id,
            transition = %transition_id,
            attempts,
            "retries exhausted"
        );
        Err(CoreError::ConcurrencyExhausted {
            instance: instance_id.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Definition, DefinitionRequest, State, Transition};
    use crate::store::{MemoryStore, StoreError};
    use crate::validator::Validator;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;

    fn review() -> Definition {
        Validator::default()
            .validate(
                DefinitionRequest::new("review")
                    .with_state(State::initial("draft"))
                    .with_state(State::new("submitted"))
                    .with_state(State::terminal("approved"))
                    .with_state(State::terminal("rejected"))
                    .with_transition(Transition::new("submit", ["draft"], "submitted"))
                    .with_transition(Transition::new("approve", ["submitted"], "approved"))
                    .with_transition(Transition::new("reject", ["draft", "submitted"], "rejected")),
            )
            .unwrap()
    }

    fn seeded() -> (Arc<MemoryStore>, Instance) {
        let store = Arc::new(MemoryStore::new());
        let def = review();
        store.save_definition(&def).unwrap();
        let instance = Instance::start("i-1", &def).unwrap();
        store.save_instance_if_version_matches(&instance, 0).unwrap();
        (store, instance)
    }

    /// Lets another writer commit `interloper` right before the first
    /// `conflicts` conditional saves, then behaves like the inner store.
    struct RacingStore {
        inner: Arc<MemoryStore>,
        interloper: Option<String>,
        conflicts: AtomicU32,
        saves: AtomicU32,
    }

    impl RacingStore {
        fn new(inner: Arc<MemoryStore>, conflicts: u32) -> Self {
            Self {
                inner,
                interloper: None,
                conflicts: AtomicU32::new(conflicts),
                saves: AtomicU32::new(0),
            }
        }

        /// The competing writer fires a real transition instead of only
        /// bumping the version.
        fn firing(mut self, transition: &str) -> Self {
            self.interloper = Some(transition.to_string());
            self
        }
    }

    impl Store for RacingStore {
        fn load_definition(&self, id: &str) -> Result<Option<Definition>, StoreError> {
            self.inner.load_definition(id)
        }

        fn load_all_definitions(&self) -> Result<Vec<Definition>, StoreError> {
            self.inner.load_all_definitions()
        }

        fn save_definition(&self, definition: &Definition) -> Result<(), StoreError> {
            self.inner.save_definition(definition)
        }

        fn insert_definition(
            &self,
            definition: &Definition,
        ) -> Result<Option<Definition>, StoreError> {
            self.inner.insert_definition(definition)
        }

        fn load_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
            self.inner.load_instance(id)
        }

        fn save_instance_if_version_matches(
            &self,
            instance: &Instance,
            expected_version: u64,
        ) -> Result<SaveOutcome, StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                let current = self.inner.load_instance(&instance.id)?.unwrap();
                let mut bumped = current.clone();
                match &self.interloper {
                    Some(transition) => {
                        let def = self.inner.load_definition(&current.definition_id)?.unwrap();
                        bumped.apply(def.transition(transition).unwrap());
                    }
                    None => bumped.version += 1,
                }
                self.inner
                    .save_instance_if_version_matches(&bumped, current.version)?;
            }
            self.inner
                .save_instance_if_version_matches(instance, expected_version)
        }
    }

    struct FailingStore(Arc<MemoryStore>);

    impl Store for FailingStore {
        fn load_definition(&self, id: &str) -> Result<Option<Definition>, StoreError> {
            self.0.load_definition(id)
        }

        fn load_all_definitions(&self) -> Result<Vec<Definition>, StoreError> {
            self.0.load_all_definitions()
        }

        fn save_definition(&self, definition: &Definition) -> Result<(), StoreError> {
            self.0.save_definition(definition)
        }

        fn insert_definition(
            &self,
            definition: &Definition,
        ) -> Result<Option<Definition>, StoreError> {
            self.0.insert_definition(definition)
        }

        fn load_instance(&self, id: &str) -> Result<Option<Instance>, StoreError> {
            self.0.load_instance(id)
        }

        fn save_instance_if_version_matches(
            &self,
            _instance: &Instance,
            _expected_version: u64,
        ) -> Result<SaveOutcome, StoreError> {
            Err(StoreError::Backend("disk on fire".into()))
        }
    }

    #[test]
    fn test_execute_commits() {
        let (store, _) = seeded();
        let coordinator = ExecutionCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        let updated = coordinator.execute("i-1", "submit").unwrap();
        assert_eq!(updated.current_state, "submitted");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.history.len(), 2);
        assert_eq!(updated.last_record().unwrap().transition, "submit");

        assert_eq!(store.load_instance("i-1").unwrap().unwrap(), updated);
    }

    #[test]
    fn test_execute_not_found() {
        let (store, instance) = seeded();
        let coordinator = ExecutionCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        let err = coordinator.execute("nope", "submit").unwrap_err();
        assert!(matches!(err, CoreError::InstanceNotFound { .. }));

        let mut orphan = instance.clone();
        orphan.id = "i-2".into();
        orphan.definition_id = "gone".into();
        store.save_instance_if_version_matches(&orphan, 0).unwrap();
        let err = coordinator.execute("i-2", "submit").unwrap_err();
        assert!(matches!(
            err,
            CoreError::DefinitionNotFound { definition } if definition == "gone"
        ));
    }

    #[test]
    fn test_execute_rejections_leave_store_untouched() {
        let (store, instance) = seeded();
        let coordinator = ExecutionCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        let err = coordinator.execute("i-1", "teleport").unwrap_err();
        assert_eq!(
            err.violation(),
            Some(&Violation::UnknownTransition {
                transition: "teleport".into()
            })
        );

        let err = coordinator.execute("i-1", "approve").unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(Violation::NotFromState { .. })
        ));

        assert_eq!(store.load_instance("i-1").unwrap().unwrap(), instance);
    }

    #[test]
    fn test_final_state_rejects_everything() {
        let (store, _) = seeded();
        let coordinator = ExecutionCoordinator::new(store, RetryPolicy::immediate(3));
        coordinator.execute("i-1", "reject").unwrap();

        for t in ["submit", "approve", "reject"] {
            let err = coordinator.execute("i-1", t).unwrap_err();
            assert!(matches!(err, CoreError::Rejected(_)), "{}", t);
        }
    }

    #[test]
    fn test_retries_after_conflict() {
        let (memory, _) = seeded();
        let store = Arc::new(RacingStore::new(memory.clone(), 1));
        let coordinator = ExecutionCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        // The racer bumps the version to 2 without changing state, so the
        // retry re-reads version 2 and commits version 3.
        let updated = coordinator.execute("i-1", "submit").unwrap();
        assert_eq!(updated.version, 3);
        assert_eq!(updated.current_state, "submitted");
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_revalidates_against_new_state() {
        let (memory, _) = seeded();
        // Another caller rejects the draft while we try to submit it.
        let store = Arc::new(RacingStore::new(memory.clone(), 1).firing("reject"));
        let coordinator = ExecutionCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        let err = coordinator.execute("i-1", "submit").unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::NotFromState { .. })));

        let stored = memory.load_instance("i-1").unwrap().unwrap();
        assert_eq!(stored.current_state, "rejected");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.path().collect::<Vec<_>>(), vec!["reject"]);
    }

    #[test]
    fn test_retry_succeeds_when_still_legal() {
        let (memory, _) = seeded();
        // The competitor submits first; "reject" is legal from both states.
        let store = Arc::new(RacingStore::new(memory.clone(), 1).firing("submit"));
        let coordinator = ExecutionCoordinator::new(store, RetryPolicy::immediate(3));

        let updated = coordinator.execute("i-1", "reject").unwrap();
        assert_eq!(updated.version, 3);
        assert_eq!(updated.path().collect::<Vec<_>>(), vec!["submit", "reject"]);
    }

    #[test]
    fn test_concurrency_exhausted() {
        let (memory, instance) = seeded();
        let store = Arc::new(RacingStore::new(memory.clone(), u32::MAX));
        let coordinator = ExecutionCoordinator::new(store.clone(), RetryPolicy::immediate(3));

        let err = coordinator.execute("i-1", "submit").unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            CoreError::ConcurrencyExhausted { attempts: 3, .. }
        ));
        assert_eq!(store.saves.load(Ordering::SeqCst), 3);

        // Only the racer's bumps landed; our transition never did.
        let stored = memory.load_instance("i-1").unwrap().unwrap();
        assert_eq!(stored.current_state, instance.current_state);
        assert_eq!(stored.history.len(), 1);
    }

    #[test]
    fn test_store_failure_not_retried() {
        let (memory, _) = seeded();
        let coordinator =
            ExecutionCoordinator::new(Arc::new(FailingStore(memory)), RetryPolicy::immediate(3));

        let err = coordinator.execute("i-1", "submit").unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Backend(_))));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_concurrent_competing_transitions() {
        for _ in 0..20 {
            let (store, _) = seeded();
            let coordinator = Arc::new(ExecutionCoordinator::new(
                store.clone(),
                RetryPolicy::immediate(3),
            ));
            let barrier = Arc::new(Barrier::new(2));

            // Both fire from "draft"; whoever loses sees a state change.
            let handles: Vec<_> = ["submit", "reject"]
                .into_iter()
                .map(|t| {
                    let coordinator = coordinator.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        (t, coordinator.execute("i-1", t))
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let stored = store.load_instance("i-1").unwrap().unwrap();

            match (&results[0].1, &results[1].1) {
                // submit then reject: both legal in sequence
                (Ok(_), Ok(_)) => {
                    assert_eq!(stored.version, 3);
                    assert_eq!(stored.path().collect::<Vec<_>>(), vec!["submit", "reject"]);
                }
                // reject won; submit is no longer legal from "rejected"
                (Err(e), Ok(_)) => {
                    assert!(matches!(e, CoreError::Rejected(_)));
                    assert_eq!(stored.version, 2);
                    assert_eq!(stored.current_state, "rejected");
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
            assert_eq!(stored.history.len() as u64, stored.version);
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 10,
            max_delay_ms: 35,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(35));
        assert_eq!(policy.backoff(200), Duration::from_millis(35));
        assert_eq!(RetryPolicy::immediate(3).backoff(2), Duration::ZERO);
    }
}
