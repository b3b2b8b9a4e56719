//! Running instances of a definition.

use crate::definition::{Definition, Transition};
use crate::error::Violation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transition id recorded as the first history entry of every instance.
pub const STARTED: &str = "started";

/// One entry in an instance's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Transition applied, or [`STARTED`] for the initial record.
    pub transition: String,

    /// State the instance left. `None` for the initial record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// State the instance entered.
    pub to: String,

    pub at: DateTime<Utc>,
}

/// A workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance ID.
    pub id: String,

    /// Owning definition.
    pub definition_id: String,

    /// Current state in the definition.
    pub current_state: String,

    pub history: Vec<HistoryRecord>,

    /// Optimistic concurrency version. Starts at 1, bumped by every
    /// committed transition.
    pub version: u64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Starts a new instance in the definition's initial state.
    pub fn start(id: impl Into<String>, definition: &Definition) -> Result<Self, Violation> {
        let initial = definition
            .initial_state()
            .ok_or(Violation::NoInitialState)?;
        let now = Utc::now();

        Ok(Self {
            id: id.into(),
            definition_id: definition.id.clone(),
            current_state: initial.id.clone(),
            history: vec![HistoryRecord {
                transition: STARTED.to_string(),
                from: None,
                to: initial.id.clone(),
                at: now,
            }],
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves the instance along `transition`. Legality is the caller's
    /// concern, see [`crate::machine::can_fire`].
    pub fn apply(&mut self, transition: &Transition) {
        let now = Utc::now();
        let from = std::mem::replace(&mut self.current_state, transition.to.clone());
        self.history.push(HistoryRecord {
            transition: transition.id.clone(),
            from: Some(from),
            to: transition.to.clone(),
            at: now,
        });
        self.version += 1;
        self.updated_at = now;
    }

    /// Returns the most recent history entry.
    pub fn last_record(&self) -> Option<&HistoryRecord> {
        self.history.last()
    }

    /// Returns the ids of every transition applied so far, oldest first,
    /// excluding the initial record.
    pub fn path(&self) -> impl Iterator<Item = &str> {
        self.history.iter().skip(1).map(|r| r.transition.as_str())
    }
}
