//! Workflow definition types.
//!
//! Definitions are submitted as JSON (or YAML, converted by the caller):
//!
//! ```json
//! {
//!   "id": "review",
//!   "states": [
//!     {"id": "draft", "initial": true},
//!     {"id": "submitted"},
//!     {"id": "approved", "final": true}
//!   ],
//!   "transitions": [
//!     {"id": "submit", "from": "draft", "to": "submitted"},
//!     {"id": "approve", "from": ["submitted"], "to": "approved"}
//!   ]
//! }
//! ```
//!
//! A [`DefinitionRequest`] is untrusted input. Only the validator produces a
//! [`Definition`], which is immutable from then on.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn enabled_by_default() -> bool {
    true
}

/// A state in a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: String,

    /// New instances start here. Exactly one state per definition.
    #[serde(default, rename = "initial", alias = "isInitial")]
    pub is_initial: bool,

    /// Terminal: nothing ever fires from a final state.
    #[serde(default, rename = "final", alias = "isFinal")]
    pub is_final: bool,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl State {
    /// A non-initial, non-final state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_initial: false,
            is_final: false,
            enabled: true,
        }
    }

    pub fn initial(id: impl Into<String>) -> Self {
        Self {
            is_initial: true,
            ..Self::new(id)
        }
    }

    pub fn terminal(id: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::new(id)
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A named transition from a set of source states to one target state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,

    /// Source state(s). Accepts a single string or an array.
    #[serde(alias = "fromStates", deserialize_with = "deserialize_from_states")]
    pub from: Vec<String>,

    /// Target state.
    #[serde(alias = "toState")]
    pub to: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl Transition {
    pub fn new<I, S>(id: impl Into<String>, from: I, to: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            from: from.into_iter().map(Into::into).collect(),
            to: to.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns true if this transition lists `state` among its sources.
    pub fn fires_from(&self, state: &str) -> bool {
        self.from.iter().any(|s| s == state)
    }
}

fn deserialize_from_states<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct FromStatesVisitor;

    impl<'de> Visitor<'de> for FromStatesVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a state id or an array of state ids")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut states = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                states.push(s);
            }
            Ok(states)
        }
    }

    deserializer.deserialize_any(FromStatesVisitor)
}

/// An unvalidated definition as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionRequest {
    pub id: String,

    #[serde(default)]
    pub states: Vec<State>,

    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl DefinitionRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Parses a request from a JSON document.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        Ok(serde_json::from_value(json.clone())?)
    }

    /// CRC32C over every field, in declaration order.
    pub fn checksum(&self) -> String {
        fn field(crc: u32, bytes: &[u8]) -> u32 {
            // NUL separator keeps ("ab", "c") distinct from ("a", "bc")
            crc32c::crc32c_append(crc32c::crc32c_append(crc, bytes), &[0])
        }

        let mut crc = field(0, self.id.as_bytes());
        for s in &self.states {
            crc = field(crc, s.id.as_bytes());
            crc = field(
                crc,
                &[s.is_initial as u8, s.is_final as u8, s.enabled as u8],
            );
        }
        for t in &self.transitions {
            crc = field(crc, t.id.as_bytes());
            for from in &t.from {
                crc = field(crc, from.as_bytes());
            }
            crc = field(crc, b"->");
            crc = field(crc, t.to.as_bytes());
            crc = field(crc, &[t.enabled as u8]);
        }
        format!("{:08x}", crc)
    }
}

/// A validated, immutable definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: String,

    pub states: Vec<State>,

    pub transitions: Vec<Transition>,

    /// Checksum of the request this definition was built from.
    pub checksum: String,

    pub created_at: DateTime<Utc>,
}

impl Definition {
    /// Builds a definition from a request that has already passed validation.
    pub(crate) fn from_validated(request: DefinitionRequest) -> Self {
        let checksum = request.checksum();
        Self {
            id: request.id,
            states: request.states,
            transitions: request.transitions,
            checksum,
            created_at: Utc::now(),
        }
    }

    /// Looks up a state by id.
    pub fn state(&self, id: &str) -> Option<&State> {
        self.states.iter().find(|s| s.id == id)
    }

    /// Looks up a transition by id.
    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    /// Returns the unique initial state.
    pub fn initial_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.is_initial)
    }

    /// Returns all transitions that list `state` as a source.
    pub fn transitions_from<'a, 's>(
        &'a self,
        state: &'s str,
    ) -> impl Iterator<Item = &'a Transition> + 's
    where
        'a: 's,
    {
        self.transitions.iter().filter(move |t| t.fires_from(state))
    }

    /// Returns the request this definition was built from.
    pub fn to_request(&self) -> DefinitionRequest {
        DefinitionRequest {
            id: self.id.clone(),
            states: self.states.clone(),
            transitions: self.transitions.clone(),
        }
    }
}
