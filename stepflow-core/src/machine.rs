//! Single-instance transition rules.

use crate::definition::{Definition, Transition};
use crate::error::Violation;
use crate::instance::Instance;

/// Decides whether `transition` may fire for `instance` right now.
///
/// Checks, in order: the transition is enabled, it lists the current state
/// as a source, the current state is not final, the current state is
/// enabled, and the target exists and is enabled. Never mutates anything.
pub fn can_fire(
    instance: &Instance,
    transition: &Transition,
    definition: &Definition,
) -> Result<(), Violation> {
    if !transition.enabled {
        return Err(Violation::TransitionDisabled {
            transition: transition.id.clone(),
        });
    }

    if !transition.fires_from(&instance.current_state) {
        return Err(Violation::NotFromState {
            transition: transition.id.clone(),
            state: instance.current_state.clone(),
        });
    }

    let current = definition
        .state(&instance.current_state)
        .ok_or_else(|| Violation::UnknownState {
            state: instance.current_state.clone(),
        })?;

    // Final states are terminal whatever the transition list says.
    if current.is_final {
        return Err(Violation::FinalState {
            state: current.id.clone(),
        });
    }

    if !current.enabled {
        return Err(Violation::StateDisabled {
            state: current.id.clone(),
        });
    }

    match definition.state(&transition.to) {
        None => Err(Violation::UnknownState {
            state: transition.to.clone(),
        }),
        Some(target) if !target.enabled => Err(Violation::TargetDisabled {
            transition: transition.id.clone(),
            state: target.id.clone(),
        }),
        Some(_) => Ok(()),
    }
}

/// Returns the ids of every transition that may fire from the instance's
/// current state, in declaration order.
pub fn available_transitions<'a>(instance: &Instance, definition: &'a Definition) -> Vec<&'a str> {
    definition
        .transitions_from(&instance.current_state)
        .filter(|t| can_fire(instance, t, definition).is_ok())
        .map(|t| t.id.as_str())
        .collect()
}
