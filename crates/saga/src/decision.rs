//! Pure trigger and fail-condition decisions.
//!
//! These functions only read a template and a state snapshot. The interaction
//! service uses them to decide which transactions to write; previews and UI use
//! them directly.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use sagalog_core::{AvatarId, LocationRef, QuestTokenRef};

use crate::definition::{FailCondition, SagaDefinition, TriggerDefinition};
use crate::position::Position;
use crate::state::{SagaState, TriggerStatus};

/// What the caller knows about the avatar at decision time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarContext {
    pub avatar_id: AvatarId,
    /// Quest tokens held in the avatar's inventory.
    pub inventory: BTreeSet<QuestTokenRef>,
}

impl AvatarContext {
    pub fn new(avatar_id: AvatarId) -> Self {
        Self {
            avatar_id,
            inventory: BTreeSet::new(),
        }
    }

    pub fn holding<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<QuestTokenRef>,
    {
        self.inventory.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Token held either in the inventory or awarded earlier in this saga.
    pub fn holds(&self, token: &QuestTokenRef, state: &SagaState) -> bool {
        self.inventory.contains(token) || state.has_token(token)
    }
}

/// Would `trigger` fire for an avatar standing at `position`?
///
/// Requires: saga not terminal, distance to the saga origin within
/// `enter_radius` (inclusive), trigger not `Completed`, activation limit not
/// reached, and every required token held.
pub fn can_activate_trigger(
    saga: &SagaDefinition,
    trigger: &TriggerDefinition,
    state: &SagaState,
    position: Position,
    avatar: &AvatarContext,
) -> bool {
    if state.status.is_terminal() {
        return false;
    }
    // Written as a negated `<=` so a NaN distance never passes.
    if !(position.distance_to(&saga.origin) <= trigger.enter_radius) {
        return false;
    }
    if state.trigger_status(&trigger.trigger_ref) == TriggerStatus::Completed {
        return false;
    }
    if let Some(max) = trigger.max_activations {
        if state.activation_count(&trigger.trigger_ref) >= max {
            return false;
        }
    }
    trigger
        .required_tokens
        .iter()
        .all(|token| avatar.holds(token, state))
}

/// Every trigger that would fire at `position`, in template order.
pub fn triggers_at_position<'a>(
    saga: &'a SagaDefinition,
    state: &SagaState,
    position: Position,
    avatar: &AvatarContext,
) -> Vec<&'a TriggerDefinition> {
    saga.triggers
        .iter()
        .filter(|trigger| can_activate_trigger(saga, trigger, state, position, avatar))
        .collect()
}

/// First fail condition met by a check at `checked_at` from `location`.
///
/// Returns the failure reason. A started-less or terminal saga never fails.
/// A time limit whose deadline falls outside the representable range never
/// expires.
pub fn evaluate_fail_conditions(
    saga: &SagaDefinition,
    state: &SagaState,
    checked_at: DateTime<Utc>,
    location: Option<&LocationRef>,
) -> Option<String> {
    if state.status.is_terminal() {
        return None;
    }
    let started_at = state.started_at?;

    saga.fail_conditions.iter().find_map(|condition| match condition {
        FailCondition::TimeLimit { seconds } => {
            let deadline = Duration::try_seconds(*seconds)
                .and_then(|limit| started_at.checked_add_signed(limit))?;
            (checked_at > deadline).then(|| format!("time limit of {seconds}s exceeded"))
        }
        FailCondition::LeftLocation { location_ref } => match location {
            Some(current) if current != location_ref => {
                Some(format!("left {location_ref} (now at {current})"))
            }
            _ => None,
        },
    })
}
