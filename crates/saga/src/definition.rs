//! Authored saga templates.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use sagalog_core::{
    CharacterRef, DomainError, DomainResult, LocationRef, QuestTokenRef, SagaRef, TriggerRef,
};

use crate::position::Position;

/// A quest/story arc bound to a world location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub saga_ref: SagaRef,
    /// Center of every trigger's geofence.
    pub origin: Position,
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
    /// Completing this trigger completes the saga.
    #[serde(default)]
    pub completion_trigger: Option<TriggerRef>,
    #[serde(default)]
    pub fail_conditions: Vec<FailCondition>,
}

/// A circular geofence around the saga origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub trigger_ref: TriggerRef,
    /// Inclusive activation radius.
    pub enter_radius: f64,
    /// All of these must be held for the trigger to fire.
    #[serde(default)]
    pub required_tokens: BTreeSet<QuestTokenRef>,
    /// Awarded once per activation, in order.
    #[serde(default)]
    pub grants_tokens: Vec<QuestTokenRef>,
    #[serde(default)]
    pub spawns: Vec<SpawnEntry>,
    /// Emit `TriggerCompleted` right after the activation.
    #[serde(default)]
    pub complete_on_activation: bool,
    /// Upper bound on activations; `None` means unlimited.
    #[serde(default)]
    pub max_activations: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnEntry {
    pub character_ref: CharacterRef,
    pub count: u32,
}

/// Conditions under which an active saga fails.
///
/// Evaluated only against data logged in a `Heartbeat`, never against the
/// current wall clock at replay time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailCondition {
    /// Fails once `seconds` have elapsed since the saga started.
    TimeLimit { seconds: i64 },
    /// Fails when a check observes the avatar outside `location_ref`.
    LeftLocation { location_ref: LocationRef },
}

impl SagaDefinition {
    pub fn new(saga_ref: impl Into<SagaRef>, origin: Position) -> Self {
        Self {
            saga_ref: saga_ref.into(),
            origin,
            triggers: Vec::new(),
            completion_trigger: None,
            fail_conditions: Vec::new(),
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerDefinition) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn completed_by(mut self, trigger_ref: impl Into<TriggerRef>) -> Self {
        self.completion_trigger = Some(trigger_ref.into());
        self
    }

    pub fn failing_when(mut self, condition: FailCondition) -> Self {
        self.fail_conditions.push(condition);
        self
    }

    pub fn trigger(&self, trigger_ref: &TriggerRef) -> Option<&TriggerDefinition> {
        self.triggers.iter().find(|t| &t.trigger_ref == trigger_ref)
    }

    /// Structural checks run before a template is accepted into a catalog.
    pub fn validate(&self) -> DomainResult<()> {
        if self.saga_ref.as_str().trim().is_empty() {
            return Err(DomainError::validation("saga_ref cannot be empty"));
        }
        if !self.origin.x.is_finite() || !self.origin.z.is_finite() {
            return Err(DomainError::validation(format!(
                "saga {} has a non-finite origin",
                self.saga_ref
            )));
        }

        let mut seen = HashSet::new();
        for trigger in &self.triggers {
            if !seen.insert(&trigger.trigger_ref) {
                return Err(DomainError::validation(format!(
                    "duplicate trigger {} in saga {}",
                    trigger.trigger_ref, self.saga_ref
                )));
            }
            if !trigger.enter_radius.is_finite() || trigger.enter_radius < 0.0 {
                return Err(DomainError::validation(format!(
                    "trigger {} has an invalid enter_radius {}",
                    trigger.trigger_ref, trigger.enter_radius
                )));
            }
        }

        if let Some(completion) = &self.completion_trigger {
            if self.trigger(completion).is_none() {
                return Err(DomainError::invariant(format!(
                    "completion trigger {completion} is not defined in saga {}",
                    self.saga_ref
                )));
            }
        }

        for condition in &self.fail_conditions {
            if let FailCondition::TimeLimit { seconds } = condition {
                if *seconds <= 0 {
                    return Err(DomainError::validation("time limit must be positive"));
                }
            }
        }

        Ok(())
    }
}

impl TriggerDefinition {
    pub fn new(trigger_ref: impl Into<TriggerRef>, enter_radius: f64) -> Self {
        Self {
            trigger_ref: trigger_ref.into(),
            enter_radius,
            required_tokens: BTreeSet::new(),
            grants_tokens: Vec::new(),
            spawns: Vec::new(),
            complete_on_activation: false,
            max_activations: None,
        }
    }

    pub fn requiring<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<QuestTokenRef>,
    {
        self.required_tokens.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn granting(mut self, token: impl Into<QuestTokenRef>) -> Self {
        self.grants_tokens.push(token.into());
        self
    }

    pub fn spawning(mut self, character_ref: impl Into<CharacterRef>, count: u32) -> Self {
        self.spawns.push(SpawnEntry {
            character_ref: character_ref.into(),
            count,
        });
        self
    }

    pub fn completing_on_activation(mut self) -> Self {
        self.complete_on_activation = true;
        self
    }

    pub fn limited_to(mut self, max_activations: u32) -> Self {
        self.max_activations = Some(max_activations);
        self
    }

    /// Characters to spawn per activation, entries expanded by `count`.
    pub fn spawn_list(&self) -> Vec<&CharacterRef> {
        self.spawns
            .iter()
            .flat_map(|entry| std::iter::repeat_n(&entry.character_ref, entry.count as usize))
            .collect()
    }
}
