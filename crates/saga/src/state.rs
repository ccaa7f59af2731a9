//! Derived gameplay state of one saga instance.
//!
//! `SagaState` is a cache: it is always rebuilt from committed transactions and
//! never persisted as a source of truth. Every collection is ordered so two
//! replays of the same log compare (and serialize) identically.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sagalog_core::{
    CharacterInstanceId, CharacterRef, DialogueNodeRef, ItemRef, LocationRef, ObjectiveRef,
    QuestRef, QuestTokenRef, SagaRef, TriggerRef,
};

use crate::position::Position;

/// Saga lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SagaStatus {
    /// No committed transaction yet.
    #[default]
    NotStarted,
    Active,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerStatus {
    #[default]
    Inactive,
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerState {
    pub status: TriggerStatus,
    pub activation_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    pub character_ref: CharacterRef,
    pub is_alive: bool,
    pub position: Position,
    pub defeated_at: Option<DateTime<Utc>>,
    pub spawned_by: Option<TriggerRef>,
}

/// Per-objective counters of one quest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuestProgress {
    pub objectives: BTreeMap<ObjectiveRef, i64>,
}

impl QuestProgress {
    pub fn objective(&self, objective_ref: &ObjectiveRef) -> i64 {
        self.objectives.get(objective_ref).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SagaState {
    pub saga_ref: SagaRef,
    pub status: SagaStatus,
    pub triggers: BTreeMap<TriggerRef, TriggerState>,
    pub characters: BTreeMap<CharacterInstanceId, CharacterState>,
    pub active_quests: BTreeMap<QuestRef, QuestProgress>,
    pub completed_quests: BTreeMap<QuestRef, QuestProgress>,
    /// Committed transactions folded into this state.
    pub transaction_count: u64,
    pub last_sequence: u64,
    /// Server time of the first committed transaction.
    pub started_at: Option<DateTime<Utc>>,

    // Avatar-scoped counters consumed by quest evaluation.
    pub quest_tokens: BTreeSet<QuestTokenRef>,
    pub currency: i64,
    pub items: BTreeMap<ItemRef, i64>,
    pub dialogue_nodes_visited: BTreeSet<DialogueNodeRef>,
    pub defeat_counts: BTreeMap<CharacterRef, u32>,

    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_location: Option<LocationRef>,
    pub fail_reason: Option<String>,
}

impl SagaState {
    pub fn new(saga_ref: SagaRef) -> Self {
        Self {
            saga_ref,
            ..Self::default()
        }
    }

    /// Status of a trigger; triggers never mentioned in the log are `Inactive`.
    pub fn trigger_status(&self, trigger_ref: &TriggerRef) -> TriggerStatus {
        self.triggers
            .get(trigger_ref)
            .map(|t| t.status)
            .unwrap_or_default()
    }

    pub fn activation_count(&self, trigger_ref: &TriggerRef) -> u32 {
        self.triggers
            .get(trigger_ref)
            .map(|t| t.activation_count)
            .unwrap_or(0)
    }

    pub fn has_token(&self, token: &QuestTokenRef) -> bool {
        self.quest_tokens.contains(token)
    }

    pub fn alive_characters(&self) -> impl Iterator<Item = (&CharacterInstanceId, &CharacterState)> {
        self.characters.iter().filter(|(_, c)| c.is_alive)
    }

    pub fn is_quest_completed(&self, quest_ref: &QuestRef) -> bool {
        self.completed_quests.contains_key(quest_ref)
    }
}
