//! Typed views over transaction payloads.
//!
//! Each `TransactionKind` has one struct here that knows which payload keys it
//! reads and writes. Call sites build and inspect transactions through these
//! types instead of hand-parsing strings.
//!
//! Decoding is lenient by contract: a missing or malformed required key yields
//! `None`, extra keys are ignored, and optional keys that fail to parse are
//! treated as absent. Old logs therefore keep replaying against newer code.

use chrono::{DateTime, Utc};

use sagalog_core::{
    CharacterInstanceId, CharacterRef, DialogueNodeRef, ItemRef, LocationRef, ObjectiveRef,
    QuestRef, QuestTokenRef, SagaRef, TriggerRef,
};

use crate::payload::{Payload, keys};
use crate::transaction::TransactionKind;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntered {
    pub saga_ref: SagaRef,
}

/// A trigger fired at the avatar's exact position.
///
/// `seed` is the generation seed for everything spawned by this activation.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerActivated {
    pub trigger_ref: TriggerRef,
    pub x: f64,
    pub z: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCompleted {
    pub trigger_ref: TriggerRef,
}

/// A character placed in the world. The position is final; replay never
/// recomputes it.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterSpawned {
    pub character_instance_id: CharacterInstanceId,
    pub character_ref: CharacterRef,
    pub x: f64,
    pub z: f64,
    pub trigger_ref: Option<TriggerRef>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterDefeated {
    pub character_instance_id: CharacterInstanceId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestTokenAwarded {
    pub token_ref: QuestTokenRef,
    pub trigger_ref: Option<TriggerRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestStarted {
    pub quest_ref: QuestRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestObjectiveProgressed {
    pub quest_ref: QuestRef,
    pub objective_ref: ObjectiveRef,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestCompleted {
    pub quest_ref: QuestRef,
}

/// Net item movement: positive received, negative given away.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemTraded {
    pub item_ref: ItemRef,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyChanged {
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogueNodeVisited {
    pub node_ref: DialogueNodeRef,
}

/// A logged fail-condition check: the time and place the check observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub checked_at: DateTime<Utc>,
    pub location_ref: Option<LocationRef>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SagaCompleted {
    pub trigger_ref: Option<TriggerRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SagaFailed {
    pub reason: String,
}

/// Typed event, one variant per `TransactionKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaEvent {
    PlayerEntered(PlayerEntered),
    TriggerActivated(TriggerActivated),
    TriggerCompleted(TriggerCompleted),
    CharacterSpawned(CharacterSpawned),
    CharacterDefeated(CharacterDefeated),
    QuestTokenAwarded(QuestTokenAwarded),
    QuestStarted(QuestStarted),
    QuestObjectiveProgressed(QuestObjectiveProgressed),
    QuestCompleted(QuestCompleted),
    ItemTraded(ItemTraded),
    CurrencyChanged(CurrencyChanged),
    DialogueNodeVisited(DialogueNodeVisited),
    Heartbeat(Heartbeat),
    SagaCompleted(SagaCompleted),
    SagaFailed(SagaFailed),
}

impl SagaEvent {
    pub fn kind(&self) -> TransactionKind {
        match self {
            SagaEvent::PlayerEntered(_) => TransactionKind::PlayerEntered,
            SagaEvent::TriggerActivated(_) => TransactionKind::TriggerActivated,
            SagaEvent::TriggerCompleted(_) => TransactionKind::TriggerCompleted,
            SagaEvent::CharacterSpawned(_) => TransactionKind::CharacterSpawned,
            SagaEvent::CharacterDefeated(_) => TransactionKind::CharacterDefeated,
            SagaEvent::QuestTokenAwarded(_) => TransactionKind::QuestTokenAwarded,
            SagaEvent::QuestStarted(_) => TransactionKind::QuestStarted,
            SagaEvent::QuestObjectiveProgressed(_) => TransactionKind::QuestObjectiveProgressed,
            SagaEvent::QuestCompleted(_) => TransactionKind::QuestCompleted,
            SagaEvent::ItemTraded(_) => TransactionKind::ItemTraded,
            SagaEvent::CurrencyChanged(_) => TransactionKind::CurrencyChanged,
            SagaEvent::DialogueNodeVisited(_) => TransactionKind::DialogueNodeVisited,
            SagaEvent::Heartbeat(_) => TransactionKind::Heartbeat,
            SagaEvent::SagaCompleted(_) => TransactionKind::SagaCompleted,
            SagaEvent::SagaFailed(_) => TransactionKind::SagaFailed,
        }
    }

    /// Encode into the payload bag.
    ///
    /// Floats use the shortest representation that parses back to the same
    /// value, so a decoded position is bit-identical to the encoded one.
    pub fn to_payload(&self) -> Payload {
        let p = Payload::new();
        match self {
            SagaEvent::PlayerEntered(e) => p.with(keys::SAGA_REF, &e.saga_ref),
            SagaEvent::TriggerActivated(e) => p
                .with(keys::TRIGGER_REF, &e.trigger_ref)
                .with(keys::X, e.x)
                .with(keys::Z, e.z)
                .with(keys::SEED, e.seed),
            SagaEvent::TriggerCompleted(e) => p.with(keys::TRIGGER_REF, &e.trigger_ref),
            SagaEvent::CharacterSpawned(e) => {
                let mut p = p
                    .with(keys::CHARACTER_INSTANCE_ID, e.character_instance_id)
                    .with(keys::CHARACTER_REF, &e.character_ref)
                    .with(keys::X, e.x)
                    .with(keys::Z, e.z);
                if let Some(trigger_ref) = &e.trigger_ref {
                    p = p.with(keys::TRIGGER_REF, trigger_ref);
                }
                if let Some(seed) = e.seed {
                    p = p.with(keys::SEED, seed);
                }
                p
            }
            SagaEvent::CharacterDefeated(e) => {
                p.with(keys::CHARACTER_INSTANCE_ID, e.character_instance_id)
            }
            SagaEvent::QuestTokenAwarded(e) => {
                let p = p.with(keys::QUEST_TOKEN_REF, &e.token_ref);
                match &e.trigger_ref {
                    Some(trigger_ref) => p.with(keys::TRIGGER_REF, trigger_ref),
                    None => p,
                }
            }
            SagaEvent::QuestStarted(e) => p.with(keys::QUEST_REF, &e.quest_ref),
            SagaEvent::QuestObjectiveProgressed(e) => p
                .with(keys::QUEST_REF, &e.quest_ref)
                .with(keys::OBJECTIVE_REF, &e.objective_ref)
                .with(keys::AMOUNT, e.amount),
            SagaEvent::QuestCompleted(e) => p.with(keys::QUEST_REF, &e.quest_ref),
            SagaEvent::ItemTraded(e) => p
                .with(keys::ITEM_REF, &e.item_ref)
                .with(keys::QUANTITY, e.quantity),
            SagaEvent::CurrencyChanged(e) => p.with(keys::DELTA, e.delta),
            SagaEvent::DialogueNodeVisited(e) => p.with(keys::DIALOGUE_NODE_REF, &e.node_ref),
            SagaEvent::Heartbeat(e) => {
                let p = p.with(keys::CHECKED_AT, e.checked_at.to_rfc3339());
                match &e.location_ref {
                    Some(location_ref) => p.with(keys::LOCATION_REF, location_ref),
                    None => p,
                }
            }
            SagaEvent::SagaCompleted(e) => match &e.trigger_ref {
                Some(trigger_ref) => p.with(keys::TRIGGER_REF, trigger_ref),
                None => p,
            },
            SagaEvent::SagaFailed(e) => p.with(keys::REASON, &e.reason),
        }
    }

    /// Decode a payload for the given kind; `None` if it is unusable.
    pub fn decode(kind: TransactionKind, payload: &Payload) -> Option<Self> {
        let event = match kind {
            TransactionKind::PlayerEntered => SagaEvent::PlayerEntered(PlayerEntered {
                saga_ref: text(payload, keys::SAGA_REF)?,
            }),
            TransactionKind::TriggerActivated => SagaEvent::TriggerActivated(TriggerActivated {
                trigger_ref: text(payload, keys::TRIGGER_REF)?,
                x: payload.parse_f64(keys::X)?,
                z: payload.parse_f64(keys::Z)?,
                seed: payload.parse(keys::SEED)?,
            }),
            TransactionKind::TriggerCompleted => SagaEvent::TriggerCompleted(TriggerCompleted {
                trigger_ref: text(payload, keys::TRIGGER_REF)?,
            }),
            TransactionKind::CharacterSpawned => SagaEvent::CharacterSpawned(CharacterSpawned {
                character_instance_id: payload.parse(keys::CHARACTER_INSTANCE_ID)?,
                character_ref: text(payload, keys::CHARACTER_REF)?,
                x: payload.parse_f64(keys::X)?,
                z: payload.parse_f64(keys::Z)?,
                trigger_ref: text(payload, keys::TRIGGER_REF),
                seed: payload.parse(keys::SEED),
            }),
            TransactionKind::CharacterDefeated => {
                SagaEvent::CharacterDefeated(CharacterDefeated {
                    character_instance_id: payload.parse(keys::CHARACTER_INSTANCE_ID)?,
                })
            }
            TransactionKind::QuestTokenAwarded => {
                SagaEvent::QuestTokenAwarded(QuestTokenAwarded {
                    token_ref: text(payload, keys::QUEST_TOKEN_REF)?,
                    trigger_ref: text(payload, keys::TRIGGER_REF),
                })
            }
            TransactionKind::QuestStarted => SagaEvent::QuestStarted(QuestStarted {
                quest_ref: text(payload, keys::QUEST_REF)?,
            }),
            TransactionKind::QuestObjectiveProgressed => {
                SagaEvent::QuestObjectiveProgressed(QuestObjectiveProgressed {
                    quest_ref: text(payload, keys::QUEST_REF)?,
                    objective_ref: text(payload, keys::OBJECTIVE_REF)?,
                    amount: payload.parse(keys::AMOUNT)?,
                })
            }
            TransactionKind::QuestCompleted => SagaEvent::QuestCompleted(QuestCompleted {
                quest_ref: text(payload, keys::QUEST_REF)?,
            }),
            TransactionKind::ItemTraded => SagaEvent::ItemTraded(ItemTraded {
                item_ref: text(payload, keys::ITEM_REF)?,
                quantity: payload.parse(keys::QUANTITY)?,
            }),
            TransactionKind::CurrencyChanged => SagaEvent::CurrencyChanged(CurrencyChanged {
                delta: payload.parse(keys::DELTA)?,
            }),
            TransactionKind::DialogueNodeVisited => {
                SagaEvent::DialogueNodeVisited(DialogueNodeVisited {
                    node_ref: text(payload, keys::DIALOGUE_NODE_REF)?,
                })
            }
            TransactionKind::Heartbeat => SagaEvent::Heartbeat(Heartbeat {
                checked_at: payload
                    .get(keys::CHECKED_AT)
                    .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                    .map(|t| t.with_timezone(&Utc))?,
                location_ref: text(payload, keys::LOCATION_REF),
            }),
            TransactionKind::SagaCompleted => SagaEvent::SagaCompleted(SagaCompleted {
                trigger_ref: text(payload, keys::TRIGGER_REF),
            }),
            TransactionKind::SagaFailed => SagaEvent::SagaFailed(SagaFailed {
                reason: payload.get(keys::REASON).unwrap_or_default().to_string(),
            }),
        };
        Some(event)
    }
}

/// Non-empty string value converted into a reference type.
fn text<T: From<String>>(payload: &Payload, key: &str) -> Option<T> {
    payload
        .get(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| T::from(v.to_string()))
}
