use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sagalog_core::{AvatarId, DomainError, DomainResult, InstanceId, TransactionId};

use crate::event::SagaEvent;
use crate::payload::Payload;

/// Closed set of transaction kinds.
///
/// New kinds are added here; each kind owns a fixed set of payload keys (see
/// `SagaEvent`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    PlayerEntered,
    TriggerActivated,
    TriggerCompleted,
    CharacterSpawned,
    CharacterDefeated,
    QuestTokenAwarded,
    QuestStarted,
    QuestObjectiveProgressed,
    QuestCompleted,
    ItemTraded,
    CurrencyChanged,
    DialogueNodeVisited,
    Heartbeat,
    SagaCompleted,
    SagaFailed,
}

impl TransactionKind {
    /// Stable kind name (matches the serialized form).
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::PlayerEntered => "PlayerEntered",
            TransactionKind::TriggerActivated => "TriggerActivated",
            TransactionKind::TriggerCompleted => "TriggerCompleted",
            TransactionKind::CharacterSpawned => "CharacterSpawned",
            TransactionKind::CharacterDefeated => "CharacterDefeated",
            TransactionKind::QuestTokenAwarded => "QuestTokenAwarded",
            TransactionKind::QuestStarted => "QuestStarted",
            TransactionKind::QuestObjectiveProgressed => "QuestObjectiveProgressed",
            TransactionKind::QuestCompleted => "QuestCompleted",
            TransactionKind::ItemTraded => "ItemTraded",
            TransactionKind::CurrencyChanged => "CurrencyChanged",
            TransactionKind::DialogueNodeVisited => "DialogueNodeVisited",
            TransactionKind::Heartbeat => "Heartbeat",
            TransactionKind::SagaCompleted => "SagaCompleted",
            TransactionKind::SagaFailed => "SagaFailed",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status. Only `Pending -> Committed` and `Pending -> Rejected` exist.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Committed,
    Rejected,
}

/// An immutable domain event recorded in a saga instance's log.
///
/// Created in memory as `Pending` without a sequence. The repository assigns
/// the owning instance and sequence, then commits or rejects it exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    owner: AvatarId,
    payload: Payload,
    /// Client-asserted time; untrusted.
    local_time: DateTime<Utc>,
    /// Authoritative time, set only at commit.
    server_time: Option<DateTime<Utc>>,
    status: TransactionStatus,
    instance_id: Option<InstanceId>,
    sequence: Option<u64>,
}

impl Transaction {
    /// Create a pending transaction with a raw payload.
    pub fn new(
        kind: TransactionKind,
        owner: AvatarId,
        payload: Payload,
        local_time: DateTime<Utc>,
    ) -> Self {
        Self::with_id(TransactionId::new(), kind, owner, payload, local_time)
    }

    pub fn with_id(
        id: TransactionId,
        kind: TransactionKind,
        owner: AvatarId,
        payload: Payload,
        local_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            owner,
            payload,
            local_time,
            server_time: None,
            status: TransactionStatus::Pending,
            instance_id: None,
            sequence: None,
        }
    }

    /// Create a pending transaction from a typed event.
    pub fn from_event(owner: AvatarId, event: &SagaEvent, local_time: DateTime<Utc>) -> Self {
        Self::new(event.kind(), owner, event.to_payload(), local_time)
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn owner(&self) -> AvatarId {
        self.owner
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn local_time(&self) -> DateTime<Utc> {
        self.local_time
    }

    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        self.server_time
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance_id
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Typed view of the payload; `None` if required keys are missing or malformed.
    pub fn event(&self) -> Option<SagaEvent> {
        SagaEvent::decode(self.kind, &self.payload)
    }

    /// Bind the transaction to an instance at a sequence position.
    pub fn assign(&mut self, instance_id: InstanceId, sequence: u64) -> DomainResult<()> {
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::invariant(format!(
                "transaction {} is {:?}, only pending transactions can be sequenced",
                self.id, self.status
            )));
        }
        if self.sequence.is_some() || self.instance_id.is_some() {
            return Err(DomainError::invariant(format!(
                "transaction {} is already sequenced",
                self.id
            )));
        }
        if sequence == 0 {
            return Err(DomainError::validation("sequence numbers start at 1"));
        }
        self.instance_id = Some(instance_id);
        self.sequence = Some(sequence);
        Ok(())
    }

    /// `Pending -> Committed`, stamping the authoritative time.
    pub fn commit(&mut self, server_time: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = TransactionStatus::Committed;
        self.server_time = Some(server_time);
        Ok(())
    }

    /// `Pending -> Rejected`.
    pub fn reject(&mut self) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = TransactionStatus::Rejected;
        Ok(())
    }

    fn ensure_pending(&self) -> DomainResult<()> {
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::conflict(format!(
                "transaction {} is {:?}, not pending",
                self.id, self.status
            )));
        }
        Ok(())
    }
}
