//! Deterministic fold of a committed transaction log into `SagaState`.
//!
//! Rules:
//! - only `Committed` transactions are folded, in `sequence` order;
//! - a transaction whose payload does not decode is skipped entirely;
//! - no clock, RNG or hash-ordered collection is consulted. Times come from
//!   the transactions themselves (`server_time`, `Heartbeat.checked_at`) and
//!   spawn positions are read from the payload, never recomputed.

use sagalog_core::{EventFold, SagaRef};
use sagalog_events::{SagaEvent, SagaInstance, Transaction};

use crate::position::Position;
use crate::state::{CharacterState, QuestProgress, SagaState, SagaStatus, TriggerStatus};

/// Replay an instance's committed log.
pub fn replay(instance: &SagaInstance) -> SagaState {
    replay_transactions(instance.saga_ref(), instance.transactions().as_slice())
}

/// Replay an arbitrary list of transactions for `saga_ref`.
///
/// Input order does not matter; transactions are ordered by sequence here.
pub fn replay_transactions(saga_ref: &SagaRef, transactions: &[Transaction]) -> SagaState {
    let mut committed: Vec<&Transaction> =
        transactions.iter().filter(|t| t.is_committed()).collect();
    committed.sort_by_key(|t| t.sequence().unwrap_or(u64::MAX));

    let mut state = SagaState::new(saga_ref.clone());
    for tx in committed {
        state.apply(tx);
    }
    state
}

impl EventFold<Transaction> for SagaState {
    fn apply(&mut self, tx: &Transaction) {
        if !tx.is_committed() {
            return;
        }
        let Some(event) = tx.event() else {
            tracing::debug!(
                transaction_id = %tx.id(),
                kind = %tx.kind(),
                "skipping transaction with unusable payload"
            );
            return;
        };

        self.transaction_count += 1;
        if let Some(seq) = tx.sequence() {
            self.last_sequence = self.last_sequence.max(seq);
        }
        if self.started_at.is_none() {
            self.started_at = tx.server_time();
        }
        if self.status == SagaStatus::NotStarted {
            self.status = SagaStatus::Active;
        }

        match event {
            SagaEvent::PlayerEntered(_) => {}
            SagaEvent::TriggerActivated(e) => {
                let trigger = self.triggers.entry(e.trigger_ref).or_default();
                if trigger.status != TriggerStatus::Completed {
                    trigger.status = TriggerStatus::Active;
                }
                trigger.activation_count = trigger.activation_count.saturating_add(1);
            }
            SagaEvent::TriggerCompleted(e) => {
                self.triggers.entry(e.trigger_ref).or_default().status = TriggerStatus::Completed;
            }
            SagaEvent::CharacterSpawned(e) => {
                // First spawn wins; a replayed duplicate id must not move a character.
                self.characters
                    .entry(e.character_instance_id)
                    .or_insert_with(|| CharacterState {
                        character_ref: e.character_ref,
                        is_alive: true,
                        position: Position::new(e.x, e.z),
                        defeated_at: None,
                        spawned_by: e.trigger_ref,
                    });
            }
            SagaEvent::CharacterDefeated(e) => {
                if let Some(character) = self.characters.get_mut(&e.character_instance_id) {
                    if character.is_alive {
                        character.is_alive = false;
                        character.defeated_at = tx.server_time();
                        let count = self
                            .defeat_counts
                            .entry(character.character_ref.clone())
                            .or_insert(0);
                        *count = count.saturating_add(1);
                    }
                }
            }
            SagaEvent::QuestTokenAwarded(e) => {
                self.quest_tokens.insert(e.token_ref);
            }
            SagaEvent::QuestStarted(e) => {
                if !self.completed_quests.contains_key(&e.quest_ref) {
                    self.active_quests.entry(e.quest_ref).or_default();
                }
            }
            SagaEvent::QuestObjectiveProgressed(e) => {
                if !self.completed_quests.contains_key(&e.quest_ref) {
                    let quest = self.active_quests.entry(e.quest_ref).or_default();
                    let counter = quest.objectives.entry(e.objective_ref).or_insert(0);
                    *counter = counter.saturating_add(e.amount);
                }
            }
            SagaEvent::QuestCompleted(e) => {
                if !self.completed_quests.contains_key(&e.quest_ref) {
                    let progress = self
                        .active_quests
                        .remove(&e.quest_ref)
                        .unwrap_or_else(QuestProgress::default);
                    self.completed_quests.insert(e.quest_ref, progress);
                }
            }
            SagaEvent::ItemTraded(e) => {
                let held = self.items.entry(e.item_ref).or_insert(0);
                *held = held.saturating_add(e.quantity);
            }
            SagaEvent::CurrencyChanged(e) => {
                self.currency = self.currency.saturating_add(e.delta);
            }
            SagaEvent::DialogueNodeVisited(e) => {
                self.dialogue_nodes_visited.insert(e.node_ref);
            }
            SagaEvent::Heartbeat(e) => {
                self.last_heartbeat = Some(e.checked_at);
                self.last_location = e.location_ref;
            }
            SagaEvent::SagaCompleted(_) => {
                if self.status == SagaStatus::Active {
                    self.status = SagaStatus::Completed;
                }
            }
            SagaEvent::SagaFailed(e) => {
                if self.status == SagaStatus::Active {
                    self.status = SagaStatus::Failed;
                    self.fail_reason = Some(e.reason);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use sagalog_core::{
        AvatarId, CharacterInstanceId, CharacterRef, InstanceId, ItemRef, ObjectiveRef, QuestRef,
        QuestTokenRef, TriggerRef,
    };
    use sagalog_events::{
        CharacterDefeated, CharacterSpawned, CurrencyChanged, InstanceRecord, ItemTraded, Payload,
        PlayerEntered, QuestCompleted, QuestObjectiveProgressed, QuestStarted, QuestTokenAwarded,
        SagaCompleted, SagaFailed, TransactionKind, TransactionLog, TriggerActivated,
        TriggerCompleted,
    };

    use crate::state::TriggerState;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    /// Builds committed logs with contiguous sequences and predictable times.
    struct LogBuilder {
        instance_id: InstanceId,
        owner: AvatarId,
        next: u64,
        txs: Vec<Transaction>,
    }

    impl LogBuilder {
        fn new() -> Self {
            Self {
                instance_id: InstanceId::new(),
                owner: AvatarId::new(),
                next: 1,
                txs: Vec::new(),
            }
        }

        fn raw(&mut self, kind: TransactionKind, payload: Payload) -> &mut Self {
            let mut tx = Transaction::new(kind, self.owner, payload, t0());
            tx.assign(self.instance_id, self.next).unwrap();
            tx.commit(t0() + Duration::seconds(self.next as i64)).unwrap();
            self.next += 1;
            self.txs.push(tx);
            self
        }

        fn commit(&mut self, event: SagaEvent) -> &mut Self {
            self.raw(event.kind(), event.to_payload())
        }

        fn pending(&mut self, event: SagaEvent) -> &mut Self {
            let mut tx = Transaction::from_event(self.owner, &event, t0());
            tx.assign(self.instance_id, self.next).unwrap();
            self.next += 1;
            self.txs.push(tx);
            self
        }

        fn instance(&self) -> SagaInstance {
            let record = InstanceRecord {
                instance_id: self.instance_id,
                saga_ref: SagaRef::new("Hunt"),
                owner_avatar_id: self.owner,
                created_at: t0(),
            };
            SagaInstance::new(record, TransactionLog::new(self.txs.clone()))
        }
    }

    fn spawned(id: CharacterInstanceId, name: &str, x: f64, z: f64) -> SagaEvent {
        SagaEvent::CharacterSpawned(CharacterSpawned {
            character_instance_id: id,
            character_ref: CharacterRef::new(name),
            x,
            z,
            trigger_ref: Some(TriggerRef::new("Hunt")),
            seed: Some(42),
        })
    }

    fn activated(trigger: &str) -> SagaEvent {
        SagaEvent::TriggerActivated(TriggerActivated {
            trigger_ref: TriggerRef::new(trigger),
            x: 1.0,
            z: 2.0,
            seed: 42,
        })
    }

    #[test]
    fn empty_log_is_not_started() {
        let state = replay(&LogBuilder::new().instance());
        assert_eq!(state.status, SagaStatus::NotStarted);
        assert_eq!(state.transaction_count, 0);
        assert_eq!(state.saga_ref, SagaRef::new("Hunt"));
    }

    #[test]
    fn hunt_scenario_replays_to_expected_state() {
        let guard = CharacterInstanceId::new();
        let mut log = LogBuilder::new();
        log.commit(SagaEvent::PlayerEntered(PlayerEntered {
            saga_ref: SagaRef::new("Hunt"),
        }))
        .commit(activated("Hunt"))
        .commit(spawned(guard, "Guard", 15.23, 8.71))
        .commit(SagaEvent::CharacterDefeated(CharacterDefeated {
            character_instance_id: guard,
        }));

        let state = replay(&log.instance());
        assert_eq!(state.status, SagaStatus::Active);
        assert_eq!(
            state.triggers.get(&TriggerRef::new("Hunt")),
            Some(&TriggerState {
                status: TriggerStatus::Active,
                activation_count: 1
            })
        );
        let character = &state.characters[&guard];
        assert_eq!(character.character_ref, CharacterRef::new("Guard"));
        assert!(!character.is_alive);
        assert_eq!(character.defeated_at, Some(t0() + Duration::seconds(4)));
        assert_eq!(state.defeat_counts[&CharacterRef::new("Guard")], 1);
        assert_eq!(state.transaction_count, 4);
        assert_eq!(state.last_sequence, 4);
        assert_eq!(state.started_at, Some(t0() + Duration::seconds(1)));
    }

    #[test]
    fn spawn_position_comes_from_the_payload_verbatim() {
        let id = CharacterInstanceId::new();
        let payload: Payload = [
            ("CharacterInstanceId", id.to_string()),
            ("CharacterRef", "Guard".to_string()),
            ("X", "15.23".to_string()),
            ("Z", "8.71".to_string()),
            ("Seed", "42".to_string()),
        ]
        .into_iter()
        .collect();
        let mut log = LogBuilder::new();
        log.raw(TransactionKind::CharacterSpawned, payload);
        let instance = log.instance();

        let first = replay(&instance);
        let second = replay(&instance);
        assert_eq!(first.characters[&id].position, Position::new(15.23, 8.71));
        assert_eq!(first, second);
    }

    #[test]
    fn pending_and_rejected_transactions_are_ignored() {
        let mut log = LogBuilder::new();
        log.commit(activated("Gate")).pending(activated("Gate"));
        let mut rejected = Transaction::from_event(AvatarId::new(), &activated("Gate"), t0());
        rejected.assign(log.instance_id, 99).unwrap();
        rejected.reject().unwrap();
        log.txs.push(rejected);

        let state = replay(&log.instance());
        assert_eq!(state.activation_count(&TriggerRef::new("Gate")), 1);
        assert_eq!(state.transaction_count, 1);
    }

    #[test]
    fn fold_uses_sequence_order_not_input_order() {
        let mut log = LogBuilder::new();
        log.commit(activated("Gate")).commit(SagaEvent::TriggerCompleted(TriggerCompleted {
            trigger_ref: TriggerRef::new("Gate"),
        }));
        let mut reversed = log.txs.clone();
        reversed.reverse();

        let state = replay_transactions(&SagaRef::new("Hunt"), &reversed);
        assert_eq!(state.trigger_status(&TriggerRef::new("Gate")), TriggerStatus::Completed);
        assert_eq!(state, replay(&log.instance()));
    }

    #[test]
    fn completed_trigger_is_not_downgraded_by_later_activation() {
        let mut log = LogBuilder::new();
        log.commit(SagaEvent::TriggerCompleted(TriggerCompleted {
            trigger_ref: TriggerRef::new("Gate"),
        }))
        .commit(activated("Gate"));

        let state = replay(&log.instance());
        assert_eq!(state.trigger_status(&TriggerRef::new("Gate")), TriggerStatus::Completed);
        assert_eq!(state.activation_count(&TriggerRef::new("Gate")), 1);
    }

    #[test]
    fn malformed_payloads_leave_state_untouched() {
        let mut log = LogBuilder::new();
        log.commit(activated("Gate"));
        let before = replay(&log.instance());

        log.raw(
            TransactionKind::TriggerActivated,
            [("TriggerRef", "Gate"), ("X", "east")].into_iter().collect(),
        )
        .raw(TransactionKind::CharacterDefeated, Payload::new())
        .raw(TransactionKind::CurrencyChanged, [("Delta", "lots")].into_iter().collect());

        assert_eq!(replay(&log.instance()), before);
    }

    #[test]
    fn defeating_unknown_or_dead_characters_is_a_no_op() {
        let guard = CharacterInstanceId::new();
        let mut log = LogBuilder::new();
        log.commit(spawned(guard, "Guard", 0.0, 0.0))
            .commit(SagaEvent::CharacterDefeated(CharacterDefeated {
                character_instance_id: guard,
            }))
            .commit(SagaEvent::CharacterDefeated(CharacterDefeated {
                character_instance_id: guard,
            }))
            .commit(SagaEvent::CharacterDefeated(CharacterDefeated {
                character_instance_id: CharacterInstanceId::new(),
            }));

        let state = replay(&log.instance());
        assert_eq!(state.defeat_counts[&CharacterRef::new("Guard")], 1);
        assert_eq!(state.characters[&guard].defeated_at, Some(t0() + Duration::seconds(2)));
        assert_eq!(state.characters.len(), 1);
    }

    #[test]
    fn duplicate_spawn_ids_keep_the_first_position() {
        let id = CharacterInstanceId::new();
        let mut log = LogBuilder::new();
        log.commit(spawned(id, "Wolf", 1.0, 1.0))
            .commit(spawned(id, "Wolf", 9.0, 9.0));
        let state = replay(&log.instance());
        assert_eq!(state.characters[&id].position, Position::new(1.0, 1.0));
    }

    #[test]
    fn quests_and_counters_accumulate() {
        let quest = QuestRef::new("Rescue");
        let objective = ObjectiveRef::new("FreePrisoners");
        let mut log = LogBuilder::new();
        log.commit(SagaEvent::QuestStarted(QuestStarted {
            quest_ref: quest.clone(),
        }))
        .commit(SagaEvent::QuestObjectiveProgressed(QuestObjectiveProgressed {
            quest_ref: quest.clone(),
            objective_ref: objective.clone(),
            amount: 2,
        }))
        .commit(SagaEvent::QuestObjectiveProgressed(QuestObjectiveProgressed {
            quest_ref: quest.clone(),
            objective_ref: objective.clone(),
            amount: 1,
        }))
        .commit(SagaEvent::QuestTokenAwarded(QuestTokenAwarded {
            token_ref: QuestTokenRef::new("RedKey"),
            trigger_ref: None,
        }))
        .commit(SagaEvent::CurrencyChanged(CurrencyChanged { delta: 50 }))
        .commit(SagaEvent::CurrencyChanged(CurrencyChanged { delta: -20 }))
        .commit(SagaEvent::ItemTraded(ItemTraded {
            item_ref: ItemRef::new("Rope"),
            quantity: 3,
        }));

        let state = replay(&log.instance());
        assert_eq!(state.active_quests[&quest].objective(&objective), 3);
        assert!(state.has_token(&QuestTokenRef::new("RedKey")));
        assert_eq!(state.currency, 30);
        assert_eq!(state.items[&ItemRef::new("Rope")], 3);

        log.commit(SagaEvent::QuestCompleted(QuestCompleted {
            quest_ref: quest.clone(),
        }))
        .commit(SagaEvent::QuestObjectiveProgressed(QuestObjectiveProgressed {
            quest_ref: quest.clone(),
            objective_ref: objective.clone(),
            amount: 10,
        }));
        let state = replay(&log.instance());
        assert!(state.active_quests.is_empty());
        assert!(state.is_quest_completed(&quest));
        assert_eq!(state.completed_quests[&quest].objective(&objective), 3);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut log = LogBuilder::new();
        log.commit(activated("Gate"))
            .commit(SagaEvent::SagaCompleted(SagaCompleted::default()))
            .commit(SagaEvent::SagaFailed(SagaFailed {
                reason: "too late".to_string(),
            }));
        let state = replay(&log.instance());
        assert_eq!(state.status, SagaStatus::Completed);
        assert_eq!(state.fail_reason, None);

        let mut log = LogBuilder::new();
        log.commit(SagaEvent::SagaFailed(SagaFailed {
            reason: "left harbor".to_string(),
        }))
        .commit(SagaEvent::SagaCompleted(SagaCompleted::default()));
        let state = replay(&log.instance());
        assert_eq!(state.status, SagaStatus::Failed);
        assert_eq!(state.fail_reason.as_deref(), Some("left harbor"));
    }

    fn arb_event() -> impl Strategy<Value = SagaEvent> {
        let trigger = prop::sample::select(vec!["Gate", "Hunt", "Den"]);
        prop_oneof![
            trigger.clone().prop_map(activated),
            trigger.prop_map(|t| SagaEvent::TriggerCompleted(TriggerCompleted {
                trigger_ref: TriggerRef::new(t)
            })),
            (-1000i64..1000).prop_map(|delta| SagaEvent::CurrencyChanged(CurrencyChanged { delta })),
            (-100.0f64..100.0, -100.0f64..100.0, 0u8..4).prop_map(|(x, z, n)| {
                let id = CharacterInstanceId::from_uuid(uuid::Uuid::from_u128(n as u128 + 1));
                spawned(id, "Wolf", x, z)
            }),
            (0u8..4).prop_map(|n| SagaEvent::CharacterDefeated(CharacterDefeated {
                character_instance_id: CharacterInstanceId::from_uuid(uuid::Uuid::from_u128(
                    n as u128 + 1
                )),
            })),
            Just(SagaEvent::SagaCompleted(SagaCompleted::default())),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Replaying the same log any number of times yields identical state.
        #[test]
        fn replay_is_deterministic(events in prop::collection::vec(arb_event(), 0..40)) {
            let mut log = LogBuilder::new();
            for event in events {
                log.commit(event);
            }
            let instance = log.instance();

            let first = replay(&instance);
            let second = replay(&instance);
            let shuffled = {
                let mut txs = instance.transactions().to_vec();
                txs.reverse();
                replay_transactions(instance.saga_ref(), &txs)
            };
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(&first, &shuffled);
            prop_assert_eq!(first.transaction_count, instance.transactions().len() as u64);
        }
    }
}
