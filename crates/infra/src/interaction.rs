//! Saga interaction service: turns avatar activity into new transactions.
//!
//! Every write follows the same loop:
//!
//! ```text
//! snapshot ──► replay ──► decide (pure) ──► add (ExpectedVersion::Exact) ──► commit
//!    ▲                                            │
//!    └──────────── re-read on Conflict ◄──────────┘
//! ```
//!
//! Randomness is drawn only while deciding: one seed per trigger activation,
//! logged in `TriggerActivated`, and the spawn positions derived from it are
//! logged in each `CharacterSpawned`. Replay never needs the RNG again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use sagalog_core::{
    AggregateRoot, AvatarId, ExpectedVersion, InstanceId, LocationRef, SagaRef, TransactionId,
    TriggerRef,
};
use sagalog_events::{
    CharacterSpawned, Heartbeat, PlayerEntered, QuestTokenAwarded, SagaCompleted, SagaEvent,
    SagaFailed, SagaInstance, Transaction, TriggerActivated, TriggerCompleted,
};
use sagalog_saga::{
    AvatarContext, Position, SagaCatalog, SagaDefinition, SagaState, SagaStatus,
    TriggerDefinition, can_activate_trigger, evaluate_fail_conditions, place_spawns, replay,
    triggers_at_position,
};

use crate::config::InteractionConfig;
use crate::locks::KeyedLocks;
use crate::log_store::TransactionLogStore;
use crate::repository::{RepositoryError, SagaInstanceRepository};
use crate::seeds::SeedSource;

#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("saga not in catalog: {0}")]
    SagaNotFound(SagaRef),

    #[error("avatar {avatar_id} does not own instance {instance_id}")]
    AvatarMismatch {
        instance_id: InstanceId,
        avatar_id: AvatarId,
    },

    #[error("avatar position ({x}, {z}) is not finite")]
    InvalidPosition { x: f64, z: f64 },

    /// The batch was appended but could not be committed; it has been rolled back.
    #[error("commit rejected for instance {0}")]
    CommitRejected(InstanceId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type InteractionResult<T> = Result<T, InteractionError>;

/// What a write produced. Empty when nothing applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionOutcome {
    /// Triggers activated by this call, in template order.
    pub activated: Vec<TriggerRef>,
    pub transactions: Vec<TransactionId>,
    pub sequences: Vec<u64>,
}

impl InteractionOutcome {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Transactions planned against one state snapshot.
#[derive(Debug, Default)]
struct Plan {
    activated: Vec<TriggerRef>,
    events: Vec<SagaEvent>,
}

pub struct SagaInteractionService<S, C, R> {
    repository: Arc<SagaInstanceRepository<S>>,
    catalog: C,
    seeds: R,
    config: InteractionConfig,
    /// Serializes this service's decide-and-write cycles per instance. Writers
    /// outside the service are caught by the version check instead.
    decision_locks: KeyedLocks<InstanceId>,
}

impl<S, C, R> SagaInteractionService<S, C, R>
where
    S: TransactionLogStore,
    C: SagaCatalog,
    R: SeedSource,
{
    pub fn new(repository: Arc<SagaInstanceRepository<S>>, catalog: C, seeds: R) -> Self {
        Self {
            repository,
            catalog,
            seeds,
            config: InteractionConfig::default(),
            decision_locks: KeyedLocks::new(),
        }
    }

    pub fn with_config(mut self, config: InteractionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn repository(&self) -> &Arc<SagaInstanceRepository<S>> {
        &self.repository
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn definition(&self, saga_ref: &SagaRef) -> InteractionResult<Arc<SagaDefinition>> {
        self.catalog
            .get(saga_ref)
            .ok_or_else(|| InteractionError::SagaNotFound(saga_ref.clone()))
    }

    /// Get or create the avatar's instance, logging `PlayerEntered` on first entry.
    #[instrument(skip_all, fields(avatar_id = %avatar_id, saga_ref = %saga_ref))]
    pub fn begin_saga(
        &self,
        avatar_id: AvatarId,
        saga_ref: SagaRef,
    ) -> InteractionResult<SagaInstance> {
        self.definition(&saga_ref)?;
        let instance = self.repository.get_or_create_instance(avatar_id, saga_ref)?;

        let entered = self.write_with_retry(instance.clone(), |snapshot, _| {
            if !snapshot.transactions().is_empty() {
                return Plan::default();
            }
            Plan {
                activated: Vec::new(),
                events: vec![SagaEvent::PlayerEntered(PlayerEntered {
                    saga_ref: snapshot.saga_ref().clone(),
                })],
            }
        })?;
        if entered.is_empty() {
            return Ok(instance);
        }

        info!(instance_id = %instance.instance_id(), "avatar entered saga");
        self.load(instance.instance_id())
    }

    /// Replay the instance's current committed log.
    pub fn current_state(&self, instance_id: InstanceId) -> InteractionResult<SagaState> {
        Ok(replay(&self.load(instance_id)?))
    }

    /// Fire every trigger the avatar activates by standing at `(x, z)`.
    ///
    /// Triggers that are out of range, completed, exhausted or token-gated are
    /// skipped silently. A terminal saga produces nothing. `instance` is the
    /// caller's snapshot; a stale one is detected by the version check and
    /// re-read.
    #[instrument(skip_all, fields(instance_id = %instance.instance_id(), x = x, z = z))]
    pub fn update_with_avatar_position(
        &self,
        instance: &SagaInstance,
        x: f64,
        z: f64,
        avatar: &AvatarContext,
    ) -> InteractionResult<InteractionOutcome> {
        if avatar.avatar_id != instance.owner_avatar_id() {
            return Err(InteractionError::AvatarMismatch {
                instance_id: instance.instance_id(),
                avatar_id: avatar.avatar_id,
            });
        }
        if !x.is_finite() || !z.is_finite() {
            return Err(InteractionError::InvalidPosition { x, z });
        }
        let definition = self.definition(instance.saga_ref())?;
        let position = Position::new(x, z);

        let outcome = self.write_with_retry(instance.clone(), |_, state| {
            self.plan_activations(&definition, state, position, avatar)
        })?;

        if !outcome.activated.is_empty() {
            info!(
                triggers = ?outcome.activated,
                transactions = outcome.transactions.len(),
                "triggers activated"
            );
        }
        Ok(outcome)
    }

    /// First trigger that would fire at `(x, z)`; writes nothing.
    pub fn get_trigger_at_position(
        &self,
        instance: &SagaInstance,
        x: f64,
        z: f64,
        avatar: &AvatarContext,
    ) -> InteractionResult<Option<TriggerDefinition>> {
        Ok(self
            .get_triggers_at_position(instance, x, z, avatar)?
            .into_iter()
            .next())
    }

    /// Every trigger that would fire at `(x, z)`, in template order; writes nothing.
    pub fn get_triggers_at_position(
        &self,
        instance: &SagaInstance,
        x: f64,
        z: f64,
        avatar: &AvatarContext,
    ) -> InteractionResult<Vec<TriggerDefinition>> {
        let definition = self.definition(instance.saga_ref())?;
        let state = replay(instance);
        Ok(
            triggers_at_position(&definition, &state, Position::new(x, z), avatar)
                .into_iter()
                .cloned()
                .collect(),
        )
    }

    /// Would `trigger_ref` fire at `(x, z)`? Unknown triggers never fire.
    pub fn can_activate_trigger(
        &self,
        instance: &SagaInstance,
        trigger_ref: &TriggerRef,
        x: f64,
        z: f64,
        avatar: &AvatarContext,
    ) -> InteractionResult<bool> {
        let definition = self.definition(instance.saga_ref())?;
        let Some(trigger) = definition.trigger(trigger_ref) else {
            return Ok(false);
        };
        let state = replay(instance);
        Ok(can_activate_trigger(
            &definition,
            trigger,
            &state,
            Position::new(x, z),
            avatar,
        ))
    }

    /// Log a heartbeat at `checked_at` and fail the saga if a fail condition
    /// is met.
    ///
    /// Returns the failure reason when the saga failed on this check. Sagas
    /// that have not started or are already terminal are left untouched.
    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub fn check_fail_conditions(
        &self,
        instance_id: InstanceId,
        checked_at: DateTime<Utc>,
        location: Option<LocationRef>,
    ) -> InteractionResult<Option<String>> {
        let instance = self.load(instance_id)?;
        let definition = self.definition(instance.saga_ref())?;

        let mut failure = None;
        self.write_with_retry(instance, |_, state| {
            failure = None;
            if state.status != SagaStatus::Active {
                return Plan::default();
            }
            let mut events = vec![SagaEvent::Heartbeat(Heartbeat {
                checked_at,
                location_ref: location.clone(),
            })];
            if let Some(reason) =
                evaluate_fail_conditions(&definition, state, checked_at, location.as_ref())
            {
                events.push(SagaEvent::SagaFailed(SagaFailed {
                    reason: reason.clone(),
                }));
                failure = Some(reason);
            }
            Plan {
                activated: Vec::new(),
                events,
            }
        })?;

        if let Some(reason) = &failure {
            warn!(reason = %reason, "saga failed");
        }
        Ok(failure)
    }

    /// Add and commit `events` on behalf of an external collaborator (quest
    /// evaluation, trade, dialogue, reputation).
    ///
    /// Completing the saga's completion trigger appends `SagaCompleted`.
    #[instrument(skip_all, fields(instance_id = %instance_id, count = events.len()))]
    pub fn record(
        &self,
        instance_id: InstanceId,
        events: Vec<SagaEvent>,
    ) -> InteractionResult<InteractionOutcome> {
        let instance = self.load(instance_id)?;
        let definition = self.definition(instance.saga_ref())?;

        self.write_with_retry(instance, |_, state| {
            let mut events = events.clone();
            let completes = definition.completion_trigger.as_ref().is_some_and(|done| {
                events.iter().any(
                    |event| matches!(event, SagaEvent::TriggerCompleted(e) if &e.trigger_ref == done),
                )
            });
            let already = events
                .iter()
                .any(|event| matches!(event, SagaEvent::SagaCompleted(_)));
            if completes && !already && !state.status.is_terminal() {
                events.push(SagaEvent::SagaCompleted(SagaCompleted {
                    trigger_ref: definition.completion_trigger.clone(),
                }));
            }
            Plan {
                activated: Vec::new(),
                events,
            }
        })
    }

    fn plan_activations(
        &self,
        definition: &SagaDefinition,
        state: &SagaState,
        position: Position,
        avatar: &AvatarContext,
    ) -> Plan {
        let mut plan = Plan::default();
        let mut completes_saga = false;
        let ring = self.config.spawn_ring();

        for trigger in triggers_at_position(definition, state, position, avatar) {
            let seed = self.seeds.next_seed();
            plan.events.push(SagaEvent::TriggerActivated(TriggerActivated {
                trigger_ref: trigger.trigger_ref.clone(),
                x: position.x,
                z: position.z,
                seed,
            }));

            for token in &trigger.grants_tokens {
                plan.events.push(SagaEvent::QuestTokenAwarded(QuestTokenAwarded {
                    token_ref: token.clone(),
                    trigger_ref: Some(trigger.trigger_ref.clone()),
                }));
            }

            let characters = trigger.spawn_list();
            let placements = place_spawns(seed, position, characters.len(), ring);
            for (character_ref, placement) in characters.into_iter().zip(placements) {
                plan.events.push(SagaEvent::CharacterSpawned(CharacterSpawned {
                    character_instance_id: placement.character_instance_id,
                    character_ref: character_ref.clone(),
                    x: placement.position.x,
                    z: placement.position.z,
                    trigger_ref: Some(trigger.trigger_ref.clone()),
                    seed: Some(seed),
                }));
            }

            if trigger.complete_on_activation {
                plan.events.push(SagaEvent::TriggerCompleted(TriggerCompleted {
                    trigger_ref: trigger.trigger_ref.clone(),
                }));
                if definition.completion_trigger.as_ref() == Some(&trigger.trigger_ref) {
                    completes_saga = true;
                }
            }

            plan.activated.push(trigger.trigger_ref.clone());
        }

        if completes_saga {
            plan.events.push(SagaEvent::SagaCompleted(SagaCompleted {
                trigger_ref: definition.completion_trigger.clone(),
            }));
        }
        plan
    }

    /// Decide against `snapshot`, then append at exactly its version and commit.
    ///
    /// On a version conflict the instance is re-read and `decide` runs again,
    /// up to `max_conflict_retries` times.
    fn write_with_retry<F>(
        &self,
        snapshot: SagaInstance,
        decide: F,
    ) -> InteractionResult<InteractionOutcome>
    where
        F: FnMut(&SagaInstance, &SagaState) -> Plan,
    {
        let instance_id = snapshot.instance_id();
        self.decision_locks
            .with_lock(&instance_id, || self.decide_and_write(snapshot, decide))
    }

    fn decide_and_write<F>(
        &self,
        mut snapshot: SagaInstance,
        mut decide: F,
    ) -> InteractionResult<InteractionOutcome>
    where
        F: FnMut(&SagaInstance, &SagaState) -> Plan,
    {
        let mut attempt = 0;
        loop {
            let state = replay(&snapshot);
            let plan = decide(&snapshot, &state);
            if plan.events.is_empty() {
                return Ok(InteractionOutcome::default());
            }

            let expected = ExpectedVersion::Exact(snapshot.version());
            match self.write(&snapshot, expected, &plan.events) {
                Ok((transactions, sequences)) => {
                    return Ok(InteractionOutcome {
                        activated: plan.activated,
                        transactions,
                        sequences,
                    });
                }
                Err(InteractionError::Repository(RepositoryError::Conflict { actual, .. }))
                    if attempt < self.config.max_conflict_retries =>
                {
                    attempt += 1;
                    debug!(attempt, actual, "instance moved on, deciding again");
                    snapshot = self.load(snapshot.instance_id())?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn write(
        &self,
        snapshot: &SagaInstance,
        expected: ExpectedVersion,
        events: &[SagaEvent],
    ) -> InteractionResult<(Vec<TransactionId>, Vec<u64>)> {
        let instance_id = snapshot.instance_id();
        let local_time = self.repository.clock().now();
        let transactions: Vec<Transaction> = events
            .iter()
            .map(|event| Transaction::from_event(snapshot.owner_avatar_id(), event, local_time))
            .collect();
        let ids: Vec<TransactionId> = transactions.iter().map(Transaction::id).collect();

        let sequences = self
            .repository
            .add_transactions_expecting(instance_id, transactions, expected)?;

        if self.repository.commit_transactions(instance_id, &ids)? {
            return Ok((ids, sequences));
        }

        let rejected = self.repository.rollback_transactions(instance_id, &ids)?;
        warn!(instance_id = %instance_id, rejected, "commit failed, batch rolled back");
        Err(InteractionError::CommitRejected(instance_id))
    }

    fn load(&self, instance_id: InstanceId) -> InteractionResult<SagaInstance> {
        self.repository
            .get_instance_by_id(instance_id)?
            .ok_or(InteractionError::Repository(RepositoryError::InstanceNotFound(
                instance_id,
            )))
    }
}
