//! Saga templates, derived state and the pure decision logic around them.
//!
//! Nothing in this crate touches storage. `state_machine::replay` folds a
//! committed log into `SagaState`; `decision` answers "what would fire here?"
//! against a state snapshot; `spawn` turns a logged seed into final positions.

pub mod catalog;
pub mod decision;
pub mod definition;
pub mod position;
pub mod spawn;
pub mod state;
pub mod state_machine;

pub use catalog::{InMemorySagaCatalog, SagaCatalog};
pub use decision::{AvatarContext, can_activate_trigger, evaluate_fail_conditions, triggers_at_position};
pub use definition::{FailCondition, SagaDefinition, SpawnEntry, TriggerDefinition};
pub use position::Position;
pub use spawn::{SpawnPlacement, SpawnRing, place_spawns};
pub use state::{CharacterState, QuestProgress, SagaState, SagaStatus, TriggerState, TriggerStatus};
pub use state_machine::{replay, replay_transactions};
