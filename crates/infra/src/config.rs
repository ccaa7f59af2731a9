//! Configuration loading and representation.
//!
//! Every value has a default; `SAGALOG_*` environment variables override them.
//! A value that does not parse is reported and ignored.

use serde::{Deserialize, Serialize};
use tracing::warn;

use sagalog_observability::TracingConfig;
use sagalog_saga::SpawnRing;

pub const ENV_SPAWN_RADIUS: &str = "SAGALOG_SPAWN_RADIUS";
pub const ENV_SPAWN_JITTER: &str = "SAGALOG_SPAWN_JITTER";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "SAGALOG_MAX_CONFLICT_RETRIES";
pub const ENV_LOG_JSON: &str = "SAGALOG_LOG_JSON";
pub const ENV_LOG_FILTER: &str = "SAGALOG_LOG_FILTER";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaLogConfig {
    pub interaction: InteractionConfig,
    pub tracing: TracingConfig,
}

/// Tuning for the interaction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Distance from the avatar at which spawned characters appear.
    pub spawn_radius: f64,
    /// Maximum angular jitter per spawned character, in radians.
    pub spawn_jitter_radians: f64,
    /// Re-decide attempts after an optimistic append conflict.
    pub max_conflict_retries: u32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        let ring = SpawnRing::default();
        Self {
            spawn_radius: ring.radius,
            spawn_jitter_radians: ring.jitter_radians,
            max_conflict_retries: 3,
        }
    }
}

impl InteractionConfig {
    pub fn spawn_ring(&self) -> SpawnRing {
        SpawnRing {
            radius: self.spawn_radius,
            jitter_radians: self.spawn_jitter_radians,
        }
    }
}

impl SagaLogConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(radius) = parse_var(&lookup, ENV_SPAWN_RADIUS, |v: &f64| v.is_finite() && *v > 0.0) {
            config.interaction.spawn_radius = radius;
        }
        if let Some(jitter) = parse_var(&lookup, ENV_SPAWN_JITTER, |v: &f64| v.is_finite() && *v >= 0.0) {
            config.interaction.spawn_jitter_radians = jitter;
        }
        if let Some(retries) = parse_var(&lookup, ENV_MAX_CONFLICT_RETRIES, |_: &u32| true) {
            config.interaction.max_conflict_retries = retries;
        }
        if let Some(json) = parse_var(&lookup, ENV_LOG_JSON, |_: &bool| true) {
            config.tracing.json = json;
        }
        if let Some(filter) = lookup(ENV_LOG_FILTER).filter(|f| !f.trim().is_empty()) {
            config.tracing.default_directive = filter;
        }

        config
    }
}

fn parse_var<T, F, V>(lookup: &F, key: &str, valid: V) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
    V: Fn(&T) -> bool,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}
