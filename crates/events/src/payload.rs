//! Schema-less payload bag carried by every transaction.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Payload keys shared by the typed event views.
pub mod keys {
    pub const SAGA_REF: &str = "SagaRef";
    pub const TRIGGER_REF: &str = "TriggerRef";
    pub const X: &str = "X";
    pub const Z: &str = "Z";
    pub const SEED: &str = "Seed";
    pub const CHARACTER_REF: &str = "CharacterRef";
    pub const CHARACTER_INSTANCE_ID: &str = "CharacterInstanceId";
    pub const QUEST_TOKEN_REF: &str = "QuestTokenRef";
    pub const QUEST_REF: &str = "QuestRef";
    pub const OBJECTIVE_REF: &str = "ObjectiveRef";
    pub const AMOUNT: &str = "Amount";
    pub const ITEM_REF: &str = "ItemRef";
    pub const QUANTITY: &str = "Quantity";
    pub const DELTA: &str = "Delta";
    pub const DIALOGUE_NODE_REF: &str = "DialogueNodeRef";
    pub const CHECKED_AT: &str = "CheckedAt";
    pub const LOCATION_REF: &str = "LocationRef";
    pub const REASON: &str = "Reason";
}

/// Ordered string-to-string mapping.
///
/// Ordering is part of the contract: two payloads with the same entries compare
/// and serialize identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Parse the value under `key`; `None` when missing or malformed.
    pub fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Parse a finite `f64`; NaN and infinities are treated as malformed.
    pub fn parse_f64(&self, key: &str) -> Option<f64> {
        self.parse::<f64>(key).filter(|v| v.is_finite())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value.to_string());
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Payload
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
