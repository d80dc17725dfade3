//! Config payloads and the per-sender settings cache.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{ClientId, Payload};

/// A config payload: feature flags and tunables keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Payload);

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a value, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Whether the flag named `flag` is truthy.
    #[must_use]
    pub fn is_enabled(&self, flag: &str) -> bool {
        self.0.get(flag).is_some_and(truthy)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub const fn as_map(&self) -> &Payload {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Payload {
        self.0
    }
}

impl From<Payload> for Settings {
    fn from(value: Payload) -> Self {
        Self(value)
    }
}

/// Truthiness of a JSON flag value.
///
/// `null`, `false`, zero, and empty strings, arrays and objects are falsy.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Last config received from every remote sender.
#[derive(Debug, Clone, Default)]
pub struct SettingsCache {
    latest: Settings,
    by_sender: HashMap<ClientId, Settings>,
    last_sent: Settings,
}

impl SettingsCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an inbound config both as the most recent one and under its sender.
    pub fn apply_inbound(&mut self, from: &ClientId, settings: Settings) {
        if !from.is_empty() {
            self.by_sender.insert(from.clone(), settings.clone());
        }
        self.latest = settings;
    }

    /// The sender's config, or the most recent config when the sender is unknown.
    #[must_use]
    pub fn for_sender(&self, sender: Option<&ClientId>) -> &Settings {
        sender
            .and_then(|id| self.by_sender.get(id))
            .unwrap_or(&self.latest)
    }

    /// Whether `feature` is enabled by the config governing `sender`.
    #[must_use]
    pub fn is_feature_enabled(&self, feature: &str, sender: Option<&ClientId>) -> bool {
        self.for_sender(sender).is_enabled(feature)
    }

    #[must_use]
    pub const fn latest(&self) -> &Settings {
        &self.latest
    }

    #[must_use]
    pub const fn by_sender(&self) -> &HashMap<ClientId, Settings> {
        &self.by_sender
    }

    /// Remember the last config this client sent out.
    pub fn record_sent(&mut self, settings: Settings) {
        self.last_sent = settings;
    }

    #[must_use]
    pub const fn last_sent(&self) -> &Settings {
        &self.last_sent
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
