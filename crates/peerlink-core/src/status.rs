//! Outbound status de-duplication.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{envelope::Payload, session::Role};

/// Default republish window for unchanged status payloads.
pub const STATUS_REPUBLISH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Published {
    payload: Payload,
    at: Instant,
}

/// Last published status per role.
///
/// A status is republished only when it differs from the previous one for
/// that role, or when the republish window has elapsed.
#[derive(Debug, Clone)]
pub struct StatusCache {
    window: Duration,
    last: HashMap<Role, Published>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new(STATUS_REPUBLISH_INTERVAL)
    }
}

impl StatusCache {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Whether `payload` should go out for `role` at `now`.
    #[must_use]
    pub fn should_publish(&self, role: Role, payload: &Payload, now: Instant) -> bool {
        self.last.get(&role).is_none_or(|prev| {
            prev.payload != *payload || now.saturating_duration_since(prev.at) >= self.window
        })
    }

    /// Record a status that was handed to the link.
    pub fn record(&mut self, role: Role, payload: Payload, at: Instant) {
        self.last.insert(role, Published { payload, at });
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn status(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identical_status_within_window_is_suppressed() {
        let mut cache = StatusCache::default();
        let t0 = Instant::now();
        let payload = status(json!({"osc": "connected"}));

        assert!(cache.should_publish(Role::Leader, &payload, t0));
        cache.record(Role::Leader, payload.clone(), t0);

        assert!(!cache.should_publish(Role::Leader, &payload, t0 + Duration::from_secs(1)));
        assert!(cache.should_publish(Role::Leader, &payload, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_changed_status_goes_out_immediately() {
        let mut cache = StatusCache::default();
        let t0 = Instant::now();
        cache.record(Role::Follower, status(json!({"osc": "connected"})), t0);

        let changed = status(json!({"osc": "lost"}));
        assert!(cache.should_publish(Role::Follower, &changed, t0));
    }

    #[test]
    fn test_roles_are_tracked_independently() {
        let mut cache = StatusCache::default();
        let t0 = Instant::now();
        let payload = status(json!({"whisper": "ready"}));
        cache.record(Role::Leader, payload.clone(), t0);

        assert!(cache.should_publish(Role::Follower, &payload, t0));
        cache.clear();
        assert!(cache.should_publish(Role::Leader, &payload, t0));
    }
}
