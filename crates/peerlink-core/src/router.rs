//! Fan-out of inbound envelopes to independent consumers.
//!
//! Envelopes tagged with `payload.meta.feature` go to a per-feature FIFO
//! queue, provided the sender's config enables that feature. Untagged
//! envelopes go to one shared queue; consumers poll it with a predicate and
//! whatever they decline is parked in a pending buffer for other pollers.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::{
    envelope::{ClientId, Envelope},
    settings::SettingsCache,
};

/// Capacity of each per-feature queue.
pub const FEATURE_QUEUE_CAPACITY: usize = 200;

/// Capacity of the buffer holding declined untagged envelopes.
pub const PENDING_CAPACITY: usize = 200;

/// Where an inbound envelope ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Untagged; appended to the shared queue.
    Shared,
    /// Appended to the named feature queue.
    Feature(String),
    /// Tagged for a feature the sender has disabled.
    Dropped(String),
}

#[derive(Default)]
struct Queues {
    incoming: VecDeque<Envelope>,
    pending: VecDeque<Envelope>,
    features: HashMap<String, VecDeque<Envelope>>,
}

/// Per-feature queues plus the shared queue and its pending buffer.
#[derive(Default)]
pub struct EventRouter {
    queues: Mutex<Queues>,
}

impl EventRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one inbound envelope.
    pub fn route_incoming(&self, envelope: Envelope, settings: &SettingsCache) -> Route {
        let Some(feature) = envelope.feature_tag() else {
            self.queues.lock().incoming.push_back(envelope);
            return Route::Shared;
        };

        let sender = Some(&envelope.from_client).filter(|id| !id.is_empty());
        if !settings.is_feature_enabled(&feature, sender) {
            tracing::debug!(
                %feature,
                from = %envelope.from_client,
                "feature disabled, dropping event"
            );
            return Route::Dropped(feature);
        }

        let mut queues = self.queues.lock();
        let queue = queues.features.entry(feature.clone()).or_default();
        queue.push_back(envelope);
        while queue.len() > FEATURE_QUEUE_CAPACITY {
            queue.pop_front();
        }
        Route::Feature(feature)
    }

    /// Take up to `limit` untagged envelopes accepted by `predicate`.
    ///
    /// At most `limit` envelopes are inspected. Parked envelopes are
    /// rechecked first, in arrival order; declined new arrivals are parked
    /// for other pollers, evicting the oldest beyond [`PENDING_CAPACITY`].
    pub fn poll(
        &self,
        limit: usize,
        predicate: Option<&dyn Fn(&Envelope) -> bool>,
    ) -> Vec<Envelope> {
        let accepts = |envelope: &Envelope| predicate.is_none_or(|p| p(envelope));
        let mut queues = self.queues.lock();
        let mut matched = Vec::new();
        let mut inspected = 0;

        let mut declined = Vec::new();
        while inspected < limit {
            let Some(envelope) = queues.pending.pop_front() else {
                break;
            };
            inspected += 1;
            if accepts(&envelope) {
                matched.push(envelope);
            } else {
                declined.push(envelope);
            }
        }
        for envelope in declined.into_iter().rev() {
            queues.pending.push_front(envelope);
        }

        while inspected < limit {
            let Some(envelope) = queues.incoming.pop_front() else {
                break;
            };
            inspected += 1;
            if accepts(&envelope) {
                matched.push(envelope);
            } else {
                queues.pending.push_back(envelope);
                while queues.pending.len() > PENDING_CAPACITY {
                    queues.pending.pop_front();
                }
            }
        }

        matched
    }

    /// Take up to `limit` envelopes from one feature queue.
    ///
    /// With a `sender` filter, envelopes from other senders stay queued in
    /// their original order. Work per call is bounded by the queue length at
    /// the time of the call.
    pub fn poll_feature(
        &self,
        feature: &str,
        limit: usize,
        sender: Option<&ClientId>,
    ) -> Vec<Envelope> {
        let feature = feature.trim().to_lowercase();
        let mut queues = self.queues.lock();
        let Some(queue) = queues.features.get_mut(&feature) else {
            return Vec::new();
        };

        let mut matched = Vec::new();
        for _ in 0..queue.len() {
            let Some(envelope) = queue.pop_front() else {
                break;
            };
            let wanted = sender.is_none_or(|id| envelope.from_client == *id);
            if wanted && matched.len() < limit {
                matched.push(envelope);
            } else {
                queue.push_back(envelope);
            }
        }
        matched
    }

    /// Number of envelopes queued for `feature`.
    #[must_use]
    pub fn feature_len(&self, feature: &str) -> usize {
        self.queues
            .lock()
            .features
            .get(&feature.trim().to_lowercase())
            .map_or(0, VecDeque::len)
    }

    /// Number of parked, declined envelopes.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queues.lock().pending.len()
    }

    /// Drop every queued envelope.
    pub fn clear(&self) {
        *self.queues.lock() = Queues::default();
    }
}
