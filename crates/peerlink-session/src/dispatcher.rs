//! Outbound envelopes: config, command, logs and status.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use peerlink_core::{
    Body, ClientContext, ClientId, CommandPayload, Envelope, Payload, Role, Settings, StatusCache,
    StreamLink, Target, settings::truthy,
};
use serde_json::Value;

/// Routing key naming a single recipient inside a payload.
pub const TARGET_CLIENT_KEY: &str = "target_client";
/// Routing keys asking for logs to reach every leader.
pub const BROADCAST_KEYS: [&str; 2] = ["broadcast_leaders", "broadcast_trainers"];

/// Builds and sends outbound envelopes over the stream link.
///
/// Every send is a silent no-op while the link is closed.
pub struct Dispatcher {
    ctx: Arc<ClientContext>,
    link: Arc<dyn StreamLink>,
    status: Mutex<StatusCache>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        ctx: Arc<ClientContext>,
        link: Arc<dyn StreamLink>,
        status_window: Duration,
    ) -> Self {
        Self {
            ctx,
            link,
            status: Mutex::new(StatusCache::new(status_window)),
        }
    }

    fn send(&self, target: Target, body: Body) -> bool {
        let envelope = Envelope::new(self.ctx.identity().clone(), target, body);
        let kind = envelope.kind().as_str();
        if !self.link.is_open() {
            tracing::debug!(kind, "link closed; skipping send");
            return false;
        }
        match envelope.to_json() {
            Ok(frame) => self.link.send_frame(frame),
            Err(e) => {
                tracing::warn!(kind, error = %e, "failed to encode envelope");
                false
            }
        }
    }

    /// Send `settings` to each target as its own `per_client` config.
    ///
    /// The payload is remembered per target and replayed when the stream
    /// reopens. Returns the number of frames handed to the link.
    pub fn send_config(&self, settings: &Settings, targets: &[ClientId]) -> usize {
        let targets: Vec<&ClientId> = targets.iter().filter(|t| !t.is_empty()).collect();
        if targets.is_empty() {
            tracing::debug!("skip config send: no target_client");
            return 0;
        }

        self.ctx.record_sent_settings(settings.clone());
        let mut sent = 0;
        for target in targets {
            self.ctx.remember_for_replay(target.clone(), settings.clone());
            if self.send(Target::Client(target.clone()), Body::Config(settings.clone())) {
                sent += 1;
            }
        }
        sent
    }

    /// Send a command, addressed to `meta.target_client` when present.
    pub fn send_command(&self, command: &str, meta: Payload) -> bool {
        let target = meta
            .get(TARGET_CLIENT_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map_or(Target::Broadcast, |id| Target::Client(ClientId::new(id)));
        self.send(target, Body::Command(CommandPayload::new(command, meta)))
    }

    /// Send logs to explicit recipients only, one envelope per recipient.
    ///
    /// Recipients are `targets`, plus any `target_client` in `stats`. With
    /// none, every roster leader when broadcasting, else the first leader.
    /// `broadcast` overrides any broadcast flag embedded in `stats`. Routing
    /// keys are stripped from the payload. Returns the number of frames sent.
    pub fn send_logs(
        &self,
        stats: Payload,
        targets: &[ClientId],
        broadcast: Option<bool>,
    ) -> usize {
        let mut payload = stats;
        let embedded = BROADCAST_KEYS
            .iter()
            .filter_map(|key| payload.remove(*key))
            .fold(false, |any, flag| any || truthy(&flag));
        let broadcast = broadcast.unwrap_or(embedded);

        let mut recipients: Vec<ClientId> =
            targets.iter().filter(|t| !t.is_empty()).cloned().collect();
        if let Some(Value::String(id)) = payload.remove(TARGET_CLIENT_KEY) {
            if !id.is_empty() {
                recipients.push(ClientId::new(id));
            }
        }

        if recipients.is_empty() {
            let leaders = self.ctx.leader_ids();
            if broadcast {
                recipients = leaders;
            } else {
                recipients.extend(leaders.into_iter().take(1));
            }
        }

        if recipients.is_empty() {
            tracing::debug!("skip logs send: no recipient");
            return 0;
        }

        recipients
            .into_iter()
            .filter(|target| {
                self.send(Target::Client(target.clone()), Body::Logs(payload.clone()))
            })
            .count()
    }

    /// Broadcast a status payload.
    pub fn send_status(&self, status: Payload) -> bool {
        self.send(Target::Broadcast, Body::Status(status))
    }

    /// Broadcast `status` for `role` unless an identical one went out recently.
    ///
    /// Sends `{"kind": "status", ..status}`. Only a status actually handed to
    /// the link counts for de-duplication.
    pub fn publish_status(&self, role: Role, status: Payload) -> bool {
        let now = Instant::now();
        let mut cache = self.status.lock();
        if !cache.should_publish(role, &status, now) {
            return false;
        }

        let mut payload = Payload::new();
        payload.insert("kind".into(), Value::from("status"));
        payload.extend(status.clone());

        let sent = self.send_status(payload);
        if sent {
            cache.record(role, status, now);
        }
        sent
    }

    /// Forget published statuses.
    pub fn reset(&self) {
        self.status.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use peerlink_core::RosterEntry;
    use serde_json::json;

    use super::*;
    use crate::testing::RecordingLink;

    fn setup(open: bool) -> (Arc<ClientContext>, Arc<RecordingLink>, Dispatcher) {
        let ctx = Arc::new(ClientContext::with_identity(
            ClientId::new("pet-uuid-1234"),
            Role::Follower,
            "Rex",
        ));
        let link = Arc::new(RecordingLink::default());
        link.set_open(open);
        let dispatcher = Dispatcher::new(
            Arc::clone(&ctx),
            Arc::clone(&link) as Arc<dyn StreamLink>,
            Duration::from_secs(5),
        );
        (ctx, link, dispatcher)
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn seed_roster(ctx: &ClientContext) {
        let entries: Vec<RosterEntry> = serde_json::from_value(json!([
            {"client_uuid": "pet-uuid-1234", "role": "pet"},
            {"client_uuid": "trainer-a", "role": "trainer"},
            {"client_uuid": "trainer-b", "role": "leader"}
        ]))
        .unwrap();
        ctx.replace_roster(entries, Instant::now());
    }

    #[test]
    fn test_logs_fan_out_to_every_leader() {
        let (ctx, link, dispatcher) = setup(true);
        seed_roster(&ctx);

        let sent = dispatcher.send_logs(payload(json!({"score": 3})), &[], Some(true));
        assert_eq!(sent, 2);

        let frames = link.frames();
        assert_eq!(frames.len(), 2);
        for (frame, target) in frames.iter().zip(["trainer-a", "trainer-b"]) {
            assert_eq!(frame["type"], "logs");
            assert_eq!(frame["target_scope"], "per_client");
            assert_eq!(frame["target_client"], target);
            assert_eq!(frame["from_client"], "pet-uuid-1234");
            assert_eq!(frame["payload"], json!({"score": 3}));
        }
    }

    #[test]
    fn test_logs_target_resolution() {
        let (ctx, link, dispatcher) = setup(true);

        // No roster and no explicit target: nothing to send.
        assert_eq!(dispatcher.send_logs(payload(json!({"a": 1})), &[], None), 0);

        seed_roster(&ctx);
        assert_eq!(dispatcher.send_logs(payload(json!({"a": 1})), &[], None), 1);
        assert_eq!(
            dispatcher.send_logs(
                payload(json!({"a": 2, "broadcast_trainers": true})),
                &[],
                None
            ),
            2
        );
        assert_eq!(
            dispatcher.send_logs(
                payload(json!({"a": 3, "target_client": "trainer-b", "broadcast_leaders": true})),
                &[],
                None
            ),
            1
        );
        assert_eq!(
            dispatcher.send_logs(payload(json!({"a": 4})), &[ClientId::new("x")], Some(true)),
            1
        );

        let frames = link.frames();
        assert_eq!(frames[0]["target_client"], "trainer-a");
        assert_eq!(frames[1]["payload"], json!({"a": 2}));
        assert_eq!(frames[3]["target_client"], "trainer-b");
        assert_eq!(frames[3]["payload"], json!({"a": 3}));
        assert_eq!(frames[4]["target_client"], "x");
    }

    #[test]
    fn test_config_fans_out_and_is_remembered() {
        let (ctx, link, dispatcher) = setup(true);
        let settings = Settings::new().with("focus", json!(true));

        assert_eq!(dispatcher.send_config(&settings, &[]), 0);
        assert!(link.frames().is_empty());

        let targets = [ClientId::new("pet-a"), ClientId::new("pet-b")];
        assert_eq!(dispatcher.send_config(&settings, &targets), 2);

        let frames = link.frames();
        assert_eq!(frames[0]["type"], "config");
        assert_eq!(frames[0]["target_scope"], "per_client");
        assert_eq!(frames[1]["target_client"], "pet-b");
        assert_eq!(frames[1]["payload"], json!({"focus": true}));
        assert_eq!(ctx.last_sent_settings(), settings);
        assert_eq!(ctx.replay_frames().len(), 2);
    }

    #[test]
    fn test_command_scope_follows_meta_target() {
        let (_ctx, link, dispatcher) = setup(true);
        assert!(dispatcher.send_command("sit", payload(json!({"feature": "tricks"}))));
        assert!(dispatcher.send_command(
            "stay",
            payload(json!({"feature": "tricks", "target_client": "pet-a"}))
        ));

        let frames = link.frames();
        assert_eq!(frames[0]["target_scope"], "broadcast");
        assert!(frames[0].get("target_client").is_none_or(Value::is_null));
        assert_eq!(frames[0]["payload"]["command"], "sit");
        assert_eq!(frames[1]["target_scope"], "per_client");
        assert_eq!(frames[1]["target_client"], "pet-a");
        assert_eq!(frames[1]["payload"]["meta"]["feature"], "tricks");
    }

    #[test]
    fn test_offline_sends_are_noops() {
        let (ctx, link, dispatcher) = setup(false);
        seed_roster(&ctx);

        assert!(!dispatcher.send_status(payload(json!({"osc": "ok"}))));
        assert!(!dispatcher.send_command("sit", Payload::new()));
        assert_eq!(dispatcher.send_logs(Payload::new(), &[], Some(true)), 0);
        assert_eq!(
            dispatcher.send_config(&Settings::new(), &[ClientId::new("pet-a")]),
            0
        );
        assert!(link.frames().is_empty());
        // Still remembered, so the next open replays it.
        assert_eq!(ctx.replay_frames().len(), 1);
    }

    #[test]
    fn test_identical_status_is_published_once() {
        let (_ctx, link, dispatcher) = setup(true);
        let status = payload(json!({"osc": "connected", "pishock": "ok"}));

        assert!(dispatcher.publish_status(Role::Follower, status.clone()));
        assert!(!dispatcher.publish_status(Role::Follower, status.clone()));
        assert!(dispatcher.publish_status(Role::Leader, status.clone()));
        assert!(dispatcher.publish_status(
            Role::Follower,
            payload(json!({"osc": "lost", "pishock": "ok"}))
        ));

        let frames = link.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["type"], "status");
        assert_eq!(frames[0]["target_scope"], "broadcast");
        assert_eq!(frames[0]["payload"]["kind"], "status");
        assert_eq!(frames[0]["payload"]["osc"], "connected");
    }

    #[test]
    fn test_status_dedup_ignores_unsent() {
        let (_ctx, link, dispatcher) = setup(false);
        let status = payload(json!({"osc": "connected"}));

        assert!(!dispatcher.publish_status(Role::Follower, status.clone()));
        link.set_open(true);
        assert!(dispatcher.publish_status(Role::Follower, status.clone()));

        dispatcher.reset();
        assert!(dispatcher.publish_status(Role::Follower, status));
        assert_eq!(link.frames().len(), 2);
    }
}
