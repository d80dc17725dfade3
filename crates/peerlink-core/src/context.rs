//! Shared state owned by one session client.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::{
    envelope::{Body, ClientId, Envelope, InboundFrame, Target},
    event_log::EventLog,
    router::{EventRouter, Route},
    session::{ParticipantInfo, Role, RosterEntry, SessionDetails, SessionState},
    settings::{Settings, SettingsCache},
};

/// Username used when none (or a blank one) is configured.
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Number of event lines included in a [`SessionDetails`] snapshot.
pub const DETAIL_EVENTS: usize = 10;

struct Profile {
    role: Role,
    username: String,
}

#[derive(Default)]
struct SessionSlot {
    id: Option<String>,
    state: SessionState,
}

#[derive(Default)]
struct RosterCache {
    entries: Vec<RosterEntry>,
    refreshed_at: Option<Instant>,
}

/// State shared by the controller, the dispatcher and the connection task.
///
/// One context belongs to one client; it is created with the client and
/// dropped with it. Every field is individually locked and no lock is held
/// across an await point.
pub struct ClientContext {
    identity: ClientId,
    profile: RwLock<Profile>,
    session: RwLock<SessionSlot>,
    connected: AtomicBool,
    roster: RwLock<RosterCache>,
    settings: RwLock<SettingsCache>,
    replay: Mutex<HashMap<ClientId, Settings>>,
    router: EventRouter,
    events: EventLog,
}

impl ClientContext {
    /// Create a context with a freshly generated identity.
    #[must_use]
    pub fn new(role: Role, username: &str) -> Self {
        Self::with_identity(ClientId::generate(), role, username)
    }

    /// Create a context with a known identity.
    #[must_use]
    pub fn with_identity(identity: ClientId, role: Role, username: &str) -> Self {
        Self {
            identity,
            profile: RwLock::new(Profile {
                role,
                username: normalize_username(username),
            }),
            session: RwLock::new(SessionSlot::default()),
            connected: AtomicBool::new(false),
            roster: RwLock::new(RosterCache::default()),
            settings: RwLock::new(SettingsCache::new()),
            replay: Mutex::new(HashMap::new()),
            router: EventRouter::new(),
            events: EventLog::new(),
        }
    }

    #[must_use]
    pub const fn identity(&self) -> &ClientId {
        &self.identity
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.profile.read().role
    }

    pub fn set_role(&self, role: Role) {
        self.profile.write().role = role;
    }

    #[must_use]
    pub fn username(&self) -> String {
        self.profile.read().username.clone()
    }

    /// Set the display name, returning the normalized value.
    pub fn set_username(&self, username: &str) -> String {
        let username = normalize_username(username);
        self.profile.write().username.clone_from(&username);
        username
    }

    /// How this client presents itself to the control plane.
    #[must_use]
    pub fn participant(&self) -> ParticipantInfo {
        let profile = self.profile.read();
        ParticipantInfo {
            client_uuid: self.identity.clone(),
            role: profile.role,
            username: profile.username.clone(),
        }
    }

    // Session ---------------------------------------------------------

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session.read().id.clone()
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.session.read().state
    }

    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.read().id.is_some()
    }

    pub fn enter_session(&self, id: String, state: SessionState) {
        let mut session = self.session.write();
        session.id = Some(id);
        session.state = state;
    }

    // Connectivity ----------------------------------------------------

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    /// Mark offline, recording a line only on the online-to-offline edge.
    pub fn mark_disconnected(&self, reason: Option<&str>) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        match reason {
            Some(reason) => self.record_event(&format!("disconnected: {reason}")),
            None => self.record_event("disconnected from server"),
        }
    }

    /// The streaming socket opened.
    pub fn stream_opened(&self) {
        self.mark_connected();
        self.record_event("ws connected");
    }

    /// The streaming socket closed.
    pub fn stream_closed(&self) {
        self.record_event("ws closed");
        self.connected.store(false, Ordering::Release);
    }

    // Local events ----------------------------------------------------

    /// Append a line to the local event log without server I/O.
    pub fn record_event(&self, message: &str) {
        self.events.push(message);
    }

    #[must_use]
    pub const fn events(&self) -> &EventLog {
        &self.events
    }

    #[must_use]
    pub const fn router(&self) -> &EventRouter {
        &self.router
    }

    // Roster ----------------------------------------------------------

    #[must_use]
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster.read().entries.clone()
    }

    /// Install a fresh roster and forget replay configs for departed peers.
    pub fn replace_roster(&self, entries: Vec<RosterEntry>, at: Instant) {
        let present: HashSet<ClientId> =
            entries.iter().filter_map(RosterEntry::id).cloned().collect();
        {
            let mut roster = self.roster.write();
            roster.entries = entries;
            roster.refreshed_at = Some(at);
        }

        self.replay.lock().retain(|target, _| {
            let keep = present.contains(target);
            if !keep {
                tracing::debug!(%target, "dropping replay config for departed peer");
            }
            keep
        });
    }

    /// Whether more than `interval` has passed since the last refresh.
    #[must_use]
    pub fn roster_due(&self, interval: Duration, now: Instant) -> bool {
        self.roster
            .read()
            .refreshed_at
            .is_none_or(|at| now.saturating_duration_since(at) > interval)
    }

    /// Identities of roster leaders, in roster order.
    #[must_use]
    pub fn leader_ids(&self) -> Vec<ClientId> {
        self.roster
            .read()
            .entries
            .iter()
            .filter(|entry| entry.is_leader())
            .filter_map(|entry| entry.id().cloned())
            .collect()
    }

    // Settings --------------------------------------------------------

    /// Config governing events from `sender`.
    #[must_use]
    pub fn settings_for(&self, sender: Option<&ClientId>) -> Settings {
        self.settings.read().for_sender(sender).clone()
    }

    #[must_use]
    pub fn latest_settings(&self) -> Settings {
        self.settings.read().latest().clone()
    }

    #[must_use]
    pub fn settings_by_sender(&self) -> HashMap<ClientId, Settings> {
        self.settings.read().by_sender().clone()
    }

    /// One value from the most recent inbound config.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<Value> {
        self.settings.read().latest().get(key).cloned()
    }

    pub fn record_sent_settings(&self, settings: Settings) {
        self.settings.write().record_sent(settings);
    }

    #[must_use]
    pub fn last_sent_settings(&self) -> Settings {
        self.settings.read().last_sent().clone()
    }

    // Replay ----------------------------------------------------------

    /// Remember the config last sent to `target` so it can be replayed.
    pub fn remember_for_replay(&self, target: ClientId, settings: Settings) {
        self.replay.lock().insert(target, settings);
    }

    /// Frames re-sent whenever the streaming connection opens.
    #[must_use]
    pub fn replay_frames(&self) -> Vec<String> {
        let replay = self.replay.lock();
        let mut targets: Vec<_> = replay.iter().collect();
        targets.sort_by(|a, b| a.0.cmp(b.0));
        targets
            .into_iter()
            .filter_map(|(target, settings)| {
                Envelope::new(
                    self.identity.clone(),
                    Target::Client(target.clone()),
                    Body::Config(settings.clone()),
                )
                .to_json()
                .ok()
            })
            .collect()
    }

    // Inbound ---------------------------------------------------------

    /// Parse one inbound text frame and deliver it.
    ///
    /// Config envelopes update the settings cache before routing, so a config
    /// enables its own feature-tagged successors. Unparseable frames are
    /// discarded. Returns `None` when nothing was routed.
    pub fn handle_frame(&self, text: &str) -> Option<Route> {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "discarding inbound frame");
                return None;
            }
        };

        let envelope = match frame {
            InboundFrame::Envelope(envelope) => envelope,
            InboundFrame::ServerError(message) => {
                self.record_event(&format!("error: {message}"));
                return None;
            }
        };

        if let Body::Config(settings) = &envelope.body {
            self.settings
                .write()
                .apply_inbound(&envelope.from_client, settings.clone());
        }

        let line = envelope.echo_line();
        let route = {
            let settings = self.settings.read();
            self.router.route_incoming(envelope, &settings)
        };
        if !matches!(route, Route::Dropped(_)) {
            if let Some(line) = line {
                self.record_event(&line);
            }
        }
        Some(route)
    }

    // Lifecycle -------------------------------------------------------

    /// Drop the roster, settings, replay configs and queued events.
    ///
    /// The session slot and the event log are kept.
    pub fn clear_session_caches(&self) {
        *self.roster.write() = RosterCache::default();
        self.settings.write().clear();
        self.replay.lock().clear();
        self.router.clear();
    }

    /// Forget everything tied to the current session.
    pub fn reset_session(&self) {
        *self.session.write() = SessionSlot::default();
        self.clear_session_caches();
        self.events.clear();
    }

    /// Forget the session and go offline.
    pub fn reset(&self) {
        self.reset_session();
        self.connected.store(false, Ordering::Release);
    }

    /// Read-only snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionDetails {
        let (role, username) = {
            let profile = self.profile.read();
            (profile.role, profile.username.clone())
        };
        let (session_id, state) = {
            let session = self.session.read();
            (session.id.clone(), session.state)
        };
        let (settings_by_sender, latest_settings) = {
            let settings = self.settings.read();
            (settings.by_sender().clone(), settings.latest().clone())
        };

        SessionDetails {
            connected: self.is_connected(),
            role,
            username,
            session_id,
            state,
            events: self.events.recent(DETAIL_EVENTS),
            roster: self.roster(),
            settings_by_sender,
            latest_settings,
        }
    }
}

fn normalize_username(username: &str) -> String {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        DEFAULT_USERNAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx() -> ClientContext {
        ClientContext::with_identity(ClientId::new("me"), Role::Follower, "  ")
    }

    fn frame(value: &Value) -> String {
        value.to_string()
    }

    #[test]
    fn test_blank_username_defaults() {
        let ctx = ctx();
        assert_eq!(ctx.username(), DEFAULT_USERNAME);
        assert_eq!(ctx.set_username(" Rex "), "Rex");
        assert_eq!(ctx.participant().username, "Rex");
    }

    #[test]
    fn test_config_applies_before_routing() {
        let ctx = ctx();
        let route = ctx.handle_frame(&frame(&json!({
            "type": "config",
            "from_client": "trainer-1",
            "target_scope": "per_client",
            "target_client": "me",
            "payload": {"focus": true, "meta": {"feature": "focus"}}
        })));

        assert_eq!(route, Some(Route::Feature("focus".into())));
        assert!(ctx.settings_for(Some(&ClientId::new("trainer-1"))).is_enabled("focus"));
        assert!(ctx.latest_settings().is_enabled("focus"));
        assert_eq!(ctx.setting("focus"), Some(json!(true)));
        assert!(ctx.events().recent(1)[0].ends_with("config updated"));
    }

    #[test]
    fn test_malformed_and_quiet_frames() {
        let ctx = ctx();
        assert_eq!(ctx.handle_frame("{not json"), None);
        assert_eq!(ctx.handle_frame(&frame(&json!({"type": "mystery"}))), None);
        assert!(ctx.events().is_empty());

        let route = ctx.handle_frame(&frame(&json!({
            "type": "status",
            "from_client": "trainer-1",
            "target_scope": "broadcast",
            "payload": {"kind": "status"}
        })));
        assert_eq!(route, Some(Route::Shared));
        assert!(ctx.events().is_empty());

        ctx.handle_frame(&frame(&json!({"type": "error", "error": "bad target"})));
        assert!(ctx.events().recent(1)[0].ends_with("error: bad target"));
    }

    #[test]
    fn test_dropped_event_is_not_echoed() {
        let ctx = ctx();
        let route = ctx.handle_frame(&frame(&json!({
            "type": "command",
            "from_client": "trainer-1",
            "target_scope": "broadcast",
            "payload": {"command": "bad pet", "meta": {"feature": "scolding"}}
        })));
        assert_eq!(route, Some(Route::Dropped("scolding".into())));
        assert!(ctx.events().is_empty());
    }

    #[test]
    fn test_disconnect_line_only_on_transition() {
        let ctx = ctx();
        ctx.mark_disconnected(Some("timeout"));
        assert!(ctx.events().is_empty());

        ctx.mark_connected();
        ctx.mark_disconnected(Some("timeout"));
        ctx.mark_disconnected(Some("timeout"));
        assert_eq!(ctx.events().len(), 1);
        assert!(!ctx.is_connected());
    }

    #[test]
    fn test_roster_helpers() {
        let ctx = ctx();
        let now = Instant::now();
        assert!(ctx.roster_due(Duration::from_secs(2), now));

        let entries: Vec<RosterEntry> = serde_json::from_value(json!([
            {"client_uuid": "p-1", "role": "pet"},
            {"client_uuid": "t-1", "role": "trainer"},
            {"client_uuid": "t-2", "role": "leader"}
        ]))
        .unwrap();
        ctx.replace_roster(entries, now);

        assert!(!ctx.roster_due(Duration::from_secs(2), now + Duration::from_secs(1)));
        assert!(ctx.roster_due(Duration::from_secs(2), now + Duration::from_millis(2100)));
        assert_eq!(ctx.leader_ids(), vec![ClientId::new("t-1"), ClientId::new("t-2")]);
    }

    #[test]
    fn test_replay_frames_target_each_client() {
        let ctx = ctx();
        ctx.remember_for_replay(ClientId::new("b"), Settings::new().with("focus", json!(true)));
        ctx.remember_for_replay(ClientId::new("a"), Settings::new().with("focus", json!(false)));

        let frames: Vec<Value> = ctx
            .replay_frames()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["target_client"], "a");
        assert_eq!(frames[1]["target_client"], "b");
        assert_eq!(frames[0]["type"], "config");
        assert_eq!(frames[0]["from_client"], "me");
    }

    #[test]
    fn test_roster_refresh_prunes_replay_for_departed_peers() {
        let ctx = ctx();
        let focus = Settings::new().with("focus", json!(true));
        ctx.remember_for_replay(ClientId::new("pet-a"), focus.clone());
        ctx.remember_for_replay(ClientId::new("pet-b"), focus);

        let entries: Vec<RosterEntry> = serde_json::from_value(json!([
            {"client_uuid": "me", "role": "trainer"},
            {"client_uuid": "pet-b", "role": "pet"}
        ]))
        .unwrap();
        ctx.replace_roster(entries, Instant::now());

        let frames: Vec<Value> = ctx
            .replay_frames()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["target_client"], "pet-b");

        ctx.replace_roster(Vec::new(), Instant::now());
        assert!(ctx.replay_frames().is_empty());
    }

    #[test]
    fn test_reset_clears_session_state() {
        let ctx = ctx();
        ctx.mark_connected();
        ctx.enter_session("s-abc".into(), SessionState::Joined);
        ctx.handle_frame(&frame(&json!({
            "type": "config",
            "from_client": "trainer-1",
            "target_scope": "per_client",
            "target_client": "me",
            "payload": {"focus": true}
        })));
        ctx.replace_roster(vec![RosterEntry::default()], Instant::now());

        ctx.reset_session();
        let details = ctx.snapshot();
        assert_eq!(details.state, SessionState::Idle);
        assert_eq!(details.session_id, None);
        assert!(details.roster.is_empty());
        assert!(details.settings_by_sender.is_empty());
        assert!(details.events.is_empty());
        assert!(details.connected);

        ctx.reset();
        assert!(!ctx.snapshot().connected);
    }
}
