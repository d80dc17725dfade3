//! Session lifecycle over the control plane.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use peerlink_core::{
    ClientContext, ClientId, ConfigProvider, ControlPlane, ControlPlaneError, Role,
    SessionDetails, SessionState, Settings, StreamLink,
};
use uuid::Uuid;

use crate::error::SessionError;

/// Event line recorded when the health probe fails.
pub const OFFLINE_NOTICE: &str = "Server unreachable; working offline";

/// Drives start/join/leave and keeps the roster fresh.
///
/// Connectivity failures are recorded on the context and never returned;
/// callers always get the last known state.
pub struct SessionController<C> {
    ctx: Arc<ClientContext>,
    control: C,
    link: Arc<dyn StreamLink>,
    roster_refresh_interval: Duration,
    provider: RwLock<Option<Arc<dyn ConfigProvider>>>,
}

impl<C: ControlPlane> SessionController<C> {
    #[must_use]
    pub fn new(
        ctx: Arc<ClientContext>,
        control: C,
        link: Arc<dyn StreamLink>,
        roster_refresh_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            control,
            link,
            roster_refresh_interval,
            provider: RwLock::new(None),
        }
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    #[must_use]
    pub const fn control(&self) -> &C {
        &self.control
    }

    /// Install (or remove) the local source of per-follower settings.
    pub fn set_config_provider(&self, provider: Option<Arc<dyn ConfigProvider>>) {
        *self.provider.write() = provider;
    }

    /// Track connectivity from the outcome of a control-plane call.
    fn observe<T>(&self, result: Result<T, ControlPlaneError>) -> Result<T, ControlPlaneError> {
        match &result {
            Ok(_) => self.ctx.mark_connected(),
            Err(e) => self.ctx.mark_disconnected(Some(&e.to_string())),
        }
        result
    }

    /// Probe the control plane. Returns whether it is reachable.
    pub async fn start(&self) -> bool {
        match self.observe(self.control.health().await) {
            Ok(()) => {
                tracing::info!("remote server reachable");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote server health check failed");
                self.ctx.record_event(OFFLINE_NOTICE);
                false
            }
        }
    }

    /// Re-probe the control plane and report fresh details.
    pub async fn reconnect(&self) -> SessionDetails {
        self.start().await;
        self.get_session_details().await
    }

    /// Host a new session, generating a label when none is given.
    pub async fn start_session(&self, label: Option<&str>) -> SessionDetails {
        let requested = label
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map_or_else(generate_label, str::to_string);
        let me = self.ctx.participant();

        match self.observe(self.control.create_session(&requested, &me).await) {
            Ok(ack) => {
                let session_id = ack
                    .session_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or(requested);
                self.enter(session_id.clone(), SessionState::Hosting).await;
                self.ctx.record_event(&format!("started session {session_id}"));
                tracing::info!(%session_id, "hosting session");
                self.link.open(&session_id);
                self.refresh_roster(true).await;
            }
            Err(e) => {
                tracing::warn!(session_id = %requested, error = %e, "start session failed");
                self.ctx.record_event(&format!("start session failed: {e}"));
            }
        }
        self.get_session_details().await
    }

    /// Join an existing session.
    ///
    /// # Errors
    /// Returns [`SessionError::EmptySessionId`] for a blank id. Network
    /// failures are recorded and reported through the returned details.
    pub async fn join_session(&self, session_id: &str) -> Result<SessionDetails, SessionError> {
        let cleaned = session_id.trim();
        if cleaned.is_empty() {
            return Err(SessionError::EmptySessionId);
        }
        let me = self.ctx.participant();

        match self.observe(self.control.join_session(cleaned, &me).await) {
            Ok(ack) => {
                let session_id = ack
                    .session_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| cleaned.to_string());
                self.enter(session_id.clone(), SessionState::Joined).await;
                if let Some(participants) = ack.participants.filter(|p| !p.is_empty()) {
                    self.ctx.replace_roster(participants, Instant::now());
                }
                self.ctx.record_event(&format!("joined session {session_id}"));
                tracing::info!(%session_id, "joined session");
                self.link.open(&session_id);
            }
            Err(e) => {
                tracing::warn!(session_id = %cleaned, error = %e, "join session failed");
                self.ctx.record_event(&format!("join session failed: {e}"));
            }
        }
        Ok(self.get_session_details().await)
    }

    /// Switch to `session_id`, closing a stream still serving another one
    /// and dropping that session's caches.
    async fn enter(&self, session_id: String, state: SessionState) {
        if let Some(previous) = self
            .ctx
            .session_id()
            .filter(|current| *current != session_id)
        {
            tracing::debug!(%previous, next = %session_id, "switching session");
            self.link.close().await;
            self.ctx.clear_session_caches();
        }
        self.ctx.enter_session(session_id, state);
    }

    /// Leave the current session and drop everything tied to it.
    ///
    /// The leave call is best-effort.
    pub async fn leave_session(&self) -> SessionDetails {
        if let Some(session_id) = self.ctx.session_id() {
            let result = self
                .control
                .leave_session(&session_id, self.ctx.identity())
                .await;
            if let Err(e) = self.observe(result) {
                tracing::debug!(%session_id, error = %e, "leave call failed");
            }
            self.ctx.record_event(&format!("left session {session_id}"));
            tracing::info!(%session_id, "left session");
        }
        self.link.close().await;
        self.ctx.reset_session();
        self.get_session_details().await
    }

    /// Refresh the roster if due, then snapshot.
    pub async fn get_session_details(&self) -> SessionDetails {
        self.refresh_roster(false).await;
        let mut details = self.ctx.snapshot();
        if let Some(by_client) = self.provided_settings() {
            details.settings_by_sender = by_client;
        }
        details
    }

    /// Fetch the roster when online and more than the refresh interval has
    /// passed, or unconditionally with `force`. Failures keep the old roster.
    pub async fn refresh_roster(&self, force: bool) {
        let Some(session_id) = self.ctx.session_id() else {
            return;
        };
        if !self.ctx.is_connected() {
            return;
        }
        let now = Instant::now();
        if !force && !self.ctx.roster_due(self.roster_refresh_interval, now) {
            return;
        }

        match self.observe(self.control.fetch_roster(&session_id).await) {
            Ok(Some(entries)) => self.ctx.replace_roster(entries, now),
            Ok(None) => {}
            Err(e) => tracing::debug!(%session_id, error = %e, "roster refresh failed"),
        }
    }

    /// Set the display name, pushing it to the server while in a session.
    pub async fn set_username(&self, username: &str) {
        let username = self.ctx.set_username(username);
        let Some(session_id) = self.ctx.session_id() else {
            return;
        };
        if !self.ctx.is_connected() {
            return;
        }

        let result = self
            .control
            .update_username(&session_id, self.ctx.identity(), &username)
            .await;
        if let Err(e) = self.observe(result) {
            tracing::warn!(error = %e, "username update failed");
        }
    }

    pub fn set_role(&self, role: Role) {
        self.ctx.set_role(role);
    }

    /// Per-sender settings, sourced locally for a leader with a provider.
    #[must_use]
    pub fn settings_by_sender(&self) -> HashMap<ClientId, Settings> {
        self.provided_settings()
            .unwrap_or_else(|| self.ctx.settings_by_sender())
    }

    fn provided_settings(&self) -> Option<HashMap<ClientId, Settings>> {
        if self.ctx.role() != Role::Leader {
            return None;
        }
        self.provider
            .read()
            .as_ref()
            .map(|provider| provider.settings_by_client())
    }

    /// Tear down the stream and forget all session state.
    pub async fn shutdown(&self) {
        self.link.close().await;
        self.ctx.reset();
        tracing::info!("session client stopped");
    }
}

/// `s-` followed by six hex characters.
fn generate_label() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("s-{}", &hex[..6])
}
