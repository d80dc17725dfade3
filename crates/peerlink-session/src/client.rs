//! The session client handed to features.

use std::{collections::HashMap, sync::Arc};

use futures::stream::BoxStream;
use peerlink_core::{
    ClientContext, ClientId, ConfigProvider, ControlPlane, Envelope, Payload, Role,
    SessionDetails, Settings, StreamLink,
};
use peerlink_transport::{ConnectionSupervisor, HttpControlPlane};
use serde_json::Value;

use crate::{
    config::ClientConfig,
    controller::SessionController,
    dispatcher::Dispatcher,
    error::{ClientBuildError, SessionError},
};

/// One participant's view of a shared session.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. Pollers never
/// block, and no method fails on connectivity loss.
pub struct SessionClient<C = HttpControlPlane> {
    ctx: Arc<ClientContext>,
    controller: SessionController<C>,
    dispatcher: Dispatcher,
}

impl SessionClient<HttpControlPlane> {
    /// Build a client talking to `config.base_url` over HTTP and websocket.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientBuildError> {
        let ctx = Arc::new(ClientContext::new(config.role, &config.username));
        let control = HttpControlPlane::new(&config.base_url, config.request_timeout)?;
        let link = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&ctx),
            &config.base_url,
            config.link,
        ));
        tracing::debug!(
            base_url = %config.base_url,
            client = %ctx.identity(),
            role = %config.role,
            "session client created"
        );
        Ok(Self::from_parts(ctx, control, link, config))
    }
}

impl<C: ControlPlane> SessionClient<C> {
    /// Assemble a client from its collaborators.
    #[must_use]
    pub fn from_parts(
        ctx: Arc<ClientContext>,
        control: C,
        link: Arc<dyn StreamLink>,
        config: &ClientConfig,
    ) -> Self {
        let controller = SessionController::new(
            Arc::clone(&ctx),
            control,
            Arc::clone(&link),
            config.roster_refresh_interval,
        );
        let dispatcher = Dispatcher::new(Arc::clone(&ctx), link, config.status_republish_interval);
        Self {
            ctx,
            controller,
            dispatcher,
        }
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    #[must_use]
    pub fn identity(&self) -> &ClientId {
        self.ctx.identity()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    // Lifecycle -------------------------------------------------------

    /// Probe the server; see [`SessionController::start`].
    pub async fn start(&self) -> bool {
        self.controller.start().await
    }

    pub async fn reconnect(&self) -> SessionDetails {
        self.controller.reconnect().await
    }

    pub async fn start_session(&self, label: Option<&str>) -> SessionDetails {
        self.controller.start_session(label).await
    }

    /// # Errors
    /// Returns [`SessionError::EmptySessionId`] for a blank id.
    pub async fn join_session(&self, session_id: &str) -> Result<SessionDetails, SessionError> {
        self.controller.join_session(session_id).await
    }

    pub async fn leave_session(&self) -> SessionDetails {
        self.dispatcher.reset();
        self.controller.leave_session().await
    }

    pub async fn get_session_details(&self) -> SessionDetails {
        self.controller.get_session_details().await
    }

    pub async fn set_username(&self, username: &str) {
        self.controller.set_username(username).await;
    }

    pub fn set_role(&self, role: Role) {
        self.controller.set_role(role);
    }

    pub fn set_config_provider(&self, provider: Option<Arc<dyn ConfigProvider>>) {
        self.controller.set_config_provider(provider);
    }

    /// Stop the stream and forget all state, going offline.
    pub async fn shutdown(&self) {
        self.dispatcher.reset();
        self.controller.shutdown().await;
    }

    // Inbound ---------------------------------------------------------

    /// Take untagged events; empty while offline or outside a session.
    pub fn poll(
        &self,
        limit: usize,
        predicate: Option<&dyn Fn(&Envelope) -> bool>,
    ) -> Vec<Envelope> {
        if !self.ctx.has_session() || !self.ctx.is_connected() {
            return Vec::new();
        }
        self.ctx.router().poll(limit, predicate)
    }

    /// Take events queued for `feature`, optionally from one sender only.
    pub fn poll_feature(
        &self,
        feature: &str,
        limit: usize,
        sender: Option<&ClientId>,
    ) -> Vec<Envelope> {
        self.ctx.router().poll_feature(feature, limit, sender)
    }

    // Settings and roster ---------------------------------------------

    #[must_use]
    pub fn setting(&self, key: &str) -> Option<Value> {
        self.ctx.setting(key)
    }

    #[must_use]
    pub fn latest_settings(&self) -> Settings {
        self.ctx.latest_settings()
    }

    #[must_use]
    pub fn settings_for(&self, sender: Option<&ClientId>) -> Settings {
        self.ctx.settings_for(sender)
    }

    #[must_use]
    pub fn settings_by_sender(&self) -> HashMap<ClientId, Settings> {
        self.controller.settings_by_sender()
    }

    #[must_use]
    pub fn leader_ids(&self) -> Vec<ClientId> {
        self.ctx.leader_ids()
    }

    // Outbound --------------------------------------------------------

    pub fn send_config(&self, settings: &Settings, targets: &[ClientId]) -> usize {
        self.dispatcher.send_config(settings, targets)
    }

    pub fn send_command(&self, command: &str, meta: Payload) -> bool {
        self.dispatcher.send_command(command, meta)
    }

    /// Send logs after bringing the roster up to date.
    pub async fn send_logs(
        &self,
        stats: Payload,
        targets: &[ClientId],
        broadcast: Option<bool>,
    ) -> usize {
        self.controller.refresh_roster(false).await;
        self.dispatcher.send_logs(stats, targets, broadcast)
    }

    pub fn send_status(&self, status: Payload) -> bool {
        self.dispatcher.send_status(status)
    }

    pub fn publish_status(&self, role: Role, status: Payload) -> bool {
        self.dispatcher.publish_status(role, status)
    }

    // Local events ----------------------------------------------------

    /// Append a line to the local event log without server I/O.
    pub fn record_local_event(&self, message: &str) {
        self.ctx.record_event(message);
    }

    /// Retained event lines followed by live ones.
    #[must_use]
    pub fn event_lines(&self) -> BoxStream<'static, String> {
        self.ctx.events().history_plus_stream()
    }
}
