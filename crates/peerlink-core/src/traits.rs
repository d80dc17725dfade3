//! Seams between the session logic and its collaborators.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    envelope::ClientId,
    session::{ParticipantInfo, RosterEntry, SessionAck},
    settings::Settings,
};

/// Control-plane error.
#[derive(Debug, Clone, Error)]
pub enum ControlPlaneError {
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },
    #[error("invalid response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Request/response API used for the session lifecycle.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Liveness probe.
    async fn health(&self) -> Result<(), ControlPlaneError>;

    /// Create a session; the server echoes the assigned id.
    async fn create_session(
        &self,
        session_id: &str,
        me: &ParticipantInfo,
    ) -> Result<SessionAck, ControlPlaneError>;

    /// Join an existing session.
    async fn join_session(
        &self,
        session_id: &str,
        me: &ParticipantInfo,
    ) -> Result<SessionAck, ControlPlaneError>;

    /// Leave a session.
    async fn leave_session(
        &self,
        session_id: &str,
        client: &ClientId,
    ) -> Result<(), ControlPlaneError>;

    /// Fetch the roster. `None` when the response carries no participant list.
    async fn fetch_roster(
        &self,
        session_id: &str,
    ) -> Result<Option<Vec<RosterEntry>>, ControlPlaneError>;

    /// Update this client's display name.
    async fn update_username(
        &self,
        session_id: &str,
        client: &ClientId,
        username: &str,
    ) -> Result<(), ControlPlaneError>;
}

/// The persistent streaming connection, as seen by session logic.
#[async_trait]
pub trait StreamLink: Send + Sync {
    /// Start supervising a connection for `session_id`.
    ///
    /// No-op when a connection is already owned.
    fn open(&self, session_id: &str);

    /// Stop supervision and close the socket. Returns within a bounded time.
    async fn close(&self);

    /// Whether a socket is currently open.
    fn is_open(&self) -> bool;

    /// Queue a text frame on the open socket. Returns `false` when offline.
    fn send_frame(&self, frame: String) -> bool;
}

/// Local source of per-client settings.
///
/// The leader installs one to report the settings it assigned to each
/// follower instead of relying on what came over the wire.
pub trait ConfigProvider: Send + Sync {
    fn settings_by_client(&self) -> HashMap<ClientId, Settings>;
}
