//! Request/response client for the session control plane.

use std::time::Duration;

use async_trait::async_trait;
use peerlink_core::{
    ClientId, ControlPlane, ControlPlaneError, ParticipantInfo, RosterEntry, SessionAck,
};
use reqwest::{RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};

use crate::protocol::{CreateSessionRequest, LeaveSessionRequest, RosterResponse, UsernameUpdate};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(6);

/// JSON-over-HTTP control plane.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControlPlane {
    /// Create a client with its own connection pool.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client sharing an existing connection pool.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<Response, ControlPlaneError> {
        tracing::debug!(%path, "control plane request");
        let response = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlPlaneError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        path: &str,
    ) -> Result<T, ControlPlaneError> {
        response.json().await.map_err(|e| ControlPlaneError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControlPlaneError> {
        let response = self.send(self.client.get(self.url(path)), path).await?;
        Self::decode(response, path).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ControlPlaneError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.client.post(self.url(path)).json(body), path)
            .await?;
        Self::decode(response, path).await
    }

    async fn post<B>(&self, path: &str, body: &B) -> Result<(), ControlPlaneError>
    where
        B: Serialize + Sync + ?Sized,
    {
        self.send(self.client.post(self.url(path)).json(body), path)
            .await
            .map(drop)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn health(&self) -> Result<(), ControlPlaneError> {
        self.send(self.client.get(self.url("/health")), "/health")
            .await
            .map(drop)
    }

    async fn create_session(
        &self,
        session_id: &str,
        me: &ParticipantInfo,
    ) -> Result<SessionAck, ControlPlaneError> {
        let body = CreateSessionRequest {
            session_id,
            participant: me,
        };
        self.post_json("/sessions", &body).await
    }

    async fn join_session(
        &self,
        session_id: &str,
        me: &ParticipantInfo,
    ) -> Result<SessionAck, ControlPlaneError> {
        self.post_json(&format!("/sessions/{session_id}/join"), me).await
    }

    async fn leave_session(
        &self,
        session_id: &str,
        client: &ClientId,
    ) -> Result<(), ControlPlaneError> {
        let body = LeaveSessionRequest {
            client_uuid: client,
        };
        self.post(&format!("/sessions/{session_id}/leave"), &body).await
    }

    async fn fetch_roster(
        &self,
        session_id: &str,
    ) -> Result<Option<Vec<RosterEntry>>, ControlPlaneError> {
        let roster: RosterResponse = self.get_json(&format!("/sessions/{session_id}")).await?;
        Ok(roster.participants)
    }

    async fn update_username(
        &self,
        session_id: &str,
        client: &ClientId,
        username: &str,
    ) -> Result<(), ControlPlaneError> {
        let body = UsernameUpdate {
            client_uuid: client,
            username,
        };
        self.post(&format!("/sessions/{session_id}/username"), &body)
            .await
    }
}
