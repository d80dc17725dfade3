//! Wire envelope exchanged over the streaming connection.
//!
//! Frames travel as flat JSON objects (`type`, `from_client`, `target_scope`,
//! `target_client`, `payload`, `timestamp`). Inside the crate they are a typed
//! [`Envelope`] whose [`Body`] carries one payload shape per envelope type;
//! conversion in both directions goes through [`WireEnvelope`] so that the
//! addressing invariants are checked at the transport boundary.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::settings::Settings;

/// Arbitrary keyed payload.
pub type Payload = Map<String, Value>;

/// Identity of one client process.
///
/// Generated once per client and stamped on every outgoing envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an identity received from elsewhere.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// First eight characters, used in human-readable event lines.
    #[must_use]
    pub fn short(&self) -> &str {
        if self.0.is_empty() {
            return "-";
        }
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Uuid> for ClientId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// The four envelope types carried by the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    Config,
    Command,
    Logs,
    Status,
}

impl EnvelopeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Command => "command",
            Self::Logs => "logs",
            Self::Status => "status",
        }
    }

    /// Case-insensitive lookup of a wire `type` value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "config" => Some(Self::Config),
            "command" => Some(Self::Command),
            "logs" => Some(Self::Logs),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire addressing scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetScope {
    Broadcast,
    PerClient,
}

/// Envelope addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every participant in the session.
    Broadcast,
    /// A single participant.
    Client(ClientId),
}

/// Payload of a `command` envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(default, deserialize_with = "nullable")]
    pub command: String,
    #[serde(default, deserialize_with = "nullable")]
    pub meta: Payload,
    #[serde(flatten)]
    pub extra: Payload,
}

impl CommandPayload {
    #[must_use]
    pub fn new(command: impl Into<String>, meta: Payload) -> Self {
        Self {
            command: command.into(),
            meta,
            extra: Payload::new(),
        }
    }
}

/// Typed envelope body, one variant per [`EnvelopeType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Config(Settings),
    Command(CommandPayload),
    Logs(Payload),
    Status(Payload),
}

impl Body {
    #[must_use]
    pub const fn kind(&self) -> EnvelopeType {
        match self {
            Self::Config(_) => EnvelopeType::Config,
            Self::Command(_) => EnvelopeType::Command,
            Self::Logs(_) => EnvelopeType::Logs,
            Self::Status(_) => EnvelopeType::Status,
        }
    }

    /// The `meta` object of the payload, if any.
    #[must_use]
    pub fn meta(&self) -> Option<&Payload> {
        match self {
            Self::Command(command) => Some(&command.meta),
            Self::Config(settings) => settings.as_map().get("meta").and_then(Value::as_object),
            Self::Logs(payload) | Self::Status(payload) => {
                payload.get("meta").and_then(Value::as_object)
            }
        }
    }

    fn from_payload(kind: EnvelopeType, payload: Payload) -> Result<Self, EnvelopeError> {
        match kind {
            EnvelopeType::Config => Ok(Self::Config(Settings::from(payload))),
            EnvelopeType::Command => serde_json::from_value(Value::Object(payload))
                .map(Self::Command)
                .map_err(|e| EnvelopeError::Payload {
                    kind,
                    reason: e.to_string(),
                }),
            EnvelopeType::Logs => Ok(Self::Logs(payload)),
            EnvelopeType::Status => Ok(Self::Status(payload)),
        }
    }

    fn to_payload(&self) -> Result<Value, EnvelopeError> {
        match self {
            Self::Config(settings) => Ok(Value::Object(settings.as_map().clone())),
            Self::Command(command) => {
                serde_json::to_value(command).map_err(|e| EnvelopeError::Payload {
                    kind: EnvelopeType::Command,
                    reason: e.to_string(),
                })
            }
            Self::Logs(payload) | Self::Status(payload) => Ok(Value::Object(payload.clone())),
        }
    }
}

/// Envelope error.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown envelope type: {0:?}")]
    UnknownType(String),
    #[error("per_client envelope without target_client")]
    MissingTarget,
    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: EnvelopeType, reason: String },
}

/// One routed message unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from_client: ClientId,
    pub target: Target,
    pub body: Body,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    /// Error text attached by the server, if any.
    pub error: Option<String>,
}

impl Envelope {
    /// Create an outbound envelope stamped with the current time.
    #[must_use]
    pub fn new(from_client: ClientId, target: Target, body: Body) -> Self {
        Self {
            from_client,
            target,
            body,
            timestamp: now_timestamp(),
            error: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EnvelopeType {
        self.body.kind()
    }

    /// Feature tag from `payload.meta.feature`, trimmed and lowercased.
    #[must_use]
    pub fn feature_tag(&self) -> Option<String> {
        let tag = self.body.meta()?.get("feature")?.as_str()?.trim().to_lowercase();
        (!tag.is_empty()).then_some(tag)
    }

    /// Human-readable echo for the local event log.
    ///
    /// `status` and `logs` envelopes are high-frequency and produce no line
    /// unless they carry an error.
    #[must_use]
    pub fn echo_line(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(format!("error: {error}"));
        }
        match &self.body {
            Body::Status(_) | Body::Logs(_) => None,
            Body::Command(command) if !command.command.is_empty() => Some(format!(
                "{} command: {}",
                self.from_client.short(),
                command.command
            )),
            Body::Command(_) => Some(EnvelopeType::Command.to_string()),
            Body::Config(_) => Some("config updated".to_string()),
        }
    }

    /// Serialize to a wire frame.
    ///
    /// # Errors
    /// Returns error if a `per_client` envelope has an empty target.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(&WireEnvelope::try_from(self)?)?)
    }
}

/// Flat JSON shape of an envelope on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub from_client: Option<String>,
    #[serde(default)]
    pub target_scope: Option<TargetScope>,
    #[serde(default)]
    pub target_client: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl TryFrom<&Envelope> for WireEnvelope {
    type Error = EnvelopeError;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        let (target_scope, target_client) = match &envelope.target {
            Target::Broadcast => (TargetScope::Broadcast, None),
            Target::Client(id) if id.is_empty() => return Err(EnvelopeError::MissingTarget),
            Target::Client(id) => (TargetScope::PerClient, Some(id.to_string())),
        };
        Ok(Self {
            kind: envelope.kind().as_str().to_string(),
            from_client: Some(envelope.from_client.to_string()),
            target_scope: Some(target_scope),
            target_client,
            payload: Some(envelope.body.to_payload()?),
            timestamp: Some(envelope.timestamp.clone()),
            error: envelope.error.clone().map(Value::String),
        })
    }
}

impl WireEnvelope {
    fn into_envelope(self, kind: EnvelopeType) -> Result<Envelope, EnvelopeError> {
        let target_client = self
            .target_client
            .filter(|t| !t.trim().is_empty())
            .map(ClientId::new);
        let target = match (self.target_scope, target_client) {
            (Some(TargetScope::PerClient) | None, Some(id)) => Target::Client(id),
            (Some(TargetScope::PerClient), None) => return Err(EnvelopeError::MissingTarget),
            (Some(TargetScope::Broadcast), _) | (None, None) => Target::Broadcast,
        };

        let payload = match self.payload {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(EnvelopeError::Payload {
                    kind,
                    reason: format!("expected an object, got {other}"),
                });
            }
        };

        Ok(Envelope {
            from_client: ClientId::new(self.from_client.unwrap_or_default()),
            target,
            body: Body::from_payload(kind, payload)?,
            timestamp: self.timestamp.unwrap_or_default(),
            error: self.error.as_ref().and_then(error_text),
        })
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// One of the four routed envelope types.
    Envelope(Envelope),
    /// A frame of some other type that carries only an error report.
    ServerError(String),
}

impl InboundFrame {
    /// Parse and validate a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not JSON, has an unknown type without an
    /// error report, or violates the addressing invariant.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        match EnvelopeType::parse(&wire.kind) {
            Some(kind) => wire.into_envelope(kind).map(Self::Envelope),
            None => match wire.error.as_ref().and_then(error_text) {
                Some(message) => Ok(Self::ServerError(message)),
                None => Err(EnvelopeError::UnknownType(wire.kind)),
            },
        }
    }
}

/// Current time in the wire timestamp format.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
