//! Session value objects: roles, state, roster entries and snapshots.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    envelope::{ClientId, Payload},
    settings::Settings,
};

/// Peer role within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Issues commands and config (a.k.a. trainer).
    #[default]
    #[serde(alias = "trainer")]
    Leader,
    /// Receives commands and config (a.k.a. pet).
    #[serde(alias = "pet")]
    Follower,
}

impl Role {
    /// Lenient, case-insensitive parse accepting both naming schemes.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "leader" | "trainer" => Some(Self::Leader),
            "follower" | "pet" => Some(Self::Follower),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    /// This client created the session.
    Hosting,
    /// This client joined an existing session.
    Joined,
}

impl SessionState {
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// One participant in the roster snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(default, alias = "id")]
    pub client_uuid: Option<ClientId>,
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub last_status: Option<Payload>,
}

impl RosterEntry {
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.role == Some(Role::Leader)
    }

    /// Identity of this entry, if it has a non-empty one.
    #[must_use]
    pub fn id(&self) -> Option<&ClientId> {
        self.client_uuid.as_ref().filter(|id| !id.is_empty())
    }

    /// Display label: username, then the username reported in the last
    /// status, then a shortened identity.
    #[must_use]
    pub fn display_name(&self) -> String {
        let status_name = self
            .last_status
            .as_ref()
            .and_then(|s| s.get("username"))
            .and_then(|v| v.as_str());
        self.username
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(status_name.filter(|s| !s.trim().is_empty()))
            .map_or_else(
                || {
                    self.id()
                        .map_or_else(|| "(unknown)".to_string(), |id| id.short().to_string())
                },
                str::to_string,
            )
    }
}

// Odd-typed values decode as absent rather than failing the whole roster.
fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.as_deref().and_then(Role::parse))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_object<'de, D>(deserializer: D) -> Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

/// How this client identifies itself to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantInfo {
    pub client_uuid: ClientId,
    pub role: Role,
    pub username: String,
}

/// Control-plane answer to create/join.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionAck {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<RosterEntry>>,
}

/// Read-only snapshot of the client's session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetails {
    pub connected: bool,
    pub role: Role,
    pub username: String,
    pub session_id: Option<String>,
    pub state: SessionState,
    /// Most recent local event lines, oldest first.
    pub events: Vec<String>,
    pub roster: Vec<RosterEntry>,
    pub settings_by_sender: HashMap<ClientId, Settings>,
    pub latest_settings: Settings,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_role_parse_accepts_both_schemes() {
        assert_eq!(Role::parse("Trainer"), Some(Role::Leader));
        assert_eq!(Role::parse(" leader "), Some(Role::Leader));
        assert_eq!(Role::parse("PET"), Some(Role::Follower));
        assert_eq!(Role::parse("follower"), Some(Role::Follower));
        assert_eq!(Role::parse("observer"), None);
    }

    #[test]
    fn test_roster_entry_is_lenient() {
        let entries: Vec<RosterEntry> = serde_json::from_value(json!([
            {"client_uuid": "t-1", "role": "trainer", "username": "Alice", "last_status": null},
            {"id": "p-1", "role": "Pet", "username": null, "last_status": {"username": "Rex"}},
            {"client_uuid": "x-123456789", "role": "observer"},
            {}
        ]))
        .unwrap();

        assert!(entries[0].is_leader());
        assert_eq!(entries[0].display_name(), "Alice");
        assert_eq!(entries[1].role, Some(Role::Follower));
        assert_eq!(entries[1].display_name(), "Rex");
        assert_eq!(entries[2].role, None);
        assert_eq!(entries[2].display_name(), "x-123456");
        assert_eq!(entries[3].id(), None);
        assert_eq!(entries[3].display_name(), "(unknown)");
    }

    #[test]
    fn test_odd_typed_fields_do_not_fail_the_roster() {
        let entries: Vec<RosterEntry> = serde_json::from_value(json!([
            {"client_uuid": "t-1", "role": 7, "username": 42, "last_status": "online"},
            {"client_uuid": "p-1", "role": "pet", "username": ["Rex"], "last_status": [1, 2]}
        ]))
        .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].username, None);
        assert_eq!(entries[0].last_status, None);
        assert_eq!(entries[0].display_name(), "t-1");
        assert_eq!(entries[1].role, Some(Role::Follower));
        assert_eq!(entries[1].username, None);
    }

    #[test]
    fn test_session_state_activity() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Hosting.is_active());
        assert!(SessionState::Joined.is_active());
    }
}
