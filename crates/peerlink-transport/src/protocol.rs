//! Control-plane request and response bodies.

use peerlink_core::{ClientId, ParticipantInfo, RosterEntry};
use serde::{Deserialize, Serialize};

/// `POST /sessions`
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest<'a> {
    pub session_id: &'a str,
    #[serde(flatten)]
    pub participant: &'a ParticipantInfo,
}

/// `POST /sessions/{id}/leave`
#[derive(Debug, Clone, Serialize)]
pub struct LeaveSessionRequest<'a> {
    pub client_uuid: &'a ClientId,
}

/// `POST /sessions/{id}/username`
#[derive(Debug, Clone, Serialize)]
pub struct UsernameUpdate<'a> {
    pub client_uuid: &'a ClientId,
    pub username: &'a str,
}

/// `GET /sessions/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RosterResponse {
    #[serde(default)]
    pub participants: Option<Vec<RosterEntry>>,
}

#[cfg(test)]
mod tests {
    use peerlink_core::Role;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_request_flattens_participant() {
        let me = ParticipantInfo {
            client_uuid: ClientId::new("c-1"),
            role: Role::Follower,
            username: "Rex".into(),
        };
        let body = serde_json::to_value(CreateSessionRequest {
            session_id: "s-abc123",
            participant: &me,
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "session_id": "s-abc123",
                "client_uuid": "c-1",
                "role": "follower",
                "username": "Rex"
            })
        );
    }

    #[test]
    fn test_roster_response_without_participants() {
        let parsed: RosterResponse = serde_json::from_value(json!({"session_id": "s"})).unwrap();
        assert!(parsed.participants.is_none());

        let parsed: RosterResponse = serde_json::from_value(json!({
            "participants": [{"client_uuid": "t", "role": "trainer"}]
        }))
        .unwrap();
        assert_eq!(parsed.participants.map(|p| p.len()), Some(1));
    }
}
