//! Errors surfaced by the session client.

/// Session lifecycle error.
///
/// Connectivity failures never surface here; they are recorded locally and
/// the caller gets the last known state instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session code cannot be empty")]
    EmptySessionId,
}

/// The client could not be constructed.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
