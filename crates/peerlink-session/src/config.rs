//! Client configuration.

use std::time::Duration;

use peerlink_core::{Role, context::DEFAULT_USERNAME, status::STATUS_REPUBLISH_INTERVAL};
use peerlink_transport::{LinkPolicy, http::DEFAULT_REQUEST_TIMEOUT};

/// Hosted control plane used when nothing else is configured.
pub const DEFAULT_SERVER_URL: &str = "https://vrtrainer.online";

/// Minimum time between two roster fetches that are not forced.
pub const ROSTER_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

pub const ENV_SERVER_URL: &str = "PEERLINK_SERVER_URL";
pub const ENV_ROLE: &str = "PEERLINK_ROLE";
pub const ENV_USERNAME: &str = "PEERLINK_USERNAME";

/// Everything needed to build a [`crate::SessionClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub role: Role,
    pub username: String,
    pub request_timeout: Duration,
    pub roster_refresh_interval: Duration,
    pub status_republish_interval: Duration,
    pub link: LinkPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVER_URL.to_string(),
            role: Role::Leader,
            username: DEFAULT_USERNAME.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            roster_refresh_interval: ROSTER_REFRESH_INTERVAL,
            status_republish_interval: STATUS_REPUBLISH_INTERVAL,
            link: LinkPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `PEERLINK_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns. Blank values are ignored.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(url) = get(ENV_SERVER_URL) {
            config = config.with_base_url(&url);
        }
        if let Some(raw) = get(ENV_ROLE) {
            match Role::parse(&raw) {
                Some(role) => config.role = role,
                None => tracing::warn!(value = %raw, "ignoring unknown {ENV_ROLE}"),
            }
        }
        if let Some(username) = get(ENV_USERNAME) {
            config.username = username;
        }
        config
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_roster_refresh_interval(mut self, interval: Duration) -> Self {
        self.roster_refresh_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_status_republish_interval(mut self, interval: Duration) -> Self {
        self.status_republish_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_link_policy(mut self, link: LinkPolicy) -> Self {
        self.link = link;
        self
    }
}
