//! Session lifecycle and outbound dispatch for peer session sync.
//!
//! Provides:
//! - `SessionController` - start/join/leave over the control plane
//! - `Dispatcher` - outbound config, command, logs and status envelopes
//! - `SessionClient` - the facade handed to features
//! - `ClientConfig` - defaults and environment overrides

pub mod client;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;

#[cfg(test)]
mod testing;

pub use client::SessionClient;
pub use config::ClientConfig;
pub use controller::SessionController;
pub use dispatcher::Dispatcher;
pub use error::{ClientBuildError, SessionError};
