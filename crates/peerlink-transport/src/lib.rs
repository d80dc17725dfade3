//! Transport layer for peer session sync.
//!
//! Provides:
//! - Control-plane request bodies and responses
//! - `HttpControlPlane` - request/response client for the session lifecycle
//! - `ConnectionSupervisor` - supervised, auto-reconnecting websocket

pub mod http;
pub mod protocol;
pub mod websocket;

pub use http::HttpControlPlane;
pub use websocket::{ConnectionSupervisor, LinkPolicy, stream_url};
