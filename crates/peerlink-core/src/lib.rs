//! Core abstractions for peer session synchronization.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` - Typed wire message exchanged over the streaming connection
//! - `EventRouter` - Per-feature queues plus a shared queue for untagged events
//! - `SettingsCache` / `StatusCache` - Config and status bookkeeping
//! - `EventLog` - Bounded local event history with a live feed
//! - `ClientContext` - Shared state owned by one session client
//! - Control-plane, stream-link and config-provider traits

pub mod context;
pub mod envelope;
pub mod event_log;
pub mod router;
pub mod session;
pub mod settings;
pub mod status;
pub mod traits;

pub use context::ClientContext;
pub use envelope::{
    Body, ClientId, CommandPayload, Envelope, EnvelopeError, EnvelopeType, InboundFrame, Payload,
    Target,
};
pub use event_log::EventLog;
pub use router::{EventRouter, Route};
pub use session::{ParticipantInfo, Role, RosterEntry, SessionAck, SessionDetails, SessionState};
pub use settings::{Settings, SettingsCache};
pub use status::StatusCache;
pub use traits::{ConfigProvider, ControlPlane, ControlPlaneError, StreamLink};
