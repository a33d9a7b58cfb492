//! Adapters that translate between `crate::use_cases`' plain-data
//! operations and the outside world (sockets, TLS, child processes). §6
//! fixes the verbs; the concrete byte/line framing is this layer's job.

pub mod autohost_protocol;
pub mod connection;
pub mod lobby_protocol;
pub mod tls;

pub use autohost_protocol::{AutohostChannel, AutohostEvent};
pub use connection::{ConnectionManager, LobbyState, LivenessTracker, ReconnectPolicy};
pub use lobby_protocol::{InboundEvent, LobbyTransport, OutboundCommand};
pub use tls::{CertTrustStore, TlsDecision};
