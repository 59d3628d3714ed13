//! Client side of the SwarmForge orchestrator protocol.
//!
//! - [`Session`] owns the socket: connect, listen loop, send, close
//! - [`InboundRouter`] hands decoded frames to one handler per type tag
//! - [`RequestTagger`] stamps outgoing requests with fresh ids and can
//!   correlate responses through [`PendingResponse`]

pub mod error;
mod pending;
pub mod router;
pub mod session;
pub mod tagger;

pub use error::{ClientError, Result};
pub use pending::PendingResponse;
pub use router::{InboundRouter, RouteOutcome};
pub use session::{CloseReason, Session, SessionConfig, SessionEvent};
pub use tagger::RequestTagger;
