//! Transport state and the session that drives it
//!
//! This module provides:
//! - The pure transport state machine shared by recorder and player
//! - The session controller owning the timeline and both pipelines

mod session;
mod transport;

#[cfg(test)]
pub use session::NullObserver;
pub use session::{Session, SessionConfig, SessionObserver, SessionStatus};
pub use transport::{Command, TransportState};
