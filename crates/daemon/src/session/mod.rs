//! Session management module.
//!
//! This module provides the per-connection protocol state machine and the
//! registry of live sessions.

pub mod handler;
pub mod registry;

pub use handler::{Session, SessionContext, SessionState, UNEXPECTED_MESSAGE};
pub use registry::{RegistrationGuard, SessionHandle, SessionId, SessionInfo, SessionRegistry};
