//! bloomdex-server — the stream-socket front end over `bloomdex-core`.
//!
//! Re-exports the wire protocol, handler registry, and connection/listener
//! modules so the `bloomdex-server` binary stays a thin CLI shell.

pub mod config;
pub mod handlers;
pub mod net;
pub mod protocol;

pub use bloomdex_core::*;
