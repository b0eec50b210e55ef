//! Chorus: in-memory state core for a voice chat server
//!
//! A virtual [`Server`] tracks a tree of channels with symmetric links, the
//! participants located in them, channel groups and ACLs. Every committed
//! change is broadcast to connected sessions as a minimal delta and raised
//! as a [`ServerEvent`] for registered listeners.

pub mod acl;
pub mod auth;
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod group;
pub mod logging;
pub mod meta;
pub mod metrics;
pub mod participant;
pub mod server;
pub mod types;
pub mod version;

pub use acl::{ChanAcl, Permissions};
pub use error::{ServerError, ServerResult};
pub use events::{EventKind, ServerEvent};
pub use logging::{init_logging, LogLevel};
pub use meta::Meta;
pub use server::{Server, Session};
pub use types::{ChannelId, ServerId, SessionId, UserId};
