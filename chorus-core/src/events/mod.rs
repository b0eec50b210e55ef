//! Server events
//!
//! Events are raised after a mutation has committed and the server state lock
//! has been released. Listeners subscribe through a [`ListenerRegistry`].

mod registry;

pub use registry::{Listener, ListenerHandle, ListenerRegistry};

use crate::channel::ChannelRecord;
use crate::participant::Participant;
use crate::types::{ChannelId, ServerId, SessionId};
use serde::{Deserialize, Serialize};

/// Kinds of events a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ParticipantStateChanged,
    ParticipantConnected,
    ParticipantDisconnected,
    ChannelStateChanged,
    ChannelCreated,
    ChannelRemoved,
    ServerStarted,
    ServerStopped,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::ParticipantStateChanged,
        EventKind::ParticipantConnected,
        EventKind::ParticipantDisconnected,
        EventKind::ChannelStateChanged,
        EventKind::ChannelCreated,
        EventKind::ChannelRemoved,
        EventKind::ServerStarted,
        EventKind::ServerStopped,
    ];
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Participant after the update was applied
    ParticipantStateChanged { server: ServerId, participant: Participant },
    ParticipantConnected { server: ServerId, participant: Participant },
    ParticipantDisconnected { server: ServerId, session: SessionId },
    /// Channel after the update was applied
    ChannelStateChanged { server: ServerId, channel: ChannelRecord },
    ChannelCreated { server: ServerId, channel: ChannelRecord },
    ChannelRemoved { server: ServerId, channel: ChannelId },
    ServerStarted { server: ServerId },
    ServerStopped { server: ServerId },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::ParticipantStateChanged { .. } => EventKind::ParticipantStateChanged,
            ServerEvent::ParticipantConnected { .. } => EventKind::ParticipantConnected,
            ServerEvent::ParticipantDisconnected { .. } => EventKind::ParticipantDisconnected,
            ServerEvent::ChannelStateChanged { .. } => EventKind::ChannelStateChanged,
            ServerEvent::ChannelCreated { .. } => EventKind::ChannelCreated,
            ServerEvent::ChannelRemoved { .. } => EventKind::ChannelRemoved,
            ServerEvent::ServerStarted { .. } => EventKind::ServerStarted,
            ServerEvent::ServerStopped { .. } => EventKind::ServerStopped,
        }
    }

    pub fn server(&self) -> ServerId {
        match self {
            ServerEvent::ParticipantStateChanged { server, .. }
            | ServerEvent::ParticipantConnected { server, .. }
            | ServerEvent::ParticipantDisconnected { server, .. }
            | ServerEvent::ChannelStateChanged { server, .. }
            | ServerEvent::ChannelCreated { server, .. }
            | ServerEvent::ChannelRemoved { server, .. }
            | ServerEvent::ServerStarted { server }
            | ServerEvent::ServerStopped { server } => *server,
        }
    }
}
