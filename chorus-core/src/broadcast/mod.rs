//! Delta broadcasting
//!
//! The broadcaster owns one outbound queue per connected session and turns a
//! `(message, recipients)` pair into a [`Delivery`]. Recipient resolution runs
//! while the server state is locked so it sees a consistent roster. The
//! resulting `Delivery` is also sent under the lock, which keeps per-session
//! queues in commit order.
//!
//! Queues are unbounded: delivery is fire-and-forget from the core's point of
//! view and the transport layer owns backpressure.

mod messages;

pub use messages::{
    ChannelRemove, ChannelState, ServerMessage, TextMessage, UserRemove, UserState,
};

use crate::channel::ChannelGraph;
use crate::metrics;
use crate::participant::Roster;
use crate::types::{ChannelId, SessionId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a session's outbound queue
pub type Outbound = mpsc::UnboundedSender<Arc<ServerMessage>>;

/// Receiving half of a session's outbound queue, drained by the transport
pub type Inbox = mpsc::UnboundedReceiver<Arc<ServerMessage>>;

/// Who receives a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Every connected session
    All,
    /// One session
    Session(SessionId),
    /// Every session located in one of these channels
    Channels(BTreeSet<ChannelId>),
}

impl Recipients {
    /// `channel` alone, or `channel` and all its descendants when `tree` is set.
    ///
    /// Links are not followed.
    pub fn channel_scope(graph: &ChannelGraph, channel: ChannelId, tree: bool) -> Self {
        let channels = if tree {
            graph.descendants(channel).map(|c| c.id()).collect()
        } else {
            BTreeSet::from([channel])
        };
        Recipients::Channels(channels)
    }
}

/// A message bound to its resolved targets, ready to send
#[derive(Debug)]
pub struct Delivery {
    message: Arc<ServerMessage>,
    targets: Vec<(SessionId, Outbound)>,
}

impl Delivery {
    pub fn message(&self) -> &ServerMessage {
        &self.message
    }

    /// Target sessions, ascending and unique
    pub fn sessions(&self) -> Vec<SessionId> {
        self.targets.iter().map(|(s, _)| *s).collect()
    }

    /// Push the message to every target; returns how many queues accepted it
    pub fn send(self) -> usize {
        let mut delivered = 0;
        for (session, tx) in &self.targets {
            if tx.send(Arc::clone(&self.message)).is_ok() {
                delivered += 1;
            } else {
                debug!(session = %session, kind = self.message.kind(), "Outbound queue closed");
            }
        }

        metrics::record_counter(metrics::BROADCAST_MESSAGES, 1);
        metrics::record_counter(metrics::BROADCAST_DELIVERIES, delivered as u64);
        delivered
    }
}

/// Outbound queues of every connected session
#[derive(Debug, Default)]
pub struct DeltaBroadcaster {
    sinks: HashMap<SessionId, Outbound>,
}

impl DeltaBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an outbound queue for `session`
    pub fn register(&mut self, session: SessionId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.insert(session, tx);
        rx
    }

    pub fn unregister(&mut self, session: SessionId) -> bool {
        self.sinks.remove(&session).is_some()
    }

    /// Drop every queue; receivers observe the close
    pub fn close_all(&mut self) {
        self.sinks.clear();
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Resolve `recipients` against the roster; each session appears once
    pub fn resolve(&self, recipients: &Recipients, roster: &Roster) -> BTreeSet<SessionId> {
        match recipients {
            Recipients::All => roster.sessions().collect(),
            Recipients::Session(s) => roster.get(*s).map(|p| p.session()).into_iter().collect(),
            Recipients::Channels(channels) => channels
                .iter()
                .flat_map(|c| roster.in_channel(*c))
                .collect(),
        }
    }

    /// Bind `message` to the current queues of `recipients`
    pub fn prepare(&self, message: ServerMessage, recipients: &Recipients, roster: &Roster) -> Delivery {
        let targets = self
            .resolve(recipients, roster)
            .into_iter()
            .filter_map(|s| self.sinks.get(&s).map(|tx| (s, tx.clone())))
            .collect();

        Delivery {
            message: Arc::new(message),
            targets,
        }
    }
}
