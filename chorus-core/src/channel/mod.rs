//! Channel tree and link graph
//!
//! ## Architecture
//!
//! - **Channel**: a named node; owns its groups and ACL entries
//! - **ChannelGraph**: owns every channel, the parent/child tree and the
//!   symmetric link relation
//!
//! The tree and the link relation are independent: reparenting never touches
//! links and relinking never touches the tree.

mod graph;

pub use graph::{Ancestors, ChannelGraph, Descendants, LinkDiff};

use crate::acl::ChanAcl;
use crate::group::Group;
use crate::types::ChannelId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A node of the channel tree
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    name: String,
    parent: Option<ChannelId>,
    children: Vec<ChannelId>,
    links: BTreeSet<ChannelId>,

    /// Groups defined on this channel, by name
    pub groups: BTreeMap<String, Group>,

    /// Start ACL evaluation from the parent's result instead of the defaults
    pub inherit_acl: bool,

    /// ACL entries, evaluated in order
    pub acls: Vec<ChanAcl>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, name: String, parent: Option<ChannelId>) -> Self {
        Self {
            id,
            name,
            parent,
            children: Vec::new(),
            links: BTreeSet::new(),
            groups: BTreeMap::new(),
            inherit_acl: true,
            acls: Vec::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` only for the root
    pub fn parent(&self) -> Option<ChannelId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[ChannelId] {
        &self.children
    }

    pub fn links(&self) -> &BTreeSet<ChannelId> {
        &self.links
    }

    pub fn is_linked_to(&self, other: ChannelId) -> bool {
        self.links.contains(&other)
    }

    /// Durable fields handed to the persistence port
    pub fn record(&self) -> ChannelRecord {
        ChannelRecord {
            id: self.id,
            name: self.name.clone(),
            parent: self.parent,
        }
    }
}

/// Snapshot of a channel's persistence-relevant fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub name: String,
    pub parent: Option<ChannelId>,
}

/// Persistence collaborator notified when a channel's durable fields change
pub trait ChannelStore: Send + Sync {
    fn update_channel(&self, record: &ChannelRecord);
}
