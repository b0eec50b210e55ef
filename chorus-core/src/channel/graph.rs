//! Channel graph: tree shape, links and traversal

use super::Channel;
use crate::error::{ServerError, ServerResult};
use crate::types::ChannelId;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Link changes produced by [`ChannelGraph::set_links`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDiff {
    pub added: Vec<ChannelId>,
    pub removed: Vec<ChannelId>,
}

impl LinkDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Owner of every channel plus the tree and link relations between them
#[derive(Debug, Clone)]
pub struct ChannelGraph {
    channels: HashMap<ChannelId, Channel>,
    next_id: u32,
}

impl ChannelGraph {
    /// Create a graph holding only the root channel
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut channels = HashMap::new();
        channels.insert(
            ChannelId::ROOT,
            Channel::new(ChannelId::ROOT, root_name.into(), None),
        );

        Self {
            channels,
            next_id: 1,
        }
    }

    pub fn root(&self) -> &Channel {
        &self.channels[&ChannelId::ROOT]
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    /// Look up a channel, failing with [`ServerError::UnknownChannel`]
    pub fn require(&self, id: ChannelId) -> ServerResult<&Channel> {
        self.channels.get(&id).ok_or(ServerError::UnknownChannel(id))
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub(crate) fn channels_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.values_mut()
    }

    /// Find a direct child of `parent` by name
    pub fn child_named(&self, parent: ChannelId, name: &str) -> Option<ChannelId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.channels.get(c).map_or(false, |ch| ch.name == name))
    }

    /// Create a channel under `parent` and return its id
    pub fn add_channel(&mut self, parent: ChannelId, name: impl Into<String>) -> ServerResult<ChannelId> {
        if !self.contains(parent) {
            return Err(ServerError::UnknownChannel(parent));
        }

        let id = ChannelId(self.next_id);
        self.next_id += 1;

        self.channels
            .insert(id, Channel::new(id, name.into(), Some(parent)));
        if let Some(p) = self.channels.get_mut(&parent) {
            p.children.push(id);
        }

        debug!(channel = %id, parent = %parent, "Channel added");
        Ok(id)
    }

    /// Remove `id` and its whole subtree.
    ///
    /// Every link touching a removed channel is dropped from both endpoints.
    /// Returns the removed ids, deepest first.
    pub fn remove_channel(&mut self, id: ChannelId) -> ServerResult<Vec<ChannelId>> {
        if id.is_root() {
            return Err(ServerError::RootChannel);
        }
        let parent = self.require(id)?.parent;

        let mut removed: Vec<ChannelId> = self.descendants(id).map(|c| c.id).collect();
        removed.reverse();

        for &gone in &removed {
            let links: Vec<ChannelId> = self.channels[&gone].links.iter().copied().collect();
            for other in links {
                if let Some(ch) = self.channels.get_mut(&other) {
                    ch.links.remove(&gone);
                }
            }
        }

        if let Some(p) = parent.and_then(|p| self.channels.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }

        for gone in &removed {
            self.channels.remove(gone);
        }

        debug!(channel = %id, count = removed.len(), "Channel subtree removed");
        Ok(removed)
    }

    /// Whether `ancestor` is `channel` itself or one of its ancestors
    pub fn is_ancestor(&self, ancestor: ChannelId, channel: ChannelId) -> bool {
        self.ancestors(channel).any(|c| c.id == ancestor)
    }

    /// Move `channel` under `new_parent`.
    ///
    /// Rejected without mutation if `new_parent` is `channel` itself or any of
    /// its descendants, if `channel` is the root, or if either id is unknown.
    pub fn reparent(&mut self, channel: ChannelId, new_parent: ChannelId) -> bool {
        if channel.is_root() || !self.contains(channel) || !self.contains(new_parent) {
            return false;
        }

        // Walk up from the new parent; meeting `channel` means a cycle
        if self.is_ancestor(channel, new_parent) {
            trace!(channel = %channel, new_parent = %new_parent, "Reparent would create a cycle");
            return false;
        }

        let old_parent = self.channels[&channel].parent;
        if old_parent == Some(new_parent) {
            return true;
        }

        if let Some(old) = old_parent.and_then(|p| self.channels.get_mut(&p)) {
            old.children.retain(|c| *c != channel);
        }
        if let Some(np) = self.channels.get_mut(&new_parent) {
            np.children.push(channel);
        }
        if let Some(ch) = self.channels.get_mut(&channel) {
            ch.parent = Some(new_parent);
        }

        debug!(channel = %channel, new_parent = %new_parent, "Channel reparented");
        true
    }

    /// Rename `channel`; returns whether the name actually changed
    pub fn rename(&mut self, channel: ChannelId, name: &str) -> bool {
        match self.channels.get_mut(&channel) {
            Some(ch) if ch.name != name => {
                ch.name = name.to_string();
                true
            }
            _ => false,
        }
    }

    /// Replace the link set of `channel`, keeping the relation symmetric.
    ///
    /// Self links and unknown ids in `new_links` are ignored.
    pub fn set_links(&mut self, channel: ChannelId, new_links: &BTreeSet<ChannelId>) -> LinkDiff {
        let Some(current) = self.channels.get(&channel).map(|c| c.links.clone()) else {
            return LinkDiff::default();
        };

        let wanted: BTreeSet<ChannelId> = new_links
            .iter()
            .copied()
            .filter(|l| *l != channel && self.contains(*l))
            .collect();

        let diff = LinkDiff {
            added: wanted.difference(&current).copied().collect(),
            removed: current.difference(&wanted).copied().collect(),
        };

        for other in &diff.removed {
            self.unlink(channel, *other);
        }
        for other in &diff.added {
            self.link(channel, *other);
        }

        diff
    }

    fn link(&mut self, a: ChannelId, b: ChannelId) {
        if let Some(ch) = self.channels.get_mut(&a) {
            ch.links.insert(b);
        }
        if let Some(ch) = self.channels.get_mut(&b) {
            ch.links.insert(a);
        }
    }

    fn unlink(&mut self, a: ChannelId, b: ChannelId) {
        if let Some(ch) = self.channels.get_mut(&a) {
            ch.links.remove(&b);
        }
        if let Some(ch) = self.channels.get_mut(&b) {
            ch.links.remove(&a);
        }
    }

    /// `channel` followed by each of its ancestors up to the root
    pub fn ancestors(&self, channel: ChannelId) -> Ancestors<'_> {
        Ancestors {
            graph: self,
            next: Some(channel),
        }
    }

    /// Breadth-first walk yielding `channel` then its descendants level by level
    pub fn descendants(&self, channel: ChannelId) -> Descendants<'_> {
        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();
        if self.contains(channel) {
            queue.push_back(channel);
            seen.insert(channel);
        }

        Descendants {
            graph: self,
            queue,
            seen,
        }
    }
}

/// Iterator over a channel and its ancestors
pub struct Ancestors<'a> {
    graph: &'a ChannelGraph,
    next: Option<ChannelId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Channel;

    fn next(&mut self) -> Option<Self::Item> {
        let channel = self.graph.get(self.next?)?;
        self.next = channel.parent;
        Some(channel)
    }
}

/// Lazy breadth-first traversal of a subtree
pub struct Descendants<'a> {
    graph: &'a ChannelGraph,
    queue: VecDeque<ChannelId>,
    seen: HashSet<ChannelId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Channel;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.queue.pop_front() {
            let Some(channel) = self.graph.get(id) else {
                continue;
            };
            for child in &channel.children {
                if self.seen.insert(*child) {
                    self.queue.push_back(*child);
                }
            }
            return Some(channel);
        }
        None
    }
}
