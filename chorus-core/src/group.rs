//! Per-channel named groups
//!
//! Every channel owns a `name -> Group` table. A group carries two kinds of
//! membership: persisted members (registered user ids, loaded by whoever
//! embeds the server) and temporary members (session ids assigned at runtime
//! and cleared on disconnect or reassignment).
//!
//! Group resolution walks the channel chain from the root down to the channel
//! being evaluated, so a group defined on a parent is visible to its
//! sub-channels unless the parent marks it non-inheritable or the child
//! redefines it with `inherit = false`.

use crate::channel::{Channel, ChannelGraph};
use crate::types::{ChannelId, SessionId, UserId};
use std::collections::BTreeSet;

/// A named group owned by exactly one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,

    /// Start from the parent's membership instead of an empty set
    pub inherit: bool,

    /// Whether sub-channels see this group's membership
    pub inheritable: bool,

    /// Persisted membership
    pub members: BTreeSet<UserId>,

    /// Session-scoped membership
    pub temporary: BTreeSet<SessionId>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inherit: true,
            inheritable: true,
            members: BTreeSet::new(),
            temporary: BTreeSet::new(),
        }
    }

    pub fn is_temporary_member(&self, session: SessionId) -> bool {
        self.temporary.contains(&session)
    }
}

/// Effective membership of a group as seen from one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembers {
    pub users: BTreeSet<UserId>,
    pub sessions: BTreeSet<SessionId>,
}

impl GroupMembers {
    pub fn contains(&self, session: SessionId, user: Option<UserId>) -> bool {
        self.sessions.contains(&session) || user.map_or(false, |u| self.users.contains(&u))
    }
}

/// Replace `session`'s temporary memberships on `channel` with `names`.
///
/// Groups that do not exist yet are created with default inheritance flags.
pub fn assign_temporary(channel: &mut Channel, session: SessionId, names: &[String]) {
    for group in channel.groups.values_mut() {
        group.temporary.remove(&session);
    }

    for name in names {
        channel
            .groups
            .entry(name.clone())
            .or_insert_with(|| Group::new(name.clone()))
            .temporary
            .insert(session);
    }
}

/// Drop `session` from every temporary group on every channel.
///
/// Returns the number of memberships removed.
pub fn clear_temporary(graph: &mut ChannelGraph, session: SessionId) -> usize {
    let mut removed = 0;
    for channel in graph.channels_mut() {
        for group in channel.groups.values_mut() {
            if group.temporary.remove(&session) {
                removed += 1;
            }
        }
    }
    removed
}

/// Temporary groups `session` belongs to on `channel`, by name
pub fn temporary_groups_of(channel: &Channel, session: SessionId) -> Vec<String> {
    channel
        .groups
        .values()
        .filter(|g| g.is_temporary_member(session))
        .map(|g| g.name.clone())
        .collect()
}

/// Resolve the membership of group `name` as seen from `channel`
pub fn effective_members(graph: &ChannelGraph, channel: ChannelId, name: &str) -> GroupMembers {
    let mut chain: Vec<&Channel> = graph.ancestors(channel).collect();
    chain.reverse();

    let mut members = GroupMembers::default();
    for ch in chain {
        let Some(group) = ch.groups.get(name) else {
            continue;
        };

        if !group.inherit {
            members = GroupMembers::default();
        }

        if ch.id() == channel || group.inheritable {
            members.users.extend(group.members.iter().copied());
            members.sessions.extend(group.temporary.iter().copied());
        } else {
            // Hidden from sub-channels
            members = GroupMembers::default();
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_assign_creates_groups_lazily() {
        let mut graph = ChannelGraph::new("Root");
        let root = graph.get_mut(ChannelId::ROOT).unwrap();

        assign_temporary(root, SessionId(1), &names(&["admin", "speakers"]));

        assert_eq!(root.groups.len(), 2);
        assert!(root.groups["admin"].is_temporary_member(SessionId(1)));
        assert!(root.groups["speakers"].is_temporary_member(SessionId(1)));
    }

    #[test]
    fn test_assign_replaces_previous_memberships() {
        let mut graph = ChannelGraph::new("Root");
        let root = graph.get_mut(ChannelId::ROOT).unwrap();

        assign_temporary(root, SessionId(1), &names(&["admin", "speakers"]));
        assign_temporary(root, SessionId(1), &names(&["speakers"]));

        assert!(!root.groups["admin"].is_temporary_member(SessionId(1)));
        assert!(root.groups["speakers"].is_temporary_member(SessionId(1)));
        assert_eq!(temporary_groups_of(root, SessionId(1)), names(&["speakers"]));
    }

    #[test]
    fn test_assign_empty_clears_only_that_session() {
        let mut graph = ChannelGraph::new("Root");
        let root = graph.get_mut(ChannelId::ROOT).unwrap();

        assign_temporary(root, SessionId(1), &names(&["admin"]));
        assign_temporary(root, SessionId(2), &names(&["admin"]));
        assign_temporary(root, SessionId(1), &[]);

        assert!(temporary_groups_of(root, SessionId(1)).is_empty());
        assert!(root.groups["admin"].is_temporary_member(SessionId(2)));
    }

    #[test]
    fn test_clear_temporary_across_channels() {
        let mut graph = ChannelGraph::new("Root");
        let lobby = graph.add_channel(ChannelId::ROOT, "Lobby").unwrap();

        assign_temporary(graph.get_mut(ChannelId::ROOT).unwrap(), SessionId(4), &names(&["a"]));
        assign_temporary(graph.get_mut(lobby).unwrap(), SessionId(4), &names(&["b", "c"]));

        assert_eq!(clear_temporary(&mut graph, SessionId(4)), 3);
        assert_eq!(clear_temporary(&mut graph, SessionId(4)), 0);
    }

    #[test]
    fn test_effective_members_inherits_from_parent() {
        let mut graph = ChannelGraph::new("Root");
        let lobby = graph.add_channel(ChannelId::ROOT, "Lobby").unwrap();

        graph
            .get_mut(ChannelId::ROOT)
            .unwrap()
            .groups
            .insert("admin".into(), {
                let mut g = Group::new("admin");
                g.members.insert(UserId(5));
                g
            });

        let members = effective_members(&graph, lobby, "admin");
        assert!(members.users.contains(&UserId(5)));
    }

    #[test]
    fn test_effective_members_respects_non_inheritable() {
        let mut graph = ChannelGraph::new("Root");
        let lobby = graph.add_channel(ChannelId::ROOT, "Lobby").unwrap();

        let mut group = Group::new("admin");
        group.inheritable = false;
        group.members.insert(UserId(5));
        graph.get_mut(ChannelId::ROOT).unwrap().groups.insert("admin".into(), group);

        assert!(effective_members(&graph, lobby, "admin").users.is_empty());
        assert!(effective_members(&graph, ChannelId::ROOT, "admin")
            .users
            .contains(&UserId(5)));
    }

    #[test]
    fn test_effective_members_non_inheriting_child_resets() {
        let mut graph = ChannelGraph::new("Root");
        let lobby = graph.add_channel(ChannelId::ROOT, "Lobby").unwrap();

        let mut parent = Group::new("admin");
        parent.members.insert(UserId(5));
        graph.get_mut(ChannelId::ROOT).unwrap().groups.insert("admin".into(), parent);

        let mut child = Group::new("admin");
        child.inherit = false;
        child.temporary.insert(SessionId(9));
        graph.get_mut(lobby).unwrap().groups.insert("admin".into(), child);

        let members = effective_members(&graph, lobby, "admin");
        assert!(members.users.is_empty());
        assert!(members.contains(SessionId(9), None));
    }
}
