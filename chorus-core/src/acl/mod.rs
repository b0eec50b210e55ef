//! Channel access control
//!
//! ACL entries live on channels and are evaluated from the root down to the
//! channel being checked. Results are memoized per session in [`AclCache`].

mod cache;
mod permissions;

pub use cache::AclCache;
pub use permissions::Permissions;

use crate::channel::ChannelGraph;
use crate::group::effective_members;
use crate::participant::Participant;
use crate::types::{ChannelId, UserId};
use serde::{Deserialize, Serialize};

/// Who an ACL entry applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclTarget {
    /// A group name, including the built-ins `all`, `auth`, `in` and `out`
    Group(String),
    /// A single registered user
    User(UserId),
}

/// One access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChanAcl {
    pub apply_here: bool,
    pub apply_subs: bool,
    pub target: AclTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl ChanAcl {
    pub fn group(name: impl Into<String>, allow: Permissions, deny: Permissions) -> Self {
        Self {
            apply_here: true,
            apply_subs: true,
            target: AclTarget::Group(name.into()),
            allow,
            deny,
        }
    }

    pub fn user(user: UserId, allow: Permissions, deny: Permissions) -> Self {
        Self {
            apply_here: true,
            apply_subs: true,
            target: AclTarget::User(user),
            allow,
            deny,
        }
    }
}

/// Whether `participant` is covered by `target`.
///
/// Named groups resolve on `defined_on` (the channel holding the entry);
/// `in` and `out` compare against `checked` (the channel being evaluated).
fn target_matches(
    graph: &ChannelGraph,
    target: &AclTarget,
    defined_on: ChannelId,
    checked: ChannelId,
    participant: &Participant,
) -> bool {
    match target {
        AclTarget::User(user) => participant.user_id() == Some(*user),
        AclTarget::Group(name) => match name.as_str() {
            "all" => true,
            "auth" => participant.user_id().is_some(),
            "in" => participant.channel() == checked,
            "out" => participant.channel() != checked,
            _ => effective_members(graph, defined_on, name)
                .contains(participant.session(), participant.user_id()),
        },
    }
}

/// Compute the permissions `participant` holds in `channel`
pub fn evaluate(graph: &ChannelGraph, participant: &Participant, channel: ChannelId) -> Permissions {
    if participant.user_id().map_or(false, |u| u.is_superuser()) {
        return Permissions::ALL;
    }

    let mut chain: Vec<_> = graph.ancestors(channel).collect();
    if chain.is_empty() {
        return Permissions::NONE;
    }
    chain.reverse();

    let mut granted = Permissions::DEFAULT;
    for ch in chain {
        if !ch.inherit_acl {
            granted = Permissions::DEFAULT;
        }

        let here = ch.id() == channel;
        for acl in &ch.acls {
            let applies = (here && acl.apply_here) || (!here && acl.apply_subs);
            if applies && target_matches(graph, &acl.target, ch.id(), channel, participant) {
                granted.insert(acl.allow);
                granted.remove(acl.deny);
            }
        }

        if !here && !granted.contains(Permissions::TRAVERSE) {
            return Permissions::NONE;
        }
    }

    granted
}
