//! Lock-protected server state
//!
//! Every mutation here runs under the server's write lock and returns an
//! [`Effects`] batch: messages to deliver, which are queued before the lock is
//! released, plus channels to persist and events to raise once it is.

use crate::acl::ChanAcl;
use crate::broadcast::{
    ChannelRemove, ChannelState, DeltaBroadcaster, Delivery, Inbox, Recipients, ServerMessage,
    TextMessage, UserRemove, UserState,
};
use crate::channel::{ChannelGraph, ChannelRecord};
use crate::config::{split_path, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::events::ServerEvent;
use crate::group::{self, Group};
use crate::metrics;
use crate::participant::{RequestedState, Roster, StateChange};
use crate::types::{ChannelId, ServerId, SessionId, UserId};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Work deferred until the state lock is released
#[derive(Debug, Default)]
#[must_use]
pub struct Effects {
    pub deliveries: Vec<Delivery>,
    pub persist: Vec<ChannelRecord>,
    pub events: Vec<ServerEvent>,
    /// Sessions whose cached permissions are stale
    pub invalidate: Vec<SessionId>,
    /// The ACL generation moved
    pub acl_changed: bool,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
            && self.persist.is_empty()
            && self.events.is_empty()
            && self.invalidate.is_empty()
            && !self.acl_changed
    }
}

#[derive(Debug)]
pub struct ServerState {
    pub(crate) server: ServerId,
    pub(crate) graph: ChannelGraph,
    pub(crate) roster: Roster,
    pub(crate) broadcaster: DeltaBroadcaster,
    /// Bumped on every ACL-relevant mutation
    pub(crate) acl_generation: u64,
    pub(crate) default_channel: ChannelId,
    pub(crate) max_users: usize,
    /// Set once the server is stopped; connections are refused afterwards
    pub(crate) stopped: bool,
}

impl ServerState {
    pub fn new(server: ServerId, root_name: &str, max_users: usize) -> Self {
        Self {
            server,
            graph: ChannelGraph::new(root_name),
            roster: Roster::new(),
            broadcaster: DeltaBroadcaster::new(),
            acl_generation: 0,
            default_channel: ChannelId::ROOT,
            max_users,
            stopped: false,
        }
    }

    /// Build the initial channel tree described by `config`
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let mut state = Self::new(config.id, &config.root_channel_name, config.max_users);

        for seed in &config.channels {
            let parent = state.resolve_path(seed.parent.as_deref().unwrap_or(""))?;
            state.graph.add_channel(parent, seed.name.clone())?;
        }

        for link in &config.links {
            let a = state.resolve_path(&link.a)?;
            let b = state.resolve_path(&link.b)?;
            let mut links = state.graph.require(a)?.links().clone();
            links.insert(b);
            state.graph.set_links(a, &links);
        }

        if let Some(path) = &config.default_channel {
            state.default_channel = state.resolve_path(path)?;
        }

        info!(
            server = %config.id,
            channels = state.graph.len(),
            default_channel = %state.default_channel,
            "Server state built"
        );
        Ok(state)
    }

    /// Resolve a `/`-separated channel path below the root
    pub fn resolve_path(&self, path: &str) -> ServerResult<ChannelId> {
        let mut current = ChannelId::ROOT;
        for name in split_path(path) {
            current = self.graph.child_named(current, name).ok_or_else(|| {
                ServerError::Config(format!("no channel at path '{}'", path))
            })?;
        }
        Ok(current)
    }

    fn require_session(&self, session: SessionId) -> ServerResult<()> {
        if self.roster.contains(session) {
            Ok(())
        } else {
            Err(ServerError::UnknownSession(session))
        }
    }

    fn bump_acl(&mut self, effects: &mut Effects) {
        self.acl_generation += 1;
        effects.acl_changed = true;
    }

    fn deliver(&self, effects: &mut Effects, message: ServerMessage, recipients: &Recipients) {
        effects
            .deliveries
            .push(self.broadcaster.prepare(message, recipients, &self.roster));
    }

    pub fn connect(&mut self, name: String, user_id: Option<UserId>) -> ServerResult<(SessionId, Inbox, Effects)> {
        if self.stopped {
            return Err(ServerError::ServerStopped(self.server));
        }
        if self.roster.len() >= self.max_users {
            warn!(server = %self.server, max_users = self.max_users, "Connection refused, server full");
            return Err(ServerError::ServerFull(self.max_users));
        }

        let channel = if self.graph.contains(self.default_channel) {
            self.default_channel
        } else {
            ChannelId::ROOT
        };
        let session = self.roster.insert(name, user_id, channel);
        let inbox = self.broadcaster.register(session);

        let mut effects = Effects::default();
        if let Some(p) = self.roster.get(session) {
            self.deliver(&mut effects, ServerMessage::UserState(UserState::full(p)), &Recipients::All);
            effects.events.push(ServerEvent::ParticipantConnected {
                server: self.server,
                participant: p.clone(),
            });
        }

        metrics::record_gauge(metrics::SESSIONS_CONNECTED, self.roster.len() as f64);
        info!(server = %self.server, session = %session, channel = %channel, "Participant connected");
        Ok((session, inbox, effects))
    }

    pub fn disconnect(&mut self, session: SessionId) -> ServerResult<Effects> {
        self.require_session(session)?;

        let cleared = group::clear_temporary(&mut self.graph, session);
        self.roster.remove(session);
        self.broadcaster.unregister(session);

        let mut effects = Effects::default();
        effects.invalidate.push(session);
        self.deliver(
            &mut effects,
            ServerMessage::UserRemove(UserRemove { session }),
            &Recipients::All,
        );
        effects.events.push(ServerEvent::ParticipantDisconnected {
            server: self.server,
            session,
        });

        metrics::record_gauge(metrics::SESSIONS_CONNECTED, self.roster.len() as f64);
        info!(server = %self.server, session = %session, groups_cleared = cleared, "Participant disconnected");
        Ok(effects)
    }

    pub fn set_participant_state(
        &mut self,
        session: SessionId,
        channel: ChannelId,
        requested: RequestedState,
    ) -> ServerResult<Effects> {
        self.require_session(session)?;
        self.graph.require(channel)?;

        let mut effects = Effects::default();
        let change = self
            .roster
            .apply_state(session, channel, requested)
            .ok_or(ServerError::UnknownSession(session))?;

        if change.is_empty() {
            return Ok(effects);
        }

        if change.channel.is_some() {
            effects.invalidate.push(session);
        }

        self.deliver(
            &mut effects,
            ServerMessage::UserState(UserState::from_change(session, &change)),
            &Recipients::All,
        );
        if let Some(p) = self.roster.get(session) {
            effects.events.push(ServerEvent::ParticipantStateChanged {
                server: self.server,
                participant: p.clone(),
            });
        }

        debug!(session = %session, change = ?change, "Participant state changed");
        Ok(effects)
    }

    /// Returns `Ok((false, _))` with nothing changed when the reparent would
    /// create a cycle or move the root.
    pub fn set_channel_state(
        &mut self,
        channel: ChannelId,
        parent: Option<ChannelId>,
        name: &str,
        links: &BTreeSet<ChannelId>,
    ) -> ServerResult<(bool, Effects)> {
        let current = self.graph.require(channel)?;
        let current_parent = current.parent();
        if let Some(p) = parent {
            self.graph.require(p)?;
        }

        let mut effects = Effects::default();
        let new_parent = parent.filter(|p| Some(*p) != current_parent && *p != channel);

        if let Some(p) = new_parent {
            if channel.is_root() || self.graph.is_ancestor(channel, p) {
                metrics::record_counter(metrics::REPARENT_REJECTED, 1);
                warn!(channel = %channel, new_parent = %p, "Channel move rejected, would create a cycle");
                return Ok((false, effects));
            }
        }

        let mut updated = false;
        let mut changed = false;
        let mut delta = ChannelState::new(channel);

        if self.graph.rename(channel, name) {
            updated = true;
            changed = true;
            delta.name = Some(name.to_string());
        }

        if let Some(p) = new_parent {
            if self.graph.reparent(channel, p) {
                updated = true;
                changed = true;
                delta.parent = Some(p);
                self.bump_acl(&mut effects);
            }
        }

        let diff = self.graph.set_links(channel, links);
        if !diff.is_empty() {
            changed = true;
            delta.links_add = diff.added;
            delta.links_remove = diff.removed;
        }

        let record = self.graph.require(channel)?.record();
        if updated {
            effects.persist.push(record.clone());
        }
        if changed {
            self.deliver(&mut effects, ServerMessage::ChannelState(delta), &Recipients::All);
            effects.events.push(ServerEvent::ChannelStateChanged {
                server: self.server,
                channel: record,
            });
            debug!(channel = %channel, updated, "Channel state changed");
        }

        Ok((true, effects))
    }

    /// `None` targets the root channel
    pub fn set_temporary_groups(
        &mut self,
        session: SessionId,
        channel: Option<ChannelId>,
        names: &[String],
    ) -> ServerResult<Effects> {
        let channel = channel.unwrap_or(ChannelId::ROOT);
        let ch = self
            .graph
            .get_mut(channel)
            .ok_or(ServerError::UnknownChannel(channel))?;
        group::assign_temporary(ch, session, names);

        let mut effects = Effects::default();
        if self.roster.contains(session) {
            effects.invalidate.push(session);
        }

        debug!(session = %session, channel = %channel, groups = ?names, "Temporary groups set");
        Ok(effects)
    }

    pub fn send_text_message(
        &mut self,
        actor: Option<SessionId>,
        channel: ChannelId,
        direct: Option<SessionId>,
        tree: bool,
        text: &str,
    ) -> ServerResult<Effects> {
        self.graph.require(channel)?;

        let mut message = TextMessage {
            actor,
            message: text.to_string(),
            ..Default::default()
        };

        let recipients = match direct {
            Some(target) => {
                self.require_session(target)?;
                message.sessions = vec![target];
                Recipients::Session(target)
            }
            None => {
                if tree {
                    message.tree_ids = vec![channel];
                } else {
                    message.channel_ids = vec![channel];
                }
                Recipients::channel_scope(&self.graph, channel, tree)
            }
        };

        let mut effects = Effects::default();
        self.deliver(&mut effects, ServerMessage::TextMessage(message), &recipients);
        debug!(channel = %channel, direct = ?direct, tree, "Text message queued");
        Ok(effects)
    }

    pub fn create_channel(&mut self, parent: ChannelId, name: &str) -> ServerResult<(ChannelId, Effects)> {
        let id = self.graph.add_channel(parent, name)?;
        let channel = self.graph.require(id)?;

        let mut effects = Effects::default();
        effects.persist.push(channel.record());
        effects.events.push(ServerEvent::ChannelCreated {
            server: self.server,
            channel: channel.record(),
        });
        self.deliver(
            &mut effects,
            ServerMessage::ChannelState(ChannelState::full(channel)),
            &Recipients::All,
        );

        info!(channel = %id, parent = %parent, name = %name, "Channel created");
        Ok((id, effects))
    }

    /// Participants inside the removed subtree move to its parent first
    pub fn remove_channel(&mut self, channel: ChannelId) -> ServerResult<Effects> {
        if channel.is_root() {
            return Err(ServerError::RootChannel);
        }
        let parent = self
            .graph
            .require(channel)?
            .parent()
            .unwrap_or(ChannelId::ROOT);

        let mut effects = Effects::default();

        let displaced: Vec<SessionId> = self
            .graph
            .descendants(channel)
            .flat_map(|c| self.roster.in_channel(c.id()).collect::<Vec<_>>())
            .collect();
        for session in displaced {
            if self.roster.move_to(session, parent).is_some() {
                let change = StateChange {
                    channel: Some(parent),
                    ..Default::default()
                };
                effects.invalidate.push(session);
                self.deliver(
                    &mut effects,
                    ServerMessage::UserState(UserState::from_change(session, &change)),
                    &Recipients::All,
                );
                if let Some(p) = self.roster.get(session) {
                    effects.events.push(ServerEvent::ParticipantStateChanged {
                        server: self.server,
                        participant: p.clone(),
                    });
                }
            }
        }

        if self.default_channel != ChannelId::ROOT && self.graph.is_ancestor(channel, self.default_channel) {
            self.default_channel = parent;
        }

        let removed = self.graph.remove_channel(channel)?;
        for id in &removed {
            self.deliver(
                &mut effects,
                ServerMessage::ChannelRemove(ChannelRemove { channel_id: *id }),
                &Recipients::All,
            );
            effects.events.push(ServerEvent::ChannelRemoved {
                server: self.server,
                channel: *id,
            });
        }
        self.bump_acl(&mut effects);

        info!(channel = %channel, removed = removed.len(), "Channel removed");
        Ok(effects)
    }

    pub fn set_acl(&mut self, channel: ChannelId, inherit: bool, entries: Vec<ChanAcl>) -> ServerResult<Effects> {
        let ch = self
            .graph
            .get_mut(channel)
            .ok_or(ServerError::UnknownChannel(channel))?;
        ch.inherit_acl = inherit;
        ch.acls = entries;

        let mut effects = Effects::default();
        self.bump_acl(&mut effects);
        debug!(channel = %channel, inherit, generation = self.acl_generation, "ACL replaced");
        Ok(effects)
    }

    /// Replace the permanent members of a group, creating it if needed
    pub fn set_group_members(
        &mut self,
        channel: ChannelId,
        name: &str,
        members: BTreeSet<UserId>,
    ) -> ServerResult<Effects> {
        let ch = self
            .graph
            .get_mut(channel)
            .ok_or(ServerError::UnknownChannel(channel))?;
        ch.groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name))
            .members = members;

        let mut effects = Effects::default();
        self.bump_acl(&mut effects);
        debug!(channel = %channel, group = %name, "Group members replaced");
        Ok(effects)
    }

    pub fn set_group_inheritance(
        &mut self,
        channel: ChannelId,
        name: &str,
        inherit: bool,
        inheritable: bool,
    ) -> ServerResult<Effects> {
        let ch = self
            .graph
            .get_mut(channel)
            .ok_or(ServerError::UnknownChannel(channel))?;
        let group = ch
            .groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name));
        group.inherit = inherit;
        group.inheritable = inheritable;

        let mut effects = Effects::default();
        self.bump_acl(&mut effects);
        Ok(effects)
    }

    /// Disconnect every session and close all outbound queues
    pub fn disconnect_all(&mut self) -> Effects {
        let mut all = Effects::default();
        let sessions: Vec<SessionId> = self.roster.sessions().collect();
        for session in sessions {
            if let Ok(effects) = self.disconnect(session) {
                all.deliveries.extend(effects.deliveries);
                all.events.extend(effects.events);
                all.invalidate.extend(effects.invalidate);
            }
        }
        self.broadcaster.close_all();
        all
    }

    /// Disconnect everyone and refuse further connections
    pub fn stop(&mut self) -> Effects {
        self.stopped = true;
        info!(server = %self.server, "Server state stopped");
        self.disconnect_all()
    }
}
