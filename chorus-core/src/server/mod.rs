//! Virtual server
//!
//! [`Server`] owns the channel graph, the participant roster and the ACL
//! cache of one virtual server. All state sits behind a single
//! `tokio::sync::RwLock`; mutations take the write lock, lookups and
//! permission checks take the read lock. Message delivery, persistence and
//! listener callbacks run after the lock is released.

mod registration;
mod state;

pub(crate) use state::{Effects, ServerState};

use crate::acl::{self, AclCache, ChanAcl, Permissions};
use crate::auth::{AuthResult, Authenticator};
use crate::broadcast::{Inbox, ServerMessage};
use crate::channel::{ChannelRecord, ChannelStore};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::events::{EventKind, Listener, ListenerHandle, ListenerRegistry};
use crate::group;
use crate::participant::{Participant, RequestedState};
use crate::types::{ChannelId, ServerId, SessionId, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A connected participant's handle: its session id and outbound queue
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    inbox: Inbox,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Wait for the next message; `None` once the server dropped the session
    pub async fn recv(&mut self) -> Option<Arc<ServerMessage>> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<ServerMessage>> {
        self.inbox.try_recv().ok()
    }

    /// Every message queued so far
    pub fn drain(&mut self) -> Vec<Arc<ServerMessage>> {
        let mut out = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            out.push(msg);
        }
        out
    }
}

pub struct Server {
    id: ServerId,
    name: String,
    state: RwLock<ServerState>,
    acl_cache: AclCache,
    listeners: ListenerRegistry,
    authenticator: parking_lot::RwLock<Option<Arc<dyn Authenticator>>>,
    store: parking_lot::RwLock<Option<Arc<dyn ChannelStore>>>,
}

impl Server {
    /// Server with default settings and only a root channel
    pub fn new(id: ServerId) -> Self {
        let config = ServerConfig {
            id,
            ..Default::default()
        };
        let state = ServerState::new(id, &config.root_channel_name, config.max_users);
        Self::with_state(id, config.name, state)
    }

    /// Server with the channel tree and limits from `config`
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let state = ServerState::from_config(config)?;
        Ok(Self::with_state(config.id, config.name.clone(), state))
    }

    fn with_state(id: ServerId, name: String, state: ServerState) -> Self {
        Self {
            id,
            name,
            state: RwLock::new(state),
            acl_cache: AclCache::new(),
            listeners: ListenerRegistry::new(),
            authenticator: parking_lot::RwLock::new(None),
            store: parking_lot::RwLock::new(None),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` under the write lock, then carry out its effects.
    ///
    /// Deliveries are queued before the lock is released so every session
    /// receives deltas in commit order. Persistence and listeners run unlocked.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut ServerState) -> ServerResult<(T, Effects)>,
    ) -> ServerResult<T> {
        let (value, effects) = {
            let mut state = self.state.write().await;
            let (value, mut effects) = f(&mut *state)?;
            if effects.is_empty() {
                return Ok(value);
            }
            for session in &effects.invalidate {
                self.acl_cache.invalidate(*session);
            }
            for delivery in effects.deliveries.drain(..) {
                delivery.send();
            }
            (value, effects)
        };
        self.dispatch(effects);
        Ok(value)
    }

    fn dispatch(&self, effects: Effects) {
        if !effects.persist.is_empty() {
            let store = self.store.read().clone();
            if let Some(store) = store {
                for record in &effects.persist {
                    store.update_channel(record);
                }
            }
        }

        for event in &effects.events {
            self.listeners.dispatch(event);
        }
    }

    // Participants

    /// Connect a participant into the default channel
    ///
    /// # Arguments
    /// * `name` - Display name
    /// * `user_id` - Registered user id, `None` for guests
    pub async fn connect(&self, name: impl Into<String>, user_id: Option<UserId>) -> ServerResult<Session> {
        let name = name.into();
        self.mutate(|state| {
            let (id, inbox, effects) = state.connect(name, user_id)?;
            Ok((Session { id, inbox }, effects))
        })
        .await
    }

    /// Check credentials with the attached authenticator, then connect.
    ///
    /// Without an authenticator, or for names it does not know, the
    /// participant joins as a guest.
    pub async fn connect_authenticated(&self, name: &str, password: &str) -> ServerResult<Session> {
        match self.authenticate(name, password) {
            Some(AuthResult::Accepted { user, name }) => self.connect(name, Some(user)).await,
            Some(AuthResult::Rejected) => Err(ServerError::AuthenticationRejected(name.to_string())),
            None => self.connect(name, None).await,
        }
    }

    pub async fn disconnect(&self, session: SessionId) -> ServerResult<()> {
        self.mutate(|state| Ok(((), state.disconnect(session)?))).await
    }

    /// Refuse new connections, then disconnect everyone
    pub async fn stop(&self) -> usize {
        let result = self
            .mutate(|state| {
                let count = state.roster.len();
                Ok((count, state.stop()))
            })
            .await;
        result.unwrap_or(0)
    }

    pub async fn is_stopped(&self) -> bool {
        self.state.read().await.stopped
    }

    /// Disconnect everyone and close every outbound queue
    pub async fn disconnect_all(&self) -> usize {
        let result = self
            .mutate(|state| {
                let count = state.roster.len();
                Ok((count, state.disconnect_all()))
            })
            .await;
        result.unwrap_or(0)
    }

    /// Set mute, deaf and suppressed flags and move to `channel`.
    ///
    /// Flags are normalized first: deaf implies mute, unmuted implies undeafened.
    pub async fn set_participant_state(
        &self,
        session: SessionId,
        channel: ChannelId,
        mute: bool,
        deaf: bool,
        suppressed: bool,
    ) -> ServerResult<()> {
        let requested = RequestedState::new(mute, deaf, suppressed);
        self.mutate(|state| Ok(((), state.set_participant_state(session, channel, requested)?)))
            .await
    }

    /// Replace the temporary groups of `session` on `channel` (root when `None`)
    pub async fn set_temporary_groups(
        &self,
        session: SessionId,
        channel: Option<ChannelId>,
        names: &[String],
    ) -> ServerResult<()> {
        self.mutate(|state| Ok(((), state.set_temporary_groups(session, channel, names)?)))
            .await
    }

    /// Send text to one session, one channel or a channel subtree
    ///
    /// # Arguments
    /// * `actor` - Sending session, if any
    /// * `channel` - Target channel; must exist even when `direct` is set
    /// * `direct` - Deliver only to this session
    /// * `tree` - Include every descendant of `channel`; links are not followed
    pub async fn send_text_message(
        &self,
        actor: Option<SessionId>,
        channel: ChannelId,
        direct: Option<SessionId>,
        tree: bool,
        text: &str,
    ) -> ServerResult<()> {
        self.mutate(|state| {
            Ok((
                (),
                state.send_text_message(actor, channel, direct, tree, text)?,
            ))
        })
        .await
    }

    // Channels

    pub async fn create_channel(&self, parent: ChannelId, name: &str) -> ServerResult<ChannelId> {
        self.mutate(|state| state.create_channel(parent, name)).await
    }

    pub async fn remove_channel(&self, channel: ChannelId) -> ServerResult<()> {
        self.mutate(|state| Ok(((), state.remove_channel(channel)?))).await
    }

    /// Apply a name, parent and link set to `channel` in one step.
    ///
    /// `parent` of `None` keeps the current parent. Returns `Ok(false)`, with
    /// nothing applied, when the move would put the channel under itself.
    pub async fn set_channel_state(
        &self,
        channel: ChannelId,
        parent: Option<ChannelId>,
        name: &str,
        links: &BTreeSet<ChannelId>,
    ) -> ServerResult<bool> {
        self.mutate(|state| state.set_channel_state(channel, parent, name, links))
            .await
    }

    // Access control

    pub async fn set_acl(&self, channel: ChannelId, inherit: bool, entries: Vec<ChanAcl>) -> ServerResult<()> {
        self.mutate(|state| Ok(((), state.set_acl(channel, inherit, entries)?)))
            .await
    }

    pub async fn set_group_members(
        &self,
        channel: ChannelId,
        name: &str,
        members: BTreeSet<UserId>,
    ) -> ServerResult<()> {
        self.mutate(|state| Ok(((), state.set_group_members(channel, name, members)?)))
            .await
    }

    pub async fn set_group_inheritance(
        &self,
        channel: ChannelId,
        name: &str,
        inherit: bool,
        inheritable: bool,
    ) -> ServerResult<()> {
        self.mutate(|state| {
            Ok((
                (),
                state.set_group_inheritance(channel, name, inherit, inheritable)?,
            ))
        })
        .await
    }

    /// Permissions `session` holds in `channel`, served from the cache when fresh
    pub async fn effective_permissions(&self, session: SessionId, channel: ChannelId) -> ServerResult<Permissions> {
        let state = self.state.read().await;
        let participant = state
            .roster
            .get(session)
            .ok_or(ServerError::UnknownSession(session))?;
        state.graph.require(channel)?;

        Ok(self
            .acl_cache
            .get_or_compute(session, channel, state.acl_generation, || {
                acl::evaluate(&state.graph, participant, channel)
            }))
    }

    pub async fn has_permission(&self, session: SessionId, channel: ChannelId, perm: Permissions) -> ServerResult<bool> {
        Ok(self.effective_permissions(session, channel).await?.contains(perm))
    }

    /// Whether `session` currently has cached permissions
    pub fn has_cached_permissions(&self, session: SessionId) -> bool {
        self.acl_cache.contains(session)
    }

    // Ports

    pub fn connect_authenticator(&self, authenticator: Arc<dyn Authenticator>) {
        *self.authenticator.write() = Some(authenticator);
        info!(server = %self.id, "Authenticator attached");
    }

    pub fn disconnect_authenticator(&self) -> bool {
        let had = self.authenticator.write().take().is_some();
        if had {
            info!(server = %self.id, "Authenticator detached");
        }
        had
    }

    pub fn set_channel_store(&self, store: Arc<dyn ChannelStore>) {
        *self.store.write() = Some(store);
    }

    pub fn clear_channel_store(&self) {
        self.store.write().take();
    }

    pub fn subscribe(&self, kinds: &[EventKind], listener: Listener) -> ListenerHandle {
        let handle = self.listeners.subscribe(kinds, listener);
        debug!(server = %self.id, handle = %handle, "Listener attached");
        handle
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.listeners.unsubscribe(handle)
    }

    // Lookups

    pub async fn participant(&self, session: SessionId) -> Option<Participant> {
        self.state.read().await.roster.get(session).cloned()
    }

    /// Every connected participant, ordered by session id
    pub async fn participants(&self) -> Vec<Participant> {
        let state = self.state.read().await;
        let mut all: Vec<Participant> = state.roster.participants().cloned().collect();
        all.sort_by_key(|p| p.session());
        all
    }

    pub async fn user_count(&self) -> usize {
        self.state.read().await.roster.len()
    }

    pub async fn channel(&self, channel: ChannelId) -> Option<ChannelRecord> {
        self.state.read().await.graph.get(channel).map(|c| c.record())
    }

    /// Every channel, ordered by id
    pub async fn channels(&self) -> Vec<ChannelRecord> {
        let state = self.state.read().await;
        let mut all: Vec<ChannelRecord> = state.graph.channels().map(|c| c.record()).collect();
        all.sort_by_key(|r| r.id);
        all
    }

    pub async fn links(&self, channel: ChannelId) -> ServerResult<Vec<ChannelId>> {
        let state = self.state.read().await;
        Ok(state.graph.require(channel)?.links().iter().copied().collect())
    }

    /// `channel` and its descendants in breadth-first order
    pub async fn descendants(&self, channel: ChannelId) -> ServerResult<Vec<ChannelId>> {
        let state = self.state.read().await;
        state.graph.require(channel)?;
        Ok(state.graph.descendants(channel).map(|c| c.id()).collect())
    }

    /// Sessions located in `channel`
    pub async fn sessions_in(&self, channel: ChannelId) -> Vec<SessionId> {
        self.state.read().await.roster.in_channel(channel).collect()
    }

    pub async fn temporary_groups(&self, session: SessionId, channel: ChannelId) -> ServerResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(group::temporary_groups_of(state.graph.require(channel)?, session))
    }

    pub async fn default_channel(&self) -> ChannelId {
        self.state.read().await.default_channel
    }

    /// Resolve a `/`-separated path below the root
    pub async fn resolve_path(&self, path: &str) -> ServerResult<ChannelId> {
        self.state.read().await.resolve_path(path)
    }

    fn current_authenticator(&self) -> Option<Arc<dyn Authenticator>> {
        self.authenticator.read().clone()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
