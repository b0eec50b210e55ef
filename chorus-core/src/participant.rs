//! Connected participants and the channel roster
//!
//! The roster is a bidirectional index: session -> participant (which knows
//! its channel) and channel -> sessions. Both directions are only ever
//! updated together through [`Roster`] methods.

use crate::types::{ChannelId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// A connected session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    session: SessionId,
    name: String,
    user_id: Option<UserId>,
    channel: ChannelId,
    muted: bool,
    deafened: bool,
    suppressed: bool,
}

impl Participant {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration id, if the participant authenticated as a registered user
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }
}

/// Mute/deaf/suppress flags as requested by a caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedState {
    pub mute: bool,
    pub deaf: bool,
    pub suppressed: bool,
}

impl RequestedState {
    pub fn new(mute: bool, deaf: bool, suppressed: bool) -> Self {
        Self {
            mute,
            deaf,
            suppressed,
        }
    }

    /// Deaf implies mute; un-muting implies un-deafening
    pub fn normalized(mut self) -> Self {
        if self.deaf {
            self.mute = true;
        }
        if !self.mute {
            self.deaf = false;
        }
        self
    }
}

/// Fields that actually changed in one state transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateChange {
    pub channel: Option<ChannelId>,
    pub mute: Option<bool>,
    pub deaf: Option<bool>,
    pub suppressed: Option<bool>,
}

impl StateChange {
    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
            && self.mute.is_none()
            && self.deaf.is_none()
            && self.suppressed.is_none()
    }
}

/// All connected participants, indexed both ways
#[derive(Debug)]
pub struct Roster {
    participants: HashMap<SessionId, Participant>,
    by_channel: HashMap<ChannelId, BTreeSet<SessionId>>,
    next_session: u32,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            participants: HashMap::new(),
            by_channel: HashMap::new(),
            next_session: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get(&self, session: SessionId) -> Option<&Participant> {
        self.participants.get(&session)
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.participants.contains_key(&session)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn sessions(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.participants.keys().copied()
    }

    /// Sessions currently located in `channel`
    pub fn in_channel(&self, channel: ChannelId) -> impl Iterator<Item = SessionId> + '_ {
        self.by_channel
            .get(&channel)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Add a new participant to `channel`, returning its session id
    pub fn insert(&mut self, name: String, user_id: Option<UserId>, channel: ChannelId) -> SessionId {
        let session = SessionId(self.next_session);
        self.next_session += 1;

        self.participants.insert(
            session,
            Participant {
                session,
                name,
                user_id,
                channel,
                muted: false,
                deafened: false,
                suppressed: false,
            },
        );
        self.by_channel.entry(channel).or_default().insert(session);
        session
    }

    pub fn remove(&mut self, session: SessionId) -> Option<Participant> {
        let participant = self.participants.remove(&session)?;
        self.detach(session, participant.channel);
        Some(participant)
    }

    /// Move `session` into `channel`, returning the channel it left
    pub fn move_to(&mut self, session: SessionId, channel: ChannelId) -> Option<ChannelId> {
        let participant = self.participants.get_mut(&session)?;
        let old = participant.channel;
        if old == channel {
            return None;
        }
        participant.channel = channel;

        self.detach(session, old);
        self.by_channel.entry(channel).or_default().insert(session);
        trace!(session = %session, from = %old, to = %channel, "Participant moved");
        Some(old)
    }

    /// Apply a requested state and return the fields that changed.
    ///
    /// Flags are normalized before comparison and always written back, the
    /// channel move (if any) happens as part of the same update.
    pub fn apply_state(
        &mut self,
        session: SessionId,
        channel: ChannelId,
        requested: RequestedState,
    ) -> Option<StateChange> {
        let requested = requested.normalized();
        let participant = self.participants.get_mut(&session)?;

        let mut change = StateChange::default();
        if requested.mute != participant.muted {
            change.mute = Some(requested.mute);
        }
        if requested.deaf != participant.deafened {
            change.deaf = Some(requested.deaf);
        }
        if requested.suppressed != participant.suppressed {
            change.suppressed = Some(requested.suppressed);
        }

        participant.muted = requested.mute;
        participant.deafened = requested.deaf;
        participant.suppressed = requested.suppressed;

        if participant.channel != channel {
            change.channel = Some(channel);
            self.move_to(session, channel);
        }

        Some(change)
    }

    fn detach(&mut self, session: SessionId, channel: ChannelId) {
        if let Some(set) = self.by_channel.get_mut(&channel) {
            set.remove(&session);
            if set.is_empty() {
                self.by_channel.remove(&channel);
            }
        }
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}
