/*
    Server Integration Tests

    Drives a virtual server through its public async API and checks what
    connected sessions and listeners observe:
    - Tree-scoped and direct text delivery
    - Delta ordering under concurrent mutations
    - Cycle rejection on channel moves
    - Minimal state deltas
    - Temporary group isolation and ACL cache invalidation
    - Listener delivery counts
    - Authenticator absence
*/

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chorus_core::broadcast::{ChannelState, ServerMessage, TextMessage, UserState};
use chorus_core::channel::{ChannelRecord, ChannelStore};
use chorus_core::config::{ChannelSeed, ServerConfig};
use chorus_core::events::ServerEvent;
use chorus_core::{
    ChanAcl, ChannelId, EventKind, Permissions, Server, ServerError, ServerId, Session, UserId,
};

/// R -> {C1 -> {C3}, C2}
struct Fixture {
    server: Server,
    c1: ChannelId,
    c2: ChannelId,
    c3: ChannelId,
}

impl Fixture {
    async fn new() -> Self {
        let config = ServerConfig {
            id: ServerId(1),
            channels: vec![
                ChannelSeed { name: "C1".into(), parent: None },
                ChannelSeed { name: "C2".into(), parent: None },
                ChannelSeed { name: "C3".into(), parent: Some("C1".into()) },
            ],
            ..Default::default()
        };
        let server = Server::from_config(&config).unwrap();
        let c1 = server.resolve_path("C1").await.unwrap();
        let c2 = server.resolve_path("C2").await.unwrap();
        let c3 = server.resolve_path("C1/C3").await.unwrap();
        Self { server, c1, c2, c3 }
    }

    /// Connect a participant and move it into `channel`, discarding setup traffic
    async fn join(&self, name: &str, channel: ChannelId) -> Session {
        let session = self.server.connect(name, None).await.unwrap();
        self.server
            .set_participant_state(session.id(), channel, false, false, false)
            .await
            .unwrap();
        session
    }
}

fn texts(session: &mut Session) -> Vec<TextMessage> {
    session
        .drain()
        .into_iter()
        .filter_map(|m| match m.as_ref() {
            ServerMessage::TextMessage(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

fn user_states(session: &mut Session) -> Vec<UserState> {
    session
        .drain()
        .into_iter()
        .filter_map(|m| match m.as_ref() {
            ServerMessage::UserState(u) => Some(u.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_tree_fan_out() {
    let f = Fixture::new().await;
    let mut pr = f.join("pr", ChannelId::ROOT).await;
    let mut p1 = f.join("p1", f.c1).await;
    let mut p2 = f.join("p2", f.c2).await;
    let mut p3 = f.join("p3", f.c3).await;
    for s in [&mut pr, &mut p1, &mut p2, &mut p3] {
        s.drain();
    }

    f.server
        .send_text_message(None, f.c1, None, true, "hello tree")
        .await
        .unwrap();

    let got1 = texts(&mut p1);
    assert_eq!(got1.len(), 1);
    assert_eq!(got1[0].tree_ids, vec![f.c1]);
    assert!(got1[0].channel_ids.is_empty());
    assert_eq!(texts(&mut p3).len(), 1);
    assert!(texts(&mut p2).is_empty());
    assert!(texts(&mut pr).is_empty());
}

#[tokio::test]
async fn test_tree_fan_out_from_root_reaches_everyone_once() {
    let f = Fixture::new().await;
    let mut sessions = vec![
        f.join("pr", ChannelId::ROOT).await,
        f.join("p1", f.c1).await,
        f.join("p2", f.c2).await,
        f.join("p3", f.c3).await,
    ];
    for s in sessions.iter_mut() {
        s.drain();
    }

    f.server
        .send_text_message(None, ChannelId::ROOT, None, true, "hi")
        .await
        .unwrap();

    for s in sessions.iter_mut() {
        let got = texts(s);
        assert_eq!(got.len(), 1, "session {} got {:?}", s.id(), got);
        assert_eq!(got[0].tree_ids, vec![ChannelId::ROOT]);
    }
}

#[tokio::test]
async fn test_tree_fan_out_ignores_links() {
    let f = Fixture::new().await;
    let mut p2 = f.join("p2", f.c2).await;
    p2.drain();

    let ok = f
        .server
        .set_channel_state(f.c1, None, "C1", &BTreeSet::from([f.c2]))
        .await
        .unwrap();
    assert!(ok);

    f.server
        .send_text_message(None, f.c1, None, true, "not for linked")
        .await
        .unwrap();
    assert!(texts(&mut p2).is_empty());
}

#[tokio::test]
async fn test_single_channel_scope() {
    let f = Fixture::new().await;
    let mut p1 = f.join("p1", f.c1).await;
    let mut p3 = f.join("p3", f.c3).await;
    p1.drain();
    p3.drain();

    f.server
        .send_text_message(None, f.c1, None, false, "just here")
        .await
        .unwrap();

    let got = texts(&mut p1);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].channel_ids, vec![f.c1]);
    assert!(texts(&mut p3).is_empty());
}

#[tokio::test]
async fn test_direct_delivery_bypasses_scope() {
    let f = Fixture::new().await;
    let mut p1 = f.join("p1", f.c1).await;
    let mut p2 = f.join("p2", f.c2).await;
    p1.drain();
    p2.drain();

    f.server
        .send_text_message(Some(p1.id()), f.c1, Some(p2.id()), true, "psst")
        .await
        .unwrap();

    let got = texts(&mut p2);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].sessions, vec![p2.id()]);
    assert_eq!(got[0].actor, Some(p1.id()));
    assert!(texts(&mut p1).is_empty());
}

#[tokio::test]
async fn test_reparent_cycle_rejected() {
    let server = Server::new(ServerId(1));
    let a = server.create_channel(ChannelId::ROOT, "A").await.unwrap();
    let b = server.create_channel(a, "B").await.unwrap();
    let mut watcher = server.connect("watcher", None).await.unwrap();
    watcher.drain();

    let ok = server
        .set_channel_state(a, Some(b), "Renamed", &BTreeSet::new())
        .await
        .unwrap();

    assert!(!ok);
    assert_eq!(server.channel(a).await.unwrap().parent, Some(ChannelId::ROOT));
    assert_eq!(server.channel(a).await.unwrap().name, "A");
    assert!(watcher.drain().is_empty());

    // Moving a channel under itself is ignored, not rejected
    assert!(server
        .set_channel_state(b, Some(b), "B", &BTreeSet::new())
        .await
        .unwrap());
    assert_eq!(server.channel(b).await.unwrap().parent, Some(a));
}

#[tokio::test]
async fn test_channel_move_and_link_delta() {
    let f = Fixture::new().await;
    let mut watcher = f.server.connect("watcher", None).await.unwrap();
    watcher.drain();

    let ok = f
        .server
        .set_channel_state(f.c3, Some(f.c2), "C3", &BTreeSet::from([f.c1]))
        .await
        .unwrap();
    assert!(ok);

    let messages = watcher.drain();
    assert_eq!(messages.len(), 1);
    let ServerMessage::ChannelState(state) = messages[0].as_ref() else {
        panic!("expected channel state, got {:?}", messages[0]);
    };
    assert_eq!(
        *state,
        ChannelState {
            channel_id: f.c3,
            parent: Some(f.c2),
            links_add: vec![f.c1],
            ..Default::default()
        }
    );
    assert_eq!(f.server.links(f.c1).await.unwrap(), vec![f.c3]);
    assert_eq!(f.server.descendants(f.c2).await.unwrap(), vec![f.c2, f.c3]);
}

#[tokio::test]
async fn test_minimal_participant_delta() {
    let f = Fixture::new().await;
    let mut alice = f.server.connect("alice", None).await.unwrap();
    let start = f.server.participant(alice.id()).await.unwrap().channel();
    alice.drain();

    // Deaf implies mute
    f.server
        .set_participant_state(alice.id(), start, false, true, false)
        .await
        .unwrap();
    let deltas = user_states(&mut alice);
    assert_eq!(deltas.len(), 1);
    assert_eq!(
        deltas[0],
        UserState {
            session: alice.id(),
            mute: Some(true),
            deaf: Some(true),
            ..Default::default()
        }
    );

    // Same request again: nothing to report
    f.server
        .set_participant_state(alice.id(), start, false, true, false)
        .await
        .unwrap();
    assert!(alice.drain().is_empty());

    // Only the channel changes
    f.server
        .set_participant_state(alice.id(), f.c2, true, true, false)
        .await
        .unwrap();
    let deltas = user_states(&mut alice);
    assert_eq!(
        deltas,
        vec![UserState {
            session: alice.id(),
            channel_id: Some(f.c2),
            ..Default::default()
        }]
    );

    let p = f.server.participant(alice.id()).await.unwrap();
    assert!(p.is_muted() && p.is_deafened());
    assert_eq!(f.server.sessions_in(f.c2).await, vec![alice.id()]);
}

#[tokio::test]
async fn test_unknown_ids_are_errors() {
    let f = Fixture::new().await;
    let alice = f.server.connect("alice", None).await.unwrap();

    assert_eq!(
        f.server
            .set_participant_state(alice.id(), ChannelId(77), true, false, false)
            .await,
        Err(ServerError::UnknownChannel(ChannelId(77)))
    );
    assert!(matches!(
        f.server
            .send_text_message(None, f.c1, Some(chorus_core::SessionId(500)), false, "x")
            .await,
        Err(ServerError::UnknownSession(_))
    ));
    assert_eq!(
        f.server.remove_channel(ChannelId::ROOT).await,
        Err(ServerError::RootChannel)
    );
}

#[tokio::test]
async fn test_temporary_groups_isolated_and_invalidate_cache() {
    let f = Fixture::new().await;
    f.server
        .set_acl(
            ChannelId::ROOT,
            true,
            vec![ChanAcl::group("mods", Permissions::MOVE, Permissions::NONE)],
        )
        .await
        .unwrap();

    let alice = f.join("alice", f.c1).await;
    let bob = f.join("bob", f.c1).await;

    assert!(!f.server.has_permission(alice.id(), f.c1, Permissions::MOVE).await.unwrap());
    assert!(!f.server.has_permission(bob.id(), f.c1, Permissions::MOVE).await.unwrap());
    assert!(f.server.has_cached_permissions(alice.id()));
    assert!(f.server.has_cached_permissions(bob.id()));

    f.server
        .set_temporary_groups(alice.id(), None, &["mods".to_string()])
        .await
        .unwrap();

    // Only alice's cache entry is dropped
    assert!(!f.server.has_cached_permissions(alice.id()));
    assert!(f.server.has_cached_permissions(bob.id()));

    assert!(f.server.has_permission(alice.id(), f.c1, Permissions::MOVE).await.unwrap());
    assert!(!f.server.has_permission(bob.id(), f.c1, Permissions::MOVE).await.unwrap());
    assert_eq!(
        f.server.temporary_groups(alice.id(), ChannelId::ROOT).await.unwrap(),
        vec!["mods".to_string()]
    );
    assert!(f
        .server
        .temporary_groups(bob.id(), ChannelId::ROOT)
        .await
        .unwrap()
        .is_empty());

    // Replacing with an empty list removes the membership
    f.server
        .set_temporary_groups(alice.id(), None, &[])
        .await
        .unwrap();
    assert!(!f.server.has_permission(alice.id(), f.c1, Permissions::MOVE).await.unwrap());
}

#[tokio::test]
async fn test_group_membership_changes_take_effect() {
    let f = Fixture::new().await;
    let carol = f.server.connect("carol", Some(UserId(9))).await.unwrap();
    f.server
        .set_acl(
            f.c1,
            true,
            vec![ChanAcl::group("admins", Permissions::MAKE_CHANNEL, Permissions::NONE)],
        )
        .await
        .unwrap();

    assert!(!f
        .server
        .has_permission(carol.id(), f.c3, Permissions::MAKE_CHANNEL)
        .await
        .unwrap());

    f.server
        .set_group_members(f.c1, "admins", BTreeSet::from([UserId(9)]))
        .await
        .unwrap();

    assert!(f
        .server
        .has_permission(carol.id(), f.c3, Permissions::MAKE_CHANNEL)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_listener_called_once_per_event() {
    let f = Fixture::new().await;
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let handle = f.server.subscribe(
        &[EventKind::ParticipantStateChanged],
        Arc::new(move |e: &ServerEvent| {
            assert_eq!(e.kind(), EventKind::ParticipantStateChanged);
            c.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let alice = f.server.connect("alice", None).await.unwrap();
    f.server
        .set_participant_state(alice.id(), f.c2, false, false, false)
        .await
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // No-op update raises nothing
    f.server
        .set_participant_state(alice.id(), f.c2, false, false, false)
        .await
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    assert!(f.server.unsubscribe(handle));
    f.server
        .set_participant_state(alice.id(), f.c1, false, false, false)
        .await
        .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_listener_sees_post_update_state() {
    let f = Fixture::new().await;
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let s = Arc::clone(&seen);
    f.server.subscribe(
        &[EventKind::ParticipantStateChanged],
        Arc::new(move |e: &ServerEvent| {
            if let ServerEvent::ParticipantStateChanged { participant, .. } = e {
                *s.lock() = Some(participant.clone());
            }
        }),
    );

    let alice = f.server.connect("alice", None).await.unwrap();
    f.server
        .set_participant_state(alice.id(), f.c3, true, false, true)
        .await
        .unwrap();

    let p = seen.lock().clone().unwrap();
    assert_eq!(p.channel(), f.c3);
    assert!(p.is_muted());
    assert!(p.is_suppressed());
}

#[tokio::test]
async fn test_authenticator_absent() {
    let f = Fixture::new().await;
    assert_eq!(f.server.authenticate("alice", "pw"), None);
    assert_eq!(f.server.name_to_id("alice"), None);

    let guest = f.server.connect_authenticated("alice", "pw").await.unwrap();
    assert_eq!(f.server.participant(guest.id()).await.unwrap().user_id(), None);
}

#[tokio::test]
async fn test_remove_channel_moves_participants_up() {
    let f = Fixture::new().await;
    let mut p3 = f.join("p3", f.c3).await;
    p3.drain();

    f.server.remove_channel(f.c1).await.unwrap();

    let messages = p3.drain();
    let kinds: Vec<&str> = messages.iter().map(|m| m.kind()).collect();
    assert_eq!(kinds, vec!["user_state", "channel_remove", "channel_remove"]);
    assert_eq!(
        f.server.participant(p3.id()).await.unwrap().channel(),
        ChannelId::ROOT
    );
    assert!(f.server.channel(f.c3).await.is_none());
    assert_eq!(f.server.channels().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_clients() {
    let f = Arc::new(Fixture::new().await);
    let mut handles = Vec::new();

    for i in 0..16 {
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move {
            let session = f.server.connect(format!("user{}", i), None).await.unwrap();
            let target = if i % 2 == 0 { f.c2 } else { f.c3 };
            f.server
                .set_participant_state(session.id(), target, i % 3 == 0, false, false)
                .await
                .unwrap();
            f.server
                .has_permission(session.id(), target, Permissions::SPEAK)
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert_eq!(f.server.user_count().await, 16);
    assert_eq!(f.server.sessions_in(f.c2).await.len(), 8);
    assert_eq!(f.server.sessions_in(f.c3).await.len(), 8);
}

#[derive(Default)]
struct CountingStore {
    updates: AtomicUsize,
}

impl ChannelStore for CountingStore {
    fn update_channel(&self, _record: &ChannelRecord) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_unchanged_channel_state_is_silent() {
    let f = Fixture::new().await;
    let store = Arc::new(CountingStore::default());
    f.server.set_channel_store(store.clone());

    let events = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&events);
    f.server.subscribe(
        &[EventKind::ChannelStateChanged],
        Arc::new(move |_: &ServerEvent| {
            e.fetch_add(1, Ordering::SeqCst);
        }),
    );

    f.server
        .set_channel_state(f.c1, None, "C1", &BTreeSet::from([f.c2]))
        .await
        .unwrap();
    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert_eq!(store.updates.load(Ordering::SeqCst), 0);

    let mut watcher = f.server.connect("watcher", None).await.unwrap();
    watcher.drain();

    let ok = f
        .server
        .set_channel_state(f.c1, Some(ChannelId::ROOT), "C1", &BTreeSet::from([f.c2]))
        .await
        .unwrap();

    assert!(ok);
    assert!(watcher.drain().is_empty());
    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert_eq!(store.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_moves_arrive_in_commit_order() {
    let f = Fixture::new().await;
    let (c1, c2) = (f.c1, f.c2);
    let server = Arc::new(f.server);
    let alice = server.connect("alice", None).await.unwrap().id();
    let mut watcher = server.connect("watcher", None).await.unwrap();

    for round in 0..200 {
        watcher.drain();

        let a = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.set_participant_state(alice, c1, false, false, false).await })
        };
        let b = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.set_participant_state(alice, c2, false, false, false).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let last_seen = user_states(&mut watcher)
            .into_iter()
            .filter(|u| u.session == alice)
            .filter_map(|u| u.channel_id)
            .last();
        let actual = server.participant(alice).await.unwrap().channel();
        if let Some(seen) = last_seen {
            assert_eq!(seen, actual, "round {}", round);
        }
    }
}
