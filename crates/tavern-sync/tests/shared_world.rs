//! Several sessions sharing one world through one store. Each SQLite session
//! opens its own `Database` handle on the same file, like separate processes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tavern_db::{Database, DatabaseOptions, ManualClock, MemoryBackend, PersistenceBackend, Transform};
use tavern_sync::{
    Backend, ChatFacade, ChatReply, ClaimOutcome, Inbox, MessageRelay, OnlineSession,
    PresenceTracker, StateSynchronizer, SyncConfig,
};
use tavern_types::{ConnectionKind, MessageKind, UpdateOutcome};
use tempfile::TempDir;

const STALE: Duration = Duration::from_secs(120);

fn patient() -> DatabaseOptions {
    DatabaseOptions {
        max_cas_attempts: 1000,
        ..Default::default()
    }
}

fn sqlite_handles(dir: &TempDir, clock: Arc<ManualClock>, count: usize) -> Vec<Backend> {
    let path = dir.path().join("world.db");
    (0..count)
        .map(|_| {
            let db = Database::open_with(&path, clock.clone(), patient()).unwrap();
            Arc::new(db) as Backend
        })
        .collect()
}

fn increment(current: Option<&str>) -> Transform {
    let n: u64 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
    Transform::Write((n + 1).to_string())
}

async fn concurrent_increments(handles: Vec<Backend>, per_session: usize) -> Vec<UpdateOutcome> {
    let mut updates = Vec::new();
    for (i, backend) in handles.into_iter().enumerate() {
        let sync = StateSynchronizer::new(backend, format!("session-{i}"));
        for _ in 0..per_session {
            let sync = sync.clone();
            updates.push(tokio::spawn(async move {
                sync.atomic_update("counter", increment).await.unwrap()
            }));
        }
    }
    join_all(updates)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_increment_is_lost_across_sqlite_handles() {
    let dir = TempDir::new().unwrap();
    let handles = sqlite_handles(&dir, Arc::new(ManualClock::default()), 3);
    let reader = handles[0].clone();

    let outcomes = concurrent_increments(handles, 8).await;
    assert!(outcomes.iter().all(UpdateOutcome::is_committed));

    let entry = reader.get_state("counter").unwrap().unwrap();
    assert_eq!(entry.value, "24");
    assert_eq!(entry.version, 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_increment_is_lost_in_memory() {
    let backend: Backend = Arc::new(MemoryBackend::new().with_options(patient()));
    let handles = vec![backend.clone(); 4];

    let outcomes = concurrent_increments(handles, 10).await;
    assert_eq!(outcomes.len(), 40);
    assert!(outcomes.iter().all(UpdateOutcome::is_committed));
    assert_eq!(backend.get_state("counter").unwrap().unwrap().value, "40");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_session_wins_the_daily_reset() {
    let dir = TempDir::new().unwrap();
    let handles = sqlite_handles(&dir, Arc::new(ManualClock::default()), 2);
    let a = StateSynchronizer::new(handles[0].clone(), "alice");
    let b = StateSynchronizer::new(handles[1].clone(), "bob");

    let (ra, rb) = tokio::join!(a.try_claim_daily_reset(10), b.try_claim_daily_reset(10));
    let mut outcomes = [ra, rb];
    outcomes.sort_by_key(|o| *o != ClaimOutcome::Committed);
    assert_eq!(outcomes, [ClaimOutcome::Committed, ClaimOutcome::AlreadyCurrent]);

    for sync in [&a, &b] {
        assert_eq!(sync.try_claim_daily_reset(10).await, ClaimOutcome::AlreadyCurrent);
    }
    assert_eq!(b.try_claim_daily_reset(11).await, ClaimOutcome::Committed);
    assert_eq!(a.daily_lock().await.unwrap().processed_by, "bob");
}

#[tokio::test]
async fn silent_session_drops_off_the_roster() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::default());
    let handles = sqlite_handles(&dir, clock.clone(), 2);
    let alice = PresenceTracker::new(handles[0].clone(), STALE);
    let bob = PresenceTracker::new(handles[1].clone(), STALE);

    alice
        .register("alice", "Alice", "MainStreet", ConnectionKind::Ssh)
        .await
        .unwrap();
    for _ in 0..2 {
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(alice.heartbeat("alice", "Dungeons").await.unwrap(), Some(true));
    }
    assert!(bob.is_online("Alice").await.unwrap());

    // Process gone without a goodbye.
    clock.advance(chrono::Duration::seconds(130));
    assert!(!bob.is_online("alice").await.unwrap());
    assert!(handles[1].get_presence("alice").unwrap().is_some());

    assert_eq!(bob.sweep_stale().await.unwrap(), 1);
    assert!(handles[1].get_presence("alice").unwrap().is_none());
}

#[tokio::test]
async fn broadcast_reaches_every_watermarked_session_once() {
    let dir = TempDir::new().unwrap();
    let handles = sqlite_handles(&dir, Arc::new(ManualClock::default()), 4);

    let mut inboxes = Vec::new();
    for (i, name) in ["amy", "bea", "cal"].iter().enumerate() {
        inboxes.push(Inbox::open(MessageRelay::new(handles[i].clone()), name).await.unwrap());
    }

    let herald = MessageRelay::new(handles[3].clone());
    herald
        .broadcast("herald", MessageKind::System, "The king is dead")
        .await
        .unwrap();

    for inbox in &mut inboxes {
        let got = inbox.poll().await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, "The king is dead");
        assert!(inbox.poll().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn versions_rise_whoever_saves() {
    let dir = TempDir::new().unwrap();
    let handles = sqlite_handles(&dir, Arc::new(ManualClock::default()), 2);
    let a = StateSynchronizer::new(handles[0].clone(), "alice");
    let b = StateSynchronizer::new(handles[1].clone(), "bob");

    let mut last = 0;
    for round in 0..6 {
        let writer = if round % 2 == 0 { &a } else { &b };
        let version = writer.save_state("quests", format!("[{round}]")).await.unwrap();
        assert!(version > last);
        last = version;

        let reader = if round % 2 == 0 { &b } else { &a };
        let entry = reader.load_state("quests").await.unwrap().unwrap();
        assert_eq!(entry.value, format!("[{round}]"));
        assert_eq!(entry.version, version);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_sessions_chat_and_part() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world.db");
    let a_backend: Backend = Arc::new(Database::open(&path).unwrap());
    let b_backend: Backend = Arc::new(Database::open(&path).unwrap());

    let config = SyncConfig {
        heartbeat_interval: Duration::from_millis(50),
        poll_interval: Duration::from_millis(25),
        sweep_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let alice = OnlineSession::start(a_backend, "alice", "Alice", ConnectionKind::Web, config.clone())
        .await
        .unwrap();
    let mut bob = OnlineSession::start(b_backend, "bob", "Bob", ConnectionKind::Ssh, config)
        .await
        .unwrap();
    let mut bob_incoming = bob.incoming().unwrap();

    let alice_chat = ChatFacade::for_session(&alice);
    assert!(matches!(
        alice_chat.execute("/say evening all").await.unwrap(),
        Some(ChatReply::Said { .. })
    ));
    assert!(matches!(
        alice_chat.execute("/tell Bob meet me at the inn").await.unwrap(),
        Some(ChatReply::Told {
            recipient_online: true,
            ..
        })
    ));

    let mut bob_chat = ChatFacade::for_session(&bob);
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(5), bob_incoming.recv())
            .await
            .unwrap()
            .unwrap();
        bob_chat.receive(message);
    }
    let bodies: Vec<String> = bob_chat.take_pending().into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec!["evening all", "meet me at the inn"]);

    alice.shutdown().await;
    let Some(ChatReply::Roster(roster)) = bob_chat.execute("/who").await.unwrap() else {
        panic!("expected a roster");
    };
    let names: Vec<&str> = roster.iter().map(|r| r.display_name.as_str()).collect();
    assert_eq!(names, vec!["Bob"]);

    bob.shutdown().await;
}
