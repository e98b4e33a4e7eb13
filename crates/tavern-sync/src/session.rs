//! One player's live connection to the shared world.
//!
//! A session registers presence, then runs three independent timers until it
//! is shut down: heartbeat (refreshes presence and the cached online count),
//! poll (drains the inbox into a channel once someone listens) and sweep
//! (reaps stale presence).
//! Shutdown stops and joins the timers before unregistering, so peers see the
//! departure right away instead of after the staleness window.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tavern_types::{ConnectionKind, Message};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::news::NewsFeed;
use crate::presence::PresenceTracker;
use crate::relay::{Inbox, MessageRelay};
use crate::state::StateSynchronizer;
use crate::{Backend, best_effort, with_backend};

/// Where a freshly connected player is shown until the game reports a move.
pub const DEFAULT_LOCATION: &str = "MainStreet";

pub struct OnlineSession {
    identity: String,
    display_name: String,
    connection_kind: ConnectionKind,
    session_id: Uuid,
    config: SyncConfig,
    synchronizer: StateSynchronizer,
    presence: PresenceTracker,
    relay: MessageRelay,
    news: NewsFeed,
    location: watch::Sender<String>,
    online_count: Arc<AtomicUsize>,
    listener: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl OnlineSession {
    pub async fn start(
        backend: Backend,
        identity: &str,
        display_name: &str,
        connection_kind: ConnectionKind,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let session_id = Uuid::new_v4();
        let synchronizer = StateSynchronizer::new(backend.clone(), identity);
        let presence = PresenceTracker::new(backend.clone(), config.stale_after);
        let relay = MessageRelay::new(backend.clone());
        let news = NewsFeed::new(backend.clone());

        presence
            .register_session(
                identity,
                display_name,
                DEFAULT_LOCATION,
                connection_kind,
                session_id,
            )
            .await?;

        let (who, name) = (identity.to_string(), display_name.to_string());
        let login = with_backend(&backend, move |b| b.record_login(&who, &name)).await;
        best_effort("record login", login)?;

        let inbox = Inbox::open(relay.clone(), identity).await?;

        // Count ourselves even if the roster read fails.
        let online = presence.list_online().await?.len().max(1);
        let online_count = Arc::new(AtomicUsize::new(online));

        let (location, _) = watch::channel(DEFAULT_LOCATION.to_string());
        let (shutdown_tx, _) = watch::channel(false);

        let mut session = Self {
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            connection_kind,
            session_id,
            config,
            synchronizer,
            presence,
            relay,
            news,
            location,
            online_count,
            listener: Arc::new(Mutex::new(None)),
            shutdown_tx,
            tasks: Vec::with_capacity(3),
        };
        session.spawn_heartbeat();
        session.spawn_poll(inbox);
        session.spawn_sweep();

        info!(
            "Online tracking started for '{}' ({}), session {}",
            session.display_name, session.identity, session.session_id
        );
        Ok(session)
    }

    fn spawn_heartbeat(&mut self) {
        let presence = self.presence.clone();
        let identity = self.identity.clone();
        let display_name = self.display_name.clone();
        let connection_kind = self.connection_kind;
        let session_id = self.session_id;
        let location = self.location.subscribe();
        let online_count = self.online_count.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.heartbeat_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                let here = location.borrow().clone();
                match presence.heartbeat(&identity, &here).await {
                    Ok(Some(true)) => {}
                    // Storage hiccup, already logged; the record is probably still there.
                    Ok(None) => {}
                    Ok(Some(false)) => {
                        // Reaped while we were stalled; take the record back.
                        debug!("{} presence missing on heartbeat, re-registering", identity);
                        if let Err(e) = presence
                            .register_session(
                                &identity,
                                &display_name,
                                &here,
                                connection_kind,
                                session_id,
                            )
                            .await
                        {
                            warn!("Re-register for {} failed: {}", identity, e);
                        }
                    }
                    Err(e) => warn!("Heartbeat for {} failed: {}", identity, e),
                }

                if let Ok(online) = presence.list_online().await {
                    if !online.is_empty() {
                        online_count.store(online.len(), Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    fn spawn_poll(&mut self, mut inbox: Inbox) {
        let listener = self.listener.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.poll_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                // Unread rows stay in the store until someone takes the channel.
                let incoming = listener.lock().unwrap_or_else(|e| e.into_inner()).clone();
                let Some(incoming) = incoming.filter(|tx| !tx.is_closed()) else {
                    continue;
                };

                match inbox.poll().await {
                    Ok(messages) => {
                        for message in messages {
                            debug!(
                                "Message ({}) from {}: {}",
                                message.kind, message.from, message.body
                            );
                            // Receiver dropped mid-batch; the rows are already consumed.
                            let _ = incoming.send(message);
                        }
                    }
                    Err(e) => warn!("Message poll failed: {}", e),
                }
            }
        }));
    }

    fn spawn_sweep(&mut self) {
        let presence = self.presence.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.sweep_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = presence.sweep_stale().await {
                    warn!("Stale presence sweep failed: {}", e);
                }
            }
        }));
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Published with the next heartbeat.
    pub fn set_location(&self, location: &str) {
        self.location.send_replace(location.to_string());
    }

    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    /// Online players as of the last heartbeat. Display only; ask
    /// [`PresenceTracker::is_online`] when the answer matters.
    pub fn cached_online_count(&self) -> usize {
        self.online_count.load(Ordering::Relaxed)
    }

    /// Messages delivered to this session. Can be taken once; polling only
    /// starts after it has been.
    pub fn incoming(&mut self) -> Option<mpsc::UnboundedReceiver<Message>> {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if listener.is_some() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *listener = Some(tx);
        Some(rx)
    }

    pub fn synchronizer(&self) -> &StateSynchronizer {
        &self.synchronizer
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn relay(&self) -> &MessageRelay {
        &self.relay
    }

    pub fn news(&self) -> &NewsFeed {
        &self.news
    }

    /// Stop the timers, wait for them, then leave: presence is removed (unless
    /// a newer session for the same identity owns it) and the logout recorded.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                warn!("Session task for {} ended abnormally: {}", self.identity, e);
            }
        }

        if let Err(e) = self
            .presence
            .unregister_session(&self.identity, self.session_id)
            .await
        {
            warn!("Error during shutdown: {}", e);
        }

        let identity = self.identity.clone();
        let logout = with_backend(self.synchronizer.backend(), move |b| b.record_logout(&identity)).await;
        if let Err(e) = best_effort("record logout", logout) {
            warn!("Error during shutdown: {}", e);
        }

        info!("Online tracking stopped for '{}'", self.display_name);
    }
}

impl Drop for OnlineSession {
    fn drop(&mut self) {
        // Dropped without shutdown(): stop the timers, the record ages out.
        let _ = self.shutdown_tx.send(true);
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}
