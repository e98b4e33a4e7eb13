use tavern_types::{BROADCAST, Message, MessageKind};
use tracing::debug;

use crate::error::SyncError;
use crate::{Backend, best_effort, with_backend};

/// Ordered message log shared by all sessions.
///
/// Direct messages are consumed through their delivered flag. Broadcast rows
/// are read by many sessions and never mutated; each session tracks its own
/// watermark instead (see [`Inbox`]).
#[derive(Clone)]
pub struct MessageRelay {
    backend: Backend,
}

impl MessageRelay {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Append a message. Returns its id, or `None` if storage was unavailable.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        kind: MessageKind,
        body: &str,
    ) -> Result<Option<i64>, SyncError> {
        let (from, to, body) = (from.to_string(), to.to_string(), body.to_string());
        let result =
            with_backend(&self.backend, move |b| b.insert_message(&from, &to, &kind, &body)).await;
        best_effort("send message", result)
    }

    pub async fn broadcast(
        &self,
        from: &str,
        kind: MessageKind,
        body: &str,
    ) -> Result<Option<i64>, SyncError> {
        self.send(from, BROADCAST, kind, body).await
    }

    /// Undelivered direct messages plus broadcasts newer than `after_id`,
    /// in id order.
    pub async fn fetch_unread(&self, identity: &str, after_id: i64) -> Result<Vec<Message>, SyncError> {
        let identity = identity.to_string();
        let result =
            with_backend(&self.backend, move |b| b.unread_messages(&identity, after_id)).await;
        Ok(best_effort("fetch unread messages", result)?.unwrap_or_default())
    }

    /// Mark every direct message to `identity` as delivered.
    pub async fn mark_read(&self, identity: &str) -> Result<usize, SyncError> {
        let identity = identity.to_string();
        let result = with_backend(&self.backend, move |b| b.mark_delivered(&identity, None)).await;
        Ok(best_effort("mark messages read", result)?.unwrap_or(0))
    }

    /// Mark direct messages up to and including `through` as delivered,
    /// leaving anything that arrived after the fetch untouched.
    pub async fn mark_read_through(&self, identity: &str, through: i64) -> Result<usize, SyncError> {
        let identity = identity.to_string();
        let result =
            with_backend(&self.backend, move |b| b.mark_delivered(&identity, Some(through))).await;
        Ok(best_effort("mark messages read", result)?.unwrap_or(0))
    }

    /// Highest id in the log, 0 when empty or unavailable.
    pub async fn max_message_id(&self) -> Result<i64, SyncError> {
        let result = with_backend(&self.backend, |b| b.max_message_id()).await;
        Ok(best_effort("read max message id", result)?.unwrap_or(0))
    }
}

/// One session's view of the relay: its identity plus its broadcast watermark.
pub struct Inbox {
    relay: MessageRelay,
    identity: String,
    watermark: i64,
    /// Highest direct message already handed out, in case marking it read failed.
    direct_seen: i64,
}

impl Inbox {
    /// Start at the current end of the log so old broadcasts are not replayed.
    pub async fn open(relay: MessageRelay, identity: &str) -> Result<Self, SyncError> {
        let watermark = relay.max_message_id().await?;
        Ok(Self::with_watermark(relay, identity, watermark))
    }

    pub fn with_watermark(relay: MessageRelay, identity: &str, watermark: i64) -> Self {
        Self {
            relay,
            identity: identity.to_string(),
            watermark,
            direct_seen: 0,
        }
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Fetch everything new for this session, advance the watermark and mark
    /// the fetched direct messages read. The session's own broadcasts are
    /// dropped; the sender already echoed them locally.
    pub async fn poll(&mut self) -> Result<Vec<Message>, SyncError> {
        let fetched = self.relay.fetch_unread(&self.identity, self.watermark).await?;
        if fetched.is_empty() {
            return Ok(fetched);
        }

        let mut max_direct = None;
        let mut fresh = Vec::with_capacity(fetched.len());
        for message in fetched {
            self.watermark = self.watermark.max(message.id);
            if message.is_broadcast() {
                if !message.from.eq_ignore_ascii_case(&self.identity) {
                    fresh.push(message);
                }
            } else {
                max_direct = Some(message.id);
                if message.id > self.direct_seen {
                    fresh.push(message);
                }
            }
        }

        if let Some(through) = max_direct {
            self.direct_seen = self.direct_seen.max(through);
            self.relay.mark_read_through(&self.identity, through).await?;
        }

        debug!(
            identity = %self.identity,
            watermark = self.watermark,
            delivered = fresh.len(),
            "inbox polled"
        );
        Ok(fresh)
    }
}
