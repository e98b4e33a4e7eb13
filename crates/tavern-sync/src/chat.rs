//! Slash commands for talking to other players.
//!
//! Everything here is a thin layer over [`MessageRelay`], [`PresenceTracker`]
//! and [`NewsFeed`]. Replies are data; drawing them is up to the caller.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tavern_types::{BROADCAST, Message, MessageKind, NewsEntry, PresenceRecord};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::news::NewsFeed;
use crate::presence::PresenceTracker;
use crate::relay::MessageRelay;
use crate::session::OnlineSession;
use crate::{Backend, best_effort, with_backend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    /// Broadcast went out; `message` is the local echo.
    Said { message: String },
    /// Direct message stored. Delivery does not depend on `recipient_online`.
    Told {
        recipient: String,
        message: String,
        recipient_online: bool,
    },
    RecipientNotFound { recipient: String },
    /// The player directory could not be read, so nothing was sent.
    RecipientUnchecked { recipient: String },
    Announced { message: String },
    Roster(Vec<RosterLine>),
    News(Vec<NewsEntry>),
    Usage(&'static str),
}

/// One row of the who's-online listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterLine {
    pub display_name: String,
    pub location: String,
    pub via: &'static str,
    pub connected_for: Duration,
}

impl RosterLine {
    pub fn from_record(record: &PresenceRecord, now: DateTime<Utc>) -> Self {
        Self {
            display_name: record.display_name.clone(),
            location: format_location(&record.location),
            via: record.connection_kind.tag(),
            connected_for: (now - record.connected_at).max(Duration::zero()),
        }
    }
}

impl fmt::Display for RosterLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<18} {:<16} {:<5} {}",
            self.display_name,
            self.location,
            self.via,
            format_duration(self.connected_for)
        )
    }
}

/// `MainStreet` -> `Main Street`, `TheInn` -> `The Inn`. Runs of capitals
/// stay together.
pub fn format_location(location: &str) -> String {
    if location.is_empty() {
        return "Unknown".to_string();
    }
    let mut out = String::with_capacity(location.len() + 4);
    let mut prev_upper = true;
    for c in location.chars() {
        if c.is_uppercase() && !prev_upper {
            out.push(' ');
        }
        prev_upper = c.is_uppercase();
        out.push(c);
    }
    out
}

/// `2h 5m` from an hour up, `42m` below.
pub fn format_duration(d: Duration) -> String {
    let hours = d.num_hours();
    let minutes = d.num_minutes() % 60;
    if hours >= 1 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

pub struct ChatFacade {
    identity: String,
    backend: Backend,
    relay: MessageRelay,
    presence: PresenceTracker,
    news: NewsFeed,
    news_page: usize,
    history_limit: usize,
    pending: VecDeque<Message>,
    history: VecDeque<Message>,
}

impl ChatFacade {
    pub fn new(backend: Backend, identity: &str, config: &SyncConfig) -> Self {
        Self {
            identity: identity.to_string(),
            relay: MessageRelay::new(backend.clone()),
            presence: PresenceTracker::new(backend.clone(), config.stale_after),
            news: NewsFeed::new(backend.clone()),
            backend,
            news_page: config.news_page,
            history_limit: config.chat_history,
            pending: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    pub fn for_session(session: &OnlineSession) -> Self {
        Self::new(
            session.synchronizer().backend().clone(),
            session.identity(),
            session.config(),
        )
    }

    /// Run `input` if it is a chat command. `Ok(None)` means it was not one
    /// and the caller should handle it.
    pub async fn execute(&self, input: &str) -> Result<Option<ChatReply>, SyncError> {
        let trimmed = input.trim();
        let (command, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (trimmed, ""),
        };

        let reply = match command.to_ascii_lowercase().as_str() {
            "/say" => self.say(rest).await?,
            "/tell" => self.tell(rest).await?,
            "/announce" => self.announce(rest).await?,
            "/who" | "/online" if rest.is_empty() => self.who().await?,
            "/news" => match rest {
                "" => self.show_news(self.news_page).await?,
                n => match n.parse::<usize>() {
                    Ok(count) if count > 0 => self.show_news(count).await?,
                    _ => ChatReply::Usage("/news [count]"),
                },
            },
            _ => return Ok(None),
        };
        Ok(Some(reply))
    }

    pub async fn say(&self, message: &str) -> Result<ChatReply, SyncError> {
        if message.is_empty() {
            return Ok(ChatReply::Usage("/say <message>"));
        }
        self.relay
            .broadcast(&self.identity, MessageKind::Chat, message)
            .await?;
        Ok(ChatReply::Said {
            message: message.to_string(),
        })
    }

    /// `rest` is `<player> <message>`, where `<player>` is an identity or a
    /// display name of a known player. Whether they are online only changes
    /// the confirmation.
    pub async fn tell(&self, rest: &str) -> Result<ChatReply, SyncError> {
        let Some((recipient, message)) = rest.split_once(char::is_whitespace) else {
            return Ok(ChatReply::Usage("/tell <player> <message>"));
        };
        let message = message.trim();
        if message.is_empty() {
            return Ok(ChatReply::Usage("/tell <player> <message>"));
        }

        let not_found = || ChatReply::RecipientNotFound {
            recipient: recipient.to_string(),
        };
        if recipient == BROADCAST {
            return Ok(not_found());
        }

        let name = recipient.to_string();
        let found = with_backend(&self.backend, move |b| b.find_player(&name)).await;
        let address = match best_effort("look up recipient", found)? {
            Some(Some(player)) if player.identity != BROADCAST => player.identity,
            Some(_) => return Ok(not_found()),
            None => {
                return Ok(ChatReply::RecipientUnchecked {
                    recipient: recipient.to_string(),
                });
            }
        };

        self.relay
            .send(&self.identity, &address, MessageKind::Private, message)
            .await?;
        let recipient_online = self.presence.is_online(recipient).await?;
        Ok(ChatReply::Told {
            recipient: recipient.to_string(),
            message: message.to_string(),
            recipient_online,
        })
    }

    pub async fn announce(&self, message: &str) -> Result<ChatReply, SyncError> {
        if message.is_empty() {
            return Ok(ChatReply::Usage("/announce <message>"));
        }
        self.relay
            .broadcast(&self.identity, MessageKind::System, message)
            .await?;
        Ok(ChatReply::Announced {
            message: message.to_string(),
        })
    }

    pub async fn who(&self) -> Result<ChatReply, SyncError> {
        let now = self.backend.now();
        let roster = self
            .presence
            .list_online()
            .await?
            .iter()
            .map(|record| RosterLine::from_record(record, now))
            .collect();
        Ok(ChatReply::Roster(roster))
    }

    pub async fn show_news(&self, count: usize) -> Result<ChatReply, SyncError> {
        Ok(ChatReply::News(self.news.list_news(count).await?))
    }

    /// Queue a delivered message for display and keep it in the history.
    pub fn receive(&mut self, message: Message) {
        self.pending.push_back(message.clone());
        self.history.push_back(message);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Everything queued since the last call, oldest first.
    pub fn take_pending(&mut self) -> Vec<Message> {
        self.pending.drain(..).collect()
    }

    pub fn history(&self) -> impl Iterator<Item = &Message> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tavern_db::{ManualClock, MemoryBackend, PersistenceBackend};
    use tavern_types::ConnectionKind;

    use super::*;
    use crate::testing::FlakyBackend;

    fn facade(backend: &Arc<MemoryBackend>, identity: &str) -> ChatFacade {
        ChatFacade::new(backend.clone(), identity, &SyncConfig::default())
    }

    fn message(id: i64, body: &str) -> Message {
        Message {
            id,
            from: "zed".into(),
            to: "amy".into(),
            kind: MessageKind::Private,
            body: body.into(),
            delivered: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn locations_are_split_on_word_boundaries() {
        assert_eq!(format_location("MainStreet"), "Main Street");
        assert_eq!(format_location("TheInn"), "The Inn");
        assert_eq!(format_location("NPCQuarter"), "NPCQuarter");
        assert_eq!(format_location(""), "Unknown");
    }

    #[test]
    fn durations_show_hours_only_when_needed() {
        assert_eq!(format_duration(Duration::minutes(42)), "42m");
        assert_eq!(format_duration(Duration::minutes(125)), "2h 5m");
    }

    #[test]
    fn roster_line_pads_columns() {
        let line = RosterLine {
            display_name: "Alice".into(),
            location: "Main Street".into(),
            via: "SSH",
            connected_for: Duration::minutes(3),
        };
        assert_eq!(
            line.to_string(),
            "Alice              Main Street      SSH   3m"
        );
    }

    #[tokio::test]
    async fn non_commands_pass_through() {
        let backend = Arc::new(MemoryBackend::new());
        let chat = facade(&backend, "amy");
        assert_eq!(chat.execute("hello there").await.unwrap(), None);
        assert_eq!(chat.execute("/dance").await.unwrap(), None);
        assert_eq!(chat.execute("   ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn say_broadcasts_chat() {
        let backend = Arc::new(MemoryBackend::new());
        let chat = facade(&backend, "amy");

        let reply = chat.execute("/SAY  hello world ").await.unwrap();
        assert_eq!(
            reply,
            Some(ChatReply::Said {
                message: "hello world".into()
            })
        );

        let rows = backend.unread_messages("bob", 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_broadcast());
        assert_eq!(rows[0].kind, MessageKind::Chat);
    }

    #[tokio::test]
    async fn empty_say_shows_usage() {
        let backend = Arc::new(MemoryBackend::new());
        let chat = facade(&backend, "amy");
        assert!(matches!(
            chat.execute("/say").await.unwrap(),
            Some(ChatReply::Usage(_))
        ));
        assert_eq!(backend.max_message_id().unwrap(), 0);
    }

    #[tokio::test]
    async fn tell_requires_known_recipient() {
        let backend = Arc::new(MemoryBackend::new());
        let chat = facade(&backend, "amy");

        let reply = chat.execute("/tell ghost boo").await.unwrap();
        assert_eq!(
            reply,
            Some(ChatReply::RecipientNotFound {
                recipient: "ghost".into()
            })
        );
        assert_eq!(backend.max_message_id().unwrap(), 0);
    }

    #[tokio::test]
    async fn tell_to_offline_player_is_still_stored() {
        let backend = Arc::new(MemoryBackend::new());
        backend.record_login("bob", "Bobby").unwrap();
        backend.record_logout("bob").unwrap();
        let chat = facade(&backend, "amy");

        let reply = chat.execute("/tell Bobby meet at the inn").await.unwrap();
        assert_eq!(
            reply,
            Some(ChatReply::Told {
                recipient: "Bobby".into(),
                message: "meet at the inn".into(),
                recipient_online: false,
            })
        );
        let rows = backend.unread_messages("bob", 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, MessageKind::Private);
    }

    #[tokio::test]
    async fn tell_sends_nothing_when_directory_is_unreadable() {
        let backend = Arc::new(FlakyBackend::new());
        backend.inner().record_login("bob", "Bobby").unwrap();
        backend.set_lookups_down(true);
        let chat = ChatFacade::new(backend.clone(), "amy", &SyncConfig::default());

        let reply = chat.execute("/tell Bobby meet at the inn").await.unwrap();
        assert_eq!(
            reply,
            Some(ChatReply::RecipientUnchecked {
                recipient: "Bobby".into()
            })
        );
        assert_eq!(backend.inner().max_message_id().unwrap(), 0);

        backend.set_lookups_down(false);
        let reply = chat.execute("/tell Bobby meet at the inn").await.unwrap();
        assert!(matches!(reply, Some(ChatReply::Told { .. })));
        assert_eq!(backend.inner().unread_messages("bob", 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tell_refuses_the_broadcast_marker() {
        let backend = Arc::new(MemoryBackend::new());
        let chat = facade(&backend, "amy");

        let reply = chat.execute("/tell * secret").await.unwrap();
        assert_eq!(
            reply,
            Some(ChatReply::RecipientNotFound {
                recipient: "*".into()
            })
        );
        assert!(backend.unread_messages("carol", 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn tell_reports_online_recipient() {
        let backend = Arc::new(MemoryBackend::new());
        backend.record_login("bob", "Bob").unwrap();
        let presence = PresenceTracker::new(backend.clone(), SyncConfig::default().stale_after);
        presence
            .register("bob", "Bob", "TheInn", ConnectionKind::Web)
            .await
            .unwrap();

        let chat = facade(&backend, "amy");
        let reply = chat.execute("/tell bob hi").await.unwrap();
        assert!(matches!(
            reply,
            Some(ChatReply::Told {
                recipient_online: true,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn who_lists_online_players() {
        let backend = Arc::new(MemoryBackend::new());
        let presence = PresenceTracker::new(backend.clone(), SyncConfig::default().stale_after);
        presence
            .register("amy", "Amy", "MainStreet", ConnectionKind::Ssh)
            .await
            .unwrap();
        presence
            .register("bob", "Bob", "TheInn", ConnectionKind::Unknown)
            .await
            .unwrap();

        let chat = facade(&backend, "amy");
        let Some(ChatReply::Roster(lines)) = chat.execute("/online").await.unwrap() else {
            panic!("expected a roster");
        };
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].display_name, "Amy");
        assert_eq!(lines[0].location, "Main Street");
        assert_eq!(lines[1].via, "?");
    }

    #[tokio::test]
    async fn roster_durations_follow_the_backend_clock() {
        let clock = Arc::new(ManualClock::default());
        let backend = Arc::new(MemoryBackend::with_clock(clock.clone()));
        let presence = PresenceTracker::new(backend.clone(), SyncConfig::default().stale_after);
        presence
            .register("amy", "Amy", "TheInn", ConnectionKind::Ssh)
            .await
            .unwrap();
        for _ in 0..14 {
            clock.advance(Duration::seconds(30));
            presence.heartbeat("amy", "TheInn").await.unwrap();
        }

        let chat = facade(&backend, "amy");
        let Some(ChatReply::Roster(lines)) = chat.execute("/who").await.unwrap() else {
            panic!("expected a roster");
        };
        assert_eq!(lines[0].connected_for, Duration::minutes(7));
    }

    #[tokio::test]
    async fn news_defaults_to_one_page() {
        let backend = Arc::new(MemoryBackend::new());
        for i in 0..20 {
            backend.insert_news(&format!("item {i}"), "world", "herald").unwrap();
        }
        let chat = facade(&backend, "amy");

        let Some(ChatReply::News(page)) = chat.execute("/news").await.unwrap() else {
            panic!("expected news");
        };
        assert_eq!(page.len(), 15);
        assert_eq!(page[0].message, "item 19");

        let Some(ChatReply::News(few)) = chat.execute("/news 3").await.unwrap() else {
            panic!("expected news");
        };
        assert_eq!(few.len(), 3);
    }

    #[test]
    fn history_is_bounded() {
        let backend = Arc::new(MemoryBackend::new());
        let mut chat = facade(&backend, "amy");
        for i in 0..105 {
            chat.receive(message(i, &format!("line {i}")));
        }

        assert_eq!(chat.pending_count(), 105);
        assert_eq!(chat.history().count(), 100);
        assert_eq!(chat.history().next().unwrap().body, "line 5");

        let pending = chat.take_pending();
        assert_eq!(pending.len(), 105);
        assert_eq!(chat.pending_count(), 0);
        assert_eq!(chat.history().count(), 100);
    }
}
