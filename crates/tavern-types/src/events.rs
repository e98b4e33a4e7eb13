use std::fmt;

use serde::{Deserialize, Serialize};

/// How a session reached the server. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionKind {
    Local,
    Ssh,
    Bbs,
    Web,
    Steam,
    Unknown,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "Local",
            Self::Ssh => "SSH",
            Self::Bbs => "BBS",
            Self::Web => "Web",
            Self::Steam => "Steam",
            Self::Unknown => "Unknown",
        }
    }

    /// Short tag for roster listings.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Unknown => "?",
            other => other.as_str(),
        }
    }
}

impl From<&str> for ConnectionKind {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "local" => Self::Local,
            "ssh" => Self::Ssh,
            "bbs" => Self::Bbs,
            "web" => Self::Web,
            "steam" => Self::Steam,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for ConnectionKind {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<ConnectionKind> for String {
    fn from(kind: ConnectionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message type tag stored alongside every relayed message.
/// Unrecognised tags round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Public chat line (`/say`)
    Chat,
    /// Private chat line (`/tell`)
    Private,
    /// Operator announcement
    System,
    /// Duel challenge
    Duel,
    /// Trade offer
    Trade,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Private => "chat_private",
            Self::System => "system",
            Self::Duel => "duel",
            Self::Trade => "trade",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(s: &str) -> Self {
        match s {
            "chat" => Self::Chat,
            "chat_private" => Self::Private,
            "system" => Self::System,
            "duel" => Self::Duel,
            "trade" => Self::Trade,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_kind_parses_case_insensitively() {
        assert_eq!(ConnectionKind::from("ssh"), ConnectionKind::Ssh);
        assert_eq!(ConnectionKind::from("SSH"), ConnectionKind::Ssh);
        assert_eq!(ConnectionKind::from("carrier pigeon"), ConnectionKind::Unknown);
        assert_eq!(ConnectionKind::Unknown.tag(), "?");
    }

    #[test]
    fn unknown_message_kind_is_preserved() {
        let kind = MessageKind::from("guild_invite");
        assert_eq!(kind, MessageKind::Other("guild_invite".into()));
        assert_eq!(kind.as_str(), "guild_invite");

        let json = serde_json::to_string(&MessageKind::Private).unwrap();
        assert_eq!(json, "\"chat_private\"");
    }
}
