use tavern_sync::ChatReply;
use tavern_types::{Message, MessageKind};

const RULE: &str = "════════════════════════════════════════════════════════════";

pub fn message_line(message: &Message) -> String {
    match &message.kind {
        MessageKind::Chat => format!("[{}] {}", message.from, message.body),
        MessageKind::Private => format!("[PM from {}] {}", message.from, message.body),
        MessageKind::System => format!("[SYSTEM] {}", message.body),
        MessageKind::Duel => format!("[DUEL] {} challenges you to a duel!", message.from),
        MessageKind::Trade => format!("[TRADE] {} sent you a trade offer.", message.from),
        MessageKind::Other(_) => format!("[{}] {}", message.from, message.body),
    }
}

pub fn reply_lines(reply: &ChatReply) -> Vec<String> {
    match reply {
        ChatReply::Said { message } => {
            vec![format!("[You] {}", message), "  Message sent!".into()]
        }
        ChatReply::Told {
            recipient,
            message,
            recipient_online,
        } => {
            let status = if *recipient_online {
                "  Message sent!".to_string()
            } else {
                format!(
                    "  Message sent to {} (offline - they'll see it next login).",
                    recipient
                )
            };
            vec![format!("[To {}] {}", recipient, message), status]
        }
        ChatReply::RecipientNotFound { recipient } => {
            vec![format!("Player '{}' not found.", recipient)]
        }
        ChatReply::RecipientUnchecked { recipient } => {
            vec![format!(
                "Could not look up '{}' right now. Message not sent, try again shortly.",
                recipient
            )]
        }
        ChatReply::Announced { message } => vec![format!("[SYSTEM] {}", message)],
        ChatReply::Roster(roster) => {
            let mut lines = vec![RULE.into(), "                     WHO'S ONLINE".into(), RULE.into()];
            if roster.is_empty() {
                lines.push("  No other players currently online.".into());
            } else {
                lines.push(format!(
                    "  {:<18} {:<16} {:<5} {}",
                    "Player", "Location", "Via", "Connected"
                ));
                lines.extend(roster.iter().map(|line| format!("  {}", line)));
            }
            let plural = if roster.len() == 1 { "" } else { "s" };
            lines.push(format!("  {} player{} online", roster.len(), plural));
            lines.push(RULE.into());
            lines
        }
        ChatReply::News(entries) => {
            let mut lines = vec![RULE.into(), "                      TOWN NEWS".into(), RULE.into()];
            if entries.is_empty() {
                lines.push("  No recent news.".into());
            }
            lines.extend(entries.iter().map(|entry| {
                format!(
                    "  [{}] {}",
                    entry.created_at.format("%b %d %H:%M"),
                    entry.message
                )
            }));
            lines.push(RULE.into());
            lines
        }
        ChatReply::Usage(usage) => vec![format!("Usage: {}", usage)],
    }
}
