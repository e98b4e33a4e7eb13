pub mod events;
pub mod models;

pub use events::{ConnectionKind, MessageKind};
pub use models::{
    BROADCAST, DailyLockRecord, Message, NewsEntry, PlayerRecord, PresenceRecord,
    SharedStateEntry, UpdateOutcome, Versioned,
};
