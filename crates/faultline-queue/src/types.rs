use std::fmt;

use chrono::{DateTime, Utc};

/// Backend-assigned handle of a queued message.
///
/// Both backends number messages from one increasing sequence, so ids also
/// order messages by publication, across every queue they hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(i64);

impl MessageId {
    #[must_use]
    pub const fn new(seq: i64) -> Self {
        Self(seq)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message claimed by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
    /// Claims so far on the current queue, this one included.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}
