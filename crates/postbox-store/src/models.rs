//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to whatever service boundary embeds the engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use postbox_shared::constants::ALL_GROUP;
use postbox_shared::{PageCursor, UserRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message in one recipient's log: either a direct message or a personal
/// copy of a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// Partition the message lives in. Always equal to `to`.
    pub owner: UserRef,
    pub from: UserRef,
    pub to: UserRef,
    /// Originating group, for copies of a broadcast.
    pub group: Option<String>,
    /// Source broadcast, for copies of a broadcast.
    pub group_message_id: Option<Uuid>,
    /// Sort key of the inbox (newest first).
    pub sent_at: DateTime<Utc>,
    pub subject: String,
    pub content: String,
    /// Set once by the owner; never reverts.
    pub is_read: bool,
}

impl Message {
    pub fn is_broadcast_copy(&self) -> bool {
        self.group_message_id.is_some()
    }

    /// Position of this message in its owner's log.
    pub fn cursor(&self) -> PageCursor {
        PageCursor::new(self.sent_at, self.id)
    }
}

// ---------------------------------------------------------------------------
// Group message
// ---------------------------------------------------------------------------

/// A broadcast addressed to every member of `to_group`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMessage {
    pub id: Uuid,
    /// Append-order sequence number; strictly increasing across broadcasts.
    pub seq: i64,
    pub from: UserRef,
    pub to_group: String,
    pub sent_at: DateTime<Utc>,
    pub subject: String,
    pub content: String,
}

impl GroupMessage {
    pub fn mark(&self) -> FanoutMark {
        FanoutMark {
            sent_at: self.sent_at,
            seq: self.seq,
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// High-water mark of broadcasts already copied into a user's log.
///
/// Position is decided by `seq` alone. `sent_at` is only informational: a
/// broadcast can commit with an older timestamp than one already copied and
/// must still be picked up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanoutMark {
    pub sent_at: DateTime<Utc>,
    pub seq: i64,
}

/// Per-user delivery state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user: UserRef,
    /// Stored memberships. Never contains the implicit `"all"` group.
    pub groups: BTreeSet<String>,
    pub fanout_mark: FanoutMark,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Stored groups plus the implicit `"all"` group.
    pub fn all_groups(&self) -> BTreeSet<String> {
        let mut groups = self.groups.clone();
        groups.insert(ALL_GROUP.to_string());
        groups
    }

    pub fn is_in_group(&self, group: &str) -> bool {
        group == ALL_GROUP || self.groups.contains(group)
    }
}

// ---------------------------------------------------------------------------
// Listing results
// ---------------------------------------------------------------------------

/// One page of an inbox listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    /// Token resuming right after the last message of this page.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Unread count, capped at `limit`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub count: u32,
    pub limit: u32,
}

impl UnreadCount {
    /// True when the real number may be larger than `count`.
    pub fn is_capped(&self) -> bool {
        self.limit > 0 && self.count >= self.limit
    }
}

impl std::fmt::Display for UnreadCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_capped() {
            write!(f, "{}+", self.limit)
        } else {
            write!(f, "{}", self.count)
        }
    }
}
