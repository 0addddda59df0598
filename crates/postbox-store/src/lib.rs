//! # postbox-store
//!
//! Persistent storage and delivery engine for Postbox, backed by SQLite.
//!
//! Direct messages live in a per-recipient log. Broadcasts ("group messages")
//! are stored once and copied into each recipient's log lazily, the next time
//! that recipient reads their inbox. The [`Mailbox`] facade wires the stores
//! together and is what a service boundary should call; the individual stores
//! are exposed for tooling and tests.

pub mod config;
pub mod database;
pub mod fanout;
pub mod group_messages;
pub mod mailbox;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;

mod error;
mod rows;

pub use config::StoreConfig;
pub use database::Database;
pub use error::{Result, StoreError};
pub use fanout::{FanoutEngine, SyncReport};
pub use group_messages::{GroupMessageStore, PendingBroadcasts};
pub use mailbox::{Mailbox, Sent};
pub use messages::MessageStore;
pub use models::*;
pub use profiles::ProfileStore;
