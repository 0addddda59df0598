//! The read and send paths over the stores.
//!
//! [`Mailbox`] is what a service boundary calls with an identity it has
//! already authenticated. Every inbox read runs a fan-out sync for the
//! reading user first, so broadcasts show up without a send-time fan-out.

use std::sync::Arc;

use postbox_shared::{AddressSeparatorPolicy, Destination, DestinationPolicy, PageCursor, UserRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::fanout::FanoutEngine;
use crate::group_messages::GroupMessageStore;
use crate::messages::MessageStore;
use crate::models::{Message, Page, Profile, UnreadCount};
use crate::profiles::ProfileStore;

/// Where a composed message went.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Sent {
    Direct(Uuid),
    Broadcast(Uuid),
}

pub struct Mailbox {
    messages: MessageStore,
    broadcasts: GroupMessageStore,
    profiles: ProfileStore,
    fanout: FanoutEngine,
    policy: Arc<dyn DestinationPolicy>,
    config: StoreConfig,
}

impl Mailbox {
    /// Build every component on top of one shared database handle.
    pub fn new(db: Arc<Database>, config: StoreConfig) -> Self {
        let messages = MessageStore::new(Arc::clone(&db));
        let broadcasts = GroupMessageStore::new(Arc::clone(&db), config.fanout_batch);
        let profiles = ProfileStore::new(Arc::clone(&db));
        let fanout = FanoutEngine::new(db, broadcasts.clone(), profiles.clone());

        Self {
            messages,
            broadcasts,
            profiles,
            fanout,
            policy: Arc::new(AddressSeparatorPolicy),
            config,
        }
    }

    /// Open the database described by `config` and build a mailbox on it.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let db = Arc::new(Database::new(&config)?);
        Ok(Self::new(db, config))
    }

    /// Replace the destination classifier used by [`Mailbox::send`].
    pub fn with_policy(mut self, policy: Arc<dyn DestinationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn broadcasts(&self) -> &GroupMessageStore {
        &self.broadcasts
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn fanout(&self) -> &FanoutEngine {
        &self.fanout
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Send to a user or broadcast to a group, depending on how the policy
    /// classifies `destination`.
    pub fn send(&self, from: &UserRef, destination: &str, subject: &str, content: &str) -> Result<Sent> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(StoreError::InvalidDestination(destination.to_string()));
        }

        match self.policy.classify(destination) {
            Destination::Individual => {
                let to = UserRef::new(destination)?;
                Ok(Sent::Direct(self.messages.send(from, &to, subject, content)?))
            }
            Destination::Group => Ok(Sent::Broadcast(
                self.broadcasts.send(from, destination, subject, content)?,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Read path (always syncs first)
    // ------------------------------------------------------------------

    /// One page of `user`'s inbox, newest first.
    ///
    /// `cursor` is the `next_cursor` of the previous page. A malformed token
    /// is rejected with [`StoreError::InvalidCursor`] rather than silently
    /// restarting from the top.
    pub fn inbox(&self, user: &UserRef, cursor: Option<&str>, limit: Option<u32>) -> Result<Page> {
        let cursor = cursor.map(PageCursor::decode).transpose()?;
        self.fanout.sync(user)?;
        self.messages
            .list(user, cursor.as_ref(), self.config.page_limit(limit))
    }

    /// Unread messages in `user`'s inbox, capped at the configured limit.
    pub fn unread_count(&self, user: &UserRef) -> Result<UnreadCount> {
        self.fanout.sync(user)?;
        self.messages.unread_count(user, self.config.unread_limit)
    }

    /// Fetch a message for display and mark it read. Only the owner may
    /// open it.
    pub fn open_message(&self, user: &UserRef, id: Uuid) -> Result<Message> {
        self.messages.mark_read(id, user)?;
        self.messages.get(id)
    }

    pub fn delete_message(&self, user: &UserRef, id: Uuid) -> Result<()> {
        self.messages.delete(id, user)
    }

    // ------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------

    pub fn profile(&self, user: &UserRef) -> Result<Profile> {
        self.profiles.for_user(user)
    }

    pub fn update_groups<I, S>(&self, user: &UserRef, groups: I) -> Result<Profile>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.fanout.update_groups(user, groups)
    }

    /// Fill `user`'s inbox with `count` self-addressed sample messages.
    pub fn populate(&self, user: &UserRef, count: usize) -> Result<Vec<Uuid>> {
        (0..count)
            .map(|i| {
                self.messages
                    .send(user, user, &format!("subject {i}"), &format!("content {i}"))
            })
            .collect()
    }
}
