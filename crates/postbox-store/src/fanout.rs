//! Lazy fan-out of broadcasts into recipients' logs.
//!
//! Broadcasts are not copied when sent. Instead, right before a user's inbox
//! is read, [`FanoutEngine::sync`] replays every broadcast addressed to the
//! user's groups since their fan-out mark and appends a personal copy of each
//! to their log.
//!
//! Each copy is written in the same transaction that advances the mark, so a
//! failure part-way leaves the mark on the last delivered broadcast and a
//! retry resumes right after it. Copies have deterministic ids, so two syncs
//! racing from different processes cannot deliver the same broadcast twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use postbox_shared::types::normalize_groups;
use postbox_shared::UserRef;
use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::group_messages::GroupMessageStore;
use crate::messages::insert_copy;
use crate::models::{FanoutMark, GroupMessage, Profile};
use crate::profiles::{advance_mark, ProfileStore};

/// Outcome of one [`FanoutEngine::sync`] call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    /// Copies newly written to the user's log.
    pub delivered: usize,
    /// Fan-out mark after the sync.
    pub mark: FanoutMark,
}

#[derive(Clone)]
pub struct FanoutEngine {
    db: Arc<Database>,
    broadcasts: GroupMessageStore,
    profiles: ProfileStore,
    locks: Arc<UserLocks>,
}

impl FanoutEngine {
    pub fn new(db: Arc<Database>, broadcasts: GroupMessageStore, profiles: ProfileStore) -> Self {
        Self {
            db,
            broadcasts,
            profiles,
            locks: Arc::new(UserLocks::default()),
        }
    }

    /// Copy every pending broadcast into `user`'s log.
    ///
    /// Only ever touches `user`'s own partition.
    pub fn sync(&self, user: &UserRef) -> Result<SyncReport> {
        let handle = self.locks.handle(user)?;
        let _guard = handle
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        self.sync_locked(user)
    }

    /// Replace `user`'s stored groups.
    ///
    /// Pending broadcasts are flushed under the old membership first;
    /// otherwise anything sent to a group being left would never arrive.
    pub fn update_groups<I, S>(&self, user: &UserRef, groups: I) -> Result<Profile>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups = normalize_groups(groups);

        let handle = self.locks.handle(user)?;
        let _guard = handle
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        self.sync_locked(user)?;
        let profile = self.profiles.replace_groups(user, &groups)?;

        info!(user = %user, groups = ?profile.groups, "groups updated");
        Ok(profile)
    }

    /// Drop lock entries no request is currently holding.
    pub fn purge_idle_locks(&self) -> usize {
        self.locks.purge_idle()
    }

    fn sync_locked(&self, user: &UserRef) -> Result<SyncReport> {
        let profile = self.profiles.for_user(user)?;
        let mut report = SyncReport {
            delivered: 0,
            mark: profile.fanout_mark,
        };

        for pending in self.broadcasts.query(&profile.all_groups(), profile.fanout_mark) {
            let broadcast = pending?;
            if self.materialize(user, &broadcast)? {
                report.delivered += 1;
            }
            report.mark = broadcast.mark();
        }

        if report.mark != profile.fanout_mark {
            debug!(
                user = %user,
                delivered = report.delivered,
                seq = report.mark.seq,
                "fan-out advanced"
            );
        }
        Ok(report)
    }

    fn materialize(&self, user: &UserRef, broadcast: &GroupMessage) -> Result<bool> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (id, inserted) = insert_copy(&tx, user, broadcast)?;
        advance_mark(&tx, user, broadcast.mark())?;
        tx.commit()?;

        if inserted {
            debug!(user = %user, id = %id, group = %broadcast.to_group, "broadcast copied");
        }
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// Per-user locks
// ---------------------------------------------------------------------------

/// Serializes sync and membership changes for one user within this process.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<UserRef, Arc<Mutex<()>>>>,
}

impl UserLocks {
    fn handle(&self, user: &UserRef) -> Result<Arc<Mutex<()>>> {
        let mut map = self
            .inner
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(Arc::clone(map.entry(user.clone()).or_default()))
    }

    fn purge_idle(&self) -> usize {
        let Ok(mut map) = self.inner.lock() else {
            return 0;
        };
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }
}
