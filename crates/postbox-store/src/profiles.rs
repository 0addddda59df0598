//! Per-user profiles: group memberships and the fan-out mark.
//!
//! Memberships can only be replaced through
//! [`FanoutEngine::update_groups`](crate::FanoutEngine::update_groups), which
//! flushes pending broadcasts under the old membership first.

use std::collections::BTreeSet;
use std::sync::Arc;

use postbox_shared::{time, UserRef};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::database::Database;
use crate::error::Result;
use crate::group_messages::max_seq;
use crate::models::{FanoutMark, Profile};
use crate::rows::{conversion_failure, encode_ts, ts_at, user_at};

#[derive(Clone)]
pub struct ProfileStore {
    db: Arc<Database>,
}

impl ProfileStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Get or create the profile of `user`.
    ///
    /// A new profile has no stored groups and a fan-out mark at the newest
    /// broadcast, so broadcasts sent before the user first showed up are not
    /// delivered.
    pub fn for_user(&self, user: &UserRef) -> Result<Profile> {
        let conn = self.db.conn()?;
        for_user_in(&conn, user)
    }

    /// Whether `user` is a member of `group`. Everyone is in `"all"`.
    pub fn is_in_group(&self, user: &UserRef, group: &str) -> Result<bool> {
        Ok(self.for_user(user)?.is_in_group(group))
    }

    pub(crate) fn replace_groups(&self, user: &UserRef, groups: &BTreeSet<String>) -> Result<Profile> {
        let conn = self.db.conn()?;
        for_user_in(&conn, user)?;
        conn.execute(
            "UPDATE profiles SET groups = ?2 WHERE user = ?1",
            params![user.as_str(), serde_json::to_string(groups)?],
        )?;
        load(&conn, user)
    }
}

pub(crate) fn for_user_in(conn: &Connection, user: &UserRef) -> Result<Profile> {
    let now = time::now();
    let created = conn.execute(
        "INSERT OR IGNORE INTO profiles (user, groups, fanout_at, fanout_seq, created_at)
         VALUES (?1, '[]', ?2, ?3, ?2)",
        params![user.as_str(), encode_ts(&now), max_seq(conn)?],
    )?;
    if created > 0 {
        debug!(user = %user, "profile created");
    }
    load(conn, user)
}

/// Move the fan-out mark forward to `mark`. Never moves it backwards;
/// returns whether the row changed.
pub(crate) fn advance_mark(conn: &Connection, user: &UserRef, mark: FanoutMark) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE profiles SET fanout_at = ?2, fanout_seq = ?3
         WHERE user = ?1 AND fanout_seq < ?3",
        params![user.as_str(), encode_ts(&mark.sent_at), mark.seq],
    )?;
    Ok(affected > 0)
}

fn load(conn: &Connection, user: &UserRef) -> Result<Profile> {
    Ok(conn.query_row(
        "SELECT user, groups, fanout_at, fanout_seq, created_at FROM profiles WHERE user = ?1",
        params![user.as_str()],
        row_to_profile,
    )?)
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let groups_json: String = row.get(1)?;
    let groups: BTreeSet<String> =
        serde_json::from_str(&groups_json).map_err(|e| conversion_failure(1, e))?;

    Ok(Profile {
        user: user_at(row, 0)?,
        groups,
        fanout_mark: FanoutMark {
            sent_at: ts_at(row, 2)?,
            seq: row.get(3)?,
        },
        created_at: ts_at(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group_messages::GroupMessageStore;

    fn setup() -> (Arc<Database>, ProfileStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (Arc::clone(&db), ProfileStore::new(db))
    }

    fn user(s: &str) -> UserRef {
        UserRef::new(s).unwrap()
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let (_db, profiles) = setup();
        let u = user("user2@domain.com");

        let first = profiles.for_user(&u).unwrap();
        let second = profiles.for_user(&u).unwrap();

        assert_eq!(first, second);
        assert!(first.groups.is_empty());
        assert_eq!(first.fanout_mark.sent_at, first.created_at);
    }

    #[test]
    fn test_new_profile_starts_after_existing_broadcasts() {
        let (db, profiles) = setup();
        let broadcasts = GroupMessageStore::new(Arc::clone(&db), 8);
        broadcasts.send(&user("a@x"), "all", "old", "").unwrap();
        broadcasts.send(&user("a@x"), "all", "older", "").unwrap();

        let profile = profiles.for_user(&user("b@x")).unwrap();
        assert_eq!(profile.fanout_mark.seq, 2);
        assert_eq!(broadcasts.query(&profile.all_groups(), profile.fanout_mark).count(), 0);
    }

    #[test]
    fn test_replace_groups() {
        let (_db, profiles) = setup();
        let u = user("b@x");

        let groups: BTreeSet<String> = ["python".to_string()].into_iter().collect();
        let p = profiles.replace_groups(&u, &groups).unwrap();

        assert_eq!(p.groups, groups);
        assert!(profiles.is_in_group(&u, "python").unwrap());
        assert!(profiles.is_in_group(&u, "all").unwrap());
        assert!(!profiles.is_in_group(&u, "java").unwrap());
    }

    #[test]
    fn test_mark_only_moves_forward() {
        let (db, profiles) = setup();
        let u = user("b@x");
        let start = profiles.for_user(&u).unwrap().fanout_mark;
        let conn = db.conn().unwrap();

        let later = FanoutMark {
            sent_at: start.sent_at + chrono::Duration::seconds(1),
            seq: start.seq + 1,
        };
        assert!(advance_mark(&conn, &u, later).unwrap());
        assert!(!advance_mark(&conn, &u, start).unwrap());
        assert!(!advance_mark(&conn, &u, later).unwrap());
        assert_eq!(load(&conn, &u).unwrap().fanout_mark, later);
    }

    #[test]
    fn test_mark_advances_by_seq_even_with_older_timestamp() {
        let (db, profiles) = setup();
        let u = user("b@x");
        let start = profiles.for_user(&u).unwrap().fanout_mark;
        let conn = db.conn().unwrap();

        let backdated = FanoutMark {
            sent_at: start.sent_at - chrono::Duration::seconds(30),
            seq: start.seq + 1,
        };
        assert!(advance_mark(&conn, &u, backdated).unwrap());
        assert_eq!(load(&conn, &u).unwrap().fanout_mark, backdated);
    }
}
