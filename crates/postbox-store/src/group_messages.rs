//! Broadcast log.
//!
//! Broadcasts are stored once, in one global collection, and are never
//! mutated or deleted. Delivery into recipients' logs is the fan-out
//! engine's job; nothing here touches `messages`.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use postbox_shared::{time, UserRef};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::info;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{FanoutMark, GroupMessage};
use crate::rows::{encode_ts, ts_at, user_at, uuid_at};

const GROUP_MESSAGE_COLUMNS: &str = "seq, id, from_user, to_group, sent_at, subject, content";

#[derive(Clone)]
pub struct GroupMessageStore {
    db: Arc<Database>,
    batch: u32,
}

impl GroupMessageStore {
    /// `batch` is how many broadcasts [`PendingBroadcasts`] fetches per
    /// round trip.
    pub fn new(db: Arc<Database>, batch: u32) -> Self {
        Self {
            db,
            batch: batch.max(1),
        }
    }

    /// Append a broadcast for every member of `to_group`.
    ///
    /// The group name is trimmed so it matches stored memberships. The send
    /// time is read while holding the connection, so `sent_at` order follows
    /// `seq` order for writers sharing this handle.
    pub fn send(&self, from: &UserRef, to_group: &str, subject: &str, content: &str) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let to_group = to_group.trim();

        let conn = self.db.conn()?;
        let sent_at = time::now();
        conn.execute(
            "INSERT INTO group_messages (id, from_user, to_group, sent_at, subject, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                from.as_str(),
                to_group,
                encode_ts(&sent_at),
                subject,
                content,
            ],
        )?;
        let seq = conn.last_insert_rowid();

        info!(subject, id = %id, seq, group = to_group, "group send");
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<GroupMessage> {
        self.db
            .conn()?
            .query_row(
                &format!("SELECT {GROUP_MESSAGE_COLUMNS} FROM group_messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_group_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id),
                other => StoreError::StorageUnavailable(other),
            })
    }

    /// Broadcasts addressed to any of `groups` with a `seq` above
    /// `after.seq`, in append order.
    ///
    /// Only `seq` decides what is pending: it follows commit order, while
    /// `sent_at` is read from a clock and may commit out of order.
    ///
    /// The sequence is lazy: rows are fetched in batches and the connection
    /// is released between batches, so callers may write to the database
    /// while iterating.
    pub fn query(&self, groups: &BTreeSet<String>, after: FanoutMark) -> PendingBroadcasts {
        PendingBroadcasts {
            db: Arc::clone(&self.db),
            groups: groups.iter().cloned().collect(),
            after,
            batch: self.batch,
            buffer: VecDeque::new(),
            exhausted: groups.is_empty(),
        }
    }
}

/// Lazy iterator returned by [`GroupMessageStore::query`].
pub struct PendingBroadcasts {
    db: Arc<Database>,
    groups: Vec<String>,
    after: FanoutMark,
    batch: u32,
    buffer: VecDeque<GroupMessage>,
    exhausted: bool,
}

impl PendingBroadcasts {
    fn fill(&mut self) -> Result<()> {
        let rows = {
            let conn = self.db.conn()?;
            fetch_after(&conn, &self.groups, self.after, self.batch)?
        };

        if rows.len() < self.batch as usize {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.after = last.mark();
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for PendingBroadcasts {
    type Item = Result<GroupMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn fetch_after(
    conn: &Connection,
    groups: &[String],
    after: FanoutMark,
    limit: u32,
) -> Result<Vec<GroupMessage>> {
    let n = groups.len();
    let placeholders = (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT {GROUP_MESSAGE_COLUMNS} FROM group_messages
         WHERE to_group IN ({placeholders})
           AND seq > ?{seq}
         ORDER BY seq ASC
         LIMIT ?{limit}",
        seq = n + 1,
        limit = n + 2,
    );

    let mut values: Vec<Value> = groups.iter().cloned().map(Value::Text).collect();
    values.push(Value::Integer(after.seq));
    values.push(Value::Integer(i64::from(limit)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), row_to_group_message)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Highest sequence number handed out so far (0 when empty).
pub(crate) fn max_seq(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM group_messages",
        [],
        |row| row.get(0),
    )?)
}

fn row_to_group_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMessage> {
    Ok(GroupMessage {
        seq: row.get(0)?,
        id: uuid_at(row, 1)?,
        from: user_at(row, 2)?,
        to_group: row.get(3)?,
        sent_at: ts_at(row, 4)?,
        subject: row.get(5)?,
        content: row.get(6)?,
    })
}
