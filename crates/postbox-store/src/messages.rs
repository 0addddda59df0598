//! Per-recipient message log.
//!
//! Every row belongs to exactly one owner partition and every query is
//! scoped to one owner, so reads always observe earlier writes to the same
//! partition.

use std::sync::Arc;

use postbox_shared::{time, PageCursor, UserRef};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{GroupMessage, Message, Page, UnreadCount};
use crate::rows::{encode_ts, opt_uuid_at, ts_at, user_at, uuid_at};

const MESSAGE_COLUMNS: &str =
    "id, owner, from_user, to_user, to_group, group_message_id, sent_at, subject, content, is_read";

#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Deliver a direct message into `to`'s log.
    pub fn send(&self, from: &UserRef, to: &UserRef, subject: &str, content: &str) -> Result<Uuid> {
        let message = Message {
            id: Uuid::now_v7(),
            owner: to.clone(),
            from: from.clone(),
            to: to.clone(),
            group: None,
            group_message_id: None,
            sent_at: time::now(),
            subject: subject.to_string(),
            content: content.to_string(),
            is_read: false,
        };

        let conn = self.db.conn()?;
        insert_message(&conn, &message)?;

        info!(subject = %message.subject, id = %message.id, to = %to, "send");
        Ok(message.id)
    }

    /// Copy a broadcast into `to`'s log, keeping its group and send time.
    ///
    /// Idempotent per `(to, broadcast)`: the copy id is derived from both,
    /// so a repeated call leaves the log untouched and returns `false`.
    pub fn send_copy(&self, to: &UserRef, broadcast: &GroupMessage) -> Result<(Uuid, bool)> {
        let conn = self.db.conn()?;
        insert_copy(&conn, to, broadcast)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Point lookup. Never changes read state.
    pub fn get(&self, id: Uuid) -> Result<Message> {
        let conn = self.db.conn()?;
        conn.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id.to_string()],
            row_to_message,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id),
            other => StoreError::StorageUnavailable(other),
        })
    }

    /// One page of `owner`'s log, newest first, ties broken by id.
    ///
    /// Pagination is keyset-based: `cursor` is the key of the last message
    /// already seen, and the page starts strictly after it. A `limit` of 0
    /// is treated as 1 so every non-final page yields a cursor.
    pub fn list(&self, owner: &UserRef, cursor: Option<&PageCursor>, limit: u32) -> Result<Page> {
        let limit = limit.max(1);
        let fetch = i64::from(limit) + 1;
        let conn = self.db.conn()?;

        let mut messages = match cursor {
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE owner = ?1
                     ORDER BY sent_at DESC, id DESC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![owner.as_str(), fetch], row_to_message)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(after) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE owner = ?1
                       AND (sent_at < ?2 OR (sent_at = ?2 AND id < ?3))
                     ORDER BY sent_at DESC, id DESC
                     LIMIT ?4"
                ))?;
                let rows = stmt.query_map(
                    params![
                        owner.as_str(),
                        encode_ts(&after.sent_at),
                        after.id.to_string(),
                        fetch
                    ],
                    row_to_message,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        let next_cursor = messages.last().map(|m| m.cursor().encode());

        Ok(Page {
            messages,
            next_cursor,
            has_more,
        })
    }

    /// Number of unread messages in `owner`'s log, counting at most `limit`.
    pub fn unread_count(&self, owner: &UserRef, limit: u32) -> Result<UnreadCount> {
        let conn = self.db.conn()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT 1 FROM messages WHERE owner = ?1 AND is_read = 0 LIMIT ?2
             )",
            params![owner.as_str(), limit],
            |row| row.get(0),
        )?;
        Ok(UnreadCount { count, limit })
    }

    // ------------------------------------------------------------------
    // Update / delete (owner only)
    // ------------------------------------------------------------------

    /// Mark a message read. Only its owner may do this; repeated calls are
    /// no-ops.
    pub fn mark_read(&self, id: Uuid, requester: &UserRef) -> Result<()> {
        let conn = self.db.conn()?;
        ensure_owner(&conn, id, requester)?;
        conn.execute(
            "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Permanently remove a message. Only its owner may do this.
    pub fn delete(&self, id: Uuid, requester: &UserRef) -> Result<()> {
        let conn = self.db.conn()?;
        ensure_owner(&conn, id, requester)?;
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        debug!(id = %id, owner = %requester, "message deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (also used inside fan-out transactions)
// ---------------------------------------------------------------------------

/// Id of the copy of `broadcast_id` delivered to `owner`.
pub(crate) fn copy_id(owner: &UserRef, broadcast_id: Uuid) -> Uuid {
    Uuid::new_v5(&broadcast_id, owner.as_bytes())
}

pub(crate) fn insert_copy(
    conn: &Connection,
    owner: &UserRef,
    broadcast: &GroupMessage,
) -> Result<(Uuid, bool)> {
    let message = Message {
        id: copy_id(owner, broadcast.id),
        owner: owner.clone(),
        from: broadcast.from.clone(),
        to: owner.clone(),
        group: Some(broadcast.to_group.clone()),
        group_message_id: Some(broadcast.id),
        sent_at: broadcast.sent_at,
        subject: broadcast.subject.clone(),
        content: broadcast.content.clone(),
        is_read: false,
    };
    let inserted = insert_message(conn, &message)?;
    Ok((message.id, inserted))
}

fn insert_message(conn: &Connection, message: &Message) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO messages
             (id, owner, from_user, to_user, to_group, group_message_id, sent_at, subject, content, is_read)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            message.id.to_string(),
            message.owner.as_str(),
            message.from.as_str(),
            message.to.as_str(),
            message.group,
            message.group_message_id.map(|g| g.to_string()),
            encode_ts(&message.sent_at),
            message.subject,
            message.content,
            message.is_read as i32,
        ],
    )?;
    Ok(affected > 0)
}

fn ensure_owner(conn: &Connection, id: Uuid, requester: &UserRef) -> Result<()> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT owner FROM messages WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match owner {
        None => Err(StoreError::NotFound(id)),
        Some(owner) if owner == requester.as_str() => Ok(()),
        Some(_) => Err(StoreError::Forbidden {
            id,
            requester: requester.clone(),
        }),
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let is_read: i32 = row.get(9)?;
    Ok(Message {
        id: uuid_at(row, 0)?,
        owner: user_at(row, 1)?,
        from: user_at(row, 2)?,
        to: user_at(row, 3)?,
        group: row.get(4)?,
        group_message_id: opt_uuid_at(row, 5)?,
        sent_at: ts_at(row, 6)?,
        subject: row.get(7)?,
        content: row.get(8)?,
        is_read: is_read != 0,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::Rng;

    use super::*;

    fn user(s: &str) -> UserRef {
        UserRef::new(s).unwrap()
    }

    fn store() -> MessageStore {
        MessageStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn subjects(page: &Page) -> Vec<&str> {
        page.messages.iter().map(|m| m.subject.as_str()).collect()
    }

    fn drain(store: &MessageStore, owner: &UserRef, limit: u32) -> Vec<Message> {
        let mut out = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = store.list(owner, cursor.as_ref(), limit).unwrap();
            out.extend(page.messages.iter().cloned());
            if !page.has_more {
                break;
            }
            cursor = Some(PageCursor::decode(page.next_cursor.as_deref().unwrap()).unwrap());
        }
        out
    }

    #[test]
    fn test_send_message_details() {
        let store = store();
        let (a, b) = (user("user1@domain.com"), user("user2@domain.com"));

        let id = store.send(&a, &b, "subject", "content").unwrap();
        let m = store.get(id).unwrap();

        assert_eq!(m.from, a);
        assert_eq!(m.to, b);
        assert_eq!(m.owner, b);
        assert_eq!(m.subject, "subject");
        assert_eq!(m.content, "content");
        assert_eq!(m.group, None);
        assert!(!m.is_read);
        assert!(!m.is_broadcast_copy());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = store();
        let id = Uuid::now_v7();
        assert!(matches!(store.get(id), Err(StoreError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn test_newest_first() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        store.send(&a, &b, "s1", "").unwrap();
        store.send(&a, &b, "s2", "").unwrap();

        let page = store.list(&b, None, 10).unwrap();
        assert_eq!(subjects(&page), vec!["s2", "s1"]);
        assert!(!page.has_more);
    }

    #[test]
    fn test_recipients_only_see_their_own() {
        let store = store();
        let (a, b, c) = (user("a@x"), user("b@x"), user("c@x"));
        store.send(&a, &b, "to b 1", "").unwrap();
        store.send(&a, &c, "to c", "").unwrap();
        store.send(&c, &b, "to b 2", "").unwrap();

        assert_eq!(subjects(&store.list(&b, None, 10).unwrap()), vec!["to b 2", "to b 1"]);
        assert_eq!(subjects(&store.list(&c, None, 10).unwrap()), vec!["to c"]);
        assert!(store.list(&a, None, 10).unwrap().messages.is_empty());
    }

    #[test]
    fn test_get_does_not_mark_read() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        let id = store.send(&a, &b, "s", "c").unwrap();

        store.get(id).unwrap();
        assert!(!store.get(id).unwrap().is_read);
    }

    #[test]
    fn test_mark_read_by_owner_is_idempotent() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        let id = store.send(&a, &b, "s", "c").unwrap();

        store.mark_read(id, &b).unwrap();
        store.mark_read(id, &b).unwrap();
        assert!(store.get(id).unwrap().is_read);
    }

    #[test]
    fn test_mark_read_by_other_is_forbidden() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        let id = store.send(&a, &b, "s", "c").unwrap();

        // Even the sender does not own the recipient's copy.
        let err = store.mark_read(id, &a).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden { requester, .. } if requester == a));
        assert!(!store.get(id).unwrap().is_read);

        assert!(matches!(
            store.mark_read(Uuid::now_v7(), &b),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_requires_owner() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        let id = store.send(&a, &b, "s", "c").unwrap();

        assert!(matches!(store.delete(id, &a), Err(StoreError::Forbidden { .. })));
        store.delete(id, &b).unwrap();
        assert!(matches!(store.get(id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(id, &b), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_pagination_covers_everything_once() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        let total = 37;
        for i in 0..total {
            store.send(&a, &b, &format!("subject {i}"), "").unwrap();
        }

        let limit = rand::thread_rng().gen_range(1..=9);
        let all = drain(&store, &b, limit);

        assert_eq!(all.len(), total);
        let ids: HashSet<Uuid> = all.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), total);
        for pair in all.windows(2) {
            assert!((pair[0].sent_at, pair[0].id) > (pair[1].sent_at, pair[1].id));
        }
        assert_eq!(all[0].subject, format!("subject {}", total - 1));
    }

    #[test]
    fn test_pagination_unaffected_by_new_arrivals() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        for i in 0..6 {
            store.send(&a, &b, &format!("old {i}"), "").unwrap();
        }

        let first = store.list(&b, None, 3).unwrap();
        assert!(first.has_more);
        store.send(&a, &b, "new", "").unwrap();

        let cursor = PageCursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        let second = store.list(&b, Some(&cursor), 3).unwrap();

        assert_eq!(subjects(&first), vec!["old 5", "old 4", "old 3"]);
        assert_eq!(subjects(&second), vec!["old 2", "old 1", "old 0"]);
        assert!(!second.has_more);
    }

    #[test]
    fn test_exact_fit_reports_no_more() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        store.send(&a, &b, "one", "").unwrap();
        store.send(&a, &b, "two", "").unwrap();

        let page = store.list(&b, None, 2).unwrap();
        assert_eq!(page.messages.len(), 2);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_some());
    }

    #[test]
    fn test_zero_limit_still_pages_forward() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        store.send(&a, &b, "one", "").unwrap();
        store.send(&a, &b, "two", "").unwrap();

        let first = store.list(&b, None, 0).unwrap();
        assert_eq!(subjects(&first), vec!["two"]);
        assert!(first.has_more);
        let cursor = PageCursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();

        let second = store.list(&b, Some(&cursor), 0).unwrap();
        assert_eq!(subjects(&second), vec!["one"]);
        assert!(!second.has_more);
    }

    #[test]
    fn test_unread_count_is_capped() {
        let store = store();
        let (a, b) = (user("a@x"), user("b@x"));
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.send(&a, &b, &format!("s{i}"), "").unwrap());
        }
        store.mark_read(ids[0], &b).unwrap();

        assert_eq!(store.unread_count(&b, 99).unwrap(), UnreadCount { count: 4, limit: 99 });
        let capped = store.unread_count(&b, 3).unwrap();
        assert_eq!(capped.count, 3);
        assert!(capped.is_capped());
        assert_eq!(store.unread_count(&a, 99).unwrap().count, 0);
    }

    #[test]
    fn test_copy_is_idempotent_per_owner() {
        let store = store();
        let (a, b, c) = (user("a@x"), user("b@x"), user("c@x"));
        let broadcast = GroupMessage {
            id: Uuid::now_v7(),
            seq: 1,
            from: a,
            to_group: "python".to_string(),
            sent_at: time::now(),
            subject: "hi".to_string(),
            content: "all".to_string(),
        };

        let (id, inserted) = store.send_copy(&b, &broadcast).unwrap();
        assert!(inserted);
        let (again, inserted) = store.send_copy(&b, &broadcast).unwrap();
        assert!(!inserted);
        assert_eq!(id, again);

        let (other, inserted) = store.send_copy(&c, &broadcast).unwrap();
        assert!(inserted);
        assert_ne!(id, other);

        let copy = store.get(id).unwrap();
        assert_eq!(copy.group.as_deref(), Some("python"));
        assert_eq!(copy.sent_at, broadcast.sent_at);
        assert_eq!(copy.group_message_id, Some(broadcast.id));
        assert_eq!(store.list(&b, None, 10).unwrap().messages.len(), 1);
    }
}
