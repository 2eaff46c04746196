//! CRUD operations for [`BarterChat`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use foodswap_shared::{ChatId, ChatStatus, ItemId, TransactionStatus, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::messages::insert_message;
use crate::models::{BarterChat, BarterMessage};
use crate::rows::{get_enum, get_id, get_ts, ts};

const CHAT_COLUMNS: &str =
    "id, item_id, offerer_id, owner_id, status, last_message_at, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Open a chat for its (item, offerer, owner) triple, recording
    /// `first_message` as the first message.
    ///
    /// If a chat already exists for the triple it is returned unchanged and
    /// `first_message` is dropped. The boolean is `true` when a new chat was
    /// created.
    pub fn open_chat(
        &mut self,
        chat: &BarterChat,
        first_message: &BarterMessage,
    ) -> Result<(BarterChat, bool)> {
        let tx = self.immediate()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM barter_chats
                     WHERE item_id = ?1 AND offerer_id = ?2 AND owner_id = ?3"
                ),
                params![
                    chat.item_id.to_string(),
                    chat.offerer_id.to_string(),
                    chat.owner_id.to_string(),
                ],
                row_to_chat,
            )
            .optional()?;
        if let Some(existing) = existing {
            return Ok((existing, false));
        }

        tx.execute(
            "INSERT INTO barter_chats (id, item_id, offerer_id, owner_id, status, last_message_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chat.id.to_string(),
                chat.item_id.to_string(),
                chat.offerer_id.to_string(),
                chat.owner_id.to_string(),
                chat.status.as_str(),
                ts(&chat.last_message_at),
                ts(&chat.created_at),
            ],
        )?;
        insert_message(&tx, first_message)?;
        tx.commit()?;

        Ok((chat.clone(), true))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: ChatId) -> Result<BarterChat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM barter_chats WHERE id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(not_found)
    }

    /// Look up the chat for a triple. `Ok(None)` means "no chat yet", which
    /// is distinct from a failed query.
    pub fn find_chat(
        &self,
        item_id: ItemId,
        offerer_id: UserId,
        owner_id: UserId,
    ) -> Result<Option<BarterChat>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM barter_chats
                     WHERE item_id = ?1 AND offerer_id = ?2 AND owner_id = ?3"
                ),
                params![
                    item_id.to_string(),
                    offerer_id.to_string(),
                    owner_id.to_string()
                ],
                row_to_chat,
            )
            .optional()?)
    }

    /// Chats the user takes part in, most recent activity first, plus the
    /// total matching count.
    pub fn list_user_chats(
        &self,
        user_id: UserId,
        status: Option<ChatStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<BarterChat>, i64)> {
        let status = status.map(|s| s.as_str());

        let total: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM barter_chats
             WHERE (offerer_id = ?1 OR owner_id = ?1) AND (?2 IS NULL OR status = ?2)",
            params![user_id.to_string(), status],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM barter_chats
             WHERE (offerer_id = ?1 OR owner_id = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY last_message_at DESC, created_at DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![user_id.to_string(), status, limit, offset],
            row_to_chat,
        )?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok((chats, total))
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Cancel an `Active` chat together with its `Pending` transaction, if any.
    ///
    /// Fails with [`StoreError::Conflict`] when the chat is no longer active.
    pub fn cancel_chat(&mut self, id: ChatId, now: DateTime<Utc>) -> Result<()> {
        let tx = self.immediate()?;

        let affected = tx.execute(
            "UPDATE barter_chats SET status = ?2 WHERE id = ?1 AND status = ?3",
            params![
                id.to_string(),
                ChatStatus::Cancelled.as_str(),
                ChatStatus::Active.as_str(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::Conflict(format!("chat {id} is not active")));
        }

        tx.execute(
            "UPDATE barter_transactions SET status = ?2, updated_at = ?4
             WHERE chat_id = ?1 AND status = ?3",
            params![
                id.to_string(),
                TransactionStatus::Cancelled.as_str(),
                TransactionStatus::Pending.as_str(),
                ts(&now),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<BarterChat> {
    Ok(BarterChat {
        id: get_id(row, 0)?,
        item_id: get_id(row, 1)?,
        offerer_id: get_id(row, 2)?,
        owner_id: get_id(row, 3)?,
        status: get_enum(row, 4)?,
        last_message_at: get_ts(row, 5)?,
        created_at: get_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{open_temp, sample_chat, sample_item};
    use foodswap_shared::GeoPoint;

    #[test]
    fn open_chat_is_idempotent_per_triple() {
        let (mut db, _dir) = open_temp();
        let owner = UserId::new();
        let offerer = UserId::new();
        let item = sample_item(owner, GeoPoint::new(0.0, 0.0));
        db.insert_item(&item).unwrap();

        let (chat, msg) = sample_chat(&item, offerer);
        let (first, created) = db.open_chat(&chat, &msg).unwrap();
        assert!(created);

        let (chat2, msg2) = sample_chat(&item, offerer);
        let (second, created) = db.open_chat(&chat2, &msg2).unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);

        // Only the first message was recorded.
        let (messages, total) = db.list_messages(first.id, 50, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(messages[0].id, msg.id);

        let found = db.find_chat(item.id, offerer, owner).unwrap();
        assert_eq!(found.map(|c| c.id), Some(first.id));
        assert!(db.find_chat(item.id, owner, offerer).unwrap().is_none());
    }

    #[test]
    fn list_orders_by_last_message() {
        let (mut db, _dir) = open_temp();
        let owner = UserId::new();
        let offerer = UserId::new();

        let older = sample_item(owner, GeoPoint::new(0.0, 0.0));
        let newer = sample_item(owner, GeoPoint::new(0.0, 0.0));
        db.insert_item(&older).unwrap();
        db.insert_item(&newer).unwrap();

        let (mut c1, m1) = sample_chat(&older, offerer);
        c1.last_message_at = Utc::now() - chrono::Duration::hours(2);
        let (c2, m2) = sample_chat(&newer, offerer);
        db.open_chat(&c1, &m1).unwrap();
        db.open_chat(&c2, &m2).unwrap();

        let (chats, total) = db.list_user_chats(owner, None, 10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(chats[0].id, c2.id);
        assert_eq!(chats[1].id, c1.id);

        let (chats, total) = db
            .list_user_chats(offerer, Some(ChatStatus::Cancelled), 10, 0)
            .unwrap();
        assert!(chats.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn cancel_only_active_chats() {
        let (mut db, _dir) = open_temp();
        let item = sample_item(UserId::new(), GeoPoint::new(0.0, 0.0));
        db.insert_item(&item).unwrap();
        let (chat, msg) = sample_chat(&item, UserId::new());
        db.open_chat(&chat, &msg).unwrap();

        db.cancel_chat(chat.id, Utc::now()).unwrap();
        assert_eq!(db.get_chat(chat.id).unwrap().status, ChatStatus::Cancelled);
        assert!(matches!(
            db.cancel_chat(chat.id, Utc::now()),
            Err(StoreError::Conflict(_))
        ));
    }
}
