use rusqlite::{params, Connection, OptionalExtension};

use foodswap_shared::{ChatId, ChatStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::BarterMessage;
use crate::rows::{get_bool, get_id, get_ts, ts};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, is_read, created_at";

impl Database {
    /// Append a message to an `Active` chat and bump its last-message time.
    pub fn append_message(&mut self, message: &BarterMessage) -> Result<()> {
        let tx = self.immediate()?;

        let affected = tx.execute(
            "UPDATE barter_chats SET last_message_at = ?2 WHERE id = ?1 AND status = ?3",
            params![
                message.chat_id.to_string(),
                ts(&message.created_at),
                ChatStatus::Active.as_str(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::Conflict(format!(
                "chat {} is not active",
                message.chat_id
            )));
        }

        insert_message(&tx, message)?;
        tx.commit()?;
        Ok(())
    }

    /// Messages of a chat, oldest first, plus the total count.
    pub fn list_messages(
        &self,
        chat_id: ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<BarterMessage>, i64)> {
        let total: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM barter_messages WHERE chat_id = ?1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM barter_messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![chat_id.to_string(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok((messages, total))
    }

    pub fn last_message(&self, chat_id: ChatId) -> Result<Option<BarterMessage>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM barter_messages
                     WHERE chat_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params![chat_id.to_string()],
                row_to_message,
            )
            .optional()?)
    }

    /// Flag every message not sent by `viewer` as read. Returns how many flipped.
    pub fn mark_read(&self, chat_id: ChatId, viewer: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE barter_messages SET is_read = 1
             WHERE chat_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![chat_id.to_string(), viewer.to_string()],
        )?;
        Ok(affected)
    }

    /// Unread messages sent to `viewer` by the other participant.
    pub fn unread_count(&self, chat_id: ChatId, viewer: UserId) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM barter_messages
             WHERE chat_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![chat_id.to_string(), viewer.to_string()],
            |row| row.get(0),
        )?)
    }
}

pub(crate) fn insert_message(conn: &Connection, message: &BarterMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO barter_messages (id, chat_id, sender_id, content, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id.to_string(),
            message.chat_id.to_string(),
            message.sender_id.to_string(),
            message.content,
            message.is_read as i32,
            ts(&message.created_at),
        ],
    )?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<BarterMessage> {
    Ok(BarterMessage {
        id: get_id(row, 0)?,
        chat_id: get_id(row, 1)?,
        sender_id: get_id(row, 2)?,
        content: row.get(3)?,
        is_read: get_bool(row, 4)?,
        created_at: get_ts(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::database::test_support::{open_temp, sample_chat, sample_item};
    use foodswap_shared::{GeoPoint, MessageId};

    fn message(chat_id: ChatId, sender: UserId, content: &str) -> BarterMessage {
        BarterMessage {
            id: MessageId::new(),
            chat_id,
            sender_id: sender,
            content: content.into(),
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unread_counts_follow_mark_read() {
        let (mut db, _dir) = open_temp();
        let owner = UserId::new();
        let offerer = UserId::new();
        let item = sample_item(owner, GeoPoint::new(0.0, 0.0));
        db.insert_item(&item).unwrap();
        let (chat, first) = sample_chat(&item, offerer);
        db.open_chat(&chat, &first).unwrap();

        db.append_message(&message(chat.id, offerer, "still available?")).unwrap();
        db.append_message(&message(chat.id, owner, "yes")).unwrap();

        // Owner has two unread from the offerer; the offerer one from the owner.
        assert_eq!(db.unread_count(chat.id, owner).unwrap(), 2);
        assert_eq!(db.unread_count(chat.id, offerer).unwrap(), 1);

        assert_eq!(db.mark_read(chat.id, owner).unwrap(), 2);
        assert_eq!(db.unread_count(chat.id, owner).unwrap(), 0);
        assert_eq!(db.mark_read(chat.id, owner).unwrap(), 0);
        assert_eq!(db.unread_count(chat.id, offerer).unwrap(), 1);

        let last = db.last_message(chat.id).unwrap().unwrap();
        assert_eq!(last.content, "yes");
    }

    #[test]
    fn cannot_append_to_cancelled_chat() {
        let (mut db, _dir) = open_temp();
        let item = sample_item(UserId::new(), GeoPoint::new(0.0, 0.0));
        db.insert_item(&item).unwrap();
        let offerer = UserId::new();
        let (chat, first) = sample_chat(&item, offerer);
        db.open_chat(&chat, &first).unwrap();
        db.cancel_chat(chat.id, Utc::now()).unwrap();

        let result = db.append_message(&message(chat.id, offerer, "hello?"));
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(db.list_messages(chat.id, 10, 0).unwrap().1, 1);
    }
}
