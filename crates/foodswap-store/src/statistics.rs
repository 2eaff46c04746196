use rusqlite::params;

use foodswap_shared::{ChatStatus, TransactionStatus, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::BarterCounts;

impl Database {
    /// Per-user barter counters. Read-only.
    pub fn barter_counts(&self, user_id: UserId) -> Result<BarterCounts> {
        let user = user_id.to_string();

        let chats_initiated: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM barter_chats WHERE offerer_id = ?1",
            params![user],
            |row| row.get(0),
        )?;

        let barters_completed: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM barter_chats
             WHERE (offerer_id = ?1 OR owner_id = ?1) AND status = ?2",
            params![user, ChatStatus::Completed.as_str()],
            |row| row.get(0),
        )?;

        let items_traded: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM barter_transaction_items ti
             JOIN barter_transactions t ON t.id = ti.transaction_id
             JOIN barter_chats c ON c.id = t.chat_id
             WHERE (c.offerer_id = ?1 OR c.owner_id = ?1) AND t.status = ?2",
            params![user, TransactionStatus::Completed.as_str()],
            |row| row.get(0),
        )?;

        Ok(BarterCounts {
            chats_initiated,
            barters_completed,
            items_traded,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::database::test_support::{open_temp, sample_chat, sample_item, sample_transaction};
    use crate::models::ChatRole;
    use foodswap_shared::GeoPoint;

    #[test]
    fn counts_reflect_completed_trades_only() {
        let (mut db, _dir) = open_temp();
        let owner = UserId::new();
        let offerer = UserId::new();

        let a = sample_item(owner, GeoPoint::new(0.0, 0.0));
        let b = sample_item(offerer, GeoPoint::new(0.0, 0.0));
        let c = sample_item(owner, GeoPoint::new(0.0, 0.0));
        for item in [&a, &b, &c] {
            db.insert_item(item).unwrap();
        }

        let (chat, msg) = sample_chat(&a, offerer);
        db.open_chat(&chat, &msg).unwrap();
        let (other_chat, msg) = sample_chat(&c, offerer);
        db.open_chat(&other_chat, &msg).unwrap();

        let (t, links) = sample_transaction(chat.id, &[a.id], &[b.id]);
        db.create_transaction(&t, &links).unwrap();

        let before = db.barter_counts(offerer).unwrap();
        assert_eq!(before.chats_initiated, 2);
        assert_eq!(before.barters_completed, 0);
        assert_eq!(before.items_traded, 0);

        db.confirm_transaction(t.id, ChatRole::Owner, Utc::now()).unwrap();
        db.confirm_transaction(t.id, ChatRole::Offerer, Utc::now()).unwrap();
        db.swap_finalize_attempt(t.id, None, "a1").unwrap();
        db.finalize_transaction(t.id, "a1", 5, Utc::now()).unwrap();

        let owner_counts = db.barter_counts(owner).unwrap();
        assert_eq!(owner_counts.chats_initiated, 0);
        assert_eq!(owner_counts.barters_completed, 1);
        assert_eq!(owner_counts.items_traded, 2);

        let stranger = db.barter_counts(UserId::new()).unwrap();
        assert_eq!(stranger, BarterCounts::default());
    }
}
