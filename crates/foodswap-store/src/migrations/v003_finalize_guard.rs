//! v003 -- Finalize attempts and permanent trade history.
//!
//! Adds `barter_transactions.finalize_attempt`, the id of the last finalize
//! attempt whose coin charges may still be live, and triggers that refuse to
//! delete completed chats, completed transactions or their item links,
//! including through `ON DELETE CASCADE` from `barter_items`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE barter_transactions ADD COLUMN finalize_attempt TEXT;

CREATE TRIGGER IF NOT EXISTS trg_barter_chats_keep_completed
BEFORE DELETE ON barter_chats
WHEN OLD.status = 'Completed'
BEGIN
    SELECT RAISE(ABORT, 'completed chats are permanent');
END;

CREATE TRIGGER IF NOT EXISTS trg_barter_transactions_keep_completed
BEFORE DELETE ON barter_transactions
WHEN OLD.status = 'Completed'
BEGIN
    SELECT RAISE(ABORT, 'completed transactions are permanent');
END;

CREATE TRIGGER IF NOT EXISTS trg_barter_tx_items_keep_completed
BEFORE DELETE ON barter_transaction_items
WHEN (SELECT status FROM barter_transactions WHERE id = OLD.transaction_id) = 'Completed'
BEGIN
    SELECT RAISE(ABORT, 'completed transactions are permanent');
END;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
