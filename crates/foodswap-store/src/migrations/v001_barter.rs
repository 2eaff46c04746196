//! v001 -- Barter schema.
//!
//! Creates the five barter tables: `barter_items`, `barter_chats`,
//! `barter_messages`, `barter_transactions` and `barter_transaction_items`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Items
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS barter_items (
    id             TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    user_id        TEXT NOT NULL,               -- owner
    food_item_id   TEXT,                        -- optional inventory record
    name           TEXT NOT NULL,
    description    TEXT NOT NULL,
    quantity       INTEGER NOT NULL CHECK (quantity > 0),
    unit_measure   TEXT NOT NULL,
    expiry_date    TEXT NOT NULL,               -- YYYY-MM-DD
    condition      TEXT NOT NULL,               -- Sealed | Opened | New | Used
    image_ref      TEXT,                        -- media object reference
    status         TEXT NOT NULL DEFAULT 'Available',
    latitude       REAL NOT NULL,
    longitude      REAL NOT NULL,
    preferred_swap TEXT,
    created_at     TEXT NOT NULL,               -- RFC-3339, UTC, micros
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_barter_items_user_status
    ON barter_items(user_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_barter_items_location
    ON barter_items(latitude, longitude);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS barter_chats (
    id              TEXT PRIMARY KEY NOT NULL,
    item_id         TEXT NOT NULL,
    offerer_id      TEXT NOT NULL,
    owner_id        TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'Active',
    last_message_at TEXT NOT NULL,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (item_id) REFERENCES barter_items(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_barter_chats_triple
    ON barter_chats(item_id, offerer_id, owner_id);
CREATE INDEX IF NOT EXISTS idx_barter_chats_offerer ON barter_chats(offerer_id);
CREATE INDEX IF NOT EXISTS idx_barter_chats_owner ON barter_chats(owner_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS barter_messages (
    id         TEXT PRIMARY KEY NOT NULL,
    chat_id    TEXT NOT NULL,
    sender_id  TEXT NOT NULL,
    content    TEXT NOT NULL,
    is_read    INTEGER NOT NULL DEFAULT 0,      -- boolean 0/1
    created_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES barter_chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_barter_messages_chat_ts
    ON barter_messages(chat_id, created_at);

-- ----------------------------------------------------------------
-- Transactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS barter_transactions (
    id                TEXT PRIMARY KEY NOT NULL,
    chat_id           TEXT NOT NULL,
    meetup_name       TEXT NOT NULL,
    meetup_address    TEXT NOT NULL,
    meetup_latitude   REAL NOT NULL,
    meetup_longitude  REAL NOT NULL,
    meetup_time       TEXT NOT NULL,
    owner_confirmed   INTEGER NOT NULL DEFAULT 0,
    offerer_confirmed INTEGER NOT NULL DEFAULT 0,
    status            TEXT NOT NULL DEFAULT 'Pending',
    coins_charged     INTEGER NOT NULL DEFAULT 0,
    completed_at      TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES barter_chats(id) ON DELETE CASCADE,
    CHECK (status <> 'Completed' OR (owner_confirmed = 1 AND offerer_confirmed = 1))
);

-- at most one live (non-cancelled) transaction per chat
CREATE UNIQUE INDEX IF NOT EXISTS idx_barter_transactions_live_chat
    ON barter_transactions(chat_id) WHERE status <> 'Cancelled';

-- ----------------------------------------------------------------
-- Transaction items
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS barter_transaction_items (
    id             TEXT PRIMARY KEY NOT NULL,
    transaction_id TEXT NOT NULL,
    item_id        TEXT NOT NULL,
    owner_item     INTEGER NOT NULL,            -- boolean 0/1
    created_at     TEXT NOT NULL,

    FOREIGN KEY (transaction_id) REFERENCES barter_transactions(id) ON DELETE CASCADE,
    FOREIGN KEY (item_id) REFERENCES barter_items(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_barter_tx_items_unique
    ON barter_transaction_items(transaction_id, item_id);
CREATE INDEX IF NOT EXISTS idx_barter_tx_items_item
    ON barter_transaction_items(item_id);
"#;

/// Apply the barter migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
