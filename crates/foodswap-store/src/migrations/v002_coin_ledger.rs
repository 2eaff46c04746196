use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS coin_transactions (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    user_id         TEXT NOT NULL,
    amount          INTEGER NOT NULL,           -- signed, negative for spending
    kind            TEXT NOT NULL,              -- Purchase | Use | Reward | Refund
    description     TEXT NOT NULL,
    balance         INTEGER NOT NULL CHECK (balance >= 0),
    idempotency_key TEXT,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_coin_transactions_user
    ON coin_transactions(user_id, created_at DESC);
CREATE UNIQUE INDEX IF NOT EXISTS idx_coin_transactions_idempotency
    ON coin_transactions(idempotency_key) WHERE idempotency_key IS NOT NULL;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
