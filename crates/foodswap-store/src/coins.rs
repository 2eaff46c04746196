//! Local coin ledger.
//!
//! Each row records one signed movement and the balance after it, so the
//! current balance is simply the newest row's `balance`. Charges carrying an
//! idempotency key are recorded at most once.
//!
//! A refund is stored under `refund:{key}`. Refunding a key whose charge has
//! not arrived yet stores a zero-amount refund, and that key can then never
//! be charged.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use foodswap_shared::{CoinEntryId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{CoinEntry, CoinEntryKind};
use crate::rows::{get_id, get_ts, ts};

const REFUND_PREFIX: &str = "refund:";

const COIN_COLUMNS: &str =
    "id, user_id, amount, kind, description, balance, idempotency_key, created_at";

impl Database {
    pub fn coin_balance(&self, user_id: UserId) -> Result<i64> {
        balance_of(self.conn(), user_id)
    }

    /// Apply a signed movement to a user's balance.
    ///
    /// If `idempotency_key` was already recorded the original entry is
    /// returned and nothing is written. A key that was refunded before it
    /// was ever charged fails with [`StoreError::ChargeRevoked`]. A movement
    /// that would take the balance below zero fails with
    /// [`StoreError::InsufficientCoins`].
    pub fn record_coin_entry(
        &mut self,
        user_id: UserId,
        amount: i64,
        kind: CoinEntryKind,
        description: &str,
        idempotency_key: Option<&str>,
    ) -> Result<CoinEntry> {
        let tx = self.immediate()?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = entry_by_key(&tx, key)? {
                return Ok(existing);
            }
            if entry_by_key(&tx, &format!("{REFUND_PREFIX}{key}"))?.is_some() {
                return Err(StoreError::ChargeRevoked(key.to_string()));
            }
        }

        let balance = balance_of(&tx, user_id)?;
        let next = balance + amount;
        if next < 0 {
            return Err(StoreError::InsufficientCoins {
                balance,
                required: -amount,
            });
        }

        let entry = insert_entry(&tx, user_id, amount, kind, description, next, idempotency_key)?;
        tx.commit()?;
        Ok(entry)
    }

    /// Reverse the charge recorded under `key`, or revoke it if it has not
    /// been recorded yet. Refunding twice returns the first refund.
    pub fn refund_coin_charge(
        &mut self,
        key: &str,
        user_id: UserId,
        description: &str,
    ) -> Result<CoinEntry> {
        let tx = self.immediate()?;
        let refund_key = format!("{REFUND_PREFIX}{key}");

        if let Some(existing) = entry_by_key(&tx, &refund_key)? {
            return Ok(existing);
        }

        let entry = match entry_by_key(&tx, key)? {
            Some(original) => {
                let balance = balance_of(&tx, original.user_id)?;
                insert_entry(
                    &tx,
                    original.user_id,
                    -original.amount,
                    CoinEntryKind::Refund,
                    &format!("Refund: {}", original.description),
                    balance - original.amount,
                    Some(&refund_key),
                )?
            }
            None => {
                let balance = balance_of(&tx, user_id)?;
                insert_entry(
                    &tx,
                    user_id,
                    0,
                    CoinEntryKind::Refund,
                    &format!("Revoked: {description}"),
                    balance,
                    Some(&refund_key),
                )?
            }
        };
        tx.commit()?;
        Ok(entry)
    }

    pub fn coin_entry_by_key(&self, key: &str) -> Result<Option<CoinEntry>> {
        entry_by_key(self.conn(), key)
    }

    /// A user's ledger entries, newest first, plus the total count.
    pub fn coin_history(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<CoinEntry>, i64)> {
        let total: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM coin_transactions WHERE user_id = ?1",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COIN_COLUMNS} FROM coin_transactions
             WHERE user_id = ?1
             ORDER BY rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![user_id.to_string(), limit, offset], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok((entries, total))
    }
}

fn balance_of(conn: &Connection, user_id: UserId) -> Result<i64> {
    let balance: Option<i64> = conn
        .query_row(
            "SELECT balance FROM coin_transactions WHERE user_id = ?1 ORDER BY rowid DESC LIMIT 1",
            params![user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

fn insert_entry(
    conn: &Connection,
    user_id: UserId,
    amount: i64,
    kind: CoinEntryKind,
    description: &str,
    balance: i64,
    idempotency_key: Option<&str>,
) -> Result<CoinEntry> {
    let entry = CoinEntry {
        id: CoinEntryId::new(),
        user_id,
        amount,
        kind,
        description: description.to_string(),
        balance,
        idempotency_key: idempotency_key.map(str::to_string),
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO coin_transactions (id, user_id, amount, kind, description, balance,
             idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id.to_string(),
            entry.user_id.to_string(),
            entry.amount,
            entry.kind.as_str(),
            entry.description,
            entry.balance,
            entry.idempotency_key,
            ts(&entry.created_at),
        ],
    )?;
    Ok(entry)
}

fn entry_by_key(conn: &Connection, key: &str) -> Result<Option<CoinEntry>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COIN_COLUMNS} FROM coin_transactions WHERE idempotency_key = ?1"),
            params![key],
            row_to_entry,
        )
        .optional()?)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CoinEntry> {
    let kind_str: String = row.get(3)?;
    let kind = CoinEntryKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown coin entry kind {kind_str:?}").into(),
        )
    })?;

    Ok(CoinEntry {
        id: get_id(row, 0)?,
        user_id: get_id(row, 1)?,
        amount: row.get(2)?,
        kind,
        description: row.get(4)?,
        balance: row.get(5)?,
        idempotency_key: row.get(6)?,
        created_at: get_ts(row, 7)?,
    })
}
