//! Barter transactions: proposal, confirmation, finalize and cancellation.
//!
//! Every state change here is a single `BEGIN IMMEDIATE` unit whose writes
//! are guarded by the expected current status, so two connections racing on
//! the same transaction serialize on the write lock and the loser observes
//! the winner's result instead of overwriting it.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use foodswap_shared::{ChatId, ChatStatus, GeoPoint, ItemStatus, TransactionId, TransactionStatus};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{BarterTransaction, BarterTransactionItem, ChatRole, Meetup};
use crate::rows::{get_bool, get_enum, get_id, get_opt_ts, get_ts, ts};

const TRANSACTION_COLUMNS: &str = "id, chat_id, meetup_name, meetup_address, meetup_latitude,
     meetup_longitude, meetup_time, owner_confirmed, offerer_confirmed, status, coins_charged,
     completed_at, created_at, updated_at";

/// Result of a finalize attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This call moved the transaction, its chat and its items to `Completed`.
    Finalized,
    /// Another caller already finalized it; nothing was written.
    AlreadyCompleted,
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a proposal and its item links.
    ///
    /// Re-checks under the write lock that the chat is `Active`, that it has
    /// no live transaction, and that every item is `Available` and not named
    /// by another pending transaction.
    pub fn create_transaction(
        &mut self,
        transaction: &BarterTransaction,
        items: &[BarterTransactionItem],
    ) -> Result<()> {
        let tx = self.immediate()?;

        let chat_status: ChatStatus = tx
            .query_row(
                "SELECT status FROM barter_chats WHERE id = ?1",
                params![transaction.chat_id.to_string()],
                |row| get_enum(row, 0),
            )
            .map_err(not_found)?;
        if chat_status != ChatStatus::Active {
            return Err(StoreError::Conflict(format!(
                "chat {} is {chat_status}",
                transaction.chat_id
            )));
        }

        let live: Option<String> = tx
            .query_row(
                "SELECT status FROM barter_transactions WHERE chat_id = ?1 AND status <> ?2",
                params![
                    transaction.chat_id.to_string(),
                    TransactionStatus::Cancelled.as_str()
                ],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(status) = live {
            return Err(StoreError::Conflict(format!(
                "chat {} already has a {status} transaction",
                transaction.chat_id
            )));
        }

        for link in items {
            let status: ItemStatus = tx
                .query_row(
                    "SELECT status FROM barter_items WHERE id = ?1",
                    params![link.item_id.to_string()],
                    |row| get_enum(row, 0),
                )
                .map_err(not_found)?;
            if status != ItemStatus::Available {
                return Err(StoreError::Conflict(format!(
                    "item {} is {status}",
                    link.item_id
                )));
            }

            let pending: Option<String> = tx
                .query_row(
                    "SELECT t.id FROM barter_transaction_items ti
                     JOIN barter_transactions t ON t.id = ti.transaction_id
                     WHERE ti.item_id = ?1 AND t.status = ?2
                     LIMIT 1",
                    params![link.item_id.to_string(), TransactionStatus::Pending.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(other) = pending {
                return Err(StoreError::Conflict(format!(
                    "item {} is already offered in transaction {other}",
                    link.item_id
                )));
            }
        }

        let m = &transaction.meetup;
        tx.execute(
            "INSERT INTO barter_transactions (id, chat_id, meetup_name, meetup_address,
                 meetup_latitude, meetup_longitude, meetup_time, owner_confirmed,
                 offerer_confirmed, status, coins_charged, completed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                transaction.id.to_string(),
                transaction.chat_id.to_string(),
                m.name,
                m.address,
                m.location.latitude,
                m.location.longitude,
                ts(&m.time),
                transaction.owner_confirmed as i32,
                transaction.offerer_confirmed as i32,
                transaction.status.as_str(),
                transaction.coins_charged,
                transaction.completed_at.as_ref().map(ts),
                ts(&transaction.created_at),
                ts(&transaction.updated_at),
            ],
        )?;

        for link in items {
            tx.execute(
                "INSERT INTO barter_transaction_items (id, transaction_id, item_id, owner_item, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    link.id.to_string(),
                    link.transaction_id.to_string(),
                    link.item_id.to_string(),
                    link.owner_item as i32,
                    ts(&link.created_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_transaction(&self, id: TransactionId) -> Result<BarterTransaction> {
        self.conn()
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM barter_transactions WHERE id = ?1"),
                params![id.to_string()],
                row_to_transaction,
            )
            .map_err(not_found)
    }

    /// The chat's live transaction, or its most recent cancelled one.
    pub fn transaction_for_chat(&self, chat_id: ChatId) -> Result<Option<BarterTransaction>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM barter_transactions
                     WHERE chat_id = ?1
                     ORDER BY (status = ?2) ASC, created_at DESC
                     LIMIT 1"
                ),
                params![chat_id.to_string(), TransactionStatus::Cancelled.as_str()],
                row_to_transaction,
            )
            .optional()?)
    }

    pub fn transaction_items(&self, id: TransactionId) -> Result<Vec<BarterTransactionItem>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, transaction_id, item_id, owner_item, created_at
             FROM barter_transaction_items
             WHERE transaction_id = ?1
             ORDER BY owner_item DESC, created_at ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(BarterTransactionItem {
                id: get_id(row, 0)?,
                transaction_id: get_id(row, 1)?,
                item_id: get_id(row, 2)?,
                owner_item: get_bool(row, 3)?,
                created_at: get_ts(row, 4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Set one side's confirmation flag on a `Pending` transaction and return
    /// the row as it stands after the write.
    ///
    /// Setting and re-reading happen under one write lock, so of two racing
    /// confirmations exactly one observes both flags set first. When the
    /// transaction is no longer pending nothing is written and the current
    /// row is returned for the caller to inspect.
    pub fn confirm_transaction(
        &mut self,
        id: TransactionId,
        role: ChatRole,
        now: DateTime<Utc>,
    ) -> Result<BarterTransaction> {
        let tx = self.immediate()?;

        let sql = match role {
            ChatRole::Owner => {
                "UPDATE barter_transactions SET owner_confirmed = 1, updated_at = ?2
                 WHERE id = ?1 AND status = ?3 AND owner_confirmed = 0"
            }
            ChatRole::Offerer => {
                "UPDATE barter_transactions SET offerer_confirmed = 1, updated_at = ?2
                 WHERE id = ?1 AND status = ?3 AND offerer_confirmed = 0"
            }
        };
        tx.execute(
            sql,
            params![id.to_string(), ts(&now), TransactionStatus::Pending.as_str()],
        )?;

        let current = tx
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM barter_transactions WHERE id = ?1"),
                params![id.to_string()],
                row_to_transaction,
            )
            .map_err(not_found)?;

        tx.commit()?;
        Ok(current)
    }

    /// The last finalize attempt recorded on a transaction, if any.
    pub fn finalize_attempt(&self, id: TransactionId) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT finalize_attempt FROM barter_transactions WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }

    /// Record `next` as the current finalize attempt of a `Pending`
    /// transaction whose recorded attempt is still `expected`.
    ///
    /// Returns `false` when the transaction moved on or another attempt was
    /// recorded in between.
    pub fn swap_finalize_attempt(
        &self,
        id: TransactionId,
        expected: Option<&str>,
        next: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE barter_transactions SET finalize_attempt = ?3
             WHERE id = ?1 AND status = ?4 AND finalize_attempt IS ?2",
            params![
                id.to_string(),
                expected,
                next,
                TransactionStatus::Pending.as_str()
            ],
        )?;
        Ok(affected > 0)
    }

    /// Atomically complete a fully confirmed transaction: the transaction,
    /// its chat and every linked item move to `Completed` and the charged
    /// amount is recorded. Either all of it commits or none of it does.
    ///
    /// Only the finalize attempt currently recorded on the row may commit.
    pub fn finalize_transaction(
        &mut self,
        id: TransactionId,
        attempt: &str,
        coins_charged: i64,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let tx = self.immediate()?;

        let affected = tx.execute(
            "UPDATE barter_transactions
             SET status = ?2, completed_at = ?3, coins_charged = ?4, updated_at = ?3
             WHERE id = ?1 AND status = ?5 AND owner_confirmed = 1 AND offerer_confirmed = 1
               AND finalize_attempt = ?6",
            params![
                id.to_string(),
                TransactionStatus::Completed.as_str(),
                ts(&now),
                coins_charged,
                TransactionStatus::Pending.as_str(),
                attempt,
            ],
        )?;

        if affected == 0 {
            let (status, both): (TransactionStatus, bool) = tx
                .query_row(
                    "SELECT status, owner_confirmed AND offerer_confirmed
                     FROM barter_transactions WHERE id = ?1",
                    params![id.to_string()],
                    |row| Ok((get_enum(row, 0)?, get_bool(row, 1)?)),
                )
                .map_err(not_found)?;
            return match status {
                TransactionStatus::Completed => Ok(FinalizeOutcome::AlreadyCompleted),
                _ if !both => Err(StoreError::Conflict(format!(
                    "transaction {id} is not confirmed by both parties"
                ))),
                TransactionStatus::Pending => Err(StoreError::Conflict(format!(
                    "finalize attempt {attempt} of transaction {id} was superseded"
                ))),
                other => Err(StoreError::Conflict(format!("transaction {id} is {other}"))),
            };
        }

        let chat_id: String = tx.query_row(
            "SELECT chat_id FROM barter_transactions WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        let affected = tx.execute(
            "UPDATE barter_chats SET status = ?2 WHERE id = ?1 AND status = ?3",
            params![
                chat_id,
                ChatStatus::Completed.as_str(),
                ChatStatus::Active.as_str()
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::Conflict(format!("chat {chat_id} is not active")));
        }

        let mut item_ids: Vec<String> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT item_id FROM barter_transaction_items WHERE transaction_id = ?1",
            )?;
            let rows = stmt.query_map(params![id.to_string()], |row| row.get(0))?;
            for row in rows {
                item_ids.push(row?);
            }
        }
        for item_id in &item_ids {
            let affected = tx.execute(
                "UPDATE barter_items SET status = ?2, updated_at = ?3
                 WHERE id = ?1 AND status IN (?4, ?5)",
                params![
                    item_id,
                    ItemStatus::Completed.as_str(),
                    ts(&now),
                    ItemStatus::Available.as_str(),
                    ItemStatus::Reserved.as_str(),
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::Conflict(format!(
                    "item {item_id} can no longer be traded"
                )));
            }
        }

        tx.commit()?;
        tracing::debug!(transaction_id = %id, items = item_ids.len(), "transaction finalized");
        Ok(FinalizeOutcome::Finalized)
    }

    /// Cancel a `Pending` transaction. The chat stays as it is.
    pub fn cancel_transaction(&mut self, id: TransactionId, now: DateTime<Utc>) -> Result<()> {
        let tx = self.immediate()?;
        let affected = tx.execute(
            "UPDATE barter_transactions SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![
                id.to_string(),
                TransactionStatus::Cancelled.as_str(),
                ts(&now),
                TransactionStatus::Pending.as_str(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::Conflict(format!("transaction {id} is not pending")));
        }
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<BarterTransaction> {
    Ok(BarterTransaction {
        id: get_id(row, 0)?,
        chat_id: get_id(row, 1)?,
        meetup: Meetup {
            name: row.get(2)?,
            address: row.get(3)?,
            location: GeoPoint::new(row.get(4)?, row.get(5)?),
            time: get_ts(row, 6)?,
        },
        owner_confirmed: get_bool(row, 7)?,
        offerer_confirmed: get_bool(row, 8)?,
        status: get_enum(row, 9)?,
        coins_charged: row.get(10)?,
        completed_at: get_opt_ts(row, 11)?,
        created_at: get_ts(row, 12)?,
        updated_at: get_ts(row, 13)?,
    })
}
