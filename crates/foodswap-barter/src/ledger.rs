//! SQLite-backed [`CoinLedger`] over the local `coin_transactions` table.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use foodswap_shared::{Page, UserId};
use foodswap_store::{CoinEntry, CoinEntryKind, Database, StoreError};

use crate::ports::{CoinCharge, CoinLedger, LedgerError};

#[derive(Clone)]
pub struct LocalCoinLedger {
    db: Arc<Mutex<Database>>,
}

impl LocalCoinLedger {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    fn with<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, StoreError>,
    ) -> Result<T, LedgerError> {
        let mut guard = self
            .db
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;
        f(&mut *guard).map_err(|e| match e {
            StoreError::InsufficientCoins { balance, required } => {
                LedgerError::InsufficientFunds { balance, required }
            }
            StoreError::ChargeRevoked(key) => LedgerError::Revoked(key),
            other => LedgerError::Unavailable(other.to_string()),
        })
    }

    /// Add coins to a balance (purchases, rewards).
    pub fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        kind: CoinEntryKind,
        description: &str,
    ) -> Result<CoinEntry, LedgerError> {
        let entry = self.with(|db| db.record_coin_entry(user_id, amount, kind, description, None))?;
        info!(user_id = %user_id, amount, balance = entry.balance, "Coins credited");
        Ok(entry)
    }

    pub fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        self.with(|db| db.coin_balance(user_id))
    }

    pub fn history(&self, user_id: UserId, page: Page) -> Result<(Vec<CoinEntry>, i64), LedgerError> {
        self.with(|db| db.coin_history(user_id, page.limit, page.offset()))
    }
}

#[async_trait]
impl CoinLedger for LocalCoinLedger {
    async fn charge_coins(&self, charge: &CoinCharge) -> Result<i64, LedgerError> {
        let entry = self.with(|db| {
            db.record_coin_entry(
                charge.user_id,
                -charge.amount,
                CoinEntryKind::Use,
                &charge.reason,
                Some(&charge.idempotency_key),
            )
        })?;
        debug!(
            user_id = %charge.user_id,
            key = %charge.idempotency_key,
            balance = entry.balance,
            "Coins charged"
        );
        Ok(entry.balance)
    }

    async fn refund_coins(&self, charge: &CoinCharge) -> Result<(), LedgerError> {
        let entry = self.with(|db| {
            db.refund_coin_charge(&charge.idempotency_key, charge.user_id, &charge.reason)
        })?;
        debug!(
            user_id = %entry.user_id,
            key = %charge.idempotency_key,
            amount = entry.amount,
            "Charge refunded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn ledger() -> (LocalCoinLedger, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("coins.db")).unwrap();
        (LocalCoinLedger::new(Arc::new(Mutex::new(db))), dir)
    }

    fn charge(user_id: UserId, key: &str) -> CoinCharge {
        CoinCharge {
            user_id,
            amount: 5,
            reason: "Barter completed".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn charge_refund_cycle() {
        let (ledger, _dir) = ledger();
        let user = UserId::new();
        ledger
            .credit(user, 10, CoinEntryKind::Purchase, "starter pack")
            .unwrap();

        assert_eq!(ledger.charge_coins(&charge(user, "t1:u")).await.unwrap(), 5);
        assert_eq!(ledger.charge_coins(&charge(user, "t1:u")).await.unwrap(), 5);
        assert_eq!(ledger.balance(user).unwrap(), 5);

        ledger.refund_coins(&charge(user, "t1:u")).await.unwrap();
        ledger.refund_coins(&charge(user, "t1:u")).await.unwrap();
        assert_eq!(ledger.balance(user).unwrap(), 10);

        let (history, total) = ledger.history(user, Page::default()).unwrap();
        assert_eq!(total, 3);
        assert_eq!(history[0].kind, CoinEntryKind::Refund);
        assert_eq!(history[0].amount, 5);
    }

    #[tokio::test]
    async fn refund_ahead_of_charge_revokes_it() {
        let (ledger, _dir) = ledger();
        let user = UserId::new();
        ledger
            .credit(user, 10, CoinEntryKind::Purchase, "starter pack")
            .unwrap();

        ledger.refund_coins(&charge(user, "t3:u")).await.unwrap();
        let err = ledger.charge_coins(&charge(user, "t3:u")).await.unwrap_err();
        assert_eq!(err, LedgerError::Revoked("t3:u".to_string()));
        assert_eq!(ledger.balance(user).unwrap(), 10);
    }

    #[tokio::test]
    async fn charge_without_funds_fails() {
        let (ledger, _dir) = ledger();
        let err = ledger
            .charge_coins(&charge(UserId::new(), "t2:u"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                balance: 0,
                required: 5
            }
        );
    }
}
