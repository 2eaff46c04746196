//! Transaction coordinator.
//!
//! A transaction moves `Pending -> Completed` or `Pending -> Cancelled` and
//! nothing else. Completion needs both participants to confirm; whichever
//! confirmation observes both flags set runs the finalize:
//!
//! 1. charge the coin cost to each participant through the [`CoinLedger`],
//!    each call bounded by the configured timeout
//! 2. in one SQLite transaction, move the transaction, its chat and every
//!    linked item to `Completed` and record the charged amount
//!
//! If a charge fails, the charges already taken are refunded and nothing is
//! written; both confirmation flags stay set, so the next confirmation
//! retries the finalize. If the database step fails or finds the transaction
//! already finalized, this attempt's charges are refunded. Finalize attempts
//! within one process are serialized per transaction, and the database
//! step is a status compare-and-swap, so the effects land exactly once.
//!
//! Every attempt is recorded on the transaction row before it charges. A
//! timed-out charge can still land after its refund ran, so the next attempt
//! first refunds the recorded one, which revokes any of its charges that
//! have not arrived, and only the recorded attempt may commit.
//!
//! [`CoinLedger`]: crate::ports::CoinLedger

use std::collections::HashSet;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use foodswap_shared::{
    ChatId, ChatStatus, ItemId, ItemStatus, TransactionId, TransactionItemId, TransactionStatus,
    UserId,
};
use foodswap_store::transactions::FinalizeOutcome;
use foodswap_store::{
    BarterChat, BarterItem, BarterTransaction, BarterTransactionItem, ChatRole, Database, Meetup,
};

use crate::error::{BarterError, Entity, OrNotFound, Result};
use crate::negotiation::participant_chat;
use crate::ports::{CoinCharge, LedgerError};
use crate::service::BarterService;

/// A transaction with the items each side contributes.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: BarterTransaction,
    pub owner_items: Vec<BarterItem>,
    pub offerer_items: Vec<BarterItem>,
}

/// Result of a successful `confirm_completion`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// The caller's confirmation is recorded; the other side has not confirmed.
    Pending(BarterTransaction),
    /// This call finalized the transaction.
    Completed(BarterTransaction),
    /// The transaction was already finalized; nothing changed.
    AlreadyCompleted(BarterTransaction),
}

impl ConfirmOutcome {
    pub fn transaction(&self) -> &BarterTransaction {
        match self {
            ConfirmOutcome::Pending(t)
            | ConfirmOutcome::Completed(t)
            | ConfirmOutcome::AlreadyCompleted(t) => t,
        }
    }
}

pub(crate) fn load_transaction_view(
    db: &Database,
    transaction: BarterTransaction,
) -> Result<TransactionView> {
    let mut owner_items = Vec::new();
    let mut offerer_items = Vec::new();
    for link in db.transaction_items(transaction.id)? {
        let item = db.get_item(link.item_id).or_not_found(Entity::Item)?;
        if link.owner_item {
            owner_items.push(item);
        } else {
            offerer_items.push(item);
        }
    }
    Ok(TransactionView {
        transaction,
        owner_items,
        offerer_items,
    })
}

/// Load a transaction, its chat and the caller's role in it.
fn participant_transaction(
    db: &Database,
    id: TransactionId,
    user_id: UserId,
) -> Result<(BarterTransaction, BarterChat, ChatRole)> {
    let transaction = db.get_transaction(id).or_not_found(Entity::Transaction)?;
    let (chat, role) = participant_chat(db, transaction.chat_id, user_id)?;
    Ok((transaction, chat, role))
}

/// The charges of one finalize attempt: `cost` from each participant, keyed
/// by transaction, participant and attempt.
fn finalize_charges(
    transaction: &BarterTransaction,
    chat: &BarterChat,
    attempt: &str,
    cost: i64,
) -> Vec<CoinCharge> {
    if cost <= 0 {
        return Vec::new();
    }
    [chat.owner_id, chat.offerer_id]
        .into_iter()
        .map(|participant| CoinCharge {
            user_id: participant,
            amount: cost,
            reason: format!("Barter transaction {}", transaction.id),
            idempotency_key: format!("barter:{}:{}:{}", transaction.id, participant, attempt),
        })
        .collect()
}

fn check_meetup(meetup: &Meetup) -> Result<()> {
    if meetup.name.trim().is_empty() {
        return Err(BarterError::validation("meetup name must not be empty"));
    }
    if !meetup.location.is_valid() {
        return Err(BarterError::validation("meetup coordinates out of range"));
    }
    Ok(())
}

fn check_item_ids(owner_item_ids: &[ItemId], offerer_item_ids: &[ItemId]) -> Result<()> {
    if owner_item_ids.is_empty() {
        return Err(BarterError::validation("the owner must contribute at least one item"));
    }
    let mut seen = HashSet::new();
    for id in owner_item_ids.iter().chain(offerer_item_ids) {
        if !seen.insert(*id) {
            return Err(BarterError::validation(format!("item {id} named twice")));
        }
    }
    Ok(())
}

/// Check that an item can be offered by `expected_owner` right now.
fn check_offered_item(db: &Database, id: ItemId, expected_owner: UserId) -> Result<()> {
    let item = db.get_item(id).or_not_found(Entity::Item)?;
    if item.owner_id != expected_owner {
        return Err(BarterError::validation(format!(
            "item {id} does not belong to its side of the chat"
        )));
    }
    if item.status != ItemStatus::Available {
        return Err(BarterError::InvalidStatus(format!("item {id} is {}", item.status)));
    }
    if db.item_in_transaction(id, TransactionStatus::Pending)? {
        return Err(BarterError::InvalidStatus(format!(
            "item {id} is already part of a pending transaction"
        )));
    }
    Ok(())
}

impl BarterService {
    /// Propose the chat's transaction: the items each side contributes and
    /// where to meet. Both confirmation flags start unset.
    pub async fn propose_transaction(
        &self,
        chat_id: ChatId,
        proposer_id: UserId,
        owner_item_ids: &[ItemId],
        offerer_item_ids: &[ItemId],
        meetup: Meetup,
    ) -> Result<TransactionView> {
        check_item_ids(owner_item_ids, offerer_item_ids)?;
        check_meetup(&meetup)?;

        let view = self.with(|db| {
            let (chat, _) = participant_chat(db, chat_id, proposer_id)?;
            if chat.status != ChatStatus::Active {
                return Err(BarterError::InvalidStatus(format!("chat is {}", chat.status)));
            }
            if let Some(existing) = db.transaction_for_chat(chat_id)? {
                if existing.status != TransactionStatus::Cancelled {
                    return Err(BarterError::InvalidStatus(format!(
                        "chat already has a {} transaction",
                        existing.status
                    )));
                }
            }
            for id in owner_item_ids {
                check_offered_item(db, *id, chat.owner_id)?;
            }
            for id in offerer_item_ids {
                check_offered_item(db, *id, chat.offerer_id)?;
            }

            let now = Utc::now();
            let transaction = BarterTransaction {
                id: TransactionId::new(),
                chat_id,
                meetup,
                owner_confirmed: false,
                offerer_confirmed: false,
                status: TransactionStatus::Pending,
                coins_charged: 0,
                completed_at: None,
                created_at: now,
                updated_at: now,
            };
            let sides = owner_item_ids
                .iter()
                .map(|id| (*id, true))
                .chain(offerer_item_ids.iter().map(|id| (*id, false)));
            let links: Vec<_> = sides
                .map(|(item_id, owner_item)| BarterTransactionItem {
                    id: TransactionItemId::new(),
                    transaction_id: transaction.id,
                    item_id,
                    owner_item,
                    created_at: now,
                })
                .collect();

            db.create_transaction(&transaction, &links)?;
            load_transaction_view(db, transaction)
        })?;

        info!(
            transaction_id = %view.transaction.id,
            chat_id = %chat_id,
            proposer_id = %proposer_id,
            owner_items = view.owner_items.len(),
            offerer_items = view.offerer_items.len(),
            "Transaction proposed"
        );
        Ok(view)
    }

    /// Record the caller's confirmation and finalize once both sides agree.
    ///
    /// Confirming again is a no-op. After completion every call returns
    /// [`ConfirmOutcome::AlreadyCompleted`] without side effects.
    pub async fn confirm_completion(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
    ) -> Result<ConfirmOutcome> {
        let (transaction, _, role) =
            self.with(|db| participant_transaction(db, transaction_id, user_id))?;
        match transaction.status {
            TransactionStatus::Completed => return Ok(ConfirmOutcome::AlreadyCompleted(transaction)),
            TransactionStatus::Cancelled => {
                return Err(BarterError::InvalidStatus("transaction is Cancelled".to_string()))
            }
            TransactionStatus::Pending => {}
        }

        let _guard = self.finalize_locks.lock(&transaction_id).await?;

        let current = self.with(|db| {
            Ok(db.confirm_transaction(transaction_id, role, Utc::now())?)
        })?;
        debug!(
            transaction_id = %transaction_id,
            ?role,
            owner_confirmed = current.owner_confirmed,
            offerer_confirmed = current.offerer_confirmed,
            "Confirmation recorded"
        );

        match current.status {
            TransactionStatus::Completed => Ok(ConfirmOutcome::AlreadyCompleted(current)),
            TransactionStatus::Cancelled => Err(BarterError::InvalidStatus(
                "transaction is Cancelled".to_string(),
            )),
            TransactionStatus::Pending if current.both_confirmed() => self.finalize(current).await,
            TransactionStatus::Pending => Ok(ConfirmOutcome::Pending(current)),
        }
    }

    async fn finalize(&self, transaction: BarterTransaction) -> Result<ConfirmOutcome> {
        let chat = self.with(|db| db.get_chat(transaction.chat_id).or_not_found(Entity::Chat))?;
        let cost = self.config.coin_cost;

        // Charges of an earlier attempt may still land; revoke them first.
        let previous = self.with(|db| Ok(db.finalize_attempt(transaction.id)?))?;
        if let Some(previous) = previous.as_deref() {
            let stale = finalize_charges(&transaction, &chat, previous, cost);
            for charge in &stale {
                self.refund(charge).await?;
            }
            debug!(transaction_id = %transaction.id, attempt = previous, "Previous attempt revoked");
        }

        let attempt = Uuid::new_v4().to_string();
        let claimed = self.with(|db| {
            Ok(db.swap_finalize_attempt(transaction.id, previous.as_deref(), &attempt)?)
        })?;
        if !claimed {
            return Err(BarterError::InvalidStatus(
                "transaction changed during finalize".to_string(),
            ));
        }

        let charges = finalize_charges(&transaction, &chat, &attempt, cost);
        let results = join_all(charges.iter().map(|c| self.charge(c))).await;
        if let Some(err) = results.into_iter().find_map(|r| r.err()) {
            warn!(transaction_id = %transaction.id, error = %err, "Coin charge failed, finalize aborted");
            self.refund_all(&charges).await;
            return Err(err.into());
        }

        let finalized = self.with(|db| {
            let outcome = db.finalize_transaction(transaction.id, &attempt, cost, Utc::now())?;
            Ok((outcome, db.get_transaction(transaction.id)?))
        });

        match finalized {
            Ok((FinalizeOutcome::Finalized, current)) => {
                info!(
                    transaction_id = %current.id,
                    chat_id = %current.chat_id,
                    coins = cost,
                    "Transaction completed"
                );
                Ok(ConfirmOutcome::Completed(current))
            }
            Ok((FinalizeOutcome::AlreadyCompleted, current)) => {
                self.refund_all(&charges).await;
                Ok(ConfirmOutcome::AlreadyCompleted(current))
            }
            Err(e) => {
                warn!(transaction_id = %transaction.id, error = %e, "Finalize failed, refunding");
                self.refund_all(&charges).await;
                Err(e)
            }
        }
    }

    async fn charge(&self, charge: &CoinCharge) -> std::result::Result<i64, LedgerError> {
        let timeout = self.config.ledger_timeout;
        match tokio::time::timeout(timeout, self.ports.ledger.charge_coins(charge)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Unavailable(format!(
                "charge timed out after {} ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn refund(&self, charge: &CoinCharge) -> std::result::Result<(), LedgerError> {
        let timeout = self.config.ledger_timeout;
        match tokio::time::timeout(timeout, self.ports.ledger.refund_coins(charge)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Unavailable(format!(
                "refund timed out after {} ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Best-effort refund of an aborted attempt. Whatever fails here is
    /// revoked again by the next attempt, which finds this one recorded.
    async fn refund_all(&self, charges: &[CoinCharge]) {
        for charge in charges {
            let key = charge.idempotency_key.as_str();
            match self.refund(charge).await {
                Ok(()) => debug!(key, "Charge refunded"),
                Err(e) => warn!(key, error = %e, "Refund failed"),
            }
        }
    }

    /// Withdraw a pending proposal. The chat stays active so a new proposal
    /// can replace it.
    pub async fn cancel_transaction(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
    ) -> Result<BarterTransaction> {
        let _guard = self.finalize_locks.lock(&transaction_id).await?;

        let (cancelled, chat, attempt) = self.with(|db| {
            let (transaction, chat, _) = participant_transaction(db, transaction_id, user_id)?;
            match transaction.status {
                TransactionStatus::Completed => return Err(BarterError::AlreadyCompleted),
                TransactionStatus::Cancelled => {
                    return Err(BarterError::InvalidStatus(
                        "transaction is already Cancelled".to_string(),
                    ))
                }
                TransactionStatus::Pending => {}
            }
            db.cancel_transaction(transaction_id, Utc::now())?;
            let attempt = db.finalize_attempt(transaction_id)?;
            Ok((db.get_transaction(transaction_id)?, chat, attempt))
        })?;

        if let Some(attempt) = attempt.as_deref() {
            let stale = finalize_charges(&cancelled, &chat, attempt, self.config.coin_cost);
            self.refund_all(&stale).await;
        }

        info!(transaction_id = %transaction_id, cancelled_by = %user_id, "Transaction cancelled");
        Ok(cancelled)
    }

    pub async fn get_transaction(
        &self,
        transaction_id: TransactionId,
        user_id: UserId,
    ) -> Result<TransactionView> {
        self.with(|db| {
            let (transaction, _, _) = participant_transaction(db, transaction_id, user_id)?;
            load_transaction_view(db, transaction)
        })
    }

    /// The chat's live transaction, or its latest cancelled one.
    pub async fn get_transaction_for_chat(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<TransactionView>> {
        self.with(|db| {
            participant_chat(db, chat_id, user_id)?;
            match db.transaction_for_chat(chat_id)? {
                Some(t) => Ok(Some(load_transaction_view(db, t)?)),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use foodswap_shared::GeoPoint;

    use super::*;
    use crate::config::BarterConfig;
    use crate::error::ErrorKind;
    use crate::service::test_support::{draft, harness, harness_with, user, Harness};

    struct Deal {
        owner: UserId,
        offerer: UserId,
        owner_item: ItemId,
        offerer_item: ItemId,
        chat: ChatId,
    }

    fn park() -> Meetup {
        Meetup {
            name: "Park".to_string(),
            address: "1 Park Lane".to_string(),
            location: GeoPoint::new(0.0, 0.005),
            time: Utc::now() + chrono::Duration::days(1),
        }
    }

    async fn deal(h: &Harness) -> Deal {
        let owner = user();
        let offerer = user();
        h.ledger.credit(owner, 10).await;
        h.ledger.credit(offerer, 10).await;
        let owner_item = h
            .service
            .create_item(owner, draft("Pasta", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap()
            .item
            .id;
        let offerer_item = h
            .service
            .create_item(offerer, draft("Beans", GeoPoint::new(0.0, 0.01)))
            .await
            .unwrap()
            .item
            .id;
        let chat = h
            .service
            .express_interest(owner_item, offerer, "Swap?")
            .await
            .unwrap()
            .id;
        Deal {
            owner,
            offerer,
            owner_item,
            offerer_item,
            chat,
        }
    }

    async fn propose(h: &Harness, d: &Deal) -> TransactionId {
        h.service
            .propose_transaction(d.chat, d.owner, &[d.owner_item], &[d.offerer_item], park())
            .await
            .unwrap()
            .transaction
            .id
    }

    #[tokio::test]
    async fn proposal_validates_sides() {
        let h = harness();
        let d = deal(&h).await;

        let err = h
            .service
            .propose_transaction(d.chat, d.owner, &[d.offerer_item], &[d.owner_item], park())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = h
            .service
            .propose_transaction(d.chat, user(), &[d.owner_item], &[], park())
            .await
            .unwrap_err();
        assert!(matches!(err, BarterError::Unauthorized));

        let err = h
            .service
            .propose_transaction(d.chat, d.owner, &[d.owner_item, d.owner_item], &[], park())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let view = h
            .service
            .propose_transaction(d.chat, d.offerer, &[d.owner_item], &[d.offerer_item], park())
            .await
            .unwrap();
        assert_eq!(view.owner_items[0].id, d.owner_item);
        assert_eq!(view.offerer_items[0].id, d.offerer_item);
        assert!(!view.transaction.owner_confirmed && !view.transaction.offerer_confirmed);

        // One live transaction per chat.
        let err = h
            .service
            .propose_transaction(d.chat, d.owner, &[d.owner_item], &[], park())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
    }

    #[tokio::test]
    async fn second_confirmation_finalizes_once() {
        let h = harness();
        let d = deal(&h).await;
        let t = propose(&h, &d).await;

        let first = h.service.confirm_completion(t, d.offerer).await.unwrap();
        let pending = match first {
            ConfirmOutcome::Pending(t) => t,
            other => panic!("expected pending, got {other:?}"),
        };
        assert!(pending.offerer_confirmed && !pending.owner_confirmed);

        // Re-confirming before the counterpart is a no-op.
        let again = h.service.confirm_completion(t, d.offerer).await.unwrap();
        assert!(matches!(again, ConfirmOutcome::Pending(_)));

        let done = h.service.confirm_completion(t, d.owner).await.unwrap();
        let completed = match done {
            ConfirmOutcome::Completed(t) => t,
            other => panic!("expected completed, got {other:?}"),
        };
        assert_eq!(completed.status, TransactionStatus::Completed);
        assert_eq!(completed.coins_charged, 5);
        assert!(completed.completed_at.is_some());

        assert_eq!(h.ledger.balance(d.owner).await, 5);
        assert_eq!(h.ledger.balance(d.offerer).await, 5);

        let third = h.service.confirm_completion(t, d.owner).await.unwrap();
        assert!(matches!(third, ConfirmOutcome::AlreadyCompleted(_)));
        assert_eq!(third.transaction().completed_at, completed.completed_at);
        assert_eq!(h.ledger.charges_applied().await, 2);

        let owner_item = h.service.get_item(d.owner_item).await.unwrap().item;
        assert_eq!(owner_item.status, ItemStatus::Completed);
        let chat = h.service.get_chat(d.chat, d.owner).await.unwrap();
        assert_eq!(chat.chat.status, ChatStatus::Completed);
    }

    #[tokio::test]
    async fn ledger_outage_keeps_transaction_retryable() {
        let h = harness();
        let d = deal(&h).await;
        let t = propose(&h, &d).await;

        h.service.confirm_completion(t, d.owner).await.unwrap();
        h.ledger.set_unavailable(true);
        let err = h.service.confirm_completion(t, d.offerer).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        let view = h.service.get_transaction(t, d.offerer).await.unwrap();
        assert_eq!(view.transaction.status, TransactionStatus::Pending);
        assert!(view.transaction.both_confirmed());
        assert_eq!(view.owner_items[0].status, ItemStatus::Available);
        assert_eq!(h.ledger.charges_applied().await, 0);

        h.ledger.set_unavailable(false);
        let outcome = h.service.confirm_completion(t, d.offerer).await.unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Completed(_)));
        assert_eq!(h.ledger.balance(d.owner).await, 5);
        assert_eq!(h.ledger.balance(d.offerer).await, 5);
    }

    #[tokio::test]
    async fn insufficient_funds_refunds_the_other_side() {
        let h = harness();
        let d = deal(&h).await;
        let broke = user();
        let item = h
            .service
            .create_item(broke, draft("Oats", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap()
            .item
            .id;
        let chat = h.service.express_interest(item, d.offerer, "Hi").await.unwrap();
        let t = h
            .service
            .propose_transaction(chat.id, broke, &[item], &[], park())
            .await
            .unwrap()
            .transaction
            .id;

        h.service.confirm_completion(t, broke).await.unwrap();
        let err = h.service.confirm_completion(t, d.offerer).await.unwrap_err();
        assert!(matches!(err, BarterError::InsufficientFunds { balance: 0, required: 5 }));
        assert_eq!(h.ledger.balance(d.offerer).await, 10);
        assert_eq!(
            h.service.get_item(item).await.unwrap().item.status,
            ItemStatus::Available
        );
    }

    #[tokio::test]
    async fn slow_ledger_times_out() {
        let config = BarterConfig {
            ledger_timeout: Duration::from_millis(20),
            ..BarterConfig::default()
        };
        let h = harness_with(config);
        let d = deal(&h).await;
        let t = propose(&h, &d).await;

        h.service.confirm_completion(t, d.owner).await.unwrap();
        h.ledger.set_delay(Duration::from_millis(200));
        let err = h.service.confirm_completion(t, d.offerer).await.unwrap_err();
        assert!(matches!(err, BarterError::LedgerUnavailable(_)));

        let view = h.service.get_transaction(t, d.owner).await.unwrap();
        assert_eq!(view.transaction.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn late_charge_from_timed_out_attempt_is_not_billed() {
        let config = BarterConfig {
            ledger_timeout: Duration::from_millis(50),
            ..BarterConfig::default()
        };
        let h = harness_with(config);
        let d = deal(&h).await;
        let t = propose(&h, &d).await;
        h.service.confirm_completion(t, d.owner).await.unwrap();

        // Both charges are sent but land only after the caller gave up.
        h.ledger.set_delay(Duration::from_millis(150));
        let err = h.service.confirm_completion(t, d.offerer).await.unwrap_err();
        assert!(matches!(err, BarterError::LedgerUnavailable(_)));

        h.ledger.set_delay(Duration::ZERO);
        let outcome = h.service.confirm_completion(t, d.offerer).await.unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Completed(_)));

        // Let every request of the first attempt land.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.ledger.balance(d.owner).await, 5);
        assert_eq!(h.ledger.balance(d.offerer).await, 5);
        assert_eq!(h.ledger.charges_applied().await, 2);
    }

    #[tokio::test]
    async fn cancelling_revokes_charges_of_a_failed_attempt() {
        let config = BarterConfig {
            ledger_timeout: Duration::from_millis(50),
            ..BarterConfig::default()
        };
        let h = harness_with(config);
        let d = deal(&h).await;
        let t = propose(&h, &d).await;
        h.service.confirm_completion(t, d.owner).await.unwrap();

        h.ledger.set_delay(Duration::from_millis(150));
        h.service.confirm_completion(t, d.offerer).await.unwrap_err();
        h.ledger.set_delay(Duration::ZERO);
        h.service.cancel_transaction(t, d.owner).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.ledger.balance(d.owner).await, 10);
        assert_eq!(h.ledger.balance(d.offerer).await, 10);
        assert_eq!(h.ledger.charges_applied().await, 0);
    }

    #[tokio::test]
    async fn items_in_a_pending_proposal_are_frozen() {
        let h = harness();
        let d = deal(&h).await;
        let t = propose(&h, &d).await;

        let rename = || crate::catalog::ItemPatch {
            name: Some("Kidney beans".to_string()),
            ..Default::default()
        };
        let err = h
            .service
            .update_item(d.offerer_item, d.offerer, rename())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
        let err = h.service.delete_item(d.offerer_item, d.offerer).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);

        h.service.cancel_transaction(t, d.owner).await.unwrap();
        let view = h
            .service
            .update_item(d.offerer_item, d.offerer, rename())
            .await
            .unwrap();
        assert_eq!(view.item.name, "Kidney beans");
    }

    #[tokio::test]
    async fn completed_trade_keeps_the_chat_listing() {
        let h = harness();
        let d = deal(&h).await;
        let given = h
            .service
            .create_item(d.owner, draft("Rice", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap()
            .item
            .id;

        // The trade names another of the owner's items, not the chat's.
        let t = h
            .service
            .propose_transaction(d.chat, d.owner, &[given], &[], park())
            .await
            .unwrap()
            .transaction
            .id;
        h.service.confirm_completion(t, d.owner).await.unwrap();
        h.service.confirm_completion(t, d.offerer).await.unwrap();
        assert_eq!(
            h.service.get_item(d.owner_item).await.unwrap().item.status,
            ItemStatus::Available
        );

        let err = h.service.delete_item(d.owner_item, d.owner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);

        let view = h.service.get_transaction(t, d.offerer).await.unwrap();
        assert_eq!(view.transaction.status, TransactionStatus::Completed);
        assert_eq!(view.owner_items[0].id, given);
        let stats = h.service.get_statistics(d.offerer).await.unwrap();
        assert_eq!(stats.barters_completed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_confirmations_finalize_once() {
        let h = harness();
        let d = deal(&h).await;
        let t = propose(&h, &d).await;

        let a = {
            let service = h.service.clone();
            let owner = d.owner;
            tokio::spawn(async move { service.confirm_completion(t, owner).await })
        };
        let b = {
            let service = h.service.clone();
            let offerer = d.offerer;
            tokio::spawn(async move { service.confirm_completion(t, offerer).await })
        };
        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, ConfirmOutcome::Completed(_)))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(h.ledger.charges_applied().await, 2);
        assert_eq!(h.ledger.balance(d.owner).await, 5);
        assert_eq!(h.ledger.balance(d.offerer).await, 5);
    }

    #[tokio::test]
    async fn cancel_then_propose_again() {
        let h = harness();
        let d = deal(&h).await;
        let t = propose(&h, &d).await;

        let err = h.service.cancel_transaction(t, user()).await.unwrap_err();
        assert!(matches!(err, BarterError::Unauthorized));

        let cancelled = h.service.cancel_transaction(t, d.offerer).await.unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);
        let err = h.service.confirm_completion(t, d.owner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);

        let replacement = propose(&h, &d).await;
        let current = h
            .service
            .get_transaction_for_chat(d.chat, d.owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.transaction.id, replacement);
    }

    #[tokio::test]
    async fn completed_transaction_cannot_be_cancelled() {
        let h = harness();
        let d = deal(&h).await;
        let t = propose(&h, &d).await;
        h.service.confirm_completion(t, d.owner).await.unwrap();
        h.service.confirm_completion(t, d.offerer).await.unwrap();

        let err = h.service.cancel_transaction(t, d.owner).await.unwrap_err();
        assert!(matches!(err, BarterError::AlreadyCompleted));
        let err = h.service.cancel_chat(d.chat, d.owner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
    }

    #[tokio::test]
    async fn cancelling_the_chat_cancels_its_proposal() {
        let h = harness();
        let d = deal(&h).await;
        let t = propose(&h, &d).await;

        h.service.cancel_chat(d.chat, d.owner).await.unwrap();
        let view = h.service.get_transaction(t, d.offerer).await.unwrap();
        assert_eq!(view.transaction.status, TransactionStatus::Cancelled);
        assert_eq!(view.owner_items[0].status, ItemStatus::Available);
    }
}
