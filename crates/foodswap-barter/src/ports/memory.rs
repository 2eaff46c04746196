//! In-memory adapters for every port. Used by tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use foodswap_shared::constants::ALLOWED_IMAGE_TYPES;
use foodswap_shared::{FoodItemId, UserId};

use super::outbound::{
    CoinCharge, CoinLedger, IdentityProvider, ImageUpload, InventoryService, LedgerError,
    MediaError, MediaStorage, PortError, UserProfile,
};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryIdentity {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: UserId, display_name: &str, rating: Option<f32>) {
        self.profiles.write().await.insert(
            user_id,
            UserProfile {
                user_id,
                display_name: display_name.to_string(),
                rating,
            },
        );
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>, PortError> {
        Ok(self.profiles.read().await.get(&user_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryInventory {
    owners: RwLock<HashMap<FoodItemId, UserId>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_food_item(&self, owner: UserId) -> FoodItemId {
        let id = FoodItemId::new();
        self.owners.write().await.insert(id, owner);
        id
    }
}

#[async_trait]
impl InventoryService for InMemoryInventory {
    async fn food_item_owner(&self, id: FoodItemId) -> Result<Option<UserId>, PortError> {
        Ok(self.owners.read().await.get(&id).copied())
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct InMemoryMedia {
    objects: RwLock<HashMap<String, Bytes>>,
    max_size: usize,
}

impl InMemoryMedia {
    pub fn new(max_size: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    pub async fn contains(&self, object_ref: &str) -> bool {
        self.objects.read().await.contains_key(object_ref)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl MediaStorage for InMemoryMedia {
    async fn upload(&self, image: ImageUpload) -> Result<String, MediaError> {
        if image.bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        if image.bytes.len() > self.max_size {
            return Err(MediaError::TooLarge {
                size: image.bytes.len(),
                max: self.max_size,
            });
        }
        if !ALLOWED_IMAGE_TYPES.contains(&image.content_type.as_str()) {
            return Err(MediaError::UnsupportedType(image.content_type));
        }

        let object_ref = Uuid::new_v4().to_string();
        self.objects
            .write()
            .await
            .insert(object_ref.clone(), image.bytes);
        Ok(object_ref)
    }

    async fn delete(&self, object_ref: &str) -> Result<(), MediaError> {
        match self.objects.write().await.remove(object_ref) {
            Some(_) => Ok(()),
            None => Err(MediaError::NotFound(object_ref.to_string())),
        }
    }

    fn public_url(&self, object_ref: &str) -> String {
        format!("memory://{object_ref}")
    }
}

// ---------------------------------------------------------------------------
// Coin ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<UserId, i64>,
    charges: HashMap<String, (UserId, i64)>,
    refunded: HashSet<String>,
}

/// Coin ledger with switchable outage and latency, for exercising the
/// finalize failure paths.
///
/// Requests behave like remote calls: once sent, a charge or refund lands
/// after the configured delay even if the caller stopped waiting for it.
#[derive(Debug, Default)]
pub struct InMemoryCoinLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: AtomicBool,
    delay_ms: AtomicU64,
}

impl InMemoryCoinLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn credit(&self, user_id: UserId, amount: i64) {
        *self.state.lock().await.balances.entry(user_id).or_insert(0) += amount;
    }

    pub async fn balance(&self, user_id: UserId) -> i64 {
        self.state
            .lock()
            .await
            .balances
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct charges applied and not refunded.
    pub async fn charges_applied(&self) -> usize {
        let state = self.state.lock().await;
        state
            .charges
            .keys()
            .filter(|k| !state.refunded.contains(*k))
            .count()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Make every subsequent request take `delay` to land.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Send a request. It lands on a detached task, so dropping the
    /// returned future does not recall it.
    async fn send<T, F>(&self, request: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut LedgerState) -> Result<T, LedgerError> + Send + 'static,
    {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            request(&mut *state.lock().await)
        })
        .await
        .map_err(|e| LedgerError::Unavailable(e.to_string()))?
    }
}

#[async_trait]
impl CoinLedger for InMemoryCoinLedger {
    async fn charge_coins(&self, charge: &CoinCharge) -> Result<i64, LedgerError> {
        let charge = charge.clone();
        self.send(move |state| {
            let balance = state.balances.get(&charge.user_id).copied().unwrap_or(0);
            if state.charges.contains_key(&charge.idempotency_key) {
                return Ok(balance);
            }
            if state.refunded.contains(&charge.idempotency_key) {
                return Err(LedgerError::Revoked(charge.idempotency_key));
            }
            if balance < charge.amount {
                return Err(LedgerError::InsufficientFunds {
                    balance,
                    required: charge.amount,
                });
            }

            let next = balance - charge.amount;
            state.balances.insert(charge.user_id, next);
            state
                .charges
                .insert(charge.idempotency_key, (charge.user_id, charge.amount));
            Ok(next)
        })
        .await
    }

    async fn refund_coins(&self, charge: &CoinCharge) -> Result<(), LedgerError> {
        let key = charge.idempotency_key.clone();
        self.send(move |state| {
            if !state.refunded.insert(key.clone()) {
                return Ok(());
            }
            if let Some((user_id, amount)) = state.charges.get(&key).copied() {
                *state.balances.entry(user_id).or_insert(0) += amount;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(user_id: UserId, key: &str) -> CoinCharge {
        CoinCharge {
            user_id,
            amount: 5,
            reason: "barter".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn ledger_charges_once_per_key() {
        let ledger = InMemoryCoinLedger::new();
        let user = UserId::new();
        ledger.credit(user, 12).await;

        assert_eq!(ledger.charge_coins(&charge(user, "a")).await.unwrap(), 7);
        assert_eq!(ledger.charge_coins(&charge(user, "a")).await.unwrap(), 7);
        assert_eq!(ledger.charges_applied().await, 1);

        ledger.refund_coins(&charge(user, "a")).await.unwrap();
        ledger.refund_coins(&charge(user, "a")).await.unwrap();
        assert_eq!(ledger.balance(user).await, 12);
    }

    #[tokio::test]
    async fn ledger_refund_revokes_a_charge_still_in_flight() {
        let ledger = Arc::new(InMemoryCoinLedger::new());
        let user = UserId::new();
        ledger.credit(user, 10).await;

        ledger.set_delay(Duration::from_millis(100));
        let slow = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.charge_coins(&charge(user, "late")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        ledger.set_delay(Duration::ZERO);
        ledger.refund_coins(&charge(user, "late")).await.unwrap();

        let landed = slow.await.unwrap();
        assert_eq!(landed, Err(LedgerError::Revoked("late".to_string())));
        assert_eq!(ledger.balance(user).await, 10);
        assert_eq!(ledger.charges_applied().await, 0);
    }

    #[tokio::test]
    async fn ledger_rejects_overdraft_and_outage() {
        let ledger = InMemoryCoinLedger::new();
        let user = UserId::new();
        ledger.credit(user, 3).await;

        let err = ledger.charge_coins(&charge(user, "a")).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                balance: 3,
                required: 5
            }
        );

        ledger.set_unavailable(true);
        let err = ledger.charge_coins(&charge(user, "b")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn media_validates_uploads() {
        let media = InMemoryMedia::new(4);
        let png = |data: &'static [u8]| ImageUpload {
            bytes: Bytes::from_static(data),
            content_type: "image/png".to_string(),
        };

        assert!(matches!(media.upload(png(b"")).await, Err(MediaError::Empty)));
        assert!(matches!(
            media.upload(png(b"too big")).await,
            Err(MediaError::TooLarge { size: 7, max: 4 })
        ));

        let object_ref = media.upload(png(b"ok")).await.unwrap();
        assert!(media.contains(&object_ref).await);
        media.delete(&object_ref).await.unwrap();
        assert!(media.is_empty().await);
    }
}
