//! Outbound ports.
//!
//! Every trait is object-safe and `Send + Sync` so the service can hold
//! them as `Arc<dyn ...>`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use foodswap_shared::{FoodItemId, UserId};

/// Failure of a read-only collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("{0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Public profile data used to enrich items and chats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    /// Average rating, when the user has been rated.
    pub rating: Option<f32>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up a user's public profile. `None` when the user is unknown.
    async fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>, PortError>;
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Owner of a food inventory record, or `None` if it does not exist.
    async fn food_item_owner(&self, id: FoodItemId) -> Result<Option<UserId>, PortError>;
}

// ---------------------------------------------------------------------------
// Media storage
// ---------------------------------------------------------------------------

/// An image as received from the client.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    /// MIME type declared by the client, e.g. `image/png`.
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Empty image")]
    Empty,

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object reference: {0}")]
    InvalidRef(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Store an image and return its object reference.
    async fn upload(&self, image: ImageUpload) -> Result<String, MediaError>;

    async fn delete(&self, object_ref: &str) -> Result<(), MediaError>;

    fn public_url(&self, object_ref: &str) -> String;
}

// ---------------------------------------------------------------------------
// Coin ledger
// ---------------------------------------------------------------------------

/// One debit against a user's coin balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinCharge {
    pub user_id: UserId,
    /// Positive number of coins to take.
    pub amount: i64,
    pub reason: String,
    /// A charge repeated with the same key is applied once.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient coins: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The charge's key was refunded before the charge arrived.
    #[error("Charge revoked: {0}")]
    Revoked(String),
}

/// A remote coin ledger.
///
/// A charge may still land after its caller gave up waiting, so refunds
/// must also cover charges that have not arrived yet.
#[async_trait]
pub trait CoinLedger: Send + Sync {
    /// Apply `charge` and return the new balance.
    async fn charge_coins(&self, charge: &CoinCharge) -> Result<i64, LedgerError>;

    /// Reverse `charge`. If it has not been applied yet its key is revoked
    /// and a later `charge_coins` with that key fails with
    /// [`LedgerError::Revoked`] without moving any coins. Refunding twice
    /// is a no-op.
    async fn refund_coins(&self, charge: &CoinCharge) -> Result<(), LedgerError>;
}
