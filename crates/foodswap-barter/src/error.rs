use std::fmt;

use thiserror::Error;

use foodswap_shared::ParseEnumError;
use foodswap_store::StoreError;

use crate::ports::{LedgerError, MediaError, PortError};

/// The kind of record a [`BarterError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Item,
    Chat,
    Transaction,
    FoodItem,
    User,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Item => "Item",
            Entity::Chat => "Chat",
            Entity::Transaction => "Transaction",
            Entity::FoodItem => "Food item",
            Entity::User => "User",
        };
        f.write_str(name)
    }
}

/// Flat error classification for a transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    InvalidStatus,
    SelfTransaction,
    AlreadyCompleted,
    InsufficientFunds,
    Validation,
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum BarterError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Cannot barter with yourself")]
    SelfTransaction,

    #[error("Transaction already completed")]
    AlreadyCompleted,

    #[error("Insufficient coins: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Coin ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Collaborator unavailable: {0}")]
    Collaborator(String),

    #[error("Media storage error: {0}")]
    Media(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl BarterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BarterError::NotFound(_) => ErrorKind::NotFound,
            BarterError::Unauthorized => ErrorKind::Unauthorized,
            BarterError::InvalidStatus(_) => ErrorKind::InvalidStatus,
            BarterError::SelfTransaction => ErrorKind::SelfTransaction,
            BarterError::AlreadyCompleted => ErrorKind::AlreadyCompleted,
            BarterError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            BarterError::Validation(_) => ErrorKind::Validation,
            BarterError::LedgerUnavailable(_) | BarterError::Collaborator(_) => {
                ErrorKind::Unavailable
            }
            BarterError::Media(_) | BarterError::Store(_) | BarterError::LockPoisoned => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        BarterError::Validation(msg.into())
    }
}

/// Guarded store updates report state mismatches as `Conflict`; those are
/// lifecycle errors to the caller.
impl From<StoreError> for BarterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => BarterError::InvalidStatus(msg),
            StoreError::InsufficientCoins { balance, required } => {
                BarterError::InsufficientFunds { balance, required }
            }
            other => BarterError::Store(other),
        }
    }
}

impl From<ParseEnumError> for BarterError {
    fn from(e: ParseEnumError) -> Self {
        BarterError::Validation(e.to_string())
    }
}

impl From<LedgerError> for BarterError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { balance, required } => {
                BarterError::InsufficientFunds { balance, required }
            }
            LedgerError::Unavailable(msg) => BarterError::LedgerUnavailable(msg),
            revoked @ LedgerError::Revoked(_) => BarterError::LedgerUnavailable(revoked.to_string()),
        }
    }
}

impl From<MediaError> for BarterError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Empty | MediaError::TooLarge { .. } | MediaError::UnsupportedType(_) => {
                BarterError::Validation(e.to_string())
            }
            other => BarterError::Media(other.to_string()),
        }
    }
}

impl From<PortError> for BarterError {
    fn from(e: PortError) -> Self {
        BarterError::Collaborator(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BarterError>;

/// Attach the entity to a store lookup that may report `NotFound`.
pub(crate) trait OrNotFound<T> {
    fn or_not_found(self, entity: Entity) -> Result<T>;
}

impl<T> OrNotFound<T> for std::result::Result<T, StoreError> {
    fn or_not_found(self, entity: Entity) -> Result<T> {
        self.map_err(|e| match e {
            StoreError::NotFound => BarterError::NotFound(entity),
            other => other.into(),
        })
    }
}
