//! Domain model structs persisted in the barter database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a presentation layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use foodswap_shared::{
    ChatId, ChatStatus, CoinEntryId, FoodItemId, GeoPoint, ItemCondition, ItemId, ItemStatus,
    MessageId, TransactionId, TransactionItemId, TransactionStatus, UserId,
};

// ---------------------------------------------------------------------------
// Barter item
// ---------------------------------------------------------------------------

/// A good listed by a user for exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BarterItem {
    pub id: ItemId,
    /// The listing user. Only this user may edit or delete the item.
    pub owner_id: UserId,
    /// Optional link to the inventory record the listing was made from.
    pub food_item_id: Option<FoodItemId>,
    pub name: String,
    pub description: String,
    pub quantity: i64,
    pub unit_measure: String,
    pub expiry_date: NaiveDate,
    pub condition: ItemCondition,
    /// Media-storage object reference of the picture, if any.
    pub image_ref: Option<String>,
    pub status: ItemStatus,
    pub location: GeoPoint,
    pub preferred_swap: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A negotiation thread for one (item, offerer, owner) triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarterChat {
    pub id: ChatId,
    pub item_id: ItemId,
    pub offerer_id: UserId,
    pub owner_id: UserId,
    pub status: ChatStatus,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Which side of a chat a user is on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatRole {
    Owner,
    Offerer,
}

impl BarterChat {
    /// The caller's role, or `None` when they take no part in the chat.
    pub fn role_of(&self, user: UserId) -> Option<ChatRole> {
        if user == self.owner_id {
            Some(ChatRole::Owner)
        } else if user == self.offerer_id {
            Some(ChatRole::Offerer)
        } else {
            None
        }
    }

    /// The participant on the other side from `user`, who must be one of
    /// the two.
    pub fn other_participant(&self, user: UserId) -> UserId {
        if user == self.owner_id {
            self.offerer_id
        } else {
            self.owner_id
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message in a chat. Only `is_read` ever changes after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarterMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Where and when the two parties meet to swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Meetup {
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    pub time: DateTime<Utc>,
}

/// The binding proposal for one chat.
///
/// `status == Completed` holds exactly when both confirmation flags are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BarterTransaction {
    pub id: TransactionId,
    pub chat_id: ChatId,
    pub meetup: Meetup,
    pub owner_confirmed: bool,
    pub offerer_confirmed: bool,
    pub status: TransactionStatus,
    pub coins_charged: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BarterTransaction {
    pub fn both_confirmed(&self) -> bool {
        self.owner_confirmed && self.offerer_confirmed
    }

    pub fn is_confirmed_by(&self, role: ChatRole) -> bool {
        match role {
            ChatRole::Owner => self.owner_confirmed,
            ChatRole::Offerer => self.offerer_confirmed,
        }
    }
}

/// Links a transaction to an item one side contributes. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarterTransactionItem {
    pub id: TransactionItemId,
    pub transaction_id: TransactionId,
    pub item_id: ItemId,
    /// `true` when the chat's owner contributes the item.
    pub owner_item: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Coin ledger
// ---------------------------------------------------------------------------

/// Kind of a coin-ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoinEntryKind {
    Purchase,
    Use,
    Reward,
    Refund,
}

impl CoinEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinEntryKind::Purchase => "Purchase",
            CoinEntryKind::Use => "Use",
            CoinEntryKind::Reward => "Reward",
            CoinEntryKind::Refund => "Refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Purchase" => Some(CoinEntryKind::Purchase),
            "Use" => Some(CoinEntryKind::Use),
            "Reward" => Some(CoinEntryKind::Reward),
            "Refund" => Some(CoinEntryKind::Refund),
            _ => None,
        }
    }
}

/// One movement on a user's coin balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoinEntry {
    pub id: CoinEntryId,
    pub user_id: UserId,
    /// Signed amount: negative for spending.
    pub amount: i64,
    pub kind: CoinEntryKind,
    pub description: String,
    /// Balance after this entry was applied.
    pub balance: i64,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Raw per-user counters computed by [`Database::barter_counts`](crate::Database::barter_counts).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarterCounts {
    /// Chats the user opened as offerer.
    pub chats_initiated: i64,
    /// Completed chats where the user was either party.
    pub barters_completed: i64,
    /// Items linked to the user's completed transactions.
    pub items_traded: i64,
}
