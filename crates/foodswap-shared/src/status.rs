//! Lifecycle enums of the barter domain.
//!
//! Every enum round-trips through its PascalCase name (`"Available"`,
//! `"Pending"`, ...), which is also how it is stored in SQLite.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

macro_rules! text_enum {
    ($name:ident, $kind:literal, [$($variant:ident),+ $(,)?]) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok($name::$variant),)+
                    other => Err(ParseEnumError::new($kind, other)),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Item status
// ---------------------------------------------------------------------------

/// Status of a barter item. Moves forward only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemStatus {
    Available,
    Reserved,
    Completed,
}

text_enum!(ItemStatus, "item status", [Available, Reserved, Completed]);

impl ItemStatus {
    /// Whether `self -> next` is a single forward step.
    ///
    /// Owners advance their items one step at a time. The only multi-step
    /// move is the finalize of a transaction (see [`ItemStatus::is_tradeable`]).
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Available, ItemStatus::Reserved)
                | (ItemStatus::Reserved, ItemStatus::Completed)
        )
    }

    /// Whether a finalizing transaction may move this item to `Completed`.
    pub fn is_tradeable(self) -> bool {
        matches!(self, ItemStatus::Available | ItemStatus::Reserved)
    }
}

// ---------------------------------------------------------------------------
// Item condition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ItemCondition {
    Sealed,
    Opened,
    New,
    Used,
}

text_enum!(ItemCondition, "item condition", [Sealed, Opened, New, Used]);

impl ItemCondition {
    /// Parse a caller-supplied condition, falling back to `Opened` when it is
    /// missing or unknown.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.trim().parse().ok()).unwrap_or_default()
    }
}

impl Default for ItemCondition {
    fn default() -> Self {
        ItemCondition::Opened
    }
}

// ---------------------------------------------------------------------------
// Chat status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChatStatus {
    Active,
    Completed,
    Cancelled,
}

text_enum!(ChatStatus, "chat status", [Active, Completed, Cancelled]);

// ---------------------------------------------------------------------------
// Transaction status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
}

text_enum!(TransactionStatus, "transaction status", [Pending, Completed, Cancelled]);

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Status filter for list queries: every status, or exactly one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusFilter<S> {
    All,
    Only(S),
}

impl<S: Copy> StatusFilter<S> {
    pub fn status(&self) -> Option<S> {
        match self {
            StatusFilter::All => None,
            StatusFilter::Only(s) => Some(*s),
        }
    }
}

impl<S: FromStr<Err = ParseEnumError>> StatusFilter<S> {
    /// Parse `"All"` or a status name. An empty string means `All`.
    pub fn parse(raw: &str) -> Result<Self, ParseEnumError> {
        match raw.trim() {
            "" | "All" => Ok(StatusFilter::All),
            other => other.parse().map(StatusFilter::Only),
        }
    }
}
