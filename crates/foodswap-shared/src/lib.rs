//! # foodswap-shared
//!
//! Types shared by every Foodswap crate: strongly-typed identifiers, the
//! lifecycle enums of the barter domain together with their transition
//! rules, great-circle geometry and a handful of protocol constants.

pub mod constants;
pub mod error;
pub mod geo;
pub mod status;
pub mod types;

pub use error::ParseEnumError;
pub use geo::{BoundingBox, GeoPoint};
pub use status::{ChatStatus, ItemCondition, ItemStatus, StatusFilter, TransactionStatus};
pub use types::*;
