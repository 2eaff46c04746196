//! # foodswap-store
//!
//! SQLite persistence for the Foodswap barter exchange.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every barter
//! entity, the atomic units the transaction coordinator relies on
//! (propose, confirm, finalize, cancel), aggregate statistics and a local
//! coin ledger.

pub mod chats;
pub mod coins;
pub mod database;
pub mod items;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod statistics;
pub mod transactions;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
