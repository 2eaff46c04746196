//! # foodswap-barter
//!
//! The peer-to-peer barter exchange of Foodswap.
//!
//! [`BarterService`] bundles the five barter components behind one handle:
//!
//! - **Item catalog** ([`catalog`]): listing lifecycle and the forward-only
//!   status rule
//! - **Geo discovery** ([`discovery`]): proximity search ordered by distance
//! - **Negotiation** ([`negotiation`]): one chat per (item, offerer, owner)
//!   with read tracking
//! - **Transaction coordinator** ([`coordinator`]): proposals and the
//!   exactly-once finalize with coin settlement
//! - **Statistics** ([`statistics`]): per-user derived metrics
//!
//! External collaborators (identity, inventory, media, coin ledger) are
//! reached through the traits in [`ports`].

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod media;
pub mod negotiation;
pub mod ports;
pub mod statistics;
pub mod telemetry;

mod locks;
mod service;

pub use config::BarterConfig;
pub use error::{BarterError, Entity, ErrorKind, Result};
pub use service::{BarterService, Collaborators};
