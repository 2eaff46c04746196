//! Collaborators the barter exchange depends on but does not own.

pub mod memory;
pub mod outbound;

pub use outbound::{
    CoinCharge, CoinLedger, IdentityProvider, ImageUpload, InventoryService, LedgerError,
    MediaError, MediaStorage, PortError, UserProfile,
};
