use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use foodswap_shared::{TransactionId, UserId};
use foodswap_store::Database;

use crate::config::BarterConfig;
use crate::error::{BarterError, Result};
use crate::ledger::LocalCoinLedger;
use crate::locks::KeyedLocks;
use crate::media::FsMediaStore;
use crate::ports::{CoinLedger, IdentityProvider, InventoryService, MediaStorage, UserProfile};

/// The external collaborators a [`BarterService`] talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub inventory: Arc<dyn InventoryService>,
    pub media: Arc<dyn MediaStorage>,
    pub ledger: Arc<dyn CoinLedger>,
}

/// Entry point of the barter exchange.
///
/// Cheap to clone; clones share the database handle, the collaborators and
/// the per-transaction locks. The operations themselves live in the
/// component modules ([`catalog`](crate::catalog),
/// [`discovery`](crate::discovery), [`negotiation`](crate::negotiation),
/// [`coordinator`](crate::coordinator), [`statistics`](crate::statistics)).
#[derive(Clone)]
pub struct BarterService {
    db: Arc<Mutex<Database>>,
    pub(crate) ports: Collaborators,
    pub(crate) config: Arc<BarterConfig>,
    pub(crate) finalize_locks: Arc<KeyedLocks<TransactionId>>,
}

impl BarterService {
    pub fn new(db: Arc<Mutex<Database>>, ports: Collaborators, config: BarterConfig) -> Self {
        Self {
            db,
            ports,
            config: Arc::new(config),
            finalize_locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Wire a service from configuration: the SQLite database, the
    /// filesystem media store and the local coin ledger. Identity and
    /// inventory come from the host application.
    pub async fn from_config(
        config: BarterConfig,
        identity: Arc<dyn IdentityProvider>,
        inventory: Arc<dyn InventoryService>,
    ) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        info!(path = ?db.path(), "Barter database opened");
        let db = Arc::new(Mutex::new(db));

        let media = FsMediaStore::new(
            config.media_storage_path.clone(),
            config.media_public_base_url.clone(),
            config.max_image_size,
        )
        .await?;
        let ledger = LocalCoinLedger::new(db.clone());

        let ports = Collaborators {
            identity,
            inventory,
            media: Arc::new(media),
            ledger: Arc::new(ledger),
        };
        Ok(Self::new(db, ports, config))
    }

    pub fn config(&self) -> &BarterConfig {
        &self.config
    }

    /// Run `f` against the database.
    ///
    /// The guard is released before `with` returns, so it is never held
    /// across an `.await`.
    pub(crate) fn with<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut guard = self.db.lock().map_err(|_| BarterError::LockPoisoned)?;
        f(&mut *guard)
    }

    /// Profile lookup for enrichment. Failures degrade to `None`.
    pub(crate) async fn profile(&self, user_id: UserId) -> Option<UserProfile> {
        match self.ports.identity.profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Profile lookup failed");
                None
            }
        }
    }

    pub(crate) async fn release_image(&self, object_ref: &str) {
        if let Err(e) = self.ports.media.delete(object_ref).await {
            warn!(object_ref, error = %e, "Failed to release image");
        }
    }
}
