//! Proximity search over the catalog.
//!
//! A bounding box around the query circle is sent to SQLite with every
//! filter bound as a parameter; exact haversine distances are then computed
//! in memory, items outside the radius dropped and the rest sorted nearest
//! first.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use futures::future::join_all;
use tracing::debug;

use foodswap_shared::{BoundingBox, GeoPoint, ItemStatus, StatusFilter, UserId};
use foodswap_store::items::NearbyFilter;

use crate::catalog::ItemView;
use crate::error::{BarterError, Result};
use crate::service::BarterService;

#[derive(Debug, Clone)]
pub struct NearbyQuery {
    pub location: GeoPoint,
    pub radius_km: f64,
    pub requester_id: UserId,
    /// Include the requester's own listings.
    pub include_own: bool,
    /// Defaults to `Available`.
    pub status: StatusFilter<ItemStatus>,
    /// When positive, only items expiring within this many days.
    pub expiry_max_days: u32,
}

impl NearbyQuery {
    pub fn new(location: GeoPoint, radius_km: f64, requester_id: UserId) -> Self {
        Self {
            location,
            radius_km,
            requester_id,
            include_own: false,
            status: StatusFilter::Only(ItemStatus::Available),
            expiry_max_days: 0,
        }
    }
}

impl BarterService {
    /// Items within `query.radius_km` of `query.location`, nearest first.
    ///
    /// The radius is capped at the configured maximum.
    pub async fn find_nearby(&self, query: NearbyQuery) -> Result<Vec<ItemView>> {
        if !query.location.is_valid() {
            return Err(BarterError::validation("coordinates out of range"));
        }
        if !query.radius_km.is_finite() || query.radius_km <= 0.0 {
            return Err(BarterError::validation("radius must be positive"));
        }
        let radius_km = query.radius_km.min(self.config.max_search_radius_km);

        let filter = NearbyFilter {
            bbox: BoundingBox::around(&query.location, radius_km),
            status: query.status.status(),
            exclude_owner: (!query.include_own).then_some(query.requester_id),
            expires_on_or_before: (query.expiry_max_days > 0)
                .then(|| Utc::now().date_naive() + Duration::days(i64::from(query.expiry_max_days))),
        };
        let candidates = self.with(|db| Ok(db.items_in_box(&filter)?))?;

        let mut hits: Vec<_> = candidates
            .into_iter()
            .map(|item| (query.location.distance_km(&item.location), item))
            .filter(|(distance, _)| *distance <= radius_km)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));

        debug!(
            lat = query.location.latitude,
            lng = query.location.longitude,
            radius_km,
            hits = hits.len(),
            "Nearby search"
        );

        let mut owners: Vec<UserId> = hits.iter().map(|(_, item)| item.owner_id).collect();
        owners.sort();
        owners.dedup();
        let profiles: HashMap<_, _> = join_all(owners.into_iter().map(|owner| async move {
            (owner, self.profile(owner).await)
        }))
        .await
        .into_iter()
        .filter_map(|(owner, profile)| profile.map(|p| (owner, p)))
        .collect();

        Ok(hits
            .into_iter()
            .map(|(distance, item)| {
                let owner = profiles.get(&item.owner_id);
                self.view_with_owner(item, owner, Some(distance))
            })
            .collect())
    }
}
