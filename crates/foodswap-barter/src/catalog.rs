//! Item catalog: listing lifecycle and the forward-only status rule.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use foodswap_shared::constants::EXPIRY_DATE_FORMAT;
use foodswap_shared::{
    FoodItemId, GeoPoint, ItemCondition, ItemId, ItemStatus, Page, StatusFilter, TransactionStatus,
    UserId,
};
use foodswap_store::BarterItem;

use crate::error::{BarterError, Entity, OrNotFound, Result};
use crate::ports::ImageUpload;
use crate::service::BarterService;

/// Attributes of a new listing as received from the client.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub name: String,
    pub description: String,
    pub quantity: i64,
    pub unit_measure: String,
    /// `YYYY-MM-DD`.
    pub expiry_date: String,
    /// Falls back to `Opened` when absent or unknown.
    pub condition: Option<String>,
    pub location: GeoPoint,
    pub preferred_swap: Option<String>,
    pub food_item_id: Option<FoodItemId>,
    pub image: Option<ImageUpload>,
}

/// Partial update of a listing. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub unit_measure: Option<String>,
    pub expiry_date: Option<String>,
    pub condition: Option<String>,
    pub location: Option<GeoPoint>,
    /// An empty string clears the preference.
    pub preferred_swap: Option<String>,
    /// Must be a single forward step from the current status.
    pub status: Option<ItemStatus>,
    /// Replaces the current image, which is then released.
    pub image: Option<ImageUpload>,
}

/// An item enriched for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: BarterItem,
    pub owner_name: Option<String>,
    pub owner_rating: Option<f32>,
    pub image_url: Option<String>,
    /// Set by proximity search only.
    pub distance_km: Option<f64>,
}

fn parse_expiry(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), EXPIRY_DATE_FORMAT)
        .map_err(|_| BarterError::validation(format!("invalid expiry date {raw:?}")))
}

fn check_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BarterError::validation("name must not be empty"));
    }
    Ok(name.to_string())
}

fn check_quantity(quantity: i64) -> Result<i64> {
    if quantity <= 0 {
        return Err(BarterError::validation("quantity must be positive"));
    }
    Ok(quantity)
}

fn check_location(location: GeoPoint) -> Result<GeoPoint> {
    if !location.is_valid() {
        return Err(BarterError::validation("coordinates out of range"));
    }
    Ok(location)
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Forward-only rule for owner- and coordinator-driven status changes.
fn check_transition(current: ItemStatus, next: ItemStatus) -> Result<()> {
    if !current.can_transition_to(next) {
        return Err(BarterError::InvalidStatus(format!(
            "item cannot move from {current} to {next}"
        )));
    }
    Ok(())
}

impl BarterService {
    /// List a new item for `owner_id`.
    pub async fn create_item(&self, owner_id: UserId, draft: ItemDraft) -> Result<ItemView> {
        let name = check_name(&draft.name)?;
        let quantity = check_quantity(draft.quantity)?;
        let expiry_date = parse_expiry(&draft.expiry_date)?;
        let location = check_location(draft.location)?;
        let condition = ItemCondition::parse_or_default(draft.condition.as_deref());

        if let Some(food_item_id) = draft.food_item_id {
            match self.ports.inventory.food_item_owner(food_item_id).await? {
                None => return Err(BarterError::NotFound(Entity::FoodItem)),
                Some(owner) if owner != owner_id => return Err(BarterError::Unauthorized),
                Some(_) => {}
            }
        }

        let image_ref = match draft.image {
            Some(image) => Some(self.ports.media.upload(image).await?),
            None => None,
        };

        let now = Utc::now();
        let item = BarterItem {
            id: ItemId::new(),
            owner_id,
            food_item_id: draft.food_item_id,
            name,
            description: draft.description.trim().to_string(),
            quantity,
            unit_measure: draft.unit_measure.trim().to_string(),
            expiry_date,
            condition,
            image_ref,
            status: ItemStatus::Available,
            location,
            preferred_swap: non_empty(draft.preferred_swap),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.with(|db| Ok(db.insert_item(&item)?)) {
            if let Some(object_ref) = &item.image_ref {
                self.release_image(object_ref).await;
            }
            return Err(e);
        }

        info!(item_id = %item.id, owner_id = %owner_id, "Item listed");
        Ok(self.item_view(item, None).await)
    }

    pub async fn get_item(&self, id: ItemId) -> Result<ItemView> {
        let item = self.with(|db| db.get_item(id).or_not_found(Entity::Item))?;
        Ok(self.item_view(item, None).await)
    }

    /// Apply `patch` to an item owned by `owner_id`.
    ///
    /// Completed items and items named by a pending transaction are frozen.
    pub async fn update_item(&self, id: ItemId, owner_id: UserId, patch: ItemPatch) -> Result<ItemView> {
        let current = self.editable_item(id, owner_id)?;

        let mut next = current.clone();
        if let Some(name) = &patch.name {
            next.name = check_name(name)?;
        }
        if let Some(description) = patch.description {
            next.description = description.trim().to_string();
        }
        if let Some(quantity) = patch.quantity {
            next.quantity = check_quantity(quantity)?;
        }
        if let Some(unit) = patch.unit_measure {
            next.unit_measure = unit.trim().to_string();
        }
        if let Some(raw) = &patch.expiry_date {
            next.expiry_date = parse_expiry(raw)?;
        }
        if let Some(raw) = patch.condition.as_deref() {
            next.condition = ItemCondition::parse_or_default(Some(raw));
        }
        if let Some(location) = patch.location {
            next.location = check_location(location)?;
        }
        if patch.preferred_swap.is_some() {
            next.preferred_swap = non_empty(patch.preferred_swap);
        }
        if let Some(status) = patch.status {
            if status != current.status {
                check_transition(current.status, status)?;
                next.status = status;
            }
        }

        let new_image = match patch.image {
            Some(image) => Some(self.ports.media.upload(image).await?),
            None => None,
        };
        if new_image.is_some() {
            next.image_ref = new_image.clone();
        }
        next.updated_at = Utc::now();

        let written = self.with(|db| {
            if db.item_in_transaction(id, TransactionStatus::Pending)? {
                return Err(BarterError::InvalidStatus(
                    "item is part of a pending transaction".to_string(),
                ));
            }
            if !db.update_item(&next, current.status)? {
                return Err(BarterError::InvalidStatus(
                    "item changed concurrently".to_string(),
                ));
            }
            Ok(())
        });

        if let Err(e) = written {
            if let Some(object_ref) = &new_image {
                self.release_image(object_ref).await;
            }
            return Err(e);
        }

        if new_image.is_some() {
            if let Some(old) = &current.image_ref {
                self.release_image(old).await;
            }
        }

        info!(item_id = %id, status = %next.status, "Item updated");
        Ok(self.item_view(next, None).await)
    }

    /// Remove a listing and release its image.
    ///
    /// Items with an open or completed chat, or named by a pending or
    /// completed transaction, are kept so trade history stays intact.
    pub async fn delete_item(&self, id: ItemId, owner_id: UserId) -> Result<()> {
        let item = self.editable_item(id, owner_id)?;

        self.with(|db| {
            if db.item_has_live_references(id)? {
                return Err(BarterError::InvalidStatus(
                    "item has chats or transactions that are not cancelled".to_string(),
                ));
            }
            if !db.delete_item(id)? {
                return Err(BarterError::NotFound(Entity::Item));
            }
            Ok(())
        })?;

        if let Some(object_ref) = &item.image_ref {
            self.release_image(object_ref).await;
        }

        info!(item_id = %id, "Item deleted");
        Ok(())
    }

    /// Items listed by `owner_id`, newest first, plus the total count.
    pub async fn list_user_items(
        &self,
        owner_id: UserId,
        filter: StatusFilter<ItemStatus>,
        page: Page,
    ) -> Result<(Vec<ItemView>, i64)> {
        let (items, total) = self.with(|db| {
            Ok(db.list_user_items(owner_id, filter.status(), page.limit, page.offset())?)
        })?;
        debug!(owner_id = %owner_id, count = items.len(), total, "Listed user items");

        let owner = self.profile(owner_id).await;
        let views = items
            .into_iter()
            .map(|item| self.view_with_owner(item, owner.as_ref(), None))
            .collect();
        Ok((views, total))
    }

    /// Advance an item one step along `Available -> Reserved -> Completed`.
    ///
    /// Reserved for trusted callers; no ownership check is made.
    pub fn set_item_status(&self, id: ItemId, next: ItemStatus) -> Result<BarterItem> {
        self.with(|db| {
            let current = db.get_item(id).or_not_found(Entity::Item)?;
            check_transition(current.status, next)?;
            if !db.set_item_status(id, current.status, next)? {
                return Err(BarterError::InvalidStatus(
                    "item changed concurrently".to_string(),
                ));
            }
            Ok(db.get_item(id)?)
        })
    }

    /// Load an item for an owner-initiated change.
    fn editable_item(&self, id: ItemId, owner_id: UserId) -> Result<BarterItem> {
        let item = self.with(|db| db.get_item(id).or_not_found(Entity::Item))?;
        if item.owner_id != owner_id {
            warn!(item_id = %id, caller = %owner_id, "Rejected change by non-owner");
            return Err(BarterError::Unauthorized);
        }
        if item.status == ItemStatus::Completed {
            return Err(BarterError::InvalidStatus(
                "completed items cannot be changed".to_string(),
            ));
        }
        Ok(item)
    }

    pub(crate) async fn item_view(&self, item: BarterItem, distance_km: Option<f64>) -> ItemView {
        let owner = self.profile(item.owner_id).await;
        self.view_with_owner(item, owner.as_ref(), distance_km)
    }

    pub(crate) fn view_with_owner(
        &self,
        item: BarterItem,
        owner: Option<&crate::ports::UserProfile>,
        distance_km: Option<f64>,
    ) -> ItemView {
        let image_url = item
            .image_ref
            .as_deref()
            .map(|r| self.ports.media.public_url(r));
        ItemView {
            owner_name: owner.map(|p| p.display_name.clone()),
            owner_rating: owner.and_then(|p| p.rating),
            image_url,
            distance_km,
            item,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::error::ErrorKind;
    use crate::service::test_support::{draft, harness, user};

    fn png() -> ImageUpload {
        ImageUpload {
            bytes: Bytes::from_static(b"\x89PNG"),
            content_type: "image/png".to_string(),
        }
    }

    #[tokio::test]
    async fn create_validates_and_enriches() {
        let h = harness();
        let owner = user();
        h.identity.register(owner, "Ada", Some(4.5)).await;

        let mut d = draft("Apples", GeoPoint::new(52.5, 13.4));
        d.condition = Some("Mouldy".to_string());
        d.image = Some(png());
        let view = h.service.create_item(owner, d).await.unwrap();

        assert_eq!(view.item.status, ItemStatus::Available);
        assert_eq!(view.item.condition, ItemCondition::Opened);
        assert_eq!(view.owner_name.as_deref(), Some("Ada"));
        assert_eq!(view.owner_rating, Some(4.5));
        let image_ref = view.item.image_ref.clone().unwrap();
        assert_eq!(view.image_url, Some(format!("memory://{image_ref}")));

        let fetched = h.service.get_item(view.item.id).await.unwrap();
        assert_eq!(fetched.item, view.item);
    }

    #[tokio::test]
    async fn create_rejects_bad_input_before_writing() {
        let h = harness();
        let owner = user();

        let mut d = draft("Milk", GeoPoint::new(0.0, 0.0));
        d.quantity = 0;
        d.image = Some(png());
        let err = h.service.create_item(owner, d).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut d = draft("Milk", GeoPoint::new(0.0, 0.0));
        d.expiry_date = "31/12/2024".to_string();
        let err = h.service.create_item(owner, d).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(h.media.is_empty().await);
        let (items, total) = h
            .service
            .list_user_items(owner, StatusFilter::All, Page::default())
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn inventory_link_must_belong_to_creator() {
        let h = harness();
        let owner = user();
        let theirs = h.inventory.add_food_item(user()).await;
        let mine = h.inventory.add_food_item(owner).await;

        let mut d = draft("Rice", GeoPoint::new(0.0, 0.0));
        d.food_item_id = Some(theirs);
        let err = h.service.create_item(owner, d).await.unwrap_err();
        assert!(matches!(err, BarterError::Unauthorized));

        let mut d = draft("Rice", GeoPoint::new(0.0, 0.0));
        d.food_item_id = Some(FoodItemId::new());
        let err = h.service.create_item(owner, d).await.unwrap_err();
        assert!(matches!(err, BarterError::NotFound(Entity::FoodItem)));

        let mut d = draft("Rice", GeoPoint::new(0.0, 0.0));
        d.food_item_id = Some(mine);
        let view = h.service.create_item(owner, d).await.unwrap();
        assert_eq!(view.item.food_item_id, Some(mine));
    }

    #[tokio::test]
    async fn only_owner_may_update_or_delete() {
        let h = harness();
        let owner = user();
        let item = h
            .service
            .create_item(owner, draft("Bread", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap()
            .item;

        let patch = ItemPatch {
            name: Some("Stolen".to_string()),
            ..Default::default()
        };
        let err = h.service.update_item(item.id, user(), patch).await.unwrap_err();
        assert!(matches!(err, BarterError::Unauthorized));

        let err = h.service.delete_item(item.id, user()).await.unwrap_err();
        assert!(matches!(err, BarterError::Unauthorized));

        h.service.delete_item(item.id, owner).await.unwrap();
        let err = h.service.get_item(item.id).await.unwrap_err();
        assert!(matches!(err, BarterError::NotFound(Entity::Item)));
    }

    #[tokio::test]
    async fn update_replaces_image_and_moves_status_forward_only() {
        let h = harness();
        let owner = user();
        let mut d = draft("Cheese", GeoPoint::new(0.0, 0.0));
        d.image = Some(png());
        let item = h.service.create_item(owner, d).await.unwrap().item;
        let old_ref = item.image_ref.clone().unwrap();

        let patch = ItemPatch {
            quantity: Some(3),
            preferred_swap: Some("Anything sweet".to_string()),
            status: Some(ItemStatus::Reserved),
            image: Some(png()),
            ..Default::default()
        };
        let view = h.service.update_item(item.id, owner, patch).await.unwrap();
        assert_eq!(view.item.quantity, 3);
        assert_eq!(view.item.status, ItemStatus::Reserved);
        assert_eq!(view.item.preferred_swap.as_deref(), Some("Anything sweet"));
        assert!(!h.media.contains(&old_ref).await);
        assert_eq!(h.media.len().await, 1);

        let back = ItemPatch {
            status: Some(ItemStatus::Available),
            ..Default::default()
        };
        let err = h.service.update_item(item.id, owner, back).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);

        let negative = ItemPatch {
            quantity: Some(-1),
            ..Default::default()
        };
        let err = h.service.update_item(item.id, owner, negative).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn delete_releases_image() {
        let h = harness();
        let owner = user();
        let mut d = draft("Jam", GeoPoint::new(0.0, 0.0));
        d.image = Some(png());
        let item = h.service.create_item(owner, d).await.unwrap().item;
        assert_eq!(h.media.len().await, 1);

        h.service.delete_item(item.id, owner).await.unwrap();
        assert!(h.media.is_empty().await);
    }

    #[tokio::test]
    async fn delete_waits_for_open_chats_to_close() {
        let h = harness();
        let owner = user();
        let item = h
            .service
            .create_item(owner, draft("Honey", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap()
            .item;
        let chat = h
            .service
            .express_interest(item.id, user(), "Still there?")
            .await
            .unwrap();

        let err = h.service.delete_item(item.id, owner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
        assert!(h.service.get_item(item.id).await.is_ok());

        h.service.cancel_chat(chat.id, owner).await.unwrap();
        h.service.delete_item(item.id, owner).await.unwrap();
        let err = h.service.get_item(item.id).await.unwrap_err();
        assert!(matches!(err, BarterError::NotFound(Entity::Item)));
    }

    #[tokio::test]
    async fn set_status_is_forward_only() {
        let h = harness();
        let item = h
            .service
            .create_item(user(), draft("Tea", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap()
            .item;

        let err = h
            .service
            .set_item_status(item.id, ItemStatus::Completed)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);

        let reserved = h.service.set_item_status(item.id, ItemStatus::Reserved).unwrap();
        assert_eq!(reserved.status, ItemStatus::Reserved);
        let done = h.service.set_item_status(item.id, ItemStatus::Completed).unwrap();
        assert_eq!(done.status, ItemStatus::Completed);

        let err = h
            .service
            .set_item_status(item.id, ItemStatus::Available)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let h = harness();
        let owner = user();
        let a = h
            .service
            .create_item(owner, draft("A", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap()
            .item;
        h.service
            .create_item(owner, draft("B", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap();
        h.service.set_item_status(a.id, ItemStatus::Reserved).unwrap();

        let (reserved, total) = h
            .service
            .list_user_items(owner, StatusFilter::Only(ItemStatus::Reserved), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(reserved[0].item.id, a.id);

        let (_, total) = h
            .service
            .list_user_items(owner, StatusFilter::All, Page::new(1, 1))
            .await
            .unwrap();
        assert_eq!(total, 2);
    }
}
