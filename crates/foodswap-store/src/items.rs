//! CRUD operations for [`BarterItem`] records.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

use foodswap_shared::{
    BoundingBox, ChatStatus, GeoPoint, ItemId, ItemStatus, TransactionStatus, UserId,
};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::BarterItem;
use crate::rows::{date, get_date, get_enum, get_id, get_opt_id, get_ts, ts};

const ITEM_COLUMNS: &str = "id, user_id, food_item_id, name, description, quantity, unit_measure,
     expiry_date, condition, image_ref, status, latitude, longitude, preferred_swap,
     created_at, updated_at";

/// Coarse pre-filter for proximity search. Every field is bound as a
/// statement parameter; exact distance filtering happens in the caller.
#[derive(Debug, Clone)]
pub struct NearbyFilter {
    pub bbox: BoundingBox,
    pub status: Option<ItemStatus>,
    pub exclude_owner: Option<UserId>,
    pub expires_on_or_before: Option<NaiveDate>,
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_item(&self, item: &BarterItem) -> Result<()> {
        self.conn().execute(
            "INSERT INTO barter_items (id, user_id, food_item_id, name, description, quantity,
                 unit_measure, expiry_date, condition, image_ref, status, latitude, longitude,
                 preferred_swap, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                item.id.to_string(),
                item.owner_id.to_string(),
                item.food_item_id.map(|f| f.to_string()),
                item.name,
                item.description,
                item.quantity,
                item.unit_measure,
                date(&item.expiry_date),
                item.condition.as_str(),
                item.image_ref,
                item.status.as_str(),
                item.location.latitude,
                item.location.longitude,
                item.preferred_swap,
                ts(&item.created_at),
                ts(&item.updated_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_item(&self, id: ItemId) -> Result<BarterItem> {
        self.conn()
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM barter_items WHERE id = ?1"),
                params![id.to_string()],
                row_to_item,
            )
            .map_err(not_found)
    }

    /// A user's items, newest first, plus the total matching count.
    pub fn list_user_items(
        &self,
        owner_id: UserId,
        status: Option<ItemStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<BarterItem>, i64)> {
        let status = status.map(|s| s.as_str());

        let total: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM barter_items
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
            params![owner_id.to_string(), status],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM barter_items
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![owner_id.to_string(), status, limit, offset],
            row_to_item,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok((items, total))
    }

    /// Items inside a bounding box that pass the bound filters.
    pub fn items_in_box(&self, filter: &NearbyFilter) -> Result<Vec<BarterItem>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM barter_items
             WHERE latitude BETWEEN ?1 AND ?2
               AND longitude BETWEEN ?3 AND ?4
               AND (?5 IS NULL OR status = ?5)
               AND (?6 IS NULL OR user_id <> ?6)
               AND (?7 IS NULL OR expiry_date <= ?7)"
        ))?;

        let rows = stmt.query_map(
            params![
                filter.bbox.min_latitude,
                filter.bbox.max_latitude,
                filter.bbox.min_longitude,
                filter.bbox.max_longitude,
                filter.status.map(|s| s.as_str()),
                filter.exclude_owner.map(|u| u.to_string()),
                filter.expires_on_or_before.as_ref().map(date),
            ],
            row_to_item,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Whether the item is named in any transaction with the given status.
    pub fn item_in_transaction(&self, id: ItemId, status: TransactionStatus) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM barter_transaction_items ti
                 JOIN barter_transactions t ON t.id = ti.transaction_id
                 WHERE ti.item_id = ?1 AND t.status = ?2
                 LIMIT 1",
                params![id.to_string(), status.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Whether an item is referenced by a chat or transaction that is not
    /// `Cancelled`. Such items carry negotiation or trade history.
    pub fn item_has_live_references(&self, id: ItemId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM barter_chats
                 WHERE item_id = ?1 AND status <> ?2
                 UNION ALL
                 SELECT 1 FROM barter_transaction_items ti
                 JOIN barter_transactions t ON t.id = ti.transaction_id
                 WHERE ti.item_id = ?1 AND t.status <> ?3
                 LIMIT 1",
                params![
                    id.to_string(),
                    ChatStatus::Cancelled.as_str(),
                    TransactionStatus::Cancelled.as_str()
                ],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Persist every mutable column of `item`, provided the stored status is
    /// still `expected`. Returns `false` if the row is gone or has moved on.
    pub fn update_item(&self, item: &BarterItem, expected: ItemStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE barter_items
             SET food_item_id = ?2, name = ?3, description = ?4, quantity = ?5,
                 unit_measure = ?6, expiry_date = ?7, condition = ?8, image_ref = ?9,
                 status = ?10, latitude = ?11, longitude = ?12, preferred_swap = ?13,
                 updated_at = ?14
             WHERE id = ?1 AND status = ?15",
            params![
                item.id.to_string(),
                item.food_item_id.map(|f| f.to_string()),
                item.name,
                item.description,
                item.quantity,
                item.unit_measure,
                date(&item.expiry_date),
                item.condition.as_str(),
                item.image_ref,
                item.status.as_str(),
                item.location.latitude,
                item.location.longitude,
                item.preferred_swap,
                ts(&item.updated_at),
                expected.as_str(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Compare-and-set an item's status. Returns `false` when the item is no
    /// longer in `from`.
    pub fn set_item_status(&self, id: ItemId, from: ItemStatus, to: ItemStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE barter_items SET status = ?3, updated_at = ?4
             WHERE id = ?1 AND status = ?2",
            params![id.to_string(), from.as_str(), to.as_str(), ts(&Utc::now())],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete an item; its chats, messages and transaction links cascade.
    pub fn delete_item(&self, id: ItemId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM barter_items WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<BarterItem> {
    Ok(BarterItem {
        id: get_id(row, 0)?,
        owner_id: get_id(row, 1)?,
        food_item_id: get_opt_id(row, 2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        quantity: row.get(5)?,
        unit_measure: row.get(6)?,
        expiry_date: get_date(row, 7)?,
        condition: get_enum(row, 8)?,
        image_ref: row.get(9)?,
        status: get_enum(row, 10)?,
        location: GeoPoint::new(row.get(11)?, row.get(12)?),
        preferred_swap: row.get(13)?,
        created_at: get_ts(row, 14)?,
        updated_at: get_ts(row, 15)?,
    })
}
