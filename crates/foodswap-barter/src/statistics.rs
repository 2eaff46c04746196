use serde::Serialize;
use tracing::debug;

use foodswap_shared::UserId;

use crate::error::Result;
use crate::service::BarterService;

/// Per-user barter metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarterStatistics {
    /// Chats the user opened as offerer.
    pub chats_initiated: i64,
    /// Completed barters in either role.
    pub barters_completed: i64,
    /// Items moved by the user's completed barters, both sides counted.
    pub items_traded: i64,
    /// `barters_completed` times the per-barter coin cost.
    pub coins_spent: i64,
    /// Estimated food saved from waste, in kg.
    pub food_waste_saved_kg: f64,
    pub estimated_impact: String,
}

fn impact_sentence(items_traded: i64, kg: f64) -> String {
    match items_traded {
        0 => "No barters completed yet. Your first swap keeps food out of the bin.".to_string(),
        1 => format!("1 item found a new home, saving about {kg:.1} kg of food."),
        n => format!("{n} items found a new home, saving about {kg:.1} kg of food."),
    }
}

impl BarterService {
    pub async fn get_statistics(&self, user_id: UserId) -> Result<BarterStatistics> {
        let counts = self.with(|db| Ok(db.barter_counts(user_id)?))?;
        let kg = counts.items_traded as f64 * self.config.food_waste_kg_per_item;

        debug!(user_id = %user_id, ?counts, "Computed statistics");
        Ok(BarterStatistics {
            chats_initiated: counts.chats_initiated,
            barters_completed: counts.barters_completed,
            items_traded: counts.items_traded,
            coins_spent: counts.barters_completed * self.config.coin_cost,
            food_waste_saved_kg: kg,
            estimated_impact: impact_sentence(counts.items_traded, kg),
        })
    }
}
