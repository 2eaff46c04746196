//! Barter configuration loaded from environment variables.
//!
//! Every setting has a default so the service can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use foodswap_shared::constants::{
    DEFAULT_BARTER_COIN_COST, DEFAULT_FOOD_WASTE_KG_PER_ITEM, DEFAULT_LEDGER_TIMEOUT_MS,
    DEFAULT_MAX_IMAGE_SIZE, DEFAULT_MAX_SEARCH_RADIUS_KM,
};

#[derive(Debug, Clone)]
pub struct BarterConfig {
    /// SQLite database file.
    /// Env: `FOODSWAP_DB_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Directory holding uploaded item images.
    /// Env: `MEDIA_STORAGE_PATH`
    /// Default: `./media`
    pub media_storage_path: PathBuf,

    /// Prefix of public image URLs.
    /// Env: `MEDIA_PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080/media`
    pub media_public_base_url: String,

    /// Maximum image size in bytes.
    /// Env: `MAX_IMAGE_SIZE`
    /// Default: 5 MiB
    pub max_image_size: usize,

    /// Coins charged to each participant when a barter completes.
    /// Env: `BARTER_COIN_COST`
    /// Default: `5`
    pub coin_cost: i64,

    /// Bound on every coin-ledger call.
    /// Env: `COIN_LEDGER_TIMEOUT_MS`
    /// Default: 3 s
    pub ledger_timeout: Duration,

    /// Largest radius `find_nearby` accepts, in km.
    /// Env: `MAX_SEARCH_RADIUS_KM`
    /// Default: `10`
    pub max_search_radius_km: f64,

    /// Food saved per traded item, in kg.
    /// Env: `FOOD_WASTE_KG_PER_ITEM`
    /// Default: `0.3`
    pub food_waste_kg_per_item: f64,
}

impl Default for BarterConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            media_storage_path: PathBuf::from("./media"),
            media_public_base_url: "http://localhost:8080/media".to_string(),
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            coin_cost: DEFAULT_BARTER_COIN_COST,
            ledger_timeout: Duration::from_millis(DEFAULT_LEDGER_TIMEOUT_MS),
            max_search_radius_km: DEFAULT_MAX_SEARCH_RADIUS_KM,
            food_waste_kg_per_item: DEFAULT_FOOD_WASTE_KG_PER_ITEM,
        }
    }
}

impl BarterConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("FOODSWAP_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(path) = lookup("MEDIA_STORAGE_PATH") {
            config.media_storage_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("MEDIA_PUBLIC_BASE_URL") {
            config.media_public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(n) = parse_var(&lookup, "MAX_IMAGE_SIZE") {
            config.max_image_size = n;
        }

        match parse_var::<i64>(&lookup, "BARTER_COIN_COST") {
            Some(n) if n >= 0 => config.coin_cost = n,
            Some(n) => tracing::warn!(value = n, "Negative BARTER_COIN_COST, using default"),
            None => {}
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "COIN_LEDGER_TIMEOUT_MS") {
            config.ledger_timeout = Duration::from_millis(ms);
        }

        match parse_var::<f64>(&lookup, "MAX_SEARCH_RADIUS_KM") {
            Some(km) if km.is_finite() && km > 0.0 => config.max_search_radius_km = km,
            Some(km) => tracing::warn!(value = km, "Invalid MAX_SEARCH_RADIUS_KM, using default"),
            None => {}
        }

        match parse_var::<f64>(&lookup, "FOOD_WASTE_KG_PER_ITEM") {
            Some(kg) if kg.is_finite() && kg >= 0.0 => config.food_waste_kg_per_item = kg,
            Some(kg) => tracing::warn!(value = kg, "Invalid FOOD_WASTE_KG_PER_ITEM, using default"),
            None => {}
        }

        // RUST_LOG is read by telemetry::init_tracing.

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Unparsable setting, using default");
            None
        }
    }
}
