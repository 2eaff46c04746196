/// Mean Earth radius used for great-circle distances, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Coins charged to each participant when a barter completes.
pub const DEFAULT_BARTER_COIN_COST: i64 = 5;

/// Estimated mass of food kept out of the bin per traded item (kg).
pub const DEFAULT_FOOD_WASTE_KG_PER_ITEM: f64 = 0.3;

/// Largest radius accepted by nearby search, in kilometres.
pub const DEFAULT_MAX_SEARCH_RADIUS_KM: f64 = 10.0;

/// Upper bound for a single coin-ledger call, in milliseconds.
pub const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 3_000;

/// Maximum accepted image upload (5 MiB).
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Maximum length of a negotiation message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2_000;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Hard cap on page size.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Date format for item expiry dates.
pub const EXPIRY_DATE_FORMAT: &str = "%Y-%m-%d";

/// Image MIME types accepted for item pictures.
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];
