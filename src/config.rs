//! Process configuration, loaded with the `config` crate layered over
//! `.env` via `dotenvy`.

use crate::domain::{AssetId, AssetPair};
use crate::signing::Address;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub enable: bool,
    /// The matcher's own signing address (the keypair itself is held by the
    /// out-of-scope wallet collaborator).
    pub account: Address,
    pub bind_address: String,
    pub port: u16,

    pub min_order_fee: u64,
    pub order_match_tx_fee: u64,

    pub journal_data_dir: PathBuf,
    pub snapshots_data_dir: PathBuf,
    #[serde(with = "humantime_serde_secs")]
    pub snapshots_interval: Duration,

    pub max_open_orders: u32,

    /// Ordered: earlier entries take priority as the "is a price asset" side
    /// of the canonical-orientation rule.
    pub price_assets: Vec<AssetId>,
    pub predefined_pairs: Vec<AssetPair>,

    #[serde(with = "humantime_serde_secs")]
    pub max_timestamp_diff: Duration,

    pub order_history_file: PathBuf,
    pub blacklisted_assets: Vec<AssetId>,

    /// Request TTL for history-service queries; keeps stale reads from being
    /// served once a caller has stopped waiting on them.
    #[serde(with = "humantime_serde_secs", default = "default_request_ttl")]
    pub request_ttl: Duration,

    /// Validation deadline before a controller drops a pending request.
    #[serde(with = "humantime_serde_secs", default = "default_validation_timeout")]
    pub validation_timeout: Duration,

    /// Delay before a settlement reserve is released after an order executes,
    /// giving the settlement layer time to confirm the exchange transaction.
    #[serde(with = "humantime_serde_secs", default = "default_reserve_release_delay")]
    pub reserve_release_delay: Duration,

    #[serde(default = "default_max_orders_per_address")]
    pub max_orders_per_address: u32,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Ceiling on `expiration - timestamp` for a submitted order. Defaulted
    /// to 30 days.
    #[serde(with = "humantime_serde_secs", default = "default_max_order_lifetime")]
    pub max_order_lifetime: Duration,

    /// Smallest unit of the price asset a trade notional must be a whole
    /// multiple of. A residual `remaining * price` not divisible by this is
    /// dust and gets canceled instead of re-rested.
    #[serde(default = "default_price_asset_base_unit")]
    pub price_asset_base_unit: u64,
}

fn default_request_ttl() -> Duration {
    Duration::from_secs(5)
}

fn default_validation_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reserve_release_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_orders_per_address() -> u32 {
    1000
}

fn default_max_depth() -> u32 {
    50
}

fn default_max_order_lifetime() -> Duration {
    Duration::from_secs(30 * 24 * 3600)
}

fn default_price_asset_base_unit() -> u64 {
    100
}

impl AppConfig {
    /// Loads configuration from (in increasing precedence) built-in defaults,
    /// an optional `config/default.toml`, and environment variables prefixed
    /// `MATCHER_`, with `.env` merged in first.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("MATCHER").separator("__"))
            .build()?;

        let cfg = settings.try_deserialize::<AppConfig>()?;
        Ok(cfg)
    }
}

/// `humantime`-style duration (de)serialization over plain seconds, to avoid
/// pulling in an extra crate for this one field.
mod humantime_serde_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
