//! Asset identifiers and trading pairs.
//!
//! An asset is either the chain's native asset (a sentinel, no issuer) or a
//! 32-byte issued-asset id. Pairs are unordered at the API boundary but the
//! dispatcher only ever creates a controller for the *canonical* orientation
//! of a pair (see [`crate::dispatcher::registry`]).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// An asset identifier: the chain's native asset, or a 32-byte issued asset id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetId {
    Native,
    Issued([u8; 32]),
}

impl AssetId {
    pub fn is_native(&self) -> bool {
        matches!(self, AssetId::Native)
    }

    /// Lexicographic byte ordering used for pair canonicalization.
    /// The native asset sorts before any issued asset.
    fn sort_key(&self) -> (u8, [u8; 32]) {
        match self {
            AssetId::Native => (0, [0u8; 32]),
            AssetId::Issued(bytes) => (1, *bytes),
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => write!(f, "native"),
            AssetId::Issued(bytes) => write!(f, "{}", hex::encode(bytes)),
        }
    }
}

impl PartialOrd for AssetId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AssetId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// An unordered pair of distinct assets, as supplied by a client.
///
/// This is the *request* shape. Whether `(amount_asset, price_asset)` is the
/// canonical orientation for this pair is decided by
/// [`crate::dispatcher::registry::PairRegistry`], not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    pub amount_asset: AssetId,
    pub price_asset: AssetId,
}

impl AssetPair {
    pub fn new(amount_asset: AssetId, price_asset: AssetId) -> Self {
        Self {
            amount_asset,
            price_asset,
        }
    }

    /// Whether the two sides name distinct assets. A pair of an asset with
    /// itself can never be traded.
    pub fn is_distinct(&self) -> bool {
        self.amount_asset != self.price_asset
    }

    /// The pair with amount/price swapped.
    pub fn reversed(&self) -> Self {
        Self {
            amount_asset: self.price_asset,
            price_asset: self.amount_asset,
        }
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.amount_asset, self.price_asset)
    }
}
