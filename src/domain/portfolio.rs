//! `OpenPortfolio`: per-address reserved balances, asset-wise, and its
//! combine monoid.
//!
//! Deltas may be negative (a trade's execution releases part of a reserve);
//! the *stored*, fully-combined value is always non-negative, but that
//! invariant is enforced by the history store, not by this type.

use crate::domain::asset::AssetId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPortfolio {
    reserved: BTreeMap<AssetId, i64>,
}

impl OpenPortfolio {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(asset: AssetId, amount: i64) -> Self {
        let mut reserved = BTreeMap::new();
        if amount != 0 {
            reserved.insert(asset, amount);
        }
        OpenPortfolio { reserved }
    }

    pub fn get(&self, asset: AssetId) -> i64 {
        self.reserved.get(&asset).copied().unwrap_or(0)
    }

    /// Asset-wise sum. Commutative and associative: plain integer addition
    /// per key, with absent keys treated as zero.
    pub fn combine(mut self, other: OpenPortfolio) -> OpenPortfolio {
        for (asset, delta) in other.reserved {
            let entry = self.reserved.entry(asset).or_insert(0);
            *entry += delta;
            if *entry == 0 {
                self.reserved.remove(&asset);
            }
        }
        self
    }

    pub fn is_non_negative(&self) -> bool {
        self.reserved.values().all(|&v| v >= 0)
    }

    /// Per-asset deltas, for callers that need to apply each one to a
    /// separate backing store row (the history store keys reservations by
    /// `(address, asset)`, not by the whole portfolio).
    pub fn entries(&self) -> impl Iterator<Item = (AssetId, i64)> + '_ {
        self.reserved.iter().map(|(&asset, &delta)| (asset, delta))
    }
}
