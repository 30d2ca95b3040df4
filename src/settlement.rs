//! The settlement-layer contract.
//!
//! The blockchain state reader, the wallet holding the matcher's signing
//! key, and the UTX pool/P2P broadcast are all out-of-scope external
//! collaborators. This module only defines the trait the controller calls
//! through and the data it exchanges — no concrete chain client lives here.

use crate::domain::{AssetId, ExchangeTransaction};
use crate::signing::Address;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueMetadata {
    pub name: String,
    pub decimals: u8,
    pub total_supply: u64,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement layer unreachable: {0}")]
    Unreachable(String),
}

/// Read/write access to the chain the matcher settles against. Implementations
/// live outside this crate; this crate only drives the trait.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Validates and broadcasts `tx`. Returns whether it was accepted into
    /// the pending pool — a `false` is not an error, it is the
    /// `SettlementRejected` path.
    async fn submit_exchange_transaction(
        &self,
        tx: &ExchangeTransaction,
    ) -> Result<bool, SettlementError>;

    async fn balance_of(&self, address: Address, asset: AssetId) -> Result<u64, SettlementError>;

    async fn total_supply(&self, asset: AssetId) -> Result<u64, SettlementError>;

    async fn asset_info(&self, asset: AssetId) -> Result<Option<IssueMetadata>, SettlementError>;
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// An in-memory settlement client for controller/validator tests: real
    /// async trait dispatch, fake chain state.
    pub struct FakeSettlementClient {
        balances: DashMap<(Address, AssetId), u64>,
        supplies: DashMap<AssetId, u64>,
        accept_submissions: AtomicBool,
    }

    impl Default for FakeSettlementClient {
        fn default() -> Self {
            Self {
                balances: DashMap::new(),
                supplies: DashMap::new(),
                accept_submissions: AtomicBool::new(true),
            }
        }
    }

    impl FakeSettlementClient {
        pub fn set_balance(&self, address: Address, asset: AssetId, amount: u64) {
            self.balances.insert((address, asset), amount);
        }

        pub fn set_supply(&self, asset: AssetId, amount: u64) {
            self.supplies.insert(asset, amount);
        }

        pub fn reject_next_submissions(&self) {
            self.accept_submissions.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SettlementClient for FakeSettlementClient {
        async fn submit_exchange_transaction(
            &self,
            _tx: &ExchangeTransaction,
        ) -> Result<bool, SettlementError> {
            Ok(self.accept_submissions.load(Ordering::SeqCst))
        }

        async fn balance_of(&self, address: Address, asset: AssetId) -> Result<u64, SettlementError> {
            Ok(self.balances.get(&(address, asset)).map(|v| *v).unwrap_or(0))
        }

        async fn total_supply(&self, asset: AssetId) -> Result<u64, SettlementError> {
            Ok(self.supplies.get(&asset).map(|v| *v).unwrap_or(0))
        }

        async fn asset_info(&self, asset: AssetId) -> Result<Option<IssueMetadata>, SettlementError> {
            Ok(self.supplies.get(&asset).map(|v| IssueMetadata {
                name: asset.to_string(),
                decimals: 8,
                total_supply: *v,
            }))
        }
    }
}
