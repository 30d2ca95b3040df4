//! `MatcherDispatcher`: the pair-to-controller router.
//!
//! Lazily creates one [`crate::controller::ControllerHandle`] per canonical
//! pair behind a `DashMap`, with a `tokio::sync::Mutex<()>`
//! serializing the rare "first order for this pair" creation path so two
//! concurrent first-submissions never spawn two controllers for one pair.

pub mod registry;

use crate::config::AppConfig;
use crate::controller::{self, BookDepth, ControllerHandle};
use crate::domain::{AssetId, AssetPair, Order, OrderId};
use crate::error::{CancelError, DispatchError, ValidationError};
use crate::history::{HistoryEntry, HistoryHandle, OrderStatusView};
use crate::metrics;
use crate::settlement::SettlementClient;
use crate::signing::{Address, MatcherSigner, PublicKey, Signature, SignatureVerifier};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use registry::PairRegistry;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

/// A market's read-only listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketInfo {
    pub pair: AssetPair,
    pub amount_asset_name: String,
    pub price_asset_name: String,
    pub created_at: DateTime<Utc>,
}

/// An order submission rejected before it ever reaches a controller —
/// routing failure or, once routed, a validation rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A cancellation rejected at routing or, once routed, by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelRequestError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Cancel(#[from] CancelError),
}

pub struct MatcherDispatcher {
    config: AppConfig,
    registry: Arc<PairRegistry>,
    controllers: DashMap<AssetPair, ControllerHandle>,
    markets: DashMap<AssetPair, MarketInfo>,
    creation_lock: AsyncMutex<()>,
    history: HistoryHandle,
    settlement: Arc<dyn SettlementClient>,
    verifier: Arc<dyn SignatureVerifier>,
    signer: Arc<dyn MatcherSigner>,
    matcher_public_key: PublicKey,
}

impl MatcherDispatcher {
    /// Loads the known-pairs registry, instantiates a controller for every
    /// predefined pair absent from it, then spawns controllers for every
    /// already-known pair, replaying `OrderBookCreated` entries to
    /// reconstitute the full set.
    pub async fn bootstrap(
        config: AppConfig,
        history: HistoryHandle,
        settlement: Arc<dyn SettlementClient>,
        verifier: Arc<dyn SignatureVerifier>,
        signer: Arc<dyn MatcherSigner>,
        matcher_public_key: PublicKey,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(PairRegistry::load(&config.journal_data_dir).await?);

        for pair in config.predefined_pairs.clone() {
            if !registry.contains(&pair) {
                registry.record(pair).await?;
            }
        }

        let dispatcher = MatcherDispatcher {
            config,
            registry: registry.clone(),
            controllers: DashMap::new(),
            markets: DashMap::new(),
            creation_lock: AsyncMutex::new(()),
            history,
            settlement,
            verifier,
            signer,
            matcher_public_key,
        };

        for pair in registry.known_pairs() {
            dispatcher
                .spawn_controller_for(pair)
                .await
                .map_err(|e| DispatchError::ControllerSpawnFailed(e.to_string()))?;
        }

        Ok(dispatcher)
    }

    /// The canonical-orientation decision. Returns the
    /// pair unchanged if this orientation is (or becomes) canonical, or an
    /// error naming the orientation the caller should have used instead.
    fn resolve_pair(&self, pair: AssetPair) -> Result<AssetPair, DispatchError> {
        if !pair.is_distinct() {
            return Err(DispatchError::InvalidPair);
        }
        if self.registry.contains(&pair) {
            return Ok(pair);
        }
        if self.registry.contains(&pair.reversed()) {
            return Err(DispatchError::InvalidPairOrdering(pair.reversed()));
        }

        let price_is_price_asset = self.config.price_assets.contains(&pair.price_asset);
        let amount_is_price_asset = self.config.price_assets.contains(&pair.amount_asset);
        if price_is_price_asset && !amount_is_price_asset {
            return Ok(pair);
        }
        if amount_is_price_asset && !price_is_price_asset {
            return Err(DispatchError::InvalidPairOrdering(pair.reversed()));
        }

        if pair.price_asset < pair.amount_asset {
            Ok(pair)
        } else {
            Err(DispatchError::InvalidPairOrdering(pair.reversed()))
        }
    }

    async fn require_known_asset(&self, asset: AssetId) -> Result<(), DispatchError> {
        match self.settlement.total_supply(asset).await {
            Ok(supply) if supply > 0 => Ok(()),
            _ => Err(DispatchError::UnknownAsset(asset)),
        }
    }

    /// Returns the controller for `pair`, creating it (and recording the
    /// pair, if it wasn't already known) on first use. Double-checked under
    /// `creation_lock` so a second concurrent first-submission for the same
    /// pair observes the controller the first one created rather than
    /// spawning a duplicate.
    async fn controller_for(&self, pair: AssetPair) -> Result<ControllerHandle, DispatchError> {
        if let Some(handle) = self.controllers.get(&pair) {
            return Ok(handle.value().clone());
        }
        let _guard = self.creation_lock.lock().await;
        if let Some(handle) = self.controllers.get(&pair) {
            return Ok(handle.value().clone());
        }
        if !self.registry.contains(&pair) {
            self.registry
                .record(pair)
                .await
                .map_err(|e| DispatchError::ControllerSpawnFailed(e.to_string()))?;
        }
        self.spawn_controller_for(pair)
            .await
            .map_err(|e| DispatchError::ControllerSpawnFailed(e.to_string()))?;
        self.controllers
            .get(&pair)
            .map(|h| h.value().clone())
            .ok_or_else(|| DispatchError::ControllerSpawnFailed("controller missing after spawn".into()))
    }

    async fn spawn_controller_for(&self, pair: AssetPair) -> anyhow::Result<()> {
        let handle = controller::spawn(
            pair,
            self.config.clone(),
            self.history.clone(),
            self.settlement.clone(),
            self.verifier.clone(),
            self.signer.clone(),
        )
        .await?;

        let amount_asset_name = self.asset_display_name(pair.amount_asset).await;
        let price_asset_name = self.asset_display_name(pair.price_asset).await;
        self.markets.insert(
            pair,
            MarketInfo {
                pair,
                amount_asset_name,
                price_asset_name,
                created_at: Utc::now(),
            },
        );
        self.controllers.insert(pair, handle);
        metrics::record_controller_spawned();
        metrics::set_active_pairs(self.controllers.len() as i64);
        info!(%pair, "order book created");
        Ok(())
    }

    async fn asset_display_name(&self, asset: AssetId) -> String {
        if asset.is_native() {
            return "native".to_string();
        }
        match self.settlement.asset_info(asset).await {
            Ok(Some(meta)) => meta.name,
            _ => asset.to_string(),
        }
    }

    /// Submits a new order for matching.
    pub async fn submit_order(&self, order: Order) -> Result<Order, SubmitError> {
        let pair = self.resolve_pair(order.pair)?;
        self.require_known_asset(pair.amount_asset).await?;
        self.require_known_asset(pair.price_asset).await?;

        let handle = self.controller_for(pair).await?;
        let mut order = order;
        order.pair = pair;
        Ok(handle.submit(order).await?)
    }

    /// Cancels a resident order.
    pub async fn cancel_order(
        &self,
        pair: AssetPair,
        order_id: OrderId,
        signature: Signature,
    ) -> Result<OrderId, CancelRequestError> {
        let pair = self.resolve_pair(pair)?;
        match self.controllers.get(&pair) {
            Some(handle) => Ok(handle.value().cancel(order_id, signature).await?),
            None => Err(CancelRequestError::Cancel(CancelError::OrderNotFound(order_id))),
        }
    }

    /// Returns resident book depth. An unknown or not-yet-created pair
    /// answers with an empty book rather than an error.
    pub async fn depth(&self, pair: AssetPair, depth: usize) -> Result<BookDepth, DispatchError> {
        let pair = self.resolve_pair(pair)?;
        match self.controllers.get(&pair) {
            Some(handle) => Ok(handle.value().depth(depth).await),
            None => Ok(BookDepth {
                pair,
                bids: Vec::new(),
                asks: Vec::new(),
            }),
        }
    }

    /// Deletes a pair's book and history. The pair's orientation stays
    /// known in the registry — only its live controller and market listing
    /// are torn down.
    pub async fn delete_pair(&self, pair: AssetPair) -> Result<BookDepth, DispatchError> {
        let pair = self.resolve_pair(pair)?;
        let result = match self.controllers.get(&pair) {
            Some(handle) => handle.value().delete().await,
            None => BookDepth {
                pair,
                bids: Vec::new(),
                asks: Vec::new(),
            },
        };
        self.controllers.remove(&pair);
        self.markets.remove(&pair);
        metrics::set_active_pairs(self.controllers.len() as i64);
        Ok(result)
    }

    /// Looks up the current status of an order.
    pub async fn order_status(&self, order_id: OrderId) -> Option<OrderStatusView> {
        self.history.order_status(order_id).await
    }

    /// Returns order history for an address. `pair = None` is `AllOrderHistory`.
    pub async fn order_history(&self, pair: Option<AssetPair>, address: Address) -> Vec<HistoryEntry> {
        let resolved = match pair {
            Some(p) => match self.resolve_pair(p) {
                Ok(p) => Some(p),
                Err(_) => return Vec::new(),
            },
            None => None,
        };
        self.history.order_history(resolved, address).await
    }

    pub async fn open_volume(&self, address: Address, asset: AssetId) -> u64 {
        self.history.open_volume(address, asset).await
    }

    /// Returns tradable balance as `(amountAsset, priceAsset)`,
    /// resolved to the pair's canonical orientation first so the two halves
    /// of the tuple always mean what the caller expects.
    pub async fn tradable_balance(&self, pair: AssetPair, address: Address) -> Result<(u64, u64), DispatchError> {
        let pair = self.resolve_pair(pair)?;
        Ok(self.history.tradable_balance(pair, address).await)
    }

    /// Deletes a terminal order from history.
    pub async fn delete_order(&self, pair: AssetPair, address: Address, order_id: OrderId) -> Result<OrderId, String> {
        let pair = self.resolve_pair(pair).map_err(|e| e.to_string())?;
        self.history.delete_order(pair, address, order_id).await
    }

    /// Lists open markets: per-market metadata plus the matcher's
    /// own public key.
    pub fn markets(&self) -> (PublicKey, Vec<MarketInfo>) {
        let listing = self.markets.iter().map(|e| e.value().clone()).collect();
        (self.matcher_public_key, listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetId;
    use crate::history;
    use crate::settlement::test_support::FakeSettlementClient;
    use crate::signing::test_support::TestKeypair;
    use crate::signing::Secp256k1Verifier;
    use crate::validator::OrderValidator;
    use chrono::Duration as ChronoDuration;
    use std::path::PathBuf;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    fn test_config(journal_dir: PathBuf, snapshots_dir: PathBuf, predefined: Vec<AssetPair>) -> AppConfig {
        AppConfig {
            enable: true,
            account: Address([0u8; 20]),
            bind_address: "127.0.0.1".into(),
            port: 0,
            min_order_fee: 1,
            order_match_tx_fee: 1,
            journal_data_dir: journal_dir,
            snapshots_data_dir: snapshots_dir,
            snapshots_interval: StdDuration::from_secs(3600),
            max_open_orders: 1000,
            price_assets: vec![AssetId::Native],
            predefined_pairs: predefined,
            max_timestamp_diff: StdDuration::from_secs(60),
            order_history_file: PathBuf::from(":memory:"),
            blacklisted_assets: vec![],
            request_ttl: StdDuration::from_secs(5),
            validation_timeout: StdDuration::from_secs(5),
            reserve_release_delay: StdDuration::from_millis(10),
            max_orders_per_address: 1000,
            max_depth: 50,
            max_order_lifetime: StdDuration::from_secs(30 * 24 * 3600),
            price_asset_base_unit: 100,
        }
    }

    async fn bootstrap_dispatcher(
        predefined: Vec<AssetPair>,
        settlement: Arc<dyn SettlementClient>,
    ) -> (MatcherDispatcher, tempfile::TempDir, tempfile::TempDir) {
        let journal_dir = tempdir().unwrap();
        let snapshots_dir = tempdir().unwrap();
        let config = test_config(
            journal_dir.path().to_path_buf(),
            snapshots_dir.path().to_path_buf(),
            predefined,
        );

        let store = Arc::new(crate::history::store::HistoryStore::in_memory().await.unwrap());
        let verifier: Arc<dyn SignatureVerifier> = Arc::new(Secp256k1Verifier::default());
        let matcher_kp = TestKeypair::generate(99);
        let matcher_key = matcher_kp.public;
        let signer: Arc<dyn MatcherSigner> = Arc::new(matcher_kp);
        let validator = Arc::new(OrderValidator::new(verifier.clone(), settlement.clone(), config.clone()));
        let history_handle = history::spawn(store, validator, settlement.clone(), config.clone());

        let dispatcher =
            MatcherDispatcher::bootstrap(config, history_handle, settlement, verifier, signer, matcher_key)
                .await
                .unwrap();
        (dispatcher, journal_dir, snapshots_dir)
    }

    fn make_order(kp: &TestKeypair, pair: AssetPair, side: crate::domain::Side, price: u64, amount: u64) -> Order {
        let now = Utc::now();
        let expiration = now + ChronoDuration::seconds(3600);
        let bytes = Order::signed_bytes(&kp.public, &pair, side, price, amount, now, expiration, 1);
        let signature = kp.sign(&bytes);
        Order::new(kp.public, pair, side, price, amount, now, expiration, 1, signature)
    }

    #[tokio::test]
    async fn predefined_pair_is_routable_at_startup() {
        let pair = AssetPair::new(AssetId::Issued([21u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(pair.amount_asset, 1_000_000);
        settlement.set_supply(pair.price_asset, 1_000_000);

        let (dispatcher, _jd, _sd) = bootstrap_dispatcher(vec![pair], settlement.clone()).await;

        let kp = TestKeypair::generate(31);
        let order = make_order(&kp, pair, crate::domain::Side::Buy, 10, 50);
        settlement.set_balance(order.sender, pair.price_asset, 10_000);

        let accepted = dispatcher.submit_order(order).await;
        assert!(accepted.is_ok());
        let (_, markets) = dispatcher.markets();
        assert_eq!(markets.len(), 1);
    }

    #[tokio::test]
    async fn reversed_pair_is_rejected_once_canonical_is_known() {
        let canonical = AssetPair::new(AssetId::Issued([22u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(canonical.amount_asset, 1_000_000);
        settlement.set_supply(canonical.price_asset, 1_000_000);

        let (dispatcher, _jd, _sd) = bootstrap_dispatcher(vec![canonical], settlement.clone()).await;

        let kp = TestKeypair::generate(32);
        let reversed = canonical.reversed();
        let order = make_order(&kp, reversed, crate::domain::Side::Buy, 10, 50);

        let result = dispatcher.submit_order(order).await;
        assert_eq!(
            result,
            Err(SubmitError::Dispatch(DispatchError::InvalidPairOrdering(canonical)))
        );
    }

    #[tokio::test]
    async fn unknown_pair_orients_by_price_assets_list_then_creates_controller() {
        let settlement = Arc::new(FakeSettlementClient::default());
        let (dispatcher, _jd, _sd) = bootstrap_dispatcher(vec![], settlement.clone()).await;

        let amount_asset = AssetId::Issued([23u8; 32]);
        settlement.set_supply(amount_asset, 1_000_000);
        settlement.set_supply(AssetId::Native, 1_000_000);
        let pair = AssetPair::new(amount_asset, AssetId::Native);

        let kp = TestKeypair::generate(33);
        let order = make_order(&kp, pair, crate::domain::Side::Sell, 10, 50);
        settlement.set_balance(order.sender, amount_asset, 1_000);

        let accepted = dispatcher.submit_order(order).await;
        assert!(accepted.is_ok());

        let depth = dispatcher.depth(pair, 10).await.unwrap();
        assert_eq!(depth.asks, vec![(10, 50)]);
    }

    #[tokio::test]
    async fn unknown_asset_is_rejected_before_routing() {
        let settlement = Arc::new(FakeSettlementClient::default());
        let (dispatcher, _jd, _sd) = bootstrap_dispatcher(vec![], settlement.clone()).await;

        let pair = AssetPair::new(AssetId::Issued([24u8; 32]), AssetId::Native);
        let kp = TestKeypair::generate(34);
        let order = make_order(&kp, pair, crate::domain::Side::Buy, 10, 50);

        let result = dispatcher.submit_order(order).await;
        assert_eq!(
            result,
            Err(SubmitError::Dispatch(DispatchError::UnknownAsset(pair.amount_asset)))
        );
    }
}
