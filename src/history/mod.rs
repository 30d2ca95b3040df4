//! `OrderHistoryService`: the single writer of the history projection.
//! Subscribes to every controller's event stream (via direct calls — this
//! crate has exactly one projection subscriber, so there is no need for a
//! pub/sub fan-out) and answers status/history/balance queries.
//!
//! Structured as a single-consumer actor over a bounded `mpsc` channel, the
//! same "serial loop over an inbox" model as [`crate::controller`].

pub mod store;

use crate::book::OrderBook;
use crate::config::AppConfig;
use crate::domain::{AssetId, AssetPair, BookEvent, LimitOrder, Order, OrderId, OrderInfo, OrderStatus};
use crate::error::ValidationError;
use crate::metrics;
use crate::signing::Address;
use crate::validator::{reservation_delta, reserved_amount_for_units, OrderValidator};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use store::HistoryStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A single order as shown in an `OrderHistory`/`AllOrderHistory` response
/// sorted by timestamp ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: OrderId,
    pub pair: AssetPair,
    pub side: crate::domain::order::Side,
    pub amount: u64,
    pub price: u64,
    pub timestamp: DateTime<Utc>,
    pub filled: u64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderStatusView {
    pub status: OrderStatus,
    pub filled: u64,
}

enum HistoryRequest {
    ValidateOrder {
        order: Order,
        now: DateTime<Utc>,
        requested_at: DateTime<Utc>,
        respond: oneshot::Sender<Result<(), ValidationError>>,
    },
    ApplyBookEvent {
        pair: AssetPair,
        event: BookEvent,
    },
    RecoverFromOrderBook {
        pair: AssetPair,
        book: OrderBook,
    },
    OrderStatus {
        order_id: OrderId,
        requested_at: DateTime<Utc>,
        respond: oneshot::Sender<Option<OrderStatusView>>,
    },
    OrderHistory {
        pair: Option<AssetPair>,
        address: Address,
        requested_at: DateTime<Utc>,
        respond: oneshot::Sender<Vec<HistoryEntry>>,
    },
    OpenVolume {
        address: Address,
        asset: AssetId,
        requested_at: DateTime<Utc>,
        respond: oneshot::Sender<u64>,
    },
    TradableBalance {
        pair: AssetPair,
        address: Address,
        requested_at: DateTime<Utc>,
        respond: oneshot::Sender<(u64, u64)>,
    },
    DeleteOrder {
        pair: AssetPair,
        address: Address,
        order_id: OrderId,
        requested_at: DateTime<Utc>,
        respond: oneshot::Sender<Result<OrderId, String>>,
    },
}

/// A cheap, cloneable handle to the running `OrderHistoryService` actor.
/// Every method is a request/response round trip over the actor's mailbox.
#[derive(Clone)]
pub struct HistoryHandle {
    tx: mpsc::Sender<HistoryRequest>,
}

/// Trait object surface the rest of the crate depends on, so tests can swap
/// in a handle backed by an in-process actor without touching call sites.
pub trait TradableBalanceSource {
    fn open_volume(&self, address: Address, asset: AssetId) -> u64;
}

impl HistoryHandle {
    pub async fn validate_order(&self, order: Order, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .tx
            .send(HistoryRequest::ValidateOrder {
                order,
                now,
                requested_at: now,
                respond: tx,
            })
            .await;
        if sent.is_err() {
            return Err(ValidationError::UnknownAsset(AssetId::Native));
        }
        rx.await.unwrap_or(Err(ValidationError::UnknownAsset(AssetId::Native)))
    }

    /// Fire-and-forget application of a book event. The history projection
    /// is a derived cache: the controller's own journal is the source of
    /// truth, so a dropped or lagged apply here never blocks or fails
    /// matching.
    pub async fn apply_book_event(&self, pair: AssetPair, event: BookEvent) {
        if self
            .tx
            .send(HistoryRequest::ApplyBookEvent { pair, event })
            .await
            .is_err()
        {
            warn!("history service unreachable, dropping book event");
        }
    }

    pub async fn recover_from_order_book(&self, pair: AssetPair, book: OrderBook) {
        if self
            .tx
            .send(HistoryRequest::RecoverFromOrderBook { pair, book })
            .await
            .is_err()
        {
            warn!("history service unreachable, dropping recovery synthesis");
        }
    }

    pub async fn order_status(&self, order_id: OrderId) -> Option<OrderStatusView> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(HistoryRequest::OrderStatus {
                order_id,
                requested_at: Utc::now(),
                respond: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn order_history(&self, pair: Option<AssetPair>, address: Address) -> Vec<HistoryEntry> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(HistoryRequest::OrderHistory {
                pair,
                address,
                requested_at: Utc::now(),
                respond: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn open_volume(&self, address: Address, asset: AssetId) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(HistoryRequest::OpenVolume {
                address,
                asset,
                requested_at: Utc::now(),
                respond: tx,
            })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn tradable_balance(&self, pair: AssetPair, address: Address) -> (u64, u64) {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(HistoryRequest::TradableBalance {
                pair,
                address,
                requested_at: Utc::now(),
                respond: tx,
            })
            .await
            .is_err()
        {
            return (0, 0);
        }
        rx.await.unwrap_or((0, 0))
    }

    pub async fn delete_order(
        &self,
        pair: AssetPair,
        address: Address,
        order_id: OrderId,
    ) -> Result<OrderId, String> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(HistoryRequest::DeleteOrder {
                pair,
                address,
                order_id,
                requested_at: Utc::now(),
                respond: tx,
            })
            .await
            .is_err()
        {
            return Err("history service unreachable".to_string());
        }
        rx.await.unwrap_or_else(|_| Err("history service unreachable".to_string()))
    }
}

struct Inner {
    store: Arc<HistoryStore>,
    validator: Arc<OrderValidator>,
    settlement: Arc<dyn crate::settlement::SettlementClient>,
    config: AppConfig,
}

/// Spawns the `OrderHistoryService` actor and returns a handle to it.
pub fn spawn(
    store: Arc<HistoryStore>,
    validator: Arc<OrderValidator>,
    settlement: Arc<dyn crate::settlement::SettlementClient>,
    config: AppConfig,
) -> HistoryHandle {
    let (tx, mut rx) = mpsc::channel::<HistoryRequest>(4096);
    let inner = Inner {
        store,
        validator,
        settlement,
        config,
    };
    tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            if let Some(requested_at) = req.requested_at() {
                if is_stale(requested_at, inner.config.request_ttl) {
                    metrics::record_history_request_dropped("stale");
                    warn!("dropping stale history request past RequestTTL");
                    continue;
                }
            }
            let kind = req.kind();
            let timer = metrics::Timer::new();
            handle_request(&inner, req).await;
            metrics::record_history_query(kind, timer.elapsed_secs());
        }
        debug!("history service mailbox closed, exiting");
    });
    HistoryHandle { tx }
}

fn is_stale(requested_at: DateTime<Utc>, ttl: std::time::Duration) -> bool {
    let age = (Utc::now() - requested_at).num_milliseconds();
    age > ttl.as_millis() as i64
}

impl HistoryRequest {
    /// `None` for controller-originated events, which are never
    /// stale-dropped: they are the authoritative projection of the event
    /// log, not a client query subject to the RequestTTL backpressure policy.
    fn requested_at(&self) -> Option<DateTime<Utc>> {
        match self {
            HistoryRequest::ValidateOrder { requested_at, .. }
            | HistoryRequest::OrderStatus { requested_at, .. }
            | HistoryRequest::OrderHistory { requested_at, .. }
            | HistoryRequest::OpenVolume { requested_at, .. }
            | HistoryRequest::TradableBalance { requested_at, .. }
            | HistoryRequest::DeleteOrder { requested_at, .. } => Some(*requested_at),
            HistoryRequest::ApplyBookEvent { .. } | HistoryRequest::RecoverFromOrderBook { .. } => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            HistoryRequest::ValidateOrder { .. } => "validate_order",
            HistoryRequest::ApplyBookEvent { .. } => "apply_book_event",
            HistoryRequest::RecoverFromOrderBook { .. } => "recover_from_order_book",
            HistoryRequest::OrderStatus { .. } => "order_status",
            HistoryRequest::OrderHistory { .. } => "order_history",
            HistoryRequest::OpenVolume { .. } => "open_volume",
            HistoryRequest::TradableBalance { .. } => "tradable_balance",
            HistoryRequest::DeleteOrder { .. } => "delete_order",
        }
    }
}

async fn handle_request(inner: &Inner, req: HistoryRequest) {
    match req {
        HistoryRequest::ValidateOrder { order, now, respond, .. } => {
            let (asset, _) = reserved_amount_for_units(&order, order.amount);
            let reserved = inner
                .store
                .reserved(order.sender, asset)
                .await
                .unwrap_or(0)
                .max(0) as u64;
            let result = inner.validator.validate_order(&order, now, reserved).await;
            let _ = respond.send(result);
        }
        HistoryRequest::ApplyBookEvent { pair, event } => apply_book_event(inner, pair, event).await,
        HistoryRequest::RecoverFromOrderBook { pair, book } => recover_from_book(inner, pair, book).await,
        HistoryRequest::OrderStatus { order_id, respond, .. } => {
            let info = inner.store.load_order_info(order_id).await.ok().flatten();
            let view = info.map(|i| OrderStatusView {
                status: i.status(),
                filled: i.filled,
            });
            let _ = respond.send(view);
        }
        HistoryRequest::OrderHistory {
            pair, address, respond, ..
        } => {
            let entries = order_history(inner, pair, address).await;
            let _ = respond.send(entries);
        }
        HistoryRequest::OpenVolume {
            address, asset, respond, ..
        } => {
            let v = inner.store.reserved(address, asset).await.unwrap_or(0).max(0) as u64;
            let _ = respond.send(v);
        }
        HistoryRequest::TradableBalance {
            pair, address, respond, ..
        } => {
            let amount_open = inner
                .store
                .reserved(address, pair.amount_asset)
                .await
                .unwrap_or(0)
                .max(0) as u64;
            let price_open = inner
                .store
                .reserved(address, pair.price_asset)
                .await
                .unwrap_or(0)
                .max(0) as u64;
            let amount_bal = inner
                .settlement
                .balance_of(address, pair.amount_asset)
                .await
                .unwrap_or(0);
            let price_bal = inner
                .settlement
                .balance_of(address, pair.price_asset)
                .await
                .unwrap_or(0);
            let amount_tradable = amount_bal.saturating_sub(amount_open);
            let price_tradable = price_bal.saturating_sub(price_open);
            let _ = respond.send((amount_tradable, price_tradable));
        }
        HistoryRequest::DeleteOrder {
            pair,
            address,
            order_id,
            respond,
            ..
        } => {
            let result = delete_order(inner, pair, address, order_id).await;
            let _ = respond.send(result);
        }
    }
}

async fn apply_book_event(inner: &Inner, pair: AssetPair, event: BookEvent) {
    match event {
        BookEvent::OrderAdded(lo) => on_order_added(inner, pair, lo).await,
        BookEvent::OrderExecuted {
            submitted,
            counter,
            traded_amount,
        } => on_order_executed(inner, pair, submitted, counter, traded_amount).await,
        BookEvent::OrderCanceled(lo) => on_order_canceled(inner, pair, lo).await,
    }
}

async fn on_order_added(inner: &Inner, pair: AssetPair, lo: LimitOrder) {
    let order = lo.order;
    if let Err(e) = inner.store.insert_order_if_absent(&order).await {
        warn!("failed to persist order {}: {e}", order.id);
    }
    let delta = OrderInfo {
        amount: order.amount,
        filled: 0,
        canceled: false,
    };
    if let Err(e) = inner.store.combine_order_info(order.id, delta).await {
        warn!("failed to combine order info for {}: {e}", order.id);
    }
    apply_reservation(inner, &order, order.amount, 1).await;
    if let Err(e) = inner
        .store
        .append_to_index(&pair, order.sender, order.id, inner.config.max_orders_per_address)
        .await
    {
        warn!("failed to index order {}: {e}", order.id);
    }
}

async fn on_order_executed(
    inner: &Inner,
    _pair: AssetPair,
    submitted: LimitOrder,
    counter: LimitOrder,
    traded_amount: u64,
) {
    for lo in [&submitted, &counter] {
        let delta = OrderInfo {
            amount: lo.order.amount,
            filled: traded_amount,
            canceled: false,
        };
        if let Err(e) = inner.store.combine_order_info(lo.id(), delta).await {
            warn!("failed to combine order info for {}: {e}", lo.id());
        }
    }

    // Reserve release is delayed: the submitted order's reservation is
    // scaled by the counter's price, the trade's actual settlement price.
    let delay = inner.config.reserve_release_delay;
    let store = inner.store.clone();
    let counter_order = counter.order.clone();
    let submitted_order = submitted.order.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        release_reservation(&store, &counter_order, traded_amount).await;
        release_reservation(&store, &submitted_order, traded_amount).await;
    });
}

async fn on_order_canceled(inner: &Inner, _pair: AssetPair, lo: LimitOrder) {
    let order = lo.order;
    let delta = OrderInfo {
        amount: order.amount,
        filled: 0,
        canceled: true,
    };
    if let Err(e) = inner.store.combine_order_info(order.id, delta).await {
        warn!("failed to combine order info for {}: {e}", order.id);
    }
    // Cancellation releases the unfilled portion immediately, unlike an
    // execution's delayed release — there is no pending settlement to wait on.
    release_reservation(&inner.store, &order, lo.remaining_amount).await;
}

async fn apply_reservation(inner: &Inner, order: &Order, units: u64, sign: i64) {
    let portfolio = reservation_delta(order, units, sign);
    for (asset, delta) in portfolio.entries() {
        if let Err(e) = inner.store.combine_portfolio_delta(order.sender, asset, delta).await {
            warn!("failed to apply portfolio delta for {}: {e}", order.sender);
        }
    }
}

async fn release_reservation(store: &HistoryStore, order: &Order, units: u64) {
    let portfolio = reservation_delta(order, units, -1);
    for (asset, delta) in portfolio.entries() {
        if let Err(e) = store.combine_portfolio_delta(order.sender, asset, delta).await {
            warn!("failed to release reservation for {}: {e}", order.sender);
        }
    }
}

/// Synthesizes `OrderAdded` for every order resident in a recovered book,
/// idempotently: the `OrderInfo`/`OpenPortfolio` combine monoids make
/// re-application safe.
async fn recover_from_book(inner: &Inner, pair: AssetPair, book: OrderBook) {
    use crate::domain::Side;
    for side in [Side::Buy, Side::Sell] {
        for lo in book.orders_on(side) {
            on_order_added(inner, pair, lo.clone()).await;
        }
    }
}

async fn order_history(inner: &Inner, pair: Option<AssetPair>, address: Address) -> Vec<HistoryEntry> {
    let ids = match pair {
        Some(p) => inner.store.index_for(&p, address).await.unwrap_or_default(),
        None => inner.store.all_index_for(address).await.unwrap_or_default(),
    };
    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(order) = inner.store.load_order(id).await.ok().flatten() else {
            continue;
        };
        let Some(info) = inner.store.load_order_info(id).await.ok().flatten() else {
            continue;
        };
        entries.push(HistoryEntry {
            id,
            pair: order.pair,
            side: order.side,
            amount: order.amount,
            price: order.price,
            timestamp: order.timestamp,
            filled: info.filled,
            status: info.status(),
        });
    }
    entries.sort_by_key(|e| e.timestamp);
    entries
}

async fn delete_order(
    inner: &Inner,
    pair: AssetPair,
    address: Address,
    order_id: OrderId,
) -> Result<OrderId, String> {
    let Some(info) = inner.store.load_order_info(order_id).await.map_err(|e| e.to_string())? else {
        return Err("Order couldn't be deleted".to_string());
    };
    match info.status() {
        OrderStatus::Filled | OrderStatus::Cancelled { .. } => {
            inner
                .store
                .remove_from_index(&pair, address, order_id)
                .await
                .map_err(|e| e.to_string())?;
            Ok(order_id)
        }
        _ => Err("Order couldn't be deleted".to_string()),
    }
}
