//! Events emitted by the order book and applied to the controller's own
//! state and to the history projection. These are the unit of persistence:
//! the event log is the source of truth for a pair's book.

use crate::domain::order::{LimitOrder, OrderId};
use crate::signing::Signature;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookEvent {
    /// A fresh or residual order rests in the book.
    OrderAdded(LimitOrder),
    /// `submitted` traded `traded_amount` against `counter`, which was
    /// resident in the book before the match.
    OrderExecuted {
        submitted: LimitOrder,
        counter: LimitOrder,
        traded_amount: u64,
    },
    /// An order left the book without trading: explicit cancellation, or a
    /// dust residual the matching loop refused to re-rest.
    OrderCanceled(LimitOrder),
}

impl BookEvent {
    /// The order id(s) this event concerns, for log/metrics correlation.
    pub fn order_ids(&self) -> Vec<OrderId> {
        match self {
            BookEvent::OrderAdded(lo) => vec![lo.id()],
            BookEvent::OrderExecuted {
                submitted, counter, ..
            } => vec![submitted.id(), counter.id()],
            BookEvent::OrderCanceled(lo) => vec![lo.id()],
        }
    }
}

/// A settlement transaction constructed from a single `OrderExecuted` event,
/// signed by the matcher and handed to the (external) settlement layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeTransaction {
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub price: u64,
    pub amount: u64,
    pub buyer_matcher_fee: u64,
    pub seller_matcher_fee: u64,
    /// The matcher's own network fee for broadcasting this transaction,
    /// distinct from either side's `matcher_fee` reservation, which the
    /// traders themselves pay.
    pub matcher_tx_fee: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The matcher's own signature over this transaction's canonical bytes,
    /// binding it before it is handed to the settlement layer.
    pub matcher_signature: Signature,
}

impl ExchangeTransaction {
    /// Canonical bytes the matcher signs over. Mirrors
    /// [`crate::domain::order::Order::signed_bytes`]'s convention of a flat,
    /// field-ordered encoding rather than relying on `serde_json`'s
    /// (unstable) field order.
    pub fn signed_bytes(
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        price: u64,
        amount: u64,
        buyer_matcher_fee: u64,
        seller_matcher_fee: u64,
        matcher_tx_fee: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32 + 32 + 8 * 5 + 8);
        bytes.extend_from_slice(&buy_order_id.0);
        bytes.extend_from_slice(&sell_order_id.0);
        bytes.extend_from_slice(&price.to_be_bytes());
        bytes.extend_from_slice(&amount.to_be_bytes());
        bytes.extend_from_slice(&buyer_matcher_fee.to_be_bytes());
        bytes.extend_from_slice(&seller_matcher_fee.to_be_bytes());
        bytes.extend_from_slice(&matcher_tx_fee.to_be_bytes());
        bytes.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
        bytes
    }
}

/// Published alongside the durable event, for subscribers outside the
/// controller (the out-of-scope broadcast/UTX pool layer, metrics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishedEvent {
    Book(BookEvent),
    ExchangeTransactionCreated(ExchangeTransaction),
    OrderBookCreated(crate::domain::asset::AssetPair),
}
