//! The pure order book: price-time priority matching, no I/O, no clocks.
//!
//! Bids/asks as `BTreeMap<price, VecDeque<order>>` plus an id index for
//! O(1) cancellation, with no concurrency of its own — a book is owned by
//! exactly one [`crate::controller`] actor at a time, so there is nothing
//! here for `RwLock`/`DashMap` to protect.

use crate::domain::{BookEvent, LimitOrder, OrderId, Side};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Serializable top-to-bottom: this is exactly the shape written to a
/// snapshot file. The `index` is derived from `bids`/`asks` and is rebuilt
/// on load rather than trusted from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    /// Highest price last via `BTreeMap`'s natural ascending order + `next_back`.
    bids: BTreeMap<u64, VecDeque<LimitOrder>>,
    /// Lowest price first, BTreeMap's natural order.
    asks: BTreeMap<u64, VecDeque<LimitOrder>>,
    #[serde(skip)]
    index: HashMap<OrderId, (Side, u64)>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the id index from `bids`/`asks`. Required after loading a
    /// book from a snapshot, since the index itself is never serialized.
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for (price, queue) in &self.bids {
            for lo in queue {
                self.index.insert(lo.id(), (Side::Buy, *price));
            }
        }
        for (price, queue) in &self.asks {
            for lo in queue {
                self.index.insert(lo.id(), (Side::Sell, *price));
            }
        }
    }

    fn side_map(&self, side: Side) -> &BTreeMap<u64, VecDeque<LimitOrder>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_map_mut(&mut self, side: Side) -> &mut BTreeMap<u64, VecDeque<LimitOrder>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<u64> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<u64> {
        self.asks.keys().next().copied()
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.index.contains_key(&id)
    }

    /// Total resident order count across both sides.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Resident depth for a side, best price first, truncated to `depth`
    /// levels, as `(price, total_amount)`.
    pub fn depth(&self, side: Side, depth: usize) -> Vec<(u64, u64)> {
        let levels: Box<dyn Iterator<Item = (&u64, &VecDeque<LimitOrder>)>> = match side {
            Side::Buy => Box::new(self.bids.iter().rev()),
            Side::Sell => Box::new(self.asks.iter()),
        };
        levels
            .take(depth)
            .map(|(price, queue)| {
                let total: u64 = queue.iter().map(|lo| lo.remaining_amount).sum();
                (*price, total)
            })
            .collect()
    }

    pub fn orders_on(&self, side: Side) -> Vec<&LimitOrder> {
        self.side_map(side).values().flatten().collect()
    }

    /// Appends `lo` to the tail of its price level queue, creating the level
    /// if absent.
    pub fn add(&mut self, lo: LimitOrder) {
        let side = lo.side();
        let price = lo.price();
        let id = lo.id();
        self.side_map_mut(side)
            .entry(price)
            .or_default()
            .push_back(lo);
        self.index.insert(id, (side, price));
    }

    /// Removes an order by id from wherever it resides. Returns the removed
    /// order and a cancellation event, or `None` if the id is absent.
    pub fn cancel(&mut self, id: OrderId) -> Option<BookEvent> {
        let (side, price) = self.index.remove(&id)?;
        let map = self.side_map_mut(side);
        let queue = map.get_mut(&price)?;
        let pos = queue.iter().position(|lo| lo.id() == id)?;
        let removed = queue.remove(pos)?;
        if queue.is_empty() {
            map.remove(&price);
        }
        Some(BookEvent::OrderCanceled(removed))
    }

    /// Whether `incoming` crosses the best order on the opposite side. No
    /// opposite level means no crossing.
    fn crosses(&self, incoming: &LimitOrder) -> bool {
        match incoming.side() {
            Side::Buy => self
                .best_ask()
                .is_some_and(|ask_price| incoming.price() >= ask_price),
            Side::Sell => self
                .best_bid()
                .is_some_and(|bid_price| incoming.price() <= bid_price),
        }
    }

    /// The single-step matcher. Pure: returns the event to apply, does not
    /// mutate `self`. The caller applies it via [`OrderBook::update_state`].
    pub fn match_order(&self, incoming: &LimitOrder) -> BookEvent {
        if !self.crosses(incoming) {
            return BookEvent::OrderAdded(incoming.clone());
        }
        let opposite = incoming.side().opposite();
        let best_price = match opposite {
            Side::Buy => self.best_bid(),
            Side::Sell => self.best_ask(),
        }
        .expect("crosses() only returns true when an opposite level exists");
        let best = self.side_map(opposite)[&best_price]
            .front()
            .expect("non-empty level invariant")
            .clone();
        let traded_amount = incoming.remaining_amount.min(best.remaining_amount);
        BookEvent::OrderExecuted {
            submitted: incoming.clone(),
            counter: best,
            traded_amount,
        }
    }

    /// Applies an event produced by [`OrderBook::match_order`] or
    /// [`OrderBook::cancel`].
    pub fn update_state(&mut self, event: BookEvent) {
        match event {
            BookEvent::OrderAdded(lo) => self.add(lo),
            BookEvent::OrderExecuted {
                counter,
                traded_amount,
                ..
            } => {
                let side = counter.side();
                let price = counter.price();
                let id = counter.id();
                if let Some(queue) = self.side_map_mut(side).get_mut(&price) {
                    if let Some(front) = queue.front_mut() {
                        debug_assert_eq!(front.id(), id);
                        front.remaining_amount -= traded_amount;
                        if front.remaining_amount == 0 {
                            queue.pop_front();
                            self.index.remove(&id);
                        }
                    }
                    if queue.is_empty() {
                        self.side_map_mut(side).remove(&price);
                    }
                }
            }
            BookEvent::OrderCanceled(lo) => {
                self.index.remove(&lo.id());
            }
        }
    }

    /// Whether `remaining * price` divides evenly into `price_asset_unit`,
    /// the price asset's fixed-point base unit (`AppConfig::price_asset_base_unit`).
    pub fn is_dust(remaining: u64, price: u64, price_asset_unit: u64) -> bool {
        remaining == 0 || (remaining.saturating_mul(price)) % price_asset_unit != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::{AssetId, AssetPair};
    use crate::domain::order::Order;
    use crate::signing::test_support::TestKeypair;
    use chrono::{DateTime, Duration, Utc};

    fn pair() -> AssetPair {
        AssetPair::new(AssetId::Issued([9u8; 32]), AssetId::Native)
    }

    fn order(kp: &TestKeypair, side: Side, price: u64, amount: u64, salt: u64) -> LimitOrder {
        let p = pair();
        let timestamp = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1000 + salt as i64);
        let expiration = timestamp + Duration::seconds(3600);
        let bytes = Order::signed_bytes(&kp.public, &p, side, price, amount, timestamp, expiration, 1);
        let signature = kp.sign(&bytes);
        let o = Order::new(kp.public, p, side, price, amount, timestamp, expiration, 1, signature);
        LimitOrder::new(o)
    }

    #[test]
    fn non_crossing_orders_both_rest() {
        let kp = TestKeypair::generate(1);
        let mut book = OrderBook::new();
        let buy = order(&kp, Side::Buy, 10, 100, 1);
        let sell = order(&kp, Side::Sell, 11, 100, 2);

        let e1 = book.match_order(&buy);
        assert!(matches!(e1, BookEvent::OrderAdded(_)));
        book.update_state(e1);

        let e2 = book.match_order(&sell);
        assert!(matches!(e2, BookEvent::OrderAdded(_)));
        book.update_state(e2);

        assert_eq!(book.best_bid(), Some(10));
        assert_eq!(book.best_ask(), Some(11));
    }

    #[test]
    fn crossing_order_produces_full_match() {
        let kp = TestKeypair::generate(2);
        let mut book = OrderBook::new();
        let sell = order(&kp, Side::Sell, 10, 100, 1);
        book.update_state(BookEvent::OrderAdded(sell));

        let buy = order(&kp, Side::Buy, 10, 100, 2);
        let event = book.match_order(&buy);
        match &event {
            BookEvent::OrderExecuted { traded_amount, .. } => assert_eq!(*traded_amount, 100),
            other => panic!("expected OrderExecuted, got {other:?}"),
        }
        book.update_state(event);

        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn partial_fill_leaves_residual_counter_resident() {
        let kp = TestKeypair::generate(3);
        let mut book = OrderBook::new();
        let sell = order(&kp, Side::Sell, 10, 100, 1);
        book.update_state(BookEvent::OrderAdded(sell));

        let buy = order(&kp, Side::Buy, 10, 40, 2);
        let event = book.match_order(&buy);
        book.update_state(event);

        assert_eq!(book.best_ask(), Some(10));
        let remaining: u64 = book.orders_on(Side::Sell)[0].remaining_amount;
        assert_eq!(remaining, 60);
    }

    #[test]
    fn cancel_removes_order_and_empties_level() {
        let kp = TestKeypair::generate(4);
        let mut book = OrderBook::new();
        let buy = order(&kp, Side::Buy, 10, 100, 1);
        let id = buy.id();
        book.update_state(BookEvent::OrderAdded(buy));

        let event = book.cancel(id);
        assert!(matches!(event, Some(BookEvent::OrderCanceled(_))));
        assert!(!book.contains(id));
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn cancel_of_unknown_id_returns_none() {
        let mut book = OrderBook::new();
        assert!(book.cancel(OrderId([0u8; 32])).is_none());
    }

    #[test]
    fn dust_residual_is_detected_and_clean_residual_is_not() {
        // 30 * 7 = 210, not a multiple of 100: dust.
        assert!(OrderBook::is_dust(30, 7, 100));
        // 60 * 10 = 600, a whole number of 100-unit lots: not dust.
        assert!(!OrderBook::is_dust(60, 10, 100));
        // A fully filled order has no residual to judge.
        assert!(OrderBook::is_dust(0, 10, 100));
    }

    #[test]
    fn partial_fill_can_leave_a_dust_residual_for_the_matching_loop_to_cancel() {
        let kp = TestKeypair::generate(6);
        let mut book = OrderBook::new();
        let sell = order(&kp, Side::Sell, 7, 100, 1);
        book.update_state(BookEvent::OrderAdded(sell));

        // Leaves a residual of 30 at price 7: 30 * 7 = 210, not divisible by
        // the configured 100-unit base, so the matching loop would cancel it
        // instead of re-resting it.
        let buy = order(&kp, Side::Buy, 7, 70, 2);
        let event = book.match_order(&buy);
        book.update_state(event);

        let remaining = book.orders_on(Side::Sell)[0].remaining_amount;
        assert_eq!(remaining, 30);
        assert!(OrderBook::is_dust(remaining, 7, 100));
    }

    #[test]
    fn fifo_within_a_price_level() {
        let kp = TestKeypair::generate(5);
        let mut book = OrderBook::new();
        let first = order(&kp, Side::Sell, 10, 50, 1);
        let second = order(&kp, Side::Sell, 10, 50, 2);
        let first_id = first.id();
        book.update_state(BookEvent::OrderAdded(first));
        book.update_state(BookEvent::OrderAdded(second));

        let buy = order(&kp, Side::Buy, 10, 50, 3);
        let event = book.match_order(&buy);
        match event {
            BookEvent::OrderExecuted { counter, .. } => assert_eq!(counter.id(), first_id),
            other => panic!("expected OrderExecuted, got {other:?}"),
        }
    }
}
