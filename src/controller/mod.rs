//! `OrderBookController`: one actor per pair, serializing validation,
//! matching, settlement, and event persistence for that pair.
//!
//! Modeled as a single-consumer loop over two mailboxes — a read queue always
//! drained first, and a write queue (new orders, cancels, pair deletion)
//! that is only ever one request "in flight" at a time, implementing a
//! `Ready`/`AwaitingValidation` state machine: there is no manual stash
//! queue for ordinary operation, because `tokio::sync::mpsc` already gives
//! a FIFO inbox — a `VecDeque` stash is used only for the brief window
//! where a pending validation must not be overtaken by a later write.

pub mod journal;

use crate::book::OrderBook;
use crate::config::AppConfig;
use crate::domain::{AssetPair, BookEvent, ExchangeTransaction, LimitOrder, Order, OrderId, Side};
use crate::error::{CancelError, ControllerError, ValidationError};
use crate::history::HistoryHandle;
use crate::metrics;
use crate::settlement::SettlementClient;
use crate::signing::{MatcherSigner, Signature, SignatureVerifier};
use crate::validator::reserved_fee_for_units;
use chrono::Utc;
use journal::Journal;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// A price level summary as served by "Get order book", already
/// truncated to `min(depth, MaxDepth)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDepth {
    pub pair: AssetPair,
    pub bids: Vec<(u64, u64)>,
    pub asks: Vec<(u64, u64)>,
}

enum ReadMsg {
    Depth {
        depth: usize,
        respond: oneshot::Sender<BookDepth>,
    },
}

enum WriteMsg {
    Submit {
        order: Order,
        respond: oneshot::Sender<Result<Order, ValidationError>>,
    },
    Cancel {
        order_id: OrderId,
        signature: Signature,
        respond: oneshot::Sender<Result<OrderId, CancelError>>,
    },
    DeletePair {
        respond: oneshot::Sender<BookDepth>,
    },
}

enum ValidationOutcome {
    Order(Result<(), ValidationError>),
    Cancel(Result<(), ValidationError>),
    DeleteReady,
}

struct Pending {
    request: WriteMsg,
    handle: tokio::task::JoinHandle<ValidationOutcome>,
    deadline: Instant,
}

/// A cheap, cloneable handle to a running controller actor.
#[derive(Clone)]
pub struct ControllerHandle {
    pair: AssetPair,
    reads: mpsc::Sender<ReadMsg>,
    writes: mpsc::Sender<WriteMsg>,
}

impl ControllerHandle {
    pub fn pair(&self) -> AssetPair {
        self.pair
    }

    pub async fn submit(&self, order: Order) -> Result<Order, ValidationError> {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(WriteMsg::Submit { order, respond: tx }).await.is_err() {
            return Err(ValidationError::NonPositiveAmount);
        }
        rx.await.unwrap_or(Err(ValidationError::NonPositiveAmount))
    }

    pub async fn cancel(&self, order_id: OrderId, signature: Signature) -> Result<OrderId, CancelError> {
        let (tx, rx) = oneshot::channel();
        if self
            .writes
            .send(WriteMsg::Cancel {
                order_id,
                signature,
                respond: tx,
            })
            .await
            .is_err()
        {
            return Err(CancelError::OrderNotFound(order_id));
        }
        rx.await.unwrap_or(Err(CancelError::OrderNotFound(order_id)))
    }

    pub async fn depth(&self, depth: usize) -> BookDepth {
        let (tx, rx) = oneshot::channel();
        if self.reads.send(ReadMsg::Depth { depth, respond: tx }).await.is_err() {
            return BookDepth {
                pair: self.pair,
                bids: Vec::new(),
                asks: Vec::new(),
            };
        }
        rx.await.unwrap_or(BookDepth {
            pair: self.pair,
            bids: Vec::new(),
            asks: Vec::new(),
        })
    }

    /// Deletes this pair's journal/snapshot and stops the actor.
    pub async fn delete(&self) -> BookDepth {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(WriteMsg::DeletePair { respond: tx }).await.is_err() {
            return BookDepth {
                pair: self.pair,
                bids: Vec::new(),
                asks: Vec::new(),
            };
        }
        rx.await.unwrap_or(BookDepth {
            pair: self.pair,
            bids: Vec::new(),
            asks: Vec::new(),
        })
    }
}

struct Actor {
    pair: AssetPair,
    book: OrderBook,
    journal: Journal,
    journal_dir: PathBuf,
    snapshots_dir: PathBuf,
    history: HistoryHandle,
    settlement: Arc<dyn SettlementClient>,
    verifier: Arc<dyn SignatureVerifier>,
    signer: Arc<dyn MatcherSigner>,
    config: AppConfig,
}

/// Spawns a controller for `pair`, recovering its book from the latest
/// snapshot plus journal replay and sending `RecoverFromOrderBook` to the
/// history service for every resident order, as if the projection had
/// never seen them.
pub async fn spawn(
    pair: AssetPair,
    config: AppConfig,
    history: HistoryHandle,
    settlement: Arc<dyn SettlementClient>,
    verifier: Arc<dyn SignatureVerifier>,
    signer: Arc<dyn MatcherSigner>,
) -> anyhow::Result<ControllerHandle> {
    let journal_dir = config.journal_data_dir.clone();
    let snapshots_dir = config.snapshots_data_dir.clone();

    let (book, next_seq) = journal::recover(&journal_dir, &snapshots_dir, &pair).await?;
    history.recover_from_order_book(pair, book.clone()).await;

    let journal = Journal::open(&journal_dir, &pair, next_seq).await?;

    let actor = Actor {
        pair,
        book,
        journal,
        journal_dir,
        snapshots_dir,
        history,
        settlement,
        verifier,
        signer,
        config,
    };

    let (reads_tx, reads_rx) = mpsc::channel(256);
    let (writes_tx, writes_rx) = mpsc::channel(256);
    tokio::spawn(run(actor, reads_rx, writes_rx));

    Ok(ControllerHandle {
        pair,
        reads: reads_tx,
        writes: writes_tx,
    })
}

async fn run(mut actor: Actor, mut reads: mpsc::Receiver<ReadMsg>, mut writes: mpsc::Receiver<WriteMsg>) {
    let mut stash: VecDeque<WriteMsg> = VecDeque::new();
    let mut snapshot_tick = tokio::time::interval(actor.config.snapshots_interval);
    snapshot_tick.tick().await; // first tick fires immediately; skip it

    loop {
        let next_write = if let Some(w) = stash.pop_front() {
            Some(w)
        } else {
            None
        };

        let write_msg = if let Some(w) = next_write {
            w
        } else {
            tokio::select! {
                biased;
                Some(read) = reads.recv() => {
                    handle_read(&actor, read);
                    continue;
                }
                _ = snapshot_tick.tick() => {
                    spawn_snapshot_save(&actor);
                    continue;
                }
                maybe_write = writes.recv() => {
                    match maybe_write {
                        Some(w) => w,
                        None => break,
                    }
                }
            }
        };

        let pending = begin_validation(&actor, write_msg);
        if !drive_to_ready(&mut actor, pending, &mut reads, &mut writes, &mut stash, &mut snapshot_tick).await {
            break;
        }
    }
    info!(pair = %actor.pair, "controller actor exiting");
}

fn begin_validation(actor: &Actor, request: WriteMsg) -> Pending {
    let deadline = Instant::now() + actor.config.validation_timeout;
    let handle = match &request {
        WriteMsg::Submit { order, .. } => {
            if actor.book.len() >= actor.config.max_open_orders as usize {
                tokio::spawn(async { ValidationOutcome::Order(Err(ValidationError::OrderBookFull)) })
            } else {
                let history = actor.history.clone();
                let order = order.clone();
                let now = Utc::now();
                tokio::spawn(async move { ValidationOutcome::Order(history.validate_order(order, now).await) })
            }
        }
        WriteMsg::Cancel {
            order_id, signature, ..
        } => match resident_order(&actor.book, *order_id) {
            None => {
                let outcome = ValidationOutcome::Cancel(Err(ValidationError::InvalidSignature));
                tokio::spawn(async move { outcome })
            }
            Some(order) => {
                let verifier = actor.verifier.clone();
                let signature = *signature;
                tokio::spawn(async move {
                    let ok = verifier.verify(&order.id.0, &signature, &order.sender_public_key);
                    ValidationOutcome::Cancel(if ok {
                        Ok(())
                    } else {
                        Err(ValidationError::InvalidSignature)
                    })
                })
            }
        },
        WriteMsg::DeletePair { .. } => tokio::spawn(async { ValidationOutcome::DeleteReady }),
    };
    Pending {
        request,
        handle,
        deadline,
    }
}

fn resident_order(book: &OrderBook, id: OrderId) -> Option<Order> {
    for side in [Side::Buy, Side::Sell] {
        for lo in book.orders_on(side) {
            if lo.id() == id {
                return Some(lo.order.clone());
            }
        }
    }
    None
}

/// Drives a single `Ready -> AwaitingValidation -> Ready` cycle. Reads are
/// served as they arrive; further writes are stashed in arrival order and
/// drained before the actor accepts anything new from `writes`. Returns
/// `false` if the actor should stop (a fatal journal write, or the pair's
/// deletion).
async fn drive_to_ready(
    actor: &mut Actor,
    mut pending: Pending,
    reads: &mut mpsc::Receiver<ReadMsg>,
    writes: &mut mpsc::Receiver<WriteMsg>,
    stash: &mut VecDeque<WriteMsg>,
    snapshot_tick: &mut tokio::time::Interval,
) -> bool {
    loop {
        tokio::select! {
            biased;
            Some(read) = reads.recv() => {
                handle_read(actor, read);
            }
            _ = snapshot_tick.tick() => {
                spawn_snapshot_save(actor);
            }
            maybe_write = writes.recv(), if stash.len() < 4096 => {
                match maybe_write {
                    Some(w) => stash.push_back(w),
                    None => {}
                }
            }
            result = &mut pending.handle => {
                let outcome = result.unwrap_or(ValidationOutcome::Cancel(Err(ValidationError::InvalidSignature)));
                return apply_outcome(actor, pending.request, outcome).await;
            }
            _ = tokio::time::sleep_until(pending.deadline.into()) => {
                warn!(pair = %actor.pair, "validation request timed out, dropping");
                pending.handle.abort();
                return true;
            }
        }
    }
}

async fn apply_outcome(actor: &mut Actor, request: WriteMsg, outcome: ValidationOutcome) -> bool {
    match (request, outcome) {
        (WriteMsg::Submit { respond, .. }, ValidationOutcome::Order(Err(e))) => {
            metrics::record_order_rejected(e.to_string().as_str());
            let _ = respond.send(Err(e));
            true
        }
        (WriteMsg::Submit { order, respond }, ValidationOutcome::Order(Ok(()))) => {
            let pair_label = actor.pair.to_string();
            let side_label = match order.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            };
            metrics::record_order_submitted(&pair_label, side_label);
            let _ = respond.send(Ok(order.clone()));
            match run_matching_loop(actor, order).await {
                Ok(()) => true,
                Err(e) => {
                    error!(pair = %actor.pair, error = %e, "fatal controller error, stopping actor");
                    false
                }
            }
        }
        (WriteMsg::Cancel { respond, .. }, ValidationOutcome::Cancel(Err(_))) => {
            let _ = respond.send(Err(CancelError::CancelSignatureMismatch));
            true
        }
        (
            WriteMsg::Cancel {
                order_id, respond, ..
            },
            ValidationOutcome::Cancel(Ok(())),
        ) => {
            let event = actor.book.cancel(order_id);
            match event {
                Some(ev) => match persist_and_apply(actor, ev.clone()).await {
                    Ok(()) => {
                        actor.history.apply_book_event(actor.pair, ev).await;
                        metrics::record_order_cancelled(&actor.pair.to_string());
                        let _ = respond.send(Ok(order_id));
                        true
                    }
                    Err(e) => {
                        error!(pair = %actor.pair, error = %e, "fatal controller error during cancel");
                        let _ = respond.send(Err(CancelError::OrderNotFound(order_id)));
                        false
                    }
                },
                None => {
                    let _ = respond.send(Err(CancelError::OrderNotFound(order_id)));
                    true
                }
            }
        }
        (WriteMsg::DeletePair { respond }, ValidationOutcome::DeleteReady) => {
            if let Err(e) = journal::delete_pair_storage(&actor.journal_dir, &actor.snapshots_dir, &actor.pair).await
            {
                warn!(pair = %actor.pair, error = %e, "failed to delete pair storage");
            }
            let _ = respond.send(BookDepth {
                pair: actor.pair,
                bids: Vec::new(),
                asks: Vec::new(),
            });
            false
        }
        // Mismatched (request, outcome) pairs never occur: `begin_validation`
        // only ever produces the outcome variant matching its own request.
        (WriteMsg::Submit { respond, .. }, _) => {
            let _ = respond.send(Err(ValidationError::InvalidSignature));
            true
        }
        (WriteMsg::Cancel { respond, .. }, _) => {
            let _ = respond.send(Err(CancelError::OrderNotFound(OrderId([0u8; 32]))));
            true
        }
        (WriteMsg::DeletePair { respond }, _) => {
            let _ = respond.send(BookDepth {
                pair: actor.pair,
                bids: Vec::new(),
                asks: Vec::new(),
            });
            true
        }
    }
}

/// The matching loop, driven iteratively. Each
/// produced event is journaled (fatal on failure), applied to the in-memory
/// book, and forwarded to the history projection, in that order.
async fn run_matching_loop(actor: &mut Actor, order: Order) -> Result<(), ControllerError> {
    let mut incoming = LimitOrder::new(order);
    loop {
        let event = actor.book.match_order(&incoming);
        match event {
            BookEvent::OrderAdded(_) => {
                persist_and_apply(actor, event.clone()).await?;
                actor.history.apply_book_event(actor.pair, event).await;
                return Ok(());
            }
            BookEvent::OrderExecuted {
                submitted,
                counter,
                traded_amount,
            } => {
                let tx = build_exchange_transaction(
                    &submitted,
                    &counter,
                    traded_amount,
                    actor.config.order_match_tx_fee,
                    actor.signer.as_ref(),
                );
                let pair_label = actor.pair.to_string();
                metrics::record_settlement_submission(&pair_label);
                let accepted = actor
                    .settlement
                    .submit_exchange_transaction(&tx)
                    .await
                    .unwrap_or(false);

                if accepted {
                    let applied = BookEvent::OrderExecuted {
                        submitted: submitted.clone(),
                        counter: counter.clone(),
                        traded_amount,
                    };
                    persist_and_apply(actor, applied.clone()).await?;
                    actor.history.apply_book_event(actor.pair, applied).await;
                    metrics::record_trade_executed(&pair_label, traded_amount);
                    info!(pair = %actor.pair, amount = traded_amount, price = counter.price(), "exchange transaction created");

                    let remaining = submitted.remaining_amount.saturating_sub(traded_amount);
                    if remaining == 0 {
                        return Ok(());
                    }
                    if OrderBook::is_dust(remaining, submitted.price(), actor.config.price_asset_base_unit) {
                        let residual = submitted.partial(remaining);
                        let cancel_event = BookEvent::OrderCanceled(residual);
                        persist_and_apply(actor, cancel_event.clone()).await?;
                        actor.history.apply_book_event(actor.pair, cancel_event).await;
                        metrics::record_dust_residual(&pair_label);
                        return Ok(());
                    }
                    incoming = submitted.partial(remaining);
                    continue;
                } else {
                    metrics::record_settlement_rejection(&pair_label);
                    warn!(pair = %actor.pair, order = %counter.id(), "settlement rejected counter order, cancelling");
                    let cancel_event = BookEvent::OrderCanceled(counter.clone());
                    persist_and_apply(actor, cancel_event.clone()).await?;
                    actor.history.apply_book_event(actor.pair, cancel_event).await;
                    // The submitted side never traded; it retries with its
                    // full pre-step remaining against whatever is left.
                    incoming = submitted;
                    continue;
                }
            }
            BookEvent::OrderCanceled(_) => unreachable!("OrderBook::match_order never returns OrderCanceled"),
        }
    }
}

fn build_exchange_transaction(
    submitted: &LimitOrder,
    counter: &LimitOrder,
    traded_amount: u64,
    matcher_tx_fee: u64,
    signer: &dyn MatcherSigner,
) -> ExchangeTransaction {
    let (buy, sell) = match submitted.side() {
        Side::Buy => (submitted, counter),
        Side::Sell => (counter, submitted),
    };
    let buyer_matcher_fee = reserved_fee_for_units(&buy.order, traded_amount);
    let seller_matcher_fee = reserved_fee_for_units(&sell.order, traded_amount);
    let timestamp = Utc::now();

    let signed_bytes = ExchangeTransaction::signed_bytes(
        buy.id(),
        sell.id(),
        counter.price(),
        traded_amount,
        buyer_matcher_fee,
        seller_matcher_fee,
        matcher_tx_fee,
        timestamp,
    );
    let matcher_signature = signer.sign(&signed_bytes);

    ExchangeTransaction {
        buy_order_id: buy.id(),
        sell_order_id: sell.id(),
        price: counter.price(),
        amount: traded_amount,
        buyer_matcher_fee,
        seller_matcher_fee,
        matcher_tx_fee,
        timestamp,
        matcher_signature,
    }
}

async fn persist_and_apply(actor: &mut Actor, event: BookEvent) -> Result<(), ControllerError> {
    actor.journal.append(&event).await?;
    actor.book.update_state(event);
    Ok(())
}

fn handle_read(actor: &Actor, msg: ReadMsg) {
    match msg {
        ReadMsg::Depth { depth, respond } => {
            let depth = depth.min(actor.config.max_depth as usize);
            let bids = actor.book.depth(Side::Buy, depth);
            let asks = actor.book.depth(Side::Sell, depth);
            let pair_label = actor.pair.to_string();
            metrics::set_orderbook_depth(&pair_label, "buy", bids.len() as i64);
            metrics::set_orderbook_depth(&pair_label, "sell", asks.len() as i64);
            let view = BookDepth {
                pair: actor.pair,
                bids,
                asks,
            };
            let _ = respond.send(view);
        }
    }
}

fn spawn_snapshot_save(actor: &Actor) {
    let snapshots_dir = actor.snapshots_dir.clone();
    let pair = actor.pair;
    let seq = actor.journal.next_seq();
    let book = actor.book.clone();
    tokio::spawn(async move {
        if let Err(e) = journal::save_snapshot(&snapshots_dir, &pair, seq, &book).await {
            metrics::record_snapshot_write_failure();
            warn!(pair = %pair, error = %e, "snapshot save failed, will retry next interval");
        }
    });
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
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;

    fn test_config(journal_dir: PathBuf, snapshots_dir: PathBuf) -> AppConfig {
        AppConfig {
            enable: true,
            account: crate::signing::Address([0u8; 20]),
            bind_address: "127.0.0.1".into(),
            port: 0,
            min_order_fee: 1,
            order_match_tx_fee: 1,
            journal_data_dir: journal_dir,
            snapshots_data_dir: snapshots_dir,
            snapshots_interval: StdDuration::from_secs(3600),
            max_open_orders: 1000,
            price_assets: vec![AssetId::Native],
            predefined_pairs: vec![],
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

    fn make_order(kp: &TestKeypair, pair: AssetPair, side: Side, price: u64, amount: u64) -> Order {
        let now = Utc::now();
        let expiration = now + ChronoDuration::seconds(3600);
        let bytes = Order::signed_bytes(&kp.public, &pair, side, price, amount, now, expiration, 1);
        let signature = kp.sign(&bytes);
        Order::new(kp.public, pair, side, price, amount, now, expiration, 1, signature)
    }

    async fn spawn_test_controller(
        pair: AssetPair,
        settlement: Arc<dyn SettlementClient>,
    ) -> (ControllerHandle, tempfile::TempDir, tempfile::TempDir) {
        let journal_dir = tempdir().unwrap();
        let snapshots_dir = tempdir().unwrap();
        let config = test_config(journal_dir.path().to_path_buf(), snapshots_dir.path().to_path_buf());
        spawn_test_controller_with_config(pair, settlement, config).await
    }

    async fn spawn_test_controller_with_config(
        pair: AssetPair,
        settlement: Arc<dyn SettlementClient>,
        config: AppConfig,
    ) -> (ControllerHandle, tempfile::TempDir, tempfile::TempDir) {
        let journal_dir = tempdir().unwrap();
        let snapshots_dir = tempdir().unwrap();
        let config = AppConfig {
            journal_data_dir: journal_dir.path().to_path_buf(),
            snapshots_data_dir: snapshots_dir.path().to_path_buf(),
            ..config
        };

        let store = Arc::new(crate::history::store::HistoryStore::in_memory().await.unwrap());
        let verifier: Arc<dyn SignatureVerifier> = Arc::new(Secp256k1Verifier::default());
        let signer: Arc<dyn MatcherSigner> = Arc::new(TestKeypair::generate(99));
        let validator = Arc::new(OrderValidator::new(verifier.clone(), settlement.clone(), config.clone()));
        let history_handle = history::spawn(store, validator, settlement.clone(), config.clone());

        let handle = spawn(pair, config, history_handle, settlement, verifier, signer)
            .await
            .unwrap();
        (handle, journal_dir, snapshots_dir)
    }

    #[tokio::test]
    async fn crossing_orders_execute_and_settle() {
        let pair = AssetPair::new(AssetId::Issued([5u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(pair.amount_asset, 1_000_000);
        settlement.set_supply(pair.price_asset, 1_000_000);

        let seller = TestKeypair::generate(11);
        let buyer = TestKeypair::generate(12);
        let sell_order = make_order(&seller, pair, Side::Sell, 10, 100);
        let buy_order = make_order(&buyer, pair, Side::Buy, 10, 100);
        settlement.set_balance(sell_order.sender, pair.amount_asset, 1_000);
        settlement.set_balance(buy_order.sender, pair.price_asset, 1_000);

        let (handle, _journal_dir, _snapshots_dir) = spawn_test_controller(pair, settlement).await;

        let accepted_sell = handle.submit(sell_order).await;
        assert!(accepted_sell.is_ok());
        let depth_before = handle.depth(10).await;
        assert_eq!(depth_before.asks, vec![(10, 100)]);

        let accepted_buy = handle.submit(buy_order).await;
        assert!(accepted_buy.is_ok());

        let depth_after = handle.depth(10).await;
        assert!(depth_after.asks.is_empty());
        assert!(depth_after.bids.is_empty());
    }

    #[tokio::test]
    async fn resting_order_can_be_cancelled() {
        let pair = AssetPair::new(AssetId::Issued([6u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(pair.amount_asset, 1_000_000);
        settlement.set_supply(pair.price_asset, 1_000_000);

        let kp = TestKeypair::generate(13);
        let order = make_order(&kp, pair, Side::Buy, 10, 50);
        settlement.set_balance(order.sender, pair.price_asset, 10_000);

        let (handle, _journal_dir, _snapshots_dir) = spawn_test_controller(pair, settlement).await;
        let order = handle.submit(order).await.unwrap();

        let depth = handle.depth(10).await;
        assert_eq!(depth.bids, vec![(10, 50)]);

        let cancel_bytes = order.id.0;
        let signature = kp.sign(&cancel_bytes);
        let result = handle.cancel(order.id, signature).await;
        assert_eq!(result, Ok(order.id));

        let depth_after = handle.depth(10).await;
        assert!(depth_after.bids.is_empty());
    }

    #[tokio::test]
    async fn rejected_order_never_rests() {
        let pair = AssetPair::new(AssetId::Issued([7u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(pair.amount_asset, 1_000_000);
        settlement.set_supply(pair.price_asset, 1_000_000);

        let kp = TestKeypair::generate(14);
        let mut order = make_order(&kp, pair, Side::Buy, 10, 50);
        order.amount = 999; // tampered after signing, fails signature check

        let (handle, _journal_dir, _snapshots_dir) = spawn_test_controller(pair, settlement).await;
        let result = handle.submit(order).await;
        assert_eq!(result, Err(ValidationError::InvalidSignature));

        let depth = handle.depth(10).await;
        assert!(depth.bids.is_empty());
    }

    #[tokio::test]
    async fn order_beyond_max_open_orders_is_rejected() {
        let pair = AssetPair::new(AssetId::Issued([8u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(pair.amount_asset, 1_000_000);
        settlement.set_supply(pair.price_asset, 1_000_000);

        let journal_dir = tempdir().unwrap();
        let snapshots_dir = tempdir().unwrap();
        let mut config = test_config(journal_dir.path().to_path_buf(), snapshots_dir.path().to_path_buf());
        config.max_open_orders = 1;
        let (handle, _journal_dir, _snapshots_dir) =
            spawn_test_controller_with_config(pair, settlement, config).await;

        let resting_kp = TestKeypair::generate(21);
        let resting = make_order(&resting_kp, pair, Side::Buy, 10, 50);
        handle.submit(resting).await.unwrap();

        let overflow_kp = TestKeypair::generate(22);
        let overflow = make_order(&overflow_kp, pair, Side::Buy, 9, 50);
        let result = handle.submit(overflow).await;
        assert_eq!(result, Err(ValidationError::OrderBookFull));

        let depth = handle.depth(10).await;
        assert_eq!(depth.bids.len(), 1);
    }

    #[tokio::test]
    async fn partial_fill_then_completion_leaves_both_orders_filled() {
        let pair = AssetPair::new(AssetId::Issued([9u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(pair.amount_asset, 1_000_000);
        settlement.set_supply(pair.price_asset, 1_000_000);

        let seller = TestKeypair::generate(31);
        let sell_order = make_order(&seller, pair, Side::Sell, 10, 100);
        settlement.set_balance(sell_order.sender, pair.amount_asset, 1_000);

        let buyer1 = TestKeypair::generate(32);
        let buy1 = make_order(&buyer1, pair, Side::Buy, 10, 40);
        settlement.set_balance(buy1.sender, pair.price_asset, 1_000);

        let buyer2 = TestKeypair::generate(33);
        let buy2 = make_order(&buyer2, pair, Side::Buy, 10, 60);
        settlement.set_balance(buy2.sender, pair.price_asset, 1_000);

        let (handle, _journal_dir, _snapshots_dir) = spawn_test_controller(pair, settlement).await;

        handle.submit(sell_order).await.unwrap();
        handle.submit(buy1).await.unwrap();

        let depth_mid = handle.depth(10).await;
        assert_eq!(depth_mid.asks, vec![(10, 60)]);
        assert!(depth_mid.bids.is_empty());

        handle.submit(buy2).await.unwrap();

        let depth_final = handle.depth(10).await;
        assert!(depth_final.asks.is_empty());
        assert!(depth_final.bids.is_empty());
    }

    #[tokio::test]
    async fn settlement_rejection_cancels_counter_and_submitted_rests() {
        let pair = AssetPair::new(AssetId::Issued([10u8; 32]), AssetId::Native);
        let settlement = Arc::new(FakeSettlementClient::default());
        settlement.set_supply(pair.amount_asset, 1_000_000);
        settlement.set_supply(pair.price_asset, 1_000_000);

        let seller = TestKeypair::generate(41);
        let sell_order = make_order(&seller, pair, Side::Sell, 10, 100);
        settlement.set_balance(sell_order.sender, pair.amount_asset, 1_000);

        let (handle, _journal_dir, _snapshots_dir) =
            spawn_test_controller(pair, settlement.clone()).await;
        handle.submit(sell_order).await.unwrap();

        let buyer = TestKeypair::generate(42);
        let buy_order = make_order(&buyer, pair, Side::Buy, 10, 100);
        settlement.set_balance(buy_order.sender, pair.price_asset, 1_000);

        settlement.reject_next_submissions();
        let accepted_buy = handle.submit(buy_order).await;
        assert!(accepted_buy.is_ok());

        // The resting sell was cancelled as the counter of the rejected trade;
        // the incoming buy found nothing left to match and now rests instead.
        let depth = handle.depth(10).await;
        assert!(depth.asks.is_empty());
        assert_eq!(depth.bids, vec![(10, 100)]);
    }
}
