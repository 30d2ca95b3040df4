//! Domain error taxonomy, one `thiserror` enum per subsystem boundary.

use crate::domain::{AssetId, AssetPair, OrderId};
use thiserror::Error;

/// Pre-trade validation failures. Never mutate the book; always reported
/// back to the caller as a rejection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("order expired at {expiration} (now {now})")]
    OrderExpired { expiration: i64, now: i64 },
    #[error("timestamp {timestamp} outside the allowed window around {now}")]
    TimestampOutOfWindow { timestamp: i64, now: i64 },
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("price must be positive")]
    NonPositivePrice,
    #[error("asset {0} is blacklisted")]
    BlacklistedAsset(AssetId),
    #[error("asset {0} is unknown to the settlement layer")]
    UnknownAsset(AssetId),
    #[error("insufficient tradable balance for {address} in asset {asset}: have {available}, need {required}")]
    InsufficientTradableBalance {
        address: crate::signing::Address,
        asset: AssetId,
        available: u64,
        required: u64,
    },
    #[error("matcher fee {fee} is below the configured minimum {min_required}")]
    InsufficientMatcherFee { fee: u64, min_required: u64 },
    #[error("expiration must be after timestamp")]
    NonPositiveLifetime,
    #[error("order lifetime exceeds the configured horizon")]
    ExpirationTooFar,
    #[error("order book is full, at the configured maxOpenOrders limit")]
    OrderBookFull,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CancelError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("cancel signature does not match order sender")]
    CancelSignatureMismatch,
}

/// Dispatcher-level routing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid AssetPair: both sides name the same asset")]
    InvalidPair,
    #[error("Invalid AssetPair ordering, should be reversed: {0}")]
    InvalidPairOrdering(AssetPair),
    #[error("asset {0} has no recorded supply")]
    UnknownAsset(AssetId),
    #[error("failed to create controller: {0}")]
    ControllerSpawnFailed(String),
}

/// Controller-internal failures. `ValidationTimeout` never reaches a caller
/// (the caller simply never gets a response); it exists so the controller
/// can log it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("validation request timed out")]
    ValidationTimeout,
    #[error("settlement transaction rejected for order {0}")]
    SettlementRejected(OrderId),
    #[error("residual amount {remaining} at price {price} is dust (not a whole price-asset unit)")]
    DustResidual { remaining: u64, price: u64 },
    #[error("event log write failed: {0}")]
    EventLogWrite(String),
    #[error("snapshot write failed: {0}")]
    SnapshotWrite(String),
}
