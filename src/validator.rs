//! Pre-trade order validation: signature, timestamp window, amount/price
//! positivity, asset whitelist, and tradable balance checks.
//!
//! Runs inside the `AwaitingValidation` request the controller sends; it is
//! the only place signature, timestamp, and balance checks happen. The book
//! is never touched here — a rejection here never mutates state.

use crate::config::AppConfig;
use crate::domain::order::{Order, Side};
use crate::error::ValidationError;
use crate::settlement::SettlementClient;
use crate::signing::{Signature, SignatureVerifier};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct OrderValidator {
    verifier: Arc<dyn SignatureVerifier>,
    settlement: Arc<dyn SettlementClient>,
    config: AppConfig,
}

impl OrderValidator {
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        settlement: Arc<dyn SettlementClient>,
        config: AppConfig,
    ) -> Self {
        OrderValidator {
            verifier,
            settlement,
            config,
        }
    }

    /// Validates a freshly-submitted order against format, signature, and
    /// tradable-balance rules. On success returns the order unchanged — the
    /// matching loop consumes it as-is.
    pub async fn validate_order(
        &self,
        order: &Order,
        now: DateTime<Utc>,
        reserved_before: u64,
    ) -> Result<(), ValidationError> {
        if order.amount == 0 {
            return Err(ValidationError::NonPositiveAmount);
        }
        if order.price == 0 {
            return Err(ValidationError::NonPositivePrice);
        }
        if order.matcher_fee < self.config.min_order_fee {
            return Err(ValidationError::InsufficientMatcherFee {
                fee: order.matcher_fee,
                min_required: self.config.min_order_fee,
            });
        }

        let diff = (order.timestamp - now).num_milliseconds().unsigned_abs();
        if diff > self.config.max_timestamp_diff.as_millis() as u64 {
            return Err(ValidationError::TimestampOutOfWindow {
                timestamp: order.timestamp.timestamp_millis(),
                now: now.timestamp_millis(),
            });
        }
        if order.expiration <= now {
            return Err(ValidationError::OrderExpired {
                expiration: order.expiration.timestamp_millis(),
                now: now.timestamp_millis(),
            });
        }
        if order.expiration <= order.timestamp {
            return Err(ValidationError::NonPositiveLifetime);
        }
        let lifetime = order.expiration - order.timestamp;
        if lifetime.num_milliseconds().unsigned_abs() > self.config.max_order_lifetime.as_millis() as u64 {
            return Err(ValidationError::ExpirationTooFar);
        }

        for &blacklisted in &self.config.blacklisted_assets {
            if order.pair.amount_asset == blacklisted || order.pair.price_asset == blacklisted {
                return Err(ValidationError::BlacklistedAsset(blacklisted));
            }
        }

        let signed_bytes = Order::signed_bytes(
            &order.sender_public_key,
            &order.pair,
            order.side,
            order.price,
            order.amount,
            order.timestamp,
            order.expiration,
            order.matcher_fee,
        );
        if !self
            .verifier
            .verify(&signed_bytes, &order.signature, &order.sender_public_key)
        {
            return Err(ValidationError::InvalidSignature);
        }

        for asset in [order.pair.amount_asset, order.pair.price_asset] {
            let supply = self
                .settlement
                .total_supply(asset)
                .await
                .map_err(|_| ValidationError::UnknownAsset(asset))?;
            if supply == 0 {
                return Err(ValidationError::UnknownAsset(asset));
            }
        }

        let (asset, required) = reservation_for(order);
        let balance = self
            .settlement
            .balance_of(order.sender, asset)
            .await
            .map_err(|_| ValidationError::UnknownAsset(asset))?;
        let available = balance.saturating_sub(reserved_before);
        if available < required {
            return Err(ValidationError::InsufficientTradableBalance {
                address: order.sender,
                asset,
                available,
                required,
            });
        }

        Ok(())
    }

    /// Validates a cancellation request: the cancel signature must verify
    /// under the order's own sender.
    pub fn validate_cancel(
        &self,
        order: &Order,
        cancel_signature: &Signature,
    ) -> Result<(), ValidationError> {
        let message = order.id.0;
        if !self
            .verifier
            .verify(&message, cancel_signature, &order.sender_public_key)
        {
            return Err(ValidationError::InvalidSignature);
        }
        Ok(())
    }
}

/// The asset and amount an order's acceptance reserves:
/// a Buy reserves `amount * price` of the price asset plus the matcher fee in
/// the native asset; a Sell reserves `amount` of the amount asset plus the fee.
pub fn reservation_for(order: &Order) -> (crate::domain::AssetId, u64) {
    reserved_amount_for_units(order, order.amount)
}

/// The matcher-fee reservation, always in the native asset, tracked
/// separately since it shares an asset with neither side in the general case.
pub fn fee_reservation(order: &Order) -> u64 {
    order.matcher_fee
}

/// The primary-side reservation for `units` of `order.amount` (not
/// necessarily the whole order) — used both for the full reservation on
/// acceptance (`units == order.amount`) and for partial releases on
/// execution/cancellation (`units` = traded or unfilled amount).
pub fn reserved_amount_for_units(order: &Order, units: u64) -> (crate::domain::AssetId, u64) {
    match order.side {
        Side::Buy => (order.pair.price_asset, units.saturating_mul(order.price)),
        Side::Sell => (order.pair.amount_asset, units),
    }
}

/// The matcher-fee share attributable to `units` of `order.amount`, prorated
/// linearly and floored. `order.amount` is never zero for a validated order.
pub fn reserved_fee_for_units(order: &Order, units: u64) -> u64 {
    if order.amount == 0 {
        return 0;
    }
    ((order.matcher_fee as u128 * units as u128) / order.amount as u128) as u64
}

/// The full `OpenPortfolio` delta (primary asset + native-asset fee share)
/// for `units` of `order.amount`, signed by `sign` (+1 to reserve, -1 to
/// release). This is the single place both the acceptance reservation and
/// every later partial release are computed, so they can never drift apart.
pub fn reservation_delta(order: &Order, units: u64, sign: i64) -> crate::domain::portfolio::OpenPortfolio {
    use crate::domain::asset::AssetId;
    use crate::domain::portfolio::OpenPortfolio;

    let (asset, amount) = reserved_amount_for_units(order, units);
    let fee = reserved_fee_for_units(order, units);
    let primary = OpenPortfolio::single(asset, sign * amount as i64);
    let fee_delta = OpenPortfolio::single(AssetId::Native, sign * fee as i64);
    primary.combine(fee_delta)
}
