//! Orders and the mutable view a matching loop iterates over.

use crate::domain::asset::AssetPair;
use crate::signing::{Address, PublicKey, Signature};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Content-hash order id: SHA3-256 over the order's signed fields, hex-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub [u8; 32]);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An immutable, signed limit order as submitted by a client.
///
/// `id` is derived from the remaining fields, not chosen by the sender: two
/// orders with identical (sender, pair, side, price, amount, timestamp,
/// expiration, matcher_fee) collide, which is intentional — it makes
/// resubmission of an unchanged order idempotent at the book level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub sender_public_key: PublicKey,
    pub sender: Address,
    pub pair: AssetPair,
    pub side: Side,
    /// Price-asset base units per one amount-asset unit, fixed-point integer.
    pub price: u64,
    /// Amount-asset base units.
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub matcher_fee: u64,
    pub signature: Signature,
}

impl Order {
    /// Bytes the signature is computed over and the id is hashed from. Order
    /// matters: this is the canonical encoding, not a serde passthrough.
    pub fn signed_bytes(
        sender_public_key: &PublicKey,
        pair: &AssetPair,
        side: Side,
        price: u64,
        amount: u64,
        timestamp: DateTime<Utc>,
        expiration: DateTime<Utc>,
        matcher_fee: u64,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&sender_public_key.0);
        buf.extend_from_slice(pair.amount_asset.to_string().as_bytes());
        buf.push(0);
        buf.extend_from_slice(pair.price_asset.to_string().as_bytes());
        buf.push(matches!(side, Side::Buy) as u8);
        buf.extend_from_slice(&price.to_be_bytes());
        buf.extend_from_slice(&amount.to_be_bytes());
        buf.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
        buf.extend_from_slice(&expiration.timestamp_millis().to_be_bytes());
        buf.extend_from_slice(&matcher_fee.to_be_bytes());
        buf
    }

    pub fn derive_id(signed_bytes: &[u8]) -> OrderId {
        let digest = Sha3_256::digest(signed_bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        OrderId(out)
    }

    /// Constructs an order and derives its id from the signed fields, without
    /// verifying the signature — verification is the validator's job, against
    /// a [`crate::signing::SignatureVerifier`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender_public_key: PublicKey,
        pair: AssetPair,
        side: Side,
        price: u64,
        amount: u64,
        timestamp: DateTime<Utc>,
        expiration: DateTime<Utc>,
        matcher_fee: u64,
        signature: Signature,
    ) -> Self {
        let bytes = Self::signed_bytes(
            &sender_public_key,
            &pair,
            side,
            price,
            amount,
            timestamp,
            expiration,
            matcher_fee,
        );
        let id = Self::derive_id(&bytes);
        let sender = Address::from_public_key(&sender_public_key);
        Order {
            id,
            sender_public_key,
            sender,
            pair,
            side,
            price,
            amount,
            timestamp,
            expiration,
            matcher_fee,
            signature,
        }
    }
}

/// A mutable view over an [`Order`] tracked while it is resident in the book
/// or being driven through the matching loop. The `Order` itself never
/// changes; only `remaining_amount` does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub order: Order,
    pub remaining_amount: u64,
}

impl LimitOrder {
    pub fn new(order: Order) -> Self {
        let remaining_amount = order.amount;
        LimitOrder {
            order,
            remaining_amount,
        }
    }

    pub fn id(&self) -> OrderId {
        self.order.id
    }

    pub fn side(&self) -> Side {
        self.order.side
    }

    pub fn price(&self) -> u64 {
        self.order.price
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_amount == 0
    }

    /// A residual view of the same order with a reduced remaining amount.
    pub fn partial(&self, remaining_amount: u64) -> Self {
        LimitOrder {
            order: self.order.clone(),
            remaining_amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetId;
    use crate::signing::test_support::TestKeypair;

    fn sample_pair() -> AssetPair {
        AssetPair::new(AssetId::Issued([1u8; 32]), AssetId::Native)
    }

    fn sample_order(keypair: &TestKeypair, amount: u64) -> Order {
        let pair = sample_pair();
        let timestamp = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_000);
        let expiration = timestamp + chrono::Duration::seconds(3_600);
        let bytes = Order::signed_bytes(
            &keypair.public,
            &pair,
            Side::Buy,
            10,
            amount,
            timestamp,
            expiration,
            1,
        );
        let signature = keypair.sign(&bytes);
        Order::new(
            keypair.public,
            pair,
            Side::Buy,
            10,
            amount,
            timestamp,
            expiration,
            1,
            signature,
        )
    }

    #[test]
    fn identical_fields_collide_on_id() {
        let kp = TestKeypair::generate(1);
        let a = sample_order(&kp, 100);
        let b = sample_order(&kp, 100);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn different_amount_changes_id() {
        let kp = TestKeypair::generate(2);
        let a = sample_order(&kp, 100);
        let b = sample_order(&kp, 200);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn limit_order_starts_unfilled_with_full_remaining() {
        let kp = TestKeypair::generate(3);
        let order = sample_order(&kp, 50);
        let lo = LimitOrder::new(order.clone());
        assert_eq!(lo.remaining_amount, 50);
        assert!(!lo.is_filled());
    }

    #[test]
    fn partial_preserves_order_and_reduces_remaining() {
        let kp = TestKeypair::generate(4);
        let order = sample_order(&kp, 50);
        let lo = LimitOrder::new(order);
        let residual = lo.partial(20);
        assert_eq!(residual.remaining_amount, 20);
        assert_eq!(residual.order.id, lo.order.id);
    }
}
