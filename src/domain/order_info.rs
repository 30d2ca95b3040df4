//! `OrderInfo`: the projected status of a single order, and its combine
//! monoid, associative and commutative so replayed events converge
//! regardless of application order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub amount: u64,
    pub filled: u64,
    pub canceled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Accepted,
    PartiallyFilled { filled: u64 },
    Filled,
    Cancelled { filled: u64 },
}

impl OrderInfo {
    pub fn status(&self) -> OrderStatus {
        if self.canceled {
            OrderStatus::Cancelled {
                filled: self.filled,
            }
        } else if self.filled == self.amount {
            OrderStatus::Filled
        } else if self.filled > 0 {
            OrderStatus::PartiallyFilled {
                filled: self.filled,
            }
        } else {
            OrderStatus::Accepted
        }
    }

    /// Combines two deltas (or a delta and an accumulated value) for the same
    /// order id. Commutative and associative: `amount` takes the max seen so
    /// far (an `OrderAdded` delta reports the order's full amount, a later
    /// `OrderExecuted` delta does too, so max is a no-op once it has been
    /// seen once), `filled` accumulates, `canceled` is sticky.
    pub fn combine(self, other: OrderInfo) -> OrderInfo {
        OrderInfo {
            amount: self.amount.max(other.amount),
            filled: self.filled + other.filled,
            canceled: self.canceled || other.canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(amount: u64, filled: u64, canceled: bool) -> OrderInfo {
        OrderInfo {
            amount,
            filled,
            canceled,
        }
    }

    #[test]
    fn combine_is_commutative() {
        let a = info(100, 30, false);
        let b = info(100, 20, false);
        assert_eq!(a.combine(b), b.combine(a));
    }

    #[test]
    fn combine_is_associative() {
        let a = info(100, 10, false);
        let b = info(100, 20, false);
        let c = info(100, 5, true);
        assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
    }

    #[test]
    fn status_transitions_follow_filled_and_canceled() {
        assert_eq!(info(100, 0, false).status(), OrderStatus::Accepted);
        assert_eq!(
            info(100, 40, false).status(),
            OrderStatus::PartiallyFilled { filled: 40 }
        );
        assert_eq!(info(100, 100, false).status(), OrderStatus::Filled);
        assert_eq!(
            info(100, 40, true).status(),
            OrderStatus::Cancelled { filled: 40 }
        );
    }

    #[test]
    fn repeated_combine_of_same_delta_is_not_idempotent_by_itself() {
        // Combine is a sum over filled; callers must apply each event's delta
        // exactly once. Re-deriving from scratch twice is the idempotence the
        // history service relies on (RecoverFromOrderBook), not re-combining
        // the same delta twice.
        let base = info(100, 0, false);
        let delta = info(100, 40, false);
        let once = base.combine(delta);
        let twice = once.combine(delta);
        assert_ne!(once, twice);
    }
}
