//! Fill arithmetic
//!
//! Pure computation of what a fill does to the ledgers: position delta,
//! realized P&L, cash delta and the resulting subscription action. The
//! matching engine applies the outcome inside a single transaction; nothing
//! here touches the store.

use crate::db::Position;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FillError {
    #[error("no open position in {symbol} to sell")]
    NoPosition { symbol: String },
    #[error("sell of {requested} exceeds held quantity {held} in {symbol}")]
    OverClose { symbol: String, held: i64, requested: i64 },
}

/// Realized trade emitted when a fill closes a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTrade {
    pub quantity: i64,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub pnl: Decimal,
}

/// What happens to the position row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionChange {
    /// No prior position; create one at the fill price.
    Open { quantity: i64, avg_price: Decimal },
    /// Existing position updated in place.
    Update { quantity: i64, avg_price: Decimal },
    /// Quantity reached zero; delete the row and record the trade.
    Close(ClosedTrade),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Outcome of one fill, applied atomically by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillOutcome {
    pub position: PositionChange,
    /// Applied to the account balance: `-(quantity * price)`, so sells
    /// credit cash.
    pub cash_delta: Decimal,
    /// Buys subscribe, closes unsubscribe, partial reductions change
    /// nothing.
    pub subscription: Option<SubscriptionAction>,
}

/// Compute the effect of filling `quantity` of `symbol` at `price` against
/// the current position.
///
/// Buys blend the average price quantity-weighted; sells never change it.
/// Selling without a position and selling past zero are rejected: the ledger
/// has no cost basis for a short, so short-producing fills are unsupported.
pub fn apply_fill(
    symbol: &str,
    position: Option<&Position>,
    quantity: i64,
    price: Decimal,
) -> Result<FillOutcome, FillError> {
    debug_assert!(quantity != 0, "zero-quantity orders are rejected upstream");

    let cash_delta = -(Decimal::from(quantity) * price);

    let position = match position {
        None if quantity > 0 => {
            return Ok(FillOutcome {
                position: PositionChange::Open { quantity, avg_price: price },
                cash_delta,
                subscription: Some(SubscriptionAction::Subscribe),
            });
        }
        None => {
            return Err(FillError::NoPosition { symbol: symbol.to_string() });
        }
        Some(p) => p,
    };

    let new_quantity = position.quantity + quantity;

    if quantity > 0 {
        // Adding to a long: quantity-weighted cost-basis blend.
        let blended = (Decimal::from(position.quantity) * position.avg_price
            + Decimal::from(quantity) * price)
            / Decimal::from(new_quantity);
        return Ok(FillOutcome {
            position: PositionChange::Update { quantity: new_quantity, avg_price: blended },
            cash_delta,
            subscription: Some(SubscriptionAction::Subscribe),
        });
    }

    if new_quantity < 0 {
        return Err(FillError::OverClose {
            symbol: symbol.to_string(),
            held: position.quantity,
            requested: -quantity,
        });
    }

    if new_quantity == 0 {
        let sold = -quantity;
        let pnl = (price - position.avg_price) * Decimal::from(sold);
        return Ok(FillOutcome {
            position: PositionChange::Close(ClosedTrade {
                quantity: sold,
                buy_price: position.avg_price,
                sell_price: price,
                pnl,
            }),
            cash_delta,
            subscription: Some(SubscriptionAction::Unsubscribe),
        });
    }

    // Partial reduction: average price unchanged, subscription untouched.
    Ok(FillOutcome {
        position: PositionChange::Update { quantity: new_quantity, avg_price: position.avg_price },
        cash_delta,
        subscription: None,
    })
}

/// Whether a pending limit order's condition is met by a fresh quote.
/// Buys fill at or below the limit, sells at or above it.
pub fn limit_crossed(quantity: i64, limit_price: Decimal, quote: Decimal) -> bool {
    if quantity > 0 {
        quote <= limit_price
    } else {
        quote >= limit_price
    }
}
