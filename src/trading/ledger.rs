//! Ledger persistence seam
//!
//! The engine talks to the store through this trait so the fill paths can
//! be exercised against an in-memory double. The Postgres implementation
//! commits each fill outcome in a single transaction; the reads ahead of it
//! are consistent because the engine's fill lock serializes every writer.

use crate::db::{Database, DbError, Order, OrderType, Position};
use crate::trading::fill::{FillOutcome, PositionChange};
use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self) -> Result<Decimal, DbError>;

    async fn position(&self, symbol: &str) -> Result<Option<Position>, DbError>;

    async fn pending_orders(&self) -> Result<Vec<Order>, DbError>;

    /// Insert a PENDING order. No ledger mutation.
    async fn insert_pending_order(&self, order: &Order) -> Result<(), DbError>;

    /// Persist an executed order together with its fill outcome: the order
    /// row, the position change, any realized trade, and the balance
    /// adjustment, all or nothing.
    async fn commit_fill(&self, order: &Order, outcome: &FillOutcome) -> Result<(), DbError>;
}

#[async_trait]
impl Ledger for Database {
    async fn balance(&self) -> Result<Decimal, DbError> {
        self.get_balance().await
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>, DbError> {
        self.get_position(symbol).await
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, DbError> {
        self.get_pending_orders().await
    }

    async fn insert_pending_order(&self, order: &Order) -> Result<(), DbError> {
        let mut tx = self.begin().await?;
        Database::insert_order_tx(&mut tx, order).await?;
        tx.commit().await.map_err(DbError::from)
    }

    async fn commit_fill(&self, order: &Order, outcome: &FillOutcome) -> Result<(), DbError> {
        let mut tx = self.begin().await?;

        // Market fills create the order row; limit fills flip an existing
        // PENDING row.
        match order.order_type {
            OrderType::Market => Database::insert_order_tx(&mut tx, order).await?,
            OrderType::Limit => {
                Database::mark_order_executed_tx(&mut tx, &order.order_id).await?
            }
        }

        match &outcome.position {
            PositionChange::Open { quantity, avg_price }
            | PositionChange::Update { quantity, avg_price } => {
                Database::upsert_position_tx(&mut tx, &order.symbol, *quantity, *avg_price)
                    .await?;
            }
            PositionChange::Close(trade) => {
                Database::insert_trade_tx(
                    &mut tx,
                    &order.symbol,
                    trade.quantity,
                    trade.buy_price,
                    trade.sell_price,
                    trade.pnl,
                )
                .await?;
                Database::delete_position_tx(&mut tx, &order.symbol).await?;
            }
        }

        Database::adjust_balance_tx(&mut tx, outcome.cash_delta).await?;
        tx.commit().await.map_err(DbError::from)
    }
}
