//! Database module for PostgreSQL operations using SQLx
//! Uses runtime query checking (no compile-time DATABASE_URL needed)

mod models;

pub use models::*;

use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Record not found")]
    NotFound,
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        info!("Database pool created with max 10 connections");

        Ok(Self { pool: Arc::new(pool) })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist and seed the singleton account.
    pub async fn init_schema(&self, starting_balance: Decimal) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                quantity BIGINT NOT NULL,
                avg_price NUMERIC NOT NULL,
                notes TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                quantity BIGINT NOT NULL,
                price NUMERIC NOT NULL,
                order_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account (
                id INT PRIMARY KEY CHECK (id = 1),
                balance NUMERIC NOT NULL
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                trade_id BIGSERIAL PRIMARY KEY,
                symbol TEXT NOT NULL,
                quantity BIGINT NOT NULL,
                buy_price NUMERIC NOT NULL,
                sell_price NUMERIC NOT NULL,
                pnl NUMERIC NOT NULL,
                closed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        // Seed the account exactly once; later boots keep the running balance.
        let seeded = sqlx::query(
            r#"
            INSERT INTO account (id, balance)
            VALUES (1, $1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(starting_balance)
        .execute(self.pool())
        .await?;

        if seeded.rows_affected() > 0 {
            info!("Account seeded with starting balance {}", starting_balance);
        }

        Ok(())
    }

    /// Begin a ledger transaction. All reads-then-writes of one fill must go
    /// through the same transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DbError> {
        Ok(self.pool.begin().await?)
    }

    // ==========================================
    // Account
    // ==========================================

    pub async fn get_balance(&self) -> Result<Decimal, DbError> {
        let row: (Decimal,) = sqlx::query_as("SELECT balance FROM account WHERE id = 1")
            .fetch_optional(self.pool())
            .await?
            .ok_or(DbError::NotFound)?;
        Ok(row.0)
    }

    pub async fn adjust_balance_tx(
        tx: &mut Transaction<'static, Postgres>,
        delta: Decimal,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE account SET balance = balance + $1 WHERE id = 1")
            .bind(delta)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // ==========================================
    // Positions
    // ==========================================

    pub async fn get_positions(&self) -> Result<Vec<Position>, DbError> {
        let rows = sqlx::query(
            "SELECT symbol, quantity, avg_price, notes FROM positions ORDER BY symbol",
        )
        .fetch_all(self.pool())
        .await?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(Position::from_row(&row)?);
        }
        Ok(positions)
    }

    /// Symbols with open positions, used to seed the subscription set.
    pub async fn get_position_symbols(&self) -> Result<Vec<String>, DbError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT symbol FROM positions")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>, DbError> {
        let row = sqlx::query(
            "SELECT symbol, quantity, avg_price, notes FROM positions WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(Position::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn upsert_position_tx(
        tx: &mut Transaction<'static, Postgres>,
        symbol: &str,
        quantity: i64,
        avg_price: Decimal,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, quantity, avg_price, notes)
            VALUES ($1, $2, $3, '')
            ON CONFLICT (symbol) DO UPDATE SET
                quantity = $2,
                avg_price = $3
            "#,
        )
        .bind(symbol)
        .bind(quantity)
        .bind(avg_price)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn delete_position_tx(
        tx: &mut Transaction<'static, Postgres>,
        symbol: &str,
    ) -> Result<(), DbError> {
        sqlx::query("DELETE FROM positions WHERE symbol = $1")
            .bind(symbol)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn update_notes(&self, symbol: &str, notes: &str) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE positions SET notes = $2 WHERE symbol = $1")
            .bind(symbol)
            .bind(notes)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // ==========================================
    // Orders
    // ==========================================

    pub async fn insert_order_tx(
        tx: &mut Transaction<'static, Postgres>,
        order: &Order,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, symbol, quantity, price, order_type, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.symbol)
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.order_type.as_str())
        .bind(order.status.as_str())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn mark_order_executed_tx(
        tx: &mut Transaction<'static, Postgres>,
        order_id: &str,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE orders SET status = 'EXECUTED' WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn get_pending_orders(&self) -> Result<Vec<Order>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, symbol, quantity, price, order_type, status, created_at
            FROM orders
            WHERE status = 'PENDING'
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(Order::from_row(&row)?);
        }
        Ok(orders)
    }

    // ==========================================
    // Trade history
    // ==========================================

    pub async fn insert_trade_tx(
        tx: &mut Transaction<'static, Postgres>,
        symbol: &str,
        quantity: i64,
        buy_price: Decimal,
        sell_price: Decimal,
        pnl: Decimal,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO trade_history (symbol, quantity, buy_price, sell_price, pnl)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(symbol)
        .bind(quantity)
        .bind(buy_price)
        .bind(sell_price)
        .bind(pnl)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_trade_history(&self) -> Result<Vec<TradeRecord>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT trade_id, symbol, quantity, buy_price, sell_price, pnl, closed_at
            FROM trade_history
            ORDER BY trade_id
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut trades = Vec::new();
        for row in rows {
            trades.push(TradeRecord::from_row(&row)?);
        }
        Ok(trades)
    }
}
