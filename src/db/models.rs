//! Database row types matching the PostgreSQL schema

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

/// Order side and trigger semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(OrderType::Market),
            "LIMIT" => Some(OrderType::Limit),
            _ => None,
        }
    }
}

/// Lifecycle: PENDING -> EXECUTED, exactly once. EXECUTED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "EXECUTED")]
    Executed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Executed => "EXECUTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "EXECUTED" => Some(OrderStatus::Executed),
            _ => None,
        }
    }
}

/// A simulated order. `quantity > 0` is a buy, `< 0` a sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub quantity: i64,
    pub price: Decimal,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub created_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for Order {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let order_type: String = row.try_get("order_type")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            order_id: row.try_get("order_id")?,
            symbol: row.try_get("symbol")?,
            quantity: row.try_get("quantity")?,
            price: row.try_get("price")?,
            order_type: OrderType::parse(&order_type)
                .ok_or_else(|| sqlx::Error::Decode(format!("order_type={}", order_type).into()))?,
            status: OrderStatus::parse(&status)
                .ok_or_else(|| sqlx::Error::Decode(format!("status={}", status).into()))?,
            created_at: row.try_get("created_at").ok(),
        })
    }
}

/// An open long position. A row exists iff net quantity > 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub notes: String,
}

impl Position {
    /// Cost basis of the position at its weighted average price.
    pub fn position_size(&self) -> Decimal {
        Decimal::from(self.quantity) * self.avg_price
    }
}

impl<'r> FromRow<'r, PgRow> for Position {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            symbol: row.try_get("symbol")?,
            quantity: row.try_get("quantity")?,
            avg_price: row.try_get("avg_price")?,
            notes: row.try_get::<Option<String>, _>("notes")?.unwrap_or_default(),
        })
    }
}

/// Realized trade, appended when a position is closed. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub pnl: Decimal,
    pub closed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for TradeRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            trade_id: row.try_get("trade_id")?,
            symbol: row.try_get("symbol")?,
            quantity: row.try_get("quantity")?,
            buy_price: row.try_get("buy_price")?,
            sell_price: row.try_get("sell_price")?,
            pnl: row.try_get("pnl")?,
            closed_at: row.try_get("closed_at").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_type_round_trip() {
        assert_eq!(OrderType::parse("MARKET"), Some(OrderType::Market));
        assert_eq!(OrderType::parse("LIMIT"), Some(OrderType::Limit));
        assert_eq!(OrderType::parse("STOP"), None);
        assert_eq!(OrderType::Limit.as_str(), "LIMIT");
    }

    #[test]
    fn test_position_size() {
        let pos = Position {
            symbol: "NSE:SBIN-EQ".to_string(),
            quantity: 10,
            avg_price: dec!(812.40),
            notes: String::new(),
        };
        assert_eq!(pos.position_size(), dec!(8124.00));
    }
}
