//! Matching engine
//!
//! The only mutator of ledger state and the only driver of subscription
//! changes. Market orders execute synchronously against a fresh quote; limit
//! orders are inserted PENDING and picked up by the background scan, which
//! fills them at the limit price once the market crosses it.
//!
//! Every fill runs under one fill lock and commits through
//! [`Ledger::commit_fill`] atomically: the request path and the scan both
//! touch the shared account balance, so no two fills may interleave, and an
//! order is never left EXECUTED without its ledger mutation committed.

use crate::db::{DbError, Order, OrderStatus, OrderType};
use crate::quotes::{QuoteError, QuoteGateway};
use crate::session::SessionGate;
use crate::stream::SubscriptionManager;
use crate::trading::fill::{self, FillError, FillOutcome, SubscriptionAction};
use crate::trading::ledger::Ledger;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

const SCAN_INTERVAL_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Market is closed")]
    MarketClosed,
    #[error("Failed to fetch market price: {0}")]
    QuoteUnavailable(#[from] QuoteError),
    #[error("Insufficient funds: need {required}, have {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },
    #[error(transparent)]
    Fill(#[from] FillError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

/// Order submission, already shape-validated by the transport layer.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub symbol: String,
    pub quantity: i64,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub status: OrderStatus,
}

pub struct MatchingEngine {
    store: Arc<dyn Ledger>,
    quotes: Arc<dyn QuoteGateway>,
    subscriptions: Arc<SubscriptionManager>,
    session: SessionGate,
    /// Serializes every fill; scoped at the ledger level because all fills
    /// touch the shared account balance.
    fill_lock: Mutex<()>,
    shutdown_tx: parking_lot::Mutex<Option<mpsc::Sender<()>>>,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn Ledger>,
        quotes: Arc<dyn QuoteGateway>,
        subscriptions: Arc<SubscriptionManager>,
        session: SessionGate,
    ) -> Self {
        Self {
            store,
            quotes,
            subscriptions,
            session,
            fill_lock: Mutex::new(()),
            shutdown_tx: parking_lot::Mutex::new(None),
        }
    }

    // ==========================================
    // Order placement (request path)
    // ==========================================

    pub async fn place_order(&self, req: NewOrder) -> Result<PlacedOrder, EngineError> {
        // The session gate comes before every other check.
        if !self.session.is_open_now() {
            return Err(EngineError::MarketClosed);
        }

        // Validation comes before any I/O.
        if req.symbol.trim().is_empty() {
            return Err(EngineError::Validation("symbol is required".to_string()));
        }
        if req.quantity == 0 {
            return Err(EngineError::Validation("quantity must be non-zero".to_string()));
        }
        let limit_price = match req.order_type {
            OrderType::Limit => {
                let price = req
                    .price
                    .ok_or_else(|| EngineError::Validation("limit orders require a price".to_string()))?;
                if price <= Decimal::ZERO {
                    return Err(EngineError::Validation("price must be positive".to_string()));
                }
                Some(price)
            }
            OrderType::Market => None,
        };

        match req.order_type {
            OrderType::Limit => self.place_limit_order(&req, limit_price.unwrap_or_default()).await,
            OrderType::Market => self.place_market_order(&req).await,
        }
    }

    /// Insert a PENDING limit order. No ledger mutation and no funds check
    /// until the scan fills it.
    async fn place_limit_order(
        &self,
        req: &NewOrder,
        price: Decimal,
    ) -> Result<PlacedOrder, EngineError> {
        let order = Order {
            order_id: Uuid::new_v4().to_string(),
            symbol: req.symbol.clone(),
            quantity: req.quantity,
            price,
            order_type: OrderType::Limit,
            status: OrderStatus::Pending,
            created_at: None,
        };

        self.store.insert_pending_order(&order).await?;

        // Pending-order symbols need live prices too.
        self.subscriptions.subscribe(std::slice::from_ref(&order.symbol)).await;

        info!(
            "Limit order {} accepted: {} {} @ {}",
            order.order_id, order.quantity, order.symbol, order.price
        );
        Ok(PlacedOrder { order_id: order.order_id, status: OrderStatus::Pending })
    }

    /// Execute a market order synchronously at the last traded price. The
    /// client-supplied price is ignored.
    async fn place_market_order(&self, req: &NewOrder) -> Result<PlacedOrder, EngineError> {
        let price = self.quotes.last_price(&req.symbol).await?;

        let order = Order {
            order_id: Uuid::new_v4().to_string(),
            symbol: req.symbol.clone(),
            quantity: req.quantity,
            price,
            order_type: OrderType::Market,
            status: OrderStatus::Executed,
            created_at: None,
        };

        let _guard = self.fill_lock.lock().await;

        if req.quantity > 0 {
            let balance = self.store.balance().await?;
            let required = Decimal::from(req.quantity) * price;
            if balance < required {
                return Err(EngineError::InsufficientFunds { required, available: balance });
            }
        }

        let position = self.store.position(&req.symbol).await?;
        let outcome = fill::apply_fill(&req.symbol, position.as_ref(), req.quantity, price)?;
        self.store.commit_fill(&order, &outcome).await?;

        self.apply_subscription(&req.symbol, &outcome).await;

        info!(
            "Market order {} executed: {} {} @ {}",
            order.order_id, order.quantity, order.symbol, price
        );
        Ok(PlacedOrder { order_id: order.order_id, status: OrderStatus::Executed })
    }

    // ==========================================
    // Pending-order scan (deferred path)
    // ==========================================

    /// Spawn the background scan loop. Runs on a fixed cadence while the
    /// session is open; stops on the shutdown signal.
    pub fn start(self: Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let engine = self;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(tokio::time::Duration::from_secs(SCAN_INTERVAL_SECS));
            info!("Pending-order scan started ({}s cadence)", SCAN_INTERVAL_SECS);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.recv() => {
                        info!("Scan shutdown signal received");
                        break;
                    }
                }

                if !engine.session.is_open_now() {
                    continue;
                }
                engine.scan_pending_orders().await;
            }

            info!("Pending-order scan stopped");
        });
    }

    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }

    /// One scan pass. A quote failure or a rejected fill skips only that
    /// order; everything else in the pass still runs.
    async fn scan_pending_orders(&self) {
        let pending = match self.store.pending_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Scan could not load pending orders: {}", e);
                return;
            }
        };

        for order in pending {
            let quote = match self.quotes.last_price(&order.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("Scan quote fetch failed for {}: {}", order.symbol, e);
                    continue;
                }
            };

            if !fill::limit_crossed(order.quantity, order.price, quote) {
                continue;
            }

            // Execute at the limit price, not the current quote.
            match self.execute_pending_order(&order).await {
                Ok(outcome) => {
                    self.apply_subscription(&order.symbol, &outcome).await;
                    info!(
                        "Limit order {} filled: {} {} @ {} (quote {})",
                        order.order_id, order.quantity, order.symbol, order.price, quote
                    );
                }
                Err(e) => {
                    // Left PENDING; may become fillable on a later pass.
                    warn!("Limit order {} not filled: {}", order.order_id, e);
                }
            }
        }
    }

    async fn execute_pending_order(&self, order: &Order) -> Result<FillOutcome, EngineError> {
        let _guard = self.fill_lock.lock().await;

        let position = self.store.position(&order.symbol).await?;
        let outcome =
            fill::apply_fill(&order.symbol, position.as_ref(), order.quantity, order.price)?;
        self.store.commit_fill(order, &outcome).await?;

        Ok(outcome)
    }

    async fn apply_subscription(&self, symbol: &str, outcome: &FillOutcome) {
        let symbols = [symbol.to_string()];
        match outcome.subscription {
            Some(SubscriptionAction::Subscribe) => self.subscriptions.subscribe(&symbols).await,
            Some(SubscriptionAction::Unsubscribe) => {
                self.subscriptions.unsubscribe(&symbols).await
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Position;
    use crate::trading::fill::PositionChange;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct ScriptedQuotes {
        price: Decimal,
    }

    #[async_trait]
    impl QuoteGateway for ScriptedQuotes {
        async fn last_price(&self, _symbol: &str) -> Result<Decimal, QuoteError> {
            Ok(self.price)
        }
    }

    #[derive(Default)]
    struct MemoryState {
        balance: Decimal,
        positions: HashMap<String, Position>,
        orders: Vec<Order>,
        trades: usize,
    }

    /// In-memory stand-in for the Postgres ledger.
    #[derive(Default)]
    struct MemoryLedger {
        state: parking_lot::Mutex<MemoryState>,
    }

    impl MemoryLedger {
        fn with_balance(balance: Decimal) -> Arc<Self> {
            let ledger = Self::default();
            ledger.state.lock().balance = balance;
            Arc::new(ledger)
        }

        fn seed_pending(&self, order: Order) {
            self.state.lock().orders.push(order);
        }
    }

    #[async_trait]
    impl Ledger for MemoryLedger {
        async fn balance(&self) -> Result<Decimal, DbError> {
            Ok(self.state.lock().balance)
        }

        async fn position(&self, symbol: &str) -> Result<Option<Position>, DbError> {
            Ok(self.state.lock().positions.get(symbol).cloned())
        }

        async fn pending_orders(&self) -> Result<Vec<Order>, DbError> {
            Ok(self
                .state
                .lock()
                .orders
                .iter()
                .filter(|o| o.status == OrderStatus::Pending)
                .cloned()
                .collect())
        }

        async fn insert_pending_order(&self, order: &Order) -> Result<(), DbError> {
            self.state.lock().orders.push(order.clone());
            Ok(())
        }

        async fn commit_fill(&self, order: &Order, outcome: &FillOutcome) -> Result<(), DbError> {
            let mut state = self.state.lock();
            match order.order_type {
                OrderType::Market => state.orders.push(order.clone()),
                OrderType::Limit => {
                    let row = state
                        .orders
                        .iter_mut()
                        .find(|o| o.order_id == order.order_id)
                        .ok_or(DbError::NotFound)?;
                    row.status = OrderStatus::Executed;
                }
            }
            match &outcome.position {
                PositionChange::Open { quantity, avg_price }
                | PositionChange::Update { quantity, avg_price } => {
                    state.positions.insert(
                        order.symbol.clone(),
                        Position {
                            symbol: order.symbol.clone(),
                            quantity: *quantity,
                            avg_price: *avg_price,
                            notes: String::new(),
                        },
                    );
                }
                PositionChange::Close(_) => {
                    state.positions.remove(&order.symbol);
                    state.trades += 1;
                }
            }
            state.balance += outcome.cash_delta;
            Ok(())
        }
    }

    fn engine_with(
        store: Arc<MemoryLedger>,
        quote: Decimal,
        session: SessionGate,
    ) -> MatchingEngine {
        MatchingEngine::new(
            store,
            Arc::new(ScriptedQuotes { price: quote }),
            Arc::new(SubscriptionManager::new()),
            session,
        )
    }

    fn validation_engine(session: SessionGate) -> MatchingEngine {
        engine_with(MemoryLedger::with_balance(dec!(300000)), dec!(100), session)
    }

    fn pending_limit(symbol: &str, quantity: i64, price: Decimal) -> Order {
        Order {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            quantity,
            price,
            order_type: OrderType::Limit,
            status: OrderStatus::Pending,
            created_at: None,
        }
    }

    fn always_open() -> SessionGate {
        SessionGate::with_window(
            chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        )
    }

    fn never_open() -> SessionGate {
        // Open after close: no instant matches.
        SessionGate::with_window(
            chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_closed_session_rejects_before_validation() {
        let engine = validation_engine(never_open());
        let err = engine
            .place_order(NewOrder {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: 10,
                order_type: OrderType::Market,
                price: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MarketClosed));
    }

    #[tokio::test]
    async fn test_empty_symbol_rejected() {
        let engine = validation_engine(always_open());
        let err = engine
            .place_order(NewOrder {
                symbol: "  ".to_string(),
                quantity: 10,
                order_type: OrderType::Market,
                price: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let engine = validation_engine(always_open());
        let err = engine
            .place_order(NewOrder {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: 0,
                order_type: OrderType::Market,
                price: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_limit_order_requires_price() {
        let engine = validation_engine(always_open());
        let err = engine
            .place_order(NewOrder {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: 5,
                order_type: OrderType::Limit,
                price: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_limit_order_rejects_non_positive_price() {
        let engine = validation_engine(always_open());
        let err = engine
            .place_order(NewOrder {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: 5,
                order_type: OrderType::Limit,
                price: Some(dec!(0)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_market_buy_executes_at_quote_price() {
        let store = MemoryLedger::with_balance(dec!(300000));
        let engine = engine_with(Arc::clone(&store), dec!(100), always_open());

        let placed = engine
            .place_order(NewOrder {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: 10,
                order_type: OrderType::Market,
                // Client-supplied price is ignored for market orders.
                price: Some(dec!(1)),
            })
            .await
            .unwrap();

        assert_eq!(placed.status, OrderStatus::Executed);
        let state = store.state.lock();
        assert_eq!(state.balance, dec!(299000));
        assert_eq!(state.orders.len(), 1);
        assert_eq!(state.orders[0].price, dec!(100));
        assert_eq!(state.positions["NSE:SBIN-EQ"].avg_price, dec!(100));
    }

    #[tokio::test]
    async fn test_market_buy_rejects_insufficient_funds() {
        let store = MemoryLedger::with_balance(dec!(100));
        let engine = engine_with(Arc::clone(&store), dec!(50), always_open());

        let err = engine
            .place_order(NewOrder {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: 10,
                order_type: OrderType::Market,
                price: None,
            })
            .await
            .unwrap_err();

        match err {
            EngineError::InsufficientFunds { required, available } => {
                assert_eq!(required, dec!(500));
                assert_eq!(available, dec!(100));
            }
            other => panic!("expected insufficient funds, got {:?}", other),
        }

        // Rejected before any mutation: no order row, balance untouched.
        let state = store.state.lock();
        assert!(state.orders.is_empty());
        assert_eq!(state.balance, dec!(100));
    }

    #[tokio::test]
    async fn test_scan_fills_crossed_order_at_limit_price() {
        let store = MemoryLedger::with_balance(dec!(300000));
        store.seed_pending(pending_limit("NSE:SBIN-EQ", 5, dec!(50)));
        // Quote below the limit: the buy crosses but fills at 50, not 49.
        let engine = engine_with(Arc::clone(&store), dec!(49), always_open());

        engine.scan_pending_orders().await;

        let state = store.state.lock();
        assert_eq!(state.orders[0].status, OrderStatus::Executed);
        assert_eq!(state.balance, dec!(299750));
        assert_eq!(state.positions["NSE:SBIN-EQ"].avg_price, dec!(50));
        assert_eq!(state.positions["NSE:SBIN-EQ"].quantity, 5);
    }

    #[tokio::test]
    async fn test_scan_leaves_uncrossed_order_pending() {
        let store = MemoryLedger::with_balance(dec!(300000));
        store.seed_pending(pending_limit("NSE:SBIN-EQ", 5, dec!(50)));
        let engine = engine_with(Arc::clone(&store), dec!(60), always_open());

        engine.scan_pending_orders().await;

        let state = store.state.lock();
        assert_eq!(state.orders[0].status, OrderStatus::Pending);
        assert_eq!(state.balance, dec!(300000));
        assert!(state.positions.is_empty());
    }

    #[tokio::test]
    async fn test_scan_leaves_naked_sell_pending() {
        let store = MemoryLedger::with_balance(dec!(300000));
        store.seed_pending(pending_limit("NSE:SBIN-EQ", -5, dec!(50)));
        // Crossed for a sell, but there is no position to close.
        let engine = engine_with(Arc::clone(&store), dec!(55), always_open());

        engine.scan_pending_orders().await;

        let state = store.state.lock();
        assert_eq!(state.orders[0].status, OrderStatus::Pending);
        assert_eq!(state.balance, dec!(300000));
    }

    #[tokio::test]
    async fn test_market_close_records_trade_and_credits_cash() {
        let store = MemoryLedger::with_balance(dec!(299000));
        store.state.lock().positions.insert(
            "NSE:SBIN-EQ".to_string(),
            Position {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: 10,
                avg_price: dec!(100),
                notes: String::new(),
            },
        );
        let engine = engine_with(Arc::clone(&store), dec!(120), always_open());

        engine
            .place_order(NewOrder {
                symbol: "NSE:SBIN-EQ".to_string(),
                quantity: -10,
                order_type: OrderType::Market,
                price: None,
            })
            .await
            .unwrap();

        let state = store.state.lock();
        assert_eq!(state.balance, dec!(300200));
        assert!(state.positions.is_empty());
        assert_eq!(state.trades, 1);
    }
}
