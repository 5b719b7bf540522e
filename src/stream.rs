//! Broker data stream and live-quote subscription manager
//!
//! The subscription set tracks every symbol the system needs streaming
//! prices for (held positions plus pending-order symbols). Deltas are
//! computed under the set lock and handed to the stream task over a channel;
//! the lock is never held across network I/O. Inbound ticks are republished
//! on a broadcast channel and fanned out unchanged to `/ws` clients.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY_SECS: u64 = 5;
const TICK_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum StreamCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Owned symbol set with explicit delta computation. The deltas are what
/// actually go over the wire; already-subscribed symbols are never re-sent.
#[derive(Default)]
struct SymbolSet {
    symbols: HashSet<String>,
}

impl SymbolSet {
    fn seed(&mut self, symbols: impl IntoIterator<Item = String>) {
        self.symbols.extend(symbols);
    }

    /// Add symbols, returning only the ones that were not present.
    fn subscribe_delta(&mut self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .filter(|s| self.symbols.insert((*s).clone()))
            .cloned()
            .collect()
    }

    /// Remove symbols, returning only the ones that were present.
    fn unsubscribe_delta(&mut self, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .filter(|s| self.symbols.remove(*s))
            .cloned()
            .collect()
    }

    fn snapshot(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }
}

/// Keeps the broker stream subscribed to exactly the tracked symbol set.
pub struct SubscriptionManager {
    set: Mutex<SymbolSet>,
    command_tx: mpsc::Sender<StreamCommand>,
    command_rx: Mutex<Option<mpsc::Receiver<StreamCommand>>>,
    tick_tx: broadcast::Sender<String>,
    is_running: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (tick_tx, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        Self {
            set: Mutex::new(SymbolSet::default()),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            tick_tx,
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Seed the set without touching the network; the on-connect resubscribe
    /// covers the initial subscription.
    pub fn seed(&self, symbols: Vec<String>) {
        if symbols.is_empty() {
            return;
        }
        info!("Seeding subscription set with {} symbols", symbols.len());
        self.set.lock().seed(symbols);
    }

    /// Subscribe to symbols. Only the delta against the current set is sent;
    /// no network frame when every symbol is already tracked.
    pub async fn subscribe(&self, symbols: &[String]) {
        let delta = self.set.lock().subscribe_delta(symbols);
        if delta.is_empty() {
            return;
        }
        info!("Subscribing to: {:?}", delta);
        if self.command_tx.send(StreamCommand::Subscribe(delta)).await.is_err() {
            warn!("Stream task not running; subscription delta dropped");
        }
    }

    /// Unsubscribe from symbols; no-op for symbols not in the set.
    pub async fn unsubscribe(&self, symbols: &[String]) {
        let delta = self.set.lock().unsubscribe_delta(symbols);
        if delta.is_empty() {
            return;
        }
        info!("Unsubscribing from: {:?}", delta);
        if self.command_tx.send(StreamCommand::Unsubscribe(delta)).await.is_err() {
            warn!("Stream task not running; unsubscribe delta dropped");
        }
    }

    /// Receiver of raw inbound ticks for fan-out.
    pub fn ticks(&self) -> broadcast::Receiver<String> {
        self.tick_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Spawn the stream task: connect, resubscribe the full set, forward
    /// deltas, republish ticks, reconnect on drops.
    pub fn start(self: Arc<Self>, ws_url: String, token: String) {
        let mut command_rx = match self.command_rx.lock().take() {
            Some(rx) => rx,
            None => {
                warn!("Stream task already started");
                return;
            }
        };

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let manager = self;
        tokio::spawn(async move {
            manager.is_running.store(true, Ordering::SeqCst);

            loop {
                match manager
                    .run_connection(&ws_url, &token, &mut command_rx, &mut shutdown_rx)
                    .await
                {
                    Ok(()) => {
                        if !manager.is_running.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!("Stream disconnected, reconnecting in {}s...", RECONNECT_DELAY_SECS);
                    }
                    Err(e) => {
                        error!("Stream error: {}", e);
                    }
                }

                if !manager.is_running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }

            info!("Stream task stopped");
        });
    }

    /// One connection lifetime. Returning Ok means a clean close or shutdown;
    /// the caller decides whether to reconnect.
    async fn run_connection(
        &self,
        ws_url: &str,
        token: &str,
        command_rx: &mut mpsc::Receiver<StreamCommand>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let url = format!("{}?token={}", ws_url, token);
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        info!("Broker stream connected");

        // Resubscribe the whole current set. Safe on every reconnect: the
        // broker treats repeated subscribes as no-ops.
        let snapshot = self.set.lock().snapshot();
        if !snapshot.is_empty() {
            let frame = json!({"type": "subscribe", "symbols": snapshot});
            write.send(Message::Text(frame.to_string())).await?;
            info!("Resubscribed to {} symbols", snapshot.len());
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            // Fan-out, not buffered: lagging receivers drop.
                            let _ = self.tick_tx.send(text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("Stream closed by broker");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            error!("Stream read error: {}", e);
                            return Ok(());
                        }
                        None => {
                            warn!("Stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(StreamCommand::Subscribe(symbols)) => {
                            debug!("Sending subscribe frame for {:?}", symbols);
                            let frame = json!({"type": "subscribe", "symbols": symbols});
                            write.send(Message::Text(frame.to_string())).await?;
                        }
                        Some(StreamCommand::Unsubscribe(symbols)) => {
                            debug!("Sending unsubscribe frame for {:?}", symbols);
                            let frame = json!({"type": "unsubscribe", "symbols": symbols});
                            write.send(Message::Text(frame.to_string())).await?;
                        }
                        None => return Ok(()),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Stream shutdown signal received");
                    self.is_running.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }
    }

    pub async fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
