use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::core::types::Candidate;
use crate::ingest::queue::IngestQueue;

/// Configuration for the log subscription WebSocket connection
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// RPC WebSocket URL (e.g., "wss://api.mainnet-beta.solana.com/")
    pub ws_url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Delay between reconnection attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Heartbeat interval to keep the connection alive
    pub heartbeat_interval_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://api.mainnet-beta.solana.com/".to_string(),
            connect_timeout_ms: 30000,
            reconnect_delay_ms: 1000,
            heartbeat_interval_ms: 30000,
        }
    }
}

/// JSON-RPC request sent over the WebSocket
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    params: Value,
}

/// JSON-RPC response from the RPC node
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// `logsNotification` push message
#[derive(Debug, Deserialize)]
struct LogsNotification {
    method: String,
    params: LogsNotificationParams,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationParams {
    subscription: u64,
    result: LogsNotificationResult,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationResult {
    value: RawLogEvent,
}

/// The raw event payload: one notification per newly recorded transaction.
/// Transient; only the signature survives into the ingest queue.
#[derive(Debug, Deserialize)]
pub struct RawLogEvent {
    pub signature: String,
    pub err: Option<Value>,
}

/// Connection state for monitoring
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Statistics for monitoring subscription health
#[derive(Debug, Clone)]
pub struct SubscriberStats {
    pub state: ConnectionState,
    pub connection_attempts: u32,
    pub successful_connections: u32,
    pub messages_received: u64,
    pub candidates_enqueued: u64,
    pub candidates_shed: u64,
}

/// Subscribes to ledger log notifications and feeds the ingest queue.
///
/// Admission is a single bounded enqueue per notification, so the read
/// loop never blocks on downstream processing no matter how bursty the
/// feed gets.
pub struct LogSubscriber {
    config: SubscriberConfig,
    queue: Arc<IngestQueue>,
    stats: Arc<tokio::sync::RwLock<SubscriberStats>>,
}

impl std::fmt::Debug for LogSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscriber")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LogSubscriber {
    pub fn new(config: SubscriberConfig, queue: Arc<IngestQueue>) -> Self {
        info!(ws_url = %config.ws_url, "Initializing log subscriber");

        let stats = SubscriberStats {
            state: ConnectionState::Disconnected,
            connection_attempts: 0,
            successful_connections: 0,
            messages_received: 0,
            candidates_enqueued: 0,
            candidates_shed: 0,
        };

        Self {
            config,
            queue,
            stats: Arc::new(tokio::sync::RwLock::new(stats)),
        }
    }

    /// Runs the subscription loop indefinitely, reconnecting with a delay
    /// whenever the connection drops or fails.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting log subscription loop");

        loop {
            {
                let mut stats = self.stats.write().await;
                stats.state = ConnectionState::Connecting;
                stats.connection_attempts += 1;
            }

            match self.connect_and_stream().await {
                Ok(()) => {
                    debug!("WebSocket connection closed normally");
                }
                Err(e) => {
                    error!(error = %e, url = %self.config.ws_url, "Log subscription connection failed");
                }
            }

            {
                let mut stats = self.stats.write().await;
                stats.state = ConnectionState::Reconnecting;
            }

            let delay = Duration::from_millis(self.config.reconnect_delay_ms);
            warn!("Log subscription dropped, reconnecting in {:?}", delay);
            sleep(delay).await;
        }
    }

    /// Connects, subscribes to all transaction logs, and pumps
    /// notifications into the ingest queue until the connection closes.
    #[instrument(skip(self))]
    async fn connect_and_stream(&self) -> Result<()> {
        let parsed_url =
            Url::parse(&self.config.ws_url).context("Failed to parse WebSocket URL")?;

        let (ws_stream, response) = timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connect_async(parsed_url.as_str()),
        )
        .await
        .context("Connection timeout")?
        .context("Failed to connect to WebSocket")?;

        info!(
            url = %self.config.ws_url,
            status = %response.status(),
            "Connected to RPC WebSocket"
        );

        {
            let mut stats = self.stats.write().await;
            stats.state = ConnectionState::Connected;
            stats.successful_connections += 1;
        }

        let (ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        // Subscribe to every transaction's logs; the filter pipeline does
        // the narrowing, not the subscription.
        let subscribe_request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: 1,
            method: "logsSubscribe".to_string(),
            params: serde_json::json!(["all", {"commitment": "confirmed"}]),
        };

        let subscribe_msg = serde_json::to_string(&subscribe_request)
            .context("Failed to serialize logsSubscribe request")?;
        tx.send(Message::Text(subscribe_msg))
            .context("Failed to queue logsSubscribe request")?;
        info!("Sent logsSubscribe request");

        // Outgoing message pump
        let tx_task = {
            let mut ws_sender = ws_sender;
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = ws_sender.send(msg).await {
                        error!(error = %e, "Failed to send WebSocket message");
                        break;
                    }
                }
            })
        };

        // Incoming message pump
        let rx_task = {
            let queue = self.queue.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            {
                                let mut stats = stats.write().await;
                                stats.messages_received += 1;
                            }

                            if let Err(e) = Self::handle_message(&text, &queue, &stats).await {
                                warn!(error = %e, "Failed to handle WebSocket message");
                            }
                        }
                        Ok(Message::Close(close_frame)) => {
                            info!("WebSocket closed: {:?}", close_frame);
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                        Ok(Message::Binary(data)) => {
                            warn!("Received unexpected binary message: {} bytes", data.len());
                        }
                        Ok(Message::Frame(_)) => {
                            debug!("Received raw frame message (ignored)");
                        }
                        Err(e) => {
                            error!(error = %e, "WebSocket receive error");
                            break;
                        }
                    }
                }

                debug!("WebSocket receive loop ended");
            })
        };

        // Heartbeat to keep the connection alive
        let heartbeat_task = {
            let tx = tx.clone();
            let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(heartbeat_interval);
                loop {
                    interval.tick().await;
                    if tx.send(Message::Ping(vec![])).is_err() {
                        debug!("Heartbeat channel closed");
                        break;
                    }
                }
            })
        };

        tokio::select! {
            _ = tx_task => debug!("WebSocket sender task completed"),
            _ = rx_task => debug!("WebSocket receiver task completed"),
            _ = heartbeat_task => debug!("Heartbeat task completed"),
        }

        Ok(())
    }

    /// Handles one incoming WebSocket message: subscription bookkeeping
    /// for JSON-RPC responses, queue admission for log notifications.
    async fn handle_message(
        message: &str,
        queue: &IngestQueue,
        stats: &tokio::sync::RwLock<SubscriberStats>,
    ) -> Result<()> {
        // Subscription confirmation or RPC-level error
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(message) {
            if response.id.is_some() || response.error.is_some() {
                if let Some(result) = &response.result {
                    if let Some(subscription_id) = result.as_u64() {
                        info!(subscription_id, "Log subscription confirmed");
                        return Ok(());
                    }
                }
                if let Some(error) = response.error {
                    error!(code = error.code, message = %error.message, "JSON-RPC error");
                }
                return Ok(());
            }
        }

        // Log notification: extract the signature and admit it
        if let Ok(notification) = serde_json::from_str::<LogsNotification>(message) {
            if notification.method != "logsNotification" {
                warn!(method = %notification.method, "Unknown notification method");
                return Ok(());
            }

            let event = notification.params.result.value;
            debug!(
                subscription = notification.params.subscription,
                signature = %event.signature,
                failed = event.err.is_some(),
                "Log notification received"
            );

            let admitted = queue.enqueue(Candidate::new(event.signature));
            {
                let mut stats = stats.write().await;
                if admitted {
                    stats.candidates_enqueued += 1;
                } else {
                    stats.candidates_shed += 1;
                }
            }
            return Ok(());
        }

        warn!("Failed to parse WebSocket message as JSON-RPC response or notification");
        Ok(())
    }

    pub async fn get_stats(&self) -> SubscriberStats {
        let stats = self.stats.read().await;
        stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stats() -> tokio::sync::RwLock<SubscriberStats> {
        tokio::sync::RwLock::new(SubscriberStats {
            state: ConnectionState::Connected,
            connection_attempts: 1,
            successful_connections: 1,
            messages_received: 0,
            candidates_enqueued: 0,
            candidates_shed: 0,
        })
    }

    #[tokio::test]
    async fn logs_notification_enqueues_candidate() {
        let queue = IngestQueue::new(4);
        let stats = test_stats();

        let message = r#"{
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": { "slot": 5208469 },
                    "value": {
                        "signature": "5h6xBEauJ3PK6SWCZ1PGjBvj8vDdWG3KpwATGy1ARAXFSDwt8GFXM7W5Ncn16wmqRYYLaSbBjiQexpAKy8GzZVnt",
                        "err": null,
                        "logs": ["Program 11111111111111111111111111111112 invoke [1]"]
                    }
                },
                "subscription": 24040
            }
        }"#;

        LogSubscriber::handle_message(message, &queue, &stats)
            .await
            .unwrap();

        let candidate = queue.dequeue_one().unwrap();
        assert_eq!(
            candidate.signature,
            "5h6xBEauJ3PK6SWCZ1PGjBvj8vDdWG3KpwATGy1ARAXFSDwt8GFXM7W5Ncn16wmqRYYLaSbBjiQexpAKy8GzZVnt"
        );
        assert_eq!(stats.read().await.candidates_enqueued, 1);
    }

    #[tokio::test]
    async fn shed_notification_counts_against_stats() {
        let queue = IngestQueue::new(1);
        let stats = test_stats();
        queue.enqueue(Candidate::new("already-here"));

        let message = r#"{
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": { "context": { "slot": 1 }, "value": { "signature": "late-arrival", "err": null } },
                "subscription": 1
            }
        }"#;

        LogSubscriber::handle_message(message, &queue, &stats)
            .await
            .unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(stats.read().await.candidates_shed, 1);
        assert_eq!(queue.dequeue_one().unwrap().signature, "already-here");
    }

    #[tokio::test]
    async fn subscription_confirmation_is_not_enqueued() {
        let queue = IngestQueue::new(4);
        let stats = test_stats();

        let message = r#"{"jsonrpc":"2.0","result":24040,"id":1}"#;
        LogSubscriber::handle_message(message, &queue, &stats)
            .await
            .unwrap();

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn garbage_message_is_tolerated() {
        let queue = IngestQueue::new(4);
        let stats = test_stats();

        LogSubscriber::handle_message("not json at all", &queue, &stats)
            .await
            .unwrap();
        assert!(queue.is_empty());
    }
}
