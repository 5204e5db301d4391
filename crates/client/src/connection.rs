//! Single relay session management.
//!
//! A [`RelayConnection`] owns one WebSocket connection to a relay, a
//! receive loop that dispatches incoming frames, a table of publish
//! outcomes keyed by event id, and a bounded fixed-delay reconnect
//! policy. Sessions share a [`SubscriptionRegistry`] and an
//! [`EventSink`] with the pool that owns them, so events reach the
//! same callbacks no matter which relay delivered them.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, MessageError, RelayMessage};
use crate::sink::EventSink;
use crate::subscription::SubscriptionRegistry;
use futures_util::{SinkExt, StreamExt};
use relaykit_core::{Event, validate_event, verify_event};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Session lifecycle state.
///
/// `Disconnected -> Connecting -> Open`, then on a lost connection
/// `Open -> Reconnecting -> Open` again, or `Failed` once the attempt
/// budget runs out. An explicit [`RelayConnection::disconnect`] passes
/// through `Closing` back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, none in progress.
    Disconnected,
    /// Initial connection attempt in flight.
    Connecting,
    /// Connected and processing relay frames.
    Open,
    /// Explicit disconnect in progress.
    Closing,
    /// Connection lost, automatic reconnect in progress.
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal until the caller
    /// explicitly reconnects.
    Failed,
}

/// Tunables for a single relay session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a connection attempt may take before it is abandoned.
    pub connect_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// How many reconnect attempts to make after a lost connection
    /// before the session moves to [`ConnectionState::Failed`].
    /// Zero disables automatic reconnection.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 3,
        }
    }
}

/// What became of a published event on one relay.
///
/// `publish` records [`PublishOutcome::Unknown`] when the EVENT frame
/// goes out; the receive loop upgrades it when the relay answers with
/// an OK frame. A relay that never answers leaves the entry `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Sent, no OK frame seen yet.
    Unknown,
    /// The relay accepted the event.
    Accepted,
    /// The relay rejected the event, with the reason it gave.
    Rejected(String),
}

/// What one pass over the socket produced. Computed while holding the
/// stream lock, acted on after releasing it.
enum RecvOutcome {
    /// A text frame to parse and dispatch.
    Message(String),
    /// Nothing actionable this pass.
    Idle,
    /// The stream is gone.
    Closed,
    /// The stream died with a transport error.
    Error(String),
}

/// A managed session with a single relay.
pub struct RelayConnection {
    url: Url,
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    ws: Arc<Mutex<Option<WsStream>>>,
    registry: SubscriptionRegistry,
    sink: Arc<dyn EventSink>,
    pending_publishes: Arc<RwLock<HashMap<String, PublishOutcome>>>,
    recv_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RelayConnection {
    /// Create a new connection with default configuration, a private
    /// registry and no sink. Standalone use; pools inject shared state
    /// through [`RelayConnection::with_shared`].
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, ConnectionConfig::default())
    }

    /// Create a new connection with custom configuration.
    pub fn with_config(url: &str, config: ConnectionConfig) -> Result<Self> {
        Self::with_shared(
            url,
            config,
            SubscriptionRegistry::new(),
            Arc::new(crate::sink::NullSink),
        )
    }

    /// Create a new connection sharing a registry and sink with other
    /// sessions.
    pub fn with_shared(
        url: &str,
        config: ConnectionConfig,
        registry: SubscriptionRegistry,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let url = Url::parse(url)?;

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            ws: Arc::new(Mutex::new(None)),
            registry,
            sink,
            pending_publishes: Arc::new(RwLock::new(HashMap::new())),
            recv_task: Arc::new(Mutex::new(None)),
        })
    }

    /// The relay URL this session talks to.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Current session state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Whether the session is open and processing frames.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Open
    }

    /// The registry this session delivers events through.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Connect to the relay and start the receive loop.
    ///
    /// Every subscription already present in the registry is issued to
    /// the relay as part of connecting, so a session added late sees
    /// the same subscriptions as its siblings.
    ///
    /// A failed attempt returns the error, and the session keeps
    /// retrying in the background on the fixed delay until it either
    /// opens or exhausts its attempts and fails.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ConnectionState::Disconnected | ConnectionState::Failed => {}
                _ => return Err(ClientError::AlreadyConnected),
            }
            *state = ConnectionState::Connecting;
        }

        info!("Connecting to relay: {}", self.url);

        let stream = match timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
            .await
        {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                self.schedule_reconnect().await;
                return Err(ClientError::WebSocket(e.to_string()));
            }
            Err(_) => {
                self.schedule_reconnect().await;
                return Err(ClientError::Timeout);
            }
        };

        *self.ws.lock().await = Some(stream);
        *self.state.write().await = ConnectionState::Open;
        info!("Connected to relay: {}", self.url);
        self.sink.on_connected(self.url.as_str());

        replay_subscriptions(&self.ws, &self.registry, self.url.as_str()).await;
        self.start_recv_loop().await;

        Ok(())
    }

    /// Disconnect from the relay.
    ///
    /// Stops the receive loop, closes the socket and removes this relay
    /// from every subscription's carrier set. Publish outcomes recorded
    /// so far stay queryable.
    pub async fn disconnect(&self) -> Result<()> {
        let was_open = {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Disconnected {
                return Ok(());
            }
            let was_open = *state == ConnectionState::Open;
            *state = ConnectionState::Closing;
            was_open
        };

        info!("Disconnecting from relay: {}", self.url);
        self.stop_recv_loop().await;

        if let Some(mut stream) = self.ws.lock().await.take() {
            let _ = stream.close(None).await;
        }

        self.registry.remove_relay(self.url.as_str()).await;
        *self.state.write().await = ConnectionState::Disconnected;
        if was_open {
            self.sink.on_disconnected(self.url.as_str());
        }

        Ok(())
    }

    /// Send a client frame to the relay.
    pub async fn send_message(&self, message: &ClientMessage) -> Result<()> {
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        let text = message.to_json()?;
        debug!("Sending to {}: {}", self.url, text);
        send_text_on(&self.ws, text).await
    }

    /// Publish a signed event to the relay without waiting for the OK
    /// frame. The outcome is recorded as [`PublishOutcome::Unknown`]
    /// and upgraded by the receive loop when the relay answers; query
    /// it with [`RelayConnection::publish_status`].
    ///
    /// The event must already carry its id, pubkey and signature.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        if !validate_event(event) {
            return Err(ClientError::InvalidEvent(
                "event is not fully signed".to_string(),
            ));
        }
        if !self.is_connected().await {
            return Err(ClientError::NotConnected);
        }

        self.pending_publishes
            .write()
            .await
            .insert(event.id.clone(), PublishOutcome::Unknown);

        let result = self.send_message(&ClientMessage::Event(event.clone())).await;
        if result.is_err() {
            // The frame never went out, so there is nothing pending.
            self.pending_publishes.write().await.remove(&event.id);
        }
        result
    }

    /// What the relay said about a published event, if anything.
    pub async fn publish_status(&self, event_id: &str) -> Option<PublishOutcome> {
        self.pending_publishes.read().await.get(event_id).cloned()
    }

    /// All publish outcomes recorded on this session.
    pub async fn publish_outcomes(&self) -> HashMap<String, PublishOutcome> {
        self.pending_publishes.read().await.clone()
    }

    /// Whether the relay rejected a specific published event.
    pub async fn has_event_error(&self, event_id: &str) -> bool {
        matches!(
            self.pending_publishes.read().await.get(event_id),
            Some(PublishOutcome::Rejected(_))
        )
    }

    /// Whether the relay rejected any event published on this session.
    pub async fn has_event_errors(&self) -> bool {
        self.pending_publishes
            .read()
            .await
            .values()
            .any(|outcome| matches!(outcome, PublishOutcome::Rejected(_)))
    }

    /// Issue a REQ for a subscription on this relay and record it as a
    /// carrier. The id should already be registered in the shared
    /// registry so incoming events find their callback.
    pub async fn subscribe(&self, subscription_id: &str, filters: &[Filter]) -> Result<()> {
        self.send_message(&ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters: filters.to_vec(),
        })
        .await?;

        self.registry.add_relay(subscription_id, self.url.as_str()).await;
        Ok(())
    }

    /// Send a CLOSE for a subscription and drop this relay from its
    /// carrier set.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.send_message(&ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await?;

        self.registry.drop_relay(subscription_id, self.url.as_str()).await;
        Ok(())
    }

    /// Start the background receive loop.
    async fn start_recv_loop(&self) {
        let handle = tokio::spawn(recv_loop(
            Arc::clone(&self.ws),
            Arc::clone(&self.state),
            self.registry.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.pending_publishes),
            self.url.to_string(),
            self.config.clone(),
        ));
        *self.recv_task.lock().await = Some(handle);
    }

    /// After a failed connect attempt, keep trying in the background
    /// when the configuration allows it.
    async fn schedule_reconnect(&self) {
        if self.config.max_reconnect_attempts == 0 {
            *self.state.write().await = ConnectionState::Failed;
            return;
        }
        *self.state.write().await = ConnectionState::Reconnecting;

        let ws = Arc::clone(&self.ws);
        let state = Arc::clone(&self.state);
        let registry = self.registry.clone();
        let sink = Arc::clone(&self.sink);
        let pending = Arc::clone(&self.pending_publishes);
        let url = self.url.to_string();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            if reconnect(&ws, &state, &registry, &sink, &url, &config).await {
                recv_loop(ws, state, registry, sink, pending, url, config).await;
            }
        });
        *self.recv_task.lock().await = Some(handle);
    }

    /// Stop the background receive loop.
    async fn stop_recv_loop(&self) {
        if let Some(handle) = self.recv_task.lock().await.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url.as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Receive frames and dispatch them until the session ends.
///
/// Runs as the session's background task. On an unexpected stream drop
/// it drives the bounded reconnect policy and carries on if the relay
/// comes back.
async fn recv_loop(
    ws: Arc<Mutex<Option<WsStream>>>,
    state: Arc<RwLock<ConnectionState>>,
    registry: SubscriptionRegistry,
    sink: Arc<dyn EventSink>,
    pending: Arc<RwLock<HashMap<String, PublishOutcome>>>,
    url: String,
    config: ConnectionConfig,
) {
    'session: loop {
        loop {
            if *state.read().await != ConnectionState::Open {
                break 'session;
            }

            // Poll with a short timeout so the lock is released
            // regularly for senders.
            let outcome = {
                let mut ws_guard = ws.lock().await;
                let Some(stream) = ws_guard.as_mut() else {
                    break 'session;
                };
                match timeout(Duration::from_millis(100), stream.next()).await {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        RecvOutcome::Message(text.as_str().to_string())
                    }
                    Ok(Some(Ok(Message::Ping(data)))) => {
                        let _ = stream.send(Message::Pong(data)).await;
                        RecvOutcome::Idle
                    }
                    Ok(Some(Ok(Message::Close(_)))) => {
                        info!("Relay {} closed the connection", url);
                        RecvOutcome::Closed
                    }
                    Ok(Some(Ok(_))) => RecvOutcome::Idle,
                    Ok(Some(Err(e))) => RecvOutcome::Error(e.to_string()),
                    Ok(None) => RecvOutcome::Closed,
                    Err(_) => RecvOutcome::Idle,
                }
            };

            // Dispatch after the lock is released.
            match outcome {
                RecvOutcome::Message(text) => {
                    debug!("Received from {}: {}", url, text);
                    match RelayMessage::from_json(&text) {
                        Ok(message) => {
                            handle_relay_message(message, &url, &registry, &sink, &pending).await;
                        }
                        Err(MessageError::UnknownType(message_type)) => {
                            debug!("Ignoring unknown frame type {} from {}", message_type, url);
                        }
                        Err(e) => {
                            warn!("Malformed message from {}: {}", url, e);
                        }
                    }
                }
                RecvOutcome::Idle => {}
                RecvOutcome::Closed => break,
                RecvOutcome::Error(message) => {
                    warn!("WebSocket error from {}: {}", url, message);
                    sink.on_error(&url, &format!("transport error: {}", message));
                    break;
                }
            }
        }

        // The stream dropped out from under us.
        ws.lock().await.take();
        {
            let mut state_guard = state.write().await;
            if *state_guard != ConnectionState::Open {
                break 'session;
            }
            *state_guard = ConnectionState::Reconnecting;
        }
        sink.on_disconnected(&url);
        warn!("Lost connection to {}", url);

        if !reconnect(&ws, &state, &registry, &sink, &url, &config).await {
            break 'session;
        }
    }
}

/// Send one text frame on a shared stream.
async fn send_text_on(ws: &Mutex<Option<WsStream>>, text: String) -> Result<()> {
    let mut guard = ws.lock().await;
    match guard.as_mut() {
        Some(stream) => stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string())),
        None => Err(ClientError::NotConnected),
    }
}

/// Issue a REQ for every registered subscription and record this relay
/// as a carrier. Used on connect and after a successful reconnect.
async fn replay_subscriptions(
    ws: &Mutex<Option<WsStream>>,
    registry: &SubscriptionRegistry,
    url: &str,
) {
    for (id, filters) in registry.snapshot().await {
        let message = ClientMessage::Req {
            subscription_id: id.clone(),
            filters,
        };
        match message.to_json() {
            Ok(json) => match send_text_on(ws, json).await {
                Ok(()) => {
                    debug!("Issued subscription {} to {}", id, url);
                    registry.add_relay(&id, url).await;
                }
                Err(e) => warn!("Failed to issue subscription {} to {}: {}", id, url, e),
            },
            Err(e) => warn!("Failed to encode subscription {}: {}", id, e),
        }
    }
}

/// Try to get the session back to open after a lost connection.
///
/// Sleeps the fixed delay before each attempt. Returns true once
/// reconnected; on exhaustion moves the session to
/// [`ConnectionState::Failed`] and returns false. Also returns false
/// if the session left `Reconnecting` in the meantime, e.g. through an
/// explicit disconnect.
async fn reconnect(
    ws: &Mutex<Option<WsStream>>,
    state: &RwLock<ConnectionState>,
    registry: &SubscriptionRegistry,
    sink: &Arc<dyn EventSink>,
    url: &str,
    config: &ConnectionConfig,
) -> bool {
    for attempt in 1..=config.max_reconnect_attempts {
        tokio::time::sleep(config.reconnect_delay).await;

        if *state.read().await != ConnectionState::Reconnecting {
            return false;
        }

        info!(
            "Reconnect attempt {}/{} to {}",
            attempt, config.max_reconnect_attempts, url
        );
        match timeout(config.connect_timeout, connect_async(url)).await {
            Ok(Ok((stream, _))) => {
                *ws.lock().await = Some(stream);
                *state.write().await = ConnectionState::Open;
                info!("Reconnected to {}", url);
                sink.on_connected(url);
                replay_subscriptions(ws, registry, url).await;
                return true;
            }
            Ok(Err(e)) => warn!("Reconnect attempt {} to {} failed: {}", attempt, url, e),
            Err(_) => warn!("Reconnect attempt {} to {} timed out", attempt, url),
        }
    }

    *state.write().await = ConnectionState::Failed;
    error!(
        "Giving up on {} after {} reconnect attempts",
        url, config.max_reconnect_attempts
    );
    sink.on_error(
        url,
        &format!(
            "giving up after {} reconnect attempts",
            config.max_reconnect_attempts
        ),
    );
    false
}

/// Dispatch one parsed relay frame.
async fn handle_relay_message(
    message: RelayMessage,
    url: &str,
    registry: &SubscriptionRegistry,
    sink: &Arc<dyn EventSink>,
    pending: &RwLock<HashMap<String, PublishOutcome>>,
) {
    match message {
        RelayMessage::Event {
            subscription_id,
            event,
        } => {
            let Some(callback) = registry.callback_for(&subscription_id).await else {
                debug!(
                    "Event for unknown subscription {} from {}",
                    subscription_id, url
                );
                return;
            };
            // Signature check before anything sees the event. Forged
            // events are dropped without tearing the session down.
            if !verify_event(&event) {
                warn!("Dropping event {} from {}: verification failed", event.id, url);
                sink.on_error(url, &format!("dropped unverifiable event {}", event.id));
                return;
            }
            callback(&event, url);
            sink.on_event(url, &subscription_id, &event);
        }
        RelayMessage::Eose { subscription_id } => {
            if registry.mark_eose(&subscription_id, url).await {
                debug!("EOSE for {} from {}", subscription_id, url);
            } else {
                debug!("EOSE for unknown subscription {} from {}", subscription_id, url);
            }
        }
        RelayMessage::Ok {
            event_id,
            success,
            message,
        } => {
            let known = {
                let mut table = pending.write().await;
                match table.get_mut(&event_id) {
                    Some(entry) => {
                        *entry = if success {
                            PublishOutcome::Accepted
                        } else {
                            PublishOutcome::Rejected(message.clone())
                        };
                        true
                    }
                    None => false,
                }
            };
            if !known {
                debug!("OK for unknown event {} from {}", event_id, url);
            } else if success {
                debug!("Relay {} accepted event {}", url, event_id);
            } else {
                warn!("Relay {} rejected event {}: {}", url, event_id, message);
                sink.on_error(url, &format!("publish rejected: {}", message));
            }
        }
        RelayMessage::Closed {
            subscription_id,
            message,
        } => {
            warn!(
                "Relay {} closed subscription {}: {}",
                url, subscription_id, message
            );
            registry.drop_relay(&subscription_id, url).await;
            sink.on_error(
                url,
                &format!("subscription {} closed: {}", subscription_id, message),
            );
        }
        RelayMessage::Notice { message } => {
            warn!("NOTICE from {}: {}", url, message);
            sink.on_error(url, &message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use relaykit_core::{EventTemplate, finalize_event};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const TEST_SECRET: [u8; 32] = [0x11; 32];
    const RELAY_URL: &str = "wss://relay.test";

    fn signed_event(content: &str) -> Event {
        let template = EventTemplate {
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![],
            content: content.to_string(),
        };
        finalize_event(&template, &TEST_SECRET).unwrap()
    }

    #[derive(Default)]
    struct RecordingSink {
        errors: StdMutex<Vec<String>>,
        events: StdMutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn on_error(&self, _relay_url: &str, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn on_event(&self, _relay_url: &str, subscription_id: &str, event: &Event) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:{}", subscription_id, event.id));
        }
    }

    // ===== Construction =====

    #[test]
    fn test_connection_creation() {
        let conn = RelayConnection::new("wss://relay.damus.io").unwrap();
        assert_eq!(conn.url(), "wss://relay.damus.io/");

        let conn = RelayConnection::new("ws://localhost:8080").unwrap();
        assert_eq!(conn.url(), "ws://localhost:8080/");
    }

    #[test]
    fn test_invalid_url_scheme() {
        let result = RelayConnection::new("https://relay.damus.io");
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));

        let result = RelayConnection::new("not a url");
        assert!(matches!(result, Err(ClientError::UrlParse(_))));
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 3);
    }

    #[tokio::test]
    async fn test_initial_state() {
        let conn = RelayConnection::new("wss://relay.test").unwrap();
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert!(!conn.is_connected().await);
    }

    // ===== Guards while disconnected =====

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let conn = RelayConnection::new("wss://relay.test").unwrap();
        let event = signed_event("hello");

        let result = conn.publish(&event).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert!(conn.publish_outcomes().await.is_empty());
        assert_eq!(conn.publish_status(&event.id).await, None);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let conn = RelayConnection::new("wss://relay.test").unwrap();
        let result = conn
            .send_message(&ClientMessage::Close {
                subscription_id: "sub1".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let conn = RelayConnection::new("wss://relay.test").unwrap();
        assert!(conn.disconnect().await.is_ok());
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_rejects_unsigned_event() {
        let conn = RelayConnection::new("wss://relay.test").unwrap();
        let mut event = signed_event("hello");
        event.sig = String::new();

        let result = conn.publish(&event).await;
        assert!(matches!(result, Err(ClientError::InvalidEvent(_))));
    }

    // ===== Connect failure policy =====

    #[tokio::test]
    async fn test_failed_connect_without_retry_budget() {
        let config = ConnectionConfig {
            connect_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_attempts: 0,
        };
        // Port 1 refuses immediately, so this stays offline and fast.
        let conn = RelayConnection::with_config("ws://127.0.0.1:1", config).unwrap();

        assert!(conn.connect().await.is_err());
        assert_eq!(conn.state().await, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_failed_connect_retries_then_fails() {
        let config = ConnectionConfig {
            connect_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_attempts: 2,
        };
        let conn = RelayConnection::with_config("ws://127.0.0.1:1", config).unwrap();

        assert!(conn.connect().await.is_err());
        let state = conn.state().await;
        assert!(
            state == ConnectionState::Reconnecting || state == ConnectionState::Failed,
            "unexpected state: {:?}",
            state
        );

        let mut state = conn.state().await;
        for _ in 0..200 {
            if state == ConnectionState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = conn.state().await;
        }
        assert_eq!(state, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_reconnect_exhaustion_reported_to_sink() {
        let config = ConnectionConfig {
            connect_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_attempts: 2,
        };
        let recording = Arc::new(RecordingSink::default());
        let conn = RelayConnection::with_shared(
            "ws://127.0.0.1:1",
            config,
            SubscriptionRegistry::new(),
            recording.clone(),
        )
        .unwrap();

        assert!(conn.connect().await.is_err());

        let mut state = conn.state().await;
        for _ in 0..200 {
            if state == ConnectionState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = conn.state().await;
        }
        assert_eq!(state, ConnectionState::Failed);

        let errors = recording.errors.lock().unwrap();
        assert!(
            errors
                .iter()
                .any(|e| e.contains("giving up after 2 reconnect attempts")),
            "errors: {:?}",
            errors
        );
    }

    #[tokio::test]
    async fn test_event_error_queries() {
        let conn = RelayConnection::new("wss://relay.test").unwrap();
        assert!(!conn.has_event_errors().await);

        conn.pending_publishes
            .write()
            .await
            .insert("aaaa".to_string(), PublishOutcome::Unknown);
        assert!(!conn.has_event_error("aaaa").await);
        assert!(!conn.has_event_errors().await);

        conn.pending_publishes
            .write()
            .await
            .insert("bbbb".to_string(), PublishOutcome::Rejected("blocked".to_string()));
        assert!(conn.has_event_error("bbbb").await);
        assert!(!conn.has_event_error("aaaa").await);
        assert!(conn.has_event_errors().await);
    }

    // ===== Frame dispatch =====

    #[tokio::test]
    async fn test_event_dispatches_to_callback() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let id = registry
            .register(vec![Filter::new()], move |_, relay_url| {
                assert_eq!(relay_url, RELAY_URL);
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn EventSink> = recording.clone();
        let pending = RwLock::new(HashMap::new());

        let event = signed_event("hello");
        let frame = RelayMessage::Event {
            subscription_id: id.clone(),
            event: event.clone(),
        };
        handle_relay_message(frame, RELAY_URL, &registry, &sink, &pending).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], format!("{}:{}", id, event.id));
    }

    #[tokio::test]
    async fn test_event_for_unknown_subscription_dropped() {
        let registry = SubscriptionRegistry::new();
        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn EventSink> = recording.clone();
        let pending = RwLock::new(HashMap::new());

        let frame = RelayMessage::Event {
            subscription_id: "nobody".to_string(),
            event: signed_event("hello"),
        };
        handle_relay_message(frame, RELAY_URL, &registry, &sink, &pending).await;

        assert!(recording.events.lock().unwrap().is_empty());
        assert!(recording.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forged_event_dropped() {
        let registry = SubscriptionRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let id = registry
            .register(vec![Filter::new()], move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn EventSink> = recording.clone();
        let pending = RwLock::new(HashMap::new());

        // Valid structure, but the content no longer matches the id.
        let mut forged = signed_event("hello");
        forged.content = "tampered".to_string();

        let frame = RelayMessage::Event {
            subscription_id: id,
            event: forged,
        };
        handle_relay_message(frame, RELAY_URL, &registry, &sink, &pending).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(recording.events.lock().unwrap().is_empty());
        let errors = recording.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unverifiable"));
    }

    #[tokio::test]
    async fn test_ok_frames_track_outcomes() {
        let registry = SubscriptionRegistry::new();
        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn EventSink> = recording.clone();
        let pending = RwLock::new(HashMap::new());

        pending
            .write()
            .await
            .insert("aaaa".to_string(), PublishOutcome::Unknown);
        pending
            .write()
            .await
            .insert("bbbb".to_string(), PublishOutcome::Unknown);

        let accepted = RelayMessage::Ok {
            event_id: "aaaa".to_string(),
            success: true,
            message: String::new(),
        };
        handle_relay_message(accepted, RELAY_URL, &registry, &sink, &pending).await;

        let rejected = RelayMessage::Ok {
            event_id: "bbbb".to_string(),
            success: false,
            message: "blocked: spam".to_string(),
        };
        handle_relay_message(rejected, RELAY_URL, &registry, &sink, &pending).await;

        // An OK for an event this session never published changes nothing.
        let stray = RelayMessage::Ok {
            event_id: "cccc".to_string(),
            success: true,
            message: String::new(),
        };
        handle_relay_message(stray, RELAY_URL, &registry, &sink, &pending).await;

        let table = pending.read().await;
        assert_eq!(table.get("aaaa"), Some(&PublishOutcome::Accepted));
        assert_eq!(
            table.get("bbbb"),
            Some(&PublishOutcome::Rejected("blocked: spam".to_string()))
        );
        assert_eq!(table.get("cccc"), None);

        let errors = recording.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("blocked: spam"));
    }

    #[tokio::test]
    async fn test_eose_marks_registry() {
        let registry = SubscriptionRegistry::new();
        let id = registry.register(vec![Filter::new()], |_, _| {}).await;
        registry.add_relay(&id, RELAY_URL).await;

        let sink: Arc<dyn EventSink> = Arc::new(NullSink);
        let pending = RwLock::new(HashMap::new());

        assert!(!registry.all_eose(&id).await);
        let frame = RelayMessage::Eose {
            subscription_id: id.clone(),
        };
        handle_relay_message(frame, RELAY_URL, &registry, &sink, &pending).await;
        assert!(registry.all_eose(&id).await);
    }

    #[tokio::test]
    async fn test_closed_drops_relay_from_subscription() {
        let registry = SubscriptionRegistry::new();
        let id = registry.register(vec![Filter::new()], |_, _| {}).await;
        registry.add_relay(&id, RELAY_URL).await;
        registry.mark_eose(&id, RELAY_URL).await;
        assert!(registry.all_eose(&id).await);

        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn EventSink> = recording.clone();
        let pending = RwLock::new(HashMap::new());

        let frame = RelayMessage::Closed {
            subscription_id: id.clone(),
            message: "rate limited".to_string(),
        };
        handle_relay_message(frame, RELAY_URL, &registry, &sink, &pending).await;

        // No carriers left, so the subscription is no longer complete.
        assert!(!registry.all_eose(&id).await);
        let errors = recording.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("rate limited"));
    }

    #[tokio::test]
    async fn test_notice_reaches_sink() {
        let registry = SubscriptionRegistry::new();
        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn EventSink> = recording.clone();
        let pending = RwLock::new(HashMap::new());

        let frame = RelayMessage::Notice {
            message: "slow down".to_string(),
        };
        handle_relay_message(frame, RELAY_URL, &registry, &sink, &pending).await;

        let errors = recording.errors.lock().unwrap();
        assert_eq!(errors.as_slice(), ["slow down"]);
    }
}
