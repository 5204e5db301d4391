//! Relay pool for managing sessions with multiple relays.
//!
//! The pool fans publishes and subscriptions out to every relay it
//! holds and reports per-relay results, so callers see exactly which
//! relays took an operation. All sessions share one
//! [`SubscriptionRegistry`] and one [`EventSink`], so an event is
//! handled the same way no matter which relay delivered it.

use crate::connection::{ConnectionConfig, ConnectionState, PublishOutcome, RelayConnection};
use crate::error::{ClientError, Result};
use crate::message::Filter;
use crate::sink::{EventSink, NullSink};
use crate::subscription::SubscriptionRegistry;
use relaykit_core::{Event, EventTemplate, KeyPair, finalize_event};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

/// A pool of relay sessions sharing one registry and one sink.
pub struct RelayPool {
    /// Sessions indexed by normalized URL.
    connections: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
    /// Subscriptions shared by every session.
    registry: SubscriptionRegistry,
    /// Observer shared by every session.
    sink: Arc<dyn EventSink>,
    /// Configuration applied to every session the pool creates.
    config: ConnectionConfig,
}

impl RelayPool {
    /// Create an empty pool with default configuration and no sink.
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    /// Create an empty pool with custom session configuration.
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Create an empty pool with a custom session configuration and an
    /// observer for connection and event activity.
    pub fn with_sink(config: ConnectionConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            registry: SubscriptionRegistry::new(),
            sink,
            config,
        }
    }

    /// The registry shared by all sessions in this pool.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// All relay URLs in the pool, in normalized form.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Session states for all relays.
    pub async fn states(&self) -> HashMap<String, ConnectionState> {
        let mut states = HashMap::new();
        for (url, conn) in self.snapshot().await {
            states.insert(url, conn.state().await);
        }
        states
    }

    /// Whether a specific relay session is open.
    pub async fn is_connected(&self, url: &str) -> bool {
        let key = normalize_url(url);
        match self.connections.read().await.get(&key) {
            Some(conn) => conn.is_connected().await,
            None => false,
        }
    }

    /// How many relay sessions are open.
    pub async fn connected_count(&self) -> usize {
        let mut count = 0;
        for (_, conn) in self.snapshot().await {
            if conn.is_connected().await {
                count += 1;
            }
        }
        count
    }

    /// Add a relay and connect to it.
    ///
    /// Subscriptions already registered are issued to the new relay as
    /// part of connecting, so late relays carry the same subscriptions
    /// as the rest of the pool. On a connect failure the relay stays in
    /// the pool and can be retried with [`RelayPool::connect_relay`].
    pub async fn add_relay(&self, url: &str) -> Result<()> {
        let conn = Arc::new(RelayConnection::with_shared(
            url,
            self.config.clone(),
            self.registry.clone(),
            Arc::clone(&self.sink),
        )?);
        let key = conn.url().to_string();

        {
            let mut conns = self.connections.write().await;
            if conns.contains_key(&key) {
                return Err(ClientError::Connection(format!(
                    "relay already in pool: {}",
                    key
                )));
            }
            conns.insert(key.clone(), Arc::clone(&conn));
        }

        info!("Added relay to pool: {}", key);
        conn.connect().await
    }

    /// Disconnect a relay and drop it from the pool. Removing a relay
    /// the pool does not hold is a no-op.
    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        let key = normalize_url(url);
        let conn = self.connections.write().await.remove(&key);

        if let Some(conn) = conn {
            info!("Removing relay from pool: {}", key);
            conn.disconnect().await?;
        }
        Ok(())
    }

    /// Connect a relay that is already in the pool, e.g. one whose
    /// session failed or was disconnected.
    pub async fn connect_relay(&self, url: &str) -> Result<()> {
        let key = normalize_url(url);
        let conn = match self.connections.read().await.get(&key) {
            Some(conn) => Arc::clone(conn),
            None => {
                return Err(ClientError::Connection(format!(
                    "relay not in pool: {}",
                    key
                )));
            }
        };
        conn.connect().await
    }

    /// Reconnect every relay that is not currently open. Already-open
    /// sessions are left alone.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let mut results = Vec::new();
        for (url, conn) in self.snapshot().await {
            match conn.state().await {
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    results.push((url, conn.connect().await));
                }
                _ => {}
            }
        }
        results
    }

    /// Disconnect every relay in the pool.
    pub async fn disconnect_all(&self) {
        for (url, conn) in self.snapshot().await {
            if let Err(e) = conn.disconnect().await {
                warn!("Failed to disconnect {}: {}", url, e);
            }
        }
    }

    /// Publish a signed event to every relay in the pool.
    ///
    /// Returns one result per relay. Relays whose session is not open
    /// report [`ClientError::NotConnected`] rather than being skipped
    /// silently.
    pub async fn publish(&self, event: &Event) -> Vec<(String, Result<()>)> {
        let mut results = Vec::new();
        for (url, conn) in self.snapshot().await {
            results.push((url, conn.publish(event).await));
        }
        results
    }

    /// Publish a signed event to specific relays only.
    pub async fn publish_to(
        &self,
        event: &Event,
        relay_urls: &[String],
    ) -> Vec<(String, Result<()>)> {
        let conns = self.connections.read().await;
        let mut picked = Vec::new();
        for url in relay_urls {
            let key = normalize_url(url);
            match conns.get(&key) {
                Some(conn) => picked.push((key, Some(Arc::clone(conn)))),
                None => picked.push((key, None)),
            }
        }
        drop(conns);

        let mut results = Vec::new();
        for (url, conn) in picked {
            match conn {
                Some(conn) => results.push((url, conn.publish(event).await)),
                None => results.push((
                    url.clone(),
                    Err(ClientError::Connection(format!("relay not in pool: {}", url))),
                )),
            }
        }
        results
    }

    /// Finalize an event from a template and publish it everywhere.
    ///
    /// Returns the signed event together with the per-relay results, so
    /// the caller can track OK frames by the event id.
    pub async fn sign_and_publish(
        &self,
        template: &EventTemplate,
        keys: &KeyPair,
    ) -> Result<(Event, Vec<(String, Result<()>)>)> {
        let event = finalize_event(template, keys.secret_bytes())
            .map_err(|e| ClientError::InvalidEvent(e.to_string()))?;
        let results = self.publish(&event).await;
        Ok((event, results))
    }

    /// What each relay said about a published event. Relays that never
    /// saw the publish do not appear.
    pub async fn publish_status(&self, event_id: &str) -> Vec<(String, PublishOutcome)> {
        let mut results = Vec::new();
        for (url, conn) in self.snapshot().await {
            if let Some(outcome) = conn.publish_status(event_id).await {
                results.push((url, outcome));
            }
        }
        results
    }

    /// Whether any relay rejected a published event. A pool where every
    /// relay is still silent reports false; check
    /// [`RelayPool::publish_status`] to tell silence from acceptance.
    pub async fn has_event_error(&self, event_id: &str) -> bool {
        for (_, conn) in self.snapshot().await {
            if conn.has_event_error(event_id).await {
                return true;
            }
        }
        false
    }

    /// Subscribe on every open relay with a generated subscription id.
    ///
    /// The callback runs for each verified event, with the delivering
    /// relay's URL as its second argument. Returns the subscription id.
    pub async fn subscribe<F>(&self, filters: Vec<Filter>, callback: F) -> String
    where
        F: Fn(&Event, &str) + Send + Sync + 'static,
    {
        let id = self.registry.register(filters.clone(), callback).await;
        info!("Creating subscription {} with {} filters", id, filters.len());
        self.issue_subscription(&id, &filters).await;
        id
    }

    /// Subscribe on every open relay under a caller-chosen id. An
    /// existing subscription under the same id is replaced.
    pub async fn subscribe_with_id<F>(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
        callback: F,
    ) where
        F: Fn(&Event, &str) + Send + Sync + 'static,
    {
        self.registry
            .register_with_id(subscription_id, filters.clone(), callback)
            .await;
        info!(
            "Creating subscription {} with {} filters",
            subscription_id,
            filters.len()
        );
        self.issue_subscription(subscription_id, &filters).await;
    }

    /// Close a subscription on every open relay and forget it.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        info!("Closing subscription {}", subscription_id);

        for (url, conn) in self.snapshot().await {
            if conn.is_connected().await {
                if let Err(e) = conn.unsubscribe(subscription_id).await {
                    warn!("Failed to close {} on {}: {}", subscription_id, url, e);
                }
            }
        }

        self.registry.unregister(subscription_id).await;
    }

    /// Ids of all registered subscriptions.
    pub async fn subscription_ids(&self) -> Vec<String> {
        self.registry
            .snapshot()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether every relay carrying a subscription has reported EOSE.
    pub async fn subscription_complete(&self, subscription_id: &str) -> bool {
        self.registry.all_eose(subscription_id).await
    }

    /// Issue a REQ for a subscription on every open relay.
    async fn issue_subscription(&self, id: &str, filters: &[Filter]) {
        for (url, conn) in self.snapshot().await {
            if conn.is_connected().await {
                if let Err(e) = conn.subscribe(id, filters).await {
                    warn!("Failed to subscribe {} on {}: {}", id, url, e);
                }
            }
        }
    }

    /// Clone out the current session set so callers do not hold the
    /// map lock across awaits.
    async fn snapshot(&self) -> Vec<(String, Arc<RelayConnection>)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(url, conn)| (url.clone(), Arc::clone(conn)))
            .collect()
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Relay URLs act as map keys, so they are compared in parsed form.
/// Strings that do not parse are used as given.
fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    }
}
