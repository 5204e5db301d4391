//! Subscription management shared across relay sessions.
//!
//! A subscription is registered once and carries its own callback; every
//! session consults the registry when an EVENT frame arrives, and the
//! pool replays registered subscriptions to relays that join later.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relaykit_core::Event;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::message::Filter;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Callback invoked for each verified event, with the relay it came from.
pub type EventCallback = Arc<dyn Fn(&Event, &str) + Send + Sync>;

/// Builder for composing multi-filter subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionBuilder {
    filters: Vec<Filter>,
}

impl SubscriptionBuilder {
    /// Create a new subscription builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter to the subscription.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a filter for specific event kinds.
    pub fn kinds(self, kinds: Vec<u16>) -> Self {
        self.filter(Filter::new().kinds(kinds))
    }

    /// Add a filter for events from specific authors.
    pub fn authors(self, authors: Vec<String>) -> Self {
        self.filter(Filter::new().authors(authors))
    }

    /// Add a filter for specific event IDs.
    pub fn ids(self, ids: Vec<String>) -> Self {
        self.filter(Filter::new().ids(ids))
    }

    /// Build the subscription filters.
    pub fn build(self) -> Vec<Filter> {
        self.filters
    }
}

/// An active subscription: its filters, callback and per-relay state.
#[derive(Clone)]
pub struct Subscription {
    /// Subscription ID sent in REQ frames.
    pub id: String,
    /// Filters for this subscription.
    pub filters: Vec<Filter>,
    /// Callback invoked for each verified event.
    pub callback: EventCallback,
    /// Relays the subscription has been issued to.
    pub relays: HashSet<String>,
    /// Relays that have sent EOSE.
    pub eose_relays: HashSet<String>,
    /// Whether EOSE has been received from every issued relay.
    pub all_eose: bool,
}

impl Subscription {
    fn new(id: String, filters: Vec<Filter>, callback: EventCallback) -> Self {
        Self {
            id,
            filters,
            callback,
            relays: HashSet::new(),
            eose_relays: HashSet::new(),
            all_eose: false,
        }
    }

    fn update_all_eose(&mut self) {
        self.all_eose =
            !self.relays.is_empty() && self.relays.iter().all(|r| self.eose_relays.contains(r));
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filters", &self.filters)
            .field("relays", &self.relays)
            .field("eose_relays", &self.eose_relays)
            .field("all_eose", &self.all_eose)
            .finish_non_exhaustive()
    }
}

/// Registry of active subscriptions, shared by every session and the pool.
///
/// Cloning is cheap and all clones see the same table.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription under a fresh unique ID and return it.
    pub async fn register<F>(&self, filters: Vec<Filter>, callback: F) -> String
    where
        F: Fn(&Event, &str) + Send + Sync + 'static,
    {
        self.register_with_id(generate_subscription_id(), filters, callback)
            .await
    }

    /// Register a subscription under a caller-chosen ID.
    ///
    /// Re-registering an existing ID replaces its filters and callback but
    /// keeps no relay state; sessions will issue it afresh.
    pub async fn register_with_id<F>(
        &self,
        id: impl Into<String>,
        filters: Vec<Filter>,
        callback: F,
    ) -> String
    where
        F: Fn(&Event, &str) + Send + Sync + 'static,
    {
        let id = id.into();
        let subscription = Subscription::new(id.clone(), filters, Arc::new(callback));
        self.subscriptions
            .write()
            .await
            .insert(id.clone(), subscription);
        id
    }

    /// Remove a subscription. Returns false if the ID was not registered.
    pub async fn unregister(&self, id: &str) -> bool {
        self.subscriptions.write().await.remove(id).is_some()
    }

    /// Look up the callback for a subscription ID.
    pub async fn callback_for(&self, id: &str) -> Option<EventCallback> {
        self.subscriptions
            .read()
            .await
            .get(id)
            .map(|s| Arc::clone(&s.callback))
    }

    /// Look up the filters for a subscription ID.
    pub async fn filters_for(&self, id: &str) -> Option<Vec<Filter>> {
        self.subscriptions
            .read()
            .await
            .get(id)
            .map(|s| s.filters.clone())
    }

    /// Whether the given subscription ID is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.subscriptions.read().await.contains_key(id)
    }

    /// Record that a subscription has been issued to a relay.
    pub async fn add_relay(&self, id: &str, relay_url: &str) {
        if let Some(sub) = self.subscriptions.write().await.get_mut(id) {
            sub.relays.insert(relay_url.to_string());
            sub.update_all_eose();
        }
    }

    /// Drop a relay from one subscription, e.g. after a CLOSED frame.
    pub async fn drop_relay(&self, id: &str, relay_url: &str) {
        if let Some(sub) = self.subscriptions.write().await.get_mut(id) {
            sub.relays.remove(relay_url);
            sub.eose_relays.remove(relay_url);
            sub.update_all_eose();
        }
    }

    /// Drop a relay from every subscription, e.g. when it is removed.
    pub async fn remove_relay(&self, relay_url: &str) {
        let mut subs = self.subscriptions.write().await;
        for sub in subs.values_mut() {
            sub.relays.remove(relay_url);
            sub.eose_relays.remove(relay_url);
            sub.update_all_eose();
        }
    }

    /// Mark EOSE received from a relay. Returns false for unknown IDs.
    /// An EOSE from a relay that no longer carries the subscription is
    /// ignored, so a late frame cannot un-complete a finished set.
    pub async fn mark_eose(&self, id: &str, relay_url: &str) -> bool {
        let mut subs = self.subscriptions.write().await;
        match subs.get_mut(id) {
            Some(sub) => {
                if sub.relays.contains(relay_url) {
                    sub.eose_relays.insert(relay_url.to_string());
                    sub.update_all_eose();
                }
                true
            }
            None => false,
        }
    }

    /// Whether every relay carrying this subscription has sent EOSE.
    ///
    /// A subscription issued to no relay is never complete.
    pub async fn all_eose(&self, id: &str) -> bool {
        self.subscriptions
            .read()
            .await
            .get(id)
            .map(|s| s.all_eose)
            .unwrap_or(false)
    }

    /// Snapshot of (id, filters) for every registered subscription.
    ///
    /// Sessions use this to replay REQ frames after a relay joins or
    /// reconnects.
    pub async fn snapshot(&self) -> Vec<(String, Vec<Filter>)> {
        self.subscriptions
            .read()
            .await
            .values()
            .map(|s| (s.id.clone(), s.filters.clone()))
            .collect()
    }

    /// Number of registered subscriptions.
    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }
}
