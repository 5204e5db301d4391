//! WebSocket relay client for the relaykit protocol engine.
//!
//! This crate provides:
//! - Managed relay sessions with automatic bounded reconnection
//! - Wire frame encoding and parsing for the relay protocol
//! - Shared subscription management with per-event callbacks
//! - A relay pool that fans publishes and subscriptions out to every
//!   relay and reports per-relay results
//!
//! Incoming events are signature-checked before any callback sees
//! them; events that fail verification are dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use relaykit_client::{Filter, RelayPool};
//! use relaykit_core::{unix_now, EventTemplate, KeyPair, KIND_SHORT_TEXT_NOTE};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = RelayPool::new();
//!     let _ = pool.add_relay("wss://relay.damus.io").await;
//!
//!     // Subscribe to text notes; the callback runs per verified event.
//!     let filter = Filter::new().kinds(vec![KIND_SHORT_TEXT_NOTE]).limit(10);
//!     let sub_id = pool
//!         .subscribe(vec![filter], |event, relay_url| {
//!             println!("{} from {}: {}", event.id, relay_url, event.content);
//!         })
//!         .await;
//!
//!     // Sign and publish a note, then watch for OK frames by id.
//!     let keys = KeyPair::generate();
//!     let template = EventTemplate {
//!         created_at: unix_now(),
//!         kind: KIND_SHORT_TEXT_NOTE,
//!         tags: vec![],
//!         content: "hello".to_string(),
//!     };
//!     let (event, results) = pool.sign_and_publish(&template, &keys).await.unwrap();
//!     println!("published {} to {} relays under {}", event.id, results.len(), sub_id);
//! }
//! ```

mod connection;
mod error;
mod message;
mod pool;
mod sink;
mod subscription;

// Re-export main types
pub use connection::{ConnectionConfig, ConnectionState, PublishOutcome, RelayConnection};
pub use error::{ClientError, Result};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use pool::RelayPool;
pub use sink::{EventSink, NullSink};
pub use subscription::{
    EventCallback, SubscriptionBuilder, SubscriptionRegistry, generate_subscription_id,
};
