//! Delivery seam between sessions and application code.

use relaykit_core::Event;

/// Callbacks a session invokes as relay traffic arrives.
///
/// All methods have empty defaults so implementations override only what
/// they care about. Implementations must be cheap and non-blocking; they
/// run on the session's receive task.
pub trait EventSink: Send + Sync {
    /// A relay connection reached the open state.
    fn on_connected(&self, _relay_url: &str) {}

    /// A relay connection closed, cleanly or not.
    fn on_disconnected(&self, _relay_url: &str) {}

    /// Something went wrong on a session: a NOTICE, a rejected publish,
    /// a dropped forged event.
    fn on_error(&self, _relay_url: &str, _message: &str) {}

    /// A verified event arrived for a subscription.
    fn on_event(&self, _relay_url: &str, _subscription_id: &str, _event: &Event) {}
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {}
