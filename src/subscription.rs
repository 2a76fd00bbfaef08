use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{Client, ClientError};
use crate::frame::Frame;

/// Callback invoked for every MESSAGE frame delivered to a subscription.
///
/// Runs on the connection's dispatch task, strictly serialized with all
/// other inbound handling; blocking here stalls further dispatch for the
/// whole connection, heartbeats included.
pub type MessageCallback = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Acknowledgment handle captured from a delivered MESSAGE frame.
///
/// An explicit `(message-id, subscription)` pair rather than a closure, so
/// it can be stored, cloned, or handed to [`crate::client::ack`] /
/// [`crate::client::nack`] at any later point. Constructed fresh for each
/// delivery; never stored by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckHandle {
    /// Value of the frame's `message-id` header.
    pub message_id: String,
    /// Id of the subscription the message was delivered under.
    pub subscription_id: String,
}

/// A MESSAGE frame together with its acknowledgment handle.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivered MESSAGE frame.
    pub frame: Frame,
    /// Handle for acknowledging or rejecting this message.
    pub ack: AckHandle,
}

pub(crate) struct SubscriptionEntry {
    pub(crate) destination: String,
    pub(crate) callback: MessageCallback,
}

/// Per-connection subscription registry.
///
/// Sole authority for subscription id uniqueness: ids are minted from a
/// monotonic counter as `sub-0`, `sub-1`, ... unless the caller supplied
/// its own `id` header.
pub(crate) struct Registry {
    entries: HashMap<String, SubscriptionEntry>,
    counter: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            counter: 0,
        }
    }

    pub(crate) fn mint_id(&mut self) -> String {
        let id = format!("sub-{}", self.counter);
        self.counter += 1;
        id
    }

    pub(crate) fn insert(&mut self, id: String, destination: String, callback: MessageCallback) {
        self.entries
            .insert(id, SubscriptionEntry { destination, callback });
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<SubscriptionEntry> {
        self.entries.remove(id)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Clone out the callback so the lock can be released before invoking it.
    pub(crate) fn callback(&self, id: &str) -> Option<MessageCallback> {
        self.entries.get(id).map(|e| e.callback.clone())
    }

    /// Snapshot of the currently registered ids. Used by disconnect, which
    /// mutates the registry while iterating.
    pub(crate) fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Handle returned from [`Client::subscribe`] packaging the subscription id
/// and destination with a clone of the owning client, so the subscription
/// can be torn down without keeping the original `Client` around.
pub struct Subscription {
    id: String,
    destination: String,
    client: Client,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(id: String, destination: String, client: Client) -> Self {
        Self {
            id,
            destination,
            client,
        }
    }

    /// The subscription id (`sub-N` unless caller-supplied).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The destination this subscription listens to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Remove the registration and send UNSUBSCRIBE. Delegates to
    /// [`Client::unsubscribe`] with the local id.
    pub fn unsubscribe(self) -> Result<(), ClientError> {
        self.client.unsubscribe(&self.id)
    }
}
