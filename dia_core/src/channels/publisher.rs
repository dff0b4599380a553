//! Channel event fan-out.
//!
//! Two subscription tables: keyed subscribers receive `NEW_SAMPLE` for
//! one channel, wildcard subscribers receive `CHANNEL_ADDED` and
//! `CHANNEL_REMOVED` for every channel. Every event is also forwarded to
//! the attached logging sink.

use dia_common::channel::{ChannelEventKind, ChannelSnapshot, LoggingEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

use crate::logging::LoggingSink;

/// Error a subscriber may return; logged and suppressed.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback.
pub type Subscriber = Arc<dyn Fn(&ChannelEvent) -> Result<(), SubscriberError> + Send + Sync>;

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    /// Event kind.
    pub kind: ChannelEventKind,
    /// Channel state when the event fired.
    pub channel: ChannelSnapshot,
}

/// Handle returned by the subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SubscriberList = Vec<(SubscriptionId, Subscriber)>;

/// Subscription tables of one channel database.
#[derive(Default)]
pub struct ChannelPublisher {
    keyed: RwLock<HashMap<String, SubscriberList>>,
    wildcard: RwLock<SubscriberList>,
    next_id: AtomicU64,
    logging: RwLock<Option<Weak<dyn LoggingSink>>>,
}

impl ChannelPublisher {
    /// Empty publisher without a logging sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Forward every event to `sink` as a logging event.
    pub fn attach_logging(&self, sink: Weak<dyn LoggingSink>) {
        *self.logging.write() = Some(sink);
    }

    /// Stop forwarding to the logging sink.
    pub fn detach_logging(&self) {
        *self.logging.write() = None;
    }

    // ─── Subscriptions ──────────────────────────────────────────────

    /// Receive `NEW_SAMPLE` events for `channel`.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.keyed
            .write()
            .entry(channel.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Receive `CHANNEL_ADDED` and `CHANNEL_REMOVED` for every channel.
    pub fn subscribe_new_channels<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.wildcard.write().push((id, Arc::new(callback)));
        id
    }

    /// Drop a keyed subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut keyed = self.keyed.write();
        let Some(list) = keyed.get_mut(channel) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            keyed.remove(channel);
        }
        removed
    }

    /// Drop a wildcard subscription. Returns false if it was not registered.
    pub fn unsubscribe_new_channels(&self, id: SubscriptionId) -> bool {
        let mut wildcard = self.wildcard.write();
        let before = wildcard.len();
        wildcard.retain(|(sid, _)| *sid != id);
        wildcard.len() != before
    }

    /// Drop every keyed subscription on `channel`. Missing entries are tolerated.
    pub fn remove_channel(&self, channel: &str) {
        self.keyed.write().remove(channel);
    }

    /// Number of keyed subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.keyed.read().get(channel).map_or(0, Vec::len)
    }

    // ─── Fan-out ────────────────────────────────────────────────────

    /// Fire an event on the caller's thread.
    ///
    /// Subscribers run in insertion order. A failing or panicking
    /// subscriber is logged and the remaining ones still run.
    pub fn publish(&self, kind: ChannelEventKind, channel: ChannelSnapshot) {
        let subscribers: SubscriberList = match kind {
            ChannelEventKind::NewSample => self
                .keyed
                .read()
                .get(&channel.name)
                .cloned()
                .unwrap_or_default(),
            ChannelEventKind::ChannelAdded | ChannelEventKind::ChannelRemoved => {
                self.wildcard.read().clone()
            }
        };

        let event = ChannelEvent { kind, channel };
        trace!(
            "Publishing {:?} for {} to {} subscribers",
            kind,
            event.channel.name,
            subscribers.len()
        );
        for (_, callback) in &subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(channel = %event.channel.name, "Subscriber failed on {:?}: {}", kind, e);
                }
                Err(_) => {
                    error!(channel = %event.channel.name, "Subscriber panicked on {:?}", kind);
                }
            }
        }

        self.forward_to_logging(event);
    }

    fn forward_to_logging(&self, event: ChannelEvent) {
        let sink = self.logging.read().as_ref().and_then(Weak::upgrade);
        let Some(sink) = sink else {
            return;
        };
        let name = event.channel.name.clone();
        if let Err(e) = sink.dispatch_logging_event(LoggingEvent::for_channel(event.kind, event.channel)) {
            error!(channel = %name, "Logging dispatch failed: {}", e);
        }
    }
}
