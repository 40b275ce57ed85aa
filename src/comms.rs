//! Message bus — out-of-band module cooperation
//!
//! Pub/sub channels independent of the event graph, for modules that need
//! to coordinate without direct dependencies (cache invalidation, shared
//! rate-limit back-off). Delivery is synchronous on the publisher's thread;
//! handler errors are isolated and counted. Not on the event-dispatch
//! critical path.

use crate::config::defaults;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::warn;

/// Message delivery priority (informational; delivery is synchronous).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePriority {
    High,
    Normal,
    Low,
}

/// A message sent between modules.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub channel: String,
    pub payload: Value,
    pub sender: String,
    pub priority: MessagePriority,
    /// Unix millis.
    pub timestamp: i64,
    /// Channel to send a reply to, for request/reply exchanges.
    pub reply_to: Option<String>,
    pub correlation_id: String,
}

/// Statistics for one channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub subscriber_count: u64,
    pub errors: u64,
    pub last_message_at: Option<i64>,
}

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handlers return `Err` to have the failure counted against the channel.
pub type Handler = Arc<dyn Fn(&Message) -> Result<(), String> + Send + Sync>;
type Filter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Options for [`MessageBus::publish_with`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: Option<MessagePriority>,
    pub correlation_id: String,
    pub reply_to: Option<String>,
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    stats: HashMap<String, ChannelStats>,
    filters: HashMap<String, Vec<Filter>>,
    log: VecDeque<Message>,
}

/// Pub/sub message bus for inter-module communication.
///
/// Injectable: components take `&MessageBus` (or an `Arc`), and
/// [`global_bus`] provides the default process-wide instance.
pub struct MessageBus {
    state: Mutex<BusState>,
    enabled: AtomicBool,
    next_id: AtomicU64,
    log_limit: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            enabled: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            log_limit: defaults::BUS_LOG_LIMIT,
        }
    }

    /// Subscribe a handler to a channel.
    pub fn subscribe(&self, channel: &str, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.entry(channel.to_string()).or_default().push((id, handler));
            state.stats.entry(channel.to_string()).or_default().subscriber_count += 1;
        }
        id
    }

    /// Remove a subscription. Returns false when the token is unknown.
    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let Ok(mut state) = self.state.lock() else { return false };
        let Some(handlers) = state.subscribers.get_mut(channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sub_id, _)| *sub_id != id);
        let removed = before != handlers.len();
        if removed {
            if let Some(stats) = state.stats.get_mut(channel) {
                stats.subscriber_count = stats.subscriber_count.saturating_sub(1);
            }
        }
        removed
    }

    /// Publish a payload to a channel.
    ///
    /// Returns the number of subscribers that received the message. Filters
    /// run first; any filter returning false drops the message.
    pub fn publish(&self, channel: &str, payload: Value, sender: &str) -> usize {
        self.publish_with(channel, payload, sender, PublishOptions::default())
    }

    pub fn publish_with(&self, channel: &str, payload: Value, sender: &str, opts: PublishOptions) -> usize {
        if !self.enabled.load(Ordering::Acquire) {
            return 0;
        }

        let message = Message {
            channel: channel.to_string(),
            payload,
            sender: sender.to_string(),
            priority: opts.priority.unwrap_or(MessagePriority::Normal),
            timestamp: Utc::now().timestamp_millis(),
            reply_to: opts.reply_to,
            correlation_id: opts.correlation_id,
        };

        // Snapshot handlers and filters, then deliver outside the lock so
        // handlers may publish replies without deadlocking.
        let (handlers, filters) = {
            let Ok(mut state) = self.state.lock() else { return 0 };
            let stats = state.stats.entry(channel.to_string()).or_default();
            stats.messages_sent += 1;
            stats.last_message_at = Some(message.timestamp);
            if state.log.len() >= self.log_limit {
                state.log.pop_front();
            }
            state.log.push_back(message.clone());
            (
                state.subscribers.get(channel).cloned().unwrap_or_default(),
                state.filters.get(channel).cloned().unwrap_or_default(),
            )
        };

        for filter in &filters {
            if !filter(&message) {
                return 0;
            }
        }

        let mut delivered = 0;
        let mut errors = 0;
        for (_, handler) in &handlers {
            match handler(&message) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    errors += 1;
                    warn!(channel = channel, sender = sender, error = %error, "Message handler failed");
                }
            }
        }

        if let Ok(mut state) = self.state.lock() {
            let stats = state.stats.entry(channel.to_string()).or_default();
            stats.messages_delivered += delivered as u64;
            stats.errors += errors as u64;
        }

        delivered
    }

    /// Publish to every registered channel.
    pub fn broadcast(&self, payload: &Value, sender: &str) -> usize {
        let channels = self.channels();
        let mut total = 0;
        for channel in channels {
            total += self.publish(&channel, payload.clone(), sender);
        }
        total
    }

    /// Send a request and wait for a reply on a one-shot reply channel.
    ///
    /// The handler must publish its response to `message.reply_to`. Returns
    /// `None` on timeout; the temporary subscription is always cleaned up.
    pub fn request(&self, channel: &str, payload: Value, sender: &str, timeout: Duration) -> Option<Value> {
        let nonce: u64 = rand::random();
        let reply_channel = format!("_reply_{channel}_{nonce}");

        let (tx, rx) = std::sync::mpsc::channel::<Value>();
        let tx = Mutex::new(tx);
        let sub_id = self.subscribe(
            &reply_channel,
            Arc::new(move |message| {
                let Ok(tx) = tx.lock() else {
                    return Err("reply sink poisoned".to_string());
                };
                tx.send(message.payload.clone()).map_err(|e| e.to_string())
            }),
        );

        self.publish_with(
            channel,
            payload,
            sender,
            PublishOptions {
                reply_to: Some(reply_channel.clone()),
                correlation_id: format!("{nonce}"),
                ..PublishOptions::default()
            },
        );

        let reply = rx.recv_timeout(timeout).ok();
        self.unsubscribe(&reply_channel, sub_id);
        if reply.is_none() {
            self.clear_channel(&reply_channel);
        }
        reply
    }

    /// Add a message filter to a channel. Filters returning false drop the
    /// message before any handler sees it.
    pub fn add_filter<F>(&self, channel: &str, filter: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        if let Ok(mut state) = self.state.lock() {
            state.filters.entry(channel.to_string()).or_default().push(Arc::new(filter));
        }
    }

    /// All channels with at least one subscriber or recorded stat, sorted.
    pub fn channels(&self) -> Vec<String> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut channels: Vec<String> = state.subscribers.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn channel_stats(&self, channel: &str) -> Option<ChannelStats> {
        self.state.lock().ok()?.stats.get(channel).cloned()
    }

    pub fn all_stats(&self) -> BTreeMap<String, ChannelStats> {
        self.state
            .lock()
            .map(|s| s.stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Recent messages, optionally restricted to one channel.
    pub fn message_log(&self, channel: Option<&str>, limit: usize) -> Vec<Message> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let filtered: Vec<&Message> = state
            .log
            .iter()
            .filter(|m| channel.map_or(true, |c| m.channel == c))
            .collect();
        filtered.into_iter().rev().take(limit).rev().cloned().collect()
    }

    /// Remove all subscribers, filters, and stats for a channel.
    pub fn clear_channel(&self, channel: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.remove(channel);
            state.stats.remove(channel);
            state.filters.remove(channel);
        }
    }

    /// Clear all channels, subscribers, stats, and the message log.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = BusState::default();
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Disable delivery: publishes become no-ops returning 0.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().map(|s| s.subscribers.len()).unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.subscribers.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// Process-wide default bus. Tests construct their own instances.
pub fn global_bus() -> &'static MessageBus {
    static BUS: OnceLock<MessageBus> = OnceLock::new();
    BUS.get_or_init(MessageBus::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_reaches_subscribers() {
        let bus = MessageBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        {
            let received = Arc::clone(&received);
            bus.subscribe(
                "dns_results",
                Arc::new(move |message| {
                    received.lock().unwrap().push(message.payload.clone());
                    Ok(())
                }),
            );
        }

        let delivered = bus.publish("dns_results", json!({"ip": "1.2.3.4"}), "htm_dns");
        assert_eq!(delivered, 1);
        assert_eq!(received.lock().unwrap().len(), 1);

        let stats = bus.channel_stats("dns_results").unwrap();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_delivered, 1);
        assert!(stats.last_message_at.is_some());
    }

    #[test]
    fn unsubscribe_by_token() {
        let bus = MessageBus::new();
        let id = bus.subscribe("c", Arc::new(|_| Ok(())));
        assert_eq!(bus.total_subscribers(), 1);
        assert!(bus.unsubscribe("c", id));
        assert_eq!(bus.total_subscribers(), 0);
        assert!(!bus.unsubscribe("c", id));
        assert_eq!(bus.publish("c", json!(1), "m"), 0);
    }

    #[test]
    fn handler_errors_are_isolated() {
        let bus = MessageBus::new();
        bus.subscribe("c", Arc::new(|_| Err("boom".to_string())));
        bus.subscribe("c", Arc::new(|_| Ok(())));

        let delivered = bus.publish("c", json!(null), "m");
        assert_eq!(delivered, 1);
        let stats = bus.channel_stats("c").unwrap();
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn filters_drop_messages() {
        let bus = MessageBus::new();
        let count = Arc::new(AtomicU64::new(0));
        {
            let count = Arc::clone(&count);
            bus.subscribe(
                "c",
                Arc::new(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        bus.add_filter("c", |message| message.sender != "blocked");

        assert_eq!(bus.publish("c", json!(1), "ok"), 1);
        assert_eq!(bus.publish("c", json!(1), "blocked"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_reply_round_trip() {
        let bus = Arc::new(MessageBus::new());
        {
            let bus_for_handler: Arc<MessageBus> = Arc::clone(&bus);
            bus.subscribe(
                "dns_lookup",
                Arc::new(move |message| {
                    let reply_to = message.reply_to.clone().ok_or("no reply channel")?;
                    let name = message.payload.as_str().unwrap_or_default();
                    bus_for_handler.publish(&reply_to, json!(format!("{name} -> 1.2.3.4")), "resolver");
                    Ok(())
                }),
            );
        }

        let reply = bus.request("dns_lookup", json!("example.com"), "htm_ssl", Duration::from_secs(1));
        assert_eq!(reply.unwrap(), json!("example.com -> 1.2.3.4"));
    }

    #[test]
    fn request_times_out_cleanly() {
        let bus = MessageBus::new();
        let reply = bus.request("nobody_home", json!(1), "m", Duration::from_millis(30));
        assert!(reply.is_none());
        // The temporary reply channel must not linger
        assert!(bus.channels().iter().all(|c| !c.starts_with("_reply_")));
    }

    #[test]
    fn broadcast_hits_every_channel() {
        let bus = MessageBus::new();
        let count = Arc::new(AtomicU64::new(0));
        for channel in ["a", "b", "c"] {
            let count = Arc::clone(&count);
            bus.subscribe(
                channel,
                Arc::new(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        assert_eq!(bus.broadcast(&json!("ping"), "m"), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn disable_stops_delivery() {
        let bus = MessageBus::new();
        bus.subscribe("c", Arc::new(|_| Ok(())));
        bus.disable();
        assert!(!bus.is_enabled());
        assert_eq!(bus.publish("c", json!(1), "m"), 0);
        bus.enable();
        assert_eq!(bus.publish("c", json!(1), "m"), 1);
    }

    #[test]
    fn message_log_filters_and_limits() {
        let bus = MessageBus::new();
        bus.subscribe("a", Arc::new(|_| Ok(())));
        bus.subscribe("b", Arc::new(|_| Ok(())));
        for n in 0..5 {
            bus.publish("a", json!(n), "m");
        }
        bus.publish("b", json!("x"), "m");

        assert_eq!(bus.message_log(None, 100).len(), 6);
        let a_log = bus.message_log(Some("a"), 3);
        assert_eq!(a_log.len(), 3);
        // Most recent three of channel a, in order
        assert_eq!(a_log[2].payload, json!(4));
    }

    #[test]
    fn clear_channel_and_reset() {
        let bus = MessageBus::new();
        bus.subscribe("a", Arc::new(|_| Ok(())));
        bus.subscribe("b", Arc::new(|_| Ok(())));
        bus.clear_channel("a");
        assert_eq!(bus.channel_count(), 1);
        bus.reset();
        assert_eq!(bus.channel_count(), 0);
        assert!(bus.message_log(None, 10).is_empty());
    }
}
