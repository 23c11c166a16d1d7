//! # Event Bus
//!
//! Publish/subscribe across the server fleet.
//!
//! [`MessageBus`] is the raw transport port: strings in, strings out, at most
//! once. [`EventBus`] sits on top of it and adds what the fleet relies on:
//!
//! - **Origin stamping**: outgoing events carry this process's id
//! - **Retry**: publish is attempted up to [`RetryPolicy::max_attempts`]
//!   times with capped exponential backoff
//! - **Echo suppression**: inbound events stamped with our own id are dropped
//! - **Multiplexing**: one transport subscription per channel, fanned out to
//!   every local subscriber
//!
//! Inbound handling never fails back into the transport. Malformed messages
//! and failing subscribers are logged and counted.

use crate::error::{BusError, EventError};
use crate::events::{BusEvent, EventEnvelope};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// Transport port
// ============================================================================

/// Raw pub/sub transport shared by every process.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    /// Opens a subscription. Messages arrive on the returned receiver until
    /// [`MessageBus::unsubscribe`] is called for the channel.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>, BusError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;

    fn reconnect_attempts(&self) -> u64;
}

/// In-process stand-in for the shared pub/sub server.
///
/// Every [`InMemoryBus`] created with [`InMemoryBusHub::connect`] behaves like
/// one server process's connection. Publishers receive their own messages,
/// as they would from a real broker.
#[derive(Debug, Default)]
pub struct InMemoryBusHub {
    channels: DashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>,
    next_client: AtomicU64,
}

impl InMemoryBusHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(self: &Arc<Self>) -> InMemoryBus {
        InMemoryBus {
            hub: Arc::clone(self),
            client_id: self.next_client.fetch_add(1, Ordering::Relaxed),
            connected: Arc::new(AtomicBool::new(true)),
            failing_publishes: AtomicU32::new(0),
            publish_calls: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Number of transport subscriptions on `channel` across all clients.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Injects a raw message as if some other process had published it.
    pub fn inject(&self, channel: &str, payload: &str) {
        self.deliver(channel, payload);
    }

    fn deliver(&self, channel: &str, payload: &str) -> usize {
        let Some(mut subs) = self.channels.get_mut(channel) else {
            return 0;
        };
        subs.retain(|(_, tx)| !tx.is_closed());
        subs.iter()
            .filter(|(_, tx)| tx.send(payload.to_string()).is_ok())
            .count()
    }
}

/// One process's connection to an [`InMemoryBusHub`].
#[derive(Debug)]
pub struct InMemoryBus {
    hub: Arc<InMemoryBusHub>,
    client_id: u64,
    connected: Arc<AtomicBool>,
    failing_publishes: AtomicU32,
    publish_calls: AtomicU64,
    reconnects: AtomicU64,
}

impl InMemoryBus {
    /// Makes the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Drops or restores the link. Restoring counts as a reconnect.
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if connected && !was {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Raw publish calls seen by the transport, including failed ones.
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        self.publish_calls.fetch_add(1, Ordering::Relaxed);

        let injected_failure = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(BusError::PublishFailed {
                channel: channel.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }

        self.hub.deliver(channel, &payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>, BusError> {
        if !self.is_connected() {
            return Err(BusError::SubscribeFailed {
                channel: channel.to_string(),
                reason: "disconnected".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::clone(&self.connected);
        let (gated_tx, mut gated_rx) = mpsc::unbounded_channel::<String>();
        self.hub
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((self.client_id, gated_tx));

        // Messages published while this client is disconnected are lost.
        tokio::spawn(async move {
            while let Some(msg) = gated_rx.recv().await {
                if connected.load(Ordering::SeqCst) && tx.send(msg).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        if let Some(mut subs) = self.hub.channels.get_mut(channel) {
            subs.retain(|(client, _)| *client != self.client_id);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reconnect_attempts(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Publish retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// ============================================================================
// Subscribers
// ============================================================================

/// An inbound event that passed validation and echo suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub channel: String,
    pub origin_id: String,
    pub timestamp: i64,
    pub event: BusEvent,
}

/// Local consumer of bus events.
#[async_trait]
pub trait BusSubscriber: Send + Sync {
    async fn on_event(&self, event: &InboundEvent) -> Result<(), EventError>;
}

/// Adapts a synchronous closure into a [`BusSubscriber`].
pub struct FnSubscriber<F> {
    handler: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&InboundEvent) -> Result<(), EventError> + Send + Sync,
{
    pub fn new(handler: F) -> Arc<Self> {
        Arc::new(Self { handler })
    }
}

#[async_trait]
impl<F> BusSubscriber for FnSubscriber<F>
where
    F: Fn(&InboundEvent) -> Result<(), EventError> + Send + Sync,
{
    async fn on_event(&self, event: &InboundEvent) -> Result<(), EventError> {
        (self.handler)(event)
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct ChannelSubscription {
    subscribers: Vec<(SubscriptionId, Arc<dyn BusSubscriber>)>,
    pump: JoinHandle<()>,
}

// ============================================================================
// Statistics
// ============================================================================

/// Outbound counters for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Calls to [`EventBus::publish`].
    pub published: u64,
    /// Transport attempts, including retries.
    pub attempts: u64,
    pub succeeded: u64,
    /// Publishes that exhausted every attempt.
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub channels: BTreeMap<String, ChannelStats>,
    pub received: u64,
    pub processed: u64,
    pub callback_failures: u64,
    pub malformed: u64,
    pub self_echoes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusHealth {
    pub connected: bool,
    pub reconnect_attempts: u64,
    pub subscribed_channels: Vec<String>,
}

#[derive(Debug, Default)]
struct BusCounters {
    channels: DashMap<String, ChannelStats>,
    received: AtomicU64,
    processed: AtomicU64,
    callback_failures: AtomicU64,
    malformed: AtomicU64,
    self_echoes: AtomicU64,
}

impl BusCounters {
    fn outbound(&self, channel: &str, update: impl FnOnce(&mut ChannelStats)) {
        update(&mut self.channels.entry(channel.to_string()).or_default());
    }
}

// ============================================================================
// EventBus
// ============================================================================

pub struct EventBus {
    origin_id: String,
    transport: Arc<dyn MessageBus>,
    retry: RetryPolicy,
    subscriptions: Mutex<HashMap<String, ChannelSubscription>>,
    next_subscription: AtomicU64,
    counters: BusCounters,
}

impl EventBus {
    pub fn new(origin_id: impl Into<String>, transport: Arc<dyn MessageBus>, retry: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            origin_id: origin_id.into(),
            transport,
            retry,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            counters: BusCounters::default(),
        })
    }

    /// Identifier stamped on every event this process publishes.
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Publishes `event` on its channel.
    pub async fn emit(&self, event: &BusEvent) -> Result<(), BusError> {
        self.publish(event.channel(), event).await
    }

    /// Stamps, encodes and publishes `event`, retrying with backoff.
    ///
    /// Fails only after every attempt in the retry budget has failed.
    pub async fn publish(&self, channel: &str, event: &BusEvent) -> Result<(), BusError> {
        let payload = EventEnvelope::stamp(event, &self.origin_id)?.encode()?;
        self.counters.outbound(channel, |s| s.published += 1);

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.counters.outbound(channel, |s| s.attempts += 1);

            match self.transport.publish(channel, payload.clone()).await {
                Ok(()) => {
                    self.counters.outbound(channel, |s| s.succeeded += 1);
                    if attempt > 1 {
                        info!("📡 Published {} on '{}' after {} attempts", event.event_type().as_str(), channel, attempt);
                    }
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "⚠️ Publish attempt {}/{} on '{}' failed: {}; retrying in {:?}",
                        attempt, max_attempts, channel, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.counters.outbound(channel, |s| s.failed += 1);
                    error!("❌ Publish on '{}' failed after {} attempts: {}", channel, attempt, e);
                    return Err(BusError::PublishExhausted {
                        channel: channel.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Registers `subscriber` on `channel`.
    ///
    /// The first local subscriber opens the transport subscription; later ones
    /// join the in-process fan-out list.
    pub async fn subscribe(
        self: &Arc<Self>,
        channel: &str,
        subscriber: Arc<dyn BusSubscriber>,
    ) -> Result<SubscriptionId, BusError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscriptions = self.subscriptions.lock().await;

        if let Some(existing) = subscriptions.get_mut(channel) {
            existing.subscribers.push((id, subscriber));
            debug!("Added local subscriber to '{}' ({} total)", channel, existing.subscribers.len());
            return Ok(id);
        }

        let receiver = self.transport.subscribe(channel).await?;
        let pump = self.spawn_pump(channel.to_string(), receiver);
        subscriptions.insert(
            channel.to_string(),
            ChannelSubscription {
                subscribers: vec![(id, subscriber)],
                pump,
            },
        );
        info!("📡 Subscribed to bus channel '{}'", channel);
        Ok(id)
    }

    /// Removes one subscriber. The last one out closes the transport
    /// subscription.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, BusError> {
        let mut subscriptions = self.subscriptions.lock().await;
        let Some(channel) = subscriptions
            .iter()
            .find(|(_, sub)| sub.subscribers.iter().any(|(sid, _)| *sid == id))
            .map(|(channel, _)| channel.clone())
        else {
            return Ok(false);
        };

        let now_empty = match subscriptions.get_mut(&channel) {
            Some(sub) => {
                sub.subscribers.retain(|(sid, _)| *sid != id);
                sub.subscribers.is_empty()
            }
            None => false,
        };

        if now_empty {
            if let Some(sub) = subscriptions.remove(&channel) {
                sub.pump.abort();
            }
            self.transport.unsubscribe(&channel).await?;
            info!("📡 Unsubscribed from bus channel '{}'", channel);
        }
        Ok(true)
    }

    /// Drops every subscription.
    pub async fn close(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (channel, sub) in subscriptions.drain() {
            sub.pump.abort();
            if let Err(e) = self.transport.unsubscribe(&channel).await {
                warn!("⚠️ Failed to unsubscribe from '{}': {}", channel, e);
            }
        }
    }

    pub async fn health(&self) -> BusHealth {
        let mut subscribed_channels: Vec<String> = self.subscriptions.lock().await.keys().cloned().collect();
        subscribed_channels.sort();
        BusHealth {
            connected: self.transport.is_connected(),
            reconnect_attempts: self.transport.reconnect_attempts(),
            subscribed_channels,
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            channels: self
                .counters
                .channels
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            received: self.counters.received.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            callback_failures: self.counters.callback_failures.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            self_echoes: self.counters.self_echoes.load(Ordering::Relaxed),
        }
    }

    fn spawn_pump(self: &Arc<Self>, channel: String, mut receiver: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(raw) = receiver.recv().await {
                let Some(bus) = weak.upgrade() else { break };
                bus.handle_inbound(&channel, &raw).await;
            }
            debug!("Bus pump for '{}' stopped", channel);
        })
    }

    /// Validates, filters and dispatches one raw inbound message.
    pub async fn handle_inbound(&self, channel: &str, raw: &str) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let envelope = match EventEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Dropping malformed message on '{}': {}", channel, e);
                return;
            }
        };

        if envelope.origin_id == self.origin_id {
            self.counters.self_echoes.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let origin_id = envelope.origin_id.clone();
        let timestamp = envelope.timestamp;
        let event = match envelope.into_event() {
            Ok(event) => event,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Dropping malformed event from {} on '{}': {}", origin_id, channel, e);
                return;
            }
        };

        let inbound = InboundEvent {
            channel: channel.to_string(),
            origin_id,
            timestamp,
            event,
        };

        let subscribers: Vec<Arc<dyn BusSubscriber>> = {
            let subscriptions = self.subscriptions.lock().await;
            subscriptions
                .get(channel)
                .map(|sub| sub.subscribers.iter().map(|(_, s)| Arc::clone(s)).collect())
                .unwrap_or_default()
        };

        // Callbacks run concurrently; one failing or panicking does not stop
        // the others.
        let mut futures: FuturesUnordered<_> = subscribers
            .iter()
            .map(|subscriber| AssertUnwindSafe(subscriber.on_event(&inbound)).catch_unwind())
            .collect();

        while let Some(outcome) = futures.next().await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                    error!("❌ Bus subscriber on '{}' failed: {}", channel, e);
                }
                Err(_) => {
                    self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                    error!("❌ Bus subscriber on '{}' panicked", channel);
                }
            }
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channels, InstanceNotice};
    use crate::types::Scope;
    use std::sync::Mutex as StdMutex;

    fn notice(instance: &str) -> BusEvent {
        BusEvent::InstanceStarted(InstanceNotice {
            instance_id: instance.to_string(),
            scopes: vec![Scope::Global],
        })
    }

    fn recorder() -> (Arc<StdMutex<Vec<InboundEvent>>>, Arc<dyn BusSubscriber>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscriber = FnSubscriber::new(move |event: &InboundEvent| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        (seen, subscriber)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_retry_delays_double_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
        assert_eq!(policy.delay_after(10), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_recovers_after_two_failures() {
        let hub = InMemoryBusHub::new();
        let transport = Arc::new(hub.connect());
        let bus = EventBus::new("node-a", transport.clone(), RetryPolicy::default());

        transport.fail_next_publishes(2);
        bus.publish(channels::SYSTEM_EVENTS, &notice("node-a")).await.unwrap();

        assert_eq!(transport.publish_calls(), 3);
        let stats = bus.stats().channels[channels::SYSTEM_EVENTS].clone();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_gives_up_after_three_failures() {
        let hub = InMemoryBusHub::new();
        let transport = Arc::new(hub.connect());
        let bus = EventBus::new("node-a", transport.clone(), RetryPolicy::default());

        transport.fail_next_publishes(3);
        let result = bus.publish(channels::SYSTEM_EVENTS, &notice("node-a")).await;

        assert!(matches!(result, Err(BusError::PublishExhausted { attempts: 3, .. })));
        let stats = bus.stats().channels[channels::SYSTEM_EVENTS].clone();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let hub = InMemoryBusHub::new();
        let transport = Arc::new(hub.connect());
        let bus = EventBus::new("node-a", transport.clone(), RetryPolicy::default());

        transport.fail_next_publishes(2);
        let started = tokio::time::Instant::now();
        bus.publish(channels::SYSTEM_EVENTS, &notice("node-a")).await.unwrap();

        // 100ms after the first failure, 200ms after the second.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_self_echo_never_reaches_callbacks() {
        let hub = InMemoryBusHub::new();
        let bus = EventBus::new("node-a", Arc::new(hub.connect()), RetryPolicy::default());
        let (seen, subscriber) = recorder();
        bus.subscribe(channels::SYSTEM_EVENTS, subscriber).await.unwrap();

        bus.emit(&notice("node-a")).await.unwrap();
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.stats().self_echoes, 1);
    }

    #[tokio::test]
    async fn test_remote_events_reach_every_local_subscriber() {
        let hub = InMemoryBusHub::new();
        let node_a = EventBus::new("node-a", Arc::new(hub.connect()), RetryPolicy::default());
        let node_b = EventBus::new("node-b", Arc::new(hub.connect()), RetryPolicy::default());

        let (first, sub_first) = recorder();
        let (second, sub_second) = recorder();
        node_b.subscribe(channels::SYSTEM_EVENTS, sub_first).await.unwrap();
        node_b.subscribe(channels::SYSTEM_EVENTS, sub_second).await.unwrap();

        // Two local subscribers share one transport subscription.
        assert_eq!(hub.subscriber_count(channels::SYSTEM_EVENTS), 1);

        node_a.emit(&notice("node-a")).await.unwrap();
        settle().await;

        for seen in [first, second] {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].origin_id, "node-a");
            assert_eq!(seen[0].event, notice("node-a"));
        }
    }

    #[tokio::test]
    async fn test_malformed_messages_are_counted_and_dropped() {
        let hub = InMemoryBusHub::new();
        let bus = EventBus::new("node-a", Arc::new(hub.connect()), RetryPolicy::default());
        let (seen, subscriber) = recorder();
        bus.subscribe(channels::SYSTEM_EVENTS, subscriber).await.unwrap();

        hub.inject(channels::SYSTEM_EVENTS, "garbage");
        hub.inject(
            channels::SYSTEM_EVENTS,
            r#"{"type":"match_completed","timestamp":1,"originId":"node-z","data":{"nope":true}}"#,
        );
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
        let stats = bus.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_failing_callback_does_not_block_others() {
        let hub = InMemoryBusHub::new();
        let bus = EventBus::new("node-b", Arc::new(hub.connect()), RetryPolicy::default());
        let (seen, good) = recorder();
        let bad = FnSubscriber::new(|_: &InboundEvent| Err(EventError::HandlerExecution("boom".into())));
        let panicking = FnSubscriber::new(|_: &InboundEvent| -> Result<(), EventError> { panic!("subscriber bug") });

        bus.subscribe(channels::SYSTEM_EVENTS, bad).await.unwrap();
        bus.subscribe(channels::SYSTEM_EVENTS, panicking).await.unwrap();
        bus.subscribe(channels::SYSTEM_EVENTS, good).await.unwrap();

        let raw = EventEnvelope::stamp(&notice("node-a"), "node-a").unwrap().encode().unwrap();
        bus.handle_inbound(channels::SYSTEM_EVENTS, &raw).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        let stats = bus.stats();
        assert_eq!(stats.callback_failures, 2);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn test_last_unsubscribe_closes_transport_subscription() {
        let hub = InMemoryBusHub::new();
        let bus = EventBus::new("node-a", Arc::new(hub.connect()), RetryPolicy::default());
        let (_, first) = recorder();
        let (_, second) = recorder();

        let a = bus.subscribe(channels::MATCH_EVENTS, first).await.unwrap();
        let b = bus.subscribe(channels::MATCH_EVENTS, second).await.unwrap();

        assert!(bus.unsubscribe(a).await.unwrap());
        assert_eq!(hub.subscriber_count(channels::MATCH_EVENTS), 1);
        assert!(bus.unsubscribe(b).await.unwrap());
        assert_eq!(hub.subscriber_count(channels::MATCH_EVENTS), 0);
        assert!(!bus.unsubscribe(b).await.unwrap());
        assert!(bus.health().await.subscribed_channels.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_link_and_reconnects() {
        let hub = InMemoryBusHub::new();
        let transport = Arc::new(hub.connect());
        let bus = EventBus::new("node-a", transport.clone(), RetryPolicy::default());
        let (_, subscriber) = recorder();
        bus.subscribe(channels::LEADERBOARD_UPDATES, subscriber).await.unwrap();

        transport.set_connected(false);
        assert!(!bus.health().await.connected);

        transport.set_connected(true);
        let health = bus.health().await;
        assert!(health.connected);
        assert_eq!(health.reconnect_attempts, 1);
        assert_eq!(health.subscribed_channels, vec![channels::LEADERBOARD_UPDATES.to_string()]);
    }
}
