//! Scan queue — bounded priority work queue with back-pressure
//!
//! Sits between the dispatch engine and module workers. Three strict
//! priority lanes (HIGH before NORMAL before LOW, FIFO inside a lane), a
//! configurable full-queue policy (block, reject, or drop-oldest), coarse
//! pressure levels with transition callbacks, retry accounting with a dead
//! letter queue, and counters that satisfy the conservation identity
//!
//! ```text
//! enqueued_total = dequeued_total + depth + rejected_total + dropped_total + dlq_depth
//! ```
//!
//! Pressure callbacks always run outside the queue lock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Queue priority lanes. Lower value dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl Priority {
    const ALL: [Self; 3] = [Self::High, Self::Normal, Self::Low];

    fn lane(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

/// What to do when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureAction {
    /// Wait for space, up to the caller's timeout.
    Block,
    /// Fail the put immediately.
    Reject,
    /// Sacrifice the oldest LOW (then NORMAL) item. HIGH is never dropped.
    DropOldest,
}

/// Coarse utilisation bucket used for back-pressure signalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Wrapper around a queued payload.
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub payload: T,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub item_id: String,
    pub retries: u32,
    pub max_retries: u32,
    pub metadata: BTreeMap<String, String>,
}

/// Options for [`ScanQueue::put_with`].
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub priority: Priority,
    pub item_id: String,
    pub max_retries: u32,
    pub metadata: BTreeMap<String, String>,
    /// Only meaningful under [`BackpressureAction::Block`].
    pub timeout: Option<Duration>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            item_id: String::new(),
            max_retries: crate::config::defaults::MAX_ITEM_RETRIES,
            metadata: BTreeMap::new(),
            timeout: None,
        }
    }
}

/// Queue construction parameters.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub action: BackpressureAction,
    /// Utilisation fraction at which each pressure level begins.
    pub pressure_thresholds: BTreeMap<PressureLevel, f64>,
    pub dlq_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: crate::config::defaults::QUEUE_CAPACITY,
            action: BackpressureAction::Block,
            pressure_thresholds: default_thresholds(),
            dlq_capacity: crate::config::defaults::DLQ_CAPACITY,
        }
    }
}

fn default_thresholds() -> BTreeMap<PressureLevel, f64> {
    let mut thresholds = BTreeMap::new();
    thresholds.insert(PressureLevel::None, 0.0);
    thresholds.insert(PressureLevel::Low, 0.25);
    thresholds.insert(PressureLevel::Medium, 0.50);
    thresholds.insert(PressureLevel::High, 0.75);
    thresholds.insert(PressureLevel::Critical, 0.90);
    thresholds
}

/// Snapshot of queue metrics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub utilization: f64,
    pub pressure_level: PressureLevel,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub rejected_total: u64,
    pub dropped_total: u64,
    pub dlq_depth: usize,
    pub avg_wait_ms: f64,
    pub depth_by_priority: BTreeMap<String, usize>,
}

struct QueueState<T> {
    lanes: [VecDeque<QueueItem<T>>; 3],
    dlq: VecDeque<QueueItem<T>>,
    enqueued: u64,
    dequeued: u64,
    rejected: u64,
    dropped: u64,
    total_wait_ms: f64,
    wait_samples: u64,
    last_pressure: PressureLevel,
}

impl<T> QueueState<T> {
    fn depth(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    fn pop_one(&mut self) -> Option<QueueItem<T>> {
        for priority in Priority::ALL {
            if let Some(item) = self.lanes[priority.lane()].pop_front() {
                self.dequeued += 1;
                let wait_ms = item.enqueued_at.elapsed().as_secs_f64() * 1000.0;
                self.total_wait_ms += wait_ms;
                self.wait_samples += 1;
                return Some(item);
            }
        }
        None
    }

    /// Drop the oldest LOW item, then NORMAL. HIGH is untouchable.
    fn drop_oldest(&mut self) -> bool {
        for priority in [Priority::Low, Priority::Normal] {
            if self.lanes[priority.lane()].pop_front().is_some() {
                self.dropped += 1;
                return true;
            }
        }
        false
    }
}

type PressureCallback = Box<dyn Fn(PressureLevel) + Send + Sync>;

/// Bounded, priority-aware work queue with back-pressure.
///
/// Safe under concurrent producers and consumers; all waiting is async.
pub struct ScanQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    action: BackpressureAction,
    /// (level, threshold) sorted by descending threshold for lookup.
    thresholds: Vec<(PressureLevel, f64)>,
    dlq_capacity: usize,
    callbacks: Mutex<Vec<PressureCallback>>,
    closed: AtomicBool,
}

impl<T: Send> ScanQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        let mut thresholds: Vec<(PressureLevel, f64)> =
            config.pressure_thresholds.into_iter().collect();
        thresholds.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            state: Mutex::new(QueueState {
                lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                dlq: VecDeque::new(),
                enqueued: 0,
                dequeued: 0,
                rejected: 0,
                dropped: 0,
                total_wait_ms: 0.0,
                wait_samples: 0,
                last_pressure: PressureLevel::None,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity: config.capacity.max(1),
            action: config.action,
            thresholds,
            dlq_capacity: config.dlq_capacity.max(1),
            callbacks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_capacity(capacity: usize, action: BackpressureAction) -> Self {
        Self::new(QueueConfig {
            capacity,
            action,
            ..QueueConfig::default()
        })
    }

    /// Enqueue a payload at the given priority. Returns true on success.
    pub async fn put(&self, payload: T, priority: Priority) -> bool {
        self.put_with(
            payload,
            PutOptions {
                priority,
                ..PutOptions::default()
            },
        )
        .await
    }

    /// Enqueue with full options. Returns false when rejected, when the
    /// BLOCK timeout elapses, or when DROP_OLDEST finds nothing sacrificable.
    pub async fn put_with(&self, payload: T, opts: PutOptions) -> bool {
        let item = QueueItem {
            payload,
            priority: opts.priority,
            enqueued_at: Instant::now(),
            item_id: opts.item_id,
            retries: 0,
            max_retries: opts.max_retries,
            metadata: opts.metadata,
        };
        self.enqueue(item, opts.timeout).await
    }

    async fn enqueue(&self, mut item: QueueItem<T>, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = match self.state.lock() {
                    Ok(state) => state,
                    Err(_) => return false,
                };
                if self.closed.load(Ordering::Acquire) {
                    state.enqueued += 1;
                    state.rejected += 1;
                    return false;
                }
                if state.depth() < self.capacity {
                    item.enqueued_at = Instant::now();
                    state.enqueued += 1;
                    state.lanes[item.priority.lane()].push_back(item);
                    drop(state);
                    self.not_empty.notify_one();
                    self.check_pressure();
                    return true;
                }
                match self.action {
                    BackpressureAction::Reject => {
                        state.enqueued += 1;
                        state.rejected += 1;
                        return false;
                    }
                    BackpressureAction::DropOldest => {
                        if state.drop_oldest() {
                            item.enqueued_at = Instant::now();
                            state.enqueued += 1;
                            state.lanes[item.priority.lane()].push_back(item);
                            drop(state);
                            self.not_empty.notify_one();
                            self.check_pressure();
                            return true;
                        }
                        // Only HIGH items present; nothing sacrificable.
                        state.enqueued += 1;
                        state.rejected += 1;
                        return false;
                    }
                    BackpressureAction::Block => {
                        if matches!(deadline, Some(d) if Instant::now() >= d) {
                            state.enqueued += 1;
                            state.rejected += 1;
                            return false;
                        }
                    }
                }
            }

            // BLOCK: wait for space or timeout
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d || tokio::time::timeout(d - now, notified).await.is_err() {
                        let Ok(mut state) = self.state.lock() else { return false };
                        state.enqueued += 1;
                        state.rejected += 1;
                        return false;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Dequeue the highest-priority, oldest item, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout or when the queue is closed and empty.
    pub async fn get(&self, timeout: Option<Duration>) -> Option<QueueItem<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().ok()?;
                if let Some(item) = state.pop_one() {
                    drop(state);
                    self.not_full.notify_one();
                    self.check_pressure();
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }

            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d || tokio::time::timeout(d - now, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Drain up to `max_items` in priority order within one critical section.
    ///
    /// Waits up to `timeout` for the first item only.
    pub async fn get_batch(&self, max_items: usize, timeout: Option<Duration>) -> Vec<QueueItem<T>> {
        let mut result = Vec::new();
        let Some(first) = self.get(timeout).await else {
            return result;
        };
        result.push(first);
        if let Ok(mut state) = self.state.lock() {
            while result.len() < max_items {
                match state.pop_one() {
                    Some(item) => result.push(item),
                    None => break,
                }
            }
        }
        self.not_full.notify_waiters();
        self.check_pressure();
        result
    }

    /// Return an item to the queue after a delivery failure.
    ///
    /// Increments the retry count; once it exceeds `max_retries` the item
    /// moves to the dead letter queue and false is returned.
    pub async fn requeue(&self, mut item: QueueItem<T>) -> bool {
        item.retries += 1;
        if item.retries > item.max_retries {
            let Ok(mut state) = self.state.lock() else { return false };
            state.enqueued += 1;
            if state.dlq.len() >= self.dlq_capacity {
                warn!(dlq_capacity = self.dlq_capacity, "DLQ full — evicting oldest entry");
                state.dlq.pop_front();
                state.dropped += 1;
            }
            debug!(item_id = %item.item_id, retries = item.retries, "Item moved to DLQ");
            state.dlq.push_back(item);
            return false;
        }
        self.enqueue(item, Some(Duration::ZERO)).await
    }

    /// Close the queue: wakes every blocked producer and consumer. Further
    /// puts are rejected; gets drain the remaining items then return `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn depth(&self) -> usize {
        self.state.lock().map(|s| s.depth()).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.depth() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    pub fn depth_by_priority(&self) -> BTreeMap<String, usize> {
        let Ok(state) = self.state.lock() else { return BTreeMap::new() };
        Priority::ALL
            .iter()
            .map(|p| (p.name().to_string(), state.lanes[p.lane()].len()))
            .collect()
    }

    /// Current utilisation in `0.0..=1.0`.
    pub fn pressure(&self) -> f64 {
        self.depth() as f64 / self.capacity as f64
    }

    pub fn pressure_level(&self) -> PressureLevel {
        self.level_for(self.pressure())
    }

    fn level_for(&self, utilization: f64) -> PressureLevel {
        for (level, threshold) in &self.thresholds {
            if utilization >= *threshold {
                return *level;
            }
        }
        PressureLevel::None
    }

    /// Register a callback invoked on pressure level *transitions* only.
    pub fn on_pressure_change<F>(&self, callback: F)
    where
        F: Fn(PressureLevel) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    fn check_pressure(&self) {
        let level = {
            let Ok(mut state) = self.state.lock() else { return };
            let level = self.level_for(state.depth() as f64 / self.capacity as f64);
            if level == state.last_pressure {
                return;
            }
            state.last_pressure = level;
            level
        };
        // Callbacks run outside the queue lock
        let Ok(callbacks) = self.callbacks.lock() else { return };
        for callback in callbacks.iter() {
            callback(level);
        }
    }

    pub fn dlq_depth(&self) -> usize {
        self.state.lock().map(|s| s.dlq.len()).unwrap_or(0)
    }

    /// Remove and return up to `limit` items from the dead letter queue.
    pub fn drain_dlq(&self, limit: usize) -> Vec<QueueItem<T>> {
        let Ok(mut state) = self.state.lock() else { return Vec::new() };
        let take = limit.min(state.dlq.len());
        state.dlq.drain(..take).collect()
    }

    /// Inspect up to `limit` DLQ items without removing them.
    pub fn peek_dlq(&self, limit: usize) -> Vec<QueueItem<T>>
    where
        T: Clone,
    {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        state.dlq.iter().take(limit).cloned().collect()
    }

    pub fn clear_dlq(&self) -> usize {
        let Ok(mut state) = self.state.lock() else { return 0 };
        let count = state.dlq.len();
        state.dlq.clear();
        count
    }

    /// Remove all queued items. Returns the number removed.
    pub fn clear(&self) -> usize {
        let count = {
            let Ok(mut state) = self.state.lock() else { return 0 };
            let count = state.depth();
            for lane in &mut state.lanes {
                lane.clear();
            }
            count
        };
        self.not_full.notify_waiters();
        self.check_pressure();
        count
    }

    pub fn stats(&self) -> QueueStats {
        let Ok(state) = self.state.lock() else {
            return QueueStats {
                depth: 0,
                capacity: self.capacity,
                utilization: 0.0,
                pressure_level: PressureLevel::None,
                enqueued_total: 0,
                dequeued_total: 0,
                rejected_total: 0,
                dropped_total: 0,
                dlq_depth: 0,
                avg_wait_ms: 0.0,
                depth_by_priority: BTreeMap::new(),
            };
        };
        let depth = state.depth();
        QueueStats {
            depth,
            capacity: self.capacity,
            utilization: depth as f64 / self.capacity as f64,
            pressure_level: state.last_pressure,
            enqueued_total: state.enqueued,
            dequeued_total: state.dequeued,
            rejected_total: state.rejected,
            dropped_total: state.dropped,
            dlq_depth: state.dlq.len(),
            avg_wait_ms: if state.wait_samples > 0 {
                state.total_wait_ms / state.wait_samples as f64
            } else {
                0.0
            },
            depth_by_priority: Priority::ALL
                .iter()
                .map(|p| (p.name().to_string(), state.lanes[p.lane()].len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn assert_conserved(stats: &QueueStats) {
        assert_eq!(
            stats.enqueued_total,
            stats.dequeued_total
                + stats.depth as u64
                + stats.rejected_total
                + stats.dropped_total
                + stats.dlq_depth as u64,
            "queue conservation violated: {stats:?}"
        );
    }

    #[tokio::test]
    async fn priority_lanes_strictly_ordered() {
        let queue: ScanQueue<&str> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        queue.put("low", Priority::Low).await;
        queue.put("normal", Priority::Normal).await;
        queue.put("high", Priority::High).await;

        assert_eq!(queue.get(None).await.unwrap().payload, "high");
        assert_eq!(queue.get(None).await.unwrap().payload, "normal");
        assert_eq!(queue.get(None).await.unwrap().payload, "low");
    }

    #[tokio::test]
    async fn fifo_inside_a_lane() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        for n in 0..5 {
            queue.put(n, Priority::Normal).await;
        }
        for n in 0..5 {
            assert_eq!(queue.get(None).await.unwrap().payload, n);
        }
    }

    #[tokio::test]
    async fn reject_when_full() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(2, BackpressureAction::Reject);
        assert!(queue.put(1, Priority::Normal).await);
        assert!(queue.put(2, Priority::Normal).await);
        assert!(!queue.put(3, Priority::Normal).await);

        let stats = queue.stats();
        assert_eq!(stats.rejected_total, 1);
        assert_eq!(stats.depth, 2);
        assert_conserved(&stats);
    }

    #[tokio::test]
    async fn capacity_minus_one_admits_one_more() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(3, BackpressureAction::Reject);
        assert!(queue.put(1, Priority::Normal).await);
        assert!(queue.put(2, Priority::Normal).await);
        assert!(!queue.is_full());
        assert!(queue.put(3, Priority::Normal).await);
        assert!(queue.is_full());
    }

    #[tokio::test]
    async fn drop_oldest_spares_high() {
        let queue: ScanQueue<&str> = ScanQueue::with_capacity(3, BackpressureAction::DropOldest);
        assert!(queue.put("high-1", Priority::High).await);
        assert!(queue.put("low-1", Priority::Low).await);
        assert!(queue.put("normal-1", Priority::Normal).await);

        // Full: the oldest LOW goes first
        assert!(queue.put("normal-2", Priority::Normal).await);
        let stats = queue.stats();
        assert_eq!(stats.dropped_total, 1);
        assert_conserved(&stats);

        // No LOW left: the oldest NORMAL is sacrificed next
        assert!(queue.put("high-2", Priority::High).await);
        assert_eq!(queue.stats().dropped_total, 2);
        assert!(queue.put("high-3", Priority::High).await);
        assert_eq!(queue.stats().dropped_total, 3);

        // Only HIGH items remain: nothing sacrificable, put fails
        assert!(!queue.put("high-4", Priority::High).await);
        let stats = queue.stats();
        assert_eq!(stats.rejected_total, 1);
        let remaining: Vec<&str> = vec![
            queue.get(None).await.unwrap().payload,
            queue.get(None).await.unwrap().payload,
            queue.get(None).await.unwrap().payload,
        ];
        assert_eq!(remaining, vec!["high-1", "high-2", "high-3"]);
    }

    #[tokio::test]
    async fn drop_oldest_rejects_when_all_high() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(2, BackpressureAction::DropOldest);
        queue.put(1, Priority::High).await;
        queue.put(2, Priority::High).await;
        assert!(!queue.put(3, Priority::High).await);
        let stats = queue.stats();
        assert_eq!(stats.rejected_total, 1);
        assert_conserved(&stats);
    }

    #[tokio::test]
    async fn block_times_out() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(1, BackpressureAction::Block);
        queue.put(1, Priority::Normal).await;
        let ok = queue
            .put_with(
                2,
                PutOptions {
                    timeout: Some(Duration::from_millis(30)),
                    ..PutOptions::default()
                },
            )
            .await;
        assert!(!ok);
        assert_conserved(&queue.stats());
    }

    #[tokio::test]
    async fn blocked_producer_resumes_after_get() {
        let queue: Arc<ScanQueue<u32>> = Arc::new(ScanQueue::with_capacity(1, BackpressureAction::Block));
        queue.put(1, Priority::Normal).await;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(2, Priority::Normal).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.get(None).await.unwrap().payload, 1);
        assert!(producer.await.unwrap());
        assert_eq!(queue.get(None).await.unwrap().payload, 2);
    }

    #[tokio::test]
    async fn get_times_out_on_empty() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(4, BackpressureAction::Block);
        let start = Instant::now();
        assert!(queue.get(Some(Duration::from_millis(30))).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn batch_drains_in_priority_order() {
        let queue: ScanQueue<&str> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        queue.put("low", Priority::Low).await;
        queue.put("high-1", Priority::High).await;
        queue.put("high-2", Priority::High).await;
        queue.put("normal", Priority::Normal).await;

        let batch = queue.get_batch(3, None).await;
        let payloads: Vec<&str> = batch.iter().map(|i| i.payload).collect();
        assert_eq!(payloads, vec!["high-1", "high-2", "normal"]);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn requeue_moves_to_dlq_after_max_retries() {
        let queue: ScanQueue<&str> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        queue
            .put_with(
                "flaky",
                PutOptions {
                    max_retries: 2,
                    item_id: "item-1".to_string(),
                    ..PutOptions::default()
                },
            )
            .await;

        let mut item = queue.get(None).await.unwrap();
        assert!(queue.requeue(item).await); // retry 1
        item = queue.get(None).await.unwrap();
        assert!(queue.requeue(item).await); // retry 2
        item = queue.get(None).await.unwrap();
        assert!(!queue.requeue(item).await); // exceeds max → DLQ

        assert_eq!(queue.dlq_depth(), 1);
        assert_eq!(queue.depth(), 0);
        let stats = queue.stats();
        assert_conserved(&stats);

        let peeked = queue.peek_dlq(10);
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].item_id, "item-1");
        assert_eq!(queue.dlq_depth(), 1);

        let drained = queue.drain_dlq(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.dlq_depth(), 0);
    }

    #[tokio::test]
    async fn pressure_callbacks_fire_on_transitions_only() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        let transitions = Arc::new(AtomicUsize::new(0));
        {
            let transitions = Arc::clone(&transitions);
            queue.on_pressure_change(move |_| {
                transitions.fetch_add(1, Ordering::SeqCst);
            });
        }

        // 0 → 1 items: 10% utilisation, still NONE; 1 → 3: 30% crosses LOW
        queue.put(1, Priority::Normal).await;
        assert_eq!(transitions.load(Ordering::SeqCst), 0);
        queue.put(2, Priority::Normal).await;
        queue.put(3, Priority::Normal).await;
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pressure_level(), PressureLevel::Low);

        // Stay inside LOW: no further callback
        queue.put(4, Priority::Normal).await;
        assert_eq!(transitions.load(Ordering::SeqCst), 1);

        // Cross MEDIUM at 50%
        queue.put(5, Priority::Normal).await;
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_unblocks_consumers() {
        let queue: Arc<ScanQueue<u32>> = Arc::new(ScanQueue::with_capacity(4, BackpressureAction::Block));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get(Some(Duration::from_secs(5))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(consumer.await.unwrap().is_none());
        // Puts after close are rejected
        assert!(!queue.put(1, Priority::Normal).await);
    }

    #[tokio::test]
    async fn clear_empties_lanes_and_reports_count() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        for n in 0..4 {
            queue.put(n, Priority::Normal).await;
        }
        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn depth_by_priority_tracks_lanes() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        queue.put(1, Priority::High).await;
        queue.put(2, Priority::Low).await;
        queue.put(3, Priority::Low).await;
        let by_priority = queue.depth_by_priority();
        assert_eq!(by_priority.get("HIGH"), Some(&1));
        assert_eq!(by_priority.get("NORMAL"), Some(&0));
        assert_eq!(by_priority.get("LOW"), Some(&2));
    }

    #[tokio::test]
    async fn avg_wait_tracked_over_dequeues() {
        let queue: ScanQueue<u32> = ScanQueue::with_capacity(10, BackpressureAction::Block);
        queue.put(1, Priority::Normal).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.get(None).await;
        assert!(queue.stats().avg_wait_ms >= 5.0);
    }

    #[tokio::test]
    async fn concurrent_producers_and_consumers() {
        let queue: Arc<ScanQueue<u64>> = Arc::new(ScanQueue::with_capacity(64, BackpressureAction::Block));
        let produced = 200u64;

        let mut producers = Vec::new();
        for p in 0..4u64 {
            let queue = Arc::clone(&queue);
            producers.push(tokio::spawn(async move {
                for n in 0..produced / 4 {
                    assert!(queue.put(p * 1000 + n, Priority::Normal).await);
                }
            }));
        }

        let consumed = Arc::new(AtomicUsize::new(0));
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            consumers.push(tokio::spawn(async move {
                while queue.get(Some(Duration::from_millis(200))).await.is_some() {
                    consumed.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        for producer in producers {
            producer.await.unwrap();
        }
        for consumer in consumers {
            consumer.await.unwrap();
        }
        assert_eq!(consumed.load(Ordering::SeqCst), produced as usize);
        assert_conserved(&queue.stats());
    }
}
