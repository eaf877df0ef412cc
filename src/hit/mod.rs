//! Hit lifecycle
//!
//! Every inbound `hit` message becomes the single active [`HitEvent`],
//! replacing whatever was shown before, and is cleared again after the
//! display duration. Each hit is also prepended to a short [`HitLog`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::channel::InboundMessage;
use crate::geometry::Point;

/// How long a hit stays on screen
pub const HIT_DISPLAY_DURATION: Duration = Duration::from_secs(6);

/// Number of hits kept in the history log
pub const HIT_LOG_CAPACITY: usize = 5;

/// The hit currently on screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitEvent {
    pub id: u64,
    /// Arrow tip as reported by the detector
    pub tip: Point,
    pub inside: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub inside: bool,
}

impl From<&HitEvent> for HitLogEntry {
    fn from(hit: &HitEvent) -> Self {
        Self {
            id: hit.id,
            timestamp: hit.received_at,
            inside: hit.inside,
        }
    }
}

/// Bounded most-recent-first history
#[derive(Debug, Clone)]
pub struct HitLog {
    entries: VecDeque<HitLogEntry>,
    capacity: usize,
}

impl HitLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend an entry, evicting the oldest beyond capacity.
    pub fn push(&mut self, entry: HitLogEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> Vec<HitLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HitLog {
    fn default() -> Self {
        Self::new(HIT_LOG_CAPACITY)
    }
}

struct TrackerState {
    expiry: Option<JoinHandle<()>>,
    log: HitLog,
}

/// Owns the active hit, its expiry timer and the history log.
///
/// Must be used from within a tokio runtime; expiry timers are spawned tasks.
pub struct HitTracker {
    display_duration: Duration,
    next_id: AtomicU64,
    state: Mutex<TrackerState>,
    active_tx: Arc<watch::Sender<Option<HitEvent>>>,
}

impl HitTracker {
    pub fn new(display_duration: Duration, log_capacity: usize) -> Self {
        let (active_tx, _) = watch::channel(None);
        Self {
            display_duration,
            next_id: AtomicU64::new(1),
            state: Mutex::new(TrackerState {
                expiry: None,
                log: HitLog::new(log_capacity),
            }),
            active_tx: Arc::new(active_tx),
        }
    }

    /// Make a new hit active, superseding the previous one and its timer.
    pub fn record(&self, tip: Point, inside: bool) -> HitEvent {
        let hit = HitEvent {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tip,
            inside,
            received_at: Utc::now(),
        };

        let mut state = self.state.lock();
        if let Some(previous) = state.expiry.take() {
            previous.abort();
        }
        state.log.push(HitLogEntry::from(&hit));
        self.active_tx.send_replace(Some(hit.clone()));

        // Deadline is fixed at receipt, not when the task first runs.
        let deadline = Instant::now() + self.display_duration;
        let active_tx = self.active_tx.clone();
        let id = hit.id;
        state.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Only clear if nothing newer replaced us in the meantime.
            let cleared = active_tx.send_if_modified(|current| {
                if current.as_ref().is_some_and(|h| h.id == id) {
                    *current = None;
                    true
                } else {
                    false
                }
            });
            if cleared {
                debug!("Hit {} expired", id);
            }
        }));

        hit
    }

    /// Feed an inbound channel message; returns the new hit for `hit` messages.
    pub fn handle_message(&self, message: &InboundMessage) -> Option<HitEvent> {
        match message {
            InboundMessage::Hit { tip, inside } => Some(self.record(*tip, *inside)),
            InboundMessage::Polygon { .. } => None,
        }
    }

    pub fn active(&self) -> Option<HitEvent> {
        self.active_tx.borrow().clone()
    }

    /// Watch the active hit; `None` means nothing is on screen.
    pub fn subscribe(&self) -> watch::Receiver<Option<HitEvent>> {
        self.active_tx.subscribe()
    }

    /// History, most recent first.
    pub fn log(&self) -> Vec<HitLogEntry> {
        self.state.lock().log.entries()
    }

    /// Drop the active hit immediately and cancel its timer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(expiry) = state.expiry.take() {
            expiry.abort();
        }
        self.active_tx.send_replace(None);
    }
}

impl Default for HitTracker {
    fn default() -> Self {
        Self::new(HIT_DISPLAY_DURATION, HIT_LOG_CAPACITY)
    }
}

impl Drop for HitTracker {
    fn drop(&mut self) {
        if let Some(expiry) = self.state.get_mut().expiry.take() {
            expiry.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_expires_after_display_duration() {
        let tracker = HitTracker::default();
        let started = Instant::now();

        let hit = tracker.record(Point::new(150.0, 200.0), true);
        assert_eq!(tracker.active().map(|h| h.id), Some(hit.id));

        let mut rx = tracker.subscribe();
        rx.changed().await.unwrap();

        assert!(rx.borrow().is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_active_just_before_expiry() {
        let tracker = HitTracker::default();
        tracker.record(Point::new(1.0, 2.0), false);

        tokio::time::advance(Duration::from_millis(5_999)).await;
        settle().await;
        assert!(tracker.active().is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(tracker.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_hit_supersedes_and_owns_expiry() {
        let tracker = HitTracker::default();
        let started = Instant::now();

        let first = tracker.record(Point::new(10.0, 10.0), true);
        tokio::time::advance(Duration::from_secs(3)).await;
        let second = tracker.record(Point::new(20.0, 20.0), false);
        assert!(second.id > first.id);
        assert_eq!(tracker.active().map(|h| h.id), Some(second.id));

        // The first hit's deadline passes without clearing anything.
        tokio::time::advance(Duration::from_millis(3_001)).await;
        settle().await;
        assert_eq!(tracker.active().map(|h| h.id), Some(second.id));

        let mut rx = tracker.subscribe();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_measured_from_receipt_when_timer_starts_late() {
        let tracker = HitTracker::default();
        let hit = tracker.record(Point::new(5.0, 5.0), true);

        // The clock moves before the expiry task has been polled once.
        tokio::time::advance(Duration::from_millis(4_000)).await;
        settle().await;
        assert_eq!(tracker.active().map(|h| h.id), Some(hit.id));

        tokio::time::advance(Duration::from_millis(2_000)).await;
        settle().await;
        assert!(tracker.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_hits_leave_exactly_one_active() {
        let tracker = HitTracker::default();
        let message = InboundMessage::Hit {
            tip: Point::new(150.0, 200.0),
            inside: true,
        };

        let a = tracker.handle_message(&message).unwrap();
        let b = tracker.handle_message(&message).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(tracker.active().unwrap().id, b.id);
        assert_eq!(tracker.log().len(), 2);
    }

    #[tokio::test]
    async fn test_log_is_bounded_and_most_recent_first() {
        let tracker = HitTracker::default();
        for i in 0..8 {
            tracker.record(Point::new(i as f64, 0.0), i % 2 == 0);
            assert!(tracker.log().len() <= HIT_LOG_CAPACITY);
        }

        let ids: Vec<u64> = tracker.log().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![8, 7, 6, 5, 4]);
        assert!(!tracker.log()[0].inside);
    }

    #[tokio::test]
    async fn test_polygon_messages_do_not_create_hits() {
        let tracker = HitTracker::default();
        let message = InboundMessage::Polygon { points: vec![] };
        assert!(tracker.handle_message(&message).is_none());
        assert!(tracker.active().is_none());
        assert!(tracker.log().is_empty());
    }

    #[tokio::test]
    async fn test_clear_cancels_active_hit() {
        let tracker = HitTracker::default();
        tracker.record(Point::new(0.0, 0.0), true);
        tracker.clear();
        assert!(tracker.active().is_none());
        assert_eq!(tracker.log().len(), 1);
    }

    #[test]
    fn test_hit_log_eviction() {
        let mut log = HitLog::new(2);
        for id in 1..=3 {
            log.push(HitLogEntry {
                id,
                timestamp: Utc::now(),
                inside: true,
            });
        }
        let ids: Vec<u64> = log.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(log.capacity(), 2);
    }
}
