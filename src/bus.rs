//! Fan-out of analysis snapshots to renderers

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::FeatureSnapshot;

type Listener = Arc<dyn Fn(&FeatureSnapshot) + Send + Sync>;

/// Token returned by [`FeatureBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "dropping the token makes the listener impossible to remove"]
pub struct Subscription(u64);

#[derive(Default)]
struct BusInner {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    latest: Mutex<FeatureSnapshot>,
    published: AtomicU64,
}

/// Synchronous publish/subscribe for [`FeatureSnapshot`]s.
///
/// Listeners run on the publishing (capture) thread in subscription order.
/// A panicking listener is logged and skipped; it never reaches the
/// publisher or the listeners after it. The most recent snapshot is also
/// kept for render loops that poll instead of subscribing.
#[derive(Clone, Default)]
pub struct FeatureBus {
    inner: Arc<BusInner>,
}

impl FeatureBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&FeatureSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        Subscription(id)
    }

    /// Returns false if the token was already removed
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription.0);
        listeners.len() != before
    }

    pub fn publish(&self, snapshot: &FeatureSnapshot) {
        *self.inner.latest.lock() = snapshot.clone();
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        // Listeners may subscribe/unsubscribe from inside a callback
        let listeners: Vec<(u64, Listener)> = self.inner.listeners.lock().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                log::error!("Feature listener {} panicked; continuing with the rest", id);
            }
        }
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> FeatureSnapshot {
        self.inner.latest.lock().clone()
    }

    pub fn clear_latest(&self) {
        *self.inner.latest.lock() = FeatureSnapshot::default();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FeatureBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureBus")
            .field("listeners", &self.listener_count())
            .field("published", &self.published_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bpm: f32) -> FeatureSnapshot {
        FeatureSnapshot {
            bpm,
            ..Default::default()
        }
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let bus = FeatureBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            let _ = bus.subscribe(move |_| order.lock().push(tag));
        }

        bus.publish(&snapshot(120.0));
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = FeatureBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&snapshot(0.0));
        assert!(bus.unsubscribe(sub));
        assert!(!bus.unsubscribe(sub));
        bus.publish(&snapshot(0.0));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = FeatureBus::new();
        let delivered = Arc::new(AtomicU64::new(0));

        let _ = bus.subscribe(|_| panic!("renderer bug"));
        let counter = Arc::clone(&delivered);
        let _ = bus.subscribe(move |s| {
            assert_eq!(s.bpm, 128.0);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&snapshot(128.0));
        bus.publish(&snapshot(128.0));

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(bus.published_count(), 2);
    }

    #[test]
    fn latest_tracks_last_publish() {
        let bus = FeatureBus::new();
        assert_eq!(bus.latest(), FeatureSnapshot::default());

        bus.publish(&snapshot(95.0));
        assert_eq!(bus.latest().bpm, 95.0);

        bus.clear_latest();
        assert_eq!(bus.latest().bpm, 0.0);
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let bus = FeatureBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let bus_handle = bus.clone();
        let slot_handle = Arc::clone(&slot);
        let sub = bus.subscribe(move |_| {
            if let Some(sub) = slot_handle.lock().take() {
                bus_handle.unsubscribe(sub);
            }
        });
        *slot.lock() = Some(sub);

        bus.publish(&snapshot(0.0));
        assert_eq!(bus.listener_count(), 0);
    }
}
