use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handler concurrency used when the caller asks for zero.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Per-subscriber slot metadata.
struct SubscriberSlot<T> {
    id: u64,
    sender: watch::Sender<Option<Arc<T>>>,
}

struct HubInner<T> {
    topics: Mutex<HashMap<String, Vec<SubscriberSlot<T>>>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl<T> HubInner<T> {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, Vec<SubscriberSlot<T>>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: &str, id: u64) {
        let mut topics = self.topics();
        if let Some(slots) = topics.get_mut(topic) {
            slots.retain(|slot| slot.id != id);
            if slots.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// Topic-keyed fan-out of the latest value to subscribed handlers.
pub struct Hub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Hub<T> {
    /// Creates a hub that runs at most `max_concurrency` handlers at once.
    pub fn new(max_concurrency: usize) -> Self {
        let permits = if max_concurrency == 0 {
            DEFAULT_MAX_CONCURRENCY
        } else {
            max_concurrency
        };
        Self {
            inner: Arc::new(HubInner {
                topics: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(permits)),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Stores `value` as the latest for `topic` and wakes every subscriber.
    ///
    /// Returns the number of subscribers notified.
    pub fn publish(&self, topic: &str, value: T) -> usize {
        let topics = self.inner.topics();
        let Some(slots) = topics.get(topic) else {
            return 0;
        };

        let value = Arc::new(value);
        for slot in slots {
            slot.sender.send_replace(Some(Arc::clone(&value)));
        }
        slots.len()
    }

    /// Registers `handler` for `topic` and spawns its worker.
    ///
    /// Must be called from within a Tokio runtime. The handler sees only
    /// values published after this call. Handlers run on the blocking pool,
    /// so a handler that blocks holds a permit but never a runtime worker.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = watch::channel::<Option<Arc<T>>>(None);
        let permits = Arc::clone(&self.inner.permits);
        let worker_topic = topic.to_string();

        let handler = Arc::new(handler);

        let worker = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let latest = receiver.borrow_and_update().clone();
                let Some(value) = latest else {
                    continue;
                };
                let Ok(_permit) = permits.acquire().await else {
                    break;
                };
                let handler = Arc::clone(&handler);
                let topic = worker_topic.clone();
                let outcome = tokio::task::spawn_blocking(move || handler(&topic, &value)).await;
                if let Err(e) = outcome {
                    if e.is_panic() {
                        warn!(topic = %worker_topic, "Subscriber handler panicked");
                    }
                }
            }
            debug!(topic = %worker_topic, "Subscriber worker exited");
        });

        self.inner
            .topics()
            .entry(topic.to_string())
            .or_default()
            .push(SubscriberSlot { id, sender });

        let hub: Arc<dyn Unsubscribe> = self.inner.clone();
        Subscription {
            hub: Arc::downgrade(&hub),
            topic: topic.to_string(),
            id,
            worker: Some(worker),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics().get(topic).map_or(0, Vec::len)
    }
}

/// Handle to a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    hub: Weak<dyn Unsubscribe>,
    topic: String,
    id: u64,
    worker: Option<JoinHandle<()>>,
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, topic: &str, id: u64);
}

impl<T: Send + Sync> Unsubscribe for HubInner<T> {
    fn unsubscribe(&self, topic: &str, id: u64) {
        self.remove(topic, id);
    }
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Unsubscribes and waits for the worker to finish any handler in flight.
    pub async fn cancel(mut self) {
        self.detach();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    fn detach(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_publish_reaches_topic_subscribers() {
        let hub = Hub::<u32>::new(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = hub.subscribe("a", move |topic, v| {
            tx.send((topic.to_string(), *v)).unwrap();
        });

        assert_eq!(hub.publish("b", 7), 0);
        assert_eq!(hub.publish("a", 1), 1);
        assert_eq!(rx.recv().await, Some(("a".to_string(), 1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_subscriber_sees_latest_value() {
        let hub = Hub::<u32>::new(4);
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = Arc::clone(&seen);

        let _sub = hub.subscribe("m", move |_, v| {
            seen_in_handler.lock().unwrap().push(*v);
            if *v == 1 {
                started_tx.send(()).unwrap();
                gate_rx.lock().unwrap().recv().unwrap();
            }
        });

        hub.publish("m", 1);
        started_rx.recv().await.unwrap();

        // The handler is stuck on value 1; these overwrite each other.
        for v in 2..=4 {
            hub.publish("m", v);
        }
        gate_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded() {
        let hub = Hub::<u32>::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let mut subs = Vec::new();
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            subs.push(hub.subscribe("t", move |_, _| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(hub.publish("t", 1), 6);
        tokio::time::timeout(Duration::from_secs(5), async {
            while done.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_unsubscribes() {
        let hub = Hub::<u32>::new(1);
        let sub = hub.subscribe("x", |_, _| {});
        let other = hub.subscribe("x", |_, _| {});
        assert_eq!(hub.subscriber_count("x"), 2);

        sub.cancel().await;
        assert_eq!(hub.subscriber_count("x"), 1);
        drop(other);
        assert_eq!(hub.subscriber_count("x"), 0);
        assert_eq!(hub.publish("x", 3), 0);
    }

    #[tokio::test]
    async fn test_blocking_handler_does_not_stall_runtime() {
        let hub = Hub::<u32>::new(2);
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _stuck = hub.subscribe("slow", move |_, _| {
            gate_rx.lock().unwrap().recv().unwrap();
        });
        let _fast = hub.subscribe("fast", move |_, v| {
            tx.send(*v).unwrap();
        });

        hub.publish("slow", 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.publish("fast", 2);
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(2));
        gate_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_after_hub_dropped() {
        let hub = Hub::<u32>::new(1);
        let sub = hub.subscribe("x", |_, _| {});
        drop(hub);
        assert_eq!(sub.topic(), "x");
        sub.cancel().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_worker_alive() {
        let hub = Hub::<u32>::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = hub.subscribe("p", move |_, v| {
            if *v == 0 {
                panic!("boom");
            }
            tx.send(*v).unwrap();
        });

        hub.publish("p", 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.publish("p", 5);
        assert_eq!(rx.recv().await, Some(5));
    }
}
