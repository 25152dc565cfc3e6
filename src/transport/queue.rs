//! Packet queues decoupling application calls from background I/O loops.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Unbounded FIFO of packets with wake-on-enqueue.
///
/// Any number of producers may [`push`](Self::push) concurrently. One
/// consumer loop waits on [`ready`](Self::ready) and is woken as soon as a
/// packet arrives; no packet is ever missed because a notification issued
/// while nobody waits is stored until the next wait.
#[derive(Debug, Default)]
pub struct PacketQueue {
    items: Mutex<VecDeque<String>>,
    ready: Notify,
}

impl PacketQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<String>> {
        // Plain data only; a poisoned lock is still consistent.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a packet and wake the consumer.
    pub fn push(&self, packet: String) {
        self.items().push_back(packet);
        self.ready.notify_one();
    }

    /// Append several packets in order, waking the consumer once.
    pub fn extend<I>(&self, packets: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut items = self.items();
        let before = items.len();
        items.extend(packets);
        let added = items.len() > before;
        drop(items);

        if added {
            self.ready.notify_one();
        }
    }

    /// Remove the oldest packet.
    pub fn pop(&self) -> Option<String> {
        self.items().pop_front()
    }

    /// Remove and return every queued packet in order.
    ///
    /// The snapshot is atomic: a packet pushed concurrently lands either in
    /// this batch or the next, never in both and never lost.
    pub fn drain(&self) -> Vec<String> {
        self.items().drain(..).collect()
    }

    /// Discard every queued packet.
    pub fn clear(&self) {
        self.items().clear();
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Wait until a packet has been pushed since the last wakeup.
    ///
    /// Consumers drain with [`pop`](Self::pop) until empty, then wait here.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new();
        queue.push("A".into());
        queue.push("B".into());
        queue.push("C".into());

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().as_deref(), Some("A"));
        assert_eq!(queue.drain(), vec!["B", "C"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_is_destructive() {
        let queue = PacketQueue::new();
        queue.extend(["x".to_string(), "y".to_string()]);

        assert_eq!(queue.drain(), vec!["x", "y"]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_clear() {
        let queue = PacketQueue::new();
        queue.push("gone".into());
        queue.clear();
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_ready_after_push_without_waiter() {
        let queue = PacketQueue::new();
        // Pushed before anyone waits; the permit must be kept.
        queue.push("early".into());

        tokio::time::timeout(Duration::from_secs(1), queue.ready())
            .await
            .expect("stored wakeup was lost");
        assert_eq!(queue.pop().as_deref(), Some("early"));
    }

    #[tokio::test]
    async fn test_ready_wakes_waiting_consumer() {
        let queue = Arc::new(PacketQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue.ready().await;
                queue.pop()
            })
        };

        tokio::task::yield_now().await;
        queue.push("wake".into());

        let packet = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer was not woken")
            .unwrap();
        assert_eq!(packet.as_deref(), Some("wake"));
    }

    #[tokio::test]
    async fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(PacketQueue::new());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for i in 0..100 {
                        queue.push(format!("{p}:{i}"));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let packets = queue.drain();
        assert_eq!(packets.len(), 400);
        for p in 0..4 {
            let seen: Vec<usize> = packets
                .iter()
                .filter_map(|s| s.strip_prefix(&format!("{p}:")))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
    }
}
