//! Progress fan-out: per-thread rooms with bounded-latency delivery.
//!
//! Each thread with at least one subscriber gets a room: a background task
//! that owns the subscriber set and receives commands over a flume channel.
//! Broadcasting sends to all subscribers concurrently, each delivery bounded
//! by the configured timeout; observers that fail or exceed the budget are
//! pruned so one stuck consumer can never stall the pipeline or the other
//! subscribers.

mod observer;

pub use observer::{ChannelObserver, Observer, ObserverError, SubscriberId};

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::progress::ProgressMessage;

enum RoomCmd {
    Subscribe {
        id: SubscriberId,
        observer: Arc<dyn Observer>,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    Broadcast {
        message: ProgressMessage,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

type RoomMap = Mutex<FxHashMap<String, flume::Sender<RoomCmd>>>;

/// Fan-out hub. Cheap to clone; all clones share the same rooms.
#[derive(Clone)]
pub struct Broadcaster {
    rooms: Arc<RoomMap>,
    send_timeout: Duration,
}

impl Broadcaster {
    #[must_use]
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(FxHashMap::default())),
            send_timeout,
        }
    }

    /// Register an observer for a thread's progress. Returns the id to use
    /// for [`unsubscribe`](Self::unsubscribe).
    pub async fn subscribe(&self, thread_id: &str, observer: Arc<dyn Observer>) -> SubscriberId {
        let id = SubscriberId::fresh();
        loop {
            let (ack_tx, ack_rx) = oneshot::channel();
            let room = self.room(thread_id);
            let sent = room
                .send_async(RoomCmd::Subscribe {
                    id: id.clone(),
                    observer: observer.clone(),
                    ack: ack_tx,
                })
                .await;
            // The ack guarantees the subscription is live before we return,
            // so a message broadcast right after cannot be missed. A failed
            // send or ack means the room closed between lookup and delivery;
            // the next lookup creates a fresh one.
            if sent.is_ok() && ack_rx.await.is_ok() {
                return id;
            }
        }
    }

    /// Remove an observer. Unknown ids are ignored.
    pub async fn unsubscribe(&self, thread_id: &str, id: SubscriberId) {
        if let Some(room) = self.rooms.lock().get(thread_id).cloned() {
            let _ = room.send_async(RoomCmd::Unsubscribe { id }).await;
        }
    }

    /// Deliver a message to every subscriber of the thread. Returns once
    /// the room has accepted the message; deliveries proceed concurrently
    /// in the room task.
    pub async fn broadcast(&self, thread_id: &str, message: ProgressMessage) {
        // No room means no subscribers; nothing to do.
        let room = self.rooms.lock().get(thread_id).cloned();
        if let Some(room) = room {
            let _ = room.send_async(RoomCmd::Broadcast { message }).await;
        }
    }

    /// Current subscriber count for a thread.
    pub async fn subscriber_count(&self, thread_id: &str) -> usize {
        let room = self.rooms.lock().get(thread_id).cloned();
        let Some(room) = room else {
            return 0;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if room
            .send_async(RoomCmd::Count { reply: reply_tx })
            .await
            .is_err()
        {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }

    fn room(&self, thread_id: &str) -> flume::Sender<RoomCmd> {
        let mut rooms = self.rooms.lock();
        if let Some(room) = rooms.get(thread_id) {
            return room.clone();
        }
        let (tx, rx) = flume::unbounded();
        tokio::spawn(run_room(
            thread_id.to_string(),
            rx,
            self.send_timeout,
            self.rooms.clone(),
        ));
        rooms.insert(thread_id.to_string(), tx.clone());
        tx
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

/// Room supervisor: owns the subscriber set for one thread. Exits (and
/// removes the room from the hub) once the last subscriber is gone and no
/// commands are queued.
async fn run_room(
    thread_id: String,
    rx: flume::Receiver<RoomCmd>,
    send_timeout: Duration,
    rooms: Arc<RoomMap>,
) {
    let mut subscribers: Vec<(SubscriberId, Arc<dyn Observer>)> = Vec::new();
    while let Ok(cmd) = rx.recv_async().await {
        match cmd {
            RoomCmd::Subscribe { id, observer, ack } => {
                debug!(thread_id = %thread_id, subscriber = %id, "subscribe");
                subscribers.push((id, observer));
                let _ = ack.send(());
            }
            RoomCmd::Unsubscribe { id } => {
                subscribers.retain(|(sid, _)| *sid != id);
                if subscribers.is_empty() && close_room(&rooms, &thread_id, &rx) {
                    return;
                }
            }
            RoomCmd::Broadcast { message } => {
                let deliveries = subscribers.iter().map(|(id, observer)| {
                    let message = message.clone();
                    async move {
                        let sent =
                            tokio::time::timeout(send_timeout, observer.notify(message)).await;
                        match sent {
                            Ok(Ok(())) => None,
                            Ok(Err(_)) | Err(_) => Some(id.clone()),
                        }
                    }
                });
                let failed: Vec<SubscriberId> =
                    join_all(deliveries).await.into_iter().flatten().collect();
                if !failed.is_empty() {
                    warn!(
                        thread_id = %thread_id,
                        pruned = failed.len(),
                        "dropping unresponsive subscribers"
                    );
                    subscribers.retain(|(sid, _)| !failed.contains(sid));
                    if subscribers.is_empty() && close_room(&rooms, &thread_id, &rx) {
                        return;
                    }
                }
            }
            RoomCmd::Count { reply } => {
                let _ = reply.send(subscribers.len());
            }
        }
    }
}

/// Drop the empty room from the hub. Holding the map lock while checking the
/// queue keeps the removal atomic against new lookups; a command enqueued by
/// a sender obtained before the removal fails its send, which every caller
/// tolerates (subscribe retries, the rest treat a closed room as empty).
fn close_room(rooms: &RoomMap, thread_id: &str, rx: &flume::Receiver<RoomCmd>) -> bool {
    let mut rooms = rooms.lock();
    if !rx.is_empty() {
        return false;
    }
    rooms.remove(thread_id);
    debug!(thread_id = %thread_id, "room closed");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressBody;
    use chrono::Utc;

    fn message(seq: u64) -> ProgressMessage {
        ProgressMessage {
            run_id: "r1".into(),
            thread_id: "t1".into(),
            seq,
            at: Utc::now(),
            body: ProgressBody::RunStarted,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_broadcasts_in_order() {
        let broadcaster = Broadcaster::default();
        let (observer, mut rx) = ChannelObserver::pair(8);
        broadcaster.subscribe("t1", Arc::new(observer)).await;

        broadcaster.broadcast("t1", message(1)).await;
        broadcaster.broadcast("t1", message(2)).await;

        assert_eq!(rx.recv().await.map(|m| m.seq), Some(1));
        assert_eq!(rx.recv().await.map(|m| m.seq), Some(2));
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned() {
        let broadcaster = Broadcaster::default();
        let (observer, rx) = ChannelObserver::pair(1);
        broadcaster.subscribe("t1", Arc::new(observer)).await;
        assert_eq!(broadcaster.subscriber_count("t1").await, 1);

        drop(rx);
        broadcaster.broadcast("t1", message(1)).await;
        // The count command queues behind the broadcast, so the prune has
        // happened by the time it answers.
        assert_eq!(broadcaster.subscriber_count("t1").await, 0);
        // Pruning the last subscriber retires the room itself.
        assert!(room_gone(&broadcaster, "t1").await);
    }

    async fn room_gone(broadcaster: &Broadcaster, thread_id: &str) -> bool {
        // The room task removes itself after the command that emptied it.
        for _ in 0..100 {
            if !broadcaster.rooms.lock().contains_key(thread_id) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn unsubscribing_the_last_observer_drops_the_room() {
        let broadcaster = Broadcaster::default();
        let (observer, _rx) = ChannelObserver::pair(1);
        let id = broadcaster.subscribe("t1", Arc::new(observer)).await;
        assert_eq!(broadcaster.rooms.lock().len(), 1);

        broadcaster.unsubscribe("t1", id).await;
        assert!(room_gone(&broadcaster, "t1").await);

        // A later subscribe simply builds a fresh room.
        let (observer, _rx) = ChannelObserver::pair(1);
        broadcaster.subscribe("t1", Arc::new(observer)).await;
        assert_eq!(broadcaster.subscriber_count("t1").await, 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let broadcaster = Broadcaster::default();
        let (observer, _rx) = ChannelObserver::pair(1);
        let id = broadcaster.subscribe("t1", Arc::new(observer)).await;
        broadcaster.unsubscribe("t1", id.clone()).await;
        broadcaster.unsubscribe("t1", id).await;
        assert_eq!(broadcaster.subscriber_count("t1").await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_the_rest() {
        let broadcaster = Broadcaster::new(Duration::from_millis(50));
        // Full channel with a held receiver: notify will wait for capacity
        // and trip the delivery timeout.
        let (slow, mut slow_rx) = ChannelObserver::pair(1);
        let (fast, mut fast_rx) = ChannelObserver::pair(8);
        let slow = Arc::new(slow);
        slow.notify(message(0)).await.expect("fill");
        broadcaster.subscribe("t1", slow).await;
        broadcaster.subscribe("t1", Arc::new(fast)).await;

        broadcaster.broadcast("t1", message(1)).await;
        assert_eq!(fast_rx.recv().await.map(|m| m.seq), Some(1));
        assert_eq!(broadcaster.subscriber_count("t1").await, 1);
        // Only the pre-fill ever made it to the slow observer.
        assert_eq!(slow_rx.recv().await.map(|m| m.seq), Some(0));
    }
}
