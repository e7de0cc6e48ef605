//! A direct room that may not be visible yet
//!
//! The server answers `createRoom` long before the new room shows up in a
//! sync response. A [`RoomAvailabilityFuture`] stands for such a room: it
//! resolves exactly once, when the room first appears in the local view, and
//! holds the sends that were registered before that happened.

use crate::chat::MessageContent;
use crate::protocol::{RoomId, RoomsView, SyncSignal, UserId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A send registered against a room that was not available yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredSendRequest {
    pub content: MessageContent,
}

/// Result of registering a send with a future
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// The room is available and nothing is waiting ahead: send it now
    Ready(MessageContent),
    /// Queued behind resolution or earlier requests
    Queued {
        /// The caller must start the drain task
        start_drain: bool,
    },
}

#[derive(Debug, Default)]
struct DeliveryQueue {
    pending: VecDeque<DeferredSendRequest>,
    draining: bool,
}

struct Inner {
    user_id: UserId,
    room_id: RoomId,
    resolved: watch::Sender<bool>,
    queue: Mutex<DeliveryQueue>,
}

/// Handle to a direct room that resolves once it is locally visible
#[derive(Clone)]
pub struct RoomAvailabilityFuture {
    inner: Arc<Inner>,
}

impl fmt::Debug for RoomAvailabilityFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomAvailabilityFuture")
            .field("user_id", &self.inner.user_id)
            .field("room_id", &self.inner.room_id)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

impl RoomAvailabilityFuture {
    fn with_state(user_id: UserId, room_id: RoomId, resolved: bool) -> Self {
        let (tx, _rx) = watch::channel(resolved);
        Self {
            inner: Arc::new(Inner {
                user_id,
                room_id,
                resolved: tx,
                queue: Mutex::new(DeliveryQueue::default()),
            }),
        }
    }

    /// A future for a room that is already in the local view
    #[must_use]
    pub fn resolved(user_id: UserId, room_id: RoomId) -> Self {
        Self::with_state(user_id, room_id, true)
    }

    /// A future for a room the server has created but sync has not delivered
    #[must_use]
    pub fn pending(user_id: UserId, room_id: RoomId) -> Self {
        Self::with_state(user_id, room_id, false)
    }

    /// The user this room is meant for
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// The room id returned by the server
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    /// Whether the room has been seen locally
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        *self.inner.resolved.borrow()
    }

    /// Mark the room as available and wake every waiter
    ///
    /// Returns `false` if the future was already resolved.
    pub fn resolve(&self) -> bool {
        let changed = self.inner.resolved.send_if_modified(|resolved| {
            if *resolved {
                false
            } else {
                *resolved = true;
                true
            }
        });

        if changed {
            debug!(
                user_id = %self.inner.user_id,
                room_id = %self.inner.room_id,
                "Direct room is now available"
            );
        }
        changed
    }

    /// Wait until the room is available; returns at once if it already is
    pub async fn wait(&self) {
        let mut resolved = self.inner.resolved.subscribe();
        // The sender lives in `inner`, so the channel cannot close while we wait
        let _ = resolved.wait_for(|resolved| *resolved).await;
    }

    /// Resolve as soon as the room is visible locally
    ///
    /// The view is checked once up front and again after every sync cycle.
    /// The signal is subscribed before the first check, so a cycle that
    /// completes in between is not missed. The task ends when the future
    /// resolves or the sync signal goes away.
    pub fn watch_for_arrival(&self, rooms: RoomsView, signal: &SyncSignal) -> JoinHandle<()> {
        let mut synced = signal.subscribe();
        let future = self.clone();

        tokio::spawn(async move {
            loop {
                if future.is_resolved() {
                    break;
                }
                if rooms.contains(future.room_id()) {
                    future.resolve();
                    break;
                }
                debug!(room_id = %future.room_id(), "Direct room not synced yet");
                if synced.changed().await.is_err() {
                    warn!(
                        room_id = %future.room_id(),
                        "Sync stopped before the direct room arrived"
                    );
                    break;
                }
            }
        })
    }

    /// Register a send, keeping registration order with anything queued
    pub(crate) async fn enqueue(&self, content: MessageContent) -> Enqueued {
        let mut queue = self.inner.queue.lock().await;

        if self.is_resolved() && !queue.draining && queue.pending.is_empty() {
            return Enqueued::Ready(content);
        }

        queue.pending.push_back(DeferredSendRequest { content });
        let start_drain = !queue.draining;
        queue.draining = true;
        Enqueued::Queued { start_drain }
    }

    /// Take the next queued send; ends the drain when the queue is empty
    pub(crate) async fn next_pending(&self) -> Option<DeferredSendRequest> {
        let mut queue = self.inner.queue.lock().await;
        let next = queue.pending.pop_front();
        if next.is_none() {
            queue.draining = false;
        }
        next
    }

    /// Number of queued sends
    pub async fn pending_len(&self) -> usize {
        self.inner.queue.lock().await.pending.len()
    }

    /// Whether two handles refer to the same future
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoomSnapshot;
    use std::time::Duration;

    fn pending() -> RoomAvailabilityFuture {
        RoomAvailabilityFuture::pending(
            UserId::from("@alice:example.org"),
            RoomId::from("!dm:example.org"),
        )
    }

    fn text(body: &str) -> MessageContent {
        MessageContent::Text(body.to_string())
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let future = pending();
        assert!(!future.is_resolved());
        assert!(future.resolve());
        assert!(!future.resolve());
        assert!(future.is_resolved());
    }

    #[tokio::test]
    async fn test_late_waiter_returns_immediately() {
        let future = pending();
        future.resolve();
        tokio::time::timeout(Duration::from_millis(100), future.wait())
            .await
            .expect("Waiting on a resolved future should not block");
    }

    #[tokio::test]
    async fn test_all_waiters_wake_on_resolve() {
        let future = pending();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let future = future.clone();
                tokio::spawn(async move { future.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(future.resolve());

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("Waiter timed out")
                .expect("Waiter panicked");
        }
    }

    #[tokio::test]
    async fn test_watcher_resolves_after_room_is_synced() {
        let future = pending();
        let rooms = RoomsView::new();
        let signal = SyncSignal::default();
        let watcher = future.watch_for_arrival(rooms.clone(), &signal);

        // A sync cycle without the room leaves the future pending
        signal.notify_synced();
        tokio::task::yield_now().await;
        assert!(!future.is_resolved());

        rooms.insert(RoomSnapshot::new("!dm:example.org"));
        signal.notify_synced();

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("Watcher timed out")
            .expect("Watcher panicked");
        assert!(future.is_resolved());
    }

    #[tokio::test]
    async fn test_watcher_resolves_room_already_in_view() {
        let future = pending();
        let rooms = RoomsView::new();
        let signal = SyncSignal::default();
        // The room landed before the watcher started; no further sync follows
        rooms.insert(RoomSnapshot::new("!dm:example.org"));

        let watcher = future.watch_for_arrival(rooms, &signal);

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("Watcher timed out")
            .expect("Watcher panicked");
        assert!(future.is_resolved());
    }

    #[tokio::test]
    async fn test_enqueue_orders_behind_pending_sends() {
        let future = pending();

        assert_eq!(
            future.enqueue(text("first")).await,
            Enqueued::Queued { start_drain: true }
        );
        assert_eq!(
            future.enqueue(text("second")).await,
            Enqueued::Queued { start_drain: false }
        );

        // Resolution alone does not let a new send jump the queue
        future.resolve();
        assert_eq!(
            future.enqueue(text("third")).await,
            Enqueued::Queued { start_drain: false }
        );
        assert_eq!(future.pending_len().await, 3);

        let drained: Vec<_> = [
            future.next_pending().await,
            future.next_pending().await,
            future.next_pending().await,
        ]
        .into_iter()
        .flatten()
        .map(|request| request.content)
        .collect();
        assert_eq!(drained, vec![text("first"), text("second"), text("third")]);

        assert!(future.next_pending().await.is_none());
        assert_eq!(future.enqueue(text("fourth")).await, Enqueued::Ready(text("fourth")));
    }

    #[test]
    fn test_same_as() {
        let future = pending();
        assert!(future.same_as(&future.clone()));
        assert!(!future.same_as(&pending()));
    }
}
