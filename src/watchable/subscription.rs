use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Predicate, Snapshot, State};

/// Receiving end of [`WatchableMap::subscribe`](super::WatchableMap::subscribe).
///
/// Yields the current snapshot first, then one snapshot per batch of writes
/// that happened since the previous one was taken. Once it yields `None` it
/// keeps doing so.
pub struct Subscription<V> {
    snapshots: BoxStream<'static, Snapshot<V>>,
}

struct Cursor<V> {
    state: Arc<Mutex<State<V>>>,
    dirty: watch::Receiver<()>,
    predicate: Option<Predicate<V>>,
    lifetime: CancellationToken,
    primed: bool,
}

impl<V> Cursor<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn next(mut self) -> Option<(Snapshot<V>, Self)> {
        if self.lifetime.is_cancelled() {
            return None;
        }
        if self.primed {
            self.primed = false;
        } else {
            tokio::select! {
                biased;
                _ = self.lifetime.cancelled() => return None,
                changed = self.dirty.changed() => changed.ok()?,
            }
        }
        let snapshot = self.take_snapshot()?;
        Some((snapshot, self))
    }

    fn take_snapshot(&mut self) -> Option<Snapshot<V>> {
        let state = self.state.lock();
        if state.closed {
            return None;
        }
        // Writes landing between the wakeup and this lock are part of this
        // snapshot, so they must not schedule another one.
        let _ = self.dirty.borrow_and_update();
        Some(state.snapshot(self.predicate.as_ref()))
    }
}

impl<V> Subscription<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(super) fn new(
        state: Arc<Mutex<State<V>>>,
        dirty: watch::Receiver<()>,
        predicate: Option<Predicate<V>>,
        lifetime: CancellationToken,
    ) -> Self {
        let cursor = Cursor {
            state,
            dirty,
            predicate,
            lifetime,
            primed: true,
        };
        Self {
            snapshots: stream::unfold(cursor, Cursor::next).fuse().boxed(),
        }
    }

    /// Waits for the next snapshot, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Snapshot<V>> {
        self.snapshots.next().await
    }
}

impl<V> Stream for Subscription<V> {
    type Item = Snapshot<V>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.snapshots.poll_next_unpin(cx)
    }
}
