// Change feeds: a push stream of snapshots paired with the capability to stop it.
//
// A Feed is what a store hands out when subscribing. The synchronizer turns each
// feed into a FeedHandle (a task draining the stream plus the Unsubscribe guard)
// and keeps at most one handle per FeedKind in a Listeners registry.

use futures::stream::BoxStream;
use std::fmt;
use tokio::task::JoinHandle;
use tracing::debug;

// Calls the store's cancel callback at most once: on unsubscribe() or on drop
pub struct Unsubscribe {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    // For feeds with nothing to release
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.is_active())
            .finish()
    }
}

pub struct Feed<T> {
    pub events: BoxStream<'static, T>,
    pub unsubscribe: Unsubscribe,
}

impl<T> Feed<T> {
    pub fn new(events: BoxStream<'static, T>, unsubscribe: Unsubscribe) -> Self {
        Self {
            events,
            unsubscribe,
        }
    }

    pub fn into_parts(self) -> (BoxStream<'static, T>, Unsubscribe) {
        (self.events, self.unsubscribe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Cart,
    Bookings,
    Reviews,
}

impl FeedKind {
    pub const ALL: [FeedKind; 3] = [FeedKind::Cart, FeedKind::Bookings, FeedKind::Reviews];
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedKind::Cart => "cart",
            FeedKind::Bookings => "bookings",
            FeedKind::Reviews => "reviews",
        };
        f.write_str(name)
    }
}

// An open subscription: the task applying its snapshots and the store-side guard
#[derive(Debug)]
pub struct FeedHandle {
    task: JoinHandle<()>,
    unsubscribe: Unsubscribe,
}

impl FeedHandle {
    pub fn new(task: JoinHandle<()>, unsubscribe: Unsubscribe) -> Self {
        Self { task, unsubscribe }
    }

    // Safe to call repeatedly and before any snapshot has arrived
    pub fn close(&mut self) {
        self.unsubscribe.unsubscribe();
        self.task.abort();
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// Holds at most one open handle per feed kind
#[derive(Debug, Default)]
pub struct Listeners {
    cart: Option<FeedHandle>,
    bookings: Option<FeedHandle>,
    reviews: Option<FeedHandle>,
}

impl Listeners {
    fn slot(&mut self, kind: FeedKind) -> &mut Option<FeedHandle> {
        match kind {
            FeedKind::Cart => &mut self.cart,
            FeedKind::Bookings => &mut self.bookings,
            FeedKind::Reviews => &mut self.reviews,
        }
    }

    // Closes whatever was open for this kind before storing the new handle
    pub fn replace(&mut self, kind: FeedKind, handle: FeedHandle) {
        let slot = self.slot(kind);
        if let Some(mut previous) = slot.take() {
            debug!(feed = %kind, "Closing previous subscription");
            previous.close();
        }
        *slot = Some(handle);
    }

    pub fn close(&mut self, kind: FeedKind) -> bool {
        match self.slot(kind).take() {
            Some(mut handle) => {
                debug!(feed = %kind, "Closing subscription");
                handle.close();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) -> usize {
        FeedKind::ALL
            .into_iter()
            .filter(|kind| self.close(*kind))
            .count()
    }

    pub fn is_open(&self, kind: FeedKind) -> bool {
        match kind {
            FeedKind::Cart => self.cart.is_some(),
            FeedKind::Bookings => self.bookings.is_some(),
            FeedKind::Reviews => self.reviews.is_some(),
        }
    }

    pub fn open_count(&self) -> usize {
        FeedKind::ALL.into_iter().filter(|k| self.is_open(*k)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_unsubscribe(counter: &Arc<AtomicUsize>) -> Unsubscribe {
        let counter = Arc::clone(counter);
        Unsubscribe::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut unsubscribe = counting_unsubscribe(&calls);

        unsubscribe.unsubscribe();
        unsubscribe.unsubscribe();
        drop(unsubscribe);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let _unsubscribe = counting_unsubscribe(&calls);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_feed_into_parts() {
        let feed = Feed::new(futures::stream::iter(vec![1, 2, 3]).boxed(), Unsubscribe::noop());
        let (events, unsubscribe) = feed.into_parts();
        assert!(!unsubscribe.is_active());
        assert_eq!(events.collect::<Vec<_>>().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_replace_closes_previous_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();

        let first = FeedHandle::new(
            tokio::spawn(futures::future::pending()),
            counting_unsubscribe(&calls),
        );
        listeners.replace(FeedKind::Cart, first);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let second = FeedHandle::new(
            tokio::spawn(futures::future::pending()),
            counting_unsubscribe(&calls),
        );
        listeners.replace(FeedKind::Cart, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.open_count(), 1);
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();
        for kind in FeedKind::ALL {
            let handle = FeedHandle::new(
                tokio::spawn(futures::future::pending()),
                counting_unsubscribe(&calls),
            );
            listeners.replace(kind, handle);
        }
        assert_eq!(listeners.open_count(), 3);

        assert_eq!(listeners.close_all(), 3);
        assert_eq!(listeners.close_all(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!listeners.is_open(FeedKind::Reviews));
    }

    #[tokio::test]
    async fn test_close_aborts_task() {
        let mut handle = FeedHandle::new(
            tokio::spawn(futures::future::pending::<()>()),
            Unsubscribe::noop(),
        );
        handle.close();
        handle.close();
        assert!(handle.unsubscribe.cancel.is_none());
    }
}
