//! Ordered registries for transport membership/stream events.
//!
//! Several components subscribe to the same transport event (peer join,
//! peer leave, inbound stream). Each subscriber registers under a tag; the
//! registry dispatches in insertion order and supports an explicit `flush`
//! so a torn-down session turns late events into no-ops.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// Identifies one subscriber. Registering the same tag again replaces the
/// previous handler in place (its original position is kept).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerTag {
    Metadata,
    Verification,
    AudioStreams,
    VideoStreams,
    ScreenStreams,
    FileOffers,
    Backfill,
}

type BoxFut = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handler<E> = Box<dyn Fn(E) -> BoxFut + Send + Sync>;

/// Insertion-ordered tag → handler registry.
pub struct HandlerRegistry<E> {
    entries: Mutex<Vec<(HandlerTag, Handler<E>)>>,
}

impl<E: Clone> HandlerRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn register<F, Fut>(&self, tag: HandlerTag, f: F)
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<E> = Box::new(move |e| Box::pin(f(e)));
        let mut entries = self.entries.lock().unwrap();
        if let Some(slot) = entries.iter_mut().find(|(t, _)| *t == tag) {
            slot.1 = handler;
        } else {
            entries.push((tag, handler));
        }
    }

    /// Invoke every registered handler, in insertion order, one at a time.
    pub async fn dispatch(&self, event: E) {
        // Snapshot the handler list so a handler may re-register without
        // deadlocking the registry.
        let futures: Vec<BoxFut> = {
            let entries = self.entries.lock().unwrap();
            entries.iter().map(|(_, h)| h(event.clone())).collect()
        };
        for fut in futures {
            fut.await;
        }
    }

    /// Drop every handler. Dispatches after a flush do nothing.
    pub fn flush(&self) {
        self.entries.lock().unwrap().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl<E: Clone> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn dispatches_in_insertion_order() {
        let registry = HandlerRegistry::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        registry.register(HandlerTag::Verification, move |e| {
            let o = o.clone();
            async move { o.lock().unwrap().push(("verify", e)) }
        });
        let o = order.clone();
        registry.register(HandlerTag::FileOffers, move |e| {
            let o = o.clone();
            async move { o.lock().unwrap().push(("offers", e)) }
        });

        registry.dispatch(7).await;
        assert_eq!(
            *order.lock().unwrap(),
            vec![("verify", 7), ("offers", 7)]
        );
    }

    #[tokio::test]
    async fn flush_makes_dispatch_a_noop() {
        let registry = HandlerRegistry::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        registry.register(HandlerTag::Metadata, move |()| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        registry.dispatch(()).await;
        registry.flush();
        registry.dispatch(()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn re_registering_a_tag_replaces_in_place() {
        let registry = HandlerRegistry::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register(HandlerTag::Backfill, |()| async {});
        let c = calls.clone();
        registry.register(HandlerTag::Backfill, move |()| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        registry.dispatch(()).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
