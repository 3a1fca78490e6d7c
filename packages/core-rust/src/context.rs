//! Per-thread slot naming the store a thread currently addresses.
//!
//! Nothing is inherited: a spawned thread or task starts with the absent id
//! unless the caller forwards one explicitly, either with
//! [`spawn_with_store_id`] for OS threads or [`StoreIdExt::with_store_id`]
//! for futures, which may be polled on any worker thread.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use tracing::trace;

use crate::id::StoreId;

thread_local! {
    static CURRENT_STORE_ID: RefCell<StoreId> = const { RefCell::new(StoreId::absent()) };
}

/// Returns the id the calling thread currently operates under.
#[must_use]
pub fn current_store_id() -> StoreId {
    CURRENT_STORE_ID.with(|slot| slot.borrow().clone())
}

/// Sets the calling thread's id and returns the previous one.
pub fn set_current_store_id(id: impl Into<StoreId>) -> StoreId {
    let id = id.into();
    trace!(store_id = %id, "set current store id");
    CURRENT_STORE_ID.with(|slot| slot.replace(id))
}

/// RAII guard that installs a store id on this thread and restores the
/// previous one on drop.
#[derive(Debug)]
#[must_use = "the store id is restored as soon as the scope is dropped"]
pub struct StoreScope {
    previous: Option<StoreId>,
}

impl StoreScope {
    /// Makes `id` current until the returned guard is dropped.
    pub fn enter(id: impl Into<StoreId>) -> Self {
        Self {
            previous: Some(set_current_store_id(id)),
        }
    }
}

impl Drop for StoreScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            set_current_store_id(previous);
        }
    }
}

/// Spawns an OS thread that runs `f` under `id`.
pub fn spawn_with_store_id<F, T>(id: impl Into<StoreId>, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let id = id.into();
    thread::spawn(move || {
        let _scope = StoreScope::enter(id);
        f()
    })
}

/// Future adapter that makes a store id current for the duration of every
/// poll of the inner future.
///
/// Created by [`StoreIdExt::with_store_id`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct WithStoreId<F> {
    inner: Pin<Box<F>>,
    id: StoreId,
}

impl<F> WithStoreId<F> {
    /// The id installed while the inner future is polled.
    pub fn store_id(&self) -> &StoreId {
        &self.id
    }
}

impl<F: Future> Future for WithStoreId<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = StoreScope::enter(self.id.clone());
        self.inner.as_mut().poll(cx)
    }
}

/// Attaches a store id to a future.
pub trait StoreIdExt: Future + Sized {
    /// Polls `self` with `id` as the current store id.
    fn with_store_id(self, id: impl Into<StoreId>) -> WithStoreId<Self> {
        WithStoreId {
            inner: Box::pin(self),
            id: id.into(),
        }
    }

    /// Polls `self` with the calling thread's current store id.
    fn with_current_store_id(self) -> WithStoreId<Self> {
        self.with_store_id(current_store_id())
    }
}

impl<F: Future> StoreIdExt for F {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::task::{Wake, Waker};

    use super::*;

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(fut);
        loop {
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
        }
    }

    #[test]
    fn defaults_to_absent() {
        thread::spawn(|| assert!(current_store_id().is_absent()))
            .join()
            .unwrap();
    }

    #[test]
    fn set_returns_previous() {
        thread::spawn(|| {
            assert!(set_current_store_id("r1").is_absent());
            assert_eq!(set_current_store_id("r2"), StoreId::new("r1"));
            assert_eq!(current_store_id(), StoreId::new("r2"));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn scope_restores_previous_id() {
        thread::spawn(|| {
            set_current_store_id("outer");
            {
                let _scope = StoreScope::enter("inner");
                assert_eq!(current_store_id(), StoreId::new("inner"));
            }
            assert_eq!(current_store_id(), StoreId::new("outer"));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn spawned_threads_do_not_inherit() {
        thread::spawn(|| {
            set_current_store_id("parent");
            let child = thread::spawn(current_store_id).join().unwrap();
            assert!(child.is_absent());

            let forwarded = spawn_with_store_id(current_store_id(), current_store_id)
                .join()
                .unwrap();
            assert_eq!(forwarded, StoreId::new("parent"));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn with_store_id_applies_only_while_polled() {
        thread::spawn(|| {
            let fut = async { current_store_id() }.with_store_id("task");
            assert_eq!(fut.store_id(), &StoreId::new("task"));

            assert_eq!(block_on(fut), StoreId::new("task"));
            assert!(current_store_id().is_absent());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn with_current_store_id_captures_at_creation() {
        thread::spawn(|| {
            let fut = {
                let _scope = StoreScope::enter("captured");
                async { current_store_id() }.with_current_store_id()
            };
            assert_eq!(block_on(fut), StoreId::new("captured"));
        })
        .join()
        .unwrap();
    }
}
