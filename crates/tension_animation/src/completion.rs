//! Completion signals
//!
//! Every animation request hands back a [`Completion`] that resolves exactly
//! once, when the request finishes, is interrupted, or is cancelled. It is a
//! shared `futures` oneshot: every clone observes the same result, it can be
//! awaited on any executor, and [`Completion::result`] peeks without blocking.
//! Resolution always comes from a clock tick or a synchronous call on a spring.

use crate::error::{AnimationError, Result};
use futures::channel::oneshot;
use futures::future::{FutureExt, Map, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Runs with the result just before it is delivered
pub(crate) type Observer<T> = Box<dyn FnOnce(&T) + Send>;

/// Deferred result of an animation request
///
/// Resolves to [`AnimationError::ClockGone`] if the clock is dropped before
/// the request settles.
pub struct Completion<T> {
    inner: Shared<oneshot::Receiver<T>>,
}

/// Resolving side of a [`Completion`]
pub(crate) struct CompletionSource<T> {
    sender: oneshot::Sender<T>,
    observer: Option<Observer<T>>,
}

/// Create a linked source/completion pair
pub(crate) fn channel<T: Clone>() -> (CompletionSource<T>, Completion<T>) {
    channel_observed(None)
}

/// Like [`channel`], with a hook that sees the result first
pub(crate) fn channel_observed<T: Clone>(
    observer: Option<Observer<T>>,
) -> (CompletionSource<T>, Completion<T>) {
    let (sender, receiver) = oneshot::channel();
    (
        CompletionSource { sender, observer },
        Completion {
            inner: receiver.shared(),
        },
    )
}

impl<T: Clone> Completion<T> {
    /// A completion that is already resolved
    pub fn ready(value: T) -> Self {
        let (source, completion) = channel();
        source.resolve(value);
        completion
    }

    /// The result, if resolved
    pub fn result(&self) -> Option<T> {
        self.inner.clone().now_or_never().and_then(|r| r.ok())
    }

    pub fn is_resolved(&self) -> bool {
        self.result().is_some()
    }

    /// Map the result once it arrives
    pub fn then<U, F>(&self, f: F) -> Map<Self, F>
    where
        F: FnOnce(Result<T>) -> U,
    {
        self.clone().map(f)
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner
            .poll_unpin(cx)
            .map(|r| r.map_err(|_| AnimationError::ClockGone))
    }
}

impl<T> CompletionSource<T> {
    /// Resolve with `value`, running the observer first
    pub(crate) fn resolve(self, value: T) {
        if let Some(observer) = self.observer {
            observer(&value);
        }
        // Nobody listening is fine
        let _ = self.sender.send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_every_clone_sees_the_result() {
        let (source, completion) = channel::<u32>();
        let other = completion.clone();
        assert!(!completion.is_resolved());

        source.resolve(1);
        assert_eq!(completion.result(), Some(1));
        assert_eq!(other.result(), Some(1));
        assert_eq!(pollster::block_on(other), Ok(1));
    }

    #[test]
    fn test_observer_runs_before_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let (source, completion) = channel_observed::<u32>(Some(Box::new(move |v: &u32| {
            assert_eq!(*v, 7);
            c.fetch_add(1, Ordering::SeqCst);
        })));

        source.resolve(7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(completion.result(), Some(7));
    }

    #[test]
    fn test_then_maps_output() {
        let completion = Completion::ready(20u32);
        let doubled = Completion::then(&completion, |r| r.map(|v| v * 2));
        assert_eq!(pollster::block_on(doubled), Ok(40));
    }

    #[test]
    fn test_dropped_source_is_clock_gone() {
        let (source, completion) = channel::<u32>();
        drop(source);
        assert_eq!(completion.result(), None);
        assert_eq!(pollster::block_on(completion), Err(AnimationError::ClockGone));
    }

    #[test]
    fn test_wakes_across_threads() {
        let (source, completion) = channel::<u32>();
        let waiter = std::thread::spawn(move || pollster::block_on(completion));
        std::thread::sleep(std::time::Duration::from_millis(10));
        source.resolve(42);
        assert_eq!(waiter.join().unwrap(), Ok(42));
    }
}
