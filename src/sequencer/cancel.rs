//! One-shot cancellation shared by every playback thread

use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Cancelling drops the only sender, so every `select!` waiting on
/// [`CancelToken::receiver`] wakes with a disconnect.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
    receiver: Receiver<()>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels the token if the owning thread unwinds
pub(crate) struct CancelOnPanic<'a>(pub &'a CancelToken);

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::select;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || {
                select! {
                    recv(token.receiver()) -> _ => token.is_cancelled(),
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        token.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.receiver().recv().is_err());
    }

    #[test]
    fn test_cancel_on_panic() {
        let token = CancelToken::new();
        let result = thread::scope(|s| {
            s.spawn(|| {
                let _guard = CancelOnPanic(&token);
                panic!("boom");
            })
            .join()
        });
        assert!(result.is_err());
        assert!(token.is_cancelled());
    }
}
