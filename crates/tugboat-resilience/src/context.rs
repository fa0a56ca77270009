//! Cancellation context.
//!
//! A `Context` is a cheap, cloneable view of a cancellation flag. The
//! matching `CancelHandle` flips it once; every clone observes the change.
//! A context whose handle is dropped without cancelling stays live forever.

use tokio::sync::watch;

/// Cloneable cancellation signal passed down into retry loops and pipelines.
#[derive(Debug, Clone)]
pub struct Context {
    rx: watch::Receiver<bool>,
}

/// The cancelling side of a [`Context`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl Context {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// A fresh context plus the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { rx }, CancelHandle { tx })
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Another context observing this handle.
    pub fn context(&self) -> Context {
        Context {
            rx: self.tx.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn background_is_never_cancelled() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_to_clones() {
        let (ctx, handle) = Context::with_cancel();
        let clone = ctx.clone();
        handle.cancel();
        assert!(ctx.is_cancelled());
        assert!(clone.is_cancelled());
        assert!(handle.context().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_resolves_after_cancel() {
        let (ctx, handle) = Context::with_cancel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("context should be cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_cancels() {
        let (ctx, handle) = Context::with_cancel();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_secs(5), ctx.cancelled()).await;
        assert!(waited.is_err());
        assert!(!ctx.is_cancelled());
    }
}
