use std::future::pending;
use tokio::sync::watch;

/// Cancels the executions observing the paired [`CancelToken`]s
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Cancel once the returned guard goes out of scope
    pub fn cancel_on_drop(self) -> CancelOnDrop {
        CancelOnDrop(self)
    }
}

/// Fires its [`Canceller`] when dropped, e.g. together with an abandoned future
#[derive(Debug)]
pub struct CancelOnDrop(Canceller);

impl CancelOnDrop {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Cancellation signal handed to a run. Cloning shares the signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> (Canceller, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Canceller { tx }, CancelToken { rx })
    }

    /// A token that is never cancelled
    pub fn never() -> Self {
        let (_, token) = Self::new();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever when the
    /// canceller is gone without having cancelled.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                if *self.rx.borrow() {
                    return;
                }
                pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}
