//! Run cancellation signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable, level-triggered cancellation flag backed by a watch channel.
///
/// Once cancelled it stays cancelled; `cancelled()` resolves immediately
/// for late waiters.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let observed = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if observed.is_err() {
            // The sender lives as long as `self`; never reached.
            std::future::pending::<()>().await;
        }
    }
}
