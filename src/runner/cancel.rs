use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Run-wide cancellation flag
///
/// Cloned into every worker and attempt. Once set it never resets. Waiters
/// observe it through [`CancelSignal::cancelled`], which is cancel-safe and
/// can sit in a `tokio::select!` next to any bounded wait.
#[derive(Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal is set
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Sender gone without cancelling: nothing will ever fire
                std::future::pending::<()>().await;
            }
        }
    }

    /// Cancel automatically once `deadline` has elapsed
    pub fn cancel_after(&self, deadline: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !signal.is_cancelled() {
                log::warn!("run deadline of {}ms reached, cancelling", deadline.as_millis());
                signal.cancel();
            }
        })
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
