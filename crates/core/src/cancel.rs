use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        let explicit = async move {
            if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = explicit => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => explicit.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_seen_by_clones() {
        let signal = CancelSignal::new();
        let observer = signal.clone();
        let waiter = tokio::spawn(async move { observer.cancelled().await });

        signal.cancel();
        assert!(waiter.await.is_ok());
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_fires_without_explicit_cancel() {
        let signal = CancelSignal::new().with_timeout(Duration::from_millis(10));
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[test]
    fn fresh_signal_is_not_cancelled() {
        assert!(!CancelSignal::new().is_cancelled());
    }
}
