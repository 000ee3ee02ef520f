//! Process-wide default interface

use std::time::Duration;
use tokio::sync::watch;

/// The interface owning the IPv4 default route, as last observed by the
/// event monitor
///
/// Waiters block until a value is set or their timeout expires.
#[derive(Debug)]
pub struct DefaultInterfaceSignal {
    value: watch::Sender<Option<String>>,
}

impl DefaultInterfaceSignal {
    pub fn new() -> Self {
        Self {
            value: watch::Sender::new(None),
        }
    }

    /// Record the default interface and wake every waiter
    pub fn set(&self, interface: Option<String>) {
        self.value.send_replace(interface);
    }

    pub fn get(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    /// Wait until a default interface is known
    ///
    /// Returns whether it was observed within `timeout`; `None` waits forever.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.value.subscribe();
        let observed = rx.wait_for(|value| value.is_some());

        match timeout {
            Some(timeout) => matches!(tokio::time::timeout(timeout, observed).await, Ok(Ok(_))),
            None => observed.await.is_ok(),
        }
    }
}

impl Default for DefaultInterfaceSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_when_unset() {
        let signal = DefaultInterfaceSignal::new();
        assert!(!signal.wait(Some(Duration::from_secs(5))).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_wakes_waiters() {
        let signal = Arc::new(DefaultInterfaceSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(Some(Duration::from_secs(30))).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.set(Some("em0".to_string()));

        assert!(waiter.await.unwrap());
        assert_eq!(signal.get().as_deref(), Some("em0"));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_set() {
        let signal = DefaultInterfaceSignal::new();
        signal.set(Some("em0".to_string()));
        assert!(signal.wait(Some(Duration::ZERO)).await || signal.wait(None).await);
    }
}
