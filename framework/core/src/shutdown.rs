use std::sync::Arc;

use tokio::sync::watch;

/// Run-wide stop signal.
///
/// Built on a watch channel so that a listener created after the signal was sent still observes
/// it. Once shut down, a handle stays shut down.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn shutdown(&self) {
        let was_shutdown = self.sender.send_replace(true);
        if !was_shutdown {
            log::debug!("Shutdown signal sent");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Point in time check if the shutdown signal has been received. If this returns true then
    /// work should be stopped so that the run can drain.
    pub fn should_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the shutdown signal to be received. It is safe to race this with another future so
    /// that the shutdown signal can be used to cancel other work in progress.
    ///
    /// Returns immediately if the signal was already sent, or if every [ShutdownHandle] is gone.
    pub async fn wait_for_shutdown(&mut self) {
        // An error means the sender was dropped, nothing can ever un-stop the run after that.
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by shutdown signal".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn late_listener_sees_earlier_shutdown() {
        let handle = ShutdownHandle::new();
        assert!(!handle.new_listener().should_shutdown());

        handle.shutdown();

        assert!(handle.is_shutdown());
        assert!(handle.new_listener().should_shutdown());
    }

    #[tokio::test]
    async fn wait_for_shutdown_wakes_on_signal() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();

        let waiter = tokio::spawn(async move {
            listener.wait_for_shutdown().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("listener should wake up")
            .unwrap();
    }

    #[tokio::test]
    async fn repeated_shutdown_is_harmless() {
        let handle = ShutdownHandle::new();
        handle.shutdown();
        handle.shutdown();

        let mut listener = handle.new_listener();
        tokio::time::timeout(Duration::from_millis(100), listener.wait_for_shutdown())
            .await
            .expect("already shut down");
    }
}
