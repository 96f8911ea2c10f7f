use std::sync::Arc;

use tokio::sync::watch;

use hassdeck_api::event::HealthStatus;

/// Connection health observer, shared by the client and the listener of one
/// session. Subscribers are only woken on actual changes.
#[derive(Clone, Debug)]
pub struct HealthBus {
    tx: Arc<watch::Sender<HealthStatus>>,
}

impl HealthBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HealthStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, status: HealthStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                log::debug!("Health: {current:?} -> {status:?}");
                *current = status;
                true
            }
        });
    }

    #[must_use]
    pub fn get(&self) -> HealthStatus {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.tx.subscribe()
    }
}

impl Default for HealthBus {
    fn default() -> Self {
        Self::new()
    }
}
