//! Online/offline signal for the dispatcher.
//!
//! The monitor is a thin wrapper over a `tokio::sync::watch` channel. Whoever
//! knows the network state (an OS hook, a probe, a test) calls
//! [`ConnectivityMonitor::set_online`]; the upload manager subscribes and
//! resumes dispatch when the value flips back to online.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

/// Shared connectivity flag
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Starts online
    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Update the flag. Subscribers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    }

    /// Listen for changes; dropping the subscription unsubscribes
    pub fn subscribe(&self) -> ConnectivitySubscription {
        let mut receiver = self.sender.subscribe();
        receiver.mark_unchanged();
        ConnectivitySubscription { receiver }
    }

    /// Current value followed by every change, as a stream
    pub fn watch(&self) -> WatchStream<bool> {
        WatchStream::new(self.sender.subscribe())
    }

    /// Resolve once the flag reads online
    pub async fn wait_online(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel
        let _ = receiver.wait_for(|online| *online).await;
    }

    /// Poll `probe` every `every` and feed the result into this monitor
    pub fn watch_probe<P>(&self, probe: P, every: Duration) -> JoinHandle<()>
    where
        P: ConnectivityProbe + 'static,
    {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            debug!("Starting connectivity probe with interval: {:?}", every);
            loop {
                ticker.tick().await;
                monitor.set_online(probe.check().await);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::online()
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`]
#[derive(Debug)]
pub struct ConnectivitySubscription {
    receiver: watch::Receiver<bool>,
}

impl ConnectivitySubscription {
    /// Wait for the next change and return the new value.
    ///
    /// `None` once every monitor handle has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }

    pub fn current(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Source of truth for "can we reach storage right now"
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}
