//! Shutdown signalling
//!
//! One [`ShutdownHandle`] per worker; any number of [`ShutdownSignal`]s
//! observe it. Requesting shutdown is idempotent: only the first request
//! changes state and wakes observers.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sending side of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown; returns `true` only for the first request
    pub fn shutdown(&self) -> bool {
        self.tx.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        })
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// New observer of this handle
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested
    ///
    /// Never resolves if every handle is dropped without requesting it.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Translate SIGTERM/SIGINT into a shutdown request
pub fn listen_for_os_signals(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal_name = wait_for_os_signal().await;
        tracing::info!(signal = signal_name, "Shutdown signal received");
        handle.shutdown();
    })
}

#[cfg(unix)]
async fn wait_for_os_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            tracing::warn!("Failed to install Unix signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}
