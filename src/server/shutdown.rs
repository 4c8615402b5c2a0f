use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::logger::{Journal, Logger};
use crate::session::protocol;

/// Process-wide "shutting down" flag, fired at most once.
///
/// Clones share the same flag. The acceptor waits on `cancelled()` and checks
/// `is_shutting_down()` when an accept fails.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the flag. Returns `true` only for the call that actually fired it.
    pub fn trigger(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag has fired
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Fires the flag and records `[ts] Server stopped` the first time.
    pub fn initiate(&self, journal: &dyn Journal, logger: &Logger) -> bool {
        if !self.trigger() {
            return false;
        }
        let stopped = protocol::stopped_line(&journal.format_timestamp());
        logger.info(protocol::strip_line_ending(&stopped));
        journal.append_log(&stopped);
        true
    }
}

/// Spawns a background task that waits for Ctrl+C (SIGINT) and then starts
/// the shutdown. Already connected sessions are not notified.
pub fn spawn_shutdown_listener(
    shutdown: Shutdown,
    journal: Arc<dyn Journal>,
    logger: Logger,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            logger.error(&format!("Failed to listen for ctrl_c: {}", e));
            return;
        }
        logger.warn("🛑 Ctrl+C received, shutting down.");
        shutdown.initiate(journal.as_ref(), &logger);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryJournal;
    use std::time::Duration;

    #[test]
    fn only_the_first_trigger_counts() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        assert!(!other.is_shutting_down());

        assert!(shutdown.trigger());
        assert!(!other.trigger());
        assert!(other.is_shutting_down());
    }

    #[test]
    fn stop_line_is_written_once() {
        let journal = MemoryJournal::new("ts");
        let shutdown = Shutdown::new();

        assert!(shutdown.initiate(&journal, &Logger));
        assert!(!shutdown.initiate(&journal, &Logger));
        assert_eq!(journal.lines(), vec!["[ts] Server stopped\n"]);
    }

    #[tokio::test]
    async fn waiters_wake_on_trigger() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.cancelled().await })
        };
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
    }
}
