//! Process-wide shutdown notification. The signal handler and the `kill` command both trigger
//! it, and every long-running task of the daemon waits on it.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use tokio::sync::broadcast::{self, error::RecvError};

static DAEMON_LIFECYCLE: Lazy<Lifecycle> = Lazy::new(Lifecycle::new);

pub struct Lifecycle {
    exit: broadcast::Sender<()>,
}

impl Lifecycle {
    fn new() -> Self {
        Lifecycle { exit: broadcast::channel(2).0 }
    }

    /// Fails if nothing is waiting for the exit, which means the daemon is not up yet.
    pub fn send_exit(&self) -> Result<()> {
        self.exit.send(()).map(|_| ()).context("Nobody is listening for the exit event")
    }

    /// Resolves once [`Self::send_exit`] is called after this started waiting.
    pub async fn recv_exit(&self) -> Result<()> {
        match self.exit.subscribe().recv().await {
            // lagging behind still means an exit was sent
            Ok(()) | Err(RecvError::Lagged(_)) => Ok(()),
            Err(RecvError::Closed) => Err(anyhow!("Exit notification channel closed")),
        }
    }
}

/// Tell every task of the daemon to wind down.
pub fn send_exit() -> Result<()> {
    DAEMON_LIFECYCLE.send_exit()
}

/// Await this in long-running tasks, and clean up once it resolves.
pub async fn recv_exit() -> Result<()> {
    DAEMON_LIFECYCLE.recv_exit().await
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_exit_reaches_every_waiting_task() {
        let lifecycle = Arc::new(Lifecycle::new());
        assert!(lifecycle.send_exit().is_err());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.recv_exit().await })
            })
            .collect();
        // let both tasks subscribe before the exit goes out
        while lifecycle.exit.receiver_count() < 2 {
            tokio::task::yield_now().await;
        }
        lifecycle.send_exit().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }
}
