//! How long to wait after stopping or starting the server before trusting
//! the process table.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use super::ServerProcessState;

/// Waiting policy between a restart step and its verification query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettleStrategy {
    /// Sleep for the whole window, then query once.
    Fixed { window: Duration },
    /// Query every `interval` until the expected state shows up or `timeout`
    /// elapses. The last observed state is returned either way.
    Poll { interval: Duration, timeout: Duration },
}

impl SettleStrategy {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn fixed(window: Duration) -> Self {
        Self::Fixed { window }
    }

    pub fn poll(interval: Duration, timeout: Duration) -> Self {
        Self::Poll { interval, timeout }
    }

    /// Upper bound on the time spent settling.
    pub fn window(&self) -> Duration {
        match *self {
            Self::Fixed { window } => window,
            Self::Poll { timeout, .. } => timeout,
        }
    }

    /// Wait according to the strategy, using `query` to observe the server.
    ///
    /// `settled` decides whether an observed state is the one we are
    /// waiting for. Only the polling strategy consults it.
    pub async fn settle<Q, Fut>(
        &self,
        mut query: Q,
        settled: impl Fn(&ServerProcessState) -> bool,
    ) -> ServerProcessState
    where
        Q: FnMut() -> Fut,
        Fut: Future<Output = ServerProcessState>,
    {
        match *self {
            Self::Fixed { window } => {
                tokio::time::sleep(window).await;
                query().await
            }
            Self::Poll { interval, timeout } => {
                let deadline = tokio::time::Instant::now() + timeout;
                loop {
                    tokio::time::sleep(interval).await;
                    let state = query().await;
                    if settled(&state) || tokio::time::Instant::now() >= deadline {
                        return state;
                    }
                }
            }
        }
    }
}

impl Default for SettleStrategy {
    fn default() -> Self {
        Self::poll(Self::DEFAULT_INTERVAL, Self::DEFAULT_WINDOW)
    }
}
