//! Connection budget shared by every task in the process.
//!
//! A slot is granted only while the per-host count stays within
//! `max_connections_per_host` and the total stays within
//! `max_global_connections`. Waiters suspend on a [`Notify`] and re-check
//! whenever any slot is released.

mod token;

pub use token::ConnectionToken;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::at_least_one;
use crate::host::HostKey;

/// Connection limits and the User-Agent sent on every request.
/// Shared and read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetPolicy {
    pub max_connections_per_host: usize,
    pub max_global_connections: usize,
    pub user_agent: String,
}

impl BudgetPolicy {
    /// Build a policy from raw config values; limits <= 0 become 1.
    pub fn new(per_host: i64, global: i64, user_agent: impl Into<String>) -> Self {
        Self {
            max_connections_per_host: at_least_one(per_host),
            max_global_connections: at_least_one(global),
            user_agent: user_agent.into(),
        }
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        crate::config::PulseConfig::default().budget_policy()
    }
}

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    per_host: HashMap<HostKey, usize>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    per_host_limit: usize,
    global_limit: usize,
    counts: Mutex<Counts>,
    released: Notify,
}

impl Inner {
    fn counts(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, host: &HostKey) {
        {
            let mut counts = self.counts();
            match counts.per_host.get_mut(host) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    if *n == 0 {
                        counts.per_host.remove(host);
                    }
                    counts.total = counts.total.saturating_sub(1);
                }
                _ => {
                    tracing::error!(host = %host, "connection released without a matching grant");
                    return;
                }
            }
        }
        self.released.notify_waiters();
    }
}

/// Process-wide connection accounting. Cheap to clone; clones share counts.
#[derive(Debug, Clone)]
pub struct ConnectionBudget {
    inner: Arc<Inner>,
}

impl ConnectionBudget {
    pub fn new(policy: &BudgetPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                per_host_limit: policy.max_connections_per_host.max(1),
                global_limit: policy.max_global_connections.max(1),
                counts: Mutex::new(Counts::default()),
                released: Notify::new(),
            }),
        }
    }

    pub fn max_per_host(&self) -> usize {
        self.inner.per_host_limit
    }

    pub fn max_global(&self) -> usize {
        self.inner.global_limit
    }

    /// Grant a slot for `host` if both limits allow it, without waiting.
    pub fn try_acquire(&self, host: &HostKey) -> Option<ConnectionToken> {
        let mut counts = self.inner.counts();
        if counts.total >= self.inner.global_limit {
            return None;
        }
        let held = counts.per_host.get(host).copied().unwrap_or(0);
        if held >= self.inner.per_host_limit {
            return None;
        }
        counts.total += 1;
        counts.per_host.insert(host.clone(), held + 1);
        drop(counts);
        Some(ConnectionToken::new(Arc::clone(&self.inner), host.clone()))
    }

    /// Wait until a slot for `host` can be granted.
    ///
    /// The waiter registers for release notifications before checking the
    /// counts, so a release between the check and the wait is never missed.
    pub async fn acquire(&self, host: &HostKey) -> ConnectionToken {
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(token) = self.try_acquire(host) {
                return token;
            }
            notified.await;
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up with `None` once `cancel` fires.
    pub async fn acquire_cancellable(
        &self,
        host: &HostKey,
        cancel: &CancellationToken,
    ) -> Option<ConnectionToken> {
        if cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            token = self.acquire(host) => Some(token),
        }
    }

    /// Slots currently held for `host`.
    pub fn held(&self, host: &HostKey) -> usize {
        self.inner.counts().per_host.get(host).copied().unwrap_or(0)
    }

    /// Slots currently held across all hosts.
    pub fn held_total(&self) -> usize {
        self.inner.counts().total
    }

    /// Global slots not currently held. May be 0 while other tasks hold the budget.
    pub fn available_global(&self) -> usize {
        self.inner
            .global_limit
            .saturating_sub(self.inner.counts().total)
    }
}
