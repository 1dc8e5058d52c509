//! Process-wide engine objects, built once at startup and shared by
//! reference: settings, the connection budget, the filename reservation
//! table and the registered resolvers.

use std::time::Duration;

use crate::budget::{BudgetPolicy, ConnectionBudget};
use crate::config::PulseConfig;
use crate::names::FilenameReservations;
use crate::resolver::ResolverSet;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub budget: BudgetPolicy,
    pub retry: RetryPolicy,
    /// Preferred chunk length for ranged downloads.
    pub target_chunk_size: u64,
    /// Resources at or below this size use a single stream.
    pub min_chunk_threshold: u64,
    /// Minimum spacing of byte-count progress events.
    pub progress_interval: Duration,
    pub max_concurrent_downloads: usize,
    /// Terminal tasks a pool keeps in its listing.
    pub retain_finished: usize,
}

impl EngineSettings {
    pub fn from_config(cfg: &PulseConfig) -> Self {
        Self {
            budget: cfg.budget_policy(),
            retry: cfg.retry_policy(),
            target_chunk_size: cfg.chunking.target_chunk_size.max(1),
            min_chunk_threshold: cfg.chunking.min_chunk_threshold,
            progress_interval: Duration::from_millis(cfg.general.progress_interval_ms.max(1)),
            max_concurrent_downloads: cfg.max_concurrent_downloads(),
            retain_finished: cfg.general.retain_finished_tasks,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&PulseConfig::default())
    }
}

#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    budget: ConnectionBudget,
    names: FilenameReservations,
    resolvers: ResolverSet,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_resolvers(settings, ResolverSet::new())
    }

    pub fn with_resolvers(settings: EngineSettings, resolvers: ResolverSet) -> Self {
        let budget = ConnectionBudget::new(&settings.budget);
        Self {
            settings,
            budget,
            names: FilenameReservations::new(),
            resolvers,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn budget(&self) -> &ConnectionBudget {
        &self.budget
    }

    pub fn names(&self) -> &FilenameReservations {
        &self.names
    }

    pub fn resolvers(&self) -> &ResolverSet {
        &self.resolvers
    }

    pub fn user_agent(&self) -> &str {
        &self.settings.budget.user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let mut cfg = PulseConfig::default();
        cfg.general.progress_interval_ms = 0;
        cfg.chunking.target_chunk_size = 0;
        cfg.connections.max_connections_per_host = 3;
        let s = EngineSettings::from_config(&cfg);
        assert_eq!(s.progress_interval, Duration::from_millis(1));
        assert_eq!(s.target_chunk_size, 1);

        let engine = Engine::new(s);
        assert_eq!(engine.budget().max_per_host(), 3);
        assert!(engine.resolvers().is_empty());
        assert!(engine.user_agent().starts_with("pulse/"));
    }
}
