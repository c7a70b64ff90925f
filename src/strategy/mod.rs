/// Selection strategies over candidate adapter handles
///
/// A strategy is a pure choice over the connected candidates the router
/// hands it. Candidates always arrive ordered by service name, so any
/// tie-break that picks "the first" is stable across calls.
pub mod latency;
pub mod least_connections;
pub mod round_robin;
pub mod weighted;

pub use latency::{LatencyAware, LatencyScorer};
pub use least_connections::LeastConnections;
pub use round_robin::RoundRobin;
pub use weighted::{ConfigWeights, WeightSource, Weighted};

use crate::adapter::AdapterHandle;
use crate::error::{ThroomError, ThroomResult};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Selection strategy trait
pub trait Strategy: Send + Sync {
    /// Pick one handle from a non-empty, name-ordered candidate list
    fn select(&self, candidates: &[AdapterHandle]) -> ThroomResult<AdapterHandle>;

    /// Configuration name of the strategy
    fn name(&self) -> &'static str;
}

/// Known strategy names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    RoundRobin,
    Weighted,
    LeastConnections,
    LatencyAware,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::RoundRobin,
        StrategyKind::Weighted,
        StrategyKind::LeastConnections,
        StrategyKind::LatencyAware,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::Weighted => "weighted",
            StrategyKind::LeastConnections => "least_connections",
            StrategyKind::LatencyAware => "ai",
        }
    }

    /// Fresh strategy instance with its own counters
    pub fn build(&self) -> Arc<dyn Strategy> {
        match self {
            StrategyKind::RoundRobin => Arc::new(RoundRobin::new()),
            StrategyKind::Weighted => Arc::new(Weighted::with_source(Arc::new(ConfigWeights))),
            StrategyKind::LeastConnections => Arc::new(LeastConnections::new()),
            StrategyKind::LatencyAware => Arc::new(LatencyAware::new()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ThroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ThroomError::invalid_operation(format!("unknown strategy: {}", s)))
    }
}

/// Build the strategy named `name`, falling back to round-robin
pub fn create_strategy(name: &str) -> Arc<dyn Strategy> {
    match name.parse::<StrategyKind>() {
        Ok(kind) => kind.build(),
        Err(_) => {
            tracing::warn!("Unknown routing strategy {:?}, falling back to round_robin", name);
            StrategyKind::RoundRobin.build()
        }
    }
}

pub(crate) fn ensure_candidates(candidates: &[AdapterHandle]) -> ThroomResult<()> {
    if candidates.is_empty() {
        Err(ThroomError::NoCandidates)
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapter::testing::StubCache;

    /// Connected stubs told apart by host, plus typed access for scripting
    pub fn stubs(hosts: &[&str]) -> (Vec<Arc<StubCache>>, Vec<AdapterHandle>) {
        let stubs: Vec<Arc<StubCache>> = hosts
            .iter()
            .map(|host| Arc::new(StubCache::at(host)))
            .collect();
        let handles = stubs
            .iter()
            .map(|stub| AdapterHandle::Cache(stub.clone()))
            .collect();
        (stubs, handles)
    }

    pub fn handles(hosts: &[&str]) -> Vec<AdapterHandle> {
        stubs(hosts).1
    }

    pub fn host(handle: &AdapterHandle) -> &str {
        &handle.config().host
    }

    #[test]
    fn test_strategy_names() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
            assert_eq!(kind.build().name(), kind.as_str());
        }
        assert!("AI".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_round_robin() {
        assert_eq!(create_strategy("fastest").name(), "round_robin");
        assert_eq!(create_strategy("").name(), "round_robin");
        assert_eq!(create_strategy("ai").name(), "ai");
    }

    #[test]
    fn test_empty_candidates() {
        for kind in StrategyKind::ALL {
            let err = kind.build().select(&[]).unwrap_err();
            assert!(matches!(err, ThroomError::NoCandidates));
        }
    }
}
