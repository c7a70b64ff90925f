/// Weighted round-robin selection over a pluggable weight source
use super::{ensure_candidates, RoundRobin, Strategy};
use crate::adapter::AdapterHandle;
use crate::error::ThroomResult;
use std::fmt;
use std::sync::Arc;

/// Supplies the relative weight of a candidate
pub trait WeightSource: Send + Sync {
    /// Relative capacity; 0 is treated as 1
    fn weight(&self, handle: &AdapterHandle) -> u32;
}

/// Reads the static `weight` from each service's configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigWeights;

impl WeightSource for ConfigWeights {
    fn weight(&self, handle: &AdapterHandle) -> u32 {
        handle.config().weight
    }
}

/// Weighted round-robin.
///
/// Walks a position counter modulo the total weight and picks the candidate
/// whose cumulative weight range covers it. Without a weight source every
/// candidate counts once, which is exactly round-robin.
#[derive(Default)]
pub struct Weighted {
    rotation: RoundRobin,
    source: Option<Arc<dyn WeightSource>>,
}

impl Weighted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(source: Arc<dyn WeightSource>) -> Self {
        Self {
            rotation: RoundRobin::new(),
            source: Some(source),
        }
    }
}

impl fmt::Debug for Weighted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weighted")
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl Strategy for Weighted {
    fn select(&self, candidates: &[AdapterHandle]) -> ThroomResult<AdapterHandle> {
        ensure_candidates(candidates)?;

        let Some(source) = &self.source else {
            return self.rotation.select(candidates);
        };

        let weights: Vec<usize> = candidates
            .iter()
            .map(|c| source.weight(c).max(1) as usize)
            .collect();
        let total_weight: usize = weights.iter().sum();

        let position = self.rotation.next_index(total_weight);
        let mut current_weight = 0;
        for (candidate, weight) in candidates.iter().zip(&weights) {
            current_weight += weight;
            if position < current_weight {
                return Ok(candidate.clone());
            }
        }

        // position < total_weight, so the loop always returns
        Ok(candidates[0].clone())
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::StubCache;
    use crate::strategy::tests::{handles, host};
    use std::collections::HashMap;

    fn weighted_handle(host: &str, weight: u32) -> AdapterHandle {
        let mut config = crate::config::ServiceConfig::new("memory_cache", host, 1);
        config.weight = weight;
        let stub = StubCache::from_config(config);
        stub.core.set_connected(true);
        AdapterHandle::cache(stub)
    }

    fn tally(
        strategy: &dyn Strategy,
        candidates: &[AdapterHandle],
        n: usize,
    ) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let handle = strategy.select(candidates).unwrap();
            *counts.entry(host(&handle).to_string()).or_default() += 1;
        }
        counts
    }

    #[test]
    fn test_without_source_is_round_robin() {
        let weighted = Weighted::new();
        let candidates = handles(&["a", "b", "c"]);

        let picked: Vec<String> = (0..4)
            .map(|_| host(&weighted.select(&candidates).unwrap()).to_string())
            .collect();
        assert_eq!(picked, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_config_weights() {
        let weighted = Weighted::with_source(Arc::new(ConfigWeights));
        let candidates = vec![weighted_handle("big", 3), weighted_handle("small", 1)];

        // big takes 3 of every 4 picks
        let counts = tally(&weighted, &candidates, 8);
        assert_eq!(counts["big"], 6);
        assert_eq!(counts["small"], 2);
    }

    #[test]
    fn test_zero_weight_counts_as_one() {
        let weighted = Weighted::with_source(Arc::new(ConfigWeights));
        let candidates = vec![weighted_handle("a", 0), weighted_handle("b", 1)];

        let counts = tally(&weighted, &candidates, 10);
        assert_eq!(counts["a"], 5);
        assert_eq!(counts["b"], 5);
    }

    #[test]
    fn test_custom_source() {
        struct PreferHost(&'static str);

        impl WeightSource for PreferHost {
            fn weight(&self, handle: &AdapterHandle) -> u32 {
                if handle.config().host == self.0 {
                    9
                } else {
                    1
                }
            }
        }

        let weighted = Weighted::with_source(Arc::new(PreferHost("b")));
        let candidates = handles(&["a", "b"]);

        let counts = tally(&weighted, &candidates, 100);
        assert_eq!(counts["a"], 10);
        assert_eq!(counts["b"], 90);
    }
}
