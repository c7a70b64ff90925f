/// Latency-aware selection (configured as `ai`)
use super::{ensure_candidates, Strategy};
use crate::adapter::AdapterHandle;
use crate::error::ThroomResult;
use std::fmt;
use std::sync::Arc;

/// Scores a candidate; lower is better, `None` excludes it from comparison
pub type LatencyScorer = Arc<dyn Fn(&AdapterHandle) -> Option<f64> + Send + Sync>;

/// Default score: observed average latency in seconds, when any was recorded
pub fn average_latency(handle: &AdapterHandle) -> Option<f64> {
    let latency = handle.metrics().average_latency;
    (!latency.is_zero()).then(|| latency.as_secs_f64())
}

/// Selects the lowest-scoring candidate.
///
/// When no candidate has a score yet (nothing recorded), the first
/// candidate is returned so a cold cluster still routes.
pub struct LatencyAware {
    scorer: LatencyScorer,
}

impl Default for LatencyAware {
    fn default() -> Self {
        Self {
            scorer: Arc::new(average_latency),
        }
    }
}

impl LatencyAware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scoring function, e.g. with a predictive model
    pub fn with_scorer(scorer: LatencyScorer) -> Self {
        Self { scorer }
    }
}

impl fmt::Debug for LatencyAware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyAware").finish_non_exhaustive()
    }
}

impl Strategy for LatencyAware {
    fn select(&self, candidates: &[AdapterHandle]) -> ThroomResult<AdapterHandle> {
        ensure_candidates(candidates)?;

        let mut best: Option<(&AdapterHandle, f64)> = None;
        for candidate in candidates {
            let Some(score) = (self.scorer)(candidate) else {
                continue;
            };
            if best.map_or(true, |(_, best_score)| score < best_score) {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((handle, score)) => {
                tracing::debug!(address = %handle.config().address(), score, "Selected fastest adapter");
                Ok(handle.clone())
            }
            None => Ok(candidates[0].clone()),
        }
    }

    fn name(&self) -> &'static str {
        "ai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::{host, stubs};
    use std::time::Duration;

    #[test]
    fn test_picks_lowest_average_latency() {
        let (stubs, candidates) = stubs(&["a", "b", "c"]);
        stubs[0].core.record_request(Duration::from_millis(40), true);
        stubs[2].core.record_request(Duration::from_millis(10), true);
        stubs[2].core.record_request(Duration::from_millis(20), true);

        // b has no samples and is left out of the comparison
        let strategy = LatencyAware::new();
        assert_eq!(host(&strategy.select(&candidates).unwrap()), "c");
    }

    #[test]
    fn test_falls_back_to_first_without_samples() {
        let (_stubs, candidates) = stubs(&["a", "b"]);
        let strategy = LatencyAware::new();
        assert_eq!(host(&strategy.select(&candidates).unwrap()), "a");
    }

    #[test]
    fn test_custom_scorer() {
        let (_stubs, candidates) = stubs(&["a", "b", "c"]);
        let strategy = LatencyAware::with_scorer(Arc::new(|handle: &AdapterHandle| {
            (handle.config().host != "a").then(|| handle.config().host.len() as f64)
        }));

        // b and c tie; the earlier one wins
        assert_eq!(host(&strategy.select(&candidates).unwrap()), "b");
    }
}
