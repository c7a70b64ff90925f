/// Least-connections selection
use super::{ensure_candidates, Strategy};
use crate::adapter::AdapterHandle;
use crate::error::ThroomResult;

/// Picks the candidate with the fewest in-flight operations.
///
/// Ties go to the earliest candidate, so identical inputs always yield the
/// same handle.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastConnections {
    fn select(&self, candidates: &[AdapterHandle]) -> ThroomResult<AdapterHandle> {
        ensure_candidates(candidates)?;

        let mut best = &candidates[0];
        let mut best_active = best.metrics().active_connections;
        for candidate in &candidates[1..] {
            let active = candidate.metrics().active_connections;
            if active < best_active {
                best = candidate;
                best_active = active;
            }
        }

        tracing::debug!(
            address = %best.config().address(),
            active_connections = best_active,
            "Selected least-loaded adapter"
        );
        Ok(best.clone())
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::{host, stubs};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_picks_minimum() {
        let (stubs, candidates) = stubs(&["a", "b", "c"]);
        stubs[0].active.store(5, Ordering::SeqCst);
        stubs[1].active.store(1, Ordering::SeqCst);
        stubs[2].active.store(3, Ordering::SeqCst);

        let strategy = LeastConnections::new();
        assert_eq!(host(&strategy.select(&candidates).unwrap()), "b");

        stubs[1].active.store(7, Ordering::SeqCst);
        assert_eq!(host(&strategy.select(&candidates).unwrap()), "c");
    }

    #[test]
    fn test_ties_are_stable() {
        let (stubs, candidates) = stubs(&["a", "b", "c"]);
        stubs[0].active.store(2, Ordering::SeqCst);

        let strategy = LeastConnections::new();
        for _ in 0..10 {
            assert_eq!(host(&strategy.select(&candidates).unwrap()), "b");
        }
    }
}
