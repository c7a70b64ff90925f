/// Round-robin selection
use super::{ensure_candidates, Strategy};
use crate::adapter::AdapterHandle;
use crate::error::ThroomResult;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cycles through candidates using a shared atomic counter
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next position modulo `len`; `len` must be non-zero
    pub(crate) fn next_index(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl Strategy for RoundRobin {
    fn select(&self, candidates: &[AdapterHandle]) -> ThroomResult<AdapterHandle> {
        ensure_candidates(candidates)?;
        let index = self.next_index(candidates.len());
        Ok(candidates[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
