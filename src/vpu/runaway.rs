//! Runaway task detection
//!
//! A task that re-enqueues work into its own VPU on every run can keep the
//! VPU from ever reaching quiescence, starving sibling VPUs and the host.
//! The guard counts enqueues made from within the VPU's active flush; once
//! the count exceeds the configured budget the VPU is runaway for the rest of
//! that flush. The guard is stateless across flushes.

/// Per-flush reentrant-enqueue counter.
#[derive(Debug)]
pub(crate) struct RunawayGuard {
    threshold: usize,
    reentrant_enqueues: usize,
    runaway: bool,
}

impl RunawayGuard {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            threshold,
            reentrant_enqueues: 0,
            runaway: false,
        }
    }

    /// Reset at the start of every flush, regardless of whether the previous
    /// flush went runaway.
    pub(crate) fn reset(&mut self) {
        self.reentrant_enqueues = 0;
        self.runaway = false;
    }

    /// Record an enqueue made while the owning VPU is mid-flush. Returns true
    /// exactly once per flush: at the moment the budget is first exceeded.
    pub(crate) fn note_reentrant_enqueue(&mut self) -> bool {
        self.reentrant_enqueues += 1;
        if !self.runaway && self.reentrant_enqueues > self.threshold {
            self.runaway = true;
            return true;
        }
        false
    }

    pub(crate) fn is_runaway(&self) -> bool {
        self.runaway
    }

    pub(crate) fn threshold(&self) -> usize {
        self.threshold
    }

    #[cfg(test)]
    pub(crate) fn reentrant_enqueues(&self) -> usize {
        self.reentrant_enqueues
    }
}
