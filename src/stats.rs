//! Run-wide counters, updated concurrently from worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Atomic counters tracking one run from walk to drain.
pub struct Stats {
    start: Instant,
    traversed: AtomicUsize,
    matched: AtomicUsize,
    formatted: AtomicUsize,
    changed: AtomicUsize,
}

impl Stats {
    /// Start the clock and zero every counter.
    pub fn new() -> Self {
        Stats {
            start: Instant::now(),
            traversed: AtomicUsize::new(0),
            matched: AtomicUsize::new(0),
            formatted: AtomicUsize::new(0),
            changed: AtomicUsize::new(0),
        }
    }

    /// One more file seen by the walker.
    pub fn add_traversed(&self, n: usize) {
        self.traversed.fetch_add(n, Ordering::Relaxed);
    }

    /// One more file claimed by at least one formatter.
    pub fn add_matched(&self, n: usize) {
        self.matched.fetch_add(n, Ordering::Relaxed);
    }

    /// One more file actually run through a formatter sequence.
    pub fn add_formatted(&self, n: usize) {
        self.formatted.fetch_add(n, Ordering::Relaxed);
    }

    /// One more file whose content changed as a result of formatting.
    pub fn add_changed(&self, n: usize) {
        self.changed.fetch_add(n, Ordering::Relaxed);
    }

    /// Whether any file changed this run.
    pub fn any_changed(&self) -> bool {
        self.changed.load(Ordering::Relaxed) > 0
    }

    /// A one-line summary, printed at the end of a run.
    pub fn summary(&self) -> String {
        format!(
            "{} files changed in {:.0?} (traversed {}, matched {}, formatted {})",
            self.changed.load(Ordering::Relaxed),
            self.start.elapsed(),
            self.traversed.load(Ordering::Relaxed),
            self.matched.load(Ordering::Relaxed),
            self.formatted.load(Ordering::Relaxed),
        )
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.add_traversed(10);
        stats.add_matched(4);
        stats.add_formatted(4);
        stats.add_changed(2);
        assert!(stats.any_changed());
        let summary = stats.summary();
        assert!(summary.contains("2 files changed"));
        assert!(summary.contains("traversed 10"));
    }

    #[test]
    fn no_changes_reports_false() {
        let stats = Stats::new();
        assert!(!stats.any_changed());
    }
}
