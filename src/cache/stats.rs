//! Cache statistics tracking and reporting.

use serde::Serialize;

/// Counters for monitoring the time-series cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub merges: u64,
    pub splits: u64,
    pub replacements: u64,
    pub purge_runs: u64,
    pub bytes_purged: u64,

    // Snapshot values, filled in when stats are read
    pub segment_count: usize,
    pub size_bytes: usize,
    pub budget_bytes: u64,
}

impl CacheStats {
    /// Lookup hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_lookup(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.record_lookup(true);
        stats.record_lookup(true);
        stats.record_lookup(false);
        stats.record_lookup(true);
        assert_eq!(stats.hit_rate(), 0.75);
    }
}
