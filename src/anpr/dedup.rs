use std::collections::HashSet;

use chrono::{DateTime, Utc};

/// Per-camera duplicate suppression over a sliding time window. Keys are
/// `plate || floor(timestamp / window)`, so repeated reads of the same
/// stationary vehicle within one window collapse to a single event while a
/// later re-entry still produces a fresh one.
pub struct DedupFilter {
    window_secs: u64,
    seen: HashSet<String>,
    bucket_timestamps: Vec<(String, i64)>,
}

impl DedupFilter {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs: window_secs.max(1),
            seen: HashSet::new(),
            bucket_timestamps: Vec::new(),
        }
    }

    /// Returns `true` if this plate was already recorded within the current
    /// window (i.e., the event should be suppressed).
    pub fn is_duplicate(&mut self, plate: &str, now: DateTime<Utc>) -> bool {
        let bucket = now.timestamp() / self.window_secs as i64;
        let key = format!("{plate}|{bucket}");
        if self.seen.contains(&key) {
            return true;
        }
        self.seen.insert(key.clone());
        self.bucket_timestamps.push((key, now.timestamp()));
        false
    }

    /// Drops entries older than `2 * window_secs` to bound memory use; the
    /// caller is expected to call this on its own slower cadence (every
    /// 60s in the default configuration), not every tick.
    pub fn prune(&mut self) {
        let cutoff = Utc::now().timestamp() - (self.window_secs as i64 * 2).max(30);
        self.bucket_timestamps.retain(|(key, ts)| {
            let keep = *ts >= cutoff;
            if !keep {
                self.seen.remove(key);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_reads_within_window_are_suppressed() {
        let mut filter = DedupFilter::new(5);
        let now = Utc::now();
        assert!(!filter.is_duplicate("ABC123", now));
        assert!(filter.is_duplicate("ABC123", now));
        assert!(filter.is_duplicate("ABC123", now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn different_plates_are_independent() {
        let mut filter = DedupFilter::new(5);
        let now = Utc::now();
        assert!(!filter.is_duplicate("ABC123", now));
        assert!(!filter.is_duplicate("XYZ999", now));
    }

    #[test]
    fn prune_forgets_old_entries_allowing_re_entry() {
        let mut filter = DedupFilter::new(5);
        let now = Utc::now() - chrono::Duration::seconds(120);
        assert!(!filter.is_duplicate("ABC123", now));
        filter.prune();
        assert!(!filter.is_duplicate("ABC123", Utc::now()));
    }
}
