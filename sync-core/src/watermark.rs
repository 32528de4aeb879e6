//! Sync watermark resolution.
//!
//! Evaluated once per run, before any fetch. The resolver only sees values;
//! reading the last completed run from history is the caller's job.

use chrono::{DateTime, Duration, Utc};
use filing_sync_types::SyncMode;

/// Default backward shift applied to incremental watermarks (5 minutes).
pub const DEFAULT_WATERMARK_SKEW_SECS: u64 = 300;

/// Resolved mode and effective "modified since" cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    /// How the cutoff was chosen.
    pub mode: SyncMode,
    /// Cutoff to filter the remote source by; `None` fetches everything.
    pub since: Option<DateTime<Utc>>,
}

/// Chooses between full, incremental and manual runs.
#[derive(Debug, Clone, Copy)]
pub struct WatermarkResolver {
    skew: Duration,
}

impl WatermarkResolver {
    /// Create a resolver that shifts incremental cutoffs back by `skew_secs`.
    pub fn new(skew_secs: u64) -> Self {
        let secs = i64::try_from(skew_secs).unwrap_or(i64::MAX);
        Self {
            skew: Duration::try_seconds(secs).unwrap_or(Duration::MAX),
        }
    }

    /// The configured skew.
    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// Resolve the watermark for a run.
    ///
    /// An explicit `manual` cutoff wins. Otherwise the completion time of the
    /// last successful run, minus the skew, gives an incremental run. With
    /// neither, the run is full.
    pub fn resolve(
        &self,
        manual: Option<DateTime<Utc>>,
        last_completed: Option<DateTime<Utc>>,
    ) -> Watermark {
        if let Some(since) = manual {
            return Watermark {
                mode: SyncMode::Manual,
                since: Some(since),
            };
        }

        match last_completed {
            Some(completed_at) => Watermark {
                mode: SyncMode::Incremental,
                since: Some(
                    completed_at
                        .checked_sub_signed(self.skew)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                ),
            },
            None => Watermark {
                mode: SyncMode::Full,
                since: None,
            },
        }
    }
}

impl Default for WatermarkResolver {
    fn default() -> Self {
        Self::new(DEFAULT_WATERMARK_SKEW_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn no_history_means_full() {
        let wm = WatermarkResolver::default().resolve(None, None);
        assert_eq!(wm.mode, SyncMode::Full);
        assert_eq!(wm.since, None);
    }

    #[test]
    fn incremental_subtracts_five_minutes() {
        let wm = WatermarkResolver::default().resolve(None, Some(at(12, 0)));
        assert_eq!(wm.mode, SyncMode::Incremental);
        assert_eq!(wm.since, Some(at(11, 55)));
    }

    #[test]
    fn manual_cutoff_wins_and_is_not_skewed() {
        let wm = WatermarkResolver::default().resolve(Some(at(8, 0)), Some(at(12, 0)));
        assert_eq!(wm.mode, SyncMode::Manual);
        assert_eq!(wm.since, Some(at(8, 0)));
    }

    #[test]
    fn custom_skew() {
        let resolver = WatermarkResolver::new(60);
        assert_eq!(resolver.skew(), Duration::seconds(60));
        assert_eq!(resolver.resolve(None, Some(at(12, 0))).since, Some(at(11, 59)));
    }

    #[test]
    fn huge_skew_saturates() {
        let wm = WatermarkResolver::new(u64::MAX).resolve(None, Some(at(12, 0)));
        assert_eq!(wm.mode, SyncMode::Incremental);
        assert!(wm.since.unwrap() < at(12, 0));
    }
}
