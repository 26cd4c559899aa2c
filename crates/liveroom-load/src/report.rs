//! Per-run and aggregate reports.

use crate::errors::{ErrorKind, LoadError};
use chrono::{DateTime, Utc};
use common::types::RunId;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Histogram bucket count used when none is configured.
pub const DEFAULT_BUCKETS: usize = 5;

/// Outcome of one scenario run. Produced exactly once per run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub error: Option<LoadError>,
    /// Failed state polls seen by the run's watchers when the run ended.
    pub state_poll_failures: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1_000_000.0)
}

/// Min, mean and max duration of successful runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    #[serde(rename = "min_ms", serialize_with = "as_millis")]
    pub min: Duration,
    #[serde(rename = "avg_ms", serialize_with = "as_millis")]
    pub avg: Duration,
    #[serde(rename = "max_ms", serialize_with = "as_millis")]
    pub max: Duration,
}

impl LatencyStats {
    /// `None` for an empty sample.
    pub fn from_durations(durations: &[Duration]) -> Option<Self> {
        let min = durations.iter().min().copied()?;
        let max = durations.iter().max().copied()?;
        let total: u128 = durations.iter().map(Duration::as_nanos).sum();
        let count = u128::try_from(durations.len()).unwrap_or(u128::MAX);
        let avg_nanos = u64::try_from(total / count).unwrap_or(u64::MAX);
        Some(Self {
            min,
            avg: Duration::from_nanos(avg_nanos),
            max,
        })
    }
}

/// One histogram bucket: `[lower, upper)`, or `[lower, upper]` for the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    #[serde(rename = "lower_ms", serialize_with = "as_millis")]
    pub lower: Duration,
    #[serde(rename = "upper_ms", serialize_with = "as_millis")]
    pub upper: Duration,
    pub upper_inclusive: bool,
    pub count: usize,
}

/// Partition `[min, max]` of `durations` into `buckets` equal-width buckets.
///
/// Bounds are computed in integer nanoseconds so the run at exactly `max`
/// always lands in the last bucket, whose upper bound is inclusive. When
/// every duration is equal all of them land in the last bucket.
pub fn histogram(durations: &[Duration], buckets: usize) -> Vec<HistogramBucket> {
    let (Some(min), Some(max)) = (durations.iter().min(), durations.iter().max()) else {
        return Vec::new();
    };
    let buckets = buckets.max(1);
    let n = u128::try_from(buckets).unwrap_or(1);
    let min_ns = min.as_nanos();
    let span = max.as_nanos() - min_ns;

    let to_duration = |nanos: u128| Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
    let lowers: Vec<u128> = (0..n).map(|i| min_ns + span * i / n).collect();

    let mut counts = vec![0usize; buckets];
    for d in durations {
        let ns = d.as_nanos();
        let index = lowers.iter().rposition(|lower| *lower <= ns).unwrap_or(0);
        if let Some(count) = counts.get_mut(index) {
            *count += 1;
        }
    }

    lowers
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(i, (lower, count))| {
            let last = i + 1 == buckets;
            let upper = if last {
                *max
            } else {
                lowers.get(i + 1).map_or(*max, |u| to_duration(*u))
            };
            HistogramBucket {
                lower: to_duration(*lower),
                upper,
                upper_inclusive: last,
                count,
            }
        })
        .collect()
}

/// Statistics across every run of a load test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub attempted: usize,
    pub succeeded: usize,
    #[serde(rename = "total_duration_ms", serialize_with = "as_millis")]
    pub total_duration: Duration,
    /// Timing of successful runs. `None` when no run succeeded.
    pub latency: Option<LatencyStats>,
    pub histogram: Vec<HistogramBucket>,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    /// Failed state polls summed over the per-run snapshots.
    pub state_poll_failures: u64,
}

impl AggregateReport {
    /// Build from every run's report. Only successful runs feed the timing
    /// statistics.
    pub fn from_reports(reports: &[RunReport], total_duration: Duration, buckets: usize) -> Self {
        let successful: Vec<Duration> = reports
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.duration)
            .collect();

        let mut failures_by_kind = BTreeMap::new();
        for err in reports.iter().filter_map(|r| r.error.as_ref()) {
            *failures_by_kind.entry(err.kind()).or_insert(0) += 1;
        }

        Self {
            attempted: reports.len(),
            succeeded: successful.len(),
            total_duration,
            latency: LatencyStats::from_durations(&successful),
            histogram: histogram(&successful, buckets),
            failures_by_kind,
            state_poll_failures: reports.iter().map(|r| r.state_poll_failures).sum(),
        }
    }

    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    /// Percentage of successful runs; zero when nothing ran.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.succeeded as f64 * 100.0 / self.attempted as f64
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "runs: {} attempted, {} succeeded, {} failed ({:.1}% success)",
            self.attempted,
            self.succeeded,
            self.failed(),
            self.success_rate()
        )?;
        writeln!(f, "total duration: {:?}", self.total_duration)?;
        match &self.latency {
            Some(stats) => writeln!(
                f,
                "latency min/avg/max: {:?} / {:?} / {:?}",
                stats.min, stats.avg, stats.max
            )?,
            None => writeln!(f, "latency min/avg/max: n/a")?,
        }
        if !self.histogram.is_empty() {
            writeln!(f, "histogram:")?;
            for bucket in &self.histogram {
                let close = if bucket.upper_inclusive { ']' } else { ')' };
                writeln!(
                    f,
                    "  [{:?}, {:?}{close}: {}",
                    bucket.lower, bucket.upper, bucket.count
                )?;
            }
        }
        if !self.failures_by_kind.is_empty() {
            let kinds: Vec<String> = self
                .failures_by_kind
                .iter()
                .map(|(kind, count)| format!("{kind}={count}"))
                .collect();
            writeln!(f, "failures by kind: {}", kinds.join(", "))?;
        }
        write!(f, "failed state polls: {}", self.state_poll_failures)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::errors::RpcError;

    fn report(millis: u64, error: Option<LoadError>) -> RunReport {
        RunReport {
            run_id: RunId::new(),
            started_at: Utc::now(),
            duration: Duration::from_millis(millis),
            error,
            state_poll_failures: 1,
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_ten_evenly_spaced_runs() {
        let reports: Vec<RunReport> = (1..=10).map(|i| report(i * 100, None)).collect();
        let agg = AggregateReport::from_reports(&reports, ms(1_000), DEFAULT_BUCKETS);

        assert_eq!(agg.succeeded, 10);
        let stats = agg.latency.unwrap();
        assert_eq!(stats.min, ms(100));
        assert_eq!(stats.avg, ms(550));
        assert_eq!(stats.max, ms(1_000));

        let bounds: Vec<(Duration, Duration, usize)> =
            agg.histogram.iter().map(|b| (b.lower, b.upper, b.count)).collect();
        assert_eq!(
            bounds,
            vec![
                (ms(100), ms(280), 2),
                (ms(280), ms(460), 2),
                (ms(460), ms(640), 2),
                (ms(640), ms(820), 2),
                (ms(820), ms(1_000), 2),
            ]
        );
        assert!(agg.histogram[4].upper_inclusive);
        assert!(!agg.histogram[3].upper_inclusive);
    }

    #[test]
    fn test_max_lands_in_last_bucket() {
        let durations = [ms(0), ms(1), ms(1), ms(3)];
        let buckets = histogram(&durations, 3);
        assert_eq!(buckets.iter().map(|b| b.count).collect::<Vec<_>>(), vec![1, 2, 1]);
    }

    #[test]
    fn test_zero_span_fills_last_bucket() {
        let durations = [ms(250); 4];
        let buckets = histogram(&durations, 5);
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets[4].count, 4);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 4);
    }

    #[test]
    fn test_no_success_reports_undefined_latency() {
        let reports = vec![
            report(100, Some(LoadError::Precondition("pool".to_string()))),
            report(
                200,
                Some(LoadError::upstream("JoinSession", RpcError::Transport("reset".to_string()))
                    .for_participant("student #1 (s1)")),
            ),
        ];
        let agg = AggregateReport::from_reports(&reports, ms(200), DEFAULT_BUCKETS);

        assert_eq!(agg.attempted, 2);
        assert_eq!(agg.failed(), 2);
        assert!(agg.latency.is_none());
        assert!(agg.histogram.is_empty());
        assert_eq!(agg.failures_by_kind[&ErrorKind::Upstream], 1);
        assert_eq!(agg.failures_by_kind[&ErrorKind::Precondition], 1);
        assert!(agg.to_string().contains("latency min/avg/max: n/a"));
    }

    #[test]
    fn test_failures_excluded_from_timing() {
        let reports = vec![
            report(100, None),
            report(300, None),
            report(5_000, Some(LoadError::Cancelled { phase: "run".to_string() })),
        ];
        let agg = AggregateReport::from_reports(&reports, ms(5_000), DEFAULT_BUCKETS);

        let stats = agg.latency.unwrap();
        assert!(stats.min <= stats.avg && stats.avg <= stats.max);
        assert_eq!(stats.max, ms(300));
        assert_eq!(agg.histogram.iter().map(|b| b.count).sum::<usize>(), agg.succeeded);
        assert_eq!(agg.state_poll_failures, 3);
    }

    #[test]
    fn test_json_uses_millis() {
        let reports = vec![report(100, None), report(200, None)];
        let agg = AggregateReport::from_reports(&reports, ms(250), 2);
        let json = serde_json::to_value(&agg).unwrap();

        assert_eq!(json["attempted"], 2);
        assert_eq!(json["total_duration_ms"], 250.0);
        assert_eq!(json["latency"]["avg_ms"], 150.0);
        assert_eq!(json["histogram"][1]["upper_inclusive"], true);
    }

    #[test]
    fn test_display_lists_histogram_rows() {
        let reports: Vec<RunReport> = (1..=10).map(|i| report(i * 100, None)).collect();
        let text = AggregateReport::from_reports(&reports, ms(1_000), DEFAULT_BUCKETS).to_string();

        assert!(text.contains("10 attempted, 10 succeeded, 0 failed (100.0% success)"));
        assert!(text.contains("[100ms, 280ms): 2"));
        assert!(text.contains("[820ms, 1s]: 2"));
    }
}
