//! Read-side metrics over the audit trail
//!
//! Aggregations are computed by [`crate::db::TursoClient`]; this module holds
//! the response shapes and the pure helpers they share.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default lookback window for metrics queries.
pub const DEFAULT_DAYS: u32 = 7;

/// `?days=N` query parameter accepted by every metrics endpoint.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct MetricsWindow {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    DEFAULT_DAYS
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self {
            days: DEFAULT_DAYS,
        }
    }
}

impl MetricsWindow {
    /// Lower bound of the window as unix milliseconds.
    ///
    /// Windows reaching past the representable calendar clamp to its start,
    /// so an oversized `days` simply covers the whole trail.
    pub fn since_ms(&self, now: DateTime<Utc>) -> i64 {
        chrono::TimeDelta::try_days(i64::from(self.days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RouteStats {
    pub route: String,
    pub count: u64,
    pub avg_latency: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetricsSummary {
    pub period_days: u32,
    pub total_requests: u64,
    pub avg_latency: f64,
    /// Agent timeouts summed over every access record in the window
    pub timeouts: u64,
    pub routes: Vec<RouteStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserTypeStats {
    /// `None` groups requests without an `x-user-type` header
    pub user_type: Option<String>,
    pub count: u64,
    pub avg_latency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DecisionStats {
    /// `None` groups invocations aborted before fusion
    pub decision: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceStats {
    pub service_name: String,
    pub queries: u64,
    pub timeouts: u64,
    pub avg_latency: f64,
}

/// Percentile `p` (0.0..=1.0) of an ascending slice, linearly interpolated
/// between the two nearest ranks. Empty input yields 0.0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let Some(last) = sorted.last() else {
        return 0.0;
    };

    let k = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = k.floor() as usize;
    let upper = lower + 1;
    if upper >= sorted.len() {
        return *last;
    }

    sorted[lower] * (upper as f64 - k) + sorted[upper] * (k - lower as f64)
}

/// Round to three decimals, the precision latencies are reported with.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Build per-route stats from `(route, latency)` pairs.
pub fn route_stats(samples: Vec<(String, f64)>) -> Vec<RouteStats> {
    let mut by_route: std::collections::BTreeMap<String, Vec<f64>> =
        std::collections::BTreeMap::new();
    for (route, latency) in samples {
        by_route.entry(route).or_default().push(latency);
    }

    by_route
        .into_iter()
        .map(|(route, mut latencies)| {
            latencies.sort_by(f64::total_cmp);
            let count = latencies.len();
            let avg = latencies.iter().sum::<f64>() / count as f64;
            RouteStats {
                route,
                count: count as u64,
                avg_latency: round3(avg),
                p50: round3(percentile(&latencies, 0.50)),
                p95: round3(percentile(&latencies, 0.95)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_percentile_single_value() {
        assert_eq!(percentile(&[42.0], 0.95), 42.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let data = [10.0, 20.0, 30.0, 40.0];
        assert!((percentile(&data, 0.5) - 25.0).abs() < 1e-9);
        assert!((percentile(&data, 0.95) - 38.5).abs() < 1e-9);
        assert_eq!(percentile(&data, 1.0), 40.0);
        assert_eq!(percentile(&data, 0.0), 10.0);
    }

    #[test]
    fn test_route_stats_groups_and_rounds() {
        let stats = route_stats(vec![
            ("/identify-and-answer".to_string(), 100.0),
            ("/identify-and-answer".to_string(), 300.0),
            ("/identify-and-answer".to_string(), 200.0),
            ("/other".to_string(), 1.23456),
        ]);

        assert_eq!(stats.len(), 2);
        let identify = &stats[0];
        assert_eq!(identify.route, "/identify-and-answer");
        assert_eq!(identify.count, 3);
        assert_eq!(identify.avg_latency, 200.0);
        assert_eq!(identify.p50, 200.0);
        assert_eq!(identify.p95, 290.0);
        assert_eq!(stats[1].avg_latency, 1.235);
    }

    #[test]
    fn test_window_since_ms_subtracts_days() {
        let now = DateTime::parse_from_rfc3339("2024-03-08T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let window = MetricsWindow { days: 7 };
        let expected = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(window.since_ms(now), expected);
    }

    #[test]
    fn test_window_since_ms_clamps_huge_windows() {
        let now = Utc::now();
        let floor = DateTime::<Utc>::MIN_UTC.timestamp_millis();

        assert_eq!(MetricsWindow { days: 200_000_000 }.since_ms(now), floor);
        assert_eq!(MetricsWindow { days: u32::MAX }.since_ms(now), floor);
    }

    #[test]
    fn test_window_defaults_to_a_week() {
        let window: MetricsWindow = serde_json::from_str("{}").unwrap();
        assert_eq!(window.days, 7);
    }
}
