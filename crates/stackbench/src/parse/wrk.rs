// Numan Thabit 2025
use crate::metrics::BenchmarkMetrics;

const PERCENTILE_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Distribution,
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Percentile {
    P50,
    P75,
    P90,
    P95,
    P99,
}

impl Percentile {
    const ALL: [(f64, Percentile); 5] = [
        (50.0, Percentile::P50),
        (75.0, Percentile::P75),
        (90.0, Percentile::P90),
        (95.0, Percentile::P95),
        (99.0, Percentile::P99),
    ];

    fn nearest(value: f64) -> Option<Self> {
        Self::ALL
            .iter()
            .map(|(target, bucket)| ((value - target).abs(), *bucket))
            .filter(|(distance, _)| *distance <= PERCENTILE_TOLERANCE)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, bucket)| bucket)
    }

    fn slot(self, metrics: &mut BenchmarkMetrics) -> &mut Option<f64> {
        match self {
            Self::P50 => &mut metrics.latency_p50_ms,
            Self::P75 => &mut metrics.latency_p75_ms,
            Self::P90 => &mut metrics.latency_p90_ms,
            Self::P95 => &mut metrics.latency_p95_ms,
            Self::P99 => &mut metrics.latency_p99_ms,
        }
    }
}

/// Extracts throughput, average latency, and latency percentiles from a wrk
/// report. Lines that match nothing are skipped.
///
/// A line containing `Latency Distribution` enters the distribution section;
/// the first line without leading whitespace leaves it.
///
/// Distribution rows land in the 50, 75, 90, 95 or 99 bucket only when they
/// are within 0.5 of it. Anything else is dropped, so a `99.9%` row from an
/// HdrHistogram-style report never overwrites p99.
pub fn parse_load_report(output: &str) -> BenchmarkMetrics {
    let mut metrics = BenchmarkMetrics::default();
    let mut section = Section::Header;

    for line in output.lines() {
        let indented = line.starts_with(char::is_whitespace);
        let trimmed = line.trim();

        if section == Section::Distribution {
            if indented {
                if let Some((percentile, latency_ms)) = parse_distribution_line(trimmed) {
                    if let Some(bucket) = Percentile::nearest(percentile) {
                        *bucket.slot(&mut metrics) = Some(latency_ms);
                    }
                }
                continue;
            }
            section = Section::Trailer;
        }

        if trimmed.contains("Latency Distribution") {
            section = Section::Distribution;
            continue;
        }

        if let Some((_, rest)) = trimmed.split_once("Requests/sec:") {
            if let Some(rps) = rest
                .split_whitespace()
                .next()
                .and_then(|token| token.parse::<f64>().ok())
            {
                metrics.requests_per_second = Some(rps);
            }
            continue;
        }

        if metrics.latency_avg_ms.is_none() {
            metrics.latency_avg_ms = parse_latency_line(trimmed);
        }
    }

    metrics
}

/// `50%   31.00us` -> `(50.0, 0.031)`
fn parse_distribution_line(line: &str) -> Option<(f64, f64)> {
    let mut parts = line.split_whitespace();
    let percentile = parts.next()?.strip_suffix('%')?.parse::<f64>().ok()?;
    let latency_ms = parse_latency_ms(parts.next()?)?;
    Some((percentile, latency_ms))
}

/// `Latency   635.91us  ...` -> average latency in ms.
fn parse_latency_line(line: &str) -> Option<f64> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "Latency" {
        return None;
    }
    parse_latency_ms(parts.next()?)
}

fn parse_latency_ms(token: &str) -> Option<f64> {
    let (value, unit) = split_numeric_unit(token)?;
    let factor = match unit {
        "us" | "µs" | "μs" => 0.001,
        "ms" => 1.0,
        "s" => 1_000.0,
        _ => return None,
    };
    Some(value * factor)
}

fn split_numeric_unit(token: &str) -> Option<(f64, &str)> {
    let token = token.trim();
    let idx = token.find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))?;
    let (value, unit) = token.split_at(idx);
    if value.is_empty() {
        return None;
    }
    Some((value.parse::<f64>().ok()?, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Running 15s test @ http://127.0.0.1:3000/
  8 threads and 100 connections
  Thread Stats   Avg      Stdev     Max   +/- Stdev
    Latency   635.91us    1.20ms  38.31ms   94.12%
    Req/Sec    23.14k     2.01k   31.87k    71.25%
  Latency Distribution
     50%   31.00us
     75%  402.00us
     90%    1.13ms
     99%  708.00us
  2764125 requests in 15.10s, 421.77MB read
Requests/sec: 183052.64
Transfer/sec:     27.93MB
";

    fn close(actual: Option<f64>, expected: f64) -> bool {
        actual.is_some_and(|value| (value - expected).abs() < 1e-9)
    }

    #[test]
    fn parses_full_report() {
        let metrics = parse_load_report(REPORT);
        assert!(close(metrics.requests_per_second, 183_052.64));
        assert!(close(metrics.latency_avg_ms, 0.63591));
        assert!(close(metrics.latency_p50_ms, 0.031));
        assert!(close(metrics.latency_p75_ms, 0.402));
        assert!(close(metrics.latency_p90_ms, 1.13));
        assert!(close(metrics.latency_p99_ms, 0.708));
        assert_eq!(metrics.latency_p95_ms, None);
        assert_eq!(metrics.operations_per_second, None);
    }

    #[test]
    fn missing_distribution_leaves_percentiles_absent() {
        let output = "\
  Thread Stats   Avg      Stdev     Max   +/- Stdev
    Latency     2.50ms    1.00ms  10.00ms   75.00%
Requests/sec:   4000.00
";
        let metrics = parse_load_report(output);
        assert!(close(metrics.requests_per_second, 4000.0));
        assert!(close(metrics.latency_avg_ms, 2.5));
        assert_eq!(metrics.latency_p50_ms, None);
        assert_eq!(metrics.latency_p99_ms, None);
    }

    #[test]
    fn unindented_line_ends_distribution() {
        let output = "\
  Latency Distribution
     50%    1.00ms
Requests/sec: 10.0
     99%    9.00ms
";
        let metrics = parse_load_report(output);
        assert!(close(metrics.latency_p50_ms, 1.0));
        assert_eq!(metrics.latency_p99_ms, None);
        assert!(close(metrics.requests_per_second, 10.0));
    }

    #[test]
    fn unknown_percentiles_and_units_are_ignored() {
        let output = "\
  Latency Distribution
     50.000%    2.00ms
     66%        3.00ms
     99.000%    4.00ms
     99.900%    9.00ms
     75%        7.00min
";
        let metrics = parse_load_report(output);
        assert!(close(metrics.latency_p50_ms, 2.0));
        assert!(close(metrics.latency_p99_ms, 4.0));
        assert_eq!(metrics.latency_p75_ms, None);
    }

    #[test]
    fn seconds_are_converted_to_milliseconds() {
        assert!(close(parse_latency_ms("1.5s"), 1500.0));
        assert!(close(parse_latency_ms("2µs"), 0.002));
        assert_eq!(parse_latency_ms("ms"), None);
        assert_eq!(parse_latency_ms("12"), None);
    }

    #[test]
    fn only_first_latency_line_sets_average() {
        let output = "\
    Latency     3.00ms    1.00ms  10.00ms   75.00%
    Latency     9.00ms    1.00ms  10.00ms   75.00%
";
        assert!(close(parse_load_report(output).latency_avg_ms, 3.0));
    }

    #[test]
    fn empty_or_garbage_output_yields_defaults() {
        assert_eq!(parse_load_report(""), BenchmarkMetrics::default());
        assert_eq!(
            parse_load_report("unable to connect to 127.0.0.1:3000 Connection refused\n"),
            BenchmarkMetrics::default()
        );
    }
}
