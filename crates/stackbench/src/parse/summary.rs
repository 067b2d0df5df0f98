// Numan Thabit 2025
use serde_json::{Map, Value};

use crate::metrics::BenchmarkMetrics;

/// Finds the last stdout line that is a JSON object and lifts the known numeric
/// fields out of it. Returns `None` when no line parses.
///
/// Scanning from the end picks the summary a program prints after any chatter.
pub fn parse_summary(stdout: &str) -> Option<BenchmarkMetrics> {
    let record = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<Map<String, Value>>(line).ok())?;

    let mut metrics = BenchmarkMetrics::default();
    for (key, value) in &record {
        if key == "maxConcurrentClients" {
            metrics.max_concurrent_clients = value
                .as_u64()
                .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64));
            continue;
        }
        if let (Some(slot), Some(number)) = (float_slot(&mut metrics, key), value.as_f64()) {
            *slot = Some(number);
        }
    }
    Some(metrics)
}

fn float_slot<'a>(metrics: &'a mut BenchmarkMetrics, key: &str) -> Option<&'a mut Option<f64>> {
    let slot = match key {
        "operationsPerSecond" => &mut metrics.operations_per_second,
        "totalTimeMs" => &mut metrics.total_time_ms,
        "requestsPerSecond" => &mut metrics.requests_per_second,
        "latencyAvgMs" => &mut metrics.latency_avg_ms,
        "latencyP50Ms" => &mut metrics.latency_p50_ms,
        "latencyP75Ms" => &mut metrics.latency_p75_ms,
        "latencyP90Ms" => &mut metrics.latency_p90_ms,
        "latencyP95Ms" => &mut metrics.latency_p95_ms,
        "latencyP99Ms" => &mut metrics.latency_p99_ms,
        "coldStartTimeMs" => &mut metrics.cold_start_time_ms,
        "maxRequestsPerSecond" => &mut metrics.max_requests_per_second,
        "concurrencyThreshold" => &mut metrics.concurrency_threshold,
        "buildTimeMs" => &mut metrics.build_time_ms,
        _ => return None,
    };
    Some(slot)
}
