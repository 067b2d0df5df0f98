// Numan Thabit 2025
use serde::{Deserialize, Serialize};

use crate::launcher::RunParameters;

/// Reduction of every resource sample taken during one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessMetrics {
    pub peak_memory_mb: f64,
    pub mean_cpu_percent: f64,
    pub samples: u32,
}

/// Normalized measurements for one run.
///
/// Regular and server benchmarks populate disjoint subsets, so every field is
/// optional and absent fields are omitted from the serialized record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_avg_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_p50_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_p75_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_p90_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_p95_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_p99_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold_start_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_clients: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time_ms: Option<f64>,
    #[serde(rename = "maxMemoryMB", skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_cpu_percent: Option<f64>,
}

impl BenchmarkMetrics {
    /// Folds the sampler's reduction into the parsed measurements.
    pub fn with_process(mut self, usage: ProcessMetrics) -> Self {
        self.max_memory_mb = Some(usage.peak_memory_mb);
        self.avg_cpu_percent = Some(usage.mean_cpu_percent);
        self
    }
}

/// One completed benchmark invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    #[serde(rename = "tech")]
    pub technology: String,
    #[serde(rename = "test")]
    pub benchmark: String,
    /// Exactly the parameters passed to the process (defaults merged with overrides).
    pub parameters: RunParameters,
    /// Load tool settings, present for server benchmarks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadProfile>,
    pub metrics: BenchmarkMetrics,
}

/// The load applied to a server benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProfile {
    pub duration_secs: u64,
    pub threads: u32,
    pub connections: u32,
}
