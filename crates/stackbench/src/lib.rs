// Numan Thabit 2025
#![forbid(unsafe_code)]
//! stackbench: launches benchmark executables and servers, samples their resource
//! usage, drives a load generator against server benchmarks, and merges every
//! signal into one [`BenchmarkResult`] per run.

/// Error taxonomy shared by every stage of a run.
pub mod error;
/// Readiness probing for server benchmarks.
pub mod health;
/// Invocation construction from registry descriptors.
pub mod launcher;
/// External load tool driver.
pub mod load;
/// Result and measurement records.
pub mod metrics;
/// Per-run sequencing of launch, probe, load, and collection.
pub mod orchestrator;
/// Parsers for benchmark summaries and load tool reports.
pub mod parse;
/// Immutable technology/benchmark registry.
pub mod registry;
/// Periodic memory and CPU sampling of a child process.
pub mod sampler;
/// Engine tunables.
pub mod settings;
/// Concurrent draining of child stdout/stderr.
pub mod streams;
/// Ownership and cleanup of one running child process.
pub mod supervisor;

pub use error::{BenchError, CapturedLogs};
pub use launcher::{Invocation, RunParameters};
pub use metrics::{BenchmarkMetrics, BenchmarkResult, LoadProfile, ProcessMetrics};
pub use orchestrator::{Orchestrator, RunPhase};
pub use registry::{BenchmarkDescriptor, ExecutionKind, Registry, RegistryError};
pub use settings::EngineSettings;
