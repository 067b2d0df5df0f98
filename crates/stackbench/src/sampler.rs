// Numan Thabit 2025
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::metrics::ProcessMetrics;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// One point-in-time reading for a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
}

/// Source of samples for one process. `None` means the tick is skipped.
pub trait ResourceProbe: Send + 'static {
    fn sample(&mut self) -> Option<ResourceSample>;
}

/// Reads RSS and CPU usage of a process through `sysinfo`.
///
/// CPU usage is a delta between two refreshes, so the probe refreshes once on
/// construction. On Linux `sysinfo` only computes per-process CPU when the
/// whole process table is refreshed.
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
}

impl SysinfoProbe {
    pub fn new(pid: u32) -> Self {
        let mut probe = Self {
            system: System::new(),
            pid: Pid::from_u32(pid),
        };
        probe.refresh();
        probe
    }

    fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> Option<ResourceSample> {
        self.refresh();
        let process = self.system.process(self.pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }
        Some(ResourceSample {
            memory_bytes: process.memory(),
            cpu_percent: f64::from(process.cpu_usage()),
        })
    }
}

/// Running reduction: max memory plus CPU sum and count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceStats {
    peak_memory_bytes: u64,
    cpu_sum: f64,
    samples: u32,
}

impl ResourceStats {
    pub fn record(&mut self, sample: ResourceSample) {
        self.peak_memory_bytes = self.peak_memory_bytes.max(sample.memory_bytes);
        self.cpu_sum += sample.cpu_percent;
        self.samples += 1;
    }

    pub fn finish(&self) -> ProcessMetrics {
        let mean_cpu_percent = if self.samples > 0 {
            self.cpu_sum / f64::from(self.samples)
        } else {
            0.0
        };
        ProcessMetrics {
            peak_memory_mb: self.peak_memory_bytes as f64 / BYTES_PER_MB,
            mean_cpu_percent,
            samples: self.samples,
        }
    }
}

/// A running sampler task. Dropping the handle cancels the task.
pub struct SamplerHandle {
    guard: DropGuard,
    task: JoinHandle<ProcessMetrics>,
}

impl SamplerHandle {
    pub fn spawn<P: ResourceProbe>(probe: P, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sampler(probe, every.max(MIN_INTERVAL), cancel.clone()));
        Self {
            guard: cancel.drop_guard(),
            task,
        }
    }

    /// Cancels sampling and returns the reduction. Cancellation is always sent
    /// before the result is awaited.
    pub async fn stop(self) -> ProcessMetrics {
        let cancel = self.guard.disarm();
        cancel.cancel();
        match self.task.await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(%err, "resource sampler task failed; reporting empty usage");
                ProcessMetrics::default()
            }
        }
    }
}

async fn run_sampler<P: ResourceProbe>(
    mut probe: P,
    every: Duration,
    cancel: CancellationToken,
) -> ProcessMetrics {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = ResourceStats::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(sample) = probe.sample() {
                    stats.record(sample);
                }
            }
        }
    }

    let metrics = stats.finish();
    debug!(
        samples = metrics.samples,
        peak_memory_mb = metrics.peak_memory_mb,
        mean_cpu_percent = metrics.mean_cpu_percent,
        "resource sampler stopped"
    );
    metrics
}
