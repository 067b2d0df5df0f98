// Numan Thabit 2025
use std::{fmt, sync::Arc};

use reqwest::Client;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{BenchError, CapturedLogs},
    health::{HealthProber, HttpReadiness, ProbeFailure},
    launcher::{Invocation, RunParameters},
    load::{LoadDriver, LoadFailure, LoadOutput, LoadPlan, LOAD_PARAMS},
    metrics::{BenchmarkMetrics, BenchmarkResult},
    parse::{parse_load_report, parse_summary},
    registry::{BenchmarkDescriptor, ExecutionKind, Registry},
    settings::EngineSettings,
    supervisor::SupervisedProcess,
};

/// Where a run currently is. Server runs pass through `ProbingHealth` and
/// `LoadTesting`; regular runs go straight from `Launching` to `Collecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Launching,
    ProbingHealth,
    LoadTesting,
    Collecting,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Launching => "launching",
            Self::ProbingHealth => "probing-health",
            Self::LoadTesting => "load-testing",
            Self::Collecting => "collecting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Failure of the server stages, turned into a [`BenchError`] once logs are in.
enum ServerFailure {
    Probe { url: String, failure: ProbeFailure },
    Load(LoadFailure),
}

impl ServerFailure {
    fn into_error(self, logs: CapturedLogs) -> BenchError {
        match self {
            Self::Probe {
                failure: ProbeFailure::Exited(status),
                ..
            } => BenchError::ProcessDiedDuringStartup {
                status: status.to_string(),
                logs,
            },
            Self::Probe {
                url,
                failure: ProbeFailure::TimedOut { attempts },
            } => BenchError::HealthCheckTimeout {
                url,
                attempts,
                logs,
            },
            Self::Load(LoadFailure::Launch { tool, source }) => BenchError::LoadTool {
                reason: format!("failed to start {tool}: {source}"),
                output: String::new(),
                logs,
            },
            Self::Load(LoadFailure::Exit { status, output }) => BenchError::LoadTool {
                reason: format!("exited with {status}"),
                output,
                logs,
            },
        }
    }
}

/// Runs one benchmark at a time against an immutable registry.
///
/// Every process started by [`Orchestrator::run`] is terminated and reaped
/// before `run` returns, whatever the outcome.
pub struct Orchestrator {
    registry: Arc<Registry>,
    settings: EngineSettings,
    client: Client,
    phase: watch::Sender<RunPhase>,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, settings: EngineSettings) -> Result<Self, BenchError> {
        let client = Client::builder()
            .timeout(settings.probe.request_timeout)
            .build()?;
        let (phase, _) = watch::channel(RunPhase::Idle);
        Ok(Self {
            registry,
            settings,
            client,
            phase,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Observes phase transitions of the runs driven by this orchestrator.
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    #[instrument(name = "benchmark", skip_all, fields(tech = %technology, test = %benchmark))]
    pub async fn run(
        &self,
        technology: &str,
        benchmark: &str,
        overrides: &RunParameters,
    ) -> Result<BenchmarkResult, BenchError> {
        self.enter(RunPhase::Idle);
        let outcome = self.execute(technology, benchmark, overrides).await;
        match &outcome {
            Ok(_) => self.enter(RunPhase::Done),
            Err(err) => {
                warn!(phase = %err.phase(), "benchmark run failed");
                self.enter(RunPhase::Failed);
            }
        }
        outcome
    }

    async fn execute(
        &self,
        technology: &str,
        benchmark: &str,
        overrides: &RunParameters,
    ) -> Result<BenchmarkResult, BenchError> {
        let descriptor = self.registry.descriptor(technology, benchmark)?;
        match descriptor.kind {
            ExecutionKind::Regular => self.run_regular(descriptor, overrides).await,
            ExecutionKind::Server => self.run_server(descriptor, overrides).await,
        }
    }

    async fn run_regular(
        &self,
        descriptor: BenchmarkDescriptor,
        overrides: &RunParameters,
    ) -> Result<BenchmarkResult, BenchError> {
        let invocation = Invocation::build(&descriptor, overrides, &self.settings.project_root)?;

        self.enter(RunPhase::Launching);
        let mut process =
            SupervisedProcess::spawn(&invocation, self.settings.sampler.interval, descriptor.label())?;

        self.enter(RunPhase::Collecting);
        let waited = process.wait().await;
        if waited.is_err() {
            process.terminate(self.settings.shutdown_grace).await;
        }
        let (usage, logs) = process.finish(self.settings.drain_timeout).await;
        let status = waited?;

        if !status.success() {
            return Err(BenchError::ProcessExit {
                status: status.to_string(),
                logs,
            });
        }

        let metrics = parse_summary(&logs.stdout).unwrap_or_else(|| {
            warn!("no metrics record found in benchmark output; reporting empty metrics");
            BenchmarkMetrics::default()
        });
        info!(
            peak_memory_mb = usage.peak_memory_mb,
            mean_cpu_percent = usage.mean_cpu_percent,
            "benchmark completed"
        );

        Ok(BenchmarkResult {
            technology: descriptor.technology,
            benchmark: descriptor.benchmark,
            parameters: invocation.parameters,
            load: None,
            metrics: metrics.with_process(usage),
        })
    }

    async fn run_server(
        &self,
        mut descriptor: BenchmarkDescriptor,
        overrides: &RunParameters,
    ) -> Result<BenchmarkResult, BenchError> {
        let port = descriptor.port_or_default();
        let plan = LoadPlan::from_parameters(
            self.settings.load_target(port),
            &overrides.merged_over(&descriptor.default_params),
            &self.settings.load,
        )?;

        descriptor.default_params = descriptor.default_params.without(&LOAD_PARAMS);
        let invocation = Invocation::build(
            &descriptor,
            &overrides.without(&LOAD_PARAMS),
            &self.settings.project_root,
        )?;

        self.enter(RunPhase::Launching);
        let mut process =
            SupervisedProcess::spawn(&invocation, self.settings.sampler.interval, descriptor.label())?;

        let outcome = self.drive_server(&mut process, port, &plan).await;

        self.enter(RunPhase::Collecting);
        process.terminate(self.settings.shutdown_grace).await;
        let (usage, logs) = process.finish(self.settings.drain_timeout).await;

        let load = outcome.map_err(|failure| failure.into_error(logs))?;
        let metrics = parse_load_report(&load.output);
        if metrics.requests_per_second.is_none() {
            warn!("load tool report had no throughput line");
        }
        info!(
            requests_per_second = metrics.requests_per_second.unwrap_or_default(),
            peak_memory_mb = usage.peak_memory_mb,
            mean_cpu_percent = usage.mean_cpu_percent,
            "benchmark completed"
        );

        Ok(BenchmarkResult {
            technology: descriptor.technology,
            benchmark: descriptor.benchmark,
            parameters: invocation.parameters,
            load: Some(plan.profile()),
            metrics: metrics.with_process(usage),
        })
    }

    async fn drive_server(
        &self,
        process: &mut SupervisedProcess,
        port: u16,
        plan: &LoadPlan,
    ) -> Result<LoadOutput, ServerFailure> {
        self.enter(RunPhase::ProbingHealth);
        let check = HttpReadiness::new(
            self.client.clone(),
            self.settings.health_url(port),
            self.settings.probe.request_timeout,
        );
        HealthProber::new(&self.settings.probe)
            .wait_ready(&check, || process.try_exited())
            .await
            .map_err(|failure| ServerFailure::Probe {
                url: check.url().to_string(),
                failure,
            })?;

        self.enter(RunPhase::LoadTesting);
        LoadDriver::new(&self.settings.load, &self.settings.project_root)
            .run(plan)
            .await
            .map_err(ServerFailure::Load)
    }

    fn enter(&self, phase: RunPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "run phase changed");
        }
    }
}
