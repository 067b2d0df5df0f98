// Numan Thabit 2025
use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use humantime::format_duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{
    error::BenchError, launcher::RunParameters, metrics::LoadProfile, settings::LoadSettings,
};

pub const DURATION_PARAM: &str = "duration";
pub const CONNECTIONS_PARAM: &str = "connections";
/// Parameters consumed by the load tool rather than passed to the server.
pub const LOAD_PARAMS: [&str; 2] = [DURATION_PARAM, CONNECTIONS_PARAM];

/// Connections were raised to match the thread count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAdjustment {
    pub requested: u32,
    pub applied: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub target: String,
    pub duration: Duration,
    pub threads: u32,
    pub connections: u32,
    pub adjustment: Option<ConnectionAdjustment>,
}

impl LoadPlan {
    /// The load tool needs at least one connection per thread; fewer are raised
    /// to the thread count and the change is recorded in `adjustment`.
    pub fn new(target: impl Into<String>, duration: Duration, connections: u32, threads: u32) -> Self {
        let threads = threads.max(1);
        let adjustment = (connections < threads).then_some(ConnectionAdjustment {
            requested: connections,
            applied: threads,
        });
        if let Some(adj) = adjustment {
            info!(
                requested = adj.requested,
                applied = adj.applied,
                threads,
                "connections below thread count; raising connections to match"
            );
        }
        Self {
            target: target.into(),
            duration,
            threads,
            connections: connections.max(threads),
            adjustment,
        }
    }

    /// Reads `duration` and `connections` from the run parameters, falling back to defaults.
    pub fn from_parameters(
        target: impl Into<String>,
        parameters: &RunParameters,
        settings: &LoadSettings,
    ) -> Result<Self, BenchError> {
        let duration = match parameters.get(DURATION_PARAM) {
            Some(raw) => parse_duration_param(raw)?,
            None => settings.default_duration,
        };
        let connections = match parameters.get(CONNECTIONS_PARAM) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|err| BenchError::InvalidParameter {
                key: CONNECTIONS_PARAM.into(),
                value: raw.into(),
                reason: err.to_string(),
            })?,
            None => settings.default_connections,
        };
        Ok(Self::new(target, duration, connections, settings.threads()))
    }

    pub fn profile(&self) -> LoadProfile {
        LoadProfile {
            duration_secs: self.duration_secs(),
            threads: self.threads,
            connections: self.connections,
        }
    }

    /// wrk takes whole seconds; partial seconds round up.
    fn duration_secs(&self) -> u64 {
        let whole = self.duration.as_secs();
        let secs = if self.duration.subsec_nanos() > 0 {
            whole + 1
        } else {
            whole
        };
        secs.max(1)
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "-t".into(),
            self.threads.to_string(),
            "-c".into(),
            self.connections.to_string(),
            "-d".into(),
            format!("{}s", self.duration_secs()),
            "--latency".into(),
            self.target.clone(),
        ]
    }
}

fn parse_duration_param(raw: &str) -> Result<Duration, BenchError> {
    let invalid = |reason: String| BenchError::InvalidParameter {
        key: DURATION_PARAM.into(),
        value: raw.into(),
        reason,
    };
    let duration = humantime::parse_duration(raw.trim()).map_err(|err| invalid(err.to_string()))?;
    if duration.is_zero() {
        return Err(invalid("duration must be greater than zero".into()));
    }
    Ok(duration)
}

#[derive(Debug, Clone)]
pub struct LoadOutput {
    /// stdout followed by stderr.
    pub output: String,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum LoadFailure {
    Launch { tool: String, source: io::Error },
    Exit { status: ExitStatus, output: String },
}

/// Runs the external load tool to completion. There is no internal deadline;
/// the tool's own duration bounds the run.
#[derive(Debug, Clone)]
pub struct LoadDriver {
    tool: PathBuf,
    extra_args: Vec<String>,
    working_dir: PathBuf,
}

impl LoadDriver {
    pub fn new(settings: &LoadSettings, working_dir: &Path) -> Self {
        Self {
            tool: settings.tool.clone(),
            extra_args: settings.extra_args.clone(),
            working_dir: working_dir.to_path_buf(),
        }
    }

    pub async fn run(&self, plan: &LoadPlan) -> Result<LoadOutput, LoadFailure> {
        info!(
            bin = %self.tool.display(),
            threads = plan.threads,
            connections = plan.connections,
            duration = %format_duration(plan.duration),
            target = %plan.target,
            "starting load test"
        );

        let started = Instant::now();
        let mut cmd = Command::new(&self.tool);
        cmd.kill_on_drop(true);
        cmd.current_dir(&self.working_dir);
        cmd.stdin(Stdio::null());
        cmd.args(&self.extra_args);
        cmd.args(plan.args());

        let output = cmd.output().await.map_err(|source| LoadFailure::Launch {
            tool: self.tool.display().to_string(),
            source,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            warn!(status = %output.status, "load tool exited unsuccessfully");
            return Err(LoadFailure::Exit {
                status: output.status,
                output: combined,
            });
        }

        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "load test completed");
        Ok(LoadOutput {
            output: combined,
            elapsed,
        })
    }
}
