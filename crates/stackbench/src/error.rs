// Numan Thabit 2025
use std::{fmt, io};

use crate::{orchestrator::RunPhase, registry::RegistryError};

/// Output a child wrote before it exited or was terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedLogs {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedLogs {
    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }
}

impl fmt::Display for CapturedLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\nstdout:\n{}\nstderr:\n{}",
            self.stdout.trim(),
            self.stderr.trim()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Configuration(#[from] RegistryError),
    #[error("invalid value '{value}' for parameter '{key}': {reason}")]
    InvalidParameter {
        key: String,
        value: String,
        reason: String,
    },
    #[error("failed to start {program}: {source}")]
    ProcessStart {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("server process died during startup ({status}){logs}")]
    ProcessDiedDuringStartup { status: String, logs: CapturedLogs },
    #[error("health check against {url} failed after {attempts} attempts{logs}")]
    HealthCheckTimeout {
        url: String,
        attempts: u32,
        logs: CapturedLogs,
    },
    #[error("load tool failed: {reason}\noutput:\n{output}{logs}")]
    LoadTool {
        reason: String,
        output: String,
        logs: CapturedLogs,
    },
    #[error("process exited with {status}{logs}")]
    ProcessExit { status: String, logs: CapturedLogs },
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("process supervision failed: {0}")]
    Io(#[from] io::Error),
}

impl BenchError {
    /// Output captured from the benchmark process, when the failure happened after launch.
    pub fn logs(&self) -> Option<&CapturedLogs> {
        match self {
            Self::ProcessDiedDuringStartup { logs, .. }
            | Self::HealthCheckTimeout { logs, .. }
            | Self::LoadTool { logs, .. }
            | Self::ProcessExit { logs, .. } => Some(logs),
            _ => None,
        }
    }

    /// The run phase that was active when the failure occurred.
    pub fn phase(&self) -> RunPhase {
        match self {
            Self::Configuration(_) | Self::InvalidParameter { .. } | Self::HttpClient(_) => {
                RunPhase::Idle
            }
            Self::ProcessStart { .. } => RunPhase::Launching,
            Self::ProcessDiedDuringStartup { .. } | Self::HealthCheckTimeout { .. } => {
                RunPhase::ProbingHealth
            }
            Self::LoadTool { .. } => RunPhase::LoadTesting,
            Self::ProcessExit { .. } | Self::Io(_) => RunPhase::Collecting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_logs_render_both_streams() {
        let logs = CapturedLogs {
            stdout: "ready\n".into(),
            stderr: "bind failed\n".into(),
        };
        let err = BenchError::ProcessExit {
            status: "exit status: 2".into(),
            logs,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("exit status: 2"));
        assert!(rendered.contains("stdout:\nready"));
        assert!(rendered.contains("stderr:\nbind failed"));
        assert_eq!(err.phase(), RunPhase::Collecting);
    }

    #[test]
    fn configuration_errors_carry_no_logs() {
        let err = BenchError::from(RegistryError::UnknownTechnology("cobol".into()));
        assert!(err.logs().is_none());
        assert_eq!(err.phase(), RunPhase::Idle);
    }
}
