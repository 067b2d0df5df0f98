// Numan Thabit 2025
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 30;
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_LOAD_TOOL: &str = "wrk";
pub const DEFAULT_LOAD_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_LOAD_CONNECTIONS: u32 = 100;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    pub interval: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub attempts: u32,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub path: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_PROBE_ATTEMPTS,
            interval: DEFAULT_PROBE_INTERVAL,
            request_timeout: DEFAULT_PROBE_TIMEOUT,
            path: DEFAULT_HEALTH_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadSettings {
    pub tool: PathBuf,
    /// Arguments placed before the generated flags, e.g. `-s script.lua` or `--timeout 2s`.
    pub extra_args: Vec<String>,
    /// Load tool threads; `None` means one per CPU core.
    pub threads: Option<u32>,
    pub default_duration: Duration,
    pub default_connections: u32,
}

impl LoadSettings {
    pub fn threads(&self) -> u32 {
        self.threads
            .unwrap_or_else(|| num_cpus::get() as u32)
            .max(1)
    }
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            tool: PathBuf::from(DEFAULT_LOAD_TOOL),
            extra_args: Vec::new(),
            threads: None,
            default_duration: DEFAULT_LOAD_DURATION,
            default_connections: DEFAULT_LOAD_CONNECTIONS,
        }
    }
}

/// Tunables for one [`Orchestrator`](crate::Orchestrator). Constructed once and passed in.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Working directory for every benchmark process and the load tool.
    pub project_root: PathBuf,
    /// Host the server benchmarks listen on.
    pub host: String,
    pub sampler: SamplerSettings,
    pub probe: ProbeSettings,
    pub load: LoadSettings,
    /// How long a server gets to exit after SIGTERM before it is killed.
    pub shutdown_grace: Duration,
    /// Upper bound on waiting for stdout/stderr to reach end-of-stream after exit.
    pub drain_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            host: DEFAULT_HOST.to_string(),
            sampler: SamplerSettings::default(),
            probe: ProbeSettings::default(),
            load: LoadSettings::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl EngineSettings {
    pub fn health_url(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.host, port, self.probe.path)
    }

    pub fn load_target(&self, port: u16) -> String {
        format!("http://{}:{}/", self.host, port)
    }
}
