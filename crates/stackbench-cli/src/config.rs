// Numan Thabit 2025
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use humantime::format_duration;
use serde::Deserialize;
use stackbench::{
    settings::{
        LoadSettings, ProbeSettings, SamplerSettings, DEFAULT_HOST, DEFAULT_LOAD_CONNECTIONS,
        DEFAULT_LOAD_DURATION, DEFAULT_LOAD_TOOL, DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_INTERVAL,
        DEFAULT_SAMPLE_INTERVAL,
    },
    EngineSettings, RunParameters,
};
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "ops/stackbench.toml";
pub const DEFAULT_REGISTRY_PATH: &str = "config/technologies.toml";
const DEFAULT_OUTPUT_DIR: &str = "./reports";
const ROOT_SEARCH: [&str; 3] = [".", "..", "../.."];

#[derive(Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    /// Path to the technology registry (TOML).
    #[arg(long, value_name = "PATH", env = "STACKBENCH_REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Directory benchmarks run from; discovered from the registry location when omitted.
    #[arg(long, value_name = "DIR")]
    pub project_root: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH", env = "STACKBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Comma-separated technologies, or `all`.
    #[arg(long, short = 't', default_value = "all")]
    pub tech: String,

    /// Comma-separated tests, or `all`.
    #[arg(long, short = 'e', default_value = "all")]
    pub test: String,

    /// Directory the JSON report is written to.
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Load test duration for server benchmarks.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub rps_duration: Option<Duration>,

    /// Concurrent connections for server benchmarks.
    #[arg(long)]
    pub rps_connections: Option<u32>,

    /// Extra benchmark parameter applied to every run (repeatable).
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param_assignment)]
    pub params: Vec<(String, String)>,

    /// Load tool binary.
    #[arg(long, value_name = "PATH")]
    pub wrk_bin: Option<PathBuf>,

    /// Load tool threads (defaults to the CPU count).
    #[arg(long)]
    pub wrk_threads: Option<u32>,

    /// Health probe attempts before a server is declared unready.
    #[arg(long)]
    pub health_attempts: Option<u32>,

    /// Pause between health probe attempts.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub health_interval: Option<Duration>,

    /// Resource sampling period.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub sample_interval: Option<Duration>,

    /// Host server benchmarks listen on.
    #[arg(long)]
    pub host: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    registry: Option<PathBuf>,
    project_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    rps_duration_secs: Option<u64>,
    rps_connections: Option<u32>,
    wrk_bin: Option<PathBuf>,
    wrk_threads: Option<u32>,
    wrk_args: Option<Vec<String>>,
    health_attempts: Option<u32>,
    health_interval_ms: Option<u64>,
    sample_interval_ms: Option<u64>,
    host: Option<String>,
}

/// Everything one `stackbench run` needs, after layering CLI over file over defaults.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub config_path: Option<PathBuf>,
    pub registry_path: PathBuf,
    pub output_dir: PathBuf,
    pub technologies: Vec<String>,
    pub tests: Vec<String>,
    pub rps_duration: Duration,
    pub rps_connections: u32,
    pub params: RunParameters,
    pub engine: EngineSettings,
}

impl RunConfig {
    pub fn from_cli(cli: &RunArgs) -> Result<Self> {
        let file_cfg =
            load_file_config(cli.config.as_deref()).context("failed to load config file")?;
        let config = merge(cli, file_cfg)?;
        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.technologies.is_empty() {
            bail!("no technologies specified");
        }
        if self.tests.is_empty() {
            bail!("no tests specified");
        }
        if self.rps_duration.is_zero() {
            bail!("rps_duration must be greater than 0");
        }
        if self.rps_connections == 0 {
            bail!("rps_connections must be greater than 0");
        }
        if self.engine.probe.attempts == 0 {
            bail!("health_attempts must be greater than 0");
        }
        if self.engine.probe.interval.is_zero() {
            bail!("health_interval must be greater than 0");
        }
        if self.engine.sampler.interval.is_zero() {
            bail!("sample_interval must be greater than 0");
        }
        if self.engine.load.threads == Some(0) {
            bail!("wrk_threads must be greater than 0 when specified");
        }
        if self.engine.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        Ok(())
    }

    fn log_summary(&self) {
        info!(
            config = ?self.config_path,
            registry = %self.registry_path.display(),
            project_root = %self.engine.project_root.display(),
            output_dir = %self.output_dir.display(),
            technologies = ?self.technologies,
            tests = ?self.tests,
            rps_duration = %format_duration(self.rps_duration),
            rps_connections = self.rps_connections,
            wrk_bin = %self.engine.load.tool.display(),
            wrk_threads = self.engine.load.threads(),
            health_attempts = self.engine.probe.attempts,
            health_interval_ms = self.engine.probe.interval.as_millis() as u64,
            sample_interval_ms = self.engine.sampler.interval.as_millis() as u64,
            host = %self.engine.host,
            "stackbench configuration"
        );
    }
}

fn merge(cli: &RunArgs, file_cfg: Option<(PathBuf, FileConfig)>) -> Result<RunConfig> {
    let (cfg_path, file_cfg) = file_cfg.unzip();
    let file_cfg = file_cfg.unwrap_or_default();

    let (registry_path, project_root) = locate_registry(
        cli.registry.registry.clone().or(file_cfg.registry),
        cli.registry.project_root.clone().or(file_cfg.project_root),
    )?;

    let output_dir = pick(
        cli.output_dir.clone(),
        file_cfg.output_dir,
        PathBuf::from(DEFAULT_OUTPUT_DIR),
    );
    let rps_duration = pick(
        cli.rps_duration,
        file_cfg.rps_duration_secs.map(Duration::from_secs),
        DEFAULT_LOAD_DURATION,
    );
    let rps_connections = pick(
        cli.rps_connections,
        file_cfg.rps_connections,
        DEFAULT_LOAD_CONNECTIONS,
    );

    let engine = EngineSettings {
        project_root,
        host: pick(cli.host.clone(), file_cfg.host, DEFAULT_HOST.to_string()),
        sampler: SamplerSettings {
            interval: pick(
                cli.sample_interval,
                file_cfg.sample_interval_ms.map(Duration::from_millis),
                DEFAULT_SAMPLE_INTERVAL,
            ),
        },
        probe: ProbeSettings {
            attempts: pick(
                cli.health_attempts,
                file_cfg.health_attempts,
                DEFAULT_PROBE_ATTEMPTS,
            ),
            interval: pick(
                cli.health_interval,
                file_cfg.health_interval_ms.map(Duration::from_millis),
                DEFAULT_PROBE_INTERVAL,
            ),
            ..ProbeSettings::default()
        },
        load: LoadSettings {
            tool: pick(
                cli.wrk_bin.clone(),
                file_cfg.wrk_bin,
                PathBuf::from(DEFAULT_LOAD_TOOL),
            ),
            extra_args: file_cfg.wrk_args.unwrap_or_default(),
            threads: cli.wrk_threads.or(file_cfg.wrk_threads),
            default_duration: rps_duration,
            default_connections: rps_connections,
        },
        ..EngineSettings::default()
    };

    Ok(RunConfig {
        config_path: cfg_path,
        registry_path,
        output_dir,
        technologies: parse_list(&cli.tech),
        tests: parse_list(&cli.test),
        rps_duration,
        rps_connections,
        params: cli.params.iter().cloned().collect(),
        engine,
    })
}

fn pick<T>(cli: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(file).unwrap_or(default)
}

/// Resolves the registry file and project root.
///
/// An explicit registry path wins; otherwise the first of `.`, `..`, `../..`
/// (relative to the project root when given) holding `config/technologies.toml`.
pub fn locate_registry(
    registry: Option<PathBuf>,
    project_root: Option<PathBuf>,
) -> Result<(PathBuf, PathBuf)> {
    if let Some(registry) = registry {
        if !registry.exists() {
            bail!("registry file {} does not exist", registry.display());
        }
        let root = match project_root {
            Some(root) => root,
            None => infer_root(&registry),
        };
        return Ok((registry, root));
    }

    if let Some(root) = project_root {
        let registry = root.join(DEFAULT_REGISTRY_PATH);
        if !registry.exists() {
            bail!("no {} under project root {}", DEFAULT_REGISTRY_PATH, root.display());
        }
        return Ok((registry, root));
    }

    ROOT_SEARCH
        .iter()
        .map(PathBuf::from)
        .find(|root| root.join(DEFAULT_REGISTRY_PATH).exists())
        .map(|root| (root.join(DEFAULT_REGISTRY_PATH), root))
        .ok_or_else(|| {
            anyhow!(
                "could not find {} in the current directory or its parents; pass --registry",
                DEFAULT_REGISTRY_PATH
            )
        })
}

/// `<root>/config/technologies.toml` -> `<root>`; anything else -> the file's directory.
fn infer_root(registry: &Path) -> PathBuf {
    let dir = registry.parent().unwrap_or_else(|| Path::new("."));
    let root = if dir.file_name().is_some_and(|name| name == "config") {
        dir.parent().unwrap_or(dir)
    } else {
        dir
    };
    if root.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        root.to_path_buf()
    }
}

pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_param_assignment(assignment: &str) -> Result<(String, String)> {
    let mut parts = assignment.splitn(2, '=');
    let key = parts
        .next()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow!("invalid --param '{}': missing key", assignment))?;
    let value = parts
        .next()
        .ok_or_else(|| anyhow!("invalid --param '{}': missing '='", assignment))?;
    Ok((key.to_string(), value.to_string()))
}

fn load_file_config(path: Option<&Path>) -> Result<Option<(PathBuf, FileConfig)>> {
    if let Some(path) = path {
        return read_config(path).map(|cfg| Some((path.to_path_buf(), cfg)));
    }

    let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        return read_config(&default_path).map(|cfg| Some((default_path, cfg)));
    }

    Ok(None)
}

fn read_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        bail!("config file {} does not exist", path.display());
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: FileConfig = toml::from_str(&data)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("config")).expect("config dir");
        fs::write(dir.path().join(DEFAULT_REGISTRY_PATH), "").expect("registry");
        dir
    }

    fn args(dir: &tempfile::TempDir) -> RunArgs {
        RunArgs {
            registry: RegistryArgs {
                registry: None,
                project_root: Some(dir.path().to_path_buf()),
            },
            tech: "go, node".into(),
            test: "all".into(),
            ..RunArgs::default()
        }
    }

    #[test]
    fn parse_param_assignment_split() {
        let (key, value) = parse_param_assignment("iterations=5000").expect("valid assignment");
        assert_eq!(key, "iterations");
        assert_eq!(value, "5000");
        let (_, value) = parse_param_assignment("query=a=b").expect("value keeps '='");
        assert_eq!(value, "a=b");
    }

    #[test]
    fn parse_param_assignment_rejects_missing_value() {
        let err = parse_param_assignment("BROKEN").expect_err("missing '=' should fail");
        assert!(err.to_string().contains("missing '='"));
        assert!(parse_param_assignment("=1").is_err());
    }

    #[test]
    fn cli_overrides_file_which_overrides_defaults() {
        let dir = suite();
        let file = FileConfig {
            rps_duration_secs: Some(30),
            rps_connections: Some(64),
            health_attempts: Some(10),
            wrk_args: Some(vec!["--timeout".into(), "2s".into()]),
            ..FileConfig::default()
        };
        let mut cli = args(&dir);
        cli.rps_connections = Some(8);
        cli.params = vec![("size".into(), "64".into())];

        let config = merge(&cli, Some((PathBuf::from("ops/x.toml"), file))).expect("merge");
        assert_eq!(config.rps_duration, Duration::from_secs(30));
        assert_eq!(config.rps_connections, 8);
        assert_eq!(config.engine.load.default_connections, 8);
        assert_eq!(config.engine.probe.attempts, 10);
        assert_eq!(config.engine.probe.interval, DEFAULT_PROBE_INTERVAL);
        assert_eq!(config.engine.load.extra_args, vec!["--timeout", "2s"]);
        assert_eq!(config.technologies, vec!["go", "node"]);
        assert_eq!(config.tests, vec!["all"]);
        assert_eq!(config.params.get("size"), Some("64"));
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.engine.project_root, dir.path());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let dir = suite();
        let mut cli = args(&dir);
        cli.health_attempts = Some(0);
        let config = merge(&cli, None).expect("merge");
        assert!(config.validate().is_err());

        let mut cli = args(&dir);
        cli.tech = " , ".into();
        let config = merge(&cli, None).expect("merge");
        assert!(config.validate().unwrap_err().to_string().contains("technologies"));
    }

    #[test]
    fn registry_path_implies_project_root() {
        let dir = suite();
        let registry = dir.path().join(DEFAULT_REGISTRY_PATH);
        let (path, root) = locate_registry(Some(registry.clone()), None).expect("locate");
        assert_eq!(path, registry);
        assert_eq!(root, dir.path());
    }

    #[test]
    fn missing_registry_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = locate_registry(None, Some(dir.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains(DEFAULT_REGISTRY_PATH));
    }

    #[test]
    fn file_config_rejects_unknown_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stackbench.toml");
        fs::write(&path, "rps_connections = 50\nbogus = true\n").expect("write");
        assert!(read_config(&path).is_err());

        fs::write(&path, "rps_connections = 50\nhealth_interval_ms = 250\n").expect("write");
        let cfg = read_config(&path).expect("parse");
        assert_eq!(cfg.rps_connections, Some(50));
        assert_eq!(cfg.health_interval_ms, Some(250));
    }
}
