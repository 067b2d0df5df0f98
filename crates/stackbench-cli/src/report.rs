// Numan Thabit 2025
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Serialize;
use stackbench::{BenchmarkResult, Registry};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
pub struct Report {
    pub metadata: Metadata,
    pub results: Vec<BenchmarkResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub report_generated_at: String,
    pub system_info: SystemInfo,
    pub tool_versions: ToolVersions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu: String,
    pub cores: usize,
    #[serde(rename = "totalMemoryMB")]
    pub total_memory_mb: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct ToolVersions {
    pub versions: BTreeMap<String, String>,
}

impl SystemInfo {
    pub fn gather() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        let cpu = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            os: System::long_os_version()
                .or_else(System::name)
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            arch: std::env::consts::ARCH.to_string(),
            cpu,
            cores: num_cpus::get(),
            total_memory_mb: system.total_memory() as f64 / 1024.0 / 1024.0,
        }
    }
}

impl ToolVersions {
    /// Runs each technology's version command. Technologies whose command
    /// fails or prints nothing are left out.
    pub async fn gather(registry: &Registry, project_root: &Path) -> Self {
        let mut versions = BTreeMap::new();
        for (id, entry) in registry.iter() {
            let Some((program, args)) = entry.version_command.split_first() else {
                continue;
            };
            match query_version(program, args, project_root).await {
                Some(version) => {
                    versions.insert(id.clone(), version);
                }
                None => debug!(tech = %id, "version command produced no version"),
            }
        }
        Self { versions }
    }
}

async fn query_version(program: &str, args: &[String], cwd: &Path) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    let output = match timeout(VERSION_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            debug!(program, status = %output.status, "version command failed");
            return None;
        }
        Ok(Err(err)) => {
            debug!(program, %err, "version command could not start");
            return None;
        }
        Err(_) => {
            debug!(program, "version command timed out");
            return None;
        }
    };
    first_line(&output.stdout).or_else(|| first_line(&output.stderr))
}

fn first_line(raw: &[u8]) -> Option<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

impl Report {
    pub fn new(
        results: Vec<BenchmarkResult>,
        system_info: SystemInfo,
        tool_versions: ToolVersions,
    ) -> Result<Self> {
        Self::at(OffsetDateTime::now_utc(), results, system_info, tool_versions)
    }

    fn at(
        generated: OffsetDateTime,
        results: Vec<BenchmarkResult>,
        system_info: SystemInfo,
        tool_versions: ToolVersions,
    ) -> Result<Self> {
        let report_generated_at = generated
            .format(&Rfc3339)
            .context("failed to format report timestamp")?;
        Ok(Self {
            metadata: Metadata {
                report_generated_at,
                system_info,
                tool_versions,
            },
            results,
        })
    }

    /// Writes `report_<timestamp>.json` into `dir`, creating it if needed.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        self.write_named(dir, OffsetDateTime::now_utc())
    }

    fn write_named(&self, dir: &Path, stamp: OffsetDateTime) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        let path = dir.join(report_file_name(stamp)?);
        let file = File::create(&path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("failed to encode report {}", path.display()))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!(
            path = %path.display(),
            results = self.results.len(),
            "report written"
        );
        Ok(path)
    }
}

fn report_file_name(stamp: OffsetDateTime) -> Result<String> {
    let format = format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]Z");
    let stamp = stamp
        .format(&format)
        .context("failed to format report file name")?;
    Ok(format!("report_{stamp}.json"))
}
