// Numan Thabit 2025
use std::{collections::BTreeMap, fmt, fs, io, path::Path};

use serde::Deserialize;

use crate::launcher::RunParameters;

/// Port assumed for server benchmarks that do not declare one.
pub const DEFAULT_SERVER_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("technology '{0}' not found in configuration")]
    UnknownTechnology(String),
    #[error("benchmark '{benchmark}' not found for technology '{technology}'")]
    UnknownBenchmark {
        technology: String,
        benchmark: String,
    },
    #[error("benchmark '{benchmark}' for technology '{technology}' has an empty command")]
    EmptyCommand {
        technology: String,
        benchmark: String,
    },
    #[error("failed to read registry file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse registry file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl RegistryError {
    /// Whether this is a lookup miss rather than a malformed registry.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownTechnology(_) | Self::UnknownBenchmark { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    /// Runs to completion and reports its own metrics on stdout.
    Regular,
    /// Long-lived listener measured externally with the load tool.
    Server,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => f.write_str("regular"),
            Self::Server => f.write_str("server"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TechnologyEntry {
    pub name: String,
    #[serde(default)]
    pub version_command: Vec<String>,
    #[serde(default)]
    pub benchmarks: BTreeMap<String, BenchmarkEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkEntry {
    pub command: Vec<String>,
    #[serde(rename = "type")]
    pub kind: ExecutionKind,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub default_params: RunParameters,
}

/// Everything needed to launch one benchmark, resolved from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkDescriptor {
    pub technology: String,
    pub benchmark: String,
    pub command: Vec<String>,
    pub kind: ExecutionKind,
    pub port: Option<u16>,
    pub default_params: RunParameters,
}

impl BenchmarkDescriptor {
    pub fn label(&self) -> String {
        format!("{}/{}", self.technology, self.benchmark)
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SERVER_PORT)
    }
}

/// Static technology/benchmark registry. Loaded once and shared read-only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registry {
    #[serde(default)]
    technologies: BTreeMap<String, TechnologyEntry>,
}

impl Registry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, RegistryError> {
        toml::from_str(raw).map_err(|source| RegistryError::Parse {
            path: "<inline>".into(),
            source,
        })
    }

    pub fn technology(&self, technology: &str) -> Result<&TechnologyEntry, RegistryError> {
        self.technologies
            .get(technology)
            .ok_or_else(|| RegistryError::UnknownTechnology(technology.to_string()))
    }

    pub fn descriptor(
        &self,
        technology: &str,
        benchmark: &str,
    ) -> Result<BenchmarkDescriptor, RegistryError> {
        let entry = self
            .technology(technology)?
            .benchmarks
            .get(benchmark)
            .ok_or_else(|| RegistryError::UnknownBenchmark {
                technology: technology.to_string(),
                benchmark: benchmark.to_string(),
            })?;

        if entry.command.is_empty() {
            return Err(RegistryError::EmptyCommand {
                technology: technology.to_string(),
                benchmark: benchmark.to_string(),
            });
        }

        Ok(BenchmarkDescriptor {
            technology: technology.to_string(),
            benchmark: benchmark.to_string(),
            command: entry.command.clone(),
            kind: entry.kind,
            port: entry.port,
            default_params: entry.default_params.clone(),
        })
    }

    /// Technology ids in sorted order.
    pub fn technologies(&self) -> Vec<String> {
        self.technologies.keys().cloned().collect()
    }

    pub fn benchmarks(&self, technology: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .technology(technology)?
            .benchmarks
            .keys()
            .cloned()
            .collect())
    }

    pub fn has_technology(&self, technology: &str) -> bool {
        self.technologies.contains_key(technology)
    }

    pub fn contains(&self, technology: &str, benchmark: &str) -> bool {
        self.technologies
            .get(technology)
            .is_some_and(|tech| tech.benchmarks.contains_key(benchmark))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TechnologyEntry)> {
        self.technologies.iter()
    }
}
