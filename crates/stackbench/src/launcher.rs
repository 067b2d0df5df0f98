// Numan Thabit 2025
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::registry::{BenchmarkDescriptor, Registry, RegistryError};

/// Option name to value mapping passed to a benchmark as `--key=value` flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunParameters(BTreeMap<String, String>);

impl RunParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Union of `defaults` and `self`; values in `self` win.
    pub fn merged_over(&self, defaults: &RunParameters) -> RunParameters {
        let mut merged = defaults.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    /// Copy of `self` with `keys` removed.
    pub fn without(&self, keys: &[&str]) -> RunParameters {
        Self(
            self.0
                .iter()
                .filter(|(key, _)| !keys.contains(&key.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// `--key=value` flags in key order.
    pub fn to_flags(&self) -> Vec<String> {
        self.iter()
            .map(|(key, value)| format!("--{key}={value}"))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RunParameters {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

/// A fully resolved command line. Building one never starts a process.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Merged parameters, i.e. exactly what the flags in `args` encode.
    pub parameters: RunParameters,
}

impl Invocation {
    pub fn build(
        descriptor: &BenchmarkDescriptor,
        overrides: &RunParameters,
        project_root: &Path,
    ) -> Result<Self, RegistryError> {
        let (program, base_args) =
            descriptor
                .command
                .split_first()
                .ok_or_else(|| RegistryError::EmptyCommand {
                    technology: descriptor.technology.clone(),
                    benchmark: descriptor.benchmark.clone(),
                })?;

        let parameters = overrides.merged_over(&descriptor.default_params);
        let mut args = base_args.to_vec();
        args.extend(parameters.to_flags());

        Ok(Self {
            program: program.clone(),
            args,
            working_dir: project_root.to_path_buf(),
            parameters,
        })
    }

    /// Looks the benchmark up and builds its invocation in one step.
    pub fn resolve(
        registry: &Registry,
        technology: &str,
        benchmark: &str,
        overrides: &RunParameters,
        project_root: &Path,
    ) -> Result<(BenchmarkDescriptor, Self), RegistryError> {
        let descriptor = registry.descriptor(technology, benchmark)?;
        let invocation = Self::build(&descriptor, overrides, project_root)?;
        Ok((descriptor, invocation))
    }

    /// The child leads a new process group so it can be stopped together with
    /// anything it spawns.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.current_dir(&self.working_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
