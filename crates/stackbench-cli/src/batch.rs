// Numan Thabit 2025
use anyhow::{bail, Result};
use humantime::format_duration;
use stackbench::{
    load::{CONNECTIONS_PARAM, DURATION_PARAM},
    BenchmarkResult, ExecutionKind, Orchestrator, Registry, RunParameters,
};
use tracing::{error, info, warn};

use crate::config::RunConfig;

const ALL: &str = "all";

/// One (technology, test) pair to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub technology: String,
    pub test: String,
    pub kind: ExecutionKind,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<BenchmarkResult>,
    pub failed: Vec<(Job, String)>,
}

/// Expands `all`, checks technologies exist, removes duplicates, and drops
/// combinations the registry does not define.
pub fn plan_jobs(
    registry: &Registry,
    technologies: &[String],
    tests: &[String],
) -> Result<Vec<Job>> {
    let technologies = if technologies.iter().any(|tech| tech == ALL) {
        registry.technologies()
    } else {
        for tech in technologies {
            if !registry.has_technology(tech) {
                bail!(
                    "invalid technology: {tech} (known: {})",
                    registry.technologies().join(", ")
                );
            }
        }
        technologies.to_vec()
    };

    let tests = if tests.iter().any(|test| test == ALL) {
        registry
            .iter()
            .flat_map(|(_, entry)| entry.benchmarks.keys().cloned())
            .collect()
    } else {
        tests.to_vec()
    };

    let technologies = dedup(technologies);
    let tests = dedup(tests);

    let mut jobs = Vec::new();
    for technology in &technologies {
        for test in &tests {
            match registry.descriptor(technology, test) {
                Ok(descriptor) => jobs.push(Job {
                    technology: technology.clone(),
                    test: test.clone(),
                    kind: descriptor.kind,
                }),
                Err(err) if err.is_not_found() => {
                    info!(tech = %technology, test = %test, "skipping unsupported combination")
                }
                Err(err) => {
                    warn!(tech = %technology, test = %test, %err, "skipping misconfigured benchmark")
                }
            }
        }
    }
    Ok(jobs)
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Parameters for one job: `--param` values, plus load settings for servers.
pub fn job_parameters(job: &Job, config: &RunConfig) -> RunParameters {
    match job.kind {
        ExecutionKind::Regular => config.params.clone(),
        ExecutionKind::Server => {
            let load = RunParameters::from_pairs([
                (DURATION_PARAM, format_duration(config.rps_duration).to_string()),
                (CONNECTIONS_PARAM, config.rps_connections.to_string()),
            ]);
            config.params.merged_over(&load)
        }
    }
}

/// Runs every job in order. A failed job is logged and the batch moves on.
pub async fn run_jobs(
    orchestrator: &Orchestrator,
    jobs: &[Job],
    config: &RunConfig,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for (index, job) in jobs.iter().enumerate() {
        info!(
            tech = %job.technology,
            test = %job.test,
            kind = %job.kind,
            job = index + 1,
            total = jobs.len(),
            "running benchmark"
        );
        let params = job_parameters(job, config);
        match orchestrator.run(&job.technology, &job.test, &params).await {
            Ok(result) => outcome.results.push(result),
            Err(err) => {
                error!(tech = %job.technology, test = %job.test, "benchmark failed: {err}");
                outcome.failed.push((job.clone(), err.to_string()));
            }
        }
    }
    info!(
        succeeded = outcome.results.len(),
        failed = outcome.failed.len(),
        "batch finished"
    );
    outcome
}
