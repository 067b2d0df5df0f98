// Numan Thabit 2025
use std::{io, process::ExitStatus, time::Duration};

use humantime::format_duration;
use tokio::{process::Child, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    error::{BenchError, CapturedLogs},
    launcher::Invocation,
    metrics::ProcessMetrics,
    sampler::{SamplerHandle, SysinfoProbe},
    streams::{StreamCollector, StreamKind},
};

/// A launched benchmark process together with the tasks observing it.
///
/// Collectors and the sampler are wired before `spawn` returns, so no early
/// output or startup cost is lost. The process leads its own process group;
/// dropping the value kills the whole group.
pub struct SupervisedProcess {
    child: Child,
    pid: u32,
    group: ProcessGroup,
    label: String,
    exit: Option<ExitStatus>,
    stdout: StreamCollector,
    stderr: StreamCollector,
    sampler: SamplerHandle,
}

impl SupervisedProcess {
    pub fn spawn(
        invocation: &Invocation,
        sample_every: Duration,
        label: impl Into<String>,
    ) -> Result<Self, BenchError> {
        let label = label.into();
        let start_error = |source: io::Error| BenchError::ProcessStart {
            program: invocation.program.clone(),
            source,
        };

        let mut child = invocation.command().spawn().map_err(start_error)?;
        let pid = child
            .id()
            .ok_or_else(|| start_error(io::Error::other("process exited before its pid was read")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| start_error(io::Error::other("stdout was not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| start_error(io::Error::other("stderr was not piped")))?;

        info!(%label, pid, command = %invocation.display(), "process launched");

        Ok(Self {
            stdout: StreamCollector::spawn(stdout, StreamKind::Stdout, label.clone()),
            stderr: StreamCollector::spawn(stderr, StreamKind::Stderr, label.clone()),
            sampler: SamplerHandle::spawn(SysinfoProbe::new(pid), sample_every),
            child,
            pid,
            group: ProcessGroup { leader: pid },
            label,
            exit: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Non-blocking liveness check. Reaps the child if it has exited.
    pub fn try_exited(&mut self) -> Option<ExitStatus> {
        if self.exit.is_some() {
            return self.exit;
        }
        match self.child.try_wait() {
            Ok(status) => {
                self.exit = status;
                status
            }
            Err(err) => {
                warn!(label = %self.label, %err, "failed to poll process status");
                None
            }
        }
    }

    /// Blocks until the process exits on its own.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.exit = Some(status);
        debug!(label = %self.label, %status, "process exited");
        Ok(status)
    }

    /// Asks the process group to stop, escalating to a kill after `grace`, and
    /// reaps the leader. Group members still running after that are killed.
    /// Never fails; problems are logged and the last known status is returned.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_exited() {
            self.group.signal(GroupSignal::Kill, &self.label);
            return Some(status);
        }

        self.group.signal(GroupSignal::Terminate, &self.label);

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(label = %self.label, %status, "process exited");
                self.exit = Some(status);
                self.group.signal(GroupSignal::Kill, &self.label);
                return self.exit;
            }
            Ok(Err(err)) => {
                warn!(label = %self.label, %err, "failed to await process exit");
            }
            Err(_) => {
                warn!(
                    label = %self.label,
                    timeout = %format_duration(grace),
                    "process did not exit in time; forcing kill"
                );
            }
        }

        self.group.signal(GroupSignal::Kill, &self.label);
        if let Err(err) = self.child.start_kill() {
            debug!(label = %self.label, %err, "start_kill failed");
        }
        match self.child.wait().await {
            Ok(status) => {
                info!(label = %self.label, %status, "process killed");
                self.exit = Some(status);
            }
            Err(err) => warn!(label = %self.label, %err, "failed to reap killed process"),
        }
        self.exit
    }

    /// Kills whatever is left of the process group, stops the sampler, then
    /// joins both collectors with `drain` as their bound.
    pub async fn finish(self, drain: Duration) -> (ProcessMetrics, CapturedLogs) {
        let Self {
            child,
            group,
            label,
            stdout,
            stderr,
            sampler,
            ..
        } = self;

        // Stragglers would hold the output pipes open until the drain bound.
        drop(group);
        let usage = sampler.stop().await;
        let (stdout, stderr) = tokio::join!(stdout.finish(drain), stderr.finish(drain));
        drop(child);

        debug!(
            %label,
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            samples = usage.samples,
            "process output collected"
        );
        (usage, CapturedLogs { stdout, stderr })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// The process group led by a benchmark. Wrappers such as `go run` do not
/// forward signals, so stop and kill requests go to the whole group.
struct ProcessGroup {
    leader: u32,
}

impl ProcessGroup {
    #[cfg(unix)]
    fn signal(&self, signal: GroupSignal, label: &str) {
        use nix::{
            errno::Errno,
            sys::signal::{killpg, Signal},
            unistd::Pid,
        };

        let Ok(raw) = i32::try_from(self.leader) else {
            return;
        };
        let signal = match signal {
            GroupSignal::Terminate => Signal::SIGTERM,
            GroupSignal::Kill => Signal::SIGKILL,
        };
        match killpg(Pid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                debug!(%label, pgid = self.leader, signal = signal.as_str(), %err, "process group signal failed")
            }
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: GroupSignal, _label: &str) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.signal(GroupSignal::Kill, "dropped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::launcher::RunParameters;

    fn shell(script: &str) -> Invocation {
        Invocation {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: PathBuf::from("."),
            parameters: RunParameters::new(),
        }
    }

    #[tokio::test]
    async fn captures_both_streams_after_exit() {
        let mut process = SupervisedProcess::spawn(
            &shell("echo out; echo err >&2; exit 3"),
            Duration::from_millis(10),
            "test/streams",
        )
        .expect("spawn");
        let status = process.wait().await.expect("wait");
        assert_eq!(status.code(), Some(3));
        assert_eq!(process.try_exited().and_then(|s| s.code()), Some(3));

        let (_, logs) = process.finish(Duration::from_secs(1)).await;
        assert_eq!(logs.stdout, "out\n");
        assert_eq!(logs.stderr, "err\n");
    }

    #[tokio::test]
    async fn terminate_stops_a_long_running_process() {
        let mut process =
            SupervisedProcess::spawn(&shell("exec sleep 30"), Duration::from_millis(10), "test/sleep")
                .expect("spawn");
        assert!(process.try_exited().is_none());

        let status = process.terminate(Duration::from_secs(2)).await.expect("reaped");
        assert!(!status.success());
        assert!(process.try_exited().is_some());
        process.finish(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn terminate_escalates_when_sigterm_is_ignored() {
        let mut process = SupervisedProcess::spawn(
            &shell("trap '' TERM; echo armed; while true; do sleep 0.05; done"),
            Duration::from_millis(10),
            "test/stubborn",
        )
        .expect("spawn");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = process.terminate(Duration::from_millis(300)).await.expect("reaped");
        assert!(!status.success());
        let (_, logs) = process.finish(Duration::from_millis(500)).await;
        assert!(logs.stdout.contains("armed"));
    }

    fn running(pid: u32) -> bool {
        use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    async fn stops(pid: u32) -> bool {
        for _ in 0..100 {
            if !running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn terminate_reaches_background_children() {
        let mut process = SupervisedProcess::spawn(
            &shell("sleep 30 & echo $!; wait"),
            Duration::from_millis(10),
            "test/wrapper",
        )
        .expect("spawn");
        tokio::time::sleep(Duration::from_millis(200)).await;

        process.terminate(Duration::from_secs(2)).await.expect("reaped");
        let (_, logs) = process.finish(Duration::from_millis(500)).await;
        let child: u32 = logs.stdout.trim().parse().expect("child pid printed");

        assert!(stops(child).await, "background child {child} survived terminate");
    }

    #[tokio::test]
    async fn finish_sweeps_children_left_by_a_finished_process() {
        let mut process = SupervisedProcess::spawn(
            &shell("sleep 30 & echo $!"),
            Duration::from_millis(10),
            "test/daemonizing",
        )
        .expect("spawn");
        assert!(process.wait().await.expect("wait").success());

        let started = tokio::time::Instant::now();
        let (_, logs) = process.finish(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(4));
        let child: u32 = logs.stdout.trim().parse().expect("child pid printed");

        assert!(stops(child).await, "leftover child {child} survived finish");
    }

    #[tokio::test]
    async fn missing_program_is_a_start_error() {
        let invocation = Invocation {
            program: "/nonexistent/stackbench-benchmark".into(),
            ..shell("")
        };
        let err = SupervisedProcess::spawn(&invocation, Duration::from_millis(10), "test/missing")
            .err()
            .expect("spawn fails");
        assert!(matches!(err, BenchError::ProcessStart { .. }));
    }
}
