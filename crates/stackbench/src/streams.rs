// Numan Thabit 2025
use std::{fmt, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Drains one child stream line by line into a buffer owned by its task.
///
/// The task ends at end-of-stream, on a read error, or when cancelled; in every
/// case it hands back what it accumulated so far.
pub struct StreamCollector {
    kind: StreamKind,
    cancel: CancellationToken,
    task: JoinHandle<String>,
}

impl StreamCollector {
    pub fn spawn<R>(reader: R, kind: StreamKind, label: impl Into<String>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(collect_lines(reader, kind, label.into(), cancel.clone()));
        Self { kind, cancel, task }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Waits up to `drain` for end-of-stream, then cancels and takes whatever was read.
    pub async fn finish(self, drain: Duration) -> String {
        let Self { kind, cancel, mut task } = self;
        let joined = match timeout(drain, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!(stream = %kind, "stream still open after drain timeout; cancelling collector");
                cancel.cancel();
                task.await
            }
        };
        joined.unwrap_or_else(|err| {
            warn!(stream = %kind, %err, "stream collector task failed");
            String::new()
        })
    }
}

async fn collect_lines<R>(
    reader: R,
    kind: StreamKind,
    label: String,
    cancel: CancellationToken,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut collected = String::new();
    let mut line = Vec::new();

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut line) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                push_line(&mut collected, &line, kind, &label);
                line.clear();
            }
            Err(err) => {
                debug!(stream = %kind, label = %label, %err, "stream read failed; keeping partial output");
                break;
            }
        }
    }

    if !line.is_empty() {
        push_line(&mut collected, &line, kind, &label);
    }
    collected
}

fn push_line(collected: &mut String, raw: &[u8], kind: StreamKind, label: &str) {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches(['\n', '\r']);
    debug!(stream = %kind, label, "{text}");
    collected.push_str(text);
    collected.push('\n');
}
