// Numan Thabit 2025
use std::{future::Future, process::ExitStatus, time::Duration};

use reqwest::{Client, StatusCode};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace};

use crate::settings::ProbeSettings;

/// One readiness attempt against a server.
pub trait ReadinessCheck {
    fn is_ready(&self) -> impl Future<Output = bool> + Send;
}

/// `GET <url>` with a per-attempt timeout; ready means HTTP 200.
#[derive(Debug, Clone)]
pub struct HttpReadiness {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpReadiness {
    pub fn new(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ReadinessCheck for HttpReadiness {
    fn is_ready(&self) -> impl Future<Output = bool> + Send {
        async move {
            match self
                .client
                .get(&self.url)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    trace!(url = %self.url, %status, "health probe response");
                    status == StatusCode::OK
                }
                Err(err) => {
                    trace!(url = %self.url, error = %err, "health probe failed");
                    false
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The process exited before it became ready.
    Exited(ExitStatus),
    TimedOut { attempts: u32 },
}

/// Bounded retry: sleep, check liveness, probe; stop at the first success.
#[derive(Debug, Clone, Copy)]
pub struct HealthProber {
    attempts: u32,
    interval: Duration,
}

impl HealthProber {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            attempts: settings.attempts,
            interval: settings.interval,
        }
    }

    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }

    pub async fn wait_ready<C, L>(&self, check: &C, mut exited: L) -> Result<Ready, ProbeFailure>
    where
        C: ReadinessCheck,
        L: FnMut() -> Option<ExitStatus>,
    {
        let started = Instant::now();
        info!(
            attempts = self.attempts,
            interval_ms = self.interval.as_millis() as u64,
            "waiting for server to become ready"
        );

        for attempt in 1..=self.attempts {
            sleep(self.interval).await;

            if let Some(status) = exited() {
                debug!(attempt, %status, "server exited while probing");
                return Err(ProbeFailure::Exited(status));
            }

            if check.is_ready().await {
                let elapsed = started.elapsed();
                info!(
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "server is ready"
                );
                return Ok(Ready {
                    attempts: attempt,
                    elapsed,
                });
            }
        }

        Err(ProbeFailure::TimedOut {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::{routing::get, Router};
    use tokio::net::TcpListener;

    use super::*;

    struct ReadyAfter {
        calls: AtomicU32,
        ready_on: u32,
    }

    impl ReadyAfter {
        fn new(ready_on: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_on,
            }
        }
    }

    impl ReadinessCheck for ReadyAfter {
        fn is_ready(&self) -> impl Future<Output = bool> + Send {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let ready_on = self.ready_on;
            async move { call >= ready_on }
        }
    }

    fn prober(attempts: u32, interval_ms: u64) -> HealthProber {
        HealthProber::new(&ProbeSettings {
            attempts,
            interval: Duration::from_millis(interval_ms),
            ..ProbeSettings::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_success() {
        let check = ReadyAfter::new(3);
        let ready = prober(30, 500)
            .wait_ready(&check, || None)
            .await
            .expect("ready");
        assert_eq!(ready.attempts, 3);
        assert_eq!(ready.elapsed, Duration::from_millis(1500));
        assert_eq!(check.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_default_budget_in_fifteen_seconds() {
        let check = ReadyAfter::new(u32::MAX);
        let prober = HealthProber::new(&ProbeSettings::default());
        let started = Instant::now();
        let failure = prober.wait_ready(&check, || None).await.unwrap_err();
        assert_eq!(failure, ProbeFailure::TimedOut { attempts: 30 });
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(prober.budget(), Duration::from_secs(15));
        assert_eq!(check.calls.load(Ordering::SeqCst), 30);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn aborts_when_process_exits() {
        use std::os::unix::process::ExitStatusExt;

        let check = ReadyAfter::new(u32::MAX);
        let mut liveness_checks = 0;
        let failure = prober(30, 500)
            .wait_ready(&check, || {
                liveness_checks += 1;
                (liveness_checks == 2).then(|| ExitStatus::from_raw(1 << 8))
            })
            .await
            .unwrap_err();
        assert!(matches!(failure, ProbeFailure::Exited(status) if status.code() == Some(1)));
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_readiness_requires_200() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = Router::new().route("/health", get(|| async { "healthy" }));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = Client::new();
        let healthy = HttpReadiness::new(
            client.clone(),
            format!("http://{addr}/health"),
            Duration::from_secs(1),
        );
        assert!(healthy.is_ready().await);

        let missing = HttpReadiness::new(
            client,
            format!("http://{addr}/missing"),
            Duration::from_secs(1),
        );
        assert!(!missing.is_ready().await);
    }

    #[tokio::test]
    async fn http_readiness_is_false_when_nothing_listens() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let check = HttpReadiness::new(
            Client::new(),
            format!("http://127.0.0.1:{port}/health"),
            Duration::from_millis(300),
        );
        assert!(!check.is_ready().await);
    }
}
