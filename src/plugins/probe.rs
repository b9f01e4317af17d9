//! Probe plugin (spec.md §4.3): lifecycle + filter + comparison-score,
//! grounded in `examples/original_source/plugins/probe/probe.go` and
//! `util.go`.
//!
//! Each registered proxy gets a polled health record: `response` gates the
//! `Filter` admission check, and `duration` feeds `ComparisonScore`, which
//! rewards the fastest responder and scales everyone else down by
//! `min_duration / duration`. A single background worker drains a bounded
//! job queue (capacity 1, same as the source); a second task re-probes on a
//! self-tuning ticker that doubles its period every time it fires and gets
//! reset back to the base period whenever `ComparisonScore` is called
//! (ranking activity implies the pool is in use and deserves fresher data).

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Once, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::plugin::{ComparisonScorePlugin, FilterPlugin, LifecyclePlugin, Plugin};
use crate::types::{Proxy, Target};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PERIOD: Duration = Duration::from_secs(30);
/// The source lets the ticker period double forever; we cap growth so a
/// long-idle pool still gets probed at least this often.
const MAX_PERIOD: Duration = Duration::from_secs(15 * 60);

/// In-process, `Default`-deriving knobs for [`Probe`] (SPEC_FULL.md §10.3).
#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    /// Per-attempt timeout for a single probe round trip.
    pub timeout: Duration,
    /// Base re-probe period; doubles on every idle ticker fire and resets
    /// to this value whenever `ComparisonScore` signals `refresh`.
    pub period: Duration,
    /// Ceiling the doubling period is capped at.
    pub max_period: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            period: DEFAULT_PERIOD,
            max_period: MAX_PERIOD,
        }
    }
}

/// Handles for the lazily-spawned worker/ticker tasks, so [`Probe::close`]
/// has something to abort at shutdown (spec.md §9 design note: "not
/// present in source — an implementer should add a `Close` operation").
struct Tasks {
    worker: tokio::task::JoinHandle<()>,
    ticker: tokio::task::JoinHandle<()>,
}

/// The fields a single proxy's probe history is made of. Always read and
/// written as one unit — see [`CheckState`] — so a concurrent `Filter` and
/// `ComparisonScore` call never observe a torn update (e.g. `response ==
/// true` paired with the *previous* probe's `duration`).
#[derive(Clone, Copy)]
struct Record {
    response: bool,
    duration: Duration,
    last_update: Option<tokio::time::Instant>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            response: false,
            duration: Duration::ZERO,
            last_update: None,
        }
    }
}

struct CheckState {
    proxy: Proxy,
    record: RwLock<Record>,
}

impl CheckState {
    fn new(proxy: Proxy) -> Arc<Self> {
        Arc::new(Self {
            proxy,
            record: RwLock::new(Record::default()),
        })
    }

    async fn due(&self, period: Duration) -> bool {
        match self.record.read().await.last_update {
            None => true,
            Some(last) => tokio::time::Instant::now() >= last + period,
        }
    }
}

/// Periodic HTTP health check, used as both an admission filter and a
/// latency-based comparison scorer.
pub struct Probe {
    uri: Arc<str>,
    weight: i64,
    config: ProbeConfig,
    checks: Arc<DashMap<String, Arc<CheckState>>>,
    queue: Mutex<Option<mpsc::Sender<Arc<CheckState>>>>,
    refresh: Mutex<Option<mpsc::Sender<()>>>,
    started: Once,
    tasks: Mutex<Option<Tasks>>,
    self_weak: Weak<Probe>,
}

impl Probe {
    /// `weight` is the score handed to the fastest responder (spec.md §4.4
    /// scales bundled plugin weights against `MAX_SCORE`); `uri` is the
    /// target every proxy is probed against.
    pub fn new(weight: i64, uri: impl Into<Arc<str>>) -> Arc<Self> {
        Self::with_config(weight, uri, ProbeConfig::default())
    }

    pub fn with_config(weight: i64, uri: impl Into<Arc<str>>, config: ProbeConfig) -> Arc<Self> {
        let uri = uri.into();
        Arc::new_cyclic(|self_weak| Self {
            uri,
            weight,
            config,
            checks: Arc::new(DashMap::new()),
            queue: Mutex::new(None),
            refresh: Mutex::new(None),
            started: Once::new(),
            tasks: Mutex::new(None),
            self_weak: self_weak.clone(),
        })
    }

    /// Lazily spawns the worker and ticker tasks on first use, mirroring
    /// the source's `sync.Once`-guarded `start()` called from `OnAdd`.
    /// `self_weak` lets a `&self` method reach an owned `Arc` to hand to
    /// the spawned tasks.
    fn ensure_started(&self) {
        let Some(this) = self.self_weak.upgrade() else {
            return;
        };
        self.started.call_once(|| {
            let (job_tx, job_rx) = mpsc::channel(1);
            let (refresh_tx, refresh_rx) = mpsc::channel(1);

            let worker = {
                let worker = Arc::clone(&this);
                tokio::spawn(async move { worker.run_worker(job_rx).await })
            };
            let ticker = {
                let ticker = Arc::clone(&this);
                tokio::spawn(async move { ticker.run_ticker(refresh_rx).await })
            };

            // Blocking try_lock is fine: call_once runs exactly once, before
            // any other task could contend for these locks.
            *self.queue.try_lock().expect("uncontended at startup") = Some(job_tx);
            *self.refresh.try_lock().expect("uncontended at startup") = Some(refresh_tx);
            *self.tasks.try_lock().expect("uncontended at startup") = Some(Tasks { worker, ticker });
        });
    }

    /// Aborts the background worker and ticker tasks. Not present in the
    /// Go source (spec.md §9 design note flags the missing shutdown path);
    /// callers that add and drop many `Probe` instances over a process
    /// lifetime should call this before dropping one, or the tasks leak
    /// for the life of the runtime.
    pub async fn close(&self) {
        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.worker.abort();
            tasks.ticker.abort();
        }
    }

    async fn run_worker(self: Arc<Self>, mut jobs: mpsc::Receiver<Arc<CheckState>>) {
        while let Some(check) = jobs.recv().await {
            let this = Arc::clone(&self);
            let task = tokio::spawn(async move { this.probe_one(&check).await });
            // A single slow probe shouldn't stall every later job forever;
            // give it one second of grace before moving on, matching the
            // source's soft join.
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }

    async fn run_ticker(self: Arc<Self>, mut refresh: mpsc::Receiver<()>) {
        let mut period = self.config.period;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.enqueue_due().await;
                    period = (period * 2).min(self.config.max_period);
                }
                Some(()) = refresh.recv() => {
                    period = self.config.period;
                }
            }
        }
    }

    /// Re-queues every check whose last update is older than the base
    /// period, regardless of how far the ticker's own period has grown —
    /// matching the source, where `toStart` gates on `p.period`, not the
    /// locally doubling variable.
    async fn enqueue_due(&self) {
        let queue = self.queue.lock().await.clone();
        let Some(queue) = queue else { return };
        for entry in self.checks.iter() {
            let check = Arc::clone(entry.value());
            if check.due(self.config.period).await {
                let _ = queue.try_send(check);
            }
        }
    }

    async fn probe_one(&self, check: &Arc<CheckState>) {
        if !check.due(self.config.period).await {
            return;
        }
        let start = tokio::time::Instant::now();
        let outcome = tokio::time::timeout(self.config.timeout, ping_pong(&self.uri, &check.proxy)).await;

        let (response, duration) = match &outcome {
            Ok(Ok(())) => {
                let elapsed = start.elapsed();
                debug!(proxy = %check.proxy, elapsed_ms = elapsed.as_millis(), "probe succeeded");
                (true, elapsed)
            }
            Ok(Err(err)) => {
                warn!(proxy = %check.proxy, error = %err, "probe failed");
                (false, Duration::ZERO)
            }
            Err(_) => {
                warn!(proxy = %check.proxy, "probe timed out");
                (false, Duration::ZERO)
            }
        };

        // Written as one locked update so a concurrent reader never
        // observes `response`/`duration` from different probe rounds.
        let mut record = check.record.write().await;
        record.response = response;
        record.duration = duration;
        record.last_update = Some(tokio::time::Instant::now());
    }
}

async fn ping_pong(uri: &str, proxy: &Proxy) -> std::io::Result<()> {
    let (host, path) = split_uri(uri)?;
    let mut conn = proxy.dialer.dial("tcp", &host).await?;

    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        host.split(':').next().unwrap_or(&host)
    );
    conn.write_all(request.as_bytes()).await?;

    // We only care that the peer responds at all; one byte is enough to
    // prove the round trip completed, matching the source's single-byte
    // body read.
    let mut byte = [0u8; 1];
    let _ = conn.read(&mut byte).await?;
    Ok(())
}

fn split_uri(uri: &str) -> std::io::Result<(String, String)> {
    let without_scheme = uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(uri);
    let (authority, path) = without_scheme
        .split_once('/')
        .map(|(a, p)| (a, format!("/{p}")))
        .unwrap_or_else(|| (without_scheme, "/".to_string()));
    let host = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };
    Ok((host, path))
}

impl Plugin for Probe {
    fn name(&self) -> &str {
        "Probe"
    }

    fn as_lifecycle(&self) -> Option<&dyn LifecyclePlugin> {
        Some(self)
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }

    fn as_comparison_score(&self) -> Option<&dyn ComparisonScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl LifecyclePlugin for Probe {
    async fn on_add(&self, proxy: &Proxy) -> Result<(), PluginError> {
        self.ensure_started();
        let check = CheckState::new(proxy.clone());
        self.checks.insert(proxy.key(), Arc::clone(&check));
        if let Some(queue) = self.queue.lock().await.clone() {
            let _ = queue.try_send(check);
        }
        Ok(())
    }

    async fn on_del(&self, proxy: &Proxy) -> Result<(), PluginError> {
        self.checks.remove(&proxy.key());
        Ok(())
    }
}

#[async_trait]
impl FilterPlugin for Probe {
    async fn filter(&self, _target: &Target, proxy: &Proxy) -> bool {
        let Some(check) = self.checks.get(&proxy.key()) else {
            // Unknown to this plugin (OnAdd never ran against it) — admit
            // rather than silently exclude every un-probed proxy.
            return true;
        };
        check.record.read().await.response
    }
}

#[async_trait]
impl ComparisonScorePlugin for Probe {
    async fn comparison_score(
        &self,
        _target: &Target,
        proxies: &[Proxy],
    ) -> Result<Vec<i64>, PluginError> {
        if let Some(refresh) = self.refresh.lock().await.clone() {
            let _ = refresh.try_send(());
        }

        let mut durations = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            let duration = match self.checks.get(&proxy.key()) {
                Some(check) => check.record.read().await.duration,
                None => Duration::ZERO,
            };
            durations.push(duration);
        }

        let min = durations
            .iter()
            .copied()
            .filter(|d| *d > Duration::ZERO)
            .min()
            .unwrap_or(Duration::ZERO);

        let scores = durations
            .into_iter()
            .map(|duration| {
                if duration == Duration::ZERO || min == Duration::ZERO {
                    0
                } else if duration == min {
                    self.weight
                } else {
                    (self.weight as f64 * min.as_secs_f64() / duration.as_secs_f64()) as i64
                }
            })
            .collect();
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::{TcpListener, TcpStream};

    /// Dials straight to whatever address `ping_pong` asks for, standing in
    /// for a proxy that tunnels the connection transparently.
    struct DirectDialer;
    #[async_trait]
    impl crate::types::Dialer for DirectDialer {
        async fn dial(&self, _network: &str, address: &str) -> std::io::Result<crate::types::Conn> {
            let stream = TcpStream::connect(address).await?;
            Ok(Box::new(stream))
        }
    }

    async fn http_server(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr.to_string()
    }

    fn proxy() -> Proxy {
        Proxy::new(
            "p1",
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            8080,
            Arc::new(DirectDialer),
        )
    }

    #[tokio::test]
    async fn unprobed_proxy_is_excluded_after_failed_probe() {
        let probe = Probe::new(50, "http://127.0.0.1:1");
        let p = proxy();
        probe.on_add(&p).await.unwrap();
        probe.probe_one(probe.checks.get(&p.key()).unwrap().value()).await;
        let target = Target::new("x:1", vec![], 1);
        assert!(!probe.filter(&target, &p).await);
    }

    #[tokio::test]
    async fn successful_probe_admits_and_scores() {
        let addr = http_server("x").await;
        let probe = Probe::new(50, format!("http://{addr}/"));
        let p = proxy();
        probe.on_add(&p).await.unwrap();

        let check = Arc::clone(probe.checks.get(&p.key()).unwrap().value());
        probe.probe_one(&check).await;

        let target = Target::new("x:1", vec![], 1);
        assert!(probe.filter(&target, &p).await);

        let scores = probe.comparison_score(&target, &[p]).await.unwrap();
        assert_eq!(scores, vec![50]);
    }

    #[tokio::test]
    async fn on_del_forgets_check_state() {
        let probe = Probe::new(50, "http://127.0.0.1:1/");
        let p = proxy();
        probe.on_add(&p).await.unwrap();
        probe.on_del(&p).await.unwrap();
        assert!(probe.checks.get(&p.key()).is_none());
    }

    #[tokio::test]
    async fn close_aborts_background_tasks() {
        let probe = Probe::new(50, "http://127.0.0.1:1/");
        let p = proxy();
        // OnAdd lazily starts the worker/ticker; confirm close tears them down.
        probe.on_add(&p).await.unwrap();
        assert!(probe.tasks.lock().await.is_some());
        probe.close().await;
        assert!(probe.tasks.lock().await.is_none());
    }
}
