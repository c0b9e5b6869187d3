//! Drives the fetch-normalize-publish cycle for one module instance.
//!
//! Three tasks share a cancellation token: a recurring timer, a debounce loop
//! for refresh requests, and a single fetch worker. Timer ticks and debounce
//! expiries enqueue into a one-slot trigger queue the worker drains, so at most
//! one fetch runs and at most one re-run waits behind it.

use crate::config::ModuleConfig;
use crate::error::{ConfigError, TransportError};
use crate::fetch::{forecast_url, WeatherFetcher};
use crate::normalize::normalize;
use crate::notify::Notifier;
use crate::observation::ForecastResponse;
use crate::rolling::RollingWindows;
use crate::sink::{publish_display, publish_snapshot, PublishSink, SinkConfig, SinkId};
use crate::units::UnitContext;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const MODULE_NAME: &str = "ForecastIO";
pub const REFRESH_DEBOUNCE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    FetchInFlight,
    DebouncePending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchReason {
    Startup,
    Tick,
    Refresh,
}

impl FetchReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Tick => "tick",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug)]
pub struct ModuleStats {
    pub fetches: AtomicU64,
    pub failures: AtomicU64,
    pub skipped_sinks: AtomicU64,
    pub last_success_unix_ms: AtomicU64,
    in_flight: AtomicBool,
    debounce_pending: AtomicBool,
}

impl ModuleStats {
    fn new() -> Self {
        Self {
            fetches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            skipped_sinks: AtomicU64::new(0),
            last_success_unix_ms: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            debounce_pending: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.in_flight.load(Ordering::Acquire) {
            SchedulerState::FetchInFlight
        } else if self.debounce_pending.load(Ordering::Acquire) {
            SchedulerState::DebouncePending
        } else {
            SchedulerState::Idle
        }
    }
}

/// Whether the last publish is old enough to warrant a fetch at startup.
pub fn is_stale(last_publish_ms: Option<i64>, now_ms: i64, interval: Duration) -> bool {
    match last_publish_ms {
        None => true,
        Some(last) => {
            let threshold = (interval.as_millis() / 3) as i64;
            now_ms.saturating_sub(last) > threshold
        }
    }
}

/// Cloneable handle the sink layer uses to ask for an early update.
#[derive(Clone, Debug)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl RefreshHandle {
    pub fn request(&self) {
        if self.tx.send(()).is_err() {
            tracing::debug!("refresh requested after module stopped");
        }
    }
}

/// Everything one fetch cycle needs, shared by the worker task.
struct Cycle {
    instance_id: String,
    url: String,
    units: UnitContext,
    sinks: SinkConfig,
    fetcher: Arc<dyn WeatherFetcher>,
    sink: Arc<dyn PublishSink>,
    notifier: Arc<dyn Notifier>,
    windows: Mutex<RollingWindows>,
    stats: Arc<ModuleStats>,
}

impl Cycle {
    async fn run(&self, reason: FetchReason, cancel: &CancellationToken) {
        self.stats.in_flight.store(true, Ordering::Release);
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.fetcher.fetch(&self.url) => Some(result),
        };
        let Some(result) = result else {
            self.stats.in_flight.store(false, Ordering::Release);
            tracing::debug!(instance = %self.instance_id, "fetch abandoned on stop");
            return;
        };
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        if cancel.is_cancelled() {
            self.stats.in_flight.store(false, Ordering::Release);
            tracing::debug!(instance = %self.instance_id, "dropping response that arrived after stop");
            return;
        }

        match result.and_then(|body| ForecastResponse::parse(&body)) {
            Ok(response) => self.publish(&response).await,
            Err(err) => self.report_failure(reason, &err),
        }
        self.stats.in_flight.store(false, Ordering::Release);
    }

    async fn publish(&self, response: &ForecastResponse) {
        let now = Utc::now();
        let outcomes = {
            let mut windows = self.windows.lock().await;
            normalize(response, &self.sinks, &self.units, &mut windows, now)
        };

        let mut published = 0usize;
        let mut skipped = 0usize;
        for outcome in outcomes {
            match outcome {
                Ok(snapshot) => {
                    let device_id = snapshot.sink.device_id(&self.instance_id);
                    publish_snapshot(self.sink.as_ref(), &device_id, &snapshot);
                    published += 1;
                }
                Err(failure) => {
                    skipped += 1;
                    self.stats.skipped_sinks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        instance = %self.instance_id,
                        sink = %failure.sink,
                        error = %failure.error,
                        "skipping sink with malformed weather data"
                    );
                }
            }
        }
        if published == 0 {
            tracing::warn!(instance = %self.instance_id, skipped, "weather response produced no sink updates");
            return;
        }
        self.stats
            .last_success_unix_ms
            .store(now.timestamp_millis().max(0) as u64, Ordering::Relaxed);
        tracing::info!(
            instance = %self.instance_id,
            published,
            skipped,
            total_skipped = self.stats.skipped_sinks.load(Ordering::Relaxed),
            "weather update published"
        );
    }

    fn report_failure(&self, reason: FetchReason, err: &TransportError) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            instance = %self.instance_id,
            reason = reason.as_str(),
            error = %err,
            "weather fetch failed"
        );
        self.notifier.fetch_failed(MODULE_NAME, err);
    }
}

struct Running {
    cancel: CancellationToken,
    refresh: RefreshHandle,
    tasks: Vec<JoinHandle<()>>,
    devices: Vec<String>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Endpoint and presentation settings that sit outside the module config.
#[derive(Debug, Clone)]
pub struct ModuleOptions {
    pub api_base_url: String,
    pub icon_base: String,
    pub debounce: Duration,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.forecast.io".to_string(),
            icon_base: "/ZAutomation/api/v1/load/modulemedia/ForecastIO/".to_string(),
            debounce: REFRESH_DEBOUNCE,
        }
    }
}

/// One weather module instance with an explicit `start`/`stop` lifecycle.
pub struct ForecastModule {
    interval: Duration,
    debounce: Duration,
    cycle: Arc<Cycle>,
    running: Option<Running>,
}

impl ForecastModule {
    pub fn new(
        config: ModuleConfig,
        options: ModuleOptions,
        fetcher: Arc<dyn WeatherFetcher>,
        sink: Arc<dyn PublishSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if options.api_base_url.trim().is_empty() {
            return Err(ConfigError::Missing("FORECASTIO_API_BASE_URL"));
        }

        let url = forecast_url(
            &options.api_base_url,
            &config.api_key,
            config.latitude,
            config.longitude,
            &config.language,
        );
        let cycle = Cycle {
            instance_id: config.instance_id.clone(),
            url,
            units: config.units,
            sinks: SinkConfig::new(&config.sinks, options.icon_base),
            fetcher,
            sink,
            notifier,
            windows: Mutex::new(RollingWindows::default()),
            stats: Arc::new(ModuleStats::new()),
        };

        Ok(Self {
            interval: config.interval(),
            debounce: options.debounce,
            cycle: Arc::new(cycle),
            running: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn state(&self) -> SchedulerState {
        self.cycle.stats.state()
    }

    pub fn stats(&self) -> Arc<ModuleStats> {
        self.cycle.stats.clone()
    }

    /// Creates the sinks and spawns the timer, debounce and worker tasks.
    /// Must be called inside a tokio runtime. A stale or missing last update
    /// queues a catch-up fetch that runs after this returns.
    pub fn start(&mut self) {
        if self.running.is_some() {
            tracing::warn!(instance = %self.cycle.instance_id, "module already started");
            return;
        }
        let cycle = self.cycle.clone();

        let mut devices = Vec::new();
        for sink_id in cycle.sinks.enabled() {
            let device_id = sink_id.device_id(&cycle.instance_id);
            let display = cycle.sinks.display(sink_id, &cycle.units);
            publish_display(cycle.sink.as_ref(), &device_id, &display);
            devices.push(device_id);
        }

        let last_publish = cycle
            .sink
            .metric(&SinkId::Current.device_id(&cycle.instance_id), "timestamp")
            .and_then(|value| value.as_i64());
        tracing::info!(
            instance = %cycle.instance_id,
            last_update_ms = ?last_publish,
            interval_secs = self.interval.as_secs(),
            "starting weather module"
        );

        let cancel = CancellationToken::new();
        let (trigger_tx, trigger_rx) = mpsc::channel::<FetchReason>(1);
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

        if is_stale(last_publish, Utc::now().timestamp_millis(), self.interval) {
            enqueue(&trigger_tx, FetchReason::Startup);
        }

        let tasks = vec![
            tokio::spawn(run_worker(cycle.clone(), trigger_rx, cancel.clone())),
            tokio::spawn(run_timer(self.interval, trigger_tx.clone(), cancel.clone())),
            tokio::spawn(run_debounce(
                self.debounce,
                refresh_rx,
                trigger_tx,
                cycle.stats.clone(),
                cancel.clone(),
            )),
        ];

        self.running = Some(Running {
            cancel,
            refresh: RefreshHandle { tx: refresh_tx },
            tasks,
            devices,
        });
    }

    /// Asks for an update soon. Bursts collapse into one fetch once the
    /// debounce window passes without another request.
    pub fn request_refresh(&self) {
        match &self.running {
            Some(running) => running.refresh.request(),
            None => tracing::debug!("refresh requested while module is stopped"),
        }
    }

    pub fn refresh_handle(&self) -> Option<RefreshHandle> {
        self.running.as_ref().map(|running| running.refresh.clone())
    }

    /// Cancels both timers and any in-flight fetch, then removes every sink
    /// this instance created.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        for task in running.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "weather module task ended abnormally");
            }
        }
        for device_id in running.devices.drain(..) {
            self.cycle.sink.remove_sink(&device_id);
        }
        tracing::info!(instance = %self.cycle.instance_id, "weather module stopped");
    }
}

fn enqueue(tx: &mpsc::Sender<FetchReason>, reason: FetchReason) {
    match tx.try_send(reason) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!(reason = reason.as_str(), "fetch already queued; coalescing");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

async fn run_worker(
    cycle: Arc<Cycle>,
    mut triggers: mpsc::Receiver<FetchReason>,
    cancel: CancellationToken,
) {
    loop {
        let reason = tokio::select! {
            _ = cancel.cancelled() => break,
            reason = triggers.recv() => match reason {
                Some(reason) => reason,
                None => break,
            },
        };
        tracing::debug!(instance = %cycle.instance_id, reason = reason.as_str(), "fetching weather");
        cycle.run(reason, &cancel).await;
    }
}

async fn run_timer(interval: Duration, triggers: mpsc::Sender<FetchReason>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => enqueue(&triggers, FetchReason::Tick),
        }
    }
}

async fn run_debounce(
    debounce: Duration,
    mut requests: mpsc::UnboundedReceiver<()>,
    triggers: mpsc::Sender<FetchReason>,
    stats: Arc<ModuleStats>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => request,
        };
        if first.is_none() {
            break;
        }

        stats.debounce_pending.store(true, Ordering::Release);
        let deadline = tokio::time::sleep(debounce);
        tokio::pin!(deadline);
        let mut restarts = 0u32;
        let expired = loop {
            tokio::select! {
                _ = cancel.cancelled() => break false,
                _ = &mut deadline => break true,
                request = requests.recv() => match request {
                    Some(()) => {
                        restarts += 1;
                        deadline.as_mut().reset(Instant::now() + debounce);
                    }
                    None => break true,
                },
            }
        };
        stats.debounce_pending.store(false, Ordering::Release);

        if !expired {
            break;
        }
        tracing::debug!(restarts, "refresh debounce expired");
        enqueue(&triggers, FetchReason::Refresh);
    }
}
