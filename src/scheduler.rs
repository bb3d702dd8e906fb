use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest period a recurrence may run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Accept `0` (refresh off) or a finite period of at least [`MIN_PERIOD`].
pub fn check_interval(interval_seconds: f64) -> Result<(), String> {
    if interval_seconds == 0.0 {
        return Ok(());
    }
    if !interval_seconds.is_finite() || interval_seconds < 0.0 {
        return Err(format!(
            "interval_seconds must be a non-negative number, got {interval_seconds}"
        ));
    }
    match Duration::try_from_secs_f64(interval_seconds) {
        Ok(period) if period >= MIN_PERIOD => Ok(()),
        _ => Err(format!(
            "interval_seconds must be 0 or a representable period of at least {}s, got {interval_seconds}",
            MIN_PERIOD.as_secs_f64()
        )),
    }
}

type RunFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type RunFn = Arc<dyn Fn() -> RunFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Active { interval_seconds: f64 },
}

struct Recurrence {
    interval_seconds: f64,
    handle: JoinHandle<()>,
}

/// Owns a single recurring-execution slot.
///
/// Every tick spawns the run as its own task, so cancelling the recurrence
/// never cancels a run that is already in flight, and a run may reconfigure
/// its own scheduler.
pub struct RefreshScheduler {
    name: String,
    run: RunFn,
    slot: Mutex<Option<Recurrence>>,
}

impl RefreshScheduler {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move || Box::pin(run()) as RunFuture),
            slot: Mutex::new(None),
        }
    }

    /// Cancel any recurrence, then install a new one when `interval_seconds > 0`
    /// and the period is at least [`MIN_PERIOD`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn configure(&self, interval_seconds: f64) -> SchedulerState {
        let mut slot = self.slot.lock();
        if let Some(previous) = slot.take() {
            previous.handle.abort();
            debug!(
                scheduler = %self.name,
                interval_seconds = previous.interval_seconds,
                "cancelled refresh"
            );
        }

        if !(interval_seconds > 0.0) {
            return SchedulerState::Idle;
        }

        let period = match Duration::try_from_secs_f64(interval_seconds) {
            Ok(period) if period >= MIN_PERIOD => period,
            Ok(period) => {
                warn!(scheduler = %self.name, interval_seconds, period = ?period, "refresh interval below minimum period; staying idle");
                return SchedulerState::Idle;
            }
            Err(err) => {
                warn!(scheduler = %self.name, interval_seconds, error = %err, "refresh interval out of range; staying idle");
                return SchedulerState::Idle;
            }
        };

        info!(scheduler = %self.name, interval = ?period, "refresh scheduled");
        let handle = spawn_recurrence(self.name.clone(), period, Arc::clone(&self.run));
        *slot = Some(Recurrence {
            interval_seconds,
            handle,
        });
        SchedulerState::Active { interval_seconds }
    }

    pub fn state(&self) -> SchedulerState {
        match self.slot.lock().as_ref() {
            Some(recurrence) => SchedulerState::Active {
                interval_seconds: recurrence.interval_seconds,
            },
            None => SchedulerState::Idle,
        }
    }

    /// Number of scheduled recurrences (0 or 1).
    pub fn pending(&self) -> usize {
        self.slot
            .lock()
            .as_ref()
            .filter(|recurrence| !recurrence.handle.is_finished())
            .map_or(0, |_| 1)
    }

    pub fn shutdown(&self) {
        self.configure(0.0);
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(recurrence) = self.slot.get_mut().take() {
            recurrence.handle.abort();
        }
    }
}

fn spawn_recurrence(name: String, period: Duration, run: RunFn) -> JoinHandle<()> {
    tokio::spawn(async move {
        // first execution one full period after configuration
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!(scheduler = %name, "refresh tick");
            tokio::spawn(run());
        }
    })
}
