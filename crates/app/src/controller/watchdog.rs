use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::error;

use crate::controller::telemetry;

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 250;
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;
/// Exit code used when a stalled stage never hands control back.
pub(crate) const STALL_EXIT_CODE: i32 = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HealthComponent {
    Capture,
    Classifier,
    Overlay,
    Encoder,
}

impl HealthComponent {
    pub(crate) fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Classifier => "classify",
            HealthComponent::Overlay => "overlay",
            HealthComponent::Encoder => "encode",
        }
    }

    fn code(self) -> u8 {
        match self {
            HealthComponent::Capture => 1,
            HealthComponent::Classifier => 2,
            HealthComponent::Overlay => 3,
            HealthComponent::Encoder => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(HealthComponent::Capture),
            2 => Some(HealthComponent::Classifier),
            3 => Some(HealthComponent::Overlay),
            4 => Some(HealthComponent::Encoder),
            _ => None,
        }
    }
}

/// Which stage the capture loop is in and since when.
///
/// Stages run strictly one after another, so a single slot is enough; a
/// parked loop (between runs) is never reported as stalled. Entry times are
/// milliseconds on a monotonic clock started at construction, so wall-clock
/// steps (NTP sync on a board without an RTC) never look like a stall.
pub(crate) struct PipelineHealth {
    origin: Instant,
    stage: AtomicU8,
    entered_at: AtomicU64,
}

impl PipelineHealth {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            stage: AtomicU8::new(0),
            entered_at: AtomicU64::new(0),
        }
    }

    /// Milliseconds since this tracker was created.
    pub(crate) fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Mark the start of `component`.
    pub(crate) fn enter(&self, component: HealthComponent) {
        self.entered_at.store(self.now_millis(), Ordering::Relaxed);
        self.stage.store(component.code(), Ordering::Release);
    }

    /// Like [`Self::enter`], with extra slack for camera warm-up after a
    /// (re)open.
    pub(crate) fn enter_with_grace(&self, component: HealthComponent) {
        self.entered_at.store(
            self.now_millis().saturating_add(WATCHDOG_STARTUP_GRACE_MS),
            Ordering::Relaxed,
        );
        self.stage.store(component.code(), Ordering::Release);
    }

    pub(crate) fn park(&self) {
        self.stage.store(0, Ordering::Release);
    }

    pub(crate) fn stalled_stage(&self, now: u64, timeout: Duration) -> Option<HealthComponent> {
        let component = HealthComponent::from_code(self.stage.load(Ordering::Acquire))?;
        let entered = self.entered_at.load(Ordering::Relaxed);
        (now.saturating_sub(entered) > timeout.as_millis() as u64).then_some(component)
    }
}

pub(crate) struct WatchdogState {
    triggered: AtomicBool,
    acknowledged: AtomicBool,
    reason: Mutex<Option<HealthComponent>>,
}

impl WatchdogState {
    pub(crate) fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            acknowledged: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    pub(crate) fn arm(&self, component: HealthComponent) {
        if let Ok(mut guard) = self.reason.lock() {
            *guard = Some(component);
        }
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn reason(&self) -> Option<HealthComponent> {
        match self.reason.lock() {
            Ok(guard) => *guard,
            Err(_) => None,
        }
    }

    /// Called by the capture loop once it has returned control.
    pub(crate) fn acknowledge(&self) {
        self.acknowledged.store(true, Ordering::SeqCst);
    }

    fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }
}

/// Watch one capture run. A stage running past `stall_timeout` stops the run;
/// if the loop is still stuck `stall_timeout` later the process exits.
pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    state: Arc<WatchdogState>,
    stall_timeout: Duration,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("rover-watchdog", move || {
        let poll = Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS);
        while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
            thread::sleep(poll);
            let Some(component) = health.stalled_stage(health.now_millis(), stall_timeout) else {
                continue;
            };
            error!(
                stage = component.label(),
                timeout_ms = stall_timeout.as_millis() as u64,
                "Watchdog detected stalled {} stage; stopping capture loop",
                component.label()
            );
            metrics::counter!("rover_watchdog_trips_total", "stage" => component.label())
                .increment(1);
            state.arm(component);
            running.store(false, Ordering::SeqCst);

            let deadline = Instant::now() + stall_timeout;
            while Instant::now() < deadline {
                if state.is_acknowledged() {
                    return;
                }
                thread::sleep(poll);
            }
            error!(
                stage = component.label(),
                "Capture loop did not recover from stalled {} stage; exiting",
                component.label()
            );
            std::process::exit(STALL_EXIT_CODE);
        }
    })
}
