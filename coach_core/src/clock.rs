//! Clock abstraction driving session ticks.
//!
//! A clock arms at most one repeating timer at a time. Arming returns a
//! [`TimerToken`]; every tick is delivered with the token it was armed with
//! so the engine can discard ticks from a timer it has since cancelled.
//!
//! Each tick is one logical second of session time regardless of the speed
//! multiplier. The multiplier only changes how often ticks fire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Speed multipliers a clock accepts; anything outside is clamped
pub const SPEED_MULTIPLIER_RANGE: RangeInclusive<f64> = 0.01..=10_000.0;

/// Clamp a requested multiplier into [`SPEED_MULTIPLIER_RANGE`]
///
/// Returns `None` for zero, negative or non-finite values.
pub fn clamp_speed_multiplier(multiplier: f64) -> Option<f64> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return None;
    }
    Some(multiplier.clamp(*SPEED_MULTIPLIER_RANGE.start(), *SPEED_MULTIPLIER_RANGE.end()))
}

/// Identifies one armed timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Source of periodic ticks for the session engine
pub trait Clock: Send {
    /// Arm a repeating timer, cancelling any timer already armed
    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken;

    /// Cancel the armed timer, if any. Idempotent.
    fn invalidate(&mut self);

    /// Wall-clock to session-time ratio; 1.0 is real time
    fn speed_multiplier(&self) -> f64;

    /// Change the ratio used for timers armed from now on
    fn set_speed_multiplier(&mut self, multiplier: f64);
}

// ============================================================================
// Manual clock
// ============================================================================

#[derive(Debug)]
struct ManualInner {
    armed: Option<(TimerToken, Duration)>,
    next_token: u64,
    arm_count: u32,
    multiplier: f64,
}

/// Clock that never fires on its own
///
/// The host (or a test) reads the armed token through a
/// [`ManualClockHandle`] and delivers ticks itself.
#[derive(Debug)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

/// Observer side of a [`ManualClock`]
#[derive(Clone, Debug)]
pub struct ManualClockHandle {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualClock {
    pub fn new() -> (Self, ManualClockHandle) {
        let inner = Arc::new(Mutex::new(ManualInner {
            armed: None,
            next_token: 1,
            arm_count: 0,
            multiplier: 1.0,
        }));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            ManualClockHandle { inner },
        )
    }

    fn with<R>(&self, f: impl FnOnce(&mut ManualInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl Clock for ManualClock {
    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken {
        self.with(|inner| {
            let token = TimerToken(inner.next_token);
            inner.next_token += 1;
            inner.arm_count += 1;
            inner.armed = Some((token, interval));
            token
        })
    }

    fn invalidate(&mut self) {
        self.with(|inner| inner.armed = None);
    }

    fn speed_multiplier(&self) -> f64 {
        self.with(|inner| inner.multiplier)
    }

    fn set_speed_multiplier(&mut self, multiplier: f64) {
        if let Some(multiplier) = clamp_speed_multiplier(multiplier) {
            self.with(|inner| inner.multiplier = multiplier);
        }
    }
}

impl ManualClockHandle {
    fn with<R>(&self, f: impl FnOnce(&ManualInner) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    /// Token of the currently armed timer
    pub fn armed(&self) -> Option<TimerToken> {
        self.with(|inner| inner.armed.map(|(token, _)| token))
    }

    pub fn armed_interval(&self) -> Option<Duration> {
        self.with(|inner| inner.armed.map(|(_, interval)| interval))
    }

    /// How many timers have been armed so far
    pub fn arm_count(&self) -> u32 {
        self.with(|inner| inner.arm_count)
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.with(|inner| inner.multiplier)
    }
}

// ============================================================================
// Thread clock
// ============================================================================

/// Receives ticks; returns `false` once nobody is listening any more
pub type TickSink = Arc<dyn Fn(TimerToken) -> bool + Send + Sync>;

/// Real-time clock backed by a helper thread per armed timer
///
/// Ticks are handed to the sink, which normally forwards them into the
/// session runner's event channel.
pub struct ThreadClock {
    sink: TickSink,
    multiplier: f64,
    next_token: u64,
    active: Option<Arc<AtomicBool>>,
}

impl ThreadClock {
    pub fn new(sink: impl Fn(TimerToken) -> bool + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
            multiplier: 1.0,
            next_token: 1,
            active: None,
        }
    }
}

impl Clock for ThreadClock {
    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken {
        self.invalidate();

        let token = TimerToken(self.next_token);
        self.next_token += 1;

        let cancelled = Arc::new(AtomicBool::new(false));
        self.active = Some(Arc::clone(&cancelled));

        let period = interval.div_f64(self.multiplier);
        let sink = Arc::clone(&self.sink);
        let spawned = thread::Builder::new()
            .name(format!("coach-clock-{}", token.id()))
            .spawn(move || loop {
                thread::sleep(period);
                if cancelled.load(Ordering::SeqCst) || !sink(token) {
                    break;
                }
            });

        if let Err(e) = spawned {
            tracing::error!("Failed to spawn clock thread: {}", e);
        }

        tracing::debug!("Armed timer {} with period {:?}", token.id(), period);
        token
    }

    fn invalidate(&mut self) {
        if let Some(cancelled) = self.active.take() {
            cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn speed_multiplier(&self) -> f64 {
        self.multiplier
    }

    fn set_speed_multiplier(&mut self, multiplier: f64) {
        if let Some(multiplier) = clamp_speed_multiplier(multiplier) {
            self.multiplier = multiplier;
        }
    }
}

impl Drop for ThreadClock {
    fn drop(&mut self) {
        self.invalidate();
    }
}
