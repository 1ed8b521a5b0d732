//! Clock abstraction and one-shot timer scheduling.
//!
//! Approval expiry and escalation are both driven by a single [`Clock`]
//! instance so the two deadlines can never drift against each other.
//! Production uses [`SystemClock`] (a worker thread parked on a condvar,
//! popping a deadline heap); tests inject a [`VirtualClock`] and move time
//! explicitly with [`VirtualClock::advance`].
//!
//! Timer callbacks run off the caller's stack. A panicking callback is
//! caught and logged; it never takes the worker down or skips later
//! timers.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// One-shot timer callback.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Wall-clock time plus one-shot timer scheduling.
///
/// All kernel timestamps and both approval timers go through the one
/// `Clock` handed to the orchestrator at construction.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Schedules `callback` to run once after `delay`.
    ///
    /// The returned guard cancels the timer; dropping the guard does
    /// not.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerGuard;
}

/// Cancellation handle for a scheduled timer.
///
/// Cancellation is cooperative: a callback that is already running is
/// not interrupted.
#[derive(Debug, Clone)]
pub struct TimerGuard {
    cancelled: Arc<AtomicBool>,
}

impl TimerGuard {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancels the timer if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the timer has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn run_callback(callback: TimerCallback) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!("timer callback panicked; continuing");
    }
}

/// Formats a timestamp as ISO-8601 with millisecond precision and a `Z`
/// zone designator. This is the form fed to canonical hashing and the
/// audit export.
#[must_use]
pub fn iso_millis(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Truncates a timestamp to millisecond precision so in-memory values
/// round-trip exactly through the export format.
#[must_use]
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .unwrap_or(ts)
}

pub(crate) fn add_millis(ts: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    ts + chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Serde adapter serializing `DateTime<Utc>` via [`iso_millis`].
pub mod ts_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes as ISO-8601 with millisecond precision.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::iso_millis(ts))
    }

    /// Deserializes from any RFC 3339 form, normalizing to UTC.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional timestamps; see [`ts_millis`].
pub mod ts_millis_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes `Some` via [`super::iso_millis`], `None` as null.
    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_str(&super::iso_millis(ts)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes a nullable RFC 3339 timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

// =============================================================================
// SystemClock
// =============================================================================

struct QueueEntry {
    fire_at: Instant,
    seq: u64,
    callback: Option<TimerCallback>,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    entries: BinaryHeap<QueueEntry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

/// Production clock: real wall time and a single worker thread driving
/// all scheduled timers.
pub struct SystemClock {
    queue: Arc<TimerQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SystemClock {
    /// Creates the clock and spawns its timer worker.
    #[must_use]
    pub fn new() -> Self {
        let queue = Arc::new(TimerQueue {
            state: Mutex::new(QueueState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("warden-timer".to_string())
            .spawn(move || Self::worker_loop(&worker_queue))
            .expect("timer worker thread spawn");
        Self {
            queue,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn worker_loop(queue: &TimerQueue) {
        enum Step {
            Idle,
            Due,
            Sleep(Duration),
        }

        let mut state = queue
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.shutdown {
                return;
            }
            let step = match state.entries.peek() {
                None => Step::Idle,
                Some(entry) => {
                    let now = Instant::now();
                    if entry.fire_at <= now {
                        Step::Due
                    } else {
                        Step::Sleep(entry.fire_at.saturating_duration_since(now))
                    }
                },
            };
            match step {
                Step::Idle => {
                    state = queue
                        .cv
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                },
                Step::Due => {
                    let mut entry = state.entries.pop().expect("peeked entry exists");
                    let callback = entry.callback.take();
                    drop(state);
                    if !entry.cancelled.load(Ordering::SeqCst) {
                        if let Some(callback) = callback {
                            run_callback(callback);
                        }
                    }
                    state = queue
                        .state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                },
                Step::Sleep(timeout) => {
                    let (guard, _timed_out) = queue
                        .cv
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                },
            }
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerGuard {
        let guard = TimerGuard::new();
        let mut state = self
            .queue
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(QueueEntry {
            fire_at: Instant::now() + delay,
            seq,
            callback: Some(callback),
            cancelled: Arc::clone(&guard.cancelled),
        });
        drop(state);
        self.queue.cv.notify_one();
        guard
    }
}

impl Drop for SystemClock {
    fn drop(&mut self) {
        {
            let mut state = self
                .queue
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
        }
        self.queue.cv.notify_all();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemClock").finish_non_exhaustive()
    }
}

// =============================================================================
// VirtualClock
// =============================================================================

struct VirtualEntry {
    fire_at: DateTime<Utc>,
    seq: u64,
    callback: Option<TimerCallback>,
    cancelled: Arc<AtomicBool>,
}

struct VirtualState {
    now: DateTime<Utc>,
    pending: Vec<VirtualEntry>,
    next_seq: u64,
}

/// Deterministic test clock.
///
/// Time stands still until [`VirtualClock::advance`] is called; advancing
/// runs every due timer in deadline order on the advancing thread, with
/// the clock reading each timer's own deadline while its callback runs.
pub struct VirtualClock {
    state: Mutex<VirtualState>,
}

impl VirtualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(VirtualState {
                now: start,
                pending: Vec::new(),
                next_seq: 0,
            }),
        }
    }

    /// Moves time forward by `delta` without delivering timers.
    ///
    /// Simulates a lagging timer worker: wall time passes but scheduled
    /// callbacks stay queued until the next [`VirtualClock::advance`].
    /// Components with lazy deadline checks must behave correctly in
    /// this window.
    pub fn jump(&self, delta: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now = state.now
            + chrono::Duration::milliseconds(i64::try_from(delta.as_millis()).unwrap_or(i64::MAX));
    }

    /// Moves time forward by `delta`, firing due timers in order.
    ///
    /// Callbacks run without the clock lock held, so a callback may
    /// schedule further timers; ones that land inside the advanced
    /// window fire in the same call.
    pub fn advance(&self, delta: Duration) {
        let target = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.now + chrono::Duration::milliseconds(i64::try_from(delta.as_millis()).unwrap_or(i64::MAX))
        };
        loop {
            let due = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state
                    .pending
                    .retain(|entry| !entry.cancelled.load(Ordering::SeqCst));
                let next = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.fire_at <= target)
                    .min_by_key(|(_, entry)| (entry.fire_at, entry.seq))
                    .map(|(idx, _)| idx);
                match next {
                    Some(idx) => {
                        let mut entry = state.pending.remove(idx);
                        if entry.fire_at > state.now {
                            state.now = entry.fire_at;
                        }
                        entry.callback.take()
                    },
                    None => {
                        state.now = target;
                        None
                    },
                }
            };
            match due {
                Some(callback) => run_callback(callback),
                None => break,
            }
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerGuard {
        let guard = TimerGuard::new();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let fire_at = state.now
            + chrono::Duration::milliseconds(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(VirtualEntry {
            fire_at,
            seq,
            callback: Some(callback),
            cancelled: Arc::clone(&guard.cancelled),
        });
        guard
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("now", &self.now())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn virtual_clock_fires_in_deadline_order() {
        let clock = VirtualClock::new(start());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, ms) in [("b", 200_u64), ("a", 100), ("c", 300)] {
            let order = Arc::clone(&order);
            clock.schedule(
                Duration::from_millis(ms),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        clock.advance(Duration::from_millis(250));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);

        clock.advance(Duration::from_millis(100));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn virtual_clock_reads_deadline_during_callback() {
        let clock = Arc::new(VirtualClock::new(start()));
        let observed = Arc::new(Mutex::new(None));
        {
            let clock_in_callback = Arc::clone(&clock);
            let observed = Arc::clone(&observed);
            clock.schedule(
                Duration::from_millis(500),
                Box::new(move || {
                    *observed.lock().unwrap() = Some(clock_in_callback.now());
                }),
            );
        }
        clock.advance(Duration::from_secs(2));
        assert_eq!(
            observed.lock().unwrap().unwrap(),
            start() + chrono::Duration::milliseconds(500)
        );
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(2));
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let clock = VirtualClock::new(start());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_cb = Arc::clone(&fired);
        let guard = clock.schedule(
            Duration::from_millis(100),
            Box::new(move || fired_cb.store(true, Ordering::SeqCst)),
        );
        guard.cancel();
        clock.advance(Duration::from_secs(1));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_callback_does_not_skip_later_timers() {
        let clock = VirtualClock::new(start());
        let count = Arc::new(AtomicUsize::new(0));
        clock.schedule(Duration::from_millis(10), Box::new(|| panic!("boom")));
        let count_cb = Arc::clone(&count);
        clock.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                count_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );
        clock.advance(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn system_clock_fires_and_cancels() {
        let clock = SystemClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_cb = Arc::clone(&fired);
        clock.schedule(
            Duration::from_millis(20),
            Box::new(move || fired_cb.store(true, Ordering::SeqCst)),
        );

        let skipped = Arc::new(AtomicBool::new(false));
        let skipped_cb = Arc::clone(&skipped);
        let guard = clock.schedule(
            Duration::from_millis(20),
            Box::new(move || skipped_cb.store(true, Ordering::SeqCst)),
        );
        guard.cancel();

        std::thread::sleep(Duration::from_millis(200));
        assert!(fired.load(Ordering::SeqCst));
        assert!(!skipped.load(Ordering::SeqCst));
    }

    #[test]
    fn iso_millis_uses_z_and_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 5).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(iso_millis(&ts), "2025-06-01T08:30:05.042Z");
    }

    #[test]
    fn truncate_millis_drops_sub_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 5).unwrap()
            + chrono::Duration::nanoseconds(1_234_567);
        let truncated = truncate_millis(ts);
        assert_eq!(iso_millis(&truncated), "2025-06-01T08:30:05.001Z");
        assert_eq!(truncated.timestamp_subsec_micros() % 1000, 0);
    }
}
