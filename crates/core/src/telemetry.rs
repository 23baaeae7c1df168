//! Per-request latency and throughput telemetry.
//!
//! A sample is created when a request is sent, updated on every unit that
//! arrives, and finished when the response ends (successfully or not).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::store::SubscriptionId;

/// Source of wall-clock time for telemetry
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests and replays
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn advance_ms(&self, ms: i64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += TimeDelta::milliseconds(ms);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Timing accumulator for one in-flight request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub start_time: DateTime<Utc>,
    pub first_unit_time: Option<DateTime<Utc>>,
    pub last_unit_time: Option<DateTime<Utc>>,
    pub unit_count: u64,
    pub end_time: Option<DateTime<Utc>>,
}

impl TelemetrySample {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self { start_time, first_unit_time: None, last_unit_time: None, unit_count: 0, end_time: None }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Time from request start to the first unit
    pub fn time_to_first_unit(&self) -> Option<TimeDelta> {
        self.first_unit_time.map(|first| first - self.start_time)
    }

    /// Units per second over the first..last unit window.
    ///
    /// `None` until a unit has arrived, and while the window is still zero-length.
    pub fn units_per_second(&self) -> Option<f64> {
        let first = self.first_unit_time?;
        let last = self.last_unit_time?;
        let window_ms = (last - first).num_milliseconds();
        if window_ms <= 0 {
            return None;
        }
        Some(self.unit_count as f64 / (window_ms as f64 / 1000.0))
    }

    /// Total request duration, once finished
    pub fn total_duration(&self) -> Option<TimeDelta> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Identifies the request a telemetry call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TelemetryHandle(u64);

/// Callback invoked with the current sample (or `None` once cleared)
pub type TelemetryListener = Box<dyn Fn(Option<&TelemetrySample>) + Send + Sync>;

/// Records timing for the current request and notifies subscribers on change
pub struct TelemetryRecorder {
    clock: Arc<dyn Clock>,
    current: Option<(TelemetryHandle, TelemetrySample)>,
    next_handle: u64,
    listeners: BTreeMap<SubscriptionId, TelemetryListener>,
    next_subscription: u64,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock, current: None, next_handle: 0, listeners: BTreeMap::new(), next_subscription: 0 }
    }

    pub fn sample(&self) -> Option<&TelemetrySample> {
        self.current.as_ref().map(|(_, sample)| sample)
    }

    pub fn subscribe(&mut self, listener: impl Fn(Option<&TelemetrySample>) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.insert(id, Box::new(listener));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Begin a new sample, replacing whatever was recorded before
    pub fn start(&mut self) -> TelemetryHandle {
        let handle = TelemetryHandle(self.next_handle);
        self.next_handle += 1;
        self.current = Some((handle, TelemetrySample::new(self.clock.now())));
        self.emit();
        handle
    }

    /// Record the arrival of one unit. No-op for stale handles or finished samples.
    pub fn record_unit(&mut self, handle: TelemetryHandle) {
        let now = self.clock.now();
        let Some(sample) = self.active_sample(handle) else {
            return;
        };
        if sample.first_unit_time.is_none() {
            sample.first_unit_time = Some(now);
        }
        sample.last_unit_time = Some(sample.last_unit_time.map_or(now, |last| last.max(now)));
        sample.unit_count += 1;
        self.emit();
    }

    /// Mark the sample finished. No-op for stale handles or already finished samples.
    pub fn finish(&mut self, handle: TelemetryHandle) {
        let now = self.clock.now();
        let Some(sample) = self.active_sample(handle) else {
            return;
        };
        sample.end_time = Some(now);
        self.emit();
    }

    /// Discard the sample once it no longer needs to be displayed
    pub fn clear(&mut self) {
        if self.current.take().is_some() {
            self.emit();
        }
    }

    fn active_sample(&mut self, handle: TelemetryHandle) -> Option<&mut TelemetrySample> {
        match &mut self.current {
            Some((current, sample)) if *current == handle && !sample.is_finished() => Some(sample),
            _ => None,
        }
    }

    fn emit(&self) {
        let sample = self.sample();
        for listener in self.listeners.values() {
            listener(sample);
        }
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("current", &self.current)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
