//! Heater output handoff between the control tick and the relay driver.
//!
//! The control tick publishes a complete on-duration in one atomic store; the
//! relay driver (a timer interrupt on the board, a fast task on the host)
//! only ever loads it.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

pub const PWM_WINDOW_MS: u64 = 10_000;
/// Pulses this short or shorter are not worth switching the relay for.
pub const MIN_PULSE_MS: u32 = 150;

#[derive(Debug, Clone, Default)]
pub struct OutputCell(Arc<AtomicU32>);

impl OutputCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, on_duration_ms: u32) {
        self.0.store(on_duration_ms, Ordering::Release);
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// Time-proportioning window: the relay is on for the first `duration` ms of
/// every window.
#[derive(Debug, Clone)]
pub struct PwmWindow {
    window_ms: u64,
    min_pulse_ms: u32,
    window_start_ms: Option<u64>,
}

impl Default for PwmWindow {
    fn default() -> Self {
        Self::new(PWM_WINDOW_MS, MIN_PULSE_MS)
    }
}

impl PwmWindow {
    pub fn new(window_ms: u64, min_pulse_ms: u32) -> Self {
        Self {
            window_ms: window_ms.max(1),
            min_pulse_ms,
            window_start_ms: None,
        }
    }

    pub fn relay_on(&mut self, now_ms: u64, on_duration_ms: u32) -> bool {
        let start = *self.window_start_ms.get_or_insert(now_ms);
        let elapsed = now_ms.saturating_sub(start);
        let start = start + (elapsed / self.window_ms) * self.window_ms;
        self.window_start_ms = Some(start);

        on_duration_ms > self.min_pulse_ms
            && now_ms.saturating_sub(start) < u64::from(on_duration_ms)
    }
}
