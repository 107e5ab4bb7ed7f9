//! Input debouncing and actuator rest cycles.

/// Commits a raw digital input only after it has held for the whole window.
#[derive(Debug, Clone)]
pub struct Debounce {
    stable: bool,
    raw: bool,
    last_change_ms: u64,
    window_ms: u64,
    pending: bool,
}

impl Debounce {
    pub fn new(initial: bool, window_ms: u64) -> Self {
        Self {
            stable: initial,
            raw: initial,
            last_change_ms: 0,
            window_ms,
            pending: false,
        }
    }

    pub fn stable(&self) -> bool {
        self.stable
    }

    /// Feeds one raw sample. Returns the new stable value when it changes.
    pub fn update(&mut self, now_ms: u64, raw: bool) -> Option<bool> {
        if raw != self.raw {
            self.raw = raw;
            self.last_change_ms = now_ms;
            self.pending = true;
        }

        if !self.pending || now_ms.saturating_sub(self.last_change_ms) < self.window_ms {
            return None;
        }
        self.pending = false;
        if self.raw == self.stable {
            return None;
        }
        self.stable = self.raw;
        Some(self.stable)
    }

    /// Adopts a value as already stable, dropping any pending change.
    pub fn resync(&mut self, value: bool) {
        self.stable = value;
        self.raw = value;
        self.pending = false;
    }
}

/// Forces an actuator off for `rest_ms` after `max_on_ms` of continuous work.
#[derive(Debug, Clone)]
pub struct RestCycle {
    max_on_ms: u64,
    rest_ms: u64,
    work_start_ms: Option<u64>,
    rest_start_ms: Option<u64>,
}

impl RestCycle {
    /// `max_on_ms == 0` disables the limit.
    pub fn new(max_on_ms: u64, rest_ms: u64) -> Self {
        Self {
            max_on_ms,
            rest_ms,
            work_start_ms: None,
            rest_start_ms: None,
        }
    }

    pub fn configure(&mut self, max_on_ms: u64, rest_ms: u64) {
        self.max_on_ms = max_on_ms;
        self.rest_ms = rest_ms;
        self.reset();
    }

    pub fn is_resting(&self) -> bool {
        self.rest_start_ms.is_some()
    }

    pub fn reset(&mut self) {
        self.work_start_ms = None;
        self.rest_start_ms = None;
    }

    /// Returns whether the output may be on, given whether it is wanted.
    pub fn gate(&mut self, now_ms: u64, want_on: bool) -> bool {
        if let Some(rest_start) = self.rest_start_ms {
            if now_ms.saturating_sub(rest_start) < self.rest_ms {
                return false;
            }
            self.rest_start_ms = None;
        }

        if !want_on {
            self.work_start_ms = None;
            return false;
        }
        if self.max_on_ms == 0 {
            return true;
        }

        let work_start = *self.work_start_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(work_start) >= self.max_on_ms {
            self.work_start_ms = None;
            self.rest_start_ms = Some(now_ms);
            return false;
        }
        true
    }
}
