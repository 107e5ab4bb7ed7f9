//! Fixed-rate PI(D) controller with anti-windup tieback.
//!
//! The integral and derivative gains are stored already scaled by the time
//! step (`ki * ts`, `kd / ts`), so a recompute needs no multiply by the
//! elapsed time. Reverse direction is folded into the stored gains as a sign.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A larger output raises the process value.
    Direct,
    /// A larger output lowers the process value.
    Reverse,
}

/// User-facing gains, independent of time step and direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Scalar Kalman filter applied to the measured input before each compute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputFilter {
    pub k: f32,
    pub p: f32,
    pub q: f32,
    pub r: f32,
}

impl InputFilter {
    pub fn new(p: f32, q: f32, r: f32) -> Self {
        Self { k: 0.0, p, q, r }
    }

    fn apply(&mut self, previous: f32, measured: f32) -> f32 {
        self.p += self.q;
        self.k = self.p / (self.p + self.r);
        let estimate = previous + self.k * (measured - previous);
        self.p *= 1.0 - self.k;
        estimate
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    input: f32,
    output: f32,
    setpoint: f32,
    output_min: f32,
    output_max: f32,
    time_step_ms: u32,
    direction: Direction,
    integral: f32,
    previous_input: f32,
    last_error: f32,
    previous_calc_ms: Option<u64>,
    filter: Option<InputFilter>,
}

impl PidController {
    pub fn new(gains: Gains, output_min: f32, output_max: f32, time_step_ms: u32) -> Self {
        let mut pid = Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            input: 0.0,
            output: 0.0,
            setpoint: 0.0,
            output_min,
            output_max,
            time_step_ms: time_step_ms.max(1),
            direction: Direction::Direct,
            integral: 0.0,
            previous_input: 0.0,
            last_error: 0.0,
            previous_calc_ms: None,
            filter: None,
        };
        pid.set_gains(gains);
        pid.output = pid.output.clamp(output_min, output_max);
        pid.reset();
        pid
    }

    pub fn set_gains(&mut self, gains: Gains) {
        let sign = self.sign();
        let ts = self.time_step_ms as f32;
        self.kp = sign * gains.kp;
        self.ki = sign * gains.ki * ts;
        self.kd = sign * gains.kd / ts;
    }

    pub fn gains(&self) -> Gains {
        let sign = self.sign();
        let ts = self.time_step_ms as f32;
        Gains {
            kp: sign * self.kp,
            ki: sign * self.ki / ts,
            kd: sign * self.kd * ts,
        }
    }

    /// Stored per-tick values, signed by direction.
    pub fn raw_gains(&self) -> Gains {
        Gains {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }

    /// Changes the control period, rescaling the stored gains. Zero is ignored.
    pub fn set_time_step(&mut self, time_step_ms: u32) {
        if time_step_ms == 0 {
            return;
        }
        let ratio = time_step_ms as f32 / self.time_step_ms as f32;
        self.ki *= ratio;
        self.kd /= ratio;
        self.time_step_ms = time_step_ms;
    }

    pub fn time_step_ms(&self) -> u32 {
        self.time_step_ms
    }

    pub fn set_output_limits(&mut self, output_min: f32, output_max: f32) {
        if output_min > output_max {
            return;
        }
        self.output_min = output_min;
        self.output_max = output_max;
        self.integral = self.integral.clamp(output_min, output_max);
        self.constrain_output();
    }

    pub fn output_limits(&self) -> (f32, f32) {
        (self.output_min, self.output_max)
    }

    /// Negates the stored gains only when the direction actually changes.
    pub fn set_direction(&mut self, direction: Direction) {
        if direction != self.direction {
            self.kp = -self.kp;
            self.ki = -self.ki;
            self.kd = -self.kd;
            self.direction = direction;
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_filter(&mut self, filter: Option<InputFilter>) {
        self.filter = filter;
    }

    pub fn filter(&self) -> Option<&InputFilter> {
        self.filter.as_ref()
    }

    pub fn set_input(&mut self, input: f32) {
        self.input = input;
    }

    pub fn input(&self) -> f32 {
        self.input
    }

    pub fn set_setpoint(&mut self, setpoint: f32) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    /// Drives the output directly, bypassing the control law. Used while tuning.
    pub fn force_output(&mut self, output: f32) {
        self.output = output.clamp(self.output_min, self.output_max);
    }

    /// Re-seeds the integral from the current output for a bumpless restart.
    pub fn reset(&mut self) {
        self.integral = self.output.clamp(self.output_min, self.output_max);
        self.previous_input = self.input;
    }

    /// Recomputes the output once per time step. Returns `None` between steps.
    pub fn compute(&mut self, now_ms: u64) -> Option<f32> {
        match self.previous_calc_ms {
            Some(previous) if now_ms.saturating_sub(previous) < u64::from(self.time_step_ms) => {
                return None;
            }
            Some(_) => {}
            None => self.previous_input = self.input,
        }

        if let Some(filter) = self.filter.as_mut() {
            self.input = filter.apply(self.previous_input, self.input);
        }

        let error = self.setpoint - self.input;
        self.last_error = error;
        self.integral = (self.integral + self.ki * error).clamp(self.output_min, self.output_max);
        let derivative = self.kd * (self.input - self.previous_input);

        self.output = self.kp * error + self.integral - derivative;
        self.constrain_output();

        self.previous_input = self.input;
        self.previous_calc_ms = Some(now_ms);
        Some(self.output)
    }

    fn constrain_output(&mut self) {
        let clamped = self.output.clamp(self.output_min, self.output_max);
        if clamped != self.output {
            self.output = clamped;
            self.integral = self.output - self.kp * self.last_error
                + self.kd * (self.input - self.previous_input);
        }
    }

    fn sign(&self) -> f32 {
        match self.direction {
            Direction::Direct => 1.0,
            Direction::Reverse => -1.0,
        }
    }
}
