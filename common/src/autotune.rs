//! SIMC step-response autotune for a PI controller.
//!
//! The experiment holds the output at half range until the process settles,
//! steps it up by 30%, drops it to zero until the process falls back, and
//! finally steps up again to time the 63% rise. Dead time and the process
//! time constant measured on the way give the new gains.

use tracing::{debug, info, warn};

use crate::pid::{Direction, Gains, PidController};

/// Dead time is taken as this many samples before the first visible move.
const DEAD_TIME_SAMPLES: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TunePhase {
    StabilizeLow,
    StepHigh,
    StepBack,
    MeasureRiseTime,
    Done,
}

/// Gains estimated from a completed experiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    pub gains: Gains,
    pub dead_time_ms: f32,
    pub process_time_ms: u64,
}

impl TuneResult {
    /// Time the process needs to settle after a step.
    pub fn stable_time_ms(&self) -> u32 {
        (self.process_time_ms as f32 * 100.0 / 63.0) as u32
    }
}

#[derive(Debug, Clone)]
pub struct Autotune {
    phase: TunePhase,
    output_low: f32,
    output_high: f32,
    steady_threshold: u16,
    noise_threshold: f32,
    steady_count: u16,
    input_start: f32,
    input_change: f32,
    previous_input: f32,
    phase_start_ms: u64,
    first_move_ms: Option<u64>,
    theta1_ms: u64,
    theta2_ms: u64,
    process_time_ms: u64,
    result: Option<TuneResult>,
}

impl Autotune {
    pub fn new(pid: &PidController, steady_threshold: u16, noise_threshold: f32, now_ms: u64) -> Self {
        let (min, max) = pid.output_limits();
        let output_low = min / 2.0 + max / 2.0;
        Self {
            phase: TunePhase::StabilizeLow,
            output_low,
            output_high: 1.3 * output_low,
            steady_threshold,
            noise_threshold,
            steady_count: 0,
            input_start: pid.input(),
            input_change: 0.0,
            previous_input: pid.input(),
            phase_start_ms: now_ms,
            first_move_ms: None,
            theta1_ms: 0,
            theta2_ms: 0,
            process_time_ms: 0,
            result: None,
        }
    }

    pub fn phase(&self) -> TunePhase {
        self.phase
    }

    pub fn result(&self) -> Option<&TuneResult> {
        self.result.as_ref()
    }

    /// Runs one experiment step against the current input and forces the
    /// controller output. Returns true once the experiment is over.
    pub fn tune_step(&mut self, pid: &mut PidController, now_ms: u64) -> bool {
        let input = pid.input();
        let finished = match self.phase {
            TunePhase::StabilizeLow => {
                pid.force_output(self.output_low);
                self.settle(input, now_ms, pid.time_step_ms())
                    .map(|theta| self.theta1_ms = theta)
                    .is_some()
            }
            TunePhase::StepHigh => {
                pid.force_output(self.output_high);
                match self.settle(input, now_ms, pid.time_step_ms()) {
                    Some(theta) => {
                        self.theta2_ms = theta;
                        self.input_change = (input - self.input_start).abs();
                        true
                    }
                    None => false,
                }
            }
            TunePhase::StepBack => {
                pid.force_output(0.0);
                let baseline = match pid.direction() {
                    Direction::Direct => self.input_start - self.input_change,
                    Direction::Reverse => self.input_start + self.input_change,
                };
                match pid.direction() {
                    Direction::Direct => input <= baseline + self.noise_threshold,
                    Direction::Reverse => input >= baseline - self.noise_threshold,
                }
            }
            TunePhase::MeasureRiseTime => {
                pid.force_output(self.output_high);
                let rise = match pid.direction() {
                    Direction::Direct => input - self.input_start,
                    Direction::Reverse => self.input_start - input,
                };
                if rise >= 0.63 * self.input_change {
                    self.process_time_ms = now_ms.saturating_sub(self.phase_start_ms);
                    true
                } else {
                    false
                }
            }
            TunePhase::Done => return true,
        };

        self.previous_input = input;
        if !finished {
            return false;
        }

        self.advance(input, now_ms);
        if self.phase == TunePhase::Done {
            self.finish(pid);
            return true;
        }
        false
    }

    /// Stabilization check shared by the first two phases. Returns the dead
    /// time once the input has moved past the noise band and then stayed
    /// quiet for more than `steady_threshold` samples.
    fn settle(&mut self, input: f32, now_ms: u64, time_step_ms: u32) -> Option<u64> {
        let moved = (input - self.input_start).abs() >= self.noise_threshold;
        if !moved {
            return None;
        }
        if self.first_move_ms.is_none() {
            self.first_move_ms = Some(now_ms);
        }

        if (input - self.previous_input).abs() <= self.noise_threshold {
            self.steady_count = self.steady_count.saturating_add(1);
        } else {
            self.steady_count = 0;
        }

        if self.steady_count <= self.steady_threshold {
            return None;
        }
        let moved_at = self
            .first_move_ms
            .unwrap_or(now_ms)
            .saturating_sub(DEAD_TIME_SAMPLES * u64::from(time_step_ms));
        Some(moved_at.saturating_sub(self.phase_start_ms))
    }

    fn advance(&mut self, input: f32, now_ms: u64) {
        let next = match self.phase {
            TunePhase::StabilizeLow => TunePhase::StepHigh,
            TunePhase::StepHigh => TunePhase::StepBack,
            TunePhase::StepBack => TunePhase::MeasureRiseTime,
            TunePhase::MeasureRiseTime | TunePhase::Done => TunePhase::Done,
        };
        debug!(from = ?self.phase, to = ?next, input, "autotune phase finished");
        self.phase = next;
        self.steady_count = 0;
        self.first_move_ms = None;
        self.phase_start_ms = now_ms;
        self.input_start = input;
    }

    fn finish(&mut self, pid: &mut PidController) {
        let theta = (self.theta1_ms + self.theta2_ms) as f32 / 2.0;
        let process_time = self.process_time_ms.max(1) as f32;
        let output_change = self.output_high - self.output_low;

        let slope = self.input_change / (output_change * process_time);
        let tau_c = process_time.max(8.0 * theta);
        let kc = (1.0 / slope) * (1.0 / (theta + tau_c));
        let gains = Gains {
            kp: kc,
            ki: kc / process_time,
            kd: 0.0,
        };

        if !(gains.kp.is_finite() && gains.ki.is_finite() && gains.kp > 0.0 && gains.ki > 0.0) {
            warn!(
                input_change = self.input_change,
                process_time_ms = self.process_time_ms,
                "autotune produced unusable gains, keeping current ones"
            );
            return;
        }

        info!(
            kp = gains.kp,
            ki = gains.ki,
            theta_ms = theta,
            process_time_ms = self.process_time_ms,
            "autotune finished"
        );
        pid.set_gains(gains);
        self.result = Some(TuneResult {
            gains,
            dead_time_ms: theta,
            process_time_ms: self.process_time_ms,
        });
    }
}
