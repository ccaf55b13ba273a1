// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Incremental PID controller for motor loops.
//!
//! Works in `no_std` and does not allocate memory.
//!
//! The controller works in delta form: every call adds a correction to the previous output
//! instead of recomputing it from an integral sum.
//!
//! ```text
//! u[k] = u[k-1] + Kp·(e[k] - e[k-1]) + Ki·e[k] + Kd·(e[k] - 2·e[k-1] + e[k-2])
//! ```
//!
//! Clamping the accumulated output is the anti-windup: once the output saturates, further error
//! of the same sign cannot push it further, and an error reversal unwinds it immediately. The
//! sampling period is folded into the gains, so `calculate` must be called at a fixed rate.

/// Gains and output limit for a [`Pid`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidConfig {
    /// Proportional gain
    pub kp: f32,
    /// Integral gain
    pub ki: f32,
    /// Derivative gain
    pub kd: f32,
    /// Symmetric output clamp, must be non-negative
    pub abs_output_max: f32,
}

impl PidConfig {
    pub const fn new(kp: f32, ki: f32, kd: f32, abs_output_max: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            abs_output_max,
        }
    }
}

/// PID controller with tunable gains and output clamping.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Pid {
    kp: f32,
    ki: f32,
    kd: f32,
    abs_output_max: f32,

    /// Setpoint
    target: f32,
    /// Last measurement passed to `calculate`
    feedback: f32,
    /// Error of the current step
    error: f32,
    /// Error one step back
    prev_error1: f32,
    /// Error two steps back
    prev_error2: f32,
    /// Accumulated output
    output: f32,
}

impl Pid {
    /// Create a controller from `config` with all history cleared.
    pub fn new(config: PidConfig) -> Self {
        let mut pid = Self::default();
        pid.init(config);
        pid
    }

    /// A controller with zero gains and zero clamp. Its output is always 0.
    pub const fn disabled() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            abs_output_max: 0.0,
            target: 0.0,
            feedback: 0.0,
            error: 0.0,
            prev_error1: 0.0,
            prev_error2: 0.0,
            output: 0.0,
        }
    }

    /// Reset all runtime state and load new gains. Safe to call on a running loop.
    pub fn init(&mut self, config: PidConfig) {
        *self = Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            abs_output_max: config.abs_output_max,
            ..Self::disabled()
        };
    }

    /// Set the desired value.
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Error of the most recent step.
    #[inline]
    pub fn error(&self) -> f32 {
        self.error
    }

    /// Errors one and two steps back.
    #[inline]
    pub fn previous_errors(&self) -> (f32, f32) {
        (self.prev_error1, self.prev_error2)
    }

    #[inline]
    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn config(&self) -> PidConfig {
        PidConfig::new(self.kp, self.ki, self.kd, self.abs_output_max)
    }

    /// Run one step against `feedback` and return the clamped output.
    pub fn calculate(&mut self, feedback: f32) -> f32 {
        self.feedback = feedback;
        self.error = self.target - feedback;

        self.output += self.kp * (self.error - self.prev_error1)
            + self.ki * self.error
            + self.kd * (self.error - 2.0 * self.prev_error1 + self.prev_error2);

        // ----- Output clamp -----
        if self.output > self.abs_output_max {
            self.output = self.abs_output_max;
        }
        if self.output < -self.abs_output_max {
            self.output = -self.abs_output_max;
        }

        self.prev_error2 = self.prev_error1;
        self.prev_error1 = self.error;

        self.output
    }
}
