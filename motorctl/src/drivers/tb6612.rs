// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Brushed DC motor on a TB6612-style H-bridge with a quadrature encoder.
//!
//! Split in two halves:
//! - [`HBridgeMotor`] owns the kinematic state. It is fed encoder count deltas from a timer sampled
//!   at a fixed period and stores the duty the controller asks for. It never touches hardware, so it
//!   can sit behind the shared [`Motor`](crate::motors::Motor) handle.
//! - [`Tb6612`] owns the direction pins and PWM channel and pushes a pending duty to the bridge.
//!
//! Direction truth table:
//! - duty >= 0: IN1 low, IN2 high
//! - duty < 0:  IN1 high, IN2 low
//! - brake:     IN1 high, IN2 high, PWM 0

use crate::motors::shared::Shared;

use core::fmt;
use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};
use micromath::F32Ext;

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HBridgeConfig {
    /// Encoder counts per motor shaft revolution, after quadrature decoding.
    pub counts_per_rev: u32,
    /// Gearbox reduction between shaft and output.
    pub reduction: f32,
    /// Encoder sampling period (s).
    pub sampling_period_s: f32,
    /// Motor wired so that positive duty turns the output backwards.
    pub motor_reverse: bool,
    /// Encoder counts down when the motor shaft turns forward.
    pub encoder_reverse: bool,
}

impl HBridgeConfig {
    pub const fn new(counts_per_rev: u32, reduction: f32, sampling_period_s: f32) -> Self {
        Self {
            counts_per_rev,
            reduction,
            sampling_period_s,
            motor_reverse: false,
            encoder_reverse: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HBridgeFeedback {
    pub frames: u32,
    /// Output angle (deg), accumulated from encoder deltas.
    pub angle: f32,
    /// Output speed over the last sampling period (rpm).
    pub velocity: f32,
}

pub struct HBridgeMotor {
    config: HBridgeConfig,
    /// Output degrees per encoder count, including direction.
    deg_per_count: f32,
    feedback: Shared<HBridgeFeedback>,
    duty: Shared<f32>,
}

impl HBridgeMotor {
    pub fn new(config: HBridgeConfig) -> Self {
        let sign = if config.encoder_reverse ^ config.motor_reverse {
            -1.0
        } else {
            1.0
        };
        let counts = config.counts_per_rev.max(1) as f32;
        let reduction = if config.reduction > 0.0 {
            config.reduction
        } else {
            1.0
        };

        Self {
            config,
            deg_per_count: sign * 360.0 / (counts * reduction),
            feedback: Shared::new(HBridgeFeedback::default()),
            duty: Shared::new(0.0),
        }
    }

    #[inline]
    pub fn config(&self) -> &HBridgeConfig {
        &self.config
    }

    #[inline]
    pub fn feedback(&self) -> HBridgeFeedback {
        self.feedback.get()
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.feedback.get().angle
    }

    #[inline]
    pub fn velocity(&self) -> f32 {
        self.feedback.get().velocity
    }

    /// Fold in the encoder counts accumulated since the previous sample. Call once per
    /// `sampling_period_s` and clear the hardware counter afterwards.
    pub fn decode_encoder(&self, count: i16) {
        let delta = count as f32 * self.deg_per_count;
        let period = self.config.sampling_period_s;
        self.feedback.update(|fb| {
            fb.angle += delta;
            fb.velocity = if period > 0.0 {
                delta / period / 360.0 * 60.0
            } else {
                0.0
            };
            fb.frames = fb.frames.wrapping_add(1);
        });
    }

    pub fn reset_angle(&self) {
        self.feedback.update(|fb| fb.angle = 0.0);
    }

    /// Store a duty in [-1, 1] for the next [`Tb6612::apply`]. Out-of-range values are clamped.
    pub fn set_duty(&self, duty: f32) {
        let duty = duty.max(-1.0).min(1.0);
        let duty = if self.config.motor_reverse { -duty } else { duty };
        self.duty.set(duty);
    }

    /// Pending duty as it will reach the bridge (direction already applied).
    #[inline]
    pub fn duty(&self) -> f32 {
        self.duty.get()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeError {
    /// A direction pin could not be driven.
    Pin,
    /// The PWM channel rejected the compare value.
    Pwm,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Pin => f.write_str("direction pin write failed"),
            BridgeError::Pwm => f.write_str("PWM duty update failed"),
        }
    }
}

/// TB6612 channel: two direction inputs and one PWM input.
pub struct Tb6612<IN1, IN2, PWM> {
    in1: IN1,
    in2: IN2,
    pwm: PWM,
}

impl<IN1, IN2, PWM> Tb6612<IN1, IN2, PWM>
where
    IN1: OutputPin,
    IN2: OutputPin,
    PWM: SetDutyCycle,
{
    /// Take the pins and leave the bridge coasting at zero duty.
    pub fn new(mut in1: IN1, mut in2: IN2, mut pwm: PWM) -> Result<Self, BridgeError> {
        in1.set_low().map_err(|_| BridgeError::Pin)?;
        in2.set_low().map_err(|_| BridgeError::Pin)?;
        pwm.set_duty_cycle_fully_off().map_err(|_| BridgeError::Pwm)?;
        Ok(Self { in1, in2, pwm })
    }

    /// Drive the bridge at `duty` in [-1, 1].
    pub fn set_duty(&mut self, duty: f32) -> Result<(), BridgeError> {
        if duty >= 0.0 {
            self.in1.set_low().map_err(|_| BridgeError::Pin)?;
            self.in2.set_high().map_err(|_| BridgeError::Pin)?;
        } else {
            self.in1.set_high().map_err(|_| BridgeError::Pin)?;
            self.in2.set_low().map_err(|_| BridgeError::Pin)?;
        }

        let max = self.pwm.max_duty_cycle();
        let compare = (duty.abs().min(1.0) * max as f32).round() as u16;
        self.pwm
            .set_duty_cycle(compare.min(max))
            .map_err(|_| BridgeError::Pwm)
    }

    /// Short the motor terminals.
    pub fn brake(&mut self) -> Result<(), BridgeError> {
        self.in1.set_high().map_err(|_| BridgeError::Pin)?;
        self.in2.set_high().map_err(|_| BridgeError::Pin)?;
        self.pwm
            .set_duty_cycle_fully_off()
            .map_err(|_| BridgeError::Pwm)
    }

    /// Push the duty pending on `motor`.
    #[inline]
    pub fn apply(&mut self, motor: &HBridgeMotor) -> Result<(), BridgeError> {
        self.set_duty(motor.duty())
    }

    pub fn free(self) -> (IN1, IN2, PWM) {
        (self.in1, self.in2, self.pwm)
    }
}
