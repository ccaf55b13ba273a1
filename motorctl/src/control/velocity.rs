// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Speed controller for any [`Motor`].
//!
//! Call [`VelocityController::update`] at the fixed rate the PID gains were tuned for. Depending
//! on the control mode the controller either closes the loop itself (PID on measured rpm, output
//! through [`Motor::apply_output`]) or forwards the reference to the motor's own velocity loop.
//!
//! Typical usage pattern:
//!
//! ```ignore
//! ctrl.set_reference(1000.0, &mut can)?;
//!
//! loop {
//!     ctrl.update(&mut can)?;
//!     wait_for_tick();
//! }
//! ```

use crate::bus::{CanTx, TxError};
use crate::control::pid::{Pid, PidConfig};
use crate::motors::{ControlMode, Motor};

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VelocityConfig {
    /// Gains for the speed loop. Clamp it to the motor's maximum output.
    pub pid: PidConfig,
    /// `None` selects the motor's default mode.
    pub control_mode: Option<ControlMode>,
}

/// What [`VelocityController::update`] does on the next tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VelocityState {
    Disabled,
    ExternalPid,
    InternalLoop,
}

pub struct VelocityController<'a> {
    motor: Motor<'a>,
    pid: Pid,
    mode: ControlMode,
    enabled: bool,

    /// Target speed (rpm)
    reference: f32,
}

impl<'a> VelocityController<'a> {
    /// Create an enabled controller for `motor`.
    pub fn new(motor: impl Into<Motor<'a>>, config: VelocityConfig) -> Self {
        let mut ctrl = Self {
            motor: motor.into(),
            pid: Pid::disabled(),
            mode: ControlMode::ExternalPid,
            enabled: false,
            reference: 0.0,
        };
        ctrl.init(config);
        ctrl
    }

    /// Reload configuration, clear the reference and PID history, and enable.
    pub fn init(&mut self, config: VelocityConfig) {
        self.mode = config
            .control_mode
            .unwrap_or_else(|| self.motor.default_control_mode());
        self.pid = match self.mode {
            ControlMode::ExternalPid => Pid::new(config.pid),
            _ => Pid::disabled(),
        };
        self.reference = 0.0;
        self.enabled = true;
        debug!("velocity ctrl: {}", self.mode);
    }

    #[inline]
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop issuing commands. The last stored output stays on the motor.
    #[inline]
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> VelocityState {
        match (self.enabled, self.mode) {
            (false, _) => VelocityState::Disabled,
            (true, ControlMode::ExternalPid) => VelocityState::ExternalPid,
            (true, _) => VelocityState::InternalLoop,
        }
    }

    #[inline]
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    #[inline]
    pub fn motor(&self) -> Motor<'a> {
        self.motor
    }

    #[inline]
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Target speed (rpm).
    #[inline]
    pub fn reference(&self) -> f32 {
        self.reference
    }

    /// Latest PID output. Always 0 when the motor closes the loop.
    #[inline]
    pub fn output(&self) -> f32 {
        self.pid.output()
    }

    /// Set the target speed (rpm).
    ///
    /// Motors that drop a setpoint unless it is refreshed get it sent right away.
    pub fn set_reference<T: CanTx>(&mut self, rpm: f32, tx: &mut T) -> Result<(), TxError> {
        self.reference = rpm;
        self.pid.set_target(rpm);

        if self.state() == VelocityState::InternalLoop && self.motor.keeps_alive_on_reference() {
            self.update(tx)?;
        }
        Ok(())
    }

    /// Run one control tick.
    pub fn update<T: CanTx>(&mut self, tx: &mut T) -> Result<(), TxError> {
        match self.state() {
            VelocityState::Disabled => Ok(()),
            VelocityState::InternalLoop => self.motor.send_internal_velocity(tx, self.reference),
            VelocityState::ExternalPid => {
                let out = self.pid.calculate(self.motor.velocity());
                self.motor.apply_output(out);
                Ok(())
            }
        }
    }
}
