// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Motor Abstraction
//!
//! [`Motor`] is the one handle controllers hold. It borrows a backend driver and presents every
//! family the same way: a multi-turn output angle in degrees, an output speed in rpm, and a
//! scalar output command whose unit is backend-specific (current, torque, duty).
//!
//! Backends that close their own loops also get the two internal hooks,
//! [`Motor::send_internal_velocity`] and [`Motor::send_internal_position`]. Where a backend lacks a
//! capability the call is an inert `Ok(())`.
//!
//! ## Modules
//!
//! - [`shared`] - Interrupt-safe telemetry cell used by every driver.

pub mod shared;

use crate::bus::{CanTx, TxError};
use crate::drivers::{DjiMotor, DmMode, DmMotor, HBridgeMotor, VescMotor};

/// Which loop a controller closes for a given motor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMode {
    /// Controller runs its own PIDs and writes through [`Motor::apply_output`].
    ExternalPid,
    /// The motor runs the velocity loop; the controller sends speed setpoints.
    InternalVelocity,
    /// The motor runs both position and velocity loops; the controller sends angle setpoints.
    InternalVelocityPosition,
}

/// One consistent reading of a motor's feedback.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    /// Multi-turn output angle (deg).
    pub angle: f32,
    /// Output speed (rpm).
    pub velocity: f32,
    /// Feedback frames (or encoder samples) decoded so far.
    pub frames: u32,
}

#[derive(Copy, Clone)]
pub enum Motor<'a> {
    Dji(&'a DjiMotor),
    Dm(&'a DmMotor),
    HBridge(&'a HBridgeMotor),
    Vesc(&'a VescMotor),
}

impl<'a> Motor<'a> {
    /// Multi-turn output angle (deg).
    pub fn angle(&self) -> f32 {
        match self {
            Motor::Dji(m) => m.angle(),
            Motor::Dm(m) => m.angle(),
            Motor::HBridge(m) => m.angle(),
            Motor::Vesc(m) => m.angle(),
        }
    }

    /// Output speed (rpm).
    pub fn velocity(&self) -> f32 {
        match self {
            Motor::Dji(m) => m.velocity(),
            Motor::Dm(m) => m.velocity(),
            Motor::HBridge(m) => m.velocity(),
            Motor::Vesc(m) => m.velocity(),
        }
    }

    /// Angle, speed and frame count taken from a single snapshot.
    pub fn telemetry(&self) -> Telemetry {
        match self {
            Motor::Dji(m) => {
                let fb = m.feedback();
                Telemetry {
                    angle: fb.abs_angle,
                    velocity: fb.velocity,
                    frames: fb.frames,
                }
            }
            Motor::Dm(m) => {
                let fb = m.feedback();
                Telemetry {
                    angle: fb.abs_angle,
                    velocity: fb.velocity,
                    frames: fb.frames,
                }
            }
            Motor::HBridge(m) => {
                let fb = m.feedback();
                Telemetry {
                    angle: fb.angle,
                    velocity: fb.velocity,
                    frames: fb.frames,
                }
            }
            Motor::Vesc(m) => {
                let fb = m.feedback();
                Telemetry {
                    angle: fb.angle,
                    velocity: fb.velocity,
                    frames: fb.frames,
                }
            }
        }
    }

    /// Store the external-loop output for the next flush.
    ///
    /// | Backend | Unit |
    /// | ------- | ---- |
    /// | Dji | raw current command |
    /// | Dm | torque (N·m) |
    /// | HBridge | duty, -1..=1 |
    /// | Vesc | ignored |
    pub fn apply_output(&self, value: f32) {
        match self {
            Motor::Dji(m) => m.set_current(value),
            Motor::Dm(m) => m.set_torque(value),
            Motor::HBridge(m) => m.set_duty(value),
            Motor::Vesc(_) => {}
        }
    }

    /// Send a speed setpoint (rpm) to a motor that runs its own velocity loop.
    pub fn send_internal_velocity<T: CanTx>(&self, tx: &mut T, rpm: f32) -> Result<(), TxError> {
        match self {
            Motor::Dm(m) => m.send_velocity(tx, rpm),
            Motor::Vesc(m) => m.send_rpm(tx, rpm),
            Motor::Dji(_) | Motor::HBridge(_) => Ok(()),
        }
    }

    /// Send an angle setpoint (deg) to a motor that runs its own position loop.
    pub fn send_internal_position<T: CanTx>(
        &self,
        tx: &mut T,
        angle_deg: f32,
    ) -> Result<(), TxError> {
        match self {
            Motor::Dm(m) => m.send_position(tx, angle_deg),
            Motor::Dji(_) | Motor::HBridge(_) | Motor::Vesc(_) => Ok(()),
        }
    }

    /// Make the present angle the new zero.
    pub fn reset_angle(&self) {
        match self {
            Motor::Dji(m) => m.reset_angle(),
            Motor::Dm(m) => m.reset_angle(),
            Motor::HBridge(m) => m.reset_angle(),
            Motor::Vesc(m) => m.reset_angle(),
        }
    }

    pub fn default_control_mode(&self) -> ControlMode {
        match self {
            Motor::Dji(_) | Motor::HBridge(_) => ControlMode::ExternalPid,
            Motor::Dm(m) => match m.mode() {
                DmMode::Mit => ControlMode::ExternalPid,
                DmMode::Velocity => ControlMode::InternalVelocity,
                DmMode::Position => ControlMode::InternalVelocityPosition,
            },
            Motor::Vesc(_) => ControlMode::InternalVelocity,
        }
    }

    /// Whether the motor drops its setpoint unless it is refreshed, so a new reference must go out
    /// immediately instead of waiting for the next tick.
    pub fn keeps_alive_on_reference(&self) -> bool {
        matches!(self, Motor::Vesc(_))
    }
}

impl<'a> From<&'a DjiMotor> for Motor<'a> {
    fn from(m: &'a DjiMotor) -> Self {
        Motor::Dji(m)
    }
}

impl<'a> From<&'a DmMotor> for Motor<'a> {
    fn from(m: &'a DmMotor) -> Self {
        Motor::Dm(m)
    }
}

impl<'a> From<&'a HBridgeMotor> for Motor<'a> {
    fn from(m: &'a HBridgeMotor) -> Self {
        Motor::HBridge(m)
    }
}

impl<'a> From<&'a VescMotor> for Motor<'a> {
    fn from(m: &'a VescMotor) -> Self {
        Motor::Vesc(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusId;
    use crate::drivers::{DjiConfig, DjiKind, DmConfig, DmKind, HBridgeConfig, VescConfig};
    use bxcan::Frame;

    struct Recorder(Vec<Frame>);

    impl CanTx for Recorder {
        fn transmit(&mut self, frame: &Frame) -> Result<(), TxError> {
            self.0.push(frame.clone());
            Ok(())
        }
    }

    #[test]
    fn dji_output_becomes_current_command() {
        let dji = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1));
        let motor = Motor::from(&dji);
        motor.apply_output(1234.4);
        assert_eq!(dji.current_cmd(), 1234);
    }

    #[test]
    fn internal_hooks_are_inert_without_capability() {
        let dji = DjiMotor::new(DjiConfig::new(DjiKind::M2006C610, BusId::CAN1, 2));
        let vesc = VescMotor::new(VescConfig::new(BusId::CAN1, 5, 7));
        let mut tx = Recorder(Vec::new());

        Motor::from(&dji).send_internal_velocity(&mut tx, 100.0).unwrap();
        Motor::from(&dji).send_internal_position(&mut tx, 90.0).unwrap();
        Motor::from(&vesc).send_internal_position(&mut tx, 90.0).unwrap();
        Motor::from(&vesc).apply_output(10.0);
        assert!(tx.0.is_empty());

        Motor::from(&vesc).send_internal_velocity(&mut tx, 100.0).unwrap();
        assert_eq!(tx.0.len(), 1);
    }

    #[test]
    fn dm_mode_selects_default_control_mode() {
        let position = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 1, DmMode::Position));
        let velocity = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 2, DmMode::Velocity));
        let mit = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 3, DmMode::Mit));
        assert_eq!(
            Motor::from(&position).default_control_mode(),
            ControlMode::InternalVelocityPosition
        );
        assert_eq!(
            Motor::from(&velocity).default_control_mode(),
            ControlMode::InternalVelocity
        );
        assert_eq!(Motor::from(&mit).default_control_mode(), ControlMode::ExternalPid);
    }

    #[test]
    fn telemetry_and_reset_on_hbridge() {
        let hb = HBridgeMotor::new(HBridgeConfig::new(100, 1.0, 0.01));
        let motor = Motor::from(&hb);
        hb.decode_encoder(25);
        let t = motor.telemetry();
        assert_eq!(t.frames, 1);
        assert!((t.angle - 90.0).abs() < 1e-4);
        assert_eq!(t.angle, motor.angle());
        assert_eq!(t.velocity, motor.velocity());

        motor.reset_angle();
        assert_eq!(motor.angle(), 0.0);
    }

    #[test]
    fn only_vesc_needs_keep_alive() {
        let dji = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1));
        let vesc = VescMotor::new(VescConfig::new(BusId::CAN1, 1, 7));
        assert!(!Motor::from(&dji).keeps_alive_on_reference());
        assert!(Motor::from(&vesc).keeps_alive_on_reference());
    }
}
