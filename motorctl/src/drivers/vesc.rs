// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! VESC speed controllers on CAN.
//!
//! VESC uses 29-bit identifiers: `ExtID = command << 8 | controller_id`. Status packets are
//! broadcast periodically; setpoints must be refreshed faster than the VESC's CAN timeout or it
//! releases the motor.

use crate::bus::{BusId, CanTx, TxError};
use crate::motors::shared::Shared;

use bxcan::{Data, ExtendedId, Frame};
use micromath::F32Ext;

/// CAN command / status numbers used here.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum VescPacket {
    SetDuty = 0,
    SetCurrent = 1,
    SetRpm = 3,
    Status = 9,
    Status5 = 27,
}

impl VescPacket {
    pub fn from_u8(cmd: u8) -> Option<Self> {
        match cmd {
            0 => Some(Self::SetDuty),
            1 => Some(Self::SetCurrent),
            3 => Some(Self::SetRpm),
            9 => Some(Self::Status),
            27 => Some(Self::Status5),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VescConfig {
    pub bus: BusId,
    pub id: u8,
    /// Electrical RPM per mechanical RPM.
    pub pole_pairs: u8,
}

impl VescConfig {
    pub const fn new(bus: BusId, id: u8, pole_pairs: u8) -> Self {
        Self { bus, id, pole_pairs }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VescFeedback {
    pub frames: u32,
    pub erpm: i32,
    /// Motor current (A).
    pub current: f32,
    /// Duty cycle, -1.0..=1.0.
    pub duty: f32,
    pub tachometer: i32,
    /// Input voltage (V).
    pub voltage_in: f32,
    pub tacho_zero: i32,
    /// Mechanical angle from the tachometer (deg).
    pub angle: f32,
    /// Mechanical speed (rpm).
    pub velocity: f32,
}

/// One VESC on a bus.
pub struct VescMotor {
    config: VescConfig,
    feedback: Shared<VescFeedback>,
}

impl VescMotor {
    pub fn new(config: VescConfig) -> Self {
        let pole_pairs = config.pole_pairs.max(1);
        Self {
            config: VescConfig {
                pole_pairs,
                ..config
            },
            feedback: Shared::new(VescFeedback::default()),
        }
    }

    #[inline]
    pub fn config(&self) -> &VescConfig {
        &self.config
    }

    #[inline]
    pub fn bus(&self) -> BusId {
        self.config.bus
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.config.id
    }

    #[inline]
    pub fn feedback(&self) -> VescFeedback {
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

    /// Tachometer steps per mechanical degree. The tachometer counts six steps per electrical
    /// revolution.
    fn tacho_per_deg(&self) -> f32 {
        6.0 * self.config.pole_pairs as f32 / 360.0
    }

    pub fn reset_angle(&self) {
        self.feedback.update(|fb| {
            fb.tacho_zero = fb.tachometer;
            fb.angle = 0.0;
        });
    }

    /// Decode a status packet. Returns `false` for packets this driver does not read or payloads
    /// that are too short.
    pub fn decode(&self, packet: VescPacket, data: &[u8]) -> bool {
        let pole_pairs = self.config.pole_pairs as f32;
        let tacho_per_deg = self.tacho_per_deg();

        match packet {
            VescPacket::Status if data.len() >= 8 => {
                let erpm = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let current = i16::from_be_bytes([data[4], data[5]]) as f32 / 10.0;
                let duty = i16::from_be_bytes([data[6], data[7]]) as f32 / 1000.0;
                self.feedback.update(|fb| {
                    fb.erpm = erpm;
                    fb.current = current;
                    fb.duty = duty;
                    fb.velocity = erpm as f32 / pole_pairs;
                    fb.frames = fb.frames.wrapping_add(1);
                });
                true
            }
            VescPacket::Status5 if data.len() >= 6 => {
                let tacho = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let voltage_in = i16::from_be_bytes([data[4], data[5]]) as f32 / 10.0;
                self.feedback.update(|fb| {
                    fb.tachometer = tacho;
                    fb.voltage_in = voltage_in;
                    fb.angle = tacho.wrapping_sub(fb.tacho_zero) as f32 / tacho_per_deg;
                    fb.frames = fb.frames.wrapping_add(1);
                });
                true
            }
            _ => false,
        }
    }

    fn frame(&self, packet: VescPacket, value: i32) -> Frame {
        let raw = (packet as u32) << 8 | self.config.id as u32;
        // an 8-bit command and an 8-bit id always fit in 29 bits
        let id = ExtendedId::new(raw).unwrap_or(ExtendedId::ZERO);
        Frame::new_data(id, Data::from(value.to_be_bytes()))
    }

    /// Mechanical rpm setpoint, sent as ERPM.
    pub fn encode_rpm(&self, rpm: f32) -> Frame {
        let erpm = (rpm * self.config.pole_pairs as f32).round() as i32;
        self.frame(VescPacket::SetRpm, erpm)
    }

    /// Current setpoint in amps, sent as milliamps.
    pub fn encode_current(&self, amps: f32) -> Frame {
        self.frame(VescPacket::SetCurrent, (amps * 1000.0).round() as i32)
    }

    /// Duty setpoint, -1.0..=1.0, sent scaled by 100 000.
    pub fn encode_duty(&self, duty: f32) -> Frame {
        let duty = duty.max(-1.0).min(1.0);
        self.frame(VescPacket::SetDuty, (duty * 100_000.0).round() as i32)
    }

    pub fn send_rpm<T: CanTx>(&self, tx: &mut T, rpm: f32) -> Result<(), TxError> {
        tx.transmit(&self.encode_rpm(rpm))
    }

    pub fn send_current<T: CanTx>(&self, tx: &mut T, amps: f32) -> Result<(), TxError> {
        tx.transmit(&self.encode_current(amps))
    }

    pub fn send_duty<T: CanTx>(&self, tx: &mut T, duty: f32) -> Result<(), TxError> {
        tx.transmit(&self.encode_duty(duty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motor() -> VescMotor {
        VescMotor::new(VescConfig::new(BusId::CAN2, 12, 7))
    }

    fn ext_id(frame: &Frame) -> u32 {
        match frame.id() {
            bxcan::Id::Extended(id) => id.as_raw(),
            bxcan::Id::Standard(_) => panic!("standard id"),
        }
    }

    #[test]
    fn status_reports_mechanical_rpm() {
        let m = motor();
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&7000i32.to_be_bytes());
        data[4..6].copy_from_slice(&(-125i16).to_be_bytes());
        data[6..].copy_from_slice(&500i16.to_be_bytes());
        assert!(m.decode(VescPacket::Status, &data));

        let fb = m.feedback();
        assert_eq!(fb.erpm, 7000);
        assert_eq!(m.velocity(), 1000.0);
        assert!((fb.current + 12.5).abs() < 1e-4);
        assert!((fb.duty - 0.5).abs() < 1e-4);
    }

    #[test]
    fn tachometer_gives_angle_relative_to_zero() {
        let m = motor();
        let mut data = [0u8; 8];
        // one mechanical revolution is 6 * pole_pairs steps
        data[..4].copy_from_slice(&42i32.to_be_bytes());
        data[4..6].copy_from_slice(&240i16.to_be_bytes());
        assert!(m.decode(VescPacket::Status5, &data));
        assert!((m.angle() - 360.0).abs() < 1e-3);
        assert!((m.feedback().voltage_in - 24.0).abs() < 1e-4);

        m.reset_angle();
        assert_eq!(m.angle(), 0.0);
        data[..4].copy_from_slice(&63i32.to_be_bytes());
        m.decode(VescPacket::Status5, &data);
        assert!((m.angle() - 180.0).abs() < 1e-3);
    }

    #[test]
    fn rpm_command_layout() {
        let frame = motor().encode_rpm(1000.0);
        assert_eq!(ext_id(&frame), 0x30C);
        assert_eq!(&frame.data().unwrap()[..], &7000i32.to_be_bytes());
    }

    #[test]
    fn duty_command_is_clamped() {
        let frame = motor().encode_duty(3.0);
        assert_eq!(ext_id(&frame), 0x00C);
        assert_eq!(&frame.data().unwrap()[..], &100_000i32.to_be_bytes());
    }

    #[test]
    fn current_command_in_milliamps() {
        let frame = motor().encode_current(-2.5);
        assert_eq!(ext_id(&frame), 0x10C);
        assert_eq!(&frame.data().unwrap()[..], &(-2500i32).to_be_bytes());
    }

    #[test]
    fn ignores_unread_packets_and_short_payloads() {
        let m = motor();
        assert!(!m.decode(VescPacket::SetRpm, &[0; 8]));
        assert!(!m.decode(VescPacket::Status, &[0; 4]));
        assert_eq!(m.feedback().frames, 0);
    }
}
