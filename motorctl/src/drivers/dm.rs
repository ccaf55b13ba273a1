// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! DM (DaMiao) servo actuators on CAN.
//!
//! Each actuator has a 4-bit slave address and reports on a shared master identifier
//! (`StdID = master_id`, 0x114 unless reconfigured with the vendor tool). Commands go to
//! `StdID = mode | address`, where the mode selects which on-board loop interprets the payload:
//!   - [`DmMode::Mit`] (0x000): direct torque through the MIT impedance frame
//!   - [`DmMode::Position`] (0x100): on-board position + velocity loop
//!   - [`DmMode::Velocity`] (0x200): on-board velocity loop
//!
//! The fixed-point feedback fields are mapped linearly onto `[-max, +max]` ranges that must match
//! the values programmed into the actuator.

use crate::bus::{BusId, CanTx, TxError};
use crate::motors::shared::Shared;

use bxcan::{Data, Frame, StandardId};
use core::f32::consts::{FRAC_PI_2, PI};

/// Default master (feedback) identifier.
pub const DEFAULT_MASTER_ID: u16 = 0x114;

/// Number of frames after which auto-zero captures the zero, unless configured otherwise.
pub const DEFAULT_AUTO_ZERO_FRAMES: u32 = 10;

const RAD_TO_DEG: f32 = 180.0 / PI;
const RPM_TO_RAD_S: f32 = 2.0 * PI / 60.0;

/// Control mode programmed into the actuator; also the command identifier base.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmMode {
    Mit,
    Position,
    Velocity,
}

impl DmMode {
    #[inline]
    pub fn id_base(self) -> u16 {
        match self {
            DmMode::Mit => 0x000,
            DmMode::Position => 0x100,
            DmMode::Velocity => 0x200,
        }
    }
}

/// Supported actuator models.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmKind {
    S3519,
}

impl DmKind {
    /// Built-in gearbox reduction.
    pub fn reduction(self) -> f32 {
        match self {
            DmKind::S3519 => 19.203,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmConfig {
    pub kind: DmKind,
    pub bus: BusId,
    /// Slave address, 0..=15.
    pub id: u8,
    pub master_id: u16,
    pub mode: DmMode,
    /// Position range `PMAX` (rad).
    pub pos_max_rad: f32,
    /// Velocity range `VMAX` (rad/s). Also the speed limit sent with position commands.
    pub vel_max_rad: f32,
    /// Torque range `TMAX` (N·m).
    pub torque_max: f32,
    /// External reduction after the actuator; 0 or negative means none.
    pub reduction: f32,
    /// Flip the sign of every reading and command.
    pub reverse: bool,
    pub auto_zero: bool,
    /// 0 selects [`DEFAULT_AUTO_ZERO_FRAMES`].
    pub auto_zero_frames: u32,
}

impl DmConfig {
    pub fn new(kind: DmKind, bus: BusId, id: u8, mode: DmMode) -> Self {
        Self {
            kind,
            bus,
            id,
            master_id: DEFAULT_MASTER_ID,
            mode,
            pos_max_rad: PI,
            vel_max_rad: 40.0,
            torque_max: 10.0,
            reduction: 1.0,
            reverse: false,
            auto_zero: false,
            auto_zero_frames: DEFAULT_AUTO_ZERO_FRAMES,
        }
    }
}

/// Everything decoded from the feedback stream, updated as a unit.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmFeedback {
    pub frames: u32,
    /// Error / state code from the high nibble of byte 0.
    pub error: u8,
    /// Single-turn position as reported (rad).
    pub position_rad: f32,
    /// Speed as reported (rad/s).
    pub velocity_rad_s: f32,
    /// Torque as reported (N·m).
    pub torque: f32,
    pub temp_mos: i8,
    pub temp_rotor: i8,
    pub rotations: i32,
    /// Angle captured as zero (deg).
    pub angle_zero: f32,
    /// Multi-turn output angle (deg).
    pub abs_angle: f32,
    /// Output speed (rpm).
    pub velocity: f32,
    /// Auto-zero has captured its zero; it never fires again.
    pub auto_zeroed: bool,
}

impl DmFeedback {
    fn reset_angle(&mut self) {
        self.rotations = 0;
        self.angle_zero = self.position_rad * RAD_TO_DEG;
        self.abs_angle = 0.0;
    }
}

/// Map a `bits`-wide unsigned field onto `[min, max]`.
#[inline]
fn uint_to_float(raw: u16, min: f32, max: f32, bits: u32) -> f32 {
    let span = max - min;
    raw as f32 * span / ((1u32 << bits) - 1) as f32 + min
}

/// Map `x` in `[min, max]` onto a `bits`-wide unsigned field, saturating at the ends.
#[inline]
fn float_to_uint(x: f32, min: f32, max: f32, bits: u32) -> u16 {
    let top = ((1u32 << bits) - 1) as f32;
    let x = if x > max {
        max
    } else if x < min {
        min
    } else {
        x
    };
    ((x - min) * top / (max - min)) as u16
}

/// One DM actuator on a bus.
pub struct DmMotor {
    config: DmConfig,
    /// Degrees of output per degree reported, including direction.
    out_scale: f32,
    sign: f32,
    feedback: Shared<DmFeedback>,
    torque_cmd: Shared<f32>,
}

impl DmMotor {
    pub fn new(config: DmConfig) -> Self {
        let external = if config.reduction > 0.0 {
            config.reduction
        } else {
            1.0
        };
        let auto_zero_frames = if config.auto_zero_frames == 0 {
            DEFAULT_AUTO_ZERO_FRAMES
        } else {
            config.auto_zero_frames
        };
        let sign = if config.reverse { -1.0 } else { 1.0 };

        Self {
            config: DmConfig {
                auto_zero_frames,
                ..config
            },
            out_scale: sign / (external * config.kind.reduction()),
            sign,
            feedback: Shared::new(DmFeedback::default()),
            torque_cmd: Shared::new(0.0),
        }
    }

    #[inline]
    pub fn config(&self) -> &DmConfig {
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
    pub fn master_id(&self) -> u16 {
        self.config.master_id
    }

    #[inline]
    pub fn mode(&self) -> DmMode {
        self.config.mode
    }

    #[inline]
    pub fn feedback(&self) -> DmFeedback {
        self.feedback.get()
    }

    /// Multi-turn output angle (deg).
    #[inline]
    pub fn angle(&self) -> f32 {
        self.feedback.get().abs_angle
    }

    /// Output speed (rpm).
    #[inline]
    pub fn velocity(&self) -> f32 {
        self.feedback.get().velocity
    }

    pub fn reset_angle(&self) {
        self.feedback.update(DmFeedback::reset_angle);
    }

    /// Decode one feedback payload.
    ///
    /// Layout:
    ///   - byte 0: address (low nibble), error code (high nibble)
    ///   - bytes 1..=2: position, 16 bit
    ///   - byte 3 + high nibble of byte 4: velocity, 12 bit
    ///   - low nibble of byte 4 + byte 5: torque, 12 bit
    ///   - byte 6: MOS temperature, byte 7: rotor temperature
    ///
    /// Returns `false` (and changes nothing) if the payload is shorter than a feedback frame.
    pub fn decode(&self, data: &[u8]) -> bool {
        if data.len() < 8 {
            return false;
        }

        let cfg = &self.config;
        let p_raw = u16::from_be_bytes([data[1], data[2]]);
        let v_raw = (data[3] as u16) << 4 | (data[4] as u16) >> 4;
        let t_raw = ((data[4] & 0x0F) as u16) << 8 | data[5] as u16;

        let position_rad = uint_to_float(p_raw, -cfg.pos_max_rad, cfg.pos_max_rad, 16);
        let velocity_rad_s = uint_to_float(v_raw, -cfg.vel_max_rad, cfg.vel_max_rad, 12);
        let torque = uint_to_float(t_raw, -cfg.torque_max, cfg.torque_max, 12);
        let angle = position_rad * RAD_TO_DEG;
        let rpm = velocity_rad_s / RPM_TO_RAD_S;

        let out_scale = self.out_scale;
        let sign = self.sign;
        let auto_zero = cfg.auto_zero;
        let auto_zero_frames = cfg.auto_zero_frames;

        let zeroed = self.feedback.update(|fb| {
            // Turn counting compares the new angle in degrees against the previous reading in
            // radians, with a quarter-turn threshold on each side.
            if angle < -90.0 && fb.position_rad >= FRAC_PI_2 {
                fb.rotations += 1;
            }
            if angle > 90.0 && fb.position_rad < -FRAC_PI_2 {
                fb.rotations -= 1;
            }

            fb.position_rad = position_rad;
            fb.velocity_rad_s = velocity_rad_s;
            fb.torque = torque;
            fb.temp_mos = data[6] as i8;
            fb.temp_rotor = data[7] as i8;
            fb.error = data[0] >> 4;

            fb.abs_angle = (fb.rotations as f32 * 360.0 + angle - fb.angle_zero) * out_scale;
            fb.velocity = sign * rpm;
            fb.frames = fb.frames.wrapping_add(1);

            if auto_zero && !fb.auto_zeroed && fb.frames >= auto_zero_frames {
                fb.reset_angle();
                fb.auto_zeroed = true;
                true
            } else {
                false
            }
        });

        if zeroed {
            info!("dm {=u8}: zero captured at {=f32} deg", cfg.id, angle);
        }
        true
    }

    fn frame(&self, mode: DmMode, data: [u8; 8]) -> Frame {
        let raw = mode.id_base() | (self.config.id as u16 & 0x0F);
        // mode bases and a 4-bit address always fit in 11 bits
        let id = StandardId::new(raw).unwrap_or(StandardId::ZERO);
        Frame::new_data(id, Data::from(data))
    }

    /// Velocity-mode setpoint frame: output speed in rpm, sent as `f32` rad/s.
    pub fn encode_velocity(&self, rpm: f32) -> Frame {
        let rad_s = self.sign * rpm * RPM_TO_RAD_S;
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&rad_s.to_le_bytes());
        let raw = DmMode::Velocity.id_base() | (self.config.id as u16 & 0x0F);
        let id = StandardId::new(raw).unwrap_or(StandardId::ZERO);
        // Velocity frames carry only the 4-byte float.
        Frame::new_data(id, Data::new(&buf[..4]).unwrap_or(Data::empty()))
    }

    /// Position-mode setpoint frame: output angle in degrees, followed by the speed limit.
    ///
    /// The angle is relative to the captured zero, like [`DmMotor::angle`].
    pub fn encode_position(&self, angle_deg: f32) -> Frame {
        let zero = self.feedback.get().angle_zero;
        let rad = (angle_deg / self.out_scale + zero) / RAD_TO_DEG;
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&rad.to_le_bytes());
        buf[4..].copy_from_slice(&self.config.vel_max_rad.to_le_bytes());
        self.frame(DmMode::Position, buf)
    }

    /// MIT frame carrying only a feed-forward torque (position, velocity and gains zero).
    pub fn encode_torque(&self, torque: f32) -> Frame {
        let cfg = &self.config;
        let p = float_to_uint(0.0, -cfg.pos_max_rad, cfg.pos_max_rad, 16);
        let v = float_to_uint(0.0, -cfg.vel_max_rad, cfg.vel_max_rad, 12);
        let t = float_to_uint(self.sign * torque, -cfg.torque_max, cfg.torque_max, 12);
        let (kp, kd) = (0u16, 0u16);

        let buf = [
            (p >> 8) as u8,
            p as u8,
            (v >> 4) as u8,
            ((v & 0x0F) << 4 | kp >> 8) as u8,
            kp as u8,
            (kd >> 4) as u8,
            ((kd & 0x0F) << 4 | t >> 8) as u8,
            t as u8,
        ];
        self.frame(DmMode::Mit, buf)
    }

    /// Store a torque command for the next [`send_torque`](Self::send_torque).
    #[inline]
    pub fn set_torque(&self, torque: f32) {
        self.torque_cmd.set(torque);
    }

    #[inline]
    pub fn torque_cmd(&self) -> f32 {
        self.torque_cmd.get()
    }

    pub fn send_velocity<T: CanTx>(&self, tx: &mut T, rpm: f32) -> Result<(), TxError> {
        tx.transmit(&self.encode_velocity(rpm))
    }

    pub fn send_position<T: CanTx>(&self, tx: &mut T, angle_deg: f32) -> Result<(), TxError> {
        tx.transmit(&self.encode_position(angle_deg))
    }

    pub fn send_torque<T: CanTx>(&self, tx: &mut T) -> Result<(), TxError> {
        tx.transmit(&self.encode_torque(self.torque_cmd()))
    }

    fn send_special<T: CanTx>(&self, tx: &mut T, code: u8) -> Result<(), TxError> {
        let mut buf = [0xFF; 8];
        buf[7] = code;
        tx.transmit(&self.frame(self.config.mode, buf))
    }

    /// Enter the enabled state; the actuator ignores setpoints until this is sent.
    pub fn enable<T: CanTx>(&self, tx: &mut T) -> Result<(), TxError> {
        debug!("dm {=u8}: enable", self.config.id);
        self.send_special(tx, 0xFC)
    }

    pub fn disable<T: CanTx>(&self, tx: &mut T) -> Result<(), TxError> {
        self.send_special(tx, 0xFD)
    }

    /// Store the present position as the actuator's own zero.
    pub fn save_zero<T: CanTx>(&self, tx: &mut T) -> Result<(), TxError> {
        self.send_special(tx, 0xFE)
    }

    pub fn clear_error<T: CanTx>(&self, tx: &mut T) -> Result<(), TxError> {
        self.send_special(tx, 0xFB)
    }
}
