// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! DJI smart ESCs (C620 for M3508, C610 for M2006) on CAN.
//!
//! Up to eight ESCs share a bus. Each one reports at 1 kHz on `StdID = 0x200 + id`, and the
//! host drives four of them at once with a single current frame:
//!   - ids 1..=4 on `StdID = 0x200`
//!   - ids 5..=8 on `StdID = 0x1FF`
//!
//! This module only decodes feedback and encodes current commands; closing the loop is the job
//! of [`control`](crate::control).

use crate::bus::BusId;
use crate::motors::shared::Shared;

use bxcan::{Data, Frame, StandardId};
use micromath::F32Ext;

/// Base of the feedback identifiers (`0x200 + id`).
pub const FEEDBACK_ID_BASE: u16 = 0x200;

/// Encoder counts per mechanical revolution of the rotor.
pub const ENCODER_RESOLUTION: f32 = 8192.0;

/// Number of frames after which auto-zero captures the zero, unless configured otherwise.
pub const DEFAULT_AUTO_ZERO_FRAMES: u32 = 10;

/// Supported motor / ESC pairs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DjiKind {
    /// M3508 with a C620 ESC.
    M3508C620,
    /// M2006 with a C610 ESC.
    M2006C610,
}

impl DjiKind {
    /// Gearbox reduction between rotor and output shaft.
    pub fn reduction(self) -> f32 {
        match self {
            DjiKind::M3508C620 => 3591.0 / 187.0,
            DjiKind::M2006C610 => 36.0,
        }
    }

    /// Largest current command the ESC accepts.
    pub fn current_max(self) -> i16 {
        match self {
            DjiKind::M3508C620 => 16384,
            DjiKind::M2006C610 => 10000,
        }
    }
}

/// Which half of the eight ESCs a current frame addresses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CurrentGroup {
    /// ESC ids 1..=4.
    Ids1To4,
    /// ESC ids 5..=8.
    Ids5To8,
}

impl CurrentGroup {
    /// StdID of the current frame for this group.
    pub fn std_id(self) -> u16 {
        match self {
            CurrentGroup::Ids1To4 => 0x200,
            CurrentGroup::Ids5To8 => 0x1FF,
        }
    }

    /// Route table slot of the first ESC in the group.
    pub fn first_slot(self) -> usize {
        match self {
            CurrentGroup::Ids1To4 => 0,
            CurrentGroup::Ids5To8 => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DjiConfig {
    pub kind: DjiKind,
    pub bus: BusId,
    /// ESC id as set by the DIP / LED menu, 1..=8.
    pub id: u8,
    /// Capture the zero automatically after `auto_zero_frames` feedback frames.
    pub auto_zero: bool,
    /// 0 selects [`DEFAULT_AUTO_ZERO_FRAMES`].
    pub auto_zero_frames: u32,
    /// Report angle and velocity at the output shaft instead of the rotor.
    pub apply_reduction: bool,
}

impl DjiConfig {
    pub fn new(kind: DjiKind, bus: BusId, id: u8) -> Self {
        Self {
            kind,
            bus,
            id,
            auto_zero: false,
            auto_zero_frames: DEFAULT_AUTO_ZERO_FRAMES,
            apply_reduction: true,
        }
    }

    pub fn with_auto_zero(mut self, auto_zero: bool) -> Self {
        self.auto_zero = auto_zero;
        self
    }
}

/// Everything decoded from the feedback stream, updated as a unit.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DjiFeedback {
    /// Feedback frames received so far.
    pub frames: u32,
    /// Single-turn rotor angle (deg, 0..360).
    pub mech_angle: f32,
    /// Rotor speed (rpm).
    pub rotor_rpm: f32,
    /// Full rotor turns counted since power-up or the last zeroing.
    pub rotations: i32,
    /// Rotor angle captured as zero (deg).
    pub angle_zero: f32,
    /// Multi-turn angle (deg).
    pub abs_angle: f32,
    /// Speed (rpm).
    pub velocity: f32,
    /// Auto-zero has captured its zero; it never fires again.
    pub auto_zeroed: bool,
    /// A previous rotor angle exists to unwrap against.
    has_prev: bool,
}

impl DjiFeedback {
    fn reset_angle(&mut self) {
        self.rotations = 0;
        self.angle_zero = self.mech_angle;
        self.abs_angle = 0.0;
    }
}

/// One DJI ESC on a bus.
pub struct DjiMotor {
    config: DjiConfig,
    inv_reduction: f32,
    feedback: Shared<DjiFeedback>,
    current_cmd: Shared<i16>,
}

impl DjiMotor {
    pub fn new(config: DjiConfig) -> Self {
        let inv_reduction = if config.apply_reduction {
            1.0 / config.kind.reduction()
        } else {
            1.0
        };
        let auto_zero_frames = if config.auto_zero_frames == 0 {
            DEFAULT_AUTO_ZERO_FRAMES
        } else {
            config.auto_zero_frames
        };

        Self {
            config: DjiConfig {
                auto_zero_frames,
                ..config
            },
            inv_reduction,
            feedback: Shared::new(DjiFeedback::default()),
            current_cmd: Shared::new(0),
        }
    }

    #[inline]
    pub fn config(&self) -> &DjiConfig {
        &self.config
    }

    #[inline]
    pub fn bus(&self) -> BusId {
        self.config.bus
    }

    /// ESC id, 1..=8.
    #[inline]
    pub fn id(&self) -> u8 {
        self.config.id
    }

    /// Feedback identifier this ESC reports on.
    #[inline]
    pub fn feedback_id(&self) -> u16 {
        FEEDBACK_ID_BASE + self.config.id as u16
    }

    /// Snapshot of all decoded feedback.
    #[inline]
    pub fn feedback(&self) -> DjiFeedback {
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

    /// Store a current command. It goes out with the next group frame.
    ///
    /// The value is rounded and saturated to `i16`; the ESC's own limit is not applied here,
    /// size the PID clamp to [`DjiKind::current_max`] instead.
    #[inline]
    pub fn set_current(&self, current: f32) {
        self.current_cmd.set(current.round() as i16);
    }

    #[inline]
    pub fn current_cmd(&self) -> i16 {
        self.current_cmd.get()
    }

    /// Make the present position the zero.
    pub fn reset_angle(&self) {
        self.feedback.update(DjiFeedback::reset_angle);
    }

    /// Decode one feedback payload.
    ///
    /// Layout:
    ///   - byte 0: status
    ///   - bytes 1..=2: rotor angle, big-endian, 0..8191 over one turn
    ///   - bytes 3..=4: rotor speed, big-endian `i16`, rpm
    ///
    /// Returns `false` (and changes nothing) if the payload is shorter than a feedback frame.
    pub fn decode(&self, data: &[u8]) -> bool {
        if data.len() < 8 {
            return false;
        }

        let raw_angle = u16::from_be_bytes([data[1], data[2]]);
        let raw_rpm = i16::from_be_bytes([data[3], data[4]]);
        let mech_angle = raw_angle as f32 * 360.0 / ENCODER_RESOLUTION;

        let auto_zero = self.config.auto_zero;
        let auto_zero_frames = self.config.auto_zero_frames;
        let inv_reduction = self.inv_reduction;

        let zeroed = self.feedback.update(|fb| {
            if fb.has_prev {
                let delta = mech_angle - fb.mech_angle;
                if delta < -180.0 {
                    fb.rotations += 1;
                } else if delta > 180.0 {
                    fb.rotations -= 1;
                }
            }

            fb.mech_angle = mech_angle;
            fb.has_prev = true;
            fb.rotor_rpm = raw_rpm as f32;
            fb.abs_angle =
                (fb.rotations as f32 * 360.0 + mech_angle - fb.angle_zero) * inv_reduction;
            fb.velocity = fb.rotor_rpm * inv_reduction;
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
            info!("dji {=u8}: zero captured at {=f32} deg", self.config.id, mech_angle);
        }
        true
    }
}

/// Build the current frame for one group.
///
/// `motors[n]` is the ESC in the `n`-th position of the group; empty positions send 0.
pub fn encode_current_group(group: CurrentGroup, motors: [Option<&DjiMotor>; 4]) -> Frame {
    let mut buf = [0u8; 8];
    for (chunk, motor) in buf.chunks_exact_mut(2).zip(motors) {
        let current = motor.map_or(0, DjiMotor::current_cmd);
        chunk.copy_from_slice(&current.to_be_bytes());
    }

    // 0x200 and 0x1FF are always valid 11-bit identifiers.
    let id = StandardId::new(group.std_id()).unwrap_or(StandardId::ZERO);
    Frame::new_data(id, Data::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(angle_deg: f32, rpm: i16) -> [u8; 8] {
        let raw = (angle_deg / 360.0 * ENCODER_RESOLUTION).round() as u16;
        let a = raw.to_be_bytes();
        let r = rpm.to_be_bytes();
        [0, a[0], a[1], r[0], r[1], 0, 0, 0]
    }

    fn rotor_motor() -> DjiMotor {
        DjiMotor::new(DjiConfig {
            apply_reduction: false,
            ..DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1)
        })
    }

    #[test]
    fn decodes_angle_and_speed() {
        let m = rotor_motor();
        assert!(m.decode(&payload(90.0, -1200)));
        let fb = m.feedback();
        assert!((fb.mech_angle - 90.0).abs() < 0.05);
        assert_eq!(fb.rotor_rpm, -1200.0);
        assert_eq!(fb.velocity, -1200.0);
        assert_eq!(fb.frames, 1);
    }

    #[test]
    fn rising_crossing_increments_rotations() {
        let m = rotor_motor();
        m.decode(&payload(350.0, 0));
        m.decode(&payload(10.0, 0));
        assert_eq!(m.feedback().rotations, 1);
        assert!((m.angle() - 370.0).abs() < 0.1);
    }

    #[test]
    fn falling_crossing_decrements_rotations() {
        let m = rotor_motor();
        m.decode(&payload(10.0, 0));
        m.decode(&payload(350.0, 0));
        assert_eq!(m.feedback().rotations, -1);
        assert!((m.angle() - -10.0).abs() < 0.1);
    }

    #[test]
    fn small_step_keeps_rotations() {
        let m = rotor_motor();
        m.decode(&payload(10.0, 0));
        m.decode(&payload(20.0, 0));
        assert_eq!(m.feedback().rotations, 0);
    }

    #[test]
    fn first_frame_never_wraps() {
        let m = rotor_motor();
        m.decode(&payload(300.0, 0));
        assert_eq!(m.feedback().rotations, 0);
    }

    #[test]
    fn auto_zero_fires_on_exact_frame() {
        let m = DjiMotor::new(DjiConfig {
            auto_zero_frames: 4,
            ..DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 2).with_auto_zero(true)
        });
        let angles = [300.0, 20.0, 100.0];
        for a in angles {
            m.decode(&payload(a, 0));
        }
        assert_eq!(m.feedback().rotations, 1);
        assert!(m.angle() != 0.0);

        m.decode(&payload(170.0, 0));
        let fb = m.feedback();
        assert_eq!(fb.frames, 4);
        assert_eq!(fb.abs_angle, 0.0);
        assert_eq!(fb.rotations, 0);

        // One-time edge: later frames measure from the captured zero.
        m.decode(&payload(180.0, 0));
        let expected = 10.0 / DjiKind::M3508C620.reduction();
        assert!((m.angle() - expected).abs() < 0.01);
    }

    #[test]
    fn auto_zero_survives_frame_counter_wrap() {
        let m = DjiMotor::new(
            DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 2).with_auto_zero(true),
        );
        for _ in 0..10 {
            m.decode(&payload(10.0, 0));
        }
        assert!(m.feedback().auto_zeroed);

        m.decode(&payload(100.0, 0));
        let moved = m.angle();
        assert!(moved > 0.0);

        m.feedback.update(|fb| fb.frames = u32::MAX);
        for _ in 0..11 {
            m.decode(&payload(100.0, 0));
        }
        assert_eq!(m.feedback().frames, 10);
        assert_eq!(m.angle(), moved);
    }

    #[test]
    fn unwrap_continues_across_frame_counter_wrap() {
        let m = rotor_motor();
        m.decode(&payload(350.0, 0));
        m.feedback.update(|fb| fb.frames = u32::MAX);
        m.decode(&payload(355.0, 0));
        assert_eq!(m.feedback().frames, 0);
        m.decode(&payload(10.0, 0));
        assert_eq!(m.feedback().rotations, 1);
    }

    #[test]
    fn reduction_scales_angle_and_speed() {
        let m = DjiMotor::new(DjiConfig::new(DjiKind::M2006C610, BusId::CAN1, 3));
        m.decode(&payload(0.0, 3600));
        assert!((m.velocity() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn short_payload_is_rejected() {
        let m = rotor_motor();
        assert!(!m.decode(&[0, 1, 2]));
        assert_eq!(m.feedback().frames, 0);
    }

    #[test]
    fn current_group_frame_layout() {
        let a = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1));
        let c = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 3));
        a.set_current(1000.4);
        c.set_current(-2.0);

        let frame = encode_current_group(CurrentGroup::Ids1To4, [Some(&a), None, Some(&c), None]);
        assert_eq!(frame.id(), bxcan::Id::Standard(StandardId::new(0x200).unwrap()));
        let data = frame.data().unwrap();
        assert_eq!(&data[..], &[0x03, 0xE8, 0, 0, 0xFF, 0xFE, 0, 0]);
    }

    #[test]
    fn current_command_saturates() {
        let m = rotor_motor();
        m.set_current(1e9);
        assert_eq!(m.current_cmd(), i16::MAX);
    }
}
