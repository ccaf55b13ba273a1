// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Cascaded angle controller for any [`Motor`].
//!
//! An outer position PID turns angle error (deg) into a speed reference (rpm); an inner velocity
//! PID turns speed error into the motor output. The outer loop can run slower than the inner one:
//! it recomputes once every `pos_vel_freq_ratio` ticks and its last output is reused in between.
//!
//! Motors that close loops on board shorten the cascade:
//! - [`ControlMode::InternalVelocity`]: the outer PID runs every tick and its output goes to the
//!   motor as a speed setpoint.
//! - [`ControlMode::InternalVelocityPosition`]: the target angle goes straight to the motor; both
//!   PIDs stay zeroed.
//!
//! Arrival is reported by a [`SettleDetector`], which runs every enabled tick regardless of mode.

use crate::bus::{CanTx, TxError};
use crate::control::pid::{Pid, PidConfig};
use crate::motors::{ControlMode, Motor};

use micromath::F32Ext;

/// Consecutive in-tolerance ticks required when none is configured.
pub const DEFAULT_SETTLE_COUNT: u32 = 50;

/// Declares arrival once the error has stayed within a threshold for enough consecutive ticks.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SettleDetector {
    error_threshold: f32,
    count_max: u32,
    counter: u32,
}

impl SettleDetector {
    /// `count_max` of 0 selects [`DEFAULT_SETTLE_COUNT`].
    pub fn new(error_threshold: f32, count_max: u32) -> Self {
        Self {
            error_threshold,
            count_max: if count_max == 0 {
                DEFAULT_SETTLE_COUNT
            } else {
                count_max
            },
            counter: 0,
        }
    }

    /// Feed one tick's error. Any error at or beyond the threshold restarts the count.
    pub fn observe(&mut self, error: f32) {
        if error.abs() < self.error_threshold {
            self.counter = self.counter.saturating_add(1);
        } else {
            self.counter = 0;
        }
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.counter >= self.count_max
    }

    #[inline]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    #[inline]
    pub fn error_threshold(&self) -> f32 {
        self.error_threshold
    }

    /// Ignored unless `threshold > 0`.
    pub fn set_error_threshold(&mut self, threshold: f32) {
        if threshold > 0.0 {
            self.error_threshold = threshold;
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PositionConfig {
    /// Inner loop, rpm in, motor output out. Clamp it to the motor's maximum output.
    pub velocity_pid: PidConfig,
    /// Outer loop, degrees in, rpm out. Its clamp is the speed limit.
    pub position_pid: PidConfig,
    /// Inner ticks per outer update; 0 means 1.
    pub pos_vel_freq_ratio: u32,
    /// Settle tolerance (deg).
    pub error_threshold: f32,
    /// Settle tick count; 0 means [`DEFAULT_SETTLE_COUNT`].
    pub settle_count_max: u32,
    /// `None` selects the motor's default mode.
    pub control_mode: Option<ControlMode>,
}

pub struct PositionController<'a> {
    motor: Motor<'a>,
    mode: ControlMode,
    enabled: bool,

    velocity_pid: Pid,
    position_pid: Pid,

    pos_vel_freq_ratio: u32,
    /// Ticks since the outer loop last ran
    count: u32,

    settle: SettleDetector,

    /// Target angle (deg)
    reference: f32,
}

impl<'a> PositionController<'a> {
    /// Create an enabled controller for `motor`.
    pub fn new(motor: impl Into<Motor<'a>>, config: PositionConfig) -> Self {
        let mut ctrl = Self {
            motor: motor.into(),
            mode: ControlMode::ExternalPid,
            enabled: false,
            velocity_pid: Pid::disabled(),
            position_pid: Pid::disabled(),
            pos_vel_freq_ratio: 1,
            count: 0,
            settle: SettleDetector::default(),
            reference: 0.0,
        };
        ctrl.init(config);
        ctrl
    }

    /// Reload configuration, clear references, PID history and settle state, and enable.
    pub fn init(&mut self, config: PositionConfig) {
        self.mode = config
            .control_mode
            .unwrap_or_else(|| self.motor.default_control_mode());

        let (velocity_pid, position_pid, ratio) = match self.mode {
            ControlMode::InternalVelocityPosition => (Pid::disabled(), Pid::disabled(), 1),
            ControlMode::InternalVelocity => (Pid::disabled(), Pid::new(config.position_pid), 1),
            ControlMode::ExternalPid => (
                Pid::new(config.velocity_pid),
                Pid::new(config.position_pid),
                config.pos_vel_freq_ratio.max(1),
            ),
        };
        self.velocity_pid = velocity_pid;
        self.position_pid = position_pid;
        self.pos_vel_freq_ratio = ratio;
        self.count = 0;

        self.settle = SettleDetector::new(config.error_threshold, config.settle_count_max);
        self.reference = 0.0;
        self.enabled = true;
        debug!(
            "position ctrl: {}, outer loop every {=u32} ticks",
            self.mode,
            self.pos_vel_freq_ratio
        );
    }

    #[inline]
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    #[inline]
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
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
    pub fn pos_vel_freq_ratio(&self) -> u32 {
        self.pos_vel_freq_ratio
    }

    #[inline]
    pub fn velocity_pid(&self) -> &Pid {
        &self.velocity_pid
    }

    #[inline]
    pub fn position_pid(&self) -> &Pid {
        &self.position_pid
    }

    /// Target angle (deg).
    #[inline]
    pub fn reference(&self) -> f32 {
        self.reference
    }

    /// Set the target angle (deg). Takes effect on the next outer-loop update.
    #[inline]
    pub fn set_reference(&mut self, angle_deg: f32) {
        self.reference = angle_deg;
    }

    pub fn set_error_threshold(&mut self, threshold: f32) {
        self.settle.set_error_threshold(threshold);
    }

    #[inline]
    pub fn settle(&self) -> &SettleDetector {
        &self.settle
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.settle.is_settled()
    }

    /// Run one control tick.
    pub fn update<T: CanTx>(&mut self, tx: &mut T) -> Result<(), TxError> {
        if !self.enabled {
            return Ok(());
        }

        let angle = self.motor.angle();
        self.settle.observe(angle - self.reference);

        if self.mode == ControlMode::InternalVelocityPosition {
            return self.motor.send_internal_position(tx, self.reference);
        }

        self.count = self.count.saturating_add(1);

        if self.count >= self.pos_vel_freq_ratio {
            self.position_pid.set_target(self.reference);
            self.position_pid.calculate(angle);
            self.count = 0;
        }

        if self.mode == ControlMode::InternalVelocity {
            return self
                .motor
                .send_internal_velocity(tx, self.position_pid.output());
        }

        self.velocity_pid.set_target(self.position_pid.output());
        let out = self.velocity_pid.calculate(self.motor.velocity());
        self.motor.apply_output(out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusId;
    use crate::drivers::{DjiConfig, DjiKind, DjiMotor, DmConfig, DmKind, DmMode, DmMotor};
    use crate::drivers::{HBridgeConfig, HBridgeMotor, VescConfig, VescMotor};
    use bxcan::Frame;

    #[derive(Default)]
    struct Recorder(Vec<Frame>);

    impl CanTx for Recorder {
        fn transmit(&mut self, frame: &Frame) -> Result<(), TxError> {
            self.0.push(frame.clone());
            Ok(())
        }
    }

    fn cascade(ratio: u32) -> PositionConfig {
        PositionConfig {
            velocity_pid: PidConfig::new(1.0, 0.0, 0.0, 1000.0),
            position_pid: PidConfig::new(2.0, 0.0, 0.0, 500.0),
            pos_vel_freq_ratio: ratio,
            error_threshold: 1.0,
            settle_count_max: 3,
            control_mode: None,
        }
    }

    #[test]
    fn settle_requires_consecutive_ticks() {
        let mut s = SettleDetector::new(1.0, 3);
        s.observe(0.5);
        s.observe(-0.5);
        assert!(!s.is_settled());
        s.observe(0.5);
        assert!(s.is_settled());

        s.observe(2.0);
        assert_eq!(s.counter(), 0);
        assert!(!s.is_settled());
    }

    #[test]
    fn settle_defaults_and_threshold_setter() {
        let mut s = SettleDetector::new(1.0, 0);
        for _ in 0..49 {
            s.observe(0.0);
        }
        assert!(!s.is_settled());
        s.observe(0.0);
        assert!(s.is_settled());

        s.set_error_threshold(-1.0);
        assert_eq!(s.error_threshold(), 1.0);
        s.set_error_threshold(0.0);
        assert_eq!(s.error_threshold(), 1.0);
        s.set_error_threshold(2.5);
        assert_eq!(s.error_threshold(), 2.5);
    }

    #[test]
    fn external_cascade_feeds_velocity_loop() {
        let dji = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1));
        let mut ctrl = PositionController::new(&dji, cascade(1));
        let mut tx = Recorder::default();

        ctrl.set_reference(10.0);
        ctrl.update(&mut tx).unwrap();

        // outer: 2 * 10 = 20 rpm, inner: 1 * 20 = 20
        assert_eq!(ctrl.position_pid().output(), 20.0);
        assert_eq!(ctrl.velocity_pid().target(), 20.0);
        assert_eq!(dji.current_cmd(), 20);
        assert!(tx.0.is_empty());
    }

    #[test]
    fn outer_loop_runs_at_divided_rate() {
        let dji = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1));
        let mut ctrl = PositionController::new(&dji, cascade(3));
        let mut tx = Recorder::default();
        ctrl.set_reference(10.0);

        ctrl.update(&mut tx).unwrap();
        ctrl.update(&mut tx).unwrap();
        assert_eq!(ctrl.position_pid().output(), 0.0);
        ctrl.update(&mut tx).unwrap();
        assert_eq!(ctrl.position_pid().output(), 20.0);
        // inner loop ran on every tick
        assert_eq!(ctrl.velocity_pid().target(), 20.0);
    }

    #[test]
    fn zero_ratio_means_every_tick() {
        let hb = HBridgeMotor::new(HBridgeConfig::new(100, 1.0, 0.01));
        let mut ctrl = PositionController::new(&hb, cascade(0));
        assert_eq!(ctrl.pos_vel_freq_ratio(), 1);

        let mut tx = Recorder::default();
        ctrl.set_reference(0.25);
        ctrl.update(&mut tx).unwrap();
        assert_eq!(ctrl.position_pid().output(), 0.5);
    }

    #[test]
    fn internal_position_mode_forwards_target() {
        let dm = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 4, DmMode::Position));
        let mut ctrl = PositionController::new(&dm, cascade(5));
        let mut tx = Recorder::default();

        assert_eq!(ctrl.mode(), ControlMode::InternalVelocityPosition);
        assert_eq!(ctrl.pos_vel_freq_ratio(), 1);
        ctrl.set_reference(45.0);
        ctrl.update(&mut tx).unwrap();
        assert_eq!(tx.0.len(), 1);
        assert_eq!(ctrl.position_pid().output(), 0.0);
        assert_eq!(ctrl.velocity_pid().output(), 0.0);
    }

    #[test]
    fn long_runs_do_not_overflow_tick_count() {
        let dm = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 4, DmMode::Position));
        let mut ctrl = PositionController::new(&dm, cascade(1));
        let mut tx = Recorder::default();
        ctrl.count = u32::MAX;
        ctrl.update(&mut tx).unwrap();
        ctrl.update(&mut tx).unwrap();
        assert_eq!(tx.0.len(), 2);
        assert_eq!(ctrl.count, u32::MAX);

        let dji = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1));
        let mut ctrl = PositionController::new(&dji, cascade(3));
        ctrl.set_reference(10.0);
        ctrl.count = u32::MAX;
        ctrl.update(&mut tx).unwrap();
        assert_eq!(ctrl.count, 0);
        assert_eq!(ctrl.position_pid().output(), 20.0);
    }

    #[test]
    fn internal_velocity_mode_sends_outer_output() {
        let vesc = VescMotor::new(VescConfig::new(BusId::CAN1, 1, 7));
        let mut ctrl = PositionController::new(&vesc, cascade(4));
        let mut tx = Recorder::default();

        assert_eq!(ctrl.mode(), ControlMode::InternalVelocity);
        ctrl.set_reference(10.0);
        ctrl.update(&mut tx).unwrap();
        assert_eq!(tx.0.len(), 1);
        // 20 rpm at 7 pole pairs
        assert_eq!(&tx.0[0].data().unwrap()[..], &140i32.to_be_bytes());
    }

    #[test]
    fn settle_runs_in_every_mode_and_not_when_disabled() {
        let dm = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 4, DmMode::Position));
        let mut ctrl = PositionController::new(&dm, cascade(1));
        let mut tx = Recorder::default();
        for _ in 0..3 {
            ctrl.update(&mut tx).unwrap();
        }
        assert!(ctrl.is_settled());

        ctrl.set_reference(90.0);
        ctrl.disable();
        ctrl.update(&mut tx).unwrap();
        assert!(ctrl.is_settled());
        ctrl.enable();
        ctrl.update(&mut tx).unwrap();
        assert!(!ctrl.is_settled());
    }
}
