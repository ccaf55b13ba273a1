// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Demo firmware: two M3508 motors on CAN1.
//!
//! - id 1: cascaded position control, zeroed automatically after the first feedback frames
//! - id 2: speed control
//!
//! The control tick runs at 1 kHz off SysTick. Received frames are drained and routed between
//! ticks; the group current frame for ids 1..=4 goes out once per tick.

#![no_std]
#![no_main]

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_halt as _;

use hal::{pac, prelude::*};
use stm32f7xx_hal as hal;

use motorctl::{
    bus::{BusId, Router},
    control::{PidConfig, PositionConfig, PositionController, VelocityConfig, VelocityController},
    drivers::{CurrentGroup, DjiConfig, DjiKind, DjiMotor},
    error::fatal,
    hw::CanBus,
};

/// 1 Mbit/s from the 16 MHz APB1 clock: 16 tq per bit, sample point 87.5 %.
const CAN_BTR_1MBIT: u32 = 0x001C_0000;

const TICK_HZ: u32 = 1_000;

const ARM_TARGET_DEG: f32 = 90.0;
const WHEEL_TARGET_RPM: f32 = 60.0;

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();
    let cp = cortex_m::Peripherals::take().unwrap();

    // Clocks
    let rcc = dp.RCC.constrain();
    let clocks = rcc.cfgr.freeze();
    let mut apb1 = rcc.apb1;

    // CAN1 on PA11 (RX) / PA12 (TX)
    let gpioa = dp.GPIOA.split();
    let can_rx = gpioa.pa11.into_alternate::<9>();
    let can_tx = gpioa.pa12.into_alternate::<9>();
    let can1 = hal::can::Can::new(dp.CAN1, &mut apb1, (can_tx, can_rx));
    let mut can = CanBus::new(BusId::CAN1, can1, CAN_BTR_1MBIT, false, false);
    can.configure_accept_all_filters();

    // Motors and routing
    let arm = DjiMotor::new(
        DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 1).with_auto_zero(true),
    );
    let wheel = DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, BusId::CAN1, 2));

    let mut router = Router::new();
    router.register_dji(&arm).unwrap_or_else(|e| fatal(e));
    router.register_dji(&wheel).unwrap_or_else(|e| fatal(e));

    // Controllers
    let mut arm_ctrl = PositionController::new(
        &arm,
        PositionConfig {
            velocity_pid: PidConfig::new(4.7, 0.15, 0.15, 16384.0),
            position_pid: PidConfig::new(13.0, 0.015, 0.01, 2000.0),
            pos_vel_freq_ratio: 1,
            error_threshold: 0.5,
            settle_count_max: 0,
            control_mode: None,
        },
    );
    let mut wheel_ctrl = VelocityController::new(
        &wheel,
        VelocityConfig {
            pid: PidConfig::new(4.7, 0.15, 0.15, 16384.0),
            control_mode: None,
        },
    );

    // Hold the arm until its zero has been captured.
    arm_ctrl.disable();
    arm_ctrl.set_reference(ARM_TARGET_DEG);
    if let Err(e) = wheel_ctrl.set_reference(WHEEL_TARGET_RPM, &mut can) {
        defmt::warn!("wheel reference not sent: {}", e);
    }

    // SysTick as a free-running tick source
    let mut syst = cp.SYST;
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(clocks.sysclk().raw() / TICK_HZ - 1);
    syst.clear_current();
    syst.enable_counter();

    defmt::info!("motorctl demo up, sysclk {=u32} Hz", clocks.sysclk().raw());

    let mut ticks: u32 = 0;
    let mut was_settled = false;

    loop {
        // Drain received frames.
        loop {
            match can.try_receive() {
                Ok(frame) => {
                    router.dispatch(can.id(), &frame);
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(_)) => defmt::warn!("can rx overrun"),
            }
        }

        if !syst.has_wrapped() {
            continue;
        }
        ticks = ticks.wrapping_add(1);

        if !arm_ctrl.is_enabled() && arm.feedback().auto_zeroed {
            defmt::info!("arm zeroed, moving to {=f32} deg", ARM_TARGET_DEG);
            arm_ctrl.enable();
        }

        let sent = arm_ctrl
            .update(&mut can)
            .and_then(|_| wheel_ctrl.update(&mut can))
            .and_then(|_| router.send_dji_currents(BusId::CAN1, CurrentGroup::Ids1To4, &mut can));
        if let Err(e) = sent {
            defmt::warn!("tick {=u32}: {}", ticks, e);
        }

        let settled = arm_ctrl.is_settled();
        if settled != was_settled {
            defmt::info!("arm settled: {=bool} at {=f32} deg", settled, arm.angle());
            was_settled = settled;
        }

        if ticks % TICK_HZ == 0 {
            defmt::debug!(
                "arm {=f32} deg, wheel {=f32} rpm, rx {=u32} ok / {=u32} dropped",
                arm.angle(),
                wheel.velocity(),
                router.decoded_frames(),
                router.dropped_frames()
            );
        }
    }
}
