// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Backend Drivers
//!
//! One module per motor family. Each driver owns the wire format of its family: it decodes
//! feedback into calibrated output-side units (degrees, rpm) and encodes commands. Drivers never
//! own a transport; they take a [`CanTx`](crate::bus::CanTx) when they need to send.
//!
//! ## Existing drivers
//!
//! - [`dji`] – DJI M3508 / M2006 smart ESCs (C620 / C610), group current commands
//! - [`dm`] – DaMiao servo actuators, on-board position / velocity loops and MIT torque
//! - [`tb6612`] – Brushed DC motor on a TB6612 H-bridge with a quadrature encoder
//! - [`vesc`] – VESC speed controllers with an internal velocity loop

pub mod dji;
pub mod dm;
pub mod tb6612;
pub mod vesc;

pub use dji::{CurrentGroup, DjiConfig, DjiKind, DjiMotor};
pub use dm::{DmConfig, DmKind, DmMode, DmMotor};
pub use tb6612::{HBridgeConfig, HBridgeMotor, Tb6612};
pub use vesc::{VescConfig, VescMotor, VescPacket};
