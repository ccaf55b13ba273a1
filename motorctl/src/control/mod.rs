// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Control Algorithms
//!
//! This module provides reusable building blocks for closed-loop motor control.
//!
//! ## Modules
//!
//! - [`pid`] - Incremental PID controller with output clamping.
//! - [`velocity`] - Speed controller over any [`Motor`](crate::motors::Motor).
//! - [`position`] - Cascaded angle controller with settle detection.

pub mod pid;
pub mod position;
pub mod velocity;

pub use pid::{Pid, PidConfig};
pub use position::{PositionConfig, PositionController, SettleDetector};
pub use velocity::{VelocityConfig, VelocityController, VelocityState};
