// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # motorctl
//!
//! Control core for a multi-backend motor actuation layer, written in Rust for STM32F7-class
//! MCUs. Application code commands a motor by target angle or target speed; the motor behind it
//! may be a CAN smart ESC, a CAN servo actuator, a brushed motor on an H-bridge, or an ESC that
//! closes its own velocity loop.
//!
//! ## Crate Structure
//!
//! | Module | Purpose |
//! | ------ | -------- |
//! | [`control`] | Incremental PID, cascaded position / velocity controllers, settle detection |
//! | [`motors`] | The [`Motor`](motors::Motor) sum type that dispatches over every backend |
//! | [`drivers`] | Per-backend feedback decoders and command encoders (DJI, DM, VESC, TB6612) |
//! | [`bus`] | Transport boundary ([`CanTx`](bus::CanTx)) and the per-bus feedback router |
//! | [`error`] | Centralized fatal entry point for configuration errors |
//! | `hw` | MCU-level CAN adapter (ARM targets only) |
//!
//! ## Data flow
//!
//! ```text
//! CAN RX ──► Router::dispatch ──► drivers::*::decode ──► motor telemetry
//!                                                             │
//! tick ──► PositionController / VelocityController::update ◄──┘
//!                     │
//!                     └──► Motor::apply_output / send_internal_* ──► CanTx
//! ```
//!
//! ## Getting Started
//!
//! Run the host test-suite:
//!
//! ```bash
//! cargo test
//! ```
//!
//! Flash the demo firmware:
//!
//! ```bash
//! cargo run -p firmware --release --target thumbv7em-none-eabihf
//! ```
//!
//! ## License
//!
//! Licensed under the **MIT License**.
//! See the `LICENSE` file in the repository root for full terms.
//!
//! © 2025–2026 Christopher Liu

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod bus;
pub mod control;
pub mod drivers;
pub mod error;
pub mod motors;

#[cfg(target_arch = "arm")]
pub mod hw;
