// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # Hardware Adapters
//!
//! MCU-side implementations of the [`bus`](crate::bus) traits. Built for ARM targets only.

pub mod can;

pub use can::CanBus;
