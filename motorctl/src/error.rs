// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Centralized handling for errors the system cannot run with.
//!
//! Runtime faults (a dropped frame, a busy mailbox) are returned to the caller and absorbed by the
//! next tick. Configuration faults are different: a motor registered twice, or on an address its
//! family cannot reach, means the wiring table is wrong, and no control loop should start. Those
//! go through [`fatal`].

use crate::bus::RouteError;

/// Log `err` and halt.
///
/// Under `panic-halt` the core parks in the panic handler with the motors unpowered, since no
/// further command frames are sent.
#[cold]
pub fn fatal(err: RouteError) -> ! {
    error!("fatal configuration error: {}", err);
    panic!("fatal configuration error: {}", err);
}
