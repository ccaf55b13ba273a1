// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # CAN Bus Boundary
//!
//! Everything that crosses between the control core and the CAN transport.
//!
//! - [`CanTx`] is the outbound half. The core calls it once per command; the transport decides
//!   how the frame reaches a mailbox. [`hw::CanBus`](crate::hw) implements it on the MCU.
//! - [`router`] is the inbound half: it turns received frames into motor telemetry.

pub mod router;

pub use router::{Dispatch, DropReason, RouteError, Router};

use bxcan::Frame;
use core::fmt;

/// Identity of a physical CAN bus (e.g. `BusId::CAN1`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusId(pub u8);

impl BusId {
    pub const CAN1: BusId = BusId(1);
    pub const CAN2: BusId = BusId(2);
}

/// Failure to hand a frame to the transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// Every TX mailbox holds a pending frame of equal or higher priority.
    Busy,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Busy => f.write_str("all transmit mailboxes busy"),
        }
    }
}

/// Outbound CAN transport.
///
/// Implementations must not block for longer than it takes to fill a mailbox: the core calls
/// `transmit` from the control tick. A failed send is reported, never retried here; the next
/// tick produces a fresh command anyway.
pub trait CanTx {
    fn transmit(&mut self, frame: &Frame) -> Result<(), TxError>;
}

impl<T: CanTx + ?Sized> CanTx for &mut T {
    #[inline]
    fn transmit(&mut self, frame: &Frame) -> Result<(), TxError> {
        (**self).transmit(frame)
    }
}
