// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Controller Area Network (CAN) transport.
//!
//! - `CanBus` wraps a HAL `can::Can` instance in `bxcan::Can` and tags it with a [`BusId`].
//! - Implements [`CanTx`] for the control core; received frames go to
//!   [`Router::dispatch`](crate::bus::Router::dispatch).

use crate::bus::{BusId, CanTx, TxError};

use bxcan::{filter::Mask32, Fifo, Frame, OverrunError};
use stm32f7xx_hal::can as hal_can;

/// Wrapper around a bxcan CAN instance built from a HAL CAN peripheral.
pub struct CanBus<I>
where
    hal_can::Can<I>: bxcan::Instance,
{
    can: bxcan::Can<hal_can::Can<I>>,
    id: BusId,
}

impl<I> CanBus<I>
where
    hal_can::Can<I>: bxcan::Instance,
{
    /// Create and enable a bxcan instance from a HAL CAN peripheral.
    ///
    /// * `id` – identity handed to the router with every received frame
    /// * `hal_can` – the HAL CAN wrapper
    /// * `btr` – value for the CAN_BTR register (bit timing). Get this from the
    ///           reference manual or the bxcan timing tables.
    /// * `loopback` – enable internal loopback
    /// * `silent` – enable silent mode
    pub fn new(id: BusId, hal_can: hal_can::Can<I>, btr: u32, loopback: bool, silent: bool) -> Self {
        let can = bxcan::Can::builder(hal_can)
            .set_bit_timing(btr)
            .set_loopback(loopback)
            .set_silent(silent)
            .enable();

        Self { can, id }
    }

    #[inline]
    pub fn id(&self) -> BusId {
        self.id
    }

    /// Access the underlying bxcan instance for advanced configuration.
    pub fn inner(&mut self) -> &mut bxcan::Can<hal_can::Can<I>> {
        &mut self.can
    }

    /// Consume the wrapper and get back the underlying HAL CAN instance.
    pub fn free(self) -> hal_can::Can<I> {
        self.can.free()
    }

    /// Non-blocking receive. `WouldBlock` when both FIFOs are empty.
    pub fn try_receive(&mut self) -> nb::Result<Frame, OverrunError> {
        self.can.receive()
    }
}

/// Extra helpers for CAN instances that own filters (CAN1 on STM32F7).
impl<I> CanBus<I>
where
    hal_can::Can<I>: bxcan::Instance + bxcan::FilterOwner,
{
    /// Accept every frame into FIFO0 through filter bank 0.
    pub fn configure_accept_all_filters(&mut self) {
        self.can
            .modify_filters()
            .enable_bank(0, Fifo::Fifo0, Mask32::accept_all());
    }
}

impl<I> CanTx for CanBus<I>
where
    hal_can::Can<I>: bxcan::Instance,
{
    /// Queue `frame` in a free mailbox. A lower-priority pending frame may be displaced; it is
    /// not requeued.
    fn transmit(&mut self, frame: &Frame) -> Result<(), TxError> {
        match self.can.transmit(frame) {
            Ok(status) => {
                if status.dequeued_frame().is_some() {
                    trace!("can {=u8}: displaced a pending frame", self.id.0);
                }
                Ok(())
            }
            Err(nb::Error::WouldBlock) => Err(TxError::Busy),
            Err(nb::Error::Other(never)) => match never {},
        }
    }
}
