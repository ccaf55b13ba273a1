// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Feedback routing from received CAN frames to the motor that sent them.
//!
//! Every backend family gets one route table per physical bus, created the first time a motor on
//! that bus registers. Tables are fixed-size arrays indexed by device address, so dispatching a
//! frame is a short scan over at most [`MAX_BUSES`] tables plus one array lookup.
//!
//! Identifier classification:
//! - standard `0x201..=0x208`: DJI, address = id - 0x200
//! - any other standard id: DM, address = low nibble of byte 0, must arrive on the motor's
//!   master id
//! - extended id: VESC, address = bits 0..=7, packet = bits 8..=15
//!
//! All motors must be registered before the first call to [`Router::dispatch`]; frames for
//! unregistered addresses are dropped and counted.

use super::{BusId, CanTx, TxError};
use crate::drivers::{
    dji::{self, CurrentGroup, FEEDBACK_ID_BASE},
    DjiMotor, DmMotor, VescMotor, VescPacket,
};

use bxcan::{Frame, Id};
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use heapless::Vec;

/// Physical buses a router can track per family.
pub const MAX_BUSES: usize = 4;

const DJI_SLOTS: usize = 8;
const DM_SLOTS: usize = 16;
const VESC_SLOTS: usize = 16;

/// Registration failure. Always a wiring or configuration mistake.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouteError {
    /// Another motor of the same family already owns this address on this bus.
    AddressInUse { bus: BusId, address: u16 },
    /// The family cannot address a device with this id.
    AddressOutOfRange { address: u16 },
    /// Every table slot for the family is taken by other buses.
    TooManyBuses { bus: BusId },
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::AddressInUse { bus, address } => {
                write!(f, "address {:#x} already registered on bus {}", address, bus.0)
            }
            RouteError::AddressOutOfRange { address } => {
                write!(f, "address {:#x} out of range", address)
            }
            RouteError::TooManyBuses { bus } => {
                write!(f, "no route table left for bus {}", bus.0)
            }
        }
    }
}

/// Why a frame was not decoded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DropReason {
    /// Remote frame, empty payload, or a payload too short for its packet.
    Malformed,
    /// No motor registered at the frame's address on this bus.
    Unrouted,
    /// DM feedback on an identifier other than the motor's master id.
    MasterIdMismatch,
    /// VESC packet type that carries no feedback read here.
    UnknownPacket,
}

/// Outcome of [`Router::dispatch`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    Decoded,
    Dropped(DropReason),
}

impl Dispatch {
    fn from_decode(ok: bool) -> Self {
        if ok {
            Dispatch::Decoded
        } else {
            Dispatch::Dropped(DropReason::Malformed)
        }
    }
}

struct RouteTable<'a, M, const N: usize> {
    bus: BusId,
    slots: [Option<&'a M>; N],
}

/// Route tables of one family across buses.
struct Registry<'a, M, const N: usize> {
    tables: Vec<RouteTable<'a, M, N>, MAX_BUSES>,
}

impl<'a, M, const N: usize> Registry<'a, M, N> {
    const fn new() -> Self {
        Self { tables: Vec::new() }
    }

    fn get(&self, bus: BusId, index: usize) -> Option<&'a M> {
        self.tables
            .iter()
            .find(|t| t.bus == bus)
            .and_then(|t| t.slots.get(index).copied().flatten())
    }

    fn insert(
        &mut self,
        bus: BusId,
        index: usize,
        address: u16,
        motor: &'a M,
    ) -> Result<(), RouteError> {
        if index >= N {
            return Err(RouteError::AddressOutOfRange { address });
        }

        let pos = match self.tables.iter().position(|t| t.bus == bus) {
            Some(pos) => pos,
            None => {
                self.tables
                    .push(RouteTable {
                        bus,
                        slots: [None; N],
                    })
                    .map_err(|_| RouteError::TooManyBuses { bus })?;
                self.tables.len() - 1
            }
        };

        let slot = &mut self.tables[pos].slots[index];
        if slot.is_some() {
            return Err(RouteError::AddressInUse { bus, address });
        }
        *slot = Some(motor);
        Ok(())
    }
}

/// Per-bus feedback router for every CAN backend.
pub struct Router<'a> {
    dji: Registry<'a, DjiMotor, DJI_SLOTS>,
    dm: Registry<'a, DmMotor, DM_SLOTS>,
    vesc: Registry<'a, VescMotor, VESC_SLOTS>,
    decoded: AtomicU32,
    dropped: AtomicU32,
}

impl<'a> Router<'a> {
    pub const fn new() -> Self {
        Self {
            dji: Registry::new(),
            dm: Registry::new(),
            vesc: Registry::new(),
            decoded: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Register a DJI motor (ids 1..=8) on its bus.
    pub fn register_dji(&mut self, motor: &'a DjiMotor) -> Result<(), RouteError> {
        let id = motor.id();
        let index = match id {
            1..=8 => (id - 1) as usize,
            _ => return Err(RouteError::AddressOutOfRange { address: id as u16 }),
        };
        self.dji.insert(motor.bus(), index, id as u16, motor)?;
        debug!("router: dji {=u8} on bus {=u8}", id, motor.bus().0);
        Ok(())
    }

    /// Register a DM actuator (addresses 0..=15) on its bus.
    pub fn register_dm(&mut self, motor: &'a DmMotor) -> Result<(), RouteError> {
        let id = motor.id();
        self.dm.insert(motor.bus(), id as usize, id as u16, motor)?;
        debug!("router: dm {=u8} on bus {=u8}", id, motor.bus().0);
        Ok(())
    }

    /// Register a VESC (controller ids 0..=15) on its bus.
    pub fn register_vesc(&mut self, motor: &'a VescMotor) -> Result<(), RouteError> {
        let id = motor.id();
        self.vesc.insert(motor.bus(), id as usize, id as u16, motor)?;
        debug!("router: vesc {=u8} on bus {=u8}", id, motor.bus().0);
        Ok(())
    }

    #[inline]
    pub fn dji(&self, bus: BusId, id: u8) -> Option<&'a DjiMotor> {
        self.dji.get(bus, (id as usize).wrapping_sub(1))
    }

    #[inline]
    pub fn dm(&self, bus: BusId, id: u8) -> Option<&'a DmMotor> {
        self.dm.get(bus, id as usize)
    }

    #[inline]
    pub fn vesc(&self, bus: BusId, id: u8) -> Option<&'a VescMotor> {
        self.vesc.get(bus, id as usize)
    }

    /// Decode `frame`, received on `bus`, into the telemetry of the motor that sent it.
    ///
    /// Safe to call from the CAN receive interrupt: bounded work, no allocation, and the only
    /// lock taken is the motor's telemetry critical section.
    pub fn dispatch(&self, bus: BusId, frame: &Frame) -> Dispatch {
        let outcome = self.route(bus, frame);
        match outcome {
            Dispatch::Decoded => {
                self.decoded.fetch_add(1, Ordering::Relaxed);
            }
            Dispatch::Dropped(reason) => {
                trace!("router: bus {=u8} dropped frame: {}", bus.0, reason);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    fn route(&self, bus: BusId, frame: &Frame) -> Dispatch {
        let data = match frame.data() {
            Some(data) if !data.is_empty() => data,
            _ => return Dispatch::Dropped(DropReason::Malformed),
        };

        match frame.id() {
            Id::Standard(id) => {
                let raw = id.as_raw();
                if (FEEDBACK_ID_BASE + 1..=FEEDBACK_ID_BASE + DJI_SLOTS as u16).contains(&raw) {
                    let index = (raw - FEEDBACK_ID_BASE - 1) as usize;
                    let Some(motor) = self.dji.get(bus, index) else {
                        return Dispatch::Dropped(DropReason::Unrouted);
                    };
                    return Dispatch::from_decode(motor.decode(data));
                }

                let address = (data[0] & 0x0F) as usize;
                let Some(motor) = self.dm.get(bus, address) else {
                    return Dispatch::Dropped(DropReason::Unrouted);
                };
                if motor.master_id() != raw {
                    return Dispatch::Dropped(DropReason::MasterIdMismatch);
                }
                Dispatch::from_decode(motor.decode(data))
            }
            Id::Extended(id) => {
                let raw = id.as_raw();
                let address = (raw & 0xFF) as usize;
                let packet = match VescPacket::from_u8((raw >> 8) as u8) {
                    Some(p @ (VescPacket::Status | VescPacket::Status5)) => p,
                    _ => return Dispatch::Dropped(DropReason::UnknownPacket),
                };
                let Some(motor) = self.vesc.get(bus, address) else {
                    return Dispatch::Dropped(DropReason::Unrouted);
                };
                Dispatch::from_decode(motor.decode(packet, data))
            }
        }
    }

    /// Frames decoded since construction.
    pub fn decoded_frames(&self) -> u32 {
        self.decoded.load(Ordering::Relaxed)
    }

    /// Frames dropped since construction, for any [`DropReason`].
    pub fn dropped_frames(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send the group current frame for the DJI motors registered on `bus`. Empty slots send 0.
    pub fn send_dji_currents<T: CanTx>(
        &self,
        bus: BusId,
        group: CurrentGroup,
        tx: &mut T,
    ) -> Result<(), TxError> {
        let first = group.first_slot();
        let motors = [0, 1, 2, 3].map(|i| self.dji.get(bus, first + i));
        tx.transmit(&dji::encode_current_group(group, motors))
    }
}

impl Default for Router<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{DjiConfig, DjiKind, DmConfig, DmKind, DmMode, VescConfig};
    use bxcan::{Data, ExtendedId, StandardId};

    struct Recorder(std::vec::Vec<Frame>);

    impl CanTx for Recorder {
        fn transmit(&mut self, frame: &Frame) -> Result<(), TxError> {
            self.0.push(frame.clone());
            Ok(())
        }
    }

    fn std_frame(id: u16, data: [u8; 8]) -> Frame {
        Frame::new_data(StandardId::new(id).unwrap(), Data::from(data))
    }

    fn dji(id: u8, bus: BusId) -> DjiMotor {
        DjiMotor::new(DjiConfig::new(DjiKind::M3508C620, bus, id))
    }

    #[test]
    fn duplicate_address_keeps_first_registration() {
        let first = dji(3, BusId::CAN1);
        let second = dji(3, BusId::CAN1);
        let mut router = Router::new();
        router.register_dji(&first).unwrap();
        assert_eq!(
            router.register_dji(&second),
            Err(RouteError::AddressInUse {
                bus: BusId::CAN1,
                address: 3
            })
        );
        assert!(core::ptr::eq(router.dji(BusId::CAN1, 3).unwrap(), &first));
    }

    #[test]
    fn same_address_on_other_bus_is_independent() {
        let a = dji(1, BusId::CAN1);
        let b = dji(1, BusId::CAN2);
        let mut router = Router::new();
        router.register_dji(&a).unwrap();
        router.register_dji(&b).unwrap();

        router.dispatch(BusId::CAN2, &std_frame(0x201, [0, 0x10, 0x00, 0x01, 0x00, 0, 0, 0]));
        assert_eq!(b.feedback().frames, 1);
        assert_eq!(a.feedback().frames, 0);
    }

    #[test]
    fn out_of_range_addresses_are_rejected() {
        let zero = dji(0, BusId::CAN1);
        let nine = dji(9, BusId::CAN1);
        let dm = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 16, DmMode::Mit));
        let mut router = Router::new();
        assert_eq!(
            router.register_dji(&zero),
            Err(RouteError::AddressOutOfRange { address: 0 })
        );
        assert_eq!(
            router.register_dji(&nine),
            Err(RouteError::AddressOutOfRange { address: 9 })
        );
        assert_eq!(
            router.register_dm(&dm),
            Err(RouteError::AddressOutOfRange { address: 16 })
        );
    }

    #[test]
    fn bus_capacity_is_bounded() {
        let motors: std::vec::Vec<_> = (0..=MAX_BUSES as u8).map(|b| dji(1, BusId(b))).collect();
        let mut router = Router::new();
        for m in &motors[..MAX_BUSES] {
            router.register_dji(m).unwrap();
        }
        assert_eq!(
            router.register_dji(&motors[MAX_BUSES]),
            Err(RouteError::TooManyBuses {
                bus: BusId(MAX_BUSES as u8)
            })
        );
    }

    #[test]
    fn routes_dji_by_identifier() {
        let m = dji(4, BusId::CAN1);
        let mut router = Router::new();
        router.register_dji(&m).unwrap();

        let out = router.dispatch(BusId::CAN1, &std_frame(0x204, [0, 0x10, 0x00, 0, 0, 0, 0, 0]));
        assert_eq!(out, Dispatch::Decoded);
        assert_eq!(m.feedback().frames, 1);
        assert_eq!(router.decoded_frames(), 1);

        let out = router.dispatch(BusId::CAN1, &std_frame(0x205, [0; 8]));
        assert_eq!(out, Dispatch::Dropped(DropReason::Unrouted));
        assert_eq!(router.dropped_frames(), 1);
    }

    #[test]
    fn routes_dm_by_payload_address_on_master_id() {
        let m = DmMotor::new(DmConfig::new(DmKind::S3519, BusId::CAN1, 5, DmMode::Velocity));
        let mut router = Router::new();
        router.register_dm(&m).unwrap();

        let payload = [0x05, 0x80, 0x00, 0x80, 0x08, 0x00, 30, 30];
        assert_eq!(
            router.dispatch(BusId::CAN1, &std_frame(0x114, payload)),
            Dispatch::Decoded
        );
        assert_eq!(m.feedback().frames, 1);

        assert_eq!(
            router.dispatch(BusId::CAN1, &std_frame(0x115, payload)),
            Dispatch::Dropped(DropReason::MasterIdMismatch)
        );
        let mut other = payload;
        other[0] = 0x06;
        assert_eq!(
            router.dispatch(BusId::CAN1, &std_frame(0x114, other)),
            Dispatch::Dropped(DropReason::Unrouted)
        );
        assert_eq!(m.feedback().frames, 1);
    }

    #[test]
    fn routes_vesc_status_by_extended_id() {
        let m = VescMotor::new(VescConfig::new(BusId::CAN1, 7, 7));
        let mut router = Router::new();
        router.register_vesc(&m).unwrap();

        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&1400i32.to_be_bytes());
        let id = ExtendedId::new(0x907).unwrap();
        let out = router.dispatch(BusId::CAN1, &Frame::new_data(id, Data::from(data)));
        assert_eq!(out, Dispatch::Decoded);
        assert_eq!(m.velocity(), 200.0);

        let id = ExtendedId::new(0x307).unwrap();
        let out = router.dispatch(BusId::CAN1, &Frame::new_data(id, Data::from(data)));
        assert_eq!(out, Dispatch::Dropped(DropReason::UnknownPacket));
    }

    #[test]
    fn remote_and_empty_frames_are_malformed() {
        let router = Router::new();
        let id = StandardId::new(0x201).unwrap();
        assert_eq!(
            router.dispatch(BusId::CAN1, &Frame::new_remote(id, 8)),
            Dispatch::Dropped(DropReason::Malformed)
        );
        assert_eq!(
            router.dispatch(BusId::CAN1, &Frame::new_data(id, Data::empty())),
            Dispatch::Dropped(DropReason::Malformed)
        );
        assert_eq!(router.dropped_frames(), 2);
    }

    #[test]
    fn group_current_uses_registered_slots() {
        let m1 = dji(1, BusId::CAN1);
        let m6 = dji(6, BusId::CAN1);
        let mut router = Router::new();
        router.register_dji(&m1).unwrap();
        router.register_dji(&m6).unwrap();
        m1.set_current(256.0);
        m6.set_current(-1.0);

        let mut tx = Recorder(std::vec::Vec::new());
        router
            .send_dji_currents(BusId::CAN1, CurrentGroup::Ids1To4, &mut tx)
            .unwrap();
        router
            .send_dji_currents(BusId::CAN1, CurrentGroup::Ids5To8, &mut tx)
            .unwrap();

        assert_eq!(&tx.0[0].data().unwrap()[..], &[0x01, 0x00, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&tx.0[1].data().unwrap()[..], &[0, 0, 0xFF, 0xFF, 0, 0, 0, 0]);
        assert_eq!(tx.0[1].id(), Id::Standard(StandardId::new(0x1FF).unwrap()));
    }
}
