// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Interrupt-safe storage for small `Copy` field groups.
//!
//! Telemetry is written by the CAN receive path and read by the control tick. Keeping each
//! group in one [`Shared`] cell means a reader always sees a complete update: the whole struct is
//! copied in or out inside a single critical section.

use core::cell::Cell;
use critical_section::Mutex;

/// A `Copy` value shared between interrupt and thread context.
pub struct Shared<T: Copy> {
    inner: Mutex<Cell<T>>,
}

impl<T: Copy> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Copy the current value out.
    #[inline]
    pub fn get(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Overwrite the current value.
    #[inline]
    pub fn set(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value))
    }

    /// Read-modify-write the value without another context observing the intermediate state.
    #[inline]
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut value = cell.get();
            let ret = f(&mut value);
            cell.set(value);
            ret
        })
    }
}

impl<T: Copy + Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
