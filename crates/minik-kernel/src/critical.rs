//! Interrupt-mask guard
//!
//! Every critical section in the kernel is an `IrqGuard` scope: the mask is
//! set on construction and the previous level comes back on drop, on every
//! exit path.

use minik_hal::{InterruptLevel, HAL};

/// RAII interrupt-mask section
#[must_use = "the previous mask level is restored when the guard is dropped"]
pub struct IrqGuard<'a, H: HAL> {
    hal: &'a H,
    previous: InterruptLevel,
}

impl<'a, H: HAL> IrqGuard<'a, H> {
    /// Set the mask to `level` until the guard is dropped.
    ///
    /// `level` may be lower than the current one (the idle wait opens the
    /// mask while halted).
    pub fn new(hal: &'a H, level: InterruptLevel) -> Self {
        let previous = hal.set_interrupt_level(level);
        Self { hal, previous }
    }
}

impl<H: HAL> Drop for IrqGuard<'_, H> {
    fn drop(&mut self) {
        self.hal.set_interrupt_level(self.previous);
    }
}
