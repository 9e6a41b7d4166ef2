//! Round-robin scheduler
//!
//! Strict FIFO over the ready queue. When nothing is runnable the CPU idles:
//! the mask is opened down to the software level, the CPU halts, and the
//! interrupt that woke it is serviced before the queue is checked again.

use minik_hal::{Interrupt, InterruptLevel, HAL};

use crate::critical::IrqGuard;
use crate::state::KernelState;
use crate::types::ProcessId;

impl<H: HAL> KernelState<H> {
    /// Head of the ready queue, idling until there is one.
    ///
    /// The head is left in the queue; the caller dequeues it.
    pub(crate) fn pick_next(&mut self, hal: &H) -> ProcessId {
        if self.ready.is_empty() {
            self.log(hal, "sched", "idle");
        }
        loop {
            if let Some(pid) = self.ready.front() {
                return pid;
            }
            let _idle = IrqGuard::new(hal, InterruptLevel::Software);
            let irq = hal.halt();
            self.service_idle_interrupt(hal, irq);
        }
    }

    /// Service an interrupt taken while no process is running.
    fn service_idle_interrupt(&mut self, hal: &H, irq: Interrupt) {
        match irq {
            Interrupt::Clock => self.handle_clock(hal),
            Interrupt::Terminal => self.handle_terminal(hal),
            // Nothing to preempt and nobody to trap on behalf of
            Interrupt::Software | Interrupt::Syscall => {}
            Interrupt::ArithmeticFault | Interrupt::MemoryFault => {
                hal.fatal("exception taken while idle")
            }
        }
    }
}
