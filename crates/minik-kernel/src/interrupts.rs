//! Interrupt handlers and boot
//!
//! One handler per interrupt class. Each runs under the mask its class needs;
//! anything that touches a queue or a counter raises to the clock level.

use minik_hal::{Interrupt, InterruptLevel, HAL};

use crate::critical::IrqGuard;
use crate::state::KernelState;

impl<H: HAL> KernelState<H> {
    /// Install the handlers, start the clock and dispatch the init process.
    ///
    /// A missing init program halts the system.
    pub fn boot(&mut self, hal: &H) {
        for irq in Interrupt::ALL {
            hal.install_handler(irq);
        }
        hal.start_clock(self.config.ticks_per_second);
        self.log(
            hal,
            "boot",
            &alloc::format!(
                "clock at {} Hz, {} process slots, {} mutexes",
                self.config.ticks_per_second,
                self.config.max_processes,
                self.config.max_mutexes
            ),
        );

        let init = self.config.init_program.clone();
        if self.spawn(hal, &init).is_err() {
            hal.fatal(&alloc::format!("init program '{}' not found", init));
        }
        self.reschedule(hal);
    }

    /// Entry point for every interrupt and trap.
    pub fn handle_interrupt(&mut self, hal: &H, irq: Interrupt) {
        match irq {
            Interrupt::Clock => self.handle_clock(hal),
            Interrupt::Terminal => self.handle_terminal(hal),
            Interrupt::Software => self.handle_software(hal),
            Interrupt::Syscall => self.handle_syscall(hal),
            Interrupt::ArithmeticFault | Interrupt::MemoryFault => self.handle_exception(hal, irq),
        }
    }

    /// Clock tick: accounting, sleeper wakeup, quantum expiry.
    pub(crate) fn handle_clock(&mut self, hal: &H) {
        let _mask = IrqGuard::new(hal, InterruptLevel::Clock);
        self.ticks += 1;

        if let Some(pid) = self.running {
            let pd = &mut self.processes[pid];
            if hal.from_user_mode() {
                pd.user_ticks += 1;
                self.user_ticks += 1;
            } else {
                pd.system_ticks += 1;
                self.system_ticks += 1;
            }
            self.quantum_used += 1;
        }

        self.wake_sleepers(hal);

        if let Some(pid) = self.running {
            if self.quantum_used == self.config.ticks_per_slice {
                self.log(hal, "sched", &alloc::format!("quantum of process {} expired", pid));
                hal.raise_software_interrupt();
            }
        }
    }

    /// Terminal input: buffer the byte and wake one reader.
    pub(crate) fn handle_terminal(&mut self, hal: &H) {
        let _mask = IrqGuard::new(hal, InterruptLevel::Terminal);
        let byte = hal.read_terminal();
        if !self.terminal.push(byte) {
            self.log(
                hal,
                "term",
                &alloc::format!(
                    "buffer full, dropped {:#04x} ({} lost so far)",
                    byte,
                    self.terminal.dropped()
                ),
            );
        }

        let _all = IrqGuard::new(hal, InterruptLevel::Clock);
        self.wake_terminal_reader();
    }

    /// Software interrupt: rotate the running process to the back of the queue.
    fn handle_software(&mut self, hal: &H) {
        let _mask = IrqGuard::new(hal, InterruptLevel::Software);
        if self.running.is_none() {
            return;
        }
        self.reschedule(hal);
    }

    /// Arithmetic or memory exception.
    ///
    /// Fatal when taken in kernel mode, except for a memory fault inside the
    /// guarded user-access window, which is charged to the caller.
    fn handle_exception(&mut self, hal: &H, irq: Interrupt) {
        let user = hal.from_user_mode();
        match irq {
            Interrupt::ArithmeticFault if !user => {
                hal.fatal("arithmetic exception in kernel mode")
            }
            Interrupt::MemoryFault if !user && !self.user_access => {
                hal.fatal("memory exception in kernel mode")
            }
            _ => {}
        }
        self.user_access = false;

        let pid = self.current(hal);
        self.log(
            hal,
            "proc",
            &alloc::format!("process {} killed by {:?}", pid, irq),
        );
        self.terminate_running(hal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::types::{ProcessId, ProcessState};
    use minik_hal_mock::MockHal;

    fn booted_with_worker() -> (MockHal, KernelState<MockHal>) {
        let hal = MockHal::with_programs(&["init", "worker"]);
        let mut state = KernelState::new(KernelConfig::default());
        state.boot(&hal);
        state.spawn(&hal, "worker").unwrap();
        (hal, state)
    }

    #[test]
    fn test_memory_fault_inside_user_copy_kills_caller() {
        let (hal, mut state) = booted_with_worker();

        // Kernel-mode fault while copying on behalf of process 0
        state.user_access = true;
        hal.set_user_mode(false);
        state.handle_interrupt(&hal, Interrupt::MemoryFault);

        assert!(!state.user_access);
        assert_eq!(state.running, Some(ProcessId(1)));
        assert_eq!(state.processes[ProcessId(0)].state, ProcessState::Unused);
        assert_eq!(hal.loaded_program().as_deref(), Some("worker"));
        assert!(hal.has_log_containing("process 0 killed by MemoryFault"));
        assert!(!hal.has_log_containing("FATAL"));
    }

    #[test]
    #[should_panic(expected = "kernel fatal: memory exception in kernel mode")]
    fn test_memory_fault_outside_user_copy_is_fatal() {
        let (hal, mut state) = booted_with_worker();
        hal.set_user_mode(false);
        state.handle_interrupt(&hal, Interrupt::MemoryFault);
    }

    #[test]
    fn test_terminal_overflow_is_counted() {
        let (hal, mut state) = booted_with_worker();
        for byte in b"0123456789" {
            hal.press_key(*byte);
            state.handle_interrupt(&hal, Interrupt::Terminal);
        }

        assert_eq!(state.terminal.len(), 8);
        assert_eq!(state.terminal.dropped(), 2);
        assert!(hal.has_log_containing("dropped 0x39 (2 lost so far)"));
    }
}
