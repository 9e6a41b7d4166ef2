//! System: the kernel bound to its HAL
//!
//! `System` owns the HAL and the kernel state and is what a platform (or a
//! test) drives: boot once, then feed it every interrupt.

use alloc::vec::Vec;

use minik_audit::SysLog;
use minik_hal::{Interrupt, HAL};

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::invariants::{check_all_invariants, InvariantViolation};
use crate::queue::WaitQueue;
use crate::state::KernelState;
use crate::types::{MutexId, MutexInfo, ProcessId, ProcessInfo, ProcessState, ProcessTimes, Tick};

/// The kernel
pub struct System<H: HAL> {
    hal: H,
    state: KernelState<H>,
}

impl<H: HAL> System<H> {
    /// Create a kernel with the default configuration.
    pub fn new(hal: H) -> Self {
        Self {
            hal,
            state: KernelState::new(KernelConfig::default()),
        }
    }

    /// Create a kernel with a custom configuration.
    pub fn with_config(hal: H, config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        Ok(Self {
            hal,
            state: KernelState::new(config),
        })
    }

    /// Install handlers, start the clock and run the init program.
    pub fn boot(&mut self) {
        self.state.boot(&self.hal);
    }

    /// Deliver an interrupt or trap.
    pub fn handle_interrupt(&mut self, irq: Interrupt) {
        self.state.handle_interrupt(&self.hal, irq);
    }

    /// Create a process directly, as `create_process` would.
    pub fn spawn(&mut self, program: &str) -> Result<ProcessId, KernelError> {
        self.state.spawn(&self.hal, program)
    }

    /// Get a reference to the HAL
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Get a reference to the kernel state
    pub fn state(&self) -> &KernelState<H> {
        &self.state
    }

    pub fn config(&self) -> &KernelConfig {
        &self.state.config
    }

    /// Clock ticks since boot
    pub fn ticks(&self) -> Tick {
        self.state.ticks
    }

    /// System-wide tick accounting
    pub fn times(&self) -> ProcessTimes {
        ProcessTimes {
            user: self.state.user_ticks.min(u32::MAX as u64) as u32,
            system: self.state.system_ticks.min(u32::MAX as u64) as u32,
        }
    }

    /// Process owning the CPU
    pub fn running(&self) -> Option<ProcessId> {
        self.state.running
    }

    /// Completed rotations
    pub fn rotations(&self) -> u64 {
        self.state.rotations
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Snapshot of a live process
    pub fn process_info(&self, pid: ProcessId) -> Option<ProcessInfo> {
        self.state
            .processes
            .get(pid)
            .filter(|pd| pd.state != ProcessState::Unused)
            .map(|pd| pd.info())
    }

    /// Snapshots of every live process
    pub fn list_processes(&self) -> Vec<ProcessInfo> {
        self.state.processes.live().map(|pd| pd.info()).collect()
    }

    /// Snapshot of a mutex slot (Free slots included)
    pub fn mutex_info(&self, id: MutexId) -> Option<MutexInfo> {
        self.state.mutex_info(id)
    }

    /// Snapshots of every created mutex
    pub fn list_mutexes(&self) -> Vec<MutexInfo> {
        self.state
            .mutexes
            .iter()
            .filter(|m| !m.is_free())
            .filter_map(|m| self.state.mutex_info(m.id))
            .collect()
    }

    fn members(&self, queue: &WaitQueue) -> Vec<ProcessId> {
        queue.iter(&self.state.processes).collect()
    }

    /// Ready queue, head first
    pub fn ready_queue(&self) -> Vec<ProcessId> {
        self.members(&self.state.ready)
    }

    /// Processes in a timed sleep
    pub fn sleeping_on_timer(&self) -> Vec<ProcessId> {
        self.members(&self.state.sleeping_timer)
    }

    /// Processes waiting for a free mutex slot
    pub fn sleeping_for_mutex_slot(&self) -> Vec<ProcessId> {
        self.members(&self.state.sleeping_mutex_slot)
    }

    /// Processes waiting for terminal input
    pub fn sleeping_on_terminal(&self) -> Vec<ProcessId> {
        self.members(&self.state.sleeping_terminal)
    }

    /// Bytes waiting in the terminal buffer
    pub fn terminal_pending(&self) -> usize {
        self.state.terminal.len()
    }

    /// Get a reference to the SysLog
    pub fn syslog(&self) -> &SysLog {
        &self.state.syslog
    }

    /// Check all kernel invariants.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        check_all_invariants(&self.state)
    }
}
