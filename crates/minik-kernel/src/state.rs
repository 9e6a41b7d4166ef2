//! Kernel state
//!
//! `KernelState` owns every table and queue. Its methods take the HAL as a
//! separate argument so an `IrqGuard` borrowing the HAL can stay alive while
//! the state is mutated.

use alloc::string::String;
use alloc::vec::Vec;

use minik_audit::SysLog;
use minik_hal::{InterruptLevel, HAL};

use crate::config::KernelConfig;
use crate::critical::IrqGuard;
use crate::error::KernelError;
use crate::mutex::Mutex;
use crate::process::ProcessTable;
use crate::queue::WaitQueue;
use crate::terminal::TerminalBuffer;
use crate::types::{BlockReason, MutexId, ProcessId, ProcessState, Tick};

/// Longest program path accepted by `create_process`
pub const MAX_PATH_LEN: usize = 256;

/// All mutable kernel state
pub struct KernelState<H: HAL> {
    /// Capacities and timing
    pub config: KernelConfig,
    /// Process table
    pub processes: ProcessTable<H>,
    /// Mutex table
    pub mutexes: Vec<Mutex>,
    /// Process owning the CPU
    pub running: Option<ProcessId>,
    /// Runnable processes, FIFO
    pub ready: WaitQueue,
    /// Processes in a timed sleep
    pub sleeping_timer: WaitQueue,
    /// Processes waiting for a free mutex slot
    pub sleeping_mutex_slot: WaitQueue,
    /// Processes waiting for terminal input
    pub sleeping_terminal: WaitQueue,
    /// Terminal input buffer
    pub terminal: TerminalBuffer,
    /// Clock ticks since boot
    pub ticks: Tick,
    /// Ticks taken while a process ran in user mode
    pub user_ticks: u64,
    /// Ticks taken while a process ran in kernel mode
    pub system_ticks: u64,
    /// Ticks consumed by the running process since it was dispatched
    pub quantum_used: u32,
    /// Completed rotations
    pub rotations: u64,
    /// Set while the kernel is touching user memory on a caller's behalf
    pub user_access: bool,
    /// Syscall audit trail
    pub syslog: SysLog,
}

impl<H: HAL> KernelState<H> {
    /// Create empty tables sized by `config`.
    pub fn new(config: KernelConfig) -> Self {
        let mutexes = (0..config.max_mutexes)
            .map(|i| Mutex::free(MutexId(i as u32)))
            .collect();
        Self {
            processes: ProcessTable::new(config.max_processes, config.max_mutexes_per_process),
            mutexes,
            running: None,
            ready: WaitQueue::new(),
            sleeping_timer: WaitQueue::new(),
            sleeping_mutex_slot: WaitQueue::new(),
            sleeping_terminal: WaitQueue::new(),
            terminal: TerminalBuffer::new(config.terminal_buffer_size),
            ticks: 0,
            user_ticks: 0,
            system_ticks: 0,
            quantum_used: 0,
            rotations: 0,
            user_access: false,
            syslog: SysLog::new(),
            config,
        }
    }

    /// Emit a diagnostic line stamped with the current time.
    pub(crate) fn log(&self, hal: &H, subsystem: &str, msg: &str) {
        let tps = self.config.ticks_per_second as u64;
        hal.debug_write(&alloc::format!(
            "[{}.{:03}] [{}] {}",
            self.ticks / tps,
            (self.ticks % tps) * 1000 / tps,
            subsystem,
            msg
        ));
    }

    /// Running process, or a fatal halt if a handler that needs one finds none.
    pub(crate) fn current(&self, hal: &H) -> ProcessId {
        match self.running {
            Some(pid) => pid,
            None => hal.fatal("no running process"),
        }
    }

    // ========================================================================
    // Queue moves
    // ========================================================================

    /// Mark `pid` Ready and append it to the ready queue.
    pub(crate) fn make_ready(&mut self, pid: ProcessId) {
        self.processes[pid].state = ProcessState::Ready;
        self.ready.push_back(&mut self.processes, pid);
    }

    /// Put a Blocked process on the queue its block reason names.
    pub(crate) fn enqueue_blocked(&mut self, hal: &H, pid: ProcessId) {
        let queue = match self.processes[pid].pending {
            Some(BlockReason::Timer) => &mut self.sleeping_timer,
            Some(BlockReason::MutexLock(id)) => match self.mutexes.get_mut(id.index()) {
                Some(mutex) => &mut mutex.waiters,
                None => hal.fatal("blocked on a mutex that does not exist"),
            },
            Some(BlockReason::MutexSlot { .. }) => &mut self.sleeping_mutex_slot,
            Some(BlockReason::TerminalInput) => &mut self.sleeping_terminal,
            None => hal.fatal("blocked process has no block reason"),
        };
        queue.push_back(&mut self.processes, pid);
    }

    /// Move every timed sleeper whose wake tick has passed to the ready queue.
    pub(crate) fn wake_sleepers(&mut self, hal: &H) {
        let now = self.ticks;
        let due: Vec<ProcessId> = self
            .sleeping_timer
            .iter(&self.processes)
            .filter(|pid| self.processes[*pid].wake_tick <= now)
            .collect();
        for pid in due {
            self.sleeping_timer.remove(&mut self.processes, pid);
            self.make_ready(pid);
            self.log(hal, "sched", &alloc::format!("process {} woke from sleep", pid));
        }
    }

    /// Wake the first process waiting for a free mutex slot.
    pub(crate) fn wake_mutex_slot_waiter(&mut self) {
        if let Some(pid) = self.sleeping_mutex_slot.pop_front(&mut self.processes) {
            self.make_ready(pid);
        }
    }

    /// Wake the first process waiting for terminal input.
    pub(crate) fn wake_terminal_reader(&mut self) {
        if let Some(pid) = self.sleeping_terminal.pop_front(&mut self.processes) {
            self.make_ready(pid);
        }
    }

    // ========================================================================
    // Process creation
    // ========================================================================

    /// Create a process running `program` and queue it as Ready.
    ///
    /// On failure the slot stays Unused and nothing is leaked.
    pub fn spawn(&mut self, hal: &H, program: &str) -> Result<ProcessId, KernelError> {
        let _mask = IrqGuard::new(hal, InterruptLevel::Clock);

        let pid = self.processes.allocate()?;
        let (image, entry) = hal.create_image(program)?;
        let stack = match hal.create_stack(self.config.stack_size) {
            Ok(stack) => stack,
            Err(e) => {
                hal.release_image(image);
                return Err(e.into());
            }
        };
        let context = hal.initial_context(&image, &stack, entry);

        let now = self.ticks;
        let pd = &mut self.processes[pid];
        pd.program = String::from(program);
        pd.context = context;
        pd.image = Some(image);
        pd.stack = Some(stack);
        pd.created_at = now;
        pd.wake_tick = 0;
        pd.user_ticks = 0;
        pd.system_ticks = 0;
        pd.pending = None;
        pd.pending_request = None;
        self.make_ready(pid);

        self.log(
            hal,
            "proc",
            &alloc::format!("created process {} from '{}'", pid, program),
        );
        Ok(pid)
    }

    // ========================================================================
    // Guarded user-memory access
    // ========================================================================

    pub(crate) fn copy_from_user(
        &mut self,
        hal: &H,
        addr: u64,
        buf: &mut [u8],
    ) -> Result<(), KernelError> {
        self.user_access = true;
        let result = hal.copy_from_user(addr, buf);
        self.user_access = false;
        Ok(result?)
    }

    pub(crate) fn copy_to_user(&mut self, hal: &H, addr: u64, data: &[u8]) -> Result<(), KernelError> {
        self.user_access = true;
        let result = hal.copy_to_user(addr, data);
        self.user_access = false;
        Ok(result?)
    }

    pub(crate) fn read_user_bytes(
        &mut self,
        hal: &H,
        addr: u64,
        max_len: usize,
    ) -> Result<Vec<u8>, KernelError> {
        self.user_access = true;
        let result = hal.read_user_bytes(addr, max_len);
        self.user_access = false;
        Ok(result?)
    }

    pub(crate) fn read_user_str(
        &mut self,
        hal: &H,
        addr: u64,
        max_len: usize,
    ) -> Result<String, KernelError> {
        self.user_access = true;
        let result = hal.read_user_str(addr, max_len);
        self.user_access = false;
        Ok(result?)
    }
}
