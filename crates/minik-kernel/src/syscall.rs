//! Syscall definitions and dispatch
//!
//! This module contains:
//! - Canonical syscall number constants (ABI)
//! - Syscall enum for type-safe dispatch
//! - The syscall trap handler

use alloc::vec::Vec;

use minik_hal::{HalError, InterruptLevel, HAL, REG_ARG1, REG_ARG2, REG_ARG3, REG_SYSCALL};

use crate::critical::IrqGuard;
use crate::error::{KernelError, E_FAILED};
use crate::state::{KernelState, MAX_PATH_LEN};
use crate::types::{BlockReason, MutexId, MutexKind, ProcessId};

// ============================================================================
// Canonical Syscall Numbers (ABI)
// ============================================================================

/// Create a process from a program path
pub const SYS_CREATE_PROCESS: u64 = 0;
/// Terminate the calling process
pub const SYS_TERMINATE_PROCESS: u64 = 1;
/// Write a buffer to the console
pub const SYS_WRITE: u64 = 2;
/// Get the caller's process ID
pub const SYS_GET_PID: u64 = 3;
/// Sleep for a number of seconds
pub const SYS_SLEEP: u64 = 4;
/// Get the caller's tick accounting
pub const SYS_GET_PROCESS_TIMES: u64 = 5;
/// Create a named mutex
pub const SYS_CREATE_MUTEX: u64 = 6;
/// Open a named mutex
pub const SYS_OPEN_MUTEX: u64 = 7;
/// Lock a mutex
pub const SYS_LOCK: u64 = 8;
/// Unlock a mutex
pub const SYS_UNLOCK: u64 = 9;
/// Close a mutex descriptor
pub const SYS_CLOSE_MUTEX: u64 = 10;
/// Read one byte of terminal input
pub const SYS_READ_CHAR: u64 = 11;

/// Number of syscalls
pub const NUM_SYSCALLS: u64 = 12;

/// Bytes copied from user memory per console write
const WRITE_CHUNK: usize = 256;

/// Syscall request from a process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    /// Create a process (SYS_CREATE_PROCESS 0)
    CreateProcess { path: u64 },
    /// Terminate the caller (SYS_TERMINATE_PROCESS 1)
    TerminateProcess,
    /// Console write (SYS_WRITE 2)
    Write { buf: u64, len: u64 },
    /// Caller's pid (SYS_GET_PID 3)
    GetPid,
    /// Timed sleep (SYS_SLEEP 4)
    Sleep { seconds: u64 },
    /// Tick accounting (SYS_GET_PROCESS_TIMES 5)
    GetProcessTimes { out: u64 },
    /// Create a mutex (SYS_CREATE_MUTEX 6)
    CreateMutex { name: u64, kind: u64 },
    /// Open a mutex (SYS_OPEN_MUTEX 7)
    OpenMutex { name: u64 },
    /// Lock (SYS_LOCK 8)
    Lock { id: u64 },
    /// Unlock (SYS_UNLOCK 9)
    Unlock { id: u64 },
    /// Close a descriptor (SYS_CLOSE_MUTEX 10)
    CloseMutex { id: u64 },
    /// Terminal input (SYS_READ_CHAR 11)
    ReadChar,
}

impl Syscall {
    /// Decode the syscall number and argument registers.
    ///
    /// Returns `None` for an out-of-range number.
    pub fn decode(number: u64, args: [u64; 3]) -> Option<Self> {
        let [a1, a2, _] = args;
        Some(match number {
            SYS_CREATE_PROCESS => Syscall::CreateProcess { path: a1 },
            SYS_TERMINATE_PROCESS => Syscall::TerminateProcess,
            SYS_WRITE => Syscall::Write { buf: a1, len: a2 },
            SYS_GET_PID => Syscall::GetPid,
            SYS_SLEEP => Syscall::Sleep { seconds: a1 },
            SYS_GET_PROCESS_TIMES => Syscall::GetProcessTimes { out: a1 },
            SYS_CREATE_MUTEX => Syscall::CreateMutex { name: a1, kind: a2 },
            SYS_OPEN_MUTEX => Syscall::OpenMutex { name: a1 },
            SYS_LOCK => Syscall::Lock { id: a1 },
            SYS_UNLOCK => Syscall::Unlock { id: a1 },
            SYS_CLOSE_MUTEX => Syscall::CloseMutex { id: a1 },
            SYS_READ_CHAR => Syscall::ReadChar,
            _ => return None,
        })
    }

    /// ABI number of this call
    pub fn number(&self) -> u64 {
        match self {
            Syscall::CreateProcess { .. } => SYS_CREATE_PROCESS,
            Syscall::TerminateProcess => SYS_TERMINATE_PROCESS,
            Syscall::Write { .. } => SYS_WRITE,
            Syscall::GetPid => SYS_GET_PID,
            Syscall::Sleep { .. } => SYS_SLEEP,
            Syscall::GetProcessTimes { .. } => SYS_GET_PROCESS_TIMES,
            Syscall::CreateMutex { .. } => SYS_CREATE_MUTEX,
            Syscall::OpenMutex { .. } => SYS_OPEN_MUTEX,
            Syscall::Lock { .. } => SYS_LOCK,
            Syscall::Unlock { .. } => SYS_UNLOCK,
            Syscall::CloseMutex { .. } => SYS_CLOSE_MUTEX,
            Syscall::ReadChar => SYS_READ_CHAR,
        }
    }

    /// Whether the call can suspend the caller.
    ///
    /// Such calls run fully masked from their first check until the caller
    /// is on a wait queue, so no wakeup can slip in between.
    pub fn may_block(&self) -> bool {
        matches!(
            self,
            Syscall::Sleep { .. }
                | Syscall::CreateMutex { .. }
                | Syscall::Lock { .. }
                | Syscall::ReadChar
        )
    }
}

/// How a syscall left its caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    /// Finished with this result
    Done(i64),
    /// Must wait; re-run when the process is scheduled again
    Block(BlockReason),
    /// The caller no longer exists
    Exited,
}

fn mutex_id(raw: u64) -> Result<MutexId, KernelError> {
    u32::try_from(raw)
        .map(MutexId)
        .map_err(|_| KernelError::NotFound)
}

impl<H: HAL> KernelState<H> {
    /// Syscall trap handler.
    ///
    /// The result lands in the result register unless the call blocked (it
    /// is written on resume) or ended the caller.
    pub(crate) fn handle_syscall(&mut self, hal: &H) {
        let _mask = IrqGuard::new(hal, InterruptLevel::Software);
        let Some(pid) = self.running else {
            return;
        };

        let number = hal.read_register(REG_SYSCALL);
        let args = [
            hal.read_register(REG_ARG1),
            hal.read_register(REG_ARG2),
            hal.read_register(REG_ARG3),
        ];
        let request = self.syslog.record_call(pid.0, number, args, self.ticks);

        let Some(call) = Syscall::decode(number, args) else {
            self.log(
                hal,
                "syscall",
                &alloc::format!("process {} made unknown syscall {}", pid, number),
            );
            self.complete_call(hal, pid, Some(request), E_FAILED);
            return;
        };

        let _hold = call
            .may_block()
            .then(|| IrqGuard::new(hal, InterruptLevel::Clock));

        match self.execute(hal, pid, call) {
            Ok(CallOutcome::Done(value)) => self.complete_call(hal, pid, Some(request), value),
            Ok(CallOutcome::Block(reason)) => {
                self.block(pid, reason, Some(request));
                self.reschedule(hal);
            }
            Ok(CallOutcome::Exited) => {}
            Err(e) if e.is_user_fault() => {
                self.log(
                    hal,
                    "syscall",
                    &alloc::format!("process {} passed a bad pointer to {:?}", pid, call),
                );
                self.terminate_running(hal);
            }
            Err(e) => self.complete_call(hal, pid, Some(request), e.code()),
        }
    }

    fn execute(&mut self, hal: &H, pid: ProcessId, call: Syscall) -> Result<CallOutcome, KernelError> {
        match call {
            Syscall::CreateProcess { path } => {
                let program = self.read_user_str(hal, path, MAX_PATH_LEN)?;
                let child = self.spawn(hal, &program)?;
                Ok(CallOutcome::Done(child.0 as i64))
            }
            Syscall::TerminateProcess => {
                self.terminate_running(hal);
                Ok(CallOutcome::Exited)
            }
            Syscall::Write { buf, len } => self.sys_write(hal, buf, len),
            Syscall::GetPid => Ok(CallOutcome::Done(pid.0 as i64)),
            Syscall::Sleep { seconds } => {
                let delay = seconds.saturating_mul(self.config.ticks_per_second as u64);
                let wake_tick = self.ticks.saturating_add(delay);
                self.processes[pid].wake_tick = wake_tick;
                self.log(
                    hal,
                    "sched",
                    &alloc::format!("process {} sleeps until tick {}", pid, wake_tick),
                );
                Ok(CallOutcome::Block(BlockReason::Timer))
            }
            Syscall::GetProcessTimes { out } => {
                let pd = &self.processes[pid];
                let elapsed = self.ticks - pd.created_at;
                let times = pd.times();
                if out != 0 {
                    self.copy_to_user(hal, out, &times.to_le_bytes())?;
                }
                Ok(CallOutcome::Done(elapsed as i64))
            }
            Syscall::CreateMutex { name, kind } => {
                let kind = MutexKind::from_raw(kind).ok_or(KernelError::InvalidArgument)?;
                let name = self.read_mutex_name(hal, name)?;
                self.create_mutex(hal, pid, name, kind)
            }
            Syscall::OpenMutex { name } => {
                let name = self.read_mutex_name(hal, name)?;
                self.open_mutex(pid, &name)
            }
            Syscall::Lock { id } => self.lock_mutex(pid, mutex_id(id)?),
            Syscall::Unlock { id } => self.unlock_mutex(pid, mutex_id(id)?),
            Syscall::CloseMutex { id } => {
                let id = mutex_id(id).map_err(|_| KernelError::Closed)?;
                self.close_mutex(hal, pid, id)
            }
            Syscall::ReadChar => Ok(self.take_terminal_char()),
        }
    }

    /// Read a mutex name, one byte past the limit so overlong names show.
    ///
    /// Names are byte strings; the limit counts bytes.
    fn read_mutex_name(&mut self, hal: &H, addr: u64) -> Result<Vec<u8>, KernelError> {
        let limit = self.config.max_mutex_name_len + 1;
        self.read_user_bytes(hal, addr, limit)
    }

    fn sys_write(&mut self, hal: &H, buf: u64, len: u64) -> Result<CallOutcome, KernelError> {
        let mut chunk = [0u8; WRITE_CHUNK];
        let mut done = 0u64;
        while done < len {
            let n = (len - done).min(WRITE_CHUNK as u64) as usize;
            let addr = buf.checked_add(done).ok_or(HalError::BadAddress)?;
            self.copy_from_user(hal, addr, &mut chunk[..n])?;
            hal.console_write(&chunk[..n]);
            done += n as u64;
        }
        Ok(CallOutcome::Done(0))
    }

    /// Next buffered terminal byte, or block until one arrives.
    pub(crate) fn take_terminal_char(&mut self) -> CallOutcome {
        match self.terminal.pop() {
            Some(byte) => CallOutcome::Done(byte as i64),
            None => CallOutcome::Block(BlockReason::TerminalInput),
        }
    }
}
