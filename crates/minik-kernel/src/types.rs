//! Core kernel types
//!
//! Identifiers, state enums and the read-only snapshots handed out by the
//! kernel. Everything here is plain data.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

pub use minik_audit::Tick;

/// Process identifier (index into the process table)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Slot index in the process table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutex identifier (index into the mutex table)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutexId(pub u32);

impl MutexId {
    /// Slot index in the mutex table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Slot is free
    #[default]
    Unused,
    /// Waiting in the ready queue
    Ready,
    /// Owns the CPU
    Running,
    /// Waiting in a sleep queue
    Blocked,
    /// Finished, resources reclaimed at the next rotation
    Terminated,
}

/// What a blocked process is waiting for.
///
/// Set by the blocking call before rotation; rotation reads it to pick the
/// queue, and the call is re-run from it when the process is scheduled again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// Timed sleep until the process' wake tick
    Timer,
    /// Lock of a mutex held by another process
    MutexLock(MutexId),
    /// Creation of a mutex while the mutex table is full
    MutexSlot {
        /// Requested name, raw bytes
        name: Vec<u8>,
        /// Requested kind
        kind: MutexKind,
    },
    /// Read from an empty terminal buffer
    TerminalInput,
}

/// Mutex kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutexKind {
    /// Locking twice from the owner fails
    #[default]
    NonRecursive,
    /// The owner may lock repeatedly; each lock needs its unlock
    Recursive,
}

impl MutexKind {
    /// Decode the syscall ABI value (0 = non-recursive, 1 = recursive).
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(MutexKind::NonRecursive),
            1 => Some(MutexKind::Recursive),
            _ => None,
        }
    }
}

/// Mutex slot state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutexState {
    /// Slot available for creation
    #[default]
    Free,
    /// Created, nobody holds it
    Unlocked,
    /// Held by its owner
    Locked,
}

/// Tick accounting returned by `get_process_times`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessTimes {
    /// Ticks spent in user mode
    pub user: u32,
    /// Ticks spent in kernel mode
    pub system: u32,
}

impl ProcessTimes {
    /// Wire layout: two little-endian 32-bit integers, user first.
    pub fn to_le_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.user.to_le_bytes());
        out[4..].copy_from_slice(&self.system.to_le_bytes());
        out
    }
}

/// Snapshot of one process descriptor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub program: String,
    pub state: ProcessState,
    /// Present while the process is blocked
    pub blocked_on: Option<BlockReason>,
    pub created_at: Tick,
    pub wake_tick: Tick,
    pub times: ProcessTimes,
    /// Mutexes open in each descriptor slot
    pub open_mutexes: Vec<Option<MutexId>>,
}

/// Snapshot of one mutex slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexInfo {
    pub id: MutexId,
    /// Name as text; bytes that are not UTF-8 are replaced
    pub name: String,
    pub kind: MutexKind,
    pub state: MutexState,
    pub owner: Option<ProcessId>,
    pub nesting: u32,
    pub open_count: usize,
    /// Processes waiting to lock, in wake order
    pub waiters: Vec<ProcessId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutex_kind_from_raw() {
        assert_eq!(MutexKind::from_raw(0), Some(MutexKind::NonRecursive));
        assert_eq!(MutexKind::from_raw(1), Some(MutexKind::Recursive));
        assert_eq!(MutexKind::from_raw(2), None);
    }

    #[test]
    fn test_process_times_layout() {
        let times = ProcessTimes {
            user: 0x0102_0304,
            system: 7,
        };
        assert_eq!(times.to_le_bytes(), [4, 3, 2, 1, 7, 0, 0, 0]);
    }
}
