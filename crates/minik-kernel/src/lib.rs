//! Minikernel Core
//!
//! A single-CPU kernel driven entirely by interrupt handlers. This crate
//! implements:
//! - Process management over a fixed process table
//! - Round-robin scheduling with preemption on quantum expiry
//! - Named mutexes with recursive and non-recursive semantics
//! - Timed sleep and buffered terminal input
//! - Syscall dispatch and the syscall audit trail
//!
//! # Architecture
//!
//! ```text
//!   interrupt / trap
//!          |
//!          v
//!   System::handle_interrupt ---> KernelState (tables, queues, counters)
//!                                     |
//!                                     |  rotation (dispatch)
//!                                     v
//!                                 HAL::switch_context
//! ```
//!
//! Everything hardware-specific sits behind `minik_hal::HAL`. Blocking is
//! modelled with a block reason stored in the process descriptor: rotation
//! queues the process by that reason, and when the process is dispatched
//! again the interrupted call is re-run from it.
//!
//! # Module Organization
//!
//! - `types` - identifiers, state enums, snapshots
//! - `queue` - index-linked FIFO wait queues
//! - `process` - process descriptors and table
//! - `mutex` - mutex table and operations
//! - `scheduler` / `dispatch` - picking and switching processes
//! - `interrupts` / `syscall` - handlers
//! - `invariants` - runtime-checkable consistency rules

#![no_std]
extern crate alloc;

pub mod config;
pub mod critical;
pub mod dispatch;
pub mod error;
pub mod interrupts;
pub mod invariants;
pub mod mutex;
pub mod process;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod syscall;
pub mod system;
pub mod terminal;
pub mod types;

// Re-export HAL types
pub use minik_hal::{HalError, Interrupt, InterruptLevel, HAL};

// Re-export audit types
pub use minik_audit::{PendingCall, SysEvent, SysEventType, SysLog};

pub use config::KernelConfig;
pub use critical::IrqGuard;
pub use error::KernelError;
pub use invariants::{check_all_invariants, InvariantViolation};
pub use mutex::Mutex;
pub use process::{ProcessDescriptor, ProcessTable};
pub use queue::{QueueLinks, WaitQueue};
pub use state::KernelState;
pub use syscall::{CallOutcome, Syscall};
pub use system::System;
pub use terminal::TerminalBuffer;
pub use types::{
    BlockReason, MutexId, MutexInfo, MutexKind, MutexState, ProcessId, ProcessInfo, ProcessState,
    ProcessTimes, Tick,
};
