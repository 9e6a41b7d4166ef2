//! Kernel configuration
//!
//! Table capacities and timing constants. `Default` gives the classic
//! minikernel values.

use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Kernel configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Process table capacity
    pub max_processes: usize,
    /// Clock interrupts per second
    pub ticks_per_second: u32,
    /// Ticks a process may run before it is preempted
    pub ticks_per_slice: u32,
    /// Stack size of every process, in bytes
    pub stack_size: usize,
    /// Mutex table capacity
    pub max_mutexes: usize,
    /// Mutex descriptor slots per process
    pub max_mutexes_per_process: usize,
    /// Longest accepted mutex name, in bytes
    pub max_mutex_name_len: usize,
    /// Terminal input buffer capacity, in bytes
    pub terminal_buffer_size: usize,
    /// Program started at boot
    pub init_program: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: 10,
            ticks_per_second: 100,
            ticks_per_slice: 10,
            stack_size: 32 * 1024,
            max_mutexes: 16,
            max_mutexes_per_process: 4,
            max_mutex_name_len: 8,
            terminal_buffer_size: 8,
            init_program: String::from("init"),
        }
    }
}

impl KernelConfig {
    /// Reject configurations the kernel cannot run with.
    pub fn validate(&self) -> Result<(), KernelError> {
        let capacities = [
            self.max_processes,
            self.stack_size,
            self.max_mutexes,
            self.max_mutexes_per_process,
            self.max_mutex_name_len,
            self.terminal_buffer_size,
        ];
        if capacities.iter().any(|&c| c == 0) {
            return Err(KernelError::InvalidConfig);
        }
        if self.ticks_per_second == 0 || self.ticks_per_slice == 0 {
            return Err(KernelError::InvalidConfig);
        }
        if self.init_program.is_empty() {
            return Err(KernelError::InvalidConfig);
        }
        Ok(())
    }
}
