//! Hardware Abstraction Layer trait for Minikernel
//!
//! This crate defines the HAL trait that the kernel core is written against.
//! Everything that touches real hardware lives behind it: interrupt vectors,
//! the interrupt mask, CPU context save/restore, program images, stacks,
//! port I/O and user-memory access.
//!
//! # Platform Implementations
//!
//! - **Mock**: `minik-hal-mock`, a deterministic host implementation for tests
//! - **Bare Metal**: a board support crate providing the same trait

#![no_std]

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

// ============================================================================
// Register conventions
// ============================================================================

/// Register carrying the syscall number on entry and the result on exit.
pub const REG_SYSCALL: usize = 0;

/// First syscall argument register.
pub const REG_ARG1: usize = 1;

/// Second syscall argument register.
pub const REG_ARG2: usize = 2;

/// Third syscall argument register.
pub const REG_ARG3: usize = 3;

/// Number of general purpose registers visible through the HAL.
pub const NUM_REGISTERS: usize = 8;

// ============================================================================
// Interrupt classes and mask levels
// ============================================================================

/// Interrupt classes the kernel installs a handler for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interrupt {
    /// Arithmetic exception (division by zero, overflow trap)
    ArithmeticFault,
    /// Memory access exception
    MemoryFault,
    /// Periodic clock tick
    Clock,
    /// A character is available on the terminal port
    Terminal,
    /// Syscall trap
    Syscall,
    /// Software interrupt (used to request a rotation)
    Software,
}

impl Interrupt {
    /// Every interrupt class, in vector order.
    pub const ALL: [Interrupt; 6] = [
        Interrupt::ArithmeticFault,
        Interrupt::MemoryFault,
        Interrupt::Clock,
        Interrupt::Terminal,
        Interrupt::Syscall,
        Interrupt::Software,
    ];

    /// Priority of a maskable interrupt, `None` for synchronous traps.
    ///
    /// Exceptions and the syscall trap are raised by the running code itself
    /// and cannot be masked.
    pub fn priority(self) -> Option<InterruptLevel> {
        match self {
            Interrupt::Clock => Some(InterruptLevel::Clock),
            Interrupt::Terminal => Some(InterruptLevel::Terminal),
            Interrupt::Software => Some(InterruptLevel::Software),
            Interrupt::ArithmeticFault | Interrupt::MemoryFault | Interrupt::Syscall => None,
        }
    }
}

/// Interrupt mask level.
///
/// Setting level N masks every maskable interrupt whose priority is at or
/// below N. `Clock` therefore masks everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InterruptLevel {
    /// Nothing masked (user mode)
    Unmasked = 0,
    /// Software interrupts masked: no involuntary preemption
    Software = 1,
    /// Terminal and software interrupts masked
    Terminal = 2,
    /// All interrupts masked
    Clock = 3,
}

impl InterruptLevel {
    /// Whether this level keeps `irq` from being delivered.
    pub fn masks(self, irq: Interrupt) -> bool {
        match irq.priority() {
            Some(priority) => priority <= self,
            None => false,
        }
    }
}

// ============================================================================
// HAL trait
// ============================================================================

/// Hardware Abstraction Layer trait
///
/// Implementations provide platform-specific functionality for:
/// - Interrupt handler installation and masking
/// - CPU context switching and register access
/// - Program image and stack management
/// - Terminal port, console and debug output
/// - Guarded access to user memory
///
/// All methods take `&self`; implementations use interior mutability because
/// the kernel owns its HAL and calls it from inside its own `&mut` handlers.
///
/// # Associated Types
///
/// - `Context`: saved register set of one process, owned by its descriptor
/// - `Stack`: handle to an allocated stack region
/// - `Image`: handle to a loaded memory image
pub trait HAL {
    /// Saved CPU register context
    type Context: Default;
    /// Stack region handle
    type Stack;
    /// Memory image handle
    type Image;

    // === Interrupts ===

    /// Route interrupts of class `irq` to the kernel.
    fn install_handler(&self, irq: Interrupt);

    /// Program the clock to tick `ticks_per_second` times per second.
    fn start_clock(&self, ticks_per_second: u32);

    /// Current interrupt mask level.
    fn interrupt_level(&self) -> InterruptLevel;

    /// Set the interrupt mask level, returning the previous one.
    fn set_interrupt_level(&self, level: InterruptLevel) -> InterruptLevel;

    /// Halt the CPU until an interrupt arrives.
    ///
    /// # Returns
    /// The interrupt that woke the CPU. The caller services it.
    fn halt(&self) -> Interrupt;

    /// Request a software interrupt. It is delivered once the mask allows it.
    fn raise_software_interrupt(&self);

    /// Whether the code interrupted by the current trap was running in user mode.
    fn from_user_mode(&self) -> bool;

    // === CPU Context ===

    /// Switch CPU context.
    ///
    /// # Arguments
    /// * `from` - Slot receiving the current registers, `None` to discard them
    /// * `to` - Context to load
    fn switch_context(&self, from: Option<&mut Self::Context>, to: &Self::Context);

    /// Read a register of the currently loaded context.
    fn read_register(&self, index: usize) -> u64;

    /// Write a register of the currently loaded context.
    fn write_register(&self, index: usize, value: u64);

    // === Images and Stacks ===

    /// Build the memory image of a program.
    ///
    /// # Returns
    /// * `Ok((image, entry))` - Image handle and initial program counter
    /// * `Err(HalError::ProgramNotFound)` - No such program
    fn create_image(&self, program: &str) -> Result<(Self::Image, u64), HalError>;

    /// Release a memory image.
    fn release_image(&self, image: Self::Image);

    /// Allocate a stack region of `size` bytes.
    fn create_stack(&self, size: usize) -> Result<Self::Stack, HalError>;

    /// Release a stack region.
    fn release_stack(&self, stack: Self::Stack);

    /// Build the initial register context for a freshly loaded program.
    fn initial_context(&self, image: &Self::Image, stack: &Self::Stack, entry: u64) -> Self::Context;

    // === User Memory ===

    /// Copy bytes out of user memory.
    ///
    /// # Returns
    /// * `Err(HalError::BadAddress)` - Part of the range is not mapped
    fn copy_from_user(&self, addr: u64, buf: &mut [u8]) -> Result<(), HalError>;

    /// Copy bytes into user memory.
    fn copy_to_user(&self, addr: u64, data: &[u8]) -> Result<(), HalError>;

    /// Read a NUL-terminated byte string from user memory.
    ///
    /// Reads at most `max_len` bytes; a longer string comes back truncated to
    /// `max_len` so the caller can detect the overflow.
    fn read_user_bytes(&self, addr: u64, max_len: usize) -> Result<Vec<u8>, HalError> {
        if addr == 0 {
            return Err(HalError::BadAddress);
        }
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        while bytes.len() < max_len {
            self.copy_from_user(addr + bytes.len() as u64, &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
        }
        Ok(bytes)
    }

    /// Read a NUL-terminated UTF-8 string from user memory.
    ///
    /// Same truncation rule as `read_user_bytes`.
    fn read_user_str(&self, addr: u64, max_len: usize) -> Result<String, HalError> {
        let bytes = self.read_user_bytes(addr, max_len)?;
        String::from_utf8(bytes).map_err(|_| HalError::InvalidArgument)
    }

    // === Devices ===

    /// Read one byte from the terminal input port.
    fn read_terminal(&self) -> u8;

    /// Write bytes to the console on behalf of a process.
    fn console_write(&self, bytes: &[u8]);

    /// Write a kernel diagnostic line.
    fn debug_write(&self, msg: &str);

    /// Halt the whole system with a diagnostic. Never returns.
    fn fatal(&self, msg: &str) -> !;
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HalError {
    /// Not enough memory available
    OutOfMemory,
    /// No program with the requested identifier
    ProgramNotFound,
    /// User address not mapped
    BadAddress,
    /// Invalid argument
    InvalidArgument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_level_masks_everything_maskable() {
        assert!(InterruptLevel::Clock.masks(Interrupt::Clock));
        assert!(InterruptLevel::Clock.masks(Interrupt::Terminal));
        assert!(InterruptLevel::Clock.masks(Interrupt::Software));
    }

    #[test]
    fn test_terminal_level_lets_clock_through() {
        assert!(!InterruptLevel::Terminal.masks(Interrupt::Clock));
        assert!(InterruptLevel::Terminal.masks(Interrupt::Terminal));
        assert!(InterruptLevel::Terminal.masks(Interrupt::Software));
    }

    #[test]
    fn test_traps_are_never_masked() {
        for level in [
            InterruptLevel::Unmasked,
            InterruptLevel::Software,
            InterruptLevel::Clock,
        ] {
            assert!(!level.masks(Interrupt::Syscall));
            assert!(!level.masks(Interrupt::MemoryFault));
            assert!(!level.masks(Interrupt::ArithmeticFault));
        }
    }

    #[test]
    fn test_unmasked_masks_nothing() {
        for irq in Interrupt::ALL {
            assert!(!InterruptLevel::Unmasked.masks(irq));
        }
    }
}
