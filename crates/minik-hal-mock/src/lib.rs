//! Mock HAL implementation for testing Minikernel
//!
//! This provides a mock implementation of the HAL trait that can be used
//! for unit testing the kernel without requiring hardware. It simulates:
//!
//! - a register file that is saved/restored by `switch_context`
//! - an interrupt controller with a mask level and a pending queue
//! - a program registry backing `create_image`
//! - a flat user memory made of allocated regions
//! - a terminal port and a console

#![no_std]
extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use minik_hal::{HalError, Interrupt, InterruptLevel, HAL, NUM_REGISTERS, REG_SYSCALL};

/// First address handed out by the user memory allocator
const USER_BASE: u64 = 0x1000;

/// Consecutive idle halts with nothing scripted before the mock gives up
const DEFAULT_IDLE_LIMIT: u64 = 100_000;

/// Register context of a simulated process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockContext {
    /// General purpose registers
    pub regs: [u64; NUM_REGISTERS],
    /// Program counter
    pub pc: u64,
    /// Stack pointer
    pub sp: u64,
    /// Image this context was built for (0 = none)
    pub image: u64,
}

/// Memory image of a simulated process
#[derive(Debug)]
pub struct MockImage {
    pub id: u64,
    pub program: String,
}

/// Stack of a simulated process
#[derive(Debug)]
pub struct MockStack {
    pub id: u64,
    pub size: usize,
}

/// One recorded `switch_context` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchRecord {
    /// Whether the outgoing registers were saved
    pub saved: bool,
    /// Program of the context that was loaded
    pub to_program: String,
}

/// Mock HAL for unit testing
pub struct MockHal {
    /// Current interrupt mask level
    level: Cell<InterruptLevel>,
    /// Handlers installed by the kernel
    installed: RefCell<Vec<Interrupt>>,
    /// Clock frequency programmed by the kernel
    clock_hz: Cell<u32>,
    /// Interrupts waiting to be delivered
    pending: RefCell<VecDeque<Interrupt>>,
    /// Privilege mode reported for the current trap
    user_mode: Cell<bool>,
    /// Registers of the loaded context
    cpu: RefCell<MockContext>,
    /// Recorded context switches
    switches: RefCell<Vec<SwitchRecord>>,
    /// Program name -> entry point
    programs: RefCell<BTreeMap<String, u64>>,
    /// Live images: id -> program name
    images: RefCell<BTreeMap<u64, String>>,
    /// Next image ID to assign
    next_image: Cell<u64>,
    /// Live stacks: id -> size
    stacks: RefCell<BTreeMap<u64, usize>>,
    /// Next stack ID to assign
    next_stack: Cell<u64>,
    /// Make the next stack allocations fail
    stack_exhausted: Cell<bool>,
    /// User memory regions: base -> bytes
    memory: RefCell<BTreeMap<u64, Vec<u8>>>,
    /// Next free user address
    next_addr: Cell<u64>,
    /// Bytes waiting on the terminal port
    terminal: RefCell<VecDeque<u8>>,
    /// Console output
    console: RefCell<Vec<u8>>,
    /// Captured debug messages
    debug_log: RefCell<Vec<String>>,
    /// Consecutive idle halts served with a synthetic clock tick
    idle_halts: Cell<u64>,
    /// Idle halts tolerated before panicking
    idle_limit: Cell<u64>,
}

impl MockHal {
    /// Create a new mock HAL
    pub fn new() -> Self {
        Self {
            level: Cell::new(InterruptLevel::Unmasked),
            installed: RefCell::new(Vec::new()),
            clock_hz: Cell::new(0),
            pending: RefCell::new(VecDeque::new()),
            user_mode: Cell::new(true),
            cpu: RefCell::new(MockContext::default()),
            switches: RefCell::new(Vec::new()),
            programs: RefCell::new(BTreeMap::new()),
            images: RefCell::new(BTreeMap::new()),
            next_image: Cell::new(1),
            stacks: RefCell::new(BTreeMap::new()),
            next_stack: Cell::new(1),
            stack_exhausted: Cell::new(false),
            memory: RefCell::new(BTreeMap::new()),
            next_addr: Cell::new(USER_BASE),
            terminal: RefCell::new(VecDeque::new()),
            console: RefCell::new(Vec::new()),
            debug_log: RefCell::new(Vec::new()),
            idle_halts: Cell::new(0),
            idle_limit: Cell::new(DEFAULT_IDLE_LIMIT),
        }
    }

    /// Create a mock HAL that knows the given programs
    pub fn with_programs(programs: &[&str]) -> Self {
        let hal = Self::new();
        for program in programs {
            hal.add_program(program);
        }
        hal
    }

    // ========================================================================
    // Programs, images and stacks
    // ========================================================================

    /// Register a program so `create_image` can load it
    pub fn add_program(&self, name: &str) {
        let entry = 0x40_0000 + 0x1000 * self.programs.borrow().len() as u64;
        self.programs.borrow_mut().insert(String::from(name), entry);
    }

    /// Number of images currently alive
    pub fn live_images(&self) -> usize {
        self.images.borrow().len()
    }

    /// Number of stacks currently alive
    pub fn live_stacks(&self) -> usize {
        self.stacks.borrow().len()
    }

    /// Make stack allocation fail (or succeed again)
    pub fn set_stack_exhausted(&self, exhausted: bool) {
        self.stack_exhausted.set(exhausted);
    }

    // ========================================================================
    // CPU state
    // ========================================================================

    /// Load the syscall number and arguments into the current registers
    pub fn stage_syscall(&self, number: u64, args: &[u64]) {
        let mut cpu = self.cpu.borrow_mut();
        cpu.regs[REG_SYSCALL] = number;
        for (i, arg) in args.iter().enumerate() {
            cpu.regs[i + 1] = *arg;
        }
    }

    /// Syscall result register of the loaded context, as a signed value
    pub fn result(&self) -> i64 {
        self.cpu.borrow().regs[REG_SYSCALL] as i64
    }

    /// Program whose context is currently loaded
    pub fn loaded_program(&self) -> Option<String> {
        let image = self.cpu.borrow().image;
        self.images.borrow().get(&image).cloned()
    }

    /// Copy of the loaded context
    pub fn cpu(&self) -> MockContext {
        self.cpu.borrow().clone()
    }

    /// Set the privilege mode reported to the next trap
    pub fn set_user_mode(&self, user: bool) {
        self.user_mode.set(user);
    }

    /// All recorded context switches
    pub fn switches(&self) -> Vec<SwitchRecord> {
        self.switches.borrow().clone()
    }

    /// Number of recorded context switches
    pub fn switch_count(&self) -> usize {
        self.switches.borrow().len()
    }

    // ========================================================================
    // Interrupt controller
    // ========================================================================

    /// Handlers installed so far
    pub fn installed_handlers(&self) -> Vec<Interrupt> {
        self.installed.borrow().clone()
    }

    /// Clock frequency programmed by the kernel
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz.get()
    }

    /// Queue an interrupt for delivery
    pub fn schedule_interrupt(&self, irq: Interrupt) {
        self.pending.borrow_mut().push_back(irq);
    }

    /// Take the next interrupt the current mask level allows
    pub fn take_pending(&self) -> Option<Interrupt> {
        let level = self.level.get();
        let mut pending = self.pending.borrow_mut();
        let index = pending.iter().position(|irq| !level.masks(*irq))?;
        pending.remove(index)
    }

    /// Interrupts still waiting for delivery
    pub fn pending_interrupts(&self) -> Vec<Interrupt> {
        self.pending.borrow().iter().copied().collect()
    }

    /// Set how many synthetic idle ticks `halt` serves before panicking
    pub fn set_idle_limit(&self, limit: u64) {
        self.idle_limit.set(limit);
    }

    // ========================================================================
    // User memory
    // ========================================================================

    /// Allocate a user memory region holding `bytes`, returning its address
    pub fn alloc_user(&self, bytes: &[u8]) -> u64 {
        let addr = self.next_addr.get();
        // Leave an unmapped gap after every region
        self.next_addr.set(addr + bytes.len() as u64 + 0x100);
        self.memory.borrow_mut().insert(addr, bytes.to_vec());
        addr
    }

    /// Allocate a NUL-terminated string in user memory
    pub fn user_str(&self, s: &str) -> u64 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.alloc_user(&bytes)
    }

    /// Allocate a zeroed user buffer
    pub fn user_buffer(&self, len: usize) -> u64 {
        self.alloc_user(&vec![0u8; len])
    }

    /// Read back user memory (panics on unmapped addresses)
    pub fn read_user(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.copy_from_user(addr, &mut buf)
            .expect("read_user on unmapped memory");
        buf
    }

    fn with_region<R>(
        &self,
        addr: u64,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, HalError> {
        let mut memory = self.memory.borrow_mut();
        let (base, region) = memory
            .range_mut(..=addr)
            .next_back()
            .ok_or(HalError::BadAddress)?;
        let offset = (addr - *base) as usize;
        if offset + len > region.len() {
            return Err(HalError::BadAddress);
        }
        Ok(f(&mut region[offset..offset + len]))
    }

    // ========================================================================
    // Terminal and console
    // ========================================================================

    /// Put a byte on the terminal port and raise the terminal interrupt
    pub fn press_key(&self, byte: u8) {
        self.terminal.borrow_mut().push_back(byte);
        self.schedule_interrupt(Interrupt::Terminal);
    }

    /// Everything processes wrote to the console
    pub fn console_output(&self) -> Vec<u8> {
        self.console.borrow().clone()
    }

    // ========================================================================
    // Debug log
    // ========================================================================

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.borrow().clone()
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log
            .borrow()
            .iter()
            .any(|msg| msg.contains(substr))
    }

    /// Clear the debug log
    pub fn clear_debug_log(&self) {
        self.debug_log.borrow_mut().clear();
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl HAL for MockHal {
    type Context = MockContext;
    type Stack = MockStack;
    type Image = MockImage;

    fn install_handler(&self, irq: Interrupt) {
        self.installed.borrow_mut().push(irq);
    }

    fn start_clock(&self, ticks_per_second: u32) {
        self.clock_hz.set(ticks_per_second);
    }

    fn interrupt_level(&self) -> InterruptLevel {
        self.level.get()
    }

    fn set_interrupt_level(&self, level: InterruptLevel) -> InterruptLevel {
        self.level.replace(level)
    }

    fn halt(&self) -> Interrupt {
        if let Some(irq) = self.take_pending() {
            self.idle_halts.set(0);
            return irq;
        }
        let idle = self.idle_halts.get() + 1;
        if idle > self.idle_limit.get() {
            panic!("mock HAL: idle for {} ticks with nothing scheduled", idle - 1);
        }
        self.idle_halts.set(idle);
        Interrupt::Clock
    }

    fn raise_software_interrupt(&self) {
        self.schedule_interrupt(Interrupt::Software);
    }

    fn from_user_mode(&self) -> bool {
        self.user_mode.get()
    }

    fn switch_context(&self, from: Option<&mut MockContext>, to: &MockContext) {
        let mut cpu = self.cpu.borrow_mut();
        let saved = match from {
            Some(slot) => {
                *slot = cpu.clone();
                true
            }
            None => false,
        };
        *cpu = to.clone();
        let to_program = self
            .images
            .borrow()
            .get(&to.image)
            .cloned()
            .unwrap_or_default();
        self.switches
            .borrow_mut()
            .push(SwitchRecord { saved, to_program });
    }

    fn read_register(&self, index: usize) -> u64 {
        self.cpu.borrow().regs[index]
    }

    fn write_register(&self, index: usize, value: u64) {
        self.cpu.borrow_mut().regs[index] = value;
    }

    fn create_image(&self, program: &str) -> Result<(MockImage, u64), HalError> {
        let entry = *self
            .programs
            .borrow()
            .get(program)
            .ok_or(HalError::ProgramNotFound)?;
        let id = self.next_image.get();
        self.next_image.set(id + 1);
        self.images.borrow_mut().insert(id, String::from(program));
        Ok((
            MockImage {
                id,
                program: String::from(program),
            },
            entry,
        ))
    }

    fn release_image(&self, image: MockImage) {
        self.images.borrow_mut().remove(&image.id);
    }

    fn create_stack(&self, size: usize) -> Result<MockStack, HalError> {
        if self.stack_exhausted.get() {
            return Err(HalError::OutOfMemory);
        }
        let id = self.next_stack.get();
        self.next_stack.set(id + 1);
        self.stacks.borrow_mut().insert(id, size);
        Ok(MockStack { id, size })
    }

    fn release_stack(&self, stack: MockStack) {
        self.stacks.borrow_mut().remove(&stack.id);
    }

    fn initial_context(&self, image: &MockImage, stack: &MockStack, entry: u64) -> MockContext {
        MockContext {
            regs: [0; NUM_REGISTERS],
            pc: entry,
            sp: (stack.id << 20) + stack.size as u64,
            image: image.id,
        }
    }

    fn copy_from_user(&self, addr: u64, buf: &mut [u8]) -> Result<(), HalError> {
        self.with_region(addr, buf.len(), |region| buf.copy_from_slice(region))
    }

    fn copy_to_user(&self, addr: u64, data: &[u8]) -> Result<(), HalError> {
        self.with_region(addr, data.len(), |region| region.copy_from_slice(data))
    }

    fn read_terminal(&self) -> u8 {
        self.terminal.borrow_mut().pop_front().unwrap_or(0)
    }

    fn console_write(&self, bytes: &[u8]) {
        self.console.borrow_mut().extend_from_slice(bytes);
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.borrow_mut().push(String::from(msg));
    }

    fn fatal(&self, msg: &str) -> ! {
        self.debug_log
            .borrow_mut()
            .push(alloc::format!("[mock-hal] FATAL: {}", msg));
        panic!("kernel fatal: {}", msg)
    }
}
