//! Process descriptors and the process table
//!
//! The table is a fixed arena; a process ID is its slot index. A slot is
//! reused once the rotation that follows a termination has reclaimed it.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

use minik_audit::EventId;
use minik_hal::HAL;

use crate::error::KernelError;
use crate::queue::QueueLinks;
use crate::types::{BlockReason, MutexId, ProcessId, ProcessInfo, ProcessState, ProcessTimes, Tick};

/// Process descriptor
pub struct ProcessDescriptor<H: HAL> {
    /// Process ID (slot index)
    pub id: ProcessId,
    /// Current state
    pub state: ProcessState,
    /// Program the process was created from
    pub program: String,
    /// Saved registers while not running
    pub context: H::Context,
    /// Stack region (present while the slot is in use)
    pub stack: Option<H::Stack>,
    /// Memory image (present while the slot is in use)
    pub image: Option<H::Image>,
    /// Tick at which a timed sleep ends
    pub wake_tick: Tick,
    /// Tick at which the process was created
    pub created_at: Tick,
    /// Clock ticks taken while running in user mode
    pub user_ticks: u64,
    /// Clock ticks taken while running in kernel mode
    pub system_ticks: u64,
    /// Mutex descriptor slots
    pub descriptors: Vec<Option<MutexId>>,
    /// Interrupted blocking call, re-run when the process is next scheduled
    pub pending: Option<BlockReason>,
    /// Audit record of the interrupted call
    pub pending_request: Option<EventId>,
    next: Option<ProcessId>,
}

impl<H: HAL> ProcessDescriptor<H> {
    fn unused(id: ProcessId, descriptor_slots: usize) -> Self {
        Self {
            id,
            state: ProcessState::Unused,
            program: String::new(),
            context: H::Context::default(),
            stack: None,
            image: None,
            wake_tick: 0,
            created_at: 0,
            user_ticks: 0,
            system_ticks: 0,
            descriptors: vec![None; descriptor_slots],
            pending: None,
            pending_request: None,
            next: None,
        }
    }

    /// Index of the first free descriptor slot
    pub fn free_descriptor(&self) -> Option<usize> {
        self.descriptors.iter().position(Option::is_none)
    }

    /// Whether the process has `mutex` open
    pub fn has_open(&self, mutex: MutexId) -> bool {
        self.descriptors.contains(&Some(mutex))
    }

    /// Put `mutex` in the first free descriptor slot.
    pub fn attach(&mut self, mutex: MutexId) -> Result<(), KernelError> {
        let slot = self.free_descriptor().ok_or(KernelError::MaxDescriptors)?;
        self.descriptors[slot] = Some(mutex);
        Ok(())
    }

    /// Clear the first descriptor slot holding `mutex`.
    pub fn detach(&mut self, mutex: MutexId) -> Result<(), KernelError> {
        let slot = self
            .descriptors
            .iter()
            .position(|d| *d == Some(mutex))
            .ok_or(KernelError::Closed)?;
        self.descriptors[slot] = None;
        Ok(())
    }

    /// Open mutexes, in slot order
    pub fn open_mutexes(&self) -> Vec<MutexId> {
        self.descriptors.iter().flatten().copied().collect()
    }

    pub fn times(&self) -> ProcessTimes {
        ProcessTimes {
            user: self.user_ticks.min(u32::MAX as u64) as u32,
            system: self.system_ticks.min(u32::MAX as u64) as u32,
        }
    }

    /// Read-only snapshot
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            id: self.id,
            program: self.program.clone(),
            state: self.state,
            blocked_on: match self.state {
                ProcessState::Blocked => self.pending.clone(),
                _ => None,
            },
            created_at: self.created_at,
            wake_tick: self.wake_tick,
            times: self.times(),
            open_mutexes: self.descriptors.clone(),
        }
    }
}

/// Fixed-capacity process table
pub struct ProcessTable<H: HAL> {
    slots: Vec<ProcessDescriptor<H>>,
}

impl<H: HAL> ProcessTable<H> {
    pub fn new(capacity: usize, descriptor_slots: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| ProcessDescriptor::unused(ProcessId(i as u32), descriptor_slots))
            .collect();
        Self { slots }
    }

    /// First Unused slot.
    pub fn allocate(&self) -> Result<ProcessId, KernelError> {
        self.slots
            .iter()
            .find(|pd| pd.state == ProcessState::Unused)
            .map(|pd| pd.id)
            .ok_or(KernelError::TableFull)
    }

    pub fn get(&self, pid: ProcessId) -> Option<&ProcessDescriptor<H>> {
        self.slots.get(pid.index())
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut ProcessDescriptor<H>> {
        self.slots.get_mut(pid.index())
    }

    /// Mutable access to `save` alongside shared access to `load`.
    ///
    /// Used by the context switch, which writes one descriptor's registers
    /// while reading another's. Panics if both are the same process.
    pub fn pair_mut(
        &mut self,
        save: ProcessId,
        load: ProcessId,
    ) -> (&mut ProcessDescriptor<H>, &ProcessDescriptor<H>) {
        let (s, l) = (save.index(), load.index());
        assert_ne!(s, l, "context switch onto itself");
        if s < l {
            let (left, right) = self.slots.split_at_mut(l);
            (&mut left[s], &right[0])
        } else {
            let (left, right) = self.slots.split_at_mut(s);
            (&mut right[0], &left[l])
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessDescriptor<H>> {
        self.slots.iter()
    }

    /// Descriptors whose slot is in use
    pub fn live(&self) -> impl Iterator<Item = &ProcessDescriptor<H>> {
        self.slots
            .iter()
            .filter(|pd| pd.state != ProcessState::Unused)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Release the stack and image of `pid` and return its slot to Unused.
    ///
    /// The caller closes the process' mutex descriptors first.
    pub fn reclaim(&mut self, hal: &H, pid: ProcessId) {
        let pd = &mut self[pid];
        if let Some(stack) = pd.stack.take() {
            hal.release_stack(stack);
        }
        if let Some(image) = pd.image.take() {
            hal.release_image(image);
        }
        debug_assert!(pd.descriptors.iter().all(Option::is_none));
        let slots = pd.descriptors.len();
        *pd = ProcessDescriptor::unused(pid, slots);
    }
}

impl<H: HAL> Index<ProcessId> for ProcessTable<H> {
    type Output = ProcessDescriptor<H>;

    fn index(&self, pid: ProcessId) -> &ProcessDescriptor<H> {
        &self.slots[pid.index()]
    }
}

impl<H: HAL> IndexMut<ProcessId> for ProcessTable<H> {
    fn index_mut(&mut self, pid: ProcessId) -> &mut ProcessDescriptor<H> {
        &mut self.slots[pid.index()]
    }
}

impl<H: HAL> QueueLinks for ProcessTable<H> {
    fn next_link(&self, pid: ProcessId) -> Option<ProcessId> {
        self[pid].next
    }

    fn set_next_link(&mut self, pid: ProcessId, next: Option<ProcessId>) {
        self[pid].next = next;
    }
}
