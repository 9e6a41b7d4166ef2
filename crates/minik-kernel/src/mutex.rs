//! Mutex subsystem
//!
//! A fixed table of named mutexes. Processes reach a mutex through a
//! descriptor slot obtained with create or open; the handle they pass around
//! is the mutex ID and the descriptor table is the proof that they opened it.
//!
//! # State machine
//!
//! ```text
//! Free --create--> Unlocked --lock--> Locked --unlock (nesting 0)--> Unlocked
//!   ^                                                                   |
//!   +------------------- last descriptor closed -----------------------+
//! ```
//!
//! `owner` keeps the last holder after an unlock. That makes an extra unlock
//! of a recursive mutex by its last owner fail with `UnlockFail`, while an
//! unlock by anyone else stays a silent success.

use alloc::string::String;
use alloc::vec::Vec;

use minik_hal::HAL;

use crate::error::KernelError;
use crate::queue::WaitQueue;
use crate::state::KernelState;
use crate::syscall::CallOutcome;
use crate::types::{BlockReason, MutexId, MutexInfo, MutexKind, MutexState, ProcessId};

/// One mutex slot
#[derive(Clone, Debug)]
pub struct Mutex {
    pub id: MutexId,
    pub state: MutexState,
    pub kind: MutexKind,
    /// Current holder, or the last one after an unlock
    pub owner: Option<ProcessId>,
    /// Lock depth of the owner
    pub nesting: u32,
    /// Names are compared as raw bytes
    pub name: Vec<u8>,
    /// Descriptors (across all processes) referencing this mutex
    pub open_count: usize,
    /// Processes blocked in `lock`
    pub waiters: WaitQueue,
}

impl Mutex {
    pub(crate) fn free(id: MutexId) -> Self {
        Self {
            id,
            state: MutexState::Free,
            kind: MutexKind::NonRecursive,
            owner: None,
            nesting: 0,
            name: Vec::new(),
            open_count: 0,
            waiters: WaitQueue::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == MutexState::Free
    }

    /// Name for logs and snapshots
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

impl<H: HAL> KernelState<H> {
    fn mutex_by_name(&self, name: &[u8]) -> Option<MutexId> {
        self.mutexes
            .iter()
            .find(|m| !m.is_free() && m.name == name)
            .map(|m| m.id)
    }

    /// Mutex `id` if it exists and is not Free.
    fn live_mutex(&self, id: MutexId) -> Result<&Mutex, KernelError> {
        match self.mutexes.get(id.index()) {
            Some(mutex) if !mutex.is_free() => Ok(mutex),
            _ => Err(KernelError::NotFound),
        }
    }

    /// Create a mutex named `name` and open it for `pid`.
    ///
    /// With the table full the caller blocks until a slot is freed; the
    /// retry re-validates the name since another process may have taken it
    /// meanwhile.
    pub(crate) fn create_mutex(
        &mut self,
        hal: &H,
        pid: ProcessId,
        name: Vec<u8>,
        kind: MutexKind,
    ) -> Result<CallOutcome, KernelError> {
        if self.processes[pid].free_descriptor().is_none() {
            return Err(KernelError::MaxDescriptors);
        }
        if name.len() > self.config.max_mutex_name_len {
            return Err(KernelError::NameTooLong);
        }
        if self.mutex_by_name(&name).is_some() {
            return Err(KernelError::NameExists);
        }

        let slot = match self.mutexes.iter().position(Mutex::is_free) {
            Some(slot) => slot,
            None => {
                self.log(
                    hal,
                    "mutex",
                    &alloc::format!("process {} waits for a free mutex slot", pid),
                );
                return Ok(CallOutcome::Block(BlockReason::MutexSlot { name, kind }));
            }
        };

        let id = self.mutexes[slot].id;
        self.processes[pid].attach(id)?;
        let mutex = &mut self.mutexes[slot];
        mutex.state = MutexState::Unlocked;
        mutex.kind = kind;
        mutex.owner = None;
        mutex.nesting = 0;
        mutex.name = name;
        mutex.open_count = 1;

        self.log(
            hal,
            "mutex",
            &alloc::format!(
                "process {} created {:?} mutex {} '{}'",
                pid,
                kind,
                id,
                self.mutexes[slot].display_name()
            ),
        );
        Ok(CallOutcome::Done(id.0 as i64))
    }

    /// Open an existing mutex by name.
    pub(crate) fn open_mutex(&mut self, pid: ProcessId, name: &[u8]) -> Result<CallOutcome, KernelError> {
        if self.processes[pid].free_descriptor().is_none() {
            return Err(KernelError::MaxDescriptors);
        }
        let id = self.mutex_by_name(name).ok_or(KernelError::NotFound)?;
        self.processes[pid].attach(id)?;
        self.mutexes[id.index()].open_count += 1;
        Ok(CallOutcome::Done(id.0 as i64))
    }

    /// Lock `id`, blocking while another process holds it.
    pub(crate) fn lock_mutex(&mut self, pid: ProcessId, id: MutexId) -> Result<CallOutcome, KernelError> {
        self.live_mutex(id)?;
        if !self.processes[pid].has_open(id) {
            return Err(KernelError::Closed);
        }

        let mutex = &mut self.mutexes[id.index()];
        if mutex.state == MutexState::Locked {
            if mutex.owner != Some(pid) {
                return Ok(CallOutcome::Block(BlockReason::MutexLock(id)));
            }
            return match mutex.kind {
                MutexKind::NonRecursive => Err(KernelError::LockFail),
                MutexKind::Recursive => {
                    mutex.nesting += 1;
                    Ok(CallOutcome::Done(0))
                }
            };
        }

        mutex.state = MutexState::Locked;
        mutex.owner = Some(pid);
        mutex.nesting = 1;
        Ok(CallOutcome::Done(0))
    }

    /// Unlock `id`. An unlock by a process that does not own it is a no-op.
    pub(crate) fn unlock_mutex(&mut self, pid: ProcessId, id: MutexId) -> Result<CallOutcome, KernelError> {
        self.live_mutex(id)?;
        if !self.processes[pid].has_open(id) {
            return Err(KernelError::Closed);
        }

        let mutex = &mut self.mutexes[id.index()];
        if mutex.owner != Some(pid) {
            return Ok(CallOutcome::Done(0));
        }
        match mutex.kind {
            MutexKind::Recursive => {
                if mutex.nesting == 0 {
                    return Err(KernelError::UnlockFail);
                }
                mutex.nesting -= 1;
                if mutex.nesting == 0 {
                    self.release_mutex(id);
                }
            }
            MutexKind::NonRecursive => self.release_mutex(id),
        }
        Ok(CallOutcome::Done(0))
    }

    /// Drop the lock and hand the mutex to its first waiter.
    fn release_mutex(&mut self, id: MutexId) {
        let mutex = &mut self.mutexes[id.index()];
        mutex.state = MutexState::Unlocked;
        mutex.nesting = 0;
        if let Some(waiter) = mutex.waiters.pop_front(&mut self.processes) {
            self.make_ready(waiter);
        }
    }

    /// Close `pid`'s descriptor for `id`, fully releasing a lock it holds.
    ///
    /// Closing the last descriptor frees the slot and wakes a process
    /// waiting to create a mutex.
    pub(crate) fn close_mutex(&mut self, hal: &H, pid: ProcessId, id: MutexId) -> Result<CallOutcome, KernelError> {
        if !self.processes[pid].has_open(id) {
            return Err(KernelError::Closed);
        }

        let mutex = &mut self.mutexes[id.index()];
        if mutex.state == MutexState::Locked && mutex.owner == Some(pid) {
            mutex.nesting = 1;
            self.unlock_mutex(pid, id)?;
        }

        self.processes[pid].detach(id)?;
        let mutex = &mut self.mutexes[id.index()];
        mutex.open_count -= 1;
        if mutex.owner == Some(pid) {
            mutex.owner = None;
        }
        if mutex.open_count == 0 {
            let name = mutex.display_name();
            *mutex = Mutex::free(id);
            self.log(
                hal,
                "mutex",
                &alloc::format!("mutex {} '{}' destroyed", id, name),
            );
            self.wake_mutex_slot_waiter();
        }
        Ok(CallOutcome::Done(0))
    }

    /// Close every descriptor of `pid`, in slot order.
    pub(crate) fn close_all_mutexes(&mut self, hal: &H, pid: ProcessId) {
        for id in self.processes[pid].open_mutexes() {
            if self.close_mutex(hal, pid, id).is_err() {
                hal.fatal("descriptor table out of sync with mutex table");
            }
        }
    }

    /// Snapshot of mutex `id`.
    pub fn mutex_info(&self, id: MutexId) -> Option<MutexInfo> {
        let mutex = self.mutexes.get(id.index())?;
        Some(MutexInfo {
            id: mutex.id,
            name: mutex.display_name(),
            kind: mutex.kind,
            state: mutex.state,
            owner: mutex.owner,
            nesting: mutex.nesting,
            open_count: mutex.open_count,
            waiters: mutex.waiters.iter(&self.processes).collect::<Vec<_>>(),
        })
    }
}
