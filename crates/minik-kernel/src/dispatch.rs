//! Rotation: the only place the running process changes
//!
//! `rotate` reclassifies the outgoing process, asks the scheduler for the
//! next one and switches contexts. `reschedule` wraps it with the resume
//! loop: a process dispatched with an interrupted blocking call re-runs that
//! call, and either completes it (writing the result register, which is now
//! its own) or blocks again and rotation repeats.

use minik_audit::EventId;
use minik_hal::{InterruptLevel, HAL, REG_SYSCALL};

use crate::critical::IrqGuard;
use crate::error::KernelError;
use crate::state::KernelState;
use crate::syscall::CallOutcome;
use crate::types::{BlockReason, ProcessId, ProcessState};

impl<H: HAL> KernelState<H> {
    /// Give the CPU away and resume whoever gets it.
    pub(crate) fn reschedule(&mut self, hal: &H) {
        let _mask = IrqGuard::new(hal, InterruptLevel::Clock);
        loop {
            self.rotate(hal);

            let pid = self.current(hal);
            let Some(reason) = self.processes[pid].pending.take() else {
                return;
            };
            let request = self.processes[pid].pending_request.take();

            match self.retry_blocked_call(hal, pid, reason) {
                Ok(CallOutcome::Block(reason)) => self.block(pid, reason, request),
                Ok(CallOutcome::Done(value)) => {
                    self.complete_call(hal, pid, request, value);
                    return;
                }
                Ok(CallOutcome::Exited) => return,
                Err(e) => {
                    self.complete_call(hal, pid, request, e.code());
                    return;
                }
            }
        }
    }

    /// Reclassify the running process and dispatch the next ready one.
    fn rotate(&mut self, hal: &H) {
        let _mask = IrqGuard::new(hal, InterruptLevel::Clock);

        let prev = self.running.take();
        let mut dead = None;
        if let Some(pid) = prev {
            match self.processes[pid].state {
                ProcessState::Running => self.make_ready(pid),
                ProcessState::Blocked => self.enqueue_blocked(hal, pid),
                ProcessState::Terminated => dead = Some(pid),
                state => hal.fatal(&alloc::format!(
                    "rotating process {} in state {:?}",
                    pid,
                    state
                )),
            }
        }

        let next = self.pick_next(hal);
        if self.ready.pop_front(&mut self.processes) != Some(next) {
            hal.fatal("ready queue changed under the scheduler");
        }
        self.processes[next].state = ProcessState::Running;
        self.running = Some(next);
        self.quantum_used = 0;
        self.rotations += 1;

        if let Some(pid) = dead {
            self.processes.reclaim(hal, pid);
            self.log(hal, "proc", &alloc::format!("reclaimed process {}", pid));
        }

        match prev {
            Some(pid) if pid == next => {}
            Some(pid) if dead.is_none() => {
                let (from, to) = self.processes.pair_mut(pid, next);
                hal.switch_context(Some(&mut from.context), &to.context);
                self.log(hal, "sched", &alloc::format!("switch {} -> {}", pid, next));
            }
            _ => {
                hal.switch_context(None, &self.processes[next].context);
                self.log(hal, "sched", &alloc::format!("dispatch {}", next));
            }
        }
    }

    /// Re-run an interrupted call once the condition it waited for may hold.
    fn retry_blocked_call(
        &mut self,
        hal: &H,
        pid: ProcessId,
        reason: BlockReason,
    ) -> Result<CallOutcome, KernelError> {
        match reason {
            BlockReason::Timer => {
                if self.processes[pid].wake_tick <= self.ticks {
                    Ok(CallOutcome::Done(0))
                } else {
                    Ok(CallOutcome::Block(BlockReason::Timer))
                }
            }
            BlockReason::MutexLock(id) => self.lock_mutex(pid, id),
            BlockReason::MutexSlot { name, kind } => self.create_mutex(hal, pid, name, kind),
            BlockReason::TerminalInput => Ok(self.take_terminal_char()),
        }
    }

    /// Tag `pid` as blocked; the next rotation queues it.
    pub(crate) fn block(&mut self, pid: ProcessId, reason: BlockReason, request: Option<EventId>) {
        let pd = &mut self.processes[pid];
        pd.state = ProcessState::Blocked;
        pd.pending = Some(reason);
        pd.pending_request = request;
    }

    /// Deliver a syscall result to `pid`, whose context must be loaded.
    pub(crate) fn complete_call(
        &mut self,
        hal: &H,
        pid: ProcessId,
        request: Option<EventId>,
        value: i64,
    ) {
        hal.write_register(REG_SYSCALL, value as u64);
        if let Some(request) = request {
            self.syslog.record_result(request, value, self.ticks);
        }
    }

    /// End the running process and dispatch another.
    ///
    /// Open mutexes are closed first, which may wake waiters. The slot
    /// itself is reclaimed by the rotation.
    pub(crate) fn terminate_running(&mut self, hal: &H) {
        let _mask = IrqGuard::new(hal, InterruptLevel::Clock);
        let pid = self.current(hal);

        self.close_all_mutexes(hal, pid);
        let pd = &mut self.processes[pid];
        pd.state = ProcessState::Terminated;
        pd.pending = None;
        pd.pending_request = None;
        self.log(hal, "proc", &alloc::format!("process {} terminated", pid));

        self.reschedule(hal);
    }
}
