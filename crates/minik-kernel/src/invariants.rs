//! Runtime-checkable kernel invariants
//!
//! These should hold at every point where the kernel is not inside a handler
//! (between interrupts). Tests call `check_all_invariants` after each step.
//!
//! # Invariants
//!
//! 1. **Running Consistency**: at most one process is Running and it is the one recorded as running
//! 2. **Queue Membership**: Ready and Blocked processes sit in exactly one queue, the one their state and block reason name
//! 3. **Queue Integrity**: every queue's length and tail agree with its link chain
//! 4. **Mutex Names**: names are unique among non-Free mutexes
//! 5. **Mutex Locking**: lock depth and owner agree with the mutex state and kind
//! 6. **Descriptor Counts**: each mutex's open count equals the descriptors referencing it
//! 7. **Terminal Cursors**: the fill level never exceeds the buffer capacity
//! 8. **Tick Accounting**: attributed ticks never exceed elapsed ticks

use alloc::string::String;
use alloc::vec::Vec;

use minik_hal::HAL;

use crate::queue::{QueueLinks, WaitQueue};
use crate::state::KernelState;
use crate::types::{BlockReason, MutexKind, MutexState, ProcessId, ProcessState};

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

fn violation(invariant: &'static str, description: String) -> InvariantViolation {
    InvariantViolation {
        invariant,
        description,
    }
}

/// Check all kernel invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_running_consistency(state));
    violations.extend(check_queue_membership(state));
    violations.extend(check_queue_integrity(state));
    violations.extend(check_mutex_names(state));
    violations.extend(check_mutex_locking(state));
    violations.extend(check_descriptor_counts(state));
    violations.extend(check_terminal_cursors(state));
    violations.extend(check_tick_accounting(state));

    violations
}

/// Every queue, labelled, with the mutex it belongs to if any
fn all_queues<H: HAL>(state: &KernelState<H>) -> Vec<(&'static str, Option<usize>, &WaitQueue)> {
    let mut queues = alloc::vec![
        ("ready", None, &state.ready),
        ("sleeping_timer", None, &state.sleeping_timer),
        ("sleeping_mutex_slot", None, &state.sleeping_mutex_slot),
        ("sleeping_terminal", None, &state.sleeping_terminal),
    ];
    for (i, mutex) in state.mutexes.iter().enumerate() {
        queues.push(("mutex", Some(i), &mutex.waiters));
    }
    queues
}

/// Invariant 1: at most one Running process, and it is `running`
fn check_running_consistency<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let running: Vec<ProcessId> = state
        .processes
        .iter()
        .filter(|pd| pd.state == ProcessState::Running)
        .map(|pd| pd.id)
        .collect();

    match (state.running, running.as_slice()) {
        (None, []) => {}
        (Some(pid), [only]) if pid == *only => {}
        (recorded, found) => violations.push(violation(
            "running_consistency",
            alloc::format!("running is {:?} but Running processes are {:?}", recorded, found),
        )),
    }

    violations
}

/// Invariant 2: queue membership matches process state
fn check_queue_membership<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let queues = all_queues(state);

    for pd in state.processes.iter() {
        let memberships: Vec<(&'static str, Option<usize>)> = queues
            .iter()
            .filter(|(_, _, q)| q.contains(&state.processes, pd.id))
            .map(|(name, mutex, _)| (*name, *mutex))
            .collect();

        let expected: Option<(&'static str, Option<usize>)> = match pd.state {
            ProcessState::Ready => Some(("ready", None)),
            ProcessState::Blocked => match &pd.pending {
                Some(BlockReason::Timer) => Some(("sleeping_timer", None)),
                Some(BlockReason::MutexLock(id)) => Some(("mutex", Some(id.index()))),
                Some(BlockReason::MutexSlot { .. }) => Some(("sleeping_mutex_slot", None)),
                Some(BlockReason::TerminalInput) => Some(("sleeping_terminal", None)),
                None => {
                    violations.push(violation(
                        "queue_membership",
                        alloc::format!("Process {} is Blocked with no block reason", pd.id),
                    ));
                    continue;
                }
            },
            ProcessState::Unused | ProcessState::Running | ProcessState::Terminated => None,
        };

        let ok = match expected {
            Some(queue) => memberships.len() == 1 && memberships[0] == queue,
            None => memberships.is_empty(),
        };
        if !ok {
            violations.push(violation(
                "queue_membership",
                alloc::format!(
                    "Process {} ({:?}) expected in {:?} but found in {:?}",
                    pd.id,
                    pd.state,
                    expected,
                    memberships
                ),
            ));
        }
    }

    // A Terminated process only exists inside a rotation
    for pd in state.processes.iter() {
        if pd.state == ProcessState::Terminated {
            violations.push(violation(
                "queue_membership",
                alloc::format!("Process {} is Terminated but not reclaimed", pd.id),
            ));
        }
    }

    violations
}

/// Invariant 3: queue bookkeeping agrees with the link chain
fn check_queue_integrity<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (name, mutex, queue) in all_queues(state) {
        let members: Vec<ProcessId> = queue.iter(&state.processes).collect();
        if members.len() != queue.len() {
            violations.push(violation(
                "queue_integrity",
                alloc::format!(
                    "Queue {} {:?} has len {} but {} linked members",
                    name,
                    mutex,
                    queue.len(),
                    members.len()
                ),
            ));
        }
        if members.last().copied() != queue.back() {
            violations.push(violation(
                "queue_integrity",
                alloc::format!("Queue {} {:?} tail does not match its last member", name, mutex),
            ));
        }
        if let Some(tail) = queue.back() {
            if state.processes.next_link(tail).is_some() {
                violations.push(violation(
                    "queue_integrity",
                    alloc::format!("Queue {} {:?} link chain runs past its tail", name, mutex),
                ));
            }
        }
    }

    violations
}

/// Invariant 4: mutex names are unique among non-Free slots
fn check_mutex_names<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (i, a) in state.mutexes.iter().enumerate() {
        if a.is_free() {
            continue;
        }
        for b in &state.mutexes[i + 1..] {
            if !b.is_free() && a.name == b.name {
                violations.push(violation(
                    "mutex_names",
                    alloc::format!(
                        "Mutexes {} and {} are both named '{}'",
                        a.id,
                        b.id,
                        a.display_name()
                    ),
                ));
            }
        }
    }

    violations
}

/// Invariant 5: nesting and owner agree with state and kind
fn check_mutex_locking<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for mutex in &state.mutexes {
        let problem = match (mutex.state, mutex.kind) {
            (MutexState::Locked, _) if mutex.owner.is_none() => Some("is Locked with no owner"),
            (MutexState::Locked, MutexKind::NonRecursive) if mutex.nesting != 1 => {
                Some("is a Locked non-recursive mutex with nesting != 1")
            }
            (MutexState::Locked, MutexKind::Recursive) if mutex.nesting == 0 => {
                Some("is a Locked recursive mutex with nesting 0")
            }
            (MutexState::Unlocked, _) if mutex.nesting != 0 => Some("is Unlocked with nesting > 0"),
            (MutexState::Free, _)
                if mutex.owner.is_some() || mutex.nesting != 0 || !mutex.waiters.is_empty() =>
            {
                Some("is Free but still has an owner, nesting or waiters")
            }
            _ => None,
        };
        if let Some(problem) = problem {
            violations.push(violation(
                "mutex_locking",
                alloc::format!("Mutex {} {}", mutex.id, problem),
            ));
        }

        if let Some(owner) = mutex.owner {
            if mutex.state == MutexState::Locked
                && state.processes[owner].state == ProcessState::Unused
            {
                violations.push(violation(
                    "mutex_locking",
                    alloc::format!("Mutex {} is held by dead process {}", mutex.id, owner),
                ));
            }
        }
    }

    violations
}

/// Invariant 6: open counts match the descriptor tables, and 0 means Free
fn check_descriptor_counts<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for mutex in &state.mutexes {
        let references = state
            .processes
            .live()
            .flat_map(|pd| pd.descriptors.iter())
            .filter(|d| **d == Some(mutex.id))
            .count();
        if references != mutex.open_count {
            violations.push(violation(
                "descriptor_counts",
                alloc::format!(
                    "Mutex {} has open_count {} but {} descriptors",
                    mutex.id,
                    mutex.open_count,
                    references
                ),
            ));
        }
        if (mutex.open_count == 0) != mutex.is_free() {
            violations.push(violation(
                "descriptor_counts",
                alloc::format!(
                    "Mutex {} is {:?} with open_count {}",
                    mutex.id,
                    mutex.state,
                    mutex.open_count
                ),
            ));
        }
    }

    for pd in state.processes.live() {
        for id in pd.descriptors.iter().flatten() {
            if state.mutexes.get(id.index()).map_or(true, |m| m.is_free()) {
                violations.push(violation(
                    "descriptor_counts",
                    alloc::format!("Process {} holds a descriptor for free mutex {}", pd.id, id),
                ));
            }
        }
    }

    violations
}

/// Invariant 7: terminal cursors stay within capacity
fn check_terminal_cursors<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let term = &state.terminal;
    if term.consumed() > term.written() || term.len() > term.capacity() {
        violations.push(violation(
            "terminal_cursors",
            alloc::format!(
                "Terminal buffer has written {} consumed {} capacity {}",
                term.written(),
                term.consumed(),
                term.capacity()
            ),
        ));
    }

    violations
}

/// Invariant 8: user + system ticks never exceed elapsed ticks
fn check_tick_accounting<H: HAL>(state: &KernelState<H>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    if state.user_ticks + state.system_ticks > state.ticks {
        violations.push(violation(
            "tick_accounting",
            alloc::format!(
                "{} user + {} system ticks exceed {} elapsed",
                state.user_ticks,
                state.system_ticks,
                state.ticks
            ),
        ));
    }

    for pd in state.processes.live() {
        if pd.user_ticks + pd.system_ticks > state.ticks - pd.created_at {
            violations.push(violation(
                "tick_accounting",
                alloc::format!("Process {} was charged more ticks than it has lived", pd.id),
            ));
        }
    }

    violations
}
