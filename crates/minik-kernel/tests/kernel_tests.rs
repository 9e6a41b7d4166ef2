//! Kernel integration tests
//!
//! Boot, scheduling, sleeping, terminal input, accounting and faults, all
//! driven through the mock HAL.

mod common;

use common::*;
use minik_hal::HAL;
use minik_hal_mock::{MockHal, SwitchRecord};
use minik_kernel::syscall::*;
use minik_kernel::{
    BlockReason, Interrupt, KernelConfig, KernelError, ProcessId, ProcessState, SysEventType,
    System,
};

// ============================================================================
// Boot
// ============================================================================

#[test]
fn test_boot_dispatches_init() {
    let kernel = boot(&[]);

    assert_eq!(kernel.running(), Some(ProcessId(0)));
    assert_eq!(loaded(&kernel), "init");
    assert_eq!(kernel.hal().installed_handlers(), Interrupt::ALL.to_vec());
    assert_eq!(kernel.hal().clock_hz(), 100);
    assert_eq!(
        kernel.hal().switches(),
        vec![SwitchRecord {
            saved: false,
            to_program: String::from("init"),
        }]
    );
    assert!(kernel.hal().has_log_containing("[0.000] [proc] created process 0 from 'init'"));
}

#[test]
#[should_panic(expected = "kernel fatal: init program 'init' not found")]
fn test_boot_without_init_is_fatal() {
    let mut kernel = System::new(MockHal::new());
    kernel.boot();
}

#[test]
fn test_invalid_config_rejected() {
    let config = KernelConfig {
        max_processes: 0,
        ..KernelConfig::default()
    };
    assert!(matches!(
        System::with_config(MockHal::new(), config),
        Err(KernelError::InvalidConfig)
    ));
}

// ============================================================================
// Process creation and termination
// ============================================================================

#[test]
fn test_create_process_returns_pid_and_queues_it() {
    let mut kernel = boot(&["worker"]);

    let path = user_str(&kernel, "worker");
    assert_eq!(syscall(&mut kernel, SYS_CREATE_PROCESS, &[path]), 1);

    assert_eq!(kernel.ready_queue(), vec![ProcessId(1)]);
    let info = kernel.process_info(ProcessId(1)).unwrap();
    assert_eq!(info.program, "worker");
    assert_eq!(info.state, ProcessState::Ready);
    assert_eq!(kernel.hal().live_images(), 2);
    assert_eq!(kernel.hal().live_stacks(), 2);
    assert_invariants(&kernel);
}

#[test]
fn test_create_process_failures_leave_no_trace() {
    let mut kernel = boot(&["worker"]);

    let missing = user_str(&kernel, "missing");
    assert_eq!(syscall(&mut kernel, SYS_CREATE_PROCESS, &[missing]), -1);

    kernel.hal().set_stack_exhausted(true);
    let path = user_str(&kernel, "worker");
    assert_eq!(syscall(&mut kernel, SYS_CREATE_PROCESS, &[path]), -1);
    kernel.hal().set_stack_exhausted(false);

    assert_eq!(kernel.hal().live_images(), 1);
    assert_eq!(kernel.hal().live_stacks(), 1);
    assert!(kernel.process_info(ProcessId(1)).is_none());
    assert_invariants(&kernel);
}

#[test]
fn test_process_table_full() {
    let config = KernelConfig {
        max_processes: 2,
        ..KernelConfig::default()
    };
    let mut kernel = boot_with(&["worker"], config);

    let path = user_str(&kernel, "worker");
    assert_eq!(syscall(&mut kernel, SYS_CREATE_PROCESS, &[path]), 1);
    assert_eq!(syscall(&mut kernel, SYS_CREATE_PROCESS, &[path]), -5);
    assert_invariants(&kernel);
}

#[test]
fn test_terminate_reclaims_and_dispatches_next() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    syscall(&mut kernel, SYS_TERMINATE_PROCESS, &[]);

    assert_eq!(kernel.running(), Some(ProcessId(1)));
    assert_eq!(loaded(&kernel), "worker");
    assert!(kernel.process_info(ProcessId(0)).is_none());
    assert_eq!(kernel.hal().live_images(), 1);
    assert_eq!(kernel.hal().live_stacks(), 1);
    // A terminated process has nothing to save
    assert!(!kernel.hal().switches().last().unwrap().saved);
    assert_invariants(&kernel);

    // The freed slot is reused
    let path = user_str(&kernel, "worker");
    assert_eq!(syscall(&mut kernel, SYS_CREATE_PROCESS, &[path]), 0);
}

#[test]
fn test_get_pid() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    assert_eq!(syscall(&mut kernel, SYS_GET_PID, &[]), 0);
    run_until_loaded(&mut kernel, "worker");
    assert_eq!(syscall(&mut kernel, SYS_GET_PID, &[]), 1);
}

#[test]
fn test_unknown_syscall_fails() {
    let mut kernel = boot(&[]);
    assert_eq!(syscall(&mut kernel, 42, &[]), -1);
    assert_eq!(syscall(&mut kernel, NUM_SYSCALLS, &[]), -1);
    assert!(kernel.hal().has_log_containing("unknown syscall 42"));
    assert_invariants(&kernel);
}

#[test]
fn test_write_goes_to_console() {
    let mut kernel = boot(&[]);

    let buf = kernel.hal().alloc_user(b"hello, world");
    assert_eq!(syscall(&mut kernel, SYS_WRITE, &[buf, 5]), 0);
    assert_eq!(kernel.hal().console_output(), b"hello".to_vec());

    let big = kernel.hal().alloc_user(&[b'x'; 600]);
    assert_eq!(syscall(&mut kernel, SYS_WRITE, &[big, 600]), 0);
    assert_eq!(kernel.hal().console_output().len(), 605);
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn test_single_process_never_switches_away() {
    let config = KernelConfig {
        ticks_per_slice: 5,
        ..KernelConfig::default()
    };
    let mut kernel = boot_with(&[], config);

    tick(&mut kernel, 23);

    assert_eq!(kernel.running(), Some(ProcessId(0)));
    assert_eq!(kernel.hal().switch_count(), 1);
    // Boot plus one rotation per expired quantum
    assert_eq!(kernel.rotations(), 1 + 4);
    assert_eq!(kernel.state().quantum_used, 3);
    assert_invariants(&kernel);
}

#[test]
fn test_round_robin_on_quantum_expiry() {
    let mut kernel = boot(&["a", "b"]);
    kernel.spawn("a").unwrap();
    kernel.spawn("b").unwrap();

    tick(&mut kernel, 9);
    assert_eq!(loaded(&kernel), "init");

    tick(&mut kernel, 1);
    assert_eq!(loaded(&kernel), "a");
    assert_eq!(kernel.ready_queue(), vec![ProcessId(2), ProcessId(0)]);
    assert!(kernel.hal().has_log_containing("[0.100] [sched] switch 0 -> 1"));
    assert_invariants(&kernel);

    tick(&mut kernel, 10);
    assert_eq!(loaded(&kernel), "b");
    tick(&mut kernel, 10);
    assert_eq!(loaded(&kernel), "init");

    let switches = kernel.hal().switches();
    assert_eq!(switches.len(), 4);
    assert!(switches[1..].iter().all(|s| s.saved));
}

#[test]
fn test_registers_survive_a_round_trip() {
    let mut kernel = boot(&["a"]);
    kernel.spawn("a").unwrap();

    kernel.hal().write_register(5, 1234);
    run_until_loaded(&mut kernel, "a");
    assert_eq!(kernel.hal().read_register(5), 0);
    kernel.hal().write_register(5, 99);

    run_until_loaded(&mut kernel, "init");
    assert_eq!(kernel.hal().read_register(5), 1234);
}

// ============================================================================
// Sleep
// ============================================================================

#[test]
fn test_sleep_wakes_at_first_tick_past_deadline() {
    let config = KernelConfig {
        ticks_per_slice: 1000,
        ..KernelConfig::default()
    };
    let mut kernel = boot_with(&["worker"], config);
    kernel.spawn("worker").unwrap();
    tick(&mut kernel, 10);

    syscall(&mut kernel, SYS_SLEEP, &[3]);
    assert_eq!(loaded(&kernel), "worker");
    assert_eq!(kernel.sleeping_on_timer(), vec![ProcessId(0)]);
    let info = kernel.process_info(ProcessId(0)).unwrap();
    assert_eq!(info.blocked_on, Some(BlockReason::Timer));
    assert_eq!(info.wake_tick, 310);
    assert_invariants(&kernel);

    tick(&mut kernel, 299);
    assert_eq!(kernel.ticks(), 309);
    assert_eq!(
        kernel.process_info(ProcessId(0)).unwrap().state,
        ProcessState::Blocked
    );

    tick(&mut kernel, 1);
    assert_eq!(
        kernel.process_info(ProcessId(0)).unwrap().state,
        ProcessState::Ready
    );
    assert_eq!(kernel.ready_queue(), vec![ProcessId(0)]);
    assert!(kernel.sleeping_on_timer().is_empty());
    assert_invariants(&kernel);
}

#[test]
fn test_sleep_with_nothing_else_idles_then_returns() {
    let mut kernel = boot(&[]);
    tick(&mut kernel, 10);

    assert_eq!(syscall(&mut kernel, SYS_SLEEP, &[3]), 0);

    assert_eq!(kernel.ticks(), 310);
    assert_eq!(kernel.running(), Some(ProcessId(0)));
    // Woken process was the one that slept: no switch
    assert_eq!(kernel.hal().switch_count(), 1);
    assert!(kernel.hal().has_log_containing("[sched] idle"));
    // Idle ticks are not charged to anyone
    assert_eq!(kernel.times().user + kernel.times().system, 10);
    assert_invariants(&kernel);
}

#[test]
fn test_sleeper_resumes_with_result_zero() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    kernel.hal().write_register(REG_MARKER, 0xAA);
    syscall(&mut kernel, SYS_SLEEP, &[1]);
    assert_eq!(loaded(&kernel), "worker");

    run_until_loaded(&mut kernel, "init");
    assert!(kernel.ticks() >= 100);
    assert_eq!(kernel.hal().result(), 0);
    assert_eq!(kernel.hal().read_register(REG_MARKER), 0xAA);

    // The audit trail holds the late response
    let response = kernel.syslog().events().back().unwrap().clone();
    assert_eq!(response.sender, 0);
    assert!(matches!(
        response.event_type,
        SysEventType::Response { result: 0, waited, .. } if waited >= 100
    ));
    assert!(kernel.syslog().in_flight().is_empty());
    assert_invariants(&kernel);
}

const REG_MARKER: usize = 6;

// ============================================================================
// Accounting
// ============================================================================

#[test]
fn test_process_times() {
    let mut kernel = boot(&[]);
    tick(&mut kernel, 5);
    kernel.hal().set_user_mode(false);
    tick(&mut kernel, 3);
    kernel.hal().set_user_mode(true);

    let out = kernel.hal().user_buffer(8);
    assert_eq!(syscall(&mut kernel, SYS_GET_PROCESS_TIMES, &[out]), 8);
    assert_eq!(kernel.hal().read_user(out, 8), vec![5, 0, 0, 0, 3, 0, 0, 0]);

    assert_eq!(syscall(&mut kernel, SYS_GET_PROCESS_TIMES, &[0]), 8);
    assert_eq!(kernel.times().user, 5);
    assert_eq!(kernel.times().system, 3);
}

#[test]
fn test_times_charged_to_the_running_process() {
    let mut kernel = boot(&["worker"]);
    tick(&mut kernel, 4);
    kernel.spawn("worker").unwrap();
    tick(&mut kernel, 6);
    assert_eq!(loaded(&kernel), "worker");
    tick(&mut kernel, 3);

    let worker = kernel.process_info(ProcessId(1)).unwrap();
    assert_eq!(worker.created_at, 4);
    assert_eq!(worker.times.user, 3);
    assert_eq!(kernel.process_info(ProcessId(0)).unwrap().times.user, 10);
    assert_invariants(&kernel);
}

// ============================================================================
// Terminal input
// ============================================================================

#[test]
fn test_terminal_overflow_drops_excess() {
    let mut kernel = boot(&[]);

    for byte in b"abcdefghij" {
        kernel.hal().press_key(*byte);
    }
    deliver_pending(&mut kernel);

    assert_eq!(kernel.terminal_pending(), 8);
    assert_eq!(kernel.state().terminal.dropped(), 2);
    assert!(kernel.hal().has_log_containing("buffer full"));

    let mut read = Vec::new();
    for _ in 0..8 {
        read.push(syscall(&mut kernel, SYS_READ_CHAR, &[]) as u8);
    }
    assert_eq!(read, b"abcdefgh".to_vec());
    assert_eq!(kernel.terminal_pending(), 0);
    assert_invariants(&kernel);
}

#[test]
fn test_read_char_blocks_until_input() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    syscall(&mut kernel, SYS_READ_CHAR, &[]);
    assert_eq!(loaded(&kernel), "worker");
    assert_eq!(kernel.sleeping_on_terminal(), vec![ProcessId(0)]);
    assert_invariants(&kernel);

    kernel.hal().press_key(b'q');
    deliver_pending(&mut kernel);
    assert_eq!(kernel.ready_queue(), vec![ProcessId(0)]);

    run_until_loaded(&mut kernel, "init");
    assert_eq!(kernel.hal().result(), b'q' as i64);
    assert_invariants(&kernel);
}

#[test]
fn test_read_char_alone_idles_for_input() {
    let mut kernel = boot(&[]);
    // Arrives only once the CPU halts
    kernel.hal().press_key(b'z');

    assert_eq!(syscall(&mut kernel, SYS_READ_CHAR, &[]), b'z' as i64);
    assert_eq!(kernel.hal().switch_count(), 1);
    assert_invariants(&kernel);
}

// ============================================================================
// Faults
// ============================================================================

#[test]
fn test_user_arithmetic_fault_kills_process() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    kernel.handle_interrupt(Interrupt::ArithmeticFault);

    assert_eq!(loaded(&kernel), "worker");
    assert!(kernel.process_info(ProcessId(0)).is_none());
    assert!(kernel.hal().has_log_containing("process 0 killed by ArithmeticFault"));
    assert_invariants(&kernel);
}

#[test]
#[should_panic(expected = "kernel fatal: arithmetic exception in kernel mode")]
fn test_kernel_arithmetic_fault_is_fatal() {
    let mut kernel = boot(&[]);
    kernel.hal().set_user_mode(false);
    kernel.handle_interrupt(Interrupt::ArithmeticFault);
}

#[test]
#[should_panic(expected = "kernel fatal: memory exception in kernel mode")]
fn test_kernel_memory_fault_is_fatal() {
    let mut kernel = boot(&[]);
    kernel.hal().set_user_mode(false);
    kernel.handle_interrupt(Interrupt::MemoryFault);
}

#[test]
fn test_user_memory_fault_kills_process() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    kernel.handle_interrupt(Interrupt::MemoryFault);

    assert_eq!(kernel.running(), Some(ProcessId(1)));
    assert_invariants(&kernel);
}

#[test]
fn test_bad_user_pointer_kills_caller() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    syscall(&mut kernel, SYS_WRITE, &[0xdead_0000, 4]);

    assert_eq!(loaded(&kernel), "worker");
    assert!(kernel.process_info(ProcessId(0)).is_none());
    assert!(kernel.hal().has_log_containing("bad pointer"));
    assert!(!kernel.state().user_access);
    assert_invariants(&kernel);
}

#[test]
fn test_bad_times_pointer_kills_caller() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    syscall(&mut kernel, SYS_GET_PROCESS_TIMES, &[0xdead_0000]);

    assert_eq!(kernel.running(), Some(ProcessId(1)));
    assert_invariants(&kernel);
}

// ============================================================================
// Audit trail
// ============================================================================

#[test]
fn test_syscalls_are_audited() {
    let mut kernel = boot(&["worker"]);
    kernel.spawn("worker").unwrap();

    syscall(&mut kernel, SYS_GET_PID, &[]);
    let events = kernel.syslog().events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0].event_type,
        SysEventType::Request {
            syscall_num: SYS_GET_PID,
            ..
        }
    ));
    assert!(matches!(
        events[1].event_type,
        SysEventType::Response {
            request_id: 0,
            result: 0,
            waited: 0
        }
    ));

    // A blocked call stays in flight until it completes
    syscall(&mut kernel, SYS_SLEEP, &[1]);
    let open = kernel.syslog().in_flight();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].sender, 0);
    assert_eq!(kernel.syslog().last_result(0), Some(0));
}
