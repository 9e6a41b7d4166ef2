//! Helpers shared by the kernel integration tests

#![allow(dead_code)]

use minik_hal::HAL;
use minik_hal_mock::MockHal;
use minik_kernel::{Interrupt, KernelConfig, System};

pub type Kernel = System<MockHal>;

/// Boot a kernel whose HAL knows `programs` ("init" is always added).
pub fn boot_with(programs: &[&str], config: KernelConfig) -> Kernel {
    let hal = MockHal::with_programs(&["init"]);
    for program in programs {
        hal.add_program(program);
    }
    let mut kernel = System::with_config(hal, config).unwrap();
    kernel.boot();
    assert_invariants(&kernel);
    kernel
}

pub fn boot(programs: &[&str]) -> Kernel {
    boot_with(programs, KernelConfig::default())
}

/// Deliver every interrupt the HAL has pending.
pub fn deliver_pending(kernel: &mut Kernel) {
    while let Some(irq) = kernel.hal().take_pending() {
        kernel.handle_interrupt(irq);
    }
}

/// Run `n` clock ticks, delivering whatever they raise.
pub fn tick(kernel: &mut Kernel, n: u64) {
    for _ in 0..n {
        kernel.handle_interrupt(Interrupt::Clock);
        deliver_pending(kernel);
    }
}

/// Issue a syscall from the loaded process and return register 0 afterwards.
///
/// If the call blocked, the loaded context (and so the value returned) may
/// belong to another process by then.
pub fn syscall(kernel: &mut Kernel, number: u64, args: &[u64]) -> i64 {
    kernel.hal().stage_syscall(number, args);
    kernel.handle_interrupt(Interrupt::Syscall);
    deliver_pending(kernel);
    kernel.hal().result()
}

/// Pass a string to the loaded process as a user pointer.
pub fn user_str(kernel: &Kernel, s: &str) -> u64 {
    kernel.hal().user_str(s)
}

pub fn loaded(kernel: &Kernel) -> String {
    kernel.hal().loaded_program().unwrap_or_default()
}

pub fn assert_invariants(kernel: &Kernel) {
    let violations = kernel.check_invariants();
    assert!(violations.is_empty(), "invariants violated: {:?}", violations);
    assert_eq!(
        kernel.hal().interrupt_level(),
        minik_hal::InterruptLevel::Unmasked
    );
}

/// Tick until `program` is the loaded process.
pub fn run_until_loaded(kernel: &mut Kernel, program: &str) {
    for _ in 0..10_000 {
        if loaded(kernel) == program {
            return;
        }
        tick(kernel, 1);
    }
    panic!("{} never got the CPU", program);
}
