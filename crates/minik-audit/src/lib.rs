//! Minikernel audit layer
//!
//! Provides the **SysLog**: an append-only audit trail of every syscall
//! (request + response). The kernel logs the request when the trap is taken
//! and the response when the call completes, which for blocking calls may be
//! many rotations later.

#![no_std]
extern crate alloc;

pub mod syslog;
pub mod types;

// Re-export main types
pub use syslog::{PendingCall, SysEvent, SysEventType, SysLog, MAX_SYSLOG_EVENTS};
pub use types::*;
