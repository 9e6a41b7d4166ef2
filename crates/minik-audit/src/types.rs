//! Common types for the audit layer.

/// Process identifier (matches minik-kernel's ProcessId)
pub type ProcessId = u32;

/// Event identifier (monotonic, unique within SysLog)
pub type EventId = u64;

/// Clock tick count
pub type Tick = u64;
