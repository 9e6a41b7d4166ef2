//! Kernel error type and the syscall error ABI

use minik_hal::HalError;

/// Generic failure code returned to user space
pub const E_FAILED: i64 = -1;
/// A mutex with that name already exists
pub const E_NAME_EXISTS: i64 = -2;
/// Mutex name longer than the configured limit
pub const E_NAME_TOO_LONG: i64 = -3;
/// The caller's mutex descriptor table is full
pub const E_MAX_DESCRIPTORS: i64 = -4;
/// The process table is full
pub const E_TABLE_FULL: i64 = -5;
/// The caller has not opened that mutex
pub const E_CLOSED: i64 = -6;
/// No such mutex
pub const E_NOT_FOUND: i64 = -7;
/// A non-recursive mutex was locked twice by its owner
pub const E_LOCK_FAIL: i64 = -8;
/// A recursive mutex was unlocked more times than it was locked
pub const E_UNLOCK_FAIL: i64 = -9;

/// Kernel errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Malformed syscall argument
    InvalidArgument,
    /// Mutex name already in use
    NameExists,
    /// Mutex name too long
    NameTooLong,
    /// No free mutex descriptor slot in the caller
    MaxDescriptors,
    /// No free process slot
    TableFull,
    /// Mutex not opened by the caller
    Closed,
    /// Mutex does not exist
    NotFound,
    /// Recursive lock of a non-recursive mutex
    LockFail,
    /// Unlock of a recursive mutex with nesting 0
    UnlockFail,
    /// Configuration rejected by `KernelConfig::validate`
    InvalidConfig,
    /// HAL error
    Hal(HalError),
}

impl KernelError {
    /// Negative code placed in the result register.
    pub fn code(self) -> i64 {
        match self {
            KernelError::NameExists => E_NAME_EXISTS,
            KernelError::NameTooLong => E_NAME_TOO_LONG,
            KernelError::MaxDescriptors => E_MAX_DESCRIPTORS,
            KernelError::TableFull => E_TABLE_FULL,
            KernelError::Closed => E_CLOSED,
            KernelError::NotFound => E_NOT_FOUND,
            KernelError::LockFail => E_LOCK_FAIL,
            KernelError::UnlockFail => E_UNLOCK_FAIL,
            KernelError::InvalidArgument | KernelError::InvalidConfig | KernelError::Hal(_) => {
                E_FAILED
            }
        }
    }

    /// Whether the error means the caller handed the kernel a bad pointer.
    ///
    /// Such a fault is taken inside the guarded-access window and costs the
    /// caller its life rather than an error code.
    pub fn is_user_fault(self) -> bool {
        matches!(self, KernelError::Hal(HalError::BadAddress))
    }
}

impl From<HalError> for KernelError {
    fn from(e: HalError) -> Self {
        KernelError::Hal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            KernelError::NameExists,
            KernelError::NameTooLong,
            KernelError::MaxDescriptors,
            KernelError::TableFull,
            KernelError::Closed,
            KernelError::NotFound,
            KernelError::LockFail,
            KernelError::UnlockFail,
        ];
        for (i, a) in errors.iter().enumerate() {
            assert!(a.code() < E_FAILED);
            for b in &errors[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_hal_errors_collapse_to_generic_failure() {
        let err: KernelError = HalError::ProgramNotFound.into();
        assert_eq!(err, KernelError::Hal(HalError::ProgramNotFound));
        assert_eq!(err.code(), E_FAILED);
        assert!(!err.is_user_fault());
        assert!(KernelError::from(HalError::BadAddress).is_user_fault());
    }
}
