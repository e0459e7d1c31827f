//! # Kernel Errors
//!
//! Every fallible kernel call returns [`KernelResult`]. Error values map onto
//! small negative POSIX-style codes so that callers speaking a C-like ABI
//! (shell commands, drivers) can forward them unchanged.

use core::fmt;

/// Result type used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Invalid argument, null or stale handle.
    Invalid,
    /// Precondition or protocol violation (joining a detached task,
    /// stopping a timer that was never started, ...).
    Access,
    /// A pool, stack or table allocation failed.
    NoMemory,
    /// Value out of range (priority, grain order, ...).
    Range,
    /// Operation not supported by this kernel or port.
    Unsupported,
    /// A blocking wait ended because its timeout elapsed.
    Timeout,
}

impl KernelError {
    /// The negative errno value for this error.
    pub const fn errno(self) -> i32 {
        match self {
            KernelError::Invalid => -22,
            KernelError::Access => -13,
            KernelError::NoMemory => -12,
            KernelError::Range => -34,
            KernelError::Unsupported => -38,
            KernelError::Timeout => -110,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::Invalid => "invalid argument",
            KernelError::Access => "operation not permitted in this state",
            KernelError::NoMemory => "out of memory",
            KernelError::Range => "value out of range",
            KernelError::Unsupported => "operation not supported",
            KernelError::Timeout => "timed out",
        };
        f.write_str(msg)
    }
}

/// Convert a kernel result into the C-style return convention: zero or a
/// positive value on success, a negative errno on failure.
pub fn to_errno(result: KernelResult<u32>) -> i32 {
    match result {
        Ok(value) => value.min(i32::MAX as u32) as i32,
        Err(err) => err.errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_values_are_negative() {
        for err in [
            KernelError::Invalid,
            KernelError::Access,
            KernelError::NoMemory,
            KernelError::Range,
            KernelError::Unsupported,
            KernelError::Timeout,
        ] {
            assert!(err.errno() < 0, "{:?} must map to a negative code", err);
        }
    }

    #[test]
    fn test_to_errno() {
        assert_eq!(to_errno(Ok(7)), 7);
        assert_eq!(to_errno(Err(KernelError::NoMemory)), -12);
        assert_eq!(to_errno(Ok(u32::MAX)), i32::MAX);
    }
}
