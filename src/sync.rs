//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections, the kernel's only locking primitive.
//! All shared kernel state (ready/wait/timer queues, semaphore counts, FIFO
//! indices, allocator bitmaps) is accessed inside a critical section.
//!
//! On the Cortex-M4 the implementation comes from `cortex-m`'s
//! `critical-section-single-core` feature (PRIMASK save/disable/restore);
//! on the host it is provided by `critical-section`'s `std` implementation.
//! Both restore the previous interrupt state on exit, so sections nest.

use core::sync::atomic::{AtomicU8, Ordering};

pub use critical_section::{CriticalSection, Mutex};

/// Current critical-section nesting depth.
static NESTING: AtomicU8 = AtomicU8::new(0);

/// Execute a closure within a critical section (interrupts disabled).
///
/// Sections may nest; interrupts are re-enabled only when the outermost
/// section exits. Keep the enclosed work short and never block inside it:
/// a context switch requested from within a section is deferred until the
/// outermost section has been left.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(|cs| {
        NESTING.store(NESTING.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
        let result = f(cs);
        NESTING.store(NESTING.load(Ordering::Relaxed) - 1, Ordering::Relaxed);
        result
    })
}

/// Current nesting depth. Zero means interrupts are enabled.
#[inline]
pub fn nesting_depth() -> u8 {
    NESTING.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_nest() {
        critical_section(|_| {
            assert_eq!(nesting_depth(), 1);
            let inner = critical_section(|_| nesting_depth());
            assert_eq!(inner, 2);
            assert_eq!(nesting_depth(), 1);
        });
    }

    #[test]
    fn test_section_returns_value() {
        let value = critical_section(|_| 40 + 2);
        assert_eq!(value, 42);
    }
}
