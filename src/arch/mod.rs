//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the scheduler. The
//! Cortex-M4 port performs the real register save/restore; the host port
//! keeps the same interface so the kernel core builds and runs its unit
//! tests on a development machine, where the test plays the role of the
//! context-switch interrupt.
//!
//! Every port exposes:
//! - `init_stack(stack, slot) -> Context`: lay out the first frame of a task
//! - `request_switch()`: ask for a context switch at the next safe point
//! - `wait_for_interrupt()`: idle until the next interrupt

#[cfg(target_arch = "arm")]
pub mod cortex_m4;
#[cfg(target_arch = "arm")]
pub use cortex_m4 as port;

#[cfg(not(target_arch = "arm"))]
pub mod host;
#[cfg(not(target_arch = "arm"))]
pub use host as port;

/// Saved execution context of a task that is not running.
///
/// On the Cortex-M4 the registers themselves live on the task's stack, so
/// the context is just the saved process stack pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub sp: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self { sp: 0 }
    }
}
