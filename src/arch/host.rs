//! # Host Port Layer
//!
//! Stand-in port used when the kernel core is built for the development
//! machine. There is no task execution: stacks are never entered and the
//! caller performs context switches explicitly through
//! [`KernelContext::switch`](crate::context::KernelContext::switch).
//! The stack layout arithmetic matches the Cortex-M4 port so that stack
//! accounting behaves identically.

use crate::arch::Context;
use crate::task::StackRegion;

/// Words in the initial frame: 8 hardware-stacked + 9 software-saved.
pub const INITIAL_FRAME_WORDS: usize = 17;

/// Compute the initial saved context of a task without touching its stack.
pub fn init_stack(stack: &StackRegion, _slot: u8) -> Context {
    let top = stack.top() & !0x07;
    Context {
        sp: top - INITIAL_FRAME_WORDS * 4,
    }
}

/// Nothing to trigger: switches are driven by the caller.
#[inline]
pub fn request_switch() {}

#[inline]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}
