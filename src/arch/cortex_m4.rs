//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! initial stack frames, the PendSV context switch, the SysTick tick and
//! interrupt priority setup. Integer context only (`thumbv7em-none-eabi`).
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the startup code and exception handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. PendSV pushes R4–R11 plus its EXC_RETURN value below
//! them, hands the resulting stack pointer to the kernel and restores the
//! same nine words from the stack of the task the kernel picked.
//!
//! ```text
//!   high ┌──────────┐
//!        │ xPSR     │ ◄─ hardware frame (8 words)
//!        │ PC       │
//!        │ LR       │
//!        │ R12      │
//!        │ R3..R0   │
//!        ├──────────┤
//!        │ EXC_RET  │ ◄─ software frame (9 words)
//!        │ R11..R4  │
//!    low └──────────┘ ◄─ saved Context::sp
//! ```
//!
//! PSP is zero until the first switch, which tells PendSV that there is
//! no outgoing task to save.
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV both run at the lowest priority (0xFF): they never
//! preempt application interrupt handlers or each other.

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::arch::Context;
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::task::StackRegion;

/// Words in the initial frame: 8 hardware-stacked + 9 software-saved.
pub const INITIAL_FRAME_WORDS: usize = 17;

/// Thumb bit of xPSR; must be set or the first instruction faults.
const XPSR_THUMB: u32 = 1 << 24;

/// Return to Thread mode, process stack, no FPU state.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

// ---------------------------------------------------------------------------
// Stack initialization
// ---------------------------------------------------------------------------

/// Build the frame a task is first resumed from: PendSV "returns" into
/// [`crate::kernel::run_task`] with the task slot in R0.
pub fn init_stack(stack: &StackRegion, slot: u8) -> Context {
    let top = stack.top() & !0x07;
    let sp = top - INITIAL_FRAME_WORDS * 4;
    let frame = sp as *mut u32;

    let entry = crate::kernel::run_task as usize as u32 & !1;
    let mut words = [0u32; INITIAL_FRAME_WORDS];
    // Software frame: R4-R11, EXC_RETURN.
    words[8] = EXC_RETURN_THREAD_PSP;
    // Hardware frame: R0-R3, R12, LR, PC, xPSR.
    words[9] = slot as u32;
    words[14] = 0;
    words[15] = entry;
    words[16] = XPSR_THUMB;

    for (i, word) in words.iter().enumerate() {
        // SAFETY: `sp..top` lies inside the task's own stack region, which
        // nothing else references until the task first runs.
        unsafe { frame.add(i).write_volatile(*word) };
    }
    Context { sp }
}

// ---------------------------------------------------------------------------
// SysTick and priorities
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: changing system handler priorities before the scheduler runs
    // cannot break any priority-based critical section.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// Switching
// ---------------------------------------------------------------------------

/// Pend a context switch. It is taken as soon as no other exception is
/// active and interrupts are enabled.
#[inline]
pub fn request_switch() {
    SCB::set_pendsv();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

/// Enter the first task. The calling (main) thread is never resumed.
pub fn start_first_task() -> ! {
    // SAFETY: PSP is unused in Thread mode until the first switch; zero
    // marks "no outgoing task" for PendSV.
    unsafe {
        cortex_m::register::psp::write(0);
        cortex_m::interrupt::enable();
    }
    request_switch();
    loop {
        cortex_m::asm::wfi();
    }
}

#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// Exception handlers
// ---------------------------------------------------------------------------

core::arch::global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    cbz r0, 1f",
    "    stmdb r0!, {{r4-r11, lr}}",
    "1:",
    "    bl {switch}",
    "    ldmia r0!, {{r4-r11, lr}}",
    "    msr psp, r0",
    "    bx lr",
    switch = sym pendsv_switch,
);

/// Called from PendSV with the outgoing task's stack pointer (zero on the
/// first switch); returns the stack pointer to resume from.
extern "C" fn pendsv_switch(sp: usize) -> usize {
    crate::kernel::switch_context(sp)
}

/// SysTick exception handler: the kernel tick.
#[no_mangle]
pub extern "C" fn SysTick() {
    crate::kernel::tick();
}
