//! # PLOS: Preemptive Little Operating System
//!
//! The kernel core of a small preemptive real-time operating system for
//! ARM Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! - **Scheduler**: strict fixed priorities (`0` is highest), round-robin
//!   with a time slice among equal priorities, delays, join, CPU usage
//! - **Memory pool**: grain-granular bitmap allocator over a fixed arena;
//!   task stacks and FIFOs come from it, there is no unbounded heap
//! - **Semaphores**: counting, with priority-ordered waiters and timeouts
//! - **Software timers**: one-shot and periodic, run by a daemon task
//! - **FIFO**: byte ring buffer shared between interrupt handlers and tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │        Kernel API (kernel.rs) · App registry (apps.rs) │
//! │   task_create · join · delay · sem_* · timer_* · fifo  │
//! ├────────────────────────────────────────────────────────┤
//! │               KernelContext (context.rs)               │
//! ├──────────────┬──────────────┬──────────────┬───────────┤
//! │  Scheduler   │  Semaphores  │   Timers     │   FIFO    │
//! │ scheduler.rs │   sem.rs     │  timer.rs    │  fifo.rs  │
//! ├──────────────┴──────────────┴──────────────┴───────────┤
//! │    Task model (task.rs) · Intrusive list (list.rs)     │
//! │    Memory pool (pool.rs) · Critical sections (sync.rs) │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch port (arch/cortex_m4.rs · arch/host.rs)         │
//! │      PendSV · SysTick · Stack frame init · WFI         │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No `alloc`**: pure `core`; all tables are fixed-size
//! - **One arena**: handed to [`kernel::init`], partitioned by the pool
//! - **Critical sections**: the only locking primitive, from the
//!   `critical-section` crate
//!
//! ## Host builds
//!
//! Everything except the register save/restore builds for the development
//! machine with a stand-in port, so the kernel logic is unit-tested on the
//! host.

#![no_std]

pub mod apps;
pub mod arch;
pub mod config;
pub mod context;
pub mod diag;
pub mod error;
pub mod fifo;
pub mod kernel;
pub mod list;
pub mod logger;
pub mod pool;
pub mod scheduler;
pub mod sem;
pub mod sync;
pub mod task;
pub mod timer;

#[cfg(test)]
mod testing;

pub use error::{KernelError, KernelResult};
