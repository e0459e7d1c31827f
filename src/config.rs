//! # PLOS Configuration
//!
//! Compile-time constants governing the kernel core. All limits are fixed
//! at compile time: task slots, semaphores and timers live in static tables,
//! and stacks and FIFOs are carved from the system memory pool.

/// Maximum number of task slots, including the idle task and the timer daemon.
pub const MAX_TASKS: usize = 16;

/// Number of distinct priority levels. Priority `0` is the highest; the
/// lowest level (`PRIORITY_LEVELS - 1`) is reserved for the idle task.
/// Must not exceed 32 (the ready bitmap is a `u32`).
pub const PRIORITY_LEVELS: usize = 32;

/// Highest numeric priority an application task may request.
pub const MAX_TASK_PRIORITY: u8 = (PRIORITY_LEVELS - 2) as u8;

/// Priority of the idle task.
pub const IDLE_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;

/// Priority of the software timer daemon. Callbacks run at this priority.
pub const TIMER_DAEMON_PRIORITY: u8 = 1;

/// SysTick frequency in Hz. One tick is the unit of every delay, timeout
/// and timer interval.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Round-robin time slice in ticks among tasks of equal priority.
pub const TIME_SLICE: u32 = 10;

/// Length of the CPU usage measurement window in ticks.
pub const CPU_RATE_WINDOW: u32 = 1000;

/// Default stack size in bytes for application tasks.
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Smallest stack accepted at task creation: the initial register frame
/// plus room for the entry function's own frame.
pub const MIN_STACK_SIZE: usize = 128;

/// Stack size of the idle task. It only executes `wfi` in a loop.
pub const IDLE_STACK_SIZE: usize = 256;

/// Stack size of the timer daemon. Timer callbacks run on this stack.
pub const TIMER_DAEMON_STACK_SIZE: usize = 1024;

/// Number of semaphore slots (one is used by the timer daemon).
pub const MAX_SEMAPHORES: usize = 16;

/// Number of software timer slots.
pub const MAX_TIMERS: usize = 16;

/// Number of grains tracked by one allocator block. Allocations never span
/// two blocks, so this also bounds the largest single allocation.
pub const GRAINS_PER_BLOCK: usize = 256;

/// Maximum number of blocks a single pool may be partitioned into.
pub const MAX_POOL_BLOCKS: usize = 32;

/// Grain order (log2 of the grain size) of the system pool.
pub const SYSTEM_POOL_GRAIN_ORDER: u8 = 4;

/// Size in bytes of the system pool arena used for stacks and FIFOs.
pub const SYSTEM_POOL_SIZE: usize = 32 * 1024;

/// Number of entries in the application registry.
pub const MAX_APPS: usize = 16;

/// Longest formatted log line in bytes. Longer lines are truncated.
pub const LOG_LINE_MAX: usize = 128;
