//! # Task Control Block
//!
//! Defines the task model for PLOS. Each task has a fixed priority, an
//! exclusively owned stack carved from the system pool, a saved execution
//! context, and exactly one queue membership at a time (its ready queue, a
//! semaphore wait queue, or the delayed-task queue).

use core::ptr::NonNull;

use crate::arch::Context;
use crate::config::TIME_SLICE;
use crate::list::{Link, Linked};

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///            create()
///               │
///               ▼      schedule()       ┌─────────┐  entry returns
///         ┌──────────┐ ───────────────► │ Running │ ─────────────► Terminated
///         │  Ready   │ ◄─────────────── └─────────┘                    │
///         └──────────┘  preempt / yield   │      │                     │
///            ▲    ▲                       │      │ delay()             ▼
///            │    │     take() / join()   │      ▼                reaped by join
///            │    └──── Blocked ◄─────────┘   Delayed             (or at once
///            │                                   │                 if detached)
///            └───────────── tick reaches 0 ──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in its priority's ready queue.
    Ready,
    /// Executing on the CPU (still at the head of its ready queue).
    Running,
    /// Waiting for a semaphore, a join or nothing at all (`pend`).
    Blocked,
    /// Sleeping for a number of ticks.
    Delayed,
    /// Entry function returned; waiting to be reaped.
    Terminated,
}

/// Which queue currently links a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Ready(u8),
    Delayed,
    Wait(u8),
}

/// What a blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// A unit from the semaphore with this wait queue.
    Semaphore(u8),
    /// Termination of the task in this slot.
    Join(u8),
    /// Nothing: parked for good by the assertion facility.
    Pend,
}

/// Why a blocked task was made ready again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The awaited event happened (a `give`, the joined task exiting).
    Signaled,
    /// The wait timed out.
    Timeout,
}

/// Task entry point. Receives the argument vector given at creation and
/// returns the task's exit code.
pub type TaskEntry = fn(&[&'static str]) -> i32;

// ---------------------------------------------------------------------------
// Handles and configuration
// ---------------------------------------------------------------------------

/// Opaque reference to a task. The generation detects handles to a slot
/// that has since been reaped and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    slot: u8,
    generation: u16,
}

impl TaskHandle {
    pub(crate) const fn new(slot: u8, generation: u16) -> Self {
        Self { slot, generation }
    }

    /// Numeric task id (its slot in the task table).
    #[inline]
    pub fn id(&self) -> usize {
        self.slot as usize
    }

    #[inline]
    pub(crate) fn generation(&self) -> u16 {
        self.generation
    }
}

/// Creation parameters for a task.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Task name, reported by diagnostics.
    pub name: &'static str,
    /// Fixed priority, `0` is the highest. Must not exceed
    /// [`MAX_TASK_PRIORITY`](crate::config::MAX_TASK_PRIORITY).
    pub priority: u8,
    /// Stack size in bytes, rounded up to the pool grain.
    pub stack_size: usize,
    /// Detached tasks are reclaimed on termination and cannot be joined.
    pub detached: bool,
}

/// Stack memory owned by a task.
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    base: NonNull<u8>,
    size: usize,
}

impl StackRegion {
    pub fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest address of the region (stacks grow down).
    #[inline]
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.size
    }
}

/// Exit code slot and waiting joiner of a joinable task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinState {
    pub exit_code: Option<i32>,
    pub joiner: Option<u8>,
}

/// Read-only snapshot of a task for diagnostics (`ps`-style listings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: usize,
    pub name: &'static str,
    pub priority: u8,
    pub state: TaskState,
    pub run_ticks: u32,
    pub stack_size: usize,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB), the scheduler's per-task record.
///
/// TCBs are stored in a fixed table owned by the scheduler; the stack they
/// point to is allocated from the system pool at creation and returned when
/// the task is reaped.
pub struct TaskControlBlock {
    /// Slot index in the task table.
    pub id: usize,
    /// Bumped every time the slot is reused.
    pub generation: u16,
    pub name: &'static str,
    /// Fixed priority, `0` is the highest.
    pub priority: u8,
    pub state: TaskState,
    pub detached: bool,
    /// Owned stack, `None` for a free slot.
    pub stack: Option<StackRegion>,
    /// Saved execution context, valid while the task is not running.
    pub context: Context,
    pub entry: Option<TaskEntry>,
    pub args: &'static [&'static str],
    /// Ticks spent running since creation.
    pub run_ticks: u32,
    /// Remaining ticks of a delay (`Delayed`) or timed wait (`Blocked`).
    pub timeout: Option<u32>,
    /// Remaining ticks of the round-robin slice.
    pub slice_remaining: u32,
    pub join: JoinState,
    pub waiting_on: Option<WaitReason>,
    pub wake_reason: WakeReason,
    /// Queue currently holding this task, if any.
    pub queue: Option<Queue>,
    pub link: Link,
    /// Whether this slot holds a task.
    pub active: bool,
}

// Safety: the raw stack pointer inside `stack` refers to pool memory owned
// exclusively by this TCB. TCBs are only touched inside critical sections.
unsafe impl Send for TaskControlBlock {}

impl TaskControlBlock {
    /// An unallocated slot.
    pub const EMPTY: Self = Self::empty();

    pub const fn empty() -> Self {
        Self {
            id: 0,
            generation: 0,
            name: "",
            priority: 0,
            state: TaskState::Terminated,
            detached: false,
            stack: None,
            context: Context::new(),
            entry: None,
            args: &[],
            run_ticks: 0,
            timeout: None,
            slice_remaining: 0,
            join: JoinState {
                exit_code: None,
                joiner: None,
            },
            waiting_on: None,
            wake_reason: WakeReason::Signaled,
            queue: None,
            link: Link::new(),
            active: false,
        }
    }

    /// Initialize a free slot for a new task. The task starts `Ready` but is
    /// not linked into any queue yet.
    pub fn init(
        &mut self,
        id: usize,
        config: &TaskConfig,
        entry: TaskEntry,
        args: &'static [&'static str],
        stack: StackRegion,
    ) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::empty();
        self.id = id;
        self.generation = generation;
        self.name = config.name;
        self.priority = config.priority;
        self.state = TaskState::Ready;
        self.detached = config.detached;
        self.stack = Some(stack);
        self.entry = Some(entry);
        self.args = args;
        self.slice_remaining = TIME_SLICE;
        self.active = true;
    }

    /// Release the slot, returning the stack that must go back to the pool.
    pub fn reap(&mut self) -> Option<StackRegion> {
        let stack = self.stack.take();
        let generation = self.generation;
        *self = Self::empty();
        self.generation = generation;
        stack
    }

    /// Handle referring to the task currently in this slot.
    #[inline]
    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.id as u8, self.generation)
    }

    /// Check if this task can be picked by the scheduler.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.active && matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name,
            priority: self.priority,
            state: self.state,
            run_ticks: self.run_ticks,
            stack_size: self.stack.map_or(0, |s| s.size()),
        }
    }
}

impl Linked for TaskControlBlock {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(_args: &[&'static str]) -> i32 {
        0
    }

    fn stack(buf: &mut [u8]) -> StackRegion {
        StackRegion::new(NonNull::new(buf.as_mut_ptr()).unwrap(), buf.len())
    }

    #[test]
    fn test_tcb_initialization() {
        let mut buf = [0u8; 64];
        let mut tcb = TaskControlBlock::empty();
        assert!(!tcb.active);

        let config = TaskConfig {
            name: "worker",
            priority: 5,
            stack_size: 64,
            detached: false,
        };
        tcb.init(3, &config, entry, &["a", "b"], stack(&mut buf));

        assert!(tcb.active);
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.priority, 5);
        assert_eq!(tcb.args.len(), 2);
        assert_eq!(tcb.slice_remaining, TIME_SLICE);
        assert_eq!(tcb.handle().id(), 3);
        assert!(tcb.is_runnable());
        assert_eq!(tcb.info().stack_size, 64);
    }

    #[test]
    fn test_reap_and_slot_reuse() {
        let mut buf = [0u8; 64];
        let mut tcb = TaskControlBlock::empty();
        let config = TaskConfig {
            name: "once",
            priority: 1,
            stack_size: 64,
            detached: true,
        };
        tcb.init(0, &config, entry, &[], stack(&mut buf));
        let first = tcb.handle();

        let released = tcb.reap();
        assert!(released.is_some());
        assert!(!tcb.active);
        assert!(tcb.reap().is_none());

        tcb.init(0, &config, entry, &[], stack(&mut buf));
        assert_ne!(tcb.handle(), first);
        assert_eq!(tcb.handle().generation(), first.generation() + 1);
    }

    #[test]
    fn test_stack_region_top() {
        let mut buf = [0u8; 128];
        let region = stack(&mut buf);
        assert_eq!(region.top() - region.base().as_ptr() as usize, 128);
    }
}
