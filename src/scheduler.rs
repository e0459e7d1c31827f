//! # Scheduler
//!
//! Strict fixed-priority preemptive scheduling with round-robin among equal
//! priorities.
//!
//! ## Queues
//!
//! - One ready queue per priority level, plus a bitmap of non-empty levels
//!   so the highest ready priority is a single `trailing_zeros`.
//!   The running task stays at the head of its ready queue: preemption
//!   leaves it there (it resumes first), while a yield or an expired time
//!   slice rotates it to the tail.
//! - The delayed-task queue holds tasks sleeping in `delay`.
//! - One wait queue per semaphore slot, ordered by priority and FIFO among
//!   equal priorities.
//!
//! A task belongs to at most one of these queues at a time; `TaskControlBlock::queue`
//! records which, so any task can be unlinked in O(1).
//!
//! ## Scheduling points
//!
//! Every operation that can change the highest ready task (create, wake,
//! block, delay, yield, exit, tick) sets `needs_reschedule`; the port layer
//! then performs the switch at the next safe point by calling
//! [`Scheduler::schedule`] between saving the old context and restoring the
//! new one.
//!
//! ## Tick processing
//!
//! At each tick:
//! 1. Advance the tick counter and charge the tick to the running task
//!    (and to the idle counter of the CPU-rate window)
//! 2. Decrement the running task's time slice; rotate on expiry if a peer
//!    at the same priority is ready
//! 3. Decrement every delayed task and every timed wait; wake those that
//!    reach zero

use crate::arch::{port, Context};
use crate::config::{CPU_RATE_WINDOW, MAX_SEMAPHORES, MAX_TASKS, PRIORITY_LEVELS, TIME_SLICE};
use crate::error::{KernelError, KernelResult};
use crate::list::List;
use crate::task::{
    Queue, StackRegion, TaskConfig, TaskControlBlock, TaskEntry, TaskHandle, TaskState,
    WaitReason, WakeReason,
};

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Task that was running, if any.
    pub prev: Option<usize>,
    /// Task selected to run.
    pub next: usize,
}

/// Outcome of a join attempt.
#[derive(Debug, Clone, Copy)]
pub enum JoinPoll {
    /// The target had terminated: its exit code, and the stack that must be
    /// returned to the pool now that the target has been reaped.
    Done {
        exit_code: i32,
        stack: Option<StackRegion>,
    },
    /// The caller is now blocked until the target terminates.
    Pending,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state: task table, queues and tick accounting.
pub struct Scheduler {
    /// Fixed-size task table.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    ready: [List; PRIORITY_LEVELS],

    /// Bit `p` is set when `ready[p]` is non-empty.
    ready_bitmap: u32,

    delayed: List,

    wait_queues: [List; MAX_SEMAPHORES],

    /// Index of the currently running task.
    current: Option<usize>,

    idle: Option<usize>,

    /// Monotonic tick counter.
    pub tick_count: u64,

    /// Set whenever the highest ready task may have changed.
    pub needs_reschedule: bool,

    /// Number of switches that changed the running task.
    pub context_switches: u32,

    window_elapsed: u32,
    window_idle: u32,
    /// Busy share of the last complete window, in hundredths of a percent.
    cpu_rate: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            ready: [List::new(); PRIORITY_LEVELS],
            ready_bitmap: 0,
            delayed: List::new(),
            wait_queues: [List::new(); MAX_SEMAPHORES],
            current: None,
            idle: None,
            tick_count: 0,
            needs_reschedule: false,
            context_switches: 0,
            window_elapsed: 0,
            window_idle: 0,
            cpu_rate: 0,
        }
    }

    /// Place a new task in a free slot and make it ready.
    ///
    /// # Errors
    /// - [`KernelError::Range`] if the priority is not below `PRIORITY_LEVELS`.
    /// - [`KernelError::NoMemory`] if every slot is in use.
    pub fn spawn(
        &mut self,
        config: &TaskConfig,
        entry: TaskEntry,
        args: &'static [&'static str],
        stack: StackRegion,
    ) -> KernelResult<TaskHandle> {
        if config.priority as usize >= PRIORITY_LEVELS {
            return Err(KernelError::Range);
        }
        let slot = self
            .tasks
            .iter()
            .position(|t| !t.active)
            .ok_or(KernelError::NoMemory)?;

        self.tasks[slot].init(slot, config, entry, args, stack);
        self.tasks[slot].context = port::init_stack(&stack, slot as u8);
        self.make_ready(slot);

        log::debug!(
            "task {} '{}' created at priority {}",
            slot,
            config.name,
            config.priority
        );
        Ok(self.tasks[slot].handle())
    }

    /// Designate the idle task: it is charged to the idle side of the CPU
    /// rate and must never block.
    pub fn set_idle(&mut self, handle: TaskHandle) -> KernelResult<()> {
        let idx = self.resolve(handle)?;
        self.idle = Some(idx);
        Ok(())
    }

    /// Map a handle to its slot, rejecting free or reused slots.
    pub fn resolve(&self, handle: TaskHandle) -> KernelResult<usize> {
        let idx = handle.id();
        match self.tasks.get(idx) {
            Some(t) if t.active && t.generation == handle.generation() => Ok(idx),
            _ => Err(KernelError::Invalid),
        }
    }

    /// Slot of the running task.
    #[inline]
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Get a reference to the current task's TCB.
    pub fn current_tcb(&self) -> Option<&TaskControlBlock> {
        self.current.map(|c| &self.tasks[c])
    }

    /// Number of tasks waiting on wait queue `queue`.
    pub fn waiters(&self, queue: u8) -> usize {
        self.wait_queues[queue as usize].len()
    }

    // -----------------------------------------------------------------------
    // Queue plumbing
    // -----------------------------------------------------------------------

    fn list(&mut self, queue: Queue) -> (&mut List, &mut [TaskControlBlock]) {
        let list = match queue {
            Queue::Ready(p) => &mut self.ready[p as usize],
            Queue::Delayed => &mut self.delayed,
            Queue::Wait(w) => &mut self.wait_queues[w as usize],
        };
        (list, &mut self.tasks)
    }

    /// Remove a task from whichever queue holds it.
    fn unlink(&mut self, idx: usize) {
        if let Some(queue) = self.tasks[idx].queue.take() {
            let (list, tasks) = self.list(queue);
            list.remove(tasks, idx as u16);
            if let Queue::Ready(p) = queue {
                if self.ready[p as usize].is_empty() {
                    self.ready_bitmap &= !(1 << p);
                }
            }
        }
    }

    /// Append a task to the tail of its ready queue.
    fn make_ready(&mut self, idx: usize) {
        let prio = self.tasks[idx].priority;
        self.tasks[idx].state = TaskState::Ready;
        self.tasks[idx].queue = Some(Queue::Ready(prio));
        self.ready[prio as usize].push_back(&mut self.tasks, idx as u16);
        self.ready_bitmap |= 1 << prio;

        let preempts = match self.current {
            Some(c) => {
                prio < self.tasks[c].priority || self.tasks[c].state != TaskState::Running
            }
            None => true,
        };
        if preempts {
            self.needs_reschedule = true;
        }
    }

    /// Take the running task off the CPU into a non-ready state.
    fn suspend_current(&mut self, state: TaskState) -> KernelResult<usize> {
        let c = self.current.ok_or(KernelError::Access)?;
        debug_assert!(Some(c) != self.idle, "the idle task must never block");
        self.unlink(c);
        self.tasks[c].state = state;
        self.needs_reschedule = true;
        Ok(c)
    }

    // -----------------------------------------------------------------------
    // Task-context operations
    // -----------------------------------------------------------------------

    /// Rotate the running task to the tail of its ready queue.
    pub fn yield_current(&mut self) {
        if let Some(c) = self.current {
            if self.tasks[c].state == TaskState::Running {
                let prio = self.tasks[c].priority as usize;
                self.ready[prio].remove(&mut self.tasks, c as u16);
                self.ready[prio].push_back(&mut self.tasks, c as u16);
                self.tasks[c].slice_remaining = TIME_SLICE;
                self.needs_reschedule = true;
            }
        }
    }

    /// Put the running task to sleep for `ticks` ticks. Zero yields.
    pub fn delay_current(&mut self, ticks: u32) -> KernelResult<()> {
        if ticks == 0 {
            self.yield_current();
            return Ok(());
        }
        let c = self.suspend_current(TaskState::Delayed)?;
        self.tasks[c].timeout = Some(ticks);
        self.tasks[c].queue = Some(Queue::Delayed);
        self.delayed.push_back(&mut self.tasks, c as u16);
        Ok(())
    }

    /// Block the running task on `reason`, optionally bounded by `timeout`
    /// ticks. Semaphore waiters are queued by priority, FIFO among equals.
    pub fn block_current(&mut self, reason: WaitReason, timeout: Option<u32>) -> KernelResult<()> {
        let c = self.suspend_current(TaskState::Blocked)?;
        self.tasks[c].waiting_on = Some(reason);
        self.tasks[c].timeout = timeout;
        self.tasks[c].wake_reason = WakeReason::Signaled;

        if let WaitReason::Semaphore(queue) = reason {
            self.tasks[c].queue = Some(Queue::Wait(queue));
            self.wait_queues[queue as usize].insert_sorted_by(
                &mut self.tasks,
                c as u16,
                |new, cur| new.priority < cur.priority,
            );
        }
        Ok(())
    }

    /// Make a blocked or delayed task ready again.
    pub fn wake(&mut self, idx: usize, reason: WakeReason) {
        let task = &self.tasks[idx];
        if !task.active || !matches!(task.state, TaskState::Blocked | TaskState::Delayed) {
            return;
        }
        self.unlink(idx);
        let task = &mut self.tasks[idx];
        task.waiting_on = None;
        task.timeout = None;
        task.wake_reason = reason;
        self.make_ready(idx);
    }

    /// Wake the first waiter of wait queue `queue`.
    pub fn wake_one(&mut self, queue: u8) -> Option<usize> {
        let idx = self.wait_queues[queue as usize].head()? as usize;
        self.wake(idx, WakeReason::Signaled);
        Some(idx)
    }

    /// Why the running task was last woken.
    pub fn current_wake_reason(&self) -> Option<WakeReason> {
        self.current_tcb().map(|t| t.wake_reason)
    }

    /// Terminate the running task with `exit_code` and wake its joiner.
    pub fn exit_current(&mut self, exit_code: i32) -> KernelResult<()> {
        let c = self.suspend_current(TaskState::Terminated)?;
        self.tasks[c].join.exit_code = Some(exit_code);
        log::debug!("task {} '{}' exited with {}", c, self.tasks[c].name, exit_code);
        if let Some(joiner) = self.tasks[c].join.joiner {
            self.wake(joiner as usize, WakeReason::Signaled);
        }
        Ok(())
    }

    /// Wait for `target` to terminate.
    ///
    /// # Errors
    /// - [`KernelError::Invalid`] for a stale or unknown handle.
    /// - [`KernelError::Access`] when joining a detached task, the caller
    ///   itself, or a task another task is already joining.
    pub fn join(&mut self, target: TaskHandle) -> KernelResult<JoinPoll> {
        let c = self.current.ok_or(KernelError::Access)?;
        let t = self.resolve(target)?;
        if t == c || self.tasks[t].detached {
            return Err(KernelError::Access);
        }

        if self.tasks[t].state == TaskState::Terminated {
            // The exit code belongs to the registered joiner, if any.
            if matches!(self.tasks[t].join.joiner, Some(j) if j as usize != c) {
                return Err(KernelError::Access);
            }
            let exit_code = self.tasks[t].join.exit_code.unwrap_or_default();
            let stack = self.tasks[t].reap();
            log::debug!("task {} reaped by {}", t, c);
            return Ok(JoinPoll::Done { exit_code, stack });
        }

        match self.tasks[t].join.joiner {
            Some(j) if j as usize != c => Err(KernelError::Access),
            _ => {
                self.tasks[t].join.joiner = Some(c as u8);
                self.block_current(WaitReason::Join(t as u8), None)?;
                Ok(JoinPoll::Pending)
            }
        }
    }

    /// Block the running task with no wake source.
    pub fn pend_current(&mut self) -> KernelResult<()> {
        self.block_current(WaitReason::Pend, None)
    }

    /// Release the slot of a terminated task, returning its stack.
    pub fn reap(&mut self, idx: usize) -> Option<StackRegion> {
        if self.tasks[idx].active && self.tasks[idx].state == TaskState::Terminated {
            self.tasks[idx].reap()
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Interrupt-context operations
    // -----------------------------------------------------------------------

    /// Called from the SysTick handler every tick. Returns whether a
    /// context switch is needed.
    pub fn tick(&mut self) -> bool {
        self.tick_count += 1;
        self.account_cpu();

        // --- Round-robin time slice ---
        if let Some(c) = self.current {
            let task = &mut self.tasks[c];
            if task.state == TaskState::Running && Some(c) != self.idle {
                task.slice_remaining = task.slice_remaining.saturating_sub(1);
                if task.slice_remaining == 0 {
                    task.slice_remaining = TIME_SLICE;
                    if self.ready[task.priority as usize].len() > 1 {
                        self.yield_current();
                    }
                }
            }
        }

        // --- Delayed tasks ---
        let mut cursor = self.delayed.head();
        while let Some(idx) = cursor {
            let idx = idx as usize;
            cursor = self.tasks[idx].link.next();
            if Self::count_down(&mut self.tasks[idx]) {
                self.wake(idx, WakeReason::Timeout);
            }
        }

        // --- Timed waits ---
        for idx in 0..MAX_TASKS {
            let task = &mut self.tasks[idx];
            if task.active && task.state == TaskState::Blocked && Self::count_down(task) {
                self.wake(idx, WakeReason::Timeout);
            }
        }

        self.needs_reschedule
    }

    /// Decrement a task's remaining ticks; true when it reaches zero.
    fn count_down(task: &mut TaskControlBlock) -> bool {
        match task.timeout {
            Some(t) if t <= 1 => {
                task.timeout = Some(0);
                true
            }
            Some(t) => {
                task.timeout = Some(t - 1);
                false
            }
            None => false,
        }
    }

    fn account_cpu(&mut self) {
        if let Some(c) = self.current {
            self.tasks[c].run_ticks = self.tasks[c].run_ticks.wrapping_add(1);
            if Some(c) == self.idle {
                self.window_idle += 1;
            }
        }
        self.window_elapsed += 1;
        if self.window_elapsed >= CPU_RATE_WINDOW {
            let busy = self.window_elapsed - self.window_idle;
            self.cpu_rate = busy * 10_000 / self.window_elapsed;
            self.window_elapsed = 0;
            self.window_idle = 0;
        }
    }

    /// Busy share of the last measurement window as a percentage split into
    /// integer and two-digit fractional parts, e.g. `(37, 25)` for 37.25 %.
    pub fn cpu_rate(&self) -> (u32, u32) {
        (self.cpu_rate / 100, self.cpu_rate % 100)
    }

    // -----------------------------------------------------------------------
    // Context switch
    // -----------------------------------------------------------------------

    /// Select the next task to run: the head of the highest-priority
    /// non-empty ready queue.
    ///
    /// Returns `None` only if nothing at all is ready, which cannot happen
    /// once the idle task exists.
    pub fn schedule(&mut self) -> Option<Switch> {
        self.needs_reschedule = false;
        if self.ready_bitmap == 0 {
            return None;
        }
        let prio = self.ready_bitmap.trailing_zeros() as usize;
        let next = self.ready[prio].head()? as usize;

        let prev = self.current;
        if let Some(p) = prev {
            if self.tasks[p].state == TaskState::Running {
                self.tasks[p].state = TaskState::Ready;
            }
        }
        self.tasks[next].state = TaskState::Running;
        self.current = Some(next);
        if prev != Some(next) {
            self.context_switches = self.context_switches.wrapping_add(1);
        }
        Some(Switch { prev, next })
    }

    /// Record the saved context of a task that just left the CPU.
    pub fn save_context(&mut self, idx: usize, context: Context) {
        self.tasks[idx].context = context;
    }

    /// Saved context of a task about to be resumed.
    pub fn context(&self, idx: usize) -> Context {
        self.tasks[idx].context
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
