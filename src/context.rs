//! # Kernel Context
//!
//! The single object holding all kernel state, built in dependency order:
//! the system pool first (task stacks and FIFOs come from it), then the
//! scheduler with the idle task and the timer daemon, then the semaphore
//! and timer tables. Nothing here blocks; operations that would suspend
//! the caller leave it blocked in the scheduler and report a poll
//! outcome, and the port layer performs the switch afterwards through
//! [`KernelContext::switch`].
//!
//! [`crate::kernel`] wraps one global instance in a critical-section
//! mutex and turns these poll outcomes into blocking calls.

use core::ptr::NonNull;

use crate::apps::AppRegistry;
use crate::arch::Context;
use crate::config::{
    IDLE_PRIORITY, IDLE_STACK_SIZE, MAX_TASK_PRIORITY, MIN_STACK_SIZE, SYSTEM_POOL_GRAIN_ORDER,
    TIMER_DAEMON_PRIORITY, TIMER_DAEMON_STACK_SIZE,
};
use crate::error::{KernelError, KernelResult};
use crate::fifo::Fifo;
use crate::pool::Pool;
use crate::scheduler::{JoinPoll, Scheduler};
use crate::sem::{SemHandle, SemaphoreTable, TakePoll, Timeout};
use crate::task::{StackRegion, TaskConfig, TaskEntry, TaskHandle, TaskState};
use crate::timer::{TimerCallback, TimerHandle, TimerMode, TimerTable};

/// All kernel state.
pub struct KernelContext<'a> {
    pub pool: Pool<'a>,
    pub sched: Scheduler,
    pub sems: SemaphoreTable,
    pub timers: TimerTable,
    pub apps: AppRegistry,
    /// Wakes the timer daemon when a timer becomes the earliest to expire.
    timer_sem: SemHandle,
}

impl<'a> KernelContext<'a> {
    /// Build the kernel over `arena` and create the idle task and the timer
    /// daemon with the given entry points. No task runs until the first
    /// [`switch`](Self::switch).
    pub fn new(arena: &'a mut [u8], idle: TaskEntry, timer_daemon: TaskEntry) -> KernelResult<Self> {
        let pool = Pool::request(arena, SYSTEM_POOL_GRAIN_ORDER)?;
        let mut sems = SemaphoreTable::new();
        let timer_sem = sems.create(0)?;

        let mut ctx = Self {
            pool,
            sched: Scheduler::new(),
            sems,
            timers: TimerTable::new(),
            apps: AppRegistry::new(),
            timer_sem,
        };

        let idle_config = TaskConfig {
            name: "idle",
            priority: IDLE_PRIORITY,
            stack_size: IDLE_STACK_SIZE,
            detached: true,
        };
        let idle = ctx.spawn(&idle_config, idle, &[])?;
        ctx.sched.set_idle(idle)?;

        let daemon_config = TaskConfig {
            name: "timer",
            priority: TIMER_DAEMON_PRIORITY,
            stack_size: TIMER_DAEMON_STACK_SIZE,
            detached: true,
        };
        ctx.spawn(&daemon_config, timer_daemon, &[])?;

        log::info!(
            "kernel ready: {} byte pool, {} bytes free",
            ctx.pool.size(),
            ctx.pool.free_bytes()
        );
        Ok(ctx)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Create an application task with a stack taken from the pool.
    ///
    /// # Errors
    /// - [`KernelError::Range`] if the priority is above `MAX_TASK_PRIORITY`
    ///   (the lowest level belongs to the idle task).
    /// - [`KernelError::Invalid`] for a stack smaller than `MIN_STACK_SIZE`.
    /// - [`KernelError::NoMemory`] if no stack or task slot is available.
    pub fn create_task(
        &mut self,
        config: &TaskConfig,
        entry: TaskEntry,
        args: &'static [&'static str],
    ) -> KernelResult<TaskHandle> {
        if config.priority > MAX_TASK_PRIORITY {
            return Err(KernelError::Range);
        }
        self.spawn(config, entry, args)
    }

    fn spawn(
        &mut self,
        config: &TaskConfig,
        entry: TaskEntry,
        args: &'static [&'static str],
    ) -> KernelResult<TaskHandle> {
        if config.stack_size < MIN_STACK_SIZE {
            return Err(KernelError::Invalid);
        }
        let base = self.pool.malloc(config.stack_size).ok_or_else(|| {
            log::warn!(
                "no memory for a {} byte stack for '{}'",
                config.stack_size,
                config.name
            );
            KernelError::NoMemory
        })?;
        let size = self.pool.allocation_size(base)?;

        match self.sched.spawn(config, entry, args, StackRegion::new(base, size)) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.pool.free(base)?;
                Err(err)
            }
        }
    }

    /// Wait for `target` to terminate.
    ///
    /// Returns `Some(exit_code)` once the target has terminated (its stack
    /// is back in the pool), or `None` when the caller has been blocked;
    /// the caller must call `join` again after it resumes.
    pub fn join(&mut self, target: TaskHandle) -> KernelResult<Option<i32>> {
        match self.sched.join(target)? {
            JoinPoll::Done { exit_code, stack } => {
                if let Some(stack) = stack {
                    self.pool.free(stack.base())?;
                }
                Ok(Some(exit_code))
            }
            JoinPoll::Pending => Ok(None),
        }
    }

    /// Create a task from a registered application.
    pub fn app_spawn(
        &mut self,
        name: &str,
        args: &'static [&'static str],
        detached: bool,
    ) -> KernelResult<TaskHandle> {
        let app = *self.apps.lookup(name).ok_or(KernelError::Invalid)?;
        let config = TaskConfig {
            name: app.name,
            priority: app.priority,
            stack_size: app.stack_size,
            detached,
        };
        self.create_task(&config, app.entry, args)
    }

    // -----------------------------------------------------------------------
    // Port entry points
    // -----------------------------------------------------------------------

    /// Perform a context switch: store the outgoing task's saved context,
    /// pick the next task and return its context.
    ///
    /// A detached task that terminated is reaped here, once it is
    /// definitely off the CPU. Returns `None` only before the idle task
    /// exists.
    pub fn switch(&mut self, saved: Context) -> Option<Context> {
        if let Some(current) = self.sched.current() {
            self.sched.save_context(current, saved);
        }
        let switch = self.sched.schedule()?;
        if let Some(prev) = switch.prev {
            if prev != switch.next {
                self.reap_detached(prev);
            }
        }
        Some(self.sched.context(switch.next))
    }

    fn reap_detached(&mut self, idx: usize) {
        let task = &self.sched.tasks[idx];
        if !(task.detached && task.state == TaskState::Terminated) {
            return;
        }
        if let Some(stack) = self.sched.reap(idx) {
            if self.pool.free(stack.base()).is_err() {
                log::error!("task {}: stack not owned by the system pool", idx);
            }
        }
        log::debug!("detached task {} reaped", idx);
    }

    /// Advance time by one tick. Returns whether a switch is needed.
    pub fn tick(&mut self) -> bool {
        self.sched.tick()
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Arm a timer, waking the daemon if the timer is now the earliest.
    pub fn timer_start(
        &mut self,
        handle: TimerHandle,
        callback: TimerCallback,
        interval: u32,
        mode: TimerMode,
        private_data: usize,
    ) -> KernelResult<()> {
        let now = self.sched.tick_count;
        if self
            .timers
            .start(handle, callback, interval, mode, private_data, now)?
        {
            self.sems.give(self.timer_sem, &mut self.sched)?;
        }
        Ok(())
    }

    /// Next timer due at the current tick, re-armed if periodic.
    pub fn next_expired_timer(&mut self) -> Option<(TimerHandle, TimerCallback)> {
        self.timers.pop_expired(self.sched.tick_count)
    }

    /// Put the timer daemon to sleep until the earliest expiry or until a
    /// new earliest timer is started.
    ///
    /// Returns [`KernelError::Timeout`] without blocking when a timer is
    /// already due.
    pub fn timer_daemon_sleep(&mut self) -> KernelResult<TakePoll> {
        let timeout = match self.timers.next_expiry() {
            None => Timeout::Forever,
            Some(expiry) => {
                let now = self.sched.tick_count;
                if expiry <= now {
                    Timeout::NoWait
                } else {
                    Timeout::Ticks(u32::try_from(expiry - now).unwrap_or(u32::MAX))
                }
            }
        };
        self.sems.take(self.timer_sem, &mut self.sched, timeout)
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    pub fn fifo_request(&mut self, capacity: usize) -> KernelResult<Fifo<'a>> {
        Fifo::request(&mut self.pool, capacity)
    }

    pub fn fifo_release(&mut self, fifo: Fifo<'a>) -> KernelResult<()> {
        fifo.release(&mut self.pool)
    }

    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.pool.malloc(size);
        if ptr.is_none() {
            log::warn!("malloc: no memory for {} bytes", size);
        }
        ptr
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::App;
    use crate::config::{DEFAULT_STACK_SIZE, SYSTEM_POOL_SIZE};
    use crate::sem::finish_take;
    use crate::testing::{entry, leaked_arena};

    fn config(name: &'static str, priority: u8, detached: bool) -> TaskConfig {
        TaskConfig {
            name,
            priority,
            stack_size: DEFAULT_STACK_SIZE,
            detached,
        }
    }

    fn run_next(ctx: &mut KernelContext<'_>) -> usize {
        ctx.switch(Context::new()).unwrap();
        ctx.sched.current().unwrap()
    }

    /// Kernel after start-up: the timer daemon has run once and parked on
    /// its semaphore, and the idle task is on the CPU.
    fn booted() -> KernelContext<'static> {
        let mut ctx = KernelContext::new(leaked_arena(SYSTEM_POOL_SIZE), entry, entry).unwrap();
        let daemon = run_next(&mut ctx);
        assert_eq!(ctx.sched.tasks[daemon].priority, TIMER_DAEMON_PRIORITY);
        assert_eq!(ctx.timer_daemon_sleep(), Ok(TakePoll::Blocked));
        let idle = run_next(&mut ctx);
        assert_eq!(ctx.sched.tasks[idle].priority, IDLE_PRIORITY);
        ctx
    }

    #[test]
    fn test_parent_joins_two_children() {
        let mut ctx = booted();
        let free_at_boot = ctx.pool.free_bytes();

        let parent = ctx.create_task(&config("parent", 5, false), entry, &[]).unwrap();
        assert_eq!(run_next(&mut ctx), parent.id());

        let c1 = ctx.create_task(&config("child-1", 6, false), entry, &[]).unwrap();
        let c2 = ctx.create_task(&config("child-2", 7, false), entry, &[]).unwrap();
        assert!(!ctx.sched.needs_reschedule);

        assert_eq!(ctx.join(c1), Ok(None));
        assert_eq!(run_next(&mut ctx), c1.id());
        ctx.sched.exit_current(11).unwrap();
        assert_eq!(run_next(&mut ctx), parent.id());
        assert_eq!(ctx.join(c1), Ok(Some(11)));

        assert_eq!(ctx.join(c2), Ok(None));
        assert_eq!(run_next(&mut ctx), c2.id());
        ctx.sched.exit_current(22).unwrap();
        assert_eq!(run_next(&mut ctx), parent.id());
        assert_eq!(ctx.join(c2), Ok(Some(22)));

        // Only the parent's stack is still allocated.
        let parent_stack = ctx.sched.tasks[parent.id()].stack.unwrap().size();
        assert_eq!(ctx.pool.free_bytes(), free_at_boot - parent_stack);
    }

    #[test]
    fn test_join_after_child_already_exited() {
        let mut ctx = booted();
        let parent = ctx.create_task(&config("parent", 5, false), entry, &[]).unwrap();
        run_next(&mut ctx);

        let child = ctx.create_task(&config("child", 3, false), entry, &[]).unwrap();
        assert!(ctx.sched.needs_reschedule);
        assert_eq!(run_next(&mut ctx), child.id());
        ctx.sched.exit_current(-4).unwrap();
        assert_eq!(run_next(&mut ctx), parent.id());

        // Joinable tasks stay until joined.
        assert!(ctx.sched.tasks[child.id()].active);
        assert_eq!(ctx.join(child), Ok(Some(-4)));
        assert_eq!(ctx.join(child), Err(KernelError::Invalid));
    }

    #[test]
    fn test_detached_task_reaped_on_switch() {
        let mut ctx = booted();
        let free_at_boot = ctx.pool.free_bytes();

        let worker = ctx.create_task(&config("worker", 9, true), entry, &[]).unwrap();
        assert_eq!(run_next(&mut ctx), worker.id());
        ctx.sched.exit_current(0).unwrap();
        assert!(ctx.sched.tasks[worker.id()].active);

        run_next(&mut ctx);
        assert!(!ctx.sched.tasks[worker.id()].active);
        assert_eq!(ctx.pool.free_bytes(), free_at_boot);
        assert_eq!(ctx.sched.resolve(worker), Err(KernelError::Invalid));
    }

    #[test]
    fn test_create_task_errors() {
        let mut ctx = booted();
        let free_at_boot = ctx.pool.free_bytes();

        assert_eq!(
            ctx.create_task(&config("idle2", IDLE_PRIORITY, false), entry, &[]),
            Err(KernelError::Range)
        );

        let mut tiny = config("tiny", 5, false);
        tiny.stack_size = MIN_STACK_SIZE - 1;
        assert_eq!(ctx.create_task(&tiny, entry, &[]), Err(KernelError::Invalid));

        let mut huge = config("huge", 5, false);
        huge.stack_size = SYSTEM_POOL_SIZE;
        assert_eq!(ctx.create_task(&huge, entry, &[]), Err(KernelError::NoMemory));
        assert_eq!(ctx.pool.free_bytes(), free_at_boot);
    }

    #[test]
    fn test_slot_exhaustion_returns_stack() {
        let mut ctx = booted();
        let mut small = config("filler", 20, true);
        small.stack_size = MIN_STACK_SIZE;

        // Idle and the timer daemon hold two slots.
        for _ in 2..crate::config::MAX_TASKS {
            ctx.create_task(&small, entry, &[]).unwrap();
        }
        let before = ctx.pool.free_bytes();
        assert_eq!(ctx.create_task(&small, entry, &[]), Err(KernelError::NoMemory));
        assert_eq!(ctx.pool.free_bytes(), before);
    }

    #[test]
    fn test_timer_fires_on_expiry_tick() {
        fn callback(_timer: TimerHandle) {}

        let mut ctx = booted();
        let timer = ctx.timers.request().unwrap();
        ctx.timer_start(timer, callback, 3, TimerMode::OneShot, 7).unwrap();

        // The new earliest timer wakes the daemon.
        assert!(ctx.sched.needs_reschedule);
        let daemon = run_next(&mut ctx);
        assert_eq!(finish_take(&ctx.sched), Ok(()));
        assert!(ctx.next_expired_timer().is_none());
        assert_eq!(ctx.timer_daemon_sleep(), Ok(TakePoll::Blocked));
        run_next(&mut ctx);

        assert!(!ctx.tick());
        assert!(!ctx.tick());
        assert!(ctx.tick());
        assert_eq!(run_next(&mut ctx), daemon);
        let (fired, _) = ctx.next_expired_timer().unwrap();
        assert_eq!(fired, timer);
        assert_eq!(ctx.timers.private_data(fired), Ok(7));
        assert!(ctx.next_expired_timer().is_none());

        // Nothing armed: sleep until woken.
        assert_eq!(ctx.timer_daemon_sleep(), Ok(TakePoll::Blocked));
        assert_eq!(ctx.sched.tasks[daemon].timeout, None);
    }

    #[test]
    fn test_daemon_does_not_sleep_past_due_timer() {
        fn callback(_timer: TimerHandle) {}

        let mut ctx = booted();
        let timer = ctx.timers.request().unwrap();
        ctx.timer_start(timer, callback, 1, TimerMode::Periodic, 0).unwrap();
        run_next(&mut ctx);
        ctx.tick();
        assert_eq!(ctx.timer_daemon_sleep(), Err(KernelError::Timeout));
        assert!(ctx.next_expired_timer().is_some());
        assert_eq!(ctx.timers.next_expiry(), Some(2));
    }

    #[test]
    fn test_app_spawn() {
        let mut ctx = booted();
        ctx.apps.register(App::new("blink", entry, 8)).unwrap();

        let task = ctx.app_spawn("blink", &["fast"], false).unwrap();
        let tcb = &ctx.sched.tasks[task.id()];
        assert_eq!(tcb.name, "blink");
        assert_eq!(tcb.priority, 8);
        assert_eq!(tcb.args, &["fast"]);
        assert_eq!(
            ctx.app_spawn("missing", &[], false),
            Err(KernelError::Invalid)
        );
    }

    #[test]
    fn test_fifo_from_system_pool() {
        let mut ctx = booted();
        let before = ctx.pool.free_bytes();
        let fifo = ctx.fifo_request(100).unwrap();
        assert_eq!(fifo.put(b"hello"), 5);
        assert_eq!(ctx.pool.free_bytes(), before - 112);
        ctx.fifo_release(fifo).unwrap();
        assert_eq!(ctx.pool.free_bytes(), before);
    }
}
