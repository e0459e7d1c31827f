//! # Kernel
//!
//! Global kernel instance and the public task-facing API of PLOS.
//!
//! The whole kernel state is one [`KernelContext`] stored in a
//! critical-section mutex. Every call below enters a critical section,
//! operates on the context and leaves; if the operation changed the
//! highest ready task, a context switch is requested on the way out. On
//! the Cortex-M4 the pended switch is taken as soon as the section ends,
//! so a call that blocked the caller (delay, join, semaphore take) only
//! returns once the task has been woken again.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► logger::init()        ← route log records to a byte sink
//!         ├─► kernel::init(arena)   ← pool, idle task, timer daemon
//!         ├─► kernel::task_create() ← application tasks (×N)
//!         └─► kernel::start()       ← SysTick + PendSV, first switch (no return)
//! ```
//!
//! ## Interrupt entry points
//!
//! [`tick`] is called by the SysTick handler and [`switch_context`] by the
//! PendSV handler. Both run at the lowest exception priority, so neither
//! ever interrupts the other or a task that is inside the kernel.

use core::cell::RefCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::apps::App;
use crate::arch::{port, Context};
use crate::context::KernelContext;
use crate::error::{KernelError, KernelResult};
use crate::fifo::Fifo;
use crate::sem::{self, SemHandle, TakePoll, Timeout};
use crate::sync::{self, Mutex};
use crate::task::{TaskConfig, TaskEntry, TaskHandle, TaskInfo};
use crate::timer::{TimerCallback, TimerHandle, TimerMode};

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

static KERNEL: Mutex<RefCell<Option<KernelContext<'static>>>> = Mutex::new(RefCell::new(None));

/// Tick counter readable without entering the kernel (log timestamps).
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Run `f` on the kernel context inside a critical section, then request a
/// context switch if one became necessary.
///
/// # Errors
/// [`KernelError::Access`] if the kernel is not initialized or is already
/// borrowed further up the call stack.
fn with_kernel<R, F>(f: F) -> KernelResult<R>
where
    F: FnOnce(&mut KernelContext<'static>) -> KernelResult<R>,
{
    let (result, reschedule) = sync::critical_section(|cs| {
        let mut slot = KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .map_err(|_| KernelError::Access)?;
        let kernel = slot.as_mut().ok_or(KernelError::Access)?;
        let result = f(kernel);
        let reschedule = kernel.sched.needs_reschedule && kernel.sched.current().is_some();
        Ok::<_, KernelError>((result, reschedule))
    })?;
    if reschedule {
        port::request_switch();
    }
    result
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Initialize the kernel over `arena`, the memory backing task stacks,
/// FIFOs and [`malloc`].
///
/// Creates the idle task and the timer daemon. Must be called once, before
/// any other kernel function.
///
/// # Errors
/// [`KernelError::Access`] if the kernel is already initialized, or the
/// pool and task errors of [`KernelContext::new`].
pub fn init(arena: &'static mut [u8]) -> KernelResult<()> {
    sync::critical_section(|cs| {
        let mut slot = KERNEL
            .borrow(cs)
            .try_borrow_mut()
            .map_err(|_| KernelError::Access)?;
        if slot.is_some() {
            return Err(KernelError::Access);
        }
        *slot = Some(KernelContext::new(arena, idle_task, timer_daemon)?);
        Ok(())
    })
}

/// Start scheduling. **Does not return.**
///
/// Configures SysTick at `TICK_HZ`, drops SysTick and PendSV to the lowest
/// priority and pends the first context switch. The calling thread becomes
/// unreachable once the first task is running.
///
/// Takes the two core peripherals the kernel owns from then on; the rest
/// of `cortex_m::Peripherals` stays with the application.
#[cfg(target_arch = "arm")]
pub fn start(mut syst: cortex_m::peripheral::SYST, mut scb: cortex_m::peripheral::SCB) -> ! {
    port::configure_systick(&mut syst);
    port::set_interrupt_priorities(&mut scb);
    log::info!("scheduler started");
    port::start_first_task()
}

// ---------------------------------------------------------------------------
// Port entry points
// ---------------------------------------------------------------------------

/// Advance kernel time by one tick. Called from the SysTick handler.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let _ = with_kernel(|k| Ok(k.tick()));
}

/// Save the outgoing stack pointer and return the incoming one. Called
/// from the PendSV handler; `sp` is zero before the first task runs.
pub fn switch_context(sp: usize) -> usize {
    sync::critical_section(|cs| {
        let Ok(mut slot) = KERNEL.borrow(cs).try_borrow_mut() else {
            return sp;
        };
        slot.as_mut()
            .and_then(|k| k.switch(Context { sp }))
            .map_or(sp, |next| next.sp)
    })
}

/// First code run by every task: call its entry with its arguments, then
/// exit with the returned code.
pub extern "C" fn run_task(slot: usize) -> ! {
    let start = with_kernel(|k| {
        let task = k.sched.tasks.get(slot).ok_or(KernelError::Invalid)?;
        let entry = task.entry.ok_or(KernelError::Invalid)?;
        Ok((entry, task.args))
    });
    crate::kernel_assert!(start.is_ok(), "slot {} started without an entry", slot);
    let code = match start {
        Ok((entry, args)) => entry(args),
        Err(err) => err.errno(),
    };
    exit(code)
}

/// Ticks since start, wrapping. Safe to call from anywhere, including
/// while the kernel is busy.
#[inline]
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Create a task running `entry(args)`. It preempts the caller at once if
/// its priority is higher.
pub fn task_create(
    config: &TaskConfig,
    entry: TaskEntry,
    args: &'static [&'static str],
) -> KernelResult<TaskHandle> {
    with_kernel(|k| k.create_task(config, entry, args))
}

/// Wait for `task` to terminate and return its exit code. The task's
/// resources are released before this returns.
pub fn join(task: TaskHandle) -> KernelResult<i32> {
    loop {
        if let Some(code) = with_kernel(|k| k.join(task))? {
            return Ok(code);
        }
    }
}

/// Sleep for `ticks` ticks. Zero yields.
pub fn delay(ticks: u32) -> KernelResult<()> {
    with_kernel(|k| k.sched.delay_current(ticks))
}

/// Give the CPU to the next ready task of the same priority.
pub fn yield_now() {
    let _ = with_kernel(|k| {
        k.sched.yield_current();
        Ok(())
    });
}

/// Terminate the calling task with `code`, as if its entry had returned.
pub fn exit(code: i32) -> ! {
    let _ = with_kernel(|k| k.sched.exit_current(code));
    loop {
        port::wait_for_interrupt();
    }
}

/// Block the calling task for good.
pub fn pend() -> ! {
    let _ = with_kernel(|k| k.sched.pend_current());
    loop {
        port::wait_for_interrupt();
    }
}

/// Handle of the calling task.
pub fn current() -> Option<TaskHandle> {
    with_kernel(|k| Ok(k.sched.current_tcb().map(|t| t.handle())))
        .ok()
        .flatten()
}

pub fn task_info(task: TaskHandle) -> KernelResult<TaskInfo> {
    with_kernel(|k| {
        let idx = k.sched.resolve(task)?;
        Ok(k.sched.tasks[idx].info())
    })
}

/// CPU usage over the last measurement window as `(percent, hundredths)`.
pub fn cpu_rate() -> (u32, u32) {
    with_kernel(|k| Ok(k.sched.cpu_rate())).unwrap_or((0, 0))
}

/// Context switches performed since start, wrapping.
pub fn context_switches() -> u32 {
    with_kernel(|k| Ok(k.sched.context_switches)).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

pub fn app_register(app: App) -> KernelResult<()> {
    with_kernel(|k| k.apps.register(app))
}

/// Start the registered application `name` with `args`.
pub fn app_spawn(
    name: &str,
    args: &'static [&'static str],
    detached: bool,
) -> KernelResult<TaskHandle> {
    with_kernel(|k| k.app_spawn(name, args, detached))
}

/// Call `f` on every registered application, in registration order.
///
/// Runs with the kernel locked, so `f` must not call back into the kernel.
pub fn app_for_each<F: FnMut(&App)>(mut f: F) {
    let _ = with_kernel(|k| {
        k.apps.iter().for_each(&mut f);
        Ok(())
    });
}

// ---------------------------------------------------------------------------
// Semaphores
// ---------------------------------------------------------------------------

pub fn sem_create(initial: u32) -> KernelResult<SemHandle> {
    with_kernel(|k| k.sems.create(initial))
}

pub fn sem_delete(handle: SemHandle) -> KernelResult<()> {
    with_kernel(|k| k.sems.delete(handle, &k.sched))
}

pub fn sem_count(handle: SemHandle) -> KernelResult<u32> {
    with_kernel(|k| k.sems.count(handle))
}

/// Take a unit, blocking according to `timeout`.
pub fn sem_take(handle: SemHandle, timeout: Timeout) -> KernelResult<()> {
    match with_kernel(|k| k.sems.take(handle, &mut k.sched, timeout))? {
        TakePoll::Taken => Ok(()),
        TakePoll::Blocked => with_kernel(|k| sem::finish_take(&k.sched)),
    }
}

/// Give a unit. Callable from interrupt handlers.
pub fn sem_give(handle: SemHandle) -> KernelResult<()> {
    with_kernel(|k| k.sems.give(handle, &mut k.sched))
}

// ---------------------------------------------------------------------------
// Software timers
// ---------------------------------------------------------------------------

pub fn timer_request() -> KernelResult<TimerHandle> {
    with_kernel(|k| k.timers.request())
}

pub fn timer_start(
    handle: TimerHandle,
    callback: TimerCallback,
    interval: u32,
    mode: TimerMode,
    private_data: usize,
) -> KernelResult<()> {
    with_kernel(|k| k.timer_start(handle, callback, interval, mode, private_data))
}

pub fn timer_stop(handle: TimerHandle) -> KernelResult<()> {
    with_kernel(|k| k.timers.stop(handle))
}

/// Whether the timer is waiting to expire.
pub fn timer_is_armed(handle: TimerHandle) -> KernelResult<bool> {
    with_kernel(|k| k.timers.is_armed(handle))
}

pub fn timer_release(handle: TimerHandle) -> KernelResult<()> {
    with_kernel(|k| k.timers.release(handle))
}

pub fn timer_set_private_data(handle: TimerHandle, data: usize) -> KernelResult<()> {
    with_kernel(|k| k.timers.set_private_data(handle, data))
}

pub fn timer_private_data(handle: TimerHandle) -> KernelResult<usize> {
    with_kernel(|k| k.timers.private_data(handle))
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

pub fn fifo_request(capacity: usize) -> KernelResult<Fifo<'static>> {
    with_kernel(|k| k.fifo_request(capacity))
}

pub fn fifo_release(fifo: Fifo<'static>) -> KernelResult<()> {
    with_kernel(|k| k.fifo_release(fifo))
}

/// Allocate `size` bytes from the system pool.
pub fn malloc(size: usize) -> Option<NonNull<u8>> {
    with_kernel(|k| Ok(k.malloc(size))).ok().flatten()
}

pub fn free(ptr: NonNull<u8>) -> KernelResult<()> {
    with_kernel(|k| k.pool.free(ptr))
}

/// Free bytes left in the system pool.
pub fn free_bytes() -> usize {
    with_kernel(|k| Ok(k.pool.free_bytes())).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Kernel tasks
// ---------------------------------------------------------------------------

fn idle_task(_args: &[&'static str]) -> i32 {
    loop {
        port::wait_for_interrupt();
    }
}

/// Runs expired timer callbacks, then sleeps until the next expiry or
/// until a timer is started ahead of the current earliest one.
fn timer_daemon(_args: &[&'static str]) -> i32 {
    log::info!("timer daemon started");
    loop {
        while let Ok(Some((timer, callback))) = with_kernel(|k| Ok(k.next_expired_timer())) {
            callback(timer);
        }
        // Err(Timeout) means a timer is already due: loop straight back.
        let _ = with_kernel(|k| k.timer_daemon_sleep());
    }
}
