//! # PLOS Demo Firmware
//!
//! Exercises the kernel API on an STM32F4 board:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `console` | 20 | Drains the console FIFO to ITM stimulus port 0 |
//! | `parent` | 10 | Spawns two children, joins both, logs their exit codes |
//! | `child-1` / `child-2` | 9 / 8 | Sleep, then return an exit code |
//! | `worker` | 12 | Waits on a semaphore given by a periodic timer |
//! | `top` (app) | 15 | Lists the apps, then logs CPU usage, free pool memory and switch count once a second |
//!
//! All log output goes through the `log` facade into the console FIFO, so
//! interrupt handlers and tasks never wait on the debug port.

#![no_std]
#![no_main]

use cortex_m::peripheral::ITM;
use cortex_m_rt::entry;
use panic_halt as _;
use spin::{Mutex, Once};

use plos::apps::App;
use plos::config::{SYSTEM_POOL_SIZE, TICK_HZ};
use plos::fifo::Fifo;
use plos::sem::{SemHandle, Timeout};
use plos::task::TaskConfig;
use plos::timer::{TimerHandle, TimerMode};
use plos::{kernel, logger};

const CONSOLE_FIFO_SIZE: usize = 1024;

static CONSOLE: Once<Fifo<'static>> = Once::new();
static ITM_PORT: Once<Mutex<ITM>> = Once::new();
static TICK_SEM: Once<SemHandle> = Once::new();
static HEARTBEAT: Once<TimerHandle> = Once::new();

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Log sink: queue the line for the console task, dropping what does not fit.
fn console_sink(line: &[u8]) {
    if let Some(fifo) = CONSOLE.get() {
        fifo.put(line);
    }
}

fn console_task(_args: &[&'static str]) -> i32 {
    let mut buf = [0u8; 64];
    loop {
        if let (Some(fifo), Some(itm)) = (CONSOLE.get(), ITM_PORT.get()) {
            loop {
                let n = fifo.get(&mut buf);
                if n == 0 {
                    break;
                }
                cortex_m::itm::write_all(&mut itm.lock().stim[0], &buf[..n]);
            }
        }
        let _ = kernel::delay(10);
    }
}

// ---------------------------------------------------------------------------
// Join demo
// ---------------------------------------------------------------------------

fn child_task(args: &[&'static str]) -> i32 {
    let naps = args.first().and_then(|s| s.parse::<u32>().ok()).unwrap_or(1);
    for _ in 0..naps {
        let _ = kernel::delay(100);
    }
    naps as i32
}

fn parent_task(_args: &[&'static str]) -> i32 {
    let child = |name, priority| TaskConfig {
        name,
        priority,
        stack_size: 512,
        detached: false,
    };
    let first = kernel::task_create(&child("child-1", 9), child_task, &["3"]);
    let second = kernel::task_create(&child("child-2", 8), child_task, &["5"]);

    for task in [first, second] {
        match task.and_then(kernel::join) {
            Ok(code) => log::info!("child exited with {}", code),
            Err(err) => log::error!("join failed: {}", err),
        }
    }
    0
}

// ---------------------------------------------------------------------------
// Timer + semaphore demo
// ---------------------------------------------------------------------------

fn heartbeat(_timer: TimerHandle) {
    if let Some(sem) = TICK_SEM.get() {
        let _ = kernel::sem_give(*sem);
    }
}

fn worker_task(_args: &[&'static str]) -> i32 {
    let Some(sem) = TICK_SEM.get().copied() else {
        return -1;
    };
    let mut beats: u32 = 0;
    loop {
        match kernel::sem_take(sem, Timeout::Ticks(2 * TICK_HZ)) {
            Ok(()) => {
                beats += 1;
                log::debug!("heartbeat {}", beats);
            }
            Err(err) => log::warn!("heartbeat missed: {}", err),
        }
    }
}

// ---------------------------------------------------------------------------
// Registered application
// ---------------------------------------------------------------------------

fn top_app(_args: &[&'static str]) -> i32 {
    kernel::app_for_each(|app| log::info!("app '{}' priority {}", app.name, app.priority));
    loop {
        let (int, frac) = kernel::cpu_rate();
        log::info!(
            "cpu {}.{:02}% pool free {} bytes, {} switches",
            int,
            frac,
            kernel::free_bytes(),
            kernel::context_switches()
        );
        if let Some(timer) = HEARTBEAT.get() {
            if !kernel::timer_is_armed(*timer).unwrap_or(false) {
                log::warn!("heartbeat timer {} is not armed", timer.id());
            }
        }
        let _ = kernel::delay(TICK_HZ);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    let arena = cortex_m::singleton!(: [u8; SYSTEM_POOL_SIZE] = [0; SYSTEM_POOL_SIZE]).unwrap();

    ITM_PORT.call_once(|| Mutex::new(cp.ITM));
    logger::init(log::LevelFilter::Info, console_sink).unwrap();
    kernel::init(arena).expect("kernel init failed");
    CONSOLE.call_once(|| kernel::fifo_request(CONSOLE_FIFO_SIZE).expect("console fifo"));

    let sem = kernel::sem_create(0).expect("semaphore");
    TICK_SEM.call_once(|| sem);
    let timer = kernel::timer_request().expect("timer");
    kernel::timer_start(timer, heartbeat, 500, TimerMode::Periodic, 0).expect("timer start");
    HEARTBEAT.call_once(|| timer);

    let task = |name, priority| TaskConfig {
        name,
        priority,
        stack_size: 1024,
        detached: true,
    };
    kernel::task_create(&task("console", 20), console_task, &[]).expect("console task");
    kernel::task_create(&task("worker", 12), worker_task, &[]).expect("worker task");
    kernel::task_create(&task("parent", 10), parent_task, &[]).expect("parent task");

    kernel::app_register(App::new("top", top_app, 15)).expect("register top");
    kernel::app_spawn("top", &[], true).expect("spawn top");

    kernel::start(cp.SYST, cp.SCB)
}
