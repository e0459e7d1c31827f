//! Host test bench: a scheduler plus helpers that play the part of the
//! port layer (performing the switches a PendSV would perform).

extern crate std;

use core::ptr::NonNull;

use crate::config::IDLE_PRIORITY;
use crate::scheduler::Scheduler;
use crate::task::{StackRegion, TaskConfig, TaskHandle};

pub fn entry(_args: &[&'static str]) -> i32 {
    0
}

/// A leaked, never-freed stack for scheduler-only tests.
pub fn leaked_stack(size: usize) -> StackRegion {
    let buf: &'static mut [u8] = std::vec![0u8; size].leak();
    StackRegion::new(NonNull::new(buf.as_mut_ptr()).unwrap(), size)
}

/// A leaked arena for a pool or a whole kernel context.
pub fn leaked_arena(size: usize) -> &'static mut [u8] {
    std::vec![0u8; size].leak()
}

pub struct Harness {
    pub sched: Scheduler,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            sched: Scheduler::new(),
        }
    }

    pub fn with_idle() -> (Self, TaskHandle) {
        let mut h = Self::new();
        let idle = h.spawn("idle", IDLE_PRIORITY);
        h.sched.set_idle(idle).unwrap();
        (h, idle)
    }

    pub fn spawn_with(&mut self, name: &'static str, priority: u8, detached: bool) -> TaskHandle {
        let config = TaskConfig {
            name,
            priority,
            stack_size: 128,
            detached,
        };
        self.sched
            .spawn(&config, entry, &[], leaked_stack(128))
            .unwrap()
    }

    pub fn spawn(&mut self, name: &'static str, priority: u8) -> TaskHandle {
        self.spawn_with(name, priority, false)
    }

    /// Perform the pending scheduling decision; returns the task now running.
    pub fn run_next(&mut self) -> usize {
        self.sched.schedule().unwrap().next
    }
}
