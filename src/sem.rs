//! # Semaphore
//!
//! Counting semaphores built on the scheduler's block/wake primitives.
//! Semaphores live in a kernel-owned table; the wait queue of semaphore
//! slot `n` is the scheduler's wait queue `n`, so a task is linked into a
//! semaphore's wait list exactly while it is blocked on it.
//!
//! `give` hands a unit straight to the first waiter (highest priority,
//! longest waiting among equals) instead of incrementing the count, so no
//! third task can take the unit between the increment and the wake-up.
//! The count is only incremented when nobody waits.

use crate::config::MAX_SEMAPHORES;
use crate::error::{KernelError, KernelResult};
use crate::scheduler::Scheduler;
use crate::task::{WaitReason, WakeReason};

/// How long `take` may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail with [`KernelError::Timeout`] at once if no unit is available.
    NoWait,
    /// Block for at most this many ticks.
    Ticks(u32),
    /// Block until a unit is given.
    Forever,
}

/// Handle to a semaphore slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemHandle {
    slot: u8,
    generation: u16,
}

/// Outcome of a take attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakePoll {
    /// A unit was available and has been consumed.
    Taken,
    /// The caller is blocked; after it resumes, [`finish_take`] tells
    /// whether it received a unit or timed out.
    Blocked,
}

#[derive(Debug, Clone, Copy)]
struct Semaphore {
    count: u32,
    generation: u16,
    active: bool,
}

impl Semaphore {
    const EMPTY: Self = Self {
        count: 0,
        generation: 0,
        active: false,
    };
}

/// Table of all semaphores.
pub struct SemaphoreTable {
    sems: [Semaphore; MAX_SEMAPHORES],
}

impl SemaphoreTable {
    pub const fn new() -> Self {
        Self {
            sems: [Semaphore::EMPTY; MAX_SEMAPHORES],
        }
    }

    /// Allocate a semaphore with `initial` units.
    pub fn create(&mut self, initial: u32) -> KernelResult<SemHandle> {
        let slot = self
            .sems
            .iter()
            .position(|s| !s.active)
            .ok_or(KernelError::NoMemory)?;
        let sem = &mut self.sems[slot];
        sem.generation = sem.generation.wrapping_add(1);
        sem.count = initial;
        sem.active = true;
        Ok(SemHandle {
            slot: slot as u8,
            generation: sem.generation,
        })
    }

    /// Free a semaphore nobody is waiting on.
    pub fn delete(&mut self, handle: SemHandle, sched: &Scheduler) -> KernelResult<()> {
        let slot = self.resolve(handle)?;
        if sched.waiters(slot as u8) > 0 {
            return Err(KernelError::Access);
        }
        self.sems[slot].active = false;
        Ok(())
    }

    /// Units currently available.
    pub fn count(&self, handle: SemHandle) -> KernelResult<u32> {
        Ok(self.sems[self.resolve(handle)?].count)
    }

    /// Take a unit, or block the running task according to `timeout`.
    pub fn take(
        &mut self,
        handle: SemHandle,
        sched: &mut Scheduler,
        timeout: Timeout,
    ) -> KernelResult<TakePoll> {
        let slot = self.resolve(handle)?;
        let sem = &mut self.sems[slot];
        if sem.count > 0 {
            sem.count -= 1;
            return Ok(TakePoll::Taken);
        }

        let ticks = match timeout {
            Timeout::NoWait | Timeout::Ticks(0) => return Err(KernelError::Timeout),
            Timeout::Ticks(n) => Some(n),
            Timeout::Forever => None,
        };
        sched.block_current(WaitReason::Semaphore(slot as u8), ticks)?;
        Ok(TakePoll::Blocked)
    }

    /// Give a unit: wake the first waiter, or increment the count.
    ///
    /// # Errors
    /// [`KernelError::Range`] if the count would overflow.
    pub fn give(&mut self, handle: SemHandle, sched: &mut Scheduler) -> KernelResult<()> {
        let slot = self.resolve(handle)?;
        if sched.wake_one(slot as u8).is_none() {
            let sem = &mut self.sems[slot];
            sem.count = sem.count.checked_add(1).ok_or(KernelError::Range)?;
        }
        Ok(())
    }

    fn resolve(&self, handle: SemHandle) -> KernelResult<usize> {
        let slot = handle.slot as usize;
        match self.sems.get(slot) {
            Some(s) if s.active && s.generation == handle.generation => Ok(slot),
            _ => Err(KernelError::Invalid),
        }
    }
}

impl Default for SemaphoreTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a blocked take, read once the task runs again.
pub fn finish_take(sched: &Scheduler) -> KernelResult<()> {
    match sched.current_wake_reason() {
        Some(WakeReason::Signaled) => Ok(()),
        Some(WakeReason::Timeout) => Err(KernelError::Timeout),
        None => Err(KernelError::Access),
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
