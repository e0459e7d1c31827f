//! # Software Timer
//!
//! Tick-driven deferred callbacks. Armed timers sit in a single queue sorted
//! by absolute expiry tick (ties in arming order). The timer daemon task
//! pops expired timers with [`TimerTable::pop_expired`] and runs their
//! callbacks in task context, never from the tick interrupt.
//!
//! A periodic timer is re-armed at `previous expiry + period`, not at
//! `now + period`, so a late daemon does not accumulate drift: the Nth
//! expiry is always `start tick + N * period`.

use crate::config::MAX_TIMERS;
use crate::error::{KernelError, KernelResult};
use crate::list::{Link, Linked, List};

/// Callback run by the timer daemon. It receives the handle of the timer
/// that fired; private data is read back through the handle.
pub type TimerCallback = fn(TimerHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once, then stay stopped.
    OneShot,
    /// Fire every `interval` ticks until stopped.
    Periodic,
}

/// Handle to a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    slot: u8,
    generation: u16,
}

impl TimerHandle {
    #[inline]
    pub fn id(&self) -> usize {
        self.slot as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Free,
    /// Requested but never started.
    Idle,
    /// Started at least once, not queued now.
    Stopped,
    /// Queued for expiry.
    Armed,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    state: TimerState,
    generation: u16,
    /// Absolute tick of the next expiry.
    expiry: u64,
    /// Re-arm interval, `0` for one-shot timers.
    period: u32,
    callback: Option<TimerCallback>,
    private_data: usize,
    link: Link,
}

impl Timer {
    const EMPTY: Self = Self {
        state: TimerState::Free,
        generation: 0,
        expiry: 0,
        period: 0,
        callback: None,
        private_data: 0,
        link: Link::new(),
    };
}

impl Linked for Timer {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

/// All timers plus the expiry-ordered queue of armed ones.
pub struct TimerTable {
    timers: [Timer; MAX_TIMERS],
    queue: List,
}

impl TimerTable {
    pub const fn new() -> Self {
        Self {
            timers: [Timer::EMPTY; MAX_TIMERS],
            queue: List::new(),
        }
    }

    /// Allocate a stopped timer.
    pub fn request(&mut self) -> KernelResult<TimerHandle> {
        let slot = self
            .timers
            .iter()
            .position(|t| t.state == TimerState::Free)
            .ok_or(KernelError::NoMemory)?;
        let generation = self.timers[slot].generation.wrapping_add(1);
        self.timers[slot] = Timer {
            state: TimerState::Idle,
            generation,
            ..Timer::EMPTY
        };
        Ok(TimerHandle {
            slot: slot as u8,
            generation,
        })
    }

    pub fn set_private_data(&mut self, handle: TimerHandle, data: usize) -> KernelResult<()> {
        let slot = self.resolve(handle)?;
        self.timers[slot].private_data = data;
        Ok(())
    }

    pub fn private_data(&self, handle: TimerHandle) -> KernelResult<usize> {
        Ok(self.timers[self.resolve(handle)?].private_data)
    }

    /// Arm `handle` to fire `interval` ticks after `now`. An armed timer is
    /// re-armed from scratch.
    ///
    /// Returns `true` when the timer became the earliest in the queue, in
    /// which case the daemon's sleep must be cut short.
    ///
    /// # Errors
    /// [`KernelError::Invalid`] for a zero interval or a stale handle.
    pub fn start(
        &mut self,
        handle: TimerHandle,
        callback: TimerCallback,
        interval: u32,
        mode: TimerMode,
        private_data: usize,
        now: u64,
    ) -> KernelResult<bool> {
        let slot = self.resolve(handle)?;
        if interval == 0 {
            return Err(KernelError::Invalid);
        }
        if self.timers[slot].state == TimerState::Armed {
            self.queue.remove(&mut self.timers, slot as u16);
        }

        let timer = &mut self.timers[slot];
        timer.callback = Some(callback);
        timer.private_data = private_data;
        timer.period = match mode {
            TimerMode::OneShot => 0,
            TimerMode::Periodic => interval,
        };
        timer.expiry = now + interval as u64;
        self.arm(slot);
        Ok(self.queue.head() == Some(slot as u16))
    }

    /// Disarm a timer.
    ///
    /// # Errors
    /// [`KernelError::Access`] if the timer was never started. Stopping a
    /// one-shot timer that already fired is not an error.
    pub fn stop(&mut self, handle: TimerHandle) -> KernelResult<()> {
        let slot = self.resolve(handle)?;
        match self.timers[slot].state {
            TimerState::Idle => Err(KernelError::Access),
            TimerState::Armed => {
                self.queue.remove(&mut self.timers, slot as u16);
                self.timers[slot].state = TimerState::Stopped;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Disarm if needed and free the slot.
    pub fn release(&mut self, handle: TimerHandle) -> KernelResult<()> {
        let slot = self.resolve(handle)?;
        if self.timers[slot].state == TimerState::Armed {
            self.queue.remove(&mut self.timers, slot as u16);
        }
        self.timers[slot].state = TimerState::Free;
        self.timers[slot].callback = None;
        Ok(())
    }

    pub fn is_armed(&self, handle: TimerHandle) -> KernelResult<bool> {
        Ok(self.timers[self.resolve(handle)?].state == TimerState::Armed)
    }

    /// Expiry tick of the earliest armed timer.
    pub fn next_expiry(&self) -> Option<u64> {
        self.queue.head().map(|h| self.timers[h as usize].expiry)
    }

    /// Dequeue the earliest timer if it has expired at `now`, re-arming it
    /// when periodic. Call repeatedly until `None` to drain every expiry.
    pub fn pop_expired(&mut self, now: u64) -> Option<(TimerHandle, TimerCallback)> {
        let head = self.queue.head()? as usize;
        if self.timers[head].expiry > now {
            return None;
        }
        self.queue.remove(&mut self.timers, head as u16);

        let timer = &mut self.timers[head];
        let handle = TimerHandle {
            slot: head as u8,
            generation: timer.generation,
        };
        let callback = timer.callback;
        if timer.period > 0 {
            timer.expiry += timer.period as u64;
            self.arm(head);
        } else {
            timer.state = TimerState::Stopped;
        }
        callback.map(|cb| (handle, cb))
    }

    fn arm(&mut self, slot: usize) {
        self.timers[slot].state = TimerState::Armed;
        self.queue
            .insert_sorted_by(&mut self.timers, slot as u16, |new, cur| {
                new.expiry < cur.expiry
            });
    }

    fn resolve(&self, handle: TimerHandle) -> KernelResult<usize> {
        let slot = handle.slot as usize;
        match self.timers.get(slot) {
            Some(t) if t.state != TimerState::Free && t.generation == handle.generation => Ok(slot),
            _ => Err(KernelError::Invalid),
        }
    }
}

impl Default for TimerTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
