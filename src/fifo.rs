//! # Kernel FIFO
//!
//! Fixed-capacity byte ring buffer whose storage is carved from a memory
//! pool. `put` and `get` take `&self` and run entirely inside a critical
//! section, so one side can live in an interrupt handler (UART receive)
//! while the other runs in a task. The FIFO only guarantees index
//! consistency; keeping to a single producer and a single consumer is up
//! to the caller.
//!
//! Neither side ever blocks: `put` writes as much as fits and `get` reads
//! as much as is buffered, each returning the byte count transferred.

use core::cell::Cell;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::error::{KernelError, KernelResult};
use crate::pool::Pool;
use crate::sync::{self, Mutex};

#[derive(Debug, Clone, Copy, Default)]
struct Indices {
    /// Next byte to read.
    head: usize,
    /// Next byte to write.
    tail: usize,
    /// Bytes held, `0..=capacity`.
    count: usize,
}

/// A byte FIFO backed by pool storage.
pub struct Fifo<'a> {
    storage: NonNull<u8>,
    capacity: usize,
    indices: Mutex<Cell<Indices>>,
    _pool: PhantomData<&'a mut [u8]>,
}

// SAFETY: the storage is exclusively owned by this FIFO and every access to
// it happens inside a critical section, which serializes tasks and ISRs on
// the single core.
unsafe impl Send for Fifo<'_> {}
// SAFETY: see above; `put` and `get` never touch the storage outside a
// critical section.
unsafe impl Sync for Fifo<'_> {}

impl<'a> Fifo<'a> {
    /// Allocate a FIFO of `capacity` bytes from `pool`.
    ///
    /// # Errors
    /// - [`KernelError::Invalid`] for a zero capacity.
    /// - [`KernelError::NoMemory`] if the pool cannot supply the storage.
    pub fn request(pool: &mut Pool<'a>, capacity: usize) -> KernelResult<Self> {
        if capacity == 0 {
            return Err(KernelError::Invalid);
        }
        let storage = pool.malloc(capacity).ok_or_else(|| {
            log::warn!("fifo: no memory for {} bytes", capacity);
            KernelError::NoMemory
        })?;
        Ok(Self {
            storage,
            capacity,
            indices: Mutex::new(Cell::new(Indices::default())),
            _pool: PhantomData,
        })
    }

    /// Return the storage to `pool`. The pool must be the one the FIFO was
    /// requested from.
    pub fn release(self, pool: &mut Pool<'a>) -> KernelResult<()> {
        pool.free(self.storage)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        sync::critical_section(|cs| self.indices.borrow(cs).get().count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can be written before the FIFO is full.
    pub fn free_space(&self) -> usize {
        self.capacity - self.len()
    }

    /// Copy up to `data.len()` bytes in; returns the number written.
    pub fn put(&self, data: &[u8]) -> usize {
        sync::critical_section(|cs| {
            let cell = self.indices.borrow(cs);
            let mut idx = cell.get();
            let n = data.len().min(self.capacity - idx.count);

            // At most two contiguous segments: up to the end, then from 0.
            let first = n.min(self.capacity - idx.tail);
            // SAFETY: `tail + first <= capacity` and `n - first <= head`,
            // so both copies stay inside the storage and never overlap
            // unread bytes. We are inside a critical section.
            unsafe {
                let dst = self.storage.as_ptr();
                core::ptr::copy_nonoverlapping(data.as_ptr(), dst.add(idx.tail), first);
                core::ptr::copy_nonoverlapping(data.as_ptr().add(first), dst, n - first);
            }

            idx.tail = (idx.tail + n) % self.capacity;
            idx.count += n;
            cell.set(idx);
            n
        })
    }

    /// Copy up to `buf.len()` of the oldest bytes out; returns the number
    /// read.
    pub fn get(&self, buf: &mut [u8]) -> usize {
        sync::critical_section(|cs| {
            let cell = self.indices.borrow(cs);
            let mut idx = cell.get();
            let n = buf.len().min(idx.count);

            let first = n.min(self.capacity - idx.head);
            // SAFETY: `head + first <= capacity` and the wrapped part is at
            // most `count - first` bytes from 0; both ranges hold written
            // data. We are inside a critical section.
            unsafe {
                let src = self.storage.as_ptr();
                core::ptr::copy_nonoverlapping(src.add(idx.head), buf.as_mut_ptr(), first);
                core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr().add(first), n - first);
            }

            idx.head = (idx.head + n) % self.capacity;
            idx.count -= n;
            cell.set(idx);
            n
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(16))]
    struct Arena([u8; 1024]);

    #[test]
    fn test_put_get_concatenates_in_order() {
        let mut arena = Arena([0; 1024]);
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let fifo = Fifo::request(&mut pool, 128).unwrap();

        let mut total = 0;
        for chunk in ["123", "1234", "123456", "1234568", "12345"] {
            total += fifo.put(chunk.as_bytes());
        }
        assert_eq!(total, 25);
        assert_eq!(fifo.len(), 25);

        let mut buf = [0u8; 50];
        let n = fifo.get(&mut buf);
        assert_eq!(n, 25);
        assert_eq!(&buf[..n], b"1231234123456123456812345");
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_put_is_bounded_by_free_space() {
        let mut arena = Arena([0; 1024]);
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let fifo = Fifo::request(&mut pool, 8).unwrap();

        assert_eq!(fifo.put(b"abcdef"), 6);
        assert_eq!(fifo.put(b"ghijkl"), 2);
        assert_eq!(fifo.len(), fifo.capacity());
        assert_eq!(fifo.free_space(), 0);
        assert_eq!(fifo.put(b"x"), 0);

        let mut buf = [0u8; 16];
        assert_eq!(fifo.get(&mut buf), 8);
        assert_eq!(&buf[..8], b"abcdefgh");
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let mut arena = Arena([0; 1024]);
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let fifo = Fifo::request(&mut pool, 5).unwrap();
        let mut buf = [0u8; 5];

        for round in 0u8..6 {
            let data = [round, round + 1, round + 2];
            assert_eq!(fifo.put(&data), 3);
            assert!(fifo.len() <= fifo.capacity());
            assert_eq!(fifo.get(&mut buf[..3]), 3);
            assert_eq!(&buf[..3], &data);
        }
    }

    #[test]
    fn test_short_get() {
        let mut arena = Arena([0; 1024]);
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let fifo = Fifo::request(&mut pool, 16).unwrap();
        fifo.put(b"hello");

        let mut buf = [0u8; 2];
        assert_eq!(fifo.get(&mut buf), 2);
        assert_eq!(&buf, b"he");
        assert_eq!(fifo.len(), 3);
        let mut empty: [u8; 0] = [];
        assert_eq!(fifo.get(&mut empty), 0);
    }

    #[test]
    fn test_request_and_release() {
        let mut arena = Arena([0; 1024]);
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        assert!(matches!(Fifo::request(&mut pool, 0), Err(KernelError::Invalid)));
        assert!(matches!(Fifo::request(&mut pool, 4096), Err(KernelError::NoMemory)));

        let fifo = Fifo::request(&mut pool, 100).unwrap();
        assert_eq!(pool.free_bytes(), 1024 - 112);
        fifo.release(&mut pool).unwrap();
        assert_eq!(pool.free_bytes(), 1024);
    }
}
