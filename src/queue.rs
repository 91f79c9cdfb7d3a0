//! A fixed-capacity, lock-free multi-producer multi-consumer queue.
//!
//! This is Dmitry Vyukov's bounded MPMC queue: an array of cells, each carrying its own sequence
//! number, so producers and consumers only ever contend on a single cell at a time rather than on
//! a shared head/tail pair. Both `push` and `pop` are wait-free absent contention and lock-free
//! under it; neither ever blocks.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Cell<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded MPMC queue of capacity `N`, where `N` must be a power of two `>= 2`.
pub struct Queue<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is less than 2. Callers that accept
    /// capacities from configuration should validate with `Options::validate` first, which turns
    /// this into a catchable `Error::InvalidOptions` instead.
    pub fn new(capacity: usize) -> Queue<T> {
        assert!(capacity >= 2 && capacity.is_power_of_two(), "queue capacity must be a power of two >= 2");

        let buffer: Vec<Cell<T>> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Queue {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Attempts to push `value`. Returns `Err(value)` if the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*cell.value.get()).write(value) };
                        cell.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to pop a value. Returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);

        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos as isize + 1);

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*cell.value.get()).assume_init_read() };
                        cell.sequence.store(pos + self.mask + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo() {
        let queue = Queue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn full_queue_rejects_push() {
        let queue = Queue::new(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.pop(), Some(1));
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn minimum_capacity_alternates_indefinitely() {
        let queue = Queue::new(2);
        for i in 0..1000 {
            queue.push(i).unwrap();
            assert_eq!(queue.pop(), Some(i));
        }
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_count() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicUsize;

        let queue = Arc::new(Queue::new(1024));
        let produced = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let queue = queue.clone();
                let produced = produced.clone();
                scope.spawn(move || {
                    for i in 0..2000u32 {
                        while queue.push(i).is_err() {
                            std::thread::yield_now();
                        }
                        produced.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }

            for _ in 0..4 {
                let queue = queue.clone();
                let consumed = consumed.clone();
                scope.spawn(move || {
                    let mut seen = 0;
                    while seen < 2000 {
                        if queue.pop().is_some() {
                            seen += 1;
                            consumed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            std::thread::yield_now();
                        }
                    }
                });
            }
        });

        assert_eq!(produced.load(Ordering::Relaxed), 8000);
        assert_eq!(consumed.load(Ordering::Relaxed), 8000);
    }
}
