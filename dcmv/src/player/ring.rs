use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// A bounded single-producer/single-consumer queue of frame indices.
///
/// The presenter pushes preload requests, the decode worker pops them. `head` and `tail` are
/// free-running counters; an entry lives at `counter % capacity`. The producer writes the entry
/// before releasing `head`, and the consumer acquires `head` before reading the entry, so an
/// index is always fully visible to the worker by the time it is popped.
pub struct PreloadRing {
    entries: Box<[AtomicU32]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl PreloadRing {
    /// Creates a ring holding up to `capacity` pending requests.
    /// ***Panics*** if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "the ring needs a nonzero capacity");
        let entries = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self { entries, head: AtomicUsize::new(0), tail: AtomicUsize::new(0) }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no requests are pending.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Enqueues a preload request. Returns `false` if the ring is full. Producer only.
    pub fn push(&self, frame: u32) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.entries.len() {
            return false;
        }
        self.entries[head % self.entries.len()].store(frame, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Dequeues the oldest pending request, if any. Consumer only.
    pub fn pop(&self) -> Option<u32> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let frame = self.entries[tail % self.entries.len()].load(Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(frame)
    }

    /// Discards all pending requests. Only safe from the producer side while the consumer is
    /// between pops; a request popped concurrently is already bounds-checked by the worker.
    pub fn reset(&self) {
        self.tail.store(self.head.load(Ordering::Acquire), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_order() {
        let ring = PreloadRing::new(4);
        assert!(ring.is_empty());
        assert!(ring.push(10));
        assert!(ring.push(11));
        assert!(ring.push(12));
        assert_eq!(ring.pop(), Some(10));
        assert_eq!(ring.pop(), Some(11));
        assert!(ring.push(13));
        assert_eq!(ring.pop(), Some(12));
        assert_eq!(ring.pop(), Some(13));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_push_fails_when_full() {
        let ring = PreloadRing::new(2);
        assert!(ring.push(0));
        assert!(ring.push(1));
        assert!(!ring.push(2));
        assert_eq!(ring.pop(), Some(0));
        assert!(ring.push(2));
    }

    #[test]
    fn test_reset_discards_pending() {
        let ring = PreloadRing::new(4);
        ring.push(1);
        ring.push(2);
        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);
        // The ring keeps working after a reset.
        assert!(ring.push(7));
        assert_eq!(ring.pop(), Some(7));
    }

    #[test]
    fn test_spsc_transfer() {
        let ring = Arc::new(PreloadRing::new(8));
        let count = 50_000u32;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..count {
                    while !ring.push(i) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0;
        while expected < count {
            if let Some(frame) = ring.pop() {
                assert_eq!(frame, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
