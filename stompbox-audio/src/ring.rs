//! Lock-free single-producer/single-consumer byte ring used to couple the
//! realtime audio thread to a service thread in both directions.
//!
//! Grounded on the atomic + `UnsafeCell` + CAS-free index handoff technique
//! in `triple_buffer.rs`, generalized from "always overwrite with latest
//! value" to a FIFO byte queue: the producer owns `tail`, the consumer owns
//! `head`, and each side only ever reads the other's atomic, never writes
//! it. That split (rather than a shared CAS loop) is what makes `push` and
//! `pop` each wait-free in one step.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TAG_LEN: usize = 1;
const SIZE_LEN: usize = 4;
const HEADER_LEN: usize = TAG_LEN + SIZE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The message (including its header) does not fit in the ring even
    /// when empty. Distinct from `Full` per the ring's contract.
    TooLarge,
    /// Not enough free space right now; caller's backpressure policy
    /// decides whether to drop or retry (see the per-message-class policy
    /// in the driver).
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    Empty,
    /// The scratch buffer handed to `pop_with` is smaller than the queued
    /// message. The message is left in the ring.
    ScratchTooSmall,
}

struct RingShared {
    buf: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: `buf` is only ever read/written through the disjoint regions
// that `head`/`tail` carve out. The producer half never touches the
// region behind `head`; the consumer half never touches the region at or
// beyond `tail`. Each atomic is written by exactly one side.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl RingShared {
    fn buf_ptr(&self) -> *mut u8 {
        unsafe { (*self.buf.get()).as_mut_ptr() }
    }

    fn write_at(&self, mut pos: usize, bytes: &[u8]) {
        let ptr = self.buf_ptr();
        for &b in bytes {
            unsafe { *ptr.add(pos % self.capacity) = b };
            pos += 1;
        }
    }

    fn read_at(&self, mut pos: usize, out: &mut [u8]) {
        let ptr = self.buf_ptr();
        for slot in out.iter_mut() {
            *slot = unsafe { *ptr.add(pos % self.capacity) };
            pos += 1;
        }
    }
}

pub struct RingProducer {
    shared: Arc<RingShared>,
}

pub struct RingConsumer {
    shared: Arc<RingShared>,
}

/// Create a ring with room for `capacity` bytes of payload (header
/// overhead is additional). `capacity` should be sized generously —
/// "tens of KB per direction" per the host contract.
pub fn ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let shared = Arc::new(RingShared {
        buf: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
        capacity,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        RingProducer { shared: Arc::clone(&shared) },
        RingConsumer { shared },
    )
}

impl RingProducer {
    /// Push one tagged message. Never blocks, never allocates.
    pub fn push(&self, tag: u8, payload: &[u8]) -> Result<(), PushError> {
        let need = HEADER_LEN + payload.len();
        if need > self.shared.capacity {
            return Err(PushError::TooLarge);
        }

        let tail = self.shared.tail.load(Ordering::Relaxed);
        let head = self.shared.head.load(Ordering::Acquire);
        let used = tail.wrapping_sub(head);
        if need > self.shared.capacity - used {
            return Err(PushError::Full);
        }

        self.shared.write_at(tail, &[tag]);
        self.shared.write_at(tail + TAG_LEN, &(payload.len() as u32).to_ne_bytes());
        self.shared.write_at(tail + HEADER_LEN, payload);
        self.shared.tail.store(tail.wrapping_add(need), Ordering::Release);
        Ok(())
    }
}

impl RingConsumer {
    /// Pop one message into `scratch`, calling `f(tag, &scratch[..len])` on
    /// success. Zero-allocating as long as `scratch` is reused across
    /// calls (as the realtime drain loop does).
    pub fn pop_with<F: FnOnce(u8, &[u8])>(
        &self,
        scratch: &mut [u8],
        f: F,
    ) -> Result<(), PopError> {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);
        if head == tail {
            return Err(PopError::Empty);
        }

        let mut header = [0u8; HEADER_LEN];
        self.shared.read_at(head, &mut header);
        let tag = header[0];
        let len = u32::from_ne_bytes([header[1], header[2], header[3], header[4]]) as usize;

        if len > scratch.len() {
            return Err(PopError::ScratchTooSmall);
        }

        self.shared.read_at(head + HEADER_LEN, &mut scratch[..len]);
        self.shared.head.store(head.wrapping_add(HEADER_LEN + len), Ordering::Release);
        f(tag, &scratch[..len]);
        Ok(())
    }

    /// Pop one message into a freshly allocated `Vec`. Fine on the service
    /// thread; never call this from the realtime thread.
    pub fn pop_alloc(&self) -> Result<(u8, Vec<u8>), PopError> {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);
        if head == tail {
            return Err(PopError::Empty);
        }

        let mut header = [0u8; HEADER_LEN];
        self.shared.read_at(head, &mut header);
        let tag = header[0];
        let len = u32::from_ne_bytes([header[1], header[2], header[3], header[4]]) as usize;

        let mut payload = vec![0u8; len];
        self.shared.read_at(head + HEADER_LEN, &mut payload);
        self.shared.head.store(head.wrapping_add(HEADER_LEN + len), Ordering::Release);
        Ok((tag, payload))
    }

    pub fn is_empty(&self) -> bool {
        self.shared.head.load(Ordering::Relaxed) == self.shared.tail.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_one_message() {
        let (tx, rx) = ring(64);
        tx.push(7, b"hello").unwrap();
        let (tag, bytes) = rx.pop_alloc().unwrap();
        assert_eq!(tag, 7);
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn preserves_fifo_order_across_wraparound() {
        let (tx, rx) = ring(32);
        for i in 0..20u8 {
            tx.push(i, &[i; 3]).unwrap();
            let (tag, bytes) = rx.pop_alloc().unwrap();
            assert_eq!(tag, i);
            assert_eq!(bytes, vec![i; 3]);
        }
    }

    #[test]
    fn rejects_oversized_message() {
        let (tx, _rx) = ring(8);
        let payload = [0u8; 100];
        assert_eq!(tx.push(1, &payload), Err(PushError::TooLarge));
    }

    #[test]
    fn reports_full_without_blocking() {
        let (tx, _rx) = ring(16);
        tx.push(1, &[0u8; 5]).unwrap();
        assert_eq!(tx.push(1, &[0u8; 5]), Err(PushError::Full));
    }

    #[test]
    fn pop_with_is_zero_alloc_and_empty_when_drained() {
        let (tx, rx) = ring(64);
        tx.push(3, b"ab").unwrap();
        let mut scratch = [0u8; 32];
        let mut seen = Vec::new();
        rx.pop_with(&mut scratch, |tag, bytes| seen.push((tag, bytes.to_vec()))).unwrap();
        assert_eq!(seen, vec![(3, b"ab".to_vec())]);
        assert_eq!(rx.pop_with(&mut scratch, |_, _| {}), Err(PopError::Empty));
    }
}
