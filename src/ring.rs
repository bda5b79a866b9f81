//! The circular buffer shared with the debug host.
//!
//! The host owns `wr` and the data bytes it publishes, the agent owns `rd`.
//! Both cursors are free-running byte counters; the byte for counter value
//! `k` lives at `data[k % N]`. Only loads and stores are used on the atomics,
//! Cortex-M0+ has no compare-and-swap.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Anything the agent can pull command bytes from.
pub trait ByteSource {
    /// Returns the next byte, waiting for it as long as it takes.
    fn read_byte(&mut self) -> u8;

    /// Little-endian word, assembled byte by byte.
    fn read_word(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.iter_mut().for_each(|b| *b = self.read_byte());
        u32::from_le_bytes(bytes)
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: AtomicU8 = AtomicU8::new(0);

/// Layout is part of the host contract, do not reorder.
#[repr(C)]
pub struct SharedBuffer<const N: usize> {
    status: AtomicU32,
    requests_processed: AtomicU32,
    rd: AtomicU32,
    wr: AtomicU32,
    buffer_size: u32,
    data: [AtomicU8; N],
}

impl<const N: usize> SharedBuffer<N> {
    pub const fn new() -> Self {
        Self {
            status: AtomicU32::new(0),
            requests_processed: AtomicU32::new(0),
            rd: AtomicU32::new(0),
            wr: AtomicU32::new(0),
            buffer_size: N as u32,
            data: [EMPTY; N],
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer_size as usize
    }

    pub fn status(&self) -> i32 {
        self.status.load(Ordering::Acquire) as i32
    }

    pub fn set_status(&self, status: i32) {
        self.status.store(status as u32, Ordering::Release);
    }

    pub fn requests_processed(&self) -> u32 {
        self.requests_processed.load(Ordering::Acquire)
    }

    /// Single writer, so a plain load/store pair is enough.
    pub fn count_request(&self) {
        let n = self.requests_processed.load(Ordering::Relaxed);
        self.requests_processed.store(n.wrapping_add(1), Ordering::Release);
    }

    /// Bytes published by the host and not consumed yet.
    pub fn pending(&self) -> usize {
        let wr = self.wr.load(Ordering::Acquire);
        let rd = self.rd.load(Ordering::Acquire);
        wr.wrapping_sub(rd) as usize
    }

    /// Agent-side consumer.
    pub fn reader(&self) -> BufferReader<'_, N> {
        BufferReader { buffer: self }
    }

    /// Host side: publishes one byte, or returns `false` if the agent hasn't
    /// made room for it yet.
    pub fn try_push(&self, byte: u8) -> bool {
        let wr = self.wr.load(Ordering::Relaxed);
        let rd = self.rd.load(Ordering::Acquire);
        if wr.wrapping_sub(rd) as usize >= N {
            return false;
        }

        self.data[wr as usize % N].store(byte, Ordering::Relaxed);
        // Data first, then the cursor that makes it visible
        self.wr.store(wr.wrapping_add(1), Ordering::Release);
        true
    }

    /// Host side: publishes all of `bytes`, waiting for room as needed.
    pub fn push_blocking(&self, bytes: &[u8]) {
        for byte in bytes {
            while !self.try_push(*byte) {
                core::hint::spin_loop();
            }
        }
    }
}

impl<const N: usize> Default for SharedBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BufferReader<'a, const N: usize> {
    buffer: &'a SharedBuffer<N>,
}

impl<'a, const N: usize> ByteSource for BufferReader<'a, N> {
    fn read_byte(&mut self) -> u8 {
        let rd = self.buffer.rd.load(Ordering::Relaxed);

        // Nothing else to do until the host writes more
        while self.buffer.wr.load(Ordering::Acquire) == rd {
            core::hint::spin_loop();
        }

        let byte = self.buffer.data[rd as usize % N].load(Ordering::Relaxed);
        // Only hand the slot back once we're done with it
        self.buffer.rd.store(rd.wrapping_add(1), Ordering::Release);
        byte
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn words_are_little_endian() {
        let buf = SharedBuffer::<16>::new();
        buf.push_blocking(&[0x78, 0x56, 0x34, 0x12, 0xAA]);

        let mut rdr = buf.reader();
        assert_eq!(rdr.read_word(), 0x1234_5678);
        assert_eq!(rdr.read_byte(), 0xAA);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn host_cannot_overrun_the_reader() {
        let buf = SharedBuffer::<4>::new();
        assert!((0..4).all(|b| buf.try_push(b)));
        assert!(!buf.try_push(4));
        assert_eq!(buf.pending(), 4);

        let mut rdr = buf.reader();
        assert_eq!(rdr.read_byte(), 0);
        assert!(buf.try_push(4));
        assert!(!buf.try_push(5));

        let rest: Vec<u8> = (0..4).map(|_| rdr.read_byte()).collect();
        assert_eq!(rest, vec![1, 2, 3, 4]);
    }

    #[test]
    fn wraps_around_many_times() {
        let buf = Arc::new(SharedBuffer::<8>::new());
        let producer = {
            let buf = buf.clone();
            std::thread::spawn(move || {
                let bytes: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
                buf.push_blocking(&bytes);
            })
        };

        let mut rdr = buf.reader();
        for i in 0..1000u32 {
            assert_eq!(rdr.read_byte(), i as u8);
        }
        producer.join().unwrap();
    }

    #[test]
    fn status_words() {
        let buf = SharedBuffer::<4>::new();
        assert_eq!(buf.capacity(), 4);
        buf.set_status(-2);
        assert_eq!(buf.status(), -2);
        buf.count_request();
        buf.count_request();
        assert_eq!(buf.requests_processed(), 2);
    }
}
