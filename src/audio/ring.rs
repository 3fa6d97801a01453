//! Stereo sample ring between the machine and the host
//!
//! The machine context writes interleaved 16-bit frames as the resampler
//! produces them; the host context drains a bounded count once per frame.
//! The machine side never waits: frames that do not fit are dropped and
//! counted as an overrun.
//!
//! Memory use is fixed at construction: capacity * 2 * sizeof(i16).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Error, Result};

/// Fill and overrun counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Number of writes that could not store every frame
    pub overrun_count: usize,
    /// Frames dropped because the ring was full
    pub frames_dropped: usize,
    /// Frames accepted since creation
    pub frames_written: usize,
}

/// Fixed-capacity ring of interleaved stereo `i16` frames
///
/// # Thread Safety
/// - One producer (machine context), one consumer (host context)
/// - Buffer access under a `parking_lot::Mutex`, positions in atomics
#[derive(Debug)]
pub struct SampleRing {
    buffer: Mutex<Vec<i16>>,
    /// Write position in frames (monotonic)
    write_pos: AtomicUsize,
    /// Read position in frames (monotonic)
    read_pos: AtomicUsize,
    /// Capacity in frames (power of 2)
    capacity: usize,
    mask: usize,
    stats: Mutex<RingStats>,
}

impl SampleRing {
    /// Create a ring holding at least `requested_frames` stereo frames
    ///
    /// Capacity is rounded up to the next power of two.
    ///
    /// # Errors
    ///
    /// Returns `Error::Resource` if the capacity is 0 or unreasonably large.
    pub fn new(requested_frames: usize) -> Result<Self> {
        if requested_frames == 0 {
            return Err(Error::Resource(
                "sample ring capacity must be greater than 0".into(),
            ));
        }
        // 64 MB worth of stereo frames
        const MAX_FRAMES: usize = 64 * 1024 * 1024 / (2 * std::mem::size_of::<i16>());
        let capacity = requested_frames.next_power_of_two();
        if capacity > MAX_FRAMES {
            return Err(Error::Resource(format!(
                "sample ring capacity {capacity} exceeds maximum {MAX_FRAMES}"
            )));
        }
        Ok(Self {
            buffer: Mutex::new(vec![0; capacity * 2]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
            stats: Mutex::new(RingStats::default()),
        })
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames waiting to be read
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Push one stereo frame; returns false if it was dropped
    #[inline]
    pub fn push(&self, left: i16, right: i16) -> bool {
        self.write(&[left, right]) == 1
    }

    /// Write interleaved frames; returns the number of frames stored
    pub fn write(&self, interleaved: &[i16]) -> usize {
        let frames = interleaved.len() / 2;
        let mut buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity - write_pos.wrapping_sub(read_pos);
        let to_write = frames.min(free);

        for i in 0..to_write {
            let idx = ((write_pos + i) & self.mask) * 2;
            buf[idx] = interleaved[i * 2];
            buf[idx + 1] = interleaved[i * 2 + 1];
        }
        drop(buf);

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);

        let mut stats = self.stats.lock();
        stats.frames_written += to_write;
        if to_write < frames {
            stats.overrun_count += 1;
            stats.frames_dropped += frames - to_write;
        }
        to_write
    }

    /// Read up to `dest.len() / 2` frames; returns the number of frames read
    pub fn read(&self, dest: &mut [i16]) -> usize {
        let buf = self.buffer.lock();

        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let to_read = (dest.len() / 2).min(write_pos.wrapping_sub(read_pos));

        for i in 0..to_read {
            let idx = ((read_pos + i) & self.mask) * 2;
            dest[i * 2] = buf[idx];
            dest[i * 2 + 1] = buf[idx + 1];
        }
        drop(buf);

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Drop everything not yet read
    pub fn flush(&self) {
        let _buf = self.buffer.lock();
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// Fill level (0.0 to 1.0)
    pub fn fill_percentage(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> RingStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_capacity_rounding() {
        let ring = SampleRing::new(1000).unwrap();
        assert_eq!(ring.capacity(), 1024);
        assert!(SampleRing::new(0).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let ring = SampleRing::new(8).unwrap();
        assert_eq!(ring.write(&[1, -1, 2, -2, 3, -3]), 3);
        let mut out = [0i16; 4];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [1, -1, 2, -2]);
        assert_eq!(ring.available_read(), 1);
    }

    #[test]
    fn test_overrun_drops_and_counts() {
        let ring = SampleRing::new(4).unwrap();
        for i in 0..6 {
            ring.push(i, i);
        }
        let stats = ring.stats();
        assert_eq!(stats.frames_written, 4);
        assert_eq!(stats.frames_dropped, 2);
        assert_eq!(stats.overrun_count, 2);
        let mut out = [0i16; 16];
        assert_eq!(ring.read(&mut out), 4);
        // the oldest frames survive
        assert_eq!(&out[..8], &[0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_wraparound() {
        let ring = SampleRing::new(4).unwrap();
        let mut out = [0i16; 6];
        for round in 0..10i16 {
            assert_eq!(ring.write(&[round, round, round + 1, round + 1, round + 2, round + 2]), 3);
            assert_eq!(ring.read(&mut out), 3);
            assert_eq!(out, [round, round, round + 1, round + 1, round + 2, round + 2]);
        }
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let ring = Arc::new(SampleRing::new(256).unwrap());
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut next = 0i16;
                while next < 5000 {
                    if ring.push(next, -next) {
                        next += 1;
                    }
                }
            })
        };
        let mut expected = 0i16;
        let mut out = [0i16; 64];
        while expected < 5000 {
            let n = ring.read(&mut out);
            for frame in out[..n * 2].chunks(2) {
                assert_eq!(frame, [expected, -expected]);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
