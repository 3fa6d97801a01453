//! Host-side audio pull
//!
//! The host asks for one frame's worth of samples after each `run_for`
//! call. The count is a hint: if the machine has not produced that many yet
//! the host gets fewer.

use std::sync::Arc;

use super::ring::{RingStats, SampleRing};

/// Host handle on the sample ring
#[derive(Debug, Clone)]
pub struct AudioOutput {
    ring: Arc<SampleRing>,
    sample_rate: u32,
}

impl AudioOutput {
    /// Wrap `ring`, which is filled at `sample_rate` frames per second
    pub fn new(ring: Arc<SampleRing>, sample_rate: u32) -> Self {
        Self { ring, sample_rate }
    }

    /// Frames a host frame of `frame_time_us` should carry
    pub fn frames_for(&self, frame_time_us: u64) -> usize {
        (self.sample_rate as u64 * frame_time_us / 1_000_000) as usize
    }

    /// Pull up to one host frame of interleaved stereo samples into `out`
    ///
    /// # Returns
    ///
    /// Number of stereo frames written to the front of `out`
    pub fn pull_frame(&self, out: &mut [i16], frame_time_us: u64) -> usize {
        let frames = self.frames_for(frame_time_us).min(out.len() / 2);
        self.ring.read(&mut out[..frames * 2])
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames ready to pull
    pub fn available(&self) -> usize {
        self.ring.available_read()
    }

    /// Overrun counters of the underlying ring
    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }

    /// Shared ring, for handing to a resampler
    pub fn ring(&self) -> Arc<SampleRing> {
        Arc::clone(&self.ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizing() {
        let out = AudioOutput::new(Arc::new(SampleRing::new(4096).unwrap()), 44_100);
        assert_eq!(out.frames_for(20_000), 882);
        assert_eq!(out.frames_for(16_667), 735);
    }

    #[test]
    fn test_pull_delivers_at_most_available() {
        let ring = Arc::new(SampleRing::new(4096).unwrap());
        let out = AudioOutput::new(Arc::clone(&ring), 44_100);
        for i in 0..100 {
            ring.push(i, -i);
        }
        let mut buf = vec![0i16; 2 * 882];
        assert_eq!(out.pull_frame(&mut buf, 20_000), 100);
        assert_eq!(&buf[..4], &[0, 0, 1, -1]);
        assert_eq!(out.pull_frame(&mut buf, 20_000), 0);
    }

    #[test]
    fn test_pull_respects_frame_budget() {
        let ring = Arc::new(SampleRing::new(4096).unwrap());
        let out = AudioOutput::new(Arc::clone(&ring), 1000);
        for i in 0..100 {
            ring.push(i, i);
        }
        let mut buf = vec![0i16; 1024];
        // 1000 Hz * 20 ms = 20 frames
        assert_eq!(out.pull_frame(&mut buf, 20_000), 20);
        assert_eq!(out.available(), 80);
    }
}
