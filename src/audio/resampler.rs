//! Dave output resampling
//!
//! Dave produces one stereo DAC sample per chip cycle (250 kHz). The
//! resamplers bring that down to the host rate, run two cascaded DC blockers
//! per side, scale to 16 bits and push frames into the [`SampleRing`].
//!
//! Two variants:
//! - [`LowQualityResampler`] - linear interpolation with box averaging
//! - [`HighQualityResampler`] - pairwise decimation then a 12-tap windowed
//!   sinc interpolator

use std::sync::{Arc, OnceLock};

use super::dc_filter::DcBlockFilter;
use super::ring::SampleRing;

/// Common interface for the resampler variants
pub trait Resampler: Send {
    /// Feed one chip sample (`left | right << 16`)
    fn send_input_signal(&mut self, audio_input: u32);

    /// Set output volume (0.0 to 1.0)
    fn set_output_volume(&mut self, volume: f32);

    /// Set the cutoff frequencies of the two DC blocking stages
    fn set_dc_block_filters(&mut self, freq1: f32, freq2: f32);

    /// Host sample rate this resampler produces
    fn output_sample_rate(&self) -> f32;

    /// Feed a block of chip samples
    fn send_input_block(&mut self, samples: &[u32]) {
        for &sample in samples {
            self.send_input_signal(sample);
        }
    }
}

/// Map a 0..1 volume to the output gain
///
/// Full scale Dave output (252 per side after DC removal) lands a little
/// under 16-bit full scale at volume 1.0.
pub fn amp_scale_for(volume: f32) -> f32 {
    if volume > 0.01 && volume < 1.0 {
        150.0 * volume
    } else if volume > 0.99 {
        150.0
    } else {
        1.5
    }
}

/// Round to nearest and clip to the symmetric 16-bit range
#[inline]
pub fn to_i16(sample: f32) -> i16 {
    let rounded = if sample < 0.0 {
        if sample > -32767.0 {
            sample - 0.5
        } else {
            -32767.5
        }
    } else if sample < 32767.0 {
        sample + 0.5
    } else {
        32767.5
    };
    rounded as i16
}

/// DC blockers, gain and sink shared by both variants
struct OutputStage {
    output_rate: f32,
    dc1_left: DcBlockFilter,
    dc1_right: DcBlockFilter,
    dc2_left: DcBlockFilter,
    dc2_right: DcBlockFilter,
    amp_scale: f32,
    ring: Arc<SampleRing>,
}

impl OutputStage {
    fn new(output_rate: f32, freq1: f32, freq2: f32, volume: f32, ring: Arc<SampleRing>) -> Self {
        Self {
            output_rate,
            dc1_left: DcBlockFilter::new(output_rate, freq1),
            dc1_right: DcBlockFilter::new(output_rate, freq1),
            dc2_left: DcBlockFilter::new(output_rate, freq2),
            dc2_right: DcBlockFilter::new(output_rate, freq2),
            amp_scale: amp_scale_for(volume),
            ring,
        }
    }

    fn set_dc_block_filters(&mut self, freq1: f32, freq2: f32) {
        self.dc1_left.set_cutoff_frequency(freq1);
        self.dc1_right.set_cutoff_frequency(freq1);
        self.dc2_left.set_cutoff_frequency(freq2);
        self.dc2_right.set_cutoff_frequency(freq2);
    }

    #[inline]
    fn send(&mut self, left: f32, right: f32) {
        let left = self.dc2_left.process(self.dc1_left.process(left));
        let right = self.dc2_right.process(self.dc1_right.process(right));
        self.ring
            .push(to_i16(left * self.amp_scale), to_i16(right * self.amp_scale));
    }
}

#[inline]
fn split(audio_input: u32) -> (f32, f32) {
    ((audio_input & 0xFFFF) as f32, (audio_input >> 16) as f32)
}

/// Linear interpolating, box averaging resampler
pub struct LowQualityResampler {
    out: OutputStage,
    prv_left: f32,
    prv_right: f32,
    phs: f32,
    nxt_phs: f32,
    downsample_ratio: f32,
    acc_left: f32,
    acc_right: f32,
}

impl LowQualityResampler {
    /// Create a resampler from `input_rate` to `output_rate`
    pub fn new(
        input_rate: f32,
        output_rate: f32,
        dc_freq1: f32,
        dc_freq2: f32,
        volume: f32,
        ring: Arc<SampleRing>,
    ) -> Self {
        let downsample_ratio = input_rate / output_rate;
        Self {
            out: OutputStage::new(output_rate, dc_freq1, dc_freq2, volume, ring),
            prv_left: 0.0,
            prv_right: 0.0,
            phs: 0.0,
            nxt_phs: downsample_ratio,
            downsample_ratio,
            acc_left: 0.0,
            acc_right: 0.0,
        }
    }
}

impl Resampler for LowQualityResampler {
    fn send_input_signal(&mut self, audio_input: u32) {
        let (left, right) = split(audio_input);
        self.phs += 1.0;
        if self.phs < self.nxt_phs {
            self.acc_left += self.prv_left + left;
            self.acc_right += self.prv_right + right;
        } else {
            // split this input interval at the output sample boundary
            let frac = self.nxt_phs - (self.phs - 1.0);
            let left2 = self.prv_left + (left - self.prv_left) * frac;
            let right2 = self.prv_right + (right - self.prv_right) * frac;
            self.acc_left += (self.prv_left + left2) * frac;
            self.acc_right += (self.prv_right + right2) * frac;
            let scale = self.downsample_ratio * 2.0;
            self.out.send(self.acc_left / scale, self.acc_right / scale);
            self.acc_left = (left2 + left) * (1.0 - frac);
            self.acc_right = (right2 + right) * (1.0 - frac);
            self.nxt_phs = (self.nxt_phs + self.downsample_ratio) - self.phs;
            self.phs = 0.0;
        }
        self.prv_left = left;
        self.prv_right = right;
    }

    fn set_output_volume(&mut self, volume: f32) {
        self.out.amp_scale = amp_scale_for(volume);
    }

    fn set_dc_block_filters(&mut self, freq1: f32, freq2: f32) {
        self.out.set_dc_block_filters(freq1, freq2);
    }

    fn output_sample_rate(&self) -> f32 {
        self.out.output_rate
    }
}

/// Interpolation steps across the 12 taps of the window
const WINDOW_SIZE: usize = 1536;
const WINDOW_STEP: usize = WINDOW_SIZE / 12;
/// Circular accumulator length
const BUF_SIZE: usize = 16;

/// Von Hann windowed sinc over -6pi..6pi, WINDOW_SIZE + 1 points
fn window_table() -> &'static [f32] {
    static WINDOW: OnceLock<Box<[f32]>> = OnceLock::new();
    WINDOW.get_or_init(|| {
        let pi = std::f64::consts::PI;
        let inc = 12.0 * pi / WINDOW_SIZE as f64;
        (0..=WINDOW_SIZE)
            .map(|i| {
                if i == WINDOW_SIZE / 2 {
                    return 1.0;
                }
                let phs = -(pi * 6.0) + inc * i as f64;
                ((phs / 6.0).cos() * 0.5 + 0.5) as f32 * ((phs.sin() / phs) as f32)
            })
            .collect()
    })
}

/// Windowed sinc resampler
pub struct HighQualityResampler {
    out: OutputStage,
    window: &'static [f32],
    prv_left: f32,
    prv_right: f32,
    /// First sample of the current input pair is held in `prv_*`
    have_first: bool,
    buf_left: [f32; BUF_SIZE],
    buf_right: [f32; BUF_SIZE],
    buf_pos: f32,
    nxt_pos: f32,
    resample_ratio: f32,
}

impl HighQualityResampler {
    /// Create a resampler from `input_rate` to `output_rate`
    pub fn new(
        input_rate: f32,
        output_rate: f32,
        dc_freq1: f32,
        dc_freq2: f32,
        volume: f32,
        ring: Arc<SampleRing>,
    ) -> Self {
        Self {
            out: OutputStage::new(output_rate, dc_freq1, dc_freq2, volume, ring),
            window: window_table(),
            prv_left: 0.0,
            prv_right: 0.0,
            have_first: false,
            buf_left: [0.0; BUF_SIZE],
            buf_right: [0.0; BUF_SIZE],
            buf_pos: 0.0,
            nxt_pos: 1.0,
            resample_ratio: output_rate / (input_rate * 0.5),
        }
    }

    /// Spread one input sample over the 12 accumulator slots around `buf_pos`
    fn process_sample(&mut self, in_left: f32, in_right: f32) {
        let mut write_pos = self.buf_pos as usize;
        let pos_frac = self.buf_pos - write_pos as f32;
        let win_pos = (1.0 - pos_frac) * WINDOW_STEP as f32;
        let mut win_idx = win_pos as usize;
        let win_frac = win_pos - win_idx as f32;
        write_pos = (write_pos + BUF_SIZE - 5) % BUF_SIZE;
        while win_idx < WINDOW_SIZE {
            let w0 = self.window[win_idx];
            let w = w0 + (self.window[win_idx + 1] - w0) * win_frac;
            self.buf_left[write_pos] += in_left * w;
            self.buf_right[write_pos] += in_right * w;
            write_pos = (write_pos + 1) % BUF_SIZE;
            win_idx += WINDOW_STEP;
        }
    }
}

impl Resampler for HighQualityResampler {
    fn send_input_signal(&mut self, audio_input: u32) {
        let (left, right) = split(audio_input);
        if !self.have_first {
            self.prv_left = left;
            self.prv_right = right;
            self.have_first = true;
            return;
        }
        self.have_first = false;
        self.process_sample(left + self.prv_left, right + self.prv_right);
        self.buf_pos += self.resample_ratio;
        if self.buf_pos >= self.nxt_pos {
            if self.buf_pos >= BUF_SIZE as f32 {
                self.buf_pos -= BUF_SIZE as f32;
            }
            self.nxt_pos = (self.buf_pos as usize + 1) as f32;
            let read_pos = (self.buf_pos as usize + BUF_SIZE - 6) % BUF_SIZE;
            let gain = 0.5 * self.resample_ratio;
            let out_left = self.buf_left[read_pos] * gain;
            let out_right = self.buf_right[read_pos] * gain;
            self.buf_left[read_pos] = 0.0;
            self.buf_right[read_pos] = 0.0;
            self.out.send(out_left, out_right);
        }
    }

    fn set_output_volume(&mut self, volume: f32) {
        self.out.amp_scale = amp_scale_for(volume);
    }

    fn set_dc_block_filters(&mut self, freq1: f32, freq2: f32) {
        self.out.set_dc_block_filters(freq1, freq2);
    }

    fn output_sample_rate(&self) -> f32 {
        self.out.output_rate
    }
}

/// Build the resampler variant selected by `high_quality`
pub fn new_resampler(
    high_quality: bool,
    input_rate: f32,
    output_rate: f32,
    dc_freq1: f32,
    dc_freq2: f32,
    volume: f32,
    ring: Arc<SampleRing>,
) -> Box<dyn Resampler> {
    if high_quality {
        Box::new(HighQualityResampler::new(
            input_rate,
            output_rate,
            dc_freq1,
            dc_freq2,
            volume,
            ring,
        ))
    } else {
        Box::new(LowQualityResampler::new(
            input_rate,
            output_rate,
            dc_freq1,
            dc_freq2,
            volume,
            ring,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DAVE_RATE: f32 = 250_000.0;

    fn ring() -> Arc<SampleRing> {
        Arc::new(SampleRing::new(1 << 16).unwrap())
    }

    fn square(n: usize) -> u32 {
        // 1 kHz square at full channel level, both sides
        let level = if (n / 125) % 2 == 0 { 252 } else { 0 };
        level | (level << 16)
    }

    #[test]
    fn test_amp_scale_mapping() {
        assert_relative_eq!(amp_scale_for(0.5), 75.0);
        assert_relative_eq!(amp_scale_for(1.0), 150.0);
        assert_relative_eq!(amp_scale_for(0.0), 1.5);
    }

    #[test]
    fn test_to_i16_rounds_and_clips() {
        assert_eq!(to_i16(1.4), 1);
        assert_eq!(to_i16(1.6), 2);
        assert_eq!(to_i16(-1.6), -2);
        assert_eq!(to_i16(40_000.0), 32767);
        assert_eq!(to_i16(-40_000.0), -32767);
    }

    #[test]
    fn test_output_rate_low_quality() {
        let ring = ring();
        let mut r = LowQualityResampler::new(DAVE_RATE, 44_100.0, 10.0, 10.0, 0.7, ring.clone());
        for n in 0..250_000 {
            r.send_input_signal(square(n));
        }
        let produced = ring.available_read() as i64;
        assert!((produced - 44_100).abs() <= 2, "got {produced}");
    }

    #[test]
    fn test_output_rate_high_quality() {
        let ring = ring();
        let mut r = HighQualityResampler::new(DAVE_RATE, 48_000.0, 10.0, 10.0, 0.7, ring.clone());
        for n in 0..250_000 {
            r.send_input_signal(square(n));
        }
        let produced = ring.available_read() as i64;
        assert!((produced - 48_000).abs() <= 2, "got {produced}");
    }

    #[test]
    fn test_silence_stays_silent() {
        for hq in [false, true] {
            let ring = ring();
            let mut r = new_resampler(hq, DAVE_RATE, 44_100.0, 10.0, 10.0, 1.0, ring.clone());
            r.send_input_block(&[0; 10_000]);
            let mut out = vec![0i16; 2 * ring.available_read()];
            ring.read(&mut out);
            assert!(out.iter().all(|&s| s == 0));
        }
    }

    #[test]
    fn test_square_wave_swings_both_ways() {
        for hq in [false, true] {
            let ring = ring();
            let mut r = new_resampler(hq, DAVE_RATE, 44_100.0, 10.0, 10.0, 1.0, ring.clone());
            for n in 0..50_000 {
                r.send_input_signal(square(n));
            }
            let mut out = vec![0i16; 2 * ring.available_read()];
            ring.read(&mut out);
            let max = out.iter().copied().max().unwrap_or(0);
            let min = out.iter().copied().min().unwrap_or(0);
            assert!(max > 10_000, "hq={hq} max={max}");
            assert!(min < -10_000, "hq={hq} min={min}");
        }
    }

    #[test]
    fn test_window_center_and_edges() {
        let w = window_table();
        assert_eq!(w.len(), WINDOW_SIZE + 1);
        assert_relative_eq!(w[WINDOW_SIZE / 2], 1.0);
        assert!(w[0].abs() < 1e-6);
        assert!(w[WINDOW_SIZE].abs() < 1e-6);
    }
}
