//! DC blocking filter
//!
//! Dave's DAC output is unipolar (0..=315 per side). A first order highpass
//! removes the offset before samples are scaled to 16 bits.

use std::f32::consts::PI;

/// First order DC blocker: `y[n] = x[n] - x[n-1] + c * y[n-1]`
#[derive(Clone)]
pub struct DcBlockFilter {
    sample_rate: f32,
    /// Feedback coefficient
    c: f32,
    /// Previous input
    xnm1: f32,
    /// Previous output
    ynm1: f32,
}

impl DcBlockFilter {
    /// Create a filter for `sample_rate` with the given cutoff
    pub fn new(sample_rate: f32, cutoff_freq: f32) -> Self {
        let mut filter = Self {
            sample_rate,
            c: 1.0,
            xnm1: 0.0,
            ynm1: 0.0,
        };
        filter.set_cutoff_frequency(cutoff_freq);
        filter
    }

    /// Change the cutoff frequency
    ///
    /// The normalized frequency is clamped to 0.0003..=0.125.
    pub fn set_cutoff_frequency(&mut self, freq: f32) {
        let w = (2.0 * PI * freq / self.sample_rate).clamp(0.0003, 0.125);
        self.c = 1.0 - w;
    }

    /// Filter one sample
    ///
    /// # Arguments
    ///
    /// * `input` - Input sample
    ///
    /// # Returns
    ///
    /// Filtered sample, with denormal-range values flushed to zero
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let mut output = (input - self.xnm1) + self.c * self.ynm1;
        if output.abs() <= 1.0e-20 {
            output = 0.0;
        }
        self.xnm1 = input;
        self.ynm1 = output;
        output
    }

    /// Reset the filter state
    pub fn reset(&mut self) {
        self.xnm1 = 0.0;
        self.ynm1 = 0.0;
    }

    /// Feedback coefficient
    pub fn coefficient(&self) -> f32 {
        self.c
    }
}

impl std::fmt::Debug for DcBlockFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcBlockFilter")
            .field("c", &self.c)
            .finish_non_exhaustive()
    }
}
