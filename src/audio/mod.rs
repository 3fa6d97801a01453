//! Audio Output Domain
//!
//! Everything between the Dave DAC and the host audio sink: DC blocking,
//! resampling to the host rate and the sample ring the host pulls from.

pub mod dc_filter;
pub mod output;
pub mod resampler;
pub mod ring;

pub use dc_filter::DcBlockFilter;
pub use output::AudioOutput;
pub use resampler::{new_resampler, HighQualityResampler, LowQualityResampler, Resampler};
pub use ring::{RingStats, SampleRing};
