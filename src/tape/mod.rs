//! Tape Images
//!
//! Every tape format sits behind the [`Tape`] trait. The deck mechanics
//! (buttons, motor, position, in/out signal) are shared through
//! [`TapeDeck`]; variants only provide sample storage and their own seek
//! and cue point capabilities.
//!
//! | Variant | Header | Access | Cue points |
//! |---------|--------|--------|------------|
//! | [`MemoryTape`] | `EPTAPE01` | read-write | yes |
//! | [`WavTape`] | `RIFF....WAVE` | read-only | no |

pub mod memory;
pub mod wav;

pub use memory::{MemoryTape, TAPE_MAGIC};
pub use wav::WavTape;

use crate::{Error, Result};

/// Sample rate of a newly created tape
pub const DEFAULT_TAPE_SAMPLE_RATE: u32 = 24_000;

/// Deck state common to all tape variants
#[derive(Debug, Clone, Default)]
pub struct TapeDeck {
    /// Samples per second
    pub sample_rate: u32,
    /// Play button down
    pub playback_on: bool,
    /// Record button down
    pub record_on: bool,
    /// Remote relay closed
    pub motor_on: bool,
    /// Current read/write position in samples
    pub position: usize,
    /// Tape length in samples
    pub length: usize,
    /// Signal to record
    pub input_state: i32,
    /// Signal read from the tape
    pub output_state: i32,
}

impl TapeDeck {
    /// A stopped deck at the start of a tape of `length` samples
    pub fn new(sample_rate: u32, length: usize) -> Self {
        Self {
            sample_rate,
            length,
            ..Self::default()
        }
    }

    fn samples_for(&self, secs: f64) -> usize {
        if secs <= 0.0 || !secs.is_finite() {
            return 0;
        }
        (secs * f64::from(self.sample_rate) + 0.5) as usize
    }
}

/// A tape image on the emulated cassette deck
pub trait Tape: Send + std::fmt::Debug {
    /// Shared deck state
    fn deck(&self) -> &TapeDeck;

    /// Shared deck state, mutable
    fn deck_mut(&mut self) -> &mut TapeDeck;

    /// True if the image cannot be written
    fn is_read_only(&self) -> bool;

    /// Advance one sample with the motor running and play pressed
    fn step_sample(&mut self);

    /// True for variants with a cue point table
    fn supports_cue_points(&self) -> bool {
        false
    }

    /// Cue point positions in samples, sorted
    fn cue_points(&self) -> &[u32] {
        &[]
    }

    /// Add a cue point at the current position
    fn add_cue_point(&mut self) {}

    /// Delete the cue point nearest to the current position
    fn delete_nearest_cue_point(&mut self) {}

    /// Delete every cue point
    fn delete_all_cue_points(&mut self) {}

    /// Samples per second
    fn sample_rate(&self) -> u32 {
        self.deck().sample_rate
    }

    /// Run the deck for one sample period
    ///
    /// Nothing happens unless playback is on and the motor runs.
    fn run_one_sample(&mut self) {
        let deck = self.deck();
        if deck.playback_on && deck.motor_on {
            self.step_sample();
        }
    }

    /// Press play
    fn play(&mut self) {
        let deck = self.deck_mut();
        deck.playback_on = true;
        deck.record_on = false;
    }

    /// Press record; on a read-only image this is the same as play
    fn record(&mut self) {
        let read_only = self.is_read_only();
        let deck = self.deck_mut();
        deck.playback_on = true;
        deck.record_on = !read_only;
    }

    /// Release play and record
    fn stop(&mut self) {
        let deck = self.deck_mut();
        deck.playback_on = false;
        deck.record_on = false;
        deck.output_state = 0;
    }

    /// Switch the motor relay
    fn set_motor(&mut self, on: bool) {
        self.deck_mut().motor_on = on;
    }

    /// True while the motor runs
    fn is_motor_on(&self) -> bool {
        self.deck().motor_on
    }

    /// True while play (or record) is pressed
    fn is_playing(&self) -> bool {
        self.deck().playback_on
    }

    /// True while record is pressed on a writable image
    fn is_recording(&self) -> bool {
        self.deck().record_on
    }

    /// Signal to record on the next sample
    fn set_input_signal(&mut self, state: i32) {
        self.deck_mut().input_state = state;
    }

    /// Signal read at the current position
    fn output_signal(&self) -> i32 {
        self.deck().output_state
    }

    /// Move to `secs` from the start, clamped to the tape length
    fn seek(&mut self, secs: f64) {
        let deck = self.deck_mut();
        deck.position = deck.samples_for(secs).min(deck.length);
    }

    /// Move to the nearest cue point in the given direction, or by `secs`
    /// if there is none
    fn seek_to_cue_point(&mut self, forward: bool, secs: f64) {
        let pos = self.deck().position;
        let cue = if forward {
            self.cue_points()
                .iter()
                .map(|&c| c as usize)
                .find(|&c| c > pos)
        } else {
            self.cue_points()
                .iter()
                .rev()
                .map(|&c| c as usize)
                .find(|&c| c < pos)
        };
        match cue {
            Some(c) => {
                let deck = self.deck_mut();
                deck.position = c.min(deck.length);
            }
            None => {
                let t = self.position();
                self.seek(if forward { t + secs } else { t - secs });
            }
        }
    }

    /// Current position in seconds
    fn position(&self) -> f64 {
        let deck = self.deck();
        deck.position as f64 / f64::from(deck.sample_rate)
    }

    /// Tape length in seconds
    fn length(&self) -> f64 {
        let deck = self.deck();
        deck.length as f64 / f64::from(deck.sample_rate)
    }

    /// True at or past the last sample
    fn is_end_of_tape(&self) -> bool {
        let deck = self.deck();
        deck.position >= deck.length
    }
}

/// Open a tape image, selecting the variant from its header
///
/// # Errors
///
/// `Error::TapeFormat` if the header matches no variant or the image is
/// damaged.
pub fn open_tape(bytes: &[u8]) -> Result<Box<dyn Tape>> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Ok(Box::new(WavTape::from_bytes(bytes)?));
    }
    if bytes.starts_with(TAPE_MAGIC) {
        return Ok(Box::new(MemoryTape::from_bytes(bytes)?));
    }
    Err(Error::TapeFormat("unrecognised tape image header".into()))
}
