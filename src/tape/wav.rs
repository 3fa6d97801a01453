//! Read-only tape backed by a RIFF/WAVE file
//!
//! Only the first channel is used; a sample above zero reads as a high
//! level.

use std::io::Cursor;

use super::{Tape, TapeDeck};
use crate::{Error, Result};

/// WAV image converted to 1-bit levels
#[derive(Debug, Clone)]
pub struct WavTape {
    deck: TapeDeck,
    levels: Vec<u8>,
}

impl WavTape {
    /// Decode a WAV file held in memory
    ///
    /// # Errors
    ///
    /// `Error::TapeFormat` if `hound` rejects the data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| Error::TapeFormat(format!("WAV: {e}")))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let mut levels = Vec::new();
        match spec.sample_format {
            hound::SampleFormat::Int => {
                for (i, s) in reader.samples::<i32>().enumerate() {
                    let s = s.map_err(|e| Error::TapeFormat(format!("WAV: {e}")))?;
                    if i % channels == 0 {
                        levels.push(u8::from(s > 0));
                    }
                }
            }
            hound::SampleFormat::Float => {
                for (i, s) in reader.samples::<f32>().enumerate() {
                    let s = s.map_err(|e| Error::TapeFormat(format!("WAV: {e}")))?;
                    if i % channels == 0 {
                        levels.push(u8::from(s > 0.0));
                    }
                }
            }
        }
        tracing::debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            samples = levels.len(),
            "WAV tape opened"
        );
        Ok(Self {
            deck: TapeDeck::new(spec.sample_rate, levels.len()),
            levels,
        })
    }
}

impl Tape for WavTape {
    fn deck(&self) -> &TapeDeck {
        &self.deck
    }

    fn deck_mut(&mut self) -> &mut TapeDeck {
        &mut self.deck
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn step_sample(&mut self) {
        match self.levels.get(self.deck.position) {
            Some(&level) => {
                self.deck.output_state = i32::from(level);
                self.deck.position += 1;
            }
            None => self.deck.output_state = 0,
        }
    }
}
