//! Native 1-bit tape image
//!
//! ```text
//! "EPTAPE01"
//! u32  sample rate (10 000 to 120 000)
//! u32  cue point count, then that many u32 positions (sorted)
//! u64  sample count
//! ...  samples, 8 per byte, most significant bit first
//! ```
//!
//! All words are big-endian.

use super::{Tape, TapeDeck};
use crate::snapshot::{ChunkReader, ChunkWriter};
use crate::{Error, Result};

/// Header of a native tape image
pub const TAPE_MAGIC: &[u8; 8] = b"EPTAPE01";

/// Lowest accepted sample rate
pub const MIN_SAMPLE_RATE: u32 = 10_000;
/// Highest accepted sample rate
pub const MAX_SAMPLE_RATE: u32 = 120_000;
/// Most cue points one image can hold
pub const MAX_CUE_POINTS: usize = 1019;

/// Read-write tape held in memory
#[derive(Debug, Clone)]
pub struct MemoryTape {
    deck: TapeDeck,
    samples: Vec<u8>,
    cues: Vec<u32>,
}

impl MemoryTape {
    /// Empty tape at `sample_rate`
    ///
    /// # Errors
    ///
    /// `Error::TapeFormat` for a rate outside 10 000..=120 000 Hz.
    pub fn new(sample_rate: u32) -> Result<Self> {
        check_rate(sample_rate)?;
        Ok(Self {
            deck: TapeDeck::new(sample_rate, 0),
            samples: Vec::new(),
            cues: Vec::new(),
        })
    }

    /// Parse a native tape image
    ///
    /// # Errors
    ///
    /// `Error::TapeFormat` on a bad header, unsorted or out-of-range cue
    /// points, truncated sample data or trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes).map_err(|e| match e {
            Error::TapeFormat(_) => e,
            other => Error::TapeFormat(other.to_string()),
        })
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = ChunkReader::new(bytes);
        if r.read_bytes(TAPE_MAGIC.len())? != TAPE_MAGIC {
            return Err(Error::TapeFormat("missing EPTAPE01 header".into()));
        }
        let sample_rate = r.read_u32()?;
        check_rate(sample_rate)?;

        let cue_count = r.read_u32()? as usize;
        if cue_count > MAX_CUE_POINTS {
            return Err(Error::TapeFormat(format!("{cue_count} cue points")));
        }
        let mut cues = Vec::with_capacity(cue_count);
        for _ in 0..cue_count {
            cues.push(r.read_u32()?);
        }
        if cues.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::TapeFormat("cue points are not sorted".into()));
        }

        let length = usize::try_from(r.read_u64()?)
            .map_err(|_| Error::TapeFormat("tape too long".into()))?;
        let packed = r.read_bytes(length.div_ceil(8))?;
        r.finish()?;
        if cues.last().is_some_and(|&c| c as usize > length) {
            return Err(Error::TapeFormat("cue point past end of tape".into()));
        }

        let samples = (0..length)
            .map(|i| (packed[i >> 3] >> (7 - (i & 7))) & 1)
            .collect();
        Ok(Self {
            deck: TapeDeck::new(sample_rate, length),
            samples,
            cues,
        })
    }

    /// Serialize to the native image format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ChunkWriter::new();
        w.write_bytes(TAPE_MAGIC);
        w.write_u32(self.deck.sample_rate);
        w.write_u32(self.cues.len() as u32);
        for &cue in &self.cues {
            w.write_u32(cue);
        }
        w.write_u64(self.samples.len() as u64);
        for group in self.samples.chunks(8) {
            let byte = group
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | ((bit & 1) << (7 - i)));
            w.write_u8(byte);
        }
        w.into_inner()
    }

    /// Recorded samples, one 0/1 value each
    pub fn samples(&self) -> &[u8] {
        &self.samples
    }
}

fn check_rate(sample_rate: u32) -> Result<()> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(Error::TapeFormat(format!("sample rate {sample_rate} Hz")));
    }
    Ok(())
}

impl Tape for MemoryTape {
    fn deck(&self) -> &TapeDeck {
        &self.deck
    }

    fn deck_mut(&mut self) -> &mut TapeDeck {
        &mut self.deck
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn step_sample(&mut self) {
        let pos = self.deck.position;
        if self.deck.record_on {
            let bit = u8::from(self.deck.input_state > 0);
            if pos < self.samples.len() {
                self.samples[pos] = bit;
            } else {
                self.samples.push(bit);
            }
            self.deck.position = pos + 1;
            self.deck.length = self.samples.len();
            self.deck.output_state = self.deck.input_state;
        } else if let Some(&bit) = self.samples.get(pos) {
            self.deck.output_state = i32::from(bit);
            self.deck.position = pos + 1;
        } else {
            self.deck.output_state = 0;
        }
    }

    fn supports_cue_points(&self) -> bool {
        true
    }

    fn cue_points(&self) -> &[u32] {
        &self.cues
    }

    fn add_cue_point(&mut self) {
        let Ok(pos) = u32::try_from(self.deck.position) else {
            return;
        };
        if self.cues.len() >= MAX_CUE_POINTS {
            tracing::debug!("cue point table full");
            return;
        }
        if let Err(at) = self.cues.binary_search(&pos) {
            self.cues.insert(at, pos);
        }
    }

    fn delete_nearest_cue_point(&mut self) {
        let pos = self.deck.position as u64;
        let nearest = self
            .cues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &c)| u64::from(c).abs_diff(pos))
            .map(|(i, _)| i);
        if let Some(i) = nearest {
            self.cues.remove(i);
        }
    }

    fn delete_all_cue_points(&mut self) {
        self.cues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_pattern(tape: &mut MemoryTape, bits: &[i32]) {
        tape.record();
        tape.set_motor(true);
        for &b in bits {
            tape.set_input_signal(b);
            tape.run_one_sample();
        }
        tape.stop();
    }

    #[test]
    fn test_record_then_play() {
        let mut tape = MemoryTape::new(24_000).unwrap();
        record_pattern(&mut tape, &[1, 0, 0, 1, 1, 1, 0, 1, 1]);
        assert_eq!(tape.length(), 9.0 / 24_000.0);
        assert!(tape.is_end_of_tape());

        tape.seek(0.0);
        tape.play();
        let mut out = Vec::new();
        for _ in 0..10 {
            tape.run_one_sample();
            out.push(tape.output_signal());
        }
        assert_eq!(out, vec![1, 0, 0, 1, 1, 1, 0, 1, 1, 0]);
    }

    #[test]
    fn test_motor_off_holds_position() {
        let mut tape = MemoryTape::new(24_000).unwrap();
        record_pattern(&mut tape, &[1; 16]);
        tape.seek(0.0);
        tape.play();
        tape.set_motor(false);
        tape.run_one_sample();
        assert_eq!(tape.deck().position, 0);
    }

    #[test]
    fn test_image_round_trip_keeps_cues() {
        let mut tape = MemoryTape::new(48_000).unwrap();
        record_pattern(&mut tape, &[1, 1, 0, 1, 0, 0, 0, 1, 1, 0, 1]);
        tape.seek(3.0 / 48_000.0);
        tape.add_cue_point();
        tape.seek(8.0 / 48_000.0);
        tape.add_cue_point();
        tape.add_cue_point();

        let bytes = tape.to_bytes();
        let back = MemoryTape::from_bytes(&bytes).unwrap();
        assert_eq!(back.samples(), tape.samples());
        assert_eq!(back.cue_points(), &[3, 8]);
        assert_eq!(back.sample_rate(), 48_000);

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(
            MemoryTape::from_bytes(&trailing),
            Err(Error::TapeFormat(_))
        ));
        assert!(MemoryTape::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_cue_point_seek() {
        let mut tape = MemoryTape::new(10_000).unwrap();
        record_pattern(&mut tape, &[0; 50_000]);
        for secs in [1.0, 2.5] {
            tape.seek(secs);
            tape.add_cue_point();
        }
        tape.seek(0.0);
        tape.seek_to_cue_point(true, 10.0);
        assert_eq!(tape.position(), 1.0);
        tape.seek_to_cue_point(true, 10.0);
        assert_eq!(tape.position(), 2.5);
        // no cue ahead: move by the fallback distance, clamped
        tape.seek_to_cue_point(true, 1.0);
        assert_eq!(tape.position(), 3.5);
        tape.seek_to_cue_point(false, 10.0);
        assert_eq!(tape.position(), 2.5);

        tape.seek(2.4);
        tape.delete_nearest_cue_point();
        assert_eq!(tape.cue_points(), &[10_000]);
        tape.delete_all_cue_points();
        tape.seek_to_cue_point(false, 10.0);
        assert_eq!(tape.position(), 0.0);
    }

    #[test]
    fn test_rejects_bad_rate() {
        assert!(MemoryTape::new(8_000).is_err());
        assert!(MemoryTape::new(130_000).is_err());
    }
}
