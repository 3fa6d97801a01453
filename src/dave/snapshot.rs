//! Dave state chunk
//!
//! A flat sequence of fixed-width fields. Which signal feeds a channel is
//! written as a selector byte and turned back into a [`PolySource`] on load;
//! phases are reduced modulo their table length and frequency codes masked
//! to 12 bits, so a hand-edited chunk cannot push the engine out of range.

use super::chip::{
    Dave, PolySource, SoundIntSource, CLK_1000_RELOAD, CLK_1_RELOAD, CLK_50_RELOAD,
    CLK_62500_RELOAD,
};
use super::polycnt::VariableLength;
use crate::snapshot::{ChunkReader, ChunkType, ChunkWriter, Snapshot};
use crate::{Error, Result};

/// Version tag at the start of the chunk
pub const DAVE_STATE_VERSION: u32 = 0x0100_0000;

fn tone_selector(input: Option<PolySource>) -> u8 {
    match input {
        Some(PolySource::Poly4) => 4,
        Some(PolySource::Poly5) => 5,
        Some(PolySource::Poly7) => 7,
        Some(PolySource::PolyVariable) => 17,
        _ => 0,
    }
}

fn tone_from_selector(sel: u8) -> Option<PolySource> {
    match sel {
        0 => None,
        4 => Some(PolySource::Poly4),
        5 => Some(PolySource::Poly5),
        7 => Some(PolySource::Poly7),
        _ => Some(PolySource::PolyVariable),
    }
}

fn bit(r: &mut ChunkReader<'_>) -> Result<u8> {
    Ok(u8::from(r.read_u8()? != 0))
}

impl Dave {
    /// Serialize the complete chip state
    pub fn save_state(&self, w: &mut ChunkWriter) {
        w.write_u32(DAVE_STATE_VERSION);
        w.write_u8(self.clock_div);
        w.write_u8(self.clock_cnt);
        w.write_u8(self.poly_vl_length.bits());
        w.write_u32(self.poly4_phase as u32);
        w.write_u32(self.poly5_phase as u32);
        w.write_u32(self.poly7_phase as u32);
        w.write_u32(self.poly_vl_phase as u32);
        w.write_u32(self.poly_vl_length.max_phase() as u32);
        w.write_u8(self.poly4_state);
        w.write_u8(self.poly5_state);
        w.write_u8(self.poly7_state);
        w.write_u8(self.poly_vl_state);
        w.write_u32(self.clk_62500_phase as u32);
        w.write_u32(self.clk_1000_phase as u32);
        w.write_u32(self.clk_50_phase as u32);
        w.write_u32(self.clk_1_phase as u32);
        w.write_u8(self.clk_62500_state);
        for ch in &self.tone {
            w.write_u8(ch.state);
            w.write_u8(ch.prv);
            w.write_u8(ch.state1);
            w.write_u32(ch.phase as u32);
            w.write_u32(ch.frqcode as u32);
            w.write_u8(tone_selector(ch.input));
            w.write_bool(ch.highpass);
            w.write_bool(ch.ringmod);
            w.write_bool(ch.run);
            w.write_u8(ch.left);
            w.write_u8(ch.right);
        }
        let n = &self.noise;
        w.write_u8(n.state);
        w.write_u8(n.prv);
        w.write_u8(n.state1);
        w.write_u8(n.state2);
        w.write_u8(match n.clock_source {
            PolySource::Channel0 => 0,
            PolySource::Channel1 => 1,
            PolySource::Channel2 => 2,
            _ => 3,
        });
        w.write_u8(n.clock_prv);
        w.write_bool(self.noise_is_7bit);
        w.write_u8(if n.input == PolySource::Poly7 { 7 } else { 17 });
        w.write_bool(n.lowpass);
        w.write_bool(n.highpass);
        w.write_bool(n.ringmod);
        w.write_u8(n.left);
        w.write_u8(n.right);
        w.write_bool(self.dac_left);
        w.write_bool(self.dac_right);
        w.write_u8(match self.int_snd_source {
            SoundIntSource::Channel0 => 0,
            SoundIntSource::Channel1 => 1,
            SoundIntSource::Clock50Hz => 2,
            SoundIntSource::Clock1000Hz => 3,
        });
        for line in &self.interrupts {
            w.write_bool(line.enabled);
        }
        for line in &self.interrupts {
            w.write_u8(line.state);
        }
        for line in &self.interrupts {
            w.write_bool(line.active);
        }
        w.write_u32(self.audio_output);
        w.write_bytes(&self.pages);
        w.write_bool(self.tape_feedback);
        w.write_bool(self.tape_input);
        w.write_bool(self.tape_input_level);
        w.write_u8(self.keyboard_row);
        w.write_bytes(&self.keyboard_state);
    }

    /// Restore chip state from a chunk written by [`Dave::save_state`]
    ///
    /// On any error the chip is left in its reset state.
    pub fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let mut next = Dave::new();
        next.reset();
        match next.read_fields(&mut ChunkReader::new(data)) {
            Ok(()) => {
                *self = next;
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Dave snapshot rejected: {err}");
                self.reset();
                Err(err)
            }
        }
    }

    fn read_fields(&mut self, r: &mut ChunkReader<'_>) -> Result<()> {
        let version = r.read_u32()?;
        if version != DAVE_STATE_VERSION {
            return Err(Error::SnapshotVersion {
                chunk: "Dave",
                found: version,
            });
        }
        self.clock_div = (r.read_u8()? & 1) | 2;
        self.clock_cnt = r.read_u8()? & 3;
        let length = VariableLength::from_bits(r.read_u8()?);
        let len = length.table_len() as u32;
        self.poly_vl_length = length;
        self.poly4_phase = (r.read_u32()? % 15) as i32;
        self.poly5_phase = (r.read_u32()? % 31) as i32;
        self.poly7_phase = (r.read_u32()? % 127) as i32;
        self.poly_vl_phase = (r.read_u32()? % len) as i32;
        if r.read_u32()? != len - 1 {
            return Err(Error::Inconsistent(
                "variable length counter size does not match its table".into(),
            ));
        }
        self.poly4_state = bit(r)?;
        self.poly5_state = bit(r)?;
        self.poly7_state = bit(r)?;
        self.poly_vl_state = bit(r)?;
        self.clk_62500_phase = (r.read_u32()? % (CLK_62500_RELOAD as u32 + 1)) as i32;
        self.clk_1000_phase = (r.read_u32()? % (CLK_1000_RELOAD as u32 + 1)) as i32;
        self.clk_50_phase = (r.read_u32()? % (CLK_50_RELOAD as u32 + 1)) as i32;
        self.clk_1_phase = (r.read_u32()? % (CLK_1_RELOAD as u32 + 1)) as i32;
        self.clk_62500_state = bit(r)?;
        for ch in &mut self.tone {
            ch.state = bit(r)?;
            ch.prv = bit(r)?;
            ch.state1 = bit(r)?;
            ch.phase = (r.read_u32()? & 0x0FFF) as i32;
            ch.frqcode = (r.read_u32()? & 0x0FFF) as i32;
            ch.input = tone_from_selector(r.read_u8()?);
            ch.highpass = r.read_bool()?;
            ch.ringmod = r.read_bool()?;
            ch.run = r.read_bool()?;
            ch.left = r.read_u8()? & 0x3F;
            ch.right = r.read_u8()? & 0x3F;
        }
        self.noise.state = bit(r)?;
        self.noise.prv = bit(r)?;
        self.noise.state1 = bit(r)?;
        self.noise.state2 = bit(r)?;
        self.noise.clock_source = match r.read_u8()? {
            0 => PolySource::Channel0,
            1 => PolySource::Channel1,
            2 => PolySource::Channel2,
            _ => PolySource::FixedOscillator,
        };
        self.noise.clock_prv = bit(r)?;
        self.noise_is_7bit = r.read_bool()?;
        self.noise.input = if r.read_u8()? == 7 {
            PolySource::Poly7
        } else {
            PolySource::PolyVariable
        };
        self.noise.lowpass = r.read_bool()?;
        self.noise.highpass = r.read_bool()?;
        self.noise.ringmod = r.read_bool()?;
        self.noise.left = r.read_u8()? & 0x3F;
        self.noise.right = r.read_u8()? & 0x3F;
        self.dac_left = r.read_bool()?;
        self.dac_right = r.read_bool()?;
        self.int_snd_source = match r.read_u8()? {
            0 => SoundIntSource::Channel0,
            1 => SoundIntSource::Channel1,
            2 => SoundIntSource::Clock50Hz,
            _ => SoundIntSource::Clock1000Hz,
        };
        for line in &mut self.interrupts {
            line.enabled = r.read_bool()?;
        }
        for line in &mut self.interrupts {
            line.state = bit(r)?;
        }
        for line in &mut self.interrupts {
            line.active = r.read_bool()?;
        }
        self.irq = self.interrupts.iter().any(|i| i.active);
        self.audio_output = r.read_u32()? & 0x01FF_01FF;
        for page in &mut self.pages {
            *page = r.read_u8()?;
        }
        self.tape_feedback = r.read_bool()?;
        self.tape_input = r.read_bool()?;
        self.tape_input_level = r.read_bool()?;
        self.keyboard_row = r.read_u8()? & 0x0F;
        for row in &mut self.keyboard_state {
            *row = r.read_u8()?;
        }
        r.finish()
    }

    /// Add a Dave chunk to `snapshot`
    pub fn save_to_snapshot(&self, snapshot: &mut Snapshot) {
        let mut w = ChunkWriter::new();
        self.save_state(&mut w);
        snapshot.add_chunk(ChunkType::DaveState, w.into_inner());
    }

    /// Serialized state as a standalone byte vector
    pub fn state_bytes(&self) -> Vec<u8> {
        let mut w = ChunkWriter::new();
        self.save_state(&mut w);
        w.into_inner()
    }
}
