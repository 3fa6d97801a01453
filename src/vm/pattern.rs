//! Colour bar generator standing in for the Nick chip
//!
//! Emits one PAL-timed scanline every 16 Dave cycles (15 625 lines/s) with
//! 312 lines per field and a three-line vsync pulse that pulls INT1 low.

use super::machine::VideoChip;
use crate::snapshot::{ChunkReader, ChunkWriter};
use crate::video::VideoSink;
use crate::Result;

/// Dave cycles per scanline
pub const LINE_CYCLES: u8 = 16;
/// Lines per field
pub const FIELD_LINES: u16 = 312;
/// First line of the vsync pulse
pub const VSYNC_START: u16 = 300;
/// First line after the vsync pulse
pub const VSYNC_END: u16 = 303;

const TOP_BORDER: u16 = 24;
const BOTTOM_BORDER: u16 = 264;
const BORDER_COLOUR: u8 = 0x49;
const BAR_COLOURS: [u8; 8] = [0xFF, 0x3F, 0xED, 0x2D, 0xD2, 0x12, 0xC0, 0x00];
/// 16-pixel groups per line
const GROUPS: usize = 48;
/// Fields between two shifts of the bars
const SHIFT_FIELDS: u64 = 16;

/// Test pattern video chip
#[derive(Debug, Clone)]
pub struct TestPatternChip {
    cycle: u8,
    line: u16,
    field: u64,
    interlaced: bool,
    encoded: Vec<u8>,
}

impl TestPatternChip {
    /// Create a generator; `interlaced` moves every second vsync to mid-line
    pub fn new(interlaced: bool) -> Self {
        Self {
            cycle: 0,
            line: 0,
            field: 0,
            interlaced,
            encoded: Vec::with_capacity(2 * GROUPS),
        }
    }

    /// Fields completed so far
    pub fn field(&self) -> u64 {
        self.field
    }

    fn int1_level(&self) -> bool {
        !(VSYNC_START..VSYNC_END).contains(&self.line)
    }

    fn render_line(&mut self) {
        self.encoded.clear();
        let border = self.line < TOP_BORDER || self.line >= BOTTOM_BORDER;
        let shift = (self.field / SHIFT_FIELDS) as usize;
        for group in 0..GROUPS {
            let colour = if border || group < 4 || group >= GROUPS - 4 {
                BORDER_COLOUR
            } else {
                BAR_COLOURS[((group - 4) / 5 + shift) % BAR_COLOURS.len()]
            };
            self.encoded.extend_from_slice(&[0x01, colour]);
        }
    }
}

impl VideoChip for TestPatternChip {
    fn step(&mut self, sink: &mut dyn VideoSink) -> bool {
        self.cycle += 1;
        if self.cycle < LINE_CYCLES {
            return self.int1_level();
        }
        self.cycle = 0;
        self.render_line();
        sink.draw_line(&self.encoded);

        self.line += 1;
        if self.line == VSYNC_START {
            let slot = if self.interlaced && self.field & 1 != 0 { 30 } else { 0 };
            sink.notify_field_sync(true, slot);
        } else if self.line == VSYNC_END {
            sink.notify_field_sync(false, 0);
        } else if self.line == FIELD_LINES {
            self.line = 0;
            self.field += 1;
        }
        self.int1_level()
    }

    fn reset(&mut self) {
        self.cycle = 0;
        self.line = 0;
        self.field = 0;
    }

    fn save_state(&self, w: &mut ChunkWriter) {
        w.write_u8(self.cycle);
        w.write_u32(u32::from(self.line));
        w.write_u64(self.field);
        w.write_bool(self.interlaced);
    }

    fn load_state(&mut self, r: &mut ChunkReader<'_>) -> Result<()> {
        let cycle = r.read_u8()?;
        let line = r.read_u32()?;
        let field = r.read_u64()?;
        let interlaced = r.read_bool()?;
        if cycle >= LINE_CYCLES || line >= u32::from(FIELD_LINES) {
            return Err(crate::Error::Inconsistent(format!(
                "video position {line}:{cycle}"
            )));
        }
        self.cycle = cycle;
        self.line = line as u16;
        self.field = field;
        self.interlaced = interlaced;
        Ok(())
    }
}
