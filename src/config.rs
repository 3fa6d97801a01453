//! Emulator configuration
//!
//! Settings are grouped the way a frontend presents them. Every field has a
//! default, so a JSON file only needs the keys it changes:
//!
//! ```json
//! { "sound": { "sample_rate": 48000 }, "display": { "half_frame": true } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::video::PixelFormat;
use crate::{Error, Result};

/// Sound output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SoundConfig {
    /// Host sample rate in Hz
    pub sample_rate: u32,
    /// Use the windowed-sinc resampler
    pub high_quality: bool,
    /// Cutoff of the first DC blocking stage in Hz
    pub dc_block_freq1: f32,
    /// Cutoff of the second DC blocking stage in Hz
    pub dc_block_freq2: f32,
    /// Output volume, 0.0 to 1.0
    pub volume: f32,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            high_quality: true,
            dc_block_freq1: 10.0,
            dc_block_freq2: 10.0,
            volume: 0.7,
        }
    }
}

/// Display settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DisplayConfig {
    /// Host pixel format
    pub pixel_format: PixelFormat,
    /// Half-height output instead of line doubling
    pub half_frame: bool,
    /// Raster lines cropped at the top and at the bottom
    pub border_lines: u32,
    /// Render into a host-provided software framebuffer
    pub software_framebuffer: bool,
}

impl DisplayConfig {
    /// Viewport `(x1, y1, x2, y2)` after cropping the border lines
    pub fn viewport(&self) -> (usize, usize, usize, usize) {
        let crop = (self.border_lines.min(MAX_BORDER_LINES)) as usize;
        (0, crop, 767, 575 - crop)
    }
}

/// Execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct VmConfig {
    /// 0 runs only granted time; above 0 free-runs at this percentage
    pub speed_percentage: u32,
    /// Host frame time in microseconds
    pub timeslice_us: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            speed_percentage: 0,
            timeslice_us: 20_000,
        }
    }
}

/// Complete emulator configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EmulatorConfig {
    /// Sound output
    pub sound: SoundConfig,
    /// Display
    pub display: DisplayConfig,
    /// Execution
    pub vm: VmConfig,
}

/// Most lines that may be cropped at each edge
pub const MAX_BORDER_LINES: u32 = 96;

impl EmulatorConfig {
    /// Parse and validate a JSON document
    ///
    /// # Errors
    ///
    /// `Error::Config` on malformed JSON or out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    ///
    /// # Errors
    ///
    /// `Error::Io` if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every value against its accepted range
    ///
    /// # Errors
    ///
    /// `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let s = &self.sound;
        if !(8_000..=192_000).contains(&s.sample_rate) {
            return Err(Error::Config(format!(
                "sound.sample_rate {} out of range 8000..=192000",
                s.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&s.volume) {
            return Err(Error::Config(format!("sound.volume {} out of range 0..=1", s.volume)));
        }
        let dc_freqs = [
            ("dc_block_freq1", s.dc_block_freq1),
            ("dc_block_freq2", s.dc_block_freq2),
        ];
        for (name, freq) in dc_freqs {
            if !(1.0..=1000.0).contains(&freq) {
                return Err(Error::Config(format!("sound.{name} {freq} out of range 1..=1000")));
            }
        }
        if self.display.border_lines > MAX_BORDER_LINES {
            return Err(Error::Config(format!(
                "display.border_lines {} exceeds {MAX_BORDER_LINES}",
                self.display.border_lines
            )));
        }
        if self.vm.speed_percentage > 1000 {
            return Err(Error::Config(format!(
                "vm.speed_percentage {} exceeds 1000",
                self.vm.speed_percentage
            )));
        }
        if !(1_000..=1_000_000).contains(&self.vm.timeslice_us) {
            return Err(Error::Config(format!(
                "vm.timeslice_us {} out of range 1000..=1000000",
                self.vm.timeslice_us
            )));
        }
        Ok(())
    }

    /// Apply one host environment variable
    ///
    /// Returns `true` if the key is known and its value was accepted.
    pub fn apply_host_variable(&mut self, key: &str, value: &str) -> bool {
        let applied = match key {
            "ep128emu_swfb" => set(&mut self.display.software_framebuffer, parse_switch(value)),
            "ep128emu_half_frame" => set(&mut self.display.half_frame, parse_switch(value)),
            "ep128emu_sound_hq" => set(&mut self.sound.high_quality, parse_switch(value)),
            "ep128emu_borders" => set(
                &mut self.display.border_lines,
                value.trim().parse::<u32>().ok().filter(|&n| n <= MAX_BORDER_LINES),
            ),
            "ep128emu_volume" => set(
                &mut self.sound.volume,
                value
                    .trim()
                    .trim_end_matches('%')
                    .parse::<u32>()
                    .ok()
                    .filter(|&n| n <= 100)
                    .map(|n| n as f32 / 100.0),
            ),
            _ => return false,
        };
        if !applied {
            tracing::warn!(key, value, "ignoring invalid host variable");
        }
        applied
    }
}

fn set<T>(field: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *field = v;
            true
        }
        None => false,
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim() {
        "enabled" | "on" | "true" | "1" => Some(true),
        "disabled" | "off" | "false" | "0" => Some(false),
        _ => None,
    }
}
