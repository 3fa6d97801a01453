//! Dave Register Definitions
//!
//! Dave decodes the low five address bits. 0x00-0x0F drive sound
//! generation, 0x10-0x13 are the memory paging registers, 0x14-0x16 the
//! interrupt, keyboard and tape ports, and 0x1F the system configuration.

use bitflags::bitflags;
use std::fmt;

/// Dave register address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Channel 0 frequency (low byte) - 0x00
    Ch0FreqLo = 0x00,
    /// Channel 0 frequency (high nibble) and distortion - 0x01
    Ch0FreqHi = 0x01,
    /// Channel 1 frequency (low byte) - 0x02
    Ch1FreqLo = 0x02,
    /// Channel 1 frequency (high nibble) and distortion - 0x03
    Ch1FreqHi = 0x03,
    /// Channel 2 frequency (low byte) - 0x04
    Ch2FreqLo = 0x04,
    /// Channel 2 frequency (high nibble) and distortion - 0x05
    Ch2FreqHi = 0x05,
    /// Noise channel control - 0x06
    NoiseCtrl = 0x06,
    /// Sync, DAC mode and sound interrupt source - 0x07
    SoundCtrl = 0x07,
    /// Channel 0 left volume - 0x08
    Ch0Left = 0x08,
    /// Channel 1 left volume - 0x09
    Ch1Left = 0x09,
    /// Channel 2 left volume - 0x0A
    Ch2Left = 0x0A,
    /// Channel 3 left volume - 0x0B
    Ch3Left = 0x0B,
    /// Channel 0 right volume - 0x0C
    Ch0Right = 0x0C,
    /// Channel 1 right volume - 0x0D
    Ch1Right = 0x0D,
    /// Channel 2 right volume - 0x0E
    Ch2Right = 0x0E,
    /// Channel 3 right volume - 0x0F
    Ch3Right = 0x0F,
    /// Memory page 0 segment - 0x10
    Page0 = 0x10,
    /// Memory page 1 segment - 0x11
    Page1 = 0x11,
    /// Memory page 2 segment - 0x12
    Page2 = 0x12,
    /// Memory page 3 segment - 0x13
    Page3 = 0x13,
    /// Interrupt control (write) / status (read) - 0x14
    IntCtrl = 0x14,
    /// Keyboard row select, tape feedback and remote control - 0x15
    Keyboard = 0x15,
    /// Tape input (read only) - 0x16
    TapeIn = 0x16,
    /// System configuration - 0x1F
    SysConfig = 0x1F,
}

impl Register {
    /// Convert a port address to a register; only the low 5 bits are decoded
    pub fn from_addr(addr: u16) -> Option<Self> {
        use Register::*;
        Some(match addr & 0x1F {
            0x00 => Ch0FreqLo,
            0x01 => Ch0FreqHi,
            0x02 => Ch1FreqLo,
            0x03 => Ch1FreqHi,
            0x04 => Ch2FreqLo,
            0x05 => Ch2FreqHi,
            0x06 => NoiseCtrl,
            0x07 => SoundCtrl,
            0x08 => Ch0Left,
            0x09 => Ch1Left,
            0x0A => Ch2Left,
            0x0B => Ch3Left,
            0x0C => Ch0Right,
            0x0D => Ch1Right,
            0x0E => Ch2Right,
            0x0F => Ch3Right,
            0x10 => Page0,
            0x11 => Page1,
            0x12 => Page2,
            0x13 => Page3,
            0x14 => IntCtrl,
            0x15 => Keyboard,
            0x16 => TapeIn,
            0x1F => SysConfig,
            _ => return None,
        })
    }

    /// Get the register address value
    pub fn addr(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::Ch0FreqLo => "Channel 0 Frequency Low",
            Register::Ch0FreqHi => "Channel 0 Frequency High",
            Register::Ch1FreqLo => "Channel 1 Frequency Low",
            Register::Ch1FreqHi => "Channel 1 Frequency High",
            Register::Ch2FreqLo => "Channel 2 Frequency Low",
            Register::Ch2FreqHi => "Channel 2 Frequency High",
            Register::NoiseCtrl => "Noise Control",
            Register::SoundCtrl => "Sound Control",
            Register::Ch0Left => "Channel 0 Left Volume",
            Register::Ch1Left => "Channel 1 Left Volume",
            Register::Ch2Left => "Channel 2 Left Volume",
            Register::Ch3Left => "Channel 3 Left Volume",
            Register::Ch0Right => "Channel 0 Right Volume",
            Register::Ch1Right => "Channel 1 Right Volume",
            Register::Ch2Right => "Channel 2 Right Volume",
            Register::Ch3Right => "Channel 3 Right Volume",
            Register::Page0 => "Memory Page 0",
            Register::Page1 => "Memory Page 1",
            Register::Page2 => "Memory Page 2",
            Register::Page3 => "Memory Page 3",
            Register::IntCtrl => "Interrupt Control",
            Register::Keyboard => "Keyboard / Tape Control",
            Register::TapeIn => "Tape Input",
            Register::SysConfig => "System Configuration",
        };
        write!(f, "{:#04X} ({name})", self.addr())
    }
}

bitflags! {
    /// Tone channel high byte (registers 0x01, 0x03, 0x05)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ToneMode: u8 {
        /// Frequency bits 8-11
        const FREQ_HI = 0x0F;
        /// Polynomial counter select (0 = square wave)
        const POLY_SELECT = 0x30;
        /// Highpass filter with the next channel
        const HIGHPASS = 0x40;
        /// Ring modulation with the channel after next
        const RINGMOD = 0x80;
    }
}

bitflags! {
    /// Noise channel control (register 0x06)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NoiseMode: u8 {
        /// Clock source select
        const CLOCK_SELECT = 0x03;
        /// Variable length counter width select
        const LENGTH_SELECT = 0x0C;
        /// Swap the 7-bit and variable length counters
        const SWAP_7BIT = 0x10;
        /// Lowpass filter with channel 2
        const LOWPASS_2 = 0x20;
        /// Highpass filter with channel 0
        const HIGHPASS_0 = 0x40;
        /// Ring modulation with channel 1
        const RINGMOD_1 = 0x80;
    }
}

bitflags! {
    /// Sound control (register 0x07)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SoundControl: u8 {
        /// Hold channel 0 in sync
        const SYNC_0 = 0x01;
        /// Hold channel 1 in sync
        const SYNC_1 = 0x02;
        /// Hold channel 2 in sync
        const SYNC_2 = 0x04;
        /// Left output in DAC mode
        const DAC_LEFT = 0x08;
        /// Right output in DAC mode
        const DAC_RIGHT = 0x10;
        /// Sound interrupt source select
        const INT_SELECT = 0x60;
    }
}

bitflags! {
    /// Interrupt status as read from port 0x14
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptStatus: u8 {
        /// Sound interrupt source level
        const SOUND_STATE = 0x01;
        /// Sound interrupt latched
        const SOUND_ACTIVE = 0x02;
        /// 1 Hz source level
        const ONE_HZ_STATE = 0x04;
        /// 1 Hz interrupt latched
        const ONE_HZ_ACTIVE = 0x08;
        /// INT1 (video) input level
        const INT1_STATE = 0x10;
        /// INT1 latched
        const INT1_ACTIVE = 0x20;
        /// INT2 input level
        const INT2_STATE = 0x40;
        /// INT2 latched
        const INT2_ACTIVE = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_conversion() {
        assert_eq!(Register::from_addr(0x00), Some(Register::Ch0FreqLo));
        assert_eq!(Register::from_addr(0xB4), Some(Register::IntCtrl));
        assert_eq!(Register::from_addr(0x17), None);
        assert_eq!(Register::from_addr(0x3F), Some(Register::SysConfig));
    }

    #[test]
    fn test_register_display() {
        assert_eq!(
            Register::NoiseCtrl.to_string(),
            "0x06 (Noise Control)"
        );
    }

    #[test]
    fn test_tone_mode_bits() {
        let mode = ToneMode::from_bits_truncate(0xCF);
        assert!(mode.contains(ToneMode::HIGHPASS | ToneMode::RINGMOD));
        assert_eq!((mode & ToneMode::POLY_SELECT).bits(), 0);
    }
}
