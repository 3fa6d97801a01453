//! Dave sound and interrupt chip
//!
//! Cycle-stepped emulation of the Enterprise's Dave: three tone channels,
//! one noise channel, four polynomial counters, the fixed 31.25 kHz / 1 kHz /
//! 50 Hz / 1 Hz oscillators and the four-source interrupt controller.
//!
//! One call to [`Dave::advance_one_cycle`] is one Dave clock (250 kHz with an
//! 8 MHz input clock). The engine never allocates and never fails: unknown
//! port addresses are ignored on write and read back as 0xFF.

use super::polycnt::{tables, PolyTables, VariableLength};
use super::registers::{InterruptStatus, NoiseMode, Register, SoundControl, ToneMode};

/// Reload values of the fixed oscillators, in Dave cycles minus one
pub const CLK_62500_RELOAD: i32 = 3;
/// 1 kHz oscillator reload
pub const CLK_1000_RELOAD: i32 = 249;
/// 50 Hz oscillator reload
pub const CLK_50_RELOAD: i32 = 4_999;
/// 1 Hz oscillator reload
pub const CLK_1_RELOAD: i32 = 249_999;

/// Dave clock rate with the standard 8 MHz input
pub const DAVE_CLOCK_HZ: u32 = 250_000;

/// A signal inside the chip that another part of the chip can read
///
/// Tone channel distortion inputs, the noise channel input and the noise
/// channel clock are all one of these; the level is looked up every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolySource {
    /// 31.25 kHz square wave
    FixedOscillator,
    /// Output of tone channel 0
    Channel0,
    /// Output of tone channel 1
    Channel1,
    /// Output of tone channel 2
    Channel2,
    /// 4-bit polynomial counter
    Poly4,
    /// 5-bit polynomial counter
    Poly5,
    /// 7-bit polynomial counter
    Poly7,
    /// 9/11/15/17-bit polynomial counter
    PolyVariable,
}

/// Phase counter whose underflow toggles the sound interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SoundIntSource {
    /// 1 kHz oscillator
    #[default]
    Clock1000Hz,
    /// 50 Hz oscillator
    Clock50Hz,
    /// Tone channel 0
    Channel0,
    /// Tone channel 1
    Channel1,
}

/// One of Dave's four interrupt inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    /// Programmable sound interrupt
    Sound = 0,
    /// 1 Hz timer
    OneHz = 1,
    /// External input 1 (Nick video interrupt)
    Int1 = 2,
    /// External input 2
    Int2 = 3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct InterruptLine {
    pub(super) enabled: bool,
    pub(super) state: u8,
    pub(super) active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct ToneChannel {
    pub(super) state: u8,
    pub(super) prv: u8,
    pub(super) state1: u8,
    pub(super) phase: i32,
    pub(super) frqcode: i32,
    /// `None` is a plain square wave
    pub(super) input: Option<PolySource>,
    pub(super) highpass: bool,
    pub(super) ringmod: bool,
    pub(super) run: bool,
    pub(super) left: u8,
    pub(super) right: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct NoiseChannel {
    pub(super) state: u8,
    pub(super) prv: u8,
    pub(super) state1: u8,
    pub(super) state2: u8,
    pub(super) clock_source: PolySource,
    pub(super) clock_prv: u8,
    pub(super) input: PolySource,
    pub(super) lowpass: bool,
    pub(super) highpass: bool,
    pub(super) ringmod: bool,
    pub(super) left: u8,
    pub(super) right: u8,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self {
            state: 0,
            prv: 0,
            state1: 0,
            state2: 0,
            clock_source: PolySource::FixedOscillator,
            clock_prv: 0,
            input: PolySource::PolyVariable,
            lowpass: false,
            highpass: false,
            ringmod: false,
            left: 0,
            right: 0,
        }
    }
}

/// Dave chip state
#[derive(Clone)]
pub struct Dave {
    pub(super) tables: &'static PolyTables,

    pub(super) clock_div: u8,
    pub(super) clock_cnt: u8,
    pub(super) wait_mode: u8,

    pub(super) poly4_phase: i32,
    pub(super) poly5_phase: i32,
    pub(super) poly7_phase: i32,
    pub(super) poly_vl_phase: i32,
    pub(super) poly_vl_length: VariableLength,
    pub(super) poly4_state: u8,
    pub(super) poly5_state: u8,
    pub(super) poly7_state: u8,
    pub(super) poly_vl_state: u8,
    /// Noise channel reads the 7-bit counter; tone channels get the VL one
    pub(super) noise_is_7bit: bool,

    pub(super) clk_62500_phase: i32,
    pub(super) clk_1000_phase: i32,
    pub(super) clk_50_phase: i32,
    pub(super) clk_1_phase: i32,
    pub(super) clk_62500_state: u8,

    pub(super) tone: [ToneChannel; 3],
    pub(super) noise: NoiseChannel,

    pub(super) dac_left: bool,
    pub(super) dac_right: bool,
    pub(super) int_snd_source: SoundIntSource,
    pub(super) interrupts: [InterruptLine; 4],
    pub(super) irq: bool,

    pub(super) audio_output: u32,
    pub(super) pages: [u8; 4],
    pub(super) tape_feedback: bool,
    pub(super) tape_input: bool,
    pub(super) tape_input_level: bool,
    pub(super) remote: [bool; 2],
    pub(super) keyboard_row: u8,
    pub(super) keyboard_state: [u8; 16],
}

impl Dave {
    /// Create a chip in power-on state
    pub fn new() -> Self {
        let mut interrupts = [InterruptLine::default(); 4];
        interrupts[Interrupt::Int1 as usize].state = 1;
        interrupts[Interrupt::Int2 as usize].state = 1;
        let tone = ToneChannel {
            run: true,
            ..ToneChannel::default()
        };
        Self {
            tables: tables(),
            clock_div: 2,
            clock_cnt: 1,
            wait_mode: 0,
            poly4_phase: 0,
            poly5_phase: 0,
            poly7_phase: 0,
            poly_vl_phase: 0,
            poly_vl_length: VariableLength::Bits17,
            poly4_state: 0,
            poly5_state: 0,
            poly7_state: 0,
            poly_vl_state: 0,
            noise_is_7bit: false,
            clk_62500_phase: 0,
            clk_1000_phase: 0,
            clk_50_phase: 0,
            clk_1_phase: 0,
            clk_62500_state: 0,
            tone: [tone; 3],
            noise: NoiseChannel::default(),
            dac_left: false,
            dac_right: false,
            int_snd_source: SoundIntSource::Clock1000Hz,
            interrupts,
            irq: false,
            audio_output: 0,
            pages: [0; 4],
            tape_feedback: false,
            tape_input: false,
            tape_input_level: false,
            remote: [false; 2],
            keyboard_row: 0,
            keyboard_state: [0xFF; 16],
        }
    }

    /// Reset to the state after a hardware reset
    ///
    /// Clears all phases, writes zero to every register, clears all
    /// interrupts and releases every key.
    pub fn reset(&mut self) {
        self.poly4_phase = 0;
        self.poly5_phase = 0;
        self.poly7_phase = 0;
        self.poly_vl_phase = 0;
        for ch in &mut self.tone {
            ch.phase = 0;
        }
        self.clk_62500_phase = 0;
        self.clk_1000_phase = 0;
        self.clk_50_phase = 0;
        self.clk_1_phase = 0;
        for addr in 0x00..0x20 {
            self.write_register(addr, 0);
        }
        self.write_register(Register::IntCtrl.addr() as u16, 0xAA);
        self.clear_keyboard();
    }

    /// Current level (0 or 1) of an internal signal
    #[inline]
    pub fn source_level(&self, source: PolySource) -> u8 {
        match source {
            PolySource::FixedOscillator => self.clk_62500_state,
            PolySource::Channel0 => self.tone[0].state,
            PolySource::Channel1 => self.tone[1].state,
            PolySource::Channel2 => self.tone[2].state,
            PolySource::Poly4 => self.poly4_state,
            PolySource::Poly5 => self.poly5_state,
            PolySource::Poly7 => self.poly7_state,
            PolySource::PolyVariable => self.poly_vl_state,
        }
    }

    #[inline]
    fn channel_level(&self, n: usize) -> u8 {
        if n < 3 {
            self.tone[n].state
        } else {
            self.noise.state
        }
    }

    #[inline]
    fn negative_edge(&self, n: usize) -> bool {
        if n < 3 {
            self.tone[n].state < self.tone[n].prv
        } else {
            self.noise.state < self.noise.prv
        }
    }

    #[inline]
    fn int_snd_phase(&self) -> i32 {
        match self.int_snd_source {
            SoundIntSource::Clock1000Hz => self.clk_1000_phase,
            SoundIntSource::Clock50Hz => self.clk_50_phase,
            SoundIntSource::Channel0 => self.tone[0].phase,
            SoundIntSource::Channel1 => self.tone[1].phase,
        }
    }

    fn trigger(&mut self, int: Interrupt) {
        let line = &mut self.interrupts[int as usize];
        if line.active {
            return;
        }
        line.active = true;
        self.irq = true;
    }

    /// Advance one Dave cycle and return the (left, right) DAC levels
    ///
    /// Each side is in the range 0..=315 (252 from the channels plus 63 of
    /// tape feedback).
    pub fn advance_one_cycle(&mut self) -> (u16, u16) {
        let out = self.run_one_cycle();
        ((out & 0xFFFF) as u16, (out >> 16) as u16)
    }

    /// Advance one Dave cycle and return `left | right << 16`
    pub fn run_one_cycle(&mut self) -> u32 {
        let t = self.tables;

        // polynomial counters
        self.poly4_phase -= 1;
        if self.poly4_phase < 0 {
            self.poly4_phase = 14;
        }
        self.poly5_phase -= 1;
        if self.poly5_phase < 0 {
            self.poly5_phase = 30;
        }
        let clk = self.source_level(self.noise.clock_source);
        let clk_negedge = clk < self.noise.clock_prv;
        self.noise.clock_prv = clk;
        let vl_max = self.poly_vl_length.max_phase();
        if !self.noise_is_7bit {
            self.poly7_phase -= 1;
            if self.poly7_phase < 0 {
                self.poly7_phase = 126;
            }
            if clk_negedge {
                self.poly_vl_phase -= 1;
                if self.poly_vl_phase < 0 {
                    self.poly_vl_phase = vl_max;
                }
            }
        } else {
            if clk_negedge {
                self.poly7_phase -= 1;
                if self.poly7_phase < 0 {
                    self.poly7_phase = 126;
                }
            }
            self.poly_vl_phase -= 1;
            if self.poly_vl_phase < 0 {
                self.poly_vl_phase = vl_max;
            }
        }
        self.poly4_state = t.poly4[self.poly4_phase as usize];
        self.poly5_state = t.poly5[self.poly5_phase as usize];
        self.poly7_state = t.poly7[self.poly7_phase as usize];
        self.poly_vl_state = t.variable(self.poly_vl_length)[self.poly_vl_phase as usize];

        // oscillators
        self.clk_62500_phase -= 1;
        self.clk_1000_phase -= 1;
        self.clk_50_phase -= 1;
        self.clk_1_phase -= 1;
        for ch in &mut self.tone {
            if ch.run {
                ch.phase -= 1;
            }
        }

        // timer interrupts; the sound source phase is reloaded further down
        if self.int_snd_phase() < 0 {
            let line = &mut self.interrupts[Interrupt::Sound as usize];
            line.state = (line.state & 1) ^ 1;
            if line.enabled {
                self.trigger(Interrupt::Sound);
            }
        }
        if self.clk_1_phase < 0 {
            self.clk_1_phase = CLK_1_RELOAD;
            let line = &mut self.interrupts[Interrupt::OneHz as usize];
            line.state = (line.state & 1) ^ 1;
            if line.enabled {
                self.trigger(Interrupt::OneHz);
            }
        }
        if self.clk_1000_phase < 0 {
            self.clk_1000_phase = CLK_1000_RELOAD;
        }
        if self.clk_50_phase < 0 {
            self.clk_50_phase = CLK_50_RELOAD;
        }
        if self.clk_62500_phase < 0 {
            self.clk_62500_phase = CLK_62500_RELOAD;
            self.clk_62500_state ^= 1;
        }

        self.step_noise_channel();
        for n in [2, 1, 0] {
            self.step_tone_channel(n);
        }

        self.audio_output = self.mix();
        self.audio_output
    }

    fn step_noise_channel(&mut self) {
        let lp_edge = self.negative_edge(2);
        let hp_edge = self.negative_edge(0);
        let rm_level = self.channel_level(1);
        let input = self.source_level(self.noise.input);
        let ch = &mut self.noise;
        ch.prv = ch.state;
        ch.state1 = input;
        if !ch.lowpass || lp_edge {
            ch.state2 = ch.state1;
        }
        if ch.highpass && hp_edge {
            ch.state2 = 0;
        }
        ch.state = ch.state2;
        if ch.ringmod {
            ch.state ^= rm_level;
        }
    }

    /// Channel n is highpassed by channel n+1 and ring modulated by n+2
    fn step_tone_channel(&mut self, n: usize) {
        let hp_edge = self.negative_edge((n + 1) & 3);
        let rm_level = self.channel_level((n + 2) & 3);
        let input = self.tone[n].input.map(|src| self.source_level(src));
        let ch = &mut self.tone[n];
        ch.prv = ch.state;
        if ch.phase < 0 {
            ch.phase = ch.frqcode;
            ch.state1 = match input {
                None => (ch.state1 & 1) ^ 1,
                Some(level) => level,
            };
        }
        if ch.highpass && hp_edge {
            ch.state1 = 0;
        }
        ch.state = ch.state1;
        if ch.ringmod {
            ch.state ^= rm_level;
        }
    }

    fn mix(&self) -> u32 {
        let (mut l, mut r): (u32, u32) = if self.tape_feedback && self.tape_input {
            (0x3F, 0x3F)
        } else {
            (0, 0)
        };
        let gated = |side: fn(&ToneChannel) -> u8, noise: u8| -> u32 {
            let mut sum = 0u32;
            for ch in &self.tone {
                if ch.state != 0 {
                    sum += side(ch) as u32;
                }
            }
            if self.noise.state != 0 {
                sum += noise as u32;
            }
            sum
        };
        let ch0 = &self.tone[0];
        match (self.dac_left, self.dac_right) {
            (true, true) => {
                l += (ch0.left as u32) << 2;
                r += (ch0.right as u32) << 2;
            }
            (true, false) => {
                l += (ch0.left as u32) << 2;
                r += gated(|c| c.right, self.noise.right);
            }
            (false, true) => {
                r += (ch0.right as u32) << 2;
                l += gated(|c| c.left, self.noise.left);
            }
            (false, false) => {
                l += gated(|c| c.left, self.noise.left);
                r += gated(|c| c.right, self.noise.right);
            }
        }
        l | (r << 16)
    }

    fn tone_input_for(&self, mode: u8) -> Option<PolySource> {
        match mode & ToneMode::POLY_SELECT.bits() {
            0x10 => Some(PolySource::Poly4),
            0x20 => Some(PolySource::Poly5),
            0x30 if self.noise_is_7bit => Some(PolySource::PolyVariable),
            0x30 => Some(PolySource::Poly7),
            _ => None,
        }
    }

    /// Write a Dave port; only the low 5 address bits are decoded
    pub fn write_register(&mut self, addr: u16, value: u8) {
        let Some(reg) = Register::from_addr(addr) else {
            return;
        };
        match reg {
            Register::Ch0FreqLo | Register::Ch1FreqLo | Register::Ch2FreqLo => {
                let ch = &mut self.tone[(reg.addr() >> 1) as usize];
                ch.frqcode = (ch.frqcode & 0x0F00) | value as i32;
            }
            Register::Ch0FreqHi | Register::Ch1FreqHi | Register::Ch2FreqHi => {
                let input = self.tone_input_for(value);
                let mode = ToneMode::from_bits_truncate(value);
                let ch = &mut self.tone[(reg.addr() >> 1) as usize];
                ch.frqcode = (ch.frqcode & 0x00FF) | (((value & 0x0F) as i32) << 8);
                ch.input = input;
                ch.highpass = mode.contains(ToneMode::HIGHPASS);
                ch.ringmod = mode.contains(ToneMode::RINGMOD);
            }
            Register::NoiseCtrl => self.write_noise_control(value),
            Register::SoundCtrl => {
                let ctrl = SoundControl::from_bits_truncate(value);
                for (n, sync) in [SoundControl::SYNC_0, SoundControl::SYNC_1, SoundControl::SYNC_2]
                    .into_iter()
                    .enumerate()
                {
                    let ch = &mut self.tone[n];
                    if ctrl.contains(sync) {
                        ch.run = false;
                        ch.phase = ch.frqcode;
                    } else {
                        ch.run = true;
                    }
                }
                self.dac_left = ctrl.contains(SoundControl::DAC_LEFT);
                self.dac_right = ctrl.contains(SoundControl::DAC_RIGHT);
                self.int_snd_source = match value & SoundControl::INT_SELECT.bits() {
                    0x00 => SoundIntSource::Clock1000Hz,
                    0x20 => SoundIntSource::Clock50Hz,
                    0x40 => SoundIntSource::Channel0,
                    _ => SoundIntSource::Channel1,
                };
            }
            Register::Ch0Left | Register::Ch1Left | Register::Ch2Left => {
                self.tone[(reg.addr() - 0x08) as usize].left = value & 0x3F;
            }
            Register::Ch3Left => self.noise.left = value & 0x3F,
            Register::Ch0Right | Register::Ch1Right | Register::Ch2Right => {
                self.tone[(reg.addr() - 0x0C) as usize].right = value & 0x3F;
            }
            Register::Ch3Right => self.noise.right = value & 0x3F,
            Register::Page0 | Register::Page1 | Register::Page2 | Register::Page3 => {
                self.pages[(reg.addr() & 3) as usize] = value;
            }
            Register::IntCtrl => self.write_interrupt_control(value),
            Register::Keyboard => {
                self.keyboard_row = value & 0x0F;
                if value & 0x20 != 0 {
                    self.tape_feedback = !self.tape_feedback;
                }
                self.remote[0] = value & 0x40 != 0;
                self.remote[1] = value & 0x80 != 0;
            }
            Register::SysConfig => {
                self.wait_mode = (value & 0x0C) >> 2;
                self.clock_div = if value & 0x02 == 0 { 2 } else { 3 };
            }
            Register::TapeIn => {}
        }
    }

    fn write_noise_control(&mut self, value: u8) {
        let mode = NoiseMode::from_bits_truncate(value);
        self.noise.clock_source = match value & NoiseMode::CLOCK_SELECT.bits() {
            0 => PolySource::FixedOscillator,
            1 => PolySource::Channel0,
            2 => PolySource::Channel1,
            _ => PolySource::Channel2,
        };
        self.poly_vl_length = VariableLength::from_register(value);
        self.poly_vl_phase %= self.poly_vl_length.max_phase() + 1;

        // the 7-bit and variable length counters trade places between the
        // noise channel and the tone channels
        let (noise_input, from, to) = if mode.contains(NoiseMode::SWAP_7BIT) {
            (PolySource::Poly7, PolySource::Poly7, PolySource::PolyVariable)
        } else {
            (PolySource::PolyVariable, PolySource::PolyVariable, PolySource::Poly7)
        };
        self.noise_is_7bit = mode.contains(NoiseMode::SWAP_7BIT);
        self.noise.input = noise_input;
        for ch in &mut self.tone {
            if ch.input == Some(from) {
                ch.input = Some(to);
            }
        }
        self.noise.lowpass = mode.contains(NoiseMode::LOWPASS_2);
        self.noise.highpass = mode.contains(NoiseMode::HIGHPASS_0);
        self.noise.ringmod = mode.contains(NoiseMode::RINGMOD_1);
    }

    fn write_interrupt_control(&mut self, value: u8) {
        let was_active = self.interrupts.iter().any(|i| i.active);
        // enable bits are active high once inverted, clear bits come in pairs
        let tmp = value ^ 0x55;
        for (n, line) in self.interrupts.iter_mut().enumerate() {
            let shift = 2 * n;
            line.enabled = tmp & (0x01 << shift) == 0;
            if tmp & (0x03 << shift) != 0 {
                line.active = false;
            }
        }
        if was_active && !self.interrupts.iter().any(|i| i.active) {
            self.irq = false;
        }
    }

    /// Read a Dave port
    ///
    /// Write-only and unmapped addresses return 0xFF.
    pub fn read_register(&self, addr: u16) -> u8 {
        match Register::from_addr(addr) {
            Some(Register::Page0 | Register::Page1 | Register::Page2 | Register::Page3) => {
                self.pages[(addr & 3) as usize]
            }
            Some(Register::IntCtrl) => self.interrupt_status().bits(),
            Some(Register::Keyboard) => self.keyboard_state[self.keyboard_row as usize],
            Some(Register::TapeIn) => {
                let level = if self.tape_input_level { 0x40 } else { 0x00 };
                let input = if self.tape_input { 0x80 } else { 0x00 };
                0x3F | level | input
            }
            _ => 0xFF,
        }
    }

    /// Interrupt state and latch bits as seen on port 0x14
    pub fn interrupt_status(&self) -> InterruptStatus {
        let mut status = InterruptStatus::empty();
        let pairs = [
            (InterruptStatus::SOUND_STATE, InterruptStatus::SOUND_ACTIVE),
            (InterruptStatus::ONE_HZ_STATE, InterruptStatus::ONE_HZ_ACTIVE),
            (InterruptStatus::INT1_STATE, InterruptStatus::INT1_ACTIVE),
            (InterruptStatus::INT2_STATE, InterruptStatus::INT2_ACTIVE),
        ];
        for (line, (state, active)) in self.interrupts.iter().zip(pairs) {
            status.set(state, line.state & 1 != 0);
            status.set(active, line.active);
        }
        status
    }

    fn set_external_int(&mut self, int: Interrupt, level: bool) {
        let line = &mut self.interrupts[int as usize];
        let prv = line.state;
        line.state = u8::from(level);
        // trigger on a 1 -> 0 transition only
        if !line.enabled || level || prv == 0 {
            return;
        }
        self.trigger(int);
    }

    /// Drive the INT1 input (Nick video interrupt)
    pub fn set_int1_state(&mut self, level: bool) {
        self.set_external_int(Interrupt::Int1, level);
    }

    /// Drive the INT2 input
    pub fn set_int2_state(&mut self, level: bool) {
        self.set_external_int(Interrupt::Int2, level);
    }

    /// True while any latched interrupt is requesting service
    pub fn irq_line(&self) -> bool {
        self.irq
    }

    /// Update the keyboard matrix; bits 3-6 of the code select the row
    pub fn set_keyboard_state(&mut self, key_code: u8, pressed: bool) {
        let row = ((key_code & 0x78) >> 3) as usize;
        let mask = 1u8 << (key_code & 0x07);
        if pressed {
            self.keyboard_state[row] &= !mask;
        } else {
            self.keyboard_state[row] |= mask;
        }
    }

    /// Release every key
    pub fn clear_keyboard(&mut self) {
        self.keyboard_state = [0xFF; 16];
    }

    /// Feed the tape input comparator
    pub fn set_tape_input(&mut self, state: bool, level: i32) {
        self.tape_input = state;
        self.tape_input_level = level > 0;
    }

    /// Output level (0 or 1) of channel 0-3
    pub fn channel_state(&self, n: usize) -> u8 {
        self.channel_level(n & 3)
    }

    /// 12-bit frequency code of tone channel 0-2
    pub fn frequency_code(&self, n: usize) -> u16 {
        self.tone[n % 3].frqcode as u16
    }

    /// Distortion input of tone channel 0-2; `None` means square wave
    pub fn tone_input(&self, n: usize) -> Option<PolySource> {
        self.tone[n % 3].input
    }

    /// Input of the noise channel
    pub fn noise_input(&self) -> PolySource {
        self.noise.input
    }

    /// Tape remote control relays (remote 1, remote 2)
    pub fn remote_state(&self) -> (bool, bool) {
        (self.remote[0], self.remote[1])
    }

    /// Segment currently mapped to page 0-3
    pub fn memory_page(&self, page: usize) -> u8 {
        self.pages[page & 3]
    }

    /// Clock divider: 2 for an 8 MHz input, 3 for 12 MHz
    pub fn clock_div(&self) -> u8 {
        self.clock_div
    }

    /// CPU wait state mode from register 0x1F
    pub fn wait_mode(&self) -> u8 {
        self.wait_mode
    }

    /// Last value returned by [`Dave::run_one_cycle`]
    pub fn audio_output(&self) -> u32 {
        self.audio_output
    }
}

impl Default for Dave {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dave")
            .field("tone", &self.tone)
            .field("noise", &self.noise)
            .field("interrupts", &self.interrupts)
            .field("irq", &self.irq)
            .field("audio_output", &format_args!("{:#010X}", self.audio_output))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_chip() -> Dave {
        let mut dave = Dave::new();
        dave.reset();
        dave
    }

    #[test]
    fn test_frequency_and_square_mode() {
        let mut dave = reset_chip();
        dave.write_register(0x00, 0xFF);
        dave.write_register(0x01, 0x0F);
        dave.advance_one_cycle();
        assert_eq!(dave.frequency_code(0), 0x0FFF);
        assert_eq!(dave.tone_input(0), None);
    }

    #[test]
    fn test_distortion_select() {
        let mut dave = reset_chip();
        dave.write_register(0x03, 0x10);
        assert_eq!(dave.tone_input(1), Some(PolySource::Poly4));
        dave.write_register(0x03, 0x20);
        assert_eq!(dave.tone_input(1), Some(PolySource::Poly5));
        dave.write_register(0x03, 0x30);
        assert_eq!(dave.tone_input(1), Some(PolySource::Poly7));
    }

    #[test]
    fn test_swap_repoints_tone_channels() {
        let mut dave = reset_chip();
        dave.write_register(0x01, 0x30);
        dave.write_register(0x05, 0x30);
        dave.write_register(0x06, 0x10);
        assert_eq!(dave.noise_input(), PolySource::Poly7);
        assert_eq!(dave.tone_input(0), Some(PolySource::PolyVariable));
        assert_eq!(dave.tone_input(2), Some(PolySource::PolyVariable));
        // a channel selecting the 7-bit counter now gets the VL one
        dave.write_register(0x03, 0x30);
        assert_eq!(dave.tone_input(1), Some(PolySource::PolyVariable));

        dave.write_register(0x06, 0x00);
        assert_eq!(dave.noise_input(), PolySource::PolyVariable);
        for n in 0..3 {
            assert_eq!(dave.tone_input(n), Some(PolySource::Poly7));
        }
    }

    #[test]
    fn test_square_wave_period() {
        let mut dave = reset_chip();
        // frequency code 4 -> output toggles every 5 cycles
        dave.write_register(0x00, 4);
        dave.write_register(0x08, 0x3F);
        let mut toggles = 0;
        let mut prev = dave.channel_state(0);
        for _ in 0..50 {
            dave.advance_one_cycle();
            let now = dave.channel_state(0);
            if now != prev {
                toggles += 1;
            }
            prev = now;
        }
        assert_eq!(toggles, 10);
    }

    #[test]
    fn test_mix_gated_volumes() {
        let mut dave = reset_chip();
        dave.write_register(0x08, 0x20);
        dave.write_register(0x0C, 0x10);
        dave.write_register(0x00, 100);
        // first reload happens on the first cycle and raises the output
        let (l, r) = dave.advance_one_cycle();
        assert_eq!(dave.channel_state(0), 1);
        assert_eq!((l, r), (0x20, 0x10));
    }

    #[test]
    fn test_dac_mode_uses_channel0_volume() {
        let mut dave = reset_chip();
        dave.write_register(0x07, 0x18);
        dave.write_register(0x08, 0x3F);
        dave.write_register(0x0C, 0x01);
        let (l, r) = dave.advance_one_cycle();
        assert_eq!(l, 0x3F << 2);
        assert_eq!(r, 0x01 << 2);
    }

    #[test]
    fn test_tape_feedback_offset() {
        let mut dave = reset_chip();
        dave.set_tape_input(true, 1);
        dave.write_register(0x15, 0x20);
        let (l, r) = dave.advance_one_cycle();
        assert_eq!((l, r), (0x3F, 0x3F));
        assert_eq!(dave.read_register(0x16), 0xFF);
    }

    #[test]
    fn test_unmapped_port_reads_sentinel() {
        let mut dave = reset_chip();
        for addr in [0x00u16, 0x07, 0x17, 0x1E, 0x1F] {
            assert_eq!(dave.read_register(addr), 0xFF);
        }
        // ignored writes leave state untouched
        let before = dave.audio_output();
        dave.write_register(0x18, 0x55);
        assert_eq!(dave.audio_output(), before);
    }

    #[test]
    fn test_keyboard_matrix() {
        let mut dave = reset_chip();
        dave.set_keyboard_state(0x2B, true); // row 5, bit 3
        dave.write_register(0x15, 0x05);
        assert_eq!(dave.read_register(0x15), 0xF7);
        dave.set_keyboard_state(0x2B, false);
        assert_eq!(dave.read_register(0x15), 0xFF);
    }

    #[test]
    fn test_one_khz_interrupt_latches_once() {
        let mut dave = reset_chip();
        // enable sound interrupt (bit 0 set), leave others disabled
        dave.write_register(0x14, 0x01);
        let mut fired = 0;
        let mut prev = false;
        for _ in 0..1000 {
            dave.advance_one_cycle();
            let active = dave.interrupt_status().contains(InterruptStatus::SOUND_ACTIVE);
            if active && !prev {
                fired += 1;
            }
            prev = active;
        }
        assert_eq!(fired, 1);
        assert!(dave.irq_line());
        // acknowledge: clear bit for the pair, keep enabled
        dave.write_register(0x14, 0x03);
        assert!(!dave.irq_line());
    }

    #[test]
    fn test_external_interrupt_edge() {
        let mut dave = reset_chip();
        dave.write_register(0x14, 0x10);
        dave.set_int1_state(true);
        assert!(!dave.irq_line());
        dave.set_int1_state(false);
        assert!(dave.irq_line());
        assert!(dave.interrupt_status().contains(InterruptStatus::INT1_ACTIVE));
    }

    #[test]
    fn test_interrupts_latch_only_on_enabled_edges() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        const LINES: [(InterruptStatus, InterruptStatus); 4] = [
            (InterruptStatus::SOUND_STATE, InterruptStatus::SOUND_ACTIVE),
            (InterruptStatus::ONE_HZ_STATE, InterruptStatus::ONE_HZ_ACTIVE),
            (InterruptStatus::INT1_STATE, InterruptStatus::INT1_ACTIVE),
            (InterruptStatus::INT2_STATE, InterruptStatus::INT2_ACTIVE),
        ];

        let mut rng = StdRng::seed_from_u64(0x1401);
        let mut dave = reset_chip();
        let mut enabled = [false; 4];
        let mut external_latches = 0;

        for step in 0..20_000 {
            let before = dave.interrupt_status();
            let op = rng.gen_range(0..4);
            // line driven by this step, if external
            let mut driven = None;
            match op {
                0 | 1 => {
                    let n = 2 + op;
                    let level = rng.gen_bool(0.5);
                    if n == 2 {
                        dave.set_int1_state(level);
                    } else {
                        dave.set_int2_state(level);
                    }
                    driven = Some((n, level));
                }
                2 => {
                    // mostly enable without acknowledging
                    let value = if rng.gen_bool(0.7) {
                        rng.gen::<u8>() & 0x55
                    } else {
                        rng.gen::<u8>()
                    };
                    dave.write_register(0x14, value);
                    for (n, on) in enabled.iter_mut().enumerate() {
                        *on = value & (1 << (2 * n)) != 0;
                    }
                }
                _ => {
                    for _ in 0..rng.gen_range(1..200) {
                        dave.advance_one_cycle();
                    }
                }
            }
            let after = dave.interrupt_status();

            for (n, &(state, active)) in LINES.iter().enumerate() {
                let rose = !before.contains(active) && after.contains(active);
                if rose {
                    assert!(enabled[n], "step {step}: disabled line {n} latched");
                }
                if n < 2 {
                    assert!(!rose || op == 3, "step {step}: timer {n} latched outside a cycle");
                    continue;
                }
                let falling = driven == Some((n, false)) && before.contains(state);
                assert_eq!(
                    rose,
                    falling && enabled[n] && !before.contains(active),
                    "step {step}: line {n} before {before:?} after {after:?}"
                );
                if rose {
                    external_latches += 1;
                }
            }
            if LINES.iter().any(|&(_, active)| after.contains(active)) {
                assert!(dave.irq_line(), "step {step}: latched without irq");
            }
        }
        assert!(external_latches > 100, "{external_latches} external latches");
    }

    #[test]
    fn test_system_config_and_pages() {
        let mut dave = reset_chip();
        dave.write_register(0x1F, 0x0E);
        assert_eq!(dave.clock_div(), 3);
        assert_eq!(dave.wait_mode(), 3);
        dave.write_register(0x12, 0xFE);
        assert_eq!(dave.read_register(0x12), 0xFE);
        assert_eq!(dave.memory_page(2), 0xFE);
    }

    #[test]
    fn test_remote_relays() {
        let mut dave = reset_chip();
        dave.write_register(0x15, 0x40);
        assert_eq!(dave.remote_state(), (true, false));
        dave.write_register(0x15, 0x80);
        assert_eq!(dave.remote_state(), (false, true));
    }
}
