//! Machine boundary and the Dave reference machine
//!
//! [`Machine`] is everything the synchronizer needs from an emulated
//! computer. [`DaveMachine`] implements it around the Dave chip: it owns the
//! resampler, an optional tape and an optional [`VideoChip`], and layers
//! demo recording and playback over the keyboard.

use std::sync::Arc;

use super::demo::{DemoEvent, DemoPlayer, DemoRecorder};
use crate::audio::{new_resampler, Resampler, SampleRing};
use crate::config::SoundConfig;
use crate::dave::{Dave, DAVE_CLOCK_HZ};
use crate::snapshot::{ChunkReader, ChunkType, ChunkWriter, Snapshot};
use crate::tape::Tape;
use crate::video::VideoSink;
use crate::{Error, Result};

/// Version tag of the machine configuration and state chunks
pub const MACHINE_STATE_VERSION: u32 = 0x0100_0000;

/// One machine step in 2^-32 units
const STEP: i64 = 1 << 32;

/// Receives the finished demo snapshot when recording stops
pub type DemoSink = Box<dyn FnOnce(Snapshot) + Send>;

/// Snapshot of machine-side status for the host
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MachineStatus {
    /// Tape position in seconds
    pub tape_position: f64,
    /// Tape length in seconds
    pub tape_length: f64,
    /// Play pressed
    pub tape_playing: bool,
    /// Record pressed on a writable tape
    pub tape_recording: bool,
    /// Remote relay closed
    pub tape_motor: bool,
    /// Demo recording in progress
    pub demo_recording: bool,
    /// Demo playback in progress
    pub demo_playing: bool,
    /// Machine steps run since construction
    pub steps: u64,
}

/// An emulated computer driven by the synchronizer
///
/// Every method runs on the machine context.
pub trait Machine: Send {
    /// Run for `us` microseconds of emulated time
    fn run(&mut self, us: u64) -> Result<()>;

    /// Warm or cold reset
    fn reset(&mut self, cold: bool);

    /// Press or release key `code` (0..=127)
    fn set_keyboard_state(&mut self, code: u8, pressed: bool);

    /// Release every key and mouse button
    fn reset_keyboard(&mut self);

    /// Relative mouse motion; ignored by machines without a mouse
    fn set_mouse_state(&mut self, _dx: i8, _dy: i8, _buttons: u8, _wheel: u8) {}

    /// Output volume, 0.0 to 1.0
    fn set_audio_volume(&mut self, volume: f32);

    /// Press tape play
    fn tape_play(&mut self);

    /// Press tape record
    fn tape_record(&mut self);

    /// Press tape stop
    fn tape_stop(&mut self);

    /// Move the tape to `secs`
    fn tape_seek(&mut self, secs: f64);

    /// Move the tape to the nearest cue point
    fn tape_seek_to_cue_point(&mut self, forward: bool, secs: f64);

    /// Start recording a demo; `sink` receives it when recording stops
    fn record_demo(&mut self, sink: DemoSink) -> Result<()>;

    /// Stop demo playback or recording
    fn stop_demo(&mut self);

    /// True while a demo is being recorded
    fn is_recording_demo(&self) -> bool;

    /// True while a demo is being replayed
    fn is_playing_demo(&self) -> bool;

    /// Capture the complete machine state
    fn save_snapshot(&self) -> Snapshot;

    /// Restore state from `snapshot`, starting demo playback if it holds a
    /// demo chunk
    fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Current status
    fn status(&self) -> MachineStatus;
}

/// Video chip collaborator stepped once per Dave cycle
pub trait VideoChip: Send {
    /// Advance one Dave cycle, emitting lines into `sink`
    ///
    /// Returns the level of the INT1 output.
    fn step(&mut self, sink: &mut dyn VideoSink) -> bool;

    /// Return to the power-on state
    fn reset(&mut self);

    /// Append chip state to a machine state chunk
    fn save_state(&self, _w: &mut ChunkWriter) {}

    /// Restore state written by [`save_state`](Self::save_state)
    fn load_state(&mut self, _r: &mut ChunkReader<'_>) -> Result<()> {
        Ok(())
    }
}

struct VideoPort {
    chip: Box<dyn VideoChip>,
    sink: Box<dyn VideoSink>,
}

/// Latest host mouse input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseState {
    /// Accumulated horizontal motion
    pub dx: i32,
    /// Accumulated vertical motion
    pub dy: i32,
    /// Button bits
    pub buttons: u8,
    /// Pending wheel events
    pub wheel: u8,
}

struct DemoRecording {
    recorder: DemoRecorder,
    snapshot: Snapshot,
    sink: DemoSink,
}

/// Dave-based reference machine
///
/// Each step is one Dave cycle (two machine cycles). Per step the demo
/// player runs first, then the video chip, the sound chip and the tape.
pub struct DaveMachine {
    dave: Dave,
    resampler: Box<dyn Resampler>,
    sound: SoundConfig,
    ring: Arc<SampleRing>,
    video: Option<VideoPort>,
    tape: Option<Box<dyn Tape>>,
    freq: u32,
    cycles_remaining: i64,
    tape_samples_per_step: i64,
    tape_phase: i64,
    recording: Option<DemoRecording>,
    player: Option<DemoPlayer>,
    clear_keys_pending: bool,
    mouse: MouseState,
    steps: u64,
}

impl DaveMachine {
    /// Create a machine writing audio into `ring`
    pub fn new(sound: &SoundConfig, ring: Arc<SampleRing>) -> Self {
        let resampler = new_resampler(
            sound.high_quality,
            DAVE_CLOCK_HZ as f32,
            sound.sample_rate as f32,
            sound.dc_block_freq1,
            sound.dc_block_freq2,
            sound.volume,
            Arc::clone(&ring),
        );
        tracing::debug!(
            sample_rate = sound.sample_rate,
            high_quality = sound.high_quality,
            "Dave machine created"
        );
        Self {
            dave: Dave::new(),
            resampler,
            sound: sound.clone(),
            ring,
            video: None,
            tape: None,
            freq: DAVE_CLOCK_HZ,
            cycles_remaining: 0,
            tape_samples_per_step: 0,
            tape_phase: 0,
            recording: None,
            player: None,
            clear_keys_pending: false,
            mouse: MouseState::default(),
            steps: 0,
        }
    }

    /// Attach a video chip feeding `sink`
    pub fn with_video(mut self, chip: Box<dyn VideoChip>, sink: Box<dyn VideoSink>) -> Self {
        self.video = Some(VideoPort { chip, sink });
        self
    }

    /// Insert a tape, replacing any previous one
    pub fn set_tape(&mut self, tape: Option<Box<dyn Tape>>) {
        self.tape_phase = 0;
        self.tape_samples_per_step = tape
            .as_ref()
            .map(|t| ((i64::from(t.sample_rate())) << 32) / i64::from(self.freq))
            .unwrap_or(0);
        self.tape = tape;
    }

    /// Remove and return the tape
    pub fn take_tape(&mut self) -> Option<Box<dyn Tape>> {
        let tape = self.tape.take();
        self.set_tape(None);
        tape
    }

    /// The inserted tape
    pub fn tape(&self) -> Option<&dyn Tape> {
        self.tape.as_deref()
    }

    /// Switch between the two resampler variants
    pub fn set_high_quality(&mut self, high_quality: bool) {
        if self.sound.high_quality == high_quality {
            return;
        }
        self.sound.high_quality = high_quality;
        self.resampler = new_resampler(
            high_quality,
            self.freq as f32,
            self.sound.sample_rate as f32,
            self.sound.dc_block_freq1,
            self.sound.dc_block_freq2,
            self.sound.volume,
            Arc::clone(&self.ring),
        );
    }

    /// The sound chip
    pub fn dave(&self) -> &Dave {
        &self.dave
    }

    /// The sound chip, mutable
    pub fn dave_mut(&mut self) -> &mut Dave {
        &mut self.dave
    }

    /// Mouse input received so far
    pub fn mouse_state(&self) -> MouseState {
        self.mouse
    }

    fn step(&mut self) {
        if self.player.is_some() {
            self.demo_playback_step();
        }
        if let Some(rec) = self.recording.as_mut() {
            rec.recorder.tick();
        }

        if let Some(video) = self.video.as_mut() {
            let int1 = video.chip.step(video.sink.as_mut());
            self.dave.set_int1_state(int1);
        }

        let out = self.dave.run_one_cycle();
        self.resampler.send_input_signal(out);

        if let Some(tape) = self.tape.as_mut() {
            let motor = self.dave.remote_state().0;
            if tape.is_motor_on() != motor {
                tape.set_motor(motor);
            }
            self.tape_phase += self.tape_samples_per_step;
            while self.tape_phase >= STEP {
                self.tape_phase -= STEP;
                tape.set_input_signal(i32::from(out & 0xFFFF > 0));
                tape.run_one_sample();
            }
            let level = tape.output_signal();
            self.dave.set_tape_input(level != 0, level);
        }
        self.steps += 1;
    }

    fn demo_playback_step(&mut self) {
        if self.tape_button_active() {
            tracing::info!("tape started, demo playback stopped");
            self.stop_playback();
            return;
        }
        let Some(player) = self.player.as_mut() else {
            return;
        };
        let dave = &mut self.dave;
        let result = player.step(|event| match event {
            DemoEvent::KeyDown(code) => dave.set_keyboard_state(code, true),
            DemoEvent::KeyUp(code) => dave.set_keyboard_state(code, false),
            DemoEvent::End => {}
        });
        match result {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("demo playback finished");
                self.stop_playback();
            }
            Err(e) => {
                tracing::warn!("demo playback aborted: {e}");
                self.stop_playback();
            }
        }
    }

    fn tape_button_active(&self) -> bool {
        self.tape
            .as_ref()
            .is_some_and(|t| t.is_motor_on() && t.is_playing())
    }

    fn stop_playback(&mut self) {
        if self.player.take().is_some() {
            self.dave.clear_keyboard();
        }
    }

    fn stop_recording(&mut self, commit: bool) {
        let Some(rec) = self.recording.take() else {
            return;
        };
        if !commit {
            tracing::info!("demo recording discarded");
            return;
        }
        let DemoRecording {
            recorder,
            mut snapshot,
            sink,
        } = rec;
        snapshot.add_chunk(ChunkType::Demo, recorder.finish());
        tracing::info!("demo recording finished");
        sink(snapshot);
    }

    fn reset_hardware(&mut self) {
        self.dave.reset();
        self.dave.clear_keyboard();
        if let Some(video) = self.video.as_mut() {
            video.chip.reset();
        }
        self.cycles_remaining = 0;
    }

    fn save_config_chunk(&self, snapshot: &mut Snapshot) {
        let mut w = ChunkWriter::new();
        w.write_u32(MACHINE_STATE_VERSION);
        w.write_u32(self.freq);
        snapshot.add_chunk(ChunkType::MachineConfig, w.into_inner());
    }

    fn save_state_chunk(&self, snapshot: &mut Snapshot) {
        let mut w = ChunkWriter::new();
        w.write_u32(MACHINE_STATE_VERSION);
        let mut video = ChunkWriter::new();
        if let Some(v) = self.video.as_ref() {
            v.chip.save_state(&mut video);
        }
        let video = video.into_inner();
        w.write_u32(video.len() as u32);
        w.write_bytes(&video);
        snapshot.add_chunk(ChunkType::MachineState, w.into_inner());
    }

    fn load_chunks(&mut self, snapshot: &Snapshot) -> Result<()> {
        let config = snapshot.chunk(ChunkType::MachineConfig);
        let dave = snapshot.chunk(ChunkType::DaveState);
        if config.is_none() && dave.is_none() {
            return Err(Error::Inconsistent("snapshot has no machine state".into()));
        }
        if let Some(data) = config {
            let mut r = ChunkReader::new(data);
            check_version(&mut r, "machine config")?;
            let freq = r.read_u32()?;
            r.finish()?;
            if freq != DAVE_CLOCK_HZ {
                return Err(Error::Inconsistent(format!("Dave clock {freq} Hz")));
            }
        }
        if let Some(data) = snapshot.chunk(ChunkType::MachineState) {
            let mut r = ChunkReader::new(data);
            check_version(&mut r, "machine state")?;
            let len = r.read_u32()? as usize;
            let video = r.read_bytes(len)?;
            r.finish()?;
            if let Some(v) = self.video.as_mut() {
                let mut vr = ChunkReader::new(video);
                v.chip.load_state(&mut vr)?;
                vr.finish()?;
            }
        }
        if let Some(data) = dave {
            self.dave.load_state(data)?;
        }
        Ok(())
    }
}

fn check_version(r: &mut ChunkReader<'_>, chunk: &'static str) -> Result<()> {
    let found = r.read_u32()?;
    if found != MACHINE_STATE_VERSION {
        return Err(Error::SnapshotVersion { chunk, found });
    }
    Ok(())
}

impl Machine for DaveMachine {
    fn run(&mut self, us: u64) -> Result<()> {
        if self.clear_keys_pending {
            self.clear_keys_pending = false;
            if self.player.is_none() {
                self.dave.clear_keyboard();
            }
        }
        let budget = (i128::from(us) << 26) * i128::from(self.freq) / 15_625;
        self.cycles_remaining = self
            .cycles_remaining
            .saturating_add(i64::try_from(budget).unwrap_or(i64::MAX));
        while self.cycles_remaining > 0 {
            self.step();
            self.cycles_remaining -= STEP;
        }
        Ok(())
    }

    fn reset(&mut self, cold: bool) {
        self.stop_playback();
        self.stop_recording(false);
        self.dave.reset();
        if let Some(video) = self.video.as_mut() {
            video.chip.reset();
        }
        if cold {
            self.dave.clear_keyboard();
            self.mouse = MouseState::default();
            self.cycles_remaining = 0;
        }
        tracing::debug!(cold, "machine reset");
    }

    fn set_keyboard_state(&mut self, code: u8, pressed: bool) {
        let code = code & 0x7F;
        if self.recording.is_some() && self.tape_button_active() {
            tracing::info!("tape started, demo recording stopped");
            self.stop_recording(false);
        }
        if let Some(rec) = self.recording.as_mut() {
            rec.recorder.key_event(code, pressed);
        }
        // the demo owns the keyboard matrix while it plays
        if self.player.is_none() {
            self.dave.set_keyboard_state(code, pressed);
        }
    }

    fn reset_keyboard(&mut self) {
        self.dave.clear_keyboard();
        self.mouse = MouseState::default();
    }

    fn set_mouse_state(&mut self, dx: i8, dy: i8, buttons: u8, wheel: u8) {
        self.mouse.dx += i32::from(dx);
        self.mouse.dy += i32::from(dy);
        self.mouse.buttons = buttons;
        self.mouse.wheel |= wheel;
    }

    fn set_audio_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.sound.volume = volume;
        self.resampler.set_output_volume(volume);
    }

    fn tape_play(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.play();
        }
        if self.tape_button_active() {
            self.stop_demo();
        }
    }

    fn tape_record(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.record();
        }
        if self.tape_button_active() {
            self.stop_demo();
        }
    }

    fn tape_stop(&mut self) {
        if let Some(tape) = self.tape.as_mut() {
            tape.stop();
        }
    }

    fn tape_seek(&mut self, secs: f64) {
        if let Some(tape) = self.tape.as_mut() {
            tape.seek(secs);
        }
    }

    fn tape_seek_to_cue_point(&mut self, forward: bool, secs: f64) {
        if let Some(tape) = self.tape.as_mut() {
            tape.seek_to_cue_point(forward, secs);
        }
    }

    fn record_demo(&mut self, sink: DemoSink) -> Result<()> {
        if let Some(tape) = self.tape.as_mut() {
            tape.set_motor(false);
        }
        self.stop_demo();
        self.dave.clear_keyboard();
        let mut snapshot = Snapshot::new();
        self.save_config_chunk(&mut snapshot);
        self.save_state_chunk(&mut snapshot);
        self.dave.save_to_snapshot(&mut snapshot);
        self.recording = Some(DemoRecording {
            recorder: DemoRecorder::new(),
            snapshot,
            sink,
        });
        tracing::info!("demo recording started");
        Ok(())
    }

    fn stop_demo(&mut self) {
        self.stop_playback();
        self.stop_recording(true);
    }

    fn is_recording_demo(&self) -> bool {
        self.recording.is_some()
    }

    fn is_playing_demo(&self) -> bool {
        self.player.is_some()
    }

    fn save_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        self.save_config_chunk(&mut snapshot);
        self.save_state_chunk(&mut snapshot);
        self.dave.save_to_snapshot(&mut snapshot);
        snapshot
    }

    fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.stop_demo();
        if let Err(e) = self.load_chunks(snapshot) {
            tracing::warn!("snapshot load failed: {e}");
            self.reset_hardware();
            return Err(e);
        }
        self.clear_keys_pending = true;
        if let Some(demo) = snapshot.chunk(ChunkType::Demo) {
            match DemoPlayer::new(demo) {
                Ok(player) => {
                    self.player = Some(player);
                    tracing::info!("demo playback started");
                }
                Err(e) => {
                    self.dave.clear_keyboard();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn status(&self) -> MachineStatus {
        let tape = self.tape.as_deref();
        MachineStatus {
            tape_position: tape.map_or(0.0, |t| t.position()),
            tape_length: tape.map_or(0.0, |t| t.length()),
            tape_playing: tape.is_some_and(|t| t.is_playing()),
            tape_recording: tape.is_some_and(|t| t.is_recording()),
            tape_motor: tape.is_some_and(|t| t.is_motor_on()),
            demo_recording: self.recording.is_some(),
            demo_playing: self.player.is_some(),
            steps: self.steps,
        }
    }
}

impl Drop for DaveMachine {
    fn drop(&mut self) {
        self.stop_demo();
    }
}

impl std::fmt::Debug for DaveMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaveMachine")
            .field("freq", &self.freq)
            .field("steps", &self.steps)
            .field("has_video", &self.video.is_some())
            .field("tape", &self.tape)
            .field("demo_recording", &self.recording.is_some())
            .field("demo_playing", &self.player.is_some())
            .finish_non_exhaustive()
    }
}
