//! Headless Enterprise 128 runner
//!
//! Drives a [`DaveMachine`] with the test pattern video chip through the
//! execution synchronizer and the frame pipeline for a fixed number of host
//! frames. Audio can be captured to a WAV file and keyboard-free demo runs
//! can be recorded to or replayed from a snapshot file.

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ep128_core::audio::{AudioOutput, SampleRing};
use ep128_core::dave::Register;
use ep128_core::vm::{DaveMachine, ExecutionSynchronizer, HostCapabilities, Machine, TestPatternChip};
use ep128_core::{open_tape, EmulatorConfig, Snapshot, Tape};

const DEFAULT_FRAMES: u64 = 250;
const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
/// Environment variables with this prefix are applied as host variables
const HOST_VARIABLE_PREFIX: &str = "EP128EMU_";

const USAGE: &str = "Usage:
  ep128-run [options]

Options:
  --config <file.json>   Load emulator configuration
  --frames <n>           Host frames to run (default 250)
  --wav <out.wav>        Capture the audio output
  --tape <image>         Insert a tape image (WAV or EPTAPE01) and press play
  --tone <hz>            Program Dave channel 0 with a square wave
  --record-demo <file>   Record a demo snapshot while running
  --play <file>          Load a snapshot before running (replays its demo)
  --threaded             Run the machine on its own thread
  -h, --help             Show this help

Environment:
  EP128EMU_<NAME>=<value> sets host variable ep128emu_<name>
  RUST_LOG controls log output (default info)
";

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    frames: Option<u64>,
    wav: Option<PathBuf>,
    tape: Option<PathBuf>,
    tone_hz: Option<u32>,
    record_demo: Option<PathBuf>,
    play: Option<PathBuf>,
    threaded: bool,
}

fn parse_args() -> Result<Option<Options>> {
    let mut opts = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .with_context(|| format!("{name} requires an argument"))
        };
        match arg.as_str() {
            "--config" => opts.config = Some(value("--config")?.into()),
            "--frames" => {
                let v = value("--frames")?;
                opts.frames = Some(v.parse().with_context(|| format!("invalid frame count '{v}'"))?);
            }
            "--wav" => opts.wav = Some(value("--wav")?.into()),
            "--tape" => opts.tape = Some(value("--tape")?.into()),
            "--tone" => {
                let v = value("--tone")?;
                opts.tone_hz = Some(v.parse().with_context(|| format!("invalid frequency '{v}'"))?);
            }
            "--record-demo" => opts.record_demo = Some(value("--record-demo")?.into()),
            "--play" => opts.play = Some(value("--play")?.into()),
            "--threaded" => opts.threaded = true,
            "--help" | "-h" => return Ok(None),
            _ => bail!("unknown argument '{arg}'\n\n{USAGE}"),
        }
    }
    Ok(Some(opts))
}

fn load_config(opts: &Options) -> Result<EmulatorConfig> {
    let mut config = match &opts.config {
        Some(path) => EmulatorConfig::from_json_file(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => EmulatorConfig::default(),
    };
    for (key, value) in env::vars() {
        if let Some(name) = key.strip_prefix(HOST_VARIABLE_PREFIX) {
            let key = format!("ep128emu_{}", name.to_ascii_lowercase());
            config.apply_host_variable(&key, &value);
        }
    }
    config.validate()?;
    Ok(config)
}

/// Square wave on channel 0 at full volume on both sides
fn program_tone(machine: &mut DaveMachine, hz: u32) {
    let code = (125_000 / hz.max(1)).saturating_sub(1).min(0x0FFF);
    let dave = machine.dave_mut();
    dave.write_register(u16::from(Register::Ch0FreqLo.addr()), (code & 0xFF) as u8);
    dave.write_register(u16::from(Register::Ch0FreqHi.addr()), (code >> 8) as u8);
    dave.write_register(u16::from(Register::Ch0Left.addr()), 0x3F);
    dave.write_register(u16::from(Register::Ch0Right.addr()), 0x3F);
}

fn run(opts: Options) -> Result<()> {
    let config = load_config(&opts)?;
    let frames = opts.frames.unwrap_or(DEFAULT_FRAMES);
    let timeslice = config.vm.timeslice_us;
    tracing::info!(
        frames,
        timeslice_us = timeslice,
        sample_rate = config.sound.sample_rate,
        high_quality = config.sound.high_quality,
        "starting"
    );

    // one second of audio headroom
    let ring = Arc::new(SampleRing::new(config.sound.sample_rate as usize)?);
    let audio = AudioOutput::new(Arc::clone(&ring), config.sound.sample_rate);

    let caps = HostCapabilities::new(config.display.pixel_format)
        .with_error_callback(|msg| tracing::error!("machine: {msg}"));
    let pipeline = caps.create_pipeline(config.display.half_frame)?;
    let (x1, y1, x2, y2) = config.display.viewport();
    if !pipeline.set_viewport(x1, y1, x2, y2) {
        tracing::warn!(x1, y1, x2, y2, "viewport rejected, using full frame");
    }

    let mut machine = DaveMachine::new(&config.sound, ring).with_video(
        Box::new(TestPatternChip::new(false)),
        Box::new(pipeline.producer()),
    );

    if let Some(path) = &opts.play {
        let snapshot = Snapshot::load_from_file(path)
            .with_context(|| format!("failed to read snapshot '{}'", path.display()))?;
        machine
            .load_snapshot(&snapshot)
            .with_context(|| format!("failed to load snapshot '{}'", path.display()))?;
        tracing::info!(chunks = snapshot.len(), demo = machine.is_playing_demo(), "snapshot loaded");
    }
    if let Some(hz) = opts.tone_hz {
        program_tone(&mut machine, hz);
    }
    if let Some(path) = &opts.tape {
        let bytes = fs::read(path).with_context(|| format!("failed to read tape '{}'", path.display()))?;
        let tape = open_tape(&bytes)?;
        tracing::info!(
            length_secs = tape.length(),
            sample_rate = tape.sample_rate(),
            "tape inserted"
        );
        machine.set_tape(Some(tape));
        machine.tape_play();
    }

    let demo_rx = match &opts.record_demo {
        Some(_) => {
            let (tx, rx) = mpsc::channel();
            machine.record_demo(Box::new(move |snapshot: Snapshot| {
                let _ = tx.send(snapshot);
            }))?;
            Some(rx)
        }
        None => None,
    };

    let mut wav = match &opts.wav {
        Some(path) => {
            let spec = hound::WavSpec {
                channels: 2,
                sample_rate: config.sound.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            Some(
                hound::WavWriter::create(path, spec)
                    .with_context(|| format!("failed to create '{}'", path.display()))?,
            )
        }
        None => None,
    };

    let mut sync = ExecutionSynchronizer::new(machine, caps)?;
    if opts.threaded {
        sync.spawn()?;
        sync.set_speed_percentage(config.vm.speed_percentage);
        sync.pause(false);
    }

    let mut samples = vec![0i16; audio.frames_for(timeslice) * 2 + 2];
    let mut composited = 0usize;
    let mut audio_frames = 0u64;
    for frame in 0..frames {
        if opts.threaded {
            sync.allow_run_for(timeslice);
            if !sync.wait_ready(Duration::from_micros(timeslice) + LOCK_TIMEOUT) {
                tracing::warn!(frame, "machine thread fell behind");
            }
        } else {
            sync.run_for(timeslice)?;
        }
        composited += pipeline.pump();

        let n = audio.pull_frame(&mut samples, timeslice);
        audio_frames += n as u64;
        if let Some(writer) = wav.as_mut() {
            for &s in &samples[..n * 2] {
                writer.write_sample(s)?;
            }
        }
    }

    if let Some(rx) = demo_rx {
        sync.lock(LOCK_TIMEOUT)?.stop_demo();
        let snapshot = rx.try_recv().context("demo recording produced no snapshot")?;
        if let Some(path) = &opts.record_demo {
            snapshot
                .save_to_file(path)
                .with_context(|| format!("failed to write demo '{}'", path.display()))?;
            tracing::info!(path = %path.display(), "demo saved");
        }
    }

    let status = sync.status();
    sync.quit(true);
    if let Some(writer) = wav {
        writer.finalize()?;
    }

    let stats = audio.stats();
    tracing::info!(
        steps = status.machine.steps,
        frames_composited = composited,
        dropped_lines = pipeline.dropped_lines(),
        audio_frames,
        audio_frames_dropped = stats.frames_dropped,
        dropped_commands = status.dropped_commands,
        "finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match parse_args()? {
        Some(opts) => run(opts),
        None => {
            eprint!("{USAGE}");
            Ok(())
        }
    }
}
