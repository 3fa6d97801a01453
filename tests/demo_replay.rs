use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use ep128_core::audio::SampleRing;
use ep128_core::config::SoundConfig;
use ep128_core::dave::Register;
use ep128_core::snapshot::{ChunkType, Snapshot};
use ep128_core::video::VideoSink;
use ep128_core::vm::{DaveMachine, Machine, TestPatternChip};

struct NullSink;

impl VideoSink for NullSink {
    fn draw_line(&mut self, _encoded: &[u8]) {}
    fn notify_field_sync(&mut self, _active: bool, _slot: u32) {}
}

fn machine() -> DaveMachine {
    let ring = Arc::new(SampleRing::new(1 << 14).unwrap());
    DaveMachine::new(&SoundConfig::default(), ring)
        .with_video(Box::new(TestPatternChip::new(true)), Box::new(NullSink))
}

/// Dave chunk plus the video chip part of the machine state
fn state(m: &DaveMachine) -> (Vec<u8>, Vec<u8>) {
    let snapshot = m.save_snapshot();
    (
        m.dave().state_bytes(),
        snapshot.chunk(ChunkType::MachineState).unwrap().to_vec(),
    )
}

fn program_sound(m: &mut DaveMachine) {
    let dave = m.dave_mut();
    dave.write_register(u16::from(Register::Ch0FreqLo.addr()), 0x7C);
    dave.write_register(u16::from(Register::Ch0Left.addr()), 0x3F);
    dave.write_register(u16::from(Register::Ch1FreqLo.addr()), 0x33);
    dave.write_register(u16::from(Register::Ch1FreqHi.addr()), 0x11);
    dave.write_register(u16::from(Register::Ch1Right.addr()), 0x20);
}

#[test]
fn replayed_demo_reproduces_every_checkpoint() {
    let mut rng = StdRng::seed_from_u64(0x4550_3132);
    let mut live = machine();
    program_sound(&mut live);
    live.run(3_000).unwrap();

    let recorded: Arc<Mutex<Option<Snapshot>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&recorded);
    live
        .record_demo(Box::new(move |snapshot: Snapshot| *slot.lock() = Some(snapshot)))
        .unwrap();
    assert!(live.is_recording_demo());

    // durations that are not whole steps exercise the fractional carry
    let mut segments = Vec::new();
    let mut checkpoints = Vec::new();
    for _ in 0..60 {
        for _ in 0..rng.gen_range(0..3) {
            live.set_keyboard_state(rng.gen_range(0..80), rng.gen_bool(0.6));
        }
        let us = rng.gen_range(1..2_500);
        live.run(us).unwrap();
        segments.push(us);
        checkpoints.push(state(&live));
    }
    live.stop_demo();
    assert!(!live.is_recording_demo());

    let demo = recorded.lock().take().expect("demo snapshot delivered");
    assert!(demo.chunk(ChunkType::Demo).is_some());
    let demo = Snapshot::from_bytes(&demo.to_bytes()).unwrap();

    let mut replay = machine();
    replay.load_snapshot(&demo).unwrap();
    assert!(replay.is_playing_demo());
    for (i, (&us, expected)) in segments.iter().zip(&checkpoints).enumerate() {
        replay.run(us).unwrap();
        assert_eq!(&state(&replay), expected, "diverged at checkpoint {i}");
    }

    replay.run(1_000).unwrap();
    assert!(!replay.is_playing_demo());
}

#[test]
fn host_keys_do_not_disturb_playback() {
    let mut rng = StdRng::seed_from_u64(0x0128);
    let mut live = machine();
    program_sound(&mut live);

    let recorded: Arc<Mutex<Option<Snapshot>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&recorded);
    live
        .record_demo(Box::new(move |snapshot: Snapshot| *slot.lock() = Some(snapshot)))
        .unwrap();
    let mut segments = Vec::new();
    let mut checkpoints = Vec::new();
    for _ in 0..20 {
        live.set_keyboard_state(rng.gen_range(0..80), rng.gen_bool(0.5));
        let us = rng.gen_range(100..1_500);
        live.run(us).unwrap();
        segments.push(us);
        checkpoints.push(state(&live));
    }
    live.stop_demo();
    let demo = recorded.lock().take().expect("demo snapshot delivered");

    let mut replay = machine();
    replay.load_snapshot(&demo).unwrap();
    assert!(replay.is_playing_demo());
    for (i, (&us, expected)) in segments.iter().zip(&checkpoints).enumerate() {
        replay.set_keyboard_state(rng.gen_range(0..80), true);
        replay.run(us).unwrap();
        assert_eq!(&state(&replay), expected, "diverged at checkpoint {i}");
    }
}

#[test]
fn recording_ends_playback() {
    let mut m = machine();
    let recorded: Arc<Mutex<Option<Snapshot>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&recorded);
    m.record_demo(Box::new(move |snapshot: Snapshot| *slot.lock() = Some(snapshot)))
        .unwrap();
    m.set_keyboard_state(0x1F, true);
    m.run(4_000).unwrap();
    m.set_keyboard_state(0x1F, false);
    m.run(4_000).unwrap();
    m.stop_demo();
    let demo = recorded.lock().take().unwrap();

    let mut replay = machine();
    replay.load_snapshot(&demo).unwrap();
    replay.run(1_000).unwrap();
    assert!(replay.is_playing_demo());
    replay.record_demo(Box::new(|_: Snapshot| {})).unwrap();
    assert!(!replay.is_playing_demo());
    assert!(replay.is_recording_demo());
}
