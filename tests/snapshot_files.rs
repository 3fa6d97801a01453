use std::sync::Arc;

use ep128_core::audio::SampleRing;
use ep128_core::config::SoundConfig;
use ep128_core::dave::Register;
use ep128_core::snapshot::{ChunkType, ChunkWriter, Snapshot};
use ep128_core::vm::{DaveMachine, Machine, MACHINE_STATE_VERSION};
use ep128_core::Error;

fn machine() -> DaveMachine {
    let ring = Arc::new(SampleRing::new(1 << 14).unwrap());
    DaveMachine::new(&SoundConfig::default(), ring)
}

fn busy_machine() -> DaveMachine {
    let mut m = machine();
    let dave = m.dave_mut();
    dave.write_register(u16::from(Register::Ch0FreqLo.addr()), 0x40);
    dave.write_register(u16::from(Register::Ch0Left.addr()), 0x2A);
    dave.write_register(u16::from(Register::Ch2FreqLo.addr()), 0x99);
    dave.write_register(u16::from(Register::Ch2Right.addr()), 0x3F);
    dave.write_register(u16::from(Register::NoiseCtrl.addr()), 0x31);
    dave.write_register(u16::from(Register::Page2.addr()), 0xFE);
    m.set_keyboard_state(0x23, true);
    m.run(12_345).unwrap();
    m
}

#[test]
fn snapshot_file_restores_machine() {
    let mut m = busy_machine();
    let saved = m.dave().state_bytes();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.ep128s");
    m.save_snapshot().save_to_file(&path).unwrap();

    m.run(50_000).unwrap();
    m.reset(true);
    assert_ne!(m.dave().state_bytes(), saved);

    let loaded = Snapshot::load_from_file(&path).unwrap();
    m.load_snapshot(&loaded).unwrap();
    assert_eq!(m.dave().state_bytes(), saved);
    assert_eq!(m.dave().memory_page(2), 0xFE);
    assert!(!m.is_playing_demo());
}

#[test]
fn fixed_blob_loads_into_another_machine() {
    let m = busy_machine();
    let blob = m.save_snapshot().to_fixed_blob(4096).unwrap();
    assert_eq!(blob.len(), 4096);

    let mut other = machine();
    other.load_snapshot(&Snapshot::from_bytes(&blob).unwrap()).unwrap();
    assert_eq!(other.dave().state_bytes(), m.dave().state_bytes());
}

#[test]
fn corrupted_file_is_rejected() {
    let m = busy_machine();
    let mut bytes = m.save_snapshot().to_bytes();
    // first byte of the first chunk payload
    bytes[16] ^= 0x01;
    let err = Snapshot::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err, Error::Checksum { .. }));
    assert!(err.is_format_error());
}

#[test]
fn wrong_clock_resets_machine() {
    let mut m = busy_machine();
    let mut snapshot = m.save_snapshot();
    let mut w = ChunkWriter::new();
    w.write_u32(MACHINE_STATE_VERSION);
    w.write_u32(4_000_000);
    snapshot.add_chunk(ChunkType::MachineConfig, w.into_inner());

    let err = m.load_snapshot(&snapshot).unwrap_err();
    assert!(matches!(err, Error::Inconsistent(_)));
    // page registers cleared by the hardware reset
    assert_eq!(m.dave().memory_page(2), 0);
}

#[test]
fn snapshot_without_machine_state_is_inconsistent() {
    let mut m = machine();
    let mut snapshot = Snapshot::new();
    snapshot.add_chunk(ChunkType::Demo, vec![0, 1, 9, 0, 0, 0, 0]);
    assert!(matches!(m.load_snapshot(&snapshot), Err(Error::Inconsistent(_))));
}
