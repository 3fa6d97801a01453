use std::sync::Arc;
use std::time::Duration;

use ep128_core::audio::{AudioOutput, SampleRing};
use ep128_core::config::SoundConfig;
use ep128_core::dave::Register;
use ep128_core::video::{nick_palette, Colormap, DisplayThread, PixelFormat, LINE_WIDTH};
use ep128_core::vm::{DaveMachine, ExecutionSynchronizer, HostCapabilities, TestPatternChip, ThreadStatus};

const FRAME_US: u64 = 20_000;
const WAIT: Duration = Duration::from_secs(5);

#[test]
fn threaded_machine_feeds_frames_and_audio() {
    let sound = SoundConfig {
        high_quality: false,
        ..SoundConfig::default()
    };
    let ring = Arc::new(SampleRing::new(1 << 16).unwrap());
    let audio = AudioOutput::new(Arc::clone(&ring), sound.sample_rate);
    let caps = HostCapabilities::new(PixelFormat::Xrgb8888);
    let pipeline = caps.create_pipeline(false).unwrap();

    let mut machine = DaveMachine::new(&sound, ring).with_video(
        Box::new(TestPatternChip::new(false)),
        Box::new(pipeline.producer()),
    );
    let dave = machine.dave_mut();
    dave.write_register(u16::from(Register::Ch0FreqLo.addr()), 0x7C);
    dave.write_register(u16::from(Register::Ch0Left.addr()), 0x3F);
    dave.write_register(u16::from(Register::Ch0Right.addr()), 0x3F);

    let mut sync = ExecutionSynchronizer::new(machine, caps).unwrap();
    sync.spawn().unwrap();
    sync.pause(false);

    let mut frames = 0;
    let mut pulled = 0;
    let mut samples = vec![0i16; 2 * 1024];
    for _ in 0..10 {
        sync.allow_run_for(FRAME_US);
        assert!(sync.wait_ready(WAIT));
        frames += pipeline.pump();
        pulled += audio.pull_frame(&mut samples, FRAME_US);
    }

    // 312 lines of 16 steps per field
    assert!((9..=12).contains(&frames), "composited {frames} frames");
    // 882 frames per host frame at 44.1 kHz, minus resampler latency
    assert!(pulled > 8_000, "pulled {pulled} audio frames");

    let expected = Colormap::new(PixelFormat::Xrgb8888, nick_palette).lookup(0xD2);
    let frame = pipeline.request_frame(Duration::ZERO).unwrap();
    assert_eq!(frame.width(), LINE_WIDTH);
    assert_eq!(frame.pixels()[288 * LINE_WIDTH + 384], expected);
    drop(frame);

    let status = sync.status();
    assert_eq!(status.machine.steps, 50_000);
    assert_eq!(status.thread, ThreadStatus::Running);

    sync.quit(true);
    assert_eq!(sync.status().thread, ThreadStatus::Finished);
}

#[test]
fn display_thread_consumes_machine_output() {
    let ring = Arc::new(SampleRing::new(1 << 14).unwrap());
    let caps = HostCapabilities::new(PixelFormat::Rgb565);
    let pipeline = caps.create_pipeline(true).unwrap();
    let machine = DaveMachine::new(&SoundConfig::default(), ring).with_video(
        Box::new(TestPatternChip::new(true)),
        Box::new(pipeline.producer()),
    );
    let display = DisplayThread::spawn(Arc::clone(&pipeline)).unwrap();

    let sync = ExecutionSynchronizer::new(machine, caps).unwrap();
    for _ in 0..6 {
        sync.run_for(FRAME_US).unwrap();
    }
    assert!(pipeline.request_frame(WAIT).is_some());
    assert!(pipeline.frame_count() >= 1);
    // interlaced fields arm the hold counter
    assert!(pipeline.interlace_count() > 0);
    display.join().unwrap();
}
