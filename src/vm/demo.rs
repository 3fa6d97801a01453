//! Demo event logs
//!
//! A demo is a snapshot followed by a log of keyboard events, each stamped
//! with the number of machine steps since the previous one. Layout:
//!
//! ```text
//! u32 version (0x00010900)
//! repeat:
//!   delta    7 bits per byte, high bit set on all but the last byte
//!   type     u8: 0 end, 1 key down, 2 key up
//!   length   u8
//!   payload  `length` bytes; the key code is the last one
//! ```
//!
//! The first delta precedes the first event; the log always ends with a
//! type 0 record.

use crate::snapshot::{ChunkReader, ChunkWriter};
use crate::{Error, Result};

/// Demo chunk format version
pub const DEMO_VERSION: u32 = 0x0001_0900;

/// Longest encoded time delta in bytes
pub const MAX_DELTA_BYTES: usize = 8;

const EVENT_END: u8 = 0x00;
const EVENT_KEY_DOWN: u8 = 0x01;
const EVENT_KEY_UP: u8 = 0x02;

/// One logged input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoEvent {
    /// End of the log
    End,
    /// Key pressed
    KeyDown(u8),
    /// Key released
    KeyUp(u8),
}

/// Append `n` in big-endian 7-bit groups
///
/// Values wider than 56 bits keep only their low 56 bits.
pub fn write_time_delta(w: &mut ChunkWriter, n: u64) {
    let mut shift = 49u32;
    while shift != 0 && (n >> shift) & 0x7F == 0 {
        shift -= 7;
    }
    while shift != 0 {
        w.write_u8((((n >> shift) & 0x7F) as u8) | 0x80);
        shift -= 7;
    }
    w.write_u8((n & 0x7F) as u8);
}

/// Read a delta written by [`write_time_delta`]
///
/// Stops after [`MAX_DELTA_BYTES`] bytes even if the continuation bit is
/// still set.
pub fn read_time_delta(r: &mut ChunkReader<'_>) -> Result<u64> {
    let mut n = 0u64;
    for _ in 0..MAX_DELTA_BYTES {
        let c = r.read_u8().map_err(demo_truncated)?;
        n = (n << 7) | u64::from(c & 0x7F);
        if c & 0x80 == 0 {
            break;
        }
    }
    Ok(n)
}

fn demo_truncated(_: Error) -> Error {
    Error::DemoFormat("event log ends unexpectedly".into())
}

/// Builds a demo log while the machine runs
#[derive(Debug)]
pub struct DemoRecorder {
    log: ChunkWriter,
    time_cnt: u64,
}

impl Default for DemoRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoRecorder {
    /// Start an empty log
    pub fn new() -> Self {
        let mut log = ChunkWriter::new();
        log.write_u32(DEMO_VERSION);
        Self { log, time_cnt: 0 }
    }

    /// Count one machine step
    #[inline]
    pub fn tick(&mut self) {
        self.time_cnt += 1;
    }

    /// Log a key event at the current step
    pub fn key_event(&mut self, code: u8, pressed: bool) {
        write_time_delta(&mut self.log, self.time_cnt);
        self.time_cnt = 0;
        self.log
            .write_u8(if pressed { EVENT_KEY_DOWN } else { EVENT_KEY_UP });
        self.log.write_u8(1);
        self.log.write_u8(code & 0x7F);
    }

    /// Steps since the last logged event
    pub fn pending_steps(&self) -> u64 {
        self.time_cnt
    }

    /// Close the log with an end record and return the chunk payload
    pub fn finish(mut self) -> Vec<u8> {
        write_time_delta(&mut self.log, self.time_cnt);
        self.log.write_u8(EVENT_END);
        self.log.write_u8(0);
        self.log.into_inner()
    }
}

/// Replays a demo log one machine step at a time
#[derive(Debug)]
pub struct DemoPlayer {
    data: Vec<u8>,
    pos: usize,
    countdown: u64,
}

impl DemoPlayer {
    /// Prime playback from a demo chunk payload
    ///
    /// # Errors
    ///
    /// `Error::DemoFormat` if the header or first delta is missing.
    pub fn new(chunk: &[u8]) -> Result<Self> {
        let mut r = ChunkReader::new(chunk);
        let version = r.read_u32().map_err(demo_truncated)?;
        if version != DEMO_VERSION {
            tracing::debug!(version = format_args!("0x{version:08X}"), "demo version differs");
        }
        let countdown = read_time_delta(&mut r)?;
        let data = r.rest().to_vec();
        Ok(Self {
            data,
            pos: 0,
            countdown,
        })
    }

    /// Advance one machine step, handing due events to `dispatch`
    ///
    /// Returns `Ok(false)` once the end record has been dispatched.
    ///
    /// # Errors
    ///
    /// `Error::DemoFormat` when the log is malformed; playback cannot
    /// continue after that.
    pub fn step(&mut self, mut dispatch: impl FnMut(DemoEvent)) -> Result<bool> {
        while self.countdown == 0 {
            let mut r = ChunkReader::new(&self.data[self.pos..]);
            let event_type = r.read_u8().map_err(demo_truncated)?;
            let len = r.read_u8().map_err(demo_truncated)?;
            let payload = r.read_bytes(usize::from(len)).map_err(demo_truncated)?;
            let code = payload.last().copied().unwrap_or(0);
            let event = match event_type {
                EVENT_END => DemoEvent::End,
                EVENT_KEY_DOWN => DemoEvent::KeyDown(code),
                EVENT_KEY_UP => DemoEvent::KeyUp(code),
                other => {
                    tracing::debug!(event_type = other, "skipping unknown demo event");
                    self.countdown = read_time_delta(&mut r)?;
                    self.pos = self.data.len() - r.remaining();
                    continue;
                }
            };
            dispatch(event);
            if event == DemoEvent::End {
                return Ok(false);
            }
            self.countdown = read_time_delta(&mut r)?;
            self.pos = self.data.len() - r.remaining();
        }
        self.countdown -= 1;
        Ok(true)
    }

    /// Steps until the next event is due
    pub fn countdown(&self) -> u64 {
        self.countdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_bytes(n: u64) -> Vec<u8> {
        let mut w = ChunkWriter::new();
        write_time_delta(&mut w, n);
        w.into_inner()
    }

    #[test]
    fn test_delta_encoding() {
        assert_eq!(delta_bytes(0), vec![0x00]);
        assert_eq!(delta_bytes(0x7F), vec![0x7F]);
        assert_eq!(delta_bytes(0x80), vec![0x81, 0x00]);
        assert_eq!(delta_bytes(0x3FFF), vec![0xFF, 0x7F]);
        assert_eq!(delta_bytes(1 << 49), vec![0x81, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00]);
        assert_eq!(delta_bytes(u64::MAX).len(), MAX_DELTA_BYTES);
    }

    #[test]
    fn test_delta_decoding() {
        for n in [0u64, 1, 127, 128, 250_000, 1 << 40, (1 << 56) - 1] {
            let bytes = delta_bytes(n);
            let mut r = ChunkReader::new(&bytes);
            assert_eq!(read_time_delta(&mut r).unwrap(), n);
            assert_eq!(r.remaining(), 0);
        }
        // continuation bit on every byte: reading stops after eight
        let bytes = [0x81u8; 10];
        let mut r = ChunkReader::new(&bytes);
        read_time_delta(&mut r).unwrap();
        assert_eq!(r.remaining(), 2);
        assert!(read_time_delta(&mut ChunkReader::new(&[0x80])).is_err());
    }

    #[test]
    fn test_recorder_layout() {
        let mut rec = DemoRecorder::new();
        for _ in 0..200 {
            rec.tick();
        }
        rec.key_event(0x85, true);
        rec.key_event(5, false);
        rec.tick();
        let log = rec.finish();
        assert_eq!(
            log,
            vec![
                0x00, 0x01, 0x09, 0x00, // version
                0x81, 0x48, 0x01, 0x01, 0x05, // 200 steps, key 5 down
                0x00, 0x02, 0x01, 0x05, // same step, key 5 up
                0x01, 0x00, 0x00, // one step, end
            ]
        );
    }

    #[test]
    fn test_player_dispatches_on_schedule() {
        let mut rec = DemoRecorder::new();
        for _ in 0..3 {
            rec.tick();
        }
        rec.key_event(10, true);
        rec.key_event(11, true);
        rec.tick();
        rec.tick();
        rec.key_event(10, false);
        let log = rec.finish();

        let mut player = DemoPlayer::new(&log).unwrap();
        let mut seen = Vec::new();
        let mut step = 0;
        loop {
            let playing = player.step(|e| seen.push((step, e))).unwrap();
            if !playing {
                break;
            }
            step += 1;
        }
        assert_eq!(
            seen,
            vec![
                (3, DemoEvent::KeyDown(10)),
                (3, DemoEvent::KeyDown(11)),
                (5, DemoEvent::KeyUp(10)),
                (5, DemoEvent::End),
            ]
        );
    }

    #[test]
    fn test_truncated_log_is_an_error() {
        let mut rec = DemoRecorder::new();
        rec.key_event(3, true);
        let mut log = rec.finish();
        log.truncate(log.len() - 3);
        let mut player = DemoPlayer::new(&log).unwrap();
        let mut events = 0;
        let result = loop {
            match player.step(|_| events += 1) {
                Ok(true) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(Error::DemoFormat(_))));
        assert_eq!(events, 1);
        assert!(DemoPlayer::new(&[0, 1]).is_err());
    }
}
