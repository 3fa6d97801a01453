//! Enterprise 128 emulation core
//!
//! The real-time execution layer of a cycle-stepped home computer emulator:
//! the Dave sound/interrupt chip, the resampler that carries its output to
//! the host rate, the scanline frame pipeline that turns Nick run-encoded
//! lines into host pixels, and the synchronizer that lets the machine run on
//! its own thread while a host drives input, audio and video.
//!
//! # Modules
//! - `dave` - Cycle-accurate Dave synthesizer and interrupt controller
//! - `audio` - DC blocking, low/high quality resamplers and the sample ring
//! - `video` - Scanline decoding, frame pipeline and display thread
//! - `vm` - Commands, demo record/playback, machine and synchronizer
//! - `snapshot` - Chunked, checksummed binary snapshots
//! - `tape` - Tape images behind one trait
//! - `config` - Serde-backed emulator configuration
//!
//! # Quick start
//! ```no_run
//! use ep128_core::dave::Dave;
//!
//! let mut dave = Dave::new();
//! dave.write_register(0x00, 0x40); // channel 0 frequency low
//! dave.write_register(0x08, 0x3F); // channel 0 left volume
//! let (left, right) = dave.advance_one_cycle();
//! # let _ = (left, right);
//! ```

#![warn(missing_docs)]

pub mod audio; // Resampling & Output
pub mod config; // Emulator Configuration
pub mod dave; // Dave Sound Chip (core)
pub mod snapshot; // Snapshot Container
pub mod tape; // Tape Images
pub mod video; // Frame Pipeline
pub mod vm; // Machine & Synchronization

/// Error types for emulator operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A snapshot chunk carries a version this build does not understand
    #[error("unsupported {chunk} snapshot version 0x{found:08X}")]
    SnapshotVersion {
        /// Chunk that failed the check
        chunk: &'static str,
        /// Version tag found in the data
        found: u32,
    },

    /// Chunk data ended before all fields were read
    #[error("snapshot data is truncated")]
    SnapshotTruncated,

    /// Bytes remained after the last field of a chunk
    #[error("trailing garbage at end of snapshot data")]
    TrailingData,

    /// Chunk checksum did not match its payload
    #[error("checksum mismatch in chunk 0x{chunk_type:08X}")]
    Checksum {
        /// Type tag of the damaged chunk
        chunk_type: u32,
    },

    /// Snapshot fields contradict each other
    #[error("inconsistent snapshot data: {0}")]
    Inconsistent(String),

    /// Data is not in any recognised container format
    #[error("unknown file format: {0}")]
    UnknownFormat(String),

    /// Demo event log could not be decoded
    #[error("demo format error: {0}")]
    DemoFormat(String),

    /// Tape image could not be opened or written
    #[error("tape error: {0}")]
    TapeFormat(String),

    /// Pooled resources could not be allocated at construction
    #[error("resource allocation failed: {0}")]
    Resource(String),

    /// Bounded wait for the machine lock expired
    #[error("timed out waiting for machine lock")]
    LockTimeout,

    /// The machine thread has terminated
    #[error("machine thread has terminated")]
    ThreadTerminated,

    /// Command queue is full; the command was dropped
    #[error("command queue full, command dropped")]
    QueueFull,

    /// Shutdown was requested; the command was dropped
    #[error("shutting down, command dropped")]
    ShuttingDown,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    /// Converts a String into `Error::Other`.
    ///
    /// Prefer the specific variants where the failure class matters to the
    /// caller (format faults in particular).
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// True for errors caused by malformed snapshot, demo or tape data
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::SnapshotVersion { .. }
                | Error::SnapshotTruncated
                | Error::TrailingData
                | Error::Checksum { .. }
                | Error::Inconsistent(_)
                | Error::UnknownFormat(_)
                | Error::DemoFormat(_)
                | Error::TapeFormat(_)
        )
    }
}

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, Error>;

// Public API exports
pub use audio::{AudioOutput, HighQualityResampler, LowQualityResampler, Resampler, SampleRing};
pub use config::EmulatorConfig;
pub use dave::Dave;
pub use snapshot::{ChunkType, Snapshot};
pub use tape::{open_tape, Tape};
pub use video::{FramePipeline, FrameProducer, PixelFormat, VideoSink};
pub use vm::{Command, DaveMachine, ExecutionSynchronizer, HostCapabilities, Machine};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_classification() {
        assert!(Error::TrailingData.is_format_error());
        assert!(Error::DemoFormat("bad".into()).is_format_error());
        assert!(!Error::LockTimeout.is_format_error());
        assert!(!Error::Resource("pool".into()).is_format_error());
    }

    #[test]
    fn test_string_conversion() {
        let err: Error = "oops".into();
        assert_eq!(err.to_string(), "oops");
    }
}
