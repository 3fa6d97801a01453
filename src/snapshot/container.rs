//! Snapshot container: typed, checksummed chunks
//!
//! Layout:
//! ```text
//! "EP128SNP"                                  8 byte magic
//! { type u32 | length u32 | data | xxh32 u32 }  repeated
//! 0u32 | 0u32                                 end marker
//! 00 00 ..                                    optional padding (fixed-size blobs)
//! ```
//! All integers are big-endian. The checksum covers type, length and data.

use std::fmt;
use std::fs;
use std::path::Path;

use xxhash_rust::xxh32::xxh32;

use super::codec::ChunkReader;
use crate::{Error, Result};

/// File magic at the start of every snapshot
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"EP128SNP";

const CHECKSUM_SEED: u32 = 0x4550_3132;

/// Chunk type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Machine configuration (clock, memory size)
    MachineConfig,
    /// Machine state outside the sound chip
    MachineState,
    /// Dave chip state
    DaveState,
    /// Recorded demo event log
    Demo,
}

impl ChunkType {
    /// Raw 32-bit tag
    pub fn tag(self) -> u32 {
        match self {
            ChunkType::MachineConfig => 0x4550_8000,
            ChunkType::MachineState => 0x4550_8001,
            ChunkType::DaveState => 0x4550_8004,
            ChunkType::Demo => 0x4550_8010,
        }
    }

    /// Convert a raw tag back to a chunk type
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0x4550_8000 => Some(ChunkType::MachineConfig),
            0x4550_8001 => Some(ChunkType::MachineState),
            0x4550_8004 => Some(ChunkType::DaveState),
            0x4550_8010 => Some(ChunkType::Demo),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::MachineConfig => write!(f, "machine config"),
            ChunkType::MachineState => write!(f, "machine state"),
            ChunkType::DaveState => write!(f, "Dave state"),
            ChunkType::Demo => write!(f, "demo"),
        }
    }
}

fn chunk_checksum(tag: u32, data: &[u8]) -> u32 {
    let mut buf = Vec::with_capacity(data.len() + 8);
    buf.extend_from_slice(&tag.to_be_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
    xxh32(&buf, CHECKSUM_SEED)
}

/// An ordered set of typed chunks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    chunks: Vec<(ChunkType, Vec<u8>)>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; a later chunk of the same type supersedes an earlier one
    pub fn add_chunk(&mut self, chunk_type: ChunkType, data: Vec<u8>) {
        self.chunks.retain(|(t, _)| *t != chunk_type);
        self.chunks.push((chunk_type, data));
    }

    /// Payload of the chunk of the given type, if present
    pub fn chunk(&self, chunk_type: ChunkType) -> Option<&[u8]> {
        self.chunks
            .iter()
            .find(|(t, _)| *t == chunk_type)
            .map(|(_, d)| d.as_slice())
    }

    /// All chunks in file order
    pub fn chunks(&self) -> impl Iterator<Item = (ChunkType, &[u8])> {
        self.chunks.iter().map(|(t, d)| (*t, d.as_slice()))
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True if there are no chunks
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Serialize to the container format
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload: usize = self.chunks.iter().map(|(_, d)| d.len() + 12).sum();
        let mut out = Vec::with_capacity(SNAPSHOT_MAGIC.len() + payload + 8);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        for (chunk_type, data) in &self.chunks {
            let tag = chunk_type.tag();
            out.extend_from_slice(&tag.to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            out.extend_from_slice(data);
            out.extend_from_slice(&chunk_checksum(tag, data).to_be_bytes());
        }
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    /// Serialize into an opaque blob of exactly `size` bytes, zero padded
    ///
    /// # Errors
    ///
    /// Returns `Error::Resource` if the snapshot does not fit.
    pub fn to_fixed_blob(&self, size: usize) -> Result<Vec<u8>> {
        let mut out = self.to_bytes();
        if out.len() > size {
            return Err(Error::Resource(format!(
                "snapshot needs {} bytes, blob has {size}",
                out.len()
            )));
        }
        out.resize(size, 0);
        Ok(out)
    }

    /// Parse the container format, verifying every checksum
    ///
    /// Unknown chunk types are skipped. Anything after the end marker must
    /// be zero padding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SNAPSHOT_MAGIC.len() || &bytes[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(Error::UnknownFormat("missing snapshot magic".into()));
        }
        let mut reader = ChunkReader::new(&bytes[SNAPSHOT_MAGIC.len()..]);
        let mut snapshot = Snapshot::new();
        loop {
            let tag = reader.read_u32()?;
            let len = reader.read_u32()? as usize;
            if tag == 0 && len == 0 {
                break;
            }
            let data = reader.read_bytes(len)?;
            let stored = reader.read_u32()?;
            if stored != chunk_checksum(tag, data) {
                return Err(Error::Checksum { chunk_type: tag });
            }
            match ChunkType::from_tag(tag) {
                Some(chunk_type) => snapshot.chunks.push((chunk_type, data.to_vec())),
                None => tracing::debug!("skipping unknown snapshot chunk 0x{tag:08X}"),
            }
        }
        if reader.rest().iter().any(|&b| b != 0) {
            return Err(Error::TrailingData);
        }
        Ok(snapshot)
    }

    /// Write the snapshot to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Read a snapshot from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut s = Snapshot::new();
        s.add_chunk(ChunkType::DaveState, vec![1, 2, 3, 4]);
        s.add_chunk(ChunkType::Demo, vec![9; 17]);
        s
    }

    #[test]
    fn test_container_round_trip() {
        let s = sample();
        let parsed = Snapshot::from_bytes(&s.to_bytes()).unwrap();
        assert_eq!(parsed, s);
        assert_eq!(parsed.chunk(ChunkType::Demo).unwrap().len(), 17);
        assert!(parsed.chunk(ChunkType::MachineState).is_none());
    }

    #[test]
    fn test_fixed_blob_padding() {
        let s = sample();
        let blob = s.to_fixed_blob(256).unwrap();
        assert_eq!(blob.len(), 256);
        assert_eq!(Snapshot::from_bytes(&blob).unwrap(), s);
        assert!(s.to_fixed_blob(8).is_err());
    }

    #[test]
    fn test_corrupted_chunk_is_rejected() {
        let mut bytes = sample().to_bytes();
        // First payload byte of the first chunk
        bytes[SNAPSHOT_MAGIC.len() + 8] ^= 0xFF;
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(Error::Checksum { .. })
        ));
    }

    #[test]
    fn test_garbage_after_end_marker() {
        let mut bytes = sample().to_bytes();
        bytes.push(0x42);
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(Error::TrailingData)
        ));
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            Snapshot::from_bytes(b"NOTASNAP\0\0\0\0\0\0\0\0"),
            Err(Error::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.snp");
        let s = sample();
        s.save_to_file(&path).unwrap();
        assert_eq!(Snapshot::load_from_file(&path).unwrap(), s);
    }

    #[test]
    fn test_add_chunk_replaces_same_type() {
        let mut s = sample();
        s.add_chunk(ChunkType::DaveState, vec![7]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.chunk(ChunkType::DaveState), Some(&[7u8][..]));
    }
}
