//! Scanline storage shared by the producer and the pipeline
//!
//! Every buffer here is sized at construction; nothing allocates once the
//! pipeline is running.

use super::decode::{decode_line, LINE_WIDTH, MAX_LINE_BYTES};
use super::geometry::SCREEN_HEIGHT;
use crate::{Error, Result};

/// Line slots: the visible field plus the first lines of the next one
pub const LINE_SLOTS: usize = SCREEN_HEIGHT + 2;

/// One encoded scanline payload
///
/// Payloads longer than [`MAX_LINE_BYTES`] are truncated on copy; the tail
/// could never reach the decoded line anyway.
#[derive(Clone)]
pub struct LineData {
    len: usize,
    bytes: [u8; MAX_LINE_BYTES],
}

impl Default for LineData {
    fn default() -> Self {
        Self {
            len: 0,
            bytes: [0; MAX_LINE_BYTES],
        }
    }
}

impl LineData {
    /// Replace the payload with `encoded`
    pub fn copy_from(&mut self, encoded: &[u8]) {
        let len = encoded.len().min(MAX_LINE_BYTES);
        self.bytes[..len].copy_from_slice(&encoded[..len]);
        self.len = len;
    }

    /// Encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length payload
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for LineData {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for LineData {}

impl std::fmt::Debug for LineData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineData").field("len", &self.len).finish()
    }
}

/// Index slab of [`LineData`] with a free list
#[derive(Debug)]
pub struct MessagePool {
    slots: Vec<LineData>,
    free: Vec<usize>,
}

impl MessagePool {
    /// Allocate `capacity` payload slots up front
    ///
    /// # Errors
    ///
    /// `Error::Resource` if the slab cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|e| Error::Resource(format!("line pool of {capacity} slots: {e}")))?;
        slots.resize_with(capacity, LineData::default);
        let mut free = Vec::new();
        free.try_reserve_exact(capacity)
            .map_err(|e| Error::Resource(format!("line pool free list: {e}")))?;
        free.extend((0..capacity).rev());
        Ok(Self { slots, free })
    }

    /// Take a free slot, if any
    pub fn alloc(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Return `index` to the free list
    pub fn release(&mut self, index: usize) {
        debug_assert!(!self.free.contains(&index));
        self.free.push(index);
    }

    /// Payload in slot `index`
    pub fn get(&self, index: usize) -> &LineData {
        &self.slots[index]
    }

    /// Mutable payload in slot `index`
    pub fn get_mut(&mut self, index: usize) -> &mut LineData {
        &mut self.slots[index]
    }

    /// Slots currently handed out
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Most recent payload per physical line, with decoded rows cached
///
/// A slot is `None` until its line has been received. Decoding happens
/// lazily on draw and only for lines whose payload changed.
pub struct ScanlineBuffer {
    lines: Vec<Option<LineData>>,
    decoded: Vec<u8>,
    stale: Vec<bool>,
    /// Changed flag per line pair (field line)
    changed: Vec<bool>,
    decode_count: u64,
}

impl ScanlineBuffer {
    /// Empty buffer
    ///
    /// # Errors
    ///
    /// `Error::Resource` if the decoded row cache cannot be reserved.
    pub fn new() -> Result<Self> {
        let mut decoded = Vec::new();
        decoded
            .try_reserve_exact(LINE_SLOTS * LINE_WIDTH)
            .map_err(|e| Error::Resource(format!("scanline cache: {e}")))?;
        decoded.resize(LINE_SLOTS * LINE_WIDTH, 0);
        Ok(Self {
            lines: vec![None; LINE_SLOTS],
            decoded,
            stale: vec![false; LINE_SLOTS],
            changed: vec![false; LINE_SLOTS / 2 + 1],
            decode_count: 0,
        })
    }

    /// Store `data` for `line`
    ///
    /// Returns `false`, and changes nothing, when the payload is byte
    /// identical to the one already held or `line` is out of range.
    pub fn store(&mut self, line: usize, data: &LineData) -> bool {
        let Some(slot) = self.lines.get_mut(line) else {
            return false;
        };
        match slot {
            Some(held) if held == data => false,
            Some(held) => {
                held.clone_from(data);
                self.stale[line] = true;
                self.changed[line >> 1] = true;
                true
            }
            None => {
                *slot = Some(data.clone());
                self.stale[line] = true;
                self.changed[line >> 1] = true;
                true
            }
        }
    }

    /// Payload held for `line`
    pub fn get(&self, line: usize) -> Option<&LineData> {
        self.lines.get(line).and_then(Option::as_ref)
    }

    /// Decoded palette indices of `line`, decoding first if the payload
    /// changed since the last call
    pub fn decoded_row(&mut self, line: usize) -> Option<&[u8]> {
        let data = self.lines.get(line)?.as_ref()?;
        let row = &mut self.decoded[line * LINE_WIDTH..(line + 1) * LINE_WIDTH];
        if self.stale[line] {
            let row: &mut [u8; LINE_WIDTH] = row.try_into().ok()?;
            decode_line(row, data.as_bytes());
            self.stale[line] = false;
            self.decode_count += 1;
        }
        Some(&self.decoded[line * LINE_WIDTH..(line + 1) * LINE_WIDTH])
    }

    /// True if the line pair containing `line` changed since the last
    /// [`clear_changed`](Self::clear_changed)
    pub fn is_changed(&self, line: usize) -> bool {
        self.changed.get(line >> 1).copied().unwrap_or(false)
    }

    /// Reset the per-pair changed flags
    pub fn clear_changed(&mut self) {
        self.changed.iter_mut().for_each(|c| *c = false);
    }

    /// Number of line decodes performed so far
    pub fn decode_count(&self) -> u64 {
        self.decode_count
    }
}

impl std::fmt::Debug for ScanlineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanlineBuffer")
            .field("held", &self.lines.iter().filter(|l| l.is_some()).count())
            .field("decode_count", &self.decode_count)
            .finish_non_exhaustive()
    }
}
