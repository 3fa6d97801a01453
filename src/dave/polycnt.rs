//! Polynomial counter tables
//!
//! Dave's noise sources are maximal-length shift registers. Rather than
//! clocking them bit by bit, each sequence is tabulated once per process
//! and played back by a phase counter that decrements every cycle.

use std::sync::OnceLock;

/// Feedback polynomials, indexed by register length
const POLY_4: u32 = 8;
const POLY_5: u32 = 19;
const POLY_7: u32 = 64;
const POLY_9: u32 = 265;
const POLY_11: u32 = 1027;
const POLY_15: u32 = 16384;
const POLY_17: u32 = 65541;

/// Selectable length of the variable length counter (register 6 bits 2-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VariableLength {
    /// 17-bit counter
    #[default]
    Bits17,
    /// 15-bit counter
    Bits15,
    /// 11-bit counter
    Bits11,
    /// 9-bit counter
    Bits9,
}

impl VariableLength {
    /// Decode bits 2-3 of register 6
    pub fn from_register(value: u8) -> Self {
        match value & 0x0C {
            0x00 => VariableLength::Bits17,
            0x04 => VariableLength::Bits15,
            0x08 => VariableLength::Bits11,
            _ => VariableLength::Bits9,
        }
    }

    /// Register width in bits; also the snapshot selector byte
    pub fn bits(self) -> u8 {
        match self {
            VariableLength::Bits17 => 17,
            VariableLength::Bits15 => 15,
            VariableLength::Bits11 => 11,
            VariableLength::Bits9 => 9,
        }
    }

    /// Inverse of [`VariableLength::bits`]; unknown widths map to 17 bits
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            9 => VariableLength::Bits9,
            11 => VariableLength::Bits11,
            15 => VariableLength::Bits15,
            _ => VariableLength::Bits17,
        }
    }

    /// Sequence length (2^n - 1)
    pub fn table_len(self) -> usize {
        (1usize << self.bits()) - 1
    }

    /// Largest phase value (table length - 1)
    pub fn max_phase(self) -> i32 {
        self.table_len() as i32 - 1
    }
}

/// Pre-computed output sequences of every counter Dave has
pub struct PolyTables {
    /// 4-bit counter (15 entries)
    pub poly4: Box<[u8]>,
    /// 5-bit counter (31 entries)
    pub poly5: Box<[u8]>,
    /// 7-bit counter (127 entries)
    pub poly7: Box<[u8]>,
    poly9: Box<[u8]>,
    poly11: Box<[u8]>,
    poly15: Box<[u8]>,
    poly17: Box<[u8]>,
}

impl PolyTables {
    fn generate() -> Self {
        Self {
            poly4: calculate_polycnt(4, POLY_4),
            poly5: calculate_polycnt(5, POLY_5),
            poly7: calculate_polycnt(7, POLY_7),
            poly9: calculate_polycnt(9, POLY_9),
            poly11: calculate_polycnt(11, POLY_11),
            poly15: calculate_polycnt(15, POLY_15),
            poly17: calculate_polycnt(17, POLY_17),
        }
    }

    /// Table backing the variable length counter at the given length
    pub fn variable(&self, length: VariableLength) -> &[u8] {
        match length {
            VariableLength::Bits17 => &self.poly17,
            VariableLength::Bits15 => &self.poly15,
            VariableLength::Bits11 => &self.poly11,
            VariableLength::Bits9 => &self.poly9,
        }
    }
}

impl std::fmt::Debug for PolyTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyTables").finish_non_exhaustive()
    }
}

/// Shared tables, built on first use
pub fn tables() -> &'static PolyTables {
    static TABLES: OnceLock<PolyTables> = OnceLock::new();
    TABLES.get_or_init(PolyTables::generate)
}

/// Generate `2^nbits - 1` output bits of a counter with feedback `poly`
///
/// The table is played back in reverse (phases count down), which matches a
/// tone channel sampling the counter on real hardware.
fn calculate_polycnt(nbits: u32, poly: u32) -> Box<[u8]> {
    let len = (1usize << nbits) - 1;
    let mut table = vec![0u8; len];
    let mut shift: u32 = 0x7FFF_FFFF;
    let mut bit: u32 = 1;
    for slot in table.iter_mut() {
        bit = (bit ^ (shift & poly).count_ones()) & 1;
        shift = (shift << 1) | bit;
        *slot = bit as u8;
    }
    table.into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lengths() {
        let t = tables();
        assert_eq!(t.poly4.len(), 15);
        assert_eq!(t.poly5.len(), 31);
        assert_eq!(t.poly7.len(), 127);
        for len in [
            VariableLength::Bits9,
            VariableLength::Bits11,
            VariableLength::Bits15,
            VariableLength::Bits17,
        ] {
            assert_eq!(t.variable(len).len(), len.table_len());
        }
    }

    #[test]
    fn test_tables_are_binary_and_not_constant() {
        let t = tables();
        for table in [&t.poly4[..], &t.poly5[..], &t.poly7[..]] {
            assert!(table.iter().all(|&b| b <= 1));
            assert!(table.contains(&0));
            assert!(table.contains(&1));
        }
    }

    #[test]
    fn test_variable_length_register_decoding() {
        assert_eq!(VariableLength::from_register(0x00), VariableLength::Bits17);
        assert_eq!(VariableLength::from_register(0x04), VariableLength::Bits15);
        assert_eq!(VariableLength::from_register(0x08), VariableLength::Bits11);
        assert_eq!(VariableLength::from_register(0xFC), VariableLength::Bits9);
        assert_eq!(VariableLength::Bits17.max_phase(), 131_070);
        assert_eq!(VariableLength::Bits9.max_phase(), 510);
        assert_eq!(VariableLength::from_bits(3), VariableLength::Bits17);
    }
}
