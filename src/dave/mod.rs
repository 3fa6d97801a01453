//! Dave Sound Chip Domain
//!
//! Enterprise 128 "Dave" emulation: tone/noise synthesis, polynomial
//! counters, interrupt controller, paging and keyboard ports.
//!
//! Implementation:
//! - `chip` - Cycle-stepped engine and port I/O
//! - `polycnt` - Tabulated polynomial counters
//! - `registers` - Port map and register bitflags
//! - `snapshot` - State chunk save/load

pub mod chip;
pub mod polycnt;
pub mod registers;
pub mod snapshot;

pub use chip::{Dave, Interrupt, PolySource, SoundIntSource, DAVE_CLOCK_HZ};
pub use polycnt::VariableLength;
pub use registers::{InterruptStatus, Register};
pub use snapshot::DAVE_STATE_VERSION;
