//! Machine & Synchronization
//!
//! The execution layer between a host frontend and the emulated machine:
//! - `command` - Host requests and the bounded command queue
//! - `demo` - Keyboard event logs for deterministic record/replay
//! - `machine` - The [`Machine`] boundary and the Dave reference machine
//! - `pattern` - Test pattern video chip
//! - `host` - Capabilities the host hands over at construction
//! - `sync` - [`ExecutionSynchronizer`], machine thread and bounded locking

pub mod command;
pub mod demo;
pub mod host;
pub mod machine;
pub mod pattern;
pub mod sync;

pub use command::{Command, CommandQueue, DEFAULT_QUEUE_CAPACITY};
pub use demo::{
    read_time_delta, write_time_delta, DemoEvent, DemoPlayer, DemoRecorder, DEMO_VERSION,
};
pub use host::{ErrorCallback, HostCapabilities, ProcessCallback};
pub use machine::{
    DaveMachine, DemoSink, Machine, MachineStatus, MouseState, VideoChip, MACHINE_STATE_VERSION,
};
pub use pattern::TestPatternChip;
pub use sync::{ExecutionSynchronizer, MachineGuard, SyncStatus, ThreadStatus};
