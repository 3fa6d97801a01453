//! Host to machine commands
//!
//! The host never touches machine state directly while the machine thread
//! runs; it queues [`Command`]s which the machine context applies before its
//! next time slice.

use super::machine::Machine;
use crate::{Error, Result};

/// Default number of queued commands before new ones are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A request from the host context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Warm or cold reset
    Reset {
        /// Clear memory and configuration as well
        cold: bool,
    },
    /// Output volume, 0.0 to 1.0
    SetVolume(f32),
    /// Key press or release; `code` is 0..=127
    Keyboard {
        /// Machine key code
        code: u8,
        /// Pressed or released
        pressed: bool,
    },
    /// Relative mouse motion and button state
    Mouse {
        /// Horizontal motion, positive is left
        dx: i8,
        /// Vertical motion, positive is up
        dy: i8,
        /// Button bits, b0 left, b1 right, b2 middle
        buttons: u8,
        /// Wheel events: 1 up, 2 down, 4 left, 8 right
        wheel: u8,
    },
    /// Release every key and mouse button
    ResetKeyboard,
    /// Press the tape play button
    TapePlay,
    /// Press the tape record button
    TapeRecord,
    /// Press the tape stop button
    TapeStop,
    /// Move the tape to an absolute time in seconds
    TapeSeek(f64),
    /// Move to the nearest cue point, or by `secs` if there is none
    TapeSeekToCuePoint {
        /// Search direction
        forward: bool,
        /// Fallback distance in seconds
        secs: f64,
    },
    /// Stop demo playback or recording
    StopDemo,
}

impl Command {
    /// Apply the command to `machine`
    pub fn apply<M: Machine + ?Sized>(self, machine: &mut M) {
        match self {
            Command::Reset { cold } => machine.reset(cold),
            Command::SetVolume(volume) => machine.set_audio_volume(volume),
            Command::Keyboard { code, pressed } => machine.set_keyboard_state(code & 0x7F, pressed),
            Command::Mouse {
                dx,
                dy,
                buttons,
                wheel,
            } => machine.set_mouse_state(dx, dy, buttons, wheel),
            Command::ResetKeyboard => machine.reset_keyboard(),
            Command::TapePlay => machine.tape_play(),
            Command::TapeRecord => machine.tape_record(),
            Command::TapeStop => machine.tape_stop(),
            Command::TapeSeek(secs) => machine.tape_seek(secs),
            Command::TapeSeekToCuePoint { forward, secs } => {
                machine.tape_seek_to_cue_point(forward, secs)
            }
            Command::StopDemo => machine.stop_demo(),
        }
    }
}

/// Fixed-capacity FIFO of commands
///
/// Storage is allocated once; when the ring is full new commands are
/// dropped and counted.
#[derive(Debug)]
pub struct CommandQueue {
    slots: Vec<Option<Command>>,
    head: usize,
    len: usize,
    closed: bool,
    dropped: u64,
}

impl CommandQueue {
    /// Create a queue holding up to `capacity` commands
    ///
    /// # Errors
    ///
    /// `Error::Resource` for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Resource("command queue capacity must be > 0".into()));
        }
        Ok(Self {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
            closed: false,
            dropped: 0,
        })
    }

    /// Append `command`
    ///
    /// # Errors
    ///
    /// `Error::ShuttingDown` once the queue is closed, `Error::QueueFull`
    /// when every slot is taken. The command is dropped in both cases.
    pub fn push(&mut self, command: Command) -> Result<()> {
        if self.closed {
            self.dropped += 1;
            return Err(Error::ShuttingDown);
        }
        if self.len == self.slots.len() {
            self.dropped += 1;
            return Err(Error::QueueFull);
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(command);
        self.len += 1;
        Ok(())
    }

    /// Remove the oldest command
    pub fn pop(&mut self) -> Option<Command> {
        if self.len == 0 {
            return None;
        }
        let command = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        command
    }

    /// Refuse further commands and discard the queued ones
    pub fn close(&mut self) {
        self.closed = true;
        while self.pop().is_some() {}
    }

    /// True once closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queued commands
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum queued commands
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Commands rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_wrap() {
        let mut q = CommandQueue::new(3).unwrap();
        for round in 0..5u8 {
            q.push(Command::Keyboard {
                code: round,
                pressed: true,
            })
            .unwrap();
            q.push(Command::ResetKeyboard).unwrap();
            assert_eq!(
                q.pop(),
                Some(Command::Keyboard {
                    code: round,
                    pressed: true
                })
            );
            assert_eq!(q.pop(), Some(Command::ResetKeyboard));
            assert!(q.is_empty());
        }
    }

    #[test]
    fn test_full_queue_drops() {
        let mut q = CommandQueue::new(2).unwrap();
        q.push(Command::TapePlay).unwrap();
        q.push(Command::TapeStop).unwrap();
        assert!(matches!(q.push(Command::StopDemo), Err(Error::QueueFull)));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop(), Some(Command::TapePlay));
        assert_eq!(q.pop(), Some(Command::TapeStop));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let mut q = CommandQueue::new(4).unwrap();
        q.push(Command::TapePlay).unwrap();
        q.close();
        assert!(q.is_empty());
        assert!(matches!(
            q.push(Command::Reset { cold: true }),
            Err(Error::ShuttingDown)
        ));
        assert!(CommandQueue::new(0).is_err());
    }
}
