//! Execution synchronizer
//!
//! Owns a [`Machine`] and mediates between the host context and the machine
//! context. The host queues [`Command`]s, grants run time with
//! [`allow_run_for`](ExecutionSynchronizer::allow_run_for) and takes the
//! machine with a bounded [`lock`](ExecutionSynchronizer::lock) when it needs
//! direct access. The machine context runs either on a thread started by
//! [`spawn`](ExecutionSynchronizer::spawn) or inside
//! [`process`](ExecutionSynchronizer::process) calls from a single-threaded
//! host.
//!
//! # Thread Safety
//! - The command inbox has its own mutex, held only to push or pop one command
//! - Run-time budget, pause and exit flags share one mutex and condvar
//! - The machine mutex is held for a whole time slice; lock requests make the
//!   machine context stand aside before its next slice

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::command::{Command, CommandQueue, DEFAULT_QUEUE_CAPACITY};
use super::host::HostCapabilities;
use super::machine::{Machine, MachineStatus};
use crate::{Error, Result};

/// Longest idle wait of the machine context
pub const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Time slice used while free-running at a speed limit
pub const FREE_RUN_SLICE_US: u64 = 10_000;

/// Lifecycle of the machine thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadStatus {
    /// No thread; the host drives [`ExecutionSynchronizer::process`]
    #[default]
    NotStarted,
    /// Thread is running
    Running,
    /// Thread exited after quit
    Finished,
    /// Thread terminated by a panic
    Failed,
}

/// Status reported to the host
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncStatus {
    /// Machine status after the last time slice
    pub machine: MachineStatus,
    /// Machine thread lifecycle
    pub thread: ThreadStatus,
    /// Emulated time over wall time of the last slice, in percent
    pub speed_percentage: f32,
    /// True while paused
    pub paused: bool,
    /// Commands dropped because the queue was full or closed
    pub dropped_commands: u64,
}

struct Inbox {
    queue: CommandQueue,
    /// Key state as last queued, to drop repeated events
    keys: [bool; 128],
}

struct Control {
    paused: bool,
    allowed_us: u64,
    exit: bool,
    lock_requests: usize,
    thread: ThreadStatus,
    speed_limit: u32,
    measured_speed: f32,
    status: MachineStatus,
}

enum Slice {
    Budget(u64),
    FreeRun(u64),
}

struct Shared<M> {
    machine: Mutex<M>,
    inbox: Mutex<Inbox>,
    control: Mutex<Control>,
    cv: Condvar,
    caps: Mutex<HostCapabilities>,
}

impl<M: Machine> Shared<M> {
    fn next_slice(&self) -> Option<Option<Slice>> {
        let mut c = self.control.lock();
        loop {
            if c.exit {
                return None;
            }
            if !c.paused && c.lock_requests == 0 {
                if c.allowed_us > 0 {
                    return Some(Some(Slice::Budget(c.allowed_us)));
                }
                if c.speed_limit > 0 {
                    return Some(Some(Slice::FreeRun(FREE_RUN_SLICE_US)));
                }
            }
            if self.cv.wait_for(&mut c, IDLE_WAIT).timed_out() {
                return Some(None);
            }
        }
    }

    fn drain_commands(&self, machine: &mut M) {
        loop {
            let command = self.inbox.lock().queue.pop();
            match command {
                Some(command) => command.apply(machine),
                None => break,
            }
        }
    }

    fn process(&self) -> bool {
        let slice = match self.next_slice() {
            None => return false,
            Some(None) => return true,
            Some(Some(slice)) => slice,
        };
        let us = match slice {
            Slice::Budget(us) | Slice::FreeRun(us) => us,
        };

        let started = Instant::now();
        let (result, status) = {
            let mut machine = self.machine.lock();
            self.drain_commands(&mut machine);
            let result = machine.run(us);
            (result, machine.status())
        };
        if let Err(e) = result {
            self.caps.lock().report_error(&e.to_string());
        }
        self.run_process_callback();

        let mut c = self.control.lock();
        match slice {
            Slice::Budget(_) => c.allowed_us = c.allowed_us.saturating_sub(us),
            Slice::FreeRun(_) => {
                let target = Duration::from_micros(us * 100 / u64::from(c.speed_limit.max(1)));
                let deadline = started + target;
                while !c.exit && Instant::now() < deadline {
                    if self.cv.wait_until(&mut c, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        let elapsed = started.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            c.measured_speed = us as f32 / (elapsed * 10_000.0);
        }
        c.status = status;
        drop(c);
        self.cv.notify_all();
        true
    }

    fn run_process_callback(&self) {
        let mut caps = self.caps.lock();
        let result = match caps.process_callback.as_mut() {
            Some(callback) => callback(),
            None => return,
        };
        if let Err(e) = result {
            caps.report_error(&e.to_string());
        }
    }

    fn release_lock_request(&self) {
        let mut c = self.control.lock();
        c.lock_requests = c.lock_requests.saturating_sub(1);
        drop(c);
        self.cv.notify_all();
    }
}

/// Sets the final thread status when the machine thread ends
struct ExitGuard<M>(Arc<Shared<M>>);

impl<M> Drop for ExitGuard<M> {
    fn drop(&mut self) {
        let mut c = self.0.control.lock();
        c.thread = if std::thread::panicking() {
            ThreadStatus::Failed
        } else {
            ThreadStatus::Finished
        };
        c.exit = true;
        drop(c);
        self.0.cv.notify_all();
        tracing::debug!("machine thread exiting");
    }
}

/// Exclusive access to the machine; dropping it unlocks
pub struct MachineGuard<'a, M: Machine> {
    guard: MutexGuard<'a, M>,
    shared: &'a Shared<M>,
}

impl<M: Machine> Deref for MachineGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.guard
    }
}

impl<M: Machine> DerefMut for MachineGuard<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.guard
    }
}

impl<M: Machine> Drop for MachineGuard<'_, M> {
    fn drop(&mut self) {
        self.shared.release_lock_request();
    }
}

/// Runs a machine on its own context and relays host requests to it
pub struct ExecutionSynchronizer<M: Machine + 'static> {
    shared: Arc<Shared<M>>,
    handle: Option<JoinHandle<()>>,
}

impl<M: Machine + 'static> ExecutionSynchronizer<M> {
    /// Wrap `machine`; starts paused with no run time granted
    ///
    /// # Errors
    ///
    /// `Error::Resource` if the command queue cannot be allocated.
    pub fn new(machine: M, caps: HostCapabilities) -> Result<Self> {
        Self::with_queue_capacity(machine, caps, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`new`](Self::new) with an explicit command queue size
    pub fn with_queue_capacity(machine: M, caps: HostCapabilities, capacity: usize) -> Result<Self> {
        let status = machine.status();
        let shared = Arc::new(Shared {
            machine: Mutex::new(machine),
            inbox: Mutex::new(Inbox {
                queue: CommandQueue::new(capacity)?,
                keys: [false; 128],
            }),
            control: Mutex::new(Control {
                paused: true,
                allowed_us: 0,
                exit: false,
                lock_requests: 0,
                thread: ThreadStatus::NotStarted,
                speed_limit: 0,
                measured_speed: 0.0,
                status,
            }),
            cv: Condvar::new(),
            caps: Mutex::new(caps),
        });
        Ok(Self {
            shared,
            handle: None,
        })
    }

    /// Queue a command for the machine context
    ///
    /// Key events that repeat the last queued state of a key are dropped
    /// here.
    ///
    /// # Errors
    ///
    /// `Error::QueueFull` or `Error::ShuttingDown`; the command is dropped.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        let mut inbox = self.shared.inbox.lock();
        if let Command::Keyboard { code, pressed } = command {
            if inbox.keys[usize::from(code & 0x7F)] == pressed {
                return Ok(());
            }
        }
        if let Err(e) = inbox.queue.push(command) {
            tracing::debug!(?command, "command dropped: {e}");
            return Err(e);
        }
        match command {
            Command::Keyboard { code, pressed } => inbox.keys[usize::from(code & 0x7F)] = pressed,
            Command::ResetKeyboard => inbox.keys = [false; 128],
            _ => {}
        }
        Ok(())
    }

    /// Queue a warm or cold reset
    pub fn reset(&self, cold: bool) -> Result<()> {
        self.enqueue(Command::Reset { cold })
    }

    /// Queue a volume change
    pub fn set_audio_volume(&self, volume: f32) -> Result<()> {
        self.enqueue(Command::SetVolume(volume))
    }

    /// Queue a key press or release
    pub fn set_keyboard_state(&self, code: u8, pressed: bool) -> Result<()> {
        self.enqueue(Command::Keyboard { code, pressed })
    }

    /// Queue a mouse event
    pub fn set_mouse_state(&self, dx: i8, dy: i8, buttons: u8, wheel: u8) -> Result<()> {
        self.enqueue(Command::Mouse {
            dx,
            dy,
            buttons,
            wheel,
        })
    }

    /// Queue a release of every key
    pub fn reset_keyboard(&self) -> Result<()> {
        self.enqueue(Command::ResetKeyboard)
    }

    /// Queue tape play
    pub fn tape_play(&self) -> Result<()> {
        self.enqueue(Command::TapePlay)
    }

    /// Queue tape record
    pub fn tape_record(&self) -> Result<()> {
        self.enqueue(Command::TapeRecord)
    }

    /// Queue tape stop
    pub fn tape_stop(&self) -> Result<()> {
        self.enqueue(Command::TapeStop)
    }

    /// Queue a tape seek
    pub fn tape_seek(&self, secs: f64) -> Result<()> {
        self.enqueue(Command::TapeSeek(secs))
    }

    /// Queue a seek to the nearest cue point
    pub fn tape_seek_to_cue_point(&self, forward: bool, secs: f64) -> Result<()> {
        self.enqueue(Command::TapeSeekToCuePoint { forward, secs })
    }

    /// Queue a demo stop
    pub fn stop_demo(&self) -> Result<()> {
        self.enqueue(Command::StopDemo)
    }

    /// Commands waiting for the machine context
    pub fn queued_commands(&self) -> usize {
        self.shared.inbox.lock().queue.len()
    }

    /// Apply queued commands and run `us` microseconds on the calling thread
    ///
    /// For hosts that own the machine context themselves; do not mix with
    /// [`spawn`](Self::spawn).
    pub fn run_for(&self, us: u64) -> Result<()> {
        let mut machine = self.shared.machine.lock();
        self.shared.drain_commands(&mut machine);
        let result = machine.run(us);
        let status = machine.status();
        drop(machine);
        self.shared.control.lock().status = status;
        result
    }

    /// Pause (`true`) or resume the machine context
    pub fn pause(&self, paused: bool) {
        self.shared.control.lock().paused = paused;
        self.shared.cv.notify_all();
    }

    /// True while paused
    pub fn is_paused(&self) -> bool {
        self.shared.control.lock().paused
    }

    /// Free-running speed limit in percent; 0 runs only granted time
    pub fn set_speed_percentage(&self, percent: u32) {
        self.shared.control.lock().speed_limit = percent;
        self.shared.cv.notify_all();
    }

    /// Grant `us` microseconds of run time, typically one host frame
    pub fn allow_run_for(&self, us: u64) {
        let mut c = self.shared.control.lock();
        c.allowed_us = c.allowed_us.saturating_add(us);
        drop(c);
        self.shared.cv.notify_all();
    }

    /// True once all granted run time has been used
    pub fn is_ready(&self) -> bool {
        self.shared.control.lock().allowed_us == 0
    }

    /// Wait up to `timeout` for [`is_ready`](Self::is_ready)
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut c = self.shared.control.lock();
        while c.allowed_us > 0 && !c.exit {
            if self.shared.cv.wait_until(&mut c, deadline).timed_out() {
                break;
            }
        }
        c.allowed_us == 0
    }

    /// Take exclusive access to the machine, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// `Error::LockTimeout` if the machine context did not stand aside in
    /// time, `Error::ThreadTerminated` after quit or a thread failure.
    pub fn lock(&self, timeout: Duration) -> Result<MachineGuard<'_, M>> {
        {
            let mut c = self.shared.control.lock();
            if c.exit || matches!(c.thread, ThreadStatus::Finished | ThreadStatus::Failed) {
                return Err(Error::ThreadTerminated);
            }
            c.lock_requests += 1;
        }
        self.shared.cv.notify_all();
        match self.shared.machine.try_lock_for(timeout) {
            Some(guard) => Ok(MachineGuard {
                guard,
                shared: &*self.shared,
            }),
            None => {
                self.shared.release_lock_request();
                Err(Error::LockTimeout)
            }
        }
    }

    /// Start the machine thread
    ///
    /// # Errors
    ///
    /// `Error::Resource` if the thread cannot be created, `Error::Other` if
    /// it was already started.
    pub fn spawn(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::Other("machine thread already started".into()));
        }
        self.shared.control.lock().thread = ThreadStatus::Running;
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("ep128-machine".into())
            .spawn(move || {
                let guard = ExitGuard(shared);
                tracing::debug!("machine thread started");
                while guard.0.process() {}
            })
            .map_err(|e| {
                self.shared.control.lock().thread = ThreadStatus::NotStarted;
                Error::Resource(format!("machine thread: {e}"))
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Run one time slice, or wait briefly if there is nothing to run
    ///
    /// For single-threaded hosts; must not be called while holding a
    /// [`MachineGuard`]. Returns `false` after [`quit`](Self::quit).
    pub fn process(&self) -> bool {
        self.shared.process()
    }

    /// Stop the machine context and refuse further commands
    ///
    /// With `wait` the machine thread is joined before returning.
    pub fn quit(&mut self, wait: bool) {
        self.shared.control.lock().exit = true;
        self.shared.inbox.lock().queue.close();
        self.shared.cv.notify_all();
        if !wait {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("machine thread panicked");
            }
        }
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        let dropped_commands = self.shared.inbox.lock().queue.dropped();
        let c = self.shared.control.lock();
        SyncStatus {
            machine: c.status,
            thread: c.thread,
            speed_percentage: c.measured_speed,
            paused: c.paused,
            dropped_commands,
        }
    }

    /// Report a non-fatal error through the host capabilities
    pub fn report_error(&self, msg: &str) {
        self.shared.caps.lock().report_error(msg);
    }
}

impl<M: Machine + 'static> Drop for ExecutionSynchronizer<M> {
    fn drop(&mut self) {
        self.quit(true);
    }
}

impl<M: Machine + 'static> std::fmt::Debug for ExecutionSynchronizer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSynchronizer")
            .field("status", &self.status())
            .field("threaded", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleRing;
    use crate::config::SoundConfig;
    use crate::vm::machine::DaveMachine;

    fn synchronizer() -> ExecutionSynchronizer<DaveMachine> {
        let ring = Arc::new(SampleRing::new(16_384).unwrap());
        let machine = DaveMachine::new(&SoundConfig::default(), ring);
        ExecutionSynchronizer::new(machine, HostCapabilities::default()).unwrap()
    }

    #[test]
    fn test_single_threaded_budget() {
        let sync = synchronizer();
        sync.allow_run_for(1000);
        // paused: nothing runs
        assert!(sync.process());
        assert!(!sync.is_ready());

        sync.pause(false);
        assert!(sync.process());
        assert!(sync.is_ready());
        assert_eq!(sync.status().machine.steps, 250);
    }

    #[test]
    fn test_repeated_key_events_are_dropped() {
        let sync = synchronizer();
        sync.set_keyboard_state(5, true).unwrap();
        sync.set_keyboard_state(5, true).unwrap();
        sync.set_keyboard_state(5, false).unwrap();
        sync.set_keyboard_state(0x85, false).unwrap();
        assert_eq!(sync.queued_commands(), 2);
        sync.reset_keyboard().unwrap();
        sync.set_keyboard_state(5, false).unwrap();
        assert_eq!(sync.queued_commands(), 3);

        sync.run_for(100).unwrap();
        assert_eq!(sync.queued_commands(), 0);
    }

    #[test]
    fn test_full_queue_reports_drop() {
        let ring = Arc::new(SampleRing::new(1024).unwrap());
        let machine = DaveMachine::new(&SoundConfig::default(), ring);
        let sync =
            ExecutionSynchronizer::with_queue_capacity(machine, HostCapabilities::default(), 2)
                .unwrap();
        sync.tape_play().unwrap();
        sync.tape_stop().unwrap();
        assert!(matches!(sync.stop_demo(), Err(Error::QueueFull)));
        assert_eq!(sync.status().dropped_commands, 1);
    }

    #[test]
    fn test_threaded_lock_and_ready() {
        let mut sync = synchronizer();
        sync.spawn().unwrap();
        sync.pause(false);

        for _ in 0..5 {
            sync.allow_run_for(20_000);
            assert!(sync.wait_ready(Duration::from_secs(5)));
        }
        {
            let mut machine = sync.lock(Duration::from_secs(5)).unwrap();
            assert_eq!(machine.status().steps, 25_000);
            machine.dave_mut().write_register(0x00, 0x12);
        }
        sync.allow_run_for(4);
        assert!(sync.wait_ready(Duration::from_secs(5)));
        assert_eq!(sync.status().machine.steps, 25_001);
        assert_eq!(sync.status().thread, ThreadStatus::Running);

        sync.quit(true);
        assert_eq!(sync.status().thread, ThreadStatus::Finished);
        assert!(matches!(
            sync.lock(Duration::from_millis(10)),
            Err(Error::ThreadTerminated)
        ));
        assert!(matches!(sync.tape_play(), Err(Error::ShuttingDown)));
        assert!(!sync.process());
    }

    #[test]
    fn test_lock_times_out_while_held() {
        let sync = Arc::new(synchronizer());
        let guard = sync.lock(Duration::from_millis(10)).unwrap();
        let other = Arc::clone(&sync);
        let waited = std::thread::spawn(move || {
            matches!(other.lock(Duration::from_millis(20)), Err(Error::LockTimeout))
        });
        assert!(waited.join().unwrap());
        drop(guard);
        assert!(sync.lock(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_process_callback_errors_are_reported() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let caps = HostCapabilities::default()
            .with_error_callback(move |msg| sink.lock().push(msg.to_string()))
            .with_process_callback(|| Err(Error::Other("host went away".into())));
        let ring = Arc::new(SampleRing::new(1024).unwrap());
        let sync =
            ExecutionSynchronizer::new(DaveMachine::new(&SoundConfig::default(), ring), caps)
                .unwrap();
        sync.pause(false);
        sync.allow_run_for(100);
        assert!(sync.process());
        assert_eq!(*errors.lock(), vec!["host went away".to_string()]);
    }
}
