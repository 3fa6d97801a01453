//! Producer/consumer frame pipeline
//!
//! The machine side ([`FrameProducer`]) pushes encoded scanlines and vsync
//! edges; a frame-done event is synthesized at the end of every field. The
//! host side ([`FramePipeline`]) drains the event queue, keeps the latest
//! payload per physical line, and on frame-done decodes and composites the
//! viewport into the active framebuffer.
//!
//! # Thread Safety
//! - The event queue is one `parking_lot::Mutex`, held only to move a
//!   payload in or out of the pool
//! - The producer never waits; a line still queued for the same index is
//!   overwritten in place
//! - After [`FramePipeline::shutdown`] every new event is dropped

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::colormap::{Colormap, IndexToRgb, PixelFormat};
use super::decode::LINE_WIDTH;
use super::geometry::{BorderScan, FrameGeometry, LineScan, Rect, SCREEN_HEIGHT};
use super::line_buffer::{LineData, MessagePool, ScanlineBuffer, LINE_SLOTS};
use crate::{Error, Result};

/// Shortest field, in lines, before a vsync pulse may end it
pub const VSYNC_MIN_LINES: i32 = 261;
/// Longest field before one is forced without a vsync pulse
pub const VSYNC_MAX_LINES: i32 = 342;
/// Lines between the detected pulse and the frame-done event
pub const VSYNC_OFFSET: i32 = 3;
/// Raster slots where a vsync rising edge marks the odd field
pub const ODD_FIELD_SLOTS: Range<u32> = 20..48;
/// Fields interlaced addressing stays on after the last odd field
pub const INTERLACE_HOLD_FIELDS: u8 = 3;

/// Machine-side video output
pub trait VideoSink: Send {
    /// Next scanline of the current field, in wire format
    fn draw_line(&mut self, encoded: &[u8]);

    /// VSYNC changed level; `slot` is the raster slot within the line
    fn notify_field_sync(&mut self, active: bool, slot: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Line { line: usize, slot: usize },
    FrameDone,
}

#[derive(Debug)]
struct EventQueue {
    events: VecDeque<Event>,
    pool: MessagePool,
    /// Pool slot of the queued, not yet drained payload of each line
    pending: Vec<Option<usize>>,
    dropped: u64,
}

impl EventQueue {
    fn new() -> Result<Self> {
        let mut events = VecDeque::new();
        events
            .try_reserve_exact(2 * LINE_SLOTS + 1)
            .map_err(|e| Error::Resource(format!("video event queue: {e}")))?;
        Ok(Self {
            events,
            pool: MessagePool::new(LINE_SLOTS)?,
            pending: vec![None; LINE_SLOTS],
            dropped: 0,
        })
    }

    fn clear(&mut self) {
        while let Some(ev) = self.events.pop_front() {
            if let Event::Line { line, slot } = ev {
                self.pool.release(slot);
                self.pending[line] = None;
            }
        }
    }
}

/// Longest wait for the frame lock during shutdown
const SHUTDOWN_LOCK_WAIT: Duration = Duration::from_millis(10);

/// Host-side framebuffers
#[derive(Debug)]
struct FrameStore {
    active: Vec<u32>,
    spare: Vec<u32>,
    width: usize,
    height: usize,
    format: PixelFormat,
    ready: bool,
    frame_count: u64,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<EventQueue>,
    shutdown: AtomicBool,
    interlace: AtomicU8,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    frame: Mutex<FrameStore>,
    frame_cv: Condvar,
}

impl Shared {
    fn queue_line(&self, line: usize, encoded: &[u8]) {
        let mut q = self.queue.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Some(slot) = q.pending[line] {
            q.pool.get_mut(slot).copy_from(encoded);
            return;
        }
        let Some(slot) = q.pool.alloc() else {
            q.dropped += 1;
            return;
        };
        q.pool.get_mut(slot).copy_from(encoded);
        q.pending[line] = Some(slot);
        q.events.push_back(Event::Line { line, slot });
    }

    fn queue_frame_done(&self) {
        {
            let mut q = self.queue.lock();
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            // back-to-back frame-done events carry nothing new
            if q.events.back() != Some(&Event::FrameDone) {
                q.events.push_back(Event::FrameDone);
            }
        }
        self.notify_wake();
    }

    fn notify_wake(&self) {
        *self.wake.lock() = true;
        self.wake_cv.notify_one();
    }
}

/// Machine-side half of the pipeline
///
/// Tracks the current output line and the vsync pulse counter. Lines land
/// two slots apart (even field 0, 2, 4, ...; odd field -1, 1, 3, ...).
#[derive(Debug)]
pub struct FrameProducer {
    shared: Arc<Shared>,
    cur_line: i32,
    vsync_cnt: i32,
    vsync_state: bool,
    odd_field: bool,
    field_count: u64,
}

impl FrameProducer {
    /// Queue `encoded` for physical line `line`
    ///
    /// Lines outside the slot range are ignored.
    pub fn submit_scanline(&mut self, line: usize, encoded: &[u8]) {
        if line < LINE_SLOTS {
            self.shared.queue_line(line, encoded);
        }
    }

    /// Queue a frame-done event
    pub fn frame_done(&mut self) {
        self.shared.queue_frame_done();
    }

    /// True if the current field was detected as the odd one
    pub fn is_odd_field(&self) -> bool {
        self.odd_field
    }

    /// Fields completed so far
    pub fn field_count(&self) -> u64 {
        self.field_count
    }

    /// Slot the next [`VideoSink::draw_line`] writes to
    pub fn current_line(&self) -> i32 {
        self.cur_line
    }
}

impl VideoSink for FrameProducer {
    fn draw_line(&mut self, encoded: &[u8]) {
        if let Ok(line) = usize::try_from(self.cur_line) {
            self.submit_scanline(line, encoded);
        }
        if self.vsync_cnt != 0 {
            self.cur_line += 2;
            if self.vsync_cnt >= VSYNC_MIN_LINES + 2 - VSYNC_OFFSET
                && (self.vsync_state || self.vsync_cnt >= VSYNC_MAX_LINES + 2 - VSYNC_OFFSET)
            {
                self.vsync_cnt = 2 - VSYNC_OFFSET;
            }
            self.vsync_cnt += 1;
        } else {
            self.cur_line = if self.odd_field { -1 } else { 0 };
            self.vsync_cnt += 1;
            self.frame_done();
            self.field_count += 1;
        }
    }

    fn notify_field_sync(&mut self, active: bool, slot: u32) {
        self.vsync_state = active;
        if active && self.vsync_cnt >= VSYNC_MIN_LINES + 2 - VSYNC_OFFSET {
            self.vsync_cnt = 2 - VSYNC_OFFSET;
            self.odd_field = ODD_FIELD_SLOTS.contains(&slot);
            if self.odd_field {
                self.shared
                    .interlace
                    .store(INTERLACE_HOLD_FIELDS, Ordering::Release);
            } else {
                let _ = self
                    .shared
                    .interlace
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        Some(n.saturating_sub(1))
                    });
            }
        }
    }
}

struct Consumer {
    scanlines: ScanlineBuffer,
    scratch: LineData,
    geometry: FrameGeometry,
    colormap: Colormap,
    half_frame: bool,
    scan_borders: bool,
}

/// Read access to a completed frame
///
/// Holds the frame lock; drop it before the next frame is due.
/// Compositing on another thread blocks until then, so do not wait on
/// [`FramePipeline::process_events`] or [`FramePipeline::pump`] while
/// holding one.
pub struct FrameGuard<'a> {
    store: MutexGuard<'a, FrameStore>,
}

impl FrameGuard<'_> {
    /// Pixels, row-major, `width()` per row
    ///
    /// RGB565 pixels occupy the low 16 bits of each element.
    pub fn pixels(&self) -> &[u32] {
        &self.store.active[..self.store.width * self.store.height]
    }

    /// Frame width in pixels
    pub fn width(&self) -> usize {
        self.store.width
    }

    /// Frame height in lines
    pub fn height(&self) -> usize {
        self.store.height
    }

    /// Pixel format of [`pixels`](Self::pixels)
    pub fn format(&self) -> PixelFormat {
        self.store.format
    }

    /// Sequence number of this frame
    pub fn frame_number(&self) -> u64 {
        self.store.frame_count
    }
}

/// Host-side half of the pipeline
pub struct FramePipeline {
    shared: Arc<Shared>,
    consumer: Mutex<Consumer>,
    decode_count: AtomicU64,
    frame_count: AtomicU64,
}

impl FramePipeline {
    /// Create a pipeline producing `format` pixels from the Nick palette
    ///
    /// # Errors
    ///
    /// `Error::Resource` if the line pool or framebuffers cannot be
    /// allocated.
    pub fn new(format: PixelFormat, half_frame: bool) -> Result<Self> {
        Self::with_palette(format, half_frame, super::colormap::nick_palette)
    }

    /// Create a pipeline with a custom palette function
    pub fn with_palette(
        format: PixelFormat,
        half_frame: bool,
        index_to_rgb: IndexToRgb,
    ) -> Result<Self> {
        let pixels = LINE_WIDTH * SCREEN_HEIGHT;
        let mut active = Vec::new();
        let mut spare = Vec::new();
        active
            .try_reserve_exact(pixels)
            .and_then(|_| spare.try_reserve_exact(pixels))
            .map_err(|e| Error::Resource(format!("framebuffers: {e}")))?;
        active.resize(pixels, 0);
        spare.resize(pixels, 0);

        let shared = Arc::new(Shared {
            queue: Mutex::new(EventQueue::new()?),
            shutdown: AtomicBool::new(false),
            interlace: AtomicU8::new(0),
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
            frame: Mutex::new(FrameStore {
                active,
                spare,
                width: LINE_WIDTH,
                height: SCREEN_HEIGHT,
                format,
                ready: false,
                frame_count: 0,
            }),
            frame_cv: Condvar::new(),
        });
        let consumer = Consumer {
            scanlines: ScanlineBuffer::new()?,
            scratch: LineData::default(),
            geometry: FrameGeometry::new(),
            colormap: Colormap::new(format, index_to_rgb),
            half_frame,
            scan_borders: false,
        };
        tracing::debug!(?format, half_frame, "frame pipeline created");
        Ok(Self {
            shared,
            consumer: Mutex::new(consumer),
            decode_count: AtomicU64::new(0),
            frame_count: AtomicU64::new(0),
        })
    }

    /// A machine-side handle feeding this pipeline
    pub fn producer(&self) -> FrameProducer {
        FrameProducer {
            shared: Arc::clone(&self.shared),
            cur_line: 0,
            vsync_cnt: 0,
            vsync_state: false,
            odd_field: false,
            field_count: 0,
        }
    }

    /// Drain queued events up to and including the next frame-done
    ///
    /// Identical payloads are dropped without marking their line changed.
    /// On frame-done the viewport is composited (with a border scan if one
    /// was requested) and `true` is returned.
    pub fn process_events(&self) -> bool {
        let mut consumer = self.consumer.lock();
        if !self.check_events(&mut consumer) {
            return false;
        }
        let scan = std::mem::take(&mut consumer.scan_borders);
        self.render(&mut consumer, scan);
        true
    }

    /// Process events until the queue holds no complete frame
    ///
    /// Returns the number of frames composited.
    pub fn pump(&self) -> usize {
        let mut frames = 0;
        while self.process_events() {
            frames += 1;
        }
        frames
    }

    fn check_events(&self, consumer: &mut Consumer) -> bool {
        loop {
            let event = {
                let mut q = self.shared.queue.lock();
                let Some(event) = q.events.pop_front() else {
                    return false;
                };
                if let Event::Line { line, slot } = event {
                    consumer.scratch.clone_from(q.pool.get(slot));
                    q.pool.release(slot);
                    q.pending[line] = None;
                }
                event
            };
            match event {
                Event::Line { line, .. } => {
                    consumer.scanlines.store(line, &consumer.scratch);
                }
                Event::FrameDone => return true,
            }
        }
    }

    /// Composite the held lines into the active framebuffer
    ///
    /// With `scan_borders` the content box and border colour are
    /// re-detected while drawing.
    pub fn draw(&self, scan_borders: bool) {
        let mut consumer = self.consumer.lock();
        self.render(&mut consumer, scan_borders);
    }

    fn render(&self, consumer: &mut Consumer, scan_borders: bool) {
        let interlaced = self.shared.interlace.load(Ordering::Acquire) > 0;
        let Consumer {
            scanlines,
            geometry,
            colormap,
            half_frame,
            ..
        } = consumer;
        let vp = geometry.viewport();
        let width = vp.width();
        let before = scanlines.decode_count();

        let mut store = self.shared.frame.lock();
        let FrameStore { active, spare, .. } = &mut *store;
        let mut scan = scan_borders.then(BorderScan::new);

        for y in vp.y1..=vp.y2 {
            if !interlaced && y & 1 != 0 {
                continue;
            }
            let Some(row) = scanlines.decoded_row(y) else {
                continue;
            };
            let cur = y - vp.y1;
            let mut line_scan = LineScan::default();
            for x in vp.x1..=vp.x2 {
                let px = colormap.lookup(row[x]);
                if let Some(scan) = scan.as_mut() {
                    scan.pixel(&mut line_scan, y, x, px);
                }
                let here = cur * width + (x - vp.x1);
                if interlaced {
                    put(active, here, px);
                    put(spare, here, px);
                    if y + 1 < vp.y2 {
                        if let Some(&held) = spare.get(here + width) {
                            put(active, here + width, held);
                        }
                    }
                } else if *half_frame {
                    put(active, (cur / 2) * width + (x - vp.x1), px);
                } else {
                    put(active, here, px);
                    put(active, here + width, px);
                }
            }
            if let Some(scan) = scan.as_mut() {
                scan.end_line(line_scan, y);
            }
        }

        if let Some(scan) = scan {
            geometry.store_scan(&scan);
            tracing::debug!(content = ?geometry.content(), "border scan complete");
        }
        scanlines.clear_changed();
        self.decode_count
            .fetch_add(scanlines.decode_count() - before, Ordering::Relaxed);

        store.width = width;
        store.height = if !interlaced && *half_frame {
            vp.height().div_ceil(2)
        } else {
            vp.height()
        };
        store.format = colormap.format();
        store.ready = true;
        store.frame_count += 1;
        self.frame_count.store(store.frame_count, Ordering::Release);
        drop(store);
        self.shared.frame_cv.notify_all();
    }

    /// Run a border scan on the next composited frame
    pub fn request_border_scan(&self) {
        self.consumer.lock().scan_borders = true;
    }

    /// Wait up to `timeout` for a frame composited since the last call
    ///
    /// Returns `None` on timeout or after shutdown.
    pub fn request_frame(&self, timeout: Duration) -> Option<FrameGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut store = self.shared.frame.lock();
        while !store.ready {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if self.shared.frame_cv.wait_until(&mut store, deadline).timed_out() {
                break;
            }
        }
        if !store.ready {
            return None;
        }
        store.ready = false;
        Some(FrameGuard { store })
    }

    /// Replace the viewport; see [`FrameGeometry::set_viewport`]
    pub fn set_viewport(&self, x1: usize, y1: usize, x2: usize, y2: usize) -> bool {
        self.consumer.lock().geometry.set_viewport(x1, y1, x2, y2)
    }

    /// Restore the full-raster viewport
    pub fn reset_viewport(&self) {
        self.consumer.lock().geometry.reset_viewport();
    }

    /// True while the viewport covers the whole raster
    pub fn is_viewport_default(&self) -> bool {
        self.consumer.lock().geometry.is_viewport_default()
    }

    /// Current viewport
    pub fn viewport(&self) -> Rect {
        self.consumer.lock().geometry.viewport()
    }

    /// Content box found by the last border scan
    pub fn content_box(&self) -> Rect {
        self.consumer.lock().geometry.content()
    }

    /// Border colour found by the last border scan
    pub fn border_color(&self) -> u32 {
        self.consumer.lock().geometry.border_color()
    }

    /// Switch between half-height and line-doubled output
    pub fn set_half_frame(&self, half_frame: bool) {
        self.consumer.lock().half_frame = half_frame;
    }

    /// Replace the palette; held lines are redrawn on the next frame
    ///
    /// The new format is reported by frames composited after this call.
    pub fn set_palette(&self, format: PixelFormat, index_to_rgb: IndexToRgb) {
        self.consumer.lock().colormap = Colormap::new(format, index_to_rgb);
    }

    /// Fields of interlaced addressing still to come
    pub fn interlace_count(&self) -> u8 {
        self.shared.interlace.load(Ordering::Acquire)
    }

    /// Scanline decodes performed so far
    pub fn decode_count(&self) -> u64 {
        self.decode_count.load(Ordering::Relaxed)
    }

    /// Frames composited so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Lines lost because the pool was exhausted
    pub fn dropped_lines(&self) -> u64 {
        self.shared.queue.lock().dropped
    }

    /// Block up to `timeout` for a producer wake-up
    ///
    /// Returns `true` if woken by new events or shutdown.
    pub(super) fn wait_for_wake(&self, timeout: Duration) -> bool {
        let mut woken = self.shared.wake.lock();
        if !*woken {
            let _ = self.shared.wake_cv.wait_for(&mut woken, timeout);
        }
        std::mem::replace(&mut *woken, false)
    }

    /// Wake a thread blocked in the display loop
    pub fn wake(&self) {
        self.shared.notify_wake();
    }

    /// Stop accepting events and release queued payloads
    pub fn shutdown(&self) {
        {
            let mut q = self.shared.queue.lock();
            self.shared.shutdown.store(true, Ordering::Release);
            q.clear();
        }
        self.shared.notify_wake();
        // take the frame lock so no waiter misses the flag; bounded since
        // the caller may still hold a FrameGuard
        drop(self.shared.frame.try_lock_for(SHUTDOWN_LOCK_WAIT));
        self.shared.frame_cv.notify_all();
        tracing::debug!("frame pipeline shut down");
    }

    /// True once [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("decode_count", &self.decode_count())
            .field("shutdown", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[inline]
fn put(buf: &mut [u32], index: usize, px: u32) {
    if let Some(p) = buf.get_mut(index) {
        *p = px;
    }
}
