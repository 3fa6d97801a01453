//! Video Output Domain
//!
//! Nick produces one run-encoded scanline at a time in the machine context.
//! This module carries those lines across to the host: decoding, per-line
//! change detection, field/interlace tracking, compositing and best-effort
//! border detection.

pub mod colormap;
pub mod decode;
pub mod geometry;
pub mod line_buffer;
pub mod pipeline;
pub mod thread;

pub use colormap::{grayscale, nick_palette, Colormap, IndexToRgb, PixelFormat};
pub use decode::{decode_line, LINE_WIDTH, MAX_LINE_BYTES};
pub use geometry::{FrameGeometry, Rect, SCREEN_HEIGHT};
pub use line_buffer::{LineData, MessagePool, ScanlineBuffer, LINE_SLOTS};
pub use pipeline::{FrameGuard, FramePipeline, FrameProducer, VideoSink};
pub use thread::DisplayThread;
