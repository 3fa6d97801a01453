//! Viewport and detected content box

use super::decode::LINE_WIDTH;

/// Visible raster height in lines
pub const SCREEN_HEIGHT: usize = 576;

/// Lines sampled at the top of the raster to find the border colour
pub const BORDER_SAMPLE_LINES: usize = 5;

/// Inclusive rectangle in raster coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left column
    pub x1: usize,
    /// Top line
    pub y1: usize,
    /// Right column (inclusive)
    pub x2: usize,
    /// Bottom line (inclusive)
    pub y2: usize,
}

impl Rect {
    /// The whole raster
    pub const FULL: Rect = Rect {
        x1: 0,
        y1: 0,
        x2: LINE_WIDTH - 1,
        y2: SCREEN_HEIGHT - 1,
    };

    /// Width in pixels
    pub fn width(&self) -> usize {
        self.x2 - self.x1 + 1
    }

    /// Height in lines
    pub fn height(&self) -> usize {
        self.y2 - self.y1 + 1
    }
}

/// Viewport, content detection results and interlace bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGeometry {
    viewport: Rect,
    content: Rect,
    border_color: u32,
    borders_scanned: bool,
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGeometry {
    /// Full-raster viewport, content box covering the whole raster
    pub fn new() -> Self {
        Self {
            viewport: Rect::FULL,
            content: Rect::FULL,
            border_color: 0,
            borders_scanned: false,
        }
    }

    /// Current viewport
    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Replace the viewport
    ///
    /// Requires `x1 < x2 < 768` and `y1 < y2 < 576`. A rejected update
    /// leaves the previous viewport in place and returns `false`.
    pub fn set_viewport(&mut self, x1: usize, y1: usize, x2: usize, y2: usize) -> bool {
        if x1 >= x2 || y1 >= y2 || x2 >= LINE_WIDTH || y2 >= SCREEN_HEIGHT {
            tracing::debug!(x1, y1, x2, y2, "viewport rejected");
            return false;
        }
        self.viewport = Rect { x1, y1, x2, y2 };
        true
    }

    /// Restore the full-raster viewport
    pub fn reset_viewport(&mut self) {
        self.viewport = Rect::FULL;
    }

    /// True while the viewport covers the whole raster
    pub fn is_viewport_default(&self) -> bool {
        self.viewport == Rect::FULL
    }

    /// Content box found by the last border scan
    pub fn content(&self) -> Rect {
        self.content
    }

    /// Border colour sampled by the last scan (0 when none was found)
    pub fn border_color(&self) -> u32 {
        self.border_color
    }

    /// True once at least one border scan has completed
    pub fn borders_scanned(&self) -> bool {
        self.borders_scanned
    }

    pub(super) fn store_scan(&mut self, scan: &BorderScan) {
        self.content = scan.result();
        self.border_color = scan.border_color;
        self.borders_scanned = true;
    }
}

/// Running state of a best-effort border scan over one drawn frame
///
/// The border colour is the first non-zero pixel found in the top
/// [`BORDER_SAMPLE_LINES`] lines. Dithered borders and borderless screens
/// produce a box that is too large.
#[derive(Debug, Clone)]
pub(super) struct BorderScan {
    border_color: u32,
    first_nonzero: (usize, usize),
    last_nonzero: (usize, usize),
    first_nonborder: (usize, usize),
    last_nonborder: (usize, usize),
}

/// Per-line flags of a scan in progress
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct LineScan {
    nonzero: bool,
    nonborder: bool,
}

impl BorderScan {
    pub(super) fn new() -> Self {
        Self {
            border_color: 0,
            first_nonzero: (SCREEN_HEIGHT, LINE_WIDTH),
            last_nonzero: (0, 0),
            first_nonborder: (SCREEN_HEIGHT, LINE_WIDTH),
            last_nonborder: (0, 0),
        }
    }

    /// Feed one visible pixel at column `x` of line `y`
    #[inline]
    pub(super) fn pixel(&mut self, line: &mut LineScan, y: usize, x: usize, px: u32) {
        if px == 0 {
            return;
        }
        if !line.nonzero {
            line.nonzero = true;
            self.first_nonzero.1 = self.first_nonzero.1.min(x);
            if y < BORDER_SAMPLE_LINES && self.border_color == 0 {
                self.border_color = px;
            }
        }
        if !line.nonborder && self.border_color > 0 && px != self.border_color {
            line.nonborder = true;
            self.first_nonborder.1 = self.first_nonborder.1.min(x);
        }
        self.last_nonzero.1 = self.last_nonzero.1.max(x);
        if px != self.border_color {
            self.last_nonborder.1 = self.last_nonborder.1.max(x);
        }
    }

    /// Close line `y`
    pub(super) fn end_line(&mut self, line: LineScan, y: usize) {
        if line.nonzero {
            self.first_nonzero.0 = self.first_nonzero.0.min(y);
            self.last_nonzero.0 = self.last_nonzero.0.max(y);
        }
        if line.nonborder {
            self.first_nonborder.0 = self.first_nonborder.0.min(y);
            self.last_nonborder.0 = self.last_nonborder.0.max(y);
        }
    }

    fn result(&self) -> Rect {
        let (first, last) = if self.border_color > 0 {
            (self.first_nonborder, self.last_nonborder)
        } else {
            (self.first_nonzero, self.last_nonzero)
        };
        Rect {
            x1: first.1,
            y1: first.0,
            x2: last.1,
            y2: last.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_validation() {
        let mut geo = FrameGeometry::new();
        assert!(geo.is_viewport_default());
        assert!(geo.set_viewport(32, 20, 735, 555));
        assert!(!geo.is_viewport_default());

        let before = geo.viewport();
        assert!(!geo.set_viewport(10, 10, 10, 20)); // x1 == x2
        assert!(!geo.set_viewport(10, 30, 20, 20)); // y1 > y2
        assert!(!geo.set_viewport(0, 0, 768, 100)); // x2 off raster
        assert!(!geo.set_viewport(0, 0, 100, 576)); // y2 off raster
        assert_eq!(geo.viewport(), before);

        geo.reset_viewport();
        assert!(geo.is_viewport_default());
        assert_eq!(geo.viewport().width(), 768);
        assert_eq!(geo.viewport().height(), 576);
    }

    #[test]
    fn test_border_scan_finds_box_inside_border() {
        const BORDER: u32 = 0x1234;
        let mut scan = BorderScan::new();
        for y in 0..20 {
            let mut line = LineScan::default();
            for x in 0..40 {
                let inside = (5..15).contains(&y) && (10..30).contains(&x);
                scan.pixel(&mut line, y, x, if inside { 0xFFFF } else { BORDER });
            }
            scan.end_line(line, y);
        }
        let mut geo = FrameGeometry::new();
        geo.store_scan(&scan);
        assert_eq!(geo.border_color(), BORDER);
        assert!(geo.borders_scanned());
        assert_eq!(
            geo.content(),
            Rect {
                x1: 10,
                y1: 5,
                x2: 29,
                y2: 14
            }
        );
    }

    #[test]
    fn test_border_scan_without_border_uses_nonzero_box() {
        let mut scan = BorderScan::new();
        // nothing in the first five lines, so no border colour is sampled
        for y in 10..12 {
            let mut line = LineScan::default();
            for x in 100..200 {
                scan.pixel(&mut line, y, x, 7);
            }
            scan.end_line(line, y);
        }
        let result = scan.result();
        assert_eq!(scan.border_color, 0);
        assert_eq!(
            result,
            Rect {
                x1: 100,
                y1: 10,
                x2: 199,
                y2: 11
            }
        );
    }
}
