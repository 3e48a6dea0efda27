use log::debug;

/// An integer pixel window in raster coordinates; it may overhang the raster edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: isize,
    pub row_off: isize,
    pub width: usize,
    pub height: usize,
}

/// Where a window overlaps its raster, and how much of it hangs off each edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBounds {
    // Read bounds (inside the raster)
    pub read_x_min: usize,
    pub read_y_min: usize,
    pub read_x_max: usize,
    pub read_y_max: usize,

    // Overhang (filled with nodata in the output)
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
}

impl WindowBounds {
    pub fn read_width(&self) -> usize {
        self.read_x_max - self.read_x_min
    }

    pub fn read_height(&self) -> usize {
        self.read_y_max - self.read_y_min
    }

    pub fn is_padded(&self) -> bool {
        self.pad_left + self.pad_right + self.pad_top + self.pad_bottom > 0
    }
}

impl PixelWindow {
    /// Smallest window covering the fractional pixel span, rounding outward.
    ///
    /// Edges within `snap` pixels of an integer are treated as lying on it, so a span that
    /// already sits on the pixel grid is not widened by floating-point noise.
    pub fn covering(col_min: f64, row_min: f64, col_max: f64, row_max: f64, snap: f64) -> Option<Self> {
        let outward_min = |v: f64| (v + snap).floor();
        let outward_max = |v: f64| (v - snap).ceil();

        let x0 = outward_min(col_min);
        let y0 = outward_min(row_min);
        let x1 = outward_max(col_max);
        let y1 = outward_max(row_max);

        if !(x0.is_finite() && y0.is_finite() && x1.is_finite() && y1.is_finite()) || x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            col_off: x0 as isize,
            row_off: y0 as isize,
            width: (x1 - x0) as usize,
            height: (y1 - y0) as usize,
        })
    }

    /// Overlap with a `raster_width` x `raster_height` raster, or `None` when disjoint.
    pub fn bounds_within(&self, raster_width: usize, raster_height: usize) -> Option<WindowBounds> {
        let x_end = self.col_off + self.width as isize;
        let y_end = self.row_off + self.height as isize;

        let read_x_min = self.col_off.clamp(0, raster_width as isize) as usize;
        let read_y_min = self.row_off.clamp(0, raster_height as isize) as usize;
        let read_x_max = x_end.clamp(0, raster_width as isize) as usize;
        let read_y_max = y_end.clamp(0, raster_height as isize) as usize;

        if read_x_max <= read_x_min || read_y_max <= read_y_min {
            debug!(
                "Window {}x{} at ({}, {}) misses {}x{} raster",
                self.width, self.height, self.col_off, self.row_off, raster_width, raster_height
            );
            return None;
        }

        let pad_left = (read_x_min as isize - self.col_off) as usize;
        let pad_top = (read_y_min as isize - self.row_off) as usize;
        let pad_right = (x_end - read_x_max as isize) as usize;
        let pad_bottom = (y_end - read_y_max as isize) as usize;

        debug!(
            "Window at ({}, {}): read=[{}-{}, {}-{}], padding=[L:{} R:{} T:{} B:{}]",
            self.col_off, self.row_off,
            read_x_min, read_x_max, read_y_min, read_y_max,
            pad_left, pad_right, pad_top, pad_bottom
        );

        Some(WindowBounds {
            read_x_min,
            read_y_min,
            read_x_max,
            read_y_max,
            pad_left,
            pad_right,
            pad_top,
            pad_bottom,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covering_rounds_outward() {
        let w = PixelWindow::covering(2.3, 1.7, 5.2, 4.0, 1e-6).unwrap();
        assert_eq!(w, PixelWindow { col_off: 2, row_off: 1, width: 4, height: 3 });
    }

    #[test]
    fn test_covering_snaps_grid_aligned_edges() {
        // 3 - 1e-12 and 7 + 1e-12 are on-grid within noise
        let w = PixelWindow::covering(3.0 - 1e-12, 0.0, 7.0 + 1e-12, 2.0, 1e-6).unwrap();
        assert_eq!(w, PixelWindow { col_off: 3, row_off: 0, width: 4, height: 2 });
    }

    #[test]
    fn test_covering_degenerate() {
        assert!(PixelWindow::covering(2.0, 2.0, 2.0, 5.0, 1e-6).is_none());
        assert!(PixelWindow::covering(f64::NAN, 0.0, 1.0, 1.0, 1e-6).is_none());
    }

    #[test]
    fn test_bounds_interior() {
        let w = PixelWindow { col_off: 2, row_off: 3, width: 4, height: 5 };
        let b = w.bounds_within(10, 10).unwrap();
        assert_eq!((b.read_x_min, b.read_x_max, b.read_y_min, b.read_y_max), (2, 6, 3, 8));
        assert!(!b.is_padded());
    }

    #[test]
    fn test_bounds_overhang() {
        // Hangs 2 off the left and 3 off the bottom of a 10x10 raster
        let w = PixelWindow { col_off: -2, row_off: 8, width: 5, height: 5 };
        let b = w.bounds_within(10, 10).unwrap();
        assert_eq!(b.read_x_min, 0);
        assert_eq!(b.read_x_max, 3);
        assert_eq!(b.read_y_min, 8);
        assert_eq!(b.read_y_max, 10);
        assert_eq!(b.pad_left, 2);
        assert_eq!(b.pad_right, 0);
        assert_eq!(b.pad_top, 0);
        assert_eq!(b.pad_bottom, 3);
        assert_eq!(b.read_width() + b.pad_left + b.pad_right, 5);
        assert_eq!(b.read_height() + b.pad_top + b.pad_bottom, 5);
    }

    #[test]
    fn test_bounds_disjoint() {
        let w = PixelWindow { col_off: 10, row_off: 0, width: 3, height: 3 };
        assert!(w.bounds_within(10, 10).is_none());
        let w = PixelWindow { col_off: -5, row_off: -5, width: 5, height: 20 };
        assert!(w.bounds_within(10, 10).is_none());
    }
}
