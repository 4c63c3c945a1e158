//! Client→host coordinate mapping
//!
//! The video element letterboxes the host frame with a uniform scale, so
//! converting a client-space pointer position back to host-frame pixels
//! means undoing the centering offsets and the scale, then clamping into
//! the frame.

/// Derived mapping between client window space and host frame space.
///
/// Must be recomputed whenever either the window size or the host frame's
/// native resolution changes; a stale mapping produces off-by-offset
/// coordinates after any resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapping {
    frame_width: u32,
    frame_height: u32,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl CoordinateMapping {
    /// Compute the mapping for a window of `(window_w, window_h)` showing a
    /// host frame of `(frame_w, frame_h)`.
    pub fn compute(window_w: u32, window_h: u32, frame_w: u32, frame_h: u32) -> Self {
        let frame_w = frame_w.max(1);
        let frame_h = frame_h.max(1);
        let scale = f64::min(
            window_w as f64 / frame_w as f64,
            window_h as f64 / frame_h as f64,
        );
        let offset_x = (window_w as f64 - frame_w as f64 * scale) / 2.0;
        let offset_y = (window_h as f64 - frame_h as f64 * scale) / 2.0;

        Self {
            frame_width: frame_w,
            frame_height: frame_h,
            scale,
            offset_x,
            offset_y,
        }
    }

    /// Host frame size this mapping was computed for
    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Uniform display scale applied to the frame
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Convert a client-space position to host-frame pixels, clamped to
    /// `[0, frame_w-1] × [0, frame_h-1]`.
    pub fn client_to_host(&self, x: f64, y: f64) -> (i32, i32) {
        let hx = ((x - self.offset_x) / self.scale).round();
        let hy = ((y - self.offset_y) / self.scale).round();
        (
            hx.clamp(0.0, (self.frame_width - 1) as f64) as i32,
            hy.clamp(0.0, (self.frame_height - 1) as f64) as i32,
        )
    }

    /// Inverse conversion, used by tests to bound rounding error
    pub fn host_to_client(&self, x: i32, y: i32) -> (f64, f64) {
        (
            x as f64 * self.scale + self.offset_x,
            y as f64 * self.scale + self.offset_y,
        )
    }
}
