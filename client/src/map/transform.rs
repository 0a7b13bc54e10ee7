//! Block space <-> screen space affine transform

use serde::{Deserialize, Serialize};

/// Scale + offset mapping from block coordinates to screen pixels.
///
/// `screen_x = ax * block_x + bx`, `screen_y = ay * block_y + by`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub ax: f64,
    pub bx: f64,
    pub ay: f64,
    pub by: f64,
}

impl AffineTransform {
    pub fn new(ax: f64, bx: f64, ay: f64, by: f64) -> Self {
        Self { ax, bx, ay, by }
    }

    /// Screen pixels per block (horizontal)
    pub fn scale(&self) -> f64 {
        self.ax
    }

    pub fn to_screen_x(&self, block_x: f64) -> f64 {
        self.ax * block_x + self.bx
    }

    pub fn to_screen_y(&self, block_y: f64) -> f64 {
        self.ay * block_y + self.by
    }

    /// Block index under a screen x coordinate
    pub fn to_block_x(&self, screen_x: f64) -> i64 {
        ((screen_x - self.bx) / self.ax).floor() as i64
    }

    /// Block index under a screen y coordinate
    pub fn to_block_y(&self, screen_y: f64) -> i64 {
        ((screen_y - self.by) / self.ay).floor() as i64
    }

    /// Fractional block position under a screen point
    pub fn unproject(&self, screen_x: f64, screen_y: f64) -> (f64, f64) {
        ((screen_x - self.bx) / self.ax, (screen_y - self.by) / self.ay)
    }

    /// Block under a screen point
    pub fn block_at(&self, screen_x: f64, screen_y: f64) -> (i64, i64) {
        (self.to_block_x(screen_x), self.to_block_y(screen_y))
    }

    /// Translate by a screen delta. Returns whether anything moved.
    pub fn pan(&mut self, dx: f64, dy: f64) -> bool {
        self.bx += dx;
        self.by += dy;
        dx != 0.0 || dy != 0.0
    }

    /// Rescale by `factor` keeping the point under `(cx, cy)` fixed
    pub fn zoom_about(&mut self, factor: f64, cx: f64, cy: f64) {
        self.bx = (1.0 - factor) * cx + factor * self.bx;
        self.by = (1.0 - factor) * cy + factor * self.by;
        self.ax *= factor;
        self.ay *= factor;
    }

    /// Jump so that block `(x, y)` sits at screen `(sx, sy)` with the given scale
    pub fn move_to(&mut self, x: f64, y: f64, scale: f64, sx: f64, sy: f64) {
        self.bx = sx - x * scale;
        self.by = sy - y * scale;
        self.ax = scale;
        self.ay = scale;
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::new(1.0, 0.0, 1.0, 0.0)
    }
}
