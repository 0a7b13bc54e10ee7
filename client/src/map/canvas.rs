//! Drawing surface abstraction and the software canvas behind the window

use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    Canvas as ImageCanvas, draw_filled_rect_mut, draw_line_segment_mut, draw_polygon_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

/// RGBA color, straight alpha
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 128, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);
    pub const GRAY: Color = Color::rgb(128, 128, 128);
    pub const LIGHT_GRAY: Color = Color::rgb(211, 211, 211);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }
}

/// Rectangle in screen pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Normalizes negative extents
    pub fn from_points(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self::new(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs())
    }

    pub fn x1(&self) -> f32 {
        self.x + self.w
    }

    pub fn y1(&self) -> f32 {
        self.y + self.h
    }

    pub fn intersect(&self, other: &ScreenRect) -> Option<ScreenRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x1().min(other.x1());
        let y1 = self.y1().min(other.y1());
        (x1 > x0 && y1 > y0).then(|| ScreenRect::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x1() && y >= self.y && y < self.y1()
    }
}

/// Polyline/polygon path in screen pixels
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Path {
    subpaths: Vec<SubPath>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubPath {
    pub points: Vec<(f32, f32)>,
    pub closed: bool,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.subpaths.push(SubPath {
            points: vec![(x, y)],
            closed: false,
        });
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        match self.subpaths.last_mut() {
            Some(sub) if !sub.closed => sub.points.push((x, y)),
            _ => self.move_to(x, y),
        }
    }

    pub fn close(&mut self) {
        if let Some(sub) = self.subpaths.last_mut() {
            sub.closed = true;
        }
    }

    pub fn subpaths(&self) -> &[SubPath] {
        &self.subpaths
    }

    pub fn is_empty(&self) -> bool {
        self.subpaths.is_empty()
    }
}

/// Text anchored at a screen point; the host renders these
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub x: f32,
    pub y: f32,
    pub text: String,
    pub color: Color,
    pub centered: bool,
}

/// Canvas-2D style drawing target
pub trait Surface {
    fn size(&self) -> (u32, u32);

    /// Restrict subsequent drawing to `clip` (or lift the restriction)
    fn set_clip(&mut self, clip: Option<ScreenRect>);

    fn fill_rect(&mut self, rect: ScreenRect, color: Color);

    fn stroke_rect(&mut self, rect: ScreenRect, color: Color, width: f32);

    fn fill_path(&mut self, path: &Path, color: Color);

    fn stroke_path(&mut self, path: &Path, color: Color, width: f32);

    /// Scale `image` into `dest` without smoothing
    fn draw_image(&mut self, image: &RgbaImage, dest: ScreenRect);

    fn fill_text(&mut self, label: Label);

    /// Forget text drawn so far; labels are redrawn with every overlay pass
    fn clear_text(&mut self) {}
}

/// Software surface backed by an RGBA image
pub struct PixelCanvas {
    image: RgbaImage,
    clip: Option<ScreenRect>,
    labels: Vec<Label>,
    dirty: bool,
}

impl PixelCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width.max(1), height.max(1), Color::LIGHT_GRAY.to_rgba()),
            clip: None,
            labels: Vec::new(),
            dirty: true,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height);
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Returns whether anything was drawn since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    fn bounds(&self) -> ScreenRect {
        let full = ScreenRect::new(0.0, 0.0, self.image.width() as f32, self.image.height() as f32);
        match &self.clip {
            Some(clip) => clip.intersect(&full).unwrap_or(ScreenRect::new(0.0, 0.0, 0.0, 0.0)),
            None => full,
        }
    }

    fn target(&mut self) -> Option<ClippedTarget<'_>> {
        let b = self.bounds();
        if b.w <= 0.0 || b.h <= 0.0 {
            return None;
        }
        self.dirty = true;
        Some(ClippedTarget {
            x0: b.x.floor().max(0.0) as u32,
            y0: b.y.floor().max(0.0) as u32,
            x1: b.x1().ceil() as u32,
            y1: b.y1().ceil() as u32,
            image: &mut self.image,
        })
    }
}

impl Surface for PixelCanvas {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear_text(&mut self) {
        self.labels.clear();
    }

    fn set_clip(&mut self, clip: Option<ScreenRect>) {
        self.clip = clip;
    }

    fn fill_rect(&mut self, rect: ScreenRect, color: Color) {
        let Some(r) = rect.intersect(&self.bounds()) else {
            return;
        };
        let (x0, y0) = (r.x.round() as i32, r.y.round() as i32);
        let (x1, y1) = (r.x1().round() as i32, r.y1().round() as i32);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        if let Some(mut target) = self.target() {
            draw_filled_rect_mut(
                &mut target,
                Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32),
                color.to_rgba(),
            );
        }
    }

    fn stroke_rect(&mut self, rect: ScreenRect, color: Color, width: f32) {
        let w = width.max(1.0);
        let half = w / 2.0;
        let (x0, y0, x1, y1) = (rect.x - half, rect.y - half, rect.x1() - half, rect.y1() - half);
        self.fill_rect(ScreenRect::new(x0, y0, rect.w + w, w), color);
        self.fill_rect(ScreenRect::new(x0, y1, rect.w + w, w), color);
        self.fill_rect(ScreenRect::new(x0, y0, w, rect.h + w), color);
        self.fill_rect(ScreenRect::new(x1, y0, w, rect.h + w), color);
    }

    fn fill_path(&mut self, path: &Path, color: Color) {
        let Some(mut target) = self.target() else {
            return;
        };
        for sub in path.subpaths() {
            let mut poly: Vec<Point<i32>> = Vec::with_capacity(sub.points.len());
            for &(x, y) in &sub.points {
                let p = Point::new(x.round() as i32, y.round() as i32);
                if poly.last() != Some(&p) {
                    poly.push(p);
                }
            }
            while poly.len() > 1 && poly.first() == poly.last() {
                poly.pop();
            }
            if poly.len() >= 3 {
                draw_polygon_mut(&mut target, &poly, color.to_rgba());
            }
        }
    }

    fn stroke_path(&mut self, path: &Path, color: Color, width: f32) {
        let bounds = self.bounds();
        let Some(mut target) = self.target() else {
            return;
        };
        let offsets = line_offsets(width);
        for sub in path.subpaths() {
            let closing = sub
                .closed
                .then(|| Some((*sub.points.last()?, *sub.points.first()?)))
                .flatten();
            let segments = sub.points.windows(2).map(|w| (w[0], w[1])).chain(closing);
            for (a, b) in segments {
                let Some((a, b)) = clip_segment(a, b, &bounds) else {
                    continue;
                };
                for &(ox, oy) in &offsets {
                    draw_line_segment_mut(
                        &mut target,
                        (a.0 + ox, a.1 + oy),
                        (b.0 + ox, b.1 + oy),
                        color.to_rgba(),
                    );
                }
            }
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, dest: ScreenRect) {
        let (iw, ih) = image.dimensions();
        if iw == 0 || ih == 0 || dest.w <= 0.0 || dest.h <= 0.0 {
            return;
        }
        let Some(r) = dest.intersect(&self.bounds()) else {
            return;
        };
        let Some(mut target) = self.target() else {
            return;
        };
        let (x0, y0) = (r.x.floor() as u32, r.y.floor() as u32);
        let (x1, y1) = (r.x1().ceil() as u32, r.y1().ceil() as u32);
        for py in y0..y1 {
            let v = ((py as f32 + 0.5 - dest.y) / dest.h * ih as f32).floor();
            if v < 0.0 || v >= ih as f32 {
                continue;
            }
            for px in x0..x1 {
                let u = ((px as f32 + 0.5 - dest.x) / dest.w * iw as f32).floor();
                if u < 0.0 || u >= iw as f32 {
                    continue;
                }
                let pixel = *image.get_pixel(u as u32, v as u32);
                target.draw_pixel(px, py, pixel);
            }
        }
    }

    fn fill_text(&mut self, label: Label) {
        if self.bounds().contains(label.x, label.y) {
            self.dirty = true;
            self.labels.push(label);
        }
    }
}

/// Perpendicular-ish offsets approximating a thick line with 1px segments
fn line_offsets(width: f32) -> Vec<(f32, f32)> {
    let n = width.round().max(1.0) as i32;
    let start = -(n - 1) as f32 / 2.0;
    let mut offsets = Vec::with_capacity((n * n) as usize);
    for i in 0..n {
        for j in 0..n {
            offsets.push((start + i as f32, start + j as f32));
        }
    }
    offsets
}

fn outcode(x: f32, y: f32, r: &ScreenRect) -> u8 {
    let mut code = 0;
    if x < r.x {
        code |= 1;
    } else if x > r.x1() {
        code |= 2;
    }
    if y < r.y {
        code |= 4;
    } else if y > r.y1() {
        code |= 8;
    }
    code
}

/// Cohen-Sutherland clipping of a segment against a rectangle
fn clip_segment(
    mut a: (f32, f32),
    mut b: (f32, f32),
    r: &ScreenRect,
) -> Option<((f32, f32), (f32, f32))> {
    let mut ca = outcode(a.0, a.1, r);
    let mut cb = outcode(b.0, b.1, r);
    loop {
        if ca | cb == 0 {
            return Some((a, b));
        }
        if ca & cb != 0 {
            return None;
        }
        let out = if ca != 0 { ca } else { cb };
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let p = if out & 8 != 0 {
            (a.0 + dx * (r.y1() - a.1) / dy, r.y1())
        } else if out & 4 != 0 {
            (a.0 + dx * (r.y - a.1) / dy, r.y)
        } else if out & 2 != 0 {
            (r.x1(), a.1 + dy * (r.x1() - a.0) / dx)
        } else {
            (r.x, a.1 + dy * (r.x - a.0) / dx)
        };
        if out == ca {
            a = p;
            ca = outcode(a.0, a.1, r);
        } else {
            b = p;
            cb = outcode(b.0, b.1, r);
        }
    }
}

/// Image view limited to the clip box, alpha-blending every write
struct ClippedTarget<'a> {
    image: &'a mut RgbaImage,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl ImageCanvas for ClippedTarget<'_> {
    type Pixel = Rgba<u8>;

    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn get_pixel(&self, x: u32, y: u32) -> Self::Pixel {
        *self.image.get_pixel(x, y)
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: Self::Pixel) {
        if x < self.x0 || x >= self.x1 || y < self.y0 || y >= self.y1 {
            return;
        }
        let (w, h) = self.image.dimensions();
        if x >= w || y >= h {
            return;
        }
        let alpha = color.0[3] as u32;
        if alpha == 255 {
            self.image.put_pixel(x, y, color);
            return;
        }
        let dst = self.image.get_pixel_mut(x, y);
        for i in 0..3 {
            dst.0[i] = ((color.0[i] as u32 * alpha + dst.0[i] as u32 * (255 - alpha)) / 255) as u8;
        }
        dst.0[3] = 255;
    }
}
