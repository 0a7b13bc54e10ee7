//! Test doubles shared by the map module tests

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use image::RgbaImage;
use prost::Message;

use super::canvas::{Color, Label, Path, ScreenRect, Surface};
use super::error::TileError;
use super::loader::TileFetcher;
use super::vector_tile::{GeomType, ProtoFeature, ProtoLayer, ProtoTile};

/// One recorded drawing call
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Clip(Option<ScreenRect>),
    FillRect(ScreenRect, Color),
    StrokeRect(ScreenRect, Color, f32),
    FillPath(Path, Color),
    StrokePath(Path, Color, f32),
    Image((u32, u32), ScreenRect),
    Text(Label),
}

/// Surface that only records what was asked of it
pub struct RecordingSurface {
    size: (u32, u32),
    ops: Vec<Op>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Everything except clip changes
    pub fn draws(&self) -> Vec<Op> {
        self.ops
            .iter()
            .filter(|op| !matches!(op, Op::Clip(_)))
            .cloned()
            .collect()
    }

    pub fn clips(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Clip(_))).count()
    }

    pub fn fills_of(&self, color: Color) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::FillRect(_, c) if *c == color))
            .count()
    }

    pub fn texts(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Text(label) => Some(label.text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

impl Surface for RecordingSurface {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn set_clip(&mut self, clip: Option<ScreenRect>) {
        self.ops.push(Op::Clip(clip));
    }

    fn fill_rect(&mut self, rect: ScreenRect, color: Color) {
        self.ops.push(Op::FillRect(rect, color));
    }

    fn stroke_rect(&mut self, rect: ScreenRect, color: Color, width: f32) {
        self.ops.push(Op::StrokeRect(rect, color, width));
    }

    fn fill_path(&mut self, path: &Path, color: Color) {
        self.ops.push(Op::FillPath(path.clone(), color));
    }

    fn stroke_path(&mut self, path: &Path, color: Color, width: f32) {
        self.ops.push(Op::StrokePath(path.clone(), color, width));
    }

    fn draw_image(&mut self, image: &RgbaImage, dest: ScreenRect) {
        self.ops.push(Op::Image(image.dimensions(), dest));
    }

    fn fill_text(&mut self, label: Label) {
        self.ops.push(Op::Text(label));
    }
}

type Responder = Box<dyn Fn(&str) -> Result<Vec<u8>, TileError>>;

/// Fetcher answering from a closure, optionally holding replies back
pub struct MockFetcher {
    respond: Responder,
    requests: RefCell<Vec<String>>,
    hold: Cell<bool>,
    held: RefCell<Vec<(String, oneshot::Sender<Result<Vec<u8>, TileError>>)>>,
}

impl MockFetcher {
    pub fn new(respond: impl Fn(&str) -> Result<Vec<u8>, TileError> + 'static) -> Rc<Self> {
        Rc::new(Self {
            respond: Box::new(respond),
            requests: RefCell::new(Vec::new()),
            hold: Cell::new(false),
            held: RefCell::new(Vec::new()),
        })
    }

    /// While holding, fetches stay pending until released
    pub fn set_hold(&self, hold: bool) {
        self.hold.set(hold);
    }

    pub fn held_count(&self) -> usize {
        self.held.borrow().len()
    }

    pub fn release_all(&self) {
        let held = std::mem::take(&mut *self.held.borrow_mut());
        for (url, tx) in held {
            let _ = tx.send((self.respond)(&url));
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl TileFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, TileError>> {
        self.requests.borrow_mut().push(url.to_string());
        if self.hold.get() {
            let (tx, rx) = oneshot::channel();
            self.held.borrow_mut().push((url.to_string(), tx));
            async move { rx.await.map_err(|_| TileError::WorkerGone)? }.boxed_local()
        } else {
            futures::future::ready((self.respond)(url)).boxed_local()
        }
    }
}

/// PNG bytes of a single-color square
pub fn solid_png(side: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(side, side, image::Rgba(rgba));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub fn command(id: u32, count: u32) -> u32 {
    (count << 3) | id
}

pub fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn encode_points(points: &[(i32, i32)], close: bool) -> Vec<u32> {
    let mut out = Vec::new();
    let (mut cx, mut cy) = (0, 0);
    for (i, &(x, y)) in points.iter().enumerate() {
        if i == 0 {
            out.push(command(1, 1));
        } else if i == 1 {
            out.push(command(2, points.len() as u32 - 1));
        }
        out.push(zigzag(x - cx));
        out.push(zigzag(y - cy));
        (cx, cy) = (x, y);
    }
    if close {
        out.push(command(7, 1));
    }
    out
}

/// Geometry stream of an open polyline
pub fn line(points: &[(i32, i32)]) -> Vec<u32> {
    encode_points(points, false)
}

/// Geometry stream of a closed ring
pub fn polygon(points: &[(i32, i32)]) -> Vec<u32> {
    encode_points(points, true)
}

/// Vector tile payload: `(layer name, [(type, geometry)])`
pub fn vector_payload(layers: &[(&str, Vec<(GeomType, Vec<u32>)>)]) -> Vec<u8> {
    ProtoTile {
        layers: layers
            .iter()
            .map(|(name, features)| ProtoLayer {
                version: 2,
                name: name.to_string(),
                features: features
                    .iter()
                    .map(|(kind, geometry)| ProtoFeature {
                        id: None,
                        tags: Vec::new(),
                        r#type: Some(*kind as i32),
                        geometry: geometry.clone(),
                    })
                    .collect(),
                keys: Vec::new(),
                values: Vec::new(),
                extent: Some(4096),
            })
            .collect(),
    }
    .encode_to_vec()
}
