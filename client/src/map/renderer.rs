//! Time-sliced tile rendering onto a [`Surface`]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use web_time::Instant;

use super::canvas::{Color, Path, ScreenRect, Surface};
use super::projection::TileBlockMapping;
use super::task::{CancellationToken, TaskStatus, YieldPolicy};
use super::transform::AffineTransform;
use super::vector_tile::{GeometryEvent, VectorFeature, VectorLayer, VectorTile};

/// Screen pixels per block at which individual blocks get drawn
pub const BLOCK_PASS_MIN_SCALE: f64 = 4.0;

/// Default wall-clock budget of one render slice
pub const DEFAULT_SLICE_BUDGET: Duration = Duration::from_millis(100);

const POLYGON_FILL: Color = Color::LIGHT_GRAY.with_alpha(51);

/// Per-layer display settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerStyle {
    pub hidden: BTreeSet<String>,
    /// Draw order; lower first, missing entries count as 0
    pub ordinals: BTreeMap<String, i32>,
    /// Layers drawn as block cells, with their cell color
    pub block_colors: BTreeMap<String, Color>,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            hidden: BTreeSet::new(),
            ordinals: BTreeMap::new(),
            block_colors: BTreeMap::from([
                ("road".to_string(), Color::GRAY),
                ("building".to_string(), Color::RED),
                ("river".to_string(), Color::BLUE),
            ]),
        }
    }
}

impl LayerStyle {
    pub fn is_visible(&self, name: &str) -> bool {
        !self.hidden.contains(name)
    }

    /// Toggle visibility; returns the new state
    pub fn toggle(&mut self, name: &str) -> bool {
        if self.hidden.remove(name) {
            true
        } else {
            self.hidden.insert(name.to_string());
            false
        }
    }

    pub fn ordinal(&self, name: &str) -> i32 {
        self.ordinals.get(name).copied().unwrap_or(0)
    }

    /// Indices of visible layers in draw order, ties kept in payload order
    pub fn order(&self, layers: &[VectorLayer]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..layers.len())
            .filter(|&i| self.is_visible(&layers[i].name))
            .collect();
        order.sort_by_key(|&i| self.ordinal(&layers[i].name));
        order
    }
}

/// Where a tile lands: tile grid position plus the two transforms
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TilePlacement {
    pub ct: AffineTransform,
    pub tb: TileBlockMapping,
    /// Unwrapped grid position, so tiles across the antimeridian stay adjacent
    pub grid_x: i64,
    pub grid_y: i64,
    /// Projected pixels per tile edge
    pub tile_size: f64,
}

impl TilePlacement {
    /// Block coordinates of a tile-local point
    pub fn to_block(&self, x: f64, y: f64, extent: f64) -> (f64, f64) {
        let s = self.tile_size / extent;
        (
            self.tb.to_block_x(x * s + self.grid_x as f64 * self.tile_size),
            self.tb.to_block_y(y * s + self.grid_y as f64 * self.tile_size),
        )
    }

    /// Screen coordinates of a tile-local point
    pub fn to_screen(&self, x: f64, y: f64, extent: f64) -> (f32, f32) {
        let (bx, by) = self.to_block(x, y, extent);
        (self.ct.to_screen_x(bx) as f32, self.ct.to_screen_y(by) as f32)
    }

    /// Screen rectangle covered by the tile
    pub fn footprint(&self) -> ScreenRect {
        let (x0, y0) = self.to_screen(0.0, 0.0, 1.0);
        let (x1, y1) = self.to_screen(1.0, 1.0, 1.0);
        ScreenRect::from_points(x0, y0, x1, y1)
    }
}

/// Result of one render slice
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    Block,
    Vector,
}

/// Resumable renderer for one vector tile.
///
/// Each `step` draws features until the slice budget runs out. Work is a
/// block pass then a vector pass, each walking layers in style order.
pub struct VectorTileRenderer {
    tile: Rc<VectorTile>,
    placement: TilePlacement,
    clip: ScreenRect,
    style: LayerStyle,
    budget: Duration,
    layer_order: Vec<usize>,
    passes: VecDeque<Pass>,
    pass: Option<Pass>,
    layers: VecDeque<usize>,
    layer: Option<usize>,
    features: VecDeque<usize>,
    started: bool,
}

impl VectorTileRenderer {
    pub fn new(tile: Rc<VectorTile>, placement: TilePlacement, clip: ScreenRect, style: LayerStyle) -> Self {
        let layer_order = style.order(&tile.layers);
        let mut passes = VecDeque::from([Pass::Vector]);
        if placement.ct.ax >= BLOCK_PASS_MIN_SCALE {
            passes.push_front(Pass::Block);
        }
        Self {
            tile,
            placement,
            clip,
            style,
            budget: DEFAULT_SLICE_BUDGET,
            layer_order,
            passes,
            pass: None,
            layers: VecDeque::new(),
            layer: None,
            features: VecDeque::new(),
            started: false,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Draw one slice. The token is checked before anything is drawn.
    pub fn step<S: Surface + ?Sized>(&mut self, surface: &mut S, token: &CancellationToken) -> Step {
        if token.is_stopped() {
            return Step::Stopped;
        }
        surface.set_clip(Some(self.clip));
        if !self.started {
            surface.fill_rect(self.placement.footprint(), Color::WHITE);
            self.started = true;
        }

        let start = Instant::now();
        loop {
            if let Some(feature) = self.features.pop_front() {
                if let (Some(pass), Some(layer)) = (self.pass, self.layer) {
                    self.draw_feature(surface, pass, layer, feature);
                }
            } else if let Some(layer) = self.layers.pop_front() {
                self.enter_layer(layer);
            } else if let Some(pass) = self.passes.pop_front() {
                self.pass = Some(pass);
                self.layer = None;
                self.layers = self.layer_order.iter().copied().collect();
                self.features.clear();
            } else {
                return Step::Done;
            }

            if start.elapsed() >= self.budget {
                return Step::Continue;
            }
        }
    }

    fn enter_layer(&mut self, layer: usize) {
        self.layer = Some(layer);
        let l = &self.tile.layers[layer];
        let eligible = match self.pass {
            Some(Pass::Block) => self.style.block_colors.contains_key(&l.name),
            _ => true,
        };
        self.features = if eligible {
            (0..l.features.len()).collect()
        } else {
            VecDeque::new()
        };
    }

    fn draw_feature<S: Surface + ?Sized>(&self, surface: &mut S, pass: Pass, layer: usize, feature: usize) {
        let layer = &self.tile.layers[layer];
        let extent = layer.extent as f64;
        let feature = &layer.features[feature];
        match pass {
            Pass::Block => {
                if let Some(color) = self.style.block_colors.get(&layer.name) {
                    self.draw_feature_blocks(surface, feature, extent, *color);
                }
            }
            Pass::Vector => self.draw_feature_vectors(surface, feature, extent),
        }
    }

    fn draw_feature_vectors<S: Surface + ?Sized>(&self, surface: &mut S, feature: &VectorFeature, extent: f64) {
        let mut path = Path::new();
        for event in feature.events() {
            match event {
                GeometryEvent::Begin => path = Path::new(),
                GeometryEvent::MoveTo(x, y) => {
                    let (sx, sy) = self.placement.to_screen(x as f64, y as f64, extent);
                    path.move_to(sx, sy);
                }
                GeometryEvent::LineTo(x, y) => {
                    let (sx, sy) = self.placement.to_screen(x as f64, y as f64, extent);
                    path.line_to(sx, sy);
                }
                GeometryEvent::ClosePath => path.close(),
                GeometryEvent::End => {
                    if feature.is_polygon() {
                        surface.fill_path(&path, POLYGON_FILL);
                    } else {
                        surface.stroke_path(&path, Color::BLACK, 1.0);
                    }
                }
            }
        }
    }

    fn draw_feature_blocks<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        feature: &VectorFeature,
        extent: f64,
        color: Color,
    ) {
        let (w, h) = surface.size();
        let ct = self.placement.ct;
        let mut segment = |a: (f64, f64), b: (f64, f64)| {
            let (x0, x1) = (ct.to_screen_x(a.0), ct.to_screen_x(b.0));
            let (y0, y1) = (ct.to_screen_y(a.1), ct.to_screen_y(b.1));
            if (x0 < 0.0 && x1 < 0.0) || (x0 > w as f64 && x1 > w as f64) {
                return;
            }
            if (y0 < 0.0 && y1 < 0.0) || (y0 > h as f64 && y1 > h as f64) {
                return;
            }
            block_line(a, b, |bx, by| {
                let rect = ScreenRect::new(
                    ct.to_screen_x(bx.floor()) as f32,
                    ct.to_screen_y(by.floor()) as f32,
                    ct.ax as f32,
                    ct.ay as f32,
                );
                surface.fill_rect(rect, color);
            });
        };

        let mut prev = None;
        let mut start = None;
        for event in feature.events() {
            match event {
                GeometryEvent::MoveTo(x, y) => {
                    let b = self.placement.to_block(x as f64, y as f64, extent);
                    prev = Some(b);
                    start = Some(b);
                }
                GeometryEvent::LineTo(x, y) => {
                    let b = self.placement.to_block(x as f64, y as f64, extent);
                    if let Some(p) = prev {
                        segment(p, b);
                    }
                    prev = Some(b);
                }
                GeometryEvent::ClosePath => {
                    if let (Some(p), Some(s)) = (prev, start) {
                        segment(p, s);
                        prev = Some(s);
                    }
                }
                GeometryEvent::Begin | GeometryEvent::End => {}
            }
        }
    }
}

/// Visit the blocks along a segment in block space.
///
/// Both endpoints are plotted; in between, one point per block is plotted
/// along the dominant axis, at block centers on that axis.
pub fn block_line(from: (f64, f64), to: (f64, f64), mut plot: impl FnMut(f64, f64)) {
    let (mut bx0, mut by0) = from;
    let (mut bx1, mut by1) = to;
    plot(bx0, by0);
    let dx = (bx1 - bx0).abs();
    let dy = (by1 - by0).abs();
    if dx > dy {
        if bx0 > bx1 {
            std::mem::swap(&mut bx0, &mut bx1);
            std::mem::swap(&mut by0, &mut by1);
        }
        let mut bx = bx0.ceil() + 0.5;
        while bx < bx1 {
            plot(bx, by0 + (by1 - by0) * (bx - bx0) / (bx1 - bx0));
            bx += 1.0;
        }
    } else {
        if by0 > by1 {
            std::mem::swap(&mut bx0, &mut bx1);
            std::mem::swap(&mut by0, &mut by1);
        }
        let mut by = by0.ceil() + 0.5;
        while by < by1 {
            plot(bx0 + (bx1 - bx0) * (by - by0) / (by1 - by0), by);
            by += 1.0;
        }
    }
    plot(to.0, to.1);
}

/// Drive a renderer to completion, yielding between slices.
///
/// The surface is only borrowed while a slice draws.
pub async fn render_vector_tile<S: Surface + ?Sized>(
    surface: &RefCell<S>,
    mut renderer: VectorTileRenderer,
    token: &CancellationToken,
    yield_policy: &YieldPolicy,
) -> TaskStatus {
    loop {
        let step = renderer.step(&mut *surface.borrow_mut(), token);
        match step {
            Step::Continue => yield_policy.wait().await,
            Step::Done => return TaskStatus::Completed,
            Step::Stopped => return TaskStatus::Stopped,
        }
    }
}

/// Blit a raster tile into its footprint, clipped to `clip`
pub fn draw_raster_tile<S: Surface + ?Sized>(
    surface: &mut S,
    image: &RgbaImage,
    placement: &TilePlacement,
    clip: ScreenRect,
) {
    surface.set_clip(Some(clip));
    surface.draw_image(image, placement.footprint());
}

/// Paint a tile footprint with the background color (tiles outside the world)
pub fn draw_empty_tile<S: Surface + ?Sized>(surface: &mut S, placement: &TilePlacement, clip: ScreenRect) {
    surface.set_clip(Some(clip));
    surface.fill_rect(placement.footprint(), Color::WHITE);
}
