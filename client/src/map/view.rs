//! Map view orchestration: view state transitions and generation-guarded drawing

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::blocks::{BlockBufferSave, BlockRect, SparseBlockBuffer};
use super::canvas::{Color, ScreenRect, Surface};
use super::overlay;
use super::projection::ProjectionParameter;
use super::renderer::{
    LayerStyle, TilePlacement, VectorTileRenderer, draw_empty_tile, draw_raster_tile,
    render_vector_tile,
};
use super::source::{RenderableTile, TileSource};
use super::task::{CancellationToken, TaskQueue, TaskStatus, YieldPolicy};
use super::tile::TileIndex;
use super::transform::AffineTransform;

/// Tiles enqueued per axis and source at most, per draw
const MAX_TILES_PER_AXIS: i64 = 64;

pub const PLACEHOLDER_MESSAGE: &str = "Origin not configured";

/// Translation from block coordinates to Minecraft world coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinecraftOffset {
    pub x: i64,
    /// Height shown for every block
    pub y: i64,
    pub z: i64,
}

/// Frame widths around the map content
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub left: f32,
    pub top: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            left: 50.0,
            top: 20.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub margins: Margins,
    /// Screen pixels per block, lower bound
    pub min_scale: f64,
    /// Screen pixels per block, upper bound
    pub max_scale: f64,
    /// Wall-clock budget of one render slice
    pub render_budget_ms: u64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            margins: Margins::default(),
            min_scale: 1.0 / 16.0,
            max_scale: 256.0,
            render_budget_ms: 100,
        }
    }
}

/// Everything a redraw depends on, besides the painted blocks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewState {
    pub transform: AffineTransform,
    pub viewport: (f32, f32),
    pub selection: Option<BlockRect>,
    pub pending_rect: Option<BlockRect>,
    pub minecraft_offset: MinecraftOffset,
    pub projection: Option<ProjectionParameter>,
    pub layers: LayerStyle,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            transform: AffineTransform::default(),
            viewport: (0.0, 0.0),
            selection: None,
            pending_rect: None,
            minecraft_offset: MinecraftOffset::default(),
            projection: None,
            layers: LayerStyle::default(),
        }
    }
}

/// New view state and whether the map must be redrawn for it
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: ViewState,
    pub redraw: bool,
}

impl ViewState {
    fn into_transition(self, redraw: bool) -> Transition {
        Transition { state: self, redraw }
    }

    /// Viewport minus the frame margins
    pub fn content_rect(&self, margins: &Margins) -> ScreenRect {
        ScreenRect::new(
            margins.left,
            margins.top,
            (self.viewport.0 - margins.left).max(0.0),
            (self.viewport.1 - margins.top).max(0.0),
        )
    }

    pub fn pan(&self, dx: f64, dy: f64) -> Transition {
        let mut next = self.clone();
        let moved = next.transform.pan(dx, dy);
        next.into_transition(moved)
    }

    /// Zoom about a screen point; factors leaving the scale bounds are ignored
    pub fn zoom_about(&self, factor: f64, cx: f64, cy: f64, config: &ViewConfig) -> Transition {
        let scale = self.transform.ax * factor;
        if !(config.min_scale..=config.max_scale).contains(&scale) || factor == 1.0 {
            return self.clone().into_transition(false);
        }
        let mut next = self.clone();
        next.transform.zoom_about(factor, cx, cy);
        next.into_transition(true)
    }

    /// The first sizing puts block (0, 0) at the viewport center
    pub fn resize(&self, width: f32, height: f32) -> Transition {
        let mut next = self.clone();
        if self.viewport.0 == 0.0 {
            next.transform.bx = width as f64 / 2.0;
        }
        if self.viewport.1 == 0.0 {
            next.transform.by = height as f64 / 2.0;
        }
        next.viewport = (width, height);
        let changed = next != *self;
        next.into_transition(changed)
    }

    pub fn select_at(&self, sx: f64, sy: f64) -> Transition {
        let (bx, by) = self.transform.block_at(sx, sy);
        let mut next = self.clone();
        next.selection = Some(BlockRect::block(bx, by));
        next.into_transition(true)
    }

    pub fn clear_selection(&self) -> Transition {
        let mut next = self.clone();
        next.selection = None;
        let changed = self.selection.is_some();
        next.into_transition(changed)
    }

    pub fn with_pending_rect(&self, rect: Option<BlockRect>) -> Transition {
        let mut next = self.clone();
        next.pending_rect = rect;
        let changed = next.pending_rect != self.pending_rect;
        next.into_transition(changed)
    }

    pub fn with_projection(&self, projection: Option<ProjectionParameter>) -> Transition {
        let mut next = self.clone();
        next.projection = projection;
        let changed = next.projection != self.projection;
        next.into_transition(changed)
    }

    pub fn toggle_layer(&self, name: &str) -> Transition {
        let mut next = self.clone();
        next.layers.toggle(name);
        next.into_transition(true)
    }

    /// Center block `(x, y)` in the content region at `scale`
    pub fn move_to(&self, x: f64, y: f64, scale: f64, margins: &Margins) -> Transition {
        let content = self.content_rect(margins);
        let mut next = self.clone();
        next.transform.move_to(
            x,
            y,
            scale,
            (content.x + content.w / 2.0) as f64,
            (content.y + content.h / 2.0) as f64,
        );
        let changed = next.transform != self.transform;
        next.into_transition(changed)
    }

    /// Choose the offset so that the selected block has the given Minecraft coordinates
    pub fn set_minecraft_offset(&self, x: i64, y: i64, z: i64) -> Transition {
        let Some(sel) = self.selection else {
            return self.clone().into_transition(false);
        };
        let mut next = self.clone();
        next.minecraft_offset = MinecraftOffset {
            x: x - sel.x,
            y,
            z: z - sel.y,
        };
        let changed = next.minecraft_offset != self.minecraft_offset;
        next.into_transition(changed)
    }
}

/// Progress reports of the draw pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawEvent {
    GenerationStarted(u64),
    TileDrawn {
        generation: u64,
        source: String,
        index: TileIndex,
    },
    TileStopped {
        generation: u64,
        source: String,
        index: TileIndex,
    },
    OverlaysDrawn(u64),
    Superseded(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    NotConfigured,
    Complete,
    /// A newer draw started before this one finished
    Superseded,
}

/// Owns the view state, the painted blocks and the map sources, and redraws
/// the surface generation by generation.
///
/// Clones share everything; tile tasks hold clones.
pub struct MapView<S: Surface> {
    surface: Rc<RefCell<S>>,
    state: Rc<RefCell<ViewState>>,
    blocks: Rc<RefCell<SparseBlockBuffer>>,
    sources: Rc<RefCell<Vec<Rc<TileSource>>>>,
    tasks: TaskQueue,
    config: Rc<ViewConfig>,
    yield_policy: YieldPolicy,
    generation: Rc<Cell<u64>>,
    status: Rc<RefCell<String>>,
    observer: Option<Rc<dyn Fn(&DrawEvent)>>,
}

impl<S: Surface> Clone for MapView<S> {
    fn clone(&self) -> Self {
        Self {
            surface: self.surface.clone(),
            state: self.state.clone(),
            blocks: self.blocks.clone(),
            sources: self.sources.clone(),
            tasks: self.tasks.clone(),
            config: self.config.clone(),
            yield_policy: self.yield_policy.clone(),
            generation: self.generation.clone(),
            status: self.status.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<S: Surface + 'static> MapView<S> {
    pub fn new(surface: S, tasks: TaskQueue, config: ViewConfig) -> Self {
        Self {
            surface: Rc::new(RefCell::new(surface)),
            state: Rc::new(RefCell::new(ViewState::default())),
            blocks: Rc::new(RefCell::new(SparseBlockBuffer::new())),
            sources: Rc::new(RefCell::new(Vec::new())),
            tasks,
            config: Rc::new(config),
            yield_policy: YieldPolicy::Immediate,
            generation: Rc::new(Cell::new(0)),
            status: Rc::new(RefCell::new(String::new())),
            observer: None,
        }
    }

    pub fn with_yield_policy(mut self, yield_policy: YieldPolicy) -> Self {
        self.yield_policy = yield_policy;
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(&DrawEvent) + 'static) -> Self {
        self.observer = Some(Rc::new(observer));
        self
    }

    pub fn add_source(&self, source: TileSource) {
        self.sources.borrow_mut().push(Rc::new(source));
    }

    pub fn sources(&self) -> Vec<Rc<TileSource>> {
        self.sources.borrow().clone()
    }

    /// Enable or disable a source by name.
    ///
    /// # Panics
    ///
    /// Panics if no source has that name.
    pub fn set_source_enabled(&self, name: &str, enabled: bool) -> bool {
        let sources = self.sources.borrow();
        let source = sources
            .iter()
            .find(|s| s.name() == name)
            .unwrap_or_else(|| panic!("unknown map source: {}", name));
        let changed = source.is_enabled() != enabled;
        source.set_enabled(enabled);
        changed
    }

    pub fn surface(&self) -> &Rc<RefCell<S>> {
        &self.surface
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn status(&self) -> String {
        self.status.borrow().clone()
    }

    /// Adopt a transition's state; returns whether a redraw is due
    pub fn apply(&self, transition: Transition) -> bool {
        *self.state.borrow_mut() = transition.state;
        transition.redraw
    }

    pub fn pan(&self, dx: f64, dy: f64) -> bool {
        let t = self.state.borrow().pan(dx, dy);
        self.apply(t)
    }

    pub fn zoom_about(&self, factor: f64, cx: f64, cy: f64) -> bool {
        let t = self.state.borrow().zoom_about(factor, cx, cy, &self.config);
        self.apply(t)
    }

    pub fn resize(&self, width: f32, height: f32) -> bool {
        let t = self.state.borrow().resize(width, height);
        self.apply(t)
    }

    pub fn select_at(&self, sx: f64, sy: f64) -> bool {
        let t = self.state.borrow().select_at(sx, sy);
        self.apply(t)
    }

    pub fn set_projection(&self, projection: Option<ProjectionParameter>) -> bool {
        let t = self.state.borrow().with_projection(projection);
        self.apply(t)
    }

    pub fn toggle_layer(&self, name: &str) -> bool {
        let t = self.state.borrow().toggle_layer(name);
        self.apply(t)
    }

    pub fn move_to(&self, x: f64, y: f64, scale: f64) -> bool {
        let t = self.state.borrow().move_to(x, y, scale, &self.config.margins);
        self.apply(t)
    }

    pub fn set_minecraft_offset(&self, x: i64, y: i64, z: i64) -> bool {
        let t = self.state.borrow().set_minecraft_offset(x, y, z);
        self.apply(t)
    }

    pub fn current_color(&self) -> Option<char> {
        self.blocks.borrow().current_color
    }

    pub fn set_current_color(&self, color: Option<char>) {
        self.blocks.borrow_mut().current_color = color;
    }

    pub fn set_blocks_visible(&self, visible: bool) -> bool {
        let mut blocks = self.blocks.borrow_mut();
        let changed = blocks.visible != visible;
        blocks.visible = visible;
        changed
    }

    pub fn block_at(&self, sx: f64, sy: f64) -> (i64, i64) {
        self.state.borrow().transform.block_at(sx, sy)
    }

    pub fn get_pixel(&self, bx: i64, by: i64) -> Option<char> {
        self.blocks.borrow().get_pixel(bx, by)
    }

    /// Paint the block under a screen point with the current color
    pub fn paint_at(&self, sx: f64, sy: f64) -> bool {
        let (bx, by) = self.block_at(sx, sy);
        let mut blocks = self.blocks.borrow_mut();
        let color = blocks.current_color;
        if blocks.get_pixel(bx, by) == color {
            return false;
        }
        blocks.paint(bx, by, color);
        true
    }

    pub fn erase_at(&self, sx: f64, sy: f64) -> bool {
        let (bx, by) = self.block_at(sx, sy);
        let mut blocks = self.blocks.borrow_mut();
        if blocks.get_pixel(bx, by).is_none() {
            return false;
        }
        blocks.paint(bx, by, None);
        true
    }

    /// Take the color under a screen point as the current color
    pub fn pick_color_at(&self, sx: f64, sy: f64) -> Option<char> {
        let (bx, by) = self.block_at(sx, sy);
        let mut blocks = self.blocks.borrow_mut();
        blocks.current_color = blocks.get_pixel(bx, by);
        blocks.current_color
    }

    pub fn begin_rect(&self, sx: f64, sy: f64) -> bool {
        let (bx, by) = self.block_at(sx, sy);
        let t = self.state.borrow().with_pending_rect(Some(BlockRect::block(bx, by)));
        self.apply(t)
    }

    pub fn extend_rect(&self, sx: f64, sy: f64) -> bool {
        let (bx, by) = self.block_at(sx, sy);
        let rect = match self.state.borrow().pending_rect {
            Some(rect) => rect.union_block(bx, by),
            None => return false,
        };
        let t = self.state.borrow().with_pending_rect(Some(rect));
        self.apply(t)
    }

    /// Fill the pending rectangle with the current color and drop it
    pub fn commit_rect_fill(&self) -> bool {
        let Some(rect) = self.state.borrow().pending_rect else {
            return false;
        };
        {
            let mut blocks = self.blocks.borrow_mut();
            let color = blocks.current_color;
            blocks.rect_fill(&rect, color);
        }
        let t = self.state.borrow().with_pending_rect(None);
        self.apply(t);
        true
    }

    pub fn save_blocks(&self) -> BlockBufferSave {
        self.blocks.borrow().save()
    }

    /// Replace view state and painted blocks, e.g. from a saved project
    pub fn restore(&self, state: ViewState, blocks: &BlockBufferSave) {
        *self.state.borrow_mut() = state;
        *self.blocks.borrow_mut() = SparseBlockBuffer::load(blocks);
    }

    fn emit(&self, event: DrawEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.get() == generation
    }

    fn superseded(&self, generation: u64) -> DrawOutcome {
        debug!("Draw generation {} superseded by {}", generation, self.generation.get());
        self.emit(DrawEvent::Superseded(generation));
        DrawOutcome::Superseded
    }

    /// Redraw everything for the current state.
    ///
    /// Stops and drains the previous generation's tile tasks first, enqueues
    /// one task per visible tile and source, then draws the overlays once all
    /// tasks settled, unless a newer draw started meanwhile.
    pub async fn draw(&self) -> DrawOutcome {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.emit(DrawEvent::GenerationStarted(generation));
        debug!("Draw generation {} started", generation);

        self.tasks.clear().await;
        if !self.is_current(generation) {
            return self.superseded(generation);
        }

        let state = self.state();
        let Some(param) = state.projection.clone().filter(ProjectionParameter::is_valid) else {
            info!("No projection origin configured");
            overlay::draw_placeholder(&mut *self.surface.borrow_mut(), PLACEHOLDER_MESSAGE);
            *self.status.borrow_mut() = String::new();
            return DrawOutcome::NotConfigured;
        };

        let content = state.content_rect(&self.config.margins);
        {
            let mut surface = self.surface.borrow_mut();
            surface.set_clip(Some(content));
            surface.fill_rect(content, Color::LIGHT_GRAY);
        }
        let sources: Vec<Rc<TileSource>> = self
            .sources
            .borrow()
            .iter()
            .filter(|s| s.is_enabled())
            .cloned()
            .collect();
        for source in sources {
            self.enqueue_tiles(generation, &source, &param, &state, content);
        }

        self.tasks.wait_all_task_done().await;
        if !self.is_current(generation) {
            return self.superseded(generation);
        }

        self.draw_overlays(&state, content);
        self.emit(DrawEvent::OverlaysDrawn(generation));
        *self.status.borrow_mut() =
            overlay::status_line(state.selection.as_ref(), &state.minecraft_offset).unwrap_or_default();
        debug!("Draw generation {} complete", generation);
        DrawOutcome::Complete
    }

    fn enqueue_tiles(
        &self,
        generation: u64,
        source: &Rc<TileSource>,
        param: &ProjectionParameter,
        state: &ViewState,
        content: ScreenRect,
    ) {
        let ct = state.transform;
        let (vw, vh) = (state.viewport.0 as f64, state.viewport.1 as f64);
        let zoom = source.select_zoom(param, &ct, vw);
        let tb = source.mapping(param, zoom);
        let tile_size = source.config().tile_size;
        if !(tile_size.is_finite() && tile_size > 0.0) {
            warn!("Skipping {}: tile size {} is not positive", source.name(), tile_size);
            return;
        }

        let (bx0, by0) = ct.unproject(0.0, 0.0);
        let gx0 = (tb.to_tile_x(bx0) / tile_size).floor() as i64;
        let gy0 = (tb.to_tile_y(by0) / tile_size).floor() as i64;
        let placement = |gx: i64, gy: i64| TilePlacement {
            ct,
            tb,
            grid_x: gx,
            grid_y: gy,
            tile_size,
        };

        let mut count = 0;
        for gy in gy0..gy0.saturating_add(MAX_TILES_PER_AXIS) {
            if placement(gx0, gy).footprint().y >= vh as f32 {
                break;
            }
            for gx in gx0..gx0.saturating_add(MAX_TILES_PER_AXIS) {
                let p = placement(gx, gy);
                if p.footprint().x >= vw as f32 {
                    break;
                }
                let Some(index) = TileIndex::from_grid(gx, gy, zoom) else {
                    draw_empty_tile(&mut *self.surface.borrow_mut(), &p, content);
                    continue;
                };
                let token = CancellationToken::new();
                let view = self.clone();
                let source = source.clone();
                let task_token = token.clone();
                self.tasks.add(
                    move || view.draw_tile(generation, source, index, p, content, task_token),
                    Some(token),
                );
                count += 1;
            }
        }
        debug!(
            "Generation {}: {} tiles of {} at zoom {}",
            generation,
            count,
            source.name(),
            zoom
        );
    }

    async fn draw_tile(
        self,
        generation: u64,
        source: Rc<TileSource>,
        index: TileIndex,
        placement: TilePlacement,
        clip: ScreenRect,
        token: CancellationToken,
    ) -> anyhow::Result<TaskStatus> {
        let stopped = |view: &Self| -> anyhow::Result<TaskStatus> {
            view.emit(DrawEvent::TileStopped {
                generation,
                source: source.name().to_string(),
                index,
            });
            Ok(TaskStatus::Stopped)
        };
        if token.is_stopped() {
            return stopped(&self);
        }

        let tile = source
            .get_tile(index, &token)
            .await
            .with_context(|| format!("tile {} of {}", index, source.name()))?;
        let Some(tile) = tile else {
            return stopped(&self);
        };

        let status = match &*tile {
            RenderableTile::Image(image) => {
                draw_raster_tile(&mut *self.surface.borrow_mut(), image, &placement, clip);
                TaskStatus::Completed
            }
            RenderableTile::Vector { tile, .. } => {
                debug!("Rendering {} features of tile {}", tile.feature_count(), index);
                let style = self.state.borrow().layers.clone();
                let renderer = VectorTileRenderer::new(tile.clone(), placement, clip, style)
                    .with_budget(Duration::from_millis(self.config.render_budget_ms));
                render_vector_tile(&*self.surface, renderer, &token, &self.yield_policy).await
            }
        };

        match status {
            TaskStatus::Completed => {
                self.emit(DrawEvent::TileDrawn {
                    generation,
                    source: source.name().to_string(),
                    index,
                });
                Ok(status)
            }
            TaskStatus::Stopped => stopped(&self),
        }
    }

    /// Painted blocks, grid, pending rect, selection, frames
    fn draw_overlays(&self, state: &ViewState, content: ScreenRect) {
        let mut surface = self.surface.borrow_mut();
        let surface = &mut *surface;
        let ct = &state.transform;
        {
            let blocks = self.blocks.borrow();
            if blocks.visible {
                overlay::draw_blocks(surface, &blocks, ct, content);
            }
        }
        overlay::draw_grid(surface, ct, &state.minecraft_offset, content);
        if let Some(rect) = &state.pending_rect {
            overlay::draw_pending_rect(surface, rect, ct, content);
        }
        if let Some(selection) = &state.selection {
            overlay::draw_selection(surface, selection, ct, content);
        }
        overlay::draw_frames(surface, ct, &state.minecraft_offset, state.viewport, &self.config.margins);
    }

    /// Abandon the draw in flight: its overlays are skipped, queued tile work is
    /// dropped, and this resolves once running tile tasks have stopped
    pub async fn cancel(&self) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.tasks.clear().await;
        debug!("Tile work cancelled before generation {}", generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::cache::TileCache;
    use crate::map::error::TileError;
    use crate::map::projection::ProjectedPoint;
    use crate::map::source::{SourceConfig, SourceKind};
    use crate::map::task::DEFAULT_MAX_CONCURRENCY;
    use crate::map::testing::{MockFetcher, Op, RecordingSurface, line, solid_png, vector_payload};
    use crate::map::vector_tile::GeomType;
    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;

    fn origin(zoom: u8) -> ProjectionParameter {
        ProjectionParameter::new(
            zoom,
            ProjectedPoint { x: 0.0, y: 0.0 },
            1.0,
            ProjectedPoint { x: 1.0, y: 1.0 },
        )
    }

    fn raster_source(fetcher: Rc<MockFetcher>, zoom: u8) -> TileSource {
        TileSource::new(
            SourceConfig {
                name: "raster".into(),
                kind: SourceKind::Raster,
                url_template: "mem://{z}/{x}/{y}.png".into(),
                min_zoom: zoom,
                max_zoom: zoom,
                ..Default::default()
            },
            fetcher,
            TileCache::default(),
        )
    }

    fn vector_source(fetcher: Rc<MockFetcher>, zoom: u8) -> TileSource {
        TileSource::new(
            SourceConfig {
                name: "vector".into(),
                kind: SourceKind::Vector,
                url_template: "mem://{z}/{x}/{y}.pbf".into(),
                min_zoom: zoom,
                max_zoom: zoom,
                ..Default::default()
            },
            fetcher,
            TileCache::default(),
        )
    }

    fn count_drawn(events: &[DrawEvent], generation: u64) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, DrawEvent::TileDrawn { generation: g, .. } if *g == generation))
            .count()
    }

    struct Harness {
        pool: LocalPool,
        view: MapView<RecordingSurface>,
        events: Rc<RefCell<Vec<DrawEvent>>>,
        fetcher: Rc<MockFetcher>,
    }

    /// 512x512 viewport showing tiles (0,0)-(1,1) of zoom 10 at one block per pixel
    fn harness() -> Harness {
        let pool = LocalPool::new();
        let tasks = TaskQueue::new(pool.spawner(), DEFAULT_MAX_CONCURRENCY);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let view = MapView::new(RecordingSurface::new(512, 512), tasks, ViewConfig::default())
            .with_observer(move |e| sink.borrow_mut().push(e.clone()));
        let fetcher = MockFetcher::new(|_| Ok(solid_png(256, [0, 128, 0, 255])));
        view.add_source(raster_source(fetcher.clone(), 10));
        view.apply(Transition {
            state: ViewState {
                viewport: (512.0, 512.0),
                projection: Some(origin(10)),
                ..Default::default()
            },
            redraw: true,
        });
        Harness {
            pool,
            view,
            events,
            fetcher,
        }
    }

    fn spawn_draw(h: &Harness) -> Rc<Cell<Option<DrawOutcome>>> {
        let outcome = Rc::new(Cell::new(None));
        let slot = outcome.clone();
        let view = h.view.clone();
        h.pool
            .spawner()
            .spawn_local(async move { slot.set(Some(view.draw().await)) })
            .unwrap();
        outcome
    }

    #[test]
    fn test_draw_fetches_visible_tiles_then_overlays() {
        let mut h = harness();
        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();

        assert_eq!(outcome.get(), Some(DrawOutcome::Complete));
        let mut urls = h.fetcher.requests();
        urls.sort();
        assert_eq!(
            urls,
            vec!["mem://10/0/0.png", "mem://10/0/1.png", "mem://10/1/0.png", "mem://10/1/1.png"]
        );

        let events = h.events.borrow();
        assert_eq!(events.first(), Some(&DrawEvent::GenerationStarted(1)));
        assert_eq!(events.last(), Some(&DrawEvent::OverlaysDrawn(1)));
        let drawn = events
            .iter()
            .filter(|e| matches!(e, DrawEvent::TileDrawn { generation: 1, .. }))
            .count();
        assert_eq!(drawn, 4);

        // All tile images land before the grid
        let surface = h.view.surface().borrow();
        let draws = surface.draws();
        let last_image = draws.iter().rposition(|op| matches!(op, Op::Image(..)));
        let first_grid = draws
            .iter()
            .position(|op| matches!(op, Op::StrokePath(_, c, _) if *c == Color::BLUE));
        assert_eq!(draws.iter().filter(|op| matches!(op, Op::Image(..))).count(), 4);
        assert!(last_image.is_some() && last_image < first_grid);
    }

    #[test]
    fn test_stale_generation_never_draws_after_new_overlays() {
        let mut h = harness();
        h.fetcher.set_hold(true);
        let first = spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(h.fetcher.held_count(), 4);

        // Pan while the first generation waits on the network
        assert!(h.view.pan(-10.0, 0.0));
        let second = spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(second.get(), None);

        h.fetcher.set_hold(false);
        h.fetcher.release_all();
        h.pool.run_until_stalled();

        assert_eq!(first.get(), Some(DrawOutcome::Superseded));
        assert_eq!(second.get(), Some(DrawOutcome::Complete));

        let events = h.events.borrow();
        let overlays = events
            .iter()
            .position(|e| *e == DrawEvent::OverlaysDrawn(2))
            .unwrap();
        let stale_after = events[overlays..].iter().any(|e| {
            matches!(
                e,
                DrawEvent::TileDrawn { generation: 1, .. }
                    | DrawEvent::TileStopped { generation: 1, .. }
                    | DrawEvent::OverlaysDrawn(1)
            )
        });
        assert!(!stale_after);
        assert!(!events.iter().any(|e| matches!(e, DrawEvent::TileDrawn { generation: 1, .. })));
        assert!(!events.contains(&DrawEvent::OverlaysDrawn(1)));
    }

    #[test]
    fn test_not_configured_placeholder() {
        let mut h = harness();
        h.view.set_projection(None);
        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(outcome.get(), Some(DrawOutcome::NotConfigured));
        assert!(h.fetcher.requests().is_empty());
        assert_eq!(
            h.view.surface().borrow().texts(),
            vec![PLACEHOLDER_MESSAGE.to_string()]
        );
    }

    #[test]
    fn test_disabled_source_not_fetched() {
        let mut h = harness();
        assert!(h.view.set_source_enabled("raster", false));
        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(outcome.get(), Some(DrawOutcome::Complete));
        assert!(h.fetcher.requests().is_empty());
    }

    #[test]
    #[should_panic(expected = "unknown map source")]
    fn test_unknown_source_panics() {
        let h = harness();
        h.view.set_source_enabled("satellite", true);
    }

    #[test]
    fn test_tiles_outside_world_painted_blank() {
        let mut h = harness();
        // Shift the world down so row -1 is visible
        h.view.pan(0.0, 100.0);
        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(outcome.get(), Some(DrawOutcome::Complete));
        assert!(h.fetcher.requests().iter().all(|u| !u.contains("/-1")));
        assert!(h.view.surface().borrow().fills_of(Color::WHITE) >= 2);
    }

    #[test]
    fn test_paint_then_rect_fill() {
        let h = harness();
        // Identity transform: screen (x, y) is block (x, y)
        h.view.set_current_color(Some('G'));
        assert!(h.view.paint_at(5.5, 5.5));
        assert!(!h.view.paint_at(5.5, 5.5));
        h.view.set_current_color(Some('R'));
        h.view.begin_rect(0.0, 0.0);
        h.view.extend_rect(10.0, 10.0);
        assert_eq!(h.view.state().pending_rect, Some(BlockRect::new(0, 0, 11, 11)));
        assert!(h.view.commit_rect_fill());
        assert_eq!(h.view.get_pixel(5, 5), Some('R'));
        assert_eq!(h.view.get_pixel(11, 11), None);
        assert_eq!(h.view.state().pending_rect, None);

        assert_eq!(h.view.pick_color_at(20.0, 20.0), None);
        assert_eq!(h.view.pick_color_at(3.0, 3.0), Some('R'));
        assert!(h.view.erase_at(3.0, 3.0));
        assert_eq!(h.view.get_pixel(3, 3), None);
    }

    #[test]
    fn test_selection_status_and_offset() {
        let mut h = harness();
        h.view.select_at(7.0, 9.0);
        assert!(h.view.set_minecraft_offset(100, 64, 200));
        let state = h.view.state();
        assert_eq!(state.minecraft_offset, MinecraftOffset { x: 93, y: 64, z: 191 });
        spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(h.view.status(), "Minecraft(x: 100, y: 64, z: 200)");
    }

    #[test]
    fn test_draw_renders_vector_tiles() {
        let mut h = harness();
        h.view.set_source_enabled("raster", false);
        let payload = vector_payload(&[(
            "road",
            vec![(GeomType::LineString, line(&[(0, 2048), (4096, 2048)]))],
        )]);
        let fetcher = MockFetcher::new(move |_| Ok(payload.clone()));
        h.view.add_source(vector_source(fetcher.clone(), 10));

        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();

        assert_eq!(outcome.get(), Some(DrawOutcome::Complete));
        assert_eq!(fetcher.requests().len(), 4);
        let events = h.events.borrow();
        assert_eq!(count_drawn(&events, 1), 4);
        assert_eq!(events.last(), Some(&DrawEvent::OverlaysDrawn(1)));

        // One road stroke per tile, all before the grid
        let surface = h.view.surface().borrow();
        let draws = surface.draws();
        let first_grid = draws
            .iter()
            .position(|op| matches!(op, Op::StrokePath(_, c, _) if *c == Color::BLUE))
            .unwrap();
        let roads = draws[..first_grid]
            .iter()
            .filter(|op| matches!(op, Op::StrokePath(_, c, _) if *c == Color::BLACK))
            .count();
        assert_eq!(roads, 4);
        assert!(draws.iter().all(|op| !matches!(op, Op::Image(..))));
    }

    #[test]
    fn test_failed_tiles_do_not_block_overlays() {
        let mut h = harness();
        h.view.set_source_enabled("raster", false);
        let fetcher = MockFetcher::new(|url| match url {
            "mem://10/0/0.png" => Err(TileError::Status(503)),
            "mem://10/1/1.png" => Ok(b"not an image".to_vec()),
            _ => Ok(solid_png(256, [0, 0, 255, 255])),
        });
        h.view.add_source(TileSource::new(
            SourceConfig {
                name: "flaky".into(),
                url_template: "mem://{z}/{x}/{y}.png".into(),
                min_zoom: 10,
                max_zoom: 10,
                ..Default::default()
            },
            fetcher.clone(),
            TileCache::default(),
        ));

        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();

        assert_eq!(outcome.get(), Some(DrawOutcome::Complete));
        assert_eq!(fetcher.requests().len(), 4);
        let events = h.events.borrow();
        assert_eq!(count_drawn(&events, 1), 2);
        assert_eq!(events.last(), Some(&DrawEvent::OverlaysDrawn(1)));
        assert_eq!(h.view.tasks().running_count(), 0);
    }

    #[test]
    fn test_cancel_abandons_draw() {
        let mut h = harness();
        h.fetcher.set_hold(true);
        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(h.fetcher.held_count(), 4);

        let cancelled = Rc::new(Cell::new(false));
        let done = cancelled.clone();
        let view = h.view.clone();
        h.pool
            .spawner()
            .spawn_local(async move {
                view.cancel().await;
                done.set(true);
            })
            .unwrap();
        h.pool.run_until_stalled();
        // Running fetches are stopped, not aborted
        assert!(!cancelled.get());

        h.fetcher.release_all();
        h.pool.run_until_stalled();
        assert!(cancelled.get());
        assert_eq!(outcome.get(), Some(DrawOutcome::Superseded));
        let events = h.events.borrow();
        assert_eq!(count_drawn(&events, 1), 0);
        assert!(!events.contains(&DrawEvent::OverlaysDrawn(1)));
    }

    #[test]
    fn test_disabled_sources_clear_previous_tiles() {
        let mut h = harness();
        spawn_draw(&h);
        h.pool.run_until_stalled();
        h.view.surface().borrow_mut().clear();

        h.view.set_source_enabled("raster", false);
        spawn_draw(&h);
        h.pool.run_until_stalled();

        let content = h.view.state().content_rect(&h.view.config().margins);
        let surface = h.view.surface().borrow();
        let draws = surface.draws();
        assert_eq!(draws.first(), Some(&Op::FillRect(content, Color::LIGHT_GRAY)));
        assert!(draws.iter().all(|op| !matches!(op, Op::Image(..))));
    }

    #[test]
    fn test_zero_tile_size_skips_source() {
        let mut h = harness();
        h.view.set_source_enabled("raster", false);
        let fetcher = MockFetcher::new(|_| Ok(solid_png(256, [0, 0, 0, 255])));
        h.view.add_source(TileSource::new(
            SourceConfig {
                name: "broken".into(),
                url_template: "mem://{z}/{x}/{y}.png".into(),
                tile_size: 0.0,
                ..Default::default()
            },
            fetcher.clone(),
            TileCache::default(),
        ));
        let outcome = spawn_draw(&h);
        h.pool.run_until_stalled();
        assert_eq!(outcome.get(), Some(DrawOutcome::Complete));
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn test_view_transitions() {
        let config = ViewConfig::default();
        let state = ViewState::default();

        let t = state.resize(800.0, 600.0);
        assert!(t.redraw);
        assert_eq!(t.state.transform.bx, 400.0);
        assert_eq!(t.state.transform.by, 300.0);
        assert!(!t.state.resize(800.0, 600.0).redraw);

        assert!(!state.pan(0.0, 0.0).redraw);
        assert!(state.pan(1.0, 0.0).redraw);

        let zoomed = state.zoom_about(2.0, 10.0, 10.0, &config);
        assert!(zoomed.redraw);
        assert_eq!(zoomed.state.transform.ax, 2.0);
        let mut far = state.clone();
        far.transform.ax = 256.0;
        assert!(!far.zoom_about(2.0, 0.0, 0.0, &config).redraw);

        let selected = state.select_at(3.5, -0.5);
        assert_eq!(selected.state.selection, Some(BlockRect::block(3, -1)));
        assert!(selected.state.clear_selection().redraw);

        let hidden = state.toggle_layer("road");
        assert!(!hidden.state.layers.is_visible("road"));

        let moved = t.state.move_to(100.0, 100.0, 4.0, &config.margins);
        let c = moved.state.content_rect(&config.margins);
        assert_eq!(
            moved.state.transform.block_at((c.x + c.w / 2.0) as f64, (c.y + c.h / 2.0) as f64),
            (100, 100)
        );
    }

    #[test]
    fn test_view_state_json() {
        let mut state = ViewState::default();
        state.selection = Some(BlockRect::block(1, 2));
        state.projection = Some(origin(15));
        let json = serde_json::to_string(&state).unwrap();
        let back: ViewState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        let partial: ViewState = serde_json::from_str(r#"{"viewport":[10.0,20.0]}"#).unwrap();
        assert_eq!(partial.viewport, (10.0, 20.0));
        assert_eq!(partial.transform, AffineTransform::default());
    }
}
