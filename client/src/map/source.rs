//! Map tile sources: fetch, decode and cache tiles

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use image::RgbaImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::cache::{CacheStats, TileCache};
use super::error::TileError;
use super::loader::{TileFetcher, decode_tile_image, tile_memory_size};
use super::projection::{ProjectionParameter, TileBlockMapping};
use super::task::CancellationToken;
use super::tile::TileIndex;
use super::transform::AffineTransform;
use super::vector_tile::VectorTile;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Raster,
    Vector,
}

/// Static description of one map source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// URL with `{x}`, `{y}`, `{z}` and optionally `{t}` placeholders
    pub url_template: String,
    /// Substituted for `{t}`
    pub source_type: Option<String>,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Projected pixels per tile edge
    pub tile_size: f64,
    /// Tiles wanted across the viewport width
    pub preferred_tiles: f64,
    pub enabled: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: SourceKind::Raster,
            url_template: String::new(),
            source_type: None,
            min_zoom: 0,
            max_zoom: 18,
            tile_size: 256.0,
            preferred_tiles: 2.0,
            enabled: true,
        }
    }
}

/// A decoded tile ready for drawing
#[derive(Debug)]
pub enum RenderableTile {
    Image(RgbaImage),
    Vector {
        tile: Rc<VectorTile>,
        payload_len: usize,
    },
}

impl RenderableTile {
    /// Estimated bytes held by the decoded tile
    pub fn memory_size(&self) -> usize {
        match self {
            RenderableTile::Image(img) => tile_memory_size(img.width(), img.height()),
            RenderableTile::Vector { payload_len, .. } => *payload_len,
        }
    }
}

/// One map source with its fetcher and tile cache
pub struct TileSource {
    config: SourceConfig,
    fetcher: Rc<dyn TileFetcher>,
    cache: RefCell<TileCache>,
    enabled: Cell<bool>,
}

impl TileSource {
    pub fn new(config: SourceConfig, fetcher: Rc<dyn TileFetcher>, cache: TileCache) -> Self {
        Self {
            enabled: Cell::new(config.enabled),
            config,
            fetcher,
            cache: RefCell::new(cache),
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.borrow().stats()
    }

    pub fn url(&self, index: &TileIndex) -> String {
        index.url(&self.config.url_template, self.config.source_type.as_deref())
    }

    /// Fetch and decode a tile, or return the cached one.
    ///
    /// `Ok(None)` means the token was stopped while the fetch was in flight;
    /// the decoded tile is still cached.
    pub async fn get_tile(
        &self,
        index: TileIndex,
        token: &CancellationToken,
    ) -> Result<Option<Rc<RenderableTile>>, TileError> {
        if let Some(tile) = self.cache.borrow_mut().get(&index) {
            return Ok(Some(tile));
        }

        let url = self.url(&index);
        let bytes = self.fetcher.fetch(&url).await?;
        let tile = match self.decode(&bytes) {
            Ok(tile) => Rc::new(tile),
            Err(e) => {
                warn!("Failed to decode tile {} from {}: {}", index, url, e);
                return Err(e);
            }
        };
        self.cache.borrow_mut().insert(index, tile.clone());

        if token.is_stopped() {
            debug!("Discarding stale tile {} of {}", index, self.config.name);
            return Ok(None);
        }
        Ok(Some(tile))
    }

    fn decode(&self, bytes: &[u8]) -> Result<RenderableTile, TileError> {
        match self.config.kind {
            SourceKind::Raster => Ok(RenderableTile::Image(decode_tile_image(bytes)?)),
            SourceKind::Vector => Ok(RenderableTile::Vector {
                tile: Rc::new(VectorTile::decode(bytes)?),
                payload_len: bytes.len(),
            }),
        }
    }

    fn clamp_zoom(&self, zoom: u8) -> u8 {
        zoom.clamp(self.config.min_zoom, self.config.max_zoom.max(self.config.min_zoom))
    }

    /// Pick the tile zoom whose tiles cover the viewport width with about
    /// `preferred_tiles` tiles, within the source's zoom range.
    pub fn select_zoom(&self, param: &ProjectionParameter, ct: &AffineTransform, viewport_w: f64) -> u8 {
        let min = self.config.min_zoom;
        let max = self.config.max_zoom.max(min);
        let preferred = self.config.preferred_tiles.max(1.0);

        let mut zoom = self.clamp_zoom(param.zoom);
        let block_width = viewport_w / ct.ax;
        let projected_width = block_width * param.block_size / param.meters_per_unit.x;
        let mut tiles = projected_width * 2.0_f64.powi(zoom as i32 - param.zoom as i32) / self.config.tile_size;
        if !tiles.is_finite() {
            return zoom;
        }

        while tiles > preferred && zoom > min {
            tiles /= 2.0;
            zoom -= 1;
        }
        while tiles < preferred / 2.0 && zoom < max {
            tiles *= 2.0;
            zoom += 1;
        }
        zoom
    }

    pub fn mapping(&self, param: &ProjectionParameter, zoom: u8) -> TileBlockMapping {
        TileBlockMapping::new(param, zoom)
    }
}
