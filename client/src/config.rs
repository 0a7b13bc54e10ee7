//! Editor configuration and the saved project

use std::rc::Rc;

use anyhow::{Context, ensure};
use log::info;
use serde::{Deserialize, Serialize};

use crate::map::blocks::{BlockBufferSave, BlockRect};
use crate::map::cache::TileCache;
use crate::map::canvas::Surface;
use crate::map::loader::TileFetcher;
use crate::map::projection::ProjectionParameter;
use crate::map::renderer::LayerStyle;
use crate::map::source::{SourceConfig, SourceKind, TileSource};
use crate::map::tile::MAX_ZOOM;
use crate::map::transform::AffineTransform;
use crate::map::view::{MapView, MinecraftOffset, ViewConfig};

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "BLOCKMAP_CONFIG";

/// Geographic origin of block (0, 0)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub sources: Vec<SourceConfig>,
    pub origin: Option<GeoOrigin>,
    /// Zoom the projection anchor is computed at
    pub base_zoom: u8,
    /// Meters per block
    pub block_size: f64,
    pub max_concurrency: usize,
    pub cache_max_tiles: usize,
    pub cache_max_memory: usize,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
    pub view: ViewConfig,
    pub layers: LayerStyle,
    pub project_path: Option<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    name: "gsi-std".into(),
                    kind: SourceKind::Raster,
                    url_template: "https://cyberjapandata.gsi.go.jp/xyz/std/{z}/{x}/{y}.png".into(),
                    min_zoom: 5,
                    max_zoom: 18,
                    ..Default::default()
                },
                SourceConfig {
                    name: "gsi-vector".into(),
                    kind: SourceKind::Vector,
                    url_template: "https://cyberjapandata.gsi.go.jp/xyz/{t}/{z}/{x}/{y}.pbf".into(),
                    source_type: Some("experimental_bvmap".into()),
                    min_zoom: 8,
                    max_zoom: 17,
                    ..Default::default()
                },
            ],
            origin: None,
            base_zoom: 15,
            block_size: 1.0,
            max_concurrency: crate::map::task::DEFAULT_MAX_CONCURRENCY,
            cache_max_tiles: 256,
            cache_max_memory: 64 * 1024 * 1024,
            fetch_timeout_secs: 30,
            user_agent: format!("blockmap/{}", env!("CARGO_PKG_VERSION")),
            view: ViewConfig::default(),
            layers: LayerStyle::default(),
            project_path: Some("blockmap-project.json".into()),
        }
    }
}

impl EditorConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the tile math cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.base_zoom <= MAX_ZOOM, "base_zoom {} exceeds {}", self.base_zoom, MAX_ZOOM);
        ensure!(
            self.block_size.is_finite() && self.block_size > 0.0,
            "block_size must be positive, got {}",
            self.block_size
        );
        ensure!(self.max_concurrency > 0, "max_concurrency must be at least 1");
        ensure!(
            self.view.min_scale > 0.0 && self.view.min_scale <= self.view.max_scale,
            "scale bounds {}..{} are invalid",
            self.view.min_scale,
            self.view.max_scale
        );
        for source in &self.sources {
            ensure!(
                source.min_zoom <= source.max_zoom && source.max_zoom <= MAX_ZOOM,
                "source {}: zoom range {}..={} is invalid",
                source.name,
                source.min_zoom,
                source.max_zoom
            );
            ensure!(
                source.tile_size.is_finite() && source.tile_size > 0.0,
                "source {}: tile_size must be positive, got {}",
                source.name,
                source.tile_size
            );
        }
        Ok(())
    }

    /// Read the file named by `BLOCKMAP_CONFIG`, or fall back to the defaults
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let json = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path))?;
                let config = Self::from_json(&json).with_context(|| format!("parsing config {}", path))?;
                info!("Loaded config from {}", path);
                Ok(config)
            }
            Err(_) => {
                info!("{} not set, using built-in config", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    pub fn projection(&self) -> Option<ProjectionParameter> {
        self.origin
            .map(|o| ProjectionParameter::from_lon_lat(o.lon, o.lat, self.base_zoom, self.block_size))
    }

    pub fn build_sources(&self, fetcher: Rc<dyn TileFetcher>) -> Vec<TileSource> {
        self.sources
            .iter()
            .map(|source| {
                TileSource::new(
                    source.clone(),
                    fetcher.clone(),
                    TileCache::new(self.cache_max_tiles, self.cache_max_memory),
                )
            })
            .collect()
    }
}

/// Everything the editor restores on the next start
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectState {
    pub transform: AffineTransform,
    pub block_size: f64,
    pub origin: Option<GeoOrigin>,
    pub blocks: BlockBufferSave,
    pub layers: LayerStyle,
    pub selection: Option<BlockRect>,
    pub minecraft_offset: MinecraftOffset,
}

impl ProjectState {
    pub fn capture<S: Surface + 'static>(view: &MapView<S>, config: &EditorConfig) -> Self {
        let state = view.state();
        Self {
            transform: state.transform,
            block_size: config.block_size,
            origin: config.origin,
            blocks: view.save_blocks(),
            layers: state.layers,
            selection: state.selection,
            minecraft_offset: state.minecraft_offset,
        }
    }

    /// Restore into `view`; the saved origin and block size win over `config`
    pub fn restore<S: Surface + 'static>(&self, view: &MapView<S>, config: &mut EditorConfig) {
        if self.origin.is_some() {
            config.origin = self.origin;
        }
        if self.block_size > 0.0 {
            config.block_size = self.block_size;
        }
        let mut state = view.state();
        state.transform = self.transform;
        state.layers = self.layers.clone();
        state.selection = self.selection;
        state.minecraft_offset = self.minecraft_offset;
        state.projection = config.projection();
        view.restore(state, &self.blocks);
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn load(path: &str) -> anyhow::Result<Option<Self>> {
        if !std::path::Path::new(path).exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path).with_context(|| format!("reading project {}", path))?;
        let project = serde_json::from_str(&json).with_context(|| format!("parsing project {}", path))?;
        Ok(Some(project))
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing project {}", path))?;
        info!("Saved project to {}", path);
        Ok(())
    }
}
