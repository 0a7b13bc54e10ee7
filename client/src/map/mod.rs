//! Block map engine: block/tile coordinate mapping, tile sources, cooperative
//! tile rendering and the view that orchestrates redraws.
//!
//! Everything here is single-threaded. Tile work runs as local futures on any
//! [`futures::task::LocalSpawn`], bounded by a [`task::TaskQueue`].

pub mod blocks;
pub mod cache;
pub mod canvas;
pub mod error;
pub mod loader;
pub mod overlay;
pub mod projection;
pub mod renderer;
pub mod source;
pub mod task;
pub mod tile;
pub mod transform;
pub mod vector_tile;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use blocks::{BlockBufferSave, BlockRect, SparseBlockBuffer};
pub use cache::{CacheStats, TileCache};
pub use canvas::{Color, PixelCanvas, ScreenRect, Surface};
pub use error::TileError;
pub use loader::{HttpFetcher, TileFetcher};
pub use projection::{ProjectedPoint, ProjectionParameter, TileBlockMapping};
pub use renderer::{LayerStyle, VectorTileRenderer};
pub use source::{SourceConfig, SourceKind, TileSource};
pub use task::{CancellationToken, FrameClock, TaskQueue, TaskStatus, YieldPolicy};
pub use tile::TileIndex;
pub use transform::AffineTransform;
pub use view::{DrawEvent, DrawOutcome, MapView, ViewConfig, ViewState};
