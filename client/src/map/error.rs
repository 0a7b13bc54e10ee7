//! Tile pipeline errors

use thiserror::Error;

/// Failure to fetch or decode one tile. The tile is left blank for the
/// current draw; the next draw retries.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("fetch worker is gone")]
    WorkerGone,

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("vector tile decode failed: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("bad geometry command id {0}")]
    Geometry(u32),

    #[error("geometry stream ends inside a command")]
    TruncatedGeometry,
}
