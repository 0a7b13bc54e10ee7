//! Projection anchor and the tile space <-> block space mapping

use serde::{Deserialize, Serialize};

use super::tile::{haversine_distance, project};

/// A point in projected (Web Mercator pixel) space
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
}

/// Local affine approximation of the map projection around the origin
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionParameter {
    /// Zoom level the anchor and ratios are expressed at
    pub zoom: u8,
    /// Origin of block space, in projected pixels at `zoom`
    pub anchor: ProjectedPoint,
    /// Meters covered by one block
    pub block_size: f64,
    /// Meters per projected pixel at `zoom`, per axis
    pub meters_per_unit: ProjectedPoint,
}

impl ProjectionParameter {
    pub fn new(zoom: u8, anchor: ProjectedPoint, block_size: f64, meters_per_unit: ProjectedPoint) -> Self {
        Self {
            zoom,
            anchor,
            block_size,
            meters_per_unit,
        }
    }

    /// Build the anchor for a geographic origin.
    ///
    /// The meters-per-unit ratio is measured along one degree east and one
    /// degree north of the origin.
    pub fn from_lon_lat(lon: f64, lat: f64, zoom: u8, block_size: f64) -> Self {
        let origin = project(lon, lat, zoom);
        let north = project(lon, lat + 1.0, zoom);
        let east = project(lon + 1.0, lat, zoom);

        let dx = haversine_distance(lat, lon, lat, lon + 1.0);
        let dy = haversine_distance(lat, lon, lat + 1.0, lon);

        Self {
            zoom,
            anchor: ProjectedPoint {
                x: origin.0,
                y: origin.1,
            },
            block_size,
            meters_per_unit: ProjectedPoint {
                x: dx / (east.0 - origin.0),
                y: dy / (origin.1 - north.1),
            },
        }
    }

    /// Whether the ratios describe a usable, non-degenerate mapping
    pub fn is_valid(&self) -> bool {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        positive(self.block_size)
            && positive(self.meters_per_unit.x)
            && positive(self.meters_per_unit.y)
            && self.anchor.x.is_finite()
            && self.anchor.y.is_finite()
    }
}

/// Affine mapping between projected pixels of a tile zoom and blocks
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileBlockMapping {
    pub ax: f64,
    pub bx: f64,
    pub ay: f64,
    pub by: f64,
}

impl TileBlockMapping {
    pub fn new(param: &ProjectionParameter, tile_zoom: u8) -> Self {
        let zoom_scale = 2.0_f64.powi(param.zoom as i32 - tile_zoom as i32);
        let sx = param.meters_per_unit.x / param.block_size;
        let sy = param.meters_per_unit.y / param.block_size;
        Self {
            ax: zoom_scale * sx,
            bx: -param.anchor.x * sx,
            ay: zoom_scale * sy,
            by: -param.anchor.y * sy,
        }
    }

    pub fn to_block_x(&self, tx: f64) -> f64 {
        self.ax * tx + self.bx
    }

    pub fn to_block_y(&self, ty: f64) -> f64 {
        self.ay * ty + self.by
    }

    pub fn to_tile_x(&self, x: f64) -> f64 {
        (x - self.bx) / self.ax
    }

    pub fn to_tile_y(&self, y: f64) -> f64 {
        (y - self.by) / self.ay
    }
}
