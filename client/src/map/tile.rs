//! Tile addressing and Web Mercator helpers (EPSG:3857, 256px tiles)

use std::f64::consts::PI;
use std::fmt;

/// Projected pixels per tile edge for slippy-map sources
pub const TILE_SIZE: f64 = 256.0;

/// Deepest zoom whose tile coordinates fit a `u32`
pub const MAX_ZOOM: u8 = 30;

/// Tiles along one axis of the world; zooms past `MAX_ZOOM` count as `MAX_ZOOM`
pub fn tiles_per_axis(zoom: u8) -> i64 {
    1_i64 << zoom.min(MAX_ZOOM)
}

/// Address of one tile of a map source
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TileIndex {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileIndex {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Address an unwrapped grid position, wrapping x around the world.
    /// Returns `None` when y lies outside the world.
    pub fn from_grid(x: i64, y: i64, z: u8) -> Option<Self> {
        if !is_valid_tile_y(y, z) {
            return None;
        }
        Some(Self::new(wrap_tile_x(x, z), y as u32, z))
    }

    /// Substitute `{x}`, `{y}`, `{z}` and `{t}` in a URL template
    pub fn url(&self, template: &str, source_type: Option<&str>) -> String {
        template
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
            .replace("{z}", &self.z.to_string())
            .replace("{t}", source_type.unwrap_or("_t_undefined_"))
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Convert longitude/latitude to fractional tile coordinates
pub fn lon_lat_to_tile_f64(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let n = tiles_per_axis(zoom) as f64;

    let x = (lon + 180.0) / 360.0 * n;

    let lat_rad = lat.to_radians();
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;

    (x, y)
}

/// Project longitude/latitude to Web Mercator pixels at the given zoom
pub fn project(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let (x, y) = lon_lat_to_tile_f64(normalize_longitude(lon), clamp_latitude(lat), zoom);
    (x * TILE_SIZE, y * TILE_SIZE)
}

/// Wrap X coordinate for infinite horizontal scrolling
pub fn wrap_tile_x(x: i64, zoom: u8) -> u32 {
    x.rem_euclid(tiles_per_axis(zoom)) as u32
}

/// Check if Y coordinate is valid (no wrapping for latitude)
pub fn is_valid_tile_y(y: i64, zoom: u8) -> bool {
    y >= 0 && y < tiles_per_axis(zoom)
}

/// Normalize longitude to [-180, 180]
pub fn normalize_longitude(lon: f64) -> f64 {
    let mut l = lon;
    while l < -180.0 {
        l += 360.0;
    }
    while l > 180.0 {
        l -= 360.0;
    }
    l
}

/// Clamp latitude to valid Mercator range
pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-85.05112878, 85.05112878)
}

/// Great-circle distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let earth_radius = 6371000.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin() * (dlat / 2.0).sin()
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin() * (dlon / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    earth_radius * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lon_lat_to_tile() {
        // Seoul (approx 126.9780, 37.5665)
        let (x, y) = lon_lat_to_tile_f64(126.9780, 37.5665, 10);
        assert_eq!(x.floor() as u32, 873);
        assert_eq!(y.floor() as u32, 396);
    }

    #[test]
    fn test_deep_zoom_does_not_overflow() {
        assert_eq!(tiles_per_axis(2), 4);
        assert_eq!(tiles_per_axis(63), tiles_per_axis(MAX_ZOOM));
        assert_eq!(wrap_tile_x(-1, 255), (1_u32 << MAX_ZOOM) - 1);
        assert!(is_valid_tile_y(5, 64));
        assert!(!is_valid_tile_y(1 << MAX_ZOOM, 64));
    }

    #[test]
    fn test_wrap_tile_x() {
        // At zoom 2, max tiles = 4 (0-3)
        assert_eq!(wrap_tile_x(4, 2), 0);
        assert_eq!(wrap_tile_x(-1, 2), 3);
        assert_eq!(wrap_tile_x(2, 2), 2);
    }

    #[test]
    fn test_from_grid() {
        assert_eq!(TileIndex::from_grid(-1, 1, 2), Some(TileIndex::new(3, 1, 2)));
        assert_eq!(TileIndex::from_grid(0, 4, 2), None);
        assert_eq!(TileIndex::from_grid(0, -1, 2), None);
    }

    #[test]
    fn test_normalize_longitude() {
        assert!((normalize_longitude(190.0) - (-170.0)).abs() < 0.001);
        assert!((normalize_longitude(-190.0) - 170.0).abs() < 0.001);
    }

    #[test]
    fn test_url_template() {
        let index = TileIndex::new(3, 5, 7);
        assert_eq!(
            index.url("https://example.com/{t}/{z}/{x}/{y}.pbf", Some("bvmap")),
            "https://example.com/bvmap/7/3/5.pbf"
        );
        assert_eq!(index.url("{z}-{x}-{y}", None), "7-3-5");
    }

    #[test]
    fn test_haversine_one_degree_north() {
        let d = haversine_distance(35.0, 139.0, 36.0, 139.0);
        assert!((d - 111_195.0).abs() < 10.0);
    }
}
