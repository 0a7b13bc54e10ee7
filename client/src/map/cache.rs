//! LRU cache for decoded tiles

use std::collections::HashMap;
use std::rc::Rc;
use web_time::Instant;

use super::source::RenderableTile;
use super::tile::TileIndex;

/// Cached decoded tile
pub struct CachedTile {
    pub tile: Rc<RenderableTile>,
    pub memory_size: usize,
    pub created_at: Instant,
}

/// LRU cache for map tiles
pub struct TileCache {
    tiles: HashMap<TileIndex, CachedTile>,
    access_order: Vec<TileIndex>,
    max_tiles: usize,
    current_memory: usize,
    max_memory: usize,
}

impl TileCache {
    /// Create a new tile cache
    /// - max_tiles: Maximum number of tiles to cache (e.g., 256)
    /// - max_memory: Maximum decoded size in bytes (e.g., 64MB)
    pub fn new(max_tiles: usize, max_memory: usize) -> Self {
        Self {
            tiles: HashMap::with_capacity(max_tiles),
            access_order: Vec::with_capacity(max_tiles),
            max_tiles,
            current_memory: 0,
            max_memory,
        }
    }

    pub fn contains(&self, index: &TileIndex) -> bool {
        self.tiles.contains_key(index)
    }

    /// Get a tile from cache, updating access order
    pub fn get(&mut self, index: &TileIndex) -> Option<Rc<RenderableTile>> {
        let tile = self.tiles.get(index).map(|c| c.tile.clone())?;
        self.update_access_order(*index);
        Some(tile)
    }

    /// Insert a tile, evicting least recently used ones if necessary
    pub fn insert(&mut self, index: TileIndex, tile: Rc<RenderableTile>) {
        let memory_size = tile.memory_size();

        // Remove if already exists (update case)
        if let Some(old) = self.tiles.remove(&index) {
            self.current_memory -= old.memory_size;
            self.access_order.retain(|id| id != &index);
        }

        while self.should_evict(memory_size) {
            if !self.evict_oldest() {
                break;
            }
        }

        self.current_memory += memory_size;
        self.tiles.insert(
            index,
            CachedTile {
                tile,
                memory_size,
                created_at: Instant::now(),
            },
        );
        self.access_order.push(index);
    }

    fn should_evict(&self, new_tile_memory: usize) -> bool {
        !self.tiles.is_empty()
            && (self.tiles.len() >= self.max_tiles
                || self.current_memory + new_tile_memory > self.max_memory)
    }

    /// Evict the least recently used tile
    fn evict_oldest(&mut self) -> bool {
        if self.access_order.is_empty() {
            return false;
        }
        let oldest = self.access_order.remove(0);
        match self.tiles.remove(&oldest) {
            Some(cached) => {
                self.current_memory -= cached.memory_size;
                log::debug!(
                    "Evicted tile {} (cached {:?} ago)",
                    oldest,
                    cached.created_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    fn update_access_order(&mut self, index: TileIndex) {
        if let Some(pos) = self.access_order.iter().position(|id| id == &index) {
            self.access_order.remove(pos);
            self.access_order.push(index);
        }
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.access_order.clear();
        self.current_memory = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tile_count: self.tiles.len(),
            max_tiles: self.max_tiles,
            memory_used: self.current_memory,
            max_memory: self.max_memory,
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Cache statistics for the status line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub tile_count: usize,
    pub max_tiles: usize,
    pub memory_used: usize,
    pub max_memory: usize,
}

impl CacheStats {
    pub fn memory_usage_percent(&self) -> f32 {
        if self.max_memory == 0 {
            0.0
        } else {
            (self.memory_used as f32 / self.max_memory as f32) * 100.0
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        // Default: 256 tiles, 64MB max
        Self::new(256, 64 * 1024 * 1024)
    }
}
