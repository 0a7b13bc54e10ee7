//! Sparse chunked storage for user-painted blocks

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use super::canvas::{Color, ScreenRect};
use super::transform::AffineTransform;

/// Default chunk edge in blocks
pub const CHUNK_SIZE: i64 = 16;

/// Axis-aligned rectangle of blocks, `w`/`h` in blocks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl BlockRect {
    pub fn new(x: i64, y: i64, w: i64, h: i64) -> Self {
        Self { x, y, w, h }
    }

    /// Single block
    pub fn block(x: i64, y: i64) -> Self {
        Self::new(x, y, 1, 1)
    }

    /// Smallest rect holding both corner blocks (inclusive)
    pub fn from_corners(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self::new(x0.min(x1), y0.min(y1), (x0 - x1).abs() + 1, (y0 - y1).abs() + 1)
    }

    pub fn x1(&self) -> i64 {
        self.x.saturating_add(self.w)
    }

    pub fn y1(&self) -> i64 {
        self.y.saturating_add(self.h)
    }

    pub fn includes(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.x1() && y >= self.y && y < self.y1()
    }

    /// Overlap of two rects, `None` when they do not touch
    pub fn intersect(&self, other: &BlockRect) -> Option<BlockRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x1().min(other.x1());
        let y1 = self.y1().min(other.y1());
        (x0 < x1 && y0 < y1).then(|| Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Grow to also cover block `(x, y)`
    pub fn union_block(&self, x: i64, y: i64) -> Self {
        let x0 = self.x.min(x);
        let y0 = self.y.min(y);
        let x1 = self.x1().max(x + 1);
        let y1 = self.y1().max(y + 1);
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn to_screen(&self, ct: &AffineTransform) -> ScreenRect {
        ScreenRect::new(
            ct.to_screen_x(self.x as f64) as f32,
            ct.to_screen_y(self.y as f64) as f32,
            (self.w as f64 * ct.ax) as f32,
            (self.h as f64 * ct.ay) as f32,
        )
    }
}

/// Block palette: single-character labels to display colors
pub const PALETTE: [(char, Color); 9] = [
    ('W', Color::WHITE),
    ('R', Color::RED),
    ('G', Color::GREEN),
    ('Y', Color::YELLOW),
    ('B', Color::BLACK),
    ('y', Color::rgb(0x80, 0x80, 0x40)),
    ('s', Color::rgb(0xfa, 0xf1, 0xb8)), // sand
    ('S', Color::rgb(0x80, 0x80, 0x80)), // stone
    ('N', Color::rgb(0x74, 0x44, 0x43)), // netherrack
];

pub fn palette_color(label: char) -> Option<Color> {
    PALETTE.iter().find(|(c, _)| *c == label).map(|(_, color)| *color)
}

/// Fixed-size chunk of optional color labels
#[derive(Clone, Debug)]
pub struct BlockChunk {
    rect: BlockRect,
    cells: Vec<Option<char>>,
}

impl BlockChunk {
    fn new(rect: BlockRect) -> Self {
        let len = rect.w.max(0).saturating_mul(rect.h.max(0)) as usize;
        Self {
            rect,
            cells: vec![None; len],
        }
    }

    pub fn rect(&self) -> &BlockRect {
        &self.rect
    }

    fn offset(&self, bx: i64, by: i64) -> Option<usize> {
        if self.rect.includes(bx, by) {
            Some(((by - self.rect.y) * self.rect.w + (bx - self.rect.x)) as usize)
        } else {
            None
        }
    }

    /// Paint if the block lies inside this chunk
    pub fn paint(&mut self, bx: i64, by: i64, color: Option<char>) -> bool {
        match self.offset(bx, by) {
            Some(i) => {
                self.cells[i] = color;
                true
            }
            None => false,
        }
    }

    /// Paint the part of `rect` inside this chunk
    fn fill(&mut self, rect: &BlockRect, color: Option<char>) {
        let Some(area) = self.rect.intersect(rect) else {
            return;
        };
        let w = self.rect.w as usize;
        let x0 = (area.x - self.rect.x) as usize;
        for y in (area.y - self.rect.y)..(area.y1() - self.rect.y) {
            let row = y as usize * w;
            self.cells[row + x0..row + x0 + area.w as usize].fill(color);
        }
    }

    pub fn get_pixel(&self, bx: i64, by: i64) -> Option<char> {
        self.offset(bx, by).and_then(|i| self.cells[i])
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }

    /// Visit set cells in row-major order with chunk-local coordinates
    pub fn each_pixel(&self, mut f: impl FnMut(i64, i64, char)) {
        let w = self.rect.w.max(1) as usize;
        for (i, cell) in self.cells.iter().enumerate() {
            if let Some(c) = cell {
                f((i % w) as i64, (i / w) as i64, *c);
            }
        }
    }

    fn save(&self) -> ChunkSave {
        let contents = self
            .cells
            .chunks(self.rect.w.max(1) as usize)
            .map(|row| {
                if row.iter().all(Option::is_none) {
                    Vec::new()
                } else {
                    row.to_vec()
                }
            })
            .collect();
        ChunkSave {
            rect: self.rect,
            contents,
        }
    }
}

/// Serialized chunk: only rows holding a set cell keep their contents
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkSave {
    pub rect: BlockRect,
    pub contents: Vec<Vec<Option<char>>>,
}

/// Serialized buffer: empty chunks are dropped
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockBufferSave {
    pub current_color: Option<char>,
    pub chunks: Vec<ChunkSave>,
}

/// Append-only list of chunks covering painted blocks, indexed by chunk origin
#[derive(Clone, Debug)]
pub struct SparseBlockBuffer {
    chunk_w: i64,
    chunk_h: i64,
    chunks: Vec<BlockChunk>,
    index: HashMap<(i64, i64), usize>,
    pub current_color: Option<char>,
    pub visible: bool,
}

impl SparseBlockBuffer {
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE, CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_w: i64, chunk_h: i64) -> Self {
        assert!(chunk_w > 0 && chunk_h > 0, "chunk size must be positive");
        Self {
            chunk_w,
            chunk_h,
            chunks: Vec::new(),
            index: HashMap::new(),
            current_color: Some('R'),
            visible: true,
        }
    }

    pub fn chunks(&self) -> &[BlockChunk] {
        &self.chunks
    }

    /// Grid cell holding block `(bx, by)`
    fn chunk_origin(&self, bx: i64, by: i64) -> (i64, i64) {
        (
            bx.div_euclid(self.chunk_w) * self.chunk_w,
            by.div_euclid(self.chunk_h) * self.chunk_h,
        )
    }

    /// Chunk at a grid origin, allocated on first use
    fn chunk_mut(&mut self, origin: (i64, i64)) -> &mut BlockChunk {
        let i = match self.index.get(&origin) {
            Some(&i) => i,
            None => {
                let rect = BlockRect::new(origin.0, origin.1, self.chunk_w, self.chunk_h);
                self.chunks.push(BlockChunk::new(rect));
                self.index.insert(origin, self.chunks.len() - 1);
                self.chunks.len() - 1
            }
        };
        &mut self.chunks[i]
    }

    /// Set (or unset with `None`) one block.
    ///
    /// A chunk snapped to the chunk grid is allocated when no chunk covers the
    /// block; unsetting an uncovered block allocates nothing.
    pub fn paint(&mut self, bx: i64, by: i64, color: Option<char>) {
        let origin = self.chunk_origin(bx, by);
        if color.is_none() && !self.index.contains_key(&origin) {
            return;
        }
        self.chunk_mut(origin).paint(bx, by, color);
    }

    pub fn get_pixel(&self, bx: i64, by: i64) -> Option<char> {
        let origin = self.chunk_origin(bx, by);
        self.index
            .get(&origin)
            .and_then(|&i| self.chunks[i].get_pixel(bx, by))
    }

    /// Paint every block of `rect`, one chunk-grid cell at a time
    pub fn rect_fill(&mut self, rect: &BlockRect, color: Option<char>) {
        if rect.w <= 0 || rect.h <= 0 {
            return;
        }
        let (cx0, cy0) = self.chunk_origin(rect.x, rect.y);
        let (cx1, cy1) = self.chunk_origin(rect.x1() - 1, rect.y1() - 1);
        let mut cy = cy0;
        while cy <= cy1 {
            let mut cx = cx0;
            while cx <= cx1 {
                if color.is_some() || self.index.contains_key(&(cx, cy)) {
                    self.chunk_mut((cx, cy)).fill(rect, color);
                }
                cx += self.chunk_w;
            }
            cy += self.chunk_h;
        }
    }

    /// Visit every set cell with absolute block coordinates, chunk by chunk
    pub fn each_pixel(&self, mut f: impl FnMut(i64, i64, char)) {
        for chunk in &self.chunks {
            let (x0, y0) = (chunk.rect.x, chunk.rect.y);
            chunk.each_pixel(|x, y, c| f(x0 + x, y0 + y, c));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(BlockChunk::is_empty)
    }

    pub fn save(&self) -> BlockBufferSave {
        BlockBufferSave {
            current_color: self.current_color,
            chunks: self
                .chunks
                .iter()
                .filter(|c| !c.is_empty())
                .map(BlockChunk::save)
                .collect(),
        }
    }

    /// Rebuild from a save. Cells are re-painted onto the chunk grid, so a saved
    /// rect only bounds which cells are read and never sizes an allocation.
    pub fn load(save: &BlockBufferSave) -> Self {
        let mut buffer = Self::new();
        buffer.current_color = save.current_color;
        for chunk in &save.chunks {
            let rect = chunk.rect;
            if rect.w <= 0 || rect.h <= 0 {
                warn!("Skipping saved chunk with empty rect {:?}", rect);
                continue;
            }
            for (y, row) in chunk.contents.iter().enumerate().take(rect.h as usize) {
                for (x, cell) in row.iter().enumerate().take(rect.w as usize) {
                    let Some(color) = cell else {
                        continue;
                    };
                    let (Some(bx), Some(by)) = (rect.x.checked_add(x as i64), rect.y.checked_add(y as i64))
                    else {
                        continue;
                    };
                    buffer.paint(bx, by, Some(*color));
                }
            }
        }
        buffer
    }
}

impl Default for SparseBlockBuffer {
    fn default() -> Self {
        Self::new()
    }
}
