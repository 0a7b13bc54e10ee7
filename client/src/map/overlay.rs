//! Fixed overlays drawn after the tiles of a generation

use super::blocks::{BlockRect, SparseBlockBuffer, palette_color};
use super::canvas::{Color, Label, Path, ScreenRect, Surface};
use super::transform::AffineTransform;
use super::view::{Margins, MinecraftOffset};

/// Grid spacing in blocks and line color, finest first
pub const GRID_LEVELS: [(i64, Color); 5] = [
    (1, Color::LIGHT_GRAY),
    (4, Color::rgb(0xff, 0xc0, 0xc0)),
    (16, Color::GREEN),
    (128, Color::BLUE),
    (2048, Color::BLACK),
];

/// Screen spacing below which a grid level is not drawn
pub const GRID_MIN_SPACING: f64 = 32.0;

/// Screen spacing below which a level gets no frame labels
pub const LABEL_MIN_SPACING: f64 = 50.0;

const FRAME_BACKGROUND: Color = Color::rgb(0xf8, 0xf8, 0xf8);

/// Grid positions of one axis that fall on screen, as (coordinate, screen position).
///
/// Coordinates are in Minecraft units (block + offset).
fn grid_positions(
    spacing: i64,
    offset: i64,
    first_block: i64,
    end: f64,
    to_screen: impl Fn(f64) -> f64,
) -> impl Iterator<Item = (i64, f32)> {
    let start = (first_block + offset).div_euclid(spacing) * spacing;
    (0..)
        .map(move |i| start + i * spacing)
        .map(move |m| (m, to_screen((m - offset) as f64)))
        .take_while(move |(_, s)| *s < end)
        .map(|(m, s)| (m, s as f32))
}

/// Painted blocks, with unknown labels skipped
pub fn draw_blocks<S: Surface + ?Sized>(
    surface: &mut S,
    blocks: &SparseBlockBuffer,
    ct: &AffineTransform,
    content: ScreenRect,
) {
    surface.set_clip(Some(content));
    blocks.each_pixel(|x, y, label| {
        let Some(color) = palette_color(label) else {
            return;
        };
        let rect = BlockRect::block(x, y).to_screen(ct);
        if rect.intersect(&content).is_some() {
            surface.fill_rect(rect, color);
        }
    });
}

pub fn draw_grid<S: Surface + ?Sized>(
    surface: &mut S,
    ct: &AffineTransform,
    offset: &MinecraftOffset,
    content: ScreenRect,
) {
    surface.set_clip(Some(content));
    let (x0, y0) = (content.x, content.y);
    let (x1, y1) = (content.x1(), content.y1());
    for (spacing, color) in GRID_LEVELS {
        if ct.ax * (spacing as f64) < GRID_MIN_SPACING {
            continue;
        }
        let mut path = Path::new();
        let first_x = ct.to_block_x(x0 as f64);
        for (_, x) in grid_positions(spacing, offset.x, first_x, x1 as f64, |b| ct.to_screen_x(b)) {
            path.move_to(x, y0);
            path.line_to(x, y1);
        }
        let first_y = ct.to_block_y(y0 as f64);
        for (_, y) in grid_positions(spacing, offset.z, first_y, y1 as f64, |b| ct.to_screen_y(b)) {
            path.move_to(x0, y);
            path.line_to(x1, y);
        }
        surface.stroke_path(&path, color, 1.0);
    }
}

/// Outline of a rectangle being dragged out
pub fn draw_pending_rect<S: Surface + ?Sized>(
    surface: &mut S,
    rect: &BlockRect,
    ct: &AffineTransform,
    content: ScreenRect,
) {
    surface.set_clip(Some(content));
    surface.stroke_rect(rect.to_screen(ct), Color::WHITE, 3.0);
}

pub fn draw_selection<S: Surface + ?Sized>(
    surface: &mut S,
    selection: &BlockRect,
    ct: &AffineTransform,
    content: ScreenRect,
) {
    surface.set_clip(Some(content));
    surface.stroke_rect(selection.to_screen(ct), Color::RED, 2.0);
}

/// Top (`x:`) and left (`z:`) coordinate frames in the margins
pub fn draw_frames<S: Surface + ?Sized>(
    surface: &mut S,
    ct: &AffineTransform,
    offset: &MinecraftOffset,
    viewport: (f32, f32),
    margins: &Margins,
) {
    let (w, h) = viewport;
    surface.clear_text();

    let top = ScreenRect::new(margins.left, 0.0, (w - margins.left).max(0.0), margins.top);
    surface.set_clip(Some(top));
    surface.fill_rect(top, FRAME_BACKGROUND);
    surface.stroke_rect(top, Color::BLACK, 1.0);
    for (spacing, color) in GRID_LEVELS {
        if ct.ax * (spacing as f64) < LABEL_MIN_SPACING {
            continue;
        }
        let first = ct.to_block_x(top.x as f64);
        for (mx, x) in grid_positions(spacing, offset.x, first, top.x1() as f64, |b| ct.to_screen_x(b)) {
            let mut tick = Path::new();
            tick.move_to(x, 0.0);
            tick.line_to(x, margins.top);
            surface.stroke_path(&tick, color, 1.0);
            surface.fill_text(Label {
                x: x + 2.0,
                y: margins.top - 2.0,
                text: format!("x:{}", mx),
                color: Color::BLACK,
                centered: false,
            });
        }
    }

    let left = ScreenRect::new(0.0, margins.top, margins.left, (h - margins.top).max(0.0));
    surface.set_clip(Some(left));
    surface.fill_rect(left, FRAME_BACKGROUND);
    surface.stroke_rect(left, Color::BLACK, 1.0);
    for (spacing, color) in GRID_LEVELS {
        if ct.ay * (spacing as f64) < LABEL_MIN_SPACING {
            continue;
        }
        let first = ct.to_block_y(left.y as f64);
        for (mz, y) in grid_positions(spacing, offset.z, first, left.y1() as f64, |b| ct.to_screen_y(b)) {
            let mut tick = Path::new();
            tick.move_to(0.0, y);
            tick.line_to(margins.left, y);
            surface.stroke_path(&tick, color, 1.0);
            surface.fill_text(Label {
                x: 2.0,
                y: y - 2.0,
                text: format!("z:{}", mz),
                color: Color::BLACK,
                centered: false,
            });
        }
    }
    surface.set_clip(None);
}

/// Whole-surface notice shown while no origin is configured
pub fn draw_placeholder<S: Surface + ?Sized>(surface: &mut S, message: &str) {
    let (w, h) = surface.size();
    surface.clear_text();
    surface.set_clip(None);
    surface.fill_rect(ScreenRect::new(0.0, 0.0, w as f32, h as f32), Color::LIGHT_GRAY);
    surface.fill_text(Label {
        x: w as f32 / 2.0,
        y: h as f32 / 2.0,
        text: message.to_string(),
        color: Color::RED,
        centered: true,
    });
}

/// Selected block in Minecraft coordinates
pub fn status_line(selection: Option<&BlockRect>, offset: &MinecraftOffset) -> Option<String> {
    selection.map(|s| {
        format!(
            "Minecraft(x: {}, y: {}, z: {})",
            s.x + offset.x,
            offset.y,
            s.y + offset.z
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::testing::{Op, RecordingSurface};

    const MARGINS: Margins = Margins { left: 50.0, top: 20.0 };

    fn content() -> ScreenRect {
        ScreenRect::new(50.0, 20.0, 350.0, 280.0)
    }

    #[test]
    fn test_grid_levels_by_scale() {
        let offset = MinecraftOffset::default();
        let mut surface = RecordingSurface::new(400, 300);
        // 8 px per block: only 4 and coarser reach 32 px
        draw_grid(&mut surface, &AffineTransform::new(8.0, 0.0, 8.0, 0.0), &offset, content());
        let colors: Vec<Color> = surface
            .draws()
            .iter()
            .filter_map(|op| match op {
                Op::StrokePath(_, c, _) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(
            colors,
            vec![Color::rgb(0xff, 0xc0, 0xc0), Color::GREEN, Color::BLUE, Color::BLACK]
        );
    }

    #[test]
    fn test_grid_aligned_to_offset() {
        let offset = MinecraftOffset { x: 3, y: 64, z: 0 };
        let ct = AffineTransform::new(32.0, 0.0, 32.0, 0.0);
        let xs: Vec<(i64, f32)> =
            grid_positions(4, offset.x, ct.to_block_x(50.0), 400.0, |b| ct.to_screen_x(b)).collect();
        // Block 1 is Minecraft x 4
        assert_eq!(xs[0], (4, 32.0));
        assert!(xs.iter().all(|(m, _)| m % 4 == 0));
        assert!(xs.last().is_some_and(|(_, x)| *x < 400.0));
    }

    #[test]
    fn test_frames_label_coarse_levels() {
        let mut surface = RecordingSurface::new(400, 300);
        let ct = AffineTransform::new(4.0, 50.0, 4.0, 20.0);
        draw_frames(&mut surface, &ct, &MinecraftOffset::default(), (400.0, 300.0), &MARGINS);
        let texts = surface.texts();
        // 16 * 4 = 64 px >= 50; 4 * 4 = 16 px is too dense
        assert!(texts.contains(&"x:16".to_string()));
        assert!(texts.contains(&"z:32".to_string()));
        assert!(!texts.contains(&"x:4".to_string()));
        assert_eq!(surface.ops().last(), Some(&Op::Clip(None)));
    }

    #[test]
    fn test_draw_blocks_skips_unknown_labels() {
        let mut blocks = SparseBlockBuffer::new();
        blocks.paint(1, 1, Some('R'));
        blocks.paint(2, 1, Some('?'));
        blocks.paint(500, 500, Some('G'));
        let mut surface = RecordingSurface::new(400, 300);
        draw_blocks(&mut surface, &blocks, &AffineTransform::new(10.0, 50.0, 10.0, 20.0), content());
        assert_eq!(
            surface.draws(),
            vec![Op::FillRect(ScreenRect::new(60.0, 30.0, 10.0, 10.0), Color::RED)]
        );
    }

    #[test]
    fn test_status_line() {
        let offset = MinecraftOffset { x: 100, y: 70, z: -5 };
        assert_eq!(
            status_line(Some(&BlockRect::block(1, 2)), &offset).as_deref(),
            Some("Minecraft(x: 101, y: 70, z: -3)")
        );
        assert_eq!(status_line(None, &offset), None);
    }

    #[test]
    fn test_placeholder() {
        let mut surface = RecordingSurface::new(200, 100);
        draw_placeholder(&mut surface, "origin not configured");
        assert_eq!(surface.fills_of(Color::LIGHT_GRAY), 1);
        assert_eq!(surface.texts(), vec!["origin not configured".to_string()]);
    }
}
