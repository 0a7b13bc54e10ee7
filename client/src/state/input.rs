//! Pointer and keyboard gestures mapped onto map view operations

use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::map::blocks::PALETTE;
use crate::map::canvas::Surface;
use crate::map::view::MapView;

/// Pointer travel below which a left press and release is a click
const CLICK_SLOP: f64 = 3.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DragMode {
    Pan,
    RectFill,
}

#[derive(Clone, Copy, Debug)]
struct Drag {
    mode: DragMode,
    origin: (f64, f64),
    last: (f64, f64),
}

/// Gesture state. Every handler returns whether the map must be redrawn.
#[derive(Debug, Default)]
pub struct MapInput {
    cursor: (f64, f64),
    shift: bool,
    drag: Option<Drag>,
}

impl MapInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> (f64, f64) {
        self.cursor
    }

    pub fn set_shift(&mut self, shift: bool) {
        self.shift = shift;
    }

    pub fn handle<S: Surface + 'static>(&mut self, view: &MapView<S>, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::ModifiersChanged(modifiers) => {
                self.set_shift(modifiers.state().shift_key());
                false
            }
            WindowEvent::CursorMoved { position, .. } => self.cursor_moved(view, position.x, position.y),
            WindowEvent::MouseInput { state, button, .. } => match (button, state) {
                (MouseButton::Left, ElementState::Pressed) => self.left_pressed(view),
                (MouseButton::Left, ElementState::Released) => self.left_released(view),
                (MouseButton::Right, ElementState::Pressed) => self.right_pressed(view),
                _ => false,
            },
            WindowEvent::MouseWheel { delta, .. } => {
                let dy = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y as f64,
                    MouseScrollDelta::PixelDelta(pos) => pos.y,
                };
                self.wheel(view, dy)
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.key(view, *key_code),
            _ => false,
        }
    }

    pub fn cursor_moved<S: Surface + 'static>(&mut self, view: &MapView<S>, x: f64, y: f64) -> bool {
        self.cursor = (x, y);
        let Some(drag) = self.drag.as_mut() else {
            return false;
        };
        let (lx, ly) = drag.last;
        drag.last = (x, y);
        match drag.mode {
            DragMode::Pan => view.pan(x - lx, y - ly),
            DragMode::RectFill => view.extend_rect(x, y),
        }
    }

    pub fn left_pressed<S: Surface + 'static>(&mut self, view: &MapView<S>) -> bool {
        let mode = if self.shift {
            DragMode::RectFill
        } else {
            DragMode::Pan
        };
        self.drag = Some(Drag {
            mode,
            origin: self.cursor,
            last: self.cursor,
        });
        match mode {
            DragMode::RectFill => view.begin_rect(self.cursor.0, self.cursor.1),
            DragMode::Pan => false,
        }
    }

    pub fn left_released<S: Surface + 'static>(&mut self, view: &MapView<S>) -> bool {
        let Some(drag) = self.drag.take() else {
            return false;
        };
        match drag.mode {
            DragMode::RectFill => view.commit_rect_fill(),
            DragMode::Pan => {
                let (dx, dy) = (self.cursor.0 - drag.origin.0, self.cursor.1 - drag.origin.1);
                if dx.hypot(dy) < CLICK_SLOP {
                    view.select_at(self.cursor.0, self.cursor.1)
                } else {
                    false
                }
            }
        }
    }

    pub fn right_pressed<S: Surface + 'static>(&mut self, view: &MapView<S>) -> bool {
        view.paint_at(self.cursor.0, self.cursor.1)
    }

    /// Positive deltas zoom in by 2, negative ones out by 2
    pub fn wheel<S: Surface + 'static>(&mut self, view: &MapView<S>, dy: f64) -> bool {
        let factor = if dy > 0.0 {
            2.0
        } else if dy < 0.0 {
            0.5
        } else {
            return false;
        };
        view.zoom_about(factor, self.cursor.0, self.cursor.1)
    }

    /// `0` selects the eraser, `1`-`9` the palette entries, `P` picks
    pub fn key<S: Surface + 'static>(&mut self, view: &MapView<S>, key: KeyCode) -> bool {
        let digit = match key {
            KeyCode::Digit0 => Some(0),
            KeyCode::Digit1 => Some(1),
            KeyCode::Digit2 => Some(2),
            KeyCode::Digit3 => Some(3),
            KeyCode::Digit4 => Some(4),
            KeyCode::Digit5 => Some(5),
            KeyCode::Digit6 => Some(6),
            KeyCode::Digit7 => Some(7),
            KeyCode::Digit8 => Some(8),
            KeyCode::Digit9 => Some(9),
            _ => None,
        };
        match (digit, key) {
            (Some(0), _) => view.set_current_color(None),
            (Some(n), _) => {
                if let Some((label, _)) = PALETTE.get(n - 1) {
                    view.set_current_color(Some(*label));
                }
            }
            (None, KeyCode::KeyP) => {
                view.pick_color_at(self.cursor.0, self.cursor.1);
            }
            _ => {}
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::blocks::BlockRect;
    use crate::map::task::TaskQueue;
    use crate::map::testing::RecordingSurface;
    use crate::map::view::ViewConfig;
    use futures::executor::LocalPool;

    fn view() -> MapView<RecordingSurface> {
        let pool = LocalPool::new();
        MapView::new(
            RecordingSurface::new(200, 200),
            TaskQueue::new(pool.spawner(), 4),
            ViewConfig::default(),
        )
    }

    #[test]
    fn test_drag_pans() {
        let view = view();
        let mut input = MapInput::new();
        input.cursor_moved(&view, 10.0, 10.0);
        input.left_pressed(&view);
        assert!(input.cursor_moved(&view, 30.0, 15.0));
        assert!(!input.left_released(&view));
        let ct = view.state().transform;
        assert_eq!((ct.bx, ct.by), (20.0, 5.0));
        assert_eq!(view.state().selection, None);
    }

    #[test]
    fn test_click_selects() {
        let view = view();
        let mut input = MapInput::new();
        input.cursor_moved(&view, 12.5, 7.5);
        input.left_pressed(&view);
        assert!(input.left_released(&view));
        assert_eq!(view.state().selection, Some(BlockRect::block(12, 7)));
    }

    #[test]
    fn test_shift_drag_fills_rect() {
        let view = view();
        let mut input = MapInput::new();
        input.set_shift(true);
        input.cursor_moved(&view, 2.0, 2.0);
        assert!(input.left_pressed(&view));
        assert!(input.cursor_moved(&view, 4.0, 3.0));
        assert!(input.left_released(&view));
        assert_eq!(view.get_pixel(3, 3), Some('R'));
        assert_eq!(view.get_pixel(5, 3), None);
        assert_eq!(view.state().pending_rect, None);
        // The map did not move
        assert_eq!(view.state().transform.bx, 0.0);
    }

    #[test]
    fn test_palette_keys_and_paint() {
        let view = view();
        let mut input = MapInput::new();
        input.key(&view, KeyCode::Digit3);
        assert_eq!(view.current_color(), Some('G'));
        input.cursor_moved(&view, 1.0, 1.0);
        assert!(input.right_pressed(&view));
        assert_eq!(view.get_pixel(1, 1), Some('G'));

        input.key(&view, KeyCode::Digit0);
        assert_eq!(view.current_color(), None);
        input.key(&view, KeyCode::KeyP);
        assert_eq!(view.current_color(), Some('G'));
    }

    #[test]
    fn test_wheel_zooms_about_cursor() {
        let view = view();
        let mut input = MapInput::new();
        input.cursor_moved(&view, 100.0, 50.0);
        assert!(input.wheel(&view, 1.0));
        let ct = view.state().transform;
        assert_eq!(ct.ax, 2.0);
        assert_eq!(ct.to_screen_x(100.0), 100.0);
        assert!(!input.wheel(&view, 0.0));
    }
}
