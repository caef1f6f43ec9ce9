//! Maps window input onto viewer actions: left button drives selection,
//! right drag orbits, middle drag pans and the wheel zooms.

use std::f32::consts::PI;

use glam::Vec2;
use sitelens_engine::{ViewMode, ViewerController};
use winit::event::MouseButton;
use winit::keyboard::{Key, NamedKey};

const ZOOM_PER_LINE: f32 = 0.15;
const ZOOM_PER_PIXEL: f32 = 0.004;
const EXPLODE_STEP: f32 = 0.1;
const SPACING_STEP: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputAction {
    PointerDown(Vec2),
    PointerMove(Vec2),
    PointerUp(Vec2),
    /// Radians of yaw and pitch.
    Orbit(Vec2),
    /// Fractions of the camera distance.
    Pan(Vec2),
    Zoom(f32),
    ViewMode(ViewMode),
    ToggleSelectionMode,
    /// Step the explode factor (exploded view) or mesh spacing by this many
    /// increments.
    AdjustFactor(f32),
    Quit,
}

/// Cursor and button tracking for one window.
#[derive(Debug, Clone)]
pub struct InputState {
    size: Vec2,
    cursor: Option<Vec2>,
    left: bool,
    right: bool,
    middle: bool,
}

impl InputState {
    pub fn new(width: u32, height: u32) -> Self {
        InputState {
            size: Vec2::new(width.max(1) as f32, height.max(1) as f32),
            cursor: None,
            left: false,
            right: false,
            middle: false,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
    }

    /// Physical pixels in, normalised actions out.
    pub fn cursor_moved(&mut self, x: f64, y: f64) -> Vec<InputAction> {
        let at = Vec2::new(x as f32, y as f32) / self.size;
        let previous = self.cursor.replace(at);
        let mut actions = Vec::new();
        if self.left {
            actions.push(InputAction::PointerMove(at));
        }
        if let Some(previous) = previous {
            let delta = at - previous;
            if self.right {
                actions.push(InputAction::Orbit(Vec2::new(-delta.x, delta.y) * PI));
            }
            if self.middle {
                actions.push(InputAction::Pan(Vec2::new(-delta.x, delta.y)));
            }
        }
        actions
    }

    pub fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Option<InputAction> {
        match button {
            MouseButton::Left => {
                let was_down = std::mem::replace(&mut self.left, pressed);
                let at = self.cursor?;
                match (was_down, pressed) {
                    (false, true) => Some(InputAction::PointerDown(at)),
                    (true, false) => Some(InputAction::PointerUp(at)),
                    _ => None,
                }
            }
            MouseButton::Right => {
                self.right = pressed;
                None
            }
            MouseButton::Middle => {
                self.middle = pressed;
                None
            }
            _ => None,
        }
    }

    pub fn wheel_lines(&self, lines: f32) -> InputAction {
        InputAction::Zoom(lines * ZOOM_PER_LINE)
    }

    pub fn wheel_pixels(&self, pixels: f64) -> InputAction {
        InputAction::Zoom(pixels as f32 * ZOOM_PER_PIXEL)
    }

    /// Focus loss drops any held buttons.
    pub fn release_all(&mut self) -> Option<InputAction> {
        self.right = false;
        self.middle = false;
        if std::mem::take(&mut self.left) {
            self.cursor.map(InputAction::PointerUp)
        } else {
            None
        }
    }
}

pub fn key_action(key: &Key) -> Option<InputAction> {
    match key {
        Key::Named(NamedKey::Escape) => Some(InputAction::Quit),
        Key::Character(text) => match text.as_str() {
            "1" => Some(InputAction::ViewMode(ViewMode::Normal)),
            "2" => Some(InputAction::ViewMode(ViewMode::Exploded)),
            "3" => Some(InputAction::ViewMode(ViewMode::Section)),
            "4" => Some(InputAction::ViewMode(ViewMode::Xray)),
            "m" | "M" => Some(InputAction::ToggleSelectionMode),
            "[" => Some(InputAction::AdjustFactor(-1.0)),
            "]" => Some(InputAction::AdjustFactor(1.0)),
            _ => None,
        },
        _ => None,
    }
}

/// Feed an action to the controller. Returns false when the viewer should
/// close.
pub fn apply(controller: &mut ViewerController, action: InputAction) -> bool {
    match action {
        InputAction::PointerDown(at) => controller.pointer_down(at),
        InputAction::PointerMove(at) => controller.pointer_move(at),
        InputAction::PointerUp(at) => controller.pointer_up(at),
        InputAction::Orbit(delta) => controller.camera_mut().orbit(delta.x, delta.y),
        InputAction::Pan(delta) => controller.camera_mut().pan(delta.x, delta.y),
        InputAction::Zoom(amount) => controller.camera_mut().zoom(amount),
        InputAction::ViewMode(mode) => controller.set_view_mode(mode),
        InputAction::ToggleSelectionMode => {
            let mode = controller.config().selection_mode.toggled();
            controller.set_selection_mode(mode);
        }
        InputAction::AdjustFactor(steps) => {
            let config = controller.config().clone();
            if config.view_mode == ViewMode::Exploded {
                controller.set_explode_factor(config.explode_factor + steps * EXPLODE_STEP);
                log::info!(
                    "[sitelens_viewer] explode factor {:.2}",
                    controller.config().explode_factor
                );
            } else {
                controller
                    .set_mesh_spacing_percent(config.mesh_spacing_percent + steps * SPACING_STEP);
                log::info!(
                    "[sitelens_viewer] mesh spacing {:.0}%",
                    controller.config().mesh_spacing_percent
                );
            }
        }
        InputAction::Quit => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitelens_engine::{SelectionMode, ViewerConfig};

    #[test]
    fn left_drag_produces_pointer_sequence() {
        let mut input = InputState::new(200, 100);
        assert!(input.cursor_moved(50.0, 25.0).is_empty());
        assert_eq!(
            input.mouse_button(MouseButton::Left, true),
            Some(InputAction::PointerDown(Vec2::new(0.25, 0.25)))
        );
        assert_eq!(
            input.cursor_moved(100.0, 50.0),
            vec![InputAction::PointerMove(Vec2::new(0.5, 0.5))]
        );
        assert_eq!(
            input.mouse_button(MouseButton::Left, false),
            Some(InputAction::PointerUp(Vec2::new(0.5, 0.5)))
        );
        assert_eq!(input.mouse_button(MouseButton::Left, false), None);
    }

    #[test]
    fn right_and_middle_drags_steer_the_camera() {
        let mut input = InputState::new(100, 100);
        input.cursor_moved(50.0, 50.0);
        input.mouse_button(MouseButton::Right, true);
        let actions = input.cursor_moved(60.0, 50.0);
        let [InputAction::Orbit(delta)] = actions.as_slice() else {
            panic!("expected a single orbit, got {actions:?}");
        };
        assert!((delta.x + 0.1 * PI).abs() < 1e-5);

        input.mouse_button(MouseButton::Right, false);
        input.mouse_button(MouseButton::Middle, true);
        assert!(matches!(
            input.cursor_moved(60.0, 40.0).as_slice(),
            [InputAction::Pan(_)]
        ));
        assert_eq!(input.release_all(), None);
    }

    #[test]
    fn keys_map_to_modes_and_quit() {
        assert_eq!(
            key_action(&Key::Character("3".into())),
            Some(InputAction::ViewMode(ViewMode::Section))
        );
        assert_eq!(
            key_action(&Key::Named(NamedKey::Escape)),
            Some(InputAction::Quit)
        );
        assert_eq!(key_action(&Key::Character("q".into())), None);
    }

    #[test]
    fn factor_keys_follow_the_view_mode() {
        let mut controller = ViewerController::new(ViewerConfig::default());
        assert!(apply(&mut controller, InputAction::AdjustFactor(2.0)));
        assert_eq!(controller.config().mesh_spacing_percent, 10.0);

        apply(&mut controller, InputAction::ViewMode(ViewMode::Exploded));
        for _ in 0..15 {
            apply(&mut controller, InputAction::AdjustFactor(1.0));
        }
        assert_eq!(controller.config().explode_factor, 1.0);

        apply(&mut controller, InputAction::ToggleSelectionMode);
        assert_eq!(controller.config().selection_mode, SelectionMode::Element);
        assert!(!apply(&mut controller, InputAction::Quit));
    }
}
