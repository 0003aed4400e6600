use glam::Vec3;
use winit::event::{DeviceEvent, ElementState, MouseButton, WindowEvent};
use winit::keyboard::{Key, NamedKey};

/// Window and device events reduced to what the fly camera consumes.
pub enum InputEvent {
    Key { key: Key, pressed: bool },
    MouseMove { dx: f32, dy: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    Other,
}

impl InputEvent {
    pub fn from_window_event(ev: &WindowEvent) -> Self {
        match ev {
            WindowEvent::KeyboardInput { event, .. } => InputEvent::Key {
                key: event.logical_key.clone(),
                pressed: event.state == ElementState::Pressed,
            },
            WindowEvent::MouseInput { state, button, .. } => InputEvent::MouseButton {
                button: *button,
                pressed: *state == ElementState::Pressed,
            },
            _ => InputEvent::Other,
        }
    }

    pub fn from_device_event(ev: &DeviceEvent) -> Self {
        match ev {
            DeviceEvent::MouseMotion { delta } => {
                InputEvent::MouseMove { dx: delta.0 as f32, dy: delta.1 as f32 }
            }
            _ => InputEvent::Other,
        }
    }
}

/// Per-frame input state. Held flags persist across frames; the mouse delta
/// accumulates until `clear_frame`.
#[derive(Default)]
pub struct Input {
    pub mouse_delta: (f32, f32),
    forward_held: bool,
    backward_held: bool,
    left_held: bool,
    right_held: bool,
    ascend_held: bool,
    descend_held: bool,
    boost_held: bool,
    look_held: bool,
    quit_pressed: bool,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ev: InputEvent) {
        match ev {
            InputEvent::Key { key, pressed } => self.apply_key(&key, pressed),
            InputEvent::MouseMove { dx, dy } => {
                self.mouse_delta.0 += dx;
                self.mouse_delta.1 += dy;
            }
            InputEvent::MouseButton { button, pressed } => {
                if button == MouseButton::Right {
                    self.look_held = pressed;
                }
            }
            InputEvent::Other => {}
        }
    }

    fn apply_key(&mut self, key: &Key, pressed: bool) {
        match key {
            Key::Character(text) => match text.to_lowercase().as_str() {
                "w" => self.forward_held = pressed,
                "s" => self.backward_held = pressed,
                "a" => self.left_held = pressed,
                "d" => self.right_held = pressed,
                "q" => self.descend_held = pressed,
                "e" => self.ascend_held = pressed,
                _ => {}
            },
            Key::Named(NamedKey::ArrowUp) => self.forward_held = pressed,
            Key::Named(NamedKey::ArrowDown) => self.backward_held = pressed,
            Key::Named(NamedKey::ArrowLeft) => self.left_held = pressed,
            Key::Named(NamedKey::ArrowRight) => self.right_held = pressed,
            Key::Named(NamedKey::Space) => self.ascend_held = pressed,
            Key::Named(NamedKey::Control) => self.descend_held = pressed,
            Key::Named(NamedKey::Shift) => self.boost_held = pressed,
            Key::Named(NamedKey::Escape) => {
                if pressed {
                    self.quit_pressed = true;
                }
            }
            _ => {}
        }
    }

    /// Movement request in camera-relative axes: x strafe, y vertical, z forward.
    pub fn axes(&self) -> Vec3 {
        let axis = |pos: bool, neg: bool| (pos as i32 - neg as i32) as f32;
        Vec3::new(
            axis(self.right_held, self.left_held),
            axis(self.ascend_held, self.descend_held),
            axis(self.forward_held, self.backward_held),
        )
    }

    pub fn boost(&self) -> bool {
        self.boost_held
    }

    pub fn look_held(&self) -> bool {
        self.look_held
    }

    pub fn take_quit(&mut self) -> bool {
        std::mem::take(&mut self.quit_pressed)
    }

    pub fn clear_frame(&mut self) {
        self.mouse_delta = (0.0, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str, pressed: bool) -> InputEvent {
        InputEvent::Key { key: Key::Character(text.into()), pressed }
    }

    #[test]
    fn held_keys_combine_into_axes() {
        let mut input = Input::new();
        input.push(key("w", true));
        input.push(key("d", true));
        assert_eq!(input.axes(), Vec3::new(1.0, 0.0, 1.0));
        input.push(key("w", false));
        input.push(key("s", true));
        assert_eq!(input.axes(), Vec3::new(1.0, 0.0, -1.0));
    }

    #[test]
    fn mouse_delta_accumulates_until_cleared() {
        let mut input = Input::new();
        input.push(InputEvent::MouseMove { dx: 3.0, dy: -1.0 });
        input.push(InputEvent::MouseMove { dx: 2.0, dy: 4.0 });
        assert_eq!(input.mouse_delta, (5.0, 3.0));
        input.clear_frame();
        assert_eq!(input.mouse_delta, (0.0, 0.0));
        assert_eq!(input.axes(), Vec3::ZERO);
    }

    #[test]
    fn quit_flag_is_consumed_once() {
        let mut input = Input::new();
        input.push(InputEvent::Key { key: Key::Named(NamedKey::Escape), pressed: true });
        assert!(input.take_quit());
        assert!(!input.take_quit());
    }
}
