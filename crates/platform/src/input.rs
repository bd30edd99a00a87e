//! Keyboard and cursor tracking.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Tracks pressed keys and the cursor position in window pixels.
#[derive(Debug, Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    just_pressed_keys: HashSet<KeyCode>,
    cursor_position: (f32, f32),
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once per frame, after the frame has consumed the input.
    pub fn end_frame(&mut self) {
        self.just_pressed_keys.clear();
    }

    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    pub fn on_cursor_moved(&mut self, x: f32, y: f32) {
        self.cursor_position = (x, y);
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    /// True only for the frame in which `key` went down. Key repeat does not retrigger it.
    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    /// Last known cursor position, origin at the top-left of the window.
    pub fn cursor_position(&self) -> (f32, f32) {
        self.cursor_position
    }
}
