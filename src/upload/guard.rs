//! Keeps keyboard and drag gestures from removing a selected placeholder.

use super::types::PLACEHOLDER_ELEMENT;
use crate::config::FileUploadConfig;

/// Keys that keep working while a placeholder is selected.
pub const SAFE_KEYS: [&str; 6] = ["ArrowUp", "ArrowDown", "ArrowLeft", "ArrowRight", "Enter", "Tab"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(String),
    KeyUp(String),
    DragStart,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputGuard {
    block_keyboard: bool,
    block_drag: bool,
}

impl InputGuard {
    pub fn from_config(config: &FileUploadConfig) -> Self {
        Self {
            block_keyboard: config.disable_remove_by_keyboard,
            block_drag: config.disable_drag,
        }
    }

    /// Whether `event` must be swallowed. `selected` is the element name of
    /// the current selection, if it is a single element.
    pub fn should_suppress(&self, event: &InputEvent, selected: Option<&str>) -> bool {
        if selected != Some(PLACEHOLDER_ELEMENT) {
            return false;
        }
        match event {
            InputEvent::KeyDown(key) | InputEvent::KeyUp(key) => {
                self.block_keyboard && !SAFE_KEYS.contains(&key.as_str())
            }
            InputEvent::DragStart => self.block_drag,
        }
    }
}
