//! Configuration for the terminal core.
//!
//! Loaded from a JSON file; every field has a default so a missing or
//! partial file still yields a working terminal.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Resize strategy for the primary buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeStrategy {
    /// Re-wrap paragraphs at the new width, preserving content.
    #[default]
    Reflow,
    /// Truncate or pad each row; cheaper, loses wrapped structure.
    Clip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Colour scheme name (see [`crate::color::Palette::from_scheme`]).
    pub color_scheme: String,
    /// Scroll-back limit in rows. Ignored when `unlimited_scrollback`.
    pub scrollback_history: usize,
    /// Keep unlimited scroll-back.
    pub unlimited_scrollback: bool,
    /// How the primary buffer resizes.
    pub resize_strategy: ResizeStrategy,
    /// Snap the viewport to the bottom when the child produces output.
    pub scroll_on_tty_output: bool,
    /// Snap the viewport to the bottom when a key is sent to the child.
    pub scroll_on_tty_key_press: bool,
    /// Snap the viewport to the bottom on paste.
    pub scroll_on_paste: bool,
    /// Frame budget for a single read pass, frames per second.
    pub frames_per_second: u32,
    /// Characters that extend a word for double-click selection, besides
    /// alphanumerics.
    pub cut_chars: String,
    /// Initial window title.
    pub title: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            color_scheme: "solarized-dark".to_string(),
            scrollback_history: 4096,
            unlimited_scrollback: false,
            resize_strategy: ResizeStrategy::default(),
            scroll_on_tty_output: false,
            scroll_on_tty_key_press: true,
            scroll_on_paste: true,
            frames_per_second: 50,
            cut_chars: "-_./?&=#%~".to_string(),
            title: "terminal".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults on
    /// any problem (logged, never fatal).
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("failed to parse config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("no config at {} ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Effective history limit in rows.
    pub fn history_limit(&self) -> usize {
        if self.unlimited_scrollback {
            usize::MAX
        } else {
            self.scrollback_history
        }
    }
}
