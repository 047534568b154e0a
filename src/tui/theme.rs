//! Terminal theme and color definitions

use crate::router::ModelMode;
use crossterm::style::Color;

/// Theme colors for the interactive shell
pub struct Theme {
    /// Color for the user prompt symbol
    pub prompt: Color,
    /// Color for assistant response text
    pub assistant: Color,
    /// Color for system messages
    pub system: Color,
    pub error: Color,
    /// Color for non-fatal warnings such as a refused mode switch
    pub warning: Color,
    /// Color for dim/secondary info
    pub dim: Color,
    pub success: Color,
    /// Color for the banner/title
    pub title: Color,
    /// Color for usage/stats numbers
    pub stats: Color,
    /// Color for slash command names
    pub command: Color,
    pub local: Color,
    pub cloud: Color,
}

impl Theme {
    pub fn mode(&self, mode: ModelMode) -> Color {
        match mode {
            ModelMode::Local => self.local,
            ModelMode::Cloud => self.cloud,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            prompt: Color::Cyan,
            assistant: Color::White,
            system: Color::DarkYellow,
            error: Color::Red,
            warning: Color::Yellow,
            dim: Color::DarkGrey,
            success: Color::Green,
            title: Color::Magenta,
            stats: Color::Blue,
            command: Color::Yellow,
            local: Color::Green,
            cloud: Color::Cyan,
        }
    }
}
