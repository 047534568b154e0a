//! Input prompt showing the active mode

use crate::router::ModelMode;
use crossterm::style::{Color, Stylize};
use std::io::{self, BufRead, Write};

/// Reads user input behind a `[mode] >` prompt and remembers it
#[derive(Default)]
pub struct PromptHandler {
    history: Vec<String>,
}

impl PromptHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display the prompt and read a line of input.
    /// Returns None on EOF (Ctrl+D).
    pub fn read_line(&mut self, mode: ModelMode, mode_color: Color, prompt_color: Color) -> Option<String> {
        print!(
            "{} {} ",
            format!("[{}]", mode).with(mode_color),
            ">".with(prompt_color)
        );
        io::stdout().flush().ok()?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let trimmed = line.trim().to_string();
                if !trimmed.is_empty() {
                    self.history.push(trimmed.clone());
                }
                Some(trimmed)
            }
            Err(_) => None,
        }
    }

    /// Lines entered so far
    pub fn history(&self) -> &[String] {
        &self.history
    }
}
