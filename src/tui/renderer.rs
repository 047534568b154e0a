//! Terminal rendering with markdown support

use crossterm::style::{Color, Stylize};
use std::io::Write;
use termimad::MadSkin;

use super::theme::Theme;
use crate::router::{BackendHealth, ModelMode};
use crate::session::{ConversationTurn, TurnRole};

/// Terminal renderer with markdown and styled output
pub struct TerminalRenderer {
    theme: Theme,
    skin: MadSkin,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        let theme = Theme::default();
        let skin = Self::build_skin(&theme);
        Self { theme, skin }
    }

    fn build_skin(theme: &Theme) -> MadSkin {
        let mut skin = MadSkin::default();
        skin.set_headers_fg(to_termimad_color(theme.title));
        skin.bold.set_fg(to_termimad_color(Color::White));
        skin.italic.set_fg(to_termimad_color(Color::DarkYellow));
        skin.inline_code.set_fg(to_termimad_color(Color::Green));
        skin.code_block.set_fg(to_termimad_color(Color::Green));
        skin
    }

    /// Render the welcome banner with both backends
    pub fn render_banner(
        &self,
        version: &str,
        session_id: &str,
        mode: ModelMode,
        local: &str,
        cloud: &str,
    ) {
        println!();
        println!("{}", "  Edge Operator".with(self.theme.title));
        println!("  {} {}", "v".with(self.theme.dim), version.with(self.theme.dim));
        println!(
            "  {} {}   {} {}",
            "Local:".with(self.theme.dim),
            local.with(self.theme.local),
            "Cloud:".with(self.theme.dim),
            cloud.with(self.theme.cloud),
        );
        println!(
            "  {} {}   {} {}",
            "Session:".with(self.theme.dim),
            session_id.with(self.theme.stats),
            "Mode:".with(self.theme.dim),
            mode.as_str().with(self.theme.mode(mode)),
        );
        println!(
            "  {}",
            "Type /help for commands, /mode cloud to go online, /quit to exit".with(self.theme.dim)
        );
        println!();
    }

    /// Render a complete response with markdown formatting
    pub fn render_markdown(&self, content: &str) {
        if has_markdown_elements(content) {
            println!();
            self.skin.print_text(content);
        } else {
            // Already printed while streaming
            println!();
        }
    }

    /// Render a block of markdown produced locally, e.g. tool output
    pub fn render_block(&self, content: &str) {
        if has_markdown_elements(content) {
            self.skin.print_text(content);
        } else {
            for line in content.lines() {
                println!("  {}", line);
            }
        }
    }

    /// Render the token usage line after a response
    pub fn render_usage_line(
        &self,
        prompt_tokens: u32,
        completion_tokens: u32,
        mode: ModelMode,
        model: &str,
    ) {
        println!(
            "\n  {} {} prompt + {} completion [{} {}]",
            "\u{2022}".with(self.theme.dim),
            format!("{}", prompt_tokens).with(self.theme.stats),
            format!("{}", completion_tokens).with(self.theme.stats),
            mode.as_str().with(self.theme.mode(mode)),
            model.with(self.theme.dim),
        );
        println!();
    }

    pub fn render_backend(&self, health: &BackendHealth, active: bool) {
        let marker = if active { "*" } else { " " };
        let state = if health.reachable {
            format!("reachable ({} ms)", health.latency.as_millis()).with(self.theme.success)
        } else {
            health
                .detail
                .clone()
                .unwrap_or_else(|| "unreachable".to_string())
                .with(self.theme.error)
        };
        println!(
            "  {} {:<6} {} {} {}",
            marker.with(self.theme.mode(health.mode)),
            health.mode.as_str().with(self.theme.mode(health.mode)),
            health.name.clone().with(self.theme.stats),
            format!("({})", health.model).with(self.theme.dim),
            state,
        );
    }

    pub fn render_turn(&self, turn: &ConversationTurn) {
        let time = turn.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let who = match (turn.role, turn.mode) {
            (TurnRole::User, _) => "you".to_string().with(self.theme.prompt),
            (TurnRole::Assistant, Some(mode)) => {
                format!("assistant/{}", mode).with(self.theme.mode(mode))
            }
            (TurnRole::Assistant, None) => "assistant".to_string().with(self.theme.assistant),
        };
        println!("  {} {}", time.with(self.theme.dim), who);
        for line in turn.content.lines() {
            println!("    {}", line);
        }
    }

    /// Render a system message
    pub fn render_system(&self, msg: &str) {
        println!(
            "  {} {}",
            "\u{25b6}".with(self.theme.system),
            msg.with(self.theme.system)
        );
    }

    pub fn render_error(&self, msg: &str) {
        println!(
            "  {} {}",
            "\u{2717}".with(self.theme.error),
            msg.with(self.theme.error)
        );
    }

    /// Render a non-fatal warning
    pub fn render_warning(&self, msg: &str) {
        println!(
            "  {} {}",
            "!".with(self.theme.warning),
            msg.with(self.theme.warning)
        );
    }

    pub fn render_success(&self, msg: &str) {
        println!(
            "  {} {}",
            "\u{2713}".with(self.theme.success),
            msg.with(self.theme.success)
        );
    }

    pub fn render_info(&self, msg: &str) {
        println!("  {}", msg.with(self.theme.dim));
    }

    pub fn prompt_color(&self) -> Color {
        self.theme.prompt
    }

    pub fn mode_color(&self, mode: ModelMode) -> Color {
        self.theme.mode(mode)
    }

    pub fn assistant_color(&self) -> Color {
        self.theme.assistant
    }

    pub fn command_color(&self) -> Color {
        self.theme.command
    }

    pub fn dim_color(&self) -> Color {
        self.theme.dim
    }

    pub fn stats_color(&self) -> Color {
        self.theme.stats
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Print a streaming text delta as-is
pub fn print_delta(text: &str, color: Color) {
    print!("{}", text.with(color));
    let _ = std::io::stdout().flush();
}

/// Check if content has markdown elements worth re-rendering
fn has_markdown_elements(content: &str) -> bool {
    content.contains("```")
        || content.contains("## ")
        || content.contains("# ")
        || content.contains("**")
        || content.contains("| ")
        || content.contains("- [")
}

/// Convert crossterm Color to termimad color
fn to_termimad_color(color: Color) -> termimad::crossterm::style::Color {
    use termimad::crossterm::style::Color as MadColor;
    match color {
        Color::Black => MadColor::Black,
        Color::DarkGrey => MadColor::DarkGrey,
        Color::Red => MadColor::Red,
        Color::DarkRed => MadColor::DarkRed,
        Color::Green => MadColor::Green,
        Color::DarkGreen => MadColor::DarkGreen,
        Color::Yellow => MadColor::Yellow,
        Color::DarkYellow => MadColor::DarkYellow,
        Color::Blue => MadColor::Blue,
        Color::DarkBlue => MadColor::DarkBlue,
        Color::Magenta => MadColor::Magenta,
        Color::DarkMagenta => MadColor::DarkMagenta,
        Color::Cyan => MadColor::Cyan,
        Color::DarkCyan => MadColor::DarkCyan,
        Color::White => MadColor::White,
        Color::Grey => MadColor::Grey,
        _ => MadColor::Reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_detection() {
        assert!(has_markdown_elements("## Status\nok"));
        assert!(has_markdown_elements("use `x` in a ```block```"));
        assert!(!has_markdown_elements("Valve opened."));
    }
}
