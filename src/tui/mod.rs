//! Interactive terminal UI for the edge operator
//!
//! A line-oriented shell with streamed answers, markdown rendering, a
//! two-state mode toggle and slash commands for the operator tools.

pub mod commands;
pub mod prompt;
pub mod renderer;
pub mod spinner;
pub mod theme;

use crate::agent::{EdgeOperator, TurnError};
use crate::router::ModelMode;
use crate::tools::ToolCall;

use commands::{parse_command, render_help, ModeRequest, SlashCommand};
use prompt::PromptHandler;
use renderer::{print_delta, TerminalRenderer};
use spinner::ThinkingSpinner;

use anyhow::Result;
use crossterm::style::Stylize;
use std::path::Path;

/// Interactive shell over an [`EdgeOperator`]
pub struct InteractiveShell {
    agent: EdgeOperator,
    renderer: TerminalRenderer,
    prompt_handler: PromptHandler,
    /// Turns completed in this run
    turn_count: usize,
}

/// Result of handling a slash command
enum CommandResult {
    Continue,
    Quit,
}

impl InteractiveShell {
    pub fn new(agent: EdgeOperator) -> Self {
        Self {
            agent,
            renderer: TerminalRenderer::new(),
            prompt_handler: PromptHandler::new(),
            turn_count: 0,
        }
    }

    /// Run the interactive shell main loop
    pub async fn run(&mut self) -> Result<()> {
        let mode = self.agent.current_mode().await;
        let session_id = self.agent.session_id().await;
        let router = self.agent.router();
        self.renderer.render_banner(
            env!("CARGO_PKG_VERSION"),
            &session_id,
            mode,
            &router.endpoint(ModelMode::Local).model,
            &router.endpoint(ModelMode::Cloud).model,
        );

        let restored = self.agent.history().await.len();
        if restored > 0 {
            self.renderer.render_info(&format!(
                "Restored {} turns from session '{}'. /history to review.",
                restored, session_id
            ));
            println!();
        }

        loop {
            let mode = self.agent.current_mode().await;
            let input = match self.prompt_handler.read_line(
                mode,
                self.renderer.mode_color(mode),
                self.renderer.prompt_color(),
            ) {
                Some(input) => input,
                None => {
                    self.render_session_summary();
                    break;
                }
            };

            if input.is_empty() {
                continue;
            }

            if let Some(cmd) = parse_command(&input) {
                match self.handle_command(cmd).await {
                    CommandResult::Continue => continue,
                    CommandResult::Quit => {
                        self.render_session_summary();
                        break;
                    }
                }
            } else {
                self.process_message(&input).await;
            }
        }

        Ok(())
    }

    async fn handle_command(&mut self, cmd: SlashCommand) -> CommandResult {
        match cmd {
            SlashCommand::Help => render_help(&self.renderer),
            SlashCommand::Quit => return CommandResult::Quit,
            SlashCommand::Clear => {
                let _ = crossterm::execute!(
                    std::io::stdout(),
                    crossterm::terminal::Clear(crossterm::terminal::ClearType::All),
                    crossterm::cursor::MoveTo(0, 0)
                );
            }
            SlashCommand::Mode(None) => {
                let mode = self.agent.current_mode().await;
                self.renderer
                    .render_info(&format!("Current mode: {}", mode));
            }
            SlashCommand::Mode(Some(request)) => {
                let target = match request {
                    ModeRequest::Set(mode) => mode,
                    ModeRequest::Toggle => self.agent.current_mode().await.toggled(),
                };
                self.switch_mode(target).await;
            }
            SlashCommand::Status => self.render_status().await,
            SlashCommand::Stats => self.render_stats().await,
            SlashCommand::History(count) => self.render_history(count).await,
            SlashCommand::Extract(path) => self.extract_report(&path).await,
            SlashCommand::Tool(call) => self.run_tool(call).await,
            SlashCommand::Usage(usage) => {
                self.renderer.render_error(&format!("Usage: {}", usage));
            }
        }
        CommandResult::Continue
    }

    async fn switch_mode(&mut self, target: ModelMode) {
        let mut spinner = ThinkingSpinner::new();
        if target == ModelMode::Cloud {
            spinner.start("Checking cloud backend...");
        }
        let result = self.agent.set_model_mode(target).await;
        spinner.stop();

        match result {
            Ok(mode) => {
                let model = &self.agent.router().endpoint(mode).model;
                self.renderer
                    .render_success(&format!("Switched to {} mode ({})", mode, model));
            }
            Err(e) => {
                self.renderer.render_warning(&e.to_string());
                self.renderer
                    .render_info(&format!("Still in {} mode.", self.agent.current_mode().await));
            }
        }
    }

    /// Stream one turn, cancellable with Ctrl+C
    async fn process_message(&mut self, input: &str) {
        let mode = self.agent.current_mode().await;
        let mut spinner = ThinkingSpinner::new();
        spinner.start(&format!("Thinking ({})...", mode));

        let color = self.renderer.assistant_color();
        let mut first_token = true;
        let on_delta = |text: &str| {
            if first_token {
                spinner.stop();
                println!();
                first_token = false;
            }
            print_delta(text, color);
        };
        let cancel = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        let result = self.agent.stream_chat(input, on_delta, cancel).await;
        spinner.stop();

        match result {
            Ok(outcome) => {
                if outcome.content.is_empty() {
                    self.renderer.render_error("No response received.");
                    return;
                }
                self.renderer.render_markdown(&outcome.content);
                let model = &self.agent.router().endpoint(outcome.mode).model;
                self.renderer.render_usage_line(
                    outcome.usage.prompt_tokens,
                    outcome.usage.completion_tokens,
                    outcome.mode,
                    model,
                );
                self.turn_count += 1;
            }
            Err(TurnError::Cancelled { partial, .. }) => {
                if !partial.is_empty() {
                    println!();
                }
                self.renderer
                    .render_warning("Cancelled. The turn was not saved.");
            }
            Err(TurnError::Backend(e)) => {
                if !first_token {
                    println!();
                }
                self.renderer.render_error(&format!("Turn failed: {}", e));
                let mode = self.agent.current_mode().await;
                if mode == ModelMode::Cloud {
                    self.renderer
                        .render_info("Still in cloud mode. Use /mode local to switch back.");
                }
            }
            Err(e) => self.renderer.render_error(&e.to_string()),
        }
    }

    async fn run_tool(&mut self, call: ToolCall) {
        let name = call.name();
        match self.agent.invoke_tool(call).await {
            Ok(output) => {
                println!();
                self.renderer.render_block(&output);
                println!();
            }
            Err(e) => self.renderer.render_error(&format!("{}: {}", name, e)),
        }
    }

    async fn extract_report(&mut self, path: &Path) {
        match tokio::fs::read_to_string(path).await {
            Ok(report_text) => {
                self.run_tool(ToolCall::ExtractScadaMetrics { report_text })
                    .await
            }
            Err(e) => self
                .renderer
                .render_error(&format!("Failed to read {}: {}", path.display(), e)),
        }
    }

    async fn render_status(&self) {
        let mode = self.agent.current_mode().await;
        println!();
        self.renderer.render_system("Current Status:");
        println!(
            "  {} {}",
            "Mode:".with(self.renderer.dim_color()),
            mode.as_str().with(self.renderer.mode_color(mode)),
        );
        println!(
            "  {} {}",
            "Session:".with(self.renderer.dim_color()),
            self.agent.session_id().await.with(self.renderer.stats_color()),
        );

        println!("  {}", "Backends:".with(self.renderer.dim_color()));
        for health in self.agent.check_backends().await {
            self.renderer.render_backend(&health, health.mode == mode);
        }

        let tools = self
            .agent
            .tools()
            .capabilities()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {} {}",
            "Tools:".with(self.renderer.dim_color()),
            tools.with(self.renderer.stats_color()),
        );
        println!();
    }

    async fn render_stats(&self) {
        println!();
        match self.agent.session_stats().await {
            Ok(stats) => self.renderer.render_block(&stats.to_string()),
            Err(e) => self.renderer.render_error(&e.to_string()),
        }
        self.renderer
            .render_block(&self.agent.metrics().summary().to_string());
        println!();
    }

    async fn render_history(&self, count: usize) {
        let history = self.agent.history().await;
        if history.is_empty() {
            self.renderer.render_info("No turns in this session yet.");
            return;
        }
        println!();
        let skip = history.len().saturating_sub(count);
        for turn in &history[skip..] {
            self.renderer.render_turn(turn);
        }
        println!();
    }

    /// Render session summary on exit
    fn render_session_summary(&self) {
        let summary = self.agent.metrics().summary();
        println!();
        self.renderer.render_system("Session Summary:");
        println!(
            "  {} turns ({} local, {} cloud), {} inputs, {} total tokens",
            format!("{}", self.turn_count).with(self.renderer.stats_color()),
            summary.local_turns,
            summary.cloud_turns,
            self.prompt_handler.history().len(),
            format!("{}", summary.total_tokens()).with(self.renderer.stats_color()),
        );
        self.renderer.render_info("Goodbye!");
        println!();
    }
}
