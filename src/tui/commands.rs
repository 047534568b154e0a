//! Slash command parsing and definitions

use crossterm::style::Stylize;
use std::path::PathBuf;

use crate::router::ModelMode;
use crate::tools::{TelemetryFilter, ToolCall};

/// Available slash commands
#[derive(Debug, PartialEq)]
pub enum SlashCommand {
    Help,
    Quit,
    Clear,
    /// Show the mode, or switch to the given one
    Mode(Option<ModeRequest>),
    Status,
    Stats,
    History(usize),
    /// Read a report file and extract metrics from it
    Extract(PathBuf),
    Tool(ToolCall),
    /// A recognised command with bad arguments
    Usage(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeRequest {
    Set(ModelMode),
    Toggle,
}

const DEFAULT_HISTORY: usize = 10;

/// Parse a slash command from user input.
/// Returns None if the input is not a slash command.
pub fn parse_command(input: &str) -> Option<SlashCommand> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }

    let (cmd, rest) = match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (input.to_lowercase(), ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match cmd.as_str() {
        "/help" | "/h" | "/?" => SlashCommand::Help,
        "/quit" | "/q" | "/exit" => SlashCommand::Quit,
        "/clear" | "/cls" => SlashCommand::Clear,
        "/mode" | "/m" => parse_mode(&args),
        "/status" => SlashCommand::Status,
        "/stats" => SlashCommand::Stats,
        "/history" => match args.first() {
            None => SlashCommand::History(DEFAULT_HISTORY),
            Some(n) => match n.parse() {
                Ok(n) => SlashCommand::History(n),
                Err(_) => SlashCommand::Usage("/history [count]".to_string()),
            },
        },
        "/devices" => SlashCommand::Tool(ToolCall::ListDevices {}),
        "/read" => match args.as_slice() {
            [device_id] => SlashCommand::Tool(ToolCall::ReadSensor {
                device_id: device_id.to_string(),
            }),
            _ => SlashCommand::Usage("/read <device_id>".to_string()),
        },
        "/control" => match args.as_slice() {
            [device_id, action] => SlashCommand::Tool(ToolCall::ControlDevice {
                device_id: device_id.to_string(),
                action: action.to_string(),
            }),
            _ => SlashCommand::Usage("/control <device_id> <open|closed|partial>".to_string()),
        },
        "/log" => parse_log(&args),
        "/telemetry" | "/tel" => SlashCommand::Tool(ToolCall::QueryTelemetry {
            filter: filter_from(&args),
            limit: None,
        }),
        "/agg" => match args.split_first() {
            Some((function, rest)) => SlashCommand::Tool(ToolCall::AggregateTelemetry {
                aggregation: function.to_string(),
                filter: filter_from(rest),
            }),
            None => SlashCommand::Usage(
                "/agg <avg|min|max|count|sum> [device_id] [metric]".to_string(),
            ),
        },
        "/extract" => match args.as_slice() {
            [path] => SlashCommand::Extract(PathBuf::from(path)),
            _ => SlashCommand::Usage("/extract <report_file>".to_string()),
        },
        "/index" => match args.as_slice() {
            [path] => SlashCommand::Tool(ToolCall::IndexDocument {
                path: PathBuf::from(path),
            }),
            _ => SlashCommand::Usage("/index <file>".to_string()),
        },
        "/search" => {
            if rest.is_empty() {
                SlashCommand::Usage("/search <query>".to_string())
            } else {
                SlashCommand::Tool(ToolCall::SearchDocuments {
                    query: rest.to_string(),
                    top_k: None,
                })
            }
        }
        "/tool" => parse_tool(rest),
        _ => return None,
    };
    Some(command)
}

fn parse_mode(args: &[&str]) -> SlashCommand {
    match args {
        [] => SlashCommand::Mode(None),
        ["toggle"] => SlashCommand::Mode(Some(ModeRequest::Toggle)),
        [target] => match target.parse::<ModelMode>() {
            Ok(mode) => SlashCommand::Mode(Some(ModeRequest::Set(mode))),
            Err(e) => SlashCommand::Usage(e),
        },
        _ => SlashCommand::Usage("/mode [local|cloud|toggle]".to_string()),
    }
}

fn parse_log(args: &[&str]) -> SlashCommand {
    let usage = || SlashCommand::Usage("/log <device_id> <metric> <value> <unit>".to_string());
    match args {
        [device_id, metric_type, value, unit] => match value.parse::<f64>() {
            Ok(value) => SlashCommand::Tool(ToolCall::LogTelemetry {
                device_id: device_id.to_string(),
                metric_type: metric_type.to_string(),
                value,
                unit: unit.to_string(),
                timestamp: None,
            }),
            Err(_) => usage(),
        },
        _ => usage(),
    }
}

/// `/tool <name> [json args]`
fn parse_tool(rest: &str) -> SlashCommand {
    let (name, json) = match rest.split_once(char::is_whitespace) {
        Some((name, json)) => (name, json.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return SlashCommand::Usage(format!("/tool <{}> [json]", ToolCall::NAMES.join("|")));
    }

    let args = if json.is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => return SlashCommand::Usage(format!("Invalid JSON arguments: {}", e)),
        }
    };
    match ToolCall::from_json(name, args) {
        Ok(call) => SlashCommand::Tool(call),
        Err(e) => SlashCommand::Usage(e.to_string()),
    }
}

fn filter_from(args: &[&str]) -> TelemetryFilter {
    TelemetryFilter {
        device_id: args.first().map(|s| s.to_string()),
        metric_type: args.get(1).map(|s| s.to_string()),
        ..Default::default()
    }
}

/// Render help text for all slash commands
pub fn render_help(renderer: &super::renderer::TerminalRenderer) {
    let cmd_color = renderer.command_color();
    let dim_color = renderer.dim_color();

    println!();
    renderer.render_system("Available commands:");
    println!();

    let commands = [
        ("/help", "Show this help message"),
        ("/quit", "Exit interactive mode"),
        ("/clear", "Clear the screen"),
        ("/mode [local|cloud|toggle]", "Show or switch the model mode"),
        ("/status", "Show mode, backends and tools"),
        ("/stats", "Show session and usage statistics"),
        ("/history [n]", "Show the last n turns of this session"),
        ("/devices", "List registered devices"),
        ("/read <device>", "Read a sensor"),
        ("/control <device> <action>", "Set an actuator"),
        ("/log <dev> <metric> <v> <unit>", "Store a telemetry value"),
        ("/telemetry [dev] [metric]", "Query stored telemetry"),
        ("/agg <fn> [dev] [metric]", "Aggregate stored telemetry"),
        ("/extract <file>", "Extract metrics from a SCADA report"),
        ("/index <file>", "Add a document to the search index"),
        ("/search <query>", "Search indexed documents"),
        ("/tool <name> [json]", "Call any tool with JSON arguments"),
    ];

    for (cmd, desc) in &commands {
        println!("  {:<32} {}", cmd.with(cmd_color), desc.with(dim_color));
    }
    println!();
    renderer.render_info("Ctrl+C cancels a running answer. Ctrl+D exits.");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("what is the temperature?"), None);
        assert_eq!(parse_command("/unknown thing"), None);
    }

    #[test]
    fn test_mode_commands() {
        assert_eq!(parse_command("/mode"), Some(SlashCommand::Mode(None)));
        assert_eq!(
            parse_command("/mode Cloud"),
            Some(SlashCommand::Mode(Some(ModeRequest::Set(ModelMode::Cloud))))
        );
        assert_eq!(
            parse_command("/m toggle"),
            Some(SlashCommand::Mode(Some(ModeRequest::Toggle)))
        );
        assert!(matches!(
            parse_command("/mode sideways"),
            Some(SlashCommand::Usage(_))
        ));
    }

    #[test]
    fn test_device_commands() {
        assert_eq!(
            parse_command("/control valve-actuator open"),
            Some(SlashCommand::Tool(ToolCall::ControlDevice {
                device_id: "valve-actuator".to_string(),
                action: "open".to_string(),
            }))
        );
        assert!(matches!(parse_command("/read"), Some(SlashCommand::Usage(_))));
    }

    #[test]
    fn test_log_requires_numeric_value() {
        assert!(matches!(
            parse_command("/log temp-sensor temperature hot C"),
            Some(SlashCommand::Usage(_))
        ));
        assert!(matches!(
            parse_command("/log temp-sensor temperature 21.5 C"),
            Some(SlashCommand::Tool(ToolCall::LogTelemetry { value, .. })) if value == 21.5
        ));
    }

    #[test]
    fn test_aggregate_filters() {
        let Some(SlashCommand::Tool(ToolCall::AggregateTelemetry { aggregation, filter })) =
            parse_command("/agg avg temp-sensor temperature")
        else {
            panic!("expected an aggregation");
        };
        assert_eq!(aggregation, "avg");
        assert_eq!(filter.device_id.as_deref(), Some("temp-sensor"));
        assert_eq!(filter.metric_type.as_deref(), Some("temperature"));
    }

    #[test]
    fn test_search_keeps_whole_query() {
        assert_eq!(
            parse_command("/search  cooling valve procedure "),
            Some(SlashCommand::Tool(ToolCall::SearchDocuments {
                query: "cooling valve procedure".to_string(),
                top_k: None,
            }))
        );
    }

    #[test]
    fn test_generic_tool_command() {
        assert_eq!(
            parse_command(r#"/tool read_sensor {"device_id": "humidity-sensor"}"#),
            Some(SlashCommand::Tool(ToolCall::ReadSensor {
                device_id: "humidity-sensor".to_string(),
            }))
        );
        assert_eq!(
            parse_command("/tool list_devices"),
            Some(SlashCommand::Tool(ToolCall::ListDevices {}))
        );
        assert!(matches!(
            parse_command("/tool launch_rocket {}"),
            Some(SlashCommand::Usage(_))
        ));
    }

    #[test]
    fn test_history_count() {
        assert_eq!(parse_command("/history"), Some(SlashCommand::History(10)));
        assert_eq!(parse_command("/history 3"), Some(SlashCommand::History(3)));
    }
}
