//! Command execution.

use crate::Commands;
use colored::Colorize;
use devlink_client::DeviceAgent;
use devlink_protocol::PropertyId;
use serde_json::Value;

/// Executes a device command and returns the formatted output.
pub fn execute(agent: &DeviceAgent, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Props | Commands::Proxy { .. } => unreachable!(),

        Commands::Status => Ok(status(agent)),

        Commands::Get { prop, args } => {
            let args = args.map(|a| parse_json_arg(&a)).transpose()?;
            let value = agent.get_property(prop, args.unwrap_or(Value::Null))?;
            Ok(format!("{}\n{}", prop_label(prop).bold(), format_json(&value)))
        }

        Commands::Set { prop, value } => {
            let value = parse_json_arg(&value)?;
            agent.set_property(prop, &value)?;
            Ok(format!("{} {} = {}", "Set".green(), prop_label(prop).cyan(), value))
        }

        Commands::Play => {
            agent.play()?;
            Ok("PLAY".green().to_string())
        }

        Commands::Pause => {
            agent.pause()?;
            Ok("PAUSE".yellow().to_string())
        }

        Commands::SwitchVersion { version } => {
            agent.switch_app_version(&version)?;
            Ok(format!("{} to version {}", "Switched".green(), version.cyan()))
        }

        Commands::Reboot => {
            agent.reboot_system()?;
            Ok("Reboot requested".green().to_string())
        }
    }
}

/// One line per field; a failed read is shown inline rather than aborting.
fn status(agent: &DeviceAgent) -> String {
    let mut lines = Vec::new();

    let mut line = |name: &str, value: Result<String, devlink_client::ClientError>| {
        let shown = match value {
            Ok(v) => v.yellow().to_string(),
            Err(e) => format!("{} ({})", "unavailable".red(), e),
        };
        lines.push(format!("  {:<16} {}", name, shown));
    };

    line("status", agent.device_status().map(|s| format!("{:?}", s)));
    line("media source", agent.media_source().map(|s| format!("{:?}", s)));
    line(
        "stream target",
        agent.stream_target().map(|t| format!("{}:{}", t.ip, t.port)),
    );
    line("pose stream", agent.pose_stream_enabled().map(|b| b.to_string()));
    line("camera stream", agent.cam_img_stream_enabled().map(|b| b.to_string()));
    line("temperature", agent.temperature().map(|t| format!("{:.1} C", t)));
    line("app version", agent.app_new_version());
    line("app versions", agent.app_versions().map(|v| v.join(", ")));

    format!("{}\n{}", "Device".bold(), lines.join("\n"))
}

/// Known property names with their ids.
pub fn list_properties() -> String {
    PropertyId::all()
        .map(|(name, id)| format!("  {} {}", format!("{:#06x}", id.0).dimmed(), name.cyan()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn prop_label(prop: PropertyId) -> String {
    match prop.name() {
        Some(name) => name.to_string(),
        None => format!("{:#06x}", prop.0),
    }
}

/// Parses a JSON argument, or reads it from a file when prefixed with `@`.
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
