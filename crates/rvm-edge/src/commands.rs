//! # Remote Commands
//!
//! Commands the backend piggybacks on heartbeat responses.
//!
//! ```text
//! {"status": "success", "commands": ["restart", {"action": "reboot", "delay": 5}]}
//!                                      │            │
//!                                      ▼            ▼
//!                       RemoteCommand { Restart }  RemoteCommand { Reboot, payload }
//! ```
//!
//! Detection and delivery live here. Executing a command (restarting the
//! service, rebooting, pulling an update) belongs to the OS integration that
//! implements [`CommandHandler`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{info, warn};

/// What the backend asked the device to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    Restart,
    Reboot,
    PullUpdate,
    EnterMaintenance,
    ExitMaintenance,
    /// Unknown tag, kept verbatim.
    Other(String),
}

impl CommandAction {
    pub fn as_str(&self) -> &str {
        match self {
            CommandAction::Restart => "restart",
            CommandAction::Reboot => "reboot",
            CommandAction::PullUpdate => "pull_update",
            CommandAction::EnterMaintenance => "enter_maintenance",
            CommandAction::ExitMaintenance => "exit_maintenance",
            CommandAction::Other(tag) => tag,
        }
    }
}

impl From<&str> for CommandAction {
    fn from(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "restart" => CommandAction::Restart,
            "reboot" => CommandAction::Reboot,
            "pull_update" | "update" => CommandAction::PullUpdate,
            "enter_maintenance" | "maintenance_on" => CommandAction::EnterMaintenance,
            "exit_maintenance" | "maintenance_off" => CommandAction::ExitMaintenance,
            _ => CommandAction::Other(tag.to_string()),
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command from a heartbeat response.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommand {
    pub action: CommandAction,
    /// The full command object, or `null` for a bare string tag.
    pub payload: Value,
}

impl RemoteCommand {
    /// Parses one entry of the `commands` array.
    ///
    /// Accepts a bare string (`"restart"`) or an object carrying `action`
    /// (or `command`/`type`). Returns `None` for anything else.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(tag) => Some(RemoteCommand {
                action: CommandAction::from(tag.as_str()),
                payload: Value::Null,
            }),
            Value::Object(map) => {
                let tag = ["action", "command", "type"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str))?;
                Some(RemoteCommand {
                    action: CommandAction::from(tag),
                    payload: value.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Extracts the command list from a heartbeat response body.
///
/// A missing or non-array `commands` key means no commands.
pub fn parse_commands(body: &Value) -> Vec<RemoteCommand> {
    let Some(entries) = body.get("commands").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let command = RemoteCommand::parse(entry);
            if command.is_none() {
                warn!(%entry, "Ignoring malformed remote command");
            }
            command
        })
        .collect()
}

/// Receives remote commands from the control loop.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: &RemoteCommand);
}

/// Logs every command and tracks maintenance mode.
#[derive(Debug, Default)]
pub struct LoggingCommandHandler {
    maintenance: AtomicBool,
}

impl LoggingCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Acquire)
    }
}

impl CommandHandler for LoggingCommandHandler {
    fn handle(&self, command: &RemoteCommand) {
        match &command.action {
            CommandAction::EnterMaintenance => {
                self.maintenance.store(true, Ordering::Release);
                info!("Entering maintenance mode");
            }
            CommandAction::ExitMaintenance => {
                self.maintenance.store(false, Ordering::Release);
                info!("Leaving maintenance mode");
            }
            CommandAction::Other(tag) => warn!(action = %tag, "Unknown remote command"),
            action => info!(%action, "Remote command received"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_string_and_object_commands() {
        let body = json!({
            "status": "success",
            "commands": ["restart", {"action": "reboot", "delay": 5}, {"command": "PULL-UPDATE"}]
        });
        let commands = parse_commands(&body);

        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].action, CommandAction::Restart);
        assert_eq!(commands[0].payload, Value::Null);
        assert_eq!(commands[1].action, CommandAction::Reboot);
        assert_eq!(commands[1].payload["delay"], 5);
        assert_eq!(commands[2].action, CommandAction::PullUpdate);
    }

    #[test]
    fn test_missing_commands_is_empty() {
        assert!(parse_commands(&json!({"status": "success"})).is_empty());
        assert!(parse_commands(&json!({"commands": null})).is_empty());
        assert!(parse_commands(&Value::Null).is_empty());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let commands = parse_commands(&json!({"commands": [42, {"delay": 1}, "calibrate"]}));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].action, CommandAction::Other("calibrate".into()));
    }

    #[test]
    fn test_maintenance_flag() {
        let handler = LoggingCommandHandler::new();
        assert!(!handler.in_maintenance());

        handler.handle(&RemoteCommand::parse(&json!("enter_maintenance")).unwrap());
        assert!(handler.in_maintenance());

        handler.handle(&RemoteCommand::parse(&json!("restart")).unwrap());
        assert!(handler.in_maintenance());

        handler.handle(&RemoteCommand::parse(&json!({"action": "exit_maintenance"})).unwrap());
        assert!(!handler.in_maintenance());
    }
}
