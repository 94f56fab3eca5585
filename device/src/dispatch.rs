use std::sync::Arc;

use tracing::{debug, warn};

use crate::actuator::ActuatorController;

/// Query key carrying the command name.
pub const COMMAND_KEY: &str = "go";
/// Longest command value accepted; the device firmware reads it into a fixed
/// 32-byte, NUL-terminated buffer.
pub const MAX_VALUE_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Left,
    Right,
    FlashOn,
    FlashOff,
    Unknown,
}

impl Command {
    pub fn parse(value: &str) -> Self {
        match value {
            "left" => Command::Left,
            "right" => Command::Right,
            "flash_on" => Command::FlashOn,
            "flash_off" => Command::FlashOff,
            _ => Command::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("missing or unreadable `go` parameter")]
    MissingParameter,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
}

/// Finds `key` in a raw `a=b&c=d` query string. Values are taken verbatim.
pub fn query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Stateless translator from `/action` query strings to actuator calls.
#[derive(Clone)]
pub struct CommandDispatcher {
    actuator: Arc<ActuatorController>,
}

impl CommandDispatcher {
    pub fn new(actuator: Arc<ActuatorController>) -> Self {
        Self { actuator }
    }

    pub fn actuator(&self) -> &Arc<ActuatorController> {
        &self.actuator
    }

    /// Parses the query and applies the command. Blocks for as long as the
    /// actuator takes to move.
    pub fn dispatch(&self, query: Option<&str>) -> Result<Command, DispatchError> {
        let command = parse_command(query)?;
        debug!(?command, "dispatching command");
        self.actuator.apply(command);
        Ok(command)
    }
}

fn parse_command(query: Option<&str>) -> Result<Command, DispatchError> {
    let query = query
        .filter(|q| !q.is_empty())
        .ok_or(DispatchError::MissingParameter)?;
    let value = query_value(query, COMMAND_KEY)
        .filter(|v| v.len() <= MAX_VALUE_LEN)
        .ok_or(DispatchError::MissingParameter)?;

    match Command::parse(value) {
        Command::Unknown => {
            warn!(value, "unknown command");
            Err(DispatchError::UnknownCommand(value.to_string()))
        }
        command => Ok(command),
    }
}
