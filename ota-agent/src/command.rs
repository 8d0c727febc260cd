//! Decoded front-end commands and the queue they wait in.
//!
//! The local API and the WebSocket push commands here; the `command_poll`
//! task drains the queue and feeds each command to the orchestrator.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Oldest commands are dropped beyond this many queued.
const MAX_QUEUED: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Command {
    InstallTonight,
    InstallNow,
    Rollback,
    CancelUpdate,
    Confirmation,
    Unknown,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::InstallTonight => "install_tonight",
            Command::InstallNow => "install_now",
            Command::Rollback => "rollback",
            Command::CancelUpdate => "cancel_update",
            Command::Confirmation => "confirmation",
            Command::Unknown => "unknown",
        }
    }

    /// Accepts a bare tag (`install_now`) or `{"command": "install_now"}`.
    pub fn parse_message(text: &str) -> Self {
        let text = text.trim();
        if text.starts_with('{') {
            match serde_json::from_str::<CommandRequest>(text) {
                Ok(request) => request.command,
                Err(e) => {
                    warn!("Unparseable command message: {}", e);
                    Command::Unknown
                }
            }
        } else {
            text.parse().unwrap_or(Command::Unknown)
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Command {
    fn from(tag: String) -> Self {
        tag.parse().unwrap_or(Command::Unknown)
    }
}

impl FromStr for Command {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "install_tonight" => Command::InstallTonight,
            "install_now" => Command::InstallNow,
            "rollback" => Command::Rollback,
            "cancel_update" => Command::CancelUpdate,
            "confirmation" | "confirm" => Command::Confirmation,
            _ => Command::Unknown,
        })
    }
}

/// Body of `POST /commands`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandRequest {
    pub command: Command,
}

#[derive(Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        let mut queue = self.queue.lock();
        if queue.len() >= MAX_QUEUED {
            if let Some(dropped) = queue.pop_front() {
                warn!("Command queue full, dropping {}", dropped);
            }
        }
        debug!("Queued command {}", command);
        queue.push_back(command);
    }

    /// Take every queued command in arrival order.
    pub fn drain(&self) -> Vec<Command> {
        self.queue.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
