//! Operator commands carried on the notifications log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::QueueKind;

/// A recognized operator command and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Stop,
    Pause,
    Resume,
    PopulateQueue {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    RequeueStalled,
    FlushQueue {
        queue_type: QueueKind,
    },
    AddClub {
        instagram_handle: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<i64>,
    },
    RequeueJob {
        instagram_handle: String,
        job_type: QueueKind,
    },
    TriggerClean,
    /// Purge dead-lettered jobs of a kind, optionally only for one handle.
    PurgeFailed {
        job_type: QueueKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instagram_handle: Option<String>,
    },
}

impl Command {
    const NAMES: [&'static str; 10] = [
        "stop",
        "pause",
        "resume",
        "populate_queue",
        "requeue_stalled",
        "flush_queue",
        "add_club",
        "requeue_job",
        "trigger_clean",
        "purge_failed",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::PopulateQueue { .. } => "populate_queue",
            Command::RequeueStalled => "requeue_stalled",
            Command::FlushQueue { .. } => "flush_queue",
            Command::AddClub { .. } => "add_club",
            Command::RequeueJob { .. } => "requeue_job",
            Command::TriggerClean => "trigger_clean",
            Command::PurgeFailed { .. } => "purge_failed",
        }
    }

    pub fn is_known(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }
}

/// A command together with who issued it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub command: Command,
    /// Issuing collaborator, e.g. `api` or `discord`.
    pub source: String,
    pub user: Option<String>,
}

/// Why a notifications-log payload did not yield a command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandParseError {
    #[error("payload is not a command")]
    NotACommand,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArgs { command: String, reason: String },
}

impl CommandEnvelope {
    pub fn new(command: Command, source: impl Into<String>) -> Self {
        Self {
            command,
            source: source.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Encode as `{type:"command", command, ...args, source, user?}`.
    pub fn to_payload(&self) -> Value {
        let mut payload = match serde_json::to_value(&self.command) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        payload.insert("type".into(), Value::String("command".into()));
        payload.insert("source".into(), Value::String(self.source.clone()));
        if let Some(user) = &self.user {
            payload.insert("user".into(), Value::String(user.clone()));
        }
        Value::Object(payload)
    }

    /// Decode a notifications-log payload.
    pub fn parse(payload: &Value) -> Result<Self, CommandParseError> {
        if payload.get("type").and_then(Value::as_str) != Some("command") {
            return Err(CommandParseError::NotACommand);
        }
        let name = payload
            .get("command")
            .and_then(Value::as_str)
            .ok_or(CommandParseError::NotACommand)?;
        if !Command::is_known(name) {
            return Err(CommandParseError::Unknown(name.to_string()));
        }

        let command = serde_json::from_value::<Command>(payload.clone()).map_err(|e| {
            CommandParseError::InvalidArgs {
                command: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            command,
            source: payload
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            user: payload
                .get("user")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}
