//! Control messages.
//!
//! One JSON object per message, tagged by `cmd`:
//!
//! ```text
//! {"cmd":"add","channel":"IOC:m1.DRBV","topic":"IOC.m1"}
//! {"cmd":"remove","topic":"IOC.m1"}
//! {"cmd":"list"}
//! {"cmd":"exit"}
//! ```
//!
//! `mapping_add` and `mapping_remove_topic` are accepted for `add` and `remove`.

use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::mapping::MappingSpec;

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Queue a new channel → topic mapping.
    #[serde(alias = "mapping_add")]
    Add { channel: String, topic: String },
    /// Remove every active mapping publishing to `topic`.
    #[serde(alias = "mapping_remove_topic")]
    Remove { topic: String },
    /// Report active mappings.
    List,
    /// Stop the scheduler loop.
    Exit,
}

impl Command {
    /// Decodes and validates one message.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let cmd: Command = serde_json::from_str(raw.trim())?;
        cmd.validate()?;
        Ok(cmd)
    }

    fn validate(&self) -> Result<(), CommandError> {
        let empty = match self {
            Command::Add { channel, .. } if channel.trim().is_empty() => Some("channel"),
            Command::Add { topic, .. } | Command::Remove { topic } if topic.trim().is_empty() => {
                Some("topic")
            }
            _ => None,
        };
        match empty {
            Some(field) => Err(CommandError::Invalid {
                reason: format!("{field} must not be empty"),
            }),
            None => Ok(()),
        }
    }
}

/// Outcome of an applied command, delivered to [`CommandHandle::call`](crate::command::CommandHandle::call).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `add` was queued.
    Queued,
    /// `remove` moved this many mappings.
    Removed(usize),
    /// `list` result, insertion order.
    Listed(Vec<MappingSpec>),
    /// `exit` was accepted.
    Exiting,
    /// The message could not be decoded.
    Rejected(String),
}
