//! Error types used by the forwarder runtime, its mappings and collaborators.
//!
//! - [`AcquireError`]: a subscription, publish target or broker instance could not be obtained.
//! - [`PublishError`]: a single publish attempt failed (transient or fatal).
//! - [`MappingError`]: why a mapping left active duty (the failure taxonomy).
//! - [`CommandError`]: a control message could not be decoded.
//! - [`ConfigError`]: configuration could not be loaded or is invalid.
//! - [`RuntimeError`]: the runtime itself could not keep running.
//!
//! All enums provide `as_label` for stable snake_case labels in logs and events.

use thiserror::Error;

/// # External resource acquisition failures.
///
/// Returned by providers when a handle cannot be created. A mapping that hits
/// one of these during `start_forwarding` goes straight to `Failed`.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The subscription provider refused to open the channel.
    #[error("cannot subscribe to channel {channel}: {reason}")]
    Subscription {
        /// Channel (PV) name.
        channel: String,
        /// Provider supplied reason.
        reason: String,
    },

    /// The broker client refused to open a publish target.
    #[error("cannot open topic {topic}: {reason}")]
    Target {
        /// Topic name.
        topic: String,
        /// Broker supplied reason.
        reason: String,
    },

    /// No usable broker-client instance is available.
    #[error("no broker instance available: {reason}")]
    NoInstance {
        /// Connector supplied reason.
        reason: String,
    },
}

impl AcquireError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            AcquireError::Subscription { .. } => "acquire_subscription",
            AcquireError::Target { .. } => "acquire_target",
            AcquireError::NoInstance { .. } => "acquire_instance",
        }
    }
}

/// # Errors of a single publish attempt.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker could not take the message right now (queue full, timeout, ...).
    #[error("transient publish error: {reason}")]
    Transient {
        /// Broker supplied reason.
        reason: String,
    },

    /// The publish path is unusable and will not recover.
    #[error("fatal publish error: {reason}")]
    Fatal {
        /// Broker supplied reason.
        reason: String,
    },
}

impl PublishError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::Transient { .. } => "publish_transient",
            PublishError::Fatal { .. } => "publish_fatal",
        }
    }

    /// True for [`PublishError::Fatal`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublishError::Fatal { .. })
    }
}

/// # Why a mapping failed (or was refused).
///
/// `DuplicateChannel` is never surfaced to callers; it only labels the
/// low-severity log line and event emitted when admission drops a request.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// A handle could not be obtained; the mapping never reached `Ready`.
    #[error("acquisition failure: {0}")]
    Acquisition(#[from] AcquireError),

    /// A problem was detected after start (self-check or async callback).
    #[error("runtime failure: {reason}")]
    Runtime {
        /// What was detected.
        reason: String,
    },

    /// The channel already has an active mapping.
    #[error("channel {channel} already active")]
    DuplicateChannel {
        /// Channel (PV) name.
        channel: String,
    },

    /// The broker-client instance carrying this mapping became unusable.
    #[error("broker instance {instance} is unusable")]
    InstanceFatal {
        /// Registry id of the instance.
        instance: u64,
    },
}

impl MappingError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            MappingError::Acquisition(_) => "mapping_acquisition",
            MappingError::Runtime { .. } => "mapping_runtime",
            MappingError::DuplicateChannel { .. } => "mapping_duplicate_channel",
            MappingError::InstanceFatal { .. } => "mapping_instance_fatal",
        }
    }

    /// Shorthand for [`MappingError::Runtime`].
    pub fn runtime(reason: impl Into<String>) -> Self {
        MappingError::Runtime {
            reason: reason.into(),
        }
    }
}

/// # Control message decoding failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CommandError {
    /// Not JSON, unknown `cmd`, or missing/mistyped fields.
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Structurally valid but semantically unusable (e.g. empty channel name).
    #[error("invalid command: {reason}")]
    Invalid {
        /// What is wrong with it.
        reason: String,
    },
}

impl CommandError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            CommandError::Malformed(_) => "command_malformed",
            CommandError::Invalid { .. } => "command_invalid",
        }
    }
}

/// # Configuration loading and validation failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`Config`](crate::Config).
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "config_io",
            ConfigError::Parse(_) => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}

/// # Errors produced by the forwarder runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// OS signal handlers could not be installed.
    #[error("cannot install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// `run` was called twice on the same forwarder.
    #[error("forwarder already running")]
    AlreadyRunning,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::AlreadyRunning => "runtime_already_running",
        }
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_wraps_into_mapping_error() {
        let err: MappingError = AcquireError::Target {
            topic: "T".into(),
            reason: "unknown topic".into(),
        }
        .into();
        assert_eq!(err.as_label(), "mapping_acquisition");
        assert_eq!(
            err.to_string(),
            "acquisition failure: cannot open topic T: unknown topic"
        );
    }

    #[test]
    fn test_publish_error_fatality() {
        assert!(PublishError::Fatal { reason: "x".into() }.is_fatal());
        assert!(!PublishError::Transient { reason: "x".into() }.is_fatal());
    }
}
