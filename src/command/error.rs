use thiserror::Error;

/// Error returned by [`CommandHandle`](crate::command::CommandHandle).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Command queue is full (try again later or use async `submit`).
    #[error("command queue full")]
    Full,

    /// The listener is gone (forwarder stopped).
    #[error("command channel closed")]
    Closed,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::Full => "submit_full",
            SubmitError::Closed => "submit_closed",
        }
    }
}
