use thiserror::Error;

/// A control frame that matched a command prefix but could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("private message frame has no '_' after the target name")]
    MissingDelimiter,
}

/// Failure to hand a line to a session's outbound mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The session's writer has gone away.
    #[error("mailbox closed")]
    Closed,
    /// A bounded mailbox is full; the receiving session is being evicted.
    #[error("mailbox full")]
    Full,
}
