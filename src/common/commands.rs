/// Commands the UI sends down to the session runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Post a message; `expires_in_secs` sets a TTL when non-zero.
    SendMessage {
        content: String,
        expires_in_secs: Option<u64>,
    },
    /// Delete one of our own messages.
    DeleteMessage { message_id: String },
    /// +1 when `increment`, -1 otherwise.
    AdjustCounter { increment: bool },
    SetTyping(bool),
    /// Refresh our own activity (the page became visible again, the console got input, ...).
    Touch,
    /// Announce departure and stop the runner.
    Shutdown,
}
