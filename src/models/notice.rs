use std::fmt;

pub const SEND_FAILED: &str = "Failed to send message. Please try again.";

/// User-facing notification raised by the chat core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The session is gone and the user has to sign in again.
    SessionExpired,
    /// A send failed for a recoverable reason; the user may retry.
    SendFailed(String),
    /// Server history could not be fetched; the local log is still shown.
    HistoryUnavailable(String),
    SignedOut,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SessionExpired => write!(f, "Session expired. Please sign in again."),
            Notice::SendFailed(msg) => write!(f, "{}", msg),
            Notice::HistoryUnavailable(msg) => write!(f, "Could not load history: {}", msg),
            Notice::SignedOut => write!(f, "Signed out"),
        }
    }
}
