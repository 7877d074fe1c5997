//! Receiver states and the pending offer

use std::fmt;
use std::net::SocketAddr;

/// Receiver lifecycle
///
/// The discriminants are stable and exposed across the C boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReceiverState {
    /// Not listening
    Idle = 0,
    /// Listening for a sender
    Listening = 1,
    /// A sender is waiting for accept or reject
    AwaitingAccept = 2,
    /// Payload is arriving
    Receiving = 3,
    /// Payload received and verified
    Completed = 4,
    /// Transfer failed; see `last_error`
    Error = 5,
}

impl ReceiverState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Listening,
            2 => Self::AwaitingAccept,
            3 => Self::Receiving,
            4 => Self::Completed,
            _ => Self::Error,
        }
    }

    /// Completed or Error
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::AwaitingAccept => "awaiting accept",
            Self::Receiving => "receiving",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Offer from a connected sender, waiting for a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    /// Name the sender gave for itself
    pub sender_name: String,
    /// Address the offer came from
    pub sender_addr: SocketAddr,
    /// File or folder name
    pub file_name: String,
    /// Exact stream length in bytes
    pub file_size: u64,
    /// Whether the payload is a folder archive
    pub is_folder: bool,
}
