use crate::status::StatusWord;
use nix::errno::Errno;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error code reported for operations on a handle that was never connected, or has
/// already been disconnected. Lives outside the errno range.
pub const ERROR_NOT_INITIALIZED: u32 = 0x8030_0001;

const NOT_INITIALIZED_MESSAGE: &str =
    "Socket transport is not initialized. A card connection must be created first.";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The descriptor is not a connected AF_UNIX stream/seqpacket socket.
    #[error("invalid transport: {0}")]
    InvalidTransport(String),

    /// The descriptor couldn't be opened or introspected.
    #[error("endpoint unreachable: {0}")]
    Unreachable(#[source] io::Error),

    #[error("{}", NOT_INITIALIZED_MESSAGE)]
    NotInitialized,

    /// Doesn't match any of the four short-form ISO 7816-4 cases.
    #[error("unrecognized command APDU: {0:02X?}")]
    UnrecognizedCommand(Vec<u8>),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("short write: sent {sent} of {len} bytes")]
    ShortWrite { sent: usize, len: usize },

    /// A response fragment too short to hold SW1SW2.
    #[error("short response: {0} bytes, expected at least 2")]
    ShortResponse(usize),

    /// A packet-framed record didn't fit the receive buffer; the rest was discarded.
    #[error("response record truncated to {0} bytes")]
    Truncated(usize),

    #[error("connection closed by peer")]
    Closed,

    /// The card rejected a GET RESPONSE for a chained Case 4 exchange.
    #[error("chained response rejected by card with status {0}")]
    ChainRejected(StatusWord),

    /// The card kept answering with procedure bytes past the leg limit.
    #[error("card still chaining after {0} legs")]
    ChainTooLong(usize),

    #[error("response buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

impl Error {
    /// Numeric code for this error; see `stringify_error()`.
    pub fn code(&self) -> u32 {
        let errno = match self {
            Self::NotInitialized => return ERROR_NOT_INITIALIZED,
            Self::InvalidTransport(_) => Errno::EPROTOTYPE,
            Self::Unreachable(err) | Self::Transport(err) => match err.raw_os_error() {
                Some(code) => return code as u32,
                None => Errno::EIO,
            },
            Self::UnrecognizedCommand(_) => Errno::EINVAL,
            Self::ShortWrite { .. } => Errno::EIO,
            Self::ShortResponse(_) | Self::ChainRejected(_) => Errno::EBADMSG,
            Self::ChainTooLong(_) => Errno::EPROTO,
            Self::Truncated(_) | Self::BufferTooSmall { .. } => Errno::EMSGSIZE,
            Self::Closed => Errno::ECONNRESET,
        };
        errno as i32 as u32
    }

    /// Whether the error came from moving bytes over the link, as opposed to bad input
    /// or a misused handle.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ShortWrite { .. }
                | Self::ShortResponse(_)
                | Self::Truncated(_)
                | Self::Closed
                | Self::ChainRejected(_)
                | Self::ChainTooLong(_)
        )
    }

    /// Whether the connection is gone; the handle is useless until disconnected.
    pub fn is_severed(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Transport(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Self::Transport(errno.into())
    }
}

/// Describes an error code returned by `Error::code()`.
pub fn stringify_error(code: u32) -> String {
    if code == ERROR_NOT_INITIALIZED {
        return NOT_INITIALIZED_MESSAGE.into();
    }
    io::Error::from_raw_os_error(code as i32).to_string()
}
