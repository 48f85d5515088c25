//! Connection options.

use std::time::Duration;

/// Largest response fragment read in one go.
pub const DEFAULT_MAX_FRAGMENT_LEN: usize = 4096;

/// How APDUs are delimited on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `SOCK_STREAM`: raw bytes, no delimiters. The card's procedure bytes (61XX, 6CXX)
    /// are answered by the chaining engine.
    Stream,
    /// `SOCK_SEQPACKET`: one record per APDU. Exchanges are passed through as-is.
    Packet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Expected framing. If unset, it's detected from the socket type; when connecting
    /// to a path, it defaults to `Framing::Stream`.
    pub framing: Option<Framing>,

    /// Receive deadline, applied to the socket as `SO_RCVTIMEO`. Unset blocks forever.
    pub read_timeout: Option<Duration>,

    /// Read whatever the emulator sent on connect as the ATR.
    pub probe_atr: bool,

    /// Size of the receive scratch buffer.
    pub max_fragment_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            framing: None,
            read_timeout: None,
            probe_atr: true,
            max_fragment_len: DEFAULT_MAX_FRAGMENT_LEN,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = Some(framing);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_probe_atr(mut self, probe_atr: bool) -> Self {
        self.probe_atr = probe_atr;
        self
    }

    pub fn with_max_fragment_len(mut self, len: usize) -> Self {
        self.max_fragment_len = len;
        self
    }
}
