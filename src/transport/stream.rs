use crate::config::{Config, Framing};
use crate::transport::{recv_pending, Link};
use crate::{Error, Result};
use nix::sys::socket::{send, MsgFlags};
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::trace;

/// Raw `SOCK_STREAM` link. There are no message boundaries: each `receive()` is one
/// `read()`, and the card's procedure bytes are left for the chaining engine.
#[derive(Debug)]
pub struct StreamLink {
    stream: UnixStream,
}

pub(crate) fn connect(path: &Path) -> Result<OwnedFd> {
    Ok(UnixStream::connect(path).map_err(Error::Unreachable)?.into())
}

impl StreamLink {
    pub fn new(fd: OwnedFd, config: &Config) -> Result<Self> {
        let stream = UnixStream::from(fd);
        stream
            .set_read_timeout(config.read_timeout)
            .map_err(Error::Unreachable)?;
        Ok(Self { stream })
    }
}

impl Link for StreamLink {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        // A vanished peer is EPIPE, not SIGPIPE.
        let sent = send(self.stream.as_raw_fd(), data, MsgFlags::MSG_NOSIGNAL)?;
        if sent != data.len() {
            return Err(Error::ShortWrite {
                sent,
                len: data.len(),
            });
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf).map_err(Error::Transport)? {
            0 => Err(Error::Closed),
            n => Ok(n),
        }
    }

    fn preamble(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (n, _) = recv_pending(&self.stream, buf)?;
        trace!(n, "Stream preamble");
        Ok(n)
    }

    fn framing(&self) -> Framing {
        Framing::Stream
    }
}
