pub mod packet;
pub mod stream;

pub use self::packet::PacketLink;
pub use self::stream::StreamLink;

use crate::config::{Config, Framing};
use crate::{Error, Result};
use nix::errno::Errno;
use nix::sys::socket::{
    getpeername, getsockname, getsockopt, recvmsg, sockopt, AddressFamily, MsgFlags,
    SockType, SockaddrLike, SockaddrStorage,
};
use std::fmt;
use std::io::IoSliceMut;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::PathBuf;
use tracing::{debug, trace, trace_span};

/// Longest possible Answer-to-Reset.
pub const MAX_ATR_LEN: usize = 33;

/// A connected socket to a card emulator, moving opaque APDU bytes back and forth.
pub trait Link: fmt::Debug + Send {
    /// Sends one command APDU, in full.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receives one response fragment into `buf`, returning its length.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reads whatever is already waiting on the socket without blocking.
    fn preamble(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn framing(&self) -> Framing;

    /// Whether procedure bytes (61XX, 6CXX, 9FXX) are handled on the client side.
    fn chaining(&self) -> bool {
        self.framing() == Framing::Stream
    }
}

/// Where to find the card emulator.
#[derive(Debug)]
pub enum Endpoint {
    /// Filesystem path of a listening AF_UNIX socket.
    Path(PathBuf),
    /// An already connected socket, eg. inherited from a parent process.
    Fd(OwnedFd),
}

impl From<PathBuf> for Endpoint {
    fn from(v: PathBuf) -> Self {
        Self::Path(v)
    }
}

impl From<OwnedFd> for Endpoint {
    fn from(v: OwnedFd) -> Self {
        Self::Fd(v)
    }
}

/// Opens an endpoint, validates it and wraps it in a matching link.
pub fn open(endpoint: Endpoint, config: &Config) -> Result<Box<dyn Link>> {
    let span = trace_span!("open");
    let _enter = span.enter();

    let fd = match endpoint {
        Endpoint::Fd(fd) => fd,
        Endpoint::Path(path) => {
            debug!(?path, "Connecting to socket");
            match config.framing.unwrap_or(Framing::Stream) {
                Framing::Stream => stream::connect(&path)?,
                Framing::Packet => packet::connect(&path)?,
            }
        }
    };

    let framing = inspect(&fd)?;
    if let Some(want) = config.framing {
        if want != framing {
            return Err(Error::InvalidTransport(format!(
                "expected {:?} framing, socket is {:?}",
                want, framing
            )));
        }
    }
    debug!(?framing, "Socket validated");

    Ok(match framing {
        Framing::Stream => Box::new(StreamLink::new(fd, config)?),
        Framing::Packet => Box::new(PacketLink::new(fd, config)?),
    })
}

/// Checks that `fd` is a connected AF_UNIX stream or seqpacket socket, and says which.
pub fn inspect<F: AsFd + AsRawFd>(fd: &F) -> Result<Framing> {
    let introspect = |errno: Errno| match errno {
        Errno::ENOTSOCK => Error::InvalidTransport("not a socket".into()),
        e => Error::Unreachable(e.into()),
    };

    let sock_type = getsockopt(fd, sockopt::SockType).map_err(introspect)?;
    let addr: SockaddrStorage = getsockname(fd.as_raw_fd()).map_err(introspect)?;
    trace!(?sock_type, family = ?addr.family(), "Socket introspected");

    if addr.family() != Some(AddressFamily::Unix) {
        return Err(Error::InvalidTransport(format!(
            "socket must be AF_UNIX, not {:?}",
            addr.family()
        )));
    }
    let framing = match sock_type {
        SockType::Stream => Framing::Stream,
        SockType::SeqPacket => Framing::Packet,
        t => {
            return Err(Error::InvalidTransport(format!(
                "socket must be SOCK_STREAM or SOCK_SEQPACKET, not {:?}",
                t
            )))
        }
    };

    match getpeername::<SockaddrStorage>(fd.as_raw_fd()) {
        Ok(_) => Ok(framing),
        Err(Errno::ENOTCONN) => Err(Error::InvalidTransport("socket is not connected".into())),
        Err(e) => Err(introspect(e)),
    }
}

/// One `recvmsg()`, returning the byte count and the message flags.
pub(crate) fn recv_record<F: AsRawFd>(
    fd: &F,
    buf: &mut [u8],
    flags: MsgFlags,
) -> Result<(usize, MsgFlags)> {
    let mut iov = [IoSliceMut::new(buf)];
    let msg = recvmsg::<()>(fd.as_raw_fd(), &mut iov, None, flags)?;
    Ok((msg.bytes, msg.flags))
}

/// Non-blocking read of anything already queued. Nothing queued is not an error.
pub(crate) fn recv_pending<F: AsRawFd>(fd: &F, buf: &mut [u8]) -> Result<(usize, MsgFlags)> {
    match recv_record(fd, buf, MsgFlags::MSG_DONTWAIT) {
        Err(Error::Transport(err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
            Ok((0, MsgFlags::empty()))
        }
        v => v,
    }
}
