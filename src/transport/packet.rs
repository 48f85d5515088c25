use crate::config::{Config, Framing};
use crate::transport::{recv_pending, recv_record, Link};
use crate::{Error, Result};
use nix::sys::socket::{
    connect as sock_connect, send, setsockopt, socket, sockopt, AddressFamily, MsgFlags,
    SockFlag, SockType, UnixAddr,
};
use nix::sys::time::TimeVal;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use tracing::{trace, warn};

/// `SOCK_SEQPACKET` link: one record per command, one record per response. The
/// emulator sees complete APDUs and answers them itself, so no chaining happens here.
#[derive(Debug)]
pub struct PacketLink {
    fd: OwnedFd,
}

pub(crate) fn connect(path: &Path) -> Result<OwnedFd> {
    let unreachable = |e: nix::errno::Errno| Error::Unreachable(e.into());
    let fd = socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(unreachable)?;
    let addr = UnixAddr::new(path).map_err(unreachable)?;
    sock_connect(fd.as_raw_fd(), &addr).map_err(unreachable)?;
    Ok(fd)
}

impl PacketLink {
    pub fn new(fd: OwnedFd, config: &Config) -> Result<Self> {
        if let Some(timeout) = config.read_timeout {
            let tv = TimeVal::new(timeout.as_secs() as _, timeout.subsec_micros() as _);
            setsockopt(&fd, sockopt::ReceiveTimeout, &tv)
                .map_err(|e| Error::Unreachable(e.into()))?;
        }
        Ok(Self { fd })
    }
}

impl Link for PacketLink {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let sent = send(
            self.fd.as_raw_fd(),
            data,
            MsgFlags::MSG_EOR | MsgFlags::MSG_NOSIGNAL,
        )?;
        if sent != data.len() {
            return Err(Error::ShortWrite {
                sent,
                len: data.len(),
            });
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (n, flags) = recv_record(&self.fd, buf, MsgFlags::empty())?;
        trace!(n, ?flags, "Received record");
        if flags.contains(MsgFlags::MSG_TRUNC) {
            return Err(Error::Truncated(n));
        }
        match n {
            0 => Err(Error::Closed),
            n => Ok(n),
        }
    }

    fn preamble(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (n, flags) = recv_pending(&self.fd, buf)?;
        if flags.contains(MsgFlags::MSG_TRUNC) {
            warn!(n, "Discarding truncated preamble record");
            return Ok(0);
        }
        Ok(n)
    }

    fn framing(&self) -> Framing {
        Framing::Packet
    }
}
