use crate::chain;
use crate::config::{Config, Framing};
use crate::status::Outcome;
use crate::transport::{self, Endpoint, Link, MAX_ATR_LEN};
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, info, trace_span, warn};

/// Name of the one and only reader.
pub const READER_NAME: &str = "Unix Socket Reader";

/// Transmission protocol requested on connect. Sockets don't have one, so this is
/// accepted for API compatibility with PC/SC-style callers and otherwise ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    T0,
    T1,
    #[default]
    Any,
}

/// Process-wide state. There isn't any, but callers expect to establish and release it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    config: Config,
}

impl Context {
    pub fn establish() -> Result<Self> {
        Ok(Self::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn release(self) -> Result<()> {
        Ok(())
    }

    /// Lists readers. There's exactly one, regardless of whether anything listens.
    pub fn list_readers(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(READER_NAME)
    }

    /// Size of the reader list as a double-NUL-terminated multi-string.
    pub fn list_readers_len(&self) -> usize {
        self.list_readers().map(|name| name.len() + 1).sum::<usize>() + 1
    }

    pub fn connect<E: Into<Endpoint>>(&self, endpoint: E, protocol: Protocol) -> Result<Card> {
        debug!(?protocol, "Ignoring protocol hint");
        Card::connect(endpoint.into(), &self.config)
    }
}

/// A connection to one emulated card. Owns its socket; disconnecting (or dropping)
/// the handle closes it.
pub struct Card {
    link: Option<Box<dyn Link>>,
    atr: Vec<u8>,
    severed: bool,
    max_fragment_len: usize,
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("link", &self.link)
            .field("atr", &format_args!("{:02X?}", self.atr))
            .field("severed", &self.severed)
            .finish()
    }
}

impl Card {
    pub fn connect(endpoint: Endpoint, config: &Config) -> Result<Self> {
        let span = trace_span!("connect");
        let _enter = span.enter();

        let mut card = Self::with_link(transport::open(endpoint, config)?, config);
        if config.probe_atr {
            card.probe_atr();
        }
        info!(atr = %hex::encode_upper(&card.atr), framing = ?card.framing(), "Connected");
        Ok(card)
    }

    /// Wraps an already validated link.
    pub fn with_link(link: Box<dyn Link>, config: &Config) -> Self {
        Self {
            link: Some(link),
            atr: Vec::new(),
            severed: false,
            max_fragment_len: config.max_fragment_len,
        }
    }

    fn probe_atr(&mut self) {
        let mut buf = [0; MAX_ATR_LEN];
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.preamble(&mut buf) {
            Ok(0) => warn!("No ATR waiting on the socket"),
            Ok(n) => self.atr = buf[..n].to_vec(),
            Err(err) => warn!("couldn't read ATR: {}", err),
        }
    }

    /// Answer-to-Reset read on connect; empty if the emulator didn't send one.
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Logical channel in use. Only the basic channel is supported.
    pub fn logical_channel(&self) -> u8 {
        0
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn framing(&self) -> Option<Framing> {
        self.link.as_ref().map(|link| link.framing())
    }

    /// Sends a command APDU and writes the complete response, status word included,
    /// into `response`. A status word other than 9000 is reported through the outcome.
    pub fn transmit(&mut self, command: &[u8], response: &mut [u8]) -> Result<Outcome> {
        let max_fragment_len = self.max_fragment_len;
        self.on_link(|link| chain::transmit(link, command, response, max_fragment_len))
    }

    /// Like `transmit()`, but returns the response as a vector of whatever length the
    /// card's chaining produces.
    pub fn transmit_vec(&mut self, command: &[u8]) -> Result<(Vec<u8>, Outcome)> {
        let max_fragment_len = self.max_fragment_len;
        self.on_link(|link| chain::transmit_vec(link, command, max_fragment_len))
    }

    fn on_link<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Link) -> Result<T>,
    {
        let link = self.link.as_mut().ok_or(Error::NotInitialized)?;
        if self.severed {
            return Err(Error::Closed);
        }
        f(link.as_mut()).map_err(|err| {
            if err.is_severed() {
                warn!("Connection lost: {}", err);
                self.severed = true;
            }
            err
        })
    }

    /// Closes the socket. Fails with `NotInitialized` if it's already closed.
    pub fn disconnect(&mut self) -> Result<()> {
        let span = trace_span!("disconnect");
        let _enter = span.enter();

        let link = self.link.take().ok_or(Error::NotInitialized)?;
        drop(link);
        self.atr.clear();
        self.severed = false;
        debug!("Disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusWord;
    use crate::transport::mock::ScriptedLink;
    use nix::sys::socket::{
        recv, send, socketpair, AddressFamily, MsgFlags, SockFlag, SockType,
    };
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::thread;

    fn scripted(responses: &[&'static str]) -> Card {
        Card::with_link(
            Box::new(ScriptedLink::new(responses.iter().copied())),
            &Config::default(),
        )
    }

    #[test]
    fn test_list_readers() -> Result<()> {
        let ctx = Context::establish()?;
        assert_eq!(ctx.list_readers().collect::<Vec<_>>(), vec!["Unix Socket Reader"]);
        // "Unix Socket Reader\0\0"
        assert_eq!(ctx.list_readers_len(), 20);
        ctx.release()
    }

    #[test]
    fn test_transmit_vec_is_not_bounded_by_fragment_len() -> Result<()> {
        let config = Config::new().with_max_fragment_len(64);
        let mut card = Card::with_link(
            Box::new(ScriptedLink::new([
                "6120",
                "0000000000000000000000000000000000000000000000000000000000000000\
                 6120",
                "1111111111111111111111111111111111111111111111111111111111111111\
                 9000",
            ])),
            &config,
        );
        let (rsp, outcome) = card.transmit_vec(&[0x00, 0xCA, 0x00, 0x00, 0x00])?;
        assert_eq!(outcome, Outcome::Complete { len: 66 });
        assert_eq!(rsp.len(), 66);
        assert_eq!(rsp[32], 0x11);
        Ok(())
    }

    #[test]
    fn test_disconnect_twice() -> Result<()> {
        let mut card = scripted(&[]);
        assert!(card.is_connected());
        card.disconnect()?;
        assert!(!card.is_connected());
        assert!(matches!(card.disconnect(), Err(Error::NotInitialized)));
        Ok(())
    }

    #[test]
    fn test_transmit_after_disconnect() -> Result<()> {
        let mut card = scripted(&["9000"]);
        card.disconnect()?;
        let mut rsp = [0; 16];
        assert!(matches!(
            card.transmit(&[0x00, 0x70, 0x00, 0x00], &mut rsp),
            Err(Error::NotInitialized)
        ));
        Ok(())
    }

    #[test]
    fn test_severed_connection_stays_severed() -> Result<()> {
        let mut card = scripted(&[]);
        let mut rsp = [0; 16];
        assert!(matches!(
            card.transmit(&[0x00, 0x70, 0x00, 0x00], &mut rsp),
            Err(Error::Closed)
        ));
        assert!(matches!(
            card.transmit(&[0x00, 0x70, 0x00, 0x00], &mut rsp),
            Err(Error::Closed)
        ));
        // Disconnect still works.
        card.disconnect()
    }

    #[test]
    fn test_usable_after_input_error() -> Result<()> {
        let mut card = scripted(&["9000"]);
        let mut rsp = [0; 16];
        assert!(matches!(
            card.transmit(&[0x00, 0x70], &mut rsp),
            Err(Error::UnrecognizedCommand(_))
        ));
        assert_eq!(card.transmit(&[0x00, 0x70, 0x00, 0x00], &mut rsp)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_stream_card() -> Result<()> {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(&[0x3B, 0x80, 0x80, 0x01, 0x01]).unwrap();

        let emulator = thread::spawn(move || {
            let mut buf = [0; 64];
            let n = theirs.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], &[0x00, 0xCA, 0x9F, 0x7F, 0x00]);
            theirs.write_all(&[0x61, 0x05]).unwrap();

            let n = theirs.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], &[0x00, 0xC0, 0x00, 0x00, 0x05]);
            theirs
                .write_all(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x90, 0x00])
                .unwrap();
        });

        let ctx = Context::establish()?;
        let mut card = ctx.connect(std::os::fd::OwnedFd::from(ours), Protocol::Any)?;
        assert_eq!(card.atr(), &[0x3B, 0x80, 0x80, 0x01, 0x01]);
        assert_eq!(card.framing(), Some(Framing::Stream));
        assert_eq!(card.logical_channel(), 0);

        let (rsp, outcome) = card.transmit_vec(&[0x00, 0xCA, 0x9F, 0x7F, 0x00])?;
        assert_eq!(outcome, Outcome::Complete { len: 7 });
        assert_eq!(rsp, vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x90, 0x00]);

        emulator.join().unwrap();
        card.disconnect()
    }

    #[test]
    fn test_stream_card_by_path() -> Result<()> {
        let path = std::env::temp_dir().join(format!("cardsock-test-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let emulator = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0; 64];
            let n = conn.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], &[0x00, 0xA4, 0x04, 0x00, 0x01, 0xA0]);
            conn.write_all(&[0x6A, 0x82]).unwrap();
        });

        let ctx = Context::with_config(Config::new().with_probe_atr(false));
        let mut card = ctx.connect(path.clone(), Protocol::T1)?;
        let mut rsp = [0; 258];
        let outcome = card.transmit(&[0x00, 0xA4, 0x04, 0x00, 0x01, 0xA0], &mut rsp)?;
        assert_eq!(
            outcome,
            Outcome::Status {
                len: 2,
                sw: StatusWord(0x6A82)
            }
        );

        emulator.join().unwrap();
        let _ = std::fs::remove_file(&path);
        card.disconnect()
    }

    #[test]
    fn test_packet_card() -> Result<()> {
        let (ours, theirs) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )?;
        send(theirs.as_raw_fd(), &[0x3B, 0x02, 0x14, 0x50], MsgFlags::empty())?;

        let emulator = thread::spawn(move || {
            let mut buf = [0; 64];
            let n = recv(theirs.as_raw_fd(), &mut buf, MsgFlags::empty()).unwrap();
            // Whole command, Le included.
            assert_eq!(&buf[..n], &[0x80, 0xCA, 0x00, 0x00, 0x01, 0x01, 0x00]);
            send(theirs.as_raw_fd(), &[0x01, 0x02, 0x90, 0x00], MsgFlags::empty()).unwrap();
        });

        let ctx = Context::with_config(Config::new().with_framing(Framing::Packet));
        let mut card = ctx.connect(ours, Protocol::Any)?;
        assert_eq!(card.atr(), &[0x3B, 0x02, 0x14, 0x50]);

        let (rsp, outcome) = card.transmit_vec(&[0x80, 0xCA, 0x00, 0x00, 0x01, 0x01, 0x00])?;
        assert!(outcome.is_complete());
        assert_eq!(rsp, vec![0x01, 0x02, 0x90, 0x00]);

        emulator.join().unwrap();
        card.disconnect()
    }

    #[test]
    fn test_connect_rejects_unconnected_socket() {
        let path = std::env::temp_dir().join(format!("cardsock-unconn-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let fd = std::os::fd::OwnedFd::from(listener);
        match Context::establish().unwrap().connect(fd, Protocol::Any) {
            Err(Error::InvalidTransport(_)) => (),
            v => panic!("wrong result: {:?}", v),
        }
        let _ = std::fs::remove_file(&path);
    }
}
