//! Drives one command/response exchange, following the card's procedure bytes.
//!
//! Cards that can't fit their answer into the first response (T=0 style) reply with:
//!
//! - `61XX` / `9FXX`: XX bytes are waiting; fetch them with GET RESPONSE (Le=XX).
//! - `6CXX`: Le was wrong; send the same command again with Le=XX.
//!
//! Every fragment's data is appended to the response, the status word of the last
//! fragment terminates it.

use crate::buffer::Accumulator;
use crate::case::{ne, Case, Command};
use crate::status::{Outcome, Procedure, StatusWord};
use crate::transport::Link;
use crate::{Error, Result};
use tracing::{debug, trace, trace_span, warn};

/// INS byte of GET RESPONSE.
pub const INS_GET_RESPONSE: u8 = 0xC0;

/// What goes out on the next leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound<'a> {
    /// The caller's command; Case 4 without its Le.
    Original(&'a [u8]),
    /// The caller's command with a corrected Le.
    Retry(Vec<u8>),
    /// GET RESPONSE, fetching Le bytes the card is holding on to.
    GetResponse([u8; 5]),
}

impl<'a> Outbound<'a> {
    pub fn first(cmd: &Command<'a>) -> Self {
        Self::Original(cmd.first_leg())
    }

    pub fn get_response(le: u8) -> Self {
        Self::GetResponse([0x00, INS_GET_RESPONSE, 0x00, 0x00, le])
    }

    /// The same request again, with Le replaced.
    pub fn with_le(&self, cmd: &Command<'a>, le: u8) -> Self {
        match self {
            Self::GetResponse(_) => Self::get_response(le),
            Self::Original(_) | Self::Retry(_) => {
                let mut req = cmd.without_le().to_vec();
                req.push(le);
                Self::Retry(req)
            }
        }
    }

    pub fn is_get_response(&self) -> bool {
        matches!(self, Self::GetResponse(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Original(v) => v,
            Self::Retry(v) => v,
            Self::GetResponse(v) => v,
        }
    }
}

/// Most legs a single exchange may take after the first. Enough for 64KiB of 61XX
/// chaining; a card that keeps asking for more is broken.
pub const MAX_LEGS: usize = 256;

/// Sends a command APDU and assembles the complete response into `response`, whose
/// length is the capacity. Returns the number of bytes written and the status word.
pub fn transmit(
    link: &mut dyn Link,
    command: &[u8],
    response: &mut [u8],
    max_fragment_len: usize,
) -> Result<Outcome> {
    let acc = assemble(link, command, response.len(), max_fragment_len)?;
    let len = acc.copy_into(response)?;
    Ok(Outcome::new(len, acc.status()))
}

/// Like `transmit()`, but collects however much the card sends.
pub fn transmit_vec(
    link: &mut dyn Link,
    command: &[u8],
    max_fragment_len: usize,
) -> Result<(Vec<u8>, Outcome)> {
    let acc = assemble(link, command, usize::MAX, max_fragment_len)?;
    let outcome = Outcome::new(acc.len(), acc.status());
    Ok((acc.into_bytes(), outcome))
}

fn assemble(
    link: &mut dyn Link,
    command: &[u8],
    capacity: usize,
    max_fragment_len: usize,
) -> Result<Accumulator> {
    let span = trace_span!("transmit");
    let _enter = span.enter();

    let cmd = Command::classify(command)?;
    debug!(case = ?cmd.case, lc = cmd.lc, le = ?cmd.le, "Classified command");
    let mut scratch = vec![0; max_fragment_len];

    // Framed links carry whole APDUs; the emulator deals with Le itself.
    if !link.chaining() {
        let n = exchange(link, command, &mut scratch)?;
        return Accumulator::start(capacity, &scratch[..n]);
    }

    let mut out = Outbound::first(&cmd);
    let n = exchange(link, out.as_bytes(), &mut scratch)?;
    let mut acc = Accumulator::start(capacity, &scratch[..n])?;

    if let (true, Some(mut le)) = (cmd.case.expects_response(), cmd.ne()) {
        let mut legs = 0;
        loop {
            let sw = acc.status();
            out = match sw.procedure() {
                Procedure::RetryWithLe => {
                    debug!("== RETR: Retrying with Le={}", sw.sw2());
                    out.with_le(&cmd, sw.sw2())
                }
                Procedure::BytesRemaining | Procedure::ResponseAvailable => {
                    debug!("== RESP: GET RESPONSE with Le={}", sw.sw2());
                    Outbound::get_response(sw.sw2())
                }
                Procedure::Final(_) => break,
            };
            legs += 1;
            if legs > MAX_LEGS {
                warn!(%sw, "Card is still chaining after {} legs, giving up", MAX_LEGS);
                return Err(Error::ChainTooLong(MAX_LEGS));
            }
            let la = ne(sw.sw2());

            let n = exchange(link, out.as_bytes(), &mut scratch)?;
            let fragment = &scratch[..n];

            // Some cards answer a chained GET RESPONSE with "class not supported"
            // instead of the data. What came before is useless without the rest.
            if cmd.case == Case::Four
                && out.is_get_response()
                && StatusWord::from_trailer(fragment) == Some(StatusWord::CLASS_NOT_SUPPORTED)
            {
                warn!("GET RESPONSE rejected with 6E00, discarding chained response");
                return Err(Error::ChainRejected(StatusWord::CLASS_NOT_SUPPORTED));
            }

            if le < la {
                debug!(le, la, "Card offered more than requested, truncating");
                acc.truncate_and_append_status(fragment, le)?;
                break;
            }
            acc.append(fragment)?;
            le = la;
        }
    } else if acc.status().procedure() == Procedure::BytesRemaining {
        // The card has data for a command that didn't ask for any; fetch it once.
        let sw2 = acc.status().sw2();
        debug!("== RESP: Unrequested data, GET RESPONSE with Le={}", sw2);
        let n = exchange(link, Outbound::get_response(sw2).as_bytes(), &mut scratch)?;
        acc.append(&scratch[..n])?;
    }

    debug!(len = acc.len(), sw = %acc.status(), "Exchange complete");
    Ok(acc)
}

fn exchange(link: &mut dyn Link, req: &[u8], scratch: &mut [u8]) -> Result<usize> {
    trace!(req = %hex::encode_upper(req), ">> TX");
    link.send(req)?;
    let n = link.receive(scratch)?;
    trace!(rsp = %hex::encode_upper(&scratch[..n]), "<< RX");
    Ok(n)
}
