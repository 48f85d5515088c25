//! Smart card APDU transport over a local Unix domain socket.
//!
//! Instead of talking to a physical reader, commands go to a card emulator listening on
//! an `AF_UNIX` socket. On a `SOCK_STREAM` socket, the card's procedure bytes (61XX,
//! 6CXX, 9FXX) are answered here, so callers only ever see complete responses.

pub mod buffer;
pub mod card;
pub mod case;
pub mod chain;
pub mod config;
pub mod errors;
pub mod status;
pub mod transport;

pub use crate::card::{Card, Context, Protocol, READER_NAME};
pub use crate::case::{Case, Command};
pub use crate::config::{Config, Framing};
pub use crate::errors::{stringify_error, Error, Result};
pub use crate::status::{Outcome, Status, StatusWord};
pub use crate::transport::Endpoint;
