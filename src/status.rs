//! Status words (SW1SW2), the two bytes terminating every response APDU.

use byteorder::{BigEndian, ByteOrder};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;

/// SW1 values that ask the terminal to keep talking to the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Procedure {
    /// 0x61XX: XX more bytes are available through GET RESPONSE.
    BytesRemaining = 0x61,
    /// 0x6CXX: Wrong Le; resend the same command with Le=XX.
    RetryWithLe = 0x6C,
    /// 0x9FXX: Like 0x61XX, used by GSM/SIM applications.
    ResponseAvailable = 0x9F,
    /// Anything else is final.
    #[num_enum(catch_all)]
    Final(u8) = 0x00,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const OK: Self = Self(0x9000);
    /// 0x6E00: Class not supported.
    pub const CLASS_NOT_SUPPORTED: Self = Self(0x6E00);

    pub fn new(sw1: u8, sw2: u8) -> Self {
        Self(u16::from_be_bytes([sw1, sw2]))
    }

    /// Reads the trailing status word off a response. Returns None if it's too short.
    pub fn from_trailer(data: &[u8]) -> Option<Self> {
        match data.len() {
            0 | 1 => None,
            l => Some(Self(BigEndian::read_u16(&data[l - 2..]))),
        }
    }

    pub fn sw1(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn sw2(&self) -> u8 {
        self.0 as u8
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    pub fn procedure(&self) -> Procedure {
        Procedure::from(self.sw1())
    }

    pub fn status(&self) -> Status {
        Status::from(self.sw1(), self.sw2())
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord({:04X})", self.0)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Human-readable classification of common ISO 7816-4 status words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 0x9000
    OK,
    /// 0x61XX
    BytesRemaining(u8),
    /// 0x6CXX
    RetryWithLe(u8),
    /// 0x9FXX
    ResponseAvailable(u8),
    /// 0x6282
    EndOfFile,
    /// 0x6283
    SelectedFileDeactivated,
    /// 0x6300
    AuthenticationFailed,
    /// 0x63CX: Counter from 0 to 15 encoded by X.
    Counter(u8),
    /// 0x6581
    MemoryFailure,
    /// 0x6700
    WrongLength,
    /// 0x6881
    ChannelUnsupported,
    /// 0x6882
    SecureMessagingUnsupported,
    /// 0x6982
    SecurityStatus,
    /// 0x6983
    AuthMethodBlocked,
    /// 0x6984
    DataInvalidated,
    /// 0x6985
    ConditionsOfUse,
    /// 0x6A80
    WrongData,
    /// 0x6A81
    FunctionNotSupported,
    /// 0x6A82
    FileNotFound,
    /// 0x6A83
    RecordNotFound,
    /// 0x6A86
    WrongP1P2,
    /// 0x6A88
    DataNotFound,
    /// 0x6B00
    WrongParameters,
    /// 0x6D00
    InstructionNotSupported,
    /// 0x6E00
    ClassNotSupported,
    /// 0x6F00
    NoPreciseDiagnosis,
    /// We've encountered something we don't understand.
    Unknown(u8, u8),
}

impl Status {
    pub fn from(sw1: u8, sw2: u8) -> Self {
        match (sw1, sw2) {
            (0x90, 0x00) => Self::OK,
            (0x61, xx) => Self::BytesRemaining(xx),
            (0x6C, xx) => Self::RetryWithLe(xx),
            (0x9F, xx) => Self::ResponseAvailable(xx),
            (0x62, 0x82) => Self::EndOfFile,
            (0x62, 0x83) => Self::SelectedFileDeactivated,
            (0x63, 0x00) => Self::AuthenticationFailed,
            (0x63, x @ 0xC0..=0xCF) => Self::Counter(x & 0x0F),
            (0x65, 0x81) => Self::MemoryFailure,
            (0x67, 0x00) => Self::WrongLength,
            (0x68, 0x81) => Self::ChannelUnsupported,
            (0x68, 0x82) => Self::SecureMessagingUnsupported,
            (0x69, 0x82) => Self::SecurityStatus,
            (0x69, 0x83) => Self::AuthMethodBlocked,
            (0x69, 0x84) => Self::DataInvalidated,
            (0x69, 0x85) => Self::ConditionsOfUse,
            (0x6A, 0x80) => Self::WrongData,
            (0x6A, 0x81) => Self::FunctionNotSupported,
            (0x6A, 0x82) => Self::FileNotFound,
            (0x6A, 0x83) => Self::RecordNotFound,
            (0x6A, 0x86) => Self::WrongP1P2,
            (0x6A, 0x88) => Self::DataNotFound,
            (0x6B, 0x00) => Self::WrongParameters,
            (0x6D, 0x00) => Self::InstructionNotSupported,
            (0x6E, 0x00) => Self::ClassNotSupported,
            (0x6F, 0x00) => Self::NoPreciseDiagnosis,
            (x, y) => Self::Unknown(x, y),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OK => write!(f, "OK"),
            Self::BytesRemaining(xx) | Self::ResponseAvailable(xx) => {
                write!(f, "{} more bytes available", xx)
            }
            Self::RetryWithLe(xx) => write!(f, "wrong Le, retry with Le={}", xx),
            Self::EndOfFile => write!(f, "end of file reached before reading Le bytes"),
            Self::SelectedFileDeactivated => write!(f, "selected file deactivated"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::Counter(x) => write!(f, "counter: {}", x),
            Self::MemoryFailure => write!(f, "memory failure"),
            Self::WrongLength => write!(f, "wrong length"),
            Self::ChannelUnsupported => write!(f, "logical channel not supported"),
            Self::SecureMessagingUnsupported => write!(f, "secure messaging not supported"),
            Self::SecurityStatus => write!(f, "security status not satisfied"),
            Self::AuthMethodBlocked => write!(f, "authentication method blocked"),
            Self::DataInvalidated => write!(f, "referenced data invalidated"),
            Self::ConditionsOfUse => write!(f, "conditions of use not satisfied"),
            Self::WrongData => write!(f, "incorrect parameters in the command data field"),
            Self::FunctionNotSupported => write!(f, "function not supported"),
            Self::FileNotFound => write!(f, "file or application not found"),
            Self::RecordNotFound => write!(f, "record not found"),
            Self::WrongP1P2 => write!(f, "incorrect parameters P1-P2"),
            Self::DataNotFound => write!(f, "referenced data not found"),
            Self::WrongParameters => write!(f, "wrong parameters P1-P2"),
            Self::InstructionNotSupported => write!(f, "instruction not supported"),
            Self::ClassNotSupported => write!(f, "class not supported"),
            Self::NoPreciseDiagnosis => write!(f, "no precise diagnosis"),
            Self::Unknown(x, y) => write!(f, "unknown status {:02X}{:02X}", x, y),
        }
    }
}

/// Result of a transmission that reached the card. A status other than 0x9000 is still
/// a successful exchange, the card just had something to say about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The card answered 0x9000.
    Complete { len: usize },
    /// The card answered with another status word.
    Status { len: usize, sw: StatusWord },
}

impl Outcome {
    pub fn new(len: usize, sw: StatusWord) -> Self {
        if sw.is_ok() {
            Self::Complete { len }
        } else {
            Self::Status { len, sw }
        }
    }

    /// Bytes written to the response buffer, status word included.
    pub fn len(&self) -> usize {
        match self {
            Self::Complete { len } | Self::Status { len, .. } => *len,
        }
    }

    pub fn status_word(&self) -> StatusWord {
        match self {
            Self::Complete { .. } => StatusWord::OK,
            Self::Status { sw, .. } => *sw,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_trailer() {
        assert_eq!(StatusWord::from_trailer(&[]), None);
        assert_eq!(StatusWord::from_trailer(&[0x90]), None);
        assert_eq!(
            StatusWord::from_trailer(&[0x01, 0x02, 0x6A, 0x82]),
            Some(StatusWord(0x6A82))
        );
    }

    #[test]
    fn test_procedure() {
        assert_eq!(StatusWord(0x6105).procedure(), Procedure::BytesRemaining);
        assert_eq!(StatusWord(0x6C04).procedure(), Procedure::RetryWithLe);
        assert_eq!(StatusWord(0x9F10).procedure(), Procedure::ResponseAvailable);
        assert_eq!(StatusWord::OK.procedure(), Procedure::Final(0x90));
    }

    #[test]
    fn test_status() {
        assert_eq!(StatusWord(0x63C2).status(), Status::Counter(2));
        assert_eq!(StatusWord(0x6A82).status(), Status::FileNotFound);
        assert_eq!(StatusWord(0x1234).status(), Status::Unknown(0x12, 0x34));
        assert_eq!(StatusWord::new(0x6E, 0x00), StatusWord::CLASS_NOT_SUPPORTED);
    }

    #[test]
    fn test_outcome() {
        let ok = Outcome::new(7, StatusWord::OK);
        assert_eq!(ok, Outcome::Complete { len: 7 });
        assert!(ok.is_complete());

        let err = Outcome::new(2, StatusWord(0x6982));
        assert_eq!(err.len(), 2);
        assert_eq!(err.status_word(), StatusWord(0x6982));
        assert!(!err.is_complete());
    }
}
