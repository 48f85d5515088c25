//! ISO 7816-4 command case classification (short form only).
//!
//! ```text
//! Case 1: CLA INS P1 P2
//! Case 2: CLA INS P1 P2 Le
//! Case 3: CLA INS P1 P2 Lc [data; Lc]
//! Case 4: CLA INS P1 P2 Lc [data; Lc] Le
//! ```

use crate::{Error, Result};
use nom::number::complete::be_u8;
use nom::sequence::tuple;
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub type IResult<'a, T> = nom::IResult<&'a [u8], T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Case {
    /// No command data, no response data.
    One = 1,
    /// No command data, response data expected.
    Two = 2,
    /// Command data, no response data.
    Three = 3,
    /// Command data, response data expected.
    Four = 4,
}

impl Case {
    /// Only cases expecting response data follow 61XX/6CXX procedure bytes in a loop.
    pub fn expects_response(&self) -> bool {
        matches!(self, Self::Two | Self::Four)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}

fn parse_header(input: &[u8]) -> IResult<Header> {
    let (input, (cla, ins, p1, p2)) = tuple((be_u8, be_u8, be_u8, be_u8))(input)?;
    Ok((input, Header { cla, ins, p1, p2 }))
}

/// A classified command APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub raw: &'a [u8],
    pub header: Header,
    pub case: Case,
    /// Declared command data length; 0 for cases 1 and 2.
    pub lc: u8,
    /// Declared expected response length byte; None for cases 1 and 3.
    pub le: Option<u8>,
}

impl<'a> Command<'a> {
    pub fn classify(raw: &'a [u8]) -> Result<Self> {
        let unrecognized = || Error::UnrecognizedCommand(raw.to_vec());
        let (body, header) = parse_header(raw).map_err(|_| unrecognized())?;

        let (case, lc, le) = match body {
            [] => (Case::One, 0, None),
            [le] => (Case::Two, 0, Some(*le)),
            [lc, rest @ ..] => match rest.len().checked_sub(*lc as usize) {
                _ if *lc == 0 => return Err(unrecognized()),
                Some(0) => (Case::Three, *lc, None),
                Some(1) => (Case::Four, *lc, rest.last().copied()),
                _ => return Err(unrecognized()),
            },
        };
        Ok(Self {
            raw,
            header,
            case,
            lc,
            le,
        })
    }

    /// Bytes sent on the first leg. Case 4 goes out without its Le; the stream
    /// transport frames exactly what it's given, and the card asks for the rest.
    pub fn first_leg(&self) -> &'a [u8] {
        match self.case {
            Case::Four => &self.raw[..self.raw.len() - 1],
            _ => self.raw,
        }
    }

    /// Header, Lc and command data, without any Le.
    pub fn without_le(&self) -> &'a [u8] {
        match self.case {
            Case::Two | Case::Four => &self.raw[..self.raw.len() - 1],
            Case::One | Case::Three => self.raw,
        }
    }

    /// Expected response length in bytes, where an Le byte of 0 means 256.
    pub fn ne(&self) -> Option<usize> {
        self.le.map(ne)
    }
}

/// Decodes a short-form Le (or SW2 of a procedure byte) into a byte count.
pub fn ne(le: u8) -> usize {
    match le {
        0 => 256,
        n => n as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_1() -> Result<()> {
        let cmd = Command::classify(&[0x00, 0x70, 0x80, 0x01])?;
        assert_eq!(cmd.case, Case::One);
        assert_eq!(
            cmd.header,
            Header {
                cla: 0x00,
                ins: 0x70,
                p1: 0x80,
                p2: 0x01
            }
        );
        assert_eq!(cmd.le, None);
        assert_eq!(cmd.first_leg(), &[0x00, 0x70, 0x80, 0x01]);
        Ok(())
    }

    #[test]
    fn test_case_2() -> Result<()> {
        let cmd = Command::classify(&[0x00, 0xB0, 0x00, 0x00, 0x0A])?;
        assert_eq!(cmd.case, Case::Two);
        assert_eq!(cmd.lc, 0);
        assert_eq!(cmd.le, Some(0x0A));
        assert_eq!(cmd.first_leg(), &[0x00, 0xB0, 0x00, 0x00, 0x0A]);
        assert_eq!(cmd.without_le(), &[0x00, 0xB0, 0x00, 0x00]);
        Ok(())
    }

    #[test]
    fn test_case_2_le_zero_is_256() -> Result<()> {
        let cmd = Command::classify(&[0x00, 0xCA, 0x9F, 0x7F, 0x00])?;
        assert_eq!(cmd.ne(), Some(256));
        Ok(())
    }

    #[test]
    fn test_case_3() -> Result<()> {
        let cmd = Command::classify(&[0x00, 0xA4, 0x04, 0x00, 0x02, 0x3F, 0x00])?;
        assert_eq!(cmd.case, Case::Three);
        assert_eq!(cmd.lc, 2);
        assert_eq!(cmd.le, None);
        assert_eq!(cmd.first_leg(), cmd.raw);
        Ok(())
    }

    #[test]
    fn test_case_4() -> Result<()> {
        let raw = [0x00, 0xA4, 0x04, 0x00, 0x02, 0x3F, 0x00, 0x20];
        let cmd = Command::classify(&raw)?;
        assert_eq!(cmd.case, Case::Four);
        assert_eq!(cmd.lc, 2);
        assert_eq!(cmd.le, Some(0x20));
        assert_eq!(cmd.first_leg(), &raw[..7]);
        Ok(())
    }

    #[test]
    fn test_too_short() {
        for raw in [&[][..], &[0x00][..], &[0x00, 0xA4, 0x04][..]] {
            match Command::classify(raw) {
                Err(Error::UnrecognizedCommand(v)) => assert_eq!(v, raw),
                v => panic!("wrong result: {:?}", v),
            }
        }
    }

    #[test]
    fn test_lc_mismatch() {
        // Declares 10 bytes of data, carries 1.
        assert!(matches!(
            Command::classify(&[0x00, 0xA4, 0x04, 0x00, 0x0A, 0x01]),
            Err(Error::UnrecognizedCommand(_))
        ));
        // Declares 1 byte of data, carries 3.
        assert!(matches!(
            Command::classify(&[0x00, 0xA4, 0x04, 0x00, 0x01, 0x01, 0x02, 0x03]),
            Err(Error::UnrecognizedCommand(_))
        ));
    }

    #[test]
    fn test_lc_zero_is_not_short_form() {
        assert!(matches!(
            Command::classify(&[0x00, 0xA4, 0x04, 0x00, 0x00, 0x00]),
            Err(Error::UnrecognizedCommand(_))
        ));
    }

    #[test]
    fn test_case_roundtrips_through_u8() {
        assert_eq!(u8::from(Case::Four), 4);
        assert_eq!(Case::try_from(2u8).unwrap(), Case::Two);
        assert!(Case::try_from(5u8).is_err());
    }
}
