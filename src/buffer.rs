use crate::status::StatusWord;
use crate::{Error, Result};

/// Assembles a response from one or more fragments, each ending in a status word.
///
/// Data from every fragment is concatenated; only the status word of the most recent
/// fragment is kept, directly after the data. The total never exceeds `capacity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    buf: Vec<u8>,
    /// Where the pending status word starts, ie. the amount of data collected.
    offset: usize,
    capacity: usize,
}

impl Accumulator {
    /// Starts a response from its first fragment.
    pub fn start(capacity: usize, fragment: &[u8]) -> Result<Self> {
        let mut slf = Self {
            buf: Vec::with_capacity(capacity.min(fragment.len().max(2))),
            offset: 0,
            capacity,
        };
        slf.append(fragment)?;
        Ok(slf)
    }

    /// Appends a fragment, replacing the pending status word with the fragment's.
    pub fn append(&mut self, fragment: &[u8]) -> Result<()> {
        let (data, sw) = split(fragment)?;
        self.write(data, sw)
    }

    /// Appends at most `keep` bytes of the fragment's data, followed by its status word.
    pub fn truncate_and_append_status(&mut self, fragment: &[u8], keep: usize) -> Result<()> {
        let (data, sw) = split(fragment)?;
        self.write(&data[..keep.min(data.len())], sw)
    }

    fn write(&mut self, data: &[u8], sw: StatusWord) -> Result<()> {
        let needed = self.offset + data.len() + 2;
        if needed > self.capacity {
            return Err(Error::BufferTooSmall {
                needed,
                capacity: self.capacity,
            });
        }
        self.buf.truncate(self.offset);
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(&sw.to_bytes());
        self.offset += data.len();
        Ok(())
    }

    pub fn status(&self) -> StatusWord {
        StatusWord::new(self.buf[self.offset], self.buf[self.offset + 1])
    }

    /// Data plus status word.
    pub fn len(&self) -> usize {
        self.offset + 2
    }

    /// Data plus status word.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Copies the assembled response into `out`, returning the number of bytes written.
    pub fn copy_into(&self, out: &mut [u8]) -> Result<usize> {
        let len = self.len();
        let capacity = out.len();
        let dst = out.get_mut(..len).ok_or(Error::BufferTooSmall {
            needed: len,
            capacity,
        })?;
        dst.copy_from_slice(self.as_bytes());
        Ok(len)
    }
}

/// Splits a fragment into its data and trailing status word.
fn split(fragment: &[u8]) -> Result<(&[u8], StatusWord)> {
    let sw = StatusWord::from_trailer(fragment).ok_or(Error::ShortResponse(fragment.len()))?;
    Ok((&fragment[..fragment.len() - 2], sw))
}
