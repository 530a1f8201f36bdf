//! Minimal cursor-based reader for the subset of ASN.1 DER used by wrapped keys and their
//! authorization lists.
//!
//! Each `read_<kind>_length` method checks the universal tag byte, decodes the length that follows
//! and leaves the cursor positioned at the start of the content.  Lengths are accepted in short
//! form, in the one-byte `0x81` form and in the two-byte `0x82` form; anything longer is
//! rejected, as is a length that runs past the end of the remaining input.  No method allocates.

use crate::{km_err, Error};

/// Universal tag for INTEGER.
pub const TAG_INTEGER: u8 = 0x02;
/// Universal tag for OCTET STRING.
pub const TAG_OCTET_STRING: u8 = 0x04;
/// Universal tag for NULL.
pub const TAG_NULL: u8 = 0x05;
/// Universal tag for ENUMERATED.
pub const TAG_ENUMERATED: u8 = 0x0a;
/// Universal tag for BOOLEAN.
pub const TAG_BOOLEAN: u8 = 0x01;
/// Constructed universal tag for SEQUENCE.
pub const TAG_SEQUENCE: u8 = 0x30;
/// Constructed universal tag for SET.
pub const TAG_SET: u8 = 0x31;

/// First byte of a constructed, context-specific tag with number 0.
const EXPLICIT_TAG_BASE: u8 = 0xa0;
/// First byte of a constructed, context-specific tag using the high-tag-number form.
const EXPLICIT_TAG_HIGH_FORM: u8 = 0xbf;

/// Reasons for a DER decoding failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerError {
    /// Input ended before the item did.
    Truncated,
    /// Tag byte other than the one expected.
    UnexpectedTag { want: u8, got: u8 },
    /// Length encoding other than short form, `0x81` or `0x82`.
    UnsupportedLength(u8),
    /// Declared length exceeds the remaining input.
    LengthOverrun { len: usize, remaining: usize },
    /// Malformed context-specific tag.
    InvalidExplicitTag,
    /// Content bytes differ from the fixed value expected.
    UnexpectedContent,
}

impl From<DerError> for Error {
    fn from(e: DerError) -> Self {
        km_err!(InvalidArgument, "malformed DER: {:?}", e)
    }
}

/// Cursor over DER-encoded data.
#[derive(Clone, Copy, Debug)]
pub struct DerReader<'a> {
    data: &'a [u8],
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Unconsumed input.
    pub fn rest(&self) -> &'a [u8] {
        self.data
    }

    /// Next byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.data.first().copied()
    }

    fn read_u8(&mut self) -> Result<u8, DerError> {
        match self.data.split_first() {
            Some((b, rest)) => {
                self.data = rest;
                Ok(*b)
            }
            None => Err(DerError::Truncated),
        }
    }

    /// Consume and return the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], DerError> {
        if len > self.data.len() {
            return Err(DerError::Truncated);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    /// Consume `want` exactly, failing if the input holds anything else at this point.
    pub fn expect_bytes(&mut self, want: &[u8]) -> Result<(), DerError> {
        if self.data.len() < want.len() {
            return Err(DerError::Truncated);
        }
        if &self.data[..want.len()] != want {
            return Err(DerError::UnexpectedContent);
        }
        self.data = &self.data[want.len()..];
        Ok(())
    }

    /// Decode a length, which must not exceed the bytes remaining after it.
    pub fn read_length(&mut self) -> Result<usize, DerError> {
        let first = self.read_u8()?;
        let len = match first {
            0x00..=0x7f => first as usize,
            0x81 => self.read_u8()? as usize,
            0x82 => {
                let hi = self.read_u8()? as usize;
                let lo = self.read_u8()? as usize;
                (hi << 8) | lo
            }
            other => return Err(DerError::UnsupportedLength(other)),
        };
        if len > self.data.len() {
            return Err(DerError::LengthOverrun { len, remaining: self.data.len() });
        }
        Ok(len)
    }

    fn read_tagged_length(&mut self, tag: u8) -> Result<usize, DerError> {
        match self.peek() {
            None => return Err(DerError::Truncated),
            Some(got) if got != tag => return Err(DerError::UnexpectedTag { want: tag, got }),
            Some(_) => {}
        }
        self.data = &self.data[1..];
        self.read_length()
    }

    /// Read the header of an INTEGER.  A single leading zero byte (sign padding) is skipped and
    /// excluded from the returned length.
    pub fn read_integer_length(&mut self) -> Result<usize, DerError> {
        let len = self.read_tagged_length(TAG_INTEGER)?;
        if len >= 1 && self.data[0] == 0x00 {
            self.data = &self.data[1..];
            return Ok(len - 1);
        }
        Ok(len)
    }

    pub fn read_octet_string_length(&mut self) -> Result<usize, DerError> {
        self.read_tagged_length(TAG_OCTET_STRING)
    }

    pub fn read_sequence_length(&mut self) -> Result<usize, DerError> {
        self.read_tagged_length(TAG_SEQUENCE)
    }

    pub fn read_set_length(&mut self) -> Result<usize, DerError> {
        self.read_tagged_length(TAG_SET)
    }

    /// Read the header of a constructed context-specific tag, returning the tag number and the
    /// content length.
    ///
    /// Tag numbers 0..=30 use the single byte `0xa0 + n`.  Larger numbers use the `0xbf` lead
    /// byte followed by either one byte (31..=127) or two base-128 bytes.
    pub fn read_explicit_tag_and_length(&mut self) -> Result<(u32, usize), DerError> {
        let first = self.read_u8()?;
        let tag = match first {
            EXPLICIT_TAG_BASE..=0xbe => (first - EXPLICIT_TAG_BASE) as u32,
            EXPLICIT_TAG_HIGH_FORM => {
                let b = self.read_u8()?;
                if b < 0x80 {
                    if b < 31 {
                        // Short numbers must use the single-byte form.
                        return Err(DerError::InvalidExplicitTag);
                    }
                    b as u32
                } else {
                    let lo = self.read_u8()?;
                    128 * (b as u32 - 128) + lo as u32
                }
            }
            _ => return Err(DerError::InvalidExplicitTag),
        };
        let len = self.read_length()?;
        Ok((tag, len))
    }

    /// Read a complete OCTET STRING and return its content.
    pub fn read_octet_string(&mut self) -> Result<&'a [u8], DerError> {
        let len = self.read_octet_string_length()?;
        self.take(len)
    }

    /// Read a complete INTEGER and return its content, minus any sign padding byte.
    pub fn read_integer(&mut self) -> Result<&'a [u8], DerError> {
        let len = self.read_integer_length()?;
        self.take(len)
    }

    /// Read a SEQUENCE header and return a reader over exactly its content.
    pub fn read_sequence(&mut self) -> Result<DerReader<'a>, DerError> {
        let len = self.read_sequence_length()?;
        Ok(DerReader::new(self.take(len)?))
    }
}
