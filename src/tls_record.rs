//! # TLS record layer framing
//!
//! [RFC 2246 section 6.2](https://datatracker.ietf.org/doc/html/rfc2246#section-6.2)
use crate::error::DecodeError;
use crate::extensions::ByteSerializable;
use crate::handshake::ProtocolVersion;
use crate::parser::ByteParser;
use log::debug;

/// Size of the fixed record header: type, version and length.
pub const RECORD_HEADER_LEN: usize = 5;
/// Largest plaintext fragment a record may carry.
pub const MAX_FRAGMENT_LEN: usize = 1 << 14;
/// Largest protected fragment: plaintext plus MAC and padding overhead.
pub const MAX_PROTECTED_FRAGMENT_LEN: usize = MAX_FRAGMENT_LEN + 2048;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl TryFrom<u8> for ContentType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            e => Err(DecodeError::UnknownContentType(e)),
        }
    }
}

/// A single TLS record. The length field on the wire is always derived from
/// `fragment`, so an encoded record is exactly `5 + fragment.len()` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TLSRecord {
    pub record_type: ContentType,
    pub version: ProtocolVersion,
    pub fragment: Vec<u8>,
}

impl TLSRecord {
    #[must_use]
    pub fn new(record_type: ContentType, version: ProtocolVersion, fragment: Vec<u8>) -> Self {
        Self {
            record_type,
            version,
            fragment,
        }
    }

    /// Length of the fragment as written in the header.
    #[must_use]
    pub fn length(&self) -> usize {
        self.fragment.len()
    }
}

impl ByteSerializable for TLSRecord {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        if self.fragment.len() > MAX_PROTECTED_FRAGMENT_LEN {
            return None;
        }
        let mut bytes = Vec::with_capacity(RECORD_HEADER_LEN + self.fragment.len());
        bytes.push(self.record_type as u8);
        bytes.extend_from_slice(&self.version.to_be_bytes());
        bytes.extend_from_slice(&u16::try_from(self.fragment.len()).ok()?.to_be_bytes());
        bytes.extend_from_slice(&self.fragment);
        Some(bytes)
    }

    /// Decodes exactly one record; the parser must hold nothing but that record.
    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(DecodeError::TooShort {
                field: "record header",
                needed: RECORD_HEADER_LEN,
                available: bytes.len(),
            });
        }
        let record_type = ContentType::try_from(bytes.expect_u8("record type")?)?;
        let version = bytes.expect_u16("record version")?;
        let length = bytes.expect_u16("record length")? as usize;
        if length > MAX_PROTECTED_FRAGMENT_LEN {
            return Err(DecodeError::RecordOverflow(length));
        }
        if length != bytes.len() {
            return Err(DecodeError::LengthMismatch {
                field: "record",
                declared: length,
                actual: bytes.len(),
            });
        }
        let fragment = bytes.drain();
        debug!(
            "Decoded {:?} record, version {:#06x}, {} bytes",
            record_type, version, length
        );
        Ok(Box::new(TLSRecord {
            record_type,
            version,
            fragment,
        }))
    }
}

/// Returns the total size of the first record in `buffer` when its header is
/// complete, so stream readers know how many bytes to wait for.
#[must_use]
pub fn record_size(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < RECORD_HEADER_LEN {
        return None;
    }
    let length = u16::from_be_bytes([buffer[3], buffer[4]]) as usize;
    Some(RECORD_HEADER_LEN + length)
}

/// [ChangeCipherSpec](https://datatracker.ietf.org/doc/html/rfc2246#section-7.1)
/// carries a single byte of value 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ChangeCipherSpec;

impl ChangeCipherSpec {
    pub const VALUE: u8 = 0x01;
}

impl ByteSerializable for ChangeCipherSpec {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        Some(vec![Self::VALUE])
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        if bytes.len() != 1 {
            return Err(DecodeError::InvalidChangeCipherSpec);
        }
        match bytes.expect_u8("change cipher spec")? {
            Self::VALUE => Ok(Box::new(ChangeCipherSpec)),
            value => Err(DecodeError::InvalidFixedByte {
                field: "change cipher spec",
                value: u16::from(value),
            }),
        }
    }
}
