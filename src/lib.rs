//! # tls10probe
//!
//! TLS 1.0 client handshake engine with per-state observers, PKCS#1 v1.5
//! padding-oracle classification and the Bleichenbacher attack built on top.
pub mod alert;
pub mod bleichenbacher;
pub mod certificate;
pub mod config;
pub mod crypto;
pub mod display;
pub mod error;
pub mod extensions;
pub mod fingerprint;
pub mod handshake;
#[cfg(test)]
mod loopback;
pub mod network_oracle;
pub mod oracle;
pub mod parser;
pub mod report;
pub mod rsa;
pub mod security_params;
pub mod tls_record;
pub mod trace;
pub mod transport;
pub mod workflow;

use crate::error::DecodeError;
use crate::extensions::ByteSerializable;
use crate::parser::ByteParser;
use crate::tls_record::{record_size, TLSRecord, RECORD_HEADER_LEN};

/// Splits a buffer of back-to-back records into individual `TLSRecord`s.
///
/// # Errors
/// Fails when the last record is truncated or any record header is invalid.
pub fn get_records(buffer: &[u8]) -> Result<Vec<TLSRecord>, DecodeError> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let rest = &buffer[offset..];
        let Some(size) = record_size(rest) else {
            return Err(DecodeError::TooShort {
                field: "record header",
                needed: RECORD_HEADER_LEN,
                available: rest.len(),
            });
        };
        if size > rest.len() {
            return Err(DecodeError::LengthMismatch {
                field: "record",
                declared: size - RECORD_HEADER_LEN,
                actual: rest.len() - RECORD_HEADER_LEN,
            });
        }
        let record = TLSRecord::from_bytes(&mut ByteParser::from(&rest[..size]))?;
        records.push(*record);
        offset += size;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::TLS_VERSION_1_0;
    use crate::tls_record::ContentType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_get_records() {
        let mut buffer = TLSRecord::new(ContentType::Handshake, TLS_VERSION_1_0, vec![0x0E, 0, 0, 0])
            .as_bytes()
            .unwrap();
        buffer.extend(
            TLSRecord::new(ContentType::Alert, TLS_VERSION_1_0, vec![0x02, 0x28])
                .as_bytes()
                .unwrap(),
        );
        let records = get_records(&buffer).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, ContentType::Handshake);
        assert_eq!(records[1].fragment, vec![0x02, 0x28]);

        buffer.extend_from_slice(&[0x15, 0x03, 0x01, 0x00, 0x02, 0x02]);
        assert!(matches!(
            get_records(&buffer),
            Err(DecodeError::LengthMismatch { .. })
        ));
        assert_eq!(get_records(&[]).unwrap(), vec![]);
    }
}
