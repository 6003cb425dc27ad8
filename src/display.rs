//! Human readable presentation of handshake messages and byte strings.
use crate::error::DecodeError;
use crate::extensions::{Extension, ExtensionData};
use crate::handshake::{ClientHello, ClientKeyExchange, HandshakeMessage, ServerHello, ServerKeyExchange};
use std::fmt;

/// Lowercase hex without separators.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parses a hex string, ignoring an optional `0x` prefix and whitespace.
///
/// # Errors
/// `Malformed` on an odd number of digits or a non-hex character.
pub fn from_hex(input: &str) -> Result<Vec<u8>, DecodeError> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    hex::decode(digits).map_err(|e| match e {
        hex::FromHexError::OddLength => DecodeError::Malformed("hex string of odd length"),
        _ => DecodeError::Malformed("hex digit"),
    })
}

fn write_extensions(f: &mut fmt::Formatter<'_>, extensions: Option<&Vec<Extension>>) -> fmt::Result {
    let Some(extensions) = extensions else {
        return writeln!(f, "  Extensions: none");
    };
    writeln!(f, "  Extensions ({}):", extensions.len())?;
    for extension in extensions {
        match &extension.extension_data {
            ExtensionData::ServerName(list) => {
                for name in &list.server_name_list {
                    writeln!(f, "    server_name: {name}")?;
                }
            }
            ExtensionData::EllipticCurves(curves) => {
                let names: Vec<String> = curves.named_curve_list.iter().map(ToString::to_string).collect();
                writeln!(f, "    elliptic_curves: {}", names.join(", "))?;
            }
            ExtensionData::EcPointFormats(formats) => {
                writeln!(f, "    ec_point_formats: {:?}", formats.formats)?;
            }
            other => writeln!(f, "    {:#06x}: {other:?}", extension.extension_type)?,
        }
    }
    Ok(())
}

impl fmt::Display for ClientHello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ClientHello, version {:#06x}", self.client_version)?;
        writeln!(f, "  Random: {}", to_hex(&self.random))?;
        writeln!(f, "  Session ID: {}", to_hex(&self.session_id))?;
        writeln!(f, "  Cipher Suites:")?;
        for suite in &self.cipher_suites {
            writeln!(f, "    {suite}")?;
        }
        writeln!(f, "  Compression Methods: {:?}", self.compression_methods)?;
        write_extensions(f, self.extensions.as_ref())
    }
}

impl fmt::Display for ServerHello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ServerHello, version {:#06x}", self.server_version)?;
        writeln!(f, "  Random: {}", to_hex(&self.random))?;
        writeln!(f, "  Session ID: {}", to_hex(&self.session_id))?;
        writeln!(f, "  Cipher Suite: {}", self.cipher_suite)?;
        writeln!(f, "  Compression Method: {}", self.compression_method)?;
        write_extensions(f, self.extensions.as_ref())
    }
}

/// One line summaries, used for trace listings.
impl fmt::Display for HandshakeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeMessage::ClientHello(hello) => {
                write!(f, "ClientHello ({} cipher suites)", hello.cipher_suites.len())
            }
            HandshakeMessage::ServerHello(hello) => write!(f, "ServerHello ({})", hello.cipher_suite),
            HandshakeMessage::Certificate(certificate) => write!(
                f,
                "Certificate ({} certificates)",
                certificate.certificate_list.len()
            ),
            HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Dh { params, .. }) => {
                write!(f, "ServerKeyExchange (DH, {} bit prime)", params.dh_p.len() * 8)
            }
            HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Ecdh { params, .. }) => write!(
                f,
                "ServerKeyExchange (ECDH, {})",
                params.curve_params.named_curve
            ),
            HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Opaque(body)) => {
                write!(f, "ServerKeyExchange ({} bytes)", body.len())
            }
            HandshakeMessage::ServerHelloDone => write!(f, "ServerHelloDone"),
            HandshakeMessage::ClientKeyExchange(ClientKeyExchange::EncryptedPreMasterSecret(pms)) => {
                write!(f, "ClientKeyExchange (RSA, {} bytes)", pms.len())
            }
            HandshakeMessage::ClientKeyExchange(ClientKeyExchange::DhPublic(yc)) => {
                write!(f, "ClientKeyExchange (DH, {} bytes)", yc.len())
            }
            HandshakeMessage::ClientKeyExchange(ClientKeyExchange::EcdhPublic(point)) => {
                write!(f, "ClientKeyExchange (ECDH, {} bytes)", point.point.len())
            }
            HandshakeMessage::Finished(finished) => {
                write!(f, "Finished ({})", to_hex(&finished.verify_data))
            }
            HandshakeMessage::Unparsed(msg_type, body) => {
                write!(f, "{msg_type:?} ({} bytes)", body.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{cipher_suites, TLS_VERSION_1_0};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hex_round_trip() {
        assert_eq!(to_hex(&[0x00, 0xAB, 0x10]), "00ab10");
        assert_eq!(from_hex("0x00AB10").unwrap(), vec![0x00, 0xAB, 0x10]);
        assert_eq!(from_hex("00 ab\n10").unwrap(), vec![0x00, 0xAB, 0x10]);
        assert_eq!(from_hex("abc"), Err(DecodeError::Malformed("hex string of odd length")));
        assert_eq!(from_hex("zz"), Err(DecodeError::Malformed("hex digit")));
        assert_eq!(from_hex("0x"), Ok(vec![]));
    }

    #[test]
    fn test_client_hello_display() {
        let hello = ClientHello {
            client_version: TLS_VERSION_1_0,
            random: [0u8; 32],
            session_id: vec![],
            cipher_suites: vec![cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA],
            compression_methods: vec![0],
            extensions: None,
        };
        let text = hello.to_string();
        assert!(text.starts_with("ClientHello, version 0x0301"));
        assert!(text.contains("TLS_RSA_WITH_AES_128_CBC_SHA"));
        assert_eq!(
            HandshakeMessage::ClientHello(hello).to_string(),
            "ClientHello (1 cipher suites)"
        );
    }
}
