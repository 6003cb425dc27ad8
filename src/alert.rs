//! # Alert protocol
//!
//! [RFC 2246 section 7.2](https://datatracker.ietf.org/doc/html/rfc2246#section-7.2)
use crate::error::DecodeError;
use crate::extensions::ByteSerializable;
use crate::parser::ByteParser;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl TryFrom<u8> for AlertLevel {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            e => Err(DecodeError::InvalidFixedByte {
                field: "alert level",
                value: u16::from(e),
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    DecryptionFailed = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    NoCertificate = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ExportRestriction = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
}

impl TryFrom<u8> for AlertDescription {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => AlertDescription::CloseNotify,
            10 => AlertDescription::UnexpectedMessage,
            20 => AlertDescription::BadRecordMac,
            21 => AlertDescription::DecryptionFailed,
            22 => AlertDescription::RecordOverflow,
            30 => AlertDescription::DecompressionFailure,
            40 => AlertDescription::HandshakeFailure,
            41 => AlertDescription::NoCertificate,
            42 => AlertDescription::BadCertificate,
            43 => AlertDescription::UnsupportedCertificate,
            44 => AlertDescription::CertificateRevoked,
            45 => AlertDescription::CertificateExpired,
            46 => AlertDescription::CertificateUnknown,
            47 => AlertDescription::IllegalParameter,
            48 => AlertDescription::UnknownCa,
            49 => AlertDescription::AccessDenied,
            50 => AlertDescription::DecodeError,
            51 => AlertDescription::DecryptError,
            60 => AlertDescription::ExportRestriction,
            70 => AlertDescription::ProtocolVersion,
            71 => AlertDescription::InsufficientSecurity,
            80 => AlertDescription::InternalError,
            90 => AlertDescription::UserCanceled,
            100 => AlertDescription::NoRenegotiation,
            110 => AlertDescription::UnsupportedExtension,
            e => {
                return Err(DecodeError::InvalidFixedByte {
                    field: "alert description",
                    value: u16::from(e),
                })
            }
        })
    }
}

impl std::fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlertDescription::CloseNotify => "close_notify",
            AlertDescription::UnexpectedMessage => "unexpected_message",
            AlertDescription::BadRecordMac => "bad_record_mac",
            AlertDescription::DecryptionFailed => "decryption_failed",
            AlertDescription::RecordOverflow => "record_overflow",
            AlertDescription::DecompressionFailure => "decompression_failure",
            AlertDescription::HandshakeFailure => "handshake_failure",
            AlertDescription::NoCertificate => "no_certificate",
            AlertDescription::BadCertificate => "bad_certificate",
            AlertDescription::UnsupportedCertificate => "unsupported_certificate",
            AlertDescription::CertificateRevoked => "certificate_revoked",
            AlertDescription::CertificateExpired => "certificate_expired",
            AlertDescription::CertificateUnknown => "certificate_unknown",
            AlertDescription::IllegalParameter => "illegal_parameter",
            AlertDescription::UnknownCa => "unknown_ca",
            AlertDescription::AccessDenied => "access_denied",
            AlertDescription::DecodeError => "decode_error",
            AlertDescription::DecryptError => "decrypt_error",
            AlertDescription::ExportRestriction => "export_restriction",
            AlertDescription::ProtocolVersion => "protocol_version",
            AlertDescription::InsufficientSecurity => "insufficient_security",
            AlertDescription::InternalError => "internal_error",
            AlertDescription::UserCanceled => "user_canceled",
            AlertDescription::NoRenegotiation => "no_renegotiation",
            AlertDescription::UnsupportedExtension => "unsupported_extension",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    #[must_use]
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.level, self.description)
    }
}

impl ByteSerializable for Alert {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        Some(vec![self.level as u8, self.description as u8])
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        if bytes.len() != 2 {
            return Err(DecodeError::LengthMismatch {
                field: "alert",
                declared: 2,
                actual: bytes.len(),
            });
        }
        let level = AlertLevel::try_from(bytes.expect_u8("alert level")?)?;
        let description = AlertDescription::try_from(bytes.expect_u8("alert description")?)?;
        Ok(Box::new(Alert { level, description }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_alert_codec() {
        let alert = Alert::fatal(AlertDescription::InternalError);
        let bytes = alert.as_bytes().unwrap();
        assert_eq!(bytes, vec![0x02, 0x50]);
        let decoded = Alert::from_bytes(&mut ByteParser::from(bytes)).unwrap();
        assert_eq!(*decoded, alert);
        assert!(decoded.is_fatal());
        assert_eq!(decoded.to_string(), "Fatal: internal_error");
    }

    #[test]
    fn test_alert_rejects_bad_input() {
        assert!(matches!(
            Alert::from_bytes(&mut ByteParser::from(vec![0x03, 0x00])),
            Err(DecodeError::InvalidFixedByte {
                field: "alert level",
                ..
            })
        ));
        assert!(matches!(
            Alert::from_bytes(&mut ByteParser::from(vec![0x01, 0x07])),
            Err(DecodeError::InvalidFixedByte {
                field: "alert description",
                ..
            })
        ));
        assert!(matches!(
            Alert::from_bytes(&mut ByteParser::from(vec![0x01])),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }
}
