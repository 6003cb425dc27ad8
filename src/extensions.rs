//! # TLS Extensions and their encoding/decoding
//!
//! Includes `ByteSerializable` trait for converting structures into bytes and constructing again.
//! Extensions are the ones a TLS 1.0 client of the RFC 4366/4492/5746 era sends and receives.
use crate::error::DecodeError;
use crate::parser::ByteParser;
use ::log::{debug, warn};

/// `ByteSerializable` trait is used to serialize and deserialize the struct into bytes
pub trait ByteSerializable {
    /// Returns the byte representation of the object if possible
    fn as_bytes(&self) -> Option<Vec<u8>>;
    /// Attempts to parse the bytes into a struct object implementing this trait
    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError>;
}

/// What to do with an extension whose type we do not know.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UnknownExtensionPolicy {
    /// Drop it and continue.
    Skip,
    /// Keep the raw bytes so the block re-encodes byte for byte.
    #[default]
    Keep,
    /// Fail the whole block with `UnknownExtension`.
    Reject,
}

/// `ExtensionType` where maximum value can be 2^16-1 (2 bytes to present)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExtensionType {
    ServerName = 0,
    StatusRequest = 5,
    EllipticCurves = 10,
    EcPointFormats = 11,
    SignatureAlgorithms = 13,
    Heartbeat = 15,
    SessionTicket = 35,
    RenegotiationInfo = 0xFF01,
}

impl TryFrom<u16> for ExtensionType {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ExtensionType::ServerName),
            5 => Ok(ExtensionType::StatusRequest),
            10 => Ok(ExtensionType::EllipticCurves),
            11 => Ok(ExtensionType::EcPointFormats),
            13 => Ok(ExtensionType::SignatureAlgorithms),
            15 => Ok(ExtensionType::Heartbeat),
            35 => Ok(ExtensionType::SessionTicket),
            0xFF01 => Ok(ExtensionType::RenegotiationInfo),
            e => Err(DecodeError::UnknownExtension(e)),
        }
    }
}

/// `Extension` is wrapper for any TLS extension.
/// The type is kept as the raw code so unknown extensions survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: u16,
    pub extension_data: ExtensionData,
}

impl Extension {
    /// Builds an extension whose type follows from its data.
    #[must_use]
    pub fn new(extension_data: ExtensionData) -> Self {
        let extension_type = match &extension_data {
            ExtensionData::ServerName(_) => ExtensionType::ServerName as u16,
            ExtensionData::EllipticCurves(_) => ExtensionType::EllipticCurves as u16,
            ExtensionData::EcPointFormats(_) => ExtensionType::EcPointFormats as u16,
            ExtensionData::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms as u16,
            ExtensionData::SessionTicket(_) => ExtensionType::SessionTicket as u16,
            ExtensionData::RenegotiationInfo(_) => ExtensionType::RenegotiationInfo as u16,
            ExtensionData::Unserialized(code, _) => *code,
        };
        Self {
            extension_type,
            extension_data,
        }
    }

    /// The known type of this extension, if it has one.
    #[must_use]
    pub fn known_type(&self) -> Option<ExtensionType> {
        ExtensionType::try_from(self.extension_type).ok()
    }
}

impl ByteSerializable for Extension {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.extension_type.to_be_bytes());
        let ext_bytes = self.extension_data.as_bytes()?;
        // 2 byte length determinant for the `extension_data`
        bytes.extend(u16::try_from(ext_bytes.len()).ok()?.to_be_bytes());
        bytes.extend_from_slice(&ext_bytes);
        Some(bytes)
    }

    /// Decodes one extension. An unknown type consumes its bytes and then
    /// reports `UnknownExtension`, so the caller may skip it and go on.
    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let ext_type = bytes.expect_u16("extension type")?;
        let ext_data = bytes.expect_vec_u16("extension data")?;
        debug!("ExtensionType: {ext_type:#06x}, {} bytes", ext_data.len());
        let extension_data = ExtensionData::parse(ext_type, ext_data)?;
        Ok(Box::new(Extension {
            extension_type: ext_type,
            extension_data,
        }))
    }
}

/// Decodes a complete extensions block (without its outer length field).
///
/// # Errors
/// Fails on truncated extensions, malformed known extensions, or an unknown
/// extension when `policy` is `Reject`.
pub fn decode_extensions(
    block: Vec<u8>,
    policy: UnknownExtensionPolicy,
) -> Result<Vec<Extension>, DecodeError> {
    let mut parser = ByteParser::from(block);
    let mut extensions = Vec::new();
    while !parser.is_empty() {
        let ext_type = parser.expect_u16("extension type")?;
        let ext_data = parser.expect_vec_u16("extension data")?;
        match ExtensionData::parse(ext_type, ext_data.clone()) {
            Ok(extension_data) => extensions.push(Extension {
                extension_type: ext_type,
                extension_data,
            }),
            Err(DecodeError::UnknownExtension(code)) => match policy {
                UnknownExtensionPolicy::Skip => {
                    warn!("Skipping unknown extension {code:#06x}");
                }
                UnknownExtensionPolicy::Keep => {
                    debug!("Keeping unknown extension {code:#06x} as raw bytes");
                    extensions.push(Extension::new(ExtensionData::Unserialized(code, ext_data)));
                }
                UnknownExtensionPolicy::Reject => return Err(DecodeError::UnknownExtension(code)),
            },
            Err(e) => return Err(e),
        }
    }
    Ok(extensions)
}

/// Encodes an extensions block including its 2 byte length field.
#[must_use]
pub fn encode_extensions(extensions: &[Extension]) -> Option<Vec<u8>> {
    let mut ext_bytes = Vec::new();
    for extension in extensions {
        ext_bytes.extend(extension.as_bytes()?);
    }
    let mut bytes = Vec::with_capacity(ext_bytes.len() + 2);
    bytes.extend(u16::try_from(ext_bytes.len()).ok()?.to_be_bytes());
    bytes.extend(ext_bytes);
    Some(bytes)
}

/// `ExtensionData` is a wrapper for any data in the extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionData {
    ServerName(ServerNameList),
    EllipticCurves(NamedCurveList),
    EcPointFormats(ECPointFormatList),
    SignatureAlgorithms(SupportedSignatureAlgorithms),
    SessionTicket(Vec<u8>),
    RenegotiationInfo(RenegotiationInfo),
    /// Extension we carry without interpreting: type code and raw data.
    Unserialized(u16, Vec<u8>),
}

impl ExtensionData {
    fn parse(ext_type: u16, data: Vec<u8>) -> Result<Self, DecodeError> {
        let mut ext_bytes = ByteParser::from(data);
        let extension_data = match ExtensionType::try_from(ext_type)? {
            ExtensionType::ServerName => {
                if ext_bytes.is_empty() {
                    // A server acknowledges SNI with empty data
                    ExtensionData::ServerName(ServerNameList::default())
                } else {
                    ExtensionData::ServerName(*ServerNameList::from_bytes(&mut ext_bytes)?)
                }
            }
            ExtensionType::EllipticCurves => {
                ExtensionData::EllipticCurves(*NamedCurveList::from_bytes(&mut ext_bytes)?)
            }
            ExtensionType::EcPointFormats => {
                ExtensionData::EcPointFormats(*ECPointFormatList::from_bytes(&mut ext_bytes)?)
            }
            ExtensionType::SignatureAlgorithms => ExtensionData::SignatureAlgorithms(
                *SupportedSignatureAlgorithms::from_bytes(&mut ext_bytes)?,
            ),
            ExtensionType::SessionTicket => ExtensionData::SessionTicket(ext_bytes.drain()),
            ExtensionType::RenegotiationInfo => {
                ExtensionData::RenegotiationInfo(*RenegotiationInfo::from_bytes(&mut ext_bytes)?)
            }
            ExtensionType::StatusRequest | ExtensionType::Heartbeat => {
                ExtensionData::Unserialized(ext_type, ext_bytes.drain())
            }
        };
        if !ext_bytes.is_empty() {
            return Err(DecodeError::LengthMismatch {
                field: "extension data",
                declared: 0,
                actual: ext_bytes.len(),
            });
        }
        Ok(extension_data)
    }

    fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            ExtensionData::ServerName(list) => {
                if list.server_name_list.is_empty() {
                    Some(Vec::new())
                } else {
                    list.as_bytes()
                }
            }
            ExtensionData::EllipticCurves(curves) => curves.as_bytes(),
            ExtensionData::EcPointFormats(formats) => formats.as_bytes(),
            ExtensionData::SignatureAlgorithms(algorithms) => algorithms.as_bytes(),
            ExtensionData::SessionTicket(ticket) => Some(ticket.clone()),
            ExtensionData::RenegotiationInfo(info) => info.as_bytes(),
            ExtensionData::Unserialized(_, data) => Some(data.clone()),
        }
    }
}

/// `NameType` where maximum value be `u8::MAX` (1 byte)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NameType {
    HostName = 0,
}

/// Server Name extension, as defined in [RFC 6066](https://datatracker.ietf.org/doc/html/rfc6066#section-3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerName {
    pub name_type: NameType,
    pub host_name: Vec<u8>,
}

impl std::fmt::Display for ServerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = String::from_utf8_lossy(&self.host_name);
        write!(f, "{:?}: {}", self.name_type, name)
    }
}

/// `ServerNameList` is a list of `ServerName` structures, where maximum length be `u16::MAX` (2 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerNameList {
    pub server_name_list: Vec<ServerName>,
}

impl ServerNameList {
    #[must_use]
    pub fn host(host_name: &str) -> Self {
        Self {
            server_name_list: vec![ServerName {
                name_type: NameType::HostName,
                host_name: host_name.as_bytes().to_vec(),
            }],
        }
    }
}

impl ByteSerializable for ServerNameList {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        for server_name in &self.server_name_list {
            bytes.push(server_name.name_type as u8);
            // 2 byte length determinant for the ASCII byte presentation of the name
            bytes.extend_from_slice(&u16::try_from(server_name.host_name.len()).ok()?.to_be_bytes());
            bytes.extend_from_slice(&server_name.host_name);
        }
        // 2 byte length determinant for the whole `ServerNameList`
        bytes.splice(0..0, u16::try_from(bytes.len()).ok()?.to_be_bytes());
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let mut list = ByteParser::from(bytes.expect_vec_u16("server name list")?);
        let mut server_name_list = Vec::new();
        while !list.is_empty() {
            let name_type = list.expect_u8("server name type")?;
            // Currently only HostName (0) is defined
            if name_type != NameType::HostName as u8 {
                return Err(DecodeError::InvalidFixedByte {
                    field: "server name type",
                    value: u16::from(name_type),
                });
            }
            let host_name = list.expect_vec_u16("host name")?;
            server_name_list.push(ServerName {
                name_type: NameType::HostName,
                host_name,
            });
        }
        Ok(Box::new(ServerNameList { server_name_list }))
    }
}

/// Named elliptic curves from [RFC 4492 section 5.1.1](https://datatracker.ietf.org/doc/html/rfc4492#section-5.1.1)
pub mod named_curves {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct NamedCurve(pub u16);

    pub const SECT163K1: NamedCurve = NamedCurve(1);
    pub const SECT163R2: NamedCurve = NamedCurve(3);
    pub const SECT233K1: NamedCurve = NamedCurve(6);
    pub const SECT233R1: NamedCurve = NamedCurve(7);
    pub const SECT283K1: NamedCurve = NamedCurve(9);
    pub const SECT283R1: NamedCurve = NamedCurve(10);
    pub const SECT409K1: NamedCurve = NamedCurve(11);
    pub const SECT409R1: NamedCurve = NamedCurve(12);
    pub const SECT571K1: NamedCurve = NamedCurve(13);
    pub const SECT571R1: NamedCurve = NamedCurve(14);
    pub const SECP160K1: NamedCurve = NamedCurve(15);
    pub const SECP160R1: NamedCurve = NamedCurve(16);
    pub const SECP192K1: NamedCurve = NamedCurve(18);
    pub const SECP192R1: NamedCurve = NamedCurve(19);
    pub const SECP224K1: NamedCurve = NamedCurve(20);
    pub const SECP224R1: NamedCurve = NamedCurve(21);
    pub const SECP256K1: NamedCurve = NamedCurve(22);
    pub const SECP256R1: NamedCurve = NamedCurve(23);
    pub const SECP384R1: NamedCurve = NamedCurve(24);
    pub const SECP521R1: NamedCurve = NamedCurve(25);

    impl std::fmt::Display for NamedCurve {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self.0 {
                1 => write!(f, "sect163k1"),
                3 => write!(f, "sect163r2"),
                6 => write!(f, "sect233k1"),
                7 => write!(f, "sect233r1"),
                9 => write!(f, "sect283k1"),
                10 => write!(f, "sect283r1"),
                11 => write!(f, "sect409k1"),
                12 => write!(f, "sect409r1"),
                13 => write!(f, "sect571k1"),
                14 => write!(f, "sect571r1"),
                15 => write!(f, "secp160k1"),
                16 => write!(f, "secp160r1"),
                18 => write!(f, "secp192k1"),
                19 => write!(f, "secp192r1"),
                20 => write!(f, "secp224k1"),
                21 => write!(f, "secp224r1"),
                22 => write!(f, "secp256k1"),
                23 => write!(f, "secp256r1"),
                24 => write!(f, "secp384r1"),
                25 => write!(f, "secp521r1"),
                e => write!(f, "unknown curve {e:#06x}"),
            }
        }
    }
}
use named_curves::NamedCurve;

/// Elliptic curves / supported groups extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCurveList {
    pub named_curve_list: Vec<NamedCurve>,
}

impl ByteSerializable for NamedCurveList {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        for curve in &self.named_curve_list {
            bytes.extend_from_slice(&curve.0.to_be_bytes());
        }
        bytes.splice(0..0, u16::try_from(bytes.len()).ok()?.to_be_bytes());
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let list = bytes.expect_vec_u16("elliptic curve list")?;
        if list.len() % 2 != 0 {
            return Err(DecodeError::Malformed("elliptic curve list"));
        }
        let named_curve_list = list
            .chunks_exact(2)
            .map(|pair| NamedCurve(u16::from_be_bytes([pair[0], pair[1]])))
            .collect();
        Ok(Box::new(NamedCurveList { named_curve_list }))
    }
}

/// Point formats from [RFC 4492 section 5.1.2](https://datatracker.ietf.org/doc/html/rfc4492#section-5.1.2)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ECPointFormat {
    Uncompressed = 0,
    AnsiX962CompressedPrime = 1,
    AnsiX962CompressedChar2 = 2,
}

impl TryFrom<u8> for ECPointFormat {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ECPointFormat::Uncompressed),
            1 => Ok(ECPointFormat::AnsiX962CompressedPrime),
            2 => Ok(ECPointFormat::AnsiX962CompressedChar2),
            e => Err(DecodeError::InvalidFixedByte {
                field: "ec point format",
                value: u16::from(e),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ECPointFormatList {
    pub formats: Vec<ECPointFormat>,
}

impl ByteSerializable for ECPointFormatList {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = vec![u8::try_from(self.formats.len()).ok()?];
        bytes.extend(self.formats.iter().map(|format| *format as u8));
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let formats = bytes
            .expect_vec_u8("ec point formats")?
            .into_iter()
            .map(ECPointFormat::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(ECPointFormatList { formats }))
    }
}

/// Pair of hash and signature algorithm codes, as in RFC 5246 section 7.4.1.4.1
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignatureAndHashAlgorithm {
    pub hash: u8,
    pub signature: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedSignatureAlgorithms {
    pub supported_signature_algorithms: Vec<SignatureAndHashAlgorithm>,
}

impl ByteSerializable for SupportedSignatureAlgorithms {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        for algorithm in &self.supported_signature_algorithms {
            bytes.push(algorithm.hash);
            bytes.push(algorithm.signature);
        }
        bytes.splice(0..0, u16::try_from(bytes.len()).ok()?.to_be_bytes());
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let list = bytes.expect_vec_u16("signature algorithms")?;
        if list.len() % 2 != 0 {
            return Err(DecodeError::Malformed("signature algorithms"));
        }
        let supported_signature_algorithms = list
            .chunks_exact(2)
            .map(|pair| SignatureAndHashAlgorithm {
                hash: pair[0],
                signature: pair[1],
            })
            .collect();
        Ok(Box::new(SupportedSignatureAlgorithms {
            supported_signature_algorithms,
        }))
    }
}

/// [Renegotiation indication](https://datatracker.ietf.org/doc/html/rfc5746#section-3.2)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenegotiationInfo {
    pub renegotiated_connection: Vec<u8>,
}

impl ByteSerializable for RenegotiationInfo {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = vec![u8::try_from(self.renegotiated_connection.len()).ok()?];
        bytes.extend_from_slice(&self.renegotiated_connection);
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let renegotiated_connection = bytes.expect_vec_u8("renegotiated connection")?;
        Ok(Box::new(RenegotiationInfo {
            renegotiated_connection,
        }))
    }
}

/// Encodes an affine point in the ANSI X9.62 octet-string form.
///
/// Leading zero bytes of both coordinates are stripped and the shorter one is
/// left padded so both share one width. The compressed forms keep only X and
/// signal the low bit of Y in the prefix.
#[must_use]
pub fn encode_x962(x: &[u8], y: &[u8], format: ECPointFormat) -> Vec<u8> {
    let x = strip_leading_zeros(x);
    let y = strip_leading_zeros(y);
    let width = x.len().max(y.len());
    match format {
        ECPointFormat::Uncompressed => {
            let mut point = Vec::with_capacity(1 + 2 * width);
            point.push(0x04);
            point.extend(left_pad(x, width));
            point.extend(left_pad(y, width));
            point
        }
        ECPointFormat::AnsiX962CompressedPrime | ECPointFormat::AnsiX962CompressedChar2 => {
            let odd = y.last().is_some_and(|b| b & 1 == 1);
            let mut point = Vec::with_capacity(1 + width);
            point.push(if odd { 0x03 } else { 0x02 });
            point.extend(left_pad(x, width));
            point
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut padded = vec![0u8; width - bytes.len()];
    padded.extend_from_slice(bytes);
    padded
}

/// Wire form of an EC point: one byte length followed by the X9.62 octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ECPoint {
    pub point: Vec<u8>,
}

impl ByteSerializable for ECPoint {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = vec![u8::try_from(self.point.len()).ok()?];
        bytes.extend_from_slice(&self.point);
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let point = bytes.expect_vec_u8("ec point")?;
        if point.is_empty() {
            return Err(DecodeError::Malformed("ec point"));
        }
        Ok(Box::new(ECPoint { point }))
    }
}

/// Only named curves are supported; explicit curves are rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ECCurveType {
    NamedCurve = 3,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ECParameters {
    pub curve_type: ECCurveType,
    pub named_curve: NamedCurve,
}

impl ByteSerializable for ECParameters {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = vec![self.curve_type as u8];
        bytes.extend_from_slice(&self.named_curve.0.to_be_bytes());
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let curve_type = bytes.expect_u8("ec curve type")?;
        if curve_type != ECCurveType::NamedCurve as u8 {
            return Err(DecodeError::InvalidFixedByte {
                field: "ec curve type",
                value: u16::from(curve_type),
            });
        }
        let named_curve = NamedCurve(bytes.expect_u16("named curve")?);
        Ok(Box::new(ECParameters {
            curve_type: ECCurveType::NamedCurve,
            named_curve,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_server_name_list() {
        let server_name_list = ServerNameList::host("example.ulfheim.net");
        let bytes = server_name_list.as_bytes().unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(
            bytes,
            vec![
                0x00, 0x16, 0x00, 0x00, 0x13, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c, 0x65, 0x2e, 0x75,
                0x6c, 0x66, 0x68, 0x65, 0x69, 0x6d, 0x2e, 0x6e, 0x65, 0x74
            ]
        );
        let parsed = *ServerNameList::from_bytes(&mut ByteParser::from(bytes)).unwrap();
        assert_eq!(parsed, server_name_list);
        assert_eq!(parsed.server_name_list[0].to_string(), "HostName: example.ulfheim.net");
    }

    #[test]
    fn test_extension_server_name_list() {
        let extension = Extension::new(ExtensionData::ServerName(ServerNameList::host(
            "example.ulfheim.net",
        )));
        let bytes = extension.as_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x00, 0x00, 0x00, 0x18, 0x00, 0x16, 0x00, 0x00, 0x13, 0x65, 0x78, 0x61, 0x6d, 0x70,
                0x6c, 0x65, 0x2e, 0x75, 0x6c, 0x66, 0x68, 0x65, 0x69, 0x6d, 0x2e, 0x6e, 0x65, 0x74
            ]
        );
        let decoded = *Extension::from_bytes(&mut ByteParser::from(bytes)).unwrap();
        assert_eq!(decoded, extension);
        assert_eq!(decoded.known_type(), Some(ExtensionType::ServerName));
    }

    #[test]
    fn test_server_acknowledges_sni_with_empty_data() {
        let decoded =
            *Extension::from_bytes(&mut ByteParser::from(vec![0x00, 0x00, 0x00, 0x00])).unwrap();
        assert_eq!(
            decoded.extension_data,
            ExtensionData::ServerName(ServerNameList::default())
        );
        assert_eq!(decoded.as_bytes().unwrap(), vec![0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_elliptic_curves_and_point_formats() {
        let curves = Extension::new(ExtensionData::EllipticCurves(NamedCurveList {
            named_curve_list: vec![named_curves::SECP256R1, named_curves::SECP384R1],
        }));
        assert_eq!(
            curves.as_bytes().unwrap(),
            vec![0x00, 0x0A, 0x00, 0x06, 0x00, 0x04, 0x00, 0x17, 0x00, 0x18]
        );
        let formats = Extension::new(ExtensionData::EcPointFormats(ECPointFormatList {
            formats: vec![ECPointFormat::Uncompressed],
        }));
        assert_eq!(formats.as_bytes().unwrap(), vec![0x00, 0x0B, 0x00, 0x02, 0x01, 0x00]);
        assert_eq!(named_curves::SECP256R1.to_string(), "secp256r1");
    }

    #[test]
    fn test_unknown_extension_policies() {
        let mut block = Extension::new(ExtensionData::RenegotiationInfo(RenegotiationInfo::default()))
            .as_bytes()
            .unwrap();
        // Unassigned extension type with two data bytes
        block.extend_from_slice(&[0x12, 0x34, 0x00, 0x02, 0xAB, 0xCD]);

        let kept = decode_extensions(block.clone(), UnknownExtensionPolicy::Keep).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].extension_type, 0x1234);
        assert_eq!(kept[1].known_type(), None);
        let mut reencoded = Vec::new();
        for extension in &kept {
            reencoded.extend(extension.as_bytes().unwrap());
        }
        assert_eq!(reencoded, block);

        let skipped = decode_extensions(block.clone(), UnknownExtensionPolicy::Skip).unwrap();
        assert_eq!(skipped.len(), 1);

        assert_eq!(
            decode_extensions(block.clone(), UnknownExtensionPolicy::Reject).unwrap_err(),
            DecodeError::UnknownExtension(0x1234)
        );
        assert_eq!(
            Extension::from_bytes(&mut ByteParser::from(block[5..].to_vec())).unwrap_err(),
            DecodeError::UnknownExtension(0x1234)
        );
    }

    #[test]
    fn test_truncated_extension() {
        let result = decode_extensions(vec![0x00, 0x0B, 0x00, 0x05, 0x01], UnknownExtensionPolicy::Keep);
        assert!(matches!(result, Err(DecodeError::TooShort { .. })));
    }

    #[test]
    fn test_x962_uncompressed() {
        let point = encode_x962(&[0x00, 0x00, 0x01, 0x02], &[0x03, 0x04, 0x05], ECPointFormat::Uncompressed);
        assert_eq!(point, vec![0x04, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);

        let x = [0x00u8, 0x7F, 0x01];
        let y = [0x00u8, 0x00, 0x00, 0x09];
        let point = encode_x962(&x, &y, ECPointFormat::Uncompressed);
        assert_eq!(point.len(), 1 + 2 * 2);
        assert_eq!(point, vec![0x04, 0x7F, 0x01, 0x00, 0x09]);
    }

    #[test]
    fn test_x962_compressed_prefix_follows_y_parity() {
        let even = encode_x962(&[0x11, 0x22], &[0x01, 0x02], ECPointFormat::AnsiX962CompressedPrime);
        assert_eq!(even, vec![0x02, 0x11, 0x22]);
        let odd = encode_x962(&[0x11, 0x22], &[0x01, 0x03], ECPointFormat::AnsiX962CompressedPrime);
        assert_eq!(odd, vec![0x03, 0x11, 0x22]);
        let wide_y = encode_x962(&[0x05], &[0x01, 0x00, 0x01], ECPointFormat::AnsiX962CompressedChar2);
        assert_eq!(wide_y, vec![0x03, 0x00, 0x00, 0x05]);
    }

    #[test]
    fn test_ec_parameters_and_point() {
        let params = ECParameters {
            curve_type: ECCurveType::NamedCurve,
            named_curve: named_curves::SECP256R1,
        };
        assert_eq!(params.as_bytes().unwrap(), vec![0x03, 0x00, 0x17]);
        let decoded = ECParameters::from_bytes(&mut ByteParser::from(vec![0x03, 0x00, 0x17])).unwrap();
        assert_eq!(*decoded, params);
        assert!(ECParameters::from_bytes(&mut ByteParser::from(vec![0x01, 0x00, 0x17])).is_err());

        let point = ECPoint {
            point: vec![0x04, 0x01, 0x02],
        };
        let bytes = point.as_bytes().unwrap();
        assert_eq!(bytes, vec![0x03, 0x04, 0x01, 0x02]);
        assert_eq!(*ECPoint::from_bytes(&mut ByteParser::from(bytes)).unwrap(), point);
    }
}
