//! This module contains the structures and implementations for the handshake messages.
#![allow(clippy::module_name_repetitions)]
use crate::error::DecodeError;
use crate::extensions::{
    decode_extensions, encode_extensions, ByteSerializable, ECParameters, ECPoint, Extension,
    UnknownExtensionPolicy,
};
use crate::handshake::cipher_suites::{CipherSuite, KeyExchangeAlgorithm};
use crate::parser::ByteParser;
use log::debug;

pub type ProtocolVersion = u16;
pub type Random = [u8; 32];

pub const TLS_VERSION_1_0: ProtocolVersion = 0x0301;

/// Size of the handshake header: one type byte and a 24 bit length.
pub const HANDSHAKE_HEADER_LEN: usize = 4;
/// Length of the Finished verify data in TLS 1.0.
pub const VERIFY_DATA_LEN: usize = 12;

/// ## Cipher Suites
/// The suites a TLS 1.0 client of this era offers, with the key exchange each one implies.
/// See the registry in [RFC 2246 appendix A.5](https://datatracker.ietf.org/doc/html/rfc2246#appendix-A.5)
/// and [RFC 4492 section 6](https://datatracker.ietf.org/doc/html/rfc4492#section-6).
pub mod cipher_suites {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CipherSuite([u8; 2]);
    impl AsRef<[u8]> for CipherSuite {
        fn as_ref(&self) -> &[u8] {
            &self.0
        }
    }
    impl From<[u8; 2]> for CipherSuite {
        fn from(slice: [u8; 2]) -> Self {
            CipherSuite(slice)
        }
    }
    impl From<u16> for CipherSuite {
        fn from(value: u16) -> Self {
            CipherSuite(value.to_be_bytes())
        }
    }

    /// Key exchange method named by the cipher suite.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub enum KeyExchangeAlgorithm {
        Rsa,
        DheRsa,
        DheDss,
        DhRsa,
        DhDss,
        EcdheRsa,
        EcdheEcdsa,
    }

    impl KeyExchangeAlgorithm {
        /// Ephemeral Diffie-Hellman over a prime field, where the server sends p, g and Ys.
        #[must_use]
        pub fn is_dh(self) -> bool {
            matches!(
                self,
                KeyExchangeAlgorithm::DheRsa
                    | KeyExchangeAlgorithm::DheDss
                    | KeyExchangeAlgorithm::DhRsa
                    | KeyExchangeAlgorithm::DhDss
            )
        }

        #[must_use]
        pub fn is_ecdh(self) -> bool {
            matches!(
                self,
                KeyExchangeAlgorithm::EcdheRsa | KeyExchangeAlgorithm::EcdheEcdsa
            )
        }
    }

    pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x0A]);
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x2F]);
    pub const TLS_DH_DSS_WITH_AES_128_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x30]);
    pub const TLS_DH_RSA_WITH_AES_128_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x31]);
    pub const TLS_DHE_DSS_WITH_AES_128_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x32]);
    pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x33]);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x35]);
    pub const TLS_DHE_RSA_WITH_AES_256_CBC_SHA: CipherSuite = CipherSuite([0x00, 0x39]);
    pub const TLS_EMPTY_RENEGOTIATION_INFO_SCSV: CipherSuite = CipherSuite([0x00, 0xFF]);
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA: CipherSuite = CipherSuite([0xC0, 0x09]);
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA: CipherSuite = CipherSuite([0xC0, 0x13]);

    impl CipherSuite {
        #[must_use]
        pub fn name(&self) -> Option<&'static str> {
            Some(match self.0 {
                [0x00, 0x0A] => "TLS_RSA_WITH_3DES_EDE_CBC_SHA",
                [0x00, 0x2F] => "TLS_RSA_WITH_AES_128_CBC_SHA",
                [0x00, 0x30] => "TLS_DH_DSS_WITH_AES_128_CBC_SHA",
                [0x00, 0x31] => "TLS_DH_RSA_WITH_AES_128_CBC_SHA",
                [0x00, 0x32] => "TLS_DHE_DSS_WITH_AES_128_CBC_SHA",
                [0x00, 0x33] => "TLS_DHE_RSA_WITH_AES_128_CBC_SHA",
                [0x00, 0x35] => "TLS_RSA_WITH_AES_256_CBC_SHA",
                [0x00, 0x39] => "TLS_DHE_RSA_WITH_AES_256_CBC_SHA",
                [0x00, 0xFF] => "TLS_EMPTY_RENEGOTIATION_INFO_SCSV",
                [0xC0, 0x09] => "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
                [0xC0, 0x13] => "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
                _ => return None,
            })
        }

        #[must_use]
        pub fn key_exchange(&self) -> Option<KeyExchangeAlgorithm> {
            Some(match self.0 {
                [0x00, 0x0A | 0x2F | 0x35] => KeyExchangeAlgorithm::Rsa,
                [0x00, 0x30] => KeyExchangeAlgorithm::DhDss,
                [0x00, 0x31] => KeyExchangeAlgorithm::DhRsa,
                [0x00, 0x32] => KeyExchangeAlgorithm::DheDss,
                [0x00, 0x33 | 0x39] => KeyExchangeAlgorithm::DheRsa,
                [0xC0, 0x09] => KeyExchangeAlgorithm::EcdheEcdsa,
                [0xC0, 0x13] => KeyExchangeAlgorithm::EcdheRsa,
                _ => return None,
            })
        }

        /// AES key length for the CBC suites we can protect records with.
        #[must_use]
        pub fn aes_key_len(&self) -> Option<usize> {
            match self.0 {
                [0x00, 0x2F | 0x30 | 0x31 | 0x32 | 0x33] | [0xC0, 0x09 | 0x13] => Some(16),
                [0x00, 0x35 | 0x39] => Some(32),
                _ => None,
            }
        }

        #[must_use]
        pub fn value(&self) -> u16 {
            u16::from_be_bytes(self.0)
        }
    }

    /// Pretty print the cipher suite
    impl std::fmt::Display for CipherSuite {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self.name() {
                Some(name) => write!(f, "[{:#04x}, {:#04x}] {name}", self.0[0], self.0[1]),
                None => write!(f, "Unknown Cipher Suite: {:?}", self.0),
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl TryFrom<u8> for HandshakeType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HandshakeType::HelloRequest),
            1 => Ok(HandshakeType::ClientHello),
            2 => Ok(HandshakeType::ServerHello),
            11 => Ok(HandshakeType::Certificate),
            12 => Ok(HandshakeType::ServerKeyExchange),
            13 => Ok(HandshakeType::CertificateRequest),
            14 => Ok(HandshakeType::ServerHelloDone),
            15 => Ok(HandshakeType::CertificateVerify),
            16 => Ok(HandshakeType::ClientKeyExchange),
            20 => Ok(HandshakeType::Finished),
            e => Err(DecodeError::UnknownHandshakeType(e)),
        }
    }
}

/// Decoding context for bodies whose layout depends on the negotiated suite.
#[derive(Debug, Copy, Clone, Default)]
pub struct DecodeContext {
    /// Key exchange selected by `ServerHello`; without it `ServerKeyExchange` stays opaque.
    pub key_exchange: Option<KeyExchangeAlgorithm>,
    pub extension_policy: UnknownExtensionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Certificate(Certificate),
    ServerKeyExchange(ServerKeyExchange),
    ServerHelloDone,
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
    /// Known type that this client does not interpret (`HelloRequest`, `CertificateRequest`, ...).
    Unparsed(HandshakeType, Vec<u8>),
}

impl HandshakeMessage {
    #[must_use]
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeMessage::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeMessage::Certificate(_) => HandshakeType::Certificate,
            HandshakeMessage::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeMessage::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakeMessage::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakeMessage::Finished(_) => HandshakeType::Finished,
            HandshakeMessage::Unparsed(msg_type, _) => *msg_type,
        }
    }

    fn body_bytes(&self) -> Option<Vec<u8>> {
        match self {
            HandshakeMessage::ClientHello(client_hello) => client_hello.as_bytes(),
            HandshakeMessage::ServerHello(server_hello) => server_hello.as_bytes(),
            HandshakeMessage::Certificate(certificate) => certificate.as_bytes(),
            HandshakeMessage::ServerKeyExchange(server_key_exchange) => {
                server_key_exchange.as_bytes()
            }
            HandshakeMessage::ServerHelloDone => Some(Vec::new()),
            HandshakeMessage::ClientKeyExchange(client_key_exchange) => {
                client_key_exchange.as_bytes()
            }
            HandshakeMessage::Finished(finished) => finished.as_bytes(),
            HandshakeMessage::Unparsed(_, body) => Some(body.clone()),
        }
    }
}

/// A handshake message with its header. The 24 bit length is always derived
/// from the encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub msg_type: HandshakeType,
    pub message: HandshakeMessage,
}

impl Handshake {
    #[must_use]
    pub fn new(message: HandshakeMessage) -> Self {
        Self {
            msg_type: message.handshake_type(),
            message,
        }
    }

    /// Decodes one handshake message from the front of `bytes`, leaving any
    /// following messages in the parser.
    ///
    /// # Errors
    /// `UnknownHandshakeType` for an unassigned type byte, `LengthMismatch`
    /// when the declared length runs past the available bytes or the body is
    /// not fully consumed, and any body decode error.
    pub fn decode(bytes: &mut ByteParser, context: &DecodeContext) -> Result<Box<Self>, DecodeError> {
        if bytes.len() < HANDSHAKE_HEADER_LEN {
            return Err(DecodeError::TooShort {
                field: "handshake header",
                needed: HANDSHAKE_HEADER_LEN,
                available: bytes.len(),
            });
        }
        let hs_type = HandshakeType::try_from(bytes.expect_u8("handshake type")?)?;
        let msg_length = bytes.expect_u24("handshake length")? as usize;
        if msg_length > bytes.len() {
            return Err(DecodeError::LengthMismatch {
                field: "handshake",
                declared: msg_length,
                actual: bytes.len(),
            });
        }
        let mut body = ByteParser::from(bytes.expect_bytes(msg_length, "handshake body")?);
        debug!("Decoding {hs_type:?}, {msg_length} bytes");
        let message = match hs_type {
            HandshakeType::ClientHello => {
                HandshakeMessage::ClientHello(*ClientHello::decode(&mut body, context)?)
            }
            HandshakeType::ServerHello => {
                HandshakeMessage::ServerHello(*ServerHello::decode(&mut body, context)?)
            }
            HandshakeType::Certificate => {
                HandshakeMessage::Certificate(*Certificate::from_bytes(&mut body)?)
            }
            HandshakeType::ServerKeyExchange => HandshakeMessage::ServerKeyExchange(
                *ServerKeyExchange::decode(&mut body, context.key_exchange)?,
            ),
            HandshakeType::ServerHelloDone => HandshakeMessage::ServerHelloDone,
            HandshakeType::ClientKeyExchange => HandshakeMessage::ClientKeyExchange(
                *ClientKeyExchange::decode(&mut body, context.key_exchange)?,
            ),
            HandshakeType::Finished => {
                HandshakeMessage::Finished(*Finished::from_bytes(&mut body)?)
            }
            HandshakeType::HelloRequest
            | HandshakeType::CertificateRequest
            | HandshakeType::CertificateVerify => HandshakeMessage::Unparsed(hs_type, body.drain()),
        };
        if !body.is_empty() {
            return Err(DecodeError::LengthMismatch {
                field: "handshake body",
                declared: msg_length,
                actual: msg_length - body.len(),
            });
        }
        Ok(Box::new(Handshake {
            msg_type: hs_type,
            message,
        }))
    }
}

impl ByteSerializable for Handshake {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let body = self.message.body_bytes()?;
        let length = u32::try_from(body.len()).ok()?;
        if length > 0x00FF_FFFF {
            return None;
        }
        let mut bytes = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
        bytes.push(self.msg_type as u8);
        // Convert u32 to 3 bytes
        bytes.extend_from_slice(&length.to_be_bytes()[1..]);
        bytes.extend(body);
        Some(bytes)
    }

    /// Decodes without a key exchange context; `ServerKeyExchange` bodies stay opaque.
    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        Handshake::decode(bytes, &DecodeContext::default())
    }
}

/// Splits a handshake record fragment into the raw bytes of each message it
/// carries, header included. More than one entry means the peer packed
/// several messages into a single record.
///
/// # Errors
/// `TooShort` on a partial header and `LengthMismatch` when a declared
/// length runs past the fragment.
pub fn split_handshake_messages(fragment: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset < fragment.len() {
        let rest = &fragment[offset..];
        if rest.len() < HANDSHAKE_HEADER_LEN {
            return Err(DecodeError::TooShort {
                field: "handshake header",
                needed: HANDSHAKE_HEADER_LEN,
                available: rest.len(),
            });
        }
        let length = u32::from_be_bytes([0, rest[1], rest[2], rest[3]]) as usize;
        let total = HANDSHAKE_HEADER_LEN + length;
        if total > rest.len() {
            return Err(DecodeError::LengthMismatch {
                field: "handshake",
                declared: length,
                actual: rest.len() - HANDSHAKE_HEADER_LEN,
            });
        }
        messages.push(rest[..total].to_vec());
        offset += total;
    }
    Ok(messages)
}

/// [`ClientHello`](https://datatracker.ietf.org/doc/html/rfc2246#section-7.4.1.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion, // 2 bytes to represent
    pub random: Random,                  // Static 32 bytes, no length prefix
    pub session_id: Vec<u8>,             // length of the data can be 0..32 (1 byte to present)
    pub cipher_suites: Vec<CipherSuite>, // length of the data can be 2..2^16-2 (2 bytes)
    pub compression_methods: Vec<u8>,    // length of the data can be 1..2^8-1 (1 byte)
    pub extensions: Option<Vec<Extension>>, // absent in a bare TLS 1.0 hello
}

/// Implements inner encoders and decoders for `ClientHello` struct.
/// For clarity, each field is encoded separately to bytes.
impl ClientHello {
    fn version_bytes(&self) -> Vec<u8> {
        self.client_version.to_be_bytes().to_vec()
    }
    fn random_bytes(&self) -> &[u8] {
        self.random.as_ref()
    }
    fn session_id_bytes(&self) -> Option<Vec<u8>> {
        if self.session_id.len() > 32 {
            return None;
        }
        let mut bytes = Vec::new();
        #[allow(clippy::cast_possible_truncation)]
        bytes.push(self.session_id.len() as u8);
        bytes.extend_from_slice(self.session_id.as_slice());
        Some(bytes)
    }
    fn cipher_suites_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        let len_ciphers: usize = self.cipher_suites.iter().fold(0, |acc, _x| acc + 2);
        bytes.extend_from_slice(u16::try_from(len_ciphers).ok()?.to_be_bytes().as_ref());
        for cipher_suite in &self.cipher_suites {
            bytes.extend_from_slice(cipher_suite.as_ref());
        }
        Some(bytes)
    }
    fn compression_methods_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = vec![u8::try_from(self.compression_methods.len()).ok()?];
        bytes.extend_from_slice(&self.compression_methods);
        Some(bytes)
    }
    fn extensions_bytes(&self) -> Option<Vec<u8>> {
        match &self.extensions {
            Some(extensions) => encode_extensions(extensions),
            None => Some(Vec::new()),
        }
    }

    /// # Errors
    /// Returns `Malformed` for an oversized session id, an empty or odd
    /// cipher-suite list, or no compression methods.
    pub fn decode(bytes: &mut ByteParser, context: &DecodeContext) -> Result<Box<Self>, DecodeError> {
        let client_version = bytes.expect_u16("client version")?;
        let random = random_from(bytes)?;
        let session_id = bytes.expect_vec_u8("session id")?;
        if session_id.len() > 32 {
            return Err(DecodeError::Malformed("session id longer than 32 bytes"));
        }
        let suites = bytes.expect_vec_u16("cipher suites")?;
        if suites.is_empty() || suites.len() % 2 != 0 {
            return Err(DecodeError::Malformed("cipher suite list"));
        }
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|pair| CipherSuite::from([pair[0], pair[1]]))
            .collect();
        let compression_methods = bytes.expect_vec_u8("compression methods")?;
        if compression_methods.is_empty() {
            return Err(DecodeError::Malformed("compression method list"));
        }
        let extensions = optional_extensions(bytes, context.extension_policy)?;
        Ok(Box::new(ClientHello {
            client_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
        }))
    }
}

impl ByteSerializable for ClientHello {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.extend(&self.version_bytes());
        bytes.extend_from_slice(self.random_bytes());
        bytes.extend(&self.session_id_bytes()?);
        bytes.extend(&self.cipher_suites_bytes()?);
        bytes.extend(&self.compression_methods_bytes()?);
        bytes.extend(&self.extensions_bytes()?);
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        ClientHello::decode(bytes, &DecodeContext::default())
    }
}

fn random_from(bytes: &mut ByteParser) -> Result<Random, DecodeError> {
    let mut random: Random = [0u8; 32];
    random.copy_from_slice(&bytes.expect_bytes(32, "random")?);
    Ok(random)
}

fn optional_extensions(
    bytes: &mut ByteParser,
    policy: UnknownExtensionPolicy,
) -> Result<Option<Vec<Extension>>, DecodeError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let block = bytes.expect_vec_u16("extensions")?;
    Ok(Some(decode_extensions(block, policy)?))
}

/// `ServerHello` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>, // length of the data can be 0..32
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Option<Vec<Extension>>,
}

impl ServerHello {
    /// # Errors
    /// Any truncated field, or a session id over 32 bytes.
    pub fn decode(bytes: &mut ByteParser, context: &DecodeContext) -> Result<Box<Self>, DecodeError> {
        let server_version = bytes.expect_u16("server version")?;
        let random = random_from(bytes)?;
        let session_id = bytes.expect_vec_u8("session id")?;
        if session_id.len() > 32 {
            return Err(DecodeError::Malformed("session id longer than 32 bytes"));
        }
        let cipher_suite = CipherSuite::from(bytes.expect_u16("cipher suite")?);
        let compression_method = bytes.expect_u8("compression method")?;
        let extensions = optional_extensions(bytes, context.extension_policy)?;
        debug!("ServerHello selected {cipher_suite}");
        Ok(Box::new(ServerHello {
            server_version,
            random,
            session_id,
            cipher_suite,
            compression_method,
            extensions,
        }))
    }
}

impl ByteSerializable for ServerHello {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.extend(self.server_version.to_be_bytes().iter());
        bytes.extend(self.random.iter());
        if self.session_id.len() > 32 {
            return None;
        }
        bytes.push(u8::try_from(self.session_id.len()).ok()?);
        bytes.extend(self.session_id.iter());
        bytes.extend(self.cipher_suite.as_ref());
        bytes.push(self.compression_method);
        if let Some(extensions) = &self.extensions {
            bytes.extend(encode_extensions(extensions)?);
        }
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        ServerHello::decode(bytes, &DecodeContext::default())
    }
}

/// [`Certificate` message](https://datatracker.ietf.org/doc/html/rfc2246#section-7.4.2)
/// This message conveys the server's certificate chain, leaf first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub certificate_list: Vec<Vec<u8>>, // each DER certificate is 1..2^24-1 (3 bytes to present)
}

impl Certificate {
    #[must_use]
    pub fn leaf(&self) -> Option<&[u8]> {
        self.certificate_list.first().map(Vec::as_slice)
    }
}

impl ByteSerializable for Certificate {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut cert_list_bytes = Vec::new();
        for certificate in &self.certificate_list {
            let cert_len = u32::try_from(certificate.len()).ok()?;
            if cert_len > 0x00FF_FFFF {
                return None;
            }
            cert_list_bytes.extend_from_slice(&cert_len.to_be_bytes()[1..]);
            cert_list_bytes.extend_from_slice(certificate);
        }
        let list_len = u32::try_from(cert_list_bytes.len()).ok()?;
        if list_len > 0x00FF_FFFF {
            return None;
        }
        let mut bytes = list_len.to_be_bytes()[1..].to_vec();
        bytes.extend(cert_list_bytes);
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        let mut list = ByteParser::from(bytes.expect_vec_u24("certificate list")?);
        let mut certificate_list = Vec::new();
        while !list.is_empty() {
            certificate_list.push(list.expect_vec_u24("certificate")?);
        }
        debug!("Parsed Certificate message with {} entries", certificate_list.len());
        Ok(Box::new(Certificate { certificate_list }))
    }
}

/// Server Diffie-Hellman parameters, each a big-endian unsigned integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDHParams {
    pub dh_p: Vec<u8>,
    pub dh_g: Vec<u8>,
    pub dh_ys: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerECDHParams {
    pub curve_params: ECParameters,
    pub public: ECPoint,
}

/// [`ServerKeyExchange`](https://datatracker.ietf.org/doc/html/rfc2246#section-7.4.3)
/// whose layout depends on the key exchange chosen by `ServerHello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyExchange {
    Dh {
        params: ServerDHParams,
        signature: Vec<u8>,
    },
    Ecdh {
        params: ServerECDHParams,
        signature: Vec<u8>,
    },
    /// Body kept as received when no key exchange context was known.
    Opaque(Vec<u8>),
}

impl ServerKeyExchange {
    /// # Errors
    /// Any truncated field, or an `Rsa` key exchange, which never carries this message.
    pub fn decode(
        bytes: &mut ByteParser,
        key_exchange: Option<KeyExchangeAlgorithm>,
    ) -> Result<Box<Self>, DecodeError> {
        let server_key_exchange = match key_exchange {
            Some(kx) if kx.is_dh() => {
                let params = ServerDHParams {
                    dh_p: bytes.expect_vec_u16("dh_p")?,
                    dh_g: bytes.expect_vec_u16("dh_g")?,
                    dh_ys: bytes.expect_vec_u16("dh_Ys")?,
                };
                let signature = bytes.expect_vec_u16("signature")?;
                ServerKeyExchange::Dh { params, signature }
            }
            Some(kx) if kx.is_ecdh() => {
                let curve_params = *ECParameters::from_bytes(bytes)?;
                let public = *ECPoint::from_bytes(bytes)?;
                let signature = bytes.expect_vec_u16("signature")?;
                ServerKeyExchange::Ecdh {
                    params: ServerECDHParams {
                        curve_params,
                        public,
                    },
                    signature,
                }
            }
            Some(_) => {
                return Err(DecodeError::Malformed(
                    "server key exchange for an RSA key exchange",
                ))
            }
            None => ServerKeyExchange::Opaque(bytes.drain()),
        };
        Ok(Box::new(server_key_exchange))
    }
}

impl ByteSerializable for ServerKeyExchange {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        match self {
            ServerKeyExchange::Dh { params, signature } => {
                for value in [&params.dh_p, &params.dh_g, &params.dh_ys, signature] {
                    bytes.extend(u16::try_from(value.len()).ok()?.to_be_bytes());
                    bytes.extend_from_slice(value);
                }
            }
            ServerKeyExchange::Ecdh { params, signature } => {
                bytes.extend(params.curve_params.as_bytes()?);
                bytes.extend(params.public.as_bytes()?);
                bytes.extend(u16::try_from(signature.len()).ok()?.to_be_bytes());
                bytes.extend_from_slice(signature);
            }
            ServerKeyExchange::Opaque(body) => bytes.extend_from_slice(body),
        }
        Some(bytes)
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        ServerKeyExchange::decode(bytes, None)
    }
}

/// [`ClientKeyExchange`](https://datatracker.ietf.org/doc/html/rfc2246#section-7.4.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    /// RSA encrypted premaster secret, 2 byte length prefix in TLS 1.0.
    EncryptedPreMasterSecret(Vec<u8>),
    /// Client Diffie-Hellman public value Yc.
    DhPublic(Vec<u8>),
    /// Client ECDH public point.
    EcdhPublic(ECPoint),
}

impl ClientKeyExchange {
    /// Decodes against the negotiated key exchange; RSA is assumed without one.
    ///
    /// # Errors
    /// Any truncated field.
    pub fn decode(
        bytes: &mut ByteParser,
        key_exchange: Option<KeyExchangeAlgorithm>,
    ) -> Result<Box<Self>, DecodeError> {
        let client_key_exchange = match key_exchange {
            Some(kx) if kx.is_dh() => {
                ClientKeyExchange::DhPublic(bytes.expect_vec_u16("dh_Yc")?)
            }
            Some(kx) if kx.is_ecdh() => ClientKeyExchange::EcdhPublic(*ECPoint::from_bytes(bytes)?),
            _ => ClientKeyExchange::EncryptedPreMasterSecret(
                bytes.expect_vec_u16("encrypted premaster secret")?,
            ),
        };
        Ok(Box::new(client_key_exchange))
    }
}

impl ByteSerializable for ClientKeyExchange {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            ClientKeyExchange::EncryptedPreMasterSecret(value) | ClientKeyExchange::DhPublic(value) => {
                let mut bytes = u16::try_from(value.len()).ok()?.to_be_bytes().to_vec();
                bytes.extend_from_slice(value);
                Some(bytes)
            }
            ClientKeyExchange::EcdhPublic(point) => point.as_bytes(),
        }
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        ClientKeyExchange::decode(bytes, None)
    }
}

/// `Finished` message closes the handshake with 12 bytes of PRF output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl ByteSerializable for Finished {
    fn as_bytes(&self) -> Option<Vec<u8>> {
        // The length is already encoded in the Handshake message header
        Some(self.verify_data.clone())
    }

    fn from_bytes(bytes: &mut ByteParser) -> Result<Box<Self>, DecodeError> {
        if bytes.len() != VERIFY_DATA_LEN {
            return Err(DecodeError::LengthMismatch {
                field: "finished verify data",
                declared: VERIFY_DATA_LEN,
                actual: bytes.len(),
            });
        }
        let verify_data = bytes.drain();
        Ok(Box::new(Finished { verify_data }))
    }
}
