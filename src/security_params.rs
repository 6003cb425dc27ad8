//! Per-session handshake parameters.
use crate::crypto::{self, KeyBlock};
use crate::error::Error;
use crate::handshake::cipher_suites::{CipherSuite, KeyExchangeAlgorithm};
use crate::handshake::{ProtocolVersion, Random, ServerDHParams, ServerECDHParams};
use crate::rsa::RsaPublicKey;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ConnectionEnd {
    #[default]
    Client,
    Server,
}

/// Everything negotiated so far in one handshake session. Getters never
/// return a default value: a field that has not been set yet is reported
/// as `NotYetEstablished`.
#[derive(Debug, Clone, Default)]
pub struct SecurityParameters {
    pub connection_end: ConnectionEnd,
    cipher_suite: Option<CipherSuite>,
    protocol_version: Option<ProtocolVersion>,
    client_random: Option<Random>,
    server_random: Option<Random>,
    pre_master_secret: Option<Vec<u8>>,
    master_secret: Option<Vec<u8>>,
    server_certificate: Option<Vec<u8>>,
    server_rsa_key: Option<RsaPublicKey>,
    dh_params: Option<ServerDHParams>,
    ecdh_params: Option<ServerECDHParams>,
}

fn established<'a, T>(value: Option<&'a T>, field: &'static str) -> Result<&'a T, Error> {
    value.ok_or(Error::NotYetEstablished(field))
}

impl SecurityParameters {
    #[must_use]
    pub fn new(connection_end: ConnectionEnd) -> Self {
        Self {
            connection_end,
            ..Self::default()
        }
    }

    pub fn set_cipher_suite(&mut self, cipher_suite: CipherSuite) {
        self.cipher_suite = Some(cipher_suite);
    }

    /// # Errors
    /// `NotYetEstablished` before `ServerHello`.
    pub fn cipher_suite(&self) -> Result<CipherSuite, Error> {
        established(self.cipher_suite.as_ref(), "cipher suite").copied()
    }

    /// Key exchange implied by the negotiated cipher suite.
    ///
    /// # Errors
    /// `NotYetEstablished` before `ServerHello`, `Unsupported` for a suite
    /// outside the registry.
    pub fn key_exchange(&self) -> Result<KeyExchangeAlgorithm, Error> {
        self.cipher_suite()?
            .key_exchange()
            .ok_or(Error::Unsupported("cipher suite key exchange"))
    }

    pub fn set_protocol_version(&mut self, version: ProtocolVersion) {
        self.protocol_version = Some(version);
    }

    /// # Errors
    /// `NotYetEstablished` before `ServerHello`.
    pub fn protocol_version(&self) -> Result<ProtocolVersion, Error> {
        established(self.protocol_version.as_ref(), "protocol version").copied()
    }

    pub fn set_client_random(&mut self, random: Random) {
        self.client_random = Some(random);
    }

    /// # Errors
    /// `NotYetEstablished` before `ClientHello`.
    pub fn client_random(&self) -> Result<&Random, Error> {
        established(self.client_random.as_ref(), "client random")
    }

    pub fn set_server_random(&mut self, random: Random) {
        self.server_random = Some(random);
    }

    /// # Errors
    /// `NotYetEstablished` before `ServerHello`.
    pub fn server_random(&self) -> Result<&Random, Error> {
        established(self.server_random.as_ref(), "server random")
    }

    pub fn set_pre_master_secret(&mut self, pre_master_secret: Vec<u8>) {
        self.pre_master_secret = Some(pre_master_secret);
    }

    /// # Errors
    /// `NotYetEstablished` before `ClientKeyExchange` is built.
    pub fn pre_master_secret(&self) -> Result<&[u8], Error> {
        established(self.pre_master_secret.as_ref(), "premaster secret").map(Vec::as_slice)
    }

    /// # Errors
    /// `NotYetEstablished` unless both randoms are already set.
    pub fn set_master_secret(&mut self, master_secret: Vec<u8>) -> Result<(), Error> {
        self.client_random()?;
        self.server_random()?;
        self.master_secret = Some(master_secret);
        Ok(())
    }

    /// Derives and stores the master secret from the premaster secret.
    ///
    /// # Errors
    /// `NotYetEstablished` when a random or the premaster secret is missing.
    pub fn derive_master_secret(&mut self) -> Result<(), Error> {
        let master_secret = crypto::master_secret(
            self.pre_master_secret()?,
            self.client_random()?,
            self.server_random()?,
        )?;
        self.set_master_secret(master_secret)
    }

    /// # Errors
    /// `NotYetEstablished` before the master secret is derived.
    pub fn master_secret(&self) -> Result<&[u8], Error> {
        established(self.master_secret.as_ref(), "master secret").map(Vec::as_slice)
    }

    /// Key block for the negotiated AES-CBC-SHA suite.
    ///
    /// # Errors
    /// `NotYetEstablished` for missing inputs, `Unsupported` for suites we cannot protect.
    pub fn key_block(&self) -> Result<KeyBlock, Error> {
        let key_len = self
            .cipher_suite()?
            .aes_key_len()
            .ok_or(Error::Unsupported("record protection for this cipher suite"))?;
        KeyBlock::derive(
            self.master_secret()?,
            self.client_random()?,
            self.server_random()?,
            key_len,
        )
    }

    /// Stores the DER leaf certificate as received.
    pub fn set_server_certificate(&mut self, certificate: Vec<u8>) {
        self.server_certificate = Some(certificate);
    }

    /// # Errors
    /// `NotYetEstablished` before a `Certificate` message.
    pub fn server_certificate(&self) -> Result<&[u8], Error> {
        established(self.server_certificate.as_ref(), "server certificate").map(Vec::as_slice)
    }

    pub fn set_server_rsa_key(&mut self, key: RsaPublicKey) {
        self.server_rsa_key = Some(key);
    }

    /// # Errors
    /// `NotYetEstablished` until a key is extracted or set explicitly.
    pub fn server_rsa_key(&self) -> Result<&RsaPublicKey, Error> {
        established(self.server_rsa_key.as_ref(), "server RSA key")
    }

    pub fn set_dh_params(&mut self, params: ServerDHParams) {
        self.dh_params = Some(params);
    }

    /// # Errors
    /// `NotYetEstablished` before a DH `ServerKeyExchange`.
    pub fn dh_params(&self) -> Result<&ServerDHParams, Error> {
        established(self.dh_params.as_ref(), "DH parameters")
    }

    pub fn set_ecdh_params(&mut self, params: ServerECDHParams) {
        self.ecdh_params = Some(params);
    }

    /// # Errors
    /// `NotYetEstablished` before an ECDH `ServerKeyExchange`.
    pub fn ecdh_params(&self) -> Result<&ServerECDHParams, Error> {
        established(self.ecdh_params.as_ref(), "ECDH parameters")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::cipher_suites;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unset_fields_are_not_established() {
        let params = SecurityParameters::new(ConnectionEnd::Client);
        assert!(matches!(
            params.cipher_suite(),
            Err(Error::NotYetEstablished("cipher suite"))
        ));
        assert!(matches!(
            params.master_secret(),
            Err(Error::NotYetEstablished("master secret"))
        ));
        assert!(matches!(
            params.server_rsa_key(),
            Err(Error::NotYetEstablished("server RSA key"))
        ));
    }

    #[test]
    fn test_master_secret_requires_both_randoms() {
        let mut params = SecurityParameters::default();
        params.set_client_random([0x11; 32]);
        assert!(matches!(
            params.set_master_secret(vec![0; 48]),
            Err(Error::NotYetEstablished("server random"))
        ));
        params.set_server_random([0x22; 32]);
        params.set_master_secret(vec![0; 48]).unwrap();
        assert_eq!(params.master_secret().unwrap(), &[0u8; 48][..]);
    }

    #[test]
    fn test_key_block_for_negotiated_suite() {
        let mut params = SecurityParameters::default();
        params.set_client_random([0x11; 32]);
        params.set_server_random([0x22; 32]);
        let mut pms = vec![0x03, 0x01];
        pms.extend(0u8..46);
        params.set_pre_master_secret(pms);
        params.derive_master_secret().unwrap();
        assert!(matches!(params.key_block(), Err(Error::NotYetEstablished(_))));

        params.set_cipher_suite(cipher_suites::TLS_RSA_WITH_AES_256_CBC_SHA);
        assert_eq!(params.key_exchange().unwrap(), KeyExchangeAlgorithm::Rsa);
        assert_eq!(params.key_block().unwrap().client_key.len(), 32);

        params.set_cipher_suite(cipher_suites::TLS_RSA_WITH_3DES_EDE_CBC_SHA);
        assert!(matches!(params.key_block(), Err(Error::Unsupported(_))));
    }
}
