//! Session and attack settings, filled from command-line flags by the binary.
use crate::error::Error;
use crate::extensions::{Extension, ExtensionData, ServerNameList, UnknownExtensionPolicy};
use crate::handshake::cipher_suites::{self, CipherSuite};
use crate::handshake::{ProtocolVersion, TLS_VERSION_1_0};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Version offered in `ClientHello` and used in the premaster secret.
    pub protocol_version: ProtocolVersion,
    /// Version written in record headers.
    pub record_version: ProtocolVersion,
    pub cipher_suites: Vec<CipherSuite>,
    pub read_timeout: Duration,
    pub extensions: Vec<Extension>,
    pub extension_policy: UnknownExtensionPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: TLS_VERSION_1_0,
            record_version: TLS_VERSION_1_0,
            cipher_suites: vec![
                cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA,
                cipher_suites::TLS_RSA_WITH_AES_256_CBC_SHA,
            ],
            read_timeout: Duration::from_millis(2000),
            extensions: Vec::new(),
            extension_policy: UnknownExtensionPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Adds a `server_name` extension for `host` unless it is an IP literal.
    #[must_use]
    pub fn with_server_name(mut self, host: &str) -> Self {
        if host.parse::<std::net::IpAddr>().is_err() {
            self.extensions
                .push(Extension::new(ExtensionData::ServerName(ServerNameList::host(host))));
        }
        self
    }

    /// # Errors
    /// `Config` for an empty suite list or a zero timeout.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cipher_suites.is_empty() {
            return Err(Error::Config("at least one cipher suite is required".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackConfig {
    pub workers: usize,
    /// Abort with `BudgetExhausted` once this many oracle queries were made.
    pub max_queries: Option<u64>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_queries: None,
        }
    }
}

impl AttackConfig {
    /// # Errors
    /// `Config` for zero workers or a zero budget.
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.max_queries == Some(0) {
            return Err(Error::Config("query budget must be positive".into()));
        }
        Ok(())
    }
}
