//! PKCS#1 v1.5 conformity checks and the oracles that answer them.
//!
//! Real servers differ in how strictly they check a decrypted block before
//! rejecting it. Each [`OraclePolicy`] models one such behaviour; the three
//! letters say which of the checks below are enforced (`F`) or skipped (`T`).
use crate::error::Error;
use crate::rsa::{to_k_bytes, RsaPrivateKey, RsaPublicKey};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use log::{debug, warn};
use num_bigint::BigUint;
use std::fmt;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Conformity {
    Conformant,
    NonConformant,
}

impl Conformity {
    #[must_use]
    pub fn is_conformant(self) -> bool {
        self == Conformity::Conformant
    }
}

impl From<bool> for Conformity {
    fn from(conformant: bool) -> Self {
        if conformant {
            Conformity::Conformant
        } else {
            Conformity::NonConformant
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum OraclePolicy {
    /// Only `00 02` and the block length.
    Ttt,
    /// A zero separator somewhere after the padding.
    Ftt,
    /// Eight nonzero padding bytes.
    Tft,
    /// Separator and eight nonzero padding bytes.
    #[default]
    Fft,
    /// As `Fft`, with the separator right before a 48-byte premaster secret.
    Fff,
    /// The checks of old JSSE providers.
    Jsse,
}

impl fmt::Display for OraclePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OraclePolicy::Ttt => "TTT",
            OraclePolicy::Ftt => "FTT",
            OraclePolicy::Tft => "TFT",
            OraclePolicy::Fft => "FFT",
            OraclePolicy::Fff => "FFF",
            OraclePolicy::Jsse => "JSSE",
        };
        f.write_str(name)
    }
}

impl FromStr for OraclePolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "TTT" => Ok(OraclePolicy::Ttt),
            "FTT" => Ok(OraclePolicy::Ftt),
            "TFT" => Ok(OraclePolicy::Tft),
            "FFT" => Ok(OraclePolicy::Fft),
            "FFF" => Ok(OraclePolicy::Fff),
            "JSSE" => Ok(OraclePolicy::Jsse),
            other => Err(Error::Config(format!("unknown oracle policy {other}"))),
        }
    }
}

/// Zero separator at an offset in `9..=block_size - 2`.
fn check_first(msg: &[u8]) -> bool {
    msg.iter().skip(9).any(|b| *b == 0)
}

/// No zero among the first eight padding bytes.
fn check_second(msg: &[u8]) -> bool {
    msg.get(1..9).is_some_and(no_zero)
}

/// Separator exactly where a 48-byte premaster secret starts.
fn check_third(msg: &[u8]) -> bool {
    let Some(separator) = msg.len().checked_sub(49) else {
        return false;
    };
    msg[separator] == 0 && msg.get(10..separator).is_some_and(no_zero)
}

fn no_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b != 0)
}

fn check_jsse(msg: &[u8]) -> bool {
    let len = msg.len();
    if !check_second(msg) {
        return false;
    }
    if msg[len - 2] == 0 && msg.get(10..len - 2).is_some_and(no_zero) {
        return true;
    }
    len > 128
        && msg
            .get(9..len - 1 - 48 - 80)
            .is_some_and(|window| window.contains(&0))
}

/// Classifies a decrypted block of `block_size` bytes.
///
/// One leading zero byte is stripped first. Whatever remains must start with
/// `0x02` and be `block_size - 1` bytes long, otherwise the block is
/// nonconformant under every policy.
#[must_use]
pub fn classify(decrypted: &[u8], policy: OraclePolicy, block_size: usize) -> Conformity {
    let msg = match decrypted.first() {
        Some(0) => &decrypted[1..],
        _ => decrypted,
    };
    if block_size < 2 || msg.len() != block_size - 1 || msg[0] != 0x02 {
        return Conformity::NonConformant;
    }
    let conformant = match policy {
        OraclePolicy::Ttt => true,
        OraclePolicy::Ftt => check_first(msg),
        OraclePolicy::Tft => check_second(msg),
        OraclePolicy::Fft => check_first(msg) && check_second(msg),
        OraclePolicy::Fff => check_first(msg) && check_second(msg) && check_third(msg),
        OraclePolicy::Jsse => check_jsse(msg),
    };
    Conformity::from(conformant)
}

/// Counts queries across threads.
#[derive(Debug, Default)]
pub struct QueryCounter(AtomicU64);

impl QueryCounter {
    /// Returns the count including this query.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Answers whether a ciphertext decrypts to a conformant block.
pub trait Oracle: Send + Sync {
    /// # Errors
    /// Whatever prevented an answer. Errors are never retried.
    fn query(&self, ciphertext: &[u8]) -> Result<bool, Error>;

    fn public_key(&self) -> &RsaPublicKey;

    /// Modulus length in bytes.
    fn block_size(&self) -> usize {
        self.public_key().size()
    }

    /// `true` when queries take the padded plaintext instead of a ciphertext.
    fn is_plaintext_oracle(&self) -> bool {
        false
    }

    fn queries(&self) -> u64;
}

/// Decrypts with a known private key and classifies locally.
#[derive(Debug)]
pub struct SimulatedOracle {
    key: RsaPrivateKey,
    policy: OraclePolicy,
    counter: QueryCounter,
}

impl SimulatedOracle {
    #[must_use]
    pub fn new(key: RsaPrivateKey, policy: OraclePolicy) -> Self {
        Self {
            key,
            policy,
            counter: QueryCounter::default(),
        }
    }
}

impl Oracle for SimulatedOracle {
    fn query(&self, ciphertext: &[u8]) -> Result<bool, Error> {
        self.counter.increment();
        let decrypted = self.key.decrypt_raw(ciphertext);
        Ok(classify(&decrypted, self.policy, self.block_size()).is_conformant())
    }

    fn public_key(&self) -> &RsaPublicKey {
        &self.key.public
    }

    fn queries(&self) -> u64 {
        self.counter.get()
    }
}

/// Classifies the query itself, read as the padded plaintext modulo `n`.
#[derive(Debug)]
pub struct PlaintextOracle {
    public_key: RsaPublicKey,
    policy: OraclePolicy,
    counter: QueryCounter,
}

impl PlaintextOracle {
    #[must_use]
    pub fn new(public_key: RsaPublicKey, policy: OraclePolicy) -> Self {
        Self {
            public_key,
            policy,
            counter: QueryCounter::default(),
        }
    }
}

impl Oracle for PlaintextOracle {
    fn query(&self, plaintext: &[u8]) -> Result<bool, Error> {
        self.counter.increment();
        let m = BigUint::from_bytes_be(plaintext) % &self.public_key.n;
        let block = to_k_bytes(&m, self.block_size());
        Ok(classify(&block, self.policy, self.block_size()).is_conformant())
    }

    fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    fn is_plaintext_oracle(&self) -> bool {
        true
    }

    fn queries(&self) -> u64 {
        self.counter.get()
    }
}

/// Runs an external command per query with the base64 ciphertext appended as
/// the last argument. Exit status 0 means conformant.
#[derive(Debug)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    public_key: RsaPublicKey,
    counter: QueryCounter,
}

impl CommandOracle {
    /// `template` is split on whitespace; the first word is the program.
    ///
    /// # Errors
    /// `Config` for an empty template.
    pub fn new(template: &str, public_key: RsaPublicKey) -> Result<Self, Error> {
        let mut words = template.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| Error::Config("oracle command is empty".into()))?;
        Ok(Self {
            program,
            args: words.collect(),
            public_key,
            counter: QueryCounter::default(),
        })
    }
}

impl Oracle for CommandOracle {
    fn query(&self, ciphertext: &[u8]) -> Result<bool, Error> {
        let count = self.counter.increment();
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(BASE64_STANDARD.encode(ciphertext))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        debug!("Query {count}: {} exited with {status}", self.program);
        Ok(status.success())
    }

    fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    fn queries(&self) -> u64 {
        self.counter.get()
    }
}

/// Result of one pooled query: input index, the query and the answer.
pub type PooledAnswer = (usize, Vec<u8>, Result<bool, Error>);

/// Runs batches of queries on a fixed number of scoped worker threads.
pub struct QueryPool<'a> {
    oracle: &'a dyn Oracle,
    workers: usize,
}

impl<'a> QueryPool<'a> {
    #[must_use]
    pub fn new(oracle: &'a dyn Oracle, workers: usize) -> Self {
        Self {
            oracle,
            workers: workers.max(1),
        }
    }

    /// Answers every query; results come back in input order.
    #[must_use]
    pub fn run(&self, queries: Vec<Vec<u8>>) -> Vec<PooledAnswer> {
        if self.workers == 1 || queries.len() < 2 {
            return queries
                .into_iter()
                .enumerate()
                .map(|(index, query)| {
                    let answer = self.oracle.query(&query);
                    (index, query, answer)
                })
                .collect();
        }
        let next = AtomicUsize::new(0);
        let answers: Mutex<Vec<Option<Result<bool, Error>>>> =
            Mutex::new((0..queries.len()).map(|_| None).collect());
        thread::scope(|scope| {
            for _ in 0..self.workers.min(queries.len()) {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(query) = queries.get(index) else {
                        break;
                    };
                    let answer = self.oracle.query(query);
                    match answers.lock() {
                        Ok(mut answers) => answers[index] = Some(answer),
                        Err(_) => {
                            warn!("Query pool result lock poisoned");
                            break;
                        }
                    }
                });
            }
        });
        let answers = answers
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        queries
            .into_iter()
            .zip(answers)
            .enumerate()
            .map(|(index, (query, answer))| {
                let answer = answer.unwrap_or_else(|| {
                    Err(Error::OracleInconsistency(format!("query {index} was never answered")))
                });
                (index, query, answer)
            })
            .collect()
    }
}
