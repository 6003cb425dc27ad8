//! Error types shared by the codec, the handshake workflow and the attack.
use crate::alert::Alert;
use crate::workflow::State;
use thiserror::Error;

/// Malformed input found while decoding bytes received from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{field}: needed {needed} bytes but only {available} available")]
    TooShort {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{field}: declared length {declared} does not match {actual} bytes")]
    LengthMismatch {
        field: &'static str,
        declared: usize,
        actual: usize,
    },
    #[error("unknown content type {0:#04x}")]
    UnknownContentType(u8),
    #[error("unknown handshake type {0:#04x}")]
    UnknownHandshakeType(u8),
    #[error("change cipher spec payload must be exactly one byte")]
    InvalidChangeCipherSpec,
    #[error("{field}: unexpected value {value:#x}")]
    InvalidFixedByte { field: &'static str, value: u16 },
    #[error("unknown extension type {0:#06x}")]
    UnknownExtension(u16),
    #[error("record payload of {0} bytes exceeds 2^14")]
    RecordOverflow(usize),
    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// Everything that can end a handshake session or an attack run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no response from peer")]
    NoResponse,
    #[error("session cancelled")]
    Cancelled,
    #[error("received {received} while in state {state:?}")]
    ProtocolViolation { state: State, received: String },
    #[error("peer sent fatal alert {0}")]
    FatalAlert(Alert),
    #[error("{0} is not yet established")]
    NotYetEstablished(&'static str),
    #[error("record MAC or padding check failed")]
    BadRecordMac,
    #[error("server Finished verify data does not match")]
    FinishedMismatch,
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("cannot encode {0}")]
    Encode(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("oracle inconsistency: {0}")]
    OracleInconsistency(String),
    #[error("numeric failure: {reason}; intervals: {intervals}")]
    Numeric { reason: String, intervals: String },
    #[error("query budget of {0} oracle queries exhausted")]
    BudgetExhausted(u64),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Process exit code used by the command-line driver.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::OracleInconsistency(_) => 2,
            Error::NoResponse => 3,
            Error::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                3
            }
            Error::Io(_) | Error::Cancelled => 4,
            Error::Numeric { .. } | Error::BudgetExhausted(_) => 6,
            _ => 5,
        }
    }
}
