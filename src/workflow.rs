//! # Handshake workflow
//!
//! Drives one client-side TLS 1.0 handshake as an explicit state machine:
//!
//! ```text
//! CLIENT_HELLO -> SERVER_HELLO -> SERVER_CERTIFICATE -> SERVER_KEY_EXCHANGE
//!   -> SERVER_HELLO_DONE -> CLIENT_KEY_EXCHANGE -> CLIENT_CHANGE_CIPHER_SPEC
//!   -> CLIENT_FINISHED -> SERVER_CHANGE_CIPHER_SPEC -> SERVER_FINISHED
//! ```
//!
//! `ALERT` can be entered from any state, `CLOSED` ends the session when the
//! peer closes the connection. Every sent and received message is recorded in
//! a [`MessageTrace`], and observers registered per state may inspect or
//! replace outgoing messages before they are encoded.
use crate::alert::{Alert, AlertDescription};
use crate::certificate;
use crate::config::SessionConfig;
use crate::crypto::{self, RecordProtection, Sender, PRE_MASTER_SECRET_LEN};
use crate::error::{DecodeError, Error};
use crate::extensions::ByteSerializable;
use crate::handshake::cipher_suites::KeyExchangeAlgorithm;
use crate::handshake::{
    self, ClientHello, ClientKeyExchange, DecodeContext, Finished, Handshake, HandshakeMessage,
    HandshakeType, Random, ServerDHParams, ServerHello, ServerKeyExchange,
};
use crate::parser::ByteParser;
use crate::report::{Event, LogReporter, Reporter};
use crate::security_params::{ConnectionEnd, SecurityParameters};
use crate::tls_record::{ChangeCipherSpec, ContentType, TLSRecord};
use crate::trace::{Direction, MessageTrace};
use crate::transport::{is_timeout, RecordSink, RecordSource};
use log::{debug, error, info, warn};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    ClientHello,
    ServerHello,
    ServerCertificate,
    ServerKeyExchange,
    ServerHelloDone,
    ClientKeyExchange,
    ClientChangeCipherSpec,
    ClientFinished,
    ServerChangeCipherSpec,
    ServerFinished,
    Alert,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::ClientHello => "CLIENT_HELLO",
            State::ServerHello => "SERVER_HELLO",
            State::ServerCertificate => "SERVER_CERTIFICATE",
            State::ServerKeyExchange => "SERVER_KEY_EXCHANGE",
            State::ServerHelloDone => "SERVER_HELLO_DONE",
            State::ClientKeyExchange => "CLIENT_KEY_EXCHANGE",
            State::ClientChangeCipherSpec => "CLIENT_CHANGE_CIPHER_SPEC",
            State::ClientFinished => "CLIENT_FINISHED",
            State::ServerChangeCipherSpec => "SERVER_CHANGE_CIPHER_SPEC",
            State::ServerFinished => "SERVER_FINISHED",
            State::Alert => "ALERT",
            State::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// A decoded record payload, as the workflow and its observers see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Handshake(Handshake),
    ChangeCipherSpec,
    Alert(Alert),
    ApplicationData(Vec<u8>),
}

impl Message {
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        match self {
            Message::Handshake(_) => ContentType::Handshake,
            Message::ChangeCipherSpec => ContentType::ChangeCipherSpec,
            Message::Alert(_) => ContentType::Alert,
            Message::ApplicationData(_) => ContentType::ApplicationData,
        }
    }

    /// Plaintext record fragment for this message.
    ///
    /// # Errors
    /// `Encode` when a field does not fit its length prefix.
    pub fn fragment(&self) -> Result<Vec<u8>, Error> {
        match self {
            Message::Handshake(handshake) => handshake.as_bytes().ok_or(Error::Encode("handshake message")),
            Message::ChangeCipherSpec => Ok(vec![ChangeCipherSpec::VALUE]),
            Message::Alert(alert) => alert.as_bytes().ok_or(Error::Encode("alert")),
            Message::ApplicationData(data) => Ok(data.clone()),
        }
    }

    #[must_use]
    pub fn as_alert(&self) -> Option<&Alert> {
        match self {
            Message::Alert(alert) => Some(alert),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Handshake(handshake) => write!(f, "{}", handshake.message),
            Message::ChangeCipherSpec => write!(f, "ChangeCipherSpec"),
            Message::Alert(alert) => write!(f, "Alert ({alert})"),
            Message::ApplicationData(data) => write!(f, "ApplicationData ({} bytes)", data.len()),
        }
    }
}

/// Shared cancellation flag, checked before every read and write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What an observer gets to see. `message` is the outgoing message before
/// encoding and may be replaced; changes to a received message are ignored.
pub struct ObserverContext<'a> {
    pub state: State,
    pub direction: Direction,
    pub message: &'a mut Message,
    pub security_parameters: &'a SecurityParameters,
}

pub type Observer = Box<dyn FnMut(&mut ObserverContext<'_>) + Send>;

/// How a session ended when no error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Server Finished received and verified.
    Completed,
    /// The server sent a fatal alert.
    Alert(Alert),
    /// The read timeout expired while waiting for the server.
    NoResponse,
    /// The server closed the connection or sent `close_notify`.
    Closed,
}

impl Outcome {
    /// Treats anything but a completed handshake as an error.
    ///
    /// # Errors
    /// `FatalAlert`, `NoResponse`, or an `UnexpectedEof` I/O error for a closed connection.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Outcome::Completed => Ok(()),
            Outcome::Alert(alert) => Err(Error::FatalAlert(alert)),
            Outcome::NoResponse => Err(Error::NoResponse),
            Outcome::Closed => Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the handshake completed",
            ))),
        }
    }
}

pub struct Workflow<T> {
    transport: Option<T>,
    config: SessionConfig,
    state: State,
    security_parameters: SecurityParameters,
    trace: MessageTrace,
    observers: HashMap<State, Observer>,
    reporter: Arc<dyn Reporter>,
    cancel: CancelToken,
    /// Every handshake message so far, headers included, for the Finished hashes.
    handshake_messages: Vec<u8>,
    writer: Option<RecordProtection>,
    reader: Option<RecordProtection>,
    pending_reader: Option<RecordProtection>,
    outcome: Option<Outcome>,
}

impl<T: RecordSource + RecordSink> Workflow<T> {
    #[must_use]
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport: Some(transport),
            config,
            state: State::ClientHello,
            security_parameters: SecurityParameters::new(ConnectionEnd::Client),
            trace: MessageTrace::new(),
            observers: HashMap::new(),
            reporter: Arc::new(LogReporter),
            cancel: CancelToken::new(),
            handshake_messages: Vec::new(),
            writer: None,
            reader: None,
            pending_reader: None,
            outcome: None,
        }
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

    /// Registers the observer for `state`, replacing any earlier one.
    pub fn observe<F>(&mut self, state: State, observer: F) -> &mut Self
    where
        F: FnMut(&mut ObserverContext<'_>) + Send + 'static,
    {
        self.observers.insert(state, Box::new(observer));
        self
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn trace(&self) -> &MessageTrace {
        &self.trace
    }

    #[must_use]
    pub fn security_parameters(&self) -> &SecurityParameters {
        &self.security_parameters
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// The transport, unless the session dropped it after an error or cancellation.
    #[must_use]
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Runs the handshake until it completes, the server alerts or closes,
    /// or the read timeout expires.
    ///
    /// # Errors
    /// Decode errors, protocol violations, record or Finished verification
    /// failures, socket errors and cancellation. The transport is dropped on
    /// any error.
    pub fn run(&mut self) -> Result<Outcome, Error> {
        match self.drive() {
            Ok(outcome) => {
                info!("Session ended in {} with {outcome:?}", self.state);
                Ok(outcome)
            }
            Err(Error::Cancelled) => {
                warn!("Session cancelled in {}", self.state);
                self.transport = None;
                Err(Error::Cancelled)
            }
            Err(e) => {
                error!("Session aborted in {}: {e}", self.state);
                if matches!(
                    e,
                    Error::Decode(_)
                        | Error::ProtocolViolation { .. }
                        | Error::BadRecordMac
                        | Error::FinishedMismatch
                ) {
                    self.enter_state(State::Alert);
                }
                self.transport = None;
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> Result<Outcome, Error> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }
        self.config.validate()?;
        self.send_client_hello()?;
        loop {
            if let Some(outcome) = &self.outcome {
                return Ok(outcome.clone());
            }
            self.check_cancelled()?;
            let record = match self.transport_mut()?.read_record() {
                Ok(record) => record,
                Err(e) if is_timeout(&e) => {
                    warn!("No response from server in {}", self.state);
                    self.outcome = Some(Outcome::NoResponse);
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Server closed the connection in {}", self.state);
                    self.enter_state(State::Closed);
                    self.outcome = Some(Outcome::Closed);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.process_record(&record)?;
        }
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut T, Error> {
        self.transport.as_mut().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport already closed",
            ))
        })
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.check_cancelled()?;
        self.transport_mut()?.write(bytes)?;
        debug!("Sent {} bytes", bytes.len());
        Ok(())
    }

    fn violation(&self, received: impl Into<String>) -> Error {
        Error::ProtocolViolation {
            state: self.state,
            received: received.into(),
        }
    }

    fn enter_state(&mut self, state: State) {
        if self.state != state {
            self.reporter.report(Event::StateChanged {
                from: self.state,
                to: state,
            });
            self.state = state;
        }
    }

    fn record_entry(
        &mut self,
        state: State,
        direction: Direction,
        message: Message,
        raw: Vec<u8>,
        previous: Option<Message>,
        continued: bool,
    ) {
        let previous_state = self.state;
        self.enter_state(state);
        let entry = self
            .trace
            .record(state, previous_state, direction, message, raw, previous, continued);
        debug!("{entry}");
        self.reporter.report(Event::TraceAppended {
            state,
            direction,
            summary: entry.message.to_string(),
            continued,
        });
    }

    fn notify(&mut self, state: State, direction: Direction, message: &mut Message) {
        if let Some(observer) = self.observers.get_mut(&state) {
            let mut context = ObserverContext {
                state,
                direction,
                message,
                security_parameters: &self.security_parameters,
            };
            observer(&mut context);
        }
    }

    /// Runs the observer, traces the message and returns the encoded record.
    fn prepare_outgoing(&mut self, state: State, message: Message) -> Result<Vec<u8>, Error> {
        let mut outgoing = message.clone();
        self.notify(state, Direction::Sent, &mut outgoing);
        let previous = (outgoing != message).then_some(message);
        if previous.is_some() {
            info!("Observer replaced the message sent in {state}");
        }
        if let Message::Handshake(Handshake {
            message: HandshakeMessage::ClientHello(hello),
            ..
        }) = &outgoing
        {
            self.security_parameters.set_client_random(hello.random);
        }

        let content = outgoing.fragment()?;
        if matches!(outgoing, Message::Handshake(_)) {
            self.handshake_messages.extend_from_slice(&content);
        }
        let content_type = outgoing.content_type();
        let fragment = match self.writer.as_mut() {
            Some(writer) => writer.seal(content_type, self.config.record_version, &content)?,
            None => content.clone(),
        };
        let record = TLSRecord::new(content_type, self.config.record_version, fragment)
            .as_bytes()
            .ok_or(Error::Encode("record"))?;
        self.record_entry(state, Direction::Sent, outgoing, content, previous, false);
        Ok(record)
    }

    fn send_client_hello(&mut self) -> Result<(), Error> {
        let mut random: Random = [0; 32];
        rand::rng().fill(&mut random[..]);
        self.security_parameters.set_client_random(random);
        let client_hello = ClientHello {
            client_version: self.config.protocol_version,
            random,
            session_id: Vec::new(),
            cipher_suites: self.config.cipher_suites.clone(),
            compression_methods: vec![0],
            extensions: if self.config.extensions.is_empty() {
                None
            } else {
                Some(self.config.extensions.clone())
            },
        };
        let message = Message::Handshake(Handshake::new(HandshakeMessage::ClientHello(client_hello)));
        let record = self.prepare_outgoing(State::ClientHello, message)?;
        self.send(&record)
    }

    /// ClientKeyExchange, ChangeCipherSpec and Finished, sent in one write.
    fn send_client_flight(&mut self) -> Result<(), Error> {
        let client_key_exchange = self.build_client_key_exchange()?;
        let mut flight = self.prepare_outgoing(
            State::ClientKeyExchange,
            Message::Handshake(Handshake::new(HandshakeMessage::ClientKeyExchange(
                client_key_exchange,
            ))),
        )?;
        self.security_parameters.derive_master_secret()?;
        flight.extend(self.prepare_outgoing(State::ClientChangeCipherSpec, Message::ChangeCipherSpec)?);

        let keys = self.security_parameters.key_block()?;
        self.writer = Some(RecordProtection::new(
            &keys.client_key,
            &keys.client_mac_key,
            &keys.client_iv,
        )?);
        self.pending_reader = Some(RecordProtection::new(
            &keys.server_key,
            &keys.server_mac_key,
            &keys.server_iv,
        )?);

        let verify_data = crypto::verify_data(
            self.security_parameters.master_secret()?,
            Sender::Client,
            &self.handshake_messages,
        )?;
        flight.extend(self.prepare_outgoing(
            State::ClientFinished,
            Message::Handshake(Handshake::new(HandshakeMessage::Finished(Finished { verify_data }))),
        )?);
        self.send(&flight)
    }

    fn build_client_key_exchange(&mut self) -> Result<ClientKeyExchange, Error> {
        let mut rng = rand::rng();
        match self.security_parameters.key_exchange()? {
            KeyExchangeAlgorithm::Rsa => {
                if self.security_parameters.server_rsa_key().is_err() {
                    let key = certificate::extract_rsa_public_key(
                        self.security_parameters.server_certificate()?,
                    )?;
                    self.security_parameters.set_server_rsa_key(key);
                }
                let mut pre_master_secret = vec![0u8; PRE_MASTER_SECRET_LEN];
                pre_master_secret[..2].copy_from_slice(&self.config.protocol_version.to_be_bytes());
                rng.fill(&mut pre_master_secret[2..]);
                let encrypted = self
                    .security_parameters
                    .server_rsa_key()?
                    .encrypt_pkcs1(&pre_master_secret, &mut rng)?;
                self.security_parameters.set_pre_master_secret(pre_master_secret);
                Ok(ClientKeyExchange::EncryptedPreMasterSecret(encrypted))
            }
            kx if kx.is_dh() => {
                let (public, pre_master_secret) =
                    dh_key_agreement(self.security_parameters.dh_params()?, &mut rng)?;
                self.security_parameters.set_pre_master_secret(pre_master_secret);
                Ok(ClientKeyExchange::DhPublic(public))
            }
            _ => Err(Error::Unsupported("ECDH client key exchange")),
        }
    }

    /// Decodes and dispatches one record read from the transport.
    ///
    /// # Errors
    /// Decode errors, protocol violations, MAC failures, and anything the
    /// client flight raises when `ServerHelloDone` is processed.
    pub fn process_record(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let record = *TLSRecord::from_bytes(&mut ByteParser::from(bytes))?;
        let content = match self.reader.as_mut() {
            Some(reader) => reader.open(record.record_type, record.version, &record.fragment)?,
            None => record.fragment,
        };
        match record.record_type {
            ContentType::Handshake => self.process_handshake_fragment(&content),
            ContentType::ChangeCipherSpec => self.process_change_cipher_spec(content),
            ContentType::Alert => self.process_alert(content),
            ContentType::ApplicationData => Err(self.violation("application data")),
        }
    }

    /// Dispatches every handshake message packed into one record, in order.
    fn process_handshake_fragment(&mut self, fragment: &[u8]) -> Result<(), Error> {
        let messages = handshake::split_handshake_messages(fragment)?;
        if messages.is_empty() {
            return Err(DecodeError::Malformed("empty handshake record").into());
        }
        if messages.len() > 1 {
            debug!("Record carries {} handshake messages", messages.len());
        }
        for (index, raw) in messages.into_iter().enumerate() {
            let context = DecodeContext {
                key_exchange: self.security_parameters.key_exchange().ok(),
                extension_policy: self.config.extension_policy,
            };
            let handshake = *Handshake::decode(&mut ByteParser::from(raw.as_slice()), &context)?;
            self.process_handshake(handshake, raw, index > 0)?;
        }
        Ok(())
    }

    fn expected_state(&self, msg_type: HandshakeType) -> Result<State, Error> {
        let (next, allowed): (State, &[State]) = match msg_type {
            HandshakeType::ServerHello => (State::ServerHello, &[State::ClientHello][..]),
            HandshakeType::Certificate => (State::ServerCertificate, &[State::ServerHello][..]),
            // Every supported key exchange is authenticated by a certificate
            HandshakeType::ServerKeyExchange => (State::ServerKeyExchange, &[State::ServerCertificate][..]),
            HandshakeType::ServerHelloDone => (
                State::ServerHelloDone,
                &[State::ServerCertificate, State::ServerKeyExchange][..],
            ),
            HandshakeType::Finished => (State::ServerFinished, &[State::ServerChangeCipherSpec][..]),
            // Ignored during the handshake
            HandshakeType::HelloRequest => (self.state, &[][..]),
            other => return Err(self.violation(format!("{other:?}"))),
        };
        if msg_type == HandshakeType::HelloRequest || allowed.contains(&self.state) {
            Ok(next)
        } else {
            Err(self.violation(format!("{msg_type:?}")))
        }
    }

    fn process_handshake(&mut self, handshake: Handshake, raw: Vec<u8>, continued: bool) -> Result<(), Error> {
        let state = self.expected_state(handshake.msg_type)?;
        match &handshake.message {
            HandshakeMessage::ServerHello(hello) => self.apply_server_hello(hello)?,
            HandshakeMessage::Certificate(certificate) => {
                let leaf = certificate
                    .leaf()
                    .ok_or(DecodeError::Malformed("empty certificate list"))?;
                certificate::log_certificate(leaf);
                self.security_parameters.set_server_certificate(leaf.to_vec());
            }
            HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Dh { params, .. }) => {
                self.security_parameters.set_dh_params(params.clone());
            }
            HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Ecdh { params, .. }) => {
                self.security_parameters.set_ecdh_params(params.clone());
            }
            HandshakeMessage::ServerKeyExchange(ServerKeyExchange::Opaque(_)) => {
                warn!("ServerKeyExchange received before a key exchange was negotiated");
            }
            HandshakeMessage::Finished(finished) => self.verify_server_finished(finished)?,
            _ => {}
        }
        self.handshake_messages.extend_from_slice(&raw);

        let message = Message::Handshake(handshake);
        let mut observed = message.clone();
        self.notify(state, Direction::Received, &mut observed);
        self.record_entry(state, Direction::Received, message, raw, None, continued);

        match state {
            State::ServerHelloDone => self.send_client_flight(),
            State::ServerFinished => {
                info!("Handshake completed");
                self.outcome = Some(Outcome::Completed);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn apply_server_hello(&mut self, hello: &ServerHello) -> Result<(), Error> {
        if !self.config.cipher_suites.contains(&hello.cipher_suite) {
            return Err(self.violation(format!("unoffered cipher suite {}", hello.cipher_suite)));
        }
        if hello.server_version != self.config.protocol_version {
            warn!(
                "Server answered version {:#06x} to {:#06x}",
                hello.server_version, self.config.protocol_version
            );
        }
        self.security_parameters.set_protocol_version(hello.server_version);
        self.security_parameters.set_server_random(hello.random);
        self.security_parameters.set_cipher_suite(hello.cipher_suite);
        Ok(())
    }

    fn verify_server_finished(&self, finished: &Finished) -> Result<(), Error> {
        let expected = crypto::verify_data(
            self.security_parameters.master_secret()?,
            Sender::Server,
            &self.handshake_messages,
        )?;
        if expected != finished.verify_data {
            return Err(Error::FinishedMismatch);
        }
        Ok(())
    }

    fn process_change_cipher_spec(&mut self, content: Vec<u8>) -> Result<(), Error> {
        ChangeCipherSpec::from_bytes(&mut ByteParser::from(content.clone()))?;
        if self.state != State::ClientFinished {
            return Err(self.violation("ChangeCipherSpec"));
        }
        self.reader = Some(
            self.pending_reader
                .take()
                .ok_or(Error::NotYetEstablished("server record keys"))?,
        );
        let mut observed = Message::ChangeCipherSpec;
        self.notify(State::ServerChangeCipherSpec, Direction::Received, &mut observed);
        self.record_entry(
            State::ServerChangeCipherSpec,
            Direction::Received,
            Message::ChangeCipherSpec,
            content,
            None,
            false,
        );
        Ok(())
    }

    /// Fatal alerts end the session, `close_notify` closes it, other warnings
    /// are recorded without a state change.
    fn process_alert(&mut self, content: Vec<u8>) -> Result<(), Error> {
        let alert = *Alert::from_bytes(&mut ByteParser::from(content.clone()))?;
        let state = if alert.description == AlertDescription::CloseNotify {
            State::Closed
        } else if alert.is_fatal() {
            State::Alert
        } else {
            warn!("Warning alert from server: {alert}");
            self.state
        };
        let mut observed = Message::Alert(alert);
        self.notify(State::Alert, Direction::Received, &mut observed);
        self.record_entry(state, Direction::Received, Message::Alert(alert), content, None, false);
        match state {
            State::Closed => self.outcome = Some(Outcome::Closed),
            State::Alert => {
                info!("Server sent {alert}");
                self.outcome = Some(Outcome::Alert(alert));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Client side of an ephemeral Diffie-Hellman exchange. Returns `Yc` and the
/// premaster secret, the shared value with leading zero bytes stripped.
fn dh_key_agreement<R: Rng + ?Sized>(params: &ServerDHParams, rng: &mut R) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let p = BigUint::from_bytes_be(&params.dh_p);
    let g = BigUint::from_bytes_be(&params.dh_g);
    let ys = BigUint::from_bytes_be(&params.dh_ys);
    if p.bits() < 2 || ys.is_zero() {
        return Err(DecodeError::Malformed("DH parameters").into());
    }
    let mut secret = vec![0u8; params.dh_p.len()];
    rng.fill(&mut secret[..]);
    let x = BigUint::from_bytes_be(&secret) % (&p - 1u32) + 1u32;
    let yc = g.modpow(&x, &p);
    let shared = ys.modpow(&x, &p);
    Ok((yc.to_bytes_be(), shared.to_bytes_be()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use crate::handshake::cipher_suites;
    use crate::handshake::{Certificate, TLS_VERSION_1_0};
    use crate::loopback::{server_flight, server_flight_record, LoopbackServer};
    use crate::report::MemoryReporter;
    use crate::transport::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn alert_record(level: AlertLevel, description: AlertDescription) -> Vec<u8> {
        vec![0x15, 0x03, 0x01, 0x00, 0x02, level as u8, description as u8]
    }

    #[test]
    fn test_enumerated_handshake_messages_are_marked_continued() {
        let transport = ScriptedTransport::new(vec![
            server_flight_record(cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA),
            alert_record(AlertLevel::Fatal, AlertDescription::HandshakeFailure),
        ]);
        let mut workflow = Workflow::new(transport, SessionConfig::default());
        let outcome = workflow.run().unwrap();
        assert_eq!(
            outcome,
            Outcome::Alert(Alert::fatal(AlertDescription::HandshakeFailure))
        );
        let entries = workflow.trace().entries();
        let received: Vec<(State, bool)> = entries
            .iter()
            .filter(|entry| entry.direction == Direction::Received)
            .map(|entry| (entry.state, entry.continued))
            .collect();
        assert_eq!(
            received,
            vec![
                (State::ServerHello, false),
                (State::ServerCertificate, true),
                (State::ServerHelloDone, true),
                (State::Alert, false),
            ]
        );
        assert_eq!(
            workflow.trace().states(),
            vec![
                State::ClientHello,
                State::ServerHello,
                State::ServerCertificate,
                State::ServerHelloDone,
                State::ClientKeyExchange,
                State::ClientChangeCipherSpec,
                State::ClientFinished,
                State::Alert,
            ]
        );
        // ClientHello and the client flight
        assert_eq!(workflow.transport().unwrap().written.len(), 2);
    }

    #[test]
    fn test_fatal_alert_stops_reading() {
        let transport = ScriptedTransport::new(vec![
            alert_record(AlertLevel::Fatal, AlertDescription::ProtocolVersion),
            alert_record(AlertLevel::Fatal, AlertDescription::InternalError),
        ]);
        let mut workflow = Workflow::new(transport, SessionConfig::default());
        let outcome = workflow.run().unwrap();
        assert_eq!(
            outcome,
            Outcome::Alert(Alert::fatal(AlertDescription::ProtocolVersion))
        );
        assert_eq!(workflow.state(), State::Alert);
        assert_eq!(workflow.transport().unwrap().remaining(), 1);
        assert!(matches!(outcome.into_result(), Err(Error::FatalAlert(_))));
    }

    #[test]
    fn test_warning_alert_is_recorded_and_close_notify_closes() {
        let transport = ScriptedTransport::new(vec![
            alert_record(AlertLevel::Warning, AlertDescription::NoRenegotiation),
            alert_record(AlertLevel::Warning, AlertDescription::CloseNotify),
        ]);
        let mut workflow = Workflow::new(transport, SessionConfig::default());
        assert_eq!(workflow.run().unwrap(), Outcome::Closed);
        let entries = workflow.trace().entries();
        assert_eq!(entries[1].state, State::ClientHello);
        assert!(entries[1].message.as_alert().is_some());
        assert_eq!(entries[2].state, State::Closed);
    }

    #[test]
    fn test_server_hello_done_first_is_a_protocol_violation() {
        let transport = ScriptedTransport::new(vec![vec![0x16, 0x03, 0x01, 0x00, 0x04, 0x0E, 0x00, 0x00, 0x00]]);
        let mut workflow = Workflow::new(transport, SessionConfig::default());
        let error = workflow.run().unwrap_err();
        assert!(matches!(
            error,
            Error::ProtocolViolation {
                state: State::ClientHello,
                ..
            }
        ));
        assert_eq!(workflow.state(), State::Alert);
        assert!(workflow.transport().is_none());
    }

    #[test]
    fn test_server_hello_done_without_certificate_is_a_protocol_violation() {
        let fragment: Vec<u8> = server_flight(cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA)
            .into_iter()
            .filter(|message| message.msg_type != HandshakeType::Certificate)
            .flat_map(|message| message.as_bytes().unwrap())
            .collect();
        let record = TLSRecord::new(ContentType::Handshake, TLS_VERSION_1_0, fragment)
            .as_bytes()
            .unwrap();
        let mut workflow = Workflow::new(ScriptedTransport::new(vec![record]), SessionConfig::default());
        let error = workflow.run().unwrap_err();
        assert!(matches!(
            error,
            Error::ProtocolViolation {
                state: State::ServerHello,
                ..
            }
        ));
        assert_eq!(workflow.state(), State::Alert);
        assert!(workflow.transport().is_none());
    }

    #[test]
    fn test_malformed_change_cipher_spec_is_a_decode_error() {
        let transport = ScriptedTransport::new(vec![vec![0x14, 0x03, 0x01, 0x00, 0x02, 0x01, 0x01]]);
        let mut workflow = Workflow::new(transport, SessionConfig::default());
        assert!(matches!(
            workflow.run(),
            Err(Error::Decode(DecodeError::InvalidChangeCipherSpec))
        ));
        assert_eq!(workflow.state(), State::Alert);
    }

    #[test]
    fn test_timeout_and_close_outcomes() {
        let mut workflow = Workflow::new(ScriptedTransport::new(Vec::new()), SessionConfig::default());
        assert_eq!(workflow.run().unwrap(), Outcome::NoResponse);
        assert_eq!(workflow.state(), State::ClientHello);

        let transport = ScriptedTransport::new(Vec::new()).closing();
        let mut workflow = Workflow::new(transport, SessionConfig::default());
        assert_eq!(workflow.run().unwrap(), Outcome::Closed);
        assert_eq!(workflow.state(), State::Closed);
    }

    #[test]
    fn test_cancelled_session_drops_transport() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut workflow = Workflow::new(ScriptedTransport::new(Vec::new()), SessionConfig::default())
            .with_cancel_token(cancel);
        assert!(matches!(workflow.run(), Err(Error::Cancelled)));
        assert!(workflow.transport().is_none());
    }

    #[test]
    fn test_full_rsa_handshake_completes() {
        let server = LoopbackServer::new(cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA);
        let reporter = Arc::new(MemoryReporter::default());
        let mut workflow =
            Workflow::new(server, SessionConfig::default()).with_reporter(reporter.clone());
        assert_eq!(workflow.run().unwrap(), Outcome::Completed);
        assert_eq!(workflow.state(), State::ServerFinished);
        assert_eq!(
            workflow.trace().states(),
            vec![
                State::ClientHello,
                State::ServerHello,
                State::ServerCertificate,
                State::ServerHelloDone,
                State::ClientKeyExchange,
                State::ClientChangeCipherSpec,
                State::ClientFinished,
                State::ServerChangeCipherSpec,
                State::ServerFinished,
            ]
        );
        let params = workflow.security_parameters();
        assert_eq!(params.protocol_version().unwrap(), TLS_VERSION_1_0);
        assert_eq!(params.master_secret().unwrap().len(), 48);
        assert!(reporter.events().iter().any(|event| matches!(
            event,
            Event::StateChanged {
                to: State::ServerFinished,
                ..
            }
        )));
    }

    #[test]
    fn test_full_dhe_handshake_completes() {
        let server = LoopbackServer::new(cipher_suites::TLS_DHE_RSA_WITH_AES_256_CBC_SHA);
        let config = SessionConfig {
            cipher_suites: vec![cipher_suites::TLS_DHE_RSA_WITH_AES_256_CBC_SHA],
            ..SessionConfig::default()
        };
        let mut workflow = Workflow::new(server, config);
        assert_eq!(workflow.run().unwrap(), Outcome::Completed);
        assert!(workflow
            .trace()
            .states()
            .contains(&State::ServerKeyExchange));
        assert!(workflow.security_parameters().dh_params().is_ok());
    }

    #[test]
    fn test_observer_replaces_client_key_exchange() {
        let server = LoopbackServer::new(cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA);
        let mut workflow = Workflow::new(server, SessionConfig::default());
        let seen = Arc::new(Mutex::new(None));
        let seen_in_observer = Arc::clone(&seen);
        workflow.observe(State::ClientKeyExchange, move |context| {
            *seen_in_observer.lock().unwrap() = context.security_parameters.cipher_suite().ok();
            *context.message = Message::Handshake(Handshake::new(
                HandshakeMessage::ClientKeyExchange(ClientKeyExchange::EncryptedPreMasterSecret(
                    vec![0x42; 64],
                )),
            ));
        });
        let outcome = workflow.run().unwrap();
        // The server cannot decrypt the replaced premaster secret
        assert!(matches!(outcome, Outcome::Alert(_)));
        assert_eq!(
            *seen.lock().unwrap(),
            Some(cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA)
        );
        let entry = workflow
            .trace()
            .entries()
            .iter()
            .find(|entry| entry.state == State::ClientKeyExchange)
            .unwrap();
        assert!(matches!(
            entry.previous,
            Some(Message::Handshake(Handshake {
                message: HandshakeMessage::ClientKeyExchange(_),
                ..
            }))
        ));
        assert_eq!(&entry.raw[6..], &[0x42; 64][..]);
    }

    #[test]
    fn test_unoffered_cipher_suite_is_rejected() {
        let transport = ScriptedTransport::new(vec![server_flight_record(
            cipher_suites::TLS_DHE_RSA_WITH_AES_128_CBC_SHA,
        )]);
        let mut workflow = Workflow::new(transport, SessionConfig::default());
        assert!(matches!(
            workflow.run(),
            Err(Error::ProtocolViolation {
                state: State::ClientHello,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_certificate_list_is_malformed() {
        let certificate = Handshake::new(HandshakeMessage::Certificate(Certificate::default()));
        let mut fragment = server_flight_record(cipher_suites::TLS_RSA_WITH_AES_128_CBC_SHA);
        // Keep only the ServerHello from the packed flight
        let hello_len = 4 + usize::from(fragment[8]);
        fragment.truncate(5 + hello_len);
        fragment.extend(certificate.as_bytes().unwrap());
        let length = u16::try_from(fragment.len() - 5).unwrap().to_be_bytes();
        fragment[3..5].copy_from_slice(&length);
        let mut workflow = Workflow::new(ScriptedTransport::new(vec![fragment]), SessionConfig::default());
        assert!(matches!(
            workflow.run(),
            Err(Error::Decode(DecodeError::Malformed("empty certificate list")))
        ));
    }

    #[test]
    fn test_dh_key_agreement_matches_server_side() {
        let p = BigUint::from(0xFFFF_FFFB_u64);
        let g = BigUint::from(5u32);
        let y = BigUint::from(123_456u32);
        let params = ServerDHParams {
            dh_p: p.to_bytes_be(),
            dh_g: g.to_bytes_be(),
            dh_ys: g.modpow(&y, &p).to_bytes_be(),
        };
        let (yc, shared) = dh_key_agreement(&params, &mut rand::rng()).unwrap();
        let server_shared = BigUint::from_bytes_be(&yc).modpow(&y, &p);
        assert_eq!(shared, server_shared.to_bytes_be());

        let bad = ServerDHParams {
            dh_ys: Vec::new(),
            ..params
        };
        assert!(dh_key_agreement(&bad, &mut rand::rng()).is_err());
    }
}
