//! In-memory TLS 1.0 server for the workflow and network oracle tests.
//!
//! It answers through the record transport traits, holds the test RSA key and
//! rejects bad premaster secrets with `internal_error` when the decrypted block
//! is conformant under its policy and with `handshake_failure` otherwise.
use crate::alert::{Alert, AlertDescription};
use crate::crypto::{self, KeyBlock, RecordProtection, Sender};
use crate::display::from_hex;
use crate::error::Error;
use crate::extensions::ByteSerializable;
use crate::get_records;
use crate::handshake::cipher_suites::CipherSuite;
use crate::handshake::{
    self, Certificate, ClientKeyExchange, DecodeContext, Finished, Handshake, HandshakeMessage,
    Random, ServerDHParams, ServerHello, ServerKeyExchange, TLS_VERSION_1_0,
};
use crate::oracle::{classify, OraclePolicy};
use crate::parser::ByteParser;
use crate::rsa::{test_key, RsaPrivateKey};
use crate::tls_record::{ContentType, TLSRecord};
use crate::transport::{RecordSink, RecordSource};
use num_bigint::BigUint;
use num_traits::Num;
use std::collections::VecDeque;
use std::io;

pub(crate) const SERVER_RANDOM: Random = [0x5A; 32];
const DH_SECRET: u64 = 0x1234_5678_9ABC_DEF1;

fn dh_prime() -> BigUint {
    BigUint::from_str_radix(test_key::N, 16).unwrap()
}

fn dh_params() -> ServerDHParams {
    let p = dh_prime();
    let g = BigUint::from(2u32);
    ServerDHParams {
        dh_p: p.to_bytes_be(),
        dh_g: g.to_bytes_be(),
        dh_ys: g.modpow(&BigUint::from(DH_SECRET), &p).to_bytes_be(),
    }
}

pub(crate) fn server_flight(cipher_suite: CipherSuite) -> Vec<Handshake> {
    let mut flight = vec![
        Handshake::new(HandshakeMessage::ServerHello(ServerHello {
            server_version: TLS_VERSION_1_0,
            random: SERVER_RANDOM,
            session_id: vec![0x07; 32],
            cipher_suite,
            compression_method: 0,
            extensions: None,
        })),
        Handshake::new(HandshakeMessage::Certificate(Certificate {
            certificate_list: vec![from_hex(test_key::CERT).unwrap()],
        })),
    ];
    if cipher_suite.key_exchange().is_some_and(|kx| kx.is_dh()) {
        flight.push(Handshake::new(HandshakeMessage::ServerKeyExchange(
            ServerKeyExchange::Dh {
                params: dh_params(),
                signature: vec![0xAB; 64],
            },
        )));
    }
    flight.push(Handshake::new(HandshakeMessage::ServerHelloDone));
    flight
}

fn plain_record(content_type: ContentType, fragment: Vec<u8>) -> Vec<u8> {
    TLSRecord::new(content_type, TLS_VERSION_1_0, fragment)
        .as_bytes()
        .unwrap()
}

/// `ServerHello`, `Certificate` and `ServerHelloDone` packed into one record.
pub(crate) fn server_flight_record(cipher_suite: CipherSuite) -> Vec<u8> {
    let fragment = server_flight(cipher_suite)
        .iter()
        .flat_map(|message| message.as_bytes().unwrap())
        .collect();
    plain_record(ContentType::Handshake, fragment)
}

/// Strips a well-formed type 2 block down to its payload.
fn pkcs1_payload(block: &[u8]) -> Option<&[u8]> {
    if block.len() < 11 || block[0] != 0x00 || block[1] != 0x02 {
        return None;
    }
    let separator = block[2..].iter().position(|b| *b == 0)? + 2;
    (separator >= 10).then(|| &block[separator + 1..])
}

pub(crate) struct LoopbackServer {
    key: RsaPrivateKey,
    cipher_suite: CipherSuite,
    policy: OraclePolicy,
    outgoing: VecDeque<Vec<u8>>,
    transcript: Vec<u8>,
    client_random: Random,
    master_secret: Option<Vec<u8>>,
    reader: Option<RecordProtection>,
    writer: Option<RecordProtection>,
    pending_writer: Option<RecordProtection>,
    done: bool,
    /// Encrypted premaster secrets received so far.
    pub(crate) key_exchanges: Vec<Vec<u8>>,
}

impl LoopbackServer {
    pub(crate) fn new(cipher_suite: CipherSuite) -> Self {
        Self {
            key: test_key::private_key(),
            cipher_suite,
            policy: OraclePolicy::Fft,
            outgoing: VecDeque::new(),
            transcript: Vec::new(),
            client_random: [0; 32],
            master_secret: None,
            reader: None,
            writer: None,
            pending_writer: None,
            done: false,
            key_exchanges: Vec::new(),
        }
    }

    pub(crate) fn with_policy(mut self, policy: OraclePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn queue(&mut self, content_type: ContentType, content: &[u8]) -> Result<(), Error> {
        let fragment = match self.writer.as_mut() {
            Some(writer) => writer.seal(content_type, TLS_VERSION_1_0, content)?,
            None => content.to_vec(),
        };
        self.outgoing.push_back(plain_record(content_type, fragment));
        Ok(())
    }

    fn alert(&mut self, description: AlertDescription) {
        let alert = Alert::fatal(description).as_bytes().unwrap();
        if self.queue(ContentType::Alert, &alert).is_err() {
            self.outgoing.push_back(plain_record(ContentType::Alert, alert));
        }
        self.done = true;
    }

    fn handle_record(&mut self, record: TLSRecord) -> Result<(), Error> {
        let content = match self.reader.as_mut() {
            Some(reader) => reader.open(record.record_type, record.version, &record.fragment)?,
            None => record.fragment,
        };
        match record.record_type {
            ContentType::Handshake => {
                for raw in handshake::split_handshake_messages(&content)? {
                    let context = DecodeContext {
                        key_exchange: self.cipher_suite.key_exchange(),
                        ..DecodeContext::default()
                    };
                    let message = Handshake::decode(&mut ByteParser::from(raw.as_slice()), &context)?.message;
                    match message {
                        HandshakeMessage::ClientHello(hello) => {
                            self.transcript.extend_from_slice(&raw);
                            self.client_random = hello.random;
                            let flight: Vec<u8> = server_flight(self.cipher_suite)
                                .iter()
                                .flat_map(|message| message.as_bytes().unwrap())
                                .collect();
                            self.transcript.extend_from_slice(&flight);
                            self.queue(ContentType::Handshake, &flight)?;
                        }
                        HandshakeMessage::ClientKeyExchange(key_exchange) => {
                            self.transcript.extend_from_slice(&raw);
                            self.key_exchange(key_exchange)?;
                        }
                        HandshakeMessage::Finished(finished) => self.finish(&finished, &raw)?,
                        _ => self.alert(AlertDescription::UnexpectedMessage),
                    }
                    if self.done {
                        break;
                    }
                }
            }
            ContentType::ChangeCipherSpec => {
                let master_secret = self.master_secret.as_deref().ok_or(Error::NotYetEstablished("master secret"))?;
                let key_len = self.cipher_suite.aes_key_len().ok_or(Error::Unsupported("suite"))?;
                let keys = KeyBlock::derive(master_secret, &self.client_random, &SERVER_RANDOM, key_len)?;
                self.reader = Some(RecordProtection::new(&keys.client_key, &keys.client_mac_key, &keys.client_iv)?);
                self.pending_writer = Some(RecordProtection::new(&keys.server_key, &keys.server_mac_key, &keys.server_iv)?);
            }
            _ => self.alert(AlertDescription::UnexpectedMessage),
        }
        Ok(())
    }

    fn key_exchange(&mut self, key_exchange: ClientKeyExchange) -> Result<(), Error> {
        let pre_master_secret = match key_exchange {
            ClientKeyExchange::EncryptedPreMasterSecret(encrypted) => {
                let block = self.key.decrypt_raw(&encrypted);
                self.key_exchanges.push(encrypted);
                match pkcs1_payload(&block) {
                    Some(payload) if payload.len() == crypto::PRE_MASTER_SECRET_LEN => payload.to_vec(),
                    _ => {
                        let description = if classify(&block, self.policy, self.key.public.size()).is_conformant() {
                            AlertDescription::InternalError
                        } else {
                            AlertDescription::HandshakeFailure
                        };
                        self.alert(description);
                        return Ok(());
                    }
                }
            }
            ClientKeyExchange::DhPublic(yc) => BigUint::from_bytes_be(&yc)
                .modpow(&BigUint::from(DH_SECRET), &dh_prime())
                .to_bytes_be(),
            ClientKeyExchange::EcdhPublic(_) => {
                self.alert(AlertDescription::HandshakeFailure);
                return Ok(());
            }
        };
        self.master_secret = Some(crypto::master_secret(
            &pre_master_secret,
            &self.client_random,
            &SERVER_RANDOM,
        )?);
        Ok(())
    }

    fn finish(&mut self, finished: &Finished, raw: &[u8]) -> Result<(), Error> {
        let master_secret = self.master_secret.clone().ok_or(Error::NotYetEstablished("master secret"))?;
        let expected = crypto::verify_data(&master_secret, Sender::Client, &self.transcript)?;
        if expected != finished.verify_data {
            self.alert(AlertDescription::DecryptError);
            return Ok(());
        }
        self.transcript.extend_from_slice(raw);
        self.queue(ContentType::ChangeCipherSpec, &[0x01])?;
        self.writer = self.pending_writer.take();
        let verify_data = crypto::verify_data(&master_secret, Sender::Server, &self.transcript)?;
        let server_finished = Handshake::new(HandshakeMessage::Finished(Finished { verify_data }));
        self.queue(ContentType::Handshake, &server_finished.as_bytes().unwrap())?;
        self.done = true;
        Ok(())
    }
}

impl RecordSource for LoopbackServer {
    fn read_record(&mut self) -> io::Result<Vec<u8>> {
        self.outgoing
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "loopback server is idle"))
    }
}

impl RecordSink for LoopbackServer {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let records = get_records(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for record in records {
            if self.done {
                break;
            }
            if self.handle_record(record).is_err() {
                self.alert(AlertDescription::BadRecordMac);
            }
        }
        Ok(())
    }
}
