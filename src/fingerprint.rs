//! Implementation fingerprinting from handshake traces.
//!
//! Each fingerprint test manipulates one field of the client flight and is
//! identified by the SHA-1 of its parameters. Stored observations of known
//! implementations are looked up by that hash and compared with how the
//! server under test reacted.
use crate::alert::AlertDescription;
use crate::display::to_hex;
use crate::report::{Event, Reporter};
use crate::trace::{Direction, MessageTrace};
use crate::workflow::State;
use log::{debug, info};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// The fingerprint tests, one per manipulated message or header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FingerprintTest {
    ChangeCipherSpec,
    ChangeCipherSpecRecordHeader,
    ClientHello,
    ClientHelloHandshakeHeader,
    ClientHelloRecordHeader,
    ClientKeyExchange,
    ClientKeyExchangeHandshakeHeader,
    ClientKeyExchangeRecordHeader,
    Finished,
    FinishedHandshakeHeader,
    FinishedRecordHeader,
}

impl FingerprintTest {
    pub const ALL: [FingerprintTest; 11] = [
        FingerprintTest::ChangeCipherSpec,
        FingerprintTest::ChangeCipherSpecRecordHeader,
        FingerprintTest::ClientHello,
        FingerprintTest::ClientHelloHandshakeHeader,
        FingerprintTest::ClientHelloRecordHeader,
        FingerprintTest::ClientKeyExchange,
        FingerprintTest::ClientKeyExchangeHandshakeHeader,
        FingerprintTest::ClientKeyExchangeRecordHeader,
        FingerprintTest::Finished,
        FingerprintTest::FinishedHandshakeHeader,
        FingerprintTest::FinishedRecordHeader,
    ];

    /// Name hashed into every parameter set of this test.
    #[must_use]
    pub fn identifier(self) -> &'static str {
        match self {
            FingerprintTest::ChangeCipherSpec => "ChangeCipherSpec",
            FingerprintTest::ChangeCipherSpecRecordHeader => "CCSRecordHeader",
            FingerprintTest::ClientHello => "ClientHello",
            FingerprintTest::ClientHelloHandshakeHeader => "CHHandshakeHeader",
            FingerprintTest::ClientHelloRecordHeader => "CHRecordHeader",
            FingerprintTest::ClientKeyExchange => "ClientKeyExchange",
            FingerprintTest::ClientKeyExchangeHandshakeHeader => "CKEHandshakeHeader",
            FingerprintTest::ClientKeyExchangeRecordHeader => "CKERecordHeader",
            FingerprintTest::Finished => "Finished",
            FingerprintTest::FinishedHandshakeHeader => "FinHandshakeHeader",
            FingerprintTest::FinishedRecordHeader => "FinRecordHeader",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            FingerprintTest::ChangeCipherSpec => "ChangeCipherSpec message test",
            FingerprintTest::ChangeCipherSpecRecordHeader => "ChangeCipherSpec record header test",
            FingerprintTest::ClientHello => "ClientHello message test",
            FingerprintTest::ClientHelloHandshakeHeader => "ClientHello handshake header test",
            FingerprintTest::ClientHelloRecordHeader => "ClientHello record header test",
            FingerprintTest::ClientKeyExchange => "ClientKeyExchange message test",
            FingerprintTest::ClientKeyExchangeHandshakeHeader => "ClientKeyExchange handshake header test",
            FingerprintTest::ClientKeyExchangeRecordHeader => "ClientKeyExchange record header test",
            FingerprintTest::Finished => "Finished message test",
            FingerprintTest::FinishedHandshakeHeader => "Finished handshake header test",
            FingerprintTest::FinishedRecordHeader => "Finished record header test",
        }
    }

    /// Every parameter set this test runs with.
    #[must_use]
    pub fn cases(self) -> Vec<TestParameters> {
        let case = |description: &str, payload: Payload| TestParameters {
            identifier: self,
            description: description.to_string(),
            payload,
        };
        match self {
            FingerprintTest::ChangeCipherSpec => vec![
                case("Wrong payload", Payload::ChangeCipherSpec { payload: vec![0xFF] }),
                case("Invalid payload", Payload::ChangeCipherSpec { payload: vec![0x02, 0x01] }),
            ],
            FingerprintTest::ChangeCipherSpecRecordHeader
            | FingerprintTest::ClientHelloRecordHeader
            | FingerprintTest::ClientKeyExchangeRecordHeader
            | FingerprintTest::FinishedRecordHeader => record_header_cases()
                .into_iter()
                .map(|(description, payload)| case(description, payload))
                .collect(),
            FingerprintTest::ClientHelloHandshakeHeader
            | FingerprintTest::ClientKeyExchangeHandshakeHeader
            | FingerprintTest::FinishedHandshakeHeader => handshake_header_cases()
                .into_iter()
                .map(|(description, payload)| case(description, payload))
                .collect(),
            FingerprintTest::ClientHello => client_hello_cases()
                .into_iter()
                .map(|(description, payload)| case(description, payload))
                .collect(),
            FingerprintTest::ClientKeyExchange => vec![case(
                "Invalid payload for RSA key exchange",
                Payload::ClientKeyExchange {
                    payload: vec![0x00, 0x00],
                },
            )],
            FingerprintTest::Finished => [
                ("Wrong padding", FinishedDamage::Padding),
                ("Destroy MAC", FinishedDamage::Mac),
                ("Destroy hash value", FinishedDamage::Hash),
                ("Destroy Verify", FinishedDamage::VerifyData),
                ("Change length byte of padding", FinishedDamage::PaddingLength),
            ]
            .into_iter()
            .map(|(description, damage)| case(description, Payload::Finished { damage }))
            .collect(),
        }
    }
}

/// Which part of an encrypted `Finished` gets broken.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FinishedDamage {
    Padding,
    Mac,
    Hash,
    VerifyData,
    PaddingLength,
}

/// The manipulated fields of one test case. `None` leaves a field as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    RecordHeader {
        content_type: Option<Vec<u8>>,
        protocol_version: Option<Vec<u8>>,
        length: Option<Vec<u8>>,
    },
    HandshakeHeader {
        message_type: Option<Vec<u8>>,
        length: Option<Vec<u8>>,
    },
    ClientHello {
        protocol_version: Option<Vec<u8>>,
        no_session_id_value: Option<Vec<u8>>,
        session_id: Option<Vec<u8>>,
        session_id_length: Option<Vec<u8>>,
        cipher_suites_length: Option<Vec<u8>>,
        compression_method: Option<Vec<u8>>,
    },
    ChangeCipherSpec {
        payload: Vec<u8>,
    },
    ClientKeyExchange {
        payload: Vec<u8>,
    },
    Finished {
        damage: FinishedDamage,
    },
}

impl Payload {
    /// Present fields in hashing order.
    fn fields(&self) -> Vec<Vec<u8>> {
        let present = |fields: &[&Option<Vec<u8>>]| -> Vec<Vec<u8>> {
            fields.iter().filter_map(|field| (*field).clone()).collect()
        };
        match self {
            Payload::RecordHeader {
                content_type,
                protocol_version,
                length,
            } => present(&[content_type, protocol_version, length]),
            Payload::HandshakeHeader { message_type, length } => present(&[message_type, length]),
            Payload::ClientHello {
                protocol_version,
                no_session_id_value,
                session_id,
                session_id_length,
                cipher_suites_length,
                compression_method,
            } => present(&[
                protocol_version,
                no_session_id_value,
                session_id,
                session_id_length,
                cipher_suites_length,
                compression_method,
            ]),
            Payload::ChangeCipherSpec { payload } | Payload::ClientKeyExchange { payload } => vec![payload.clone()],
            Payload::Finished { damage } => {
                let flags = [
                    FinishedDamage::Padding,
                    FinishedDamage::Mac,
                    FinishedDamage::Hash,
                    FinishedDamage::VerifyData,
                    FinishedDamage::PaddingLength,
                ];
                vec![flags.iter().map(|flag| u8::from(flag == damage)).collect()]
            }
        }
    }
}

fn record_header_cases() -> Vec<(&'static str, Payload)> {
    let header = |content_type: Option<&[u8]>, protocol_version: Option<&[u8]>, length: Option<&[u8]>| {
        Payload::RecordHeader {
            content_type: content_type.map(<[u8]>::to_vec),
            protocol_version: protocol_version.map(<[u8]>::to_vec),
            length: length.map(<[u8]>::to_vec),
        }
    };
    vec![
        ("Wrong message type", header(Some(&[0xFF][..]), None, None)),
        ("Invalid protocol version 0xff,0xff", header(None, Some(&[0xFF, 0xFF][..]), None)),
        ("Invalid length 0x00,0x00", header(None, None, Some(&[0x00, 0x00][..]))),
        ("Invalid length 0xff,0xff", header(None, None, Some(&[0xFF, 0xFF][..]))),
    ]
}

fn handshake_header_cases() -> Vec<(&'static str, Payload)> {
    vec![
        (
            "Wrong message type",
            Payload::HandshakeHeader {
                message_type: Some(vec![0xFF]),
                length: None,
            },
        ),
        (
            "Invalid length 0x00,0x00,0x00",
            Payload::HandshakeHeader {
                message_type: None,
                length: Some(vec![0x00; 3]),
            },
        ),
        (
            "Invalid length 0xff,0xff,0xff",
            Payload::HandshakeHeader {
                message_type: None,
                length: Some(vec![0xFF; 3]),
            },
        ),
    ]
}

fn client_hello_cases() -> Vec<(&'static str, Payload)> {
    let blank = Payload::ClientHello {
        protocol_version: None,
        no_session_id_value: None,
        session_id: None,
        session_id_length: None,
        cipher_suites_length: None,
        compression_method: None,
    };
    let long_session_id: Vec<u8> = std::iter::once(0xFF).chain(std::iter::repeat(0x0F).take(255)).collect();
    let with = |edit: &dyn Fn(&mut Payload)| {
        let mut payload = blank.clone();
        edit(&mut payload);
        payload
    };
    let version = |bytes: [u8; 2]| {
        with(&|payload: &mut Payload| {
            if let Payload::ClientHello { protocol_version, .. } = payload {
                *protocol_version = Some(bytes.to_vec());
            }
        })
    };
    vec![
        ("Invalid protocol version 0xff,0xff", version([0xFF, 0xFF])),
        ("Invalid protocol version 0x00,0x00", version([0x00, 0x00])),
        ("Invalid protocol version SSLv3", version([0x03, 0x00])),
        ("Invalid protocol version TLSv1.2", version([0x03, 0x03])),
        (
            "No session ID defined but value is set to 0xff",
            with(&|payload: &mut Payload| {
                if let Payload::ClientHello { no_session_id_value, .. } = payload {
                    *no_session_id_value = Some(vec![0xFF]);
                }
            }),
        ),
        (
            "256 Byte sessionID",
            with(&|payload: &mut Payload| {
                if let Payload::ClientHello { session_id, .. } = payload {
                    *session_id = Some(long_session_id.clone());
                }
            }),
        ),
        (
            "256 Byte sessionID and sessionID length 0x00",
            with(&|payload: &mut Payload| {
                if let Payload::ClientHello {
                    session_id,
                    session_id_length,
                    ..
                } = payload
                {
                    *session_id = Some(long_session_id.clone());
                    *session_id_length = Some(vec![0x00]);
                }
            }),
        ),
        (
            "Compression method 0xa1",
            with(&|payload: &mut Payload| {
                if let Payload::ClientHello { compression_method, .. } = payload {
                    *compression_method = Some(vec![0xA1]);
                }
            }),
        ),
        (
            "Wrong value for cipher suite length 0x01",
            with(&|payload: &mut Payload| {
                if let Payload::ClientHello { cipher_suites_length, .. } = payload {
                    *cipher_suites_length = Some(vec![0x01]);
                }
            }),
        ),
        (
            "Wrong value for cipher suite length 0x00",
            with(&|payload: &mut Payload| {
                if let Payload::ClientHello { cipher_suites_length, .. } = payload {
                    *cipher_suites_length = Some(vec![0x00]);
                }
            }),
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestParameters {
    pub identifier: FingerprintTest,
    pub description: String,
    pub payload: Payload,
}

impl TestParameters {
    /// Uppercase hex SHA-1 over the identifier, the description and every
    /// present payload field.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut sha1 = Sha1::new();
        sha1.update(self.identifier.identifier().as_bytes());
        sha1.update(self.description.as_bytes());
        for field in self.payload.fields() {
            sha1.update(&field);
        }
        to_hex(&sha1.finalize()).to_uppercase()
    }
}

/// A stored observation of how a known implementation reacted to a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRecord {
    pub implementation: String,
    pub last_state: State,
    pub alert: Option<AlertDescription>,
    pub score: u32,
}

pub trait FingerprintStore {
    fn find(&self, hash: &str) -> Vec<FingerprintRecord>;
}

/// Store backed by a map, for tests and for observations loaded up front.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<String, Vec<FingerprintRecord>>,
}

impl MemoryStore {
    pub fn insert(&mut self, hash: impl Into<String>, record: FingerprintRecord) {
        self.records.entry(hash.into()).or_default().push(record);
    }
}

impl FingerprintStore for MemoryStore {
    fn find(&self, hash: &str) -> Vec<FingerprintRecord> {
        self.records.get(hash).cloned().unwrap_or_default()
    }
}

/// Implementation name to accumulated score.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScoreCounter {
    scores: BTreeMap<String, u32>,
    total: u32,
    no_hit: u32,
}

impl ScoreCounter {
    pub fn count(&mut self, implementation: &str, score: u32) {
        self.total += score;
        *self.scores.entry(implementation.to_string()).or_insert(0) += score;
    }

    pub fn count_no_hit(&mut self, score: u32) {
        self.no_hit += score;
    }

    #[must_use]
    pub fn score(&self, implementation: &str) -> u32 {
        self.scores.get(implementation).copied().unwrap_or(0)
    }

    /// Points handed out, hits only.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn no_hit(&self) -> u32 {
        self.no_hit
    }

    pub fn merge(&mut self, other: &ScoreCounter) {
        for (implementation, score) in &other.scores {
            self.count(implementation, *score);
        }
        self.no_hit += other.no_hit;
    }

    /// Highest score first.
    #[must_use]
    pub fn ranking(&self) -> Vec<(&str, u32)> {
        let mut ranking: Vec<(&str, u32)> = self.scores.iter().map(|(name, score)| (name.as_str(), *score)).collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranking
    }

    pub fn report(&self, reporter: &dyn Reporter) {
        for (implementation, score) in self.ranking() {
            reporter.report(Event::Score {
                implementation: implementation.to_string(),
                score,
            });
        }
    }
}

/// First alert the server sent, if any.
fn received_alert(trace: &MessageTrace) -> Option<AlertDescription> {
    trace
        .entries()
        .iter()
        .filter(|entry| entry.direction == Direction::Received)
        .find_map(|entry| entry.message.as_alert())
        .map(|alert| alert.description)
}

/// Scores a trace against stored observations of the same test case.
#[derive(Debug, Clone)]
pub struct TestHashAnalyzer {
    hash: String,
}

impl TestHashAnalyzer {
    #[must_use]
    pub fn new(parameters: &TestParameters) -> Self {
        let hash = parameters.compute_hash();
        debug!("Hash value: {hash}");
        Self { hash }
    }

    #[must_use]
    pub fn analyze(&self, trace: &MessageTrace, store: &dyn FingerprintStore) -> ScoreCounter {
        let alert = received_alert(trace);
        let last_state = match alert {
            Some(_) => State::Alert,
            None => trace.entries().last().map_or(State::ClientHello, |entry| entry.state),
        };
        let records = store.find(&self.hash);
        let score = if records.len() > 1 { 1 } else { 2 };
        let mut counter = ScoreCounter::default();
        for record in records {
            let hit = match record.last_state {
                State::Alert => last_state == State::Alert && record.alert == alert,
                state => state == last_state,
            };
            if hit {
                info!("Fingerprint hit for {}", record.implementation);
                counter.count(&record.implementation, score);
            }
        }
        counter
    }
}

/// Implementations known to pack (or not pack) their first flight into one record.
#[derive(Debug, Clone)]
pub struct HandshakeEnumCheck {
    enumerating: Vec<(String, u32)>,
    non_enumerating: Vec<(String, u32)>,
}

impl Default for HandshakeEnumCheck {
    fn default() -> Self {
        Self::new(
            vec![("JDK_6_35".to_string(), 2)],
            vec![("GNUTLS".to_string(), 1), ("OPENSSL_1_0_1".to_string(), 1)],
        )
    }
}

impl HandshakeEnumCheck {
    #[must_use]
    pub fn new(enumerating: Vec<(String, u32)>, non_enumerating: Vec<(String, u32)>) -> Self {
        Self {
            enumerating,
            non_enumerating,
        }
    }

    #[must_use]
    pub fn analyze(&self, trace: &MessageTrace) -> ScoreCounter {
        let mut counter = ScoreCounter::default();
        for entry in trace.entries().iter().filter(|entry| entry.state == State::ServerHello) {
            let hints = if entry.continued {
                &self.enumerating
            } else {
                &self.non_enumerating
            };
            for (implementation, score) in hints {
                counter.count(implementation, *score);
            }
        }
        counter
    }

    /// `true` when the server sent its hello after another message in the same record.
    #[must_use]
    pub fn enumerates(trace: &MessageTrace) -> bool {
        trace
            .entries()
            .iter()
            .any(|entry| entry.state == State::ServerHello && entry.continued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Alert, AlertLevel};
    use crate::handshake::{Handshake, HandshakeMessage};
    use crate::report::MemoryReporter;
    use crate::workflow::Message;
    use pretty_assertions::assert_eq;

    fn trace_with(entries: &[(State, Message, bool)]) -> MessageTrace {
        let mut trace = MessageTrace::new();
        let mut previous = State::ClientHello;
        for (state, message, continued) in entries {
            trace.record(
                *state,
                previous,
                Direction::Received,
                message.clone(),
                Vec::new(),
                None,
                *continued,
            );
            previous = *state;
        }
        trace
    }

    fn record(implementation: &str, last_state: State, alert: Option<AlertDescription>) -> FingerprintRecord {
        FingerprintRecord {
            implementation: implementation.to_string(),
            last_state,
            alert,
            score: 0,
        }
    }

    #[test]
    fn test_compute_hash() {
        let ccs = FingerprintTest::ChangeCipherSpec.cases().remove(0);
        assert_eq!(ccs.compute_hash(), "AE75BFC6A1F090BE4FFE3DC0DEC66F23CCF19521");
        let header = FingerprintTest::ClientHelloRecordHeader.cases().remove(1);
        assert_eq!(header.description, "Invalid protocol version 0xff,0xff");
        assert_eq!(header.compute_hash(), "4AA069BF6E24998F9A3619106655ECB02E4AA462");
    }

    #[test]
    fn test_every_case_hashes_uniquely() {
        let hashes: std::collections::HashSet<String> = FingerprintTest::ALL
            .iter()
            .flat_map(|test| test.cases())
            .map(|case| case.compute_hash())
            .collect();
        let cases: usize = FingerprintTest::ALL.iter().map(|test| test.cases().len()).sum();
        assert_eq!(cases, 2 + 4 * 4 + 3 * 3 + 10 + 1 + 5);
        assert_eq!(hashes.len(), cases);
    }

    #[test]
    fn test_hash_analyzer_matches_alert_records() {
        let parameters = &FingerprintTest::ClientKeyExchange.cases().remove(0);
        let hash = parameters.compute_hash();
        let mut store = MemoryStore::default();
        store.insert(&hash, record("OPENSSL", State::Alert, Some(AlertDescription::HandshakeFailure)));
        store.insert(&hash, record("GNUTLS", State::Alert, Some(AlertDescription::DecryptError)));

        let trace = trace_with(&[
            (State::ServerHello, Message::Handshake(Handshake::new(HandshakeMessage::ServerHelloDone)), false),
            (State::Alert, Message::Alert(Alert::fatal(AlertDescription::HandshakeFailure)), false),
        ]);
        let counter = TestHashAnalyzer::new(parameters).analyze(&trace, &store);
        assert_eq!(counter.score("OPENSSL"), 1);
        assert_eq!(counter.score("GNUTLS"), 0);
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_hash_analyzer_unique_state_hit_scores_two() {
        let parameters = &FingerprintTest::Finished.cases().remove(1);
        let mut store = MemoryStore::default();
        store.insert(parameters.compute_hash(), record("JSSE", State::ServerHelloDone, None));

        let trace = trace_with(&[(
            State::ServerHelloDone,
            Message::Handshake(Handshake::new(HandshakeMessage::ServerHelloDone)),
            false,
        )]);
        let analyzer = TestHashAnalyzer::new(parameters);
        assert_eq!(analyzer.analyze(&trace, &store).score("JSSE"), 2);

        let warned = trace_with(&[(
            State::Alert,
            Message::Alert(Alert {
                level: AlertLevel::Warning,
                description: AlertDescription::NoRenegotiation,
            }),
            false,
        )]);
        assert_eq!(analyzer.analyze(&warned, &store).total(), 0);
        assert_eq!(analyzer.analyze(&trace, &MemoryStore::default()).total(), 0);
    }

    #[test]
    fn test_handshake_enum_check() {
        let hello = Message::Handshake(Handshake::new(HandshakeMessage::ServerHelloDone));
        let packed = trace_with(&[(State::ServerHello, hello.clone(), true)]);
        let separate = trace_with(&[(State::ServerHello, hello, false)]);
        let check = HandshakeEnumCheck::default();

        let counter = check.analyze(&packed);
        assert_eq!(counter.score("JDK_6_35"), 2);
        assert_eq!(counter.score("GNUTLS"), 0);
        assert!(HandshakeEnumCheck::enumerates(&packed));

        let counter = check.analyze(&separate);
        assert_eq!(counter.ranking(), vec![("GNUTLS", 1), ("OPENSSL_1_0_1", 1)]);
        assert!(!HandshakeEnumCheck::enumerates(&separate));
    }

    #[test]
    fn test_score_counter_merge_and_report() {
        let mut first = ScoreCounter::default();
        first.count("OPENSSL", 2);
        first.count_no_hit(2);
        let mut second = ScoreCounter::default();
        second.count("OPENSSL", 1);
        second.count("JSSE", 4);
        first.merge(&second);
        assert_eq!(first.total(), 7);
        assert_eq!(first.no_hit(), 2);

        let reporter = MemoryReporter::default();
        first.report(&reporter);
        assert_eq!(
            reporter.events(),
            vec![
                Event::Score {
                    implementation: "JSSE".to_string(),
                    score: 4
                },
                Event::Score {
                    implementation: "OPENSSL".to_string(),
                    score: 3
                },
            ]
        );
    }
}
