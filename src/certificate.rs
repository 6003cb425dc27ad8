//! Server certificate inspection: the RSA key used for the premaster secret,
//! the subject common name and a fingerprint for logs and traces.
use crate::display::to_hex;
use crate::error::Error;
use crate::rsa::RsaPublicKey;
use log::{debug, info};
use num_bigint::BigUint;
use rasn::der;
use rasn::types::ObjectIdentifier;
use rasn_pkix::{Certificate as RasnCertificate, Name, RelativeDistinguishedName};
use sha2::{Digest, Sha256};

/// rsaEncryption, 1.2.840.113549.1.1.1
const RSA_ENCRYPTION_OID: [u32; 7] = [1, 2, 840, 113549, 1, 1, 1];
/// commonName, 2.5.4.3
const COMMON_NAME_OID: [u32; 4] = [2, 5, 4, 3];

fn decode_certificate(cert_data: &[u8]) -> Result<RasnCertificate, Error> {
    der::decode::<RasnCertificate>(cert_data)
        .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {e}")))
}

/// SHA-256 over the DER bytes, lowercase hex.
#[must_use]
pub fn fingerprint(cert_data: &[u8]) -> String {
    to_hex(&Sha256::digest(cert_data))
}

/// Extracts the RSA public key from the certificate's `SubjectPublicKeyInfo`.
///
/// # Errors
/// `Certificate` when the DER does not parse or the key is not `rsaEncryption`.
pub fn extract_rsa_public_key(cert_data: &[u8]) -> Result<RsaPublicKey, Error> {
    let cert = decode_certificate(cert_data)?;
    let spki = &cert.tbs_certificate.subject_public_key_info;
    if spki.algorithm.algorithm.as_ref() != RSA_ENCRYPTION_OID {
        return Err(Error::Certificate(format!(
            "Server key is not RSA: {}",
            oid_to_string(&spki.algorithm.algorithm)
        )));
    }
    let key_bytes = spki.subject_public_key.as_raw_slice();
    // RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }
    let (sequence, _) = parse_der_element(key_bytes, 0x30, "RSAPublicKey")?;
    let (modulus, rest) = parse_der_element(sequence, 0x02, "modulus")?;
    let (exponent, _) = parse_der_element(rest, 0x02, "publicExponent")?;
    let key = RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from_bytes_be(exponent));
    debug!("Server RSA key: {} bits, e = {}", key.n.bits(), key.e);
    Ok(key)
}

/// Reads one DER element with the expected tag, returning its content and
/// whatever follows it.
fn parse_der_element<'a>(bytes: &'a [u8], tag: u8, name: &str) -> Result<(&'a [u8], &'a [u8]), Error> {
    match bytes.first() {
        Some(found) if *found == tag => {}
        Some(found) => {
            return Err(Error::Certificate(format!(
                "Unexpected tag {found:#04x} for {name}"
            )))
        }
        None => return Err(Error::Certificate(format!("Empty {name}"))),
    }
    let bytes = &bytes[1..];
    let Some(first) = bytes.first() else {
        return Err(Error::Certificate(format!("Missing {name} length")));
    };
    // Parse the DER length field
    let (length, offset) = if first & 0x80 == 0 {
        // Short form length (0-127 bytes)
        (usize::from(*first), 1)
    } else {
        // Long form length
        let len_bytes = usize::from(first & 0x7F);
        if len_bytes == 0 || len_bytes > 4 || bytes.len() < len_bytes + 1 {
            return Err(Error::Certificate(format!("Invalid {name} length encoding")));
        }
        let length = bytes[1..=len_bytes]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (length, len_bytes + 1)
    };
    if bytes.len() < offset + length {
        return Err(Error::Certificate(format!("Truncated {name} content")));
    }
    Ok((&bytes[offset..offset + length], &bytes[offset + length..]))
}

fn extract_common_name(rdn: &RelativeDistinguishedName) -> Option<String> {
    for attribute in rdn.to_vec() {
        if attribute.r#type.as_ref() != COMMON_NAME_OID {
            continue;
        }
        let raw_bytes = attribute.value.as_bytes();
        // UTF8String, PrintableString or IA5String
        let tag = *raw_bytes.first()?;
        if !matches!(tag, 0x0C | 0x13 | 0x16) {
            debug!("Unexpected ASN.1 tag for common name: {tag:#04x}");
            return None;
        }
        let (content, _) = parse_der_element(raw_bytes, tag, "commonName").ok()?;
        return String::from_utf8(content.to_vec()).ok();
    }
    None
}

/// Subject common name, if the certificate carries one.
///
/// # Errors
/// `Certificate` when the DER does not parse.
pub fn subject_common_name(cert_data: &[u8]) -> Result<Option<String>, Error> {
    let cert = decode_certificate(cert_data)?;
    let Name::RdnSequence(subject_rdn) = &cert.tbs_certificate.subject;
    Ok(subject_rdn.iter().find_map(extract_common_name))
}

fn oid_to_string(oid: &ObjectIdentifier) -> String {
    match oid.as_ref() {
        [1, 2, 840, 113549, 1, 1, 1] => "rsaEncryption".to_string(),
        [1, 2, 840, 10045, 2, 1] => "ecPublicKey".to_string(),
        [1, 2, 840, 10040, 4, 1] => "dsa".to_string(),
        other => other
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("."),
    }
}

/// Logs the leaf certificate summary at `info` level.
pub fn log_certificate(cert_data: &[u8]) {
    match subject_common_name(cert_data) {
        Ok(name) => info!(
            "Server certificate CN={}, SHA-256 {}",
            name.as_deref().unwrap_or("<none>"),
            fingerprint(cert_data)
        ),
        Err(e) => info!("Server certificate not parsed: {e}"),
    }
}
