//! TLS 1.0 key derivation and CBC record protection.
//!
//! [RFC 2246 section 5](https://datatracker.ietf.org/doc/html/rfc2246#section-5) defines the PRF,
//! [section 6.3](https://datatracker.ietf.org/doc/html/rfc2246#section-6.3) the key block and
//! [section 7.4.9](https://datatracker.ietf.org/doc/html/rfc2246#section-7.4.9) the Finished verify data.
use crate::display::to_hex;
use crate::error::Error;
use crate::handshake::{ProtocolVersion, Random, VERIFY_DATA_LEN};
use crate::tls_record::ContentType;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use hmac::{Hmac, Mac};
use log::debug;
use md5::Md5;
use sha1::{Digest, Sha1};

pub const MASTER_SECRET_LEN: usize = 48;
pub const PRE_MASTER_SECRET_LEN: usize = 48;
const AES_BLOCK_SIZE: usize = 16;
const SHA1_MAC_LEN: usize = 20;

type HmacMd5 = Hmac<Md5>;
type HmacSha1 = Hmac<Sha1>;

fn hmac_hash<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| Error::Encode("HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `P_hash(secret, seed)`: `HMAC(secret, A(1) + seed) || HMAC(secret, A(2) + seed) || ...`
fn p_hash<M: Mac + KeyInit>(secret: &[u8], seed: &[u8], output_len: usize) -> Result<Vec<u8>, Error> {
    let mut result = Vec::with_capacity(output_len);
    // A(0) = seed
    let mut a = seed.to_vec();
    while result.len() < output_len {
        a = hmac_hash::<M>(secret, &a)?;
        let mut ai_seed = Vec::with_capacity(a.len() + seed.len());
        ai_seed.extend_from_slice(&a);
        ai_seed.extend_from_slice(seed);
        result.extend(hmac_hash::<M>(secret, &ai_seed)?);
    }
    result.truncate(output_len);
    Ok(result)
}

/// TLS 1.0 PRF: `P_MD5(S1, label + seed) XOR P_SHA-1(S2, label + seed)`.
/// The two halves of the secret overlap by one byte when its length is odd.
///
/// # Errors
/// Only if the HMAC implementation rejects a key.
pub fn prf(secret: &[u8], label: &[u8], seed: &[u8], output_len: usize) -> Result<Vec<u8>, Error> {
    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);
    let md5_part = p_hash::<HmacMd5>(s1, &label_seed, output_len)?;
    let sha1_part = p_hash::<HmacSha1>(s2, &label_seed, output_len)?;
    Ok(md5_part.iter().zip(sha1_part).map(|(a, b)| a ^ b).collect())
}

/// # Errors
/// See [`prf`].
pub fn master_secret(
    pre_master_secret: &[u8],
    client_random: &Random,
    server_random: &Random,
) -> Result<Vec<u8>, Error> {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf(pre_master_secret, b"master secret", &seed, MASTER_SECRET_LEN)
}

/// Which side computes the Finished message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sender {
    Client,
    Server,
}

/// `PRF(master_secret, finished_label, MD5(handshake_messages) + SHA-1(handshake_messages))[0..12]`
///
/// # Errors
/// See [`prf`].
pub fn verify_data(master_secret: &[u8], sender: Sender, handshake_messages: &[u8]) -> Result<Vec<u8>, Error> {
    let label: &[u8] = match sender {
        Sender::Client => b"client finished",
        Sender::Server => b"server finished",
    };
    let mut seed = Md5::digest(handshake_messages).to_vec();
    seed.extend_from_slice(&Sha1::digest(handshake_messages));
    prf(master_secret, label, &seed, VERIFY_DATA_LEN)
}

/// Key material for one connection, sliced from the key block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    pub client_mac_key: Vec<u8>,
    pub server_mac_key: Vec<u8>,
    pub client_key: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_iv: Vec<u8>,
    pub server_iv: Vec<u8>,
}

impl KeyBlock {
    /// Derives the key block for an AES-CBC-SHA suite with the given key length.
    ///
    /// # Errors
    /// See [`prf`].
    pub fn derive(
        master_secret: &[u8],
        client_random: &Random,
        server_random: &Random,
        key_len: usize,
    ) -> Result<Self, Error> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(server_random);
        seed.extend_from_slice(client_random);
        let total = 2 * (SHA1_MAC_LEN + key_len + AES_BLOCK_SIZE);
        let block = prf(master_secret, b"key expansion", &seed, total)?;
        let mut offset = 0;
        let mut take = |len: usize| {
            let part = block[offset..offset + len].to_vec();
            offset += len;
            part
        };
        Ok(KeyBlock {
            client_mac_key: take(SHA1_MAC_LEN),
            server_mac_key: take(SHA1_MAC_LEN),
            client_key: take(key_len),
            server_key: take(key_len),
            client_iv: take(AES_BLOCK_SIZE),
            server_iv: take(AES_BLOCK_SIZE),
        })
    }
}

enum AesCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl AesCipher {
    fn new(key: &[u8]) -> Result<Self, Error> {
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map(AesCipher::Aes128)
                .map_err(|_| Error::Encode("AES-128 key")),
            32 => Aes256::new_from_slice(key)
                .map(AesCipher::Aes256)
                .map_err(|_| Error::Encode("AES-256 key")),
            _ => Err(Error::Unsupported("AES key length")),
        }
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            AesCipher::Aes128(cipher) => cipher.encrypt_block(block),
            AesCipher::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            AesCipher::Aes128(cipher) => cipher.decrypt_block(block),
            AesCipher::Aes256(cipher) => cipher.decrypt_block(block),
        }
    }
}

/// One direction of TLS 1.0 `AES_CBC` + `HMAC-SHA1` record protection.
///
/// TLS 1.0 has no explicit IV: the first IV comes from the key block and each
/// record continues the CBC chain from the last ciphertext block.
pub struct RecordProtection {
    cipher: AesCipher,
    mac_key: Vec<u8>,
    iv: [u8; AES_BLOCK_SIZE],
    seq: u64,
}

impl RecordProtection {
    /// # Errors
    /// `Unsupported` for key lengths other than 16 or 32 and `Encode` for a short IV.
    pub fn new(key: &[u8], mac_key: &[u8], iv: &[u8]) -> Result<Self, Error> {
        let iv: [u8; AES_BLOCK_SIZE] = iv.try_into().map_err(|_| Error::Encode("CBC IV"))?;
        Ok(Self {
            cipher: AesCipher::new(key)?,
            mac_key: mac_key.to_vec(),
            iv,
            seq: 0,
        })
    }

    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.seq
    }

    fn mac(
        &self,
        content_type: ContentType,
        version: ProtocolVersion,
        content: &[u8],
    ) -> Result<HmacSha1, Error> {
        let mut mac = <HmacSha1 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|_| Error::Encode("HMAC key"))?;
        mac.update(&self.seq.to_be_bytes());
        mac.update(&[content_type as u8]);
        mac.update(&version.to_be_bytes());
        let len = u16::try_from(content.len()).map_err(|_| Error::Encode("record content"))?;
        mac.update(&len.to_be_bytes());
        mac.update(content);
        Ok(mac)
    }

    /// MAC, pad and encrypt one record fragment.
    ///
    /// # Errors
    /// `Encode` when the content does not fit a record.
    pub fn seal(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        content: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mac = self.mac(content_type, version, content)?.finalize().into_bytes();
        let data_len = content.len() + mac.len();
        let padding_length = (AES_BLOCK_SIZE - ((data_len + 1) % AES_BLOCK_SIZE)) % AES_BLOCK_SIZE;
        let mut data = Vec::with_capacity(data_len + padding_length + 1);
        data.extend_from_slice(content);
        data.extend_from_slice(&mac);
        #[allow(clippy::cast_possible_truncation)]
        data.extend(std::iter::repeat(padding_length as u8).take(padding_length + 1));

        let mut prev = self.iv;
        for chunk in data.chunks_mut(AES_BLOCK_SIZE) {
            for (byte, iv) in chunk.iter_mut().zip(prev.iter()) {
                *byte ^= iv;
            }
            self.cipher.encrypt_block(chunk);
            prev.copy_from_slice(chunk);
        }
        self.iv = prev;
        self.seq += 1;
        debug!("Sealed {content_type:?} record, seq {}, {} bytes", self.seq - 1, data.len());
        Ok(data)
    }

    /// Decrypt one record fragment and verify its padding and MAC.
    ///
    /// # Errors
    /// `BadRecordMac` for a misaligned fragment, bad padding or a MAC mismatch.
    pub fn open(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if fragment.is_empty() || fragment.len() % AES_BLOCK_SIZE != 0 {
            return Err(Error::BadRecordMac);
        }
        let mut data = fragment.to_vec();
        let mut prev = self.iv;
        for chunk in data.chunks_mut(AES_BLOCK_SIZE) {
            let mut ciphertext = [0u8; AES_BLOCK_SIZE];
            ciphertext.copy_from_slice(chunk);
            self.cipher.decrypt_block(chunk);
            for (byte, iv) in chunk.iter_mut().zip(prev.iter()) {
                *byte ^= iv;
            }
            prev = ciphertext;
        }
        self.iv = prev;

        let padding_length = usize::from(data[data.len() - 1]);
        if padding_length + 1 + SHA1_MAC_LEN > data.len() {
            return Err(Error::BadRecordMac);
        }
        let padding_start = data.len() - padding_length - 1;
        if data[padding_start..].iter().any(|b| usize::from(*b) != padding_length) {
            return Err(Error::BadRecordMac);
        }
        let content_len = padding_start - SHA1_MAC_LEN;
        let (content, received_mac) = data[..padding_start].split_at(content_len);
        self.mac(content_type, version, content)?
            .verify_slice(received_mac)
            .map_err(|_| Error::BadRecordMac)?;
        self.seq += 1;
        debug!("Opened {content_type:?} record, MAC {}", to_hex(received_mac));
        Ok(content.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::from_hex;
    use crate::handshake::TLS_VERSION_1_0;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prf_known_vector() {
        let output = prf(&[0xAB; 48], b"PRF Testvector", &[0xCD; 64], 104).unwrap();
        assert_eq!(
            to_hex(&output),
            "d3d4d1e349b5d515044666d51de32bab258cb521b6b053463e354832fd976754\
             443bcf9a296519bc289abcbc1187e4ebd31e602353776c408aafb74cbc85eff6\
             9255f9788faa184cbb957a9819d84a5d7eb006eb459d3ae8de9810454b8b2d8f\
             1afbc655a8c9a013"
        );
    }

    #[test]
    fn test_prf_odd_secret_halves_overlap() {
        let output = prf(&[0x01, 0x02, 0x03], b"x", b"y", 8).unwrap();
        assert_eq!(to_hex(&output), "cb3a6543a50ad9bd");
    }

    #[test]
    fn test_master_secret_and_verify_data() {
        let mut pms = vec![0x03, 0x01];
        pms.extend(0u8..46);
        let master = master_secret(&pms, &[0x11; 32], &[0x22; 32]).unwrap();
        assert_eq!(
            to_hex(&master),
            "2741f8b4f932f80333f17386c4891bb509585383c3722c2476c7ea54333df568\
             b097a22f746f307766a4ea9c508a2eb0"
        );
        let client = verify_data(&master, Sender::Client, b"handshake messages").unwrap();
        assert_eq!(to_hex(&client), "abbe4b3969109d32225269d3");
        let server = verify_data(&master, Sender::Server, b"handshake messages").unwrap();
        assert_eq!(server.len(), VERIFY_DATA_LEN);
        assert_ne!(client, server);
    }

    #[test]
    fn test_key_block_layout() {
        let keys = KeyBlock::derive(&[0x05; 48], &[0x11; 32], &[0x22; 32], 16).unwrap();
        assert_eq!(keys.client_mac_key.len(), 20);
        assert_eq!(keys.server_key.len(), 16);
        assert_eq!(keys.server_iv.len(), 16);
        let wide = KeyBlock::derive(&[0x05; 48], &[0x11; 32], &[0x22; 32], 32).unwrap();
        assert_eq!(wide.client_key.len(), 32);
        // Same PRF stream, so the MAC keys agree
        assert_eq!(wide.client_mac_key, keys.client_mac_key);
    }

    fn protection() -> RecordProtection {
        let key: Vec<u8> = (0u8..16).collect();
        RecordProtection::new(&key, &[0x01; 20], &[0xA0; 16]).unwrap()
    }

    #[test]
    fn test_seal_known_records_with_iv_chaining() {
        let mut writer = protection();
        let mut finished = vec![0x14, 0x00, 0x00, 0x0C];
        finished.extend([0x42; 12]);
        let first = writer.seal(ContentType::Handshake, TLS_VERSION_1_0, &finished).unwrap();
        assert_eq!(
            first,
            from_hex(
                "f4e874ef2a6a10346c22fcb9e90d30e226b576e0324a5e905831f3d81108d565\
                 05c543850dcce090ba4a41bd2bd8facf"
            )
            .unwrap()
        );
        let second = writer.seal(ContentType::Alert, TLS_VERSION_1_0, &[0x01, 0x00]).unwrap();
        assert_eq!(
            second,
            from_hex("bc6be89fb2a3fe00a4f9dccfdf8350d96b3b963bc13013437651a776dfc4efe9").unwrap()
        );

        let mut reader = protection();
        assert_eq!(
            reader.open(ContentType::Handshake, TLS_VERSION_1_0, &first).unwrap(),
            finished
        );
        assert_eq!(
            reader.open(ContentType::Alert, TLS_VERSION_1_0, &second).unwrap(),
            vec![0x01, 0x00]
        );
        assert_eq!(reader.sequence_number(), 2);
    }

    #[test]
    fn test_open_rejects_tampering() {
        let mut writer = protection();
        let sealed = writer.seal(ContentType::Handshake, TLS_VERSION_1_0, b"hello").unwrap();

        let mut tampered = sealed.clone();
        tampered[0] ^= 0x01;
        assert!(matches!(
            protection().open(ContentType::Handshake, TLS_VERSION_1_0, &tampered),
            Err(Error::BadRecordMac)
        ));
        // The MAC covers the content type
        assert!(matches!(
            protection().open(ContentType::ApplicationData, TLS_VERSION_1_0, &sealed),
            Err(Error::BadRecordMac)
        ));
        assert!(matches!(
            protection().open(ContentType::Handshake, TLS_VERSION_1_0, &sealed[..sealed.len() - 1]),
            Err(Error::BadRecordMac)
        ));
    }
}
