//! Textbook RSA over `BigUint` and PKCS#1 v1.5 type 2 padding.
//!
//! Only what the handshake and the oracles need: raw modular exponentiation
//! and block encoding. No constant-time guarantees.
use crate::error::Error;
use num_bigint::BigUint;
use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    pub n: BigUint,
    pub e: BigUint,
}

impl RsaPublicKey {
    #[must_use]
    pub fn new(n: BigUint, e: BigUint) -> Self {
        Self { n, e }
    }

    /// Modulus length in bytes, `k` in PKCS#1.
    #[must_use]
    pub fn size(&self) -> usize {
        usize::try_from(self.n.bits().div_ceil(8)).unwrap_or(usize::MAX)
    }

    /// `m^e mod n`, left padded to the modulus length.
    #[must_use]
    pub fn encrypt_raw(&self, message: &BigUint) -> Vec<u8> {
        to_k_bytes(&message.modpow(&self.e, &self.n), self.size())
    }

    /// Pads `message` as a type 2 block and encrypts it.
    ///
    /// # Errors
    /// `Encode` when the message does not fit with at least 8 padding bytes.
    pub fn encrypt_pkcs1<R: Rng + ?Sized>(&self, message: &[u8], rng: &mut R) -> Result<Vec<u8>, Error> {
        let block = pkcs1_pad_type2(message, self.size(), rng)?;
        Ok(self.encrypt_raw(&BigUint::from_bytes_be(&block)))
    }
}

#[derive(Debug, Clone)]
pub struct RsaPrivateKey {
    pub public: RsaPublicKey,
    pub d: BigUint,
}

impl RsaPrivateKey {
    #[must_use]
    pub fn new(n: BigUint, e: BigUint, d: BigUint) -> Self {
        Self {
            public: RsaPublicKey::new(n, e),
            d,
        }
    }

    /// `c^d mod n`, left padded to the modulus length.
    #[must_use]
    pub fn decrypt_raw(&self, ciphertext: &[u8]) -> Vec<u8> {
        let c = BigUint::from_bytes_be(ciphertext);
        to_k_bytes(&c.modpow(&self.d, &self.public.n), self.public.size())
    }
}

/// Builds `00 02 PS 00 message` of `k` bytes with nonzero random `PS`.
///
/// # Errors
/// `Encode` when `message` is longer than `k - 11`.
pub fn pkcs1_pad_type2<R: Rng + ?Sized>(message: &[u8], k: usize, rng: &mut R) -> Result<Vec<u8>, Error> {
    if message.len() + 11 > k {
        return Err(Error::Encode("PKCS#1 message too long for modulus"));
    }
    let ps_len = k - 3 - message.len();
    let mut block = Vec::with_capacity(k);
    block.push(0x00);
    block.push(0x02);
    for _ in 0..ps_len {
        block.push(rng.random_range(1..=255u8));
    }
    block.push(0x00);
    block.extend_from_slice(message);
    Ok(block)
}

/// Big-endian bytes of `x`, left padded with zeros to `k` bytes.
#[must_use]
pub fn to_k_bytes(x: &BigUint, k: usize) -> Vec<u8> {
    let bytes = x.to_bytes_be();
    if bytes.len() >= k {
        return bytes;
    }
    let mut padded = vec![0u8; k - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}

#[cfg(test)]
pub(crate) mod test_key {
    use super::*;
    use num_traits::Num;

    /// 512-bit key used across the crate's tests.
    pub const N: &str = "d00610adb45f2fc17a35bcf6f8e3366eb25e189534fcef5ef07bc797d0373f2c134a34edfd99f016dcd5a7b0f46179ad22e2c757287ff71e31a4ce2ed3b74f7b";
    pub const D: &str = "59e5e51b4c51be6f9c82d0b0e28a3ea1c40f8a0c212415c62fa32e745b152504fca74ac2d9c645309b521e4417fcb725310afa6217f047d00ca1e5c82c21aed1";

    /// Self-signed certificate for CN=oracle.test carrying the key above.
    pub const CERT: &str = "308201833082012da00302010202143fdd60f1ccffeb02d4f7710933e57661aa1a12db300d06092a864886f70d01010b050030163114301206035504030c0b6f7261636c652e74657374301e170d3236313031393139313433305a170d3336313031363139313433305a30163114301206035504030c0b6f7261636c652e74657374305c300d06092a864886f70d0101010500034b003048024100d00610adb45f2fc17a35bcf6f8e3366eb25e189534fcef5ef07bc797d0373f2c134a34edfd99f016dcd5a7b0f46179ad22e2c757287ff71e31a4ce2ed3b74f7b0203010001a3533051301d0603551d0e04160414e38c29940c3b0ca57c7ca5b99d37c50b0bd00807301f0603551d23041830168014e38c29940c3b0ca57c7ca5b99d37c50b0bd00807300f0603551d130101ff040530030101ff300d06092a864886f70d01010b0500034100c2a14394a1e8219481318b98004227e1f6acca92cd0957471d62aa97430cc11fcec40fda504840224e0c3e267194f57bfbaa4b3932728ce933e935e2d44d73de";

    pub fn private_key() -> RsaPrivateKey {
        RsaPrivateKey::new(
            BigUint::from_str_radix(N, 16).unwrap(),
            BigUint::from(65537u32),
            BigUint::from_str_radix(D, 16).unwrap(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pad_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        let block = pkcs1_pad_type2(&[0xAA; 48], 64, &mut rng).unwrap();
        assert_eq!(block.len(), 64);
        assert_eq!(&block[..2], &[0x00, 0x02]);
        assert!(block[2..15].iter().all(|b| *b != 0));
        assert_eq!(block[15], 0x00);
        assert_eq!(&block[16..], &[0xAA; 48]);
        assert!(pkcs1_pad_type2(&[0u8; 54], 64, &mut rng).is_err());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = test_key::private_key();
        assert_eq!(key.public.size(), 64);
        let mut rng = StdRng::seed_from_u64(1);
        let ciphertext = key.public.encrypt_pkcs1(b"premaster", &mut rng).unwrap();
        assert_eq!(ciphertext.len(), 64);
        let plaintext = key.decrypt_raw(&ciphertext);
        assert_eq!(&plaintext[..2], &[0x00, 0x02]);
        assert_eq!(&plaintext[64 - 9..], b"premaster");
    }

    #[test]
    fn test_to_k_bytes() {
        assert_eq!(to_k_bytes(&BigUint::from(0x0102u32), 4), vec![0, 0, 1, 2]);
        assert_eq!(to_k_bytes(&BigUint::from(0u32), 2), vec![0, 0]);
    }
}
