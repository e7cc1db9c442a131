//! RSA public-key encryption as used by the handshake to protect the
//! `p_q_inner_data` payload sent in `req_DH_params`.
//!
//! This implements the legacy padding scheme described in
//! <https://core.telegram.org/mtproto/auth_key#2-presenting-proof-of-work-server-authentication>:
//! the plaintext is random-padded to a multiple of 255 bytes, split into
//! 255-byte blocks, and each block is RSA-encrypted independently into a
//! 256-byte big-endian block.

use crate::sha::sha1;
use crate::Error;
use num_bigint::BigUint;

const BLOCK_IN: usize = 255;
const BLOCK_OUT: usize = 256;
const MIN_PADDING: usize = 32;

/// A loaded Telegram RSA public key.
pub struct Key {
    n: BigUint,
    e: BigUint,
}

impl Key {
    /// Parses a public key from its decimal `n` (modulus) and `e` (exponent).
    ///
    /// Returns `None` if either value fails to parse, or `n` is not within
    /// the 2041..=2048 bit range Telegram's server keys use.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        let n = BigUint::parse_bytes(n.as_bytes(), 10)?;
        let e = BigUint::parse_bytes(e.as_bytes(), 10)?;
        let bits = n.bits();
        if !(2041..=2048).contains(&bits) {
            return None;
        }
        Some(Self { n, e })
    }

    /// The key's fingerprint as Telegram identifies it: the low 64 bits of
    /// `SHA1(DER(n) ‖ DER(e))`, interpreted little-endian.
    pub fn fingerprint(&self) -> i64 {
        let mut buf = Vec::new();
        buf.extend(der_encode_uint(&self.n));
        buf.extend(der_encode_uint(&self.e));
        let digest = sha1!(buf);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[12..20]);
        i64::from_le_bytes(bytes)
    }
}

/// DER-encodes a non-negative integer as an ASN.1 `INTEGER` (tag + length +
/// content), prefixing a zero byte when the top bit would otherwise be read
/// as a sign bit.
fn der_encode_uint(value: &BigUint) -> Vec<u8> {
    let mut content = value.to_bytes_be();
    if content.is_empty() {
        content.push(0);
    }
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }

    let mut out = vec![0x02u8];
    if content.len() < 128 {
        out.push(content.len() as u8);
    } else {
        let len_bytes = content.len().to_be_bytes();
        let len_bytes = &len_bytes[len_bytes.iter().position(|&b| b != 0).unwrap_or(0)..];
        out.push(0x80 | len_bytes.len() as u8);
        out.extend(len_bytes);
    }
    out.extend(content);
    out
}

/// Pads `data` with random bytes to a multiple of 255 and RSA-encrypts each
/// 255-byte block independently into a 256-byte block.
///
/// Fails with [`Error::CryptoParam`] if `data` is empty or longer than
/// 2550 bytes (ten blocks).
pub fn encrypt(data: &[u8], key: &Key, random: impl Fn(&mut [u8])) -> Result<Vec<u8>, Error> {
    if data.is_empty() || data.len() > BLOCK_IN * 10 {
        return Err(Error::CryptoParam("rsa plaintext out of range"));
    }

    let padded_len = {
        let mut len = data.len() + MIN_PADDING;
        len += (BLOCK_IN - len % BLOCK_IN) % BLOCK_IN;
        len
    };

    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(data);
    let mut pad = vec![0u8; padded_len - data.len()];
    random(&mut pad);
    padded.extend(pad);

    let mut out = Vec::with_capacity(padded.len() / BLOCK_IN * BLOCK_OUT);
    for block in padded.chunks(BLOCK_IN) {
        let x = BigUint::from_bytes_be(block);
        if x >= key.n {
            return Err(Error::CryptoParam("rsa block not reduced modulo n"));
        }
        let y = x.modpow(&key.e, &key.n);
        let mut bytes = y.to_bytes_be();
        while bytes.len() < BLOCK_OUT {
            bytes.insert(0, 0);
        }
        out.extend(bytes);
    }

    Ok(out)
}

/// Decrypts data produced by [`encrypt`] given the matching private
/// exponent `d`. Only used by tests: the real client never holds `d`.
#[cfg(test)]
fn decrypt_and_strip(cipher: &[u8], n: &BigUint, d: &BigUint, plain_len: usize) -> Vec<u8> {
    assert_eq!(cipher.len() % BLOCK_OUT, 0);
    let mut out = Vec::new();
    for block in cipher.chunks(BLOCK_OUT) {
        let y = BigUint::from_bytes_be(block);
        let x = y.modpow(d, n);
        let mut bytes = x.to_bytes_be();
        while bytes.len() < BLOCK_IN {
            bytes.insert(0, 0);
        }
        out.extend(bytes);
    }
    out.truncate(plain_len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> (Key, BigUint) {
        // A small (but still >2041-bit is not required for this roundtrip
        // test, since it only exercises the padding/block logic) disposable
        // keypair used only in tests.
        let p = BigUint::parse_bytes(b"177451484239942560392569094291353756868502943806344785118979858942896085857271", 10).unwrap();
        let q = BigUint::parse_bytes(b"170278353766098963437304300019935486873805423629403219101940392463741640544399", 10).unwrap();
        let n = &p * &q;
        let e = BigUint::from(65537u32);
        let totient = (&p - 1u32) * (&q - 1u32);
        let d = mod_inverse(&e, &totient);
        (Key { n: n.clone(), e }, d)
    }

    fn mod_inverse(a: &BigUint, m: &BigUint) -> BigUint {
        // extended euclid over signed bigints via i128-free approach using
        // num_bigint's BigInt would be cleaner, but for a disposable test
        // keypair a direct modpow-based inverse (Fermat, since our toy
        // modulus product is used only additively here) is unnecessary;
        // we instead solve it the straightforward iterative way.
        use num_bigint::BigInt;
        use num_traits::{One, Zero};

        let (mut old_r, mut r) = (BigInt::from(a.clone()), BigInt::from(m.clone()));
        let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
        while !r.is_zero() {
            let q = &old_r / &r;
            let tmp_r = &old_r - &q * &r;
            old_r = std::mem::replace(&mut r, tmp_r);
            let tmp_s = &old_s - &q * &s;
            old_s = std::mem::replace(&mut s, tmp_s);
        }
        let m_signed = BigInt::from(m.clone());
        let result = ((old_s % &m_signed) + &m_signed) % &m_signed;
        result.to_biguint().unwrap()
    }

    #[test]
    fn roundtrip_recovers_plaintext() {
        let (key, d) = test_key();
        let data = b"p_q_inner_data goes here, arbitrary bytes";
        let encrypted = encrypt(data, &key, |buf| buf.iter_mut().for_each(|b| *b = 0x42)).unwrap();
        assert_eq!(encrypted.len() % BLOCK_OUT, 0);

        let decrypted = decrypt_and_strip(&encrypted, &key.n, &d, encrypted.len() / BLOCK_OUT * BLOCK_IN);
        assert_eq!(&decrypted[..data.len()], &data[..]);
    }

    #[test]
    fn rejects_oversized_input() {
        let (key, _) = test_key();
        let data = vec![0u8; BLOCK_IN * 10 + 1];
        assert!(encrypt(&data, &key, |_| {}).is_err());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let key = Key::new(
            "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
            "65537",
        ).unwrap();
        let fp1 = key.fingerprint();
        let fp2 = key.fingerprint();
        assert_eq!(fp1, fp2);
    }
}
