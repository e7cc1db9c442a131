//! Cryptographic primitives for the MTProto transport core: AES-256-IGE,
//! RSA padding-encryption, Pollard-rho factorization, DH parameter
//! validation, and the symmetric envelope key derivation used to encrypt
//! and decrypt messages once an authorization key has been negotiated.

pub mod aes;
mod auth_key;
pub mod dh;
pub mod factorize;
pub mod hex;
pub mod ring_buffer;
pub mod rsa;
mod sha;

pub use auth_key::AuthKey;
use getrandom::getrandom;
pub use ring_buffer::RingBuffer;
use sha::sha1;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The ciphertext is either too small or not padded correctly.
    InvalidBuffer,

    /// The server replied under a different authorization key than expected.
    AuthKeyMismatch,

    /// The recomputed `msg_key` did not match the one on the wire.
    MessageKeyMismatch,

    /// A cryptographic parameter (RSA input, DH parameter) failed its checks.
    CryptoParam(&'static str),

    /// `pq` could not be factored into two primes.
    Unfactorable,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Error::AuthKeyMismatch => write!(f, "server authkey mismatches with ours"),
            Error::MessageKeyMismatch => write!(f, "server msg_key mismatches with ours"),
            Error::CryptoParam(why) => write!(f, "bad cryptographic parameter: {why}"),
            Error::Unfactorable => write!(f, "failed to factorize pq"),
        }
    }
}

/// Direction a message travels, which selects which half of the shared
/// key material feeds the key/IV derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// "where x = 0 for messages from client to server and x = 8 for those
    /// from server to client."
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// Derives `(aes_key, aes_iv)` from the shared key material and `msg_key`,
/// using the legacy (MTProto 1.0) four-hash SHA-1 scheme:
///
/// ```text
/// sha_a = SHA1(msg_key || shared[x .. x+32])
/// sha_b = SHA1(shared[32+x .. 48+x] || msg_key || shared[48+x .. 64+x])
/// sha_c = SHA1(shared[64+x .. 96+x] || msg_key)
/// sha_d = SHA1(msg_key || shared[96+x .. 128+x])
/// aes_key = sha_a[0..8] || sha_b[8..20] || sha_c[4..16]
/// aes_iv  = sha_a[8..20] || sha_b[0..8] || sha_c[16..20] || sha_d[0..8]
/// ```
pub fn calc_key(shared_key: &[u8; 256], msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();

    let sha_a = sha1!(msg_key, &shared_key[x..x + 32]);
    let sha_b = sha1!(&shared_key[32 + x..48 + x], msg_key, &shared_key[48 + x..64 + x]);
    let sha_c = sha1!(&shared_key[64 + x..96 + x], msg_key);
    let sha_d = sha1!(msg_key, &shared_key[96 + x..128 + x]);

    let mut aes_key = [0u8; 32];
    aes_key[0..8].copy_from_slice(&sha_a[0..8]);
    aes_key[8..20].copy_from_slice(&sha_b[8..20]);
    aes_key[20..32].copy_from_slice(&sha_c[4..16]);

    let mut aes_iv = [0u8; 32];
    aes_iv[0..12].copy_from_slice(&sha_a[8..20]);
    aes_iv[12..20].copy_from_slice(&sha_b[0..8]);
    aes_iv[20..24].copy_from_slice(&sha_c[16..20]);
    aes_iv[24..32].copy_from_slice(&sha_d[0..8]);

    (aes_key, aes_iv)
}

/// Encrypts the plaintext currently in `buffer` in place: random-pads to
/// a 16-byte boundary, computes `msg_key = SHA1(plaintext)[4..20]` over
/// the padded plaintext,
/// AES-IGE encrypts, and prepends `auth_key_id` and `msg_key`.
///
/// `buffer` must already contain the unencrypted tail (`server_salt` through
/// `payload`, padded); see `tgproto_mtproto::mtp::encrypted` for the caller.
pub fn encrypt_envelope(buffer: &mut RingBuffer<u8>, auth_key: &AuthKey, side: Side) {
    // Pad the plaintext tail with 0..15 random bytes, just enough to
    // reach a 16-byte boundary for AES-IGE.
    let random_padding_len = (16 - (buffer.len() % 16)) % 16;
    if random_padding_len > 0 {
        let mut pad = vec![0u8; random_padding_len];
        getrandom(&mut pad).expect("failed to generate random padding");
        buffer.extend(pad);
    }

    let msg_key = {
        let digest = sha1!(&buffer[..]);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[4..20]);
        key
    };

    let (key, iv) = calc_key(&auth_key.data, &msg_key, side);
    aes::ige_encrypt(buffer.as_mut(), &key, &iv);

    let key_id = auth_key.key_id().to_le_bytes();
    buffer.shift(8 + 16).extend(key_id).extend(msg_key);
}

/// Decrypts an encrypted envelope (everything after `auth_key_id`) and
/// verifies its `msg_key`, returning the decrypted tail
/// (`server_salt..payload`, still including the random padding).
pub fn decrypt_envelope(
    msg_key: &[u8; 16],
    ciphertext: &[u8],
    auth_key: &AuthKey,
    side: Side,
) -> Result<Vec<u8>, Error> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(Error::InvalidBuffer);
    }

    let (key, iv) = calc_key(&auth_key.data, msg_key, side);
    let plaintext = aes::ige_decrypt(ciphertext, &key, &iv);

    let expected = {
        let digest = sha1!(&plaintext);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[4..20]);
        key
    };
    if expected != *msg_key {
        return Err(Error::MessageKeyMismatch);
    }

    Ok(plaintext)
}

/// Derives the temporary unauthenticated AES key/IV used during the
/// handshake from `(server_nonce, new_nonce)`, the way the `set_client_DH_params`
/// step's encrypted inner data is keyed before the authorization key exists.
pub fn generate_key_data_from_nonce(
    server_nonce: &[u8; 16],
    new_nonce: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let hash1 = sha1!(new_nonce, server_nonce);
    let hash2 = sha1!(server_nonce, new_nonce);
    let hash3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&hash1);
    key[20..].copy_from_slice(&hash2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&hash2[12..]);
    iv[8..28].copy_from_slice(&hash3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

/// Encrypts `plaintext` with AES-IGE, padding with secure random bytes to
/// a 16-byte boundary first (used for the handshake's unauthenticated
/// encrypted blobs, where there is no separate `msg_key` framing).
pub fn encrypt_ige(plaintext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Vec<u8> {
    let mut padded = plaintext.to_vec();
    let pad_len = (16 - (padded.len() % 16)) % 16;
    if pad_len > 0 {
        let mut pad = vec![0u8; pad_len];
        getrandom(&mut pad).expect("failed to generate random padding for encryption");
        padded.extend(pad);
    }

    aes::ige_encrypt(&mut padded, key, iv);
    padded
}

/// Decrypts `padded_ciphertext` with AES-IGE. Panics if its length is not
/// a multiple of 16.
pub fn decrypt_ige(padded_ciphertext: &[u8], key: &[u8; 32], iv: &[u8; 32]) -> Vec<u8> {
    aes::ige_decrypt(padded_ciphertext, key, iv)
}

/// Hashes `data` prefixed by `SHA1`, used to build the inner handshake
/// payloads (`p_q_inner_data`, `client_DH_inner_data`): the server / client
/// verifies the hash before trusting the rest of the payload.
pub fn sha1_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + data.len());
    out.extend(sha1!(data));
    out.extend(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_auth_key() -> AuthKey {
        let mut buffer = [0u8; 256];
        buffer.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);
        AuthKey::from_bytes(buffer)
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let auth_key = get_test_auth_key();
        let mut buffer = RingBuffer::with_capacity(64, 24);
        buffer.extend(0..40u8);

        let plaintext_tail = buffer.as_ref().to_vec();
        encrypt_envelope(&mut buffer, &auth_key, Side::Client);

        // layout: [auth_key_id(8) | msg_key(16) | ciphertext]
        let framed = buffer.as_ref().to_vec();
        let mut msg_key = [0u8; 16];
        msg_key.copy_from_slice(&framed[8..24]);
        let ciphertext = &framed[24..];

        let decrypted = decrypt_envelope(&msg_key, ciphertext, &auth_key, Side::Client).unwrap();
        assert_eq!(&decrypted[..plaintext_tail.len()], &plaintext_tail[..]);
    }

    #[test]
    fn decrypt_rejects_tampered_msg_key() {
        let auth_key = get_test_auth_key();
        let mut buffer = RingBuffer::with_capacity(64, 24);
        buffer.extend(0..40u8);
        encrypt_envelope(&mut buffer, &auth_key, Side::Client);

        let framed = buffer.as_ref().to_vec();
        let mut msg_key = [0u8; 16];
        msg_key.copy_from_slice(&framed[8..24]);
        msg_key[0] ^= 0xff;
        let ciphertext = &framed[24..];

        assert_eq!(
            decrypt_envelope(&msg_key, ciphertext, &auth_key, Side::Client),
            Err(Error::MessageKeyMismatch)
        );
    }

    #[test]
    fn ige_roundtrips_through_padding() {
        let key = [3u8; 32];
        let iv = [4u8; 32];
        let data = b"not a multiple of sixteen bytes!!";
        let encrypted = encrypt_ige(data, &key, &iv);
        let decrypted = decrypt_ige(&encrypted, &key, &iv);
        assert_eq!(&decrypted[..data.len()], &data[..]);
    }
}
