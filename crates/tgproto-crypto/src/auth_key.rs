use crate::sha::sha1;
use std::fmt;

/// A Telegram [authorization key]: a 2048-bit shared secret negotiated
/// during the DH handshake, along with the fingerprints derived from it.
///
/// [authorization key]: https://core.telegram.org/mtproto/auth_key
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    aux_hash: [u8; 8],
    key_id: [u8; 8],
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
    }
}

impl AuthKey {
    /// Builds an authorization key from its raw 256-byte value, deriving
    /// the fingerprints used to identify it on the wire.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let sha = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&sha[0..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&sha[12..12 + 8]);

        Self {
            data,
            aux_hash,
            key_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    /// The low 64 bits of `SHA1(auth_key)`, used to address the key on the
    /// wire (`auth_key_id`).
    pub fn key_id(&self) -> i64 {
        i64::from_le_bytes(self.key_id)
    }

    /// `auth_key_aux_hash`: the next 64 bits of `SHA1(auth_key)` after
    /// `aux_hash`'s own id bits, used as `retry_id` when resending
    /// `set_client_DH_params` after a `dh_gen_retry`.
    pub fn aux_hash(&self) -> i64 {
        i64::from_le_bytes(self.aux_hash)
    }

    /// Calculates `new_nonce_hash{number}` used to verify `dh_gen_ok` /
    /// `dh_gen_retry` / `dh_gen_fail` answers.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let mut data = Vec::with_capacity(new_nonce.len() + 1 + self.aux_hash.len());
        data.extend(new_nonce);
        data.push(number);
        data.extend(&self.aux_hash);

        let mut result = [0u8; 16];
        result.copy_from_slice(&sha1!(data)[4..]);
        result
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("key_id", &self.key_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_auth_key() -> AuthKey {
        let mut buffer = [0u8; 256];
        buffer.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);
        AuthKey::from_bytes(buffer)
    }

    fn get_test_new_nonce() -> [u8; 32] {
        let mut buffer = [0u8; 32];
        buffer.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);
        buffer
    }

    #[test]
    fn auth_key_id() {
        let auth_key = get_test_auth_key();
        let expected = i64::from_le_bytes([50, 209, 88, 110, 164, 87, 223, 200]);
        assert_eq!(auth_key.key_id(), expected);
    }

    #[test]
    fn calc_new_nonce_hash1() {
        let auth_key = get_test_auth_key();
        let new_nonce = get_test_new_nonce();
        assert_eq!(
            auth_key.calc_new_nonce_hash(&new_nonce, 1),
            [194, 206, 210, 179, 62, 89, 58, 85, 210, 127, 74, 93, 171, 238, 124, 103]
        );
    }

    #[test]
    fn calc_new_nonce_hash2() {
        let auth_key = get_test_auth_key();
        let new_nonce = get_test_new_nonce();
        assert_eq!(
            auth_key.calc_new_nonce_hash(&new_nonce, 2),
            [244, 49, 142, 133, 189, 47, 243, 190, 132, 217, 254, 252, 227, 220, 227, 159]
        );
    }

    #[test]
    fn calc_new_nonce_hash3() {
        let auth_key = get_test_auth_key();
        let new_nonce = get_test_new_nonce();
        assert_eq!(
            auth_key.calc_new_nonce_hash(&new_nonce, 3),
            [75, 249, 215, 179, 125, 180, 19, 238, 67, 29, 40, 81, 118, 49, 203, 61]
        );
    }
}
