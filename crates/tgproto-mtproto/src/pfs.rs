//! Binding a temporary (perfect-forward-secrecy) authorization key to the
//! permanent one, per
//! <https://core.telegram.org/techfaq#q-how-is-perfect-forward-secrecy-implemented-in-mtproto>.
//!
//! A temporary key is negotiated with the exact same handshake as
//! [`crate::authentication`], then bound to the permanent key by sending
//! `auth.bindTempAuthKey` *encrypted under the permanent key*, over the
//! session that is itself encrypted under the temporary key. Everything
//! here builds the inner payload; actually encrypting and dispatching it
//! is the encrypted transport's job, since that's where the permanent
//! key's envelope code lives.

use crate::wire::Writer;
use getrandom::getrandom;

const BIND_AUTH_KEY_INNER: u32 = 0x75a3f765;

/// `bind_auth_key_inner#75a3f765 nonce:long temp_auth_key_id:long
/// perm_auth_key_id:long temp_session_id:long expires_at:int = Bind_auth_key_inner;`
pub struct BindAuthKeyInner {
    pub nonce: i64,
    pub temp_auth_key_id: i64,
    pub perm_auth_key_id: i64,
    pub temp_session_id: i64,
    pub expires_at: i32,
}

impl BindAuthKeyInner {
    pub fn new(temp_auth_key_id: i64, perm_auth_key_id: i64, temp_session_id: i64, expires_at: i32) -> Self {
        let mut nonce_bytes = [0u8; 8];
        getrandom(&mut nonce_bytes).expect("failed to generate bind nonce");
        Self {
            nonce: i64::from_le_bytes(nonce_bytes),
            temp_auth_key_id,
            perm_auth_key_id,
            temp_session_id,
            expires_at,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(BIND_AUTH_KEY_INNER);
        w.write_i64(self.nonce);
        w.write_i64(self.temp_auth_key_id);
        w.write_i64(self.perm_auth_key_id);
        w.write_i64(self.temp_session_id);
        w.write_i32(self.expires_at);
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_serializes_with_constructor_prefix() {
        let inner = BindAuthKeyInner::new(1, 2, 3, 4);
        let bytes = inner.serialize();
        assert_eq!(&bytes[..4], &BIND_AUTH_KEY_INNER.to_le_bytes());
    }
}
