use tgproto_crypto::{hex, AuthKey, Side};

fn get_test_auth_key() -> AuthKey {
    let mut buffer = [0u8; 256];
    buffer.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);
    AuthKey::from_bytes(buffer)
}

#[test]
fn auth_key_id_matches_reference_value() {
    let auth_key = get_test_auth_key();
    let expected = i64::from_le_bytes([50, 209, 88, 110, 164, 87, 223, 200]);
    assert_eq!(auth_key.key_id(), expected);
}

#[test]
fn factorize_recovers_known_pq() {
    let (p, q) = tgproto_crypto::factorize::factorize(1724114033281923457);
    assert_eq!((p, q), (1229739323, 1402015619));
    assert_eq!(p * q, 1724114033281923457);
}

#[test]
fn hex_roundtrips() {
    let bytes = hex::from_hex("deadbeef0102");
    assert_eq!(hex::to_hex(&bytes), "deadbeef0102");
}

#[test]
fn envelope_derivation_is_pure_function_of_inputs() {
    let auth_key = get_test_auth_key();
    let msg_key = [7u8; 16];

    let (key1, iv1) = tgproto_crypto::calc_key(&auth_key.to_bytes(), &msg_key, Side::Client);
    let (key2, iv2) = tgproto_crypto::calc_key(&auth_key.to_bytes(), &msg_key, Side::Client);
    assert_eq!(key1, key2);
    assert_eq!(iv1, iv2);

    let (server_key, _) = tgproto_crypto::calc_key(&auth_key.to_bytes(), &msg_key, Side::Server);
    assert_ne!(key1, server_key);
}
