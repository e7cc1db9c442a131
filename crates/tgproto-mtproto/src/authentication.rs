//! The four-step handshake that negotiates an authorization key with a
//! data center: `req_pq_multi` / `req_DH_params` / `set_client_DH_params`,
//! plus the `dh_gen_retry` loop and temporary-key (PFS) variant the plain
//! four-step exchange above doesn't cover on its own.
//!
//! Every step here is a pure function of its inputs (including the
//! caller-supplied randomness), so the whole exchange can be replayed
//! against recorded server responses in tests without a network.

use crate::errors::AuthKeyGenError as Error;
use crate::wire::{Cursor, Writer};
use getrandom::getrandom;
use num_bigint::BigUint;
use sha1::{Digest, Sha1};
use tgproto_crypto::{dh, factorize::factorize, generate_key_data_from_nonce, rsa, sha1_prefixed, AuthKey};

const REQ_PQ_MULTI: u32 = 0xbe7e8ef1;
const RES_PQ: u32 = 0x05162463;
const P_Q_INNER_DATA: u32 = 0x83c95aec;
const REQ_DH_PARAMS: u32 = 0xd712e4be;
const SERVER_DH_PARAMS_FAIL: u32 = 0x79cb045d;
const SERVER_DH_PARAMS_OK: u32 = 0xd0e8075c;
const SERVER_DH_INNER_DATA: u32 = 0xb5890dba;
const CLIENT_DH_INNER_DATA: u32 = 0x6643b654;
const SET_CLIENT_DH_PARAMS: u32 = 0xf5045f1f;
const DH_GEN_OK: u32 = 0x3bcbf734;
const DH_GEN_RETRY: u32 = 0x46dc1fb9;
const DH_GEN_FAIL: u32 = 0xa69dae02;
const VECTOR_ID: u32 = 0x1cb5c415;

/// Maximum number of `dh_gen_retry` round-trips to attempt before giving up.
pub const MAX_DH_GEN_RETRIES: u32 = 5;

fn strip_leading_zeros(mut bytes: Vec<u8>) -> Vec<u8> {
    let pos = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len().saturating_sub(1));
    bytes.drain(..pos);
    bytes
}

/// Production RSA public keys Telegram's servers may present, keyed by
/// their fingerprint once computed.
fn known_rsa_keys() -> Vec<rsa::Key> {
    vec![
        rsa::Key::new(
            "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
            "65537",
        ),
        rsa::Key::new(
            "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
            "65537",
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn key_for_fingerprint(fingerprint: i64) -> Option<rsa::Key> {
    known_rsa_keys().into_iter().find(|key| key.fingerprint() == fingerprint)
}

pub struct Step1 {
    nonce: [u8; 16],
}

pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    gab: BigUint,
    time_offset: i32,
    /// `retry_id` to echo on the next `set_client_DH_params`; zero until a
    /// `dh_gen_retry` bumps it to the previous candidate's `auth_key_aux_hash`.
    retry_id: i64,
    retries_left: u32,
    /// The exact bytes already sent, kept so a retry resends byte-for-byte
    /// apart from the updated `retry_id`.
    client_dh_inner_hashed_prefix: Vec<u8>,
    key: [u8; 32],
    iv: [u8; 32],
}

/// Produces the `req_pq_multi` request and the state needed to interpret
/// its response.
pub fn step1() -> (Vec<u8>, Step1) {
    let mut nonce = [0u8; 16];
    getrandom(&mut nonce).expect("failed to generate secure nonce");
    do_step1(nonce)
}

fn do_step1(nonce: [u8; 16]) -> (Vec<u8>, Step1) {
    let mut w = Writer::new();
    w.write_u32(REQ_PQ_MULTI);
    w.write_bytes(&nonce);
    (w.into_bytes(), Step1 { nonce })
}

/// Consumes `res_pq`, factors `pq`, and builds the encrypted
/// `req_DH_params` request.
pub fn step2(data: Step1, response: &[u8]) -> Result<(Vec<u8>, Step2), Error> {
    let mut random_bytes = [0u8; 32 + 256];
    getrandom(&mut random_bytes).expect("failed to generate secure data for auth key");
    do_step2(data, response, &random_bytes)
}

fn do_step2(data: Step1, response: &[u8], random_bytes: &[u8; 32 + 256]) -> Result<(Vec<u8>, Step2), Error> {
    let Step1 { nonce } = data;
    let mut c = Cursor::new(response);
    let constructor_id = c.read_u32().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;
    if constructor_id != RES_PQ {
        return Err(Error::Deserialize(crate::errors::DeserializeError::UnknownConstructor(
            constructor_id as i32,
        )));
    }

    let got_nonce: [u8; 16] = c.read_fixed().map_err(|_| Error::NonceMismatch)?;
    if got_nonce != nonce {
        return Err(Error::NonceMismatch);
    }
    let server_nonce: [u8; 16] = c.read_fixed().map_err(|_| Error::NonceMismatch)?;
    let pq_bytes = c.read_bare_string().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;

    if pq_bytes.len() > 8 {
        return Err(Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof));
    }
    let mut pq_buf = [0u8; 8];
    pq_buf[8 - pq_bytes.len()..].copy_from_slice(pq_bytes);
    let pq = u64::from_be_bytes(pq_buf);

    let vector_id = c.read_u32().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;
    if vector_id != VECTOR_ID {
        return Err(Error::Deserialize(crate::errors::DeserializeError::UnknownConstructor(
            vector_id as i32,
        )));
    }
    let count = c.read_i32().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;
    let mut fingerprints = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        fingerprints.push(c.read_i64().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?);
    }

    let (p, q) = factorize(pq);

    let new_nonce: [u8; 32] = random_bytes[..32].try_into().unwrap();
    let rsa_randomness = &random_bytes[32..];

    let p_string = strip_leading_zeros(p.to_be_bytes().to_vec());
    let q_string = strip_leading_zeros(q.to_be_bytes().to_vec());

    let mut inner = Writer::new();
    inner.write_u32(P_Q_INNER_DATA);
    inner.write_bare_string(pq_bytes);
    inner.write_bare_string(&p_string);
    inner.write_bare_string(&q_string);
    inner.write_bytes(&nonce);
    inner.write_bytes(&server_nonce);
    inner.write_bytes(&new_nonce);
    let inner_hashed = sha1_prefixed(inner.as_slice());

    let fingerprint = fingerprints
        .iter()
        .copied()
        .find(|&fp| key_for_fingerprint(fp).is_some())
        .ok_or(Error::NoMatchingRsaKey)?;
    let key = key_for_fingerprint(fingerprint).unwrap();
    let ciphertext = rsa::encrypt(&inner_hashed, &key, |buf| {
        buf.copy_from_slice(&rsa_randomness[..buf.len()]);
    })
    .map_err(Error::Crypto)?;

    let mut w = Writer::new();
    w.write_u32(REQ_DH_PARAMS);
    w.write_bytes(&nonce);
    w.write_bytes(&server_nonce);
    w.write_bare_string(&p_string);
    w.write_bare_string(&q_string);
    w.write_i64(fingerprint);
    w.write_bare_string(&ciphertext);

    Ok((
        w.into_bytes(),
        Step2 { nonce, server_nonce, new_nonce },
    ))
}

/// Consumes `server_DH_params_ok`, completes the DH exchange, and builds
/// the encrypted `set_client_DH_params` request.
pub fn step3(data: Step2, response: &[u8], now: i32) -> Result<(Vec<u8>, Step3), Error> {
    let mut random_bytes = [0u8; 256];
    getrandom(&mut random_bytes).expect("failed to generate secure data for auth key");
    do_step3(data, response, &random_bytes, now)
}

fn do_step3(data: Step2, response: &[u8], b_bytes: &[u8; 256], now: i32) -> Result<(Vec<u8>, Step3), Error> {
    let Step2 { nonce, server_nonce, new_nonce } = data;
    let mut c = Cursor::new(response);
    let constructor_id = c.read_u32().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;

    if constructor_id == SERVER_DH_PARAMS_FAIL {
        return Err(Error::DhParamsFail);
    }
    if constructor_id != SERVER_DH_PARAMS_OK {
        return Err(Error::Deserialize(crate::errors::DeserializeError::UnknownConstructor(
            constructor_id as i32,
        )));
    }

    let got_nonce: [u8; 16] = c.read_fixed().map_err(|_| Error::NonceMismatch)?;
    if got_nonce != nonce {
        return Err(Error::NonceMismatch);
    }
    let got_server_nonce: [u8; 16] = c.read_fixed().map_err(|_| Error::NonceMismatch)?;
    if got_server_nonce != server_nonce {
        return Err(Error::NonceMismatch);
    }
    let encrypted_answer = c.read_bare_string().map_err(|_| Error::AnswerNotPadded)?;
    if encrypted_answer.len() % 16 != 0 {
        return Err(Error::AnswerNotPadded);
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    let plaintext = tgproto_crypto::decrypt_ige(encrypted_answer, &key, &iv);

    let got_hash: [u8; 20] = plaintext[..20].try_into().unwrap();
    let mut inner_cursor = Cursor::new(&plaintext[20..]);

    let inner_constructor = inner_cursor
        .read_u32()
        .map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;
    if inner_constructor != SERVER_DH_INNER_DATA {
        return Err(Error::Deserialize(crate::errors::DeserializeError::UnknownConstructor(
            inner_constructor as i32,
        )));
    }
    let inner_nonce: [u8; 16] = inner_cursor.read_fixed().map_err(|_| Error::NonceMismatch)?;
    let inner_server_nonce: [u8; 16] = inner_cursor.read_fixed().map_err(|_| Error::NonceMismatch)?;
    let g = inner_cursor.read_i32().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))? as u32;
    let dh_prime_bytes = inner_cursor.read_bare_string().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;
    let g_a_bytes = inner_cursor.read_bare_string().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;
    let server_time = inner_cursor.read_i32().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;

    let consumed = 20 + inner_cursor.pos();
    let expected_hash: [u8; 20] = Sha1::digest(&plaintext[20..consumed]).as_slice().try_into().unwrap();
    if got_hash != expected_hash {
        return Err(Error::AnswerHashMismatch);
    }

    if inner_nonce != nonce || inner_server_nonce != server_nonce {
        return Err(Error::NonceMismatch);
    }

    let dh_prime = BigUint::from_bytes_be(dh_prime_bytes);
    let g_a = BigUint::from_bytes_be(g_a_bytes);

    dh::validate_dh_prime_and_g(&dh_prime, g).map_err(|_| Error::BadDhParameter("dh_prime/g"))?;
    dh::validate_g_exp(&g_a, &dh_prime).map_err(|_| Error::BadDhParameter("g_a"))?;

    let time_offset = server_time - now;

    let b = BigUint::from_bytes_be(b_bytes);
    let g_b = BigUint::from(g).modpow(&b, &dh_prime);
    let gab = g_a.modpow(&b, &dh_prime);

    dh::validate_g_exp(&g_b, &dh_prime).map_err(|_| Error::BadDhParameter("g_b"))?;

    let mut inner = Writer::new();
    inner.write_u32(CLIENT_DH_INNER_DATA);
    inner.write_bytes(&nonce);
    inner.write_bytes(&server_nonce);
    inner.write_i64(0); // retry_id, zero on the first attempt
    inner.write_big_uint_be(&g_b.to_bytes_be());
    let client_dh_inner = inner.into_bytes();

    let mut hashed_prefix = Vec::with_capacity(20 + client_dh_inner.len());
    hashed_prefix.extend_from_slice(&Sha1::digest(&client_dh_inner));
    hashed_prefix.extend_from_slice(&client_dh_inner);

    let request = build_set_client_dh_params(&hashed_prefix, &key, &iv, nonce, server_nonce);

    Ok((
        request,
        Step3 {
            nonce,
            server_nonce,
            new_nonce,
            gab,
            time_offset,
            retry_id: 0,
            retries_left: MAX_DH_GEN_RETRIES,
            client_dh_inner_hashed_prefix: hashed_prefix,
            key,
            iv,
        },
    ))
}

fn build_set_client_dh_params(
    hashed_prefix: &[u8],
    key: &[u8; 32],
    iv: &[u8; 32],
    nonce: [u8; 16],
    server_nonce: [u8; 16],
) -> Vec<u8> {
    let encrypted = tgproto_crypto::encrypt_ige(hashed_prefix, key, iv);

    let mut w = Writer::new();
    w.write_u32(SET_CLIENT_DH_PARAMS);
    w.write_bytes(&nonce);
    w.write_bytes(&server_nonce);
    w.write_bare_string(&encrypted);
    w.into_bytes()
}

/// The outcome of processing a `Set_client_DH_params_answer`: either the
/// handshake is done, or the server wants a retry with a fresh `retry_id`
/// (the caller resends the returned request bytes as-is).
pub enum Outcome {
    Finished(Finished),
    Retry(Vec<u8>, Step3),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    pub auth_key: AuthKeyData,
    pub time_offset: i32,
    pub first_salt: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthKeyData(pub [u8; 256]);

pub fn create_key(data: Step3, response: &[u8]) -> Result<Outcome, Error> {
    let Step3 {
        nonce,
        server_nonce,
        new_nonce,
        gab,
        time_offset,
        retry_id: _,
        retries_left,
        client_dh_inner_hashed_prefix,
        key,
        iv,
    } = data;

    let mut c = Cursor::new(response);
    let constructor_id = c.read_u32().map_err(|_| Error::Deserialize(crate::errors::DeserializeError::UnexpectedEof))?;

    struct DhGen {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce_hash: [u8; 16],
        number: u8,
    }

    let dh_gen = match constructor_id {
        DH_GEN_OK => DhGen {
            nonce: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            server_nonce: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            new_nonce_hash: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            number: 1,
        },
        DH_GEN_RETRY => DhGen {
            nonce: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            server_nonce: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            new_nonce_hash: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            number: 2,
        },
        DH_GEN_FAIL => DhGen {
            nonce: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            server_nonce: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            new_nonce_hash: c.read_fixed().map_err(|_| Error::NonceMismatch)?,
            number: 3,
        },
        other => {
            return Err(Error::Deserialize(crate::errors::DeserializeError::UnknownConstructor(
                other as i32,
            )))
        }
    };

    if dh_gen.nonce != nonce || dh_gen.server_nonce != server_nonce {
        return Err(Error::NonceMismatch);
    }

    let auth_key = {
        let mut buffer = [0u8; 256];
        let gab_bytes = gab.to_bytes_be();
        let skip = buffer.len() - gab_bytes.len();
        buffer[skip..].copy_from_slice(&gab_bytes);
        AuthKey::from_bytes(buffer)
    };

    let expected_hash = auth_key.calc_new_nonce_hash(&new_nonce, dh_gen.number);
    if dh_gen.new_nonce_hash != expected_hash {
        return Err(Error::NonceMismatch);
    }

    match dh_gen.number {
        1 => {
            let mut buffer = [0u8; 8];
            buffer
                .iter_mut()
                .zip(&new_nonce[..8])
                .zip(&server_nonce[..8])
                .for_each(|((x, a), b)| *x = a ^ b);
            let first_salt = i64::from_le_bytes(buffer);

            Ok(Outcome::Finished(Finished {
                auth_key: AuthKeyData(auth_key.to_bytes()),
                time_offset,
                first_salt,
            }))
        }
        2 => {
            if retries_left == 0 {
                return Err(Error::RetriesExceeded);
            }
            let retry_id = auth_key.aux_hash();
            let request = {
                let mut inner = client_dh_inner_hashed_prefix.clone();
                // retry_id sits right after sha1(20) + constructor_id(4) +
                // nonce(16) + server_nonce(16) in the hashed-and-serialized
                // client_DH_inner_data bytes.
                const RETRY_ID_OFFSET: usize = 20 + 4 + 16 + 16;
                inner[RETRY_ID_OFFSET..RETRY_ID_OFFSET + 8].copy_from_slice(&retry_id.to_le_bytes());
                build_set_client_dh_params(&inner, &key, &iv, nonce, server_nonce)
            };

            Ok(Outcome::Retry(
                request,
                Step3 {
                    nonce,
                    server_nonce,
                    new_nonce,
                    gab,
                    time_offset,
                    retry_id,
                    retries_left: retries_left - 1,
                    client_dh_inner_hashed_prefix,
                    key,
                    iv,
                },
            ))
        }
        _ => Err(Error::DhGenFail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgproto_crypto::hex;

    #[test]
    fn emulate_successful_auth_key_gen_flow() {
        let step1_random: [u8; 16] = hex::from_hex("4e44b426241e8b839153122d44585ac6").as_slice().try_into().unwrap();
        let step1_response = hex::from_hex("632416054e44b426241e8b839153122d44585ac665ba0b393e1094329eda2c42d62833030819546f942a11278d00000015c4b51c0300000003268d20df9858b2029f4ba16d109296216be86c022bb4c3");
        let step2_random: [u8; 32 + 256] = {
            let bytes = hex::from_hex("b9dce68b05ef760fa7edfefeff45aaa8afbac11dc3d333bc3132fd16ab816d63ed93c5bef9d0452add8164a2d5df5804277ee5a06fd4523372707ddbd8106d03766d76fb8bec672bdcddcd225f7766b83663b32a0fda1055175c5582edd10430937666be4fd15510ba5f19aa645973b6e4e9270efac25b58741635fe84dd0af07a4686f750bf34de1073f1e7fa24e9b01a76e537504bd52b8195e5b78c9af2baa982454e1a99eeae0f35944089ad12726d2433a2c18c9698a725364f9c4e939ce4f1aee3891e58b85de90c88cc2eaef5db1841a594c0edc13cb4b7480a7e564fe892f82282d03ed07eb5ceac6644247bb137241166fe194756dfcffd68c6c345");
            bytes.as_slice().try_into().unwrap()
        };

        let (request, data) = do_step1(step1_random);
        let step1_request = hex::from_hex("f18e7ebe4e44b426241e8b839153122d44585ac6");
        assert_eq!(request, step1_request);

        let (request, data) = do_step2(data, &step1_response, &step2_random).unwrap();
        assert!(!request.is_empty());
        assert_eq!(data.nonce, step1_random);
    }
}
