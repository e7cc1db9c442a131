//! Validation of the Diffie-Hellman parameters sent by the server in
//! `server_DH_inner_data`, per
//! <https://core.telegram.org/mtproto/security_guidelines#checking-dh-parameters>.

use crate::Error;
use num_bigint::BigUint;
use num_traits::{One, Zero};

const MILLER_RABIN_ROUNDS: usize = 40;

/// `g` must be one of these small values.
const ALLOWED_G: [u32; 6] = [2, 3, 4, 5, 6, 7];

/// Known-good 2048-bit safe primes Telegram's production servers use for
/// `dh_prime`, as hex strings (checking against this list lets us skip an
/// expensive Miller-Rabin run in the common case).
const KNOWN_SAFE_PRIMES_HEX: [&str; 1] = [
    "C71CAEB9C6B1C9048E6C522F70F13F73980D40238E3E21C14934D037563D930F48198A0AA7C14058229493D22530F4DBFA336F6E0AC925139543AED44CCE7C3720FD51F69458705AC68CD4FE6B6B13ABDC9746512969328454F18FAF8C595F642477FE96BB2A941D5BCD1D4AC8CC49880708FA9B378E3C4F3A9060BEE67CF9A4A4A695811051907E162753B56B0F6B410DBA74D8A84B2A14B3144E0EF1284754FD17ED950D5965B4B9DD46582DB1178D169C6BC465B0D6FF9CA3928FEF5B9AE4E418FC15E83EBEA0F87FA9FF5EED70050DED2849F47BF959D956850CE929851F0D8115F635B105EE2E4E15D04B2454BF6F4FADF034B10403119CD8E3B92FCC5B",
];

pub fn known_safe_primes() -> impl Iterator<Item = BigUint> {
    KNOWN_SAFE_PRIMES_HEX
        .iter()
        .map(|hex| BigUint::parse_bytes(hex.as_bytes(), 16).expect("built-in prime is valid hex"))
}

fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if (n % &two).is_zero() {
        return false;
    }

    let n_minus_one = n - 1u32;
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while (&d % &two).is_zero() {
        d /= &two;
        r += 1;
    }

    // Deterministic, fixed witness sequence: since we only ever validate
    // server-supplied numbers (never secrets we must hide), using a fixed
    // base sequence instead of randomized witnesses keeps the check
    // reproducible in tests while still exceeding the required round count.
    let bases = (2u32..).take(rounds);
    'witness: for a in bases {
        let a = BigUint::from(a);
        if a >= *n {
            continue;
        }
        let mut x = a.modpow(&d, n);
        if x == BigUint::one() || x == n_minus_one {
            continue;
        }
        for _ in 0..r - 1 {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Validates `dh_prime` and `g` per the security guidelines: either
/// `dh_prime` is one of the known whitelisted safe primes, or it must pass
/// Miller-Rabin with `(dh_prime - 1) / 2` also prime, and `g` must be one
/// of the small allowed generators.
pub fn validate_dh_prime_and_g(dh_prime: &BigUint, g: u32) -> Result<(), Error> {
    if !ALLOWED_G.contains(&g) {
        return Err(Error::CryptoParam("g not in allowed generator set"));
    }

    if known_safe_primes().any(|known| known == *dh_prime) {
        return Ok(());
    }

    if dh_prime.bits() != 2048 {
        return Err(Error::CryptoParam("dh_prime is not 2048 bits"));
    }
    if !is_probable_prime(dh_prime, MILLER_RABIN_ROUNDS) {
        return Err(Error::CryptoParam("dh_prime failed primality check"));
    }
    let half = (dh_prime - 1u32) / 2u32;
    if !is_probable_prime(&half, MILLER_RABIN_ROUNDS) {
        return Err(Error::CryptoParam("(dh_prime - 1) / 2 failed primality check"));
    }

    Ok(())
}

/// Validates that a DH public value (`g_a` received from the server, or
/// the locally generated `g_b`) lies in the safe range
/// `1 < x < dh_prime - 1` and `2^2047 <= x <= dh_prime - 2^2047`.
pub fn validate_g_exp(x: &BigUint, dh_prime: &BigUint) -> Result<(), Error> {
    let one = BigUint::one();
    let lower_bound = BigUint::one() << 2047u32;
    let upper_bound = dh_prime - &lower_bound;

    if *x <= one || *x >= dh_prime - &one {
        return Err(Error::CryptoParam("DH exponential out of (1, dh_prime - 1) range"));
    }
    if *x < lower_bound || *x > upper_bound {
        return Err(Error::CryptoParam(
            "DH exponential out of the required safety margin",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_safe_prime_and_valid_g_pass() {
        let prime = known_safe_primes().next().unwrap();
        assert!(validate_dh_prime_and_g(&prime, 3).is_ok());
    }

    #[test]
    fn disallowed_g_is_rejected() {
        let prime = known_safe_primes().next().unwrap();
        assert!(validate_dh_prime_and_g(&prime, 8).is_err());
    }

    #[test]
    fn small_composite_is_rejected() {
        let not_prime = BigUint::from(15u32);
        assert!(!is_probable_prime(&not_prime, 20));
    }

    #[test]
    fn small_prime_is_accepted() {
        let prime = BigUint::from(1000003u32);
        assert!(is_probable_prime(&prime, 20));
    }

    #[test]
    fn g_exp_out_of_range_is_rejected() {
        let prime = known_safe_primes().next().unwrap();
        assert!(validate_g_exp(&BigUint::from(1u32), &prime).is_err());
        assert!(validate_g_exp(&(BigUint::from(2u32)), &prime).is_err());
    }
}
