//! Known Telegram data center addresses, and the per-DC state a
//! controller tracks once it has authorized against one.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// Production DC addresses, `(dc_id, ipv4)`.
pub const PROD: &[(i32, &str)] = &[
    (1, "149.154.175.53"),
    (2, "149.154.167.51"),
    (3, "149.154.175.100"),
    (4, "149.154.167.91"),
    (5, "91.108.56.130"),
];

const TEST: &[(i32, &str)] = &[
    (1, "149.154.175.10"),
    (2, "149.154.167.40"),
    (3, "149.154.175.117"),
];

/// Looks up the production or test-mode address for a DC id, at the
/// default (non-media) port.
pub fn address_for(dc_id: i32, test_mode: bool) -> Option<SocketAddr> {
    let table = if test_mode { TEST } else { PROD };
    let port = if test_mode { 80 } else { 443 };
    table
        .iter()
        .find(|&&(id, _)| id == dc_id)
        .and_then(|&(_, ip)| ip.parse::<IpAddr>().ok())
        .map(|ip| SocketAddr::new(ip, port))
}

/// Everything a controller keeps per data center it has a live or
/// previously-negotiated connection to: the authorization key, its
/// temporary PFS counterpart if bound, and the session bookkeeping that
/// survives a reconnect.
pub struct DcState {
    pub dc_id: i32,
    pub auth_key: Option<tgproto_crypto::AuthKey>,
    pub temp_auth_key: Option<tgproto_crypto::AuthKey>,
    /// Unix time (seconds) the bound temporary key expires and must be
    /// regenerated and re-bound.
    pub temp_key_expires_at: Option<i64>,
}

impl DcState {
    pub fn new(dc_id: i32) -> Self {
        Self {
            dc_id,
            auth_key: None,
            temp_auth_key: None,
            temp_key_expires_at: None,
        }
    }
}

/// Tracks state for every DC a controller has touched, keyed by id.
#[derive(Default)]
pub struct DcRegistry {
    dcs: HashMap<i32, DcState>,
}

impl DcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, dc_id: i32) -> &mut DcState {
        self.dcs.entry(dc_id).or_insert_with(|| DcState::new(dc_id))
    }

    pub fn get(&self, dc_id: i32) -> Option<&DcState> {
        self.dcs.get(&dc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_dc_resolves_prod_address() {
        let addr = address_for(2, false).unwrap();
        assert_eq!(addr.port(), 443);
    }

    #[test]
    fn test_mode_uses_port_80() {
        let addr = address_for(2, true).unwrap();
        assert_eq!(addr.port(), 80);
    }

    #[test]
    fn unknown_dc_is_none() {
        assert!(address_for(999, false).is_none());
    }

    #[test]
    fn registry_creates_state_on_first_access() {
        let mut registry = DcRegistry::new();
        assert!(registry.get(2).is_none());
        registry.get_or_insert(2);
        assert!(registry.get(2).is_some());
    }
}
