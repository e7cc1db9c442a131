//! Process-wide, immutable-after-construction bootstrap data: the client
//! identity used to initialize new connections, and the set of known DC
//! endpoints to connect to before any server-provided configuration has
//! been retrieved.

use std::net::SocketAddr;

const DEFAULT_LOCALE: &str = "en";

/// One data center endpoint known before contacting Telegram, keyed by its
/// `dc_id`.
#[derive(Clone, Debug)]
pub struct DcEndpoint {
    pub dc_id: i32,
    pub address: SocketAddr,
}

/// Connection parameters used to bootstrap the controller.
///
/// Some fields are hidden to encourage using the Struct Update Syntax with a
/// default.
pub struct Configuration {
    /// Developer's application identifier.
    pub api_id: i32,
    /// "Device model" used when announcing the client to Telegram.
    pub device_model: String,
    /// "Operating system version" used when announcing the client.
    pub system_version: String,
    /// "Application version" used when announcing the client.
    pub app_version: String,
    /// Code for the language used on the device's OS, ISO 639-1.
    pub system_lang_code: String,
    /// Either an ISO 639-1 language code or a language pack name.
    pub lang_code: String,
    /// The bootstrap list of known DC endpoints, used before any server-
    /// provided configuration narrows this down.
    pub known_dcs: Vec<DcEndpoint>,
    #[doc(hidden)]
    pub __non_exhaustive: (),
}

impl Configuration {
    pub fn new(api_id: i32) -> Self {
        Self {
            api_id,
            ..Default::default()
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        let info = os_info::get();

        let mut system_lang_code = String::new();
        let mut lang_code = String::new();

        #[cfg(not(target_os = "android"))]
        {
            system_lang_code.push_str(&locate_locale::system());
            lang_code.push_str(&locate_locale::user());
        }
        if system_lang_code.is_empty() {
            system_lang_code.push_str(DEFAULT_LOCALE);
        }
        if lang_code.is_empty() {
            lang_code.push_str(DEFAULT_LOCALE);
        }

        Self {
            api_id: 0,
            device_model: format!("{} {}", info.os_type(), info.bitness()),
            system_version: info.version().to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            system_lang_code,
            lang_code,
            known_dcs: tgproto_mtproto::dc::PROD
                .iter()
                .map(|&(dc_id, ip)| DcEndpoint {
                    dc_id,
                    address: std::net::SocketAddr::new(ip.parse().unwrap(), 443),
                })
                .collect(),
            __non_exhaustive: (),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_seeds_known_dcs() {
        let config = Configuration::default();
        assert!(!config.known_dcs.is_empty());
        assert!(config.known_dcs.iter().any(|dc| dc.dc_id == 2));
    }
}
