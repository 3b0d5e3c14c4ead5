use serde::{Deserialize, Serialize};

use crate::options::{OPT_DNS_SERVERS, OPT_DOMAIN_LIST};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dhcp6Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on concurrently managed interfaces. Fixed at startup.
    #[serde(default = "default_max_interfaces")]
    pub max_interfaces: usize,
    /// Offer rapid commit on SOLICIT (RFC 3315 §17.1.1).
    #[serde(default)]
    pub rapid_commit: bool,
    /// Advertise willingness to accept RECONFIGURE messages.
    #[serde(default)]
    pub reconfigure_accept: bool,
    /// Option codes placed in the Option Request option.
    #[serde(default = "default_request_options")]
    pub request_options: Vec<u16>,
}

fn default_true() -> bool {
    true
}

fn default_max_interfaces() -> usize {
    64
}

fn default_request_options() -> Vec<u16> {
    vec![OPT_DNS_SERVERS, OPT_DOMAIN_LIST]
}

impl Default for Dhcp6Config {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

/// Parameters for creating one managed interface.
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub ifindex: u32,
    /// Link-layer address used to derive the client DUID.
    pub mac: [u8; 6],
    /// Start in stateless mode (INFORMATION-REQUEST only).
    pub stateless: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Dhcp6Config::default();
        assert!(config.enabled);
        assert_eq!(config.max_interfaces, 64);
        assert!(!config.rapid_commit);
        assert_eq!(config.request_options, vec![OPT_DNS_SERVERS, OPT_DOMAIN_LIST]);
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{
            "max_interfaces": 8,
            "rapid_commit": true
        }"#;
        let config: Dhcp6Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_interfaces, 8);
        assert!(config.rapid_commit);
        assert!(!config.reconfigure_accept);
    }
}
