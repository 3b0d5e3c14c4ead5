use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use tokio::sync::broadcast;

/// Event bus for inter-service communication.
pub struct EventBus {
    /// DNS configuration may have changed (dhcp6 → dns proxy reload)
    pub dns_refresh: broadcast::Sender<DnsRefreshEvent>,
    /// Lease installed/removed on an interface (dhcp6 → status/exposition)
    pub lease: broadcast::Sender<LeaseEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            dns_refresh: broadcast::channel(16).0,
            lease: broadcast::channel(64).0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort notification that DNS server information changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRefreshEvent {
    pub ifindex: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseEvent {
    pub ifindex: u32,
    pub address: Ipv6Addr,
    pub installed: bool,
}
