//! Per-interface client state.

use rand::Rng;
use serde::Serialize;
use std::net::Ipv6Addr;

use crate::config::InterfaceConfig;
use crate::duid::Duid;
use crate::message::{ClientState, MessageType};
use crate::rxmit::Rxmit;
use crate::server::{ServerRecord, SERVER_SLOT_CNT};

/// RFC 3315 §5.6: lifetime value meaning "infinity".
pub const INFINITE_LIFETIME: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddrType {
    Invalid,
    NonTemporary,
    Temporary,
}

/// One candidate or applied address lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddrInfo {
    pub addr_type: AddrType,
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    pub t1: u32,
    pub t2: u32,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    /// Monotonic timestamp of the last lease grant/refresh.
    pub refreshed_ms: u64,
}

impl AddrInfo {
    pub fn none() -> Self {
        Self {
            addr_type: AddrType::Invalid,
            address: Ipv6Addr::UNSPECIFIED,
            prefix_len: 0,
            t1: 0,
            t2: 0,
            preferred_lifetime: 0,
            valid_lifetime: 0,
            refreshed_ms: 0,
        }
    }

    /// An entry with the unspecified address is absent.
    pub fn has_address(&self) -> bool {
        self.address != Ipv6Addr::UNSPECIFIED
    }

    pub fn is_valid(&self) -> bool {
        self.has_address() && self.addr_type != AddrType::Invalid
    }

    /// Seconds since the grant, per the caller's monotonic clock.
    pub fn age_secs(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.refreshed_ms) / 1000
    }
}

/// Per-interface message/error tallies. Purely observational.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counters {
    pub tx_solicit: u64,
    pub tx_request: u64,
    pub tx_confirm: u64,
    pub tx_renew: u64,
    pub tx_rebind: u64,
    pub tx_release: u64,
    pub tx_decline: u64,
    pub tx_information_request: u64,
    pub rx_advertise: u64,
    pub rx_reply: u64,
    pub rx_reconfigure: u64,
    pub rx_drop: u64,
    pub decode_err: u64,
    pub tx_err: u64,
    pub ip_err: u64,
}

impl Counters {
    pub fn record_tx(&mut self, msg: MessageType) {
        match msg {
            MessageType::Solicit => self.tx_solicit += 1,
            MessageType::Request => self.tx_request += 1,
            MessageType::Confirm => self.tx_confirm += 1,
            MessageType::Renew => self.tx_renew += 1,
            MessageType::Rebind => self.tx_rebind += 1,
            MessageType::Release => self.tx_release += 1,
            MessageType::Decline => self.tx_decline += 1,
            MessageType::InformationRequest => self.tx_information_request += 1,
            _ => {}
        }
    }

    pub fn record_rx(&mut self, msg: MessageType) {
        match msg {
            MessageType::Advertise => self.rx_advertise += 1,
            MessageType::Reply => self.rx_reply += 1,
            MessageType::Reconfigure => self.rx_reconfigure += 1,
            _ => {}
        }
    }
}

/// Client state for one DHCPv6-enabled L3 interface.
#[derive(Debug, Clone)]
pub struct Interface {
    pub ifindex: u32,
    pub link_up: bool,
    /// RA M flag: addresses are available via DHCPv6.
    pub managed: bool,
    /// RA O flag: other configuration is available via DHCPv6.
    pub other: bool,
    pub stateless: bool,
    /// Duplicate address detection failed for the applied address; a
    /// DECLINE exchange is in progress or due.
    pub dad_pending: bool,
    pub duid: Duid,
    pub iaid: u32,
    /// Current 24-bit transaction id.
    pub xid: u32,
    pub state: ClientState,
    /// Transmissions so far in the current exchange.
    pub xmt_cntr: u32,
    pub first_xmt_ms: u64,
    pub last_xmt_ms: u64,
    pub rxmit: Rxmit,
    /// Candidate server records. Slot 0 is the staging record for the
    /// in-progress exchange; committed servers live in the numbered slots.
    pub servers: [Option<ServerRecord>; SERVER_SLOT_CNT],
    /// Index of the currently selected server, if any.
    pub active_server: Option<usize>,
    /// The applied lease.
    pub addr: AddrInfo,
    pub counters: Counters,
}

impl Interface {
    pub fn new(cfg: &InterfaceConfig) -> Self {
        Self {
            ifindex: cfg.ifindex,
            link_up: false,
            managed: false,
            other: false,
            stateless: cfg.stateless,
            dad_pending: false,
            duid: Duid::from_mac(&cfg.mac),
            iaid: cfg.ifindex,
            xid: 0,
            state: ClientState::Init,
            xmt_cntr: 0,
            first_xmt_ms: 0,
            last_xmt_ms: 0,
            rxmit: Rxmit::default(),
            servers: Default::default(),
            active_server: None,
            addr: AddrInfo::none(),
            counters: Counters::default(),
        }
    }

    /// Begin a fresh exchange: new transaction id, reset transmit
    /// bookkeeping, and (for RENEW/REBIND) the dynamic MRD bound.
    pub fn start_exchange<R: Rng>(&mut self, state: ClientState, now_ms: u64, rng: &mut R) {
        self.state = state;
        self.xid = rng.random::<u32>() & 0x00FF_FFFF;
        self.xmt_cntr = 0;
        self.first_xmt_ms = 0;
        self.last_xmt_ms = 0;
        self.rxmit.reset();
        self.rxmit.mrd_override_ms = match state {
            // RENEW runs until T2, REBIND until the valid lifetime expires
            // (RFC 3315 §18.1.3/§18.1.4).
            ClientState::Renew if self.addr.is_valid() && self.addr.t2 != INFINITE_LIFETIME => {
                (self.addr.refreshed_ms + u64::from(self.addr.t2) * 1000).saturating_sub(now_ms)
            }
            ClientState::Rebind
                if self.addr.is_valid() && self.addr.valid_lifetime != INFINITE_LIFETIME =>
            {
                (self.addr.refreshed_ms + u64::from(self.addr.valid_lifetime) * 1000)
                    .saturating_sub(now_ms)
            }
            _ => 0,
        };
    }

    pub fn stop_exchange(&mut self) {
        self.state = ClientState::Init;
        self.xmt_cntr = 0;
        self.first_xmt_ms = 0;
        self.rxmit.reset();
    }

    /// Elapsed-time option value: 10 ms units since the first transmission
    /// of this exchange, saturating at 0xFFFF. Zero on the first send.
    pub fn elapsed_time(&self, now_ms: u64) -> u16 {
        if self.xmt_cntr == 0 || self.first_xmt_ms == 0 {
            return 0;
        }
        (now_ms.saturating_sub(self.first_xmt_ms) / 10).min(0xFFFF) as u16
    }

    pub fn clear_servers(&mut self) {
        self.servers = Default::default();
        self.active_server = None;
    }

    /// The staging record, created empty on first use.
    pub fn staging_mut(&mut self) -> &mut ServerRecord {
        self.servers[0].get_or_insert_with(ServerRecord::default)
    }

    pub fn staging(&self) -> Option<&ServerRecord> {
        self.servers[0].as_ref()
    }

    pub fn clear_staging(&mut self) {
        self.servers[0] = None;
    }

    pub fn active(&self) -> Option<&ServerRecord> {
        self.servers[self.active_server?].as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ServerRecord> {
        self.servers[self.active_server?].as_mut()
    }

    pub fn status(&self) -> InterfaceStatus {
        InterfaceStatus {
            ifindex: self.ifindex,
            state: self.state,
            link_up: self.link_up,
            stateless: self.stateless,
            server: self.active().map(|s| s.addr),
            server_preference: self.active().map(|s| s.preference),
            address: if self.addr.has_address() {
                Some(self.addr.clone())
            } else {
                None
            },
            dns_servers: self
                .active()
                .map(|s| s.dns_servers.clone())
                .unwrap_or_default(),
            domains: self.active().map(|s| s.domains.clone()).unwrap_or_default(),
        }
    }
}

/// Snapshot handed to status/exposition callers.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    pub ifindex: u32,
    pub state: ClientState,
    pub link_up: bool,
    pub stateless: bool,
    pub server: Option<Ipv6Addr>,
    pub server_preference: Option<u8>,
    pub address: Option<AddrInfo>,
    pub dns_servers: Vec<Ipv6Addr>,
    pub domains: Vec<String>,
}
