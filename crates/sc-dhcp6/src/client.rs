//! The DHCPv6 client message state machine (RFC 3315 §17/§18).
//!
//! Two external call paths drive the engine: the 1 Hz `tick` and the
//! receive entry points. Both do their read-modify-write under the
//! interface store's lock and hand back side effects (transmits, IP-stack
//! address work, DNS-refresh signals) that run after the lock is released.

use std::net::Ipv6Addr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use sc_common::events::{DnsRefreshEvent, EventBus, LeaseEvent};

use crate::config::{Dhcp6Config, InterfaceConfig};
use crate::interface::{Counters, Interface, InterfaceStatus};
use crate::message::{self, ClientState, MessageType};
use crate::options::{
    RxOptions, TxOptions, STATUS_NO_BINDING, STATUS_NOT_ON_LINK, STATUS_SUCCESS,
    STATUS_USE_MULTICAST,
};
use crate::server::{ApplyAction, ServerRecord};
use crate::store::{InterfaceStore, StoreError};

/// Installs/removes negotiated leases in the host network stack. Called
/// outside the store lock and retried across exchanges, so implementations
/// must tolerate re-adding an installed address.
pub trait IpStack: Send + Sync {
    fn add_address(
        &self,
        ifindex: u32,
        address: Ipv6Addr,
        prefix_len: u8,
        valid_lifetime: u32,
    ) -> Result<()>;
    fn del_address(&self, ifindex: u32, address: Ipv6Addr, prefix_len: u8) -> Result<()>;
}

/// Sends one DHCPv6 datagram. `dest == None` means the
/// All_DHCP_Relay_Agents_and_Servers multicast group on that interface.
pub trait Transport: Send + Sync {
    fn transmit(
        &self,
        ifindex: u32,
        dest: Option<Ipv6Addr>,
        msg: MessageType,
        xid: u32,
        payload: &[u8],
    ) -> Result<()>;
}

/// Work produced under the store lock, executed after it is released.
enum SideEffect {
    Transmit {
        ifindex: u32,
        dest: Option<Ipv6Addr>,
        msg: MessageType,
        xid: u32,
        payload: Vec<u8>,
    },
    AddAddress {
        ifindex: u32,
        address: Ipv6Addr,
        prefix_len: u8,
        valid_lifetime: u32,
    },
    DelAddress {
        ifindex: u32,
        address: Ipv6Addr,
        prefix_len: u8,
    },
    DnsRefresh {
        ifindex: u32,
    },
}

pub struct Dhcp6Client {
    config: Dhcp6Config,
    store: InterfaceStore,
    ip: Arc<dyn IpStack>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
}

impl Dhcp6Client {
    pub fn new(
        config: Dhcp6Config,
        ip: Arc<dyn IpStack>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
    ) -> Self {
        let store = InterfaceStore::new(config.max_interfaces);
        Self {
            config,
            store,
            ip,
            transport,
            events,
        }
    }

    // ── Interface management ────────────────────────────────────────────

    pub fn interface_add(&self, cfg: &InterfaceConfig) -> Result<(), StoreError> {
        self.store.create(cfg)?;
        info!(
            "dhcp6: interface {} added ({})",
            cfg.ifindex,
            if cfg.stateless { "stateless" } else { "stateful" }
        );
        Ok(())
    }

    /// Remove an interface. A held lease gets exactly one RELEASE
    /// transmission and is withdrawn from the IP stack first.
    pub fn interface_del(&self, ifindex: u32, now_ms: u64) -> Result<(), StoreError> {
        let Some(intf) = self.store.get(ifindex) else {
            return Err(StoreError::NotFound(ifindex));
        };

        let mut effects = Vec::new();
        if intf.addr.has_address() {
            let mut parting = intf.clone();
            parting.start_exchange(ClientState::Release, now_ms, &mut rand::rng());
            let payload = self.build_payload(&parting, MessageType::Release, now_ms);
            effects.push(SideEffect::Transmit {
                ifindex,
                dest: release_dest(&parting),
                msg: MessageType::Release,
                xid: parting.xid,
                payload,
            });
            effects.push(SideEffect::DelAddress {
                ifindex,
                address: intf.addr.address,
                prefix_len: intf.addr.prefix_len,
            });
        }

        self.store.delete(ifindex);
        info!("dhcp6: interface {} removed", ifindex);
        self.run_effects(effects);
        Ok(())
    }

    pub fn status(&self, ifindex: u32) -> Option<InterfaceStatus> {
        Some(self.store.get(ifindex)?.status())
    }

    pub fn counters(&self, ifindex: u32) -> Option<Counters> {
        Some(self.store.get(ifindex)?.counters)
    }

    pub fn clear_counters(&self, ifindex: u32) {
        self.store.update(ifindex, |intf| {
            intf.counters = Counters::default();
        });
    }

    pub fn interfaces(&self) -> Vec<u32> {
        self.store.indexes()
    }

    // ── External events ─────────────────────────────────────────────────

    /// Link state change. Link up with a held address re-validates it via
    /// CONFIRM (RFC 3315 §18.1.2); without one, negotiation starts over.
    pub fn link_change(&self, ifindex: u32, up: bool, now_ms: u64) {
        let effects = self.store.update(ifindex, |intf| {
            intf.link_up = up;
            if !up {
                debug!("dhcp6: if {} link down", ifindex);
                intf.stop_exchange();
                return Vec::new();
            }
            if intf.addr.is_valid() {
                self.begin(intf, ClientState::Confirm, now_ms);
            } else if intf.active_server.is_none() {
                self.begin(intf, initial_state(intf), now_ms);
            }
            Vec::new()
        });
        self.run_effects(effects.unwrap_or_default());
    }

    /// RA M/O flag change. A mode flip drops the lease and renegotiates.
    pub fn ra_flags(&self, ifindex: u32, managed: bool, other: bool, now_ms: u64) {
        let effects = self.store.update(ifindex, |intf| {
            intf.managed = managed;
            intf.other = other;
            let stateless = !managed && other;
            if stateless == intf.stateless {
                return Vec::new();
            }
            info!(
                "dhcp6: if {} mode change -> {}",
                ifindex,
                if stateless { "stateless" } else { "stateful" }
            );
            intf.stateless = stateless;
            let mut fx = Vec::new();
            self.teardown_lease(intf, &mut fx);
            intf.clear_servers();
            if intf.link_up {
                self.begin(intf, initial_state(intf), now_ms);
            } else {
                intf.stop_exchange();
            }
            fx
        });
        self.run_effects(effects.unwrap_or_default());
    }

    /// Duplicate address detection failed for the applied address: the
    /// lease is withdrawn immediately and DECLINEd to the server.
    pub fn dad_failed(&self, ifindex: u32, address: Ipv6Addr, now_ms: u64) {
        let effects = self.store.update(ifindex, |intf| {
            if !intf.addr.has_address() || intf.addr.address != address {
                return Vec::new();
            }
            warn!("dhcp6: if {} duplicate address {}", ifindex, address);
            let fx = vec![SideEffect::DelAddress {
                ifindex,
                address: intf.addr.address,
                prefix_len: intf.addr.prefix_len,
            }];
            intf.dad_pending = true;
            // intf.addr stays populated until the DECLINE exchange ends;
            // it is the IA the DECLINE carries.
            self.begin(intf, ClientState::Decline, now_ms);
            fx
        });
        self.run_effects(effects.unwrap_or_default());
    }

    /// Restart negotiation, releasing a held lease first.
    pub fn restart(&self, ifindex: u32, now_ms: u64) {
        let effects = self.store.update(ifindex, |intf| {
            let mut fx = Vec::new();
            if intf.addr.has_address() {
                fx.push(SideEffect::DelAddress {
                    ifindex,
                    address: intf.addr.address,
                    prefix_len: intf.addr.prefix_len,
                });
                // The address stays on the interface record for the
                // RELEASE IA; it is cleared when the exchange ends.
                self.begin(intf, ClientState::Release, now_ms);
            } else {
                intf.clear_servers();
                if intf.link_up {
                    self.begin(intf, initial_state(intf), now_ms);
                } else {
                    intf.stop_exchange();
                }
            }
            fx
        });
        self.run_effects(effects.unwrap_or_default());
    }

    // ── Periodic tick ───────────────────────────────────────────────────

    /// Called once per second by the scheduler. Runs the timer transition
    /// logic then the transmit logic for every interface.
    pub fn tick(&self, now_ms: u64) {
        for ifindex in self.store.indexes() {
            let effects = self.store.update(ifindex, |intf| {
                let mut fx = Vec::new();
                self.timer_transition(intf, now_ms, &mut fx);
                self.timer_fire(intf, now_ms, &mut fx);
                fx
            });
            self.run_effects(effects.unwrap_or_default());
        }
    }

    fn timer_transition(&self, intf: &mut Interface, now_ms: u64, fx: &mut Vec<SideEffect>) {
        if !intf.link_up {
            return;
        }

        let deadline_passed =
            intf.rxmit.deadline_ms != 0 && now_ms >= intf.rxmit.deadline_ms && intf.xmt_cntr > 0;
        let exhausted = match intf.state.rxmit_params() {
            Some(params) => {
                deadline_passed
                    && intf
                        .rxmit
                        .exhausted(&params, intf.xmt_cntr, intf.first_xmt_ms, now_ms)
            }
            None => false,
        };

        match intf.state {
            ClientState::Init => {
                if intf.addr.is_valid() {
                    self.check_lease_timers(intf, now_ms);
                } else if intf.active_server.is_none() && !intf.dad_pending {
                    self.begin(intf, initial_state(intf), now_ms);
                }
            }
            ClientState::Solicit => {
                // Advertises collected during the first RT window are acted
                // on when that window closes.
                if deadline_passed && intf.active_server.is_some() {
                    self.begin(intf, ClientState::Request, now_ms);
                }
            }
            ClientState::Request => {
                if exhausted {
                    warn!(
                        "dhcp6: if {} REQUEST exhausted, restarting discovery",
                        intf.ifindex
                    );
                    intf.clear_servers();
                    self.begin(intf, ClientState::Solicit, now_ms);
                } else if deadline_passed && intf.xmt_cntr >= 2 && intf.xmt_cntr % 2 == 0 {
                    // Every second retransmission tries the next-best server.
                    if intf.determine_alternate() {
                        info!(
                            "dhcp6: if {} REQUEST unanswered, trying alternate server",
                            intf.ifindex
                        );
                    }
                }
            }
            ClientState::Renew => {
                if exhausted {
                    // The unresponsive server's offer is stale; drop it
                    // before rebinding to any server.
                    if let Some(rec) = intf.active_mut() {
                        rec.addrs.clear();
                    }
                    self.begin(intf, ClientState::Rebind, now_ms);
                } else {
                    self.check_lease_timers(intf, now_ms);
                }
            }
            ClientState::Rebind => {
                if exhausted {
                    warn!("dhcp6: if {} REBIND exhausted, lease lost", intf.ifindex);
                    self.teardown_lease(intf, fx);
                    intf.clear_servers();
                    self.begin(intf, ClientState::Solicit, now_ms);
                } else {
                    self.check_lease_timers(intf, now_ms);
                }
            }
            ClientState::Confirm => {
                if exhausted {
                    // No answer: keep using the address (RFC 3315 §18.1.2).
                    intf.stop_exchange();
                }
            }
            ClientState::Release => {
                if exhausted {
                    self.finish_release(intf);
                }
            }
            ClientState::Decline => {
                if exhausted {
                    self.finish_decline(intf);
                }
            }
            ClientState::InformationRequest => {}
        }
    }

    /// T1/T2/valid-lifetime expiry checks against the applied lease.
    fn check_lease_timers(&self, intf: &mut Interface, now_ms: u64) {
        use crate::interface::INFINITE_LIFETIME as INF;
        if !intf.addr.is_valid() {
            return;
        }
        let age = intf.addr.age_secs(now_ms);
        let addr = &intf.addr;
        if addr.valid_lifetime != INF && age >= u64::from(addr.valid_lifetime) {
            warn!(
                "dhcp6: if {} lease {} expired",
                intf.ifindex, intf.addr.address
            );
            // The address is already gone as far as the stack is concerned
            // once its valid lifetime ends; just restart discovery.
            intf.addr = crate::interface::AddrInfo::none();
            intf.clear_servers();
            self.begin(intf, ClientState::Solicit, now_ms);
        } else if intf.state == ClientState::Init {
            if addr.t2 != INF && addr.t2 != 0 && age >= u64::from(addr.t2) {
                self.begin(intf, ClientState::Rebind, now_ms);
            } else if addr.t1 != INF && addr.t1 != 0 && age >= u64::from(addr.t1) {
                self.begin(intf, ClientState::Renew, now_ms);
            }
        }
    }

    fn timer_fire(&self, intf: &mut Interface, now_ms: u64, fx: &mut Vec<SideEffect>) {
        if !intf.link_up {
            return;
        }
        let Some(msg) = intf.state.message_type() else {
            return;
        };
        let params = message::rxmit_params(msg);

        if intf.rxmit.deadline_ms == 0 {
            // First transmission of the exchange: arm the initial delay.
            intf.rxmit.arm_initial(&params, now_ms, &mut rand::rng());
            return;
        }
        if now_ms < intf.rxmit.deadline_ms {
            return;
        }

        let payload = self.build_payload(intf, msg, now_ms);
        let dest = if unicast_allowed(msg) {
            intf.active().and_then(|rec| rec.unicast)
        } else {
            None
        };

        intf.xmt_cntr += 1;
        if intf.first_xmt_ms == 0 {
            intf.first_xmt_ms = now_ms;
        }
        intf.last_xmt_ms = now_ms;
        intf.counters.record_tx(msg);
        intf.rxmit
            .compute_next(&params, intf.xmt_cntr, now_ms, &mut rand::rng());

        debug!(
            "dhcp6: if {} tx {} #{} xid {:06x}",
            intf.ifindex, msg, intf.xmt_cntr, intf.xid
        );
        fx.push(SideEffect::Transmit {
            ifindex: intf.ifindex,
            dest,
            msg,
            xid: intf.xid,
            payload,
        });
    }

    fn build_payload(&self, intf: &Interface, msg: MessageType, now_ms: u64) -> Vec<u8> {
        let mut tx = TxOptions::new();
        tx.client_id(&intf.duid);
        tx.elapsed_time(intf.elapsed_time(now_ms));

        let server_duid = intf.active().and_then(|rec| rec.duid.clone());
        match msg {
            MessageType::Solicit => {
                tx.oro(&self.config.request_options);
                if self.config.rapid_commit {
                    tx.rapid_commit();
                }
                if self.config.reconfigure_accept {
                    tx.reconf_accept();
                }
                if !intf.stateless {
                    tx.ia_na(intf.iaid, 0, 0, &[]);
                }
            }
            MessageType::Request => {
                if let Some(duid) = &server_duid {
                    tx.server_id(duid);
                }
                tx.oro(&self.config.request_options);
                if self.config.reconfigure_accept {
                    tx.reconf_accept();
                }
                let offers = intf.active().map(|rec| rec.addrs.clone()).unwrap_or_default();
                append_ia(&mut tx, intf, &offers);
            }
            MessageType::Confirm => {
                append_ia(&mut tx, intf, std::slice::from_ref(&intf.addr));
            }
            MessageType::Renew => {
                if let Some(duid) = &server_duid {
                    tx.server_id(duid);
                }
                tx.oro(&self.config.request_options);
                append_ia(&mut tx, intf, std::slice::from_ref(&intf.addr));
            }
            MessageType::Rebind => {
                tx.oro(&self.config.request_options);
                append_ia(&mut tx, intf, std::slice::from_ref(&intf.addr));
            }
            MessageType::Release | MessageType::Decline => {
                if let Some(duid) = &server_duid {
                    tx.server_id(duid);
                }
                append_ia(&mut tx, intf, std::slice::from_ref(&intf.addr));
            }
            MessageType::InformationRequest => {
                tx.oro(&self.config.request_options);
                if self.config.reconfigure_accept {
                    tx.reconf_accept();
                }
            }
            MessageType::Advertise | MessageType::Reply | MessageType::Reconfigure => {}
        }
        tx.finish()
    }

    // ── Receive path ────────────────────────────────────────────────────

    /// Demultiplex one raw datagram into the per-message handlers.
    pub fn rx_packet(&self, ifindex: u32, src: Ipv6Addr, data: &[u8], now_ms: u64) {
        let Some((msg, xid, opts)) = message::parse_header(data) else {
            self.store.update(ifindex, |intf| intf.counters.decode_err += 1);
            return;
        };
        match msg {
            MessageType::Advertise => self.rx_advertise(ifindex, src, xid, opts, now_ms),
            MessageType::Reply => self.rx_reply(ifindex, src, xid, opts, now_ms),
            MessageType::Reconfigure => self.rx_reconfigure(ifindex, src, opts, now_ms),
            other => {
                debug!("dhcp6: if {} ignoring {} from {}", ifindex, other, src);
                self.store.update(ifindex, |intf| intf.counters.rx_drop += 1);
            }
        }
    }

    pub fn rx_advertise(&self, ifindex: u32, src: Ipv6Addr, xid: u32, opts: &[u8], now_ms: u64) {
        let parsed = match RxOptions::parse(opts) {
            Ok(p) => p,
            Err(e) => {
                debug!("dhcp6: if {} bad ADVERTISE from {}: {}", ifindex, src, e);
                self.store.update(ifindex, |intf| intf.counters.decode_err += 1);
                return;
            }
        };

        let effects = self.store.update(ifindex, |intf| {
            intf.counters.record_rx(MessageType::Advertise);
            intf.counters.decode_err += u64::from(parsed.malformed);

            // Validation pass: no state is touched on rejection.
            if let Err(reason) = validate_advertise(intf, xid, &parsed) {
                debug!("dhcp6: if {} drop ADVERTISE from {}: {}", ifindex, src, reason);
                intf.counters.rx_drop += 1;
                return Vec::new();
            }

            // Commit pass.
            *intf.staging_mut() = staging_record(src, &parsed);
            intf.commit_staging(true, true);
            info!(
                "dhcp6: if {} ADVERTISE from {} (preference {})",
                ifindex, src, parsed.preference
            );

            // Only a repeat SOLICIT may cut the collection window short;
            // the first window always runs to its RT deadline.
            if intf.xmt_cntr > 1 {
                self.begin(intf, ClientState::Request, now_ms);
            }
            Vec::new()
        });
        self.run_effects(effects.unwrap_or_default());
    }

    pub fn rx_reply(&self, ifindex: u32, src: Ipv6Addr, xid: u32, opts: &[u8], now_ms: u64) {
        let parsed = match RxOptions::parse(opts) {
            Ok(p) => p,
            Err(e) => {
                debug!("dhcp6: if {} bad REPLY from {}: {}", ifindex, src, e);
                self.store.update(ifindex, |intf| intf.counters.decode_err += 1);
                return;
            }
        };

        let effects = self.store.update(ifindex, |intf| {
            let mut fx = Vec::new();
            intf.counters.record_rx(MessageType::Reply);
            intf.counters.decode_err += u64::from(parsed.malformed);

            // Validation pass.
            if let Err(reason) = validate_reply(intf, xid, &parsed) {
                debug!("dhcp6: if {} drop REPLY from {}: {}", ifindex, src, reason);
                intf.counters.rx_drop += 1;
                return fx;
            }

            // The staging record is per-exchange scratch: build it, run the
            // exchange validation over it, and clear it again on rejection.
            *intf.staging_mut() = staging_record(src, &parsed);
            let Some(check) = intf.validate_exchange(self.config.rapid_commit) else {
                debug!("dhcp6: if {} drop REPLY from {}: exchange mismatch", ifindex, src);
                intf.clear_staging();
                intf.counters.rx_drop += 1;
                return fx;
            };

            let outbound = intf.state;
            let status = parsed.ia_status().map(|s| s.code).unwrap_or(STATUS_SUCCESS);

            // Status codes that redirect the state machine.
            match status {
                STATUS_NOT_ON_LINK
                    if matches!(
                        outbound,
                        ClientState::Confirm | ClientState::Request | ClientState::Solicit
                    ) =>
                {
                    info!("dhcp6: if {} NotOnLink, restarting discovery", ifindex);
                    intf.clear_staging();
                    self.teardown_lease(intf, &mut fx);
                    intf.clear_servers();
                    self.begin(intf, ClientState::Solicit, now_ms);
                    return fx;
                }
                STATUS_NO_BINDING if outbound == ClientState::Renew => {
                    info!("dhcp6: if {} NoBinding on RENEW, re-requesting", ifindex);
                    intf.clear_staging();
                    self.begin(intf, ClientState::Request, now_ms);
                    return fx;
                }
                STATUS_NO_BINDING if outbound == ClientState::Rebind => {
                    info!("dhcp6: if {} NoBinding on REBIND, restarting discovery", ifindex);
                    intf.clear_staging();
                    intf.clear_servers();
                    self.begin(intf, ClientState::Solicit, now_ms);
                    return fx;
                }
                STATUS_USE_MULTICAST => {
                    intf.clear_staging();
                    if let Some(rec) = intf.active_mut() {
                        rec.unicast = None;
                    }
                    intf.counters.rx_drop += 1;
                    return fx;
                }
                _ => {}
            }

            // RELEASE/DECLINE end on any matching reply, whatever it says.
            if outbound == ClientState::Release {
                intf.clear_staging();
                self.finish_release(intf);
                return fx;
            }
            if outbound == ClientState::Decline {
                intf.clear_staging();
                self.finish_decline(intf);
                return fx;
            }

            if status != STATUS_SUCCESS {
                debug!(
                    "dhcp6: if {} REPLY status {} ({}), ignoring",
                    ifindex,
                    status,
                    parsed.ia_status().map(|s| s.message.as_str()).unwrap_or("")
                );
                intf.clear_staging();
                intf.counters.rx_drop += 1;
                return fx;
            }

            // Commit pass.
            match outbound {
                ClientState::InformationRequest => {
                    intf.commit_staging(false, true);
                    intf.stop_exchange();
                    info!("dhcp6: if {} configuration received from {}", ifindex, src);
                }
                ClientState::Confirm => {
                    intf.commit_staging(check.addr_valid, true);
                    intf.stop_exchange();
                    info!("dhcp6: if {} address confirmed", ifindex);
                }
                ClientState::Solicit
                | ClientState::Request
                | ClientState::Renew
                | ClientState::Rebind => {
                    intf.commit_staging(check.addr_valid, true);
                    for action in intf.apply_offer(now_ms) {
                        fx.push(match action {
                            ApplyAction::Add {
                                address,
                                prefix_len,
                                valid_lifetime,
                            } => SideEffect::AddAddress {
                                ifindex,
                                address,
                                prefix_len,
                                valid_lifetime,
                            },
                            ApplyAction::Del {
                                address,
                                prefix_len,
                            } => SideEffect::DelAddress {
                                ifindex,
                                address,
                                prefix_len,
                            },
                        });
                    }
                    intf.stop_exchange();
                    if intf.addr.is_valid() {
                        info!(
                            "dhcp6: if {} bound to {} (T1 {} T2 {})",
                            ifindex, intf.addr.address, intf.addr.t1, intf.addr.t2
                        );
                    }
                }
                ClientState::Init | ClientState::Release | ClientState::Decline => {}
            }

            if check.dns_changed {
                fx.push(SideEffect::DnsRefresh { ifindex });
            }
            fx
        });
        self.run_effects(effects.unwrap_or_default());
    }

    pub fn rx_reconfigure(&self, ifindex: u32, src: Ipv6Addr, opts: &[u8], now_ms: u64) {
        let parsed = match RxOptions::parse(opts) {
            Ok(p) => p,
            Err(e) => {
                debug!("dhcp6: if {} bad RECONFIGURE from {}: {}", ifindex, src, e);
                self.store.update(ifindex, |intf| intf.counters.decode_err += 1);
                return;
            }
        };

        let reconfigure_accept = self.config.reconfigure_accept;
        let effects = self.store.update(ifindex, |intf| {
            intf.counters.record_rx(MessageType::Reconfigure);

            let verdict = (|| {
                if !reconfigure_accept {
                    return Err("reconfigure not accepted");
                }
                if parsed.client_id.as_ref() != Some(&intf.duid) {
                    return Err("client id mismatch");
                }
                let active_duid = intf.active().and_then(|rec| rec.duid.clone());
                if parsed.server_id.is_none() || parsed.server_id != active_duid {
                    return Err("server id mismatch");
                }
                match parsed.reconf_msg {
                    Some(MessageType::Renew) if intf.addr.is_valid() => {
                        Ok(ClientState::Renew)
                    }
                    Some(MessageType::InformationRequest) => {
                        Ok(ClientState::InformationRequest)
                    }
                    _ => Err("unusable reconfigure message type"),
                }
            })();

            match verdict {
                Ok(next) => {
                    info!("dhcp6: if {} RECONFIGURE -> {:?}", ifindex, next);
                    self.begin(intf, next, now_ms);
                }
                Err(reason) => {
                    debug!(
                        "dhcp6: if {} drop RECONFIGURE from {}: {}",
                        ifindex, src, reason
                    );
                    intf.counters.rx_drop += 1;
                }
            }
            Vec::<SideEffect>::new()
        });
        self.run_effects(effects.unwrap_or_default());
    }

    // ── Internal helpers ────────────────────────────────────────────────

    fn begin(&self, intf: &mut Interface, state: ClientState, now_ms: u64) {
        intf.start_exchange(state, now_ms, &mut rand::rng());
        debug!("dhcp6: if {} -> {}", intf.ifindex, intf.state);
    }

    /// Queue removal of the applied lease and forget it.
    fn teardown_lease(&self, intf: &mut Interface, fx: &mut Vec<SideEffect>) {
        if intf.addr.has_address() {
            fx.push(SideEffect::DelAddress {
                ifindex: intf.ifindex,
                address: intf.addr.address,
                prefix_len: intf.addr.prefix_len,
            });
            intf.addr = crate::interface::AddrInfo::none();
        }
    }

    fn finish_release(&self, intf: &mut Interface) {
        // The IP stack entry was removed when the release began.
        intf.addr = crate::interface::AddrInfo::none();
        intf.clear_servers();
        intf.stop_exchange();
        debug!("dhcp6: if {} release finished", intf.ifindex);
    }

    fn finish_decline(&self, intf: &mut Interface) {
        intf.addr = crate::interface::AddrInfo::none();
        intf.dad_pending = false;
        intf.clear_servers();
        intf.stop_exchange();
        debug!("dhcp6: if {} decline finished", intf.ifindex);
    }

    fn run_effects(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            match effect {
                SideEffect::Transmit {
                    ifindex,
                    dest,
                    msg,
                    xid,
                    payload,
                } => {
                    if let Err(e) = self.transport.transmit(ifindex, dest, msg, xid, &payload) {
                        warn!("dhcp6: if {} failed to send {}: {}", ifindex, msg, e);
                        self.store.update(ifindex, |intf| intf.counters.tx_err += 1);
                    }
                }
                SideEffect::AddAddress {
                    ifindex,
                    address,
                    prefix_len,
                    valid_lifetime,
                } => {
                    if let Err(e) = self.ip.add_address(ifindex, address, prefix_len, valid_lifetime)
                    {
                        warn!("dhcp6: if {} failed to install {}: {}", ifindex, address, e);
                        self.store.update(ifindex, |intf| intf.counters.ip_err += 1);
                    } else {
                        let _ = self.events.lease.send(LeaseEvent {
                            ifindex,
                            address,
                            installed: true,
                        });
                    }
                }
                SideEffect::DelAddress {
                    ifindex,
                    address,
                    prefix_len,
                } => {
                    if let Err(e) = self.ip.del_address(ifindex, address, prefix_len) {
                        warn!("dhcp6: if {} failed to remove {}: {}", ifindex, address, e);
                        self.store.update(ifindex, |intf| intf.counters.ip_err += 1);
                    } else {
                        let _ = self.events.lease.send(LeaseEvent {
                            ifindex,
                            address,
                            installed: false,
                        });
                    }
                }
                SideEffect::DnsRefresh { ifindex } => {
                    let _ = self.events.dns_refresh.send(DnsRefreshEvent { ifindex });
                }
            }
        }
    }
}

/// SOLICIT or INFORMATION-REQUEST, depending on the interface mode.
fn initial_state(intf: &Interface) -> ClientState {
    if intf.stateless {
        ClientState::InformationRequest
    } else {
        ClientState::Solicit
    }
}

/// RFC 3315 §18: only these exchanges may use the Server Unicast address.
fn unicast_allowed(msg: MessageType) -> bool {
    matches!(
        msg,
        MessageType::Request | MessageType::Renew | MessageType::Release | MessageType::Decline
    )
}

fn release_dest(intf: &Interface) -> Option<Ipv6Addr> {
    intf.active().and_then(|rec| rec.unicast)
}

fn staging_record(src: Ipv6Addr, parsed: &RxOptions) -> ServerRecord {
    ServerRecord {
        addr: src,
        unicast: parsed.unicast,
        preference: parsed.preference,
        duid: parsed.server_id.clone(),
        rapid_commit: parsed.rapid_commit,
        dns_servers: parsed.dns_servers.clone(),
        domains: parsed.domains.clone(),
        addrs: parsed.offered_addrs(),
    }
}

fn validate_advertise(intf: &Interface, xid: u32, parsed: &RxOptions) -> Result<(), &'static str> {
    if intf.state != ClientState::Solicit {
        return Err("no SOLICIT in progress");
    }
    if xid != intf.xid {
        return Err("transaction id mismatch");
    }
    if parsed.client_id.as_ref() != Some(&intf.duid) {
        return Err("client id mismatch");
    }
    if parsed.server_id.is_none() {
        return Err("missing server id");
    }
    if let Some(status) = parsed.ia_status() {
        if status.code != STATUS_SUCCESS {
            return Err("advertise carries failure status");
        }
    }
    if !intf.stateless && parsed.offered_addrs().iter().all(|a| !a.is_valid()) {
        return Err("no usable addresses offered");
    }
    Ok(())
}

fn validate_reply(intf: &Interface, xid: u32, parsed: &RxOptions) -> Result<(), &'static str> {
    if intf.state.message_type().is_none() {
        return Err("no exchange in progress");
    }
    if xid != intf.xid {
        return Err("transaction id mismatch");
    }
    if parsed.client_id.as_ref() != Some(&intf.duid) {
        return Err("client id mismatch");
    }
    if parsed.server_id.is_none() {
        return Err("missing server id");
    }
    Ok(())
}

fn append_ia(tx: &mut TxOptions, intf: &Interface, addrs: &[crate::interface::AddrInfo]) {
    use crate::interface::AddrType;
    let na: Vec<_> = addrs
        .iter()
        .filter(|a| a.has_address() && a.addr_type == AddrType::NonTemporary)
        .cloned()
        .collect();
    let ta: Vec<_> = addrs
        .iter()
        .filter(|a| a.has_address() && a.addr_type == AddrType::Temporary)
        .cloned()
        .collect();
    tx.ia_na(intf.iaid, 0, 0, &na);
    if !ta.is_empty() {
        tx.ia_ta(intf.iaid, &ta);
    }
}
