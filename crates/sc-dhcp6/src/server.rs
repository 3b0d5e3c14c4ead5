//! Candidate server records and their selection/merge rules.
//!
//! Each interface keeps a small fixed array of server records. Slot 0 is
//! the staging record built while an exchange is in flight; it is merged
//! into a numbered slot only when the exchange commits.

use std::net::Ipv6Addr;

use crate::duid::Duid;
use crate::interface::{AddrInfo, AddrType, Interface};
use crate::message::ClientState;

/// Slot 0 staging plus the committed candidates.
pub const SERVER_SLOT_CNT: usize = 5;

/// One candidate server's offered lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Source address of the server's messages.
    pub addr: Ipv6Addr,
    /// Server Unicast option, when the server allows unicast exchanges.
    pub unicast: Option<Ipv6Addr>,
    pub preference: u8,
    pub duid: Option<Duid>,
    pub rapid_commit: bool,
    pub dns_servers: Vec<Ipv6Addr>,
    pub domains: Vec<String>,
    pub addrs: Vec<AddrInfo>,
}

impl Default for ServerRecord {
    fn default() -> Self {
        Self {
            addr: Ipv6Addr::UNSPECIFIED,
            unicast: None,
            preference: 0,
            duid: None,
            rapid_commit: false,
            dns_servers: Vec::new(),
            domains: Vec::new(),
            addrs: Vec::new(),
        }
    }
}

/// Address install/remove work produced under the store lock and executed
/// against the IP stack after it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyAction {
    Add {
        address: Ipv6Addr,
        prefix_len: u8,
        valid_lifetime: u32,
    },
    Del {
        address: Ipv6Addr,
        prefix_len: u8,
    },
}

/// Outcome of the exchange validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeCheck {
    /// The staging record's address list may be applied.
    pub addr_valid: bool,
    /// DNS configuration differs from what the active server last gave us.
    pub dns_changed: bool,
}

impl Interface {
    /// Re-select the active server: highest preference over the numbered
    /// slots, ties broken by the numerically larger server address.
    pub fn determine_active(&mut self) {
        let mut best: Option<(usize, u8, u128)> = None;
        for i in 1..SERVER_SLOT_CNT {
            let Some(rec) = &self.servers[i] else {
                continue;
            };
            let addr = u128::from(rec.addr);
            let better = match best {
                None => true,
                Some((_, bp, ba)) => {
                    rec.preference > bp || (rec.preference == bp && addr > ba)
                }
            };
            if better {
                best = Some((i, rec.preference, addr));
            }
        }
        self.active_server = best.map(|(i, _, _)| i);
    }

    /// Switch to the next-best candidate at or below the active server's
    /// preference, used when the active server stops answering REQUESTs.
    /// Strictly-lower preference is preferred; failing that, the
    /// next-largest address below the active's at the same preference.
    /// Returns false (active unchanged) when no alternate exists.
    pub fn determine_alternate(&mut self) -> bool {
        let Some(active_idx) = self.active_server else {
            return false;
        };
        let Some(active) = self.servers[active_idx].as_ref() else {
            return false;
        };
        let (act_pref, act_addr) = (active.preference, u128::from(active.addr));

        let mut lower: Option<(usize, u8, u128)> = None;
        let mut same: Option<(usize, u128)> = None;
        for i in 1..SERVER_SLOT_CNT {
            if i == active_idx {
                continue;
            }
            let Some(rec) = &self.servers[i] else {
                continue;
            };
            let addr = u128::from(rec.addr);
            if rec.preference < act_pref {
                let better = match lower {
                    None => true,
                    Some((_, bp, ba)) => {
                        rec.preference > bp || (rec.preference == bp && addr > ba)
                    }
                };
                if better {
                    lower = Some((i, rec.preference, addr));
                }
            } else if rec.preference == act_pref && addr < act_addr {
                let better = match same {
                    None => true,
                    Some((_, ba)) => addr > ba,
                };
                if better {
                    same = Some((i, addr));
                }
            }
        }

        match lower.map(|(i, _, _)| i).or(same.map(|(i, _)| i)) {
            Some(i) => {
                self.active_server = Some(i);
                true
            }
            None => false,
        }
    }

    /// Merge the staging record into a numbered slot: the slot already
    /// holding this server's address, else the first empty slot, else the
    /// slot with the lowest preference (first-found-lowest under ties).
    /// `include_addresses`/`include_dns` gate which staging lists replace
    /// the slot's previous contents. Re-runs active-server selection.
    pub fn commit_staging(&mut self, include_addresses: bool, include_dns: bool) -> bool {
        let Some(mut staging) = self.servers[0].take() else {
            return false;
        };

        let mut slot: Option<usize> = None;
        for i in 1..SERVER_SLOT_CNT {
            if let Some(rec) = &self.servers[i] {
                if rec.addr == staging.addr {
                    slot = Some(i);
                    break;
                }
            }
        }
        if slot.is_none() {
            slot = (1..SERVER_SLOT_CNT).find(|&i| self.servers[i].is_none());
        }
        let slot = slot.unwrap_or_else(|| {
            let mut victim = 1;
            let mut lowest = u16::MAX;
            for i in 1..SERVER_SLOT_CNT {
                if let Some(rec) = &self.servers[i] {
                    if u16::from(rec.preference) < lowest {
                        lowest = u16::from(rec.preference);
                        victim = i;
                    }
                }
            }
            victim
        });

        if let Some(old) = &self.servers[slot] {
            if !include_addresses {
                staging.addrs = old.addrs.clone();
            }
            if !include_dns {
                staging.dns_servers = old.dns_servers.clone();
                staging.domains = old.domains.clone();
            }
        } else {
            if !include_addresses {
                staging.addrs.clear();
            }
            if !include_dns {
                staging.dns_servers.clear();
                staging.domains.clear();
            }
        }

        self.servers[slot] = Some(staging);
        self.determine_active();
        true
    }

    /// Adopt the active server's offer: the first still-valid entry
    /// differing from the applied address replaces it; an explicitly
    /// invalid entry matching the applied address tears it down; an empty
    /// offer list invalidates the applied address.
    pub fn apply_offer(&mut self, now_ms: u64) -> Vec<ApplyAction> {
        let mut actions = Vec::new();
        let offers = match self.active() {
            Some(rec) => rec.addrs.clone(),
            None => return actions,
        };

        if offers.is_empty() {
            if self.addr.has_address() {
                self.addr.addr_type = AddrType::Invalid;
            }
            return actions;
        }

        for offer in &offers {
            if offer.addr_type == AddrType::Invalid {
                if self.addr.has_address() && offer.address == self.addr.address {
                    actions.push(ApplyAction::Del {
                        address: self.addr.address,
                        prefix_len: self.addr.prefix_len,
                    });
                    self.addr = AddrInfo::none();
                }
                continue;
            }

            if self.addr.is_valid() && offer.address == self.addr.address {
                // Same lease renewed: take the new lifetimes.
                let mut refreshed = offer.clone();
                refreshed.prefix_len = self.addr.prefix_len;
                refreshed.refreshed_ms = now_ms;
                self.addr = refreshed;
                actions.push(ApplyAction::Add {
                    address: self.addr.address,
                    prefix_len: self.addr.prefix_len,
                    valid_lifetime: self.addr.valid_lifetime,
                });
            } else {
                if self.addr.has_address() {
                    actions.push(ApplyAction::Del {
                        address: self.addr.address,
                        prefix_len: self.addr.prefix_len,
                    });
                }
                let mut adopted = offer.clone();
                adopted.refreshed_ms = now_ms;
                self.addr = adopted;
                actions.push(ApplyAction::Add {
                    address: self.addr.address,
                    prefix_len: self.addr.prefix_len,
                    valid_lifetime: self.addr.valid_lifetime,
                });
            }
            break;
        }

        actions
    }

    /// Validation pass over a completed exchange, before anything is
    /// applied. `None` rejects the exchange outright.
    pub fn validate_exchange(&self, offered_rapid_commit: bool) -> Option<ExchangeCheck> {
        let staging = self.staging()?;
        let mut check = ExchangeCheck {
            addr_valid: true,
            dns_changed: false,
        };

        match self.state {
            // A REPLY ending a SOLICIT exchange is only acceptable as a
            // rapid-commit answer, and only if we offered rapid commit.
            ClientState::Solicit => {
                if !offered_rapid_commit || !staging.rapid_commit {
                    return None;
                }
            }
            // These exchanges address one specific server; the answer must
            // come from it.
            ClientState::Request
            | ClientState::Renew
            | ClientState::Release
            | ClientState::Decline => {
                if let Some(active) = self.active() {
                    match (&staging.duid, &active.duid) {
                        (Some(s), Some(a)) if s != a => return None,
                        (None, Some(_)) => return None,
                        _ => {}
                    }
                }
            }
            ClientState::Confirm => {
                if staging.addrs.is_empty() {
                    check.addr_valid = false;
                }
            }
            _ => {}
        }

        match self.active() {
            Some(active) => {
                if !staging.dns_servers.is_empty() || !staging.domains.is_empty() {
                    check.dns_changed = staging.dns_servers != active.dns_servers
                        || staging.domains != active.domains;
                }
            }
            None => {
                check.dns_changed =
                    !staging.dns_servers.is_empty() || !staging.domains.is_empty();
            }
        }

        Some(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceConfig;

    fn test_interface() -> Interface {
        Interface::new(&InterfaceConfig {
            ifindex: 1,
            mac: [2, 0, 0, 0, 0, 1],
            stateless: false,
        })
    }

    fn record(addr: &str, preference: u8) -> ServerRecord {
        ServerRecord {
            addr: addr.parse().unwrap(),
            preference,
            ..ServerRecord::default()
        }
    }

    fn offer(addr: &str, valid: u32) -> AddrInfo {
        AddrInfo {
            addr_type: AddrType::NonTemporary,
            address: addr.parse().unwrap(),
            prefix_len: 128,
            t1: 100,
            t2: 160,
            preferred_lifetime: valid / 2,
            valid_lifetime: valid,
            refreshed_ms: 0,
        }
    }

    #[test]
    fn test_determine_active_prefers_highest() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 10));
        intf.servers[2] = Some(record("fe80::2", 200));
        intf.servers[3] = Some(record("fe80::3", 50));
        intf.determine_active();
        assert_eq!(intf.active_server, Some(2));
    }

    #[test]
    fn test_determine_active_tie_breaks_on_address() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 100));
        intf.servers[2] = Some(record("fe80::9", 100));
        intf.servers[3] = Some(record("fe80::5", 100));
        intf.determine_active();
        assert_eq!(intf.active_server, Some(2));
    }

    #[test]
    fn test_determine_alternate_prefers_lower_preference() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 100));
        intf.servers[2] = Some(record("fe80::2", 100));
        intf.servers[3] = Some(record("fe80::3", 60));
        intf.determine_active();
        assert_eq!(intf.active_server, Some(2));
        // A strictly-lower-preference record wins over the same-preference
        // smaller-address one.
        assert!(intf.determine_alternate());
        assert_eq!(intf.active_server, Some(3));
    }

    #[test]
    fn test_determine_alternate_same_preference_descending() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 100));
        intf.servers[2] = Some(record("fe80::9", 100));
        intf.servers[3] = Some(record("fe80::5", 100));
        intf.determine_active();
        assert_eq!(intf.active_server, Some(2));
        assert!(intf.determine_alternate());
        assert_eq!(intf.active_server, Some(3));
    }

    #[test]
    fn test_determine_alternate_none_available() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 100));
        intf.determine_active();
        assert!(!intf.determine_alternate());
        assert_eq!(intf.active_server, Some(1));
    }

    #[test]
    fn test_commit_reuses_matching_slot() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 10));
        intf.servers[0] = Some(record("fe80::1", 99));
        assert!(intf.commit_staging(true, true));
        assert_eq!(intf.servers[1].as_ref().unwrap().preference, 99);
        assert!(intf.servers[0].is_none());
    }

    #[test]
    fn test_commit_takes_first_empty_slot() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 10));
        intf.servers[0] = Some(record("fe80::2", 20));
        assert!(intf.commit_staging(true, true));
        assert_eq!(intf.servers[2].as_ref().unwrap().addr, "fe80::2".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_commit_evicts_lowest_preference() {
        let mut intf = test_interface();
        intf.servers[1] = Some(record("fe80::1", 40));
        intf.servers[2] = Some(record("fe80::2", 5));
        intf.servers[3] = Some(record("fe80::3", 80));
        intf.servers[4] = Some(record("fe80::4", 5));
        intf.servers[0] = Some(record("fe80::9", 60));
        assert!(intf.commit_staging(true, true));
        // First-found of the tied lowest (slot 2) is the victim; the
        // higher-preference slots survive.
        assert_eq!(intf.servers[2].as_ref().unwrap().addr, "fe80::9".parse::<Ipv6Addr>().unwrap());
        assert_eq!(intf.servers[3].as_ref().unwrap().preference, 80);
        assert_eq!(intf.servers[4].as_ref().unwrap().preference, 5);
        // And the new best is now active.
        assert_eq!(intf.active_server, Some(3));
    }

    #[test]
    fn test_apply_offer_adopts_first_valid() {
        let mut intf = test_interface();
        let mut rec = record("fe80::1", 10);
        rec.addrs = vec![offer("2001:db8::10", 1000)];
        intf.servers[1] = Some(rec);
        intf.determine_active();

        let actions = intf.apply_offer(5000);
        assert_eq!(
            actions,
            vec![ApplyAction::Add {
                address: "2001:db8::10".parse().unwrap(),
                prefix_len: 128,
                valid_lifetime: 1000,
            }]
        );
        assert!(intf.addr.is_valid());
        assert_eq!(intf.addr.refreshed_ms, 5000);
    }

    #[test]
    fn test_apply_offer_replaces_changed_address() {
        let mut intf = test_interface();
        intf.addr = offer("2001:db8::10", 1000);
        intf.addr.refreshed_ms = 1;
        let mut rec = record("fe80::1", 10);
        rec.addrs = vec![offer("2001:db8::20", 1000)];
        intf.servers[1] = Some(rec);
        intf.determine_active();

        let actions = intf.apply_offer(5000);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], ApplyAction::Del { .. }));
        assert!(matches!(actions[1], ApplyAction::Add { .. }));
        assert_eq!(intf.addr.address, "2001:db8::20".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_apply_offer_tears_down_revoked_address() {
        let mut intf = test_interface();
        intf.addr = offer("2001:db8::10", 1000);
        let mut revoked = offer("2001:db8::10", 0);
        revoked.addr_type = AddrType::Invalid;
        let mut rec = record("fe80::1", 10);
        rec.addrs = vec![revoked];
        intf.servers[1] = Some(rec);
        intf.determine_active();

        let actions = intf.apply_offer(5000);
        assert_eq!(
            actions,
            vec![ApplyAction::Del {
                address: "2001:db8::10".parse().unwrap(),
                prefix_len: 128,
            }]
        );
        assert!(!intf.addr.has_address());
    }

    #[test]
    fn test_apply_offer_empty_list_invalidates() {
        let mut intf = test_interface();
        intf.addr = offer("2001:db8::10", 1000);
        intf.servers[1] = Some(record("fe80::1", 10));
        intf.determine_active();

        let actions = intf.apply_offer(5000);
        assert!(actions.is_empty());
        assert_eq!(intf.addr.addr_type, AddrType::Invalid);
    }

    #[test]
    fn test_validate_rapid_commit_requires_both_sides() {
        let mut intf = test_interface();
        intf.state = ClientState::Solicit;
        intf.staging_mut().rapid_commit = true;
        assert!(intf.validate_exchange(true).is_some());
        assert!(intf.validate_exchange(false).is_none());

        intf.staging_mut().rapid_commit = false;
        assert!(intf.validate_exchange(true).is_none());
    }

    #[test]
    fn test_validate_confirm_without_addresses() {
        let mut intf = test_interface();
        intf.state = ClientState::Confirm;
        intf.staging_mut().addr = "fe80::1".parse().unwrap();
        let check = intf.validate_exchange(false).unwrap();
        assert!(!check.addr_valid);
    }

    #[test]
    fn test_validate_duid_mismatch_rejected() {
        let mut intf = test_interface();
        intf.state = ClientState::Renew;
        let mut active = record("fe80::1", 10);
        active.duid = Some(Duid::from_mac(&[1, 1, 1, 1, 1, 1]));
        intf.servers[1] = Some(active);
        intf.determine_active();
        intf.staging_mut().duid = Some(Duid::from_mac(&[2, 2, 2, 2, 2, 2]));
        assert!(intf.validate_exchange(false).is_none());

        intf.staging_mut().duid = Some(Duid::from_mac(&[1, 1, 1, 1, 1, 1]));
        assert!(intf.validate_exchange(false).is_some());
    }

    #[test]
    fn test_validate_dns_change_detection() {
        let mut intf = test_interface();
        intf.state = ClientState::Renew;
        let mut active = record("fe80::1", 10);
        active.dns_servers = vec!["2001:db8::53".parse().unwrap()];
        intf.servers[1] = Some(active);
        intf.determine_active();

        let staging = intf.staging_mut();
        staging.dns_servers = vec!["2001:db8::53".parse().unwrap()];
        assert!(!intf.validate_exchange(false).unwrap().dns_changed);

        intf.staging_mut().dns_servers = vec!["2001:db8::99".parse().unwrap()];
        assert!(intf.validate_exchange(false).unwrap().dns_changed);
    }
}
