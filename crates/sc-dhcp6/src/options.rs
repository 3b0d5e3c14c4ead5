//! DHCPv6 option TLV codec (RFC 3315 §22).
//!
//! Decoding never trusts a declared length: every read goes through
//! `OptionCursor`, which refuses to advance past the remaining buffer. A
//! malformed IA is dropped while its sibling options continue to decode.

use std::net::Ipv6Addr;
use thiserror::Error;

use crate::duid::Duid;
use crate::interface::{AddrInfo, AddrType, INFINITE_LIFETIME};
use crate::message::MessageType;

pub const OPT_CLIENTID: u16 = 1;
pub const OPT_SERVERID: u16 = 2;
pub const OPT_IA_NA: u16 = 3;
pub const OPT_IA_TA: u16 = 4;
pub const OPT_IAADDR: u16 = 5;
pub const OPT_ORO: u16 = 6;
pub const OPT_PREFERENCE: u16 = 7;
pub const OPT_ELAPSED_TIME: u16 = 8;
pub const OPT_UNICAST: u16 = 12;
pub const OPT_STATUS_CODE: u16 = 13;
pub const OPT_RAPID_COMMIT: u16 = 14;
pub const OPT_RECONF_MSG: u16 = 19;
pub const OPT_RECONF_ACCEPT: u16 = 20;
pub const OPT_DNS_SERVERS: u16 = 23;
pub const OPT_DOMAIN_LIST: u16 = 24;

pub const STATUS_SUCCESS: u16 = 0;
pub const STATUS_UNSPEC_FAIL: u16 = 1;
pub const STATUS_NO_ADDRS_AVAIL: u16 = 2;
pub const STATUS_NO_BINDING: u16 = 3;
pub const STATUS_NOT_ON_LINK: u16 = 4;
pub const STATUS_USE_MULTICAST: u16 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Option truncated at offset {0}")]
    Truncated(usize),
    #[error("Option {code} has invalid length {len}")]
    BadLength { code: u16, len: usize },
    #[error("Invalid domain label at offset {0}")]
    InvalidLabel(usize),
    #[error("Invalid UTF-8 in domain name")]
    InvalidUtf8,
}

/// Bounds-checked walker over a (code, len, data) TLV sequence.
pub struct OptionCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> OptionCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// The next option, or `None` at a clean end of buffer. A partial
    /// header or a declared length past the end is a decode error.
    pub fn next_option(&mut self) -> Result<Option<(u16, &'a [u8])>, DecodeError> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        if self.pos + 4 > self.buf.len() {
            return Err(DecodeError::Truncated(self.pos));
        }
        let code = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        let len = u16::from_be_bytes([self.buf[self.pos + 2], self.buf[self.pos + 3]]) as usize;
        let start = self.pos + 4;
        if start + len > self.buf.len() {
            return Err(DecodeError::Truncated(self.pos));
        }
        self.pos = start + len;
        Ok(Some((code, &self.buf[start..start + len])))
    }
}

/// A decoded Status Code option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCode {
    pub code: u16,
    pub message: String,
}

fn parse_status(data: &[u8]) -> Result<StatusCode, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::BadLength {
            code: OPT_STATUS_CODE,
            len: data.len(),
        });
    }
    Ok(StatusCode {
        code: u16::from_be_bytes([data[0], data[1]]),
        message: String::from_utf8_lossy(&data[2..]).into_owned(),
    })
}

/// A decoded IA_NA or IA_TA option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaDecode {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub addrs: Vec<AddrInfo>,
    pub status: Option<StatusCode>,
}

/// Decode an IA option body. `Ok(None)` means the IA is to be silently
/// ignored (T1 > T2, RFC 3315 §22.4); decode errors mean the IA was
/// malformed and must be dropped.
fn parse_ia(data: &[u8], temporary: bool) -> Result<Option<IaDecode>, DecodeError> {
    let header_len = if temporary { 4 } else { 12 };
    if data.len() < header_len {
        return Err(DecodeError::BadLength {
            code: if temporary { OPT_IA_TA } else { OPT_IA_NA },
            len: data.len(),
        });
    }
    let iaid = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let (mut t1, mut t2) = if temporary {
        (0, 0)
    } else {
        (
            u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        )
    };

    if t1 > t2 && t2 != 0 {
        return Ok(None);
    }

    let mut addrs = Vec::new();
    let mut status = None;
    let mut cursor = OptionCursor::new(&data[header_len..]);
    while let Some((code, sub)) = cursor.next_option()? {
        match code {
            OPT_IAADDR => {
                if let Some(addr) = parse_iaaddr(sub, temporary)? {
                    if !addrs.iter().any(|a: &AddrInfo| a.address == addr.address) {
                        addrs.push(addr);
                    }
                }
            }
            OPT_STATUS_CODE => status = Some(parse_status(sub)?),
            _ => {}
        }
    }

    // T1/T2 unset: derive from the first usable address (RFC 3315 §22.4
    // leaves the choice to the client; 0.5x/0.8x preferred lifetime).
    if t1 == 0 && t2 == 0 {
        if let Some(first) = addrs.iter().find(|a| a.addr_type != AddrType::Invalid) {
            if first.preferred_lifetime == INFINITE_LIFETIME {
                t1 = INFINITE_LIFETIME;
                t2 = INFINITE_LIFETIME;
            } else if first.preferred_lifetime > 0 {
                t1 = first.preferred_lifetime / 2;
                t2 = first.preferred_lifetime / 5 * 4;
            }
        }
    }

    for addr in &mut addrs {
        addr.t1 = t1;
        addr.t2 = t2;
    }

    Ok(Some(IaDecode {
        iaid,
        t1,
        t2,
        addrs,
        status,
    }))
}

/// Decode one IAADDR sub-option. `Ok(None)` drops an entry whose lifetimes
/// are nonsensical; a non-success status marks the entry invalid instead of
/// dropping it, so a revoked address can still be matched for teardown.
fn parse_iaaddr(data: &[u8], temporary: bool) -> Result<Option<AddrInfo>, DecodeError> {
    if data.len() < 24 {
        return Err(DecodeError::BadLength {
            code: OPT_IAADDR,
            len: data.len(),
        });
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[0..16]);
    let address = Ipv6Addr::from(octets);
    let preferred = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let valid = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);

    if valid != 0 && valid != INFINITE_LIFETIME && valid < preferred {
        return Ok(None);
    }

    let mut addr_type = if temporary {
        AddrType::Temporary
    } else {
        AddrType::NonTemporary
    };
    // Zero valid lifetime revokes the address.
    if valid == 0 {
        addr_type = AddrType::Invalid;
    }

    let mut cursor = OptionCursor::new(&data[24..]);
    while let Some((code, sub)) = cursor.next_option()? {
        if code == OPT_STATUS_CODE && parse_status(sub)?.code != STATUS_SUCCESS {
            addr_type = AddrType::Invalid;
        }
    }

    Ok(Some(AddrInfo {
        addr_type,
        address,
        prefix_len: 128,
        t1: 0,
        t2: 0,
        preferred_lifetime: preferred,
        valid_lifetime: valid,
        refreshed_ms: 0,
    }))
}

/// Uncompressed DNS-label domain list (RFC 3315 §8 forbids compression).
fn parse_domains(data: &[u8], out: &mut Vec<String>) -> Result<(), DecodeError> {
    let mut pos = 0;
    let mut name = String::new();
    while pos < data.len() {
        let len = data[pos] as usize;
        if len == 0 {
            if !name.is_empty() {
                if !out.iter().any(|d| d == &name) {
                    out.push(name.clone());
                }
                name.clear();
            }
            pos += 1;
            continue;
        }
        if len > 63 {
            return Err(DecodeError::InvalidLabel(pos));
        }
        if pos + 1 + len > data.len() {
            return Err(DecodeError::Truncated(pos));
        }
        let label =
            std::str::from_utf8(&data[pos + 1..pos + 1 + len]).map_err(|_| DecodeError::InvalidUtf8)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(label);
        if name.len() > 255 {
            return Err(DecodeError::InvalidLabel(pos));
        }
        pos += 1 + len;
    }
    if !name.is_empty() {
        // Name not terminated by a root label.
        return Err(DecodeError::Truncated(data.len()));
    }
    Ok(())
}

/// All options of one received message, decoded in a single pass.
#[derive(Debug, Clone, Default)]
pub struct RxOptions {
    pub client_id: Option<Duid>,
    pub server_id: Option<Duid>,
    pub preference: u8,
    pub unicast: Option<Ipv6Addr>,
    pub status: Option<StatusCode>,
    pub rapid_commit: bool,
    pub reconf_accept: bool,
    pub reconf_msg: Option<MessageType>,
    pub dns_servers: Vec<Ipv6Addr>,
    pub domains: Vec<String>,
    pub ia_na: Option<IaDecode>,
    pub ia_ta: Option<IaDecode>,
    /// Options dropped for being internally malformed.
    pub malformed: u32,
}

impl RxOptions {
    pub fn parse(buf: &[u8]) -> Result<RxOptions, DecodeError> {
        let mut out = RxOptions::default();
        let mut cursor = OptionCursor::new(buf);
        while let Some((code, data)) = cursor.next_option()? {
            match code {
                OPT_CLIENTID => out.client_id = Duid::parse(data),
                OPT_SERVERID => out.server_id = Duid::parse(data),
                OPT_IA_NA => match parse_ia(data, false) {
                    Ok(ia) => out.ia_na = ia,
                    Err(_) => out.malformed += 1,
                },
                OPT_IA_TA => match parse_ia(data, true) {
                    Ok(ia) => out.ia_ta = ia,
                    Err(_) => out.malformed += 1,
                },
                OPT_PREFERENCE => {
                    if let Some(p) = data.first() {
                        out.preference = *p;
                    }
                }
                OPT_UNICAST => {
                    if data.len() >= 16 {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(&data[0..16]);
                        out.unicast = Some(Ipv6Addr::from(octets));
                    } else {
                        out.malformed += 1;
                    }
                }
                OPT_STATUS_CODE => match parse_status(data) {
                    Ok(s) => out.status = Some(s),
                    Err(_) => out.malformed += 1,
                },
                OPT_RAPID_COMMIT => out.rapid_commit = true,
                OPT_RECONF_ACCEPT => out.reconf_accept = true,
                OPT_RECONF_MSG => {
                    out.reconf_msg = data.first().and_then(|m| MessageType::from_u8(*m));
                }
                OPT_DNS_SERVERS => {
                    if data.len() % 16 != 0 {
                        out.malformed += 1;
                        continue;
                    }
                    for chunk in data.chunks_exact(16) {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(chunk);
                        let addr = Ipv6Addr::from(octets);
                        if !out.dns_servers.contains(&addr) {
                            out.dns_servers.push(addr);
                        }
                    }
                }
                OPT_DOMAIN_LIST => {
                    if parse_domains(data, &mut out.domains).is_err() {
                        out.malformed += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// The IA status code, wherever it was carried.
    pub fn ia_status(&self) -> Option<&StatusCode> {
        self.ia_na
            .as_ref()
            .and_then(|ia| ia.status.as_ref())
            .or_else(|| self.ia_ta.as_ref().and_then(|ia| ia.status.as_ref()))
            .or(self.status.as_ref())
    }

    /// All offered addresses across IA_NA and IA_TA.
    pub fn offered_addrs(&self) -> Vec<AddrInfo> {
        let mut out = Vec::new();
        for ia in [&self.ia_na, &self.ia_ta].into_iter().flatten() {
            for addr in &ia.addrs {
                if !out.iter().any(|a: &AddrInfo| a.address == addr.address) {
                    out.push(addr.clone());
                }
            }
        }
        out
    }
}

/// Outbound option accumulator. Options are appended one TLV at a time;
/// `finish` yields the exactly-sized contiguous buffer.
#[derive(Debug, Default)]
pub struct TxOptions {
    buf: Vec<u8>,
}

impl TxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, code: u16, data: &[u8]) {
        self.buf.extend_from_slice(&code.to_be_bytes());
        self.buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    pub fn client_id(&mut self, duid: &Duid) {
        self.append(OPT_CLIENTID, &duid.to_bytes());
    }

    pub fn server_id(&mut self, duid: &Duid) {
        self.append(OPT_SERVERID, &duid.to_bytes());
    }

    pub fn elapsed_time(&mut self, hundredths: u16) {
        self.append(OPT_ELAPSED_TIME, &hundredths.to_be_bytes());
    }

    pub fn rapid_commit(&mut self) {
        self.append(OPT_RAPID_COMMIT, &[]);
    }

    pub fn reconf_accept(&mut self) {
        self.append(OPT_RECONF_ACCEPT, &[]);
    }

    pub fn oro(&mut self, codes: &[u16]) {
        let mut data = Vec::with_capacity(codes.len() * 2);
        for code in codes {
            data.extend_from_slice(&code.to_be_bytes());
        }
        self.append(OPT_ORO, &data);
    }

    pub fn ia_na(&mut self, iaid: u32, t1: u32, t2: u32, addrs: &[AddrInfo]) {
        self.append(OPT_IA_NA, &ia_body(Some((t1, t2)), iaid, addrs));
    }

    pub fn ia_ta(&mut self, iaid: u32, addrs: &[AddrInfo]) {
        self.append(OPT_IA_TA, &ia_body(None, iaid, addrs));
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn ia_body(timers: Option<(u32, u32)>, iaid: u32, addrs: &[AddrInfo]) -> Vec<u8> {
    let mut data = Vec::with_capacity(12 + addrs.len() * 28);
    data.extend_from_slice(&iaid.to_be_bytes());
    if let Some((t1, t2)) = timers {
        data.extend_from_slice(&t1.to_be_bytes());
        data.extend_from_slice(&t2.to_be_bytes());
    }
    for addr in addrs {
        if !addr.has_address() {
            continue;
        }
        let mut sub = Vec::with_capacity(24);
        sub.extend_from_slice(&addr.address.octets());
        sub.extend_from_slice(&addr.preferred_lifetime.to_be_bytes());
        sub.extend_from_slice(&addr.valid_lifetime.to_be_bytes());
        data.extend_from_slice(&OPT_IAADDR.to_be_bytes());
        data.extend_from_slice(&(sub.len() as u16).to_be_bytes());
        data.extend_from_slice(&sub);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str, preferred: u32, valid: u32) -> AddrInfo {
        AddrInfo {
            addr_type: AddrType::NonTemporary,
            address: s.parse().unwrap(),
            prefix_len: 128,
            t1: 0,
            t2: 0,
            preferred_lifetime: preferred,
            valid_lifetime: valid,
            refreshed_ms: 0,
        }
    }

    #[test]
    fn test_client_id_roundtrip() {
        let duid = Duid::from_mac(&[1, 2, 3, 4, 5, 6]);
        let mut tx = TxOptions::new();
        tx.client_id(&duid);
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        assert_eq!(rx.client_id, Some(duid));
    }

    #[test]
    fn test_ia_na_roundtrip() {
        let offered = vec![
            addr("2001:db8::10", 1000, 2000),
            addr("2001:db8::11", 1000, 2000),
        ];
        let mut tx = TxOptions::new();
        tx.ia_na(9, 500, 800, &offered);
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        let ia = rx.ia_na.unwrap();
        assert_eq!(ia.iaid, 9);
        assert_eq!(ia.t1, 500);
        assert_eq!(ia.t2, 800);
        assert_eq!(ia.addrs.len(), 2);
        assert_eq!(ia.addrs[0].address, "2001:db8::10".parse::<Ipv6Addr>().unwrap());
        assert_eq!(ia.addrs[0].t1, 500);
        assert_eq!(ia.addrs[1].valid_lifetime, 2000);
    }

    #[test]
    fn test_dns_servers_decode_and_dedupe() {
        let a: Ipv6Addr = "2001:db8::53".parse().unwrap();
        let b: Ipv6Addr = "2001:db8::54".parse().unwrap();
        let mut data = Vec::new();
        data.extend_from_slice(&a.octets());
        data.extend_from_slice(&b.octets());
        data.extend_from_slice(&a.octets());
        let mut tx = TxOptions::new();
        tx.append(OPT_DNS_SERVERS, &data);
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        assert_eq!(rx.dns_servers, vec![a, b]);
    }

    #[test]
    fn test_domain_list_decode() {
        // "example.com" "lab" in DNS label form
        let mut data = Vec::new();
        data.push(7);
        data.extend_from_slice(b"example");
        data.push(3);
        data.extend_from_slice(b"com");
        data.push(0);
        data.push(3);
        data.extend_from_slice(b"lab");
        data.push(0);
        let mut tx = TxOptions::new();
        tx.append(OPT_DOMAIN_LIST, &data);
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        assert_eq!(rx.domains, vec!["example.com".to_string(), "lab".to_string()]);
    }

    #[test]
    fn test_lying_length_is_hard_error() {
        // Declared option length runs past the buffer.
        let buf = [0, 1, 0, 200, 1, 2, 3];
        assert!(matches!(
            RxOptions::parse(&buf),
            Err(DecodeError::Truncated(0))
        ));
    }

    #[test]
    fn test_short_ia_na_dropped_without_overread() {
        // IA_NA with declared length 4: under the 12-byte header.
        let mut tx = TxOptions::new();
        tx.append(OPT_IA_NA, &[0, 0, 0, 9]);
        tx.client_id(&Duid::from_mac(&[1, 2, 3, 4, 5, 6]));
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        assert!(rx.ia_na.is_none());
        assert_eq!(rx.malformed, 1);
        // Sibling options still decode.
        assert!(rx.client_id.is_some());
    }

    #[test]
    fn test_ia_t1_after_t2_silently_ignored() {
        let mut body = Vec::new();
        body.extend_from_slice(&9u32.to_be_bytes());
        body.extend_from_slice(&800u32.to_be_bytes()); // T1
        body.extend_from_slice(&500u32.to_be_bytes()); // T2 < T1
        let mut tx = TxOptions::new();
        tx.append(OPT_IA_NA, &body);
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        assert!(rx.ia_na.is_none());
        assert_eq!(rx.malformed, 0);
    }

    #[test]
    fn test_t1_t2_derived_from_preferred() {
        let mut tx = TxOptions::new();
        tx.ia_na(9, 0, 0, &[addr("2001:db8::10", 1000, 2000)]);
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        let ia = rx.ia_na.unwrap();
        assert_eq!(ia.t1, 500);
        assert_eq!(ia.t2, 800);

        let mut tx = TxOptions::new();
        tx.ia_na(
            9,
            0,
            0,
            &[addr("2001:db8::10", INFINITE_LIFETIME, INFINITE_LIFETIME)],
        );
        let ia = RxOptions::parse(&tx.finish()).unwrap().ia_na.unwrap();
        assert_eq!(ia.t1, INFINITE_LIFETIME);
        assert_eq!(ia.t2, INFINITE_LIFETIME);
    }

    #[test]
    fn test_zero_valid_lifetime_marks_invalid() {
        let mut tx = TxOptions::new();
        tx.ia_na(9, 100, 200, &[addr("2001:db8::10", 0, 0)]);
        let ia = RxOptions::parse(&tx.finish()).unwrap().ia_na.unwrap();
        assert_eq!(ia.addrs.len(), 1);
        assert_eq!(ia.addrs[0].addr_type, AddrType::Invalid);
    }

    #[test]
    fn test_valid_below_preferred_dropped() {
        let mut tx = TxOptions::new();
        tx.ia_na(9, 100, 200, &[addr("2001:db8::10", 2000, 1000)]);
        let ia = RxOptions::parse(&tx.finish()).unwrap().ia_na.unwrap();
        assert!(ia.addrs.is_empty());
    }

    #[test]
    fn test_iaaddr_status_marks_invalid() {
        // Hand-build an IA_NA whose IAADDR carries a NoBinding status.
        let target: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let mut iaaddr = Vec::new();
        iaaddr.extend_from_slice(&target.octets());
        iaaddr.extend_from_slice(&1000u32.to_be_bytes());
        iaaddr.extend_from_slice(&2000u32.to_be_bytes());
        iaaddr.extend_from_slice(&OPT_STATUS_CODE.to_be_bytes());
        iaaddr.extend_from_slice(&2u16.to_be_bytes());
        iaaddr.extend_from_slice(&STATUS_NO_BINDING.to_be_bytes());

        let mut body = Vec::new();
        body.extend_from_slice(&9u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&OPT_IAADDR.to_be_bytes());
        body.extend_from_slice(&(iaaddr.len() as u16).to_be_bytes());
        body.extend_from_slice(&iaaddr);

        let mut tx = TxOptions::new();
        tx.append(OPT_IA_NA, &body);
        let ia = RxOptions::parse(&tx.finish()).unwrap().ia_na.unwrap();
        assert_eq!(ia.addrs[0].addr_type, AddrType::Invalid);
    }

    #[test]
    fn test_unknown_options_skipped() {
        let mut tx = TxOptions::new();
        tx.append(999, &[1, 2, 3]);
        tx.elapsed_time(42);
        let rx = RxOptions::parse(&tx.finish());
        assert!(rx.is_ok());
    }

    #[test]
    fn test_status_code_decode() {
        let mut data = Vec::new();
        data.extend_from_slice(&STATUS_NOT_ON_LINK.to_be_bytes());
        data.extend_from_slice(b"wrong link");
        let mut tx = TxOptions::new();
        tx.append(OPT_STATUS_CODE, &data);
        let rx = RxOptions::parse(&tx.finish()).unwrap();
        let status = rx.status.unwrap();
        assert_eq!(status.code, STATUS_NOT_ON_LINK);
        assert_eq!(status.message, "wrong link");
    }
}
