//! DUID codec (RFC 3315 §9).
//!
//! A `Duid` is the normalized, host-order form of a DHCP Unique Identifier.
//! All network/host byte-order conversion for DUIDs happens here; the rest
//! of the engine compares and stores only the logical value, so equality is
//! symmetric and independent of the wire representation.

use std::fmt;

pub const DUID_TYPE_LLT: u16 = 1;
pub const DUID_TYPE_EN: u16 = 2;
pub const DUID_TYPE_LL: u16 = 3;

/// Longest DUID accepted on the wire (RFC 3315 §9.1: 128 octets + type).
const MAX_DUID_LEN: usize = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Duid {
    /// DUID-LLT: link-layer address plus time.
    LinkLayerTime { hw_type: u16, time: u32, addr: Vec<u8> },
    /// DUID-EN: enterprise number plus opaque identifier.
    Enterprise { number: u32, id: Vec<u8> },
    /// DUID-LL: link-layer address only.
    LinkLayer { hw_type: u16, addr: Vec<u8> },
}

impl Duid {
    /// DUID-LL over an Ethernet MAC, the form this client generates for
    /// itself (hardware type 1).
    pub fn from_mac(mac: &[u8; 6]) -> Self {
        Duid::LinkLayer {
            hw_type: 1,
            addr: mac.to_vec(),
        }
    }

    /// Parse a wire-format (network byte order) DUID. Unknown type fields
    /// and truncated buffers yield `None`; an unparseable DUID can never
    /// compare equal to anything.
    pub fn parse(buf: &[u8]) -> Option<Duid> {
        if buf.len() < 2 || buf.len() > MAX_DUID_LEN {
            return None;
        }
        let duid_type = u16::from_be_bytes([buf[0], buf[1]]);
        match duid_type {
            DUID_TYPE_LLT => {
                if buf.len() < 9 {
                    return None;
                }
                Some(Duid::LinkLayerTime {
                    hw_type: u16::from_be_bytes([buf[2], buf[3]]),
                    time: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
                    addr: buf[8..].to_vec(),
                })
            }
            DUID_TYPE_EN => {
                if buf.len() < 6 {
                    return None;
                }
                Some(Duid::Enterprise {
                    number: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
                    id: buf[6..].to_vec(),
                })
            }
            DUID_TYPE_LL => {
                if buf.len() < 5 {
                    return None;
                }
                Some(Duid::LinkLayer {
                    hw_type: u16::from_be_bytes([buf[2], buf[3]]),
                    addr: buf[4..].to_vec(),
                })
            }
            _ => None,
        }
    }

    /// Serialize to wire format (network byte order).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        match self {
            Duid::LinkLayerTime { hw_type, time, addr } => {
                buf.extend_from_slice(&DUID_TYPE_LLT.to_be_bytes());
                buf.extend_from_slice(&hw_type.to_be_bytes());
                buf.extend_from_slice(&time.to_be_bytes());
                buf.extend_from_slice(addr);
            }
            Duid::Enterprise { number, id } => {
                buf.extend_from_slice(&DUID_TYPE_EN.to_be_bytes());
                buf.extend_from_slice(&number.to_be_bytes());
                buf.extend_from_slice(id);
            }
            Duid::LinkLayer { hw_type, addr } => {
                buf.extend_from_slice(&DUID_TYPE_LL.to_be_bytes());
                buf.extend_from_slice(&hw_type.to_be_bytes());
                buf.extend_from_slice(addr);
            }
        }
        buf
    }
}

impl fmt::Display for Duid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.to_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
