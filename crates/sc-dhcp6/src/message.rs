//! DHCPv6 message types, header codec, and the per-message retransmission
//! constants from RFC 3315 §5.5.

use serde::Serialize;
use std::fmt;
use std::net::Ipv6Addr;

/// All_DHCP_Relay_Agents_and_Servers (RFC 3315 §5.1).
pub const ALL_DHCP_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

pub const CLIENT_PORT: u16 = 546;
pub const SERVER_PORT: u16 = 547;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<MessageType> {
        Some(match v {
            1 => MessageType::Solicit,
            2 => MessageType::Advertise,
            3 => MessageType::Request,
            4 => MessageType::Confirm,
            5 => MessageType::Renew,
            6 => MessageType::Rebind,
            7 => MessageType::Reply,
            8 => MessageType::Release,
            9 => MessageType::Decline,
            10 => MessageType::Reconfigure,
            11 => MessageType::InformationRequest,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Solicit => "SOLICIT",
            MessageType::Advertise => "ADVERTISE",
            MessageType::Request => "REQUEST",
            MessageType::Confirm => "CONFIRM",
            MessageType::Renew => "RENEW",
            MessageType::Rebind => "REBIND",
            MessageType::Reply => "REPLY",
            MessageType::Release => "RELEASE",
            MessageType::Decline => "DECLINE",
            MessageType::Reconfigure => "RECONFIGURE",
            MessageType::InformationRequest => "INFORMATION-REQUEST",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Client state: idle, or the message type currently being exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientState {
    Init,
    Solicit,
    Request,
    Confirm,
    Renew,
    Rebind,
    Release,
    Decline,
    InformationRequest,
}

impl ClientState {
    /// The outbound message type for this state, if any.
    pub fn message_type(&self) -> Option<MessageType> {
        Some(match self {
            ClientState::Init => return None,
            ClientState::Solicit => MessageType::Solicit,
            ClientState::Request => MessageType::Request,
            ClientState::Confirm => MessageType::Confirm,
            ClientState::Renew => MessageType::Renew,
            ClientState::Rebind => MessageType::Rebind,
            ClientState::Release => MessageType::Release,
            ClientState::Decline => MessageType::Decline,
            ClientState::InformationRequest => MessageType::InformationRequest,
        })
    }

    /// Retransmission constants for this state's exchange.
    pub fn rxmit_params(&self) -> Option<RxmitParams> {
        let msg = self.message_type()?;
        Some(rxmit_params(msg))
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_type() {
            Some(msg) => f.write_str(msg.name()),
            None => f.write_str("INIT"),
        }
    }
}

/// Retransmission timing constants for one message type (RFC 3315 §5.5).
/// Zero means "not applicable" throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxmitParams {
    /// Max random delay before the first transmission.
    pub max_delay_ms: u64,
    /// Initial retransmission time.
    pub irt_ms: u64,
    /// Max retransmission time (cap on the doubled RT).
    pub mrt_ms: u64,
    /// Max retransmission count.
    pub mrc: u32,
    /// Max retransmission duration.
    pub mrd_ms: u64,
}

pub const fn rxmit_params(msg: MessageType) -> RxmitParams {
    match msg {
        MessageType::Solicit => RxmitParams {
            max_delay_ms: 1000,
            irt_ms: 1000,
            mrt_ms: 120_000,
            mrc: 0,
            mrd_ms: 0,
        },
        MessageType::Request => RxmitParams {
            max_delay_ms: 0,
            irt_ms: 1000,
            mrt_ms: 30_000,
            mrc: 10,
            mrd_ms: 0,
        },
        MessageType::Confirm => RxmitParams {
            max_delay_ms: 1000,
            irt_ms: 1000,
            mrt_ms: 4000,
            mrc: 0,
            mrd_ms: 10_000,
        },
        // RENEW/REBIND MRD is dynamic (until T2 / until the valid lifetime
        // expires) and is set per exchange.
        MessageType::Renew => RxmitParams {
            max_delay_ms: 0,
            irt_ms: 10_000,
            mrt_ms: 600_000,
            mrc: 0,
            mrd_ms: 0,
        },
        MessageType::Rebind => RxmitParams {
            max_delay_ms: 0,
            irt_ms: 10_000,
            mrt_ms: 600_000,
            mrc: 0,
            mrd_ms: 0,
        },
        MessageType::Release => RxmitParams {
            max_delay_ms: 0,
            irt_ms: 1000,
            mrt_ms: 0,
            mrc: 5,
            mrd_ms: 0,
        },
        MessageType::Decline => RxmitParams {
            max_delay_ms: 0,
            irt_ms: 1000,
            mrt_ms: 0,
            mrc: 5,
            mrd_ms: 0,
        },
        MessageType::InformationRequest => RxmitParams {
            max_delay_ms: 1000,
            irt_ms: 1000,
            mrt_ms: 120_000,
            mrc: 0,
            mrd_ms: 0,
        },
        // Server-originated; a client never retransmits these.
        MessageType::Advertise | MessageType::Reply | MessageType::Reconfigure => RxmitParams {
            max_delay_ms: 0,
            irt_ms: 0,
            mrt_ms: 0,
            mrc: 0,
            mrd_ms: 0,
        },
    }
}

/// Split a raw DHCPv6 datagram into message type, 24-bit transaction id,
/// and the option bytes.
pub fn parse_header(data: &[u8]) -> Option<(MessageType, u32, &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let msg = MessageType::from_u8(data[0])?;
    let xid = u32::from_be_bytes([0, data[1], data[2], data[3]]);
    Some((msg, xid, &data[4..]))
}

/// Build the 4-byte message header.
pub fn build_header(msg: MessageType, xid: u32) -> [u8; 4] {
    let x = xid.to_be_bytes();
    [msg as u8, x[1], x[2], x[3]]
}
