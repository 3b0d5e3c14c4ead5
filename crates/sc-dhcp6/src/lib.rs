pub mod client;
pub mod config;
pub mod duid;
pub mod interface;
pub mod message;
pub mod options;
pub mod rxmit;
pub mod server;
pub mod service;
pub mod store;

pub use client::{Dhcp6Client, IpStack, Transport};
pub use config::{Dhcp6Config, InterfaceConfig};
pub use duid::Duid;
pub use interface::{AddrInfo, AddrType, Counters, InterfaceStatus};
pub use message::{ClientState, MessageType, ALL_DHCP_SERVERS, CLIENT_PORT, SERVER_PORT};
pub use store::StoreError;

use std::sync::Arc;

pub type SharedDhcp6Client = Arc<Dhcp6Client>;
