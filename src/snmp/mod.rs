//! SNMP v2c subsystem: BER codec, message structures, client session and
//! trap/inform receiver.
//!
//! The layering mirrors the NETCONF side of the crate: `ber` is the raw
//! tag/length/value codec, `pdu` builds the SNMP message structures on top
//! of it, and `session`/`server` own the sockets.

pub mod ber;
pub mod pdu;
pub mod server;
pub mod session;

pub use pdu::{Oid, Packet, Pdu, PduType, Value, Varbind};
pub use server::{TrapHandler, TrapServer};
pub use session::{SnmpConfig, SnmpSession, Version};
