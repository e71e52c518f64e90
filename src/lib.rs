//! Netman - NETCONF and SNMP clients for network device management in Rust.
//!
//! This library speaks two management-plane protocols:
//!
//! - NETCONF (RFC 6241) over the SSH `netconf` subsystem (RFC 6242),
//!   including chunked framing, asynchronous RPC multiplexing and
//!   notification subscription (RFC 5277), plus schema retrieval (RFC 6022).
//! - SNMP v2c over UDP: Get/GetNext/GetBulk with retries, subtree walks,
//!   and a trap/inform receiver.
//!
//! ## Main Components
//!
//! - `session`: the NETCONF session. One transport, one receive task, and
//!   concurrent RPC submission with FIFO reply correlation.
//!
//! - `protocol`: NETCONF internals: RFC 6242 framing, the XML message
//!   codec, and typed builders for the base operations.
//!
//! - `ssh`: transport adapter that dials an SSH server and opens the
//!   `netconf` subsystem as a byte stream.
//!
//! - `snmp`: the SNMP subsystem: BER codec, PDU structures, UDP session
//!   and trap server.
//!
//! - `trace`: optional structured callbacks for connection lifecycle,
//!   byte-level I/O, RPC timing and notification drops.
//!
//! ## Usage
//!
//! Dial with [`ssh::connect`] (or hand any `AsyncRead + AsyncWrite`
//! transport to [`session::Session::open`]), then issue operations through
//! the session methods or raw XML via [`session::Session::execute`].

pub mod error;
pub mod protocol;
pub mod session;
pub mod snmp;
pub mod ssh;
pub mod trace;

pub use error::{Error, FrameError, SnmpError};
pub use protocol::message::{Hello, Notification, RpcError, RpcReply, Severity};
pub use protocol::ops::{
    ConfigTarget, Datastore, EditConfig, EditSource, Filter, Request, Schema,
};
pub use session::{ClientConfig, Session};
pub use trace::Trace;
