//! Protocol module implements the NETCONF protocol internals.
//!
//! This module contains three layers, composed bottom-up by the session:
//!
//! - `frame`: RFC 6242 message framing (end-of-message and chunked layouts),
//!   including the mid-stream transition performed after capability exchange.
//!
//! - `message`: the XML messages carried inside frames (`hello`, `rpc`,
//!   `rpc-reply` and `notification`), with their serialization and
//!   namespace-aware recognition.
//!
//! - `ops`: typed builders for the base operations of RFC 6241 and the
//!   schema retrieval operations of RFC 6022.

pub mod frame;
pub mod message;
pub mod ops;
