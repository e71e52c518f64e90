//! Error taxonomy for the NETCONF and SNMP subsystems.
//!
//! Framing and transport errors are fatal to a NETCONF session: the only
//! recovery is to close it and build a new one. RPC-level errors are returned
//! to the caller that submitted the request. SNMP timeouts are retried inside
//! the session up to the configured budget before surfacing.

use crate::protocol::message::RpcError;

/// Errors raised by the RFC 6242 framing codec.
///
/// All variants except [`FrameError::Io`] indicate a malformed byte stream;
/// none of them are recoverable on the same session.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A chunk did not start with the `\n#` introducer.
    #[error("invalid chunk header")]
    InvalidChunkHeader,

    /// A chunk size exceeded 4,294,967,295 bytes.
    #[error("chunk size larger than maximum")]
    ChunkSizeTooLarge,

    /// The chunk-size field was empty, zero, or not a decimal number.
    #[error("no valid chunk-size detected")]
    InvalidChunkSize,

    /// The chunk-size field ran past its maximum serialized width.
    #[error("token too long")]
    TokenTooLong,

    /// The transport ended in the middle of a message.
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// The underlying transport failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error type of the NETCONF client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The framed byte stream was malformed or the transport failed mid-frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A message payload could not be parsed or serialized as XML.
    #[error("malformed xml: {0}")]
    Xml(String),

    /// The server did not send its `<hello>` within the setup timeout.
    #[error("failed to get hello from server")]
    HelloTimeout,

    /// The server reported an `<rpc-error>` with severity `error`.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The session terminated before the outstanding reply arrived.
    #[error("unexpected EOF")]
    SessionClosed,

    /// SSH transport failure while dialing or running the subsystem.
    #[error(transparent)]
    Ssh(#[from] russh::Error),

    /// SSH authentication was rejected by the server.
    #[error("ssh authentication failed")]
    AuthFailed,

    /// A private key file could not be loaded or decrypted.
    #[error("ssh key: {0}")]
    SshKey(String),

    /// Plain I/O failure outside the framing codec.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the SNMP session and trap server.
#[derive(Debug, thiserror::Error)]
pub enum SnmpError {
    /// A datagram could not be decoded as BER.
    #[error("asn1: syntax error: {0}")]
    Asn1(String),

    /// No response arrived within the retry budget.
    #[error("request timed out")]
    Timeout,

    /// A decoded packet had an unexpected shape (wrong PDU type, missing
    /// fields, trailing garbage).
    #[error("unexpected packet: {0}")]
    Packet(String),

    /// A walk callback asked to abort the walk.
    #[error("walk aborted: {0}")]
    Walk(Box<dyn std::error::Error + Send + Sync>),

    /// Socket-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shorthand for building an [`SnmpError::Asn1`] out of a message.
pub(crate) fn syntax_error(msg: impl Into<String>) -> SnmpError {
    SnmpError::Asn1(msg.into())
}
