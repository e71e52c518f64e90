//! NETCONF message layer: the XML documents exchanged inside frames.
//!
//! Each logical message is one XML document: the declaration, then a single
//! top-level element. The client sends `<hello>` and `<rpc>`; the server
//! sends `<hello>`, `<rpc-reply>` and `<notification>`. This module defines
//! those message types, serializes outgoing ones through [`quick_xml`], and
//! recognises incoming ones by the resolved namespace and local name of the
//! first start element. Payload fragments the protocol treats as opaque
//! (reply data, error info, notification events) are preserved verbatim.

use std::fmt;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::error::{Error, FrameError};
use crate::protocol::frame::{FrameReader, FrameWriter, Framing};

/// Namespace of `hello`, `rpc` and `rpc-reply` (RFC 6241).
pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Namespace of `notification` (RFC 5277).
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// Namespace of `get-schema` and the schema listing (RFC 6022).
pub const MONITORING_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";

/// Capability URI for NETCONF 1.0.
pub const CAP_BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";

/// Capability URI for NETCONF 1.1 (chunked framing).
pub const CAP_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// Capability URI for xpath filtering.
pub const CAP_XPATH: &str = "urn:ietf:params:netconf:capability:xpath:1.0";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Maps any XML-layer failure into [`Error::Xml`].
fn xml_err(err: impl fmt::Display) -> Error {
    Error::Xml(err.to_string())
}

/// Capability advertisement exchanged at session start.
///
/// The session-id is present only in the hello sent by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hello {
    pub capabilities: Vec<String>,
    pub session_id: Option<u32>,
}

impl Hello {
    /// Builds the client-side hello carrying the given capability URIs.
    pub fn client(capabilities: Vec<String>) -> Hello {
        Hello { capabilities, session_id: None }
    }

    /// True when the given capability URI was advertised.
    pub fn has_capability(&self, uri: &str) -> bool {
        self.capabilities.iter().any(|c| c == uri)
    }

    /// Serializes the hello element.
    pub fn to_xml(&self) -> Result<Vec<u8>, Error> {
        let mut writer = Writer::new(Vec::new());
        let mut root = BytesStart::new("hello");
        root.push_attribute(("xmlns", BASE_NS));
        writer.write_event(Event::Start(root)).map_err(xml_err)?;
        writer
            .write_event(Event::Start(BytesStart::new("capabilities")))
            .map_err(xml_err)?;
        for capability in &self.capabilities {
            writer
                .write_event(Event::Start(BytesStart::new("capability")))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(capability)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("capability")))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("capabilities")))
            .map_err(xml_err)?;
        if let Some(id) = self.session_id {
            writer
                .write_event(Event::Start(BytesStart::new("session-id")))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(&id.to_string())))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("session-id")))
                .map_err(xml_err)?;
        }
        writer.write_event(Event::End(BytesEnd::new("hello"))).map_err(xml_err)?;
        Ok(writer.into_inner())
    }
}

/// An outgoing `<rpc>` envelope.
///
/// The body is an opaque XML fragment produced by the operations layer (or
/// handed in raw by the caller); it is written verbatim inside the envelope.
#[derive(Debug, Clone)]
pub struct Rpc {
    pub message_id: String,
    pub body: String,
}

impl Rpc {
    /// Wraps a body fragment with a fresh UUID v4 message-id.
    pub fn new(body: impl Into<String>) -> Rpc {
        Rpc {
            message_id: Uuid::new_v4().to_string(),
            body: body.into(),
        }
    }

    /// Serializes the rpc element.
    pub fn to_xml(&self) -> Result<Vec<u8>, Error> {
        let mut writer = Writer::new(Vec::new());
        let mut root = BytesStart::new("rpc");
        root.push_attribute(("xmlns", BASE_NS));
        root.push_attribute(("message-id", self.message_id.as_str()));
        writer.write_event(Event::Start(root)).map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::from_escaped(self.body.as_str())))
            .map_err(xml_err)?;
        writer.write_event(Event::End(BytesEnd::new("rpc"))).map_err(xml_err)?;
        Ok(writer.into_inner())
    }
}

/// Severity carried by an `<rpc-error>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A decoded `<rpc-error>` element.
///
/// Only errors with [`Severity::Error`] are surfaced as call failures;
/// warnings stay in the reply for the caller to inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcError {
    pub error_type: String,
    pub tag: String,
    pub severity: Severity,
    pub path: String,
    pub message: String,
    /// Verbatim inner XML of `<error-info>`.
    pub info: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "netconf rpc [{}] '{}'", self.severity, self.message)
    }
}

impl std::error::Error for RpcError {}

/// A decoded `<rpc-reply>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcReply {
    /// Echo of the request message-id, when the server provided one.
    pub message_id: Option<String>,
    /// True when the reply carried `<ok/>`.
    pub ok: bool,
    pub errors: Vec<RpcError>,
    /// Verbatim inner XML of the `<data>` child, when present.
    pub data: Option<String>,
}

impl RpcReply {
    /// First error with severity `error`, if any.
    pub fn first_error(&self) -> Option<&RpcError> {
        self.errors.iter().find(|e| e.severity == Severity::Error)
    }
}

/// A decoded `<notification>` element (RFC 5277).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_time: String,
    /// The event element rebuilt as a self-contained fragment
    /// `<local xmlns="namespace">…</local>`.
    pub event: String,
}

/// One decoded server-to-client message.
#[derive(Debug)]
pub enum ServerMessage {
    Hello(Hello),
    Reply(RpcReply),
    Notification(Notification),
    /// A top-level element the session does not recognise; carries the local
    /// name for logging.
    Unknown(String),
}

/// Parses one message payload into a [`ServerMessage`].
///
/// Returns `Ok(None)` when the payload holds no element at all (an empty
/// frame between delimiters).
pub fn parse_message(input: &[u8]) -> Result<Option<ServerMessage>, Error> {
    let mut reader = NsReader::from_reader(input);
    loop {
        let (resolve, event) = reader.read_resolved_event().map_err(xml_err)?;
        let ns = resolved_namespace(&resolve);
        match event {
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                return match (ns.as_str(), local.as_slice()) {
                    (BASE_NS, b"hello") => {
                        Ok(Some(ServerMessage::Hello(parse_hello(&mut reader)?)))
                    }
                    (BASE_NS, b"rpc-reply") => Ok(Some(ServerMessage::Reply(parse_reply(
                        &mut reader,
                        input,
                        &e,
                    )?))),
                    (NOTIFICATION_NS, b"notification") => Ok(Some(
                        ServerMessage::Notification(parse_notification(&mut reader, input)?),
                    )),
                    _ => Ok(Some(ServerMessage::Unknown(
                        String::from_utf8_lossy(&local).into_owned(),
                    ))),
                };
            }
            Event::Empty(e) => {
                return Ok(Some(ServerMessage::Unknown(
                    String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                )))
            }
            Event::Eof => return Ok(None),
            // Declaration, whitespace, comments, processing instructions.
            _ => {}
        }
    }
}

fn resolved_namespace(resolve: &ResolveResult) -> String {
    match resolve {
        ResolveResult::Bound(Namespace(ns)) => String::from_utf8_lossy(ns).into_owned(),
        _ => String::new(),
    }
}

fn parse_hello(reader: &mut NsReader<&[u8]>) -> Result<Hello, Error> {
    let mut hello = Hello::default();
    let mut in_field = false;
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                if matches!(e.local_name().as_ref(), b"capability" | b"session-id") {
                    in_field = true;
                    text.clear();
                }
            }
            Event::Text(t) => {
                if in_field {
                    text.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"capability" => {
                    hello.capabilities.push(text.trim().to_string());
                    in_field = false;
                }
                b"session-id" => {
                    // RFC 6241 section 8.1: an unsigned 32-bit value.
                    let id = text.trim().parse::<u32>().map_err(|_| {
                        Error::Xml(format!("invalid session-id '{}'", text.trim()))
                    })?;
                    hello.session_id = Some(id);
                    in_field = false;
                }
                b"hello" => return Ok(hello),
                _ => {}
            },
            Event::Eof => return Err(Error::Xml("truncated hello".into())),
            _ => {}
        }
    }
}

fn parse_reply(
    reader: &mut NsReader<&[u8]>,
    input: &[u8],
    start: &BytesStart,
) -> Result<RpcReply, Error> {
    let mut reply = RpcReply::default();
    for attr in start.attributes().with_checks(false) {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() == b"message-id" {
            reply.message_id = Some(attr.unescape_value().map_err(xml_err)?.into_owned());
        }
    }
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"data" => {
                    let span = reader.read_to_end(e.name()).map_err(xml_err)?;
                    let inner = &input[span.start as usize..span.end as usize];
                    reply.data = Some(String::from_utf8_lossy(inner).into_owned());
                }
                b"rpc-error" => reply.errors.push(parse_rpc_error(reader, input)?),
                b"ok" => {
                    reply.ok = true;
                    reader.read_to_end(e.name()).map_err(xml_err)?;
                }
                _ => {
                    reader.read_to_end(e.name()).map_err(xml_err)?;
                }
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"ok" => reply.ok = true,
                b"data" => reply.data = Some(String::new()),
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"rpc-reply" => return Ok(reply),
            Event::Eof => return Err(Error::Xml("truncated rpc-reply".into())),
            _ => {}
        }
    }
}

fn parse_rpc_error(reader: &mut NsReader<&[u8]>, input: &[u8]) -> Result<RpcError, Error> {
    let mut error = RpcError::default();
    let mut field: Option<Vec<u8>> = None;
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                name @ (b"error-type" | b"error-tag" | b"error-severity" | b"error-path"
                | b"error-message") => {
                    field = Some(name.to_vec());
                    text.clear();
                }
                b"error-info" => {
                    let span = reader.read_to_end(e.name()).map_err(xml_err)?;
                    let inner = &input[span.start as usize..span.end as usize];
                    error.info = String::from_utf8_lossy(inner).into_owned();
                }
                _ => {
                    reader.read_to_end(e.name()).map_err(xml_err)?;
                }
            },
            Event::Text(t) => {
                if field.is_some() {
                    text.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"rpc-error" {
                    return Ok(error);
                }
                if let Some(name) = field.take() {
                    let value = text.trim().to_string();
                    match name.as_slice() {
                        b"error-type" => error.error_type = value,
                        b"error-tag" => error.tag = value,
                        b"error-severity" => {
                            error.severity = if value == "warning" {
                                Severity::Warning
                            } else {
                                Severity::Error
                            };
                        }
                        b"error-path" => error.path = value,
                        b"error-message" => error.message = value,
                        _ => {}
                    }
                }
            }
            Event::Eof => return Err(Error::Xml("truncated rpc-error".into())),
            _ => {}
        }
    }
}

fn parse_notification(
    reader: &mut NsReader<&[u8]>,
    input: &[u8],
) -> Result<Notification, Error> {
    let mut event_time = String::new();
    let mut event = None;
    let mut in_time = false;
    loop {
        let (resolve, ev) = reader.read_resolved_event().map_err(xml_err)?;
        let ns = resolved_namespace(&resolve);
        match ev {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"eventTime" {
                    in_time = true;
                    event_time.clear();
                } else {
                    // The event element is preserved verbatim but rebuilt as a
                    // self-contained fragment carrying its namespace.
                    let local =
                        String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    let span = reader.read_to_end(e.name()).map_err(xml_err)?;
                    let inner = &input[span.start as usize..span.end as usize];
                    event = Some(format!(
                        "<{local} xmlns=\"{ns}\">{}</{local}>",
                        String::from_utf8_lossy(inner)
                    ));
                }
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() != b"eventTime" {
                    let local =
                        String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    event = Some(format!("<{local} xmlns=\"{ns}\"/>"));
                }
            }
            Event::Text(t) => {
                if in_time {
                    event_time.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"eventTime" => in_time = false,
                b"notification" => {
                    let event = event
                        .ok_or_else(|| Error::Xml("notification without event".into()))?;
                    return Ok(Notification {
                        event_time: event_time.trim().to_string(),
                        event,
                    });
                }
                _ => {}
            },
            Event::Eof => return Err(Error::Xml("truncated notification".into())),
            _ => {}
        }
    }
}

/// Decoder half of the message codec: frames in, parsed messages out.
pub struct MessageReader<R> {
    frames: FrameReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(frames: FrameReader<R>) -> Self {
        MessageReader { frames }
    }

    /// Forwards a framing-mode switch to the decoder.
    pub fn set_framing(&mut self, framing: Framing) {
        self.frames.set_framing(framing);
    }

    /// Decodes the next message, skipping empty frames.
    ///
    /// Returns `Ok(None)` on clean EOF.
    pub async fn next(&mut self) -> Result<Option<ServerMessage>, Error> {
        loop {
            let Some(payload) = self.frames.next_message().await? else {
                return Ok(None);
            };
            if let Some(message) = parse_message(&payload)? {
                return Ok(Some(message));
            }
        }
    }
}

/// Encoder half of the message codec.
///
/// Each logical message is the XML declaration, the element bytes, then the
/// framing end-of-message marker.
pub struct MessageWriter<W> {
    frames: FrameWriter<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(frames: FrameWriter<W>) -> Self {
        MessageWriter { frames }
    }

    /// Forwards a framing-mode switch to the encoder.
    pub fn set_framing(&mut self, framing: Framing) {
        self.frames.set_framing(framing);
    }

    /// Writes one logical message.
    pub async fn write_message(&mut self, element: &[u8]) -> Result<(), Error> {
        self.frames
            .write_all(XML_DECL.as_bytes())
            .await
            .map_err(FrameError::from)?;
        self.frames.write_all(element).await.map_err(FrameError::from)?;
        self.frames.end_of_message().await.map_err(FrameError::from)?;
        Ok(())
    }

    /// Shuts down the transport write half.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.frames.shutdown().await.map_err(FrameError::from)?;
        Ok(())
    }
}
