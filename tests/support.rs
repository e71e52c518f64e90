//! Scripted in-memory NETCONF server used by the session tests.
//!
//! The server speaks real RFC 6242 framing over one half of a
//! `tokio::io::duplex` pair, performs the hello exchange (upgrading to
//! chunked framing when both sides advertise base:1.1), and then follows a
//! fixed behaviour script.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::io::{AsyncRead, DuplexStream};

use netman::protocol::frame::{FrameReader, FrameWriter, Framing};
use netman::protocol::message::{
    parse_message, Hello, MessageWriter, ServerMessage, BASE_NS, CAP_BASE_1_0, CAP_BASE_1_1,
    NOTIFICATION_NS,
};

/// How the server behaves after the hello exchange.
#[allow(dead_code)]
pub enum Mode {
    /// Reply to every rpc with `<data>` echoing the request body.
    Echo,
    /// Collect this many rpcs, then reply to them in reverse arrival order.
    ReverseBatch(usize),
    /// Reply `<ok/>` to the first rpc, then send this many notifications.
    NotifyBurst(usize),
    /// Reply to every rpc with an `<rpc-error>` of severity `error`.
    Fail,
    /// Read rpcs but never reply.
    Silent,
}

pub struct ServerConfig {
    pub capabilities: Vec<String>,
    pub session_id: u32,
    pub mode: Mode,
}

#[allow(dead_code)]
impl ServerConfig {
    pub fn base_1_1(mode: Mode) -> ServerConfig {
        ServerConfig {
            capabilities: vec![CAP_BASE_1_0.to_string(), CAP_BASE_1_1.to_string()],
            session_id: 4,
            mode,
        }
    }

    pub fn base_1_0(mode: Mode) -> ServerConfig {
        ServerConfig {
            capabilities: vec![CAP_BASE_1_0.to_string()],
            session_id: 4,
            mode,
        }
    }
}

/// One `<rpc>` received from the client.
pub struct RpcFrame {
    pub message_id: String,
    pub body: String,
}

/// Spawns the server; returns the client end of the transport and a counter
/// of rpcs the server has seen.
pub fn spawn(config: ServerConfig) -> (DuplexStream, Arc<AtomicUsize>) {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    tokio::spawn(async move {
        run(server_side, config, counter).await;
    });
    (client_side, seen)
}

async fn run(stream: DuplexStream, config: ServerConfig, seen: Arc<AtomicUsize>) {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half);
    let mut writer = MessageWriter::new(FrameWriter::new(write_half));

    let server_hello = Hello {
        capabilities: config.capabilities.clone(),
        session_id: Some(config.session_id),
    };
    let hello_xml = server_hello.to_xml().expect("serialize server hello");
    writer.write_message(&hello_xml).await.expect("send server hello");

    let Some(payload) = reader.next_message().await.expect("read client hello") else {
        return;
    };
    let client_hello = match parse_message(&payload).expect("parse client hello") {
        Some(ServerMessage::Hello(hello)) => hello,
        other => panic!("expected client hello, got {other:?}"),
    };

    if client_hello.has_capability(CAP_BASE_1_1) && server_hello.has_capability(CAP_BASE_1_1) {
        reader.set_framing(Framing::Chunked);
        writer.set_framing(Framing::Chunked);
    }

    match config.mode {
        Mode::Echo => loop {
            let Some(rpc) = next_rpc(&mut reader, &seen).await else {
                return;
            };
            let reply = reply_xml(&rpc.message_id, &format!("<data>{}</data>", rpc.body));
            writer.write_message(reply.as_bytes()).await.expect("send reply");
        },
        Mode::ReverseBatch(count) => {
            let mut batch = Vec::with_capacity(count);
            while batch.len() < count {
                let Some(rpc) = next_rpc(&mut reader, &seen).await else {
                    return;
                };
                batch.push(rpc);
            }
            for rpc in batch.iter().rev() {
                let reply = reply_xml(&rpc.message_id, &format!("<data>{}</data>", rpc.body));
                writer.write_message(reply.as_bytes()).await.expect("send reply");
            }
        }
        Mode::NotifyBurst(count) => {
            let Some(rpc) = next_rpc(&mut reader, &seen).await else {
                return;
            };
            let reply = reply_xml(&rpc.message_id, "<ok/>");
            writer.write_message(reply.as_bytes()).await.expect("send reply");
            for n in 0..count {
                let notification = format!(
                    r#"<notification xmlns="{NOTIFICATION_NS}"><eventTime>2024-02-01T00:00:{n:02}Z</eventTime><linkUp xmlns="urn:example:events"><seq>{n}</seq></linkUp></notification>"#
                );
                writer
                    .write_message(notification.as_bytes())
                    .await
                    .expect("send notification");
            }
            // Drain until the client hangs up.
            while next_rpc(&mut reader, &seen).await.is_some() {}
        }
        Mode::Fail => loop {
            let Some(rpc) = next_rpc(&mut reader, &seen).await else {
                return;
            };
            let inner = "<rpc-error>\
                 <error-type>application</error-type>\
                 <error-tag>operation-failed</error-tag>\
                 <error-severity>error</error-severity>\
                 <error-message>save failed</error-message>\
                 </rpc-error>";
            let reply = reply_xml(&rpc.message_id, inner);
            writer.write_message(reply.as_bytes()).await.expect("send reply");
        },
        Mode::Silent => while next_rpc(&mut reader, &seen).await.is_some() {},
    }
}

/// Reads frames until one parses as `<rpc>`; `None` once the client is gone.
async fn next_rpc<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    seen: &AtomicUsize,
) -> Option<RpcFrame> {
    loop {
        let payload = match reader.next_message().await {
            Ok(Some(payload)) => payload,
            Ok(None) | Err(_) => return None,
        };
        if let Some(rpc) = parse_rpc(&payload) {
            seen.fetch_add(1, Ordering::Relaxed);
            return Some(rpc);
        }
    }
}

fn parse_rpc(payload: &[u8]) -> Option<RpcFrame> {
    let mut reader = Reader::from_reader(payload);
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if e.local_name().as_ref() == b"rpc" => {
                let mut message_id = String::new();
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"message-id" {
                        message_id = String::from_utf8_lossy(&attr.value).into_owned();
                    }
                }
                let span = reader.read_to_end(e.name()).ok()?;
                let body =
                    String::from_utf8_lossy(&payload[span.start as usize..span.end as usize])
                        .into_owned();
                return Some(RpcFrame { message_id, body });
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}

fn reply_xml(message_id: &str, inner: &str) -> String {
    format!(r#"<rpc-reply xmlns="{BASE_NS}" message-id="{message_id}">{inner}</rpc-reply>"#)
}
