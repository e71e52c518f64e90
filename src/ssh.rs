//! SSH transport adapter for the NETCONF client.
//!
//! NETCONF runs over an SSH subsystem named `netconf` (RFC 6242 section 3).
//! This module dials an SSH server, authenticates, requests that subsystem
//! on a session channel, and exposes the channel as a single byte-stream
//! handle the session layer can own. Key exchange, ciphers and
//! authentication mechanics are delegated entirely to [`russh`].

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use russh::client;
use russh_keys::key;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::error::Error;
use crate::session::{ClientConfig, Session};
use crate::trace::Trace;

/// SSH subsystem name assigned to NETCONF.
pub const SUBSYSTEM: &str = "netconf";

/// Credentials used to authenticate the SSH user.
#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Where and how to dial the NETCONF server.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target in `host:port` form; NETCONF-over-SSH servers conventionally
    /// listen on port 830.
    pub addr: String,
    pub username: String,
    pub auth: SshAuth,
}

/// Host-key policy used by the dialer: accept whatever the server presents.
///
/// Device labs and test benches rotate host keys constantly; callers that
/// need pinning should dial with their own russh handler and pass the
/// resulting stream to [`Session::open`] directly.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An open `netconf` subsystem channel.
///
/// Keeps the SSH client handle alive for as long as the stream is in use;
/// dropping the transport tears down the SSH connection.
pub struct SshTransport {
    _handle: client::Handle<AcceptingHandler>,
    stream: russh::ChannelStream<client::Msg>,
}

impl AsyncRead for SshTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SshTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Dials the server and opens the `netconf` subsystem.
pub async fn dial(config: &SshConfig) -> Result<SshTransport, Error> {
    dial_with_trace(config, Arc::new(Trace::default())).await
}

/// [`dial`] with trace hooks installed.
pub async fn dial_with_trace(
    config: &SshConfig,
    trace: Arc<Trace>,
) -> Result<SshTransport, Error> {
    let started = Instant::now();
    trace.on_dial_start(&config.addr);

    let ssh_config = Arc::new(client::Config::default());
    let mut handle =
        client::connect(ssh_config, config.addr.as_str(), AcceptingHandler).await?;

    let authenticated = match &config.auth {
        SshAuth::Password(password) => {
            handle
                .authenticate_password(&config.username, password)
                .await?
        }
        SshAuth::KeyFile { path, passphrase } => {
            let key = russh_keys::load_secret_key(path, passphrase.as_deref())
                .map_err(|e| Error::SshKey(e.to_string()))?;
            handle
                .authenticate_publickey(&config.username, Arc::new(key))
                .await?
        }
    };
    if !authenticated {
        trace.on_error("dial", &Error::AuthFailed);
        return Err(Error::AuthFailed);
    }

    let channel = handle.channel_open_session().await?;
    channel.request_subsystem(true, SUBSYSTEM).await?;
    debug!("opened {SUBSYSTEM} subsystem to {}", config.addr);
    trace.on_dial_done(&config.addr, started.elapsed());

    Ok(SshTransport {
        _handle: handle,
        stream: channel.into_stream(),
    })
}

/// Dials the server and opens a NETCONF session in one step.
pub async fn connect(ssh: &SshConfig, config: ClientConfig) -> Result<Session, Error> {
    connect_with_trace(ssh, config, Arc::new(Trace::default())).await
}

/// [`connect`] with trace hooks installed.
pub async fn connect_with_trace(
    ssh: &SshConfig,
    config: ClientConfig,
    trace: Arc<Trace>,
) -> Result<Session, Error> {
    let transport = dial_with_trace(ssh, trace.clone()).await?;
    let started = Instant::now();
    trace.on_connect_start(&ssh.addr);
    let session = Session::open_with_trace(transport, config, trace.clone()).await?;
    trace.on_connect_done(&ssh.addr, started.elapsed());
    Ok(session)
}
