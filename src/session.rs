//! NETCONF session layer: a bidirectional RPC multiplexer over one framed
//! transport.
//!
//! A session owns one transport, one codec pair, and one dedicated receive
//! task that is the sole reader of the decoder. Requests may be submitted
//! concurrently from any number of tasks; a write lock serialises the
//! (enqueue reply sink, encode) critical section so the on-wire order and
//! the sink-queue order always agree. Replies are correlated by FIFO order,
//! as RFC 6241 section 4.2 requires of a single session, and handed to each
//! waiting sink on a short-lived task so one slow consumer cannot stall the
//! receive loop. Notifications (RFC 5277) are fanned out to an optional
//! subscriber sink without blocking: a sink that cannot accept immediately
//! loses the notification, which is counted and traced but never queued.
//!
//! Closing the session, explicitly or implicitly through any decode or
//! transport error, drops every outstanding sink, which unblocks every
//! waiting caller with [`Error::SessionClosed`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::protocol::frame::{
    FrameReader, FrameWriter, Framing, DEFAULT_READ_BUFFER, MAX_CHUNK_SIZE,
};
use crate::protocol::message::{
    Hello, MessageReader, MessageWriter, Notification, Rpc, RpcReply, ServerMessage,
    CAP_BASE_1_0, CAP_BASE_1_1, CAP_XPATH,
};
use crate::protocol::ops::{
    self, ConfigTarget, Datastore, EditConfig, Filter, Request, Schema,
};
use crate::trace::Trace;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type ReplySink = mpsc::Sender<RpcReply>;

/// NETCONF client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the server `<hello>` during setup.
    pub hello_timeout: Duration,
    /// Omit `base:1.1` from the advertised capabilities, pinning the session
    /// to end-of-message framing.
    pub disable_chunked_framing: bool,
    /// Transport read-buffer size used by the framing decoder.
    pub read_buffer_size: usize,
    /// Largest chunk the framing encoder will emit.
    pub max_chunk_size: u64,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            hello_timeout: Duration::from_secs(5),
            disable_chunked_framing: false,
            read_buffer_size: DEFAULT_READ_BUFFER,
            max_chunk_size: MAX_CHUNK_SIZE,
        }
    }
}

/// State shared between the session handle and its receive task.
struct Shared {
    /// Reply sinks in request-submission order.
    pending: StdMutex<VecDeque<ReplySink>>,
    /// Sink installed by [`Session::subscribe`].
    notify: StdMutex<Option<mpsc::Sender<Notification>>>,
    dropped_notifications: AtomicU64,
    trace: Arc<Trace>,
}

impl Shared {
    /// Drops every outstanding sink so blocked callers observe closure.
    fn release_all(&self) {
        self.pending.lock().expect("pending sinks mutex").clear();
        *self.notify.lock().expect("notification sink mutex") = None;
    }
}

/// A live NETCONF session.
///
/// Cheap accessors run on the handle; request submission is safe from any
/// number of tasks concurrently. Dropping the session closes the transport.
pub struct Session {
    writer: Mutex<MessageWriter<BoxedWriter>>,
    shared: Arc<Shared>,
    server_hello: Hello,
    closed: AtomicBool,
    close_tx: StdMutex<Option<oneshot::Sender<()>>>,
    done_rx: StdMutex<Option<oneshot::Receiver<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Session {
    /// Opens a session over an established transport.
    ///
    /// Sends the client `<hello>`, starts the receive task, waits for the
    /// server hello (bounded by [`ClientConfig::hello_timeout`]), and
    /// switches both codec halves to chunked framing when both peers
    /// advertise `base:1.1`.
    pub async fn open<T>(transport: T, config: ClientConfig) -> Result<Session, Error>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Session::open_with_trace(transport, config, Arc::new(Trace::default())).await
    }

    /// [`Session::open`] with trace hooks installed.
    pub async fn open_with_trace<T>(
        transport: T,
        config: ClientConfig,
        trace: Arc<Trace>,
    ) -> Result<Session, Error>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let read_half: BoxedReader = Box::new(read_half);
        let write_half: BoxedWriter = Box::new(write_half);

        let reader = MessageReader::new(
            FrameReader::new(read_half)
                .with_read_buffer(config.read_buffer_size)
                .with_trace(trace.clone()),
        );
        let mut writer = MessageWriter::new(
            FrameWriter::new(write_half)
                .with_max_chunk_size(config.max_chunk_size)
                .with_trace(trace.clone()),
        );

        let mut capabilities = vec![CAP_BASE_1_0.to_string()];
        if !config.disable_chunked_framing {
            capabilities.push(CAP_BASE_1_1.to_string());
        }
        capabilities.push(CAP_XPATH.to_string());
        let client_hello = Hello::client(capabilities);
        writer.write_message(&client_hello.to_xml()?).await?;

        let shared = Arc::new(Shared {
            pending: StdMutex::new(VecDeque::new()),
            notify: StdMutex::new(None),
            dropped_notifications: AtomicU64::new(0),
            trace,
        });
        let (hello_tx, hello_rx) = oneshot::channel();
        let (close_tx, close_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let chunked_enabled = !config.disable_chunked_framing;
        tokio::spawn(receive_loop(
            reader,
            shared.clone(),
            hello_tx,
            close_rx,
            done_tx,
            chunked_enabled,
        ));

        let server_hello = match tokio::time::timeout(config.hello_timeout, hello_rx).await {
            Ok(Ok(hello)) => hello,
            // The receive task died before a hello arrived.
            Ok(Err(_)) => return Err(Error::SessionClosed),
            Err(_) => return Err(Error::HelloTimeout),
        };

        if chunked_enabled && server_hello.has_capability(CAP_BASE_1_1) {
            debug!("upgrading session to chunked framing");
            writer.set_framing(Framing::Chunked);
        }

        Ok(Session {
            writer: Mutex::new(writer),
            shared,
            server_hello,
            closed: AtomicBool::new(false),
            close_tx: StdMutex::new(Some(close_tx)),
            done_rx: StdMutex::new(Some(done_rx)),
        })
    }

    /// Server-allocated session-id from the server hello.
    pub fn session_id(&self) -> Option<u32> {
        self.server_hello.session_id
    }

    /// Capability URIs advertised by the server.
    pub fn server_capabilities(&self) -> &[String] {
        &self.server_hello.capabilities
    }

    /// True when the server advertised the given capability URI.
    pub fn has_capability(&self, uri: &str) -> bool {
        self.server_hello.has_capability(uri)
    }

    /// Number of notifications dropped because the subscriber sink could not
    /// accept them immediately.
    pub fn dropped_notifications(&self) -> u64 {
        self.shared.dropped_notifications.load(Ordering::Relaxed)
    }

    /// Submits a request and blocks until its reply arrives.
    ///
    /// The first `<rpc-error>` with severity `error` is surfaced as
    /// [`Error::Rpc`]; warnings stay in the returned reply. If the session
    /// terminates before the reply arrives this returns
    /// [`Error::SessionClosed`].
    pub async fn execute(&self, request: impl Into<Request>) -> Result<RpcReply, Error> {
        let started = Instant::now();
        self.shared.trace.on_execute_start(false);
        let (sink, mut replies) = mpsc::channel(1);
        self.submit(request.into(), sink).await?;
        let reply = replies.recv().await.ok_or(Error::SessionClosed)?;
        self.shared.trace.on_execute_done(false, started.elapsed());
        if let Some(rpc_error) = reply.first_error() {
            return Err(Error::Rpc(rpc_error.clone()));
        }
        Ok(reply)
    }

    /// Submits a request without waiting for its reply.
    ///
    /// Returns the generated message-id once the request is on the wire. The
    /// sink later receives exactly one reply, or is closed without a value
    /// when the session terminates first.
    pub async fn execute_async(
        &self,
        request: impl Into<Request>,
        sink: mpsc::Sender<RpcReply>,
    ) -> Result<String, Error> {
        let started = Instant::now();
        self.shared.trace.on_execute_start(true);
        let message_id = self.submit(request.into(), sink).await?;
        self.shared.trace.on_execute_done(true, started.elapsed());
        Ok(message_id)
    }

    /// Installs `sink` as the notification subscriber, then behaves as
    /// [`Session::execute`] for the subscription request.
    ///
    /// A session has at most one notification sink; a second subscribe
    /// replaces the first, and the earlier subscriber stops receiving
    /// events.
    pub async fn subscribe(
        &self,
        request: impl Into<Request>,
        sink: mpsc::Sender<Notification>,
    ) -> Result<RpcReply, Error> {
        *self.shared.notify.lock().expect("notification sink mutex") = Some(sink);
        self.execute(request).await
    }

    /// Enqueues the reply sink and encodes the request under the write lock.
    async fn submit(&self, request: Request, sink: ReplySink) -> Result<String, Error> {
        let rpc = Rpc::new(request.into_body());
        let element = rpc.to_xml()?;
        let mut writer = self.writer.lock().await;
        self.shared
            .pending
            .lock()
            .expect("pending sinks mutex")
            .push_back(sink);
        if let Err(err) = writer.write_message(&element).await {
            // The write lock is held, so the sink just appended is still the
            // tail; take it back out before surfacing the error.
            self.shared
                .pending
                .lock()
                .expect("pending sinks mutex")
                .pop_back();
            self.shared.trace.on_error("execute", &err);
            return Err(err);
        }
        Ok(rpc.message_id)
    }

    /// Closes the session.
    ///
    /// Signals the receive task, shuts the transport write half, and waits
    /// for cleanup: every outstanding reply sink and the notification sink
    /// are dropped. Calling this more than once is a no-op.
    pub async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(tx) = self.close_tx.lock().expect("close signal mutex").take() {
            let _ = tx.send(());
        }
        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = writer.shutdown().await {
                debug!("transport shutdown during close: {err}");
            }
        }
        let done = self.done_rx.lock().expect("close wait mutex").take();
        if let Some(done) = done {
            let _ = done.await;
        }
        Ok(())
    }

    /// Sends `<close-session>` and then closes the transport.
    pub async fn close_session(&self) -> Result<(), Error> {
        let result = self.execute(ops::close_session()).await;
        self.close().await?;
        result.map(|_| ())
    }

    /// Runs `<get>` and returns the reply's data payload.
    pub async fn get(&self, filter: Option<&Filter>) -> Result<Option<String>, Error> {
        Ok(self.execute(ops::get(filter)).await?.data)
    }

    /// Runs `<get-config>` against a source datastore.
    pub async fn get_config(
        &self,
        source: &Datastore,
        filter: Option<&Filter>,
    ) -> Result<Option<String>, Error> {
        Ok(self.execute(ops::get_config(source, filter)).await?.data)
    }

    /// Runs `<edit-config>`.
    pub async fn edit_config(&self, edit: &EditConfig) -> Result<(), Error> {
        self.execute(ops::edit_config(edit)).await.map(|_| ())
    }

    /// Runs `<copy-config>`.
    pub async fn copy_config(
        &self,
        source: &ConfigTarget,
        target: &ConfigTarget,
    ) -> Result<(), Error> {
        self.execute(ops::copy_config(source, target)).await.map(|_| ())
    }

    /// Runs `<delete-config>`.
    pub async fn delete_config(&self, target: &ConfigTarget) -> Result<(), Error> {
        self.execute(ops::delete_config(target)).await.map(|_| ())
    }

    /// Runs `<lock>` on a datastore.
    pub async fn lock(&self, target: &Datastore) -> Result<(), Error> {
        self.execute(ops::lock(target)).await.map(|_| ())
    }

    /// Runs `<unlock>` on a datastore.
    pub async fn unlock(&self, target: &Datastore) -> Result<(), Error> {
        self.execute(ops::unlock(target)).await.map(|_| ())
    }

    /// Runs `<discard-changes>`.
    pub async fn discard_changes(&self) -> Result<(), Error> {
        self.execute(ops::discard_changes()).await.map(|_| ())
    }

    /// Runs `<kill-session>` against another session.
    pub async fn kill_session(&self, session_id: u32) -> Result<(), Error> {
        self.execute(ops::kill_session(session_id)).await.map(|_| ())
    }

    /// Lists the schemas the server can export (RFC 6022).
    pub async fn get_schemas(&self) -> Result<Vec<Schema>, Error> {
        let reply = self.execute(ops::get_schemas()).await?;
        ops::decode_schemas(&reply)
    }

    /// Retrieves one schema document (RFC 6022); returns the schema text.
    pub async fn get_schema(
        &self,
        identifier: &str,
        version: Option<&str>,
        format: Option<&str>,
    ) -> Result<String, Error> {
        let reply = self.execute(ops::get_schema(identifier, version, format)).await?;
        reply
            .data
            .ok_or_else(|| Error::Xml("get-schema reply carries no data".to_string()))
    }
}

/// The dedicated receive task: sole reader of the decoder.
///
/// Runs from session construction until the transport reaches EOF, a decode
/// error occurs, or the session handle signals closure. On exit it releases
/// every outstanding sink so blocked callers unblock.
async fn receive_loop(
    mut reader: MessageReader<BoxedReader>,
    shared: Arc<Shared>,
    hello_tx: oneshot::Sender<Hello>,
    mut close_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<()>,
    chunked_enabled: bool,
) {
    let mut hello_tx = Some(hello_tx);
    loop {
        let next = tokio::select! {
            _ = &mut close_rx => break,
            next = reader.next() => next,
        };
        match next {
            Ok(Some(ServerMessage::Hello(hello))) => {
                if chunked_enabled && hello.has_capability(CAP_BASE_1_1) {
                    // The hello itself arrived in end-of-message framing; the
                    // decoder promotes the switch at the boundary just read.
                    reader.set_framing(Framing::Chunked);
                }
                shared.trace.on_hello_done(hello.session_id);
                match hello_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(hello);
                    }
                    None => warn!("ignoring repeated <hello> from server"),
                }
            }
            Ok(Some(ServerMessage::Reply(reply))) => {
                let sink = shared
                    .pending
                    .lock()
                    .expect("pending sinks mutex")
                    .pop_front();
                match sink {
                    // Hand off on a task of its own so a slow consumer cannot
                    // stall reply and notification processing.
                    Some(sink) => {
                        tokio::spawn(async move {
                            let _ = sink.send(reply).await;
                        });
                    }
                    None => warn!(
                        "rpc-reply with no outstanding request (message-id {:?})",
                        reply.message_id
                    ),
                }
            }
            Ok(Some(ServerMessage::Notification(notification))) => {
                deliver_notification(&shared, notification);
            }
            Ok(Some(ServerMessage::Unknown(name))) => {
                debug!("skipping unknown top-level element <{name}>");
            }
            Ok(None) => {
                debug!("netconf peer closed the stream");
                break;
            }
            Err(err) => {
                shared.trace.on_error("receive", &err);
                error!("receive loop terminated: {err}");
                break;
            }
        }
    }
    shared.release_all();
    shared.trace.on_connection_closed();
    let _ = done_tx.send(());
}

/// Delivers a notification without ever blocking the receive loop.
fn deliver_notification(shared: &Shared, notification: Notification) {
    let sink = shared.notify.lock().expect("notification sink mutex");
    match sink.as_ref() {
        Some(sink) => {
            let event_time = notification.event_time.clone();
            match sink.try_send(notification) {
                Ok(()) => shared.trace.on_notification_received(&event_time),
                Err(_) => {
                    let total =
                        shared.dropped_notifications.fetch_add(1, Ordering::Relaxed) + 1;
                    shared.trace.on_notification_dropped(total);
                }
            }
        }
        None => debug!("notification without subscriber, discarding"),
    }
}
