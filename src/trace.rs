//! Optional structured callbacks for observing client activity.
//!
//! Every field of [`Trace`] is an optional hook; an empty `Trace` (the
//! default) turns all of them into no-ops. The client never requires a hook
//! to be present, so instrumentation can supply any subset: byte counters on
//! the codec, connection lifecycle events, RPC latencies, or notification
//! drop accounting.

use std::fmt;
use std::time::Duration;

/// Structured callbacks invoked by the NETCONF client, the framing codec,
/// and the SSH transport adapter.
///
/// All hooks are invoked synchronously on the task that produced the event,
/// so they should return quickly; heavy work belongs on a channel.
#[derive(Default)]
pub struct Trace {
    /// SSH dial is starting; carries the target address.
    pub dial_start: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// SSH dial finished (connection + authentication + subsystem).
    pub dial_done: Option<Box<dyn Fn(&str, Duration) + Send + Sync>>,
    /// Session setup is starting (client hello about to be sent).
    pub connect_start: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Session setup finished; the session is live.
    pub connect_done: Option<Box<dyn Fn(&str, Duration) + Send + Sync>>,
    /// The transport closed and the session finished its cleanup.
    pub connection_closed: Option<Box<dyn Fn() + Send + Sync>>,
    /// The server hello arrived; carries the server session-id if present.
    pub hello_done: Option<Box<dyn Fn(Option<u32>) + Send + Sync>>,
    /// A transport read is about to be issued with the given buffer size.
    pub read_start: Option<Box<dyn Fn(usize) + Send + Sync>>,
    /// A transport read completed with the given byte count (0 on EOF).
    pub read_done: Option<Box<dyn Fn(usize) + Send + Sync>>,
    /// A transport write of the given byte count is about to be issued.
    pub write_start: Option<Box<dyn Fn(usize) + Send + Sync>>,
    /// A transport write completed; the count is 0 when the write failed.
    pub write_done: Option<Box<dyn Fn(usize) + Send + Sync>>,
    /// Something failed; carries a context string and the error.
    pub error: Option<Box<dyn Fn(&str, &dyn fmt::Display) + Send + Sync>>,
    /// A notification was delivered to the subscribed sink.
    pub notification_received: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// A notification was dropped; carries the running drop total.
    pub notification_dropped: Option<Box<dyn Fn(u64) + Send + Sync>>,
    /// An RPC submission started; `true` when submitted asynchronously.
    pub execute_start: Option<Box<dyn Fn(bool) + Send + Sync>>,
    /// An RPC submission finished; async flag plus elapsed time.
    pub execute_done: Option<Box<dyn Fn(bool, Duration) + Send + Sync>>,
}

impl Trace {
    pub(crate) fn on_dial_start(&self, target: &str) {
        if let Some(f) = &self.dial_start {
            f(target);
        }
    }

    pub(crate) fn on_dial_done(&self, target: &str, elapsed: Duration) {
        if let Some(f) = &self.dial_done {
            f(target, elapsed);
        }
    }

    pub(crate) fn on_connect_start(&self, target: &str) {
        if let Some(f) = &self.connect_start {
            f(target);
        }
    }

    pub(crate) fn on_connect_done(&self, target: &str, elapsed: Duration) {
        if let Some(f) = &self.connect_done {
            f(target, elapsed);
        }
    }

    pub(crate) fn on_connection_closed(&self) {
        if let Some(f) = &self.connection_closed {
            f();
        }
    }

    pub(crate) fn on_hello_done(&self, session_id: Option<u32>) {
        if let Some(f) = &self.hello_done {
            f(session_id);
        }
    }

    pub(crate) fn on_read_start(&self, buffer: usize) {
        if let Some(f) = &self.read_start {
            f(buffer);
        }
    }

    pub(crate) fn on_read_done(&self, count: usize) {
        if let Some(f) = &self.read_done {
            f(count);
        }
    }

    pub(crate) fn on_write_start(&self, count: usize) {
        if let Some(f) = &self.write_start {
            f(count);
        }
    }

    pub(crate) fn on_write_done(&self, count: usize) {
        if let Some(f) = &self.write_done {
            f(count);
        }
    }

    pub(crate) fn on_error(&self, context: &str, err: &dyn fmt::Display) {
        if let Some(f) = &self.error {
            f(context, err);
        }
    }

    pub(crate) fn on_notification_received(&self, event_time: &str) {
        if let Some(f) = &self.notification_received {
            f(event_time);
        }
    }

    pub(crate) fn on_notification_dropped(&self, total: u64) {
        if let Some(f) = &self.notification_dropped {
            f(total);
        }
    }

    pub(crate) fn on_execute_start(&self, is_async: bool) {
        if let Some(f) = &self.execute_start {
            f(is_async);
        }
    }

    pub(crate) fn on_execute_done(&self, is_async: bool, elapsed: Duration) {
        if let Some(f) = &self.execute_done {
            f(is_async, elapsed);
        }
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Trace").finish_non_exhaustive()
    }
}
