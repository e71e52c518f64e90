//! SNMP v2c client session over UDP.
//!
//! A session owns one connected UDP socket and a monotonically increasing
//! request-id. Each request attempt is encoded with a fresh request-id,
//! sent, and awaited under the per-attempt timeout; timeouts retry until
//! the configured budget is spent, while any other socket error aborts
//! immediately. [`SnmpSession::walk`] and [`SnmpSession::bulk_walk`] drive
//! GetNext/GetBulk over a subtree until the agent leaves it or reports
//! end-of-MIB.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::SnmpError;
use crate::snmp::pdu::{build_packet, parse_packet, Oid, Pdu, PduType, Value, Varbind};

/// Largest datagram the session will receive.
pub(crate) const MAX_DATAGRAM: usize = 65535;

/// SNMP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    V1,
    #[default]
    V2c,
    V3,
}

impl Version {
    /// Wire value carried in the message envelope.
    pub fn wire(&self) -> i64 {
        match self {
            Version::V1 => 0,
            Version::V2c => 1,
            Version::V3 => 3,
        }
    }
}

/// SNMP session configuration.
#[derive(Debug, Clone)]
pub struct SnmpConfig {
    /// Transport name; only "udp" is supported.
    pub network: String,
    /// Per-attempt response deadline.
    pub timeout: Duration,
    /// Additional attempts after the first.
    pub retries: u32,
    pub version: Version,
    pub community: String,
}

impl Default for SnmpConfig {
    fn default() -> SnmpConfig {
        SnmpConfig {
            network: "udp".to_string(),
            timeout: Duration::from_secs(5),
            retries: 3,
            version: Version::V2c,
            community: "public".to_string(),
        }
    }
}

/// Callback invoked per varbind during a walk; returning an error aborts
/// the walk and surfaces as [`SnmpError::Walk`].
pub type WalkFn<'a> =
    dyn FnMut(&Varbind) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + 'a;

/// An SNMP v2c client session bound to one agent.
pub struct SnmpSession {
    socket: UdpSocket,
    config: SnmpConfig,
    request_id: AtomicI32,
}

impl SnmpSession {
    /// Binds a local socket and connects it to the agent address
    /// (`host:port`; agents conventionally listen on port 161).
    pub async fn dial(target: &str, config: SnmpConfig) -> Result<SnmpSession, SnmpError> {
        if config.network != "udp" {
            return Err(SnmpError::Packet(format!(
                "unsupported network '{}'",
                config.network
            )));
        }
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(target).await?;
        Ok(SnmpSession {
            socket,
            config,
            request_id: AtomicI32::new(0),
        })
    }

    /// Next request-id; wraps around on overflow.
    fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Issues a Get for the given OIDs.
    pub async fn get(&self, oids: &[Oid]) -> Result<Pdu, SnmpError> {
        self.request(PduType::GetRequest, oids, 0, 0).await
    }

    /// Issues a GetNext for the given OIDs.
    pub async fn get_next(&self, oids: &[Oid]) -> Result<Pdu, SnmpError> {
        self.request(PduType::GetNextRequest, oids, 0, 0).await
    }

    /// Issues a GetBulk with the given repetition controls.
    pub async fn get_bulk(
        &self,
        oids: &[Oid],
        non_repeaters: i32,
        max_repetitions: i32,
    ) -> Result<Pdu, SnmpError> {
        self.request(PduType::GetBulkRequest, oids, non_repeaters, max_repetitions)
            .await
    }

    /// One request/response exchange with the retry loop.
    async fn request(
        &self,
        pdu_type: PduType,
        oids: &[Oid],
        error_status: i32,
        error_index: i32,
    ) -> Result<Pdu, SnmpError> {
        let attempts = self.config.retries.saturating_add(1);
        for attempt in 1..=attempts {
            // Each attempt gets its own request-id so a late reply to an
            // earlier attempt is distinguishable on the wire.
            let varbinds = oids.iter().cloned().map(Varbind::null).collect();
            let pdu = Pdu {
                pdu_type,
                request_id: self.next_request_id(),
                error_status,
                error_index,
                varbinds,
            };
            let datagram = build_packet(
                self.config.version.wire(),
                self.config.community.as_bytes(),
                &pdu,
            )?;
            self.socket.send(&datagram).await?;

            let mut buf = vec![0u8; MAX_DATAGRAM];
            match tokio::time::timeout(self.config.timeout, self.socket.recv(&mut buf)).await {
                Ok(Ok(received)) => {
                    let (_, response) = parse_packet(&buf[..received])?;
                    return Ok(response);
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    debug!(
                        "snmp request timed out (attempt {attempt}/{attempts}, request-id {})",
                        pdu.request_id
                    );
                }
            }
        }
        Err(SnmpError::Timeout)
    }

    /// Walks the subtree under `root` with repeated GetNext requests.
    ///
    /// The callback is invoked for every varbind inside the subtree; a
    /// varbind outside it or an end-of-MIB exception terminates the walk.
    pub async fn walk(&self, root: &Oid, visit: &mut WalkFn<'_>) -> Result<(), SnmpError> {
        let mut current = root.clone();
        loop {
            let response = self.get_next(std::slice::from_ref(&current)).await?;
            match self.drive_walk(root, &response, visit)? {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    /// Walks the subtree under `root` with GetBulk requests of the given
    /// repetition count (non-repeaters is always zero).
    pub async fn bulk_walk(
        &self,
        root: &Oid,
        max_repetitions: i32,
        visit: &mut WalkFn<'_>,
    ) -> Result<(), SnmpError> {
        let mut current = root.clone();
        loop {
            let response = self
                .get_bulk(std::slice::from_ref(&current), 0, max_repetitions)
                .await?;
            match self.drive_walk(root, &response, visit)? {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    /// Applies one response to the walk; returns the next OID to request,
    /// or `None` when the walk is finished.
    fn drive_walk(
        &self,
        root: &Oid,
        response: &Pdu,
        visit: &mut WalkFn<'_>,
    ) -> Result<Option<Oid>, SnmpError> {
        let mut next = None;
        for varbind in &response.varbinds {
            if !root.contains(&varbind.oid) {
                return Ok(None);
            }
            visit(varbind).map_err(SnmpError::Walk)?;
            if matches!(varbind.value, Value::EndOfMib) {
                return Ok(None);
            }
            next = Some(varbind.oid.clone());
        }
        Ok(next)
    }
}
