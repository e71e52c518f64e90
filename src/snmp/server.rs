//! SNMP trap and inform receiver.
//!
//! Binds a UDP socket (conventionally port 162), decodes each datagram as
//! an SNMP envelope, and hands Trap-v2 and Inform PDUs to a user handler.
//! Informs require acknowledgement: the received PDU is mirrored back with
//! its type octet rewritten to GetResponse, leaving community, request-id
//! and varbinds untouched. Receive errors terminate the listen loop; send
//! errors are reported to the handler and the loop continues.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::error::SnmpError;
use crate::snmp::pdu::{parse_packet, Packet, Pdu, PduType};
use crate::snmp::session::MAX_DATAGRAM;

/// User callback for received traps and informs.
#[async_trait]
pub trait TrapHandler: Send + Sync {
    /// Invoked for every Trap-v2 and Inform PDU. For informs the
    /// acknowledgement is sent after this returns.
    async fn handle(&self, source: SocketAddr, packet: &Packet, pdu: &Pdu);

    /// Invoked on per-datagram failures (parse errors, ack send errors).
    /// The listen loop continues afterwards.
    async fn error(&self, _source: Option<SocketAddr>, _error: &SnmpError) {}
}

/// A bound trap/inform listener.
pub struct TrapServer {
    socket: UdpSocket,
}

impl TrapServer {
    /// Binds the listener; use port 162 for the standard trap sink.
    pub async fn bind(addr: &str) -> Result<TrapServer, SnmpError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(TrapServer { socket })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Processes datagrams until the socket fails.
    pub async fn serve(&self, handler: Arc<dyn TrapHandler>) -> Result<(), SnmpError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (received, source) = self.socket.recv_from(&mut buf).await?;
            let (packet, pdu) = match parse_packet(&buf[..received]) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!("undecodable datagram from {source}: {err}");
                    handler.error(Some(source), &err).await;
                    continue;
                }
            };
            match pdu.pdu_type {
                PduType::TrapV2 => handler.handle(source, &packet, &pdu).await,
                PduType::InformRequest => {
                    handler.handle(source, &packet, &pdu).await;
                    if let Err(err) = self.acknowledge(&packet, source).await {
                        warn!("failed to acknowledge inform from {source}: {err}");
                        handler.error(Some(source), &err).await;
                    }
                }
                other => {
                    trace!("ignoring {other:?} pdu from {source}");
                }
            }
        }
    }

    /// Sends the GetResponse acknowledgement for an inform.
    ///
    /// The envelope is re-marshalled with the received PDU bytes unchanged
    /// apart from the type octet, so the request-id and varbinds mirror the
    /// request exactly.
    async fn acknowledge(&self, packet: &Packet, source: SocketAddr) -> Result<(), SnmpError> {
        let mut pdu = packet.pdu.clone();
        if let Some(first) = pdu.first_mut() {
            *first = PduType::GetResponse as u8;
        }
        let ack = Packet {
            version: packet.version,
            community: packet.community.clone(),
            pdu,
        };
        self.socket.send_to(&ack.encode(), source).await?;
        Ok(())
    }
}
