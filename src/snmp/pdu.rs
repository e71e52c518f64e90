//! SNMP v2c message structures: the packet envelope, the PDU, and the typed
//! variable-binding values (RFC 1905/3416 with the BER mapping of RFC 1906).
//!
//! A PDU is the generic (request-id, error-status, error-index, varbind
//! list) sequence; its identifier octet carries the message type. GetBulk
//! reuses the two error fields for non-repeaters and max-repetitions. The
//! envelope is (version, community, pdu); the PDU bytes are kept raw inside
//! [`Packet`] so a responder can mirror an Inform back unchanged apart from
//! its type octet.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;
use smallvec::SmallVec;

use crate::error::{syntax_error, SnmpError};
use crate::snmp::ber;

/// An object identifier as a sequence of arc values.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(SmallVec<[u32; 12]>);

impl Oid {
    pub fn new(arcs: &[u32]) -> Oid {
        Oid(SmallVec::from_slice(arcs))
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// True when `other` lies in the subtree rooted at `self`.
    pub fn contains(&self, other: &Oid) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Appends one arc, as walk code does to address a column instance.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }
}

impl From<Vec<u32>> for Oid {
    fn from(arcs: Vec<u32>) -> Oid {
        Oid(SmallVec::from_vec(arcs))
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Oid, SnmpError> {
        let mut arcs = SmallVec::new();
        for part in s.trim_matches('.').split('.') {
            let arc = part
                .parse::<u32>()
                .map_err(|_| SnmpError::Packet(format!("invalid oid '{s}'")))?;
            arcs.push(arc);
        }
        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// SNMP message types, as identifier octets of the PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum PduType {
    GetRequest = 0xa0,
    GetNextRequest = 0xa1,
    GetResponse = 0xa2,
    SetRequest = 0xa3,
    GetBulkRequest = 0xa5,
    InformRequest = 0xa6,
    TrapV2 = 0xa7,
    Report = 0xa8,
}

/// A typed variable-binding value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Oid(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMib,
}

/// Application-class tags of RFC 1906.
const TAG_IPADDRESS: u8 = ber::CLASS_APPLICATION;
const TAG_COUNTER32: u8 = ber::CLASS_APPLICATION | 1;
const TAG_GAUGE32: u8 = ber::CLASS_APPLICATION | 2;
const TAG_TIMETICKS: u8 = ber::CLASS_APPLICATION | 3;
const TAG_OPAQUE: u8 = ber::CLASS_APPLICATION | 4;
const TAG_COUNTER64: u8 = ber::CLASS_APPLICATION | 6;

/// Context-class exception tags of RFC 1905.
const TAG_NO_SUCH_OBJECT: u8 = ber::CLASS_CONTEXT;
const TAG_NO_SUCH_INSTANCE: u8 = ber::CLASS_CONTEXT | 1;
const TAG_END_OF_MIB: u8 = ber::CLASS_CONTEXT | 2;

impl Value {
    /// Decodes a value from its identifier octet and value bytes.
    pub fn decode(tag: u8, value: &[u8]) -> Result<Value, SnmpError> {
        let unsigned32 = |value: &[u8]| -> Result<u32, SnmpError> {
            u32::try_from(ber::read_unsigned(value)?)
                .map_err(|_| syntax_error("32-bit value out of range"))
        };
        match tag {
            ber::TAG_INTEGER => Ok(Value::Integer(ber::read_integer(value)?)),
            ber::TAG_OCTET_STRING => Ok(Value::OctetString(value.to_vec())),
            ber::TAG_NULL => Ok(Value::Null),
            ber::TAG_OID => Ok(Value::Oid(Oid::from(ber::read_oid(value)?))),
            TAG_IPADDRESS => {
                let octets: [u8; 4] = value
                    .try_into()
                    .map_err(|_| syntax_error("ip address must be four octets"))?;
                Ok(Value::IpAddress(octets))
            }
            TAG_COUNTER32 => Ok(Value::Counter32(unsigned32(value)?)),
            TAG_GAUGE32 => Ok(Value::Gauge32(unsigned32(value)?)),
            TAG_TIMETICKS => Ok(Value::TimeTicks(unsigned32(value)?)),
            TAG_OPAQUE => Ok(Value::Opaque(value.to_vec())),
            TAG_COUNTER64 => Ok(Value::Counter64(ber::read_unsigned(value)?)),
            TAG_NO_SUCH_OBJECT => Ok(Value::NoSuchObject),
            TAG_NO_SUCH_INSTANCE => Ok(Value::NoSuchInstance),
            TAG_END_OF_MIB => Ok(Value::EndOfMib),
            other => Err(syntax_error(format!("unsupported value tag {other:#04x}"))),
        }
    }

    /// Appends the BER encoding of this value.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), SnmpError> {
        match self {
            Value::Integer(v) => ber::write_integer(out, ber::TAG_INTEGER, *v),
            Value::OctetString(v) => ber::write_octet_string(out, ber::TAG_OCTET_STRING, v),
            Value::Oid(oid) => ber::write_oid(out, oid.arcs())?,
            Value::IpAddress(octets) => ber::write_tlv(out, TAG_IPADDRESS, octets),
            Value::Counter32(v) => ber::write_unsigned(out, TAG_COUNTER32, u64::from(*v)),
            Value::Gauge32(v) => ber::write_unsigned(out, TAG_GAUGE32, u64::from(*v)),
            Value::TimeTicks(v) => ber::write_unsigned(out, TAG_TIMETICKS, u64::from(*v)),
            Value::Opaque(v) => ber::write_tlv(out, TAG_OPAQUE, v),
            Value::Counter64(v) => ber::write_unsigned(out, TAG_COUNTER64, *v),
            Value::Null => ber::write_null(out),
            Value::NoSuchObject => ber::write_tlv(out, TAG_NO_SUCH_OBJECT, &[]),
            Value::NoSuchInstance => ber::write_tlv(out, TAG_NO_SUCH_INSTANCE, &[]),
            Value::EndOfMib => ber::write_tlv(out, TAG_END_OF_MIB, &[]),
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::OctetString(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Value::Oid(oid) => write!(f, "{oid}"),
            Value::IpAddress([a, b, c, d]) => write!(f, "{a}.{b}.{c}.{d}"),
            Value::Counter32(v) | Value::Gauge32(v) => write!(f, "{v}"),
            // TimeTicks are hundredths of a second.
            Value::TimeTicks(v) => {
                write!(f, "{:?}", Duration::from_millis(u64::from(*v) * 10))
            }
            Value::Opaque(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Counter64(v) => write!(f, "{v}"),
            Value::Null => f.write_str("null"),
            Value::NoSuchObject => f.write_str("noSuchObject"),
            Value::NoSuchInstance => f.write_str("noSuchInstance"),
            Value::EndOfMib => f.write_str("endOfMibView"),
        }
    }
}

/// One (OID, value) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Varbind {
    pub oid: Oid,
    pub value: Value,
}

impl Varbind {
    pub fn new(oid: Oid, value: Value) -> Varbind {
        Varbind { oid, value }
    }

    /// A binding with a Null value, as carried by requests.
    pub fn null(oid: Oid) -> Varbind {
        Varbind { oid, value: Value::Null }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), SnmpError> {
        let mut body = Vec::new();
        ber::write_oid(&mut body, self.oid.arcs())?;
        self.value.encode(&mut body)?;
        ber::write_tlv(out, ber::TAG_SEQUENCE, &body);
        Ok(())
    }

    fn decode(input: &[u8]) -> Result<(Varbind, &[u8]), SnmpError> {
        let (seq, rest) = ber::read_tlv(input)?;
        if seq.tag != ber::TAG_SEQUENCE {
            return Err(syntax_error("expected varbind sequence"));
        }
        let (oid_tlv, value_bytes) = ber::read_tlv(seq.value)?;
        if oid_tlv.tag != ber::TAG_OID {
            return Err(syntax_error("expected varbind oid"));
        }
        let oid = Oid::from(ber::read_oid(oid_tlv.value)?);
        let (value_tlv, trailing) = ber::read_tlv(value_bytes)?;
        if !trailing.is_empty() {
            return Err(syntax_error("trailing bytes in varbind"));
        }
        let value = Value::decode(value_tlv.tag, value_tlv.value)?;
        Ok((Varbind { oid, value }, rest))
    }
}

/// A decoded SNMP PDU.
///
/// For GetBulk requests `error_status` carries non-repeaters and
/// `error_index` carries max-repetitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i32,
    pub error_index: i32,
    pub varbinds: Vec<Varbind>,
}

impl Pdu {
    /// A request PDU with zeroed error fields.
    pub fn request(pdu_type: PduType, request_id: i32, varbinds: Vec<Varbind>) -> Pdu {
        Pdu {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    /// A GetBulk request; the error fields carry the repetition controls.
    pub fn get_bulk(
        request_id: i32,
        non_repeaters: i32,
        max_repetitions: i32,
        varbinds: Vec<Varbind>,
    ) -> Pdu {
        Pdu {
            pdu_type: PduType::GetBulkRequest,
            request_id,
            error_status: non_repeaters,
            error_index: max_repetitions,
            varbinds,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnmpError> {
        let mut body = Vec::new();
        ber::write_integer(&mut body, ber::TAG_INTEGER, i64::from(self.request_id));
        ber::write_integer(&mut body, ber::TAG_INTEGER, i64::from(self.error_status));
        ber::write_integer(&mut body, ber::TAG_INTEGER, i64::from(self.error_index));
        let mut list = Vec::new();
        for varbind in &self.varbinds {
            varbind.encode(&mut list)?;
        }
        ber::write_tlv(&mut body, ber::TAG_SEQUENCE, &list);
        let mut out = Vec::new();
        ber::write_tlv(&mut out, self.pdu_type as u8, &body);
        Ok(out)
    }

    pub fn decode(input: &[u8]) -> Result<Pdu, SnmpError> {
        let (tlv, rest) = ber::read_tlv(input)?;
        if !rest.is_empty() {
            return Err(syntax_error("trailing bytes after pdu"));
        }
        let pdu_type = PduType::from_u8(tlv.tag)
            .ok_or_else(|| SnmpError::Packet(format!("unknown pdu type {:#04x}", tlv.tag)))?;
        let (request_id, after) = read_int32_field(tlv.value)?;
        let (error_status, after) = read_int32_field(after)?;
        let (error_index, after) = read_int32_field(after)?;
        let (list, trailing) = ber::read_tlv(after)?;
        if list.tag != ber::TAG_SEQUENCE {
            return Err(syntax_error("expected varbind list"));
        }
        if !trailing.is_empty() {
            return Err(syntax_error("trailing bytes after varbind list"));
        }
        let mut varbinds = Vec::new();
        let mut cursor = list.value;
        while !cursor.is_empty() {
            let (varbind, rest) = Varbind::decode(cursor)?;
            varbinds.push(varbind);
            cursor = rest;
        }
        Ok(Pdu {
            pdu_type,
            request_id,
            error_status,
            error_index,
            varbinds,
        })
    }
}

fn read_int32_field(input: &[u8]) -> Result<(i32, &[u8]), SnmpError> {
    let (tlv, rest) = ber::read_tlv(input)?;
    if tlv.tag != ber::TAG_INTEGER {
        return Err(syntax_error("expected integer field"));
    }
    let value = ber::read_integer(tlv.value)?;
    let value =
        i32::try_from(value).map_err(|_| syntax_error("integer field out of 32-bit range"))?;
    Ok((value, rest))
}

/// The SNMP message envelope: version, community, raw PDU bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: i64,
    pub community: Vec<u8>,
    /// The PDU as raw bytes; the first byte is the PDU type.
    pub pdu: Vec<u8>,
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        ber::write_integer(&mut body, ber::TAG_INTEGER, self.version);
        ber::write_octet_string(&mut body, ber::TAG_OCTET_STRING, &self.community);
        body.extend_from_slice(&self.pdu);
        let mut out = Vec::new();
        ber::write_tlv(&mut out, ber::TAG_SEQUENCE, &body);
        out
    }

    pub fn decode(datagram: &[u8]) -> Result<Packet, SnmpError> {
        let (outer, rest) = ber::read_tlv(datagram)?;
        if outer.tag != ber::TAG_SEQUENCE {
            return Err(syntax_error("expected message sequence"));
        }
        if !rest.is_empty() {
            return Err(syntax_error("trailing bytes after message"));
        }
        let (version_tlv, after) = ber::read_tlv(outer.value)?;
        if version_tlv.tag != ber::TAG_INTEGER {
            return Err(syntax_error("expected version integer"));
        }
        let version = ber::read_integer(version_tlv.value)?;
        let (community_tlv, after) = ber::read_tlv(after)?;
        if community_tlv.tag != ber::TAG_OCTET_STRING {
            return Err(syntax_error("expected community string"));
        }
        // The remainder must be exactly one TLV: the PDU.
        let (_, trailing) = ber::read_tlv(after)?;
        if !trailing.is_empty() {
            return Err(syntax_error("trailing bytes after pdu"));
        }
        Ok(Packet {
            version,
            community: community_tlv.value.to_vec(),
            pdu: after.to_vec(),
        })
    }
}

/// Encodes a request or response message in one step.
pub fn build_packet(version: i64, community: &[u8], pdu: &Pdu) -> Result<Vec<u8>, SnmpError> {
    let packet = Packet {
        version,
        community: community.to_vec(),
        pdu: pdu.encode()?,
    };
    Ok(packet.encode())
}

/// Decodes a datagram into its envelope and PDU.
pub fn parse_packet(datagram: &[u8]) -> Result<(Packet, Pdu), SnmpError> {
    let packet = Packet::decode(datagram)?;
    let pdu = Pdu::decode(&packet.pdu)?;
    Ok((packet, pdu))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().expect("oid")
    }

    #[test]
    fn oid_display_and_containment() {
        let root = oid("1.3.6.1.2.1.1.4");
        assert_eq!(root.to_string(), "1.3.6.1.2.1.1.4");
        assert!(root.contains(&oid("1.3.6.1.2.1.1.4.0")));
        assert!(root.contains(&root.clone()));
        assert!(!root.contains(&oid("1.3.6.1.2.1.1.5.0")));
        assert_eq!(root.child(0), oid("1.3.6.1.2.1.1.4.0"));
    }

    #[test]
    fn pdu_round_trip() {
        let pdu = Pdu::request(
            PduType::GetRequest,
            42,
            vec![
                Varbind::null(oid("1.3.6.1.2.1.1.4.0")),
                Varbind::new(
                    oid("1.3.6.1.2.1.1.5.0"),
                    Value::OctetString(b"cisco-7513".to_vec()),
                ),
            ],
        );
        let encoded = pdu.encode().expect("encode");
        assert_eq!(encoded[0], 0xa0);
        let decoded = Pdu::decode(&encoded).expect("decode");
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn get_bulk_fields_ride_in_error_slots() {
        let pdu = Pdu::get_bulk(7, 1, 3, vec![Varbind::null(oid("1.3.6.1.2.1.2.2.1.2"))]);
        let decoded = Pdu::decode(&pdu.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.pdu_type, PduType::GetBulkRequest);
        assert_eq!(decoded.error_status, 1);
        assert_eq!(decoded.error_index, 3);
    }

    #[test]
    fn packet_round_trip() {
        let pdu = Pdu::request(
            PduType::GetResponse,
            9,
            vec![Varbind::new(
                oid("1.3.6.1.2.1.1.3.0"),
                Value::TimeTicks(12345),
            )],
        );
        let datagram = build_packet(1, b"public", &pdu).expect("build");
        let (packet, decoded) = parse_packet(&datagram).expect("parse");
        assert_eq!(packet.version, 1);
        assert_eq!(packet.community, b"public");
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn value_decode_table() {
        let cases: Vec<(Value, &str)> = vec![
            (Value::Integer(-42), "-42"),
            (Value::OctetString(b"support@example.com".to_vec()), "support@example.com"),
            (Value::Oid(oid("1.3.6.1.4.1.9")), "1.3.6.1.4.1.9"),
            (Value::IpAddress([192, 0, 2, 1]), "192.0.2.1"),
            (Value::Counter32(100), "100"),
            (Value::Gauge32(55), "55"),
            (Value::Counter64(18_000_000_000_000_000_000), "18000000000000000000"),
            (Value::Opaque(vec![0xde, 0xad, 0x0f]), "dead0f"),
            (Value::Null, "null"),
            (Value::NoSuchObject, "noSuchObject"),
            (Value::NoSuchInstance, "noSuchInstance"),
            (Value::EndOfMib, "endOfMibView"),
        ];
        for (value, display) in cases {
            let mut encoded = Vec::new();
            value.encode(&mut encoded).expect("encode");
            let (tlv, _) = ber::read_tlv(&encoded).expect("tlv");
            let decoded = Value::decode(tlv.tag, tlv.value).expect("decode");
            assert_eq!(decoded, value);
            assert_eq!(value.to_string(), display);
        }
    }

    #[test]
    fn time_ticks_format_as_duration() {
        // 6000 ticks = 60 seconds.
        assert_eq!(Value::TimeTicks(6000).to_string(), "60s");
    }

    #[test]
    fn unknown_pdu_type_is_rejected() {
        let mut raw = Pdu::request(PduType::GetRequest, 1, Vec::new())
            .encode()
            .expect("encode");
        raw[0] = 0xaf;
        let err = Pdu::decode(&raw).expect_err("must fail");
        assert!(matches!(err, SnmpError::Packet(_)));
    }
}
