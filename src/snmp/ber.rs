//! BER (Basic Encoding Rules) primitives used by the SNMP codec.
//!
//! SNMP messages are BER-encoded ASN.1 with definite lengths. This module
//! provides the tag/length/value plumbing the PDU layer is built on:
//! splitting a byte slice into TLVs, and encoding/decoding the primitive
//! types SNMP uses (INTEGER, OCTET STRING, NULL, OBJECT IDENTIFIER, and the
//! unsigned application types that ride on the INTEGER encoding).
//!
//! Encoders append to a `Vec<u8>`; decoders take the value bytes of an
//! already-split TLV. Indefinite lengths are rejected, as RFC 1906 requires
//! for SNMP transport mappings.

use crate::error::{syntax_error, SnmpError};

/// Class bits of the identifier octet.
pub const CLASS_UNIVERSAL: u8 = 0x00;
pub const CLASS_APPLICATION: u8 = 0x40;
pub const CLASS_CONTEXT: u8 = 0x80;

/// Constructed bit of the identifier octet.
pub const CONSTRUCTED: u8 = 0x20;

/// Universal primitive tags used by SNMP.
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = CONSTRUCTED | 0x10;

/// One tag-length-value triple split out of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// The full identifier octet (class, constructed bit and tag number).
    pub tag: u8,
    pub value: &'a [u8],
}

/// Splits the next TLV off the front of `input`, returning it and the rest.
pub fn read_tlv(input: &[u8]) -> Result<(Tlv<'_>, &[u8]), SnmpError> {
    if input.len() < 2 {
        return Err(syntax_error("truncated tlv"));
    }
    let tag = input[0];
    let first = input[1];
    let (length, header) = if first < 0x80 {
        (first as usize, 2)
    } else if first == 0x80 {
        return Err(syntax_error("indefinite length"));
    } else {
        let octets = (first & 0x7f) as usize;
        if octets > 4 {
            return Err(syntax_error("length too large"));
        }
        if input.len() < 2 + octets {
            return Err(syntax_error("truncated length"));
        }
        let mut length: usize = 0;
        for &b in &input[2..2 + octets] {
            length = length << 8 | b as usize;
        }
        (length, 2 + octets)
    };
    if input.len() < header + length {
        return Err(syntax_error("value shorter than length"));
    }
    let (value, rest) = input[header..].split_at(length);
    Ok((Tlv { tag, value }, rest))
}

/// Appends a definite-form length.
pub fn write_length(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = (usize::BITS / 8 - length.leading_zeros() / 8) as usize;
    out.push(0x80 | bytes as u8);
    for shift in (0..bytes).rev() {
        out.push((length >> (shift * 8)) as u8);
    }
}

/// Appends a complete TLV with the given identifier octet.
pub fn write_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    write_length(out, value.len());
    out.extend_from_slice(value);
}

/// Appends a two's-complement INTEGER under the given tag.
pub fn write_integer(out: &mut Vec<u8>, tag: u8, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Strip redundant sign octets while the value survives unchanged.
    while start < bytes.len() - 1 {
        let sign_only = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0
            || bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0;
        if !sign_only {
            break;
        }
        start += 1;
    }
    write_tlv(out, tag, &bytes[start..]);
}

/// Appends an unsigned value using the INTEGER encoding under the given tag.
pub fn write_unsigned(out: &mut Vec<u8>, tag: u8, value: u64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 && bytes[start] == 0 {
        start += 1;
    }
    let mut encoded = Vec::with_capacity(9);
    if bytes[start] & 0x80 != 0 {
        // A leading zero keeps the top bit from reading as a sign.
        encoded.push(0);
    }
    encoded.extend_from_slice(&bytes[start..]);
    write_tlv(out, tag, &encoded);
}

/// Appends an OCTET STRING under the given tag.
pub fn write_octet_string(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    write_tlv(out, tag, value);
}

/// Appends an ASN.1 NULL.
pub fn write_null(out: &mut Vec<u8>) {
    write_tlv(out, TAG_NULL, &[]);
}

/// Appends an OBJECT IDENTIFIER from its arc values.
pub fn write_oid(out: &mut Vec<u8>, arcs: &[u32]) -> Result<(), SnmpError> {
    if arcs.len() < 2 {
        return Err(syntax_error("oid needs at least two arcs"));
    }
    if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(syntax_error("invalid oid root arcs"));
    }
    let mut body = Vec::with_capacity(arcs.len() + 4);
    write_base128(&mut body, arcs[0] * 40 + arcs[1]);
    for &arc in &arcs[2..] {
        write_base128(&mut body, arc);
    }
    write_tlv(out, TAG_OID, &body);
    Ok(())
}

fn write_base128(out: &mut Vec<u8>, value: u32) {
    let mut started = false;
    for shift in (0..5).rev() {
        let septet = ((value >> (shift * 7)) & 0x7f) as u8;
        if !started && septet == 0 && shift != 0 {
            continue;
        }
        started = true;
        if shift == 0 {
            out.push(septet);
        } else {
            out.push(septet | 0x80);
        }
    }
}

/// Decodes a two's-complement INTEGER value.
pub fn read_integer(value: &[u8]) -> Result<i64, SnmpError> {
    if value.is_empty() {
        return Err(syntax_error("empty integer"));
    }
    if value.len() > 8 {
        return Err(syntax_error("integer too large"));
    }
    let mut result: i64 = if value[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in value {
        result = result << 8 | b as i64;
    }
    Ok(result)
}

/// Decodes an unsigned value carried in the INTEGER encoding.
pub fn read_unsigned(value: &[u8]) -> Result<u64, SnmpError> {
    if value.is_empty() {
        return Err(syntax_error("empty integer"));
    }
    if value.len() > 9 || (value.len() == 9 && value[0] != 0) {
        return Err(syntax_error("integer too large"));
    }
    if value[0] & 0x80 != 0 {
        return Err(syntax_error("negative value for unsigned type"));
    }
    let mut result: u64 = 0;
    for &b in value {
        result = result << 8 | b as u64;
    }
    Ok(result)
}

/// Decodes an OBJECT IDENTIFIER value into its arcs.
pub fn read_oid(value: &[u8]) -> Result<Vec<u32>, SnmpError> {
    if value.is_empty() {
        return Err(syntax_error("empty oid"));
    }
    let mut arcs = Vec::with_capacity(value.len() + 1);
    let mut iter = value.iter();
    let mut current: u32 = 0;
    let mut septets = 0;
    for &b in iter.by_ref() {
        if septets == 0 && b == 0x80 {
            return Err(syntax_error("padded oid subidentifier"));
        }
        septets += 1;
        if septets > 5 {
            return Err(syntax_error("oid subidentifier too large"));
        }
        current = current << 7 | u32::from(b & 0x7f);
        if b & 0x80 == 0 {
            if arcs.is_empty() {
                let (first, second) = match current {
                    0..=39 => (0, current),
                    40..=79 => (1, current - 40),
                    _ => (2, current - 80),
                };
                arcs.push(first);
                arcs.push(second);
            } else {
                arcs.push(current);
            }
            current = 0;
            septets = 0;
        }
    }
    if septets != 0 {
        return Err(syntax_error("truncated oid subidentifier"));
    }
    Ok(arcs)
}
