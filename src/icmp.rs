//! Internet Control Message Protocol: echo request/reply per IETF-RFC-792.
//!
//! Only the echo (ping) message pair is implemented, matching spec §4.4; no other ICMP
//! message types are generated or interpreted, and no ICMP errors are ever sent by this stack
//! (spec §4.9 "no ICMP error messages are generated").

use byte_struct::*;
use ufmt::derive::uDebug;

/// Length in bytes of the fixed ICMP echo header (type, code, checksum, identifier, sequence).
pub const ICMP_HEADER_LEN: usize = 8;

/// Sentinel byte the application's own echo requests lead their payload with, so that
/// [`IcmpWatcher`] can tell apart "our" echo replies from background noise on the wire.
pub const ICMP_PING_SENTINEL: u8 = 0x42;

/// ICMP echo request/reply header.
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct IcmpHeader {
    /// Message type: 8 = echo request, 0 = echo reply.
    pub icmp_type: IcmpType,
    /// Message code, always 0 for echo.
    pub code: u8,
    /// Checksum over the ICMP header + payload (no pseudo-header).
    pub checksum: u16,
    /// Identifier, chosen by the sender and echoed back unchanged.
    pub identifier: u16,
    /// Sequence number, chosen by the sender and echoed back unchanged.
    pub sequence: u16,
}

impl IcmpHeader {
    /// Pack into big-endian (network) byte array.
    pub fn to_be_bytes(&self) -> [u8; ICMP_HEADER_LEN] {
        let mut bytes = [0_u8; ICMP_HEADER_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// ICMP message type values; only echo request/reply are meaningful to this stack.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    /// Echo reply (ping response)
    EchoReply = 0,
    /// Echo request (ping)
    EchoRequest = 8,
    /// Catch-all for message types this stack does not act on
    Unimplemented,
}

impl From<u8> for IcmpType {
    fn from(value: u8) -> Self {
        match value {
            0 => IcmpType::EchoReply,
            8 => IcmpType::EchoRequest,
            _ => IcmpType::Unimplemented,
        }
    }
}

impl ByteStructLen for IcmpType {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for IcmpType {
    fn read_bytes(bytes: &[u8]) -> Self {
        IcmpType::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = *self as u8;
    }
}

/// Given an inbound echo request's header and checksum, compute the header for the reply
/// in place: type becomes `EchoReply`, and the checksum is adjusted by adding `0x0800`
/// (the difference between type byte 8 and 0 in the checksum's big-endian high byte),
/// propagating the carry into the low byte rather than recomputing the full sum, per spec §4.4.
pub fn echo_reply_header(request: &IcmpHeader) -> IcmpHeader {
    let mut checksum = request.checksum as u32 + 0x0800;
    if checksum > 0xFFFF {
        checksum -= 0xFFFF;
    }
    IcmpHeader {
        icmp_type: IcmpType::EchoReply,
        code: request.code,
        checksum: checksum as u16,
        identifier: request.identifier,
        sequence: request.sequence,
    }
}

/// Tracks whether an inbound datagram is the echo reply an application is waiting on, so it
/// can invoke `on_ping_reply(src_ip)` without keeping a full socket around. Spec §4.4.
#[derive(Clone, Copy, Debug, Default)]
pub struct IcmpWatcher {
    /// Identifier of the outstanding ping, if any.
    watching_identifier: Option<u16>,
}

impl IcmpWatcher {
    /// Start watching for a reply to the echo request carrying `identifier`.
    pub fn watch(&mut self, identifier: u16) {
        self.watching_identifier = Some(identifier);
    }

    /// Stop watching (e.g. after the application observed the reply or gave up).
    pub fn clear(&mut self) {
        self.watching_identifier = None;
    }

    /// Given an inbound ICMP header and the first payload byte, determine whether this is the
    /// reply being watched for.
    pub fn is_watched_reply(&self, header: &IcmpHeader, first_payload_byte: Option<u8>) -> bool {
        header.icmp_type == IcmpType::EchoReply
            && first_payload_byte == Some(ICMP_PING_SENTINEL)
            && self.watching_identifier == Some(header.identifier)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    extern crate std;

    #[test]
    fn test_icmp_header_round_trip() {
        let header = IcmpHeader {
            icmp_type: IcmpType::EchoRequest,
            code: 0,
            checksum: 0x1234,
            identifier: 1234,
            sequence: 1,
        };
        let bytes = header.to_be_bytes();
        let parsed = IcmpHeader::read_bytes(&bytes);
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_echo_reply_checksum_delta_and_type() {
        let request = IcmpHeader {
            icmp_type: IcmpType::EchoRequest,
            code: 0,
            checksum: 0x1000,
            identifier: 1234,
            sequence: 7,
        };
        let reply = echo_reply_header(&request);
        assert_eq!(reply.icmp_type, IcmpType::EchoReply);
        assert_eq!(reply.identifier, request.identifier);
        assert_eq!(reply.sequence, request.sequence);
        assert_eq!(reply.checksum as u32, request.checksum as u32 + 0x0800);
    }

    #[test]
    fn test_echo_reply_checksum_carry_propagates() {
        let request = IcmpHeader {
            icmp_type: IcmpType::EchoRequest,
            code: 0,
            checksum: 0xFFFF,
            identifier: 1,
            sequence: 1,
        };
        let reply = echo_reply_header(&request);
        // 0xFFFF + 0x0800 = 0x107FF, folded once -> 0x0800
        assert_eq!(reply.checksum, 0x0800);
    }

    #[test]
    fn test_watcher_matches_sentinel_and_identifier() {
        let mut watcher = IcmpWatcher::default();
        watcher.watch(42);
        let header = IcmpHeader {
            icmp_type: IcmpType::EchoReply,
            code: 0,
            checksum: 0,
            identifier: 42,
            sequence: 1,
        };
        assert!(watcher.is_watched_reply(&header, Some(ICMP_PING_SENTINEL)));
        assert!(!watcher.is_watched_reply(&header, Some(0x00)));
    }
}
