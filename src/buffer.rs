//! Typed, bounds-checked accessors into the one shared packet buffer (spec §4.1).
//!
//! Every protocol handler in this crate reads and writes the *same* byte buffer in place: one
//! inbound frame occupies it while it's classified, and the very same bytes are often
//! overwritten to become the outbound reply before the buffer is handed back to the MAC
//! driver. This module is the only place that knows the fixed offsets of each header within
//! that buffer; everything else calls these accessors rather than indexing the buffer itself.
//!
//! Field offsets are bit-exact with the RFC layouts referenced in spec §6. Endianness is
//! network byte order (big-endian) throughout, enforced by [`byte_struct`]'s `#[byte_struct_be]`
//! on each header type.

use crate::{EthernetHeader, IcmpHeader, IpV4Header, TcpHeader, UdpHeader, ETH_HEADER_LEN, ICMP_HEADER_LEN, IP_HEADER_LEN, TCP_HEADER_LEN, UDP_HEADER_LEN};
use byte_struct::ByteStruct;

/// Minimum size the shared packet buffer must have: enough for the largest header stack
/// (Ethernet + IP + TCP + MSS option) plus a full-size TCP segment's worth of data, per
/// spec §3 ("at least ~550 bytes").
pub const MIN_BUFFER_LEN: usize = 560;

/// Byte offset of the IPv4 header within the shared buffer.
pub const IP_OFFSET: usize = ETH_HEADER_LEN;
/// Byte offset of the UDP/TCP/ICMP header within the shared buffer (right after the fixed,
/// option-free IPv4 header).
pub const TRANSPORT_OFFSET: usize = IP_OFFSET + IP_HEADER_LEN;
/// Byte offset of UDP/TCP payload data when no TCP options are present.
pub const UDP_DATA_OFFSET: usize = TRANSPORT_OFFSET + UDP_HEADER_LEN;
/// Byte offset of ICMP payload data.
pub const ICMP_DATA_OFFSET: usize = TRANSPORT_OFFSET + ICMP_HEADER_LEN;
/// Byte offset of the TCP header's 4-byte MSS option, when present (SYN/SYN-ACK only).
pub const TCP_OPTIONS_OFFSET: usize = TRANSPORT_OFFSET + TCP_HEADER_LEN;
/// Length of the (only supported) TCP option: kind=2, length=4, MSS value.
pub const TCP_MSS_OPTION_LEN: usize = 4;
/// Byte offset of TCP payload data when the MSS option is present.
pub const TCP_DATA_OFFSET_WITH_MSS: usize = TCP_OPTIONS_OFFSET + TCP_MSS_OPTION_LEN;
/// Byte offset of TCP payload data when no options are present.
pub const TCP_DATA_OFFSET_NO_OPTIONS: usize = TCP_OPTIONS_OFFSET;

/// Read the Ethernet header from the front of `buf`.
pub fn read_eth_header(buf: &[u8]) -> EthernetHeader {
    EthernetHeader::read_bytes(&buf[0..ETH_HEADER_LEN])
}

/// Write the Ethernet header to the front of `buf`.
pub fn write_eth_header(buf: &mut [u8], header: &EthernetHeader) {
    header.write_bytes(&mut buf[0..ETH_HEADER_LEN]);
}

/// Read the IPv4 header at [`IP_OFFSET`].
pub fn read_ip_header(buf: &[u8]) -> IpV4Header {
    IpV4Header::read_bytes(&buf[IP_OFFSET..IP_OFFSET + IP_HEADER_LEN])
}

/// Write the IPv4 header at [`IP_OFFSET`].
pub fn write_ip_header(buf: &mut [u8], header: &IpV4Header) {
    header.write_bytes(&mut buf[IP_OFFSET..IP_OFFSET + IP_HEADER_LEN]);
}

/// Read the UDP header at [`TRANSPORT_OFFSET`].
pub fn read_udp_header(buf: &[u8]) -> UdpHeader {
    UdpHeader::read_bytes(&buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + UDP_HEADER_LEN])
}

/// Write the UDP header at [`TRANSPORT_OFFSET`].
pub fn write_udp_header(buf: &mut [u8], header: &UdpHeader) {
    header.write_bytes(&mut buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + UDP_HEADER_LEN]);
}

/// Read the ICMP header at [`TRANSPORT_OFFSET`].
pub fn read_icmp_header(buf: &[u8]) -> IcmpHeader {
    IcmpHeader::read_bytes(&buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + ICMP_HEADER_LEN])
}

/// Write the ICMP header at [`TRANSPORT_OFFSET`].
pub fn write_icmp_header(buf: &mut [u8], header: &IcmpHeader) {
    header.write_bytes(&mut buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + ICMP_HEADER_LEN]);
}

/// Read the TCP header at [`TRANSPORT_OFFSET`].
pub fn read_tcp_header(buf: &[u8]) -> TcpHeader {
    TcpHeader::read_bytes(&buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + TCP_HEADER_LEN])
}

/// Write the TCP header at [`TRANSPORT_OFFSET`].
pub fn write_tcp_header(buf: &mut [u8], header: &TcpHeader) {
    header.write_bytes(&mut buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + TCP_HEADER_LEN]);
}
