//! Transport layer: User Datagram Protocol (spec §4.5).
//!
//! `send_udp` (and its two-phase `prepare`/`transmit` split) composes a whole Ethernet/IP/UDP
//! frame into the shared buffer, checksums it with the pseudo-header per IETF-RFC-768, and
//! hands it to the [`crate::collaborators::MacDriver`]. `make_udp_reply_from_request` does the
//! cheaper in-place swap used by the NTP/DNS/DHCP reply paths and the UDP command dispatcher.

use byte_struct::*;

use crate::{
    buffer::*, checksum::*, ChecksumMode, EtherType, EthernetHeader, IpV4Addr, IpV4Header, MacAddr,
    Protocol, DSCP,
};

/// Length in bytes of the fixed UDP header.
pub const UDP_HEADER_LEN: usize = 8;

/// Largest UDP payload this stack will send in one datagram, so it always fits the shared
/// buffer alongside the Ethernet/IP/UDP headers (spec §4.5: "≤ ~220 octets").
pub const UDP_MAX_DATA_LEN: usize = 220;

/// UDP datagram header structure like
///
/// value [0:1] source port [u16]
///
/// value [2:3] destination port [u16]
///
/// value [4:5] total length in bytes [u16], header + data
///
/// value [6:7] checksum [u16]
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct UdpHeader {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Total frame length including header and data
    pub length: u16,
    /// Checksum over the UDP pseudo-header + header + data
    pub checksum: u16,
}

impl UdpHeader {
    /// Pack into big-endian (network) byte array.
    pub fn to_be_bytes(&self) -> [u8; UDP_HEADER_LEN] {
        let mut bytes = [0_u8; UDP_HEADER_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// Fill `buf` with a complete UDP datagram (Ethernet + IP + UDP + `data`), but do not transmit
/// it. Returns the total frame length. Split out from [`send_udp`] so callers may fill the
/// data region of `buf` in place (via the returned data offset) without an extra copy.
#[allow(clippy::too_many_arguments)]
pub fn prepare_udp(
    buf: &mut [u8],
    data: &[u8],
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    dst_mac: MacAddr,
    sport: u16,
    dst_ip: IpV4Addr,
    dport: u16,
) -> usize {
    let data_len = data.len().min(UDP_MAX_DATA_LEN);
    let udp_len = UDP_HEADER_LEN + data_len;
    let total_len = ETH_HEADER_LEN + IP_HEADER_LEN + udp_len;

    write_eth_header(
        buf,
        &EthernetHeader {
            dst_macaddr: dst_mac,
            src_macaddr: our_mac,
            ethertype: EtherType::IPV4,
        },
    );

    write_ip_header(
        buf,
        &IpV4Header {
            version_and_length: IpV4Header::version_and_length_no_options(),
            dscp: DSCP::Standard,
            total_length: (IP_HEADER_LEN + udp_len) as u16,
            identification: 0,
            fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
            time_to_live: 32,
            protocol: Protocol::Udp,
            checksum: 0,
            src_ipaddr: our_ip,
            dst_ipaddr: dst_ip,
        },
    );

    write_udp_header(
        buf,
        &UdpHeader {
            src_port: sport,
            dst_port: dport,
            length: udp_len as u16,
            checksum: 0,
        },
    );

    buf[UDP_DATA_OFFSET..UDP_DATA_OFFSET + data_len].copy_from_slice(&data[..data_len]);

    let ip_checksum = sum16(&buf[IP_OFFSET..IP_OFFSET + IP_HEADER_LEN], 0, ChecksumMode::Plain);
    buf[IP_OFFSET + 10] = (ip_checksum >> 8) as u8;
    buf[IP_OFFSET + 11] = (ip_checksum & 0xff) as u8;

    let udp_checksum = sum16_over(
        our_ip,
        dst_ip,
        &buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + udp_len],
        ChecksumMode::UdpPseudo,
    );
    buf[TRANSPORT_OFFSET + 6] = (udp_checksum >> 8) as u8;
    buf[TRANSPORT_OFFSET + 7] = (udp_checksum & 0xff) as u8;

    total_len
}

/// Transmit the first `len` bytes of `buf` via `mac`.
pub fn transmit(mac: &mut impl crate::collaborators::MacDriver, buf: &[u8], len: usize) {
    mac.mac_send(&buf[..len]);
}

/// Prepare and transmit one UDP datagram in a single call.
#[allow(clippy::too_many_arguments)]
pub fn send_udp(
    buf: &mut [u8],
    data: &[u8],
    mac: &mut impl crate::collaborators::MacDriver,
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    dst_mac: MacAddr,
    sport: u16,
    dst_ip: IpV4Addr,
    dport: u16,
) {
    let len = prepare_udp(buf, data, our_mac, our_ip, dst_mac, sport, dst_ip, dport);
    transmit(mac, buf, len);
}

/// Swap source/destination endpoints of an already-received UDP datagram in place and
/// overwrite its payload with `data`, ready to transmit as a reply. `data` is capped at
/// [`UDP_MAX_DATA_LEN`].
pub fn make_udp_reply_from_request(buf: &mut [u8], data: &[u8], sport: u16, our_mac: MacAddr, our_ip: IpV4Addr) -> usize {
    let eth = read_eth_header(buf);
    let ip = read_ip_header(buf);
    let udp = read_udp_header(buf);

    prepare_udp(
        buf,
        data,
        our_mac,
        our_ip,
        eth.src_macaddr,
        sport,
        ip.src_ipaddr,
        udp.src_port,
    )
}
