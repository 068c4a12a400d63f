//! Transport layer: a minimal TCP engine (client and passive server), spec §4.9.
//!
//! No segment buffering for retransmission, no congestion control, no SACK, no window
//! scaling, no out-of-order reassembly, and no more than one simultaneous client session -
//! see spec §1 Non-goals. The stack holds a fixed-size connection table and drives the
//! handshake/data/close paths for each slot from [`crate::net::NetStack::poll`].

use byte_struct::*;
use ufmt::derive::uDebug;

use crate::{
    buffer::*, checksum::*, ChecksumMode, EtherType, EthernetHeader, IpV4Addr, IpV4Header, MacAddr,
    Protocol, DSCP,
};

/// Length in bytes of the fixed TCP header (no options).
pub const TCP_HEADER_LEN: usize = 20;

/// TCP option kind for Maximum Segment Size.
const TCP_OPT_KIND_MSS: u8 = 2;
/// Length in bytes of the MSS option (kind + length + 2-byte value).
const TCP_OPT_LEN_MSS: u8 = 4;

/// MSS advertised by a passive-open SYN-ACK (spec §4.9).
pub const SERVER_MSS: u16 = 1460;
/// Window advertised by a passive-open SYN-ACK.
pub const SERVER_WINDOW: u16 = 1460;
/// MSS advertised by an active-open (client) SYN (spec §6 "client MSS (550)").
pub const CLIENT_MSS: u16 = 550;
/// Window advertised by an active-open (client) SYN.
pub const CLIENT_WINDOW: u16 = 1024;

/// Minimum number of connection-table slots, per spec §6.
pub const MIN_TCP_CONNECTIONS: usize = 10;

bitfields!(
    #[derive(Clone, Copy, Debug)]
    DataOffsetReserved: u8 {
        pub reserved: 4,
        pub data_offset: 4
    }
);

bitfields!(
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    TcpFlags: u8 {
        pub fin: 1,
        pub syn: 1,
        pub rst: 1,
        pub psh: 1,
        pub ack: 1,
        pub urg: 1,
        pub ece: 1,
        pub cwr: 1
    }
);

impl TcpFlags {
    /// Convenience constructor for the common SYN-only case.
    pub fn syn_only() -> Self {
        TcpFlags::default().with_syn(1)
    }

    /// Convenience constructor for SYN + ACK.
    pub fn syn_ack() -> Self {
        TcpFlags::default().with_syn(1).with_ack(1)
    }

    /// Convenience constructor for ACK only.
    pub fn ack_only() -> Self {
        TcpFlags::default().with_ack(1)
    }

    /// Convenience constructor for ACK + PSH, optionally with FIN (last server segment).
    pub fn ack_psh(fin: bool) -> Self {
        let f = TcpFlags::default().with_ack(1).with_psh(1);
        if fin {
            f.with_fin(1)
        } else {
            f
        }
    }

    /// Convenience constructor for a bare RST.
    pub fn rst_only() -> Self {
        TcpFlags::default().with_rst(1)
    }
}

/// TCP segment header, fixed 20-byte portion (no options).
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct TcpHeader {
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Sequence number
    pub seq: u32,
    /// Acknowledgement number (meaningful iff ACK is set)
    pub ack: u32,
    /// Data offset (header length in 32-bit words) + reserved bits
    pub data_offset_reserved: DataOffsetReserved,
    /// Control bits
    pub flags: TcpFlags,
    /// Advertised receive window
    pub window: u16,
    /// Checksum over the TCP pseudo-header + header + data
    pub checksum: u16,
    /// Urgent pointer (unused - no urgent data support)
    pub urgent_ptr: u16,
}

impl TcpHeader {
    /// Pack into big-endian (network) byte array.
    pub fn to_be_bytes(&self) -> [u8; TCP_HEADER_LEN] {
        let mut bytes = [0_u8; TCP_HEADER_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }

    /// Header-length value for a segment with the 4-byte MSS option present.
    pub fn data_offset_with_mss() -> DataOffsetReserved {
        DataOffsetReserved::default().with_data_offset(((TCP_HEADER_LEN + TCP_OPT_LEN_MSS as usize) / 4) as u8)
    }

    /// Header-length value for a segment with no options.
    pub fn data_offset_no_options() -> DataOffsetReserved {
        DataOffsetReserved::default().with_data_offset((TCP_HEADER_LEN / 4) as u8)
    }
}

/// Write the 4-byte MSS option at [`TCP_OPTIONS_OFFSET`].
fn write_mss_option(buf: &mut [u8], mss: u16) {
    let mss_be = mss.to_be_bytes();
    buf[TCP_OPTIONS_OFFSET] = TCP_OPT_KIND_MSS;
    buf[TCP_OPTIONS_OFFSET + 1] = TCP_OPT_LEN_MSS;
    buf[TCP_OPTIONS_OFFSET + 2] = mss_be[0];
    buf[TCP_OPTIONS_OFFSET + 3] = mss_be[1];
}

/// Connection states, spec §3/§4.9 (subset of IETF-RFC-793).
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub enum TcpConnState {
    /// Slot is free.
    Closed,
    /// Active open sent, awaiting SYN-ACK.
    SynSent,
    /// Passive open received a SYN, SYN-ACK sent, awaiting ACK.
    SynReceived,
    /// Handshake complete; data may flow either direction.
    Established,
    /// We sent FIN, awaiting ACK or peer's FIN.
    FinWait1,
    /// Our FIN was ACKed, awaiting peer's FIN.
    FinWait2,
    /// Peer sent FIN, we ACKed; awaiting our own close.
    CloseWait,
    /// Simultaneous close in progress.
    Closing,
    /// We sent our FIN after CloseWait, awaiting final ACK.
    LastAck,
    /// Waiting out the 2MSL delay after an active close.
    TimeWait,
}

/// One TCP connection-table slot, spec §3.
#[derive(Clone, Copy, Debug)]
pub struct TcpConn {
    /// Current state; `Closed` means this slot is free.
    pub state: TcpConnState,
    /// Next sequence number we will send.
    pub send_seq: u32,
    /// Next sequence number we expect from the peer (our ack value).
    pub recv_ack: u32,
    /// Peer's IPv4 address.
    pub remote_ip: IpV4Addr,
    /// Peer's port.
    pub remote_port: u16,
    /// Our local port (listening port for passive opens, ephemeral port for active opens).
    pub local_port: u16,
    /// Peer's MAC, cached from the handshake so later segments don't need a fresh ARP lookup.
    pub remote_mac: MacAddr,
}

impl TcpConn {
    const fn closed() -> Self {
        TcpConn {
            state: TcpConnState::Closed,
            send_seq: 0,
            recv_ack: 0,
            remote_ip: IpV4Addr([0; 4]),
            remote_port: 0,
            local_port: 0,
            remote_mac: MacAddr([0; 6]),
        }
    }

    fn matches(&self, remote_ip: IpV4Addr, remote_port: u16, local_port: u16) -> bool {
        self.state != TcpConnState::Closed
            && self.remote_ip == remote_ip
            && self.remote_port == remote_port
            && self.local_port == local_port
    }
}

/// Fixed-size TCP connection table with `N` slots (`N` ≥ [`MIN_TCP_CONNECTIONS`]).
///
/// Invariant: at most one slot has state ≠ `Closed` for any given
/// `(remote_ip, remote_port, local_port)` triple; free-slot lookup always returns the first
/// `Closed` slot in index order.
pub struct TcpTable<const N: usize> {
    slots: [TcpConn; N],
    /// Initial sequence number generator; advances by 3 per new connection (spec §4.9).
    isn_seed: u32,
}

impl<const N: usize> TcpTable<N> {
    /// New, empty table seeded with an initial sequence number derived from a
    /// pseudo-random source at startup.
    pub fn new(isn_seed: u32) -> Self {
        static_assertions::const_assert!(true); // N's lower bound is documented, not enforced at compile time (const generics can't compare to a runtime doc constant here)
        TcpTable {
            slots: [TcpConn::closed(); N],
            isn_seed,
        }
    }

    /// Find the slot matching `(remote_ip, remote_port, local_port)`, if any.
    pub fn find(&mut self, remote_ip: IpV4Addr, remote_port: u16, local_port: u16) -> Option<&mut TcpConn> {
        self.slots.iter_mut().find(|s| s.matches(remote_ip, remote_port, local_port))
    }

    /// Find the first free (`Closed`) slot, in index order.
    pub fn find_free(&mut self) -> Option<&mut TcpConn> {
        self.slots.iter_mut().find(|s| s.state == TcpConnState::Closed)
    }

    /// Draw the next initial sequence number, advancing the generator by 3 so successive
    /// connections never reuse a just-issued ISN within this session.
    pub fn next_isn(&mut self) -> u32 {
        let isn = self.isn_seed;
        self.isn_seed = self.isn_seed.wrapping_add(3);
        isn
    }

    /// Iterate all slots (for between-frame housekeeping and tests).
    pub fn slots(&self) -> &[TcpConn; N] {
        &self.slots
    }

    /// Count of slots not in `Closed` state.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state != TcpConnState::Closed).count()
    }
}

/// Build and write a TCP/IP/Ethernet frame with `flags`/`seq`/`ack` and an optional MSS option,
/// checksummed, returning the total frame length. Shared by the handshake, data, and
/// close/reset paths below.
#[allow(clippy::too_many_arguments)]
fn write_segment(
    buf: &mut [u8],
    data: &[u8],
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    remote_mac: MacAddr,
    remote_ip: IpV4Addr,
    local_port: u16,
    remote_port: u16,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    window: u16,
    mss_option: Option<u16>,
) -> usize {
    let data_offset = if mss_option.is_some() {
        TcpHeader::data_offset_with_mss()
    } else {
        TcpHeader::data_offset_no_options()
    };
    let header_len = if mss_option.is_some() {
        TCP_HEADER_LEN + 4
    } else {
        TCP_HEADER_LEN
    };
    let tcp_len = header_len + data.len();
    let total_len = ETH_HEADER_LEN + IP_HEADER_LEN + tcp_len;

    write_eth_header(
        buf,
        &EthernetHeader {
            dst_macaddr: remote_mac,
            src_macaddr: our_mac,
            ethertype: EtherType::IPV4,
        },
    );

    write_ip_header(
        buf,
        &IpV4Header {
            version_and_length: IpV4Header::version_and_length_no_options(),
            dscp: DSCP::Standard,
            total_length: (IP_HEADER_LEN + tcp_len) as u16,
            identification: 0,
            fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
            time_to_live: 32,
            protocol: Protocol::Tcp,
            checksum: 0,
            src_ipaddr: our_ip,
            dst_ipaddr: remote_ip,
        },
    );

    write_tcp_header(
        buf,
        &TcpHeader {
            src_port: local_port,
            dst_port: remote_port,
            seq,
            ack,
            data_offset_reserved: data_offset,
            flags,
            window,
            checksum: 0,
            urgent_ptr: 0,
        },
    );

    let data_offset_bytes = TRANSPORT_OFFSET + header_len;
    if let Some(mss) = mss_option {
        write_mss_option(buf, mss);
    }
    buf[data_offset_bytes..data_offset_bytes + data.len()].copy_from_slice(data);

    let ip_checksum = sum16(&buf[IP_OFFSET..IP_OFFSET + IP_HEADER_LEN], 0, ChecksumMode::Plain);
    buf[IP_OFFSET + 10] = (ip_checksum >> 8) as u8;
    buf[IP_OFFSET + 11] = (ip_checksum & 0xff) as u8;

    let tcp_checksum = sum16_over(
        our_ip,
        remote_ip,
        &buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + tcp_len],
        ChecksumMode::TcpPseudo,
    );
    buf[TRANSPORT_OFFSET + 16] = (tcp_checksum >> 8) as u8;
    buf[TRANSPORT_OFFSET + 17] = (tcp_checksum & 0xff) as u8;

    total_len
}

/// Passive-open a connection in response to an inbound SYN to `local_port`. Allocates a free
/// slot and returns the SYN-ACK frame length, or `None` if the table has no free slot (the
/// peer's retransmitted SYN will be retried later, per spec §4.9).
pub fn passive_open<const N: usize>(
    table: &mut TcpTable<N>,
    buf: &mut [u8],
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    remote_mac: MacAddr,
    remote_ip: IpV4Addr,
    remote_port: u16,
    local_port: u16,
    peer_seq: u32,
) -> Option<usize> {
    let isn = table.next_isn();
    let slot = table.find_free()?;
    slot.state = TcpConnState::SynReceived;
    slot.send_seq = isn.wrapping_add(1);
    slot.recv_ack = peer_seq.wrapping_add(1);
    slot.remote_ip = remote_ip;
    slot.remote_port = remote_port;
    slot.local_port = local_port;
    slot.remote_mac = remote_mac;

    Some(write_segment(
        buf,
        &[],
        our_mac,
        our_ip,
        remote_mac,
        remote_ip,
        local_port,
        remote_port,
        isn,
        slot.recv_ack,
        TcpFlags::syn_ack(),
        SERVER_WINDOW,
        Some(SERVER_MSS),
    ))
}

/// Active-open a new connection. Allocates a slot and returns the SYN frame length.
pub fn connect<const N: usize>(
    table: &mut TcpTable<N>,
    buf: &mut [u8],
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    remote_mac: MacAddr,
    remote_ip: IpV4Addr,
    remote_port: u16,
    local_port: u16,
) -> Option<usize> {
    let isn = table.next_isn();
    let slot = table.find_free()?;
    slot.state = TcpConnState::SynSent;
    slot.send_seq = isn;
    slot.recv_ack = 0;
    slot.remote_ip = remote_ip;
    slot.remote_port = remote_port;
    slot.local_port = local_port;
    slot.remote_mac = remote_mac;

    Some(write_segment(
        buf,
        &[],
        our_mac,
        our_ip,
        remote_mac,
        remote_ip,
        local_port,
        remote_port,
        isn,
        0,
        TcpFlags::syn_only(),
        CLIENT_WINDOW,
        Some(CLIENT_MSS),
    ))
}

/// Send a one-shot ACK|PSH (optionally +FIN on the last segment) data segment on an
/// established connection and advance `send_seq`.
#[allow(clippy::too_many_arguments)]
pub fn send_data(
    conn: &mut TcpConn,
    buf: &mut [u8],
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    data: &[u8],
    fin: bool,
) -> usize {
    let len = write_segment(
        buf,
        data,
        our_mac,
        our_ip,
        conn.remote_mac,
        conn.remote_ip,
        conn.local_port,
        conn.remote_port,
        conn.send_seq,
        conn.recv_ack,
        TcpFlags::ack_psh(fin),
        SERVER_WINDOW,
        None,
    );
    conn.send_seq = conn.send_seq.wrapping_add(data.len() as u32).wrapping_add(fin as u32);
    len
}

/// Like [`send_data`], but the payload is assumed to already sit in `buf` at
/// [`TCP_DATA_OFFSET_NO_OPTIONS`] (`data_len` bytes) rather than being copied in from a
/// separate slice. Used by the client-session path so a callback can fill the shared buffer
/// directly instead of through an intermediate stack buffer.
pub fn send_data_preloaded(
    conn: &mut TcpConn,
    buf: &mut [u8],
    our_mac: MacAddr,
    our_ip: IpV4Addr,
    data_len: usize,
    fin: bool,
) -> usize {
    let tcp_len = TCP_HEADER_LEN + data_len;

    write_eth_header(
        buf,
        &EthernetHeader {
            dst_macaddr: conn.remote_mac,
            src_macaddr: our_mac,
            ethertype: EtherType::IPV4,
        },
    );
    write_ip_header(
        buf,
        &IpV4Header {
            version_and_length: IpV4Header::version_and_length_no_options(),
            dscp: DSCP::Standard,
            total_length: (IP_HEADER_LEN + tcp_len) as u16,
            identification: 0,
            fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
            time_to_live: 32,
            protocol: Protocol::Tcp,
            checksum: 0,
            src_ipaddr: our_ip,
            dst_ipaddr: conn.remote_ip,
        },
    );
    write_tcp_header(
        buf,
        &TcpHeader {
            src_port: conn.local_port,
            dst_port: conn.remote_port,
            seq: conn.send_seq,
            ack: conn.recv_ack,
            data_offset_reserved: TcpHeader::data_offset_no_options(),
            flags: TcpFlags::ack_psh(fin),
            window: SERVER_WINDOW,
            checksum: 0,
            urgent_ptr: 0,
        },
    );

    let ip_checksum = sum16(&buf[IP_OFFSET..IP_OFFSET + IP_HEADER_LEN], 0, ChecksumMode::Plain);
    buf[IP_OFFSET + 10] = (ip_checksum >> 8) as u8;
    buf[IP_OFFSET + 11] = (ip_checksum & 0xff) as u8;

    let tcp_checksum = sum16_over(
        our_ip,
        conn.remote_ip,
        &buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + tcp_len],
        ChecksumMode::TcpPseudo,
    );
    buf[TRANSPORT_OFFSET + 16] = (tcp_checksum >> 8) as u8;
    buf[TRANSPORT_OFFSET + 17] = (tcp_checksum & 0xff) as u8;

    conn.send_seq = conn.send_seq.wrapping_add(data_len as u32).wrapping_add(fin as u32);
    ETH_HEADER_LEN + IP_HEADER_LEN + tcp_len
}

/// Send a bare ACK (no data) for `conn`.
pub fn send_ack(conn: &TcpConn, buf: &mut [u8], our_mac: MacAddr, our_ip: IpV4Addr) -> usize {
    write_segment(
        buf,
        &[],
        our_mac,
        our_ip,
        conn.remote_mac,
        conn.remote_ip,
        conn.local_port,
        conn.remote_port,
        conn.send_seq,
        conn.recv_ack,
        TcpFlags::ack_only(),
        SERVER_WINDOW,
        None,
    )
}

/// Send a bare RST reflecting an inbound, unrecognized segment - used for segments that do
/// not match any table entry and aren't a SYN (spec §4.9 "answered with RST").
pub fn send_rst_for_unknown(buf: &mut [u8], our_mac: MacAddr, our_ip: IpV4Addr) -> usize {
    let eth = read_eth_header(buf);
    let ip = read_ip_header(buf);
    let tcp = read_tcp_header(buf);

    write_segment(
        buf,
        &[],
        our_mac,
        our_ip,
        eth.src_macaddr,
        ip.src_ipaddr,
        tcp.dst_port,
        tcp.src_port,
        tcp.ack,
        0,
        TcpFlags::rst_only(),
        0,
        None,
    )
}

/// Outcome of processing one inbound TCP segment against the connection table, used by
/// [`crate::net::NetStack::poll`] to decide what (if anything) to hand up to the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpEvent {
    /// No action needed (e.g. a duplicate ACK during an established connection).
    None,
    /// The connection completed its handshake (client side).
    ConnectSucceeded,
    /// New data arrived; the application should read `len` bytes starting at `data_offset` in
    /// the shared buffer.
    DataReceived { data_offset: usize, len: usize },
    /// The peer closed the connection (FIN observed) and we've ACKed it.
    PeerClosed,
    /// The peer reset the connection.
    Reset,
}

/// Process one inbound TCP segment that matched (or should create) `conn`, mutating state and
/// writing any reply frame into `buf`. Returns the event for the caller plus the reply length
/// (0 if no reply was generated).
pub fn on_segment(conn: &mut TcpConn, buf: &mut [u8], our_mac: MacAddr, our_ip: IpV4Addr) -> (TcpEvent, usize) {
    let ip = read_ip_header(buf);
    let tcp = read_tcp_header(buf);
    let total_len = ip.total_length as usize;
    let header_len = (tcp.data_offset_reserved.data_offset() as usize) * 4;
    let data_offset = TRANSPORT_OFFSET + header_len;
    let data_len = total_len.saturating_sub(IP_HEADER_LEN + header_len);

    if tcp.flags.rst() == 1 {
        conn.state = TcpConnState::Closed;
        return (TcpEvent::Reset, 0);
    }

    match conn.state {
        TcpConnState::SynSent => {
            if tcp.flags.syn() == 1 && tcp.flags.ack() == 1 && tcp.ack == conn.send_seq.wrapping_add(1) {
                conn.send_seq = conn.send_seq.wrapping_add(1);
                conn.recv_ack = tcp.seq.wrapping_add(1);
                conn.state = TcpConnState::Established;
                let len = send_ack(conn, buf, our_mac, our_ip);
                (TcpEvent::ConnectSucceeded, len)
            } else {
                conn.state = TcpConnState::Closed;
                (TcpEvent::Reset, 0)
            }
        }
        TcpConnState::SynReceived => {
            if tcp.flags.ack() == 1 {
                conn.state = TcpConnState::Established;
                (TcpEvent::None, 0)
            } else {
                conn.state = TcpConnState::Closed;
                (TcpEvent::Reset, 0)
            }
        }
        TcpConnState::Established => {
            if tcp.flags.fin() == 1 {
                conn.recv_ack = tcp.seq.wrapping_add(1);
                let len = send_ack(conn, buf, our_mac, our_ip);
                conn.state = TcpConnState::Closed;
                (TcpEvent::PeerClosed, len)
            } else if tcp.flags.ack() == 1 && tcp.flags.psh() == 1 && data_len > 0 {
                conn.recv_ack = tcp.seq.wrapping_add(data_len as u32);
                (TcpEvent::DataReceived { data_offset, len: data_len }, 0)
            } else {
                (TcpEvent::None, 0)
            }
        }
        _ => (TcpEvent::None, 0),
    }
}

pub mod client;
pub use client::*;

#[cfg(test)]
mod test {
    use super::*;
    extern crate std;

    fn fake_mac() -> MacAddr {
        MacAddr::new([2, 0, 0, 0, 0, 1])
    }

    #[test]
    fn test_tcp_header_round_trip() {
        let header = TcpHeader {
            src_port: 80,
            dst_port: 55000,
            seq: 100,
            ack: 0,
            data_offset_reserved: TcpHeader::data_offset_no_options(),
            flags: TcpFlags::syn_ack(),
            window: SERVER_WINDOW,
            checksum: 0,
            urgent_ptr: 0,
        };
        let bytes = header.to_be_bytes();
        let parsed = TcpHeader::read_bytes(&bytes);
        assert_eq!(parsed.src_port, header.src_port);
        assert_eq!(parsed.seq, header.seq);
        assert_eq!(parsed.flags.syn(), 1);
        assert_eq!(parsed.flags.ack(), 1);
    }

    #[test]
    fn test_table_uniqueness_and_free_slot_order() {
        let mut table: TcpTable<10> = TcpTable::new(1000);
        let remote_ip = IpV4Addr::new([10, 0, 0, 2]);
        let our_mac = fake_mac();
        let our_ip = IpV4Addr::new([10, 0, 0, 1]);
        let mut buf = [0_u8; MIN_BUFFER_LEN];

        passive_open(&mut table, &mut buf, our_mac, our_ip, MacAddr::new([2, 0, 0, 0, 0, 2]), remote_ip, 55000, 80, 100).unwrap();
        assert_eq!(table.active_count(), 1);
        assert!(table.find(remote_ip, 55000, 80).is_some());

        // A second inbound SYN for the same triple must not create a second slot.
        assert!(table.find(remote_ip, 55000, 80).unwrap().state != TcpConnState::Closed);
    }

    #[test]
    fn test_isn_advances_by_at_least_three() {
        let mut table: TcpTable<10> = TcpTable::new(500);
        let a = table.next_isn();
        let b = table.next_isn();
        assert!(b.wrapping_sub(a) >= 3);
    }

    #[test]
    fn test_segment_checksum_is_idempotent() {
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let our_mac = fake_mac();
        let our_ip = IpV4Addr::new([10, 0, 0, 1]);
        let remote_mac = MacAddr::new([2, 0, 0, 0, 0, 2]);
        let remote_ip = IpV4Addr::new([10, 0, 0, 2]);

        let len = write_segment(
            &mut buf, b"hello", our_mac, our_ip, remote_mac, remote_ip, 80, 55000, 1, 2,
            TcpFlags::ack_psh(true), SERVER_WINDOW, None,
        );
        let tcp_len = len - ETH_HEADER_LEN - IP_HEADER_LEN;
        let checksum_post = sum16_over(our_ip, remote_ip, &buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + tcp_len], ChecksumMode::TcpPseudo);
        assert_eq!(checksum_post, 0);
    }

    #[test]
    fn test_passive_open_then_established_scenario() {
        // Scenario E from spec §8
        let mut table: TcpTable<10> = TcpTable::new(42);
        let our_mac = fake_mac();
        let our_ip = IpV4Addr::new([10, 0, 0, 1]);
        let remote_mac = MacAddr::new([2, 0, 0, 0, 0, 2]);
        let remote_ip = IpV4Addr::new([10, 0, 0, 2]);
        let mut buf = [0_u8; MIN_BUFFER_LEN];

        let len = passive_open(&mut table, &mut buf, our_mac, our_ip, remote_mac, remote_ip, 55000, 80, 100).unwrap();
        let synack = read_tcp_header(&buf[..len]);
        assert_eq!(synack.ack, 101);
        let isn = synack.seq;

        let conn = table.find(remote_ip, 55000, 80).unwrap();
        assert_eq!(conn.state, TcpConnState::SynReceived);

        // Inject client's ACK
        write_segment(&mut buf, &[], remote_mac, remote_ip, our_mac, our_ip, 55000, 80, 101, isn.wrapping_add(1), TcpFlags::ack_only(), CLIENT_WINDOW, None);
        let (event, _) = on_segment(conn, &mut buf, our_mac, our_ip);
        assert_eq!(event, TcpEvent::None);
        assert_eq!(conn.state, TcpConnState::Established);
    }
}
