//! Client-side TCP session context, spec §3/§4.9.
//!
//! A singleton, not a table slot: at most one outstanding client-initiated request is tracked
//! at a time. The 3-bit file descriptor `fd` returned by [`tcp_req`] is embedded in the low
//! byte of the ephemeral source port so an inbound reply can be routed back to its callbacks
//! by port number alone, without a secondary lookup table (spec §4.9 point 2, §6 "Embedding fd
//! in the ephemeral port").

use crate::{IpV4Addr, MacAddr};

use super::{connect, on_segment, send_data, send_data_preloaded, TcpConn, TcpConnState, TcpEvent, TcpTable};
use crate::buffer::TCP_DATA_OFFSET_NO_OPTIONS;

/// High byte of every client-initiated TCP source port (spec §6 configuration constants).
pub const TCP_CLIENT_SRC_PORT_H: u8 = 11;

/// Number of distinct file descriptors the 3-bit `fd` field can address.
pub const MAX_CLIENT_FDS: u8 = 8;

/// Result-callback status codes (spec §4.9 point 4/5).
pub mod status {
    /// Data arrived and was delivered to the callback.
    pub const OK: u8 = 0;
    /// The peer reset the connection.
    pub const RESET: u8 = 3;
}

/// What the stack does with a client-initiated session on each state transition, supplied by
/// the application. Modeled as a trait instead of C-style function pointers (spec §6
/// "Function-pointer dispatch").
pub trait TcpClientCallbacks {
    /// Called once after the handshake completes, to obtain the request bytes to send.
    /// Returns the number of bytes written into `buf`.
    fn datafill(&mut self, fd: u8, buf: &mut [u8]) -> usize;

    /// Called when data arrives for `fd` (`status::OK`) or when the session failed
    /// (`status::RESET`). A nonzero return from an `OK` call tells the stack to close the
    /// connection (send FIN) immediately after.
    fn result(&mut self, fd: u8, status: u8, data_offset: usize, data_len: usize) -> u8;
}

/// Internal phase of the singleton client session, distinct from the table slot's
/// [`TcpConnState`] because a request can be queued before the gateway MAC is even resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientPhase {
    /// No request outstanding.
    Idle,
    /// `tcp_req` was called; waiting for the gateway MAC to resolve before the SYN can go out.
    WaitingForGw,
    /// SYN sent or further along; tracked via the connection table slot's own state.
    InFlight,
}

/// Client-side TCP session singleton (spec §3 "Client-side TCP session context").
pub struct TcpClientSession {
    phase: ClientPhase,
    fd: u8,
    next_fd: u8,
    src_port_low_counter: u8,
    remote_ip: IpV4Addr,
    remote_port: u16,
    local_port: u16,
}

impl TcpClientSession {
    /// New, idle session.
    pub fn new() -> Self {
        TcpClientSession {
            phase: ClientPhase::Idle,
            fd: 0,
            next_fd: 0,
            src_port_low_counter: 0,
            remote_ip: IpV4Addr::ANY,
            remote_port: 0,
            local_port: 0,
        }
    }

    /// Encode the ephemeral source port: high byte is [`TCP_CLIENT_SRC_PORT_H`], low byte's
    /// top 3 bits carry `fd`, bottom 5 bits are a rolling per-connection counter (spec §6
    /// "high 3 bits of the low byte carry fd, low 5 bits the per-connection counter").
    fn encode_port(&self, fd: u8) -> u16 {
        let low = ((fd & 0x07) << 5) | (self.src_port_low_counter & 0x1F);
        ((TCP_CLIENT_SRC_PORT_H as u16) << 8) | (low as u16)
    }

    /// Decode the `fd` carried by a previously-encoded ephemeral port.
    pub fn decode_fd(port: u16) -> u8 {
        ((port & 0xFF) >> 5) as u8 & 0x07
    }

    /// Is any client request outstanding?
    pub fn is_busy(&self) -> bool {
        self.phase != ClientPhase::Idle
    }

    /// Record a new client request (spec §4.9 point 1). Returns the allocated `fd`, or `None`
    /// if a request is already outstanding (only one concurrent client session is supported).
    pub fn tcp_req(&mut self, remote_ip: IpV4Addr, remote_port: u16) -> Option<u8> {
        if self.is_busy() {
            return None;
        }
        let fd = self.next_fd % MAX_CLIENT_FDS;
        self.next_fd = self.next_fd.wrapping_add(1);
        self.fd = fd;
        self.remote_ip = remote_ip;
        self.remote_port = remote_port;
        self.phase = ClientPhase::WaitingForGw;
        Some(fd)
    }

    /// Between-frame housekeeping: once the gateway MAC is known, emit the SYN for a queued
    /// request. Returns the SYN frame length, or `None` if nothing is queued or the table has
    /// no free slot.
    pub fn poll_gateway_ready<const N: usize>(
        &mut self,
        table: &mut TcpTable<N>,
        buf: &mut [u8],
        our_mac: MacAddr,
        our_ip: IpV4Addr,
        remote_mac: MacAddr,
    ) -> Option<usize> {
        if self.phase != ClientPhase::WaitingForGw {
            return None;
        }
        self.local_port = self.encode_port(self.fd);
        self.src_port_low_counter = self.src_port_low_counter.wrapping_add(1);
        let len = connect(
            table,
            buf,
            our_mac,
            our_ip,
            remote_mac,
            self.remote_ip,
            self.remote_port,
            self.local_port,
        )?;
        self.phase = ClientPhase::InFlight;
        Some(len)
    }

    /// Locate this session's connection-table slot, if any.
    pub fn find_slot<'a, const N: usize>(&self, table: &'a mut TcpTable<N>) -> Option<&'a mut TcpConn> {
        if self.phase != ClientPhase::InFlight {
            return None;
        }
        table.find(self.remote_ip, self.remote_port, self.local_port)
    }

    /// Process one inbound segment for this session's slot, invoking `callbacks` as described
    /// in spec §4.9 points 3-5. Returns the reply frame length written into `buf`, if any.
    pub fn on_inbound<const N: usize>(
        &mut self,
        table: &mut TcpTable<N>,
        buf: &mut [u8],
        our_mac: MacAddr,
        our_ip: IpV4Addr,
        callbacks: &mut impl TcpClientCallbacks,
    ) -> usize {
        let fd = self.fd;
        let was_established = self
            .find_slot(table)
            .map(|s| s.state == TcpConnState::Established)
            .unwrap_or(false);

        let slot = match self.find_slot(table) {
            Some(s) => s,
            None => return 0,
        };
        let prior_state = slot.state;
        let (event, reply_len) = on_segment(slot, buf, our_mac, our_ip);

        match event {
            TcpEvent::ConnectSucceeded => {
                let n = callbacks.datafill(fd, &mut buf[TCP_DATA_OFFSET_NO_OPTIONS..]);
                let slot = self.find_slot(table).expect("slot present for just-established session");
                send_data_preloaded(slot, buf, our_mac, our_ip, n, false)
            }
            TcpEvent::DataReceived { data_offset, len } => {
                let close = callbacks.result(fd, status::OK, data_offset, len);
                if close != 0 {
                    let slot = self.find_slot(table).expect("slot present while session in flight");
                    let len = send_data(slot, buf, our_mac, our_ip, &[], true);
                    slot.state = TcpConnState::FinWait1;
                    len
                } else {
                    reply_len
                }
            }
            TcpEvent::Reset => {
                callbacks.result(fd, status::RESET, 0, 0);
                self.phase = ClientPhase::Idle;
                0
            }
            TcpEvent::PeerClosed => {
                if was_established || prior_state == TcpConnState::Established {
                    callbacks.result(fd, status::OK, 0, 0);
                }
                self.phase = ClientPhase::Idle;
                reply_len
            }
            TcpEvent::None => reply_len,
        }
    }
}

impl Default for TcpClientSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Send an HTTP response with flags ACK|PSH|FIN, the one-shot server reply shape spec §4.9
/// uses for every passive-open application response (spec §3 "HTTP" handler).
pub fn http_reply(conn: &mut TcpConn, buf: &mut [u8], our_mac: MacAddr, our_ip: IpV4Addr, body: &[u8]) -> usize {
    send_data(conn, buf, our_mac, our_ip, body, true)
}

#[cfg(test)]
mod test {
    use super::*;
    extern crate std;
    use std::vec::Vec;

    struct RecordingCallbacks {
        fill_bytes: Vec<u8>,
        last_result: Option<(u8, u8, usize, usize)>,
    }

    impl TcpClientCallbacks for RecordingCallbacks {
        fn datafill(&mut self, _fd: u8, buf: &mut [u8]) -> usize {
            buf[..self.fill_bytes.len()].copy_from_slice(&self.fill_bytes);
            self.fill_bytes.len()
        }
        fn result(&mut self, fd: u8, status: u8, data_offset: usize, data_len: usize) -> u8 {
            self.last_result = Some((fd, status, data_offset, data_len));
            0
        }
    }

    #[test]
    fn test_port_encoding_round_trips_fd() {
        let mut session = TcpClientSession::new();
        session.fd = 5;
        let port = session.encode_port(5);
        assert_eq!(TcpClientSession::decode_fd(port), 5);
        assert_eq!(port >> 8, TCP_CLIENT_SRC_PORT_H as u16);
    }

    #[test]
    fn test_tcp_req_then_gateway_ready_scenario() {
        // Scenario F from spec §8
        let mut session = TcpClientSession::new();
        let mut table: TcpTable<10> = TcpTable::new(77);
        let mut buf = [0_u8; crate::buffer::MIN_BUFFER_LEN];
        let our_mac = MacAddr::new([2, 0, 0, 0, 0, 1]);
        let our_ip = IpV4Addr::new([10, 0, 0, 1]);
        let remote_mac = MacAddr::new([2, 0, 0, 0, 0, 2]);
        let remote_ip = IpV4Addr::new([10, 0, 0, 2]);

        let fd = session.tcp_req(remote_ip, 80).unwrap();
        assert_eq!(fd, 0);
        assert!(session.is_busy());

        let len = session
            .poll_gateway_ready(&mut table, &mut buf, our_mac, our_ip, remote_mac)
            .unwrap();
        assert!(len > 0);
        assert_eq!(TcpClientSession::decode_fd(session.local_port), fd);

        let mut callbacks = RecordingCallbacks { fill_bytes: std::vec![1, 2, 3], last_result: None };

        // Inject SYN-ACK from the server back at our local (ephemeral) port.
        let syn = crate::tcp::read_tcp_header(&buf);
        let isn = 5000_u32;
        crate::buffer::write_eth_header(
            &mut buf,
            &crate::EthernetHeader { dst_macaddr: our_mac, src_macaddr: remote_mac, ethertype: crate::EtherType::IPV4 },
        );
        crate::buffer::write_ip_header(
            &mut buf,
            &crate::IpV4Header {
                version_and_length: crate::IpV4Header::version_and_length_no_options(),
                dscp: crate::DSCP::Standard,
                total_length: (crate::ip::IP_HEADER_LEN + 20) as u16,
                identification: 0,
                fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
                time_to_live: 64,
                protocol: crate::Protocol::Tcp,
                checksum: 0,
                src_ipaddr: remote_ip,
                dst_ipaddr: our_ip,
            },
        );
        crate::buffer::write_tcp_header(
            &mut buf,
            &crate::tcp::TcpHeader {
                src_port: 80,
                dst_port: session.local_port,
                seq: isn,
                ack: syn.seq.wrapping_add(1),
                data_offset_reserved: crate::tcp::TcpHeader::data_offset_no_options(),
                flags: crate::tcp::TcpFlags::syn_ack(),
                window: 1024,
                checksum: 0,
                urgent_ptr: 0,
            },
        );

        let reply_len = session.on_inbound(&mut table, &mut buf, our_mac, our_ip, &mut callbacks);
        assert!(reply_len > 0);
        let data_segment = crate::tcp::read_tcp_header(&buf[..reply_len]);
        assert_eq!(data_segment.flags.psh(), 1);
    }
}
