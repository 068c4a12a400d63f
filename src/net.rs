//! The poll loop, between-frame housekeeping, and startup orchestration that tie every other
//! module together into one cooperative stack, spec §4.10/§5.
//!
//! Grounded on `examples/original_source/src/ip_arp_udp_tcp.c`'s `packetloop_icmp_tcp` (the
//! per-frame classification order below) and `allocateIPAddress` (the DHCP bring-up loop,
//! which is a distinct function from steady-state dispatch there too), and on
//! `examples/original_source/src/UDPCommandHandler.c`'s prefix-matched command table.

use crate::*;

use byte_struct::{ByteStruct, ByteStructLen};

/// High byte of a destination port routed to the passive HTTP listener (spec §6 "listening
/// HTTP port (80)").
pub const HTTP_LISTEN_PORT: u16 = 80;

/// Upper bound on poll iterations spent resolving the gateway MAC during [`NetStack::bring_up`],
/// so a network with no reachable gateway can't hang startup forever.
const GW_RESOLVE_MAX_POLLS: u32 = 4_000;

/// Application hook invoked when an inbound UDP payload's prefix matches a
/// [`UdpCommandEntry::name`] (spec §6 "UDP command dispatch"). Modeled as a trait instead of a
/// raw function pointer so the table can hold handlers that close over application state,
/// echoing [`TcpClientCallbacks`] (spec §9 "avoid C-style function pointers").
pub trait UdpCommandHandler {
    /// Invoked with the payload bytes following the matched name.
    fn call(&mut self, arg: &[u8]);
}

/// One entry in a [`dispatch_udp_command`] table: a literal name and the handler invoked when
/// an inbound UDP payload begins with it.
pub struct UdpCommandEntry<'a> {
    /// Command name, matched as a literal prefix of the payload.
    pub name: &'static [u8],
    /// Handler invoked with the remainder of the payload after `name`.
    pub handler: &'a mut dyn UdpCommandHandler,
}

/// Match `payload` against each entry's name in order - first match wins, mirroring the
/// original's `strncmp`-based command table - and invoke its handler. Logs the literal
/// `"Error: Unexpected UDP message"` and returns `false` if nothing matches (spec §7).
pub fn dispatch_udp_command(entries: &mut [UdpCommandEntry], payload: &[u8], log: &mut impl LogSink) -> bool {
    for entry in entries.iter_mut() {
        if payload.len() >= entry.name.len() && &payload[..entry.name.len()] == entry.name {
            entry.handler.call(&payload[entry.name.len()..]);
            return true;
        }
    }
    log.log("Error: Unexpected UDP message");
    false
}

/// Mix `salt` with every octet of `mac` into a single pseudo-random `u32`, used to seed the
/// DHCP transaction id and TCP initial sequence number generators at startup (spec §5: "a
/// pseudo-random source at startup" - there is no RNG in this crate's dependency stack, so the
/// one piece of per-device entropy available, the MAC address, stands in for it).
fn derive_seed(mac: MacAddr, salt: u32) -> u32 {
    let mut h = salt ^ 0x9E37_79B9;
    for &b in mac.0.iter() {
        h = h.wrapping_mul(16_777_619).wrapping_add(b as u32);
    }
    h
}

/// The complete stack: host identity plus every subsystem's running state, spec §3.
pub struct NetStack<const N: usize = 10> {
    /// Host identity and addressing (mutated by DHCP or static configuration).
    pub config: NetConfig,
    /// Gateway MAC resolver.
    pub gateway: GwResolver,
    /// DHCP client state machine.
    pub dhcp: DhcpClient,
    /// DNS resolver.
    pub dns: DnsResolver,
    /// TCP connection table (passive-open slots plus the client session's slot).
    pub tcp: TcpTable<N>,
    /// Client-side TCP session singleton.
    pub tcp_client: TcpClientSession,
    /// Outstanding-ping tracker for `on_ping_reply`.
    pub icmp_watcher: IcmpWatcher,
    /// The most recent structured event, single-slot like [`IcmpWatcher`]'s own watch slot.
    /// Drained by [`Self::take_last_event`]; the stack itself never formats this into text
    /// (that's [`LogSink`]'s job), it only tracks which [`NetEvent`] last happened.
    last_event: Option<NetEvent>,
}

impl<const N: usize> NetStack<N> {
    /// New stack for `config`. DHCP's transaction id and TCP's initial sequence number are both
    /// derived from `config.mac` (see [`derive_seed`]); every other subsystem starts idle.
    pub fn new(config: NetConfig) -> Self {
        let dhcp_xid = derive_seed(config.mac, 0x4448_4350); // "DHCP"
        let tcp_isn = derive_seed(config.mac, 0x5443_5049); // "TCPI"
        NetStack {
            config,
            gateway: GwResolver::new(),
            dhcp: DhcpClient::new(dhcp_xid),
            dns: DnsResolver::new(),
            tcp: TcpTable::new(tcp_isn),
            tcp_client: TcpClientSession::new(),
            icmp_watcher: IcmpWatcher::default(),
            last_event: None,
        }
    }

    /// Take (and clear) the most recent [`NetEvent`], if any has happened since the last call.
    /// A caller that wants typed data instead of (or in addition to) [`LogSink`]'s free text
    /// polls this after every [`Self::poll`]/[`Self::bring_up`] call.
    pub fn take_last_event(&mut self) -> Option<NetEvent> {
        self.last_event.take()
    }

    /// Drive the startup sequence (spec §5 "initialization order"): MAC init, DHCP allocation,
    /// gateway MAC resolution, then an optional hostname resolution and NTP request. Distinct
    /// from [`Self::poll`]'s steady-state dispatch, grounded on the original's
    /// `allocateIPAddress` bring-up loop running before the main `packetloop_icmp_tcp` loop.
    /// Returns `true` iff a DHCP lease was bound.
    #[allow(clippy::too_many_arguments)]
    pub fn bring_up(
        &mut self,
        buf: &mut [u8],
        mac: &mut impl MacDriver,
        tick: &impl TickSource,
        resolve_hostname: Option<&[u8]>,
        request_ntp: bool,
        log: &mut impl LogSink,
    ) -> bool {
        mac.mac_init(self.config.mac);
        mac.mac_enable_broadcast();

        let our_mac = self.config.mac;
        let hostname = self.config.hostname;

        let mut attempt = 0_u8;
        let mut last_start_ms = tick.now_ms();
        let mut bound = false;
        self.dhcp.start(buf, mac, our_mac, &hostname, last_start_ms);

        while attempt < DHCP_MAX_ATTEMPTS {
            let len = mac.mac_recv(buf);
            if len > 0 {
                if let Some(lease) = self.dhcp.on_datagram(buf, mac, our_mac, &hostname, tick.now_ms()) {
                    self.config.ipaddr = lease.ipaddr;
                    self.config.netmask = lease.netmask;
                    self.config.gateway = lease.gateway;
                    self.config.dns_server = lease.dns_server;
                    self.config.dhcp_server = lease.server_id;
                    log.log("DHCP lease bound");
                    self.last_event = Some(NetEvent::DhcpBound);
                    bound = true;
                    break;
                }
            }
            let now = tick.now_ms();
            if now.saturating_sub(last_start_ms) >= DHCP_RETRY_TIMEOUT_MS {
                attempt += 1;
                last_start_ms = now;
                self.dhcp.start(buf, mac, our_mac, &hostname, now);
            }
        }

        if !bound {
            log.log("DHCP allocation failed");
            return false;
        }

        self.gateway.gw_arp_refresh();
        let our_ip = self.config.ipaddr;
        let gateway_ip = self.config.gateway;
        let mut polls = 0_u32;
        while !self.gateway.gw_mac_ready() && polls < GW_RESOLVE_MAX_POLLS {
            if self.gateway.should_send_whohas(mac.mac_link_up()) {
                let whohas = self.gateway.arp_whohas(our_mac, our_ip, gateway_ip);
                write_eth_header(
                    buf,
                    &EthernetHeader { dst_macaddr: MacAddr::BROADCAST, src_macaddr: our_mac, ethertype: EtherType::ARP },
                );
                whohas.write_bytes(&mut buf[ETH_HEADER_LEN..ETH_HEADER_LEN + ArpPayload::BYTE_LEN]);
                mac.mac_send(&buf[..ARP_FRAME_LEN]);
            }
            let len = mac.mac_recv(buf);
            if len > 0 {
                let eth = read_eth_header(buf);
                if eth.ethertype == EtherType::ARP {
                    let arp = ArpPayload::read_bytes(&buf[ETH_HEADER_LEN..ETH_HEADER_LEN + ArpPayload::BYTE_LEN]);
                    if arp.operation == ArpOperation::Response {
                        self.gateway.handle_arp_reply(&arp, gateway_ip);
                    }
                }
            }
            polls += 1;
        }

        if self.gateway.gw_mac_ready() {
            self.last_event = Some(NetEvent::GatewayResolved);
            let gw_mac = self.gateway.gw_mac;
            if let Some(name) = resolve_hostname {
                self.dns.request(buf, mac, name, our_mac, our_ip, gw_mac, self.config.dns_server, tick.now_ms());
            }
            if request_ntp {
                crate::ntp::request(buf, mac, our_mac, our_ip, gw_mac, self.config.ntp_server, our_mac.0[5]);
            }
        } else {
            log.log("Gateway MAC not resolved; skipping DNS/NTP bring-up requests");
        }

        true
    }

    /// Process one inbound frame (`len` bytes already in `buf`), or run between-frame
    /// housekeeping if `len == 0`. Returns `0` when the frame was fully handled internally, or
    /// the byte offset of TCP data within `buf` when application-level processing is needed
    /// (spec §4.10).
    #[allow(clippy::too_many_arguments)]
    pub fn poll(
        &mut self,
        buf: &mut [u8],
        len: usize,
        mac: &mut impl MacDriver,
        rtc: &mut impl Rtc,
        now: NowMs,
        commands: &mut [UdpCommandEntry],
        tcp_callbacks: &mut impl TcpClientCallbacks,
        ping_observer: &mut impl PingObserver,
        log: &mut impl LogSink,
    ) -> usize {
        if len == 0 {
            self.between_frames(buf, mac, now, log);
            return 0;
        }

        let eth = read_eth_header(buf);
        match eth.ethertype {
            EtherType::ARP => {
                self.handle_arp(buf, mac);
                return 0;
            }
            EtherType::IPV4 => {}
            _ => return 0,
        }

        let ip = read_ip_header(buf);
        let our_ip = self.config.ipaddr;
        let for_us = ip.dst_ipaddr == our_ip || ip.dst_ipaddr == IpV4Addr::BROADCAST || ip.dst_ipaddr == IpV4Addr::BROADCAST_LOCAL;
        if !for_us {
            return 0;
        }

        match ip.protocol {
            Protocol::Icmp => {
                self.handle_icmp(buf, mac, ping_observer);
                0
            }
            Protocol::Udp => self.handle_udp(buf, mac, rtc, now, commands, log),
            Protocol::Tcp => self.handle_tcp(buf, mac, tcp_callbacks, log),
            _ => 0,
        }
    }

    /// Between-frame housekeeping run whenever `poll` is called with `len == 0` (spec §4.10
    /// step 1): gateway ARP refresh, a queued client SYN once the gateway MAC is known, DNS
    /// retry, and DHCP renewal. DHCP's initial allocation is never retried here - only
    /// [`Self::bring_up`] drives that - but a bound lease past its duration is renewed.
    fn between_frames(&mut self, buf: &mut [u8], mac: &mut impl MacDriver, now: NowMs, log: &mut impl LogSink) {
        let our_mac = self.config.mac;
        let our_ip = self.config.ipaddr;
        let gateway_ip = self.config.gateway;
        let dns_server = self.config.dns_server;
        let hostname = self.config.hostname;

        if self.gateway.should_send_whohas(mac.mac_link_up()) {
            let whohas = self.gateway.arp_whohas(our_mac, our_ip, gateway_ip);
            write_eth_header(
                buf,
                &EthernetHeader { dst_macaddr: MacAddr::BROADCAST, src_macaddr: our_mac, ethertype: EtherType::ARP },
            );
            whohas.write_bytes(&mut buf[ETH_HEADER_LEN..ETH_HEADER_LEN + ArpPayload::BYTE_LEN]);
            mac.mac_send(&buf[..ARP_FRAME_LEN]);
        }

        if !self.gateway.gw_mac_ready() {
            return;
        }
        let gw_mac = self.gateway.gw_mac;

        if let Some(len) = self.tcp_client.poll_gateway_ready(&mut self.tcp, buf, our_mac, our_ip, gw_mac) {
            mac.mac_send(&buf[..len]);
        }

        if self.dns.retry_if_due(buf, mac, hostname.as_bytes(), our_mac, our_ip, gw_mac, dns_server, now) {
            log.log("DNS query retried");
        }

        if self.dhcp.lease_expired(now) {
            self.dhcp.mark_renewing();
        }
        if self.dhcp.state() == DhcpState::Renew {
            self.dhcp.send_renew(buf, mac, our_mac, gw_mac, &hostname, now);
            log.log("DHCP lease renewing");
            self.last_event = Some(NetEvent::DhcpRenewing);
        }
    }

    /// ARP classification (spec §4.10 step 2): answer requests addressed to us, consume replies
    /// to update the cached gateway MAC.
    fn handle_arp(&mut self, buf: &mut [u8], mac: &mut impl MacDriver) {
        let our_mac = self.config.mac;
        let our_ip = self.config.ipaddr;
        let arp = ArpPayload::read_bytes(&buf[ETH_HEADER_LEN..ETH_HEADER_LEN + ArpPayload::BYTE_LEN]);

        match arp.operation {
            ArpOperation::Request => {
                if let Some(reply) = self.gateway.handle_arp_request(&arp, our_mac, our_ip) {
                    let eth_reply = read_eth_header(buf).to_reflection(our_mac);
                    write_eth_header(buf, &eth_reply);
                    reply.write_bytes(&mut buf[ETH_HEADER_LEN..ETH_HEADER_LEN + ArpPayload::BYTE_LEN]);
                    mac.mac_send(&buf[..ARP_FRAME_LEN]);
                }
            }
            ArpOperation::Response => {
                if self.gateway.handle_arp_reply(&arp, self.config.gateway) {
                    self.last_event = Some(NetEvent::GatewayResolved);
                }
            }
            ArpOperation::Unimplemented => {}
        }
    }

    /// ICMP classification (spec §4.10 step 4): echo reply to an inbound echo request; consume
    /// an echo reply matching [`IcmpWatcher`] and notify `ping_observer`.
    fn handle_icmp(&mut self, buf: &mut [u8], mac: &mut impl MacDriver, ping_observer: &mut impl PingObserver) {
        let our_mac = self.config.mac;
        let our_ip = self.config.ipaddr;
        let ip = read_ip_header(buf);
        let icmp = read_icmp_header(buf);

        match icmp.icmp_type {
            IcmpType::EchoRequest => {
                let reply_icmp = echo_reply_header(&icmp);
                let total_len = ip.total_length as usize;
                let eth_reply = read_eth_header(buf).to_reflection(our_mac);
                write_eth_header(buf, &eth_reply);
                write_ip_header(buf, &IpV4Header { src_ipaddr: our_ip, dst_ipaddr: ip.src_ipaddr, checksum: 0, ..ip });
                write_icmp_header(buf, &reply_icmp);

                let ip_checksum = sum16(&buf[IP_OFFSET..IP_OFFSET + IP_HEADER_LEN], 0, ChecksumMode::Plain);
                buf[IP_OFFSET + 10] = (ip_checksum >> 8) as u8;
                buf[IP_OFFSET + 11] = (ip_checksum & 0xff) as u8;

                mac.mac_send(&buf[..ETH_HEADER_LEN + total_len]);
            }
            IcmpType::EchoReply => {
                let first_payload_byte = buf.get(ICMP_DATA_OFFSET).copied();
                if self.icmp_watcher.is_watched_reply(&icmp, first_payload_byte) {
                    self.icmp_watcher.clear();
                    ping_observer.on_ping_reply(ip.src_ipaddr);
                }
            }
            IcmpType::Unimplemented => {}
        }
    }

    /// UDP classification (spec §4.10 step 5): dispatch by the well-known source port a reply
    /// would carry (NTP, DNS) or the well-known destination port a request would carry (DHCP),
    /// else hand the payload to the application's command table.
    fn handle_udp(
        &mut self,
        buf: &mut [u8],
        mac: &mut impl MacDriver,
        rtc: &mut impl Rtc,
        now: NowMs,
        commands: &mut [UdpCommandEntry],
        log: &mut impl LogSink,
    ) -> usize {
        let our_mac = self.config.mac;
        let hostname = self.config.hostname;
        let udp = read_udp_header(buf);

        if udp.src_port == NTP_SERVER_PORT {
            let datetime = crate::ntp::process_answer(buf);
            crate::ntp::apply_to_rtc(datetime, rtc);
            return 0;
        }
        if udp.src_port == DNS_SERVER_PORT {
            if self.dns.process_answer(buf) {
                log.log("DNS answer received");
                self.last_event = Some(NetEvent::DnsResolved);
            }
            return 0;
        }
        if udp.dst_port == DHCP_CLIENT_PORT || udp.dst_port == DHCP_SERVER_PORT {
            if let Some(lease) = self.dhcp.on_datagram(buf, mac, our_mac, &hostname, now) {
                self.config.ipaddr = lease.ipaddr;
                self.config.netmask = lease.netmask;
                self.config.gateway = lease.gateway;
                self.config.dns_server = lease.dns_server;
                self.config.dhcp_server = lease.server_id;
                log.log("DHCP lease bound");
                self.last_event = Some(NetEvent::DhcpBound);
            }
            return 0;
        }

        let data_len = (udp.length as usize).saturating_sub(UDP_HEADER_LEN).min(buf.len().saturating_sub(UDP_DATA_OFFSET));
        if !dispatch_udp_command(commands, &buf[UDP_DATA_OFFSET..UDP_DATA_OFFSET + data_len], log) {
            self.last_event = Some(NetEvent::UnhandledUdpCommand);
        }
        0
    }

    /// TCP classification (spec §4.10 step 6): route a segment addressed to the client
    /// session's ephemeral port to [`TcpClientSession::on_inbound`]; otherwise look it up in the
    /// connection table, passive-open a new one on an inbound SYN to [`HTTP_LISTEN_PORT`], or
    /// answer with RST (spec §4.9 "answered with RST").
    fn handle_tcp(&mut self, buf: &mut [u8], mac: &mut impl MacDriver, callbacks: &mut impl TcpClientCallbacks, log: &mut impl LogSink) -> usize {
        let our_mac = self.config.mac;
        let our_ip = self.config.ipaddr;
        let ip = read_ip_header(buf);
        let tcp = read_tcp_header(buf);

        if ((tcp.dst_port >> 8) as u8) == TCP_CLIENT_SRC_PORT_H {
            let reply_len = self.tcp_client.on_inbound(&mut self.tcp, buf, our_mac, our_ip, callbacks);
            if reply_len > 0 {
                mac.mac_send(&buf[..reply_len]);
            }
            return 0;
        }

        let remote_ip = ip.src_ipaddr;
        if let Some(slot) = self.tcp.find(remote_ip, tcp.src_port, tcp.dst_port) {
            let (event, reply_len) = on_segment(slot, buf, our_mac, our_ip);
            match event {
                TcpEvent::DataReceived { data_offset, .. } => return data_offset,
                TcpEvent::Reset => {
                    log.log("TCP reset");
                    self.last_event = Some(NetEvent::TcpReset);
                }
                TcpEvent::PeerClosed | TcpEvent::None | TcpEvent::ConnectSucceeded => {}
            }
            if reply_len > 0 {
                mac.mac_send(&buf[..reply_len]);
            }
            return 0;
        }

        if tcp.flags.syn() == 1 && tcp.dst_port == HTTP_LISTEN_PORT {
            let remote_mac = read_eth_header(buf).src_macaddr;
            if let Some(len) = passive_open(&mut self.tcp, buf, our_mac, our_ip, remote_mac, remote_ip, tcp.src_port, tcp.dst_port, tcp.seq) {
                mac.mac_send(&buf[..len]);
            }
            return 0;
        }

        let len = send_rst_for_unknown(buf, our_mac, our_ip);
        mac.mac_send(&buf[..len]);
        0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    extern crate std;
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeMac {
        sent: Vec<u8>,
        link_up: bool,
    }

    impl MacDriver for FakeMac {
        fn mac_init(&mut self, _mac_addr: MacAddr) {}
        fn mac_send(&mut self, buf: &[u8]) {
            self.sent.clear();
            self.sent.extend_from_slice(buf);
        }
        fn mac_recv(&mut self, _buf: &mut [u8]) -> usize {
            0
        }
        fn mac_link_up(&self) -> bool {
            self.link_up
        }
        fn mac_enable_broadcast(&mut self) {}
        fn mac_disable_broadcast(&mut self) {}
        fn mac_power_down(&mut self) {}
        fn mac_power_up(&mut self) {}
    }

    #[derive(Default)]
    struct FakeRtc;
    impl Rtc for FakeRtc {
        fn set_time(&mut self, _hour: u8, _minute: u8, _second: u8) {}
        fn set_date(&mut self, _year: u16, _month: u8, _day: u8, _weekday: u8) {}
        fn get_datetime(&self) -> CalendarDateTime {
            CalendarDateTime { year: 0, month: 1, day: 1, weekday: 1, hour: 0, minute: 0, second: 0 }
        }
    }

    #[derive(Default)]
    struct RecordingLog {
        lines: Vec<std::string::String>,
    }
    impl LogSink for RecordingLog {
        fn log(&mut self, msg: &str) {
            self.lines.push(std::string::String::from(msg));
        }
    }

    struct NoopCallbacks;
    impl TcpClientCallbacks for NoopCallbacks {
        fn datafill(&mut self, _fd: u8, _buf: &mut [u8]) -> usize {
            0
        }
        fn result(&mut self, _fd: u8, _status: u8, _data_offset: usize, _data_len: usize) -> u8 {
            0
        }
    }

    struct RecordingCommand {
        calls: Vec<Vec<u8>>,
    }
    impl UdpCommandHandler for RecordingCommand {
        fn call(&mut self, arg: &[u8]) {
            self.calls.push(Vec::from(arg));
        }
    }

    fn test_stack() -> NetStack<10> {
        let config = NetConfig::new(MacAddr::new([2, 0, 0, 0, 0, 1]), HostName::new(b"widget"))
            .with_static_fallback(
                IpV4Addr::new([10, 0, 0, 5]),
                IpV4Addr::new([255, 255, 255, 0]),
                IpV4Addr::new([10, 0, 0, 1]),
                IpV4Addr::new([10, 0, 0, 1]),
            );
        NetStack::new(config)
    }

    #[test]
    fn test_icmp_echo_handled_end_to_end() {
        // Scenario C from spec §8: an inbound echo request produces an echo reply via the full
        // poll() dispatch, not just icmp.rs's standalone header conversion.
        let mut stack = test_stack();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let mut mac = FakeMac::default();
        let mut rtc = FakeRtc::default();
        let mut log = RecordingLog::default();

        let requester_mac = MacAddr::new([2, 0, 0, 0, 0, 9]);
        let requester_ip = IpV4Addr::new([10, 0, 0, 50]);

        write_eth_header(
            &mut buf,
            &EthernetHeader { dst_macaddr: stack.config.mac, src_macaddr: requester_mac, ethertype: EtherType::IPV4 },
        );
        let icmp_len = ICMP_HEADER_LEN + 4;
        write_ip_header(
            &mut buf,
            &IpV4Header {
                version_and_length: IpV4Header::version_and_length_no_options(),
                dscp: DSCP::Standard,
                total_length: (IP_HEADER_LEN + icmp_len) as u16,
                identification: 0,
                fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
                time_to_live: 64,
                protocol: Protocol::Icmp,
                checksum: 0,
                src_ipaddr: requester_ip,
                dst_ipaddr: stack.config.ipaddr,
            },
        );
        write_icmp_header(
            &mut buf,
            &IcmpHeader { icmp_type: IcmpType::EchoRequest, code: 0, checksum: 0x1234, identifier: 7, sequence: 1 },
        );
        buf[ICMP_DATA_OFFSET..ICMP_DATA_OFFSET + 4].copy_from_slice(&[1, 2, 3, 4]);
        let total_len = ETH_HEADER_LEN + IP_HEADER_LEN + icmp_len;

        let mut commands: [UdpCommandEntry; 0] = [];
        let mut callbacks = NoopCallbacks;
        let mut ping_observer = NullPingObserver;

        let result = stack.poll(&mut buf[..total_len], total_len, &mut mac, &mut rtc, 0, &mut commands, &mut callbacks, &mut ping_observer, &mut log);
        assert_eq!(result, 0);

        let eth_reply = read_eth_header(&mac.sent);
        let ip_reply = read_ip_header(&mac.sent);
        let icmp_reply = read_icmp_header(&mac.sent);
        assert_eq!(eth_reply.dst_macaddr, requester_mac);
        assert_eq!(ip_reply.dst_ipaddr, requester_ip);
        assert_eq!(ip_reply.src_ipaddr, stack.config.ipaddr);
        assert_eq!(icmp_reply.icmp_type, IcmpType::EchoReply);
        assert_eq!(icmp_reply.identifier, 7);
    }

    #[test]
    fn test_unmatched_udp_command_logs_literal_error() {
        let mut stack = test_stack();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let mut mac = FakeMac::default();
        let mut rtc = FakeRtc::default();
        let mut log = RecordingLog::default();

        let sender_mac = MacAddr::new([2, 0, 0, 0, 0, 9]);
        let sender_ip = IpV4Addr::new([10, 0, 0, 50]);
        let len = prepare_udp(&mut buf, b"bogusCommand", sender_mac, sender_ip, stack.config.mac, 9000, stack.config.ipaddr, 9999);

        let mut recorder = RecordingCommand { calls: Vec::new() };
        let mut commands = [UdpCommandEntry { name: b"knownCommand", handler: &mut recorder }];
        let mut callbacks = NoopCallbacks;
        let mut ping_observer = NullPingObserver;

        let result = stack.poll(&mut buf[..len], len, &mut mac, &mut rtc, 0, &mut commands, &mut callbacks, &mut ping_observer, &mut log);
        assert_eq!(result, 0);
        assert!(log.lines.iter().any(|l| l == "Error: Unexpected UDP message"));
        assert_eq!(stack.take_last_event(), Some(NetEvent::UnhandledUdpCommand));
        assert_eq!(stack.take_last_event(), None);
    }

    #[test]
    fn test_matched_udp_command_invokes_handler_with_remaining_arg() {
        let mut stack = test_stack();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let mut mac = FakeMac::default();
        let mut rtc = FakeRtc::default();
        let mut log = RecordingLog::default();

        let sender_mac = MacAddr::new([2, 0, 0, 0, 0, 9]);
        let sender_ip = IpV4Addr::new([10, 0, 0, 50]);
        let len = prepare_udp(&mut buf, b"setRelay=1", sender_mac, sender_ip, stack.config.mac, 9000, stack.config.ipaddr, 9999);

        let mut recorder = RecordingCommand { calls: Vec::new() };
        let mut commands = [UdpCommandEntry { name: b"setRelay=", handler: &mut recorder }];
        let mut callbacks = NoopCallbacks;
        let mut ping_observer = NullPingObserver;

        stack.poll(&mut buf[..len], len, &mut mac, &mut rtc, 0, &mut commands, &mut callbacks, &mut ping_observer, &mut log);
        assert_eq!(recorder.calls.len(), 1);
        assert_eq!(&recorder.calls[0][..], b"1");
        assert!(log.lines.is_empty());
    }

    #[test]
    fn test_tcp_passive_open_handshake_through_poll() {
        // Scenario E from spec §8, driven through the full poll() dispatch rather than
        // tcp::passive_open/on_segment directly.
        let mut stack = test_stack();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let mut mac = FakeMac::default();
        let mut rtc = FakeRtc::default();
        let mut log = RecordingLog::default();

        let remote_mac = MacAddr::new([2, 0, 0, 0, 0, 2]);
        let remote_ip = IpV4Addr::new([10, 0, 0, 2]);

        write_eth_header(
            &mut buf,
            &EthernetHeader { dst_macaddr: stack.config.mac, src_macaddr: remote_mac, ethertype: EtherType::IPV4 },
        );
        write_ip_header(
            &mut buf,
            &IpV4Header {
                version_and_length: IpV4Header::version_and_length_no_options(),
                dscp: DSCP::Standard,
                total_length: (IP_HEADER_LEN + 20) as u16,
                identification: 0,
                fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
                time_to_live: 64,
                protocol: Protocol::Tcp,
                checksum: 0,
                src_ipaddr: remote_ip,
                dst_ipaddr: stack.config.ipaddr,
            },
        );
        write_tcp_header(
            &mut buf,
            &TcpHeader {
                src_port: 55000,
                dst_port: HTTP_LISTEN_PORT,
                seq: 100,
                ack: 0,
                data_offset_reserved: TcpHeader::data_offset_no_options(),
                flags: TcpFlags::syn_only(),
                window: 1024,
                checksum: 0,
                urgent_ptr: 0,
            },
        );
        let total_len = ETH_HEADER_LEN + IP_HEADER_LEN + TCP_HEADER_LEN;

        let mut commands: [UdpCommandEntry; 0] = [];
        let mut callbacks = NoopCallbacks;
        let mut ping_observer = NullPingObserver;

        let result = stack.poll(&mut buf[..total_len], total_len, &mut mac, &mut rtc, 0, &mut commands, &mut callbacks, &mut ping_observer, &mut log);
        assert_eq!(result, 0);

        let synack = read_tcp_header(&mac.sent);
        assert_eq!(synack.flags.syn(), 1);
        assert_eq!(synack.flags.ack(), 1);
        assert_eq!(synack.ack, 101);
        assert_eq!(stack.tcp.active_count(), 1);
    }

    #[test]
    fn test_unknown_tcp_segment_answered_with_rst() {
        let mut stack = test_stack();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let mut mac = FakeMac::default();
        let mut rtc = FakeRtc::default();
        let mut log = RecordingLog::default();

        let remote_mac = MacAddr::new([2, 0, 0, 0, 0, 2]);
        let remote_ip = IpV4Addr::new([10, 0, 0, 2]);

        write_eth_header(
            &mut buf,
            &EthernetHeader { dst_macaddr: stack.config.mac, src_macaddr: remote_mac, ethertype: EtherType::IPV4 },
        );
        write_ip_header(
            &mut buf,
            &IpV4Header {
                version_and_length: IpV4Header::version_and_length_no_options(),
                dscp: DSCP::Standard,
                total_length: (IP_HEADER_LEN + 20) as u16,
                identification: 0,
                fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
                time_to_live: 64,
                protocol: Protocol::Tcp,
                checksum: 0,
                src_ipaddr: remote_ip,
                dst_ipaddr: stack.config.ipaddr,
            },
        );
        write_tcp_header(
            &mut buf,
            &TcpHeader {
                src_port: 55000,
                dst_port: 9999, // not HTTP_LISTEN_PORT, no SYN
                seq: 100,
                ack: 0,
                data_offset_reserved: TcpHeader::data_offset_no_options(),
                flags: TcpFlags::ack_only(),
                window: 1024,
                checksum: 0,
                urgent_ptr: 0,
            },
        );
        let total_len = ETH_HEADER_LEN + IP_HEADER_LEN + TCP_HEADER_LEN;

        let mut commands: [UdpCommandEntry; 0] = [];
        let mut callbacks = NoopCallbacks;
        let mut ping_observer = NullPingObserver;

        stack.poll(&mut buf[..total_len], total_len, &mut mac, &mut rtc, 0, &mut commands, &mut callbacks, &mut ping_observer, &mut log);
        let rst = read_tcp_header(&mac.sent);
        assert_eq!(rst.flags.rst(), 1);
    }

    #[test]
    fn test_arp_request_for_our_ip_answered_through_poll() {
        let mut stack = test_stack();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let mut mac = FakeMac::default();
        let mut rtc = FakeRtc::default();
        let mut log = RecordingLog::default();

        let requester_mac = MacAddr::new([2, 0, 0, 0, 0, 9]);
        let requester_ip = IpV4Addr::new([10, 0, 0, 50]);
        write_eth_header(
            &mut buf,
            &EthernetHeader { dst_macaddr: MacAddr::BROADCAST, src_macaddr: requester_mac, ethertype: EtherType::ARP },
        );
        let request = ArpPayload::new(requester_mac, requester_ip, MacAddr::ANY, stack.config.ipaddr, ArpOperation::Request);
        request.write_bytes(&mut buf[ETH_HEADER_LEN..ETH_HEADER_LEN + ArpPayload::BYTE_LEN]);

        let mut commands: [UdpCommandEntry; 0] = [];
        let mut callbacks = NoopCallbacks;
        let mut ping_observer = NullPingObserver;

        stack.poll(&mut buf[..ARP_FRAME_LEN], ARP_FRAME_LEN, &mut mac, &mut rtc, 0, &mut commands, &mut callbacks, &mut ping_observer, &mut log);

        let reply = ArpPayload::read_bytes(&mac.sent[ETH_HEADER_LEN..ETH_HEADER_LEN + ArpPayload::BYTE_LEN]);
        assert_eq!(reply.operation, ArpOperation::Response);
        assert_eq!(reply.dst_mac, requester_mac);
        assert_eq!(reply.src_ipaddr, stack.config.ipaddr);
    }

    #[test]
    fn test_seed_derivation_differs_by_salt() {
        let mac = MacAddr::new([2, 0, 0, 0, 0, 42]);
        assert_ne!(derive_seed(mac, 1), derive_seed(mac, 2));
    }
}
