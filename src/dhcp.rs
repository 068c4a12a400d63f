//! Dynamic Host Configuration Protocol for IPV4.
//!
//! Client side of the call-response structure used by a router to assign IP addresses to devices on a local network.
//!
//! Partial implementation per IETF-RFC-2131; see https://datatracker.ietf.org/doc/html/rfc2131#page-22
//!
//! This is intended to provide just enough functionality to accept a statically-assigned address on
//! networks that require confirmation of static addresses with an indefinite lease duration via DHCP.
//! 
//! In this case, the server refers to the router or similar hardware orchestrating the address space,
//! while the client refers to the endpoints requesting addresses.

use crate::*;

/// Well-known server-side DHCP/BOOTP port.
pub const DHCP_SERVER_PORT: u16 = 67;
/// Well-known client-side DHCP/BOOTP port. Every DHCP server replies here, so (unlike DNS's
/// and the TCP client's encoded ephemeral ports) this stack uses the standard port rather than
/// an encoded one.
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Per-attempt timeout and retry budget for the whole DISCOVER/OFFER/REQUEST/ACK exchange.
/// The stack itself never re-sends on a timeout; the caller drives retries by calling
/// [`DhcpClient::start`] again after this much time with no ACK, up to this many times.
pub const DHCP_RETRY_TIMEOUT_MS: NowMs = 10_000;
/// See [`DHCP_RETRY_TIMEOUT_MS`].
pub const DHCP_MAX_ATTEMPTS: u8 = 10;

/// Length in bytes of the fixed BOOTP/DHCP header, through the magic cookie.
const DHCP_HEADER_LEN: usize = 240;
/// Large enough for every option this client ever sends (53, 61, 12, 50, 54, 55, 255).
const DHCP_OPTIONS_BUF_LEN: usize = 48;

/// "Magic Cookie" placed at the end of the fixed portion of the DHCP payload
const DHCP_COOKIE: u32 = 0x63_82_53_63;

use byte_struct::*;
use ufmt::derive::uDebug;

enum_with_unknown! {
    /// Message op code / message type. 1 = BOOTREQUEST, 2 = BOOTREPLY
    /// Legacy operation type field from BOOTP.
    /// Still has to match and change value depending on message type even though
    /// there is only one valid combination of message type and operation.
    pub enum DhcpOperation(u8) {
        /// Anything coming from the client
        Request = 1,
        /// Anything coming from the server
        Reply = 2
    }
}

impl ByteStructLen for DhcpOperation {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DhcpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Contents of option field kind 53
    #[allow(missing_docs)]
    pub enum DhcpMessageKind(u8) {
        /// Client broadcast to locate available servers.
        Discover = 1,
        /// Server to client in response to DHCPDISCOVER with offer of configuration parameters.
        Offer = 2,
        /// Client message to servers either (a) requesting
        /// offered parameters from one server and implicitly
        /// declining offers from all others, (b) confirming
        /// correctness of previously allocated address after,
        /// e.g., system reboot, or (c) extending the lease on a
        /// particular network address.
        Request = 3,
        /// Client to server indicating network address is already in use.
        Decline = 4,
        /// Server to client with configuration parameters, including committed network address.
        Ack = 5, // Acknowledge
        /// Server to client indicating client's notion of network address is incorrect
        /// (e.g., client has moved to new subnet) or client's lease as expired
        Nak = 6, // Negative-acknowledge
        /// Client to server relinquishing network address and cancelling remaining lease.
        Release = 7,
        /// Client to server, asking only for local configuration parameters.
        /// Client already has externally configured network address.
        Inform = 8,
        ForceRenew = 9,
        LeaseQuery = 10,
        LeaseUnassigned = 11,
        LeaseUnknown = 12,
        LeaseActive = 13,
        BulkLeaseQuery = 14,
        LeaseQueryDone = 15,
        ActiveLeaseQuery = 16,
        LeaseQueryStatus = 17,
        Tls = 18
    }
}

impl ByteStructLen for DhcpMessageKind {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DhcpMessageKind {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Option type codes for parsing options section.
    /// Most of these are useless.
    #[allow(missing_docs)]
    pub enum DhcpOptionKind(u8) {
        Pad = 0,
        SubnetMask = 1,
        TimeOffset = 2,
        Router = 3,
        TimeServer = 4,
        NameServer = 5,
        DomainNameServers = 6,
        LogServer = 7,
        CookieServer = 8,
        LPRServer = 9,
        ImpressServer = 10,
        ResourceLocationServer = 11,
        HostName = 12,
        BootFileSize = 13,
        MeritDumpFileSize = 14,
        DomainName = 15,
        SwapServer = 16,
        RootPath = 17,
        ExtensionsPath = 18,
        IPForwardEnable = 19,
        SourceRoutingEnable = 20,
        PolicyFilter = 21,
        MaximumDatagramSize = 22,
        DefaultIpTtl = 23,
        PathMtuTimeout = 24,
        PathMtuPlateau = 25,
        InterfaceMtu = 26,
        AllSubnetsLocal = 27,
        BroadcastAddress = 28,
        PerformMaskDiscovery = 29,
        MaskSupplier = 30,
        PerformRouterDiscovery = 31,
        RouterSolicitationAddress = 32,
        StaticRoute = 33,
        TrailerEncapsulation = 34,
        ArpCacheTimeout = 35,
        EthernetEncapsulation = 36,
        TcpDefaultTtl = 37,
        TcpKeepAliveInterval = 38,
        TcpKeepAliveGarbage = 39,
        NetworkInfoServiceDomain = 40,
        NetworkInfoSevers = 41,
        NtpServers = 42,
        VendorInfo = 43,
        NetBiosNameServer = 44,
        NetBiosDistributionServer = 45,
        NetBiosNodeType = 46,
        NetBiosScope = 47,
        XWindowFontServer = 48,
        XWindowDisplayMgr = 49,

        // Extensions (these are mostly the useful ones)
        RequestedIpAddress = 50,
        IpAddressLeaseTime = 51,
        OptionOverload = 52,
        /// This option's contents indicate how the rest of the message should be parsed
        DhcpMessageType = 53,
        ServerIdentifier = 54,
        ParameterRequestList = 55,
        Message = 56,
        MaxDhcpMessageSize = 57,
        /// Time in seconds until start of renewal (half of lease duration)
        RenewalTime = 58,
        RebindingTime = 59,
        VendorClassId = 60,
        ClientId = 61,
        TftpServerName = 62,
        BootFileName = 63,

        // More application stuff
        NisPlusDomain = 64,
        NisPlusServers = 65,
        // Where are 66-67?
        MobileIpHomeAgent = 68,
        SmtpServer = 69,
        Pop3Server = 70,
        NntpServer = 71,
        DefaultWwwServer = 72,
        DefaultFingerServer = 73,
        DefaultIrcServer = 74,
        StreetTalkServer = 75,
        StreetTalkDirectoryServer = 76,

        // More extensions
        RelayAgentInfo = 82,
        NdsServers = 85,
        NdsContext = 86,
        TimeZonePosix = 100,
        TimeZoneTz = 101,
        DhcpCaptivePortal = 114,
        DomainSearch = 119,
        ClasslessStaticRoute = 121,
        ConfigFile = 209,
        PathPrefix = 210,
        RebootTime = 211,

        End = 255,
    }
}

impl ByteStructLen for DhcpOptionKind {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DhcpOptionKind {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// The fixed 240-byte BOOTP/DHCP header, option-free; the client state machine below builds a
/// variable-length options tail alongside this separately.
#[derive(ByteStruct, uDebug, Debug, Clone, Copy, PartialEq, Eq)]
#[byte_struct_be]
struct DhcpHeader {
    op: DhcpOperation,
    htype: u8,
    hlen: u8,
    hops: u8,
    xid: u32,
    secs: u16,
    flags: u16,
    ciaddr: IpV4Addr,
    yiaddr: IpV4Addr,
    siaddr: IpV4Addr,
    giaddr: IpV4Addr,
    chaddr: MacAddr,
    chaddr_pad: [u8; 10],
    sname: [u8; 64],
    file: [u8; 128],
    cookie: u32,
}

impl DhcpHeader {
    #[allow(clippy::too_many_arguments)]
    fn new(
        op: DhcpOperation,
        xid: u32,
        secs: u16,
        flags: u16,
        ciaddr: IpV4Addr,
        yiaddr: IpV4Addr,
        siaddr: IpV4Addr,
        giaddr: IpV4Addr,
        chaddr: MacAddr,
    ) -> Self {
        DhcpHeader {
            op,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            chaddr_pad: [0_u8; 10],
            sname: [0_u8; 64],
            file: [0_u8; 128],
            cookie: DHCP_COOKIE,
        }
    }
}

/// Write the options tail sent with every DHCP request (spec §4.6 "Options sent in every
/// request"): 53 (message type), 61 (client identifier), 12 (hostname), optionally 50/54 on a
/// REQUEST, 55 (parameter request list), terminated by 255. Returns the number of bytes written.
#[allow(clippy::too_many_arguments)]
fn write_options(
    out: &mut [u8],
    kind: DhcpMessageKind,
    client_mac: MacAddr,
    hostname: &HostName,
    mac_last_octet: u8,
    requested_ip: Option<IpV4Addr>,
    server_id: Option<IpV4Addr>,
) -> usize {
    let mut n = 0;

    out[n] = u8::from(DhcpOptionKind::DhcpMessageType);
    out[n + 1] = 1;
    out[n + 2] = u8::from(kind);
    n += 3;

    out[n] = u8::from(DhcpOptionKind::ClientId);
    out[n + 1] = 7;
    out[n + 2] = 1; // htype: ethernet
    out[n + 3..n + 9].copy_from_slice(&client_mac.0);
    n += 9;

    out[n] = u8::from(DhcpOptionKind::HostName);
    let len_pos = n + 1;
    n += 2;
    let written = hostname.write_disambiguated(mac_last_octet, &mut out[n..]);
    out[len_pos] = written as u8;
    n += written;

    if let Some(ip) = requested_ip {
        out[n] = u8::from(DhcpOptionKind::RequestedIpAddress);
        out[n + 1] = 4;
        out[n + 2..n + 6].copy_from_slice(&ip.0);
        n += 6;
    }
    if let Some(ip) = server_id {
        out[n] = u8::from(DhcpOptionKind::ServerIdentifier);
        out[n + 1] = 4;
        out[n + 2..n + 6].copy_from_slice(&ip.0);
        n += 6;
    }

    out[n] = u8::from(DhcpOptionKind::ParameterRequestList);
    out[n + 1] = 3;
    out[n + 2] = 1; // subnet mask
    out[n + 3] = 3; // router
    out[n + 4] = 6; // DNS server
    n += 5;

    out[n] = u8::from(DhcpOptionKind::End);
    n + 1
}

/// Find the first message-type (option 53) value in an options tail.
fn find_message_kind(options: &[u8]) -> Option<DhcpMessageKind> {
    let mut i = 0;
    while i + 1 < options.len() {
        let kind = options[i];
        if kind == u8::from(DhcpOptionKind::Pad) {
            i += 1;
            continue;
        }
        if kind == u8::from(DhcpOptionKind::End) {
            break;
        }
        let len = options[i + 1] as usize;
        if kind == u8::from(DhcpOptionKind::DhcpMessageType) && len == 1 && i + 2 < options.len() {
            return Some(DhcpMessageKind::from(options[i + 2]));
        }
        i += 2 + len;
    }
    None
}

/// Walk an OFFER's options (spec §4.6 "Option parsing on OFFER") and fill in the address
/// fields it carries: subnet mask (1), router (3), DNS server (6), lease time (51, seconds to
/// milliseconds), server identifier (54).
fn parse_offer_options(options: &[u8], client: &mut DhcpClient) {
    let mut i = 0;
    while i + 1 < options.len() {
        let kind = options[i];
        if kind == u8::from(DhcpOptionKind::Pad) {
            i += 1;
            continue;
        }
        if kind == u8::from(DhcpOptionKind::End) {
            break;
        }
        let len = options[i + 1] as usize;
        let start = i + 2;
        if start + len > options.len() {
            break;
        }
        let value = &options[start..start + len];
        if kind == u8::from(DhcpOptionKind::SubnetMask) && len == 4 {
            client.netmask = IpV4Addr::new([value[0], value[1], value[2], value[3]]);
        } else if kind == u8::from(DhcpOptionKind::Router) && len >= 4 {
            client.gateway = IpV4Addr::new([value[0], value[1], value[2], value[3]]);
        } else if kind == u8::from(DhcpOptionKind::DomainNameServers) && len >= 4 {
            client.dns_server = IpV4Addr::new([value[0], value[1], value[2], value[3]]);
        } else if kind == u8::from(DhcpOptionKind::IpAddressLeaseTime) && len == 4 {
            let secs = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
            client.lease_duration_ms = secs.saturating_mul(1000);
        } else if kind == u8::from(DhcpOptionKind::ServerIdentifier) && len == 4 {
            client.server_id = IpV4Addr::new([value[0], value[1], value[2], value[3]]);
        }
        i = start + len;
    }
}

/// Compose a complete Ethernet+IP+UDP+DHCP datagram into `buf`, bypassing
/// [`crate::udp::prepare_udp`]'s [`crate::udp::UDP_MAX_DATA_LEN`] cap: a DHCP message's
/// BOOTP-mandated 240-byte fixed header plus options routinely exceeds the ~220-octet ceiling
/// the generic UDP send path holds application payloads to (spec §4.5 scopes that cap to the
/// generic UDP module, not to DHCP). [`crate::buffer::MIN_BUFFER_LEN`] comfortably fits either.
#[allow(clippy::too_many_arguments)]
fn prepare_dhcp_datagram(
    buf: &mut [u8],
    header: &DhcpHeader,
    options: &[u8],
    our_mac: MacAddr,
    src_ip: IpV4Addr,
    dst_mac: MacAddr,
    src_port: u16,
    dst_ip: IpV4Addr,
    dst_port: u16,
) -> usize {
    let data_len = DHCP_HEADER_LEN + options.len();
    let udp_len = UDP_HEADER_LEN + data_len;
    let total_len = ETH_HEADER_LEN + IP_HEADER_LEN + udp_len;

    write_eth_header(
        buf,
        &EthernetHeader { dst_macaddr: dst_mac, src_macaddr: our_mac, ethertype: EtherType::IPV4 },
    );
    write_ip_header(
        buf,
        &IpV4Header {
            version_and_length: IpV4Header::version_and_length_no_options(),
            dscp: DSCP::Standard,
            total_length: (IP_HEADER_LEN + udp_len) as u16,
            identification: 0,
            fragmentation: crate::ip::Fragmentation::default().with_do_not_fragment(1),
            time_to_live: 64,
            protocol: Protocol::Udp,
            checksum: 0,
            src_ipaddr: src_ip,
            dst_ipaddr: dst_ip,
        },
    );
    write_udp_header(buf, &UdpHeader { src_port, dst_port, length: udp_len as u16, checksum: 0 });

    header.write_bytes(&mut buf[UDP_DATA_OFFSET..UDP_DATA_OFFSET + DHCP_HEADER_LEN]);
    buf[UDP_DATA_OFFSET + DHCP_HEADER_LEN..UDP_DATA_OFFSET + data_len].copy_from_slice(options);

    let ip_checksum = sum16(&buf[IP_OFFSET..IP_OFFSET + IP_HEADER_LEN], 0, ChecksumMode::Plain);
    buf[IP_OFFSET + 10] = (ip_checksum >> 8) as u8;
    buf[IP_OFFSET + 11] = (ip_checksum & 0xff) as u8;

    let udp_checksum = sum16_over(src_ip, dst_ip, &buf[TRANSPORT_OFFSET..TRANSPORT_OFFSET + udp_len], ChecksumMode::UdpPseudo);
    buf[TRANSPORT_OFFSET + 6] = (udp_checksum >> 8) as u8;
    buf[TRANSPORT_OFFSET + 7] = (udp_checksum & 0xff) as u8;

    total_len
}

/// DHCP client state (spec §3 "DHCP client state").
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub enum DhcpState {
    /// No allocation attempt in progress.
    Init,
    /// DISCOVER sent, awaiting OFFER.
    Discover,
    /// OFFER received; transiently held while the REQUEST is built and sent.
    Offer,
    /// REQUEST sent, awaiting ACK.
    Request,
    /// Transiently held right after an ACK is accepted, before `Ok` is reported.
    Ack,
    /// Lease bound; configuration fields are all valid.
    Ok,
    /// Lease expired; a REQUEST should be (re-)sent to the same server.
    Renew,
}

/// Address/lease fields handed back to the orchestration layer once an ACK is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DhcpLease {
    /// Leased address (BOOTP `yiaddr`).
    pub ipaddr: IpV4Addr,
    /// Subnet mask (option 1).
    pub netmask: IpV4Addr,
    /// Default gateway (option 3).
    pub gateway: IpV4Addr,
    /// DNS server (option 6).
    pub dns_server: IpV4Addr,
    /// DHCP server identifier (option 54).
    pub server_id: IpV4Addr,
    /// Lease duration, in milliseconds (option 51, converted from seconds).
    pub lease_duration_ms: u32,
}

/// DHCP client state machine (spec §4.6). One allocation attempt (DISCOVER/OFFER/REQUEST/ACK)
/// per `start`; the stack itself never retries a lost ACK, matching spec's "ACK is not retried
/// by the stack" - callers wanting the ten-attempt/ten-second retry policy drive it themselves
/// by re-invoking [`DhcpClient::start`].
pub struct DhcpClient {
    state: DhcpState,
    xid: u32,
    attempt_start_ms: NowMs,
    lease_start_ms: NowMs,
    lease_duration_ms: u32,
    offered_ip: IpV4Addr,
    server_id: IpV4Addr,
    netmask: IpV4Addr,
    gateway: IpV4Addr,
    dns_server: IpV4Addr,
}

impl DhcpClient {
    /// New, unbound client. `xid_seed` is the pseudo-random transaction id used for every
    /// DISCOVER/REQUEST of the allocation attempt (spec §4.6: "generated once at start...
    /// retries reuse the same xid").
    pub fn new(xid_seed: u32) -> Self {
        DhcpClient {
            state: DhcpState::Init,
            xid: xid_seed,
            attempt_start_ms: 0,
            lease_start_ms: 0,
            lease_duration_ms: 0,
            offered_ip: IpV4Addr::ANY,
            server_id: IpV4Addr::ANY,
            netmask: IpV4Addr::ANY,
            gateway: IpV4Addr::ANY,
            dns_server: IpV4Addr::ANY,
        }
    }

    /// Current state.
    pub fn state(&self) -> DhcpState {
        self.state
    }

    /// Is a lease currently bound?
    pub fn is_bound(&self) -> bool {
        self.state == DhcpState::Ok
    }

    /// Has the current lease run past its duration? (spec §3 invariant on `Ok`).
    pub fn lease_expired(&self, now: NowMs) -> bool {
        self.state == DhcpState::Ok && now.saturating_sub(self.lease_start_ms) >= self.lease_duration_ms as NowMs
    }

    /// Move a bound client into `Renew`, observed by the dispatch loop to trigger a REQUEST.
    pub fn mark_renewing(&mut self) {
        if self.state == DhcpState::Ok {
            self.state = DhcpState::Renew;
        }
    }

    /// Unicast a REQUEST renewing the current lease (spec §4.6 "Renew"): `ciaddr` is set to the
    /// leased address instead of carrying option 50, per RFC 2131 §4.3.2's renewing-client form.
    /// Called once after [`Self::mark_renewing`] has moved the state to `Renew`.
    pub fn send_renew(
        &mut self,
        buf: &mut [u8],
        mac: &mut impl MacDriver,
        our_mac: MacAddr,
        dst_mac: MacAddr,
        hostname: &HostName,
        now: NowMs,
    ) -> usize {
        self.attempt_start_ms = now;
        let mac_last_octet = our_mac.0[5];
        let header = DhcpHeader::new(
            DhcpOperation::Request,
            self.xid,
            0,
            0,
            self.offered_ip,
            IpV4Addr::ANY,
            IpV4Addr::ANY,
            IpV4Addr::ANY,
            our_mac,
        );
        let mut options = [0_u8; DHCP_OPTIONS_BUF_LEN];
        let n = write_options(&mut options, DhcpMessageKind::Request, our_mac, hostname, mac_last_octet, None, None);
        let len = prepare_dhcp_datagram(
            buf,
            &header,
            &options[..n],
            our_mac,
            self.offered_ip,
            dst_mac,
            DHCP_CLIENT_PORT,
            self.server_id,
            DHCP_SERVER_PORT,
        );
        crate::udp::transmit(mac, buf, len);
        len
    }

    /// Broadcast a DISCOVER and move to `Discover`. One allocation attempt; the caller is
    /// responsible for re-invoking this after [`DHCP_RETRY_TIMEOUT_MS`] with no ACK, up to
    /// [`DHCP_MAX_ATTEMPTS`] times (spec §4.6 "Failure").
    pub fn start(
        &mut self,
        buf: &mut [u8],
        mac: &mut impl MacDriver,
        our_mac: MacAddr,
        hostname: &HostName,
        now: NowMs,
    ) -> usize {
        self.attempt_start_ms = now;
        self.state = DhcpState::Discover;
        let mac_last_octet = our_mac.0[5];
        let header = DhcpHeader::new(
            DhcpOperation::Request,
            self.xid,
            0,
            0x8000,
            IpV4Addr::ANY,
            IpV4Addr::ANY,
            IpV4Addr::ANY,
            IpV4Addr::ANY,
            our_mac,
        );
        let mut options = [0_u8; DHCP_OPTIONS_BUF_LEN];
        let n = write_options(&mut options, DhcpMessageKind::Discover, our_mac, hostname, mac_last_octet, None, None);
        let len = prepare_dhcp_datagram(
            buf,
            &header,
            &options[..n],
            our_mac,
            IpV4Addr::ANY,
            MacAddr::BROADCAST,
            DHCP_CLIENT_PORT,
            IpV4Addr::BROADCAST,
            DHCP_SERVER_PORT,
        );
        crate::udp::transmit(mac, buf, len);
        len
    }

    /// Process one inbound datagram addressed to the DHCP client port. Returns the accepted
    /// lease once an ACK matching the outstanding transaction arrives; `None` otherwise
    /// (including a duplicate OFFER, which is ignored per spec's idempotence requirement).
    pub fn on_datagram(
        &mut self,
        buf: &mut [u8],
        mac: &mut impl MacDriver,
        our_mac: MacAddr,
        hostname: &HostName,
        now: NowMs,
    ) -> Option<DhcpLease> {
        let udp = read_udp_header(buf);
        if udp.dst_port != DHCP_CLIENT_PORT {
            return None;
        }
        let data = &buf[UDP_DATA_OFFSET..];
        if data.len() < DHCP_HEADER_LEN + 4 {
            return None;
        }
        let header = DhcpHeader::read_bytes(&data[..DHCP_HEADER_LEN]);
        if header.xid != self.xid || header.cookie != DHCP_COOKIE {
            return None;
        }
        let options = &data[DHCP_HEADER_LEN..];
        let kind = find_message_kind(options)?;

        match (self.state, kind) {
            (DhcpState::Discover, DhcpMessageKind::Offer) => {
                self.offered_ip = header.yiaddr;
                parse_offer_options(options, self);
                let mac_last_octet = our_mac.0[5];
                let req_header = DhcpHeader::new(
                    DhcpOperation::Request,
                    self.xid,
                    0,
                    0x8000,
                    IpV4Addr::ANY,
                    IpV4Addr::ANY,
                    IpV4Addr::ANY,
                    IpV4Addr::ANY,
                    our_mac,
                );
                let mut req_options = [0_u8; DHCP_OPTIONS_BUF_LEN];
                let n = write_options(
                    &mut req_options,
                    DhcpMessageKind::Request,
                    our_mac,
                    hostname,
                    mac_last_octet,
                    Some(self.offered_ip),
                    Some(self.server_id),
                );
                let len = prepare_dhcp_datagram(
                    buf,
                    &req_header,
                    &req_options[..n],
                    our_mac,
                    IpV4Addr::ANY,
                    MacAddr::BROADCAST,
                    DHCP_CLIENT_PORT,
                    IpV4Addr::BROADCAST,
                    DHCP_SERVER_PORT,
                );
                crate::udp::transmit(mac, buf, len);
                self.state = DhcpState::Request;
                None
            }
            (DhcpState::Offer, DhcpMessageKind::Offer) | (DhcpState::Request, DhcpMessageKind::Offer) => {
                // Already acted on an OFFER for this xid; spec §8 "DHCP idempotence".
                None
            }
            (DhcpState::Request, DhcpMessageKind::Ack) | (DhcpState::Renew, DhcpMessageKind::Ack) => {
                self.state = DhcpState::Ok;
                self.lease_start_ms = now;
                mac.mac_disable_broadcast();
                Some(DhcpLease {
                    ipaddr: self.offered_ip,
                    netmask: self.netmask,
                    gateway: self.gateway,
                    dns_server: self.dns_server,
                    server_id: self.server_id,
                    lease_duration_ms: self.lease_duration_ms,
                })
            }
            (DhcpState::Request, DhcpMessageKind::Nak) => {
                self.state = DhcpState::Init;
                None
            }
            _ => None,
        }
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
        broadcast_enabled: bool,
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
            true
        }
        fn mac_enable_broadcast(&mut self) {
            self.broadcast_enabled = true;
        }
        fn mac_disable_broadcast(&mut self) {
            self.broadcast_enabled = false;
        }
        fn mac_power_down(&mut self) {}
        fn mac_power_up(&mut self) {}
    }

    fn find_option<'a>(options: &'a [u8], kind: u8) -> Option<&'a [u8]> {
        let mut i = 0;
        while i + 1 < options.len() {
            let k = options[i];
            if k == 0 {
                i += 1;
                continue;
            }
            if k == 255 {
                break;
            }
            let len = options[i + 1] as usize;
            let start = i + 2;
            if k == kind {
                return Some(&options[start..start + len]);
            }
            i = start + len;
        }
        None
    }

    fn inject_offer(buf: &mut [u8], xid: u32, yiaddr: IpV4Addr, server_id: IpV4Addr) {
        let header = DhcpHeader::new(
            DhcpOperation::Reply,
            xid,
            0,
            0x8000,
            IpV4Addr::ANY,
            yiaddr,
            server_id,
            IpV4Addr::ANY,
            MacAddr::new([0, 0, 0, 0, 0, 1]),
        );
        let mut options = [0_u8; DHCP_OPTIONS_BUF_LEN];
        let mut n = 0;
        options[n] = u8::from(DhcpOptionKind::DhcpMessageType);
        options[n + 1] = 1;
        options[n + 2] = u8::from(DhcpMessageKind::Offer);
        n += 3;
        options[n] = u8::from(DhcpOptionKind::SubnetMask);
        options[n + 1] = 4;
        options[n + 2..n + 6].copy_from_slice(&[255, 255, 255, 0]);
        n += 6;
        options[n] = u8::from(DhcpOptionKind::Router);
        options[n + 1] = 4;
        options[n + 2..n + 6].copy_from_slice(&server_id.0);
        n += 6;
        options[n] = u8::from(DhcpOptionKind::DomainNameServers);
        options[n + 1] = 4;
        options[n + 2..n + 6].copy_from_slice(&server_id.0);
        n += 6;
        options[n] = u8::from(DhcpOptionKind::IpAddressLeaseTime);
        options[n + 1] = 4;
        options[n + 2..n + 6].copy_from_slice(&86400_u32.to_be_bytes());
        n += 6;
        options[n] = u8::from(DhcpOptionKind::ServerIdentifier);
        options[n + 1] = 4;
        options[n + 2..n + 6].copy_from_slice(&server_id.0);
        n += 6;
        options[n] = u8::from(DhcpOptionKind::End);
        n += 1;
        prepare_dhcp_datagram(
            buf,
            &header,
            &options[..n],
            server_id,
            server_id,
            MacAddr::new([0, 0, 0, 0, 0, 1]),
            DHCP_SERVER_PORT,
            IpV4Addr::BROADCAST,
            DHCP_CLIENT_PORT,
        );
    }

    fn inject_ack(buf: &mut [u8], xid: u32, yiaddr: IpV4Addr, server_id: IpV4Addr) {
        inject_offer(buf, xid, yiaddr, server_id);
        // Flip the message-type option from Offer to Ack in place.
        let data_start = UDP_DATA_OFFSET + DHCP_HEADER_LEN;
        buf[data_start + 2] = u8::from(DhcpMessageKind::Ack);
    }

    #[test]
    fn test_discover_handshake_then_offer_sends_request_naming_offered_address() {
        // Scenario A from spec §8
        let mut client = DhcpClient::new(0x1234_5678);
        let mut mac = FakeMac::default();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let our_mac = MacAddr::new([0, 0, 0, 0, 0, 1]);
        let hostname = HostName::new(b"STM32_ENC28J60");

        client.start(&mut buf, &mut mac, our_mac, &hostname, 0);
        assert_eq!(client.state(), DhcpState::Discover);
        let discover_options = &mac.sent[UDP_DATA_OFFSET + DHCP_HEADER_LEN..];
        assert_eq!(find_option(discover_options, 53), Some(&[1_u8][..]));

        let offered_ip = IpV4Addr::new([192, 168, 0, 100]);
        let server_ip = IpV4Addr::new([192, 168, 0, 1]);
        inject_offer(&mut buf, 0x1234_5678, offered_ip, server_ip);

        let lease = client.on_datagram(&mut buf, &mut mac, our_mac, &hostname, 1000);
        assert!(lease.is_none());
        assert_eq!(client.state(), DhcpState::Request);

        let request_options = &mac.sent[UDP_DATA_OFFSET + DHCP_HEADER_LEN..];
        assert_eq!(find_option(request_options, 50), Some(&offered_ip.0[..]));
        assert_eq!(find_option(request_options, 54), Some(&server_ip.0[..]));

        inject_ack(&mut buf, 0x1234_5678, offered_ip, server_ip);
        let lease = client.on_datagram(&mut buf, &mut mac, our_mac, &hostname, 2000).unwrap();
        assert_eq!(client.state(), DhcpState::Ok);
        assert_eq!(lease.ipaddr, offered_ip);
        assert_eq!(lease.netmask, IpV4Addr::new([255, 255, 255, 0]));
        assert!(!mac.broadcast_enabled);
    }

    #[test]
    fn test_duplicate_offer_produces_one_request() {
        let mut client = DhcpClient::new(42);
        let mut mac = FakeMac::default();
        let mut buf = [0_u8; MIN_BUFFER_LEN];
        let our_mac = MacAddr::new([0, 0, 0, 0, 0, 1]);
        let hostname = HostName::new(b"widget");

        client.start(&mut buf, &mut mac, our_mac, &hostname, 0);
        let offered_ip = IpV4Addr::new([10, 0, 0, 50]);
        let server_ip = IpV4Addr::new([10, 0, 0, 1]);

        inject_offer(&mut buf, 42, offered_ip, server_ip);
        assert!(client.on_datagram(&mut buf, &mut mac, our_mac, &hostname, 1000).is_none());
        assert_eq!(client.state(), DhcpState::Request);

        inject_offer(&mut buf, 42, offered_ip, server_ip);
        assert!(client.on_datagram(&mut buf, &mut mac, our_mac, &hostname, 1500).is_none());
        assert_eq!(client.state(), DhcpState::Request);
    }

}
