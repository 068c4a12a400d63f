//! DNS resolver client: a single outstanding A-record query, spec §4.7.
//!
//! Grounded on `examples/original_source/Src/dnslkup.c`, reworked into an explicit state
//! machine instead of a blocking loop: `request` is driven once from the orchestration call,
//! and `process_answer`/`retry_due` are driven from [`crate::net::NetStack::poll`] like every
//! other subsystem here.

use crate::{buffer::*, collaborators::MacDriver, IpV4Addr, MacAddr, NowMs};
use ufmt::derive::uDebug;

/// High byte of the DNS client's ephemeral UDP source port (spec §6).
pub const DNS_SRC_PORT_H: u8 = 0xE0;
/// Well-known DNS server port.
pub const DNS_SERVER_PORT: u16 = 53;
/// Per-attempt timeout (spec §4.9 "DNS: 60-second per-attempt timeout").
pub const DNS_RETRY_TIMEOUT_MS: NowMs = 60_000;
/// Total attempts before giving up (spec §4.9 "3 attempts").
pub const DNS_MAX_ATTEMPTS: u8 = 3;

const QTYPE_A: u16 = 1;
const QCLASS_IN: u16 = 1;
const DNS_HEADER_LEN: usize = 12;

/// Resolution failure reasons (spec §3 "error code").
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub enum DnsError {
    /// No error (yet).
    None,
    /// The server responded with a non-recursive or error flag set.
    ServerError,
    /// The answer section had no A record.
    NotIpv4,
}

/// Resolver state (spec §3 "DNS client state").
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub enum DnsState {
    /// No request outstanding.
    Init,
    /// A query was sent; awaiting an answer or a retry timeout.
    Requested,
    /// An answer (or a terminal error) has been recorded.
    Answer,
}

/// Single-outstanding-request DNS resolver.
pub struct DnsResolver {
    state: DnsState,
    tid: u16,
    /// Length in bytes of the question section, recorded so the answer parser can skip over
    /// the (identical, echoed) question without re-walking label pointers.
    question_len: usize,
    last_request_ms: NowMs,
    attempts_remaining: u8,
    answer: IpV4Addr,
    error: DnsError,
}

impl DnsResolver {
    /// New, idle resolver.
    pub fn new() -> Self {
        DnsResolver {
            state: DnsState::Init,
            tid: 0,
            question_len: 0,
            last_request_ms: 0,
            attempts_remaining: 0,
            answer: IpV4Addr::ANY,
            error: DnsError::None,
        }
    }

    /// True once an answer (possibly an error) has been recorded.
    pub fn have_answer(&self) -> bool {
        self.state == DnsState::Answer
    }

    /// The resolved address, valid iff [`Self::have_answer`] and `error() == DnsError::None`.
    pub fn answer_ip(&self) -> IpV4Addr {
        self.answer
    }

    /// The terminal error, if any.
    pub fn error(&self) -> DnsError {
        self.error
    }

    /// Ephemeral source port for the outstanding (or next) query.
    fn src_port(&self) -> u16 {
        ((DNS_SRC_PORT_H as u16) << 8) | (self.tid & 0xff)
    }

    /// Encode the question section (length-prefixed labels, terminal zero, then QTYPE/QCLASS)
    /// into `out`, starting at offset 0. Returns the number of bytes written.
    fn encode_question(hostname: &[u8], out: &mut [u8]) -> usize {
        let mut i = 0;
        for label in hostname.split(|&b| b == b'.') {
            out[i] = label.len() as u8;
            i += 1;
            out[i..i + label.len()].copy_from_slice(label);
            i += label.len();
        }
        out[i] = 0; // root label
        i += 1;
        out[i..i + 2].copy_from_slice(&QTYPE_A.to_be_bytes());
        i += 2;
        out[i..i + 2].copy_from_slice(&QCLASS_IN.to_be_bytes());
        i += 2;
        i
    }

    /// Send a new A-record query for `hostname` (spec §4.7 "Request"). Resets the retry
    /// budget and returns the outbound frame length.
    pub fn request(
        &mut self,
        buf: &mut [u8],
        mac: &mut impl MacDriver,
        hostname: &[u8],
        our_mac: MacAddr,
        our_ip: IpV4Addr,
        dst_mac: MacAddr,
        dns_server: IpV4Addr,
        now: NowMs,
    ) {
        self.tid = self.tid.wrapping_add(1);
        self.state = DnsState::Requested;
        self.last_request_ms = now;
        self.attempts_remaining = DNS_MAX_ATTEMPTS;
        self.error = DnsError::None;

        let mut payload = [0_u8; crate::udp::UDP_MAX_DATA_LEN];
        payload[0] = (self.tid >> 8) as u8;
        payload[1] = (self.tid & 0xff) as u8;
        payload[2] = 0x01; // flags high byte: recursion desired
        payload[3] = 0x00;
        payload[4] = 0x00;
        payload[5] = 0x01; // QDCOUNT = 1
                            // ANCOUNT, NSCOUNT, ARCOUNT left zero at [6..12)

        self.question_len = Self::encode_question(hostname, &mut payload[DNS_HEADER_LEN..]);
        let total = DNS_HEADER_LEN + self.question_len;

        crate::udp::send_udp(
            buf,
            &payload[..total],
            mac,
            our_mac,
            our_ip,
            dst_mac,
            self.src_port(),
            dns_server,
            DNS_SERVER_PORT,
        );
    }

    /// Between-frame housekeeping: re-send the query if the current attempt has timed out.
    /// Returns `true` if a retry was sent, `false` if idle or the attempt budget is exhausted
    /// (in which case `state` becomes `Answer` with `error = ServerError`, matching the
    /// caller-visible "allocation failed" contract of spec §4.9).
    #[allow(clippy::too_many_arguments)]
    pub fn retry_if_due(
        &mut self,
        buf: &mut [u8],
        mac: &mut impl MacDriver,
        hostname: &[u8],
        our_mac: MacAddr,
        our_ip: IpV4Addr,
        dst_mac: MacAddr,
        dns_server: IpV4Addr,
        now: NowMs,
    ) -> bool {
        if self.state != DnsState::Requested {
            return false;
        }
        if now.saturating_sub(self.last_request_ms) < DNS_RETRY_TIMEOUT_MS {
            return false;
        }
        if self.attempts_remaining <= 1 {
            self.state = DnsState::Answer;
            self.error = DnsError::ServerError;
            return false;
        }
        self.attempts_remaining -= 1;
        self.request(buf, mac, hostname, our_mac, our_ip, dst_mac, dns_server, now);
        true
    }

    /// Process an inbound UDP datagram that might be the outstanding answer. Returns `true`
    /// iff it was consumed (matched our TID and source port); on a well-formed A-record
    /// answer, `state` becomes `Answer` with `error == None` and `answer_ip()` set.
    pub fn process_answer(&mut self, buf: &[u8]) -> bool {
        if self.state != DnsState::Requested {
            return false;
        }
        let udp = read_udp_header(buf);
        if udp.src_port != DNS_SERVER_PORT || udp.dst_port != self.src_port() {
            return false;
        }
        let data = &buf[UDP_DATA_OFFSET..];
        if data.len() < DNS_HEADER_LEN + self.question_len + 10 {
            return false;
        }
        let reply_tid = ((data[0] as u16) << 8) | data[1] as u16;
        if reply_tid != self.tid {
            return false;
        }
        // flags lower byte must indicate a successful recursive response (0x80, no rcode bits set).
        if data[3] & 0x8F != 0x80 {
            self.state = DnsState::Answer;
            self.error = DnsError::ServerError;
            return true;
        }

        let ancount = ((data[6] as u16) << 8) | data[7] as u16;
        let mut i = DNS_HEADER_LEN + self.question_len;

        let mut remaining = ancount;
        while remaining > 0 {
            if i + 10 > data.len() {
                break;
            }
            // Each answer's NAME may be a compression pointer (top two bits set) or a plain
            // name; either way it is exactly 2 bytes here since every resolved hostname in
            // practice is pointed back at the question (spec §4.7 "via a compression pointer").
            let name_len = if data[i] & 0xC0 == 0xC0 { 2 } else { 1 };
            let rtype = ((data[i + name_len] as u16) << 8) | data[i + name_len + 1] as u16;
            let rdlength = ((data[i + name_len + 8] as u16) << 8) | data[i + name_len + 9] as u16;
            let rdata_offset = i + name_len + 10;

            if rtype == QTYPE_A && rdlength == 4 && rdata_offset + 4 <= data.len() {
                self.answer = IpV4Addr::new([
                    data[rdata_offset],
                    data[rdata_offset + 1],
                    data[rdata_offset + 2],
                    data[rdata_offset + 3],
                ]);
                self.state = DnsState::Answer;
                self.error = DnsError::None;
                return true;
            }

            i = rdata_offset + rdlength as usize;
            remaining -= 1;
        }

        self.state = DnsState::Answer;
        self.error = DnsError::NotIpv4;
        true
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}
