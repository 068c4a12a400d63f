//! Host identity: the process-wide addressing state mutated only by DHCP (during lease
//! acquisition) or by explicit configuration at startup, and read by every send path. Spec §3.

use crate::{IpV4Addr, MacAddr};

/// Maximum length, in bytes, of the configured hostname (spec §6: "hostname (≤ 14 characters)").
pub const HOSTNAME_CAPACITY: usize = 14;

/// Bounded ASCII hostname buffer; used both for display and as the DHCP option-12 payload
/// (suffixed with two hex characters derived from the last MAC octet, per spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostName {
    bytes: [u8; HOSTNAME_CAPACITY],
    len: usize,
}

impl HostName {
    /// Build from a byte slice, truncating to [`HOSTNAME_CAPACITY`].
    pub fn new(name: &[u8]) -> Self {
        let len = name.len().min(HOSTNAME_CAPACITY);
        let mut bytes = [0_u8; HOSTNAME_CAPACITY];
        bytes[..len].copy_from_slice(&name[..len]);
        HostName { bytes, len }
    }

    /// The configured bytes (no trailing NUL padding).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Write `self` followed by two hex characters derived from `mac_last_octet` into `out`,
    /// returning the number of bytes written. Used as the DHCP option-12 value so that
    /// multiple identically-configured devices disambiguate themselves on the same network.
    pub fn write_disambiguated(&self, mac_last_octet: u8, out: &mut [u8]) -> usize {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let name = self.as_bytes();
        let total = (name.len() + 2).min(out.len());
        let name_len = total.saturating_sub(2).min(name.len());
        out[..name_len].copy_from_slice(&name[..name_len]);
        if total >= name_len + 2 {
            out[name_len] = HEX[(mac_last_octet >> 4) as usize];
            out[name_len + 1] = HEX[(mac_last_octet & 0x0F) as usize];
        }
        total
    }
}

/// Process-wide host identity: MAC/IP/mask/gateway/DNS/DHCP-server/NTP-server addresses and
/// hostname. All fields besides `mac` and `hostname` start unset and are populated by DHCP or
/// by explicit static configuration before bring-up.
#[derive(Clone, Copy, Debug)]
pub struct NetConfig {
    /// Our MAC address; fixed for the lifetime of the stack.
    pub mac: MacAddr,
    /// Our hostname, sent in DHCP option 12.
    pub hostname: HostName,
    /// Our leased or statically-configured IPv4 address.
    pub ipaddr: IpV4Addr,
    /// Subnet mask.
    pub netmask: IpV4Addr,
    /// Default gateway.
    pub gateway: IpV4Addr,
    /// DNS server.
    pub dns_server: IpV4Addr,
    /// DHCP server that granted the current lease.
    pub dhcp_server: IpV4Addr,
    /// NTP server used by [`crate::ntp`].
    pub ntp_server: IpV4Addr,
}

impl NetConfig {
    /// Build a fresh config with only identity fields set; every address defaults to
    /// [`IpV4Addr::ANY`] until DHCP or static configuration fills them in.
    pub fn new(mac: MacAddr, hostname: HostName) -> Self {
        NetConfig {
            mac,
            hostname,
            ipaddr: IpV4Addr::ANY,
            netmask: IpV4Addr::ANY,
            gateway: IpV4Addr::ANY,
            dns_server: IpV4Addr::ANY,
            dhcp_server: IpV4Addr::ANY,
            ntp_server: IpV4Addr::ANY,
        }
    }

    /// Apply a set of static fallback addresses, e.g. when DHCP allocation fails and the
    /// caller decides to fall back to a fixed configuration.
    pub fn with_static_fallback(
        mut self,
        ipaddr: IpV4Addr,
        netmask: IpV4Addr,
        gateway: IpV4Addr,
        dns_server: IpV4Addr,
    ) -> Self {
        self.ipaddr = ipaddr;
        self.netmask = netmask;
        self.gateway = gateway;
        self.dns_server = dns_server;
        self
    }
}
