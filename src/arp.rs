//! Address Resolution Protocol implementation: request/response construction and parsing,
//! plus the gateway MAC resolver state machine used to gate every outbound frame that leaves
//! the local subnet.
//!
//! ARP is not a distinct network abstraction layer, but is still required for most networks to
//! function because socket abstractions frequently require an ARP request and response to be
//! completed before sending data, even if the router is actually going to be handling the
//! association between MAC addresses and IP addresses.
//!
//! This process is not useful on a statically-addressed network, but on a mixed
//! statically-and-dynamically-addressed network, it can help in the case where the target
//! device exists on the network but has not yet sent a packet and so has no entry in the
//! router/switch's MAC address table.

use crate::*;

use byte_struct::*;
use static_assertions::const_assert;
use ufmt::derive::uDebug;

const_assert!(ArpPayload::BYTE_LEN == 28);

/// Length of a whole ARP-over-Ethernet frame: header + payload, no padding.
pub const ARP_FRAME_LEN: usize = ETH_HEADER_LEN + ArpPayload::BYTE_LEN;

/// An ARP request or response with IPV4 addresses and standard MAC addresses.
/// Assumes 6-byte standard MAC addresses and 4-byte IPV4 addresses.
///
/// See <https://en.wikipedia.org/wiki/Address_Resolution_Protocol>.
///
/// Hardware type is 1 for ethernet.
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[byte_struct_be]
pub struct ArpPayload {
    /// Hardware type (1 for ethernet)
    pub htype: u16,
    /// Protocol type (same as ethertype from ethernet header)
    pub ptype: ProtocolType,
    /// Hardware address length (6 for standard MAC)
    pub hlen: u8,
    /// Protocol address length (4 for IPV4)
    pub plen: u8,
    /// ARP operation type
    pub operation: ArpOperation,
    /// Source MAC address
    pub src_mac: MacAddr,
    /// Source IP address
    pub src_ipaddr: IpV4Addr,
    /// Destination MAC address
    pub dst_mac: MacAddr,
    /// Destination IP address
    pub dst_ipaddr: IpV4Addr,
}

impl ArpPayload {
    /// Create a new ARP payload for IPV4 on ethernet
    pub fn new(
        src_mac: MacAddr,
        src_ipaddr: IpV4Addr,
        dst_mac: MacAddr,
        dst_ipaddr: IpV4Addr,
        operation: ArpOperation,
    ) -> Self {
        ArpPayload {
            htype: 1, // Always on ethernet
            ptype: ProtocolType::IpV4,
            hlen: 6,
            plen: 4,
            operation,
            src_mac,
            src_ipaddr,
            dst_mac,
            dst_ipaddr,
        }
    }

    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// ARP request or response flag values
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ArpOperation {
    /// This is a request to confirm target IP address and acquire associated MAC address
    Request = 1,
    /// This is a response to confirm our IP address and provide associated MAC address
    Response = 2,
    /// Invalid operation
    Unimplemented,
}

impl From<u16> for ArpOperation {
    fn from(value: u16) -> Self {
        match value {
            x if x == ArpOperation::Request as u16 => ArpOperation::Request,
            x if x == ArpOperation::Response as u16 => ArpOperation::Response,
            _ => ArpOperation::Unimplemented,
        }
    }
}

impl ByteStructLen for ArpOperation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ArpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        ArpOperation::from(u16::from_be_bytes(bytes_read))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = self.to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl ArpOperation {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u16).to_be_bytes()
    }
}

/// Protocol Type flags are the same as EtherType but must be reimplemented to avoid run-time recursion
///
/// See <https://en.wikipedia.org/wiki/EtherType>
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ProtocolType {
    /// Internet protocol version 4
    IpV4 = 0x0800,
    /// Address resolution protocol
    Arp = 0x0806,
    /// Tagged virtual LAN
    Vlan = 0x8100,
    /// Internet protocol version 6
    IpV6 = 0x86DD,
    /// EtherCat
    EtherCat = 0x88A4,
    /// Precision Time Protocol
    Ptp = 0x88A7,
    /// Catch-all for uncommon types not handled here
    Unimplemented = 0x0,
}

impl From<u16> for ProtocolType {
    fn from(value: u16) -> Self {
        match value {
            x if x == ProtocolType::Arp as u16 => ProtocolType::Arp,
            x if x == ProtocolType::EtherCat as u16 => ProtocolType::EtherCat,
            x if x == ProtocolType::IpV4 as u16 => ProtocolType::IpV4,
            x if x == ProtocolType::IpV6 as u16 => ProtocolType::IpV6,
            x if x == ProtocolType::Ptp as u16 => ProtocolType::Ptp,
            x if x == ProtocolType::Vlan as u16 => ProtocolType::Vlan,
            _ => ProtocolType::Unimplemented,
        }
    }
}

impl ByteStructLen for ProtocolType {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ProtocolType {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        ProtocolType::from(u16::from_be_bytes(bytes_read))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = (*self as u16).to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl ProtocolType {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u16).to_be_bytes()
    }
}

/// Gateway MAC resolution state, spec §3: a small flag set rather than a single enum, since
/// `AcceptArpReply` can be combined with either the initial or the refresh path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GwFlags {
    /// Set from construction until the first successful resolution.
    pub initial_arp_needed: bool,
    /// Set once a matching ARP reply has been received; gates every non-local send.
    pub have_gw_mac: bool,
    /// Set while a periodic refresh is outstanding.
    pub refreshing: bool,
    /// Set between sending a whohas and consuming the matching reply.
    pub accept_arp_reply: bool,
}

/// Number of idle polls between successive gateway ARP refreshes.
const GW_REFRESH_PERIOD_POLLS: u16 = 2000;

/// Resolves and caches the default gateway's MAC address via ARP, per spec §4.3.
#[derive(Clone, Copy, Debug)]
pub struct GwResolver {
    /// Current flag set; see [`GwFlags`].
    pub flags: GwFlags,
    /// Cached gateway MAC, valid iff `flags.have_gw_mac` is set.
    pub gw_mac: MacAddr,
    /// Idle-poll counter; a whohas is emitted when this reaches zero.
    delay_counter: u16,
}

impl GwResolver {
    /// New resolver, starting in `InitialArpNeeded`.
    pub fn new() -> Self {
        GwResolver {
            flags: GwFlags {
                initial_arp_needed: true,
                ..GwFlags::default()
            },
            gw_mac: MacAddr::ANY,
            delay_counter: 0,
        }
    }

    /// True iff the cached gateway MAC is valid.
    pub fn gw_mac_ready(&self) -> bool {
        self.flags.have_gw_mac
    }

    /// Mark that a whohas has just been sent; start accepting the matching reply.
    fn on_whohas_sent(&mut self) {
        self.flags.accept_arp_reply = true;
        self.delay_counter = GW_REFRESH_PERIOD_POLLS;
    }

    /// Record a matching gateway ARP reply.
    fn on_gw_reply(&mut self, sender_mac: MacAddr) {
        self.gw_mac = sender_mac;
        self.flags = GwFlags {
            have_gw_mac: true,
            ..GwFlags::default()
        };
    }

    /// Request a periodic refresh of the cached gateway MAC.
    pub fn gw_arp_refresh(&mut self) {
        self.flags.refreshing = true;
    }

    /// Between-frame housekeeping: returns `true` when a whohas for `gateway_ip` should be
    /// emitted on this idle poll (link up, a refresh/initial request is pending, and the
    /// delay counter has run out).
    pub fn should_send_whohas(&mut self, link_up: bool) -> bool {
        if !link_up {
            return false;
        }
        if !(self.flags.initial_arp_needed || self.flags.refreshing) {
            return false;
        }
        if self.delay_counter > 0 {
            self.delay_counter -= 1;
            return false;
        }
        true
    }

    /// Build the ARP whohas request payload for `target_ip` and mark it as sent.
    pub fn arp_whohas(
        &mut self,
        our_mac: MacAddr,
        our_ip: IpV4Addr,
        target_ip: IpV4Addr,
    ) -> ArpPayload {
        self.on_whohas_sent();
        ArpPayload::new(
            our_mac,
            our_ip,
            MacAddr::ANY,
            target_ip,
            ArpOperation::Request,
        )
    }

    /// Build an ARP reply to an inbound request addressed to `our_ip`, or `None` if the
    /// request does not target us.
    pub fn handle_arp_request(
        &self,
        request: &ArpPayload,
        our_mac: MacAddr,
        our_ip: IpV4Addr,
    ) -> Option<ArpPayload> {
        if request.operation != ArpOperation::Request || request.dst_ipaddr != our_ip {
            return None;
        }
        Some(ArpPayload::new(
            our_mac,
            our_ip,
            request.src_mac,
            request.src_ipaddr,
            ArpOperation::Response,
        ))
    }

    /// Consume an inbound ARP reply; updates the cached gateway MAC if the reply is from the
    /// configured gateway IP. Returns `true` if the gateway MAC was (re)resolved.
    pub fn handle_arp_reply(&mut self, reply: &ArpPayload, gateway_ip: IpV4Addr) -> bool {
        if reply.operation != ArpOperation::Response {
            return false;
        }
        if !self.flags.accept_arp_reply && self.flags.have_gw_mac {
            // Not actively soliciting, and already resolved - a stray reply, ignore.
            return false;
        }
        if reply.src_ipaddr != gateway_ip {
            return false;
        }
        self.on_gw_reply(reply.src_mac);
        true
    }
}

impl Default for GwResolver {
    fn default() -> Self {
        Self::new()
    }
}
