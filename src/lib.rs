//! A no-std, panic-never, heapless, single-interface IPv4 stack for bare-metal.
//!
//! Drives an external Ethernet MAC/PHY controller over one shared packet buffer with no
//! dynamic allocation and no background threads: ARP, ICMP echo, UDP, a small TCP engine
//! (client and passive server), a DHCP client, a DNS client, and an NTP client, all dispatched
//! from a single cooperative `poll` loop.
//!
//! This library is under active development; some corners of the protocol surface (IP
//! fragmentation, TCP congestion control, multiple simultaneous client sessions) are
//! intentionally unimplemented - see each module's docs for what is in and out of scope.
//!
//! ```rust
//! use picostack::*;
//!
//! let config = NetConfig::new(
//!     MacAddr::new([0x02, 0xAF, 0xFF, 0x1A, 0xE5, 0x3C]),
//!     HostName::new(b"widget"),
//! );
//! let mut stack = NetStack::new(config);
//! assert!(!stack.gateway.gw_mac_ready());
//! ```

#![no_std]
#![allow(dead_code)]
#![deny(missing_docs)]
#![feature(generic_const_exprs)]
#![feature(test)]

#[cfg(feature = "panic_never")]
use panic_never as _;

pub use byte_struct::{ByteStruct, ByteStructLen};
pub use modular_bitfield;
pub use ufmt::{derive::uDebug, uDebug, uDisplay, uWrite};

pub mod enet; // Link layer
pub mod ip; // Internet layer
pub mod buffer; // Typed, bounds-checked field accessors into the shared packet buffer
pub mod checksum; // Shared one's-complement checksum engine
pub mod arp; // Address resolution / gateway MAC cache
pub mod icmp; // Echo request/reply
pub mod udp; // Transport layer: datagrams
pub mod tcp; // Transport layer: connection-oriented engine
pub mod dhcp; // Dynamic Host Configuration Protocol client
pub mod dns; // DNS resolver client
pub mod ntp; // NTP client + calendar conversion
pub mod config; // Host identity / NetConfig
pub mod collaborators; // External interfaces this core depends on (MAC, RTC, tick, logging)
pub mod net; // NetStack: poll loop, between-frame work, orchestration

pub use arp::*;
pub use buffer::*;
pub use checksum::*;
pub use collaborators::*;
pub use config::*;
pub use dhcp::*;
pub use dns::*;
pub use enet::*;
pub use icmp::*;
pub use ip::*;
pub use net::*;
pub use ntp::*;
pub use tcp::*;
pub use udp::*;

/// Standard 6-byte MAC address.
/// Split 24/24 format, Block ID | Device ID .
/// Locally-administered addresses are [0x02, ...], [0x06, ...], [0x0A, ...], [0x0E, ...]
pub type MacAddr = ByteArray<6>;

impl MacAddr {
    /// New from bytes
    pub fn new(v: [u8; 6]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: MacAddr = ByteArray([0xFF_u8; 6]);

    /// Any address (all zeroes)
    pub const ANY: MacAddr = ByteArray([0x0_u8; 6]);
}

/// IPV4 address as bytes
pub type IpV4Addr = ByteArray<4>;

impl IpV4Addr {
    /// New from bytes
    pub fn new(v: [u8; 4]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: IpV4Addr = ByteArray([0xFF_u8; 4]);

    /// LAN broadcast address (all ones)
    pub const BROADCAST_LOCAL: IpV4Addr = ByteArray([0x0, 0x0, 0x0, 0xFF]);

    /// Any address (all zeroes)
    pub const ANY: IpV4Addr = ByteArray([0x0_u8; 4]);
}

/// Common choices of transport-layer protocols and their IP header values.
/// There are many more protocols not listed here.
/// See <https://en.wikipedia.org/wiki/List_of_IP_protocol_numbers>.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Protocol {
    /// Internet Control Message Protocol
    Icmp = 0x01,
    /// Transmission Control Protocol
    Tcp = 0x06,
    /// User Datagram Protocol
    Udp = 0x11,
    /// Unimplemented
    Unimplemented,
}

impl ByteStructLen for Protocol {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for Protocol {
    fn read_bytes(bytes: &[u8]) -> Self {
        match bytes[0] {
            x if x == (Protocol::Icmp as u8) => Protocol::Icmp,
            x if x == (Protocol::Tcp as u8) => Protocol::Tcp,
            x if x == (Protocol::Udp as u8) => Protocol::Udp,
            _ => Protocol::Unimplemented,
        }
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = *self as u8;
    }
}

impl Protocol {
    fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u8).to_be_bytes()
    }
}

/// Type-of-Service for networks with differentiated services.
/// See <https://en.wikipedia.org/wiki/Differentiated_services>.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DSCP {
    /// Standard is almost always fine
    Standard = 0,
    /// Realtime is rarely used
    Realtime = 32 << 2,
    /// Catch-all for the many other kinds or invalid bit patterns
    Unimplemented,
}

impl ByteStructLen for DSCP {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DSCP {
    fn read_bytes(bytes: &[u8]) -> Self {
        match bytes[0] {
            x if x == (DSCP::Standard as u8) => DSCP::Standard,
            x if x == (DSCP::Realtime as u8) => DSCP::Realtime,
            _ => DSCP::Unimplemented,
        }
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = *self as u8;
    }
}

impl DSCP {
    fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        (*self as u8).to_be_bytes()
    }
}

/// Newtype for [u8; N] in order to be able to implement traits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> ByteStructLen for ByteArray<N> {
    const BYTE_LEN: usize = N;
}

impl<const N: usize> ByteStruct for ByteArray<N> {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0_u8; N];
        out.copy_from_slice(&bytes[0..N]);
        ByteArray(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        for i in 0..N {
            bytes[i] = self.0[i];
        }
    }
}

impl<const N: usize> ByteArray<N> {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; N] {
        self.0
    }
}

impl uDebug for ByteArray<4> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 4] as uDebug>::fmt(&self.0, f)
    }
}

impl uDebug for ByteArray<6> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 6] as uDebug>::fmt(&self.0, f)
    }
}

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a variant in order to
/// avoid either panicking or cumbersome error handling.
///
/// Yoinked shamelessly (with some modification) from smoltcp.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, uDebug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// A single monotonic millisecond tick, supplied by the host application.
/// The stack never reads wall-clock time directly; every lease/retry/refresh
/// timer is measured as a difference of two `NowMs` samples.
pub type NowMs = u64;

/// Error kinds that unify every subsystem's local error type, for callers
/// that just want to know *that* something failed rather than which
/// subsystem failed. Subsystem-local errors (e.g. [`dns::DnsError`])
/// carry more detail and should be preferred inside the crate.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub enum NetError {
    /// The shared packet buffer was too small for the operation.
    BufferTooSmall,
    /// A header failed to parse (bad length, bad magic value, truncated frame).
    Malformed,
    /// The gateway MAC address is not resolved yet.
    GatewayNotReady,
    /// No free slot was available (TCP connection table, DNS/DHCP retry budget).
    NoCapacity,
    /// The requested protocol exchange timed out after exhausting its retries.
    Timeout,
}

/// Structured events the stack reports so a caller can feed them to a
/// [`collaborators::LogSink`] without the stack itself doing any string
/// formatting on the hot path.
#[derive(Clone, Copy, uDebug, Debug, PartialEq, Eq)]
pub enum NetEvent {
    /// Gateway MAC resolved via ARP.
    GatewayResolved,
    /// DHCP lease acquired.
    DhcpBound,
    /// DHCP lease expired; renewal was triggered.
    DhcpRenewing,
    /// DNS answer received for the outstanding query.
    DnsResolved,
    /// A UDP command-table payload was received but matched no entry.
    UnhandledUdpCommand,
    /// A TCP peer sent RST.
    TcpReset,
}
