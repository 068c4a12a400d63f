//! Internet layer: Internet Protocol message header construction
//!
//! Fixed 20-byte header only (IHL=5); no IP options are accepted on receive, per spec.

use crate::{DSCP, IpV4Addr, Protocol};

use byte_struct::*;

bitfields!(
    #[derive(Clone, Copy, Debug)]
    Fragmentation: u16 {
        unused: 1,
        pub do_not_fragment: 1,
        pub more_fragments: 1,
        pub offset: 13
    }
);

bitfields!(
    #[derive(Clone, Copy, Debug)]
    VersionAndHeaderLength: u8 {
        pub version: 4,
        pub header_length: 4
    }
);

/// Length in bytes of the fixed IPv4 header (IHL=5, no options).
pub const IP_HEADER_LEN: usize = 20;

/// IPV4 header per IETF-RFC-791, fixed length (IHL=5, no options accepted on receive).
///
/// See <https://en.wikipedia.org/wiki/IPv4>
///
/// first 32-bit word
///
/// value [0] Version [4 bits], Header Length [4 bits]
///
/// value [1] Type-of-Service/IP Precedence/DSCP
///
/// value [2:3] Total Length [u16] in bytes
///
/// second 32-bit word
///
/// value [4:5] Identification [u16]
///
/// value [6:7] Flags [3 bits], Fragmentation Offset [13 bits]
///
/// third 32-bit word
///
/// value [8] Time-to-Live
///
/// value [9] Protocol
///
/// value [10:11] Checksum [u16]
///
/// fourth 32-bit word
///
/// value [12:15] Source IP Address
///
/// fifth 32-bit word
///
/// value [16:19] Destination IP Address
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct IpV4Header {
    /// Version (always 4) and header length in 32-bit words (always 5 - no options)
    pub version_and_length: VersionAndHeaderLength,
    /// Differentiated services code point
    pub dscp: DSCP,
    /// Header + payload length in bytes
    pub total_length: u16,
    /// Identification, used for fragment reassembly (unused here - no fragmentation support)
    pub identification: u16,
    /// Flags + fragment offset (do_not_fragment is always set here)
    pub fragmentation: Fragmentation,
    /// Time-to-live; decremented by each hop
    pub time_to_live: u8,
    /// Transport-layer protocol carried in the payload
    pub protocol: Protocol,
    /// Header checksum; zero while computing, then filled with [`crate::checksum::sum16`]
    pub checksum: u16,
    /// Source address
    pub src_ipaddr: IpV4Addr,
    /// Destination address
    pub dst_ipaddr: IpV4Addr,
}

impl IpV4Header {
    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; IP_HEADER_LEN] {
        let mut header_bytes = [0_u8; IP_HEADER_LEN];
        self.write_bytes(&mut header_bytes);
        header_bytes
    }

    /// Standard version/IHL value for a 20-byte header with no options.
    pub fn version_and_length_no_options() -> VersionAndHeaderLength {
        VersionAndHeaderLength::new()
            .with_version(4)
            .with_header_length((IP_HEADER_LEN / 4) as u8)
    }
}
