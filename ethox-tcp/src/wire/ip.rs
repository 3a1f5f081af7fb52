//! Ip addresses as seen by the transport layer.
//!
//! The engine does not parse IP headers itself. It only needs the addresses the IP layer
//! extracted, to match segments to sockets, to build the checksum pseudo header and to reject
//! connection attempts from addresses that can not be a single host.
use core::fmt;

use byteorder::{ByteOrder, NetworkEndian};

/// The protocol number of TCP in the IP header.
pub const PROTOCOL_TCP: u8 = 6;

/// Internet protocol version.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Version {
    /// Version 4, 32-bit addresses.
    Ipv4,
    /// Version 6, 128-bit addresses.
    Ipv6,
}

/// An IPv4 address in network byte order.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv4Address(pub [u8; 4]);

/// An IPv6 address in network byte order.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv6Address(pub [u8; 16]);

/// The address of one end of a connection.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    /// No address, the peer of a socket that was never connected.
    Unspecified,
    /// An IPv4 address.
    Ipv4(Ipv4Address),
    /// An IPv6 address.
    Ipv6(Ipv6Address),
}

/// An address with its subnet prefix length.
///
/// The configuration of an interface, used to recognize directed broadcast and network addresses
/// of the attached subnet.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Cidr {
    address: Address,
    prefix_len: u8,
}

impl Ipv4Address {
    /// The limited broadcast address.
    pub const BROADCAST: Ipv4Address = Ipv4Address([0xff; 4]);

    /// Construct from the four octets.
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Ipv4Address {
        Ipv4Address([a0, a1, a2, a3])
    }

    /// The octets in network byte order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The address as a host integer, the first octet most significant.
    pub fn to_network_integer(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// The limited broadcast 255.255.255.255.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Class D, 224.0.0.0/4.
    pub fn is_multicast(&self) -> bool {
        self.0[0] >> 4 == 0xe
    }

    /// In 0.0.0.0/8, "this network".
    pub fn is_unspecified(&self) -> bool {
        self.0[0] == 0
    }
}

impl Ipv6Address {
    /// The loopback address `::1`.
    pub const LOOPBACK: Ipv6Address = Ipv6Address([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    /// Construct from eight 16-bit groups.
    #[allow(clippy::too_many_arguments)]
    pub fn new(a0: u16, a1: u16, a2: u16, a3: u16,
               a4: u16, a5: u16, a6: u16, a7: u16) -> Ipv6Address {
        let mut octets = [0; 16];
        NetworkEndian::write_u16_into(&[a0, a1, a2, a3, a4, a5, a6, a7], &mut octets);
        Ipv6Address(octets)
    }

    /// The octets in network byte order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// In ff00::/8.
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    /// Exactly `::`.
    pub fn is_unspecified(&self) -> bool {
        self.0.iter().all(|&octet| octet == 0)
    }
}

impl Address {
    /// An IPv4 address from its octets.
    pub fn v4(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address::Ipv4(Ipv4Address::new(a0, a1, a2, a3))
    }

    /// An IPv6 address from its groups.
    #[allow(clippy::too_many_arguments)]
    pub fn v6(a0: u16, a1: u16, a2: u16, a3: u16, a4: u16, a5: u16, a6: u16, a7: u16)
        -> Address
    {
        Address::Ipv6(Ipv6Address::new(a0, a1, a2, a3, a4, a5, a6, a7))
    }

    /// The protocol version, `None` when unspecified.
    pub fn version(&self) -> Option<Version> {
        match self {
            Address::Unspecified => None,
            Address::Ipv4(_) => Some(Version::Ipv4),
            Address::Ipv6(_) => Some(Version::Ipv6),
        }
    }

    /// The octets in network byte order, empty when unspecified.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Address::Unspecified => &[],
            Address::Ipv4(addr) => addr.as_bytes(),
            Address::Ipv6(addr) => addr.as_bytes(),
        }
    }

    /// Whether the address can name a single host.
    pub fn is_unicast(&self) -> bool {
        match self {
            Address::Unspecified => false,
            Address::Ipv4(addr) => !(addr.is_broadcast() || addr.is_multicast() || addr.is_unspecified()),
            Address::Ipv6(addr) => !(addr.is_multicast() || addr.is_unspecified()),
        }
    }

    /// Multicast in either version.
    pub fn is_multicast(&self) -> bool {
        match self {
            Address::Unspecified => false,
            Address::Ipv4(addr) => addr.is_multicast(),
            Address::Ipv6(addr) => addr.is_multicast(),
        }
    }
}

impl Cidr {
    /// Create a cidr block from the given address and prefix length.
    ///
    /// # Panics
    /// If the prefix is longer than the address or the address is unspecified.
    pub fn new(address: Address, prefix_len: u8) -> Cidr {
        let width = match address {
            Address::Ipv4(_) => 32,
            Address::Ipv6(_) => 128,
            Address::Unspecified => panic!("a cidr block needs a specified address"),
        };
        assert!(prefix_len <= width, "prefix /{} too long", prefix_len);
        Cidr { address, prefix_len }
    }

    /// The address of the interface.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The subnet prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The host part mask of an IPv4 block that has a network and a broadcast address.
    ///
    /// Blocks of /31 and /32 have neither, RFC 3021.
    fn host_mask_v4(&self) -> Option<(u32, u32)> {
        match self.address {
            Address::Ipv4(own) if self.prefix_len < 31 => {
                let host = u32::max_value() >> self.prefix_len;
                Some((own.to_network_integer() & !host, host))
            },
            _ => None,
        }
    }

    /// Whether `address` is the network address of this block.
    pub fn is_network(&self, address: Address) -> bool {
        match (self.host_mask_v4(), address) {
            (Some((network, _)), Address::Ipv4(other)) => other.to_network_integer() == network,
            _ => false,
        }
    }

    /// Whether `address` is the directed broadcast address of this block.
    pub fn is_broadcast(&self, address: Address) -> bool {
        match (self.host_mask_v4(), address) {
            (Some((network, host)), Address::Ipv4(other)) =>
                other.to_network_integer() == network | host,
            _ => false,
        }
    }
}

impl Default for Address {
    fn default() -> Address {
        Address::Unspecified
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Self {
        Address::Ipv4(addr)
    }
}

impl From<Ipv6Address> for Address {
    fn from(addr: Ipv6Address) -> Self {
        Address::Ipv6(addr)
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut separator = "";
        for group in self.0.chunks(2) {
            write!(f, "{}{:x}", separator, NetworkEndian::read_u16(group))?;
            separator = ":";
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Unspecified => f.write_str("*"),
            Address::Ipv4(addr) => fmt::Display::fmt(addr, f),
            Address::Ipv6(addr) => fmt::Display::fmt(addr, f),
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// RFC 1071 checksum arithmetic.
///
/// Sums are kept folded to 16 bits and complemented only at the end.
pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::{Address, PROTOCOL_TCP};

    fn fold(mut sum: u32) -> u16 {
        while sum > 0xffff {
            sum = (sum >> 16) + (sum & 0xffff);
        }
        sum as u16
    }

    /// The one's complement sum of big endian words, an odd trailing octet padded with zero.
    pub fn data(octets: &[u8]) -> u16 {
        let mut words = octets.chunks_exact(2);
        let mut sum: u32 = 0;
        for word in &mut words {
            sum += u32::from(NetworkEndian::read_u16(word));
            // Fold early so that large buffers can not overflow.
            if sum & 0x8000_0000 != 0 {
                sum = u32::from(fold(sum));
            }
        }
        if let Some(&last) = words.remainder().first() {
            sum += u32::from(last) << 8;
        }
        fold(sum)
    }

    /// Add up partial sums.
    pub fn combine(sums: &[u16]) -> u16 {
        fold(sums.iter().map(|&sum| u32::from(sum)).sum())
    }

    /// The sum of the TCP pseudo header of a segment with `length` octets.
    ///
    /// # Panics
    /// If the two addresses are not of the same IP version.
    pub fn pseudo_header(source: &Address, destination: &Address, length: u32) -> u16 {
        let mut tail = [0u8; 8];
        let tail: &[u8] = match (source, destination) {
            (Address::Ipv4(_), Address::Ipv4(_)) => {
                tail[1] = PROTOCOL_TCP;
                NetworkEndian::write_u16(&mut tail[2..4], length as u16);
                &tail[..4]
            },
            (Address::Ipv6(_), Address::Ipv6(_)) => {
                NetworkEndian::write_u32(&mut tail[..4], length);
                tail[7] = PROTOCOL_TCP;
                &tail[..]
            },
            _ => panic!("no pseudo header for addresses {} and {}", source, destination),
        };
        combine(&[data(source.as_bytes()), data(destination.as_bytes()), data(tail)])
    }

    /// The complemented checksum of a whole segment including its pseudo header.
    ///
    /// With the checksum field zeroed this is the value to transmit. Over a received segment it
    /// is zero exactly when the transmitted checksum was correct.
    pub fn segment(source: &Address, destination: &Address, segment: &[u8]) -> u16 {
        !combine(&[
            pseudo_header(source, destination, segment.len() as u32),
            data(segment),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_special_addresses() {
        let cidr = Cidr::new(Address::v4(192, 168, 1, 10), 24);
        assert!(cidr.is_network(Address::v4(192, 168, 1, 0)));
        assert!(cidr.is_broadcast(Address::v4(192, 168, 1, 255)));
        assert!(!cidr.is_broadcast(Address::v4(192, 168, 2, 255)));
        assert!(!cidr.is_network(Address::v4(192, 168, 1, 1)));

        let point_to_point = Cidr::new(Address::v4(10, 0, 0, 0), 31);
        assert!(!point_to_point.is_network(Address::v4(10, 0, 0, 0)));
    }

    #[test]
    fn address_classes() {
        assert!(Address::v4(224, 0, 0, 1).is_multicast());
        assert!(!Address::v4(10, 0, 0, 1).is_multicast());
        assert!(!Address::Ipv4(Ipv4Address::BROADCAST).is_unicast());
        assert!(!Address::v4(0, 0, 0, 0).is_unicast());
        assert!(Address::v6(0xff02, 0, 0, 0, 0, 0, 0, 1).is_multicast());
        assert!(Address::Ipv6(Ipv6Address::LOOPBACK).is_unicast());
        assert_eq!(Address::v6(0xfe80, 0, 0, 0, 0, 0, 0, 1).version(), Some(Version::Ipv6));
    }

    #[test]
    fn odd_length_checksum() {
        // RFC 1071 section 3 example, plus a trailing odd octet.
        let words = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum::data(&words), 0xddf2);
        assert_eq!(checksum::data(&[0x12]), 0x1200);
    }
}
