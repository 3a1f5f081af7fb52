//! The IP layer underneath the engine.
//!
//! The engine never owns its IP layer. An implementation of [`Ip`] is passed into every call that
//! may need to transmit, route or compute a checksum, which keeps the engine itself free of any
//! reference to a device.
//!
//! [`Ip`]: trait.Ip.html
use crate::wire::{IpAddress, IpCidr};
use crate::wire::ip::checksum;
use super::buffer::{BufferKey, Pool};

/// Identifies an interface of the IP layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub usize);

/// Properties of an interface that the engine needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Interface {
    /// The address and subnet of the interface.
    pub cidr: IpCidr,
    /// The largest IP packet the interface can transmit.
    pub mtu: usize,
    /// The driver verifies the checksum of received segments.
    pub rx_checksum_offload: bool,
    /// The driver fills the checksum of transmitted segments.
    pub tx_checksum_offload: bool,
}

/// The answer to a route lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    /// The interface to send through.
    pub interface: InterfaceId,
    /// The next hop towards the destination.
    pub next_hop: IpAddress,
}

/// Everything the IP layer needs to wrap and transmit one segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SendRequest {
    /// The interface to transmit on.
    pub interface: InterfaceId,
    /// Source address of the IP header.
    pub source: IpAddress,
    /// Destination address of the IP header.
    pub destination: IpAddress,
    /// The next hop towards the destination.
    pub next_hop: IpAddress,
    /// Type of service, or traffic class.
    pub tos: u8,
    /// Time to live, or hop limit.
    pub ttl: u8,
    /// Whether the packet may be fragmented.
    pub fragment: bool,
}

/// An IP layer the engine can transmit through.
///
/// The payload of a buffer handed to [`send`] is exactly the TCP segment. When the driver has
/// finished with the buffer it calls [`transmit_complete`], which restores the buffer to the
/// segment if the engine still keeps it for retransmission.
///
/// [`send`]: #tymethod.send
/// [`transmit_complete`]: ../buffer/fn.transmit_complete.html
pub trait Ip {
    /// The pool providing all packet buffers.
    type Pool: Pool;

    /// Access the buffer pool.
    fn pool(&mut self) -> &mut Self::Pool;

    /// Look up the configuration of an interface.
    fn interface(&self, id: InterfaceId) -> Option<Interface>;

    /// Choose the outgoing interface and next hop for a destination.
    fn route(&self, destination: IpAddress) -> Option<Route>;

    /// Transmit a segment.
    fn send(&mut self, buffer: BufferKey, request: SendRequest);

    /// Compute the checksum of a segment.
    ///
    /// With the checksum field zeroed this is the value to transmit. Over a received segment the
    /// result is zero when its checksum is correct.
    fn checksum(&mut self, buffer: BufferKey, source: IpAddress, destination: IpAddress) -> u16 {
        checksum::segment(&source, &destination, self.pool().payload(buffer))
    }

    /// Query if a port is reserved by a translation layer and must not be bound.
    fn nat_reserved(&self, _port: u16) -> bool {
        false
    }
}
