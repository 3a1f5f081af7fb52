//! The process logic of the engine and its collaborators.
//!
//! ## Layering
//!
//! The packet logic is contained in `wire` and the processing part in this module. The engine
//! represents the local state of the protocol, all sockets and listeners with their queues and
//! timers. This state can be used to process segments and it is open to modifications by the
//! application while processing does not take place, through the application calls on
//! [`tcp::Endpoint`].
//!
//! ## Collaborators
//!
//! Below the engine sits an IP layer which is modelled by the [`ip::Ip`] trait. It is handed into
//! every call that may need to send, look up a route or compute a checksum. Packet buffers are
//! owned by a [`buffer::Pool`] which the IP layer provides. The engine only ever refers to a
//! buffer through its [`buffer::BufferKey`].
//!
//! [`tcp::Endpoint`]: tcp/struct.Endpoint.html
//! [`ip::Ip`]: ip/trait.Ip.html
//! [`buffer::Pool`]: buffer/trait.Pool.html
//! [`buffer::BufferKey`]: buffer/struct.BufferKey.html
use core::fmt;

pub mod buffer;
pub mod ip;
pub mod tcp;

/// The result type of engine operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The status of a failed engine operation.
///
/// Inbound segments never produce one of these for the application, they are dropped and counted
/// instead. All variants are surfaced synchronously to the caller or, for a suspended caller,
/// delivered with its wakeup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The socket is already bound to a port or a bind is in progress.
    AlreadyBound,

    /// The socket is not bound to any port.
    NotBound,

    /// The socket must be unbound before it can be deleted.
    StillBound,

    /// No free port could be found in the search range.
    NoFreePorts,

    /// The port is in use or reserved by the IP layer.
    PortUnavailable,

    /// A port argument is outside the permitted range.
    InvalidPort,

    /// There is already a listener for this port.
    DuplicateListen,

    /// All listener slots are in use.
    MaxListen,

    /// The listener already has a server socket waiting.
    InvalidRelisten,

    /// No listener is registered for the port.
    NotEnabled,

    /// The server socket is not in a state where it can accept.
    NotListenState,

    /// The socket is not closed.
    NotClosed,

    /// The socket is not connected, or the connection was reset.
    NotConnected,

    /// The operation was started but has not completed yet.
    InProgress,

    /// The peer's window does not permit sending right now.
    WindowOverflow,

    /// The transmit queue of the socket has reached its configured depth.
    TxQueueDepth,

    /// No data was available for receiving.
    NoPacket,

    /// An option or argument value is invalid.
    OptionError,

    /// A buffer could not be used as a segment, it is empty or malformed.
    InvalidPacket,

    /// The buffer pool had no buffer available.
    AllocationFailed,

    /// There is no route or interface towards the peer.
    NoInterface,

    /// The key does not refer to a live socket or waiter.
    InvalidSocket,

    /// Some fixed storage is exhausted.
    Exhausted,

    /// The caller is already suspended on this socket.
    AlreadySuspended,
}

/// Can convert from a wire error.
///
/// This indicates the engine tried to operate on a segment but failed.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::InvalidPacket
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Error::AlreadyBound => "socket already bound",
            Error::NotBound => "socket not bound",
            Error::StillBound => "socket still bound",
            Error::NoFreePorts => "no free ports",
            Error::PortUnavailable => "port unavailable",
            Error::InvalidPort => "invalid port",
            Error::DuplicateListen => "port already has a listener",
            Error::MaxListen => "listener storage exhausted",
            Error::InvalidRelisten => "listener already has a socket",
            Error::NotEnabled => "no listener on port",
            Error::NotListenState => "socket not in listen state",
            Error::NotClosed => "socket not closed",
            Error::NotConnected => "socket not connected",
            Error::InProgress => "operation in progress",
            Error::WindowOverflow => "send window exhausted",
            Error::TxQueueDepth => "transmit queue full",
            Error::NoPacket => "no data available",
            Error::OptionError => "invalid option",
            Error::InvalidPacket => "invalid packet",
            Error::AllocationFailed => "buffer allocation failed",
            Error::NoInterface => "no interface",
            Error::InvalidSocket => "invalid socket",
            Error::Exhausted => "storage exhausted",
            Error::AlreadySuspended => "already suspended",
        };
        f.write_str(msg)
    }
}
