//! The TCP engine.
//!
//! One [`Endpoint`] holds all state of TCP on top of one IP instance: sockets, the port table,
//! listeners and suspended callers. It is driven from three directions, all of which take the IP
//! layer as an argument:
//!
//! * Application calls, such as `client_socket_connect` or `socket_send`, change the state of a
//!   socket and may transmit.
//! * Received segments are handed over with `packet_receive` and processed with
//!   `queue_process`, or processed directly with `packet_process`.
//! * The periodic timer, `fast_periodic_processing`, retransmits, sends delayed
//!   acknowledgements, probes closed windows and keeps connections alive.
//!
//! The engine never blocks. A call that would have to wait may instead suspend: it returns the
//! key of a [`Waiter`] that is resumed when the call can complete. The [`blocking`] module
//! builds blocking calls on top of this with a mutex and condition variable.
//!
//! [`Endpoint`]: struct.Endpoint.html
//! [`Waiter`]: struct.Waiter.html
//! [`blocking`]: blocking/index.html
//!
//! ## Protocol
//!
//! The state machine follows RFC 793 with the corrections of RFC 1122. Incoming segments pass the
//! acceptability test of RFC 793 and resets or synchronize bits within the window are answered
//! with a challenge acknowledgement, RFC 5961. The window scale and maximum segment size options
//! of RFC 1323 and RFC 879 are supported, timestamps and selective acknowledgements are not.
//!
//! Congestion control is NewReno, RFC 5681 and RFC 6582, with an initial window per RFC 3390. The
//! retransmission timeout is not measured but configured, together with an exponential backoff.
//!
//! An incoming segment without a connection is answered with a reset, unless it is a reset
//! itself. RFC 793 is clear about this [in section Reset
//! Generation](https://tools.ietf.org/html/rfc793#page-36):
//!
//! > 1.  If the connection does not exist (CLOSED) then a reset is sent in response to any
//! incoming segment except another reset.
//!
//! Connection requests from the address of the listener itself with its own port, or from
//! broadcast, multicast or network addresses are dropped without an answer.
//!
//! ## Deviations
//!
//! Data sent in a SYN is ignored. Urgent data is not delivered separately, a segment with the URG
//! flag only runs the urgent callback of the socket.
//!
//! A listener accepts one connection per server socket. Requests arriving while no server socket
//! is available are queued, the oldest is evicted when the queue is full.
mod client;
mod config;
mod data;
mod dispatch;
mod endpoint;
mod io;
mod ports;
mod server;
mod siphash;
mod socket;
mod state;
mod suspend;
mod timer;
mod transmit;

#[cfg(feature = "std")]
pub mod blocking;

#[cfg(all(test, feature = "std"))]
mod tests;

pub use config::Config;

pub use endpoint::{
    Endpoint,
    Info,
    Storage};

pub use server::{
    Listener,
    Relisten};

// publically exposed for initialization.
pub use siphash::{
    FourTuple,
    IsnGenerator};

pub use socket::{
    Socket,
    SocketInfo,
    SocketKey,
    SocketOptions,
    State};

pub use suspend::{
    Outcome,
    Wait,
    WaitList,
    Waiter,
    WaiterKey,
    Wakeup};

#[cfg(feature = "std")]
pub use blocking::{Blocking, Completed};
