/*! Low-level segment access and construction.

The `wire` module deals with the packet *representation*. It provides two levels of
functionality.

 * First, it provides functions to extract fields from sequences of octets, and to insert fields
   into sequences of octets. This happens in [`TcpPacket`], a thin wrapper around a byte buffer.
 * Second, it provides a compact, high-level representation of header data that can be created from
   parsing and emitted into a sequence of octets. This happens through [`TcpRepr`].

[`TcpPacket`]: struct.TcpPacket.html
[`TcpRepr`]: struct.TcpRepr.html

The `Packet::check_len()` method guarantees that, if it returned `Ok(())`, then no field accessor
or setter method will panic. In the `Repr` family of data structures, the `Repr::parse()` method
never panics and the `Repr::emit()` method never panics as long as the underlying buffer is at
least `Repr::header_len()` octets long.

# Examples

To emit a SYN into an octet buffer, and then parse it back:

```rust
use ethox_tcp::wire::*;
let repr = TcpRepr {
    src_port: 49152,
    dst_port: 80,
    flags: TcpFlags::SYN,
    seq_number: TcpSeqNumber(0x1000),
    ack_number: None,
    window_len: 8192,
    window_scale: None,
    max_seg_size: Some(1460),
    payload_len: 0,
};

let mut buffer = vec![0; repr.header_len()];
let mut packet = TcpPacket::new_unchecked(&mut buffer[..]);
repr.emit(&mut packet);

let packet = TcpPacket::new_checked(&buffer[..]).unwrap();
let parsed = TcpRepr::parse(&packet).unwrap();
assert_eq!(parsed, repr);
```
*/

mod error;
pub mod ip;
pub mod tcp;

pub use self::error::{Error, Result};

pub use self::ip::{
    Address as IpAddress,
    Cidr as IpCidr,
    Ipv4Address,
    Ipv6Address,
    Version as IpVersion};

pub use self::tcp::{
    Flags as TcpFlags,
    Packet as TcpPacket,
    Repr as TcpRepr,
    SeqNumber as TcpSeqNumber,
    TcpOption,
    HEADER_LEN as TCP_HEADER_LEN};
