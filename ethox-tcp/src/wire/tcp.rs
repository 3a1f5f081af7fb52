use core::{cmp, fmt, i32, ops};
use core::ops::Range;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, IpAddress, Result};
use super::ip::checksum;

/// The length of the fixed header, five 32-bit words.
pub const HEADER_LEN: usize = 20;

/// The largest shift count accepted in a window scale option, RFC 1323.
pub const MAX_WINDOW_SCALE: u8 = 14;

const SRC_PORT: usize = 0;
const DST_PORT: usize = 2;
const SEQ_NUM: usize = 4;
const ACK_NUM: usize = 8;
/// Data offset in the upper nibble, then the control bits.
const OFFSET_FLAGS: usize = 12;
const WINDOW: usize = 14;
const CHECKSUM: usize = 16;
const URGENT: usize = 18;

const KIND_END: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;
const KIND_WS: u8 = 3;

/// A TCP sequence number.
///
/// Sequence numbers live in a space modulo 2<sup>32</sup> and are compared by their signed
/// distance, so ordering holds across the wrap as long as two numbers are less than 2<sup>31</sup>
/// apart.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// Construct from the unsigned value found on the wire.
    pub fn from_u32(value: u32) -> Self {
        SeqNumber(value as i32)
    }

    /// The unsigned value as found on the wire.
    pub fn as_u32(self) -> u32 {
        self.0 as u32
    }

    fn offset(self, by: usize, forward: bool) -> Self {
        assert!(by <= i32::MAX as usize, "sequence offset {} out of range", by);
        let by = by as i32;
        SeqNumber(if forward { self.0.wrapping_add(by) } else { self.0.wrapping_sub(by) })
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.as_u32(), f)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        self.offset(rhs, true)
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        self.offset(rhs, false)
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = self.offset(rhs, true);
    }
}

/// The signed distance between two sequence numbers.
///
/// Positive when `self` lies after `rhs` in sequence space.
impl ops::Sub for SeqNumber {
    type Output = i32;

    fn sub(self, rhs: SeqNumber) -> i32 {
        self.0.wrapping_sub(rhs.0)
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        Some((*self - *other).cmp(&0))
    }
}

/// The control bits of a segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(pub u16);

impl Flags {
    /// Only the FIN flag.
    pub const FIN: Flags = Flags(0x01);
    /// Only the SYN flag.
    pub const SYN: Flags = Flags(0x02);
    /// Only the RST flag.
    pub const RST: Flags = Flags(0x04);
    /// Only the PSH flag.
    pub const PSH: Flags = Flags(0x08);
    /// Only the ACK flag.
    pub const ACK: Flags = Flags(0x10);
    /// Only the URG flag.
    pub const URG: Flags = Flags(0x20);

    const ALL: u16 = 0x3f;

    /// Test if all bits of `other` are set.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear all bits of `other`.
    pub fn set(&mut self, other: Flags, value: bool) {
        if value {
            self.0 |= other.0
        } else {
            self.0 &= !other.0
        }
    }

    /// Whether FIN is set.
    pub fn fin(self) -> bool {
        self.contains(Flags::FIN)
    }

    /// Whether SYN is set.
    pub fn syn(self) -> bool {
        self.contains(Flags::SYN)
    }

    /// Whether RST is set.
    pub fn rst(self) -> bool {
        self.contains(Flags::RST)
    }

    /// Whether PSH is set.
    pub fn psh(self) -> bool {
        self.contains(Flags::PSH)
    }

    /// Whether ACK is set.
    pub fn ack(self) -> bool {
        self.contains(Flags::ACK)
    }

    /// Whether URG is set.
    pub fn urg(self) -> bool {
        self.contains(Flags::URG)
    }

    /// The sequence space occupied by the control bits, one each for SYN and FIN.
    pub fn sequence_len(self) -> usize {
        self.syn() as usize + self.fin() as usize
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (Flags::SYN, "syn"), (Flags::FIN, "fin"), (Flags::RST, "rst"),
            (Flags::PSH, "psh"), (Flags::ACK, "ack"), (Flags::URG, "urg"),
        ];
        for &(flag, name) in names.iter() {
            if self.contains(flag) {
                write!(f, " {}", name)?;
            }
        }
        Ok(())
    }
}

/// A read/write wrapper around the bytes of a segment.
#[derive(Debug, PartialEq, Clone)]
pub struct Packet<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Wrap a buffer without looking at it.
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Wrap a buffer after [`check_len`].
    ///
    /// [`check_len`]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Packet::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no header accessor will panic.
    ///
    /// Fails with `Truncated` if the buffer does not hold the fixed header or the option words
    /// the header declares. Fails with `Malformed` if the declared header is shorter than the
    /// fixed part. Changing the header length afterwards invalidates the check.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error::Truncated);
        }
        match self.header_len() as usize {
            declared if declared < HEADER_LEN => Err(Error::Malformed),
            declared if declared > len => Err(Error::Truncated),
            _ => Ok(()),
        }
    }

    fn read_u16(&self, at: usize) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[at..at + 2])
    }

    fn read_seq(&self, at: usize) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.buffer.as_ref()[at..at + 4]))
    }

    fn options_range(&self) -> Range<usize> {
        HEADER_LEN..self.header_len() as usize
    }

    /// The source port field.
    pub fn src_port(&self) -> u16 {
        self.read_u16(SRC_PORT)
    }

    /// The destination port field.
    pub fn dst_port(&self) -> u16 {
        self.read_u16(DST_PORT)
    }

    /// The sequence number field.
    pub fn seq_number(&self) -> SeqNumber {
        self.read_seq(SEQ_NUM)
    }

    /// The acknowledgement field, meaningful only with the ACK flag.
    pub fn ack_number(&self) -> SeqNumber {
        self.read_seq(ACK_NUM)
    }

    /// The control bits, without the reserved ones.
    pub fn flags(&self) -> Flags {
        Flags(self.read_u16(OFFSET_FLAGS) & Flags::ALL)
    }

    /// The header length in octets, options included.
    pub fn header_len(&self) -> u8 {
        (self.read_u16(OFFSET_FLAGS) >> 12) as u8 * 4
    }

    /// The raw window field, before scaling.
    pub fn window_len(&self) -> u16 {
        self.read_u16(WINDOW)
    }

    /// The checksum field as transmitted.
    pub fn checksum(&self) -> u16 {
        self.read_u16(CHECKSUM)
    }

    /// The option area declared by the header.
    pub fn options(&self) -> &[u8] {
        let range = self.options_range();
        &self.buffer.as_ref()[range]
    }

    /// The data after the header.
    pub fn payload(&self) -> &[u8] {
        let start = self.header_len() as usize;
        &self.buffer.as_ref()[start..]
    }

    /// Check the checksum over the pseudo header and the whole segment.
    ///
    /// # Panics
    /// If the two addresses are not of the same IP version.
    pub fn verify_checksum(&self, source: IpAddress, destination: IpAddress) -> bool {
        checksum::segment(&source, &destination, self.buffer.as_ref()) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    fn write_u16(&mut self, at: usize, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[at..at + 2], value)
    }

    fn write_seq(&mut self, at: usize, value: SeqNumber) {
        NetworkEndian::write_i32(&mut self.buffer.as_mut()[at..at + 4], value.0)
    }

    /// Set the source port field.
    pub fn set_src_port(&mut self, value: u16) {
        self.write_u16(SRC_PORT, value)
    }

    /// Set the destination port field.
    pub fn set_dst_port(&mut self, value: u16) {
        self.write_u16(DST_PORT, value)
    }

    /// Set the sequence number field.
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        self.write_seq(SEQ_NUM, value)
    }

    /// Set the acknowledgement field.
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        self.write_seq(ACK_NUM, value)
    }

    /// Replace the control bits, clearing the reserved ones.
    pub fn set_flags(&mut self, flags: Flags) {
        let offset = self.read_u16(OFFSET_FLAGS) & 0xf000;
        self.write_u16(OFFSET_FLAGS, offset | (flags.0 & Flags::ALL))
    }

    /// Set the header length in octets, a multiple of four.
    pub fn set_header_len(&mut self, value: u8) {
        let flags = self.read_u16(OFFSET_FLAGS) & 0x0fff;
        self.write_u16(OFFSET_FLAGS, (u16::from(value) / 4) << 12 | flags)
    }

    /// Set the raw window field.
    pub fn set_window_len(&mut self, value: u16) {
        self.write_u16(WINDOW, value)
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, value: u16) {
        self.write_u16(CHECKSUM, value)
    }

    /// Compute and store the checksum.
    ///
    /// # Panics
    /// If the two addresses are not of the same IP version.
    pub fn fill_checksum(&mut self, source: IpAddress, destination: IpAddress) {
        self.set_checksum(0);
        let sum = checksum::segment(&source, &destination, self.buffer.as_ref());
        self.set_checksum(sum)
    }

    /// The option area, mutably.
    pub fn options_mut(&mut self) -> &mut [u8] {
        let range = self.options_range();
        &mut self.buffer.as_mut()[range]
    }

    /// The data after the header, mutably.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.header_len() as usize;
        &mut self.buffer.as_mut()[start..]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Packet<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// One entry of the option area.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// Terminates the option list.
    EndOfList,
    /// Padding.
    NoOperation,
    /// The largest segment the sender will accept.
    MaxSegmentSize(u16),
    /// The shift count of the window scaling.
    WindowScale(u8),
    /// Any other option, skipped over.
    Unknown {
        /// The option kind.
        kind: u8,
        /// The data following kind and length.
        data: &'a [u8],
    },
}

impl<'a> TcpOption<'a> {
    /// Split the first option off an option area.
    ///
    /// Multi-byte options carry their own length. One that is shorter than its kind and length
    /// octets, or runs past the end of the area, is malformed. So is a maximum segment size or
    /// window scale option of the wrong length.
    pub fn parse(area: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let kind = *area.first().ok_or(Error::Truncated)?;
        if kind == KIND_END {
            return Ok((&area[1..], TcpOption::EndOfList));
        }
        if kind == KIND_NOP {
            return Ok((&area[1..], TcpOption::NoOperation));
        }

        let len = usize::from(*area.get(1).ok_or(Error::Malformed)?);
        if len < 2 || len > area.len() {
            return Err(Error::Malformed);
        }
        let (this, rest) = area.split_at(len);
        let data = &this[2..];
        let option = match kind {
            KIND_MSS if data.len() == 2 => TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
            KIND_WS if data.len() == 1 => TcpOption::WindowScale(data[0]),
            KIND_MSS | KIND_WS => return Err(Error::Malformed),
            kind => TcpOption::Unknown { kind, data },
        };
        Ok((rest, option))
    }

    /// The number of octets `emit` writes, the end of list counted as one.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    /// Write the option to the front of `buffer` and return the rest.
    ///
    /// The end of list pads out all of the buffer.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        if let TcpOption::EndOfList = self {
            for byte in buffer.iter_mut() {
                *byte = KIND_END;
            }
            let end = buffer.len();
            return &mut buffer[end..];
        }

        let len = self.buffer_len();
        let (this, rest) = buffer.split_at_mut(len);
        match *self {
            TcpOption::EndOfList => unreachable!(),
            TcpOption::NoOperation => this[0] = KIND_NOP,
            TcpOption::MaxSegmentSize(mss) => {
                this[..2].copy_from_slice(&[KIND_MSS, 4]);
                NetworkEndian::write_u16(&mut this[2..], mss);
            },
            TcpOption::WindowScale(shift) => this.copy_from_slice(&[KIND_WS, 3, shift]),
            TcpOption::Unknown { kind, data } => {
                this[0] = kind;
                this[1] = len as u8;
                this[2..].copy_from_slice(data);
            },
        }
        rest
    }
}

/// The options of connection setup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct SetupOptions {
    max_seg_size: Option<u16>,
    window_scale: Option<u8>,
}

impl SetupOptions {
    /// Collect the options from an option area.
    ///
    /// Unknown options are skipped, a malformed one fails the whole area.
    fn parse(mut area: &[u8]) -> Result<Self> {
        let mut found = SetupOptions::default();
        while !area.is_empty() {
            let (rest, option) = TcpOption::parse(area)?;
            area = rest;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::MaxSegmentSize(mss) => found.max_seg_size = Some(mss),
                // RFC 1323 2.3: a shift above 14 is logged and 14 used instead.
                TcpOption::WindowScale(shift) if shift > MAX_WINDOW_SCALE => {
                    net_debug!("tcp: window scale {} clamped to {}", shift, MAX_WINDOW_SCALE);
                    found.window_scale = Some(MAX_WINDOW_SCALE);
                },
                TcpOption::WindowScale(shift) => found.window_scale = Some(shift),
                TcpOption::NoOperation | TcpOption::Unknown { .. } => (),
            }
        }
        Ok(found)
    }
}

/// The parsed header of a segment.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// The source port.
    pub src_port: u16,
    /// The destination port.
    pub dst_port: u16,
    /// All control flags except ACK which is derived from `ack_number`.
    pub flags: Flags,
    /// The sequence number of the first octet, or of the SYN.
    pub seq_number: SeqNumber,
    /// The acknowledgment, if the ACK flag is set.
    pub ack_number: Option<SeqNumber>,
    /// The raw, unscaled window field.
    pub window_len: u16,
    /// The window scale option, clamped to 14 when parsed.
    pub window_scale: Option<u8>,
    /// The maximum segment size option.
    pub max_seg_size: Option<u16>,
    /// The number of data octets following the header.
    pub payload_len: usize,
}

impl Repr {
    /// Parse the header of a segment.
    ///
    /// The checksum is not inspected, the caller knows whether the interface has already
    /// validated it.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&T>) -> Result<Repr> {
        packet.check_len()?;
        let options = SetupOptions::parse(packet.options())?;

        let mut flags = packet.flags();
        let ack_number = if flags.ack() { Some(packet.ack_number()) } else { None };
        flags.set(Flags::ACK, false);

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            flags,
            seq_number: packet.seq_number(),
            ack_number,
            window_len: packet.window_len(),
            window_scale: options.window_scale,
            max_seg_size: options.max_seg_size,
            payload_len: packet.payload().len(),
        })
    }

    /// The header length `emit` writes.
    ///
    /// The maximum segment size takes one word. The window scale is preceded by a no-operation
    /// and takes another.
    pub fn header_len(&self) -> usize {
        HEADER_LEN
            + if self.max_seg_size.is_some() { 4 } else { 0 }
            + if self.window_scale.is_some() { 4 } else { 0 }
    }

    /// The length of header and payload.
    pub fn buffer_len(&self) -> usize {
        self.header_len() + self.payload_len
    }

    /// Write the header to the front of a segment buffer.
    ///
    /// The checksum is zeroed and must be filled afterwards.
    pub fn emit<T>(&self, packet: &mut Packet<T>)
        where T: AsRef<[u8]> + AsMut<[u8]>
    {
        let mut flags = self.flags;
        flags.set(Flags::ACK, self.ack_number.is_some());

        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or_default());
        packet.set_header_len(self.header_len() as u8);
        packet.set_flags(flags);
        packet.set_window_len(self.window_len);
        packet.set_checksum(0);
        packet.write_u16(URGENT, 0);

        let mut area = packet.options_mut();
        if let Some(mss) = self.max_seg_size {
            area = TcpOption::MaxSegmentSize(mss).emit(area);
        }
        if let Some(shift) = self.window_scale {
            area = TcpOption::NoOperation.emit(area);
            area = TcpOption::WindowScale(shift).emit(area);
        }
        TcpOption::EndOfList.emit(area);
    }

    /// The sequence space the segment occupies.
    pub fn sequence_len(&self) -> usize {
        self.payload_len + self.flags.sequence_len()
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP {}->{}{} seq={}", self.src_port, self.dst_port, self.flags, self.seq_number)?;
        if let Some(ack) = self.ack_number {
            write!(f, " ack={}", ack)?;
        }
        write!(f, " win={} len={}", self.window_len, self.payload_len)?;
        if let Some(mss) = self.max_seg_size {
            write!(f, " mss={}", mss)?;
        }
        if let Some(shift) = self.window_scale {
            write!(f, " ws={}", shift)?;
        }
        Ok(())
    }
}
