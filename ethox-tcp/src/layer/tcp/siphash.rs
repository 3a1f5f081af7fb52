//! Initial sequence numbers, RFC 6528.
//!
//! The keyed hash is SipHash-2-4 instead of MD5 over the tuple and an appended secret:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
//!
//! The same key also seeds the start of the ephemeral port search, so that the ports of
//! consecutive binds are not predictable either.
use crate::wire::{IpAddress, TcpSeqNumber};

/// The addresses and ports identifying one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FourTuple {
    /// Our address.
    pub local: IpAddress,
    /// The peer's address.
    pub remote: IpAddress,
    /// Our port.
    pub local_port: u16,
    /// The peer's port.
    pub remote_port: u16,
}

/// Keyed generator of initial sequence numbers.
///
/// > ISN = M + SipHash-2-4(key, localip, remoteip, localport, remoteport)
///
/// where `M` advances once every 4 milliseconds.
#[derive(Clone, Copy, Debug)]
pub struct IsnGenerator {
    k0: u64,
    k1: u64,
}

/// The SipHash state words `v0` to `v3`.
struct Sip([u64; 4]);

impl IsnGenerator {
    /// Use a fixed key.
    ///
    /// The key should come from a cryptographic random source, or a key derivation function.
    pub fn from_key(k0: u64, k1: u64) -> Self {
        IsnGenerator { k0, k1 }
    }

    /// Derive a key from the randomly keyed hasher of the standard library.
    #[cfg(feature = "std")]
    pub fn from_std_hash() -> Self {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let state = RandomState::new();
        let derive = |label: u64| {
            let mut hasher = state.build_hasher();
            hasher.write_u64(label);
            hasher.finish()
        };
        IsnGenerator::from_key(derive(0), derive(1))
    }

    /// The initial sequence number of a connection at time `millis`.
    pub fn get_isn(&self, connection: FourTuple, millis: u64) -> TcpSeqNumber {
        let mut sip = Sip::new(self.k0, self.k1);
        let mut len = 4;
        for address in [connection.local, connection.remote].iter() {
            for chunk in address.as_bytes().chunks(8) {
                sip.compress(word(chunk));
                len += chunk.len();
            }
        }
        let ports = u64::from(connection.local_port) | u64::from(connection.remote_port) << 16;
        sip.compress(ports | (len as u64) << 56);

        let clock = (millis / 4) & 0x7fff_ffff;
        TcpSeqNumber(sip.finish() as i32) + clock as usize
    }

    /// A pseudo random value for seeding a port search.
    pub fn port_hint(&self, counter: u64) -> u16 {
        let mut sip = Sip::new(self.k1, self.k0);
        sip.compress(counter);
        sip.compress(8 << 56);
        sip.finish() as u16
    }
}

/// Big endian word of up to eight bytes, zero padded.
fn word(chunk: &[u8]) -> u64 {
    let mut bytes = [0; 8];
    bytes[..chunk.len()].copy_from_slice(chunk);
    u64::from_be_bytes(bytes)
}

impl Sip {
    /// "somepseudorandomlygeneratedbytes"
    const INIT: [u64; 4] = [
        0x736f_6d65_7073_6575,
        0x646f_7261_6e64_6f6d,
        0x6c79_6765_6e65_7261,
        0x7465_6462_7974_6573,
    ];

    fn new(k0: u64, k1: u64) -> Self {
        let [a, b, c, d] = Sip::INIT;
        Sip([a ^ k0, b ^ k1, c ^ k0, d ^ k1])
    }

    fn round(&mut self) {
        let [v0, v1, v2, v3] = &mut self.0;
        *v0 = v0.wrapping_add(*v1);
        *v2 = v2.wrapping_add(*v3);
        *v1 = v1.rotate_left(13) ^ *v0;
        *v3 = v3.rotate_left(16) ^ *v2;
        *v0 = v0.rotate_left(32);

        *v2 = v2.wrapping_add(*v1);
        *v0 = v0.wrapping_add(*v3);
        *v1 = v1.rotate_left(17) ^ *v2;
        *v3 = v3.rotate_left(21) ^ *v0;
        *v2 = v2.rotate_left(32);
    }

    /// Two rounds over one message word. The length word is the caller's last.
    fn compress(&mut self, m: u64) {
        self.0[3] ^= m;
        self.round();
        self.round();
        self.0[0] ^= m;
    }

    fn finish(mut self) -> u64 {
        self.0[2] ^= 0xff;
        for _ in 0..4 {
            self.round();
        }
        self.0.iter().fold(0, |acc, v| acc ^ v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Appendix A of the SipHash paper, a 15 byte message.
    #[test]
    fn reference_vector() {
        let k0 = 0x0706_0504_0302_0100;
        let k1 = 0x0f0e_0d0c_0b0a_0908;
        let mut sip = Sip::new(k0, k1);
        sip.compress(0x0706_0504_0302_0100);
        sip.compress(0x0f0e_0d0c_0b0a_0908);
        assert_eq!(sip.finish(), 0xa129_ca61_49be_45e5);
    }

    #[test]
    fn isn_depends_on_tuple_and_time() {
        let isn = IsnGenerator::from_key(1, 2);
        let tuple = FourTuple {
            local: IpAddress::v4(10, 0, 0, 1),
            remote: IpAddress::v4(10, 0, 0, 2),
            local_port: 49152,
            remote_port: 80,
        };
        let other = FourTuple { remote_port: 81, ..tuple };

        assert_eq!(isn.get_isn(tuple, 0), isn.get_isn(tuple, 3));
        assert_eq!(isn.get_isn(tuple, 4), isn.get_isn(tuple, 0) + 1);
        assert_ne!(isn.get_isn(tuple, 0), isn.get_isn(other, 0));
        assert_ne!(isn.port_hint(0), isn.port_hint(1));
    }
}
