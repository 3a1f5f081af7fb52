//! Two engines talking over an in-memory link.
//!
//! A client connects to a listening server, streams a number of bytes and closes. Every segment
//! is copied into the buffer pool of the receiving side, optionally dropping every n-th one to
//! exercise retransmission. Prints the statistics of both sides at the end.
use structopt::StructOpt;

use ethox_tcp::layer::buffer::{transmit_complete, BufferKey, Pool};
use ethox_tcp::layer::ip::{Interface, InterfaceId, Ip, Route, SendRequest};
use ethox_tcp::layer::tcp::{
    Config as TcpConfig, Endpoint, IsnGenerator, Outcome, SocketKey, SocketOptions, State,
    Storage, Wait};
use ethox_tcp::managed::Slice;
use ethox_tcp::storage::{BufferEntry, BufferPool};
use ethox_tcp::wire::{IpAddress, IpCidr};

const SERVER_PORT: u16 = 80;

struct Side {
    pool: BufferPool<'static>,
    cidr: IpCidr,
    outbox: Vec<(SendRequest, Vec<u8>)>,
}

impl Side {
    fn new(address: IpAddress, buffers: usize) -> Self {
        Side {
            pool: BufferPool::new(
                Slice::Many(vec![0; buffers * 2048]),
                Slice::Many(vec![BufferEntry::default(); buffers]),
                64),
            cidr: IpCidr::new(address, 24),
            outbox: Vec::new(),
        }
    }

    /// Copy a segment of the other side into our pool.
    fn inject(&mut self, request: &SendRequest, bytes: &[u8]) -> Option<BufferKey> {
        let buffer = self.pool.allocate()?;
        if self.pool.append(buffer, bytes).is_err() {
            self.pool.release(buffer);
            return None;
        }
        let descriptor = self.pool.descriptor_mut(buffer);
        descriptor.source = request.source;
        descriptor.destination = request.destination;
        descriptor.interface = Some(InterfaceId(0));
        Some(buffer)
    }
}

impl Ip for Side {
    type Pool = BufferPool<'static>;

    fn pool(&mut self) -> &mut Self::Pool {
        &mut self.pool
    }

    fn interface(&self, id: InterfaceId) -> Option<Interface> {
        match id {
            InterfaceId(0) => Some(Interface {
                cidr: self.cidr,
                mtu: 1500,
                rx_checksum_offload: false,
                tx_checksum_offload: false,
            }),
            _ => None,
        }
    }

    fn route(&self, destination: IpAddress) -> Option<Route> {
        // Both hosts share one link.
        match destination.version() {
            Some(version) if Some(version) == self.cidr.address().version() => {
                Some(Route { interface: InterfaceId(0), next_hop: destination })
            },
            _ => None,
        }
    }

    fn send(&mut self, buffer: BufferKey, request: SendRequest) {
        self.outbox.push((request, self.pool.payload(buffer).to_vec()));
        transmit_complete(&mut self.pool, buffer);
    }
}

struct Host {
    tcp: Endpoint<'static>,
    ip: Side,
}

impl Host {
    fn new(address: IpAddress, buffers: usize) -> Self {
        Host {
            tcp: Endpoint::new(
                Storage::with_capacity(2),
                TcpConfig::default(),
                IsnGenerator::from_std_hash()),
            ip: Side::new(address, buffers),
        }
    }
}

/// Carry everything one host sent over to the other.
fn carry(from: &mut Host, to: &mut Host, drop_every: usize, counter: &mut usize) {
    for (request, bytes) in from.ip.outbox.drain(..) {
        *counter += 1;
        if drop_every != 0 && *counter % drop_every == 0 {
            continue;
        }
        if let Some(buffer) = to.ip.inject(&request, &bytes) {
            to.tcp.packet_receive(&mut to.ip, buffer);
        }
    }
    to.tcp.queue_process(&mut to.ip);
}

fn state(host: &Host, socket: SocketKey) -> State {
    host.tcp.socket_state(socket).unwrap_or(State::Closed)
}

fn main() {
    let Config { bytes, chunk, drop_every, buffers, max_ticks } = Config::from_args();
    let client_address = IpAddress::v4(10, 0, 0, 1);
    let server_address = IpAddress::v4(10, 0, 0, 2);

    let mut client = Host::new(client_address, buffers);
    let mut server = Host::new(server_address, buffers);

    let listening = server.tcp.socket_create(SocketOptions::default()).unwrap();
    server.tcp.server_socket_listen(SERVER_PORT, listening, 4, None).unwrap();
    server.tcp.server_socket_accept(&mut server.ip, listening, Wait::NoWait).unwrap();

    let connecting = client.tcp.socket_create(SocketOptions::default()).unwrap();
    client.tcp.client_socket_bind(&mut client.ip, connecting, None, Wait::NoWait).unwrap();
    client.tcp
        .client_socket_connect(&mut client.ip, connecting, server_address, SERVER_PORT, Wait::NoWait)
        .unwrap();

    let payload: Vec<u8> = (0..bytes).map(|i| i as u8).collect();
    let mut offset = 0;
    let mut pending: Option<BufferKey> = None;
    let mut received = Vec::with_capacity(bytes);
    let mut counter = 0;
    let mut closing = false;

    for tick in 0..max_ticks {
        carry(&mut client, &mut server, drop_every, &mut counter);
        carry(&mut server, &mut client, drop_every, &mut counter);

        if state(&client, connecting) == State::Established {
            loop {
                let buffer = match pending.take() {
                    Some(buffer) => buffer,
                    None if offset < payload.len() => {
                        let end = (offset + chunk).min(payload.len());
                        let buffer = match client.ip.pool.allocate() {
                            Some(buffer) => buffer,
                            None => break,
                        };
                        client.ip.pool.append(buffer, &payload[offset..end]).unwrap();
                        offset = end;
                        buffer
                    },
                    None => break,
                };
                match client.tcp.socket_send(&mut client.ip, connecting, buffer, Wait::NoWait) {
                    Ok(Outcome::Ready(())) => continue,
                    _ => {
                        pending = Some(buffer);
                        break;
                    },
                }
            }

            if offset == payload.len() && pending.is_none() && !closing {
                closing = true;
                let _ = client.tcp.socket_disconnect(&mut client.ip, connecting, Wait::NoWait);
            }
        }

        while let Ok(Outcome::Ready(buffer)) = server.tcp.socket_receive(&mut server.ip, listening, Wait::NoWait) {
            received.extend_from_slice(server.ip.pool.payload(buffer));
            server.ip.pool.release(buffer);
        }

        if state(&server, listening) == State::CloseWait {
            let _ = server.tcp.socket_disconnect(&mut server.ip, listening, Wait::NoWait);
        }

        if closing && state(&server, listening) == State::Closed {
            println!("transfer complete after {} ticks", tick);
            break;
        }

        client.tcp.fast_periodic_processing(&mut client.ip);
        server.tcp.fast_periodic_processing(&mut server.ip);
    }

    println!("received {} of {} bytes, intact: {}", received.len(), bytes, received == payload);
    println!("client: {:?}", client.tcp.info());
    println!("server: {:?}", server.tcp.info());
}

#[derive(StructOpt)]
struct Config {
    /// Bytes to transfer.
    #[structopt(long = "bytes", default_value = "100000")]
    bytes: usize,
    /// Size of each buffer handed to the engine.
    #[structopt(long = "chunk", default_value = "1400")]
    chunk: usize,
    /// Drop every n-th segment on the link, zero drops nothing.
    #[structopt(long = "drop-every", default_value = "0")]
    drop_every: usize,
    /// Packet buffers of each side.
    #[structopt(long = "buffers", default_value = "128")]
    buffers: usize,
    /// Give up after this many timer ticks.
    #[structopt(long = "max-ticks", default_value = "100000")]
    max_ticks: usize,
}
