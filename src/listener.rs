use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result, anyhow, bail};
use prost::Message;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::peer::{PeerPort, SessionIo};
use crate::port::PeerReceiver;
use crate::sync::map::SharedMap;
use crate::sync::queue::BoundedQueue;
use crate::wire::{Packet, PacketType, packet::Payload};

/// Incoming packets buffered per peer before the peer port drains them.
pub const INCOMING_QUEUE_CAPACITY: usize = 512;

/// One UDP socket handling session setup with remote peers and demuxing
/// datagrams by peer identity. Handshaken peers are handed to the switch
/// fabric as ports through the `PeerReceiver` capability.
pub struct Listener {
    mtu: u16,
    network_mtu: u16,
    alive: AtomicBool,
    socket: UdpSocket,

    // udp address -> peer id
    address_to_peer: SharedMap<SocketAddr, String>,
    // peer id -> udp address
    peer_to_address: SharedMap<String, SocketAddr>,
    // peer id -> incoming packet queue
    incoming: SharedMap<String, Arc<BoundedQueue<Packet>>>,

    receiver: Arc<dyn PeerReceiver>,

    // Handed to peer ports as their session I/O capability; always
    // upgradable while the listener is alive.
    myself: Weak<Listener>,
}

impl Listener {
    pub fn bind(
        hostname: &str,
        port: u16,
        mtu: u16,
        network_mtu: u16,
        receiver: Arc<dyn PeerReceiver>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind((hostname, port))
            .with_context(|| format!("failed to bind UDP listener on {hostname}:{port}"))?;
        Ok(Arc::new_cyclic(|myself| Listener {
            mtu,
            network_mtu,
            alive: AtomicBool::new(true),
            socket,
            address_to_peer: SharedMap::new(),
            peer_to_address: SharedMap::new(),
            incoming: SharedMap::new(),
            receiver,
            myself: myself.clone(),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("failed to resolve local listener address")
    }

    /// Sends one HELO datagram to the remote, inviting it to offer a
    /// session. Repeated calls simply send more HELOs.
    pub fn connect(&self, hostname: &str, port: u16) -> Result<()> {
        let addr = resolve(hostname, port)?;
        self.send(&Packet::helo(), addr)
    }

    /// Blocking receive loop. Returns on a fatal socket error; a single bad
    /// datagram is logged and skipped.
    pub fn listen(&self) -> Result<()> {
        let mut buf = vec![0u8; usize::from(self.network_mtu)];
        while self.alive.load(Ordering::Relaxed) {
            let (len, addr) = self.socket.recv_from(&mut buf).context("UDP receive failed")?;

            let packet = match Packet::decode(&buf[..len]) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!("could not decode packet addr={addr} error={err}");
                    continue;
                }
            };

            match packet.packet_type() {
                PacketType::AckSession => {
                    if let Err(err) = self.register_session(&packet, addr) {
                        error!("failed to register session addr={addr} error={err:#}");
                    }
                }
                PacketType::InitiateSession => {
                    if let Err(err) = self.accept_session(&packet, addr) {
                        error!("failed to accept session addr={addr} error={err:#}");
                    }
                }
                packet_type => match self.address_to_peer.get(&addr) {
                    Some(peer_id) if packet_type != PacketType::Helo => {
                        // Blocks when the peer's queue is full, throttling
                        // the whole socket rather than dropping.
                        if let Some(queue) = self.incoming.get(&peer_id) {
                            queue.push(packet);
                        }
                    }
                    _ => {
                        if let Err(err) = self.offer_session(addr) {
                            error!("could not offer session addr={addr} error={err:#}");
                        }
                    }
                },
            }
        }

        Ok(())
    }

    /// Stops the receive loop at its next iteration. Idempotent.
    pub fn close(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }

    /// Offers session parameters to the remote. Both sides must be
    /// configured with identical MTUs for the handshake to proceed.
    fn offer_session(&self, addr: SocketAddr) -> Result<()> {
        let offer = Packet::initiate_session(u32::from(self.mtu), u32::from(self.network_mtu));
        self.send(&offer, addr)
    }

    /// Handles an incoming `INITIATE_SESSION`: verifies the MTUs, replies
    /// with a freshly minted peer id, and offers our own parameters back if
    /// this address has not completed a session towards us yet.
    fn accept_session(&self, packet: &Packet, addr: SocketAddr) -> Result<()> {
        let Some(Payload::InitiateSession(offer)) = &packet.payload else {
            bail!("INITIATE_SESSION packet carries no session parameters");
        };

        if offer.mtu != u32::from(self.mtu) {
            bail!(
                "session mtu {} must be the same as configured mtu {}",
                offer.mtu,
                self.mtu
            );
        }
        if offer.network_mtu != u32::from(self.network_mtu) {
            bail!(
                "session network mtu {} must be the same as configured network mtu {}",
                offer.network_mtu,
                self.network_mtu
            );
        }

        let peer_id = Uuid::new_v4().to_string();
        self.send(&Packet::ack_session(peer_id), addr)?;

        if self.address_to_peer.get(&addr).is_none() {
            return self.offer_session(addr);
        }
        Ok(())
    }

    /// Handles an incoming `ACK_SESSION`: records the peer in both address
    /// maps, creates its incoming queue and registers a peer port with the
    /// switch fabric.
    fn register_session(&self, packet: &Packet, addr: SocketAddr) -> Result<()> {
        let Some(Payload::AckSession(ack)) = &packet.payload else {
            bail!("packet was ACK_SESSION but payload type is invalid");
        };
        let peer_id = ack.id.clone();

        self.address_to_peer.set(addr, peer_id.clone());
        self.peer_to_address.set(peer_id.clone(), addr);
        self.incoming.set(
            peer_id.clone(),
            Arc::new(BoundedQueue::new(INCOMING_QUEUE_CAPACITY)),
        );

        let session = self
            .myself
            .upgrade()
            .ok_or_else(|| anyhow!("listener is shutting down"))?;
        let peer = PeerPort::new(session, peer_id.clone(), self.network_mtu)?;
        let port_id = self.receiver.add_port(Arc::new(peer));
        info!("established session peer={peer_id} addr={addr} port_id={port_id}");
        Ok(())
    }

    fn send(&self, packet: &Packet, addr: SocketAddr) -> Result<()> {
        let encoded = packet.encode_to_vec();
        self.socket
            .send_to(&encoded, addr)
            .with_context(|| format!("UDP send to {addr} failed"))?;
        Ok(())
    }
}

impl SessionIo for Listener {
    fn read(&self, peer_id: &str) -> Result<Packet> {
        let queue = self
            .incoming
            .get(peer_id)
            .ok_or_else(|| anyhow!("session not established"))?;
        Ok(queue.pop())
    }

    fn write(&self, peer_id: &str, packet: &Packet) -> Result<()> {
        let addr = self
            .peer_to_address
            .get(peer_id)
            .ok_or_else(|| anyhow!("peer not found"))?;
        self.send(packet, addr)
    }
}

fn resolve(hostname: &str, port: u16) -> Result<SocketAddr> {
    (hostname, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {hostname}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no addresses found for {hostname}:{port}"))
}
