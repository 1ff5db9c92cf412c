use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use prost::Message;
use tracing::{debug, warn};

use crate::port::{Frame, Port};
use crate::sync::map::SharedMap;
use crate::wire::{self, FragmentedData, Packet, packet::Payload};

/// Partial reassembly buffers older than this are dropped, so a peer that
/// loses a fragment permanently does not leak its buffer forever.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Narrow capability a peer port needs from the listener: packet I/O for one
/// established session.
pub trait SessionIo: Send + Sync {
    fn read(&self, peer_id: &str) -> Result<Packet>;
    fn write(&self, peer_id: &str, packet: &Packet) -> Result<()>;
}

#[derive(Clone)]
struct PartialFrame {
    first_seen: Instant,
    fragments: Vec<FragmentedData>,
}

/// Port backed by one UDP peer session. Frames are carried as
/// `FRAGMENTED_DATA` packets, split so every datagram fits the network MTU.
pub struct PeerPort {
    session: Arc<dyn SessionIo>,
    peer_id: String,
    max_payload: usize,
    partial: SharedMap<u32, PartialFrame>,
    next_packet_id: AtomicU32,
}

/// Maximum payload bytes per fragment for the given network MTU.
///
/// Encodes a `FRAGMENTED_DATA` packet whose numeric fields all hold the
/// largest 31-bit value and whose payload is empty; whatever the MTU has
/// left after that worst-case header is the payload budget.
pub fn max_fragment_payload(network_mtu: u16) -> Result<usize> {
    let probe =
        Packet::fragmented_data(wire::MAX_FIELD, wire::MAX_FIELD, wire::MAX_FIELD, Vec::new());
    let overhead = probe.encoded_len();
    let budget = usize::from(network_mtu).saturating_sub(overhead);
    if budget == 0 {
        bail!("network mtu {network_mtu} cannot fit a {overhead} byte fragment header");
    }
    Ok(budget)
}

impl PeerPort {
    pub fn new(session: Arc<dyn SessionIo>, peer_id: String, network_mtu: u16) -> Result<Self> {
        let max_payload = max_fragment_payload(network_mtu)?;
        debug!("calculated max fragment payload peer={peer_id} size={max_payload}");
        Ok(PeerPort {
            session,
            peer_id,
            max_payload,
            partial: SharedMap::new(),
            next_packet_id: AtomicU32::new(0),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Splits a frame into `FRAGMENTED_DATA` packets sharing one packet id.
    /// A zero-length frame still travels as one fragment with empty payload.
    fn fragment(&self, frame: &[u8]) -> Vec<Packet> {
        // One writer worker per port, so the unsynchronized counter is safe.
        let packet_id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);

        let mut chunks: Vec<&[u8]> = frame.chunks(self.max_payload).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let fragment_max = chunks.len() as u32;

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                Packet::fragmented_data(packet_id, index as u32, fragment_max, chunk.to_vec())
            })
            .collect()
    }

    /// Returns the reassembled frame of the first packet id that has all of
    /// its fragments, deleting its buffer entry.
    fn take_complete(&self) -> Option<Frame> {
        let mut complete_id = None;
        self.partial.for_each(|packet_id, partial| {
            let Some(first) = partial.fragments.first() else {
                return true;
            };
            if partial.fragments.len() as u32 >= first.fragment_max {
                complete_id = Some(*packet_id);
                return false;
            }
            true
        });

        let mut partial = self.partial.remove(&complete_id?)?;
        partial.fragments.sort_by_key(|fragment| fragment.fragment);

        let mut frame = Frame::new();
        for fragment in &partial.fragments {
            frame.extend_from_slice(&fragment.payload);
        }
        Some(frame)
    }

    fn sweep_expired(&self) {
        self.partial.for_each(|packet_id, partial| {
            if partial.first_seen.elapsed() >= REASSEMBLY_TIMEOUT {
                self.partial.remove(packet_id);
                debug!(
                    "dropped stale partial frame peer={} packet_id={packet_id} fragments={}",
                    self.peer_id,
                    partial.fragments.len()
                );
            }
            true
        });
    }
}

impl Port for PeerPort {
    fn read(&self) -> Result<Frame> {
        loop {
            let packet = self.session.read(&self.peer_id)?;
            let Some(Payload::FragmentedData(fragment)) = packet.payload else {
                warn!(
                    "discarded non-data packet from session queue peer={}",
                    self.peer_id
                );
                continue;
            };

            let packet_id = fragment.id;
            let mut partial = self.partial.get(&packet_id).unwrap_or_else(|| PartialFrame {
                first_seen: Instant::now(),
                fragments: Vec::new(),
            });
            partial.fragments.push(fragment);
            self.partial.set(packet_id, partial);

            if let Some(frame) = self.take_complete() {
                return Ok(frame);
            }
            self.sweep_expired();
        }
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        for packet in self.fragment(frame) {
            self.session.write(&self.peer_id, &packet)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
