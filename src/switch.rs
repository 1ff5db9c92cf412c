use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use tracing::{debug, error, info};

use crate::port::{Frame, PeerReceiver, Port};
use crate::sync::map::SharedMap;
use crate::sync::queue::BoundedQueue;

/// Frames buffered per port awaiting transmission.
pub const EGRESS_QUEUE_CAPACITY: usize = 500;

const ETH_HEADER_LEN: usize = 14;

pub type Mac = [u8; 6];

/// Learning bridge: frames are forwarded to the port where the destination
/// MAC was last seen as a source, broadcast frames are flooded to all other
/// ports, unknown unicast is dropped.
pub struct Switch {
    name: String,

    ports: SharedMap<u64, Arc<dyn Port>>,
    port_active: SharedMap<u64, bool>,

    // MAC address -> port where it was last seen
    mac_table: SharedMap<Mac, u64>,
    // port -> egress queue drained by that port's writer worker
    egress: SharedMap<u64, Arc<BoundedQueue<Frame>>>,

    next_port_id: AtomicU64,

    // Handle to hand the spawned workers; always upgradable while alive.
    myself: Weak<Switch>,
}

impl Switch {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new_cyclic(|myself| Switch {
            name: name.to_string(),
            ports: SharedMap::new(),
            port_active: SharedMap::new(),
            mac_table: SharedMap::new(),
            egress: SharedMap::new(),
            next_port_id: AtomicU64::new(0),
            myself: myself.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Registers a port and spawns its reader and writer workers.
    pub fn add_port(&self, port: Arc<dyn Port>) -> u64 {
        let port_id = self.next_port_id.fetch_add(1, Ordering::Relaxed);

        self.ports.set(port_id, Arc::clone(&port));
        self.port_active.set(port_id, true);
        self.egress
            .set(port_id, Arc::new(BoundedQueue::new(EGRESS_QUEUE_CAPACITY)));

        let Some(switch) = self.myself.upgrade() else {
            error!("switch={} is gone, port_id={port_id} has no workers", self.name);
            return port_id;
        };
        let writer = Arc::clone(&switch);
        let reader_port = Arc::clone(&port);
        thread::spawn(move || switch.run_reader(reader_port, port_id));
        thread::spawn(move || writer.run_writer(port, port_id));

        info!("added port switch={} port_id={port_id}", self.name);
        port_id
    }

    /// Deactivates and detaches a port. Idempotent; its workers exit on
    /// their next iteration, blocked reads run until the next frame.
    pub fn remove_port(&self, port_id: u64) {
        self.port_active.set(port_id, false);
        self.egress.remove(&port_id);

        let Some(port) = self.ports.remove(&port_id) else {
            return;
        };
        if let Err(err) = port.close() {
            error!(
                "failed to close port switch={} port_id={port_id} error={err:#}",
                self.name
            );
        }
        info!("removed port switch={} port_id={port_id}", self.name);
    }

    /// Removes every port.
    pub fn close(&self) {
        self.ports.for_each(|port_id, _| {
            self.remove_port(*port_id);
            true
        });
    }

    fn is_active(&self, port_id: u64) -> bool {
        self.port_active.get(&port_id).unwrap_or(false)
    }

    fn run_reader(&self, port: Arc<dyn Port>, port_id: u64) {
        loop {
            if !self.is_active(port_id) {
                return;
            }
            match port.read() {
                Ok(frame) => self.transport(frame, port_id),
                Err(err) => {
                    error!(
                        "failed to read frame from port switch={} port_id={port_id} error={err:#}",
                        self.name
                    );
                    self.remove_port(port_id);
                    return;
                }
            }
        }
    }

    fn run_writer(&self, port: Arc<dyn Port>, port_id: u64) {
        let Some(queue) = self.egress.get(&port_id) else {
            return;
        };
        loop {
            if !self.is_active(port_id) {
                return;
            }
            let frame = queue.pop();
            if let Err(err) = port.write(&frame) {
                error!(
                    "failed to write frame to port switch={} port_id={port_id} error={err:#}",
                    self.name
                );
                self.remove_port(port_id);
                return;
            }
        }
    }

    /// Learns the source MAC, then forwards: flood broadcasts to all other
    /// ports, deliver known unicast, drop unknown unicast and self-loops.
    fn transport(&self, frame: Frame, source_port_id: u64) {
        let Some((destination, source)) = frame_addresses(&frame) else {
            debug!(
                "dropped runt frame switch={} port_id={source_port_id} len={}",
                self.name,
                frame.len()
            );
            return;
        };

        if !is_broadcast(&source) {
            self.mac_table.set(source, source_port_id);
        }

        if is_broadcast(&destination) {
            self.broadcast(frame, source_port_id);
        } else {
            self.unicast(frame, destination, source_port_id);
        }
    }

    fn broadcast(&self, frame: Frame, source_port_id: u64) {
        self.egress.for_each(|port_id, queue| {
            if *port_id != source_port_id {
                queue.push(frame.clone());
            }
            true
        });
    }

    fn unicast(&self, frame: Frame, destination: Mac, source_port_id: u64) {
        let Some(target_port_id) = self.mac_table.get(&destination) else {
            debug!(
                "dropped frame on switch={} due to unknown destination mac={}",
                self.name,
                format_mac(&destination)
            );
            return;
        };
        if target_port_id == source_port_id {
            return;
        }
        if let Some(queue) = self.egress.get(&target_port_id) {
            queue.push(frame);
        }
    }
}

impl PeerReceiver for Switch {
    fn add_port(&self, port: Arc<dyn Port>) -> u64 {
        Switch::add_port(self, port)
    }
}

fn frame_addresses(frame: &[u8]) -> Option<(Mac, Mac)> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let mut destination = [0u8; 6];
    destination.copy_from_slice(&frame[..6]);
    let mut source = [0u8; 6];
    source.copy_from_slice(&frame[6..12]);
    Some((destination, source))
}

pub fn is_broadcast(mac: &Mac) -> bool {
    mac.iter().all(|b| *b == 0xff)
}

pub fn format_mac(mac: &Mac) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
