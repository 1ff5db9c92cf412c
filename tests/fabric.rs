// End-to-end tests: two switch instances talk over loopback UDP, with
// in-memory queue ports standing in for TAP devices (opening a real TAP
// needs CAP_NET_ADMIN).

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use tapestry::listener::Listener;
use tapestry::port::{Frame, Port};
use tapestry::switch::Switch;
use tapestry::sync::queue::BoundedQueue;

const MAC_A: [u8; 6] = [0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x01];
const MAC_B: [u8; 6] = [0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x02];
const BROADCAST: [u8; 6] = [0xff; 6];

struct QueuePort {
    ingress: BoundedQueue<Frame>,
    egress: BoundedQueue<Frame>,
}

impl QueuePort {
    fn new() -> Arc<Self> {
        Arc::new(QueuePort {
            ingress: BoundedQueue::new(64),
            egress: BoundedQueue::new(64),
        })
    }

    fn inject(&self, frame: Frame) {
        self.ingress.push(frame);
    }

    fn delivered(&self, timeout: Duration) -> Option<Frame> {
        self.egress.pop_timeout(timeout)
    }
}

impl Port for QueuePort {
    fn read(&self) -> Result<Frame> {
        Ok(self.ingress.pop())
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        self.egress.push(frame.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct Node {
    switch: Arc<Switch>,
    listener: Arc<Listener>,
    port: u16,
}

fn start_node(name: &str, mtu: u16, network_mtu: u16) -> Node {
    let switch = Switch::new(name);
    let listener = Listener::bind("127.0.0.1", 0, mtu, network_mtu, switch.clone()).unwrap();
    let port = listener.local_addr().unwrap().port();

    let loop_listener = Arc::clone(&listener);
    thread::spawn(move || {
        let _ = loop_listener.listen();
    });

    Node {
        switch,
        listener,
        port,
    }
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn frame(destination: [u8; 6], source: [u8; 6], payload: &[u8]) -> Frame {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(&destination);
    frame.extend_from_slice(&source);
    frame.extend_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(payload);
    frame
}

#[test]
fn symmetric_handshake_registers_peer_ports_on_both_sides() {
    let a = start_node("a", 1500, 1400);
    let b = start_node("b", 1500, 1400);

    a.listener.connect("127.0.0.1", b.port).unwrap();

    wait_until("peer ports on both sides", || {
        a.switch.port_count() == 1 && b.switch.port_count() == 1
    });
}

#[test]
fn mismatched_mtu_never_registers_a_peer() {
    let a = start_node("a", 1500, 1400);
    let b = start_node("b", 9000, 1400);

    a.listener.connect("127.0.0.1", b.port).unwrap();

    thread::sleep(Duration::from_millis(500));
    assert_eq!(a.switch.port_count(), 0);
    assert_eq!(b.switch.port_count(), 0);
}

#[test]
fn bridges_frames_between_switches() {
    let a = start_node("bridge-a", 1500, 1400);
    let b = start_node("bridge-b", 1500, 1400);

    let tap_a = QueuePort::new();
    let tap_b = QueuePort::new();
    a.switch.add_port(Arc::clone(&tap_a) as Arc<dyn Port>);
    b.switch.add_port(Arc::clone(&tap_b) as Arc<dyn Port>);

    a.listener.connect("127.0.0.1", b.port).unwrap();
    wait_until("peer ports on both sides", || {
        a.switch.port_count() == 2 && b.switch.port_count() == 2
    });

    // A broadcast from behind B floods across the link and teaches A's
    // fabric where MAC_B lives.
    let hello = frame(BROADCAST, MAC_B, b"hello from b");
    tap_b.inject(hello.clone());
    let flooded = tap_a
        .delivered(Duration::from_secs(5))
        .expect("broadcast never crossed the link");
    assert_eq!(flooded, hello);

    // A 4000 byte unicast the other way must fragment (network MTU 1400)
    // and arrive byte-identical.
    let payload: Vec<u8> = (0..3986u32).map(|i| (i % 239) as u8).collect();
    let big = frame(MAC_B, MAC_A, &payload);
    assert_eq!(big.len(), 4000);
    tap_a.inject(big.clone());

    let received = tap_b
        .delivered(Duration::from_secs(5))
        .expect("unicast frame never arrived");
    assert_eq!(received, big);
}

#[test]
fn broadcast_is_not_reflected_to_the_originating_switch_port() {
    let a = start_node("reflect-a", 1500, 1400);
    let b = start_node("reflect-b", 1500, 1400);

    let tap_a = QueuePort::new();
    let tap_b = QueuePort::new();
    a.switch.add_port(Arc::clone(&tap_a) as Arc<dyn Port>);
    b.switch.add_port(Arc::clone(&tap_b) as Arc<dyn Port>);

    a.listener.connect("127.0.0.1", b.port).unwrap();
    wait_until("peer ports on both sides", || {
        a.switch.port_count() == 2 && b.switch.port_count() == 2
    });

    let shout = frame(BROADCAST, MAC_A, b"one copy each");
    tap_a.inject(shout.clone());

    assert_eq!(tap_b.delivered(Duration::from_secs(5)), Some(shout));
    assert_eq!(tap_a.delivered(Duration::from_millis(300)), None);
}
