use std::sync::Arc;

use anyhow::Result;

/// One raw Ethernet frame.
pub type Frame = Vec<u8>;

/// A switch endpoint: a TAP device or a handshaken UDP peer.
///
/// `read` blocks until a frame arrives. Implementations are shared between
/// one reader and one writer worker, so all operations take `&self`.
pub trait Port: Send + Sync {
    fn read(&self) -> Result<Frame>;
    fn write(&self, frame: &[u8]) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Narrow capability the listener uses to hand freshly handshaken peers to
/// the switch fabric, without depending on the fabric itself.
pub trait PeerReceiver: Send + Sync {
    fn add_port(&self, port: Arc<dyn Port>) -> u64;
}
