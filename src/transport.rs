//! The fabric transport contract and an in-process mock implementation.
//!
//! A real backend would bind this trait to a hardware fabric (libfabric,
//! RDMA verbs); the mock backend wires two endpoints together with tokio
//! channels and a shared region registry so the protocol engine and its
//! tests can run without hardware.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer closed the connection")]
    Disconnected,
    #[error("message exceeds inject/max size for this transport")]
    TooLarge,
    #[error("no region registered for handle {0}")]
    UnknownRegion(u64),
    #[error("access out of bounds for registered region {0}")]
    OutOfBounds(u64),
}

/// Opaque handle to a remote-accessible registered memory region, analogous
/// to an RDMA memory region's `(addr, rkey)` pair. Carried inside `IO_REQUEST`/
/// `IO_RESPONSE` two-stage negotiation out of band from the message itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle(pub u64);

/// Configuration for a fabric endpoint.
#[derive(Clone, Debug)]
pub struct FabricConfig {
    /// Largest payload the fabric will copy synchronously ("inject") rather
    /// than post as a tracked send.
    pub max_inject_size: usize,
    /// Largest single message the fabric will carry at all.
    pub max_message_size: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            max_inject_size: 4096,
            max_message_size: 256 * 1024 * 1024,
        }
    }
}

/// Contract a client connection and a server responder both drive: a
/// reliable, message-oriented channel plus RDMA-style put/get into a peer's
/// pre-registered memory.
#[async_trait::async_trait]
pub trait Fabric: Send + Sync {
    /// Post a message and wait for it to land with the peer.
    async fn sync_send(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Copy a small message synchronously; no separate completion wait.
    async fn sync_inject_send(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Block until the next message from the peer arrives.
    async fn sync_recv(&self) -> Result<Bytes, TransportError>;

    fn max_inject_size(&self) -> usize;
    fn max_message_size(&self) -> usize;

    /// Register `bytes` as addressable by the peer and return a handle.
    fn register_region(&self, bytes: Vec<u8>) -> RegionHandle;

    /// Drop a previously registered region; further access is an error.
    fn deregister_region(&self, handle: RegionHandle);

    /// RDMA-write `data` into the peer's region `handle` at `offset`.
    fn rdma_write(&self, handle: RegionHandle, offset: usize, data: &[u8]) -> Result<(), TransportError>;

    /// RDMA-read `len` bytes out of the peer's region `handle` at `offset`.
    fn rdma_read(&self, handle: RegionHandle, offset: usize, len: usize) -> Result<Bytes, TransportError>;
}

struct RegionRegistry {
    regions: DashMap<u64, Arc<SyncMutex<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl RegionRegistry {
    fn new() -> Self {
        Self {
            regions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, bytes: Vec<u8>) -> RegionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.regions.insert(id, Arc::new(SyncMutex::new(bytes)));
        RegionHandle(id)
    }

    fn deregister(&self, handle: RegionHandle) {
        self.regions.remove(&handle.0);
    }

    fn write(&self, handle: RegionHandle, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        let region = self
            .regions
            .get(&handle.0)
            .ok_or(TransportError::UnknownRegion(handle.0))?;
        let mut buf = region.lock();
        if offset + data.len() > buf.len() {
            return Err(TransportError::OutOfBounds(handle.0));
        }
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, handle: RegionHandle, offset: usize, len: usize) -> Result<Bytes, TransportError> {
        let region = self
            .regions
            .get(&handle.0)
            .ok_or(TransportError::UnknownRegion(handle.0))?;
        let buf = region.lock();
        if offset + len > buf.len() {
            return Err(TransportError::OutOfBounds(handle.0));
        }
        Ok(Bytes::copy_from_slice(&buf[offset..offset + len]))
    }
}

/// One side of an in-process mock fabric connection. The two endpoints
/// created by [`MockFabric::pair`] share a region registry (standing in
/// for a real fabric's remote-addressable memory) and are wired together
/// by a pair of `mpsc` channels.
pub struct MockFabric {
    config: FabricConfig,
    tx: mpsc::UnboundedSender<Bytes>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
    regions: Arc<RegionRegistry>,
}

impl MockFabric {
    /// Build a connected pair: `(client_side, server_side)`.
    pub fn pair(config: FabricConfig) -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        let regions = Arc::new(RegionRegistry::new());

        let a = Self {
            config: config.clone(),
            tx: tx_a,
            rx: AsyncMutex::new(rx_a),
            regions: regions.clone(),
        };
        let b = Self {
            config,
            tx: tx_b,
            rx: AsyncMutex::new(rx_b),
            regions,
        };
        (a, b)
    }
}

#[async_trait::async_trait]
impl Fabric for MockFabric {
    async fn sync_send(&self, bytes: Bytes) -> Result<(), TransportError> {
        if bytes.len() > self.config.max_message_size {
            return Err(TransportError::TooLarge);
        }
        self.tx.send(bytes).map_err(|_| TransportError::Disconnected)
    }

    async fn sync_inject_send(&self, bytes: Bytes) -> Result<(), TransportError> {
        if bytes.len() > self.config.max_inject_size {
            return Err(TransportError::TooLarge);
        }
        self.tx.send(bytes).map_err(|_| TransportError::Disconnected)
    }

    async fn sync_recv(&self) -> Result<Bytes, TransportError> {
        self.rx.lock().await.recv().await.ok_or(TransportError::Disconnected)
    }

    fn max_inject_size(&self) -> usize {
        self.config.max_inject_size
    }

    fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }

    fn register_region(&self, bytes: Vec<u8>) -> RegionHandle {
        self.regions.register(bytes)
    }

    fn deregister_region(&self, handle: RegionHandle) {
        self.regions.deregister(handle)
    }

    fn rdma_write(&self, handle: RegionHandle, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        self.regions.write(handle, offset, data)
    }

    fn rdma_read(&self, handle: RegionHandle, offset: usize, len: usize) -> Result<Bytes, TransportError> {
        self.regions.read(handle, offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_recv_round_trips() {
        let (client, server) = MockFabric::pair(FabricConfig::default());
        client.sync_send(Bytes::from_static(b"hello")).await.unwrap();
        let got = server.sync_recv().await.unwrap();
        assert_eq!(got.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn inject_send_over_limit_is_rejected() {
        let (client, _server) = MockFabric::pair(FabricConfig {
            max_inject_size: 4,
            max_message_size: 4096,
        });
        let err = client
            .sync_inject_send(Bytes::from_static(b"too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TooLarge));
    }

    #[tokio::test]
    async fn rdma_write_then_read_round_trips() {
        let (client, server) = MockFabric::pair(FabricConfig::default());
        let handle = server.register_region(vec![0u8; 16]);
        client.rdma_write(handle, 4, b"data").unwrap();
        let out = client.rdma_read(handle, 4, 4).unwrap();
        assert_eq!(out.as_ref(), b"data");
    }

    #[tokio::test]
    async fn rdma_access_after_deregister_fails() {
        let (client, server) = MockFabric::pair(FabricConfig::default());
        let handle = server.register_region(vec![0u8; 16]);
        server.deregister_region(handle);
        assert!(matches!(
            client.rdma_write(handle, 0, b"x"),
            Err(TransportError::UnknownRegion(_))
        ));
    }
}
