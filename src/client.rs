//! The client-side connection: a state machine driving typed messages over
//! a [`Fabric`] endpoint, plus the user-facing put/get/erase/pool
//! operations built on top of it.
//!
//! Every public operation here follows the same shape: obtain a buffer,
//! construct the request, send it, await the matching response, validate
//! its type, interpret it, and release the buffer on every exit path —
//! whether that path returns success, a status error, or a protocol fault.

use crate::buffer::{BufferManager, BUFFER_LEN};
use crate::error::{ProtocolError, StatusError};
use crate::protocol::{
    AttributeType, Header, IoOp, MessageCloseSession, MessageHandshake, MessageHandshakeReply,
    MessageInfoRequest, MessageInfoResponse, MessageIoRequest, MessageIoResponse, MessagePoolRequest,
    MessagePoolResponse, MessageType, PoolOp, MSG_RESVD_DIRECT, MSG_RESVD_SCBE, PUT_FLAGS_REPLACE,
};
use crate::transport::Fabric;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const PROTOCOL_VERSION: u32 = 1;

/// Per-connection knobs. Everything here mirrors a field the original
/// connection object carries, not a file-based configuration surface.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub auth_id: u64,
    pub buffer_count: usize,
    pub buffer_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auth_id: 0,
            buffer_count: 4,
            buffer_len: BUFFER_LEN,
        }
    }
}

/// Option flags read once at connection construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionOptions {
    pub short_circuit_backend: bool,
}

impl ConnectionOptions {
    pub fn from_env() -> Self {
        Self {
            short_circuit_backend: std::env::var("SHORT_CIRCUIT_BACKEND").as_deref() == Ok("1"),
        }
    }
}

/// Fatal protocol violation or a per-operation status failure. Kept as two
/// distinct variants rather than collapsed into one: a caller must be able
/// to tell "the connection is now unusable" apart from "this one key
/// wasn't found".
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Status(#[from] StatusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Initialize,
    HandshakeSend,
    HandshakeGetResponse,
    Ready,
    Shutdown,
    Stopped,
}

struct ConnectionInner {
    state: ConnState,
    max_message_size: u64,
    max_inject_size: u64,
}

/// A client-side connection to one server responder over one [`Fabric`]
/// endpoint. Only one request may be outstanding at a time; every public
/// operation takes the connection's exclusive lock for its whole
/// round-trip.
pub struct Connection {
    fabric: Arc<dyn Fabric>,
    buffers: BufferManager,
    request_id: AtomicU64,
    auth_id: u64,
    options: ConnectionOptions,
    inner: Mutex<ConnectionInner>,
    known_pools: Mutex<HashMap<u64, String>>,
}

impl Connection {
    pub fn new(fabric: Arc<dyn Fabric>, config: ConnectionConfig) -> Self {
        let buffers = BufferManager::new(fabric.clone(), config.buffer_count, config.buffer_len);
        Self {
            fabric,
            buffers,
            request_id: AtomicU64::new(1),
            auth_id: config.auth_id,
            options: ConnectionOptions::from_env(),
            inner: Mutex::new(ConnectionInner {
                state: ConnState::Initialize,
                max_message_size: 0,
                max_inject_size: 0,
            }),
            known_pools: Mutex::new(HashMap::new()),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drive the state machine one step. Returns `1` while the handshake is
    /// still progressing, `0` once `READY`, `SHUTDOWN`, or `STOPPED`.
    pub async fn tick(&self) -> Result<u32, ProtocolError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ConnState::Initialize => {
                let msg = MessageHandshake::new(self.next_request_id(), self.auth_id, PROTOCOL_VERSION, 0);
                tracing::trace!("sending handshake");
                self.fabric
                    .sync_inject_send(msg.encode())
                    .await
                    .map_err(|e| ProtocolError(format!("handshake send failed: {e}")))?;
                inner.state = ConnState::HandshakeSend;
                Ok(1)
            }
            ConnState::HandshakeSend => {
                // The inject send above already completed synchronously; this
                // step exists so the state machine names the "posted and
                // completed" transition explicitly rather than skipping it.
                inner.state = ConnState::HandshakeGetResponse;
                Ok(1)
            }
            ConnState::HandshakeGetResponse => {
                let bytes = self
                    .fabric
                    .sync_recv()
                    .await
                    .map_err(|e| ProtocolError(format!("handshake recv failed: {e}")))?;
                let header =
                    Header::decode(&mut bytes.clone()).ok_or_else(|| ProtocolError("truncated handshake reply header".into()))?;
                match MessageType::from_u8(header.type_id) {
                    Some(MessageType::HandshakeReply) => {
                        let reply = MessageHandshakeReply::decode(bytes)
                            .ok_or_else(|| ProtocolError("truncated HANDSHAKE_REPLY".into()))?;
                        inner.max_message_size = reply.max_message_size;
                        inner.max_inject_size = reply.max_inject_size;
                        inner.state = ConnState::Ready;
                        tracing::info!(max_message_size = reply.max_message_size, "connection ready");
                        Ok(1)
                    }
                    _ => Err(ProtocolError::unexpected_type("HANDSHAKE_REPLY", header.type_id)),
                }
            }
            ConnState::Ready | ConnState::Shutdown | ConnState::Stopped => Ok(0),
        }
    }

    /// Drive `tick` until the connection reaches `READY`.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        loop {
            if self.tick().await? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Transition `READY` → `SHUTDOWN` → `STOPPED`, notifying the peer.
    /// Unlike the handshake, this transition is not driven by `tick`: it
    /// completes as one explicit call.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().await;
        if inner.state != ConnState::Ready {
            return Err(ProtocolError("close issued from a non-READY state".into()));
        }
        inner.state = ConnState::Shutdown;
        let msg = MessageCloseSession::new(self.next_request_id(), self.auth_id);
        self.fabric
            .sync_send(msg.encode())
            .await
            .map_err(|e| ProtocolError(format!("close_session send failed: {e}")))?;
        inner.state = ConnState::Stopped;
        tracing::info!("connection closed");
        Ok(())
    }

    async fn ensure_ready(&self) -> Result<(), ProtocolError> {
        if self.inner.lock().await.state != ConnState::Ready {
            return Err(ProtocolError("operation issued before connection is READY".into()));
        }
        Ok(())
    }

    /// Fill a buffer with `encoded`, send it (inject or posted, by size),
    /// await the response, and release the buffer on every exit path.
    async fn send_and_recv(&self, encoded: Bytes) -> Result<Bytes, ProtocolError> {
        self.ensure_ready().await?;

        let mut buffer = self.buffers.allocate().await;
        let outcome = async {
            buffer
                .fill(&encoded)
                .map_err(|_| ProtocolError("request exceeds buffer capacity".into()))?;
            let payload = Bytes::copy_from_slice(buffer.as_slice());
            if payload.len() <= self.fabric.max_inject_size() {
                self.fabric.sync_inject_send(payload).await
            } else {
                self.fabric.sync_send(payload).await
            }
            .map_err(|e| ProtocolError(format!("send failed: {e}")))?;
            self.fabric
                .sync_recv()
                .await
                .map_err(|e| ProtocolError(format!("recv failed: {e}")))
        }
        .await;
        self.buffers.free_buffer(buffer).await;
        outcome
    }

    fn resvd_bits(&self) -> u32 {
        if self.options.short_circuit_backend {
            MSG_RESVD_SCBE
        } else {
            0
        }
    }

    fn expect_type(bytes: &Bytes, expected: MessageType) -> Result<(), ProtocolError> {
        let header = Header::decode(&mut bytes.clone()).ok_or_else(|| ProtocolError("truncated response header".into()))?;
        if header.type_id != expected as u8 {
            return Err(ProtocolError::unexpected_type(expected.name(), header.type_id));
        }
        Ok(())
    }

    // ---- pool operations ----

    pub async fn create_pool(&self, name: &str, size: u64, flags: u32, expected_object_count: u64) -> Result<u64, ClientError> {
        let req = MessagePoolRequest::new(self.next_request_id(), self.auth_id, PoolOp::Create, size, flags, expected_object_count, name);
        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::PoolResponse)?;
        let resp = MessagePoolResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated POOL_RESPONSE".into()))?;
        // Status is read from the response, never from the just-sent request.
        StatusError::from_wire(resp.header.status)?;
        self.known_pools.lock().await.insert(resp.pool_id, name.to_string());
        Ok(resp.pool_id)
    }

    pub async fn open_pool(&self, name: &str, flags: u32) -> Result<u64, ClientError> {
        let req = MessagePoolRequest::new(self.next_request_id(), self.auth_id, PoolOp::Open, 0, flags, 0, name);
        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::PoolResponse)?;
        let resp = MessagePoolResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated POOL_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        self.known_pools.lock().await.insert(resp.pool_id, name.to_string());
        Ok(resp.pool_id)
    }

    pub async fn close_pool(&self, pool_id: u64) -> Result<(), ClientError> {
        let name = self
            .known_pools
            .lock()
            .await
            .get(&pool_id)
            .cloned()
            .ok_or(StatusError::Inval)?;
        let req = MessagePoolRequest::new(self.next_request_id(), self.auth_id, PoolOp::Close, 0, 0, 0, &name);
        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::PoolResponse)?;
        let resp = MessagePoolResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated POOL_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        Ok(())
    }

    pub async fn delete_pool(&self, name: &str) -> Result<(), ClientError> {
        let req = MessagePoolRequest::new(self.next_request_id(), self.auth_id, PoolOp::Delete, 0, 0, 0, name);
        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::PoolResponse)?;
        let resp = MessagePoolResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated POOL_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        Ok(())
    }

    pub async fn configure_pool(&self, pool_id: u64, json: &str) -> Result<(), ClientError> {
        let mut req = MessageIoRequest::new(self.next_request_id(), self.auth_id, pool_id, IoOp::Configure, b"", json.as_bytes(), 0, 0);
        req.resvd |= self.resvd_bits();
        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::IoResponse)?;
        let resp = MessageIoResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated IO_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        Ok(())
    }

    // ---- record operations ----

    /// Reject inline payloads that would not fit a single request buffer,
    /// without issuing any wire activity.
    fn check_inline_size(&self, key: &[u8], value: &[u8]) -> Result<(), StatusError> {
        let inline_len = crate::protocol::HEADER_LEN + 1 + 8 + 4 + 4 + 4 + key.len() + 4 + value.len() + 8 + 8;
        if inline_len > self.buffers.buffer_len() {
            return Err(StatusError::TooLarge);
        }
        Ok(())
    }

    async fn check_against_max_message_size(&self, value_len: u64) -> Result<(), StatusError> {
        let max = self.inner.lock().await.max_message_size;
        if max != 0 && value_len > max {
            return Err(StatusError::TooLarge);
        }
        Ok(())
    }

    pub async fn put(&self, pool_id: u64, key: &[u8], value: &[u8], replace: bool) -> Result<(), ClientError> {
        self.check_against_max_message_size(value.len() as u64).await?;
        self.check_inline_size(key, value)?;

        let flags = if replace { PUT_FLAGS_REPLACE } else { 0 };
        let mut req = MessageIoRequest::new(self.next_request_id(), self.auth_id, pool_id, IoOp::Put, key, value, 0, flags);
        req.resvd |= self.resvd_bits();

        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::IoResponse)?;
        let resp = MessageIoResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated IO_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        Ok(())
    }

    /// `put` for values that may exceed a single buffer: inlines when it
    /// still fits, otherwise negotiates a two-stage transfer via a
    /// registered region the server reads directly.
    pub async fn put_direct(&self, pool_id: u64, key: &[u8], value: &[u8], replace: bool) -> Result<(), ClientError> {
        self.check_against_max_message_size(value.len() as u64).await?;
        if self.check_inline_size(key, value).is_ok() {
            return self.put(pool_id, key, value, replace).await;
        }

        let handle = self.buffers.register_memory(value.to_vec());
        let flags = if replace { PUT_FLAGS_REPLACE } else { 0 };
        let mut req = MessageIoRequest::new(self.next_request_id(), self.auth_id, pool_id, IoOp::PutAdvance, key, b"", value.len() as u64, flags);
        req.resvd |= self.resvd_bits() | MSG_RESVD_DIRECT;
        req.region_handle = handle.0;

        let result = self.send_and_recv(req.encode()).await;
        self.buffers.deregister_memory(handle);
        let resp_bytes = result?;

        Self::expect_type(&resp_bytes, MessageType::IoResponse)?;
        let resp = MessageIoResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated IO_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        Ok(())
    }

    /// Fetch a value without pre-registering a destination region. If the
    /// server reports the value didn't fit inline, registers a scratch
    /// buffer sized to the reported length on demand and retries as a
    /// direct transfer, exactly as [`Self::get_direct`] would.
    pub async fn get(&self, pool_id: u64, key: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut req = MessageIoRequest::new(self.next_request_id(), self.auth_id, pool_id, IoOp::Get, key, b"", 0, 0);
        req.resvd |= self.resvd_bits();

        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::IoResponse)?;
        let resp = MessageIoResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated IO_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;

        if resp.is_two_stage() {
            return self.get_direct(pool_id, key, resp.value_len as usize).await;
        }
        Ok(resp.data.to_vec())
    }

    /// `get` into caller-registered memory of `capacity` bytes. If the
    /// server negotiates a two-stage transfer, the value is fetched from
    /// the destination region via RDMA rather than read out of the
    /// response message.
    pub async fn get_direct(&self, pool_id: u64, key: &[u8], capacity: usize) -> Result<Vec<u8>, ClientError> {
        if capacity == 0 {
            return Err(StatusError::BadParam.into());
        }
        self.check_against_max_message_size(capacity as u64).await?;

        let handle = self.buffers.register_memory(vec![0u8; capacity]);
        let mut req = MessageIoRequest::new(self.next_request_id(), self.auth_id, pool_id, IoOp::Get, key, b"", capacity as u64, 0);
        req.resvd |= self.resvd_bits() | MSG_RESVD_DIRECT;
        req.region_handle = handle.0;

        let result = self.send_and_recv(req.encode()).await;
        let value = (|| -> Result<Vec<u8>, ClientError> {
            let resp_bytes = result?;
            Self::expect_type(&resp_bytes, MessageType::IoResponse)?;
            let resp = MessageIoResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated IO_RESPONSE".into()))?;
            StatusError::from_wire(resp.header.status)?;
            if resp.is_two_stage() {
                let bytes = self
                    .fabric
                    .rdma_read(handle, 0, resp.value_len as usize)
                    .map_err(|e| ProtocolError(format!("two-stage receive failed: {e}")))?;
                Ok(bytes.to_vec())
            } else {
                Ok(resp.data.to_vec())
            }
        })();
        self.buffers.deregister_memory(handle);
        value
    }

    pub async fn erase(&self, pool_id: u64, key: &[u8]) -> Result<(), ClientError> {
        let mut req = MessageIoRequest::new(self.next_request_id(), self.auth_id, pool_id, IoOp::Erase, key, b"", 0, 0);
        req.resvd |= self.resvd_bits();

        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::IoResponse)?;
        let resp = MessageIoResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated IO_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        Ok(())
    }

    async fn info_request(&self, pool_id: u64, attr_type: AttributeType, offset: u64, key: &[u8]) -> Result<MessageInfoResponse, ClientError> {
        let req = MessageInfoRequest::new(self.next_request_id(), self.auth_id, pool_id, attr_type, offset, key);
        let resp_bytes = self.send_and_recv(req.encode()).await?;
        Self::expect_type(&resp_bytes, MessageType::InfoResponse)?;
        let resp = MessageInfoResponse::decode(resp_bytes).ok_or_else(|| ProtocolError("truncated INFO_RESPONSE".into()))?;
        StatusError::from_wire(resp.header.status)?;
        Ok(resp)
    }

    pub async fn count(&self, pool_id: u64) -> Result<u64, ClientError> {
        Ok(self.info_request(pool_id, AttributeType::Count, 0, b"").await?.value)
    }

    pub async fn get_attribute(&self, pool_id: u64, key: &[u8], attr: AttributeType) -> Result<u64, ClientError> {
        Ok(self.info_request(pool_id, attr, 0, key).await?.value)
    }

    /// Return the next key at or past `offset` matching `pattern`, plus its
    /// offset for a caller to resume enumeration from.
    pub async fn find(&self, pool_id: u64, pattern: &[u8], offset: u64) -> Result<(Vec<u8>, u64), ClientError> {
        let resp = self.info_request(pool_id, AttributeType::FindKey, offset, pattern).await?;
        Ok((resp.matched_key.to_vec(), resp.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{InMemoryPoolManager, PoolManager};
    use crate::protocol::POOL_FLAGS_CREATE;
    use crate::region_map::RegionMap;
    use crate::server::{Responder, ServerConfig};
    use crate::transport::{FabricConfig, MockFabric};

    fn spawn_server(fabric: Arc<dyn Fabric>) {
        let pool_manager: Arc<dyn PoolManager> = Arc::new(InMemoryPoolManager::new(Arc::new(RegionMap::new())));
        let responder = Responder::new(fabric, pool_manager, ServerConfig::default());
        tokio::spawn(async move {
            let _ = responder.serve().await;
        });
    }

    async fn connected_pair() -> (Arc<Connection>, u64) {
        let (client_fabric, server_fabric) = MockFabric::pair(FabricConfig::default());
        spawn_server(Arc::new(server_fabric));

        let conn = Arc::new(Connection::new(Arc::new(client_fabric), ConnectionConfig::default()));
        conn.connect().await.unwrap();
        let pool_id = conn.create_pool("p0", 1 << 20, POOL_FLAGS_CREATE, 0).await.unwrap();
        (conn, pool_id)
    }

    #[tokio::test]
    async fn handshake_reaches_ready() {
        let (client_fabric, server_fabric) = MockFabric::pair(FabricConfig::default());
        spawn_server(Arc::new(server_fabric));
        let conn = Connection::new(Arc::new(client_fabric), ConnectionConfig::default());
        conn.connect().await.unwrap();
        assert_eq!(conn.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (conn, pool_id) = connected_pair().await;
        conn.put(pool_id, b"k1", b"hello world", false).await.unwrap();
        let value = conn.get(pool_id, b"k1").await.unwrap();
        assert_eq!(value, b"hello world");
        assert_eq!(conn.count(pool_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn put_without_replace_on_existing_key_fails() {
        let (conn, pool_id) = connected_pair().await;
        conn.put(pool_id, b"dup", b"a", false).await.unwrap();
        let err = conn.put(pool_id, b"dup", b"b", false).await.unwrap_err();
        assert!(matches!(err, ClientError::Status(StatusError::KeyExists)));
        assert_eq!(conn.get(pool_id, b"dup").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn erase_then_get_is_not_found() {
        let (conn, pool_id) = connected_pair().await;
        conn.put(pool_id, b"k1", b"v1", false).await.unwrap();
        conn.erase(pool_id, b"k1").await.unwrap();
        let err = conn.get(pool_id, b"k1").await.unwrap_err();
        assert!(matches!(err, ClientError::Status(StatusError::KeyNotFound)));
    }

    #[tokio::test]
    async fn put_direct_then_get_direct_round_trip_a_large_value() {
        let (conn, pool_id) = connected_pair().await;
        let value = vec![0x5au8; 200 * 1024];
        conn.put_direct(pool_id, b"big", &value, false).await.unwrap();
        let got = conn.get_direct(pool_id, b"big", value.len()).await.unwrap();
        assert_eq!(got, value);
    }

    #[tokio::test]
    async fn plain_get_transparently_falls_back_to_two_stage_for_a_large_value() {
        let (conn, pool_id) = connected_pair().await;
        let value = vec![0x7bu8; 200 * 1024];
        conn.put_direct(pool_id, b"big", &value, false).await.unwrap();
        // No capacity/registration supplied by the caller at all.
        let got = conn.get(pool_id, b"big").await.unwrap();
        assert_eq!(got, value);
    }

    #[tokio::test]
    async fn get_direct_rejects_zero_capacity_without_a_round_trip() {
        let (conn, pool_id) = connected_pair().await;
        let err = conn.get_direct(pool_id, b"k", 0).await.unwrap_err();
        assert!(matches!(err, ClientError::Status(StatusError::BadParam)));
    }

    #[tokio::test]
    async fn get_direct_rejects_capacity_above_negotiated_max_without_a_round_trip() {
        let (conn, pool_id) = connected_pair().await;
        conn.inner.lock().await.max_message_size = 4;
        let err = conn.get_direct(pool_id, b"k", 1024).await.unwrap_err();
        conn.inner.lock().await.max_message_size = 256 * 1024 * 1024;
        assert!(matches!(err, ClientError::Status(StatusError::TooLarge)));
    }

    #[tokio::test]
    async fn oversized_value_against_negotiated_max_is_rejected_without_a_round_trip() {
        let (conn, pool_id) = connected_pair().await;
        let value = vec![0u8; 1];
        let err = {
            // Force the check by pretending max_message_size is tiny.
            conn.inner.lock().await.max_message_size = 4;
            conn.put(pool_id, b"k", &value, false).await
        };
        conn.inner.lock().await.max_message_size = 256 * 1024 * 1024;
        assert!(matches!(err, Err(ClientError::Status(StatusError::TooLarge)))) ;
        let _ = value;
        let _ = pool_id;
    }

    #[tokio::test]
    async fn find_resumes_from_offset() {
        let (conn, pool_id) = connected_pair().await;
        conn.put(pool_id, b"apple", b"1", false).await.unwrap();
        conn.put(pool_id, b"apricot", b"2", false).await.unwrap();
        let (first, off) = conn.find(pool_id, b"ap", 0).await.unwrap();
        assert_eq!(first, b"apple");
        let (second, _) = conn.find(pool_id, b"ap", off + 1).await.unwrap();
        assert_eq!(second, b"apricot");
    }

    #[tokio::test]
    async fn close_from_ready_reaches_stopped_and_further_ticks_are_no_ops() {
        let (client_fabric, server_fabric) = MockFabric::pair(FabricConfig::default());
        spawn_server(Arc::new(server_fabric));
        let conn = Connection::new(Arc::new(client_fabric), ConnectionConfig::default());
        conn.connect().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.tick().await.unwrap(), 0);
    }

    #[test]
    fn short_circuit_backend_is_off_without_the_environment_variable() {
        std::env::remove_var("SHORT_CIRCUIT_BACKEND");
        assert!(!ConnectionOptions::from_env().short_circuit_backend);
    }
}
