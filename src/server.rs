//! The abstract server-side responder: dispatches incoming requests by
//! `type_id`, drives the pool manager and per-pool index, and constructs
//! the symmetric response.

use crate::error::{ProtocolError, StatusError, STATUS_OK};
use crate::index::Index;
use crate::pool::PoolManager;
use crate::protocol::{
    AttributeType, Header, IoOp, MessageCloseSession, MessageHandshake, MessageHandshakeReply,
    MessageInfoRequest, MessageInfoResponse, MessageIoRequest, MessageIoResponse, MessagePoolRequest,
    MessagePoolResponse, MessageType, PoolOp, MSG_RESVD_DIRECT, PUT_FLAGS_REPLACE,
};
use crate::transport::{Fabric, RegionHandle};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// Negotiated limits handed back in `HANDSHAKE_REPLY`.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub max_message_size: u64,
    pub max_inject_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: 256 * 1024 * 1024,
            max_inject_size: 4096,
        }
    }
}

/// One pool's key-value index plus the connection-agnostic pool manager
/// shared across every connection a server accepts.
pub struct Responder {
    fabric: Arc<dyn Fabric>,
    pool_manager: Arc<dyn PoolManager>,
    indices: DashMap<u64, Arc<Index>>,
    config: ServerConfig,
}

impl Responder {
    pub fn new(fabric: Arc<dyn Fabric>, pool_manager: Arc<dyn PoolManager>, config: ServerConfig) -> Self {
        Self {
            fabric,
            pool_manager,
            indices: DashMap::new(),
            config,
        }
    }

    /// Serve requests on this endpoint until the peer disconnects or a
    /// fatal protocol violation is raised.
    pub async fn serve(&self) -> Result<(), ProtocolError> {
        loop {
            let bytes = match self.fabric.sync_recv().await {
                Ok(b) => b,
                Err(_) => return Ok(()),
            };
            match self.dispatch(bytes).await {
                Ok(Some(response)) => {
                    if self.fabric.sync_send(response).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "fatal protocol violation, closing connection");
                    return Err(e);
                }
            }
        }
    }

    async fn dispatch(&self, bytes: Bytes) -> Result<Option<Bytes>, ProtocolError> {
        let header = Header::decode(&mut bytes.clone()).ok_or_else(|| ProtocolError("truncated header".into()))?;
        let msg_type =
            MessageType::from_u8(header.type_id).ok_or_else(|| ProtocolError(format!("unknown type_id 0x{:x}", header.type_id)))?;

        match msg_type {
            MessageType::Handshake => {
                let hs = MessageHandshake::decode(bytes).ok_or_else(|| ProtocolError("truncated HANDSHAKE".into()))?;
                tracing::info!(request_id = hs.header.request_id, "handshake received");
                let reply = MessageHandshakeReply::new(hs.header.request_id, self.config.max_message_size, self.config.max_inject_size);
                Ok(Some(reply.encode()))
            }
            MessageType::CloseSession => {
                let cs = MessageCloseSession::decode(bytes).ok_or_else(|| ProtocolError("truncated CLOSE_SESSION".into()))?;
                tracing::info!(connection_id = cs.connection_id, "session closed");
                Ok(None)
            }
            MessageType::PoolRequest => self.handle_pool_request(bytes).await.map(Some),
            MessageType::IoRequest => self.handle_io_request(bytes).await.map(Some),
            MessageType::InfoRequest => self.handle_info_request(bytes).await.map(Some),
            other => Err(ProtocolError(format!("unexpected request message type {:?}", other))),
        }
    }

    async fn handle_pool_request(&self, bytes: Bytes) -> Result<Bytes, ProtocolError> {
        let req = MessagePoolRequest::decode(bytes).ok_or_else(|| ProtocolError("truncated POOL_REQUEST".into()))?;
        let request_id = req.header.request_id;
        let name = req.name_str();

        let outcome: Result<u64, StatusError> = match req.op {
            PoolOp::Create => self
                .pool_manager
                .create(&name, req.size, req.flags, req.expected_object_count)
                .map(|pool| {
                    self.indices.entry(pool.id).or_insert_with(|| Arc::new(Index::new()));
                    tracing::info!(pool = %name, pool_id = pool.id, "pool created");
                    pool.id
                })
                .map_err(StatusError::from),
            PoolOp::Open => self
                .pool_manager
                .open(&name, req.flags)
                .map(|pool| {
                    self.indices.entry(pool.id).or_insert_with(|| Arc::new(Index::new()));
                    tracing::info!(pool = %name, pool_id = pool.id, "pool opened");
                    pool.id
                })
                .map_err(StatusError::from),
            PoolOp::Close => self.pool_manager.close(&name).map(|()| 0).map_err(StatusError::from),
            PoolOp::Delete => self.pool_manager.delete(&name).map(|()| 0).map_err(StatusError::from),
        };

        let (status, pool_id) = match outcome {
            Ok(pool_id) => (STATUS_OK, pool_id),
            Err(e) => (e.to_wire(), 0),
        };
        Ok(MessagePoolResponse::new(request_id, status, pool_id).encode())
    }

    async fn handle_io_request(&self, bytes: Bytes) -> Result<Bytes, ProtocolError> {
        let req = MessageIoRequest::decode(bytes).ok_or_else(|| ProtocolError("truncated IO_REQUEST".into()))?;
        let request_id = req.header.request_id;

        let index = match self.indices.get(&req.pool_id) {
            Some(idx) => idx.clone(),
            None => return Ok(MessageIoResponse::new(request_id, StatusError::Inval.to_wire(), &[], false, 0).encode()),
        };

        let outcome: Result<(Vec<u8>, bool, u64), StatusError> = match req.op {
            IoOp::Put => {
                let replace = req.flags & PUT_FLAGS_REPLACE != 0;
                index.put(&req.key, &req.value, replace).map(|()| (Vec::new(), false, 0))
            }
            IoOp::PutAdvance => {
                if req.resvd & MSG_RESVD_DIRECT == 0 {
                    Err(StatusError::BadParam)
                } else {
                    match self.fabric.rdma_read(RegionHandle(req.region_handle), 0, req.val_len as usize) {
                        Ok(value) => {
                            let replace = req.flags & PUT_FLAGS_REPLACE != 0;
                            index.put(&req.key, &value, replace).map(|()| (Vec::new(), false, 0))
                        }
                        Err(_) => Err(StatusError::BadParam),
                    }
                }
            }
            IoOp::Get => index.get(&req.key).and_then(|value| {
                if req.resvd & MSG_RESVD_DIRECT != 0 {
                    self.fabric
                        .rdma_write(RegionHandle(req.region_handle), 0, &value)
                        .map(|()| (Vec::new(), true, value.len() as u64))
                        .map_err(|_| StatusError::BadParam)
                } else if value.len() as u64 > self.config.max_inject_size {
                    // Too large to embed inline and the caller didn't provide
                    // a destination region; report the size so it can
                    // register one and retry with MSG_RESVD_DIRECT set.
                    Ok((Vec::new(), true, value.len() as u64))
                } else {
                    let len = value.len() as u64;
                    Ok((value, false, len))
                }
            }),
            IoOp::Erase => index.erase(&req.key).map(|()| (Vec::new(), false, 0)),
            IoOp::Configure => {
                tracing::debug!(pool_id = req.pool_id, "pool configured");
                Ok((Vec::new(), false, 0))
            }
        };

        let (status, data, two_stage, value_len) = match outcome {
            Ok((data, two_stage, value_len)) => (STATUS_OK, data, two_stage, value_len),
            Err(e) => (e.to_wire(), Vec::new(), false, 0),
        };
        Ok(MessageIoResponse::new(request_id, status, &data, two_stage, value_len).encode())
    }

    async fn handle_info_request(&self, bytes: Bytes) -> Result<Bytes, ProtocolError> {
        let req = MessageInfoRequest::decode(bytes).ok_or_else(|| ProtocolError("truncated INFO_REQUEST".into()))?;
        let request_id = req.header.request_id;

        let index = match self.indices.get(&req.pool_id) {
            Some(idx) => idx.clone(),
            None => return Ok(MessageInfoResponse::new(request_id, StatusError::Inval.to_wire(), 0, 0, &[]).encode()),
        };

        let outcome: Result<(u64, u64, Vec<u8>), StatusError> = if matches!(req.attr_type, AttributeType::FindKey) {
            index.find(&req.key, req.offset).map(|(key, offset)| (0, offset, key))
        } else {
            index.get_attribute(&req.key, req.attr_type).map(|value| (value, 0, Vec::new()))
        };

        let (status, value, offset, matched_key) = match outcome {
            Ok((value, offset, matched_key)) => (STATUS_OK, value, offset, matched_key),
            Err(e) => (e.to_wire(), 0, 0, Vec::new()),
        };
        Ok(MessageInfoResponse::new(request_id, status, value, offset, &matched_key).encode())
    }
}
