//! The wire message family.
//!
//! Every message starts with a fixed [`Header`] (`type_id`, `msg_len`,
//! `auth_id`, `request_id`, `status`) followed by type-specific fields.
//! Messages are never constructed in place inside a buffer via a raw
//! reinterpret cast; instead each message type has explicit, endian-defined
//! `encode`/`decode` methods into a byte slice, with the header's layout
//! size asserted at compile time.

use crate::error::STATUS_OK;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Wire type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 1,
    HandshakeReply = 2,
    CloseSession = 3,
    PoolRequest = 4,
    PoolResponse = 5,
    IoRequest = 6,
    IoResponse = 7,
    InfoRequest = 8,
    InfoResponse = 9,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Handshake,
            2 => Self::HandshakeReply,
            3 => Self::CloseSession,
            4 => Self::PoolRequest,
            5 => Self::PoolResponse,
            6 => Self::IoRequest,
            7 => Self::IoResponse,
            8 => Self::InfoRequest,
            9 => Self::InfoResponse,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "HANDSHAKE",
            Self::HandshakeReply => "HANDSHAKE_REPLY",
            Self::CloseSession => "CLOSE_SESSION",
            Self::PoolRequest => "POOL_REQUEST",
            Self::PoolResponse => "POOL_RESPONSE",
            Self::IoRequest => "IO_REQUEST",
            Self::IoResponse => "IO_RESPONSE",
            Self::InfoRequest => "INFO_REQUEST",
            Self::InfoResponse => "INFO_RESPONSE",
        }
    }
}

/// Fixed header carried by every message.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub type_id: u8,
    pub msg_len: u32,
    pub auth_id: u64,
    pub request_id: u64,
    pub status: i32,
}

/// Encoded size of [`Header`] on the wire.
pub const HEADER_LEN: usize = 1 + 4 + 8 + 8 + 4;
const _: () = assert!(HEADER_LEN == 25);

impl Header {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_id);
        buf.put_u32_le(self.msg_len);
        buf.put_u64_le(self.auth_id);
        buf.put_u64_le(self.request_id);
        buf.put_i32_le(self.status);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < HEADER_LEN {
            return None;
        }
        Some(Self {
            type_id: buf.get_u8(),
            msg_len: buf.get_u32_le(),
            auth_id: buf.get_u64_le(),
            request_id: buf.get_u64_le(),
            status: buf.get_i32_le(),
        })
    }
}

/// `status` is meaningless on request messages; this sentinel documents
/// that rather than leaving a magic `0` unexplained. A caller reading this
/// field back out of a request instead of a response is a bug.
const STATUS_FIELD_UNUSED: i32 = 0;

/// Reserved bits in `IO_REQUEST.resvd`.
pub const MSG_RESVD_SCBE: u32 = 1 << 0;
pub const MSG_RESVD_DIRECT: u32 = 1 << 1;

/// Set on an `IO_RESPONSE` to indicate the value will arrive via a
/// follow-up RDMA receive rather than inline in this message.
pub const MSG_TWOSTAGE_BIT: u32 = 1 << 0;

/// Pool request ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolOp {
    Create = 1,
    Open = 2,
    Close = 3,
    Delete = 4,
}

impl PoolOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Create,
            2 => Self::Open,
            3 => Self::Close,
            4 => Self::Delete,
            _ => return None,
        })
    }
}

/// IO request ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoOp {
    Put = 1,
    PutAdvance = 2,
    Get = 3,
    Erase = 4,
    Configure = 5,
}

impl IoOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Put,
            2 => Self::PutAdvance,
            3 => Self::Get,
            4 => Self::Erase,
            5 => Self::Configure,
            _ => return None,
        })
    }
}

/// `put` flag: replace an existing value instead of failing with
/// `E_KEY_EXISTS`.
pub const PUT_FLAGS_REPLACE: u32 = 1 << 0;

/// Pool creation/open flags.
pub const POOL_FLAGS_CREATE: u32 = 1 << 0;
pub const POOL_FLAGS_CREATE_EXCL: u32 = 1 << 1;
pub const POOL_FLAGS_READ_ONLY: u32 = 1 << 2;

/// Attribute types for `INFO_REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttributeType {
    Count = 1,
    Crc32 = 2,
    AutoHashtableExpansion = 3,
    PercentUsed = 4,
    MemoryType = 5,
    WriteEpochTime = 6,
    ValueLen = 7,
    /// Not a record attribute: returns the next matching key for a pattern
    /// expression, plus its offset.
    FindKey = 8,
}

impl AttributeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Count,
            2 => Self::Crc32,
            3 => Self::AutoHashtableExpansion,
            4 => Self::PercentUsed,
            5 => Self::MemoryType,
            6 => Self::WriteEpochTime,
            7 => Self::ValueLen,
            8 => Self::FindKey,
            _ => return None,
        })
    }
}

fn put_bytes_with_len(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn get_bytes_with_len(buf: &mut impl Buf) -> Option<Bytes> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return None;
    }
    Some(buf.copy_to_bytes(len))
}

/// `Message_handshake`: protocol version + capability bits.
#[derive(Debug, Clone)]
pub struct MessageHandshake {
    pub header: Header,
    pub protocol_version: u32,
    pub capabilities: u32,
}

impl MessageHandshake {
    pub fn new(request_id: u64, auth_id: u64, protocol_version: u32, capabilities: u32) -> Self {
        Self {
            header: Header {
                type_id: MessageType::Handshake as u8,
                msg_len: (HEADER_LEN + 8) as u32,
                auth_id,
                request_id,
                status: STATUS_FIELD_UNUSED,
            },
            protocol_version,
            capabilities,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.capabilities);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 8 {
            return None;
        }
        Some(Self {
            header,
            protocol_version: buf.get_u32_le(),
            capabilities: buf.get_u32_le(),
        })
    }
}

/// `Message_handshake_reply`: negotiated `max_message_size`.
#[derive(Debug, Clone)]
pub struct MessageHandshakeReply {
    pub header: Header,
    pub max_message_size: u64,
    pub max_inject_size: u64,
}

impl MessageHandshakeReply {
    pub fn new(request_id: u64, max_message_size: u64, max_inject_size: u64) -> Self {
        Self {
            header: Header {
                type_id: MessageType::HandshakeReply as u8,
                msg_len: (HEADER_LEN + 16) as u32,
                auth_id: 0,
                request_id,
                status: STATUS_OK,
            },
            max_message_size,
            max_inject_size,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u64_le(self.max_message_size);
        buf.put_u64_le(self.max_inject_size);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 16 {
            return None;
        }
        Some(Self {
            header,
            max_message_size: buf.get_u64_le(),
            max_inject_size: buf.get_u64_le(),
        })
    }
}

/// `Message_close_session`: connection id.
#[derive(Debug, Clone)]
pub struct MessageCloseSession {
    pub header: Header,
    pub connection_id: u64,
}

impl MessageCloseSession {
    pub fn new(request_id: u64, connection_id: u64) -> Self {
        Self {
            header: Header {
                type_id: MessageType::CloseSession as u8,
                msg_len: (HEADER_LEN + 8) as u32,
                auth_id: 0,
                request_id,
                status: STATUS_FIELD_UNUSED,
            },
            connection_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u64_le(self.connection_id);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 8 {
            return None;
        }
        Some(Self {
            header,
            connection_id: buf.get_u64_le(),
        })
    }
}

/// `Message_pool_request`.
#[derive(Debug, Clone)]
pub struct MessagePoolRequest {
    pub header: Header,
    pub op: PoolOp,
    pub size: u64,
    pub flags: u32,
    pub expected_object_count: u64,
    pub name: Bytes,
}

impl MessagePoolRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: u64,
        auth_id: u64,
        op: PoolOp,
        size: u64,
        flags: u32,
        expected_object_count: u64,
        name: &str,
    ) -> Self {
        let name = Bytes::copy_from_slice(name.as_bytes());
        let msg_len = HEADER_LEN + 1 + 8 + 4 + 8 + 4 + name.len();
        Self {
            header: Header {
                type_id: MessageType::PoolRequest as u8,
                msg_len: msg_len as u32,
                auth_id,
                request_id,
                status: STATUS_FIELD_UNUSED,
            },
            op,
            size,
            flags,
            expected_object_count,
            name,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u8(self.op as u8);
        buf.put_u64_le(self.size);
        buf.put_u32_le(self.flags);
        buf.put_u64_le(self.expected_object_count);
        put_bytes_with_len(&mut buf, &self.name);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 1 + 8 + 4 + 8 {
            return None;
        }
        let op = PoolOp::from_u8(buf.get_u8())?;
        let size = buf.get_u64_le();
        let flags = buf.get_u32_le();
        let expected_object_count = buf.get_u64_le();
        let name = get_bytes_with_len(&mut buf)?;
        Some(Self {
            header,
            op,
            size,
            flags,
            expected_object_count,
            name,
        })
    }

    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// `Message_pool_response`.
#[derive(Debug, Clone)]
pub struct MessagePoolResponse {
    pub header: Header,
    pub pool_id: u64,
}

impl MessagePoolResponse {
    pub fn new(request_id: u64, status: i32, pool_id: u64) -> Self {
        Self {
            header: Header {
                type_id: MessageType::PoolResponse as u8,
                msg_len: (HEADER_LEN + 8) as u32,
                auth_id: 0,
                request_id,
                status,
            },
            pool_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u64_le(self.pool_id);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 8 {
            return None;
        }
        Some(Self {
            header,
            pool_id: buf.get_u64_le(),
        })
    }
}

/// `Message_IO_request`. Carries either an inline value (`put`, `erase`'s
/// key-only case) or a declared `val_len` (`put_direct` advance, `get`'s
/// receive-side capacity) — never both meaningfully at once.
#[derive(Debug, Clone)]
pub struct MessageIoRequest {
    pub header: Header,
    pub op: IoOp,
    pub pool_id: u64,
    pub flags: u32,
    pub resvd: u32,
    pub key: Bytes,
    pub value: Bytes,
    /// Declared value length for `OP_PUT_ADVANCE` and as receive capacity
    /// for `OP_GET`.
    pub val_len: u64,
    /// The caller's registered region for a direct transfer (`MSG_RESVD_DIRECT`);
    /// `0` when the request does not carry one.
    pub region_handle: u64,
}

impl MessageIoRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: u64,
        auth_id: u64,
        pool_id: u64,
        op: IoOp,
        key: &[u8],
        value: &[u8],
        val_len: u64,
        flags: u32,
    ) -> Self {
        let key = Bytes::copy_from_slice(key);
        let value = Bytes::copy_from_slice(value);
        let msg_len = HEADER_LEN + 1 + 8 + 4 + 4 + 4 + key.len() + 4 + value.len() + 8 + 8;
        Self {
            header: Header {
                type_id: MessageType::IoRequest as u8,
                msg_len: msg_len as u32,
                auth_id,
                request_id,
                status: STATUS_FIELD_UNUSED,
            },
            op,
            pool_id,
            flags,
            resvd: 0,
            key,
            value,
            val_len,
            region_handle: 0,
        }
    }

    /// Attach a caller-registered region handle for a direct (two-stage)
    /// transfer, recomputing `msg_len` accordingly.
    pub fn with_region_handle(mut self, region_handle: u64) -> Self {
        self.region_handle = region_handle;
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u8(self.op as u8);
        buf.put_u64_le(self.pool_id);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.resvd);
        put_bytes_with_len(&mut buf, &self.key);
        put_bytes_with_len(&mut buf, &self.value);
        buf.put_u64_le(self.val_len);
        buf.put_u64_le(self.region_handle);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 1 + 8 + 4 + 4 {
            return None;
        }
        let op = IoOp::from_u8(buf.get_u8())?;
        let pool_id = buf.get_u64_le();
        let flags = buf.get_u32_le();
        let resvd = buf.get_u32_le();
        let key = get_bytes_with_len(&mut buf)?;
        let value = get_bytes_with_len(&mut buf)?;
        if buf.remaining() < 16 {
            return None;
        }
        let val_len = buf.get_u64_le();
        let region_handle = buf.get_u64_le();
        Some(Self {
            header,
            op,
            pool_id,
            flags,
            resvd,
            key,
            value,
            val_len,
            region_handle,
        })
    }
}

/// `Message_IO_response`.
#[derive(Debug, Clone)]
pub struct MessageIoResponse {
    pub header: Header,
    pub data: Bytes,
    /// Bit 0: two-stage bit.
    pub flags: u32,
    /// The value's length, set on both the inline and two-stage paths —
    /// the inline path's value is also just `data.len()`, but the two-stage
    /// path carries no inline bytes and must still report a length.
    pub value_len: u64,
}

impl MessageIoResponse {
    pub fn new(request_id: u64, status: i32, data: &[u8], two_stage: bool, value_len: u64) -> Self {
        let data = Bytes::copy_from_slice(data);
        let msg_len = HEADER_LEN + 4 + data.len() + 4 + 8;
        Self {
            header: Header {
                type_id: MessageType::IoResponse as u8,
                msg_len: msg_len as u32,
                auth_id: 0,
                request_id,
                status,
            },
            data,
            flags: if two_stage { MSG_TWOSTAGE_BIT } else { 0 },
            value_len,
        }
    }

    pub fn is_two_stage(&self) -> bool {
        self.flags & MSG_TWOSTAGE_BIT != 0
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        put_bytes_with_len(&mut buf, &self.data);
        buf.put_u32_le(self.flags);
        buf.put_u64_le(self.value_len);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        let data = get_bytes_with_len(&mut buf)?;
        if buf.remaining() < 4 + 8 {
            return None;
        }
        let flags = buf.get_u32_le();
        let value_len = buf.get_u64_le();
        Some(Self {
            header,
            data,
            flags,
            value_len,
        })
    }
}

/// `Message_INFO_request`.
#[derive(Debug, Clone)]
pub struct MessageInfoRequest {
    pub header: Header,
    pub pool_id: u64,
    pub attr_type: AttributeType,
    pub offset: u64,
    pub key: Bytes,
}

impl MessageInfoRequest {
    pub fn new(
        request_id: u64,
        auth_id: u64,
        pool_id: u64,
        attr_type: AttributeType,
        offset: u64,
        key: &[u8],
    ) -> Self {
        let key = Bytes::copy_from_slice(key);
        let msg_len = HEADER_LEN + 8 + 1 + 8 + 4 + key.len();
        Self {
            header: Header {
                type_id: MessageType::InfoRequest as u8,
                msg_len: msg_len as u32,
                auth_id,
                request_id,
                status: STATUS_FIELD_UNUSED,
            },
            pool_id,
            attr_type,
            offset,
            key,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u64_le(self.pool_id);
        buf.put_u8(self.attr_type as u8);
        buf.put_u64_le(self.offset);
        put_bytes_with_len(&mut buf, &self.key);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 8 + 1 + 8 {
            return None;
        }
        let pool_id = buf.get_u64_le();
        let attr_type = AttributeType::from_u8(buf.get_u8())?;
        let offset = buf.get_u64_le();
        let key = get_bytes_with_len(&mut buf)?;
        Some(Self {
            header,
            pool_id,
            attr_type,
            offset,
            key,
        })
    }
}

/// `Message_INFO_response`.
#[derive(Debug, Clone)]
pub struct MessageInfoResponse {
    pub header: Header,
    pub value: u64,
    pub offset: u64,
    pub matched_key: Bytes,
}

impl MessageInfoResponse {
    pub fn new(request_id: u64, status: i32, value: u64, offset: u64, matched_key: &[u8]) -> Self {
        let matched_key = Bytes::copy_from_slice(matched_key);
        let msg_len = HEADER_LEN + 8 + 8 + 4 + matched_key.len();
        Self {
            header: Header {
                type_id: MessageType::InfoResponse as u8,
                msg_len: msg_len as u32,
                auth_id: 0,
                request_id,
                status,
            },
            value,
            offset,
            matched_key,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.msg_len as usize);
        self.header.encode(&mut buf);
        buf.put_u64_le(self.value);
        buf.put_u64_le(self.offset);
        put_bytes_with_len(&mut buf, &self.matched_key);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Option<Self> {
        let header = Header::decode(&mut buf)?;
        if buf.remaining() < 8 + 8 {
            return None;
        }
        let value = buf.get_u64_le();
        let offset = buf.get_u64_le();
        let matched_key = get_bytes_with_len(&mut buf)?;
        Some(Self {
            header,
            value,
            offset,
            matched_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header {
            type_id: MessageType::IoRequest as u8,
            msg_len: 123,
            auth_id: 42,
            request_id: 7,
            status: -4,
        };
        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Header::decode(&mut frozen).unwrap();
        assert_eq!(decoded.type_id, h.type_id);
        assert_eq!(decoded.msg_len, h.msg_len);
        assert_eq!(decoded.auth_id, h.auth_id);
        assert_eq!(decoded.request_id, h.request_id);
        assert_eq!(decoded.status, h.status);
    }

    #[test]
    fn pool_request_round_trip() {
        let msg = MessagePoolRequest::new(1, 99, PoolOp::Create, 4096, POOL_FLAGS_CREATE, 10, "p0");
        let bytes = msg.encode();
        let decoded = MessagePoolRequest::decode(bytes).unwrap();
        assert_eq!(decoded.op, PoolOp::Create);
        assert_eq!(decoded.size, 4096);
        assert_eq!(decoded.name_str(), "p0");
        assert_eq!(decoded.header.request_id, 1);
    }

    #[test]
    fn io_request_round_trip_with_inline_value() {
        let msg = MessageIoRequest::new(5, 1, 77, IoOp::Put, b"k1", b"hello world", 0, PUT_FLAGS_REPLACE)
            .with_region_handle(42);
        let decoded = MessageIoRequest::decode(msg.encode()).unwrap();
        assert_eq!(decoded.key.as_ref(), b"k1");
        assert_eq!(decoded.value.as_ref(), b"hello world");
        assert_eq!(decoded.flags, PUT_FLAGS_REPLACE);
        assert_eq!(decoded.region_handle, 42);
    }

    #[test]
    fn io_response_two_stage_bit_round_trips() {
        let msg = MessageIoResponse::new(5, STATUS_OK, b"", true, 64);
        let decoded = MessageIoResponse::decode(msg.encode()).unwrap();
        assert!(decoded.is_two_stage());
        assert_eq!(decoded.value_len, 64);
    }

    #[test]
    fn truncated_buffer_fails_to_decode() {
        let msg = MessageIoRequest::new(5, 1, 77, IoOp::Get, b"k1", b"", 64, 0);
        let mut bytes = msg.encode();
        bytes.truncate(bytes.len() - 2);
        assert!(MessageIoRequest::decode(bytes).is_none());
    }
}
