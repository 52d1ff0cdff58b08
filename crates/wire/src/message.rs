//! Outbound message kinds and their byte layout.
//!
//! All kinds share [`Header`]; [`Message`] is the tagged variant the client
//! queues and encodes. Only the dynamic kind carries extra fields, so it gets
//! its own type with the metadata-append operation.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    DEFAULT_META_MAX_LEN, DYNAMIC_EXT_HEADER_LEN, HEADER_LEN, META_ENTRY_OVERHEAD, WireError,
    WireResult,
};

/// Protocol message types understood by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Plain data report (`MSG_DATA_REPORT`)
    Common,
    /// Data report with a metadata region (`REPORT_DYNAMICAL_PROTOCOL_TYPE`)
    Dynamic,
    /// Operational report (`MSG_DATA_REPORT_OPS`)
    Op,
    /// Agent configuration request; the agent answers with the same type
    RequestConfig,
}

impl MessageKind {
    /// Numeric `msg_type` on the wire.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Common => 3072 + 1,
            Self::Dynamic => 0x09,
            Self::Op => 3072 + 12,
            Self::RequestConfig => 0x0A,
        }
    }

    /// Map a wire `msg_type` back to a kind.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            3073 => Some(Self::Common),
            0x09 => Some(Self::Dynamic),
            3084 => Some(Self::Op),
            0x0A => Some(Self::RequestConfig),
            _ => None,
        }
    }
}

/// Fixed 24-byte header shared by every outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub msg_type: u32,
    pub data_id: i32,
    pub utc_timestamp: u32,
    pub body_length: u32,
    pub reserved: [u32; 2],
}

impl Header {
    /// Header stamped with the current UTC second.
    #[must_use]
    pub fn new(kind: MessageKind, data_id: i32, body_length: u32) -> Self {
        Self {
            msg_type: kind.code(),
            data_id,
            utc_timestamp: utc_now(),
            body_length,
            reserved: [0, 0],
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32(self.msg_type);
        buf.put_i32(self.data_id);
        buf.put_u32(self.utc_timestamp);
        buf.put_u32(self.body_length);
        buf.put_u32(self.reserved[0]);
        buf.put_u32(self.reserved[1]);
    }

    /// Decode a header from the first 24 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Truncated`] if fewer than 24 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::truncated(HEADER_LEN, bytes.len()));
        }
        let mut cur = bytes;
        Ok(Self {
            msg_type: cur.get_u32(),
            data_id: cur.get_i32(),
            utc_timestamp: cur.get_u32(),
            body_length: cur.get_u32(),
            reserved: [cur.get_u32(), cur.get_u32()],
        })
    }

    /// The kind named by `msg_type`, if it is one the codec knows.
    #[must_use]
    pub const fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_code(self.msg_type)
    }
}

/// One metadata key/value pair of a dynamic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

impl MetaEntry {
    /// Bytes this entry occupies in the metadata region.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        META_ENTRY_OVERHEAD as usize + self.key.len() + self.value.len()
    }
}

/// Dynamic data report: header, extended header, bounded metadata, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicMessage {
    header: Header,
    index: u64,
    flags: u32,
    meta_len: u32,
    meta_max_len: u32,
    metas: Vec<MetaEntry>,
    payload: Bytes,
}

impl DynamicMessage {
    /// New dynamic message with an empty metadata region of default capacity.
    pub fn new(data_id: i32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let meta_max_len = DEFAULT_META_MAX_LEN;
        let body_length = wire_len(payload.len())
            .saturating_add(DYNAMIC_EXT_HEADER_LEN)
            .saturating_add(meta_max_len);
        Self {
            header: Header::new(MessageKind::Dynamic, data_id, body_length),
            index: 0,
            flags: 0,
            meta_len: 0,
            meta_max_len,
            metas: Vec::new(),
            payload,
        }
    }

    /// Set the sequence index carried in the extended header.
    #[must_use]
    pub const fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    /// Set the extended-header flags (see [`crate::FLAG_REDUNDANCY`]).
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set the two reserved header words.
    #[must_use]
    pub const fn with_reserved(mut self, reserved: [u32; 2]) -> Self {
        self.header.reserved = reserved;
        self
    }

    /// Append a metadata pair.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MetadataOverflow`] if the pair does not fit in
    /// the remaining region; the message is not modified.
    pub fn add_meta(&mut self, key: impl Into<String>, value: impl Into<String>) -> WireResult<()> {
        let entry = MetaEntry {
            key: key.into(),
            value: value.into(),
        };
        let will_len = (self.meta_len as usize)
            .checked_add(entry.encoded_len())
            .filter(|len| *len <= self.meta_max_len as usize)
            .ok_or(WireError::MetadataOverflow {
                key_len: entry.key.len(),
                value_len: entry.value.len(),
                used: self.meta_len,
                capacity: self.meta_max_len,
            })?;

        self.meta_len = wire_len(will_len);
        self.metas.push(entry);
        Ok(())
    }

    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub const fn index(&self) -> u64 {
        self.index
    }

    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Bytes of the metadata region in use.
    #[must_use]
    pub const fn meta_len(&self) -> u32 {
        self.meta_len
    }

    /// Capacity of the metadata region.
    #[must_use]
    pub const fn meta_max_len(&self) -> u32 {
        self.meta_max_len
    }

    /// Metadata pairs in insertion order.
    #[must_use]
    pub fn metadata(&self) -> &[MetaEntry] {
        &self.metas
    }

    /// Value of the first metadata pair named `key`.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metas
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }

    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn encoded_len(&self) -> usize {
        HEADER_LEN + DYNAMIC_EXT_HEADER_LEN as usize + self.meta_max_len as usize + self.payload.len()
    }

    fn put(&self, buf: &mut BytesMut) {
        self.header.put(buf);

        buf.put_u64(self.index);
        buf.put_u32(self.flags);
        buf.put_u32(self.meta_len);
        buf.put_u32(self.meta_max_len);
        buf.put_u32(wire_len(self.metas.len()));

        for meta in &self.metas {
            buf.put_u32(wire_len(meta.key.len()));
            buf.put_u32(wire_len(meta.value.len()));
            buf.put_slice(meta.key.as_bytes());
            buf.put_slice(meta.value.as_bytes());
        }

        // zero-fill the unused tail of the metadata region
        let left = self.meta_max_len.saturating_sub(self.meta_len) as usize;
        buf.put_bytes(0, left);

        buf.put_slice(&self.payload);
    }

    /// Decode a complete dynamic frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnexpectedKind`] for a non-dynamic frame,
    /// [`WireError::Truncated`] when the frame is shorter than it declares,
    /// and [`WireError::MalformedMetadata`] when the metadata region is
    /// inconsistent with its own counters.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let header = Header::decode(bytes)?;
        let expected = MessageKind::Dynamic.code();
        if header.msg_type != expected {
            return Err(WireError::unexpected_kind(header.msg_type, expected));
        }

        let mut cur = bytes.get(HEADER_LEN..).unwrap_or_default();
        let ext_len = DYNAMIC_EXT_HEADER_LEN as usize;
        if cur.len() < ext_len {
            return Err(WireError::truncated(HEADER_LEN + ext_len, bytes.len()));
        }
        let index = cur.get_u64();
        let flags = cur.get_u32();
        let meta_len = cur.get_u32();
        let meta_max_len = cur.get_u32();
        let meta_count = cur.get_u32();

        if meta_len > meta_max_len {
            return Err(WireError::malformed_metadata(format!(
                "meta_len {meta_len} exceeds meta_max_len {meta_max_len}"
            )));
        }

        let region_len = meta_max_len as usize;
        let payload_len = (header.body_length as usize)
            .checked_sub(ext_len + region_len)
            .ok_or_else(|| {
                WireError::malformed_metadata(format!(
                    "body_length {} smaller than metadata region {}",
                    header.body_length, region_len
                ))
            })?;
        if cur.len() < region_len + payload_len {
            return Err(WireError::truncated(
                HEADER_LEN + ext_len + region_len + payload_len,
                bytes.len(),
            ));
        }

        let (region, rest) = cur.split_at(region_len);
        let metas = decode_metas(
            region.get(..meta_len as usize).unwrap_or_default(),
            meta_count,
        )?;
        let payload = Bytes::copy_from_slice(rest.get(..payload_len).unwrap_or_default());

        Ok(Self {
            header,
            index,
            flags,
            meta_len,
            meta_max_len,
            metas,
            payload,
        })
    }
}

fn decode_metas(mut region: &[u8], count: u32) -> WireResult<Vec<MetaEntry>> {
    let mut metas = Vec::with_capacity(count as usize);
    for n in 0..count {
        if region.len() < META_ENTRY_OVERHEAD as usize {
            return Err(WireError::malformed_metadata(format!(
                "entry {n} header runs past meta_len"
            )));
        }
        let key_len = region.get_u32() as usize;
        let value_len = region.get_u32() as usize;
        if region.len() < key_len + value_len {
            return Err(WireError::malformed_metadata(format!(
                "entry {n} body runs past meta_len"
            )));
        }
        let (key, tail) = region.split_at(key_len);
        let (value, tail) = tail.split_at(value_len);
        region = tail;

        metas.push(MetaEntry {
            key: utf8(key, n)?,
            value: utf8(value, n)?,
        });
    }
    if !region.is_empty() {
        return Err(WireError::malformed_metadata(format!(
            "{} trailing bytes after {count} entries",
            region.len()
        )));
    }
    Ok(metas)
}

fn utf8(raw: &[u8], n: u32) -> WireResult<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|e| WireError::malformed_metadata(format!("entry {n} is not UTF-8: {e}")))
}

/// An outbound message of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Common { header: Header, payload: Bytes },
    Dynamic(DynamicMessage),
    Op { header: Header, payload: Bytes },
    RequestConfig { header: Header },
}

impl Message {
    /// Plain data report.
    pub fn common(data_id: i32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let header = Header::new(MessageKind::Common, data_id, wire_len(payload.len()));
        Self::Common { header, payload }
    }

    /// Operational report.
    pub fn op(data_id: i32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let header = Header::new(MessageKind::Op, data_id, wire_len(payload.len()));
        Self::Op { header, payload }
    }

    /// Zero-payload agent configuration request.
    ///
    /// The agent expects every header field other than `msg_type` to be zero.
    #[must_use]
    pub fn request_config() -> Self {
        Self::RequestConfig {
            header: Header {
                msg_type: MessageKind::RequestConfig.code(),
                ..Header::default()
            },
        }
    }

    /// Set the two reserved header words.
    #[must_use]
    pub fn with_reserved(mut self, reserved: [u32; 2]) -> Self {
        match &mut self {
            Self::Common { header, .. }
            | Self::Op { header, .. }
            | Self::RequestConfig { header } => header.reserved = reserved,
            Self::Dynamic(msg) => msg.header.reserved = reserved,
        }
        self
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Common { .. } => MessageKind::Common,
            Self::Dynamic(_) => MessageKind::Dynamic,
            Self::Op { .. } => MessageKind::Op,
            Self::RequestConfig { .. } => MessageKind::RequestConfig,
        }
    }

    #[must_use]
    pub const fn header(&self) -> &Header {
        match self {
            Self::Common { header, .. }
            | Self::Op { header, .. }
            | Self::RequestConfig { header } => header,
            Self::Dynamic(msg) => &msg.header,
        }
    }

    /// Total size of the encoded frame.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Common { payload, .. } | Self::Op { payload, .. } => HEADER_LEN + payload.len(),
            Self::RequestConfig { .. } => HEADER_LEN,
            Self::Dynamic(msg) => msg.encoded_len(),
        }
    }

    /// Serialize the message into a single frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            Self::Common { header, payload } | Self::Op { header, payload } => {
                header.put(&mut buf);
                buf.put_slice(payload);
            }
            Self::RequestConfig { header } => header.put(&mut buf),
            Self::Dynamic(msg) => msg.put(&mut buf),
        }
        buf.freeze()
    }
}

impl From<DynamicMessage> for Message {
    fn from(msg: DynamicMessage) -> Self {
        Self::Dynamic(msg)
    }
}

/// Lengths on the wire are u32; anything larger saturates.
fn wire_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn utc_now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
