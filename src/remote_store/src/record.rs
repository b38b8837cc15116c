use crate::{StoreError, StoreResult};
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use prost::Message;

/// Fixed namespace prefix for reference-index keys. Part of the persisted
/// format.
pub const REMOTESTORE_PREFIX: &str = "/remotestore";

/// Multicodec for raw leaves.
pub const RAW_CODEC: u64 = 0x55;

/// Multicodec for dag-json internal nodes.
pub const DAG_JSON_CODEC: u64 = 0x0129;

pub type Multihash = multihash::Multihash<64>;

/// Reference record pointing into an external byte source.
///
/// Wire format is the shared record schema: length-delimited, tag-numbered,
/// with `path = 1`, `offset = 2`, `size = 3`. The fields are optional on the
/// wire but all three are populated by every writer in this crate.
#[derive(Clone, PartialEq, Message)]
pub struct ReferenceRecord {
    #[prost(string, optional, tag = "1")]
    pub file_path: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub offset_field: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub size_field: Option<u64>,
}

impl ReferenceRecord {
    pub fn new(file_path: String, offset: u64, size: u64) -> Self {
        Self {
            file_path: Some(file_path),
            offset_field: Some(offset),
            size_field: Some(size),
        }
    }

    pub fn encode_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn decode_bytes(data: &[u8]) -> StoreResult<Self> {
        ReferenceRecord::decode(data).map_err(|e| StoreError::DecodeError(e.to_string()))
    }

    pub fn path(&self) -> StoreResult<&str> {
        self.file_path
            .as_deref()
            .ok_or_else(|| StoreError::DecodeError("record missing path".to_string()))
    }

    pub fn offset(&self) -> StoreResult<u64> {
        self.offset_field
            .ok_or_else(|| StoreError::DecodeError("record missing offset".to_string()))
    }

    pub fn size(&self) -> StoreResult<u64> {
        self.size_field
            .ok_or_else(|| StoreError::DecodeError("record missing size".to_string()))
    }
}

/// Stored paths always use `/`; the filesystem source converts back to the
/// host convention when opening.
pub fn to_slash(path: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

pub fn from_slash(path: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace('/', std::path::MAIN_SEPARATOR_STR)
    }
}

/// Base32 (RFC 4648, no padding) over the binary multihash. Deterministic
/// and reversible.
pub fn multihash_to_b32(mh: &Multihash) -> String {
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &mh.to_bytes())
}

pub fn b32_to_multihash(s: &str) -> StoreResult<Multihash> {
    let bytes = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, s)
        .ok_or_else(|| StoreError::DecodeError(format!("invalid base32 key: {}", s)))?;
    Multihash::from_bytes(&bytes).map_err(|e| StoreError::DecodeError(e.to_string()))
}

/// Base32 over the full binary CID, codec included. Used where the exact
/// CID must be replayable from the key alone.
pub fn cid_to_b32(cid: &Cid) -> String {
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &cid.to_bytes())
}

pub fn b32_to_cid(s: &str) -> StoreResult<Cid> {
    let bytes = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, s)
        .ok_or_else(|| StoreError::DecodeError(format!("invalid base32 key: {}", s)))?;
    Cid::try_from(bytes.as_slice()).map_err(|e| StoreError::DecodeError(e.to_string()))
}

/// Reference-index key for a multihash: `/remotestore/<base32>`.
pub fn record_key(mh: &Multihash) -> String {
    format!("{}/{}", REMOTESTORE_PREFIX, multihash_to_b32(mh))
}

/// Inverse of [`record_key`].
pub fn key_to_multihash(key: &str) -> StoreResult<Multihash> {
    let rest = key
        .strip_prefix(REMOTESTORE_PREFIX)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| StoreError::DecodeError(format!("key outside namespace: {}", key)))?;
    b32_to_multihash(rest)
}

/// Recompute a CID over `data` reusing the version, codec and hash function
/// of `like`. This is how read-path verification carries the requested CID's
/// prefix instead of assuming raw/sha2-256.
pub fn cid_with_prefix_of(like: &Cid, data: &[u8]) -> StoreResult<Cid> {
    let code = like.hash().code();
    let hasher = Code::try_from(code)
        .map_err(|_| StoreError::InvalidParam(format!("unsupported hash code: {:#x}", code)))?;
    let mh = hasher.digest(data);
    Cid::new(like.version(), like.codec(), mh)
        .map_err(|e| StoreError::InvalidParam(format!("rebuild cid: {}", e)))
}
