use crate::{
    cid_with_prefix_of, from_slash, key_to_multihash, record_key, to_slash, Block, Datastore,
    ReferenceRecord, ReferenceStatus, RemoteLeaf, RemoteSource, StoreError, StoreResult,
    KEYS_CHAN_BUF_SIZE, RAW_CODEC, REMOTESTORE_PREFIX,
};
use cid::Cid;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Keyed index of reference records plus the read path that streams the
/// referenced bytes back out of a source and verifies them.
///
/// Records are keyed by the multihash component of the CID only; two CIDs
/// with the same multihash share one record. Writes never touch the source,
/// so a record can outlive its backing bytes; `has` and `get_size` answer
/// from the index alone.
pub struct RemoteManager {
    ds: Arc<dyn Datastore>,
    source: Arc<dyn RemoteSource>,
}

impl RemoteManager {
    pub fn new(ds: Arc<dyn Datastore>, source: Arc<dyn RemoteSource>) -> Self {
        Self { ds, source }
    }

    pub fn source(&self) -> Arc<dyn RemoteSource> {
        self.source.clone()
    }

    /// Store the reference record for a leaf. Does not validate that the
    /// reference resolves; an existing record for the same multihash is
    /// overwritten.
    pub async fn put(&self, leaf: &RemoteLeaf) -> StoreResult<()> {
        let (key, value) = Self::record_entry(leaf);
        self.ds.put(&key, value).await
    }

    /// Batch variant of [`put`](Self::put); records land in one atomic batch
    /// of the underlying datastore.
    pub async fn put_many(&self, leaves: &[RemoteLeaf]) -> StoreResult<()> {
        let entries = leaves.iter().map(Self::record_entry).collect();
        self.ds.put_many(entries).await
    }

    fn record_entry(leaf: &RemoteLeaf) -> (String, Vec<u8>) {
        let record = ReferenceRecord::new(
            to_slash(&leaf.path),
            leaf.offset,
            leaf.data.len() as u64,
        );
        (record_key(leaf.cid.hash()), record.encode_bytes())
    }

    /// Existence check on the record key alone. May answer true for a
    /// reference whose backing bytes are gone.
    pub async fn has(&self, cid: &Cid) -> StoreResult<bool> {
        self.ds.has(&record_key(cid.hash())).await
    }

    /// Size stored in the record, without touching the source. A record
    /// that cannot be decoded reports a corrupt reference, same as `get`.
    pub async fn get_size(&self, cid: &Cid) -> StoreResult<u64> {
        let record = self.get_record(cid).await.map_err(|e| {
            if e.is_not_found() {
                e
            } else {
                as_other_error(e)
            }
        })?;
        record.size().map_err(as_other_error)
    }

    /// Fetch the record, stream the referenced bytes, and verify them
    /// against the requested CID before returning.
    ///
    /// Everything that can go wrong here other than a missing record is
    /// reported as a corrupt reference; the sub-code says what happened to
    /// the backing bytes.
    pub async fn get(&self, cid: &Cid) -> StoreResult<Block> {
        let record = self.get_record(cid).await.map_err(|e| {
            if e.is_not_found() {
                e
            } else {
                as_other_error(e)
            }
        })?;
        let data = self.read_record(cid, &record).await?;
        Ok(Block::new(*cid, data))
    }

    /// Delete the record. The referenced bytes are not touched.
    pub async fn delete_block(&self, cid: &Cid) -> StoreResult<()> {
        self.ds.delete(&record_key(cid.hash())).await.map_err(|e| {
            if e.is_not_found() {
                StoreError::NotFound(format!("block not found: {}", cid))
            } else {
                e
            }
        })
    }

    /// Keys-only scan of the reference index on a bounded channel. Each key
    /// is reconstructed as a raw-codec CIDv1; undecodable keys are logged
    /// and skipped. The producer closes the channel on exhaustion or when
    /// `cancel` fires.
    pub async fn all_keys_chan(
        &self,
        cancel: CancellationToken,
    ) -> StoreResult<mpsc::Receiver<Cid>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled("reference index scan".to_string()));
        }

        let keys = self.ds.query_keys(REMOTESTORE_PREFIX).await?;
        let (tx, rx) = mpsc::channel(KEYS_CHAN_BUF_SIZE);

        tokio::spawn(async move {
            for key in keys {
                let mh = match key_to_multihash(&key) {
                    Ok(mh) => mh,
                    Err(e) => {
                        warn!("decoding cid from remote store key {}: {}", key, e);
                        continue;
                    }
                };
                let cid = Cid::new_v1(RAW_CODEC, mh);

                tokio::select! {
                    sent = tx.send(cid) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn get_record(&self, cid: &Cid) -> StoreResult<ReferenceRecord> {
        let bytes = self
            .ds
            .get(&record_key(cid.hash()))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    StoreError::NotFound(format!("block not found: {}", cid))
                } else {
                    e
                }
            })?;
        ReferenceRecord::decode_bytes(&bytes)
    }

    async fn read_record(&self, cid: &Cid, record: &ReferenceRecord) -> StoreResult<Vec<u8>> {
        let path = from_slash(record.path().map_err(as_other_error)?);
        let offset = record.offset().map_err(as_other_error)?;
        let size = record.size().map_err(as_other_error)?;

        let mut reader = self
            .source
            .get_part(&path, offset, size)
            .await
            .map_err(classify_source_error)?;

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    StoreError::CorruptReference(ReferenceStatus::FileChanged, e.to_string())
                } else {
                    StoreError::CorruptReference(ReferenceStatus::FileError, e.to_string())
                }
            })?;
            if n == 0 {
                return Err(StoreError::CorruptReference(
                    ReferenceStatus::FileChanged,
                    format!(
                        "short read: got {} of {} bytes from {} offset {}",
                        filled, size, path, offset
                    ),
                ));
            }
            filled += n;
        }

        let computed = cid_with_prefix_of(cid, &buf).map_err(as_other_error)?;
        if computed != *cid {
            return Err(StoreError::CorruptReference(
                ReferenceStatus::FileChanged,
                format!("data in file did not match: {} offset {}", path, offset),
            ));
        }

        Ok(buf)
    }
}

/// Read-path classification: pre-classified corrupt references pass through,
/// a vanished object reports `FileNotFound`, an impossible range means the
/// object shrank, policy rejections are `OtherError`, and the rest is
/// transport-level `FileError`. Raw source errors never leave the manager.
fn classify_source_error(err: StoreError) -> StoreError {
    match err {
        StoreError::CorruptReference(_, _) => err,
        StoreError::NotFound(msg) => {
            StoreError::CorruptReference(ReferenceStatus::FileNotFound, msg)
        }
        StoreError::InvalidRange(msg) => {
            StoreError::CorruptReference(ReferenceStatus::FileChanged, msg)
        }
        StoreError::AccessDenied(msg) => {
            StoreError::CorruptReference(ReferenceStatus::OtherError, msg)
        }
        other => StoreError::CorruptReference(ReferenceStatus::FileError, other.to_string()),
    }
}

fn as_other_error(err: StoreError) -> StoreError {
    StoreError::CorruptReference(ReferenceStatus::OtherError, err.to_string())
}
