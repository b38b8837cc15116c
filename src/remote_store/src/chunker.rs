use crate::{SourceReader, StoreError, StoreResult};
use tokio::io::AsyncReadExt;

/// Chunk size used by the `"default"` descriptor.
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Fixed-size splitter built from a chunker descriptor string.
///
/// Recognized descriptors: `"default"` (256 KiB) and `"size-<n>"` for a
/// fixed `n` bytes per chunk.
pub struct Chunker {
    size: u64,
}

impl Chunker {
    pub fn from_descriptor(desc: &str) -> StoreResult<Self> {
        if desc.is_empty() || desc == "default" {
            return Ok(Self {
                size: DEFAULT_CHUNK_SIZE,
            });
        }

        if let Some(n) = desc.strip_prefix("size-") {
            let size: u64 = n
                .parse()
                .map_err(|_| StoreError::InvalidParam(format!("invalid chunker size: {}", n)))?;
            if size == 0 {
                return Err(StoreError::InvalidParam(
                    "chunker size must be positive".to_string(),
                ));
            }
            return Ok(Self { size });
        }

        Err(StoreError::InvalidParam(format!(
            "unknown chunker: {}",
            desc
        )))
    }

    pub fn chunk_size(&self) -> u64 {
        self.size
    }

    /// Read the next chunk off `reader`. Every chunk is full-sized except
    /// the last; `None` once the stream is exhausted.
    pub async fn next_chunk(&self, reader: &mut SourceReader) -> StoreResult<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.size as usize];
        let mut filled = 0usize;

        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}
