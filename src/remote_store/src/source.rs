use crate::StoreResult;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Boxed byte stream handed out by a source. The caller owns it; dropping it
/// releases the underlying handle.
pub type SourceReader = Pin<Box<dyn AsyncRead + Unpin + Send>>;

/// Random-access byte source keyed by a string path.
///
/// Implementations are stateless after construction and every call returns an
/// independent stream.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Open the whole object. Returns the stream and its exact byte length.
    async fn get(&self, key: &str) -> StoreResult<(SourceReader, u64)>;

    /// Open the byte range `[offset, offset + size)`. The stream yields at
    /// most `size` bytes and then signals end-of-stream.
    async fn get_part(&self, key: &str, offset: u64, size: u64) -> StoreResult<SourceReader>;
}
