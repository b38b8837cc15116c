use crate::{RemoteSource, SourceReader, StoreError, StoreResult};
use async_trait::async_trait;
use aws_sdk_s3::Client;

/// Source over an S3-compatible bucket. Ranged reads map straight onto HTTP
/// Range requests; nothing is retried here, upstream owns that.
pub struct S3Source {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Source {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self::with_prefix(client, bucket, "")
    }

    /// Build a source against an S3-compatible endpoint, with credentials
    /// taken from the environment.
    pub async fn connect(
        endpoint_url: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let conf = aws_config::ConfigLoader::default()
            .credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            )
            .region(aws_config::Region::new(region.into()))
            .endpoint_url(endpoint_url)
            .load()
            .await;
        Self::new(Client::new(&conf), bucket)
    }

    pub fn with_prefix(
        client: Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn s3_key(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }
}

#[async_trait]
impl RemoteSource for S3Source {
    async fn get(&self, key: &str) -> StoreResult<(SourceReader, u64)> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.s3_key(key))
            .send()
            .await
            .map_err(|e| map_get_error(key, e.into_service_error()))?;

        let size = output.content_length().unwrap_or(0).max(0) as u64;
        Ok((Box::pin(output.body.into_async_read()), size))
    }

    async fn get_part(&self, key: &str, offset: u64, size: u64) -> StoreResult<SourceReader> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.s3_key(key))
            .range(range_header(offset, size))
            .send()
            .await
            .map_err(|e| map_get_error(key, e.into_service_error()))?;

        Ok(Box::pin(output.body.into_async_read()))
    }
}

fn map_get_error(key: &str, err: aws_sdk_s3::operation::get_object::GetObjectError) -> StoreError {
    if err.is_no_such_key() {
        StoreError::NotFound(format!("s3 object not found: {}", key))
    } else {
        StoreError::Transport(format!("s3 get {} failed: {}", key, err))
    }
}

/// Inclusive range per HTTP semantics. The response may carry one byte past
/// the requested size; readers stop at the recorded size anyway.
fn range_header(offset: u64, size: u64) -> String {
    format!("bytes={}-{}", offset, offset + size)
}

fn join_key(prefix: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}
