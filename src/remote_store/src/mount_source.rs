use crate::{RemoteSource, SourceReader, StoreError, StoreResult};
use async_trait::async_trait;
use std::sync::Arc;

/// One mount point: every key under `prefix` is served by `source` with the
/// prefix stripped.
#[derive(Clone)]
pub struct Mount {
    pub prefix: String,
    pub source: Arc<dyn RemoteSource>,
}

/// Dispatches source calls to the mount with the longest matching prefix.
///
/// Mounts are sorted lexicographically descending at construction, which
/// orders longer prefixes first; the scan picks the first ancestor match.
/// Identical prefixes keep construction order (the sort is stable).
pub struct MountSource {
    mounts: Vec<Mount>,
}

impl MountSource {
    pub fn new(mounts: Vec<Mount>) -> Self {
        let mut mounts: Vec<Mount> = mounts
            .into_iter()
            .map(|m| Mount {
                prefix: normalize_key(&m.prefix),
                source: m.source,
            })
            .collect();
        mounts.sort_by(|a, b| b.prefix.cmp(&a.prefix));
        Self { mounts }
    }

    fn lookup(&self, key: &str) -> StoreResult<(&Mount, String)> {
        let key = normalize_key(key);
        for mount in &self.mounts {
            if is_ancestor_or_equal(&mount.prefix, &key) {
                return Ok((mount, strip_prefix(&mount.prefix, &key)));
            }
        }
        Err(StoreError::NotFound(format!("no mount for key: {}", key)))
    }
}

#[async_trait]
impl RemoteSource for MountSource {
    async fn get(&self, key: &str) -> StoreResult<(SourceReader, u64)> {
        let (mount, rest) = self.lookup(key)?;
        mount.source.get(&rest).await
    }

    async fn get_part(&self, key: &str, offset: u64, size: u64) -> StoreResult<SourceReader> {
        let (mount, rest) = self.lookup(key)?;
        mount.source.get_part(&rest, offset, size).await
    }
}

fn normalize_key(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn is_ancestor_or_equal(prefix: &str, key: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    key == prefix || key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/')
}

fn strip_prefix(prefix: &str, key: &str) -> String {
    if prefix == "/" {
        return key.to_string();
    }
    let rest = &key[prefix.len()..];
    if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    }
}
