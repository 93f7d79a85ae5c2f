// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Map-blob store: local directory cache, fetch-on-miss from the maps
//! database.

use async_trait::async_trait;
#[cfg(any(test, feature = "test-support"))]
use parking_lot::Mutex;
#[cfg(any(test, feature = "test-support"))]
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("map fetch request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("writing map cache: {0}")]
    Io(#[from] std::io::Error),
    #[error("map {0} not available")]
    NotAvailable(String),
}

#[async_trait]
pub trait MapStore: Send + Sync {
    /// Bytes of the `.wz` map blob for `hash`.
    async fn fetch(&self, hash: &str) -> Result<Vec<u8>, MapError>;
}

pub struct HttpMapStore {
    root: PathBuf,
    /// Download URL with a `%s` placeholder for the map hash.
    url_fmt: String,
    client: reqwest::Client,
}

impl HttpMapStore {
    pub fn new(root: PathBuf, url_fmt: String) -> HttpMapStore {
        HttpMapStore { root, url_fmt, client: reqwest::Client::new() }
    }

    fn cache_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.wz"))
    }
}

#[async_trait]
impl MapStore for HttpMapStore {
    async fn fetch(&self, hash: &str) -> Result<Vec<u8>, MapError> {
        let path = self.cache_path(hash);
        match tokio::fs::read(&path).await {
            Ok(blob) => return Ok(blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let url = self.url_fmt.replace("%s", hash);
        let rsp = self.client.get(&url).send().await?.error_for_status()?;
        let blob = rsp.bytes().await?.to_vec();

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, &blob).await?;
        Ok(blob)
    }
}

/// In-memory blobs for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakeMapStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeMapStore {
    pub fn new() -> FakeMapStore {
        FakeMapStore::default()
    }

    pub fn insert(&self, hash: &str, blob: Vec<u8>) {
        self.blobs.lock().insert(hash.to_string(), blob);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl MapStore for FakeMapStore {
    async fn fetch(&self, hash: &str) -> Result<Vec<u8>, MapError> {
        self.blobs
            .lock()
            .get(hash)
            .cloned()
            .ok_or_else(|| MapError::NotAvailable(hash.to_string()))
    }
}

#[cfg(test)]
#[path = "maps_tests.rs"]
mod tests;
