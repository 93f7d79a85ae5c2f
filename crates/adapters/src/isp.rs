// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ISP/proxy lookup with a persistent JSON cache.
//!
//! Lookup failures never reject a client; the admission pipeline logs
//! and moves on.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum IspError {
    #[error("isp lookup request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ip api returned status {status}: {body}")]
    Api { status: String, body: String },
    #[error("no fake response configured for {0}")]
    NoFakeResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IspInfo {
    pub is_proxy: bool,
    pub asn: String,
}

#[async_trait]
pub trait IspCheck: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<IspInfo, IspError>;
}

/// ip-api.com response subset.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    asname: String,
    #[serde(default)]
    proxy: bool,
}

pub struct HttpIspChecker {
    client: reqwest::Client,
    /// Lookup URL with a `%s` placeholder for the client address.
    url_fmt: String,
    cache_path: PathBuf,
    cache: Mutex<HashMap<String, IspInfo>>,
}

impl HttpIspChecker {
    pub fn new(
        url_fmt: String,
        cache_path: PathBuf,
        timeout: Duration,
    ) -> Result<HttpIspChecker, IspError> {
        let cache = match std::fs::read(&cache_path) {
            Ok(body) => serde_json::from_slice(&body).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpIspChecker { client, url_fmt, cache_path, cache: Mutex::new(cache) })
    }

    fn save_cache(&self, cache: &HashMap<String, IspInfo>) {
        match serde_json::to_vec(cache) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&self.cache_path, body) {
                    tracing::warn!(error = %e, "failed to save isp cache");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize isp cache"),
        }
    }
}

#[async_trait]
impl IspCheck for HttpIspChecker {
    async fn lookup(&self, ip: &str) -> Result<IspInfo, IspError> {
        if let Some(hit) = self.cache.lock().get(ip) {
            return Ok(hit.clone());
        }

        let url = self.url_fmt.replace("%s", ip);
        let rsp: ApiResponse = self.client.get(&url).send().await?.json().await?;
        if rsp.status != "success" {
            return Err(IspError::Api { status: rsp.status, body: url });
        }
        let info = IspInfo { is_proxy: rsp.proxy, asn: rsp.asname };

        let snapshot = {
            let mut cache = self.cache.lock();
            cache.insert(ip.to_string(), info.clone());
            cache.clone()
        };
        self.save_cache(&snapshot);
        Ok(info)
    }
}

/// Canned lookup results for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakeIsp {
    responses: Mutex<HashMap<String, IspInfo>>,
    fallback: Mutex<Option<IspInfo>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeIsp {
    pub fn new() -> FakeIsp {
        FakeIsp::default()
    }

    /// A fake that answers every lookup with a clean residential ISP.
    pub fn clean() -> FakeIsp {
        let fake = FakeIsp::default();
        fake.set_fallback(IspInfo { is_proxy: false, asn: "AS0000 Residential".into() });
        fake
    }

    pub fn set(&self, ip: &str, info: IspInfo) {
        self.responses.lock().insert(ip.to_string(), info);
    }

    pub fn set_fallback(&self, info: IspInfo) {
        *self.fallback.lock() = Some(info);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl IspCheck for FakeIsp {
    async fn lookup(&self, ip: &str) -> Result<IspInfo, IspError> {
        if let Some(info) = self.responses.lock().get(ip) {
            return Ok(info.clone());
        }
        self.fallback
            .lock()
            .clone()
            .ok_or_else(|| IspError::NoFakeResponse(ip.to_string()))
    }
}

#[cfg(test)]
#[path = "isp_tests.rs"]
mod tests;
