// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed JSON configuration trees.
//!
//! The backend's config is one JSON document; instances see an ordered
//! stack of three trees (map-specific, queue, global fallback) and every
//! lookup walks the stack first-match. [`overlay_get`] is that walk.

use rand::Rng;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A keyed configuration tree with path-based getters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conf(Value);

impl Conf {
    pub fn new() -> Self {
        Conf(Value::Object(serde_json::Map::new()))
    }

    pub fn from_value(v: Value) -> Self {
        Conf(v)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let v = serde_json::from_str(&text).map_err(|source| ConfError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Conf(v))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn node(&self, path: &[&str]) -> Option<&Value> {
        let mut cur = &self.0;
        for key in path {
            cur = cur.as_object()?.get(*key)?;
        }
        Some(cur)
    }

    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.node(path)?.as_str()
    }

    pub fn get_string(&self, path: &[&str]) -> Option<String> {
        self.get_str(path).map(str::to_owned)
    }

    pub fn get_i64(&self, path: &[&str]) -> Option<i64> {
        self.node(path)?.as_i64()
    }

    pub fn get_bool(&self, path: &[&str]) -> Option<bool> {
        self.node(path)?.as_bool()
    }

    pub fn get_string_vec(&self, path: &[&str]) -> Option<Vec<String>> {
        let arr = self.node(path)?.as_array()?;
        arr.iter().map(|v| v.as_str().map(str::to_owned)).collect()
    }

    pub fn get_i64_vec(&self, path: &[&str]) -> Option<Vec<i64>> {
        let arr = self.node(path)?.as_array()?;
        arr.iter().map(Value::as_i64).collect()
    }

    /// The object at `path`, cloned.
    pub fn get_object(&self, path: &[&str]) -> Option<serde_json::Map<String, Value>> {
        self.node(path)?.as_object().cloned()
    }

    /// Keys of the object at `path`, in document order.
    pub fn keys(&self, path: &[&str]) -> Option<Vec<String>> {
        let obj = self.node(path)?.as_object()?;
        Some(obj.keys().cloned().collect())
    }

    /// A deep copy of the subtree at `path`. Missing paths yield an
    /// empty tree so overlay stacks always have a fixed shape.
    pub fn subtree(&self, path: &[&str]) -> Conf {
        match self.node(path) {
            Some(v) => Conf(v.clone()),
            None => Conf::new(),
        }
    }

    /// Pick one number from a comma-separated list stored at `path`,
    /// e.g. `"0,1,2"`. Unparsable entries are skipped.
    pub fn pick_number(&self, path: &[&str]) -> Option<i64> {
        let raw = self.get_str(path)?;
        let vals: Vec<i64> = raw.split(',').filter_map(|s| s.trim().parse().ok()).collect();
        if vals.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..vals.len());
        Some(vals[idx])
    }
}

/// Walk an overlay stack first-match: the first tree for which `get`
/// yields a value wins.
pub fn overlay_get<T>(cfgs: &[Conf], get: impl Fn(&Conf) -> Option<T>) -> Option<T> {
    cfgs.iter().find_map(get)
}

/// [`overlay_get`] with a default for the all-miss case.
pub fn overlay_get_or<T>(cfgs: &[Conf], get: impl Fn(&Conf) -> Option<T>, default: T) -> T {
    overlay_get(cfgs, get).unwrap_or(default)
}

#[cfg(test)]
#[path = "conf_tests.rs"]
mod tests;
