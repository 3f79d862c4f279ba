use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no API key configured (set {primary} or {fallback})")]
    Missing {
        primary: &'static str,
        fallback: &'static str,
    },
    #[error("API key configuration contains no usable key")]
    Empty,
}

/// Split a configured key string into individual keys.
///
/// The string is split on `,` only when it contains one. Every piece is
/// trimmed, stripped of any run of surrounding double quotes, and dropped when
/// nothing is left.
pub fn parse_keys(raw: &str) -> Vec<String> {
    let pieces: Vec<&str> = if raw.contains(',') {
        raw.split(',').collect()
    } else {
        vec![raw]
    };
    pieces
        .into_iter()
        .map(|piece| piece.trim().trim_matches('"').trim())
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Loggable form of a key: first four and last four characters.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub size: usize,
    pub cursor: usize,
    pub failed: Vec<usize>,
}

#[derive(Debug, Default)]
struct Rotation {
    cursor: usize,
    failed: BTreeSet<usize>,
}

/// Ordered API keys with a round-robin cursor and a set of keys currently
/// considered failed.
///
/// Keys never change after construction. `cursor` and `failed` sit behind one
/// mutex; every method holds it only for the pointer/set update, never across
/// an upstream call.
#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<String>,
    rotation: Mutex<Rotation>,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Result<Self, PoolError> {
        if keys.is_empty() {
            return Err(PoolError::Empty);
        }
        Ok(Self {
            keys,
            rotation: Mutex::new(Rotation::default()),
        })
    }

    pub fn from_raw(raw: &str) -> Result<Self, PoolError> {
        Self::new(parse_keys(raw))
    }

    /// Reads `primary`, then `fallback`. An unset or blank `primary` falls
    /// through to `fallback`.
    pub fn from_env(primary: &'static str, fallback: &'static str) -> Result<Self, PoolError> {
        let raw = [primary, fallback]
            .into_iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
            .ok_or(PoolError::Missing { primary, fallback })?;
        Self::from_raw(&raw)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    /// First index at or after the cursor (wrapping) that is not failed; the
    /// cursor moves there. When every key is failed the failed set is cleared
    /// and index 0 is returned.
    pub fn next_available(&self) -> (usize, String) {
        let len = self.keys.len();
        let mut rotation = self.lock();

        let found = (0..len)
            .map(|offset| (rotation.cursor + offset) % len)
            .find(|index| !rotation.failed.contains(index));

        let index = match found {
            Some(index) => index,
            None => {
                warn!(
                    event = "key_pool.reset",
                    size = len,
                    "all keys marked failed; clearing failed set"
                );
                rotation.failed.clear();
                0
            }
        };
        rotation.cursor = index;
        (index, self.keys[index].clone())
    }

    /// Idempotent. Does not move the cursor. Out-of-range indices are ignored.
    pub fn mark_failed(&self, index: usize) {
        self.mark_failed_and_check(index);
    }

    /// Marks `index` failed and reports whether the whole pool is now failed,
    /// in one critical section.
    pub fn mark_failed_and_check(&self, index: usize) -> bool {
        let len = self.keys.len();
        let mut rotation = self.lock();
        if index < len && rotation.failed.insert(index) {
            info!(
                event = "key_pool.mark_failed",
                index,
                key = %mask_key(&self.keys[index]),
                failed = rotation.failed.len(),
                size = len,
                "key marked failed"
            );
        }
        rotation.failed.len() >= len
    }

    /// Round-robin step after a successful call.
    pub fn advance(&self) {
        let len = self.keys.len();
        let mut rotation = self.lock();
        rotation.cursor = (rotation.cursor + 1) % len;
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock().failed.len() >= self.keys.len()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let rotation = self.lock();
        PoolSnapshot {
            size: self.keys.len(),
            cursor: rotation.cursor,
            failed: rotation.failed.iter().copied().collect(),
        }
    }

    // Every critical section leaves `Rotation` consistent, so a poisoned lock
    // is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Rotation> {
        self.rotation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
