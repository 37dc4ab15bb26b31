//! Process-wide memoization cache for compiled validators
//!
//! Keyed by (schema fingerprint, configuration identity). Entries live for
//! the process lifetime and are never evicted; `reset` exists for test
//! harnesses that need to force recompilation. The cache lock is not held
//! while a validator compiles, so two threads racing on the same key may
//! both compute — the first insert wins and the duplicate is discarded,
//! which is a benign race.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::validator::Validator;

/// Cache key: schema fingerprint plus interned-configuration identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub fingerprint: Fingerprint,
    pub config: usize,
}

/// Counters exposed for tests and the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct ValidatorCache {
    entries: HashMap<CacheKey, Validator>,
    hits: u64,
    misses: u64,
}

static CACHE: Lazy<Mutex<ValidatorCache>> = Lazy::new(|| Mutex::new(ValidatorCache::default()));

fn lock() -> std::sync::MutexGuard<'static, ValidatorCache> {
    CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Return the cached validator for `key`, or invoke `compute` and store its
/// result. A compile error is returned as-is and nothing is cached, so a
/// permanently failing schema fails on every attempt rather than caching a
/// poisoned entry.
pub(crate) fn get_or_compile(
    key: CacheKey,
    compute: impl FnOnce() -> Result<Validator>,
) -> Result<Validator> {
    {
        let mut cache = lock();
        if let Some(hit) = cache.entries.get(&key) {
            let hit = hit.clone();
            cache.hits += 1;
            tracing::debug!(fingerprint = %key.fingerprint, "validator cache hit");
            return Ok(hit);
        }
        cache.misses += 1;
    }

    let computed = compute()?;

    let mut cache = lock();
    // keep the first artifact if another thread raced us here
    Ok(cache
        .entries
        .entry(key)
        .or_insert(computed)
        .clone())
}

/// Current cache counters
pub fn stats() -> CacheStats {
    let cache = lock();
    CacheStats {
        entries: cache.entries.len(),
        hits: cache.hits,
        misses: cache.misses,
    }
}

/// Drop every cached validator and flattening result, forcing the next
/// compile of any schema to run the full pipeline. Intended for tests.
pub fn reset() {
    {
        let mut cache = lock();
        cache.entries.clear();
        cache.hits = 0;
        cache.misses = 0;
    }
    crate::compiler::union::reset_flatten_cache();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckConfig;
    use crate::schema::{SchemaNode, TypeId};

    fn key_for(text: &str) -> CacheKey {
        CacheKey {
            fingerprint: Fingerprint::from_text(text),
            config: 0,
        }
    }

    #[test]
    fn test_compute_runs_once_per_key() {
        let config = CheckConfig::default_shared();
        let schema = SchemaNode::leaf(TypeId::Bool);
        let mut calls = 0;

        let first = get_or_compile(key_for("cache_unit_once"), || {
            calls += 1;
            crate::compiler::compile(&schema, &config)
        })
        .unwrap();
        let second = get_or_compile(key_for("cache_unit_once"), || {
            calls += 1;
            crate::compiler::compile(&schema, &config)
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert!(first.shares_program(&second));
    }

    #[test]
    fn test_errors_are_not_cached() {
        let mut calls = 0;
        for _ in 0..2 {
            let result = get_or_compile(key_for("cache_unit_err"), || {
                calls += 1;
                Err(crate::error::ConformError::Internal("boom".to_string()))
            });
            assert!(result.is_err());
        }
        assert_eq!(calls, 2);
    }
}
