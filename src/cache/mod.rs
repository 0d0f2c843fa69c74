//! Multi-tier transcription result cache
//!
//! Repeated or near-identical utterances skip the transcriber entirely.
//! Three tiers share the same entries: an exact tier keyed by audio content
//! hash (strict LRU), a similarity tier scanned linearly over fingerprints,
//! and a common-phrase tier that frequency-promoted texts graduate into,
//! exempt from LRU churn.
//!
//! All mutation happens behind an internal mutex; callers never touch the
//! maps, and the lock is never held across an await point.

mod fingerprint;

pub use fingerprint::AudioFingerprint;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::text::similarity_ratio;
use crate::{Error, Result};

/// Minimum character-level ratio for a phrase-text match
const PHRASE_MATCH_RATIO: f32 = 0.6;

/// Cache hit/miss counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently in the exact tier
    pub entries: usize,
    /// Entries currently in the common-phrase tier
    pub common_phrases: usize,
    /// Exact-hash hits
    pub exact_hits: u64,
    /// Fingerprint-similarity hits
    pub similarity_hits: u64,
    /// Phrase-text hits
    pub phrase_hits: u64,
    /// Lookups that missed every tier
    pub misses: u64,
    /// Total insertions
    pub insertions: u64,
    /// LRU evictions from the exact tier
    pub evictions: u64,
}

/// One cached transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    text: String,
    fingerprint: AudioFingerprint,
}

/// A frequency-promoted phrase, exempt from LRU eviction
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommonPhrase {
    text: String,
    fingerprint: AudioFingerprint,
    frequency: u32,
}

/// Serialized cache snapshot for warm restarts
#[derive(Serialize, Deserialize)]
struct CacheSnapshot {
    saved_at: chrono::DateTime<chrono::Utc>,
    /// Exact-tier entries, most-recently-used first
    entries: Vec<(String, CacheEntry)>,
    phrase_frequencies: HashMap<String, u32>,
    common: Vec<CommonPhrase>,
    stats: CacheStats,
}

struct CacheInner {
    exact: LruCache<[u8; 32], CacheEntry>,
    phrase_frequencies: HashMap<String, u32>,
    common: Vec<CommonPhrase>,
    stats: CacheStats,
    lookups_since_persist: u64,
}

/// Maps audio characteristics to previously computed transcripts
pub struct TranscriptionCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

impl TranscriptionCache {
    /// Create an empty cache
    ///
    /// `config.max_entries` must be positive (enforced by config
    /// validation); a zero value falls back to capacity 1.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                exact: LruCache::new(capacity),
                phrase_frequencies: HashMap::new(),
                common: Vec::new(),
                stats: CacheStats::default(),
                lookups_since_persist: 0,
            }),
            config,
        }
    }

    /// Create a cache, reloading a persisted snapshot when configured
    ///
    /// A missing, unreadable, or corrupt snapshot degrades to an empty
    /// cache; startup never fails on cache state.
    #[must_use]
    pub fn load_or_default(config: CacheConfig) -> Self {
        let cache = Self::new(config.clone());

        if let Some(path) = &config.persist_path {
            if path.exists() {
                match cache.load_snapshot(path) {
                    Ok(entries) => {
                        tracing::info!(path = %path.display(), entries, "restored cache snapshot");
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "cache snapshot unreadable, starting empty"
                        );
                    }
                }
            }
        }

        cache
    }

    /// Look up a transcript for the given audio
    ///
    /// Order: exact content hash, then fingerprint similarity against both
    /// the exact and common tiers. A hit refreshes recency.
    #[must_use]
    pub fn lookup(&self, samples: &[f32], sample_rate: u32) -> Option<String> {
        let hash = hash_samples(samples);
        let result = self.lookup_inner(&hash, samples, sample_rate);
        self.persist_if_due();
        result
    }

    fn lookup_inner(&self, hash: &[u8; 32], samples: &[f32], sample_rate: u32) -> Option<String> {
        let mut inner = self.inner.lock().ok()?;
        inner.lookups_since_persist += 1;

        if let Some(entry) = inner.exact.get(hash) {
            let text = entry.text.clone();
            inner.stats.exact_hits += 1;
            tracing::debug!(hits = inner.stats.exact_hits, "exact cache hit");
            return Some(text);
        }

        let fingerprint = AudioFingerprint::compute(samples, sample_rate);

        let mut best: Option<(f32, Option<[u8; 32]>, String)> = None;
        for (key, entry) in inner.exact.iter() {
            if let Some(score) = fingerprint.similarity(&entry.fingerprint, &self.config) {
                if best.as_ref().is_none_or(|(b, _, _)| score > *b) {
                    best = Some((score, Some(*key), entry.text.clone()));
                }
            }
        }
        for phrase in &inner.common {
            if let Some(score) = fingerprint.similarity(&phrase.fingerprint, &self.config) {
                if best.as_ref().is_none_or(|(b, _, _)| score > *b) {
                    best = Some((score, None, phrase.text.clone()));
                }
            }
        }

        if let Some((score, key, text)) = best {
            if score >= self.config.similarity_threshold {
                if let Some(key) = key {
                    // Refresh recency of the matched exact-tier entry
                    let _ = inner.exact.get(&key);
                }
                inner.stats.similarity_hits += 1;
                tracing::debug!(score, "similarity cache hit");
                return Some(text);
            }
        }

        inner.stats.misses += 1;
        None
    }

    /// Find the nearest cached phrase by character-level similarity
    ///
    /// Used for seeding context, not for final results.
    #[must_use]
    pub fn lookup_by_text(&self, text: &str) -> Option<String> {
        let mut inner = self.inner.lock().ok()?;

        let mut best: Option<(f32, String)> = None;
        for candidate in inner.phrase_frequencies.keys() {
            let ratio = similarity_ratio(text, candidate);
            if best.as_ref().is_none_or(|(b, _)| ratio > *b) {
                best = Some((ratio, candidate.clone()));
            }
        }

        let (ratio, phrase) = best?;
        if ratio >= PHRASE_MATCH_RATIO {
            inner.stats.phrase_hits += 1;
            Some(phrase)
        } else {
            None
        }
    }

    /// Record a successful transcription
    ///
    /// The entry lands in the exact tier under its content hash (evicting
    /// the least-recently-used entry and its fingerprint together when
    /// full), the text's frequency counter increments, and at the
    /// promotion threshold the text graduates into the common tier.
    pub fn insert(&self, samples: &[f32], sample_rate: u32, text: &str) {
        if text.is_empty() {
            return;
        }

        let hash = hash_samples(samples);
        let fingerprint = AudioFingerprint::compute(samples, sample_rate);

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        let entry = CacheEntry {
            text: text.to_string(),
            fingerprint: fingerprint.clone(),
        };
        if let Some((evicted_key, _)) = inner.exact.push(hash, entry) {
            if evicted_key != hash {
                inner.stats.evictions += 1;
                tracing::debug!("evicted least-recently-used cache entry");
            }
        }
        inner.stats.insertions += 1;

        let frequency = {
            let counter = inner
                .phrase_frequencies
                .entry(text.to_string())
                .or_insert(0);
            *counter += 1;
            *counter
        };

        if frequency >= self.config.promote_threshold {
            self.promote(&mut inner, text, fingerprint, frequency);
        }

        inner.stats.entries = inner.exact.len();
        inner.stats.common_phrases = inner.common.len();
    }

    fn promote(
        &self,
        inner: &mut CacheInner,
        text: &str,
        fingerprint: AudioFingerprint,
        frequency: u32,
    ) {
        if let Some(existing) = inner.common.iter_mut().find(|p| p.text == text) {
            existing.frequency = frequency;
        } else {
            tracing::debug!(text, frequency, "promoted to common phrases");
            inner.common.push(CommonPhrase {
                text: text.to_string(),
                fingerprint,
                frequency,
            });
        }

        // Common tier is capped independently; prune lowest frequencies
        let cap = (self.config.max_entries / 2).max(1);
        while inner.common.len() > cap {
            if let Some(lowest) = inner
                .common
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.frequency)
                .map(|(i, _)| i)
            {
                inner.common.remove(lowest);
            }
        }
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner
            .lock()
            .map(|mut inner| {
                inner.stats.entries = inner.exact.len();
                inner.stats.common_phrases = inner.common.len();
                inner.stats.clone()
            })
            .unwrap_or_default()
    }

    /// Number of exact-tier entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.exact.len()).unwrap_or(0)
    }

    /// Whether the exact tier is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a snapshot to `path`
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| Error::Cache("cache lock poisoned".to_string()))?;
            inner.stats.entries = inner.exact.len();
            inner.stats.common_phrases = inner.common.len();

            CacheSnapshot {
                saved_at: chrono::Utc::now(),
                entries: inner
                    .exact
                    .iter()
                    .map(|(k, v)| (hex::encode(k), v.clone()))
                    .collect(),
                phrase_frequencies: inner.phrase_frequencies.clone(),
                common: inner.common.clone(),
                stats: inner.stats.clone(),
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&snapshot)?;
        std::fs::write(path, json)?;

        tracing::debug!(path = %path.display(), entries = snapshot.entries.len(), "cache persisted");
        Ok(())
    }

    /// Persist to the configured path if one is set
    pub fn persist(&self) {
        if let Some(path) = &self.config.persist_path {
            if let Err(e) = self.save(path) {
                tracing::warn!(error = %e, "cache persistence failed");
            }
        }
    }

    fn persist_if_due(&self) {
        if self.config.persist_path.is_none() {
            return;
        }

        let due = self
            .inner
            .lock()
            .map(|mut inner| {
                if inner.lookups_since_persist >= self.config.persist_every {
                    inner.lookups_since_persist = 0;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if due {
            self.persist();
        }
    }

    fn load_snapshot(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: CacheSnapshot = serde_json::from_str(&content)?;

        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Cache("cache lock poisoned".to_string()))?;

        // Entries are stored MRU-first; insert in reverse so recency survives
        // the round trip
        for (hex_key, entry) in snapshot.entries.iter().rev() {
            let bytes = hex::decode(hex_key)
                .map_err(|e| Error::Cache(format!("bad hash in snapshot: {e}")))?;
            let key: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::Cache("bad hash length in snapshot".to_string()))?;
            inner.exact.push(key, entry.clone());
        }

        inner.phrase_frequencies = snapshot.phrase_frequencies;
        inner.common = snapshot.common;
        inner.stats = snapshot.stats;
        inner.stats.entries = inner.exact.len();
        inner.stats.common_phrases = inner.common.len();

        Ok(inner.exact.len())
    }
}

/// SHA-256 over the raw sample bytes
fn hash_samples(samples: &[f32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for sample in samples {
        hasher.update(sample.to_le_bytes());
    }
    hasher.finalize().into()
}
