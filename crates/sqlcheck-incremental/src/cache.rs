//! Fingerprint-keyed answer cache with per-pass replacement

use std::collections::HashMap;

/// Hit/miss counters of the last completed pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries held after the pass
    pub entries: usize,

    pub hits: usize,
    pub misses: usize,
}

impl CacheStats {
    /// Share of lookups answered from the previous pass (1.0 when nothing was looked up)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            1.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Answers of the previous pass, keyed by fingerprint
///
/// The fingerprint of a query is its substituted SQL text plus the canonical
/// rendering of its expected columns; views are keyed by generated name.
#[derive(Debug, Clone)]
pub struct ValidationCache<T> {
    entries: HashMap<String, T>,
    stats: CacheStats,
}

impl<T> Default for ValidationCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<T: Clone> ValidationCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&T> {
        self.entries.get(fingerprint)
    }

    pub fn set(&mut self, fingerprint: impl Into<String>, answer: T) {
        self.entries.insert(fingerprint.into(), answer);
    }

    /// Drop every entry, e.g. after the schema was replayed
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = CacheStats::default();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Start building the cache for the next pass
    pub fn begin_pass(&self) -> CachePass<'_, T> {
        CachePass {
            previous: self,
            next: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}

/// A cache under construction for one pass
///
/// Lookups consult the previous cache; `record` writes into the new one.
pub struct CachePass<'a, T> {
    previous: &'a ValidationCache<T>,
    next: HashMap<String, T>,
    hits: usize,
    misses: usize,
}

impl<'a, T: Clone> CachePass<'a, T> {
    /// Answer recorded for `fingerprint` earlier in this pass or in the previous one
    pub fn lookup(&mut self, fingerprint: &str) -> Option<T> {
        let found = self
            .next
            .get(fingerprint)
            .or_else(|| self.previous.get(fingerprint))
            .cloned();

        match found {
            Some(answer) => {
                tracing::debug!(fingerprint = %abbreviate(fingerprint), "cache hit");
                self.hits += 1;
                Some(answer)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn record(&mut self, fingerprint: impl Into<String>, answer: T) {
        self.next.insert(fingerprint.into(), answer);
    }

    /// Carry an entry of the previous pass over without counting a lookup
    pub fn carry_over(&mut self, fingerprint: &str) -> bool {
        match self.previous.get(fingerprint) {
            Some(answer) => {
                self.next.insert(fingerprint.to_string(), answer.clone());
                true
            }
            None => false,
        }
    }

    /// The cache that replaces the previous one
    pub fn finish(self) -> ValidationCache<T> {
        let stats = CacheStats {
            entries: self.next.len(),
            hits: self.hits,
            misses: self.misses,
        };

        tracing::debug!(
            entries = stats.entries,
            hits = stats.hits,
            misses = stats.misses,
            "validation cache pass finished"
        );

        ValidationCache {
            entries: self.next,
            stats,
        }
    }
}

/// First line of a fingerprint, for logs
fn abbreviate(fingerprint: &str) -> &str {
    let line = fingerprint.lines().next().unwrap_or_default();
    match line.char_indices().nth(60) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}
