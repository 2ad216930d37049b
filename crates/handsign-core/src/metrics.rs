//! Global atomic counters for handsign observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the CLI exits).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    bundles_extracted: AtomicU64,
    updates_published: AtomicU64,
    updates_rejected: AtomicU64,
    background_upload_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            bundles_extracted: AtomicU64::new(0),
            updates_published: AtomicU64::new(0),
            updates_rejected: AtomicU64::new(0),
            background_upload_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_misses", "counter incremented");
    }

    pub fn inc_bundles_extracted(&self) {
        self.bundles_extracted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "bundles_extracted", "counter incremented");
    }

    pub fn inc_updates_published(&self) {
        self.updates_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "updates_published", "counter incremented");
    }

    pub fn inc_updates_rejected(&self) {
        self.updates_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "updates_rejected", "counter incremented");
    }

    pub fn inc_background_upload_failures(&self) {
        self.background_upload_failures
            .fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "background_upload_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            cache_hits = self.cache_hits(),
            cache_misses = self.cache_misses(),
            bundles_extracted = self.bundles_extracted(),
            updates_published = self.updates_published(),
            updates_rejected = self.updates_rejected(),
            background_upload_failures = self.background_upload_failures(),
        );
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn bundles_extracted(&self) -> u64 {
        self.bundles_extracted.load(Ordering::Relaxed)
    }

    pub fn updates_published(&self) -> u64 {
        self.updates_published.load(Ordering::Relaxed)
    }

    pub fn updates_rejected(&self) -> u64 {
        self.updates_rejected.load(Ordering::Relaxed)
    }

    pub fn background_upload_failures(&self) -> u64 {
        self.background_upload_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.bundles_extracted.store(0, Ordering::Relaxed);
        self.updates_published.store(0, Ordering::Relaxed);
        self.updates_rejected.store(0, Ordering::Relaxed);
        self.background_upload_failures.store(0, Ordering::Relaxed);
    }
}
