use crate::error::{QuernError, Result};
use once_cell::sync::Lazy;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static GLOBAL: Lazy<MemoryBudget> = Lazy::new(|| MemoryBudget::new(BudgetConfig::from_env()));

/// The process-wide budget, sized from the environment on first use.
/// Managers created through [`crate::IndexManager::new`] share it.
pub fn global() -> &'static MemoryBudget {
    &GLOBAL
}

/// Process-wide memory limits for writers.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub max_buffer_mb: usize,
    pub max_concurrent_writers: usize,
    pub max_doc_mb: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            max_buffer_mb: 32,
            max_concurrent_writers: 40,
            max_doc_mb: 3,
        }
    }
}

impl BudgetConfig {
    pub fn from_env() -> Self {
        let default = BudgetConfig::default();
        BudgetConfig {
            max_buffer_mb: env_usize("QUERN_MAX_BUFFER_MB", default.max_buffer_mb),
            max_concurrent_writers: env_usize(
                "QUERN_MAX_CONCURRENT_WRITERS",
                default.max_concurrent_writers,
            ),
            max_doc_mb: env_usize("QUERN_MAX_DOC_MB", default.max_doc_mb),
        }
    }
}

fn env_usize(var: &str, default: usize) -> usize {
    env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Admission control for writers, shared across all tenants.
///
/// The live counters (`active_writers`, `buffered_bytes`) are the only state
/// mutated across tenant boundaries and use atomics, never a cross-tenant
/// lock. A writer slot is held by a [`WriterGuard`] and released on drop.
pub struct MemoryBudget {
    max_buffer_bytes: usize,
    max_concurrent_writers: usize,
    max_doc_bytes: usize,
    active_writers: Arc<AtomicUsize>,
    buffered_bytes: Arc<AtomicUsize>,
}

impl MemoryBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self::with_limits(
            config.max_buffer_mb * 1024 * 1024,
            config.max_concurrent_writers,
            config.max_doc_mb * 1024 * 1024,
        )
    }

    /// Byte-granular constructor, mainly for tests and embedded callers.
    pub fn with_limits(
        max_buffer_bytes: usize,
        max_concurrent_writers: usize,
        max_doc_bytes: usize,
    ) -> Self {
        MemoryBudget {
            max_buffer_bytes,
            max_concurrent_writers,
            max_doc_bytes,
            active_writers: Arc::new(AtomicUsize::new(0)),
            buffered_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Claim a writer slot, or fail with `ResourceExhausted` at capacity.
    pub fn acquire_writer(&self) -> Result<WriterGuard> {
        let prev = self.active_writers.fetch_add(1, Ordering::SeqCst);
        if prev >= self.max_concurrent_writers {
            self.active_writers.fetch_sub(1, Ordering::SeqCst);
            return Err(QuernError::ResourceExhausted {
                active: prev,
                max: self.max_concurrent_writers,
            });
        }
        Ok(WriterGuard {
            active_writers: Arc::clone(&self.active_writers),
        })
    }

    pub fn validate_doc_size(&self, size: usize) -> Result<()> {
        if size > self.max_doc_bytes {
            return Err(QuernError::DocumentTooLarge {
                size,
                max: self.max_doc_bytes,
            });
        }
        Ok(())
    }

    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }

    pub fn max_doc_bytes(&self) -> usize {
        self.max_doc_bytes
    }

    pub fn active_writers(&self) -> usize {
        self.active_writers.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_writers(&self) -> usize {
        self.max_concurrent_writers
    }

    /// Aggregate bytes currently buffered across all writers.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn add_buffered(&self, bytes: usize) {
        self.buffered_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn release_buffered(&self, bytes: usize) {
        self.buffered_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

impl Clone for MemoryBudget {
    fn clone(&self) -> Self {
        MemoryBudget {
            max_buffer_bytes: self.max_buffer_bytes,
            max_concurrent_writers: self.max_concurrent_writers,
            max_doc_bytes: self.max_doc_bytes,
            active_writers: Arc::clone(&self.active_writers),
            buffered_bytes: Arc::clone(&self.buffered_bytes),
        }
    }
}

/// RAII hold on one writer slot.
#[derive(Debug)]
pub struct WriterGuard {
    active_writers: Arc<AtomicUsize>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.active_writers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_writers: usize) -> MemoryBudget {
        MemoryBudget::new(BudgetConfig {
            max_buffer_mb: 1,
            max_concurrent_writers: max_writers,
            max_doc_mb: 1,
        })
    }

    #[test]
    fn writer_slots_are_bounded() {
        let b = budget(2);
        let g1 = b.acquire_writer().unwrap();
        let _g2 = b.acquire_writer().unwrap();
        assert_eq!(b.active_writers(), 2);

        let err = b.acquire_writer().unwrap_err();
        assert!(matches!(err, QuernError::ResourceExhausted { .. }));
        assert_eq!(b.active_writers(), 2);

        drop(g1);
        assert_eq!(b.active_writers(), 1);
        let _g3 = b.acquire_writer().unwrap();
    }

    #[test]
    fn doc_size_validation() {
        let b = budget(1);
        assert!(b.validate_doc_size(1024).is_ok());
        let err = b.validate_doc_size(2 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, QuernError::DocumentTooLarge { .. }));
    }

    #[test]
    fn buffered_bytes_counter() {
        let b = budget(1);
        b.add_buffered(512);
        b.add_buffered(256);
        assert_eq!(b.buffered_bytes(), 768);
        b.release_buffered(768);
        assert_eq!(b.buffered_bytes(), 0);
    }
}
