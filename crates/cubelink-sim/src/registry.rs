use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::error::Result;

/// Process-unique cube identity. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CubeId(u64);

impl CubeId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CubeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

static GLOBAL: CubeRegistry = CubeRegistry::new();

/// Shared state for spawned cubes: the identity counter and the
/// one-time asset staging marker.
///
/// Safe to use from many threads; staging runs under a lock so concurrent
/// constructions wait for the first one to finish instead of staging twice.
#[derive(Debug)]
pub struct CubeRegistry {
    next_id: AtomicU64,
    staged: Mutex<bool>,
}

impl CubeRegistry {
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            staged: Mutex::new(false),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static CubeRegistry {
        &GLOBAL
    }

    /// Allocate the next identity.
    pub fn next_id(&self) -> CubeId {
        CubeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether staging has completed.
    pub fn is_staged(&self) -> bool {
        *self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `stage` unless a previous call already succeeded.
    ///
    /// Returns `true` when this call did the staging. A failed `stage` leaves
    /// the registry unstaged so the next caller tries again.
    pub fn ensure_staged<F>(&self, stage: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        if *staged {
            debug!("assets already staged");
            return Ok(false);
        }

        stage()?;
        *staged = true;
        info!("assets staged");
        Ok(true)
    }
}

impl Default for CubeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;
    use crate::error::SimError;

    #[test]
    fn ids_are_monotonic() {
        let registry = CubeRegistry::new();
        assert_eq!(registry.next_id().get(), 0);
        assert_eq!(registry.next_id().get(), 1);
        assert_eq!(registry.next_id().to_string(), "2");
    }

    #[test]
    fn ids_unique_across_threads() {
        let registry = Arc::new(CubeRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..100).map(|_| registry.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<_> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 800);
    }

    #[test]
    fn staging_runs_once() {
        let registry = CubeRegistry::new();
        let runs = AtomicUsize::new(0);
        let stage = || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        assert!(registry.ensure_staged(stage).unwrap());
        assert!(!registry.ensure_staged(stage).unwrap());
        assert!(registry.is_staged());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn staging_runs_once_under_contention() {
        let registry = Arc::new(CubeRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    registry
                        .ensure_staged(|| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();

        let performed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|did| *did)
            .count();
        assert_eq!(performed, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_staging_is_retried() {
        let registry = CubeRegistry::new();

        let err = registry
            .ensure_staged(|| Err(SimError::Config("missing image".to_string())))
            .unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
        assert!(!registry.is_staged());

        assert!(registry.ensure_staged(|| Ok(())).unwrap());
        assert!(registry.is_staged());
    }
}
