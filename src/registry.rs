//! Source registry
//!
//! The set of sources a finder currently knows about, keyed by name. Updates
//! replace the whole record in place so a source keeps its arrival position.
//! Readers only ever get cloned snapshots.

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::trace;

use crate::error::EngineError;
use crate::protocol::Source;

#[derive(Default)]
struct Progress {
    /// Bumped on every observable change
    generation: u64,
    /// Completed discovery cycles
    cycles: u64,
    /// Set once discovery stops on an engine fault
    fault: Option<EngineError>,
}

pub struct SourceRegistry {
    sources: RwLock<Vec<Source>>,
    progress: Mutex<Progress>,
    changed: Condvar,
    frozen: AtomicBool,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            progress: Mutex::new(Progress::default()),
            changed: Condvar::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// Insert or replace the record for `source.name`.
    /// Returns true if anything visible changed.
    pub fn upsert(&self, source: Source) -> bool {
        if self.is_frozen() {
            return false;
        }
        {
            let mut sources = self.sources.write();
            match sources.iter_mut().find(|s| s.same_endpoint(&source)) {
                Some(existing) if *existing == source => return false,
                Some(existing) => *existing = source,
                None => sources.push(source),
            }
        }
        self.bump(false);
        true
    }

    /// Drop the record named `name`. Returns true if it existed.
    pub fn remove(&self, name: &str) -> bool {
        if self.is_frozen() {
            return false;
        }
        let removed = {
            let mut sources = self.sources.write();
            let before = sources.len();
            sources.retain(|s| s.name != name);
            sources.len() != before
        };
        if removed {
            self.bump(false);
        }
        removed
    }

    /// Record that the engine finished a discovery pass
    pub fn complete_cycle(&self) {
        if !self.is_frozen() {
            self.bump(true);
        }
    }

    /// Record the fault that ended discovery and release any waiters.
    /// The first fault wins.
    pub fn fail(&self, err: EngineError) {
        let mut progress = self.progress.lock();
        if progress.fault.is_none() {
            progress.fault = Some(err);
        }
        self.changed.notify_all();
    }

    pub fn fault(&self) -> Option<EngineError> {
        self.progress.lock().fault.clone()
    }

    fn bump(&self, cycle: bool) {
        let mut progress = self.progress.lock();
        if cycle {
            progress.cycles += 1;
        } else {
            progress.generation += 1;
        }
        trace!(generation = progress.generation, cycles = progress.cycles, "Registry updated");
        self.changed.notify_all();
    }

    /// Copy of the current contents in arrival order
    pub fn snapshot(&self) -> Vec<Source> {
        self.sources.read().clone()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.progress.lock().generation
    }

    pub fn cycles(&self) -> u64 {
        self.progress.lock().cycles
    }

    /// Block until at least one discovery cycle has completed.
    /// Returns false if `deadline` passed first.
    pub fn wait_for_cycle(&self, deadline: Instant) -> bool {
        let mut progress = self.progress.lock();
        while progress.cycles == 0 {
            let stopped = progress.fault.is_some() || self.is_frozen();
            if stopped || self.changed.wait_until(&mut progress, deadline).timed_out() {
                return progress.cycles > 0;
            }
        }
        true
    }

    /// Block until the generation moves past `seen`.
    /// Returns false if `deadline` passed first.
    pub fn wait_for_change(&self, seen: u64, deadline: Instant) -> bool {
        let mut progress = self.progress.lock();
        while progress.generation == seen {
            let stopped = progress.fault.is_some() || self.is_frozen();
            if stopped || self.changed.wait_until(&mut progress, deadline).timed_out() {
                return progress.generation != seen;
            }
        }
        true
    }

    /// Stop accepting updates and release any waiters
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        let _progress = self.progress.lock();
        self.changed.notify_all();
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_upsert_replaces_in_place() {
        let registry = SourceRegistry::new();
        assert!(registry.upsert(Source::new("CAM1")));
        assert!(registry.upsert(Source::new("CAM2")));
        assert!(registry.upsert(Source::new("CAM1").with_url_address("10.0.0.2:5961")));
        assert!(!registry.upsert(Source::new("CAM1").with_url_address("10.0.0.2:5961")));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "CAM1");
        assert_eq!(snapshot[0].url_address.as_deref(), Some("10.0.0.2:5961"));
        assert_eq!(registry.generation(), 3);
    }

    #[test]
    fn test_remove() {
        let registry = SourceRegistry::new();
        registry.upsert(Source::new("CAM1"));
        assert!(registry.remove("CAM1"));
        assert!(!registry.remove("CAM1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable() {
        let registry = SourceRegistry::new();
        registry.upsert(Source::new("CAM1"));
        let first = registry.snapshot();
        registry.upsert(Source::new("CAM2"));
        assert_eq!(first.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(registry.snapshot(), registry.snapshot());
    }

    #[test]
    fn test_frozen_ignores_updates() {
        let registry = SourceRegistry::new();
        registry.upsert(Source::new("CAM1"));
        registry.freeze();
        assert!(!registry.upsert(Source::new("CAM2")));
        assert!(!registry.remove("CAM1"));
        registry.complete_cycle();
        assert_eq!(registry.cycles(), 0);
        assert_eq!(registry.snapshot(), vec![Source::new("CAM1")]);
    }

    #[test]
    fn test_wait_for_cycle() {
        let registry = Arc::new(SourceRegistry::new());
        let waiter = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.wait_for_cycle(Instant::now() + Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        registry.complete_cycle();
        assert!(waiter.join().unwrap());

        let idle = SourceRegistry::new();
        assert!(!idle.wait_for_cycle(Instant::now() + Duration::from_millis(20)));
    }

    #[test]
    fn test_fault_releases_waiters() {
        let registry = Arc::new(SourceRegistry::new());
        let waiter = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.wait_for_cycle(Instant::now() + Duration::from_secs(5)))
        };
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(20));
        registry.fail(EngineError::Transport("socket reset".into()));
        registry.fail(EngineError::Closed);

        assert!(!waiter.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(registry.fault(), Some(EngineError::Transport("socket reset".into())));
        assert!(!registry.wait_for_change(registry.generation(), Instant::now() + Duration::from_secs(5)));
    }

    #[test]
    fn test_wait_for_change_times_out() {
        let registry = SourceRegistry::new();
        let seen = registry.generation();
        let start = Instant::now();
        assert!(!registry.wait_for_change(seen, start + Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));

        registry.upsert(Source::new("CAM1"));
        assert!(registry.wait_for_change(seen, Instant::now()));
    }
}
