//! Attack Injector - operator-driven severe overrides.
//!
//! The override set is the only state shared between the control path and
//! the dispatcher. Both sides go through the same mutex, so an attack
//! request can never be lost or activated twice by a concurrent sweep.
//!
//! # Lifecycle
//!
//! ```text
//! attack(id) ──► Pending ──(sweep: forced Severe event)──► Active{since}
//!                   ▲                                          │
//!                   └──── attack(id) again (timer restarts) ───┤
//!                                                              │
//!                   (sweep: now - since ≥ duration, resolving event)
//!                                                              ▼
//!                                                           removed
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::EntityCatalog;
use crate::error::LookupError;

/// State of one override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverridePhase {
    /// Requested; the next sweep fires the forced severe event
    Pending,
    /// Forced severe event sent at `since`
    Active { since: Duration },
}

/// What a sweep decided for one overridden entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Send the forced severe event
    Activate(usize),
    /// Override expired and was removed; send the resolving event
    Release(usize),
}

/// Guarded view of the override set, keyed by catalog index.
pub struct OverrideGuard<'a> {
    entries: MutexGuard<'a, HashMap<usize, OverridePhase>>,
}

impl OverrideGuard<'_> {
    /// True when the entity is pending or active.
    pub fn contains(&self, idx: usize) -> bool {
        self.entries.contains_key(&idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advances every override: activates pending ones and releases the
    /// ones whose attack has lasted at least `duration`.
    ///
    /// Actions come back ordered by catalog index so that a seeded run
    /// dispatches in a stable order.
    pub fn sweep(&mut self, now: Duration, duration: Duration) -> Vec<SweepAction> {
        let mut actions = Vec::new();
        for (idx, phase) in self.entries.iter_mut() {
            match *phase {
                OverridePhase::Pending => {
                    *phase = OverridePhase::Active { since: now };
                    actions.push(SweepAction::Activate(*idx));
                }
                OverridePhase::Active { since } if now.saturating_sub(since) >= duration => {
                    actions.push(SweepAction::Release(*idx));
                }
                OverridePhase::Active { .. } => {}
            }
        }
        for action in &actions {
            if let SweepAction::Release(idx) = action {
                self.entries.remove(idx);
            }
        }
        actions.sort_by_key(|action| match action {
            SweepAction::Activate(idx) | SweepAction::Release(idx) => *idx,
        });
        actions
    }
}

/// Thread-safe handle for injecting attacks. Clones share one override set.
#[derive(Clone)]
pub struct AttackInjector {
    catalog: Arc<EntityCatalog>,
    overrides: Arc<Mutex<HashMap<usize, OverridePhase>>>,
}

impl AttackInjector {
    /// Creates the injector, marking every attack-eligible entity pending.
    pub fn new(catalog: Arc<EntityCatalog>) -> Self {
        let seeded: HashMap<usize, OverridePhase> = catalog
            .iter()
            .enumerate()
            .filter(|(_, descriptor)| descriptor.attack_eligible)
            .map(|(idx, _)| (idx, OverridePhase::Pending))
            .collect();
        if !seeded.is_empty() {
            info!("{} trackers start under attack", seeded.len());
        }

        Self {
            catalog,
            overrides: Arc::new(Mutex::new(seeded)),
        }
    }

    /// Locks the override set.
    pub fn lock(&self) -> OverrideGuard<'_> {
        OverrideGuard {
            entries: self.overrides.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Forces one entity into a severe trajectory.
    ///
    /// An entity that is already under attack restarts as pending.
    pub fn attack(&self, id: &str) -> Result<(), LookupError> {
        let idx = self.resolve(id)?;
        self.lock().entries.insert(idx, OverridePhase::Pending);
        info!("Attack requested for {}", id);
        Ok(())
    }

    /// Attacks every known id in one critical section.
    ///
    /// Unknown ids are reported and returned; they do not stop the others.
    pub fn attack_all<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<LookupError> {
        let mut unknown = Vec::new();
        let mut guard = self.lock();
        for id in ids {
            match self.resolve(id) {
                Ok(idx) => {
                    guard.entries.insert(idx, OverridePhase::Pending);
                }
                Err(e) => unknown.push(e),
            }
        }
        drop(guard);
        unknown
    }

    /// Returns the override phase of an entity, if any.
    pub fn phase(&self, id: &str) -> Option<OverridePhase> {
        let idx = self.catalog.index_of(id)?;
        self.lock().entries.get(&idx).copied()
    }

    /// Number of entities currently pending or active.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn resolve(&self, id: &str) -> Result<usize, LookupError> {
        self.catalog.index_of(id).ok_or_else(|| {
            warn!("Tracker {} not found", id);
            LookupError::UnknownEntity(id.to_string())
        })
    }
}
