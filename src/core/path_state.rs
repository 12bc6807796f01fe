/*
 * Tracks the classification state of every path the user or a rule has touched
 * during the current source session. A path that is not in the registry is
 * `PathState::Normal`. The registry is a cloneable handle; every clone sees the
 * same map, so writes are visible to all content filters immediately.
 *
 * The low-level `set`/`set_all` calls are last-write-wins. The user-facing
 * mutators (`ignore_path`, `map_path`, ...) additionally enforce that a path only
 * moves between `Ignored` and `Mapped` by way of `Normal`.
 */
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathState {
    #[default]
    Normal,
    Ignored,
    Mapped,
}

/* Identifies the rule (one submitted visitor) that produced a mapping. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u64);

static NEXT_RULE_ID: AtomicU64 = AtomicU64::new(1);

impl RuleId {
    pub fn next() -> Self {
        RuleId(NEXT_RULE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    states: HashMap<PathBuf, PathState>,
    mapped_by: HashMap<PathBuf, RuleId>,
}

impl RegistryInner {
    fn write_state(&mut self, path: &Path, state: PathState) {
        if state != PathState::Mapped {
            self.mapped_by.remove(path);
        }
        if state == PathState::Normal {
            self.states.remove(path);
        } else {
            self.states.insert(path.to_path_buf(), state);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathStateRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PathStateRegistry {
    pub fn new() -> Self {
        log::debug!("PathStateRegistry::new called - starting with an empty registry.");
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, path: &Path) -> PathState {
        self.read()
            .states
            .get(path)
            .copied()
            .unwrap_or(PathState::Normal)
    }

    pub fn set(&self, path: &Path, state: PathState) {
        log::trace!("PathStateRegistry: {path:?} -> {state:?}");
        self.write().write_state(path, state);
    }

    pub fn set_all<'a, I>(&self, paths: I, state: PathState)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut inner = self.write();
        for path in paths {
            inner.write_state(path, state);
        }
    }

    /*
     * Marks every path in `paths` as mapped by `rule`. Paths the user has ignored
     * in the meantime keep their `Ignored` state.
     */
    pub fn map_all<'a, I>(&self, paths: I, rule: RuleId)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut inner = self.write();
        for path in paths {
            if inner.states.get(path) == Some(&PathState::Ignored) {
                log::warn!("PathStateRegistry: Not mapping ignored path {path:?} for {rule}.");
                continue;
            }
            inner.write_state(path, PathState::Mapped);
            inner.mapped_by.insert(path.clone(), rule);
        }
    }

    /* Returns false when the path is currently mapped; it must be unmapped first. */
    pub fn ignore_path(&self, path: &Path) -> bool {
        let mut inner = self.write();
        match inner.states.get(path) {
            Some(PathState::Mapped) => {
                log::warn!("PathStateRegistry: Refusing to ignore mapped path {path:?}.");
                false
            }
            _ => {
                inner.write_state(path, PathState::Ignored);
                true
            }
        }
    }

    pub fn unignore_path(&self, path: &Path) -> bool {
        let mut inner = self.write();
        if inner.states.get(path) == Some(&PathState::Ignored) {
            inner.write_state(path, PathState::Normal);
            true
        } else {
            false
        }
    }

    /* Returns false when the path is currently ignored; it must be unignored first. */
    pub fn map_path(&self, path: &Path, rule: RuleId) -> bool {
        let mut inner = self.write();
        match inner.states.get(path) {
            Some(PathState::Ignored) => {
                log::warn!("PathStateRegistry: Refusing to map ignored path {path:?}.");
                false
            }
            _ => {
                inner.write_state(path, PathState::Mapped);
                inner.mapped_by.insert(path.to_path_buf(), rule);
                true
            }
        }
    }

    /*
     * Reverts a mapping to `Normal`. Only the rule that owns the mapping (or any rule,
     * for a mapping written through `set` without an owner) may remove it.
     */
    pub fn unmap_path(&self, path: &Path, rule: RuleId) -> bool {
        let mut inner = self.write();
        if inner.states.get(path) != Some(&PathState::Mapped) {
            return false;
        }
        match inner.mapped_by.get(path) {
            Some(owner) if *owner != rule => {
                log::debug!(
                    "PathStateRegistry: {path:?} is mapped by {owner}, not {rule}; leaving it."
                );
                false
            }
            _ => {
                inner.write_state(path, PathState::Normal);
                true
            }
        }
    }

    pub fn mapped_by(&self, path: &Path) -> Option<RuleId> {
        self.read().mapped_by.get(path).copied()
    }

    pub fn paths_in_state(&self, state: PathState) -> HashSet<PathBuf> {
        self.read()
            .states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        log::debug!("PathStateRegistry: Session reset, clearing all path states.");
        let mut inner = self.write();
        inner.states.clear();
        inner.mapped_by.clear();
    }
}
