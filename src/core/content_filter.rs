/*
 * The exclusion predicate used by a classification rule. A filter is built once per
 * rule from the path-state registry and the global ignore rules, and answers the
 * question "should this path stay out of the packages this rule produces?".
 *
 * Paths that are ignored or already mapped, paths below an ignored or mapped
 * ancestor, and paths where the name of any segment matches a global ignore pattern
 * are excluded. Whether a directory is empty is answered separately by
 * `probe_directory`, right before the directory is walked.
 */
use crate::core::ignore_rules::IgnoreRules;
use crate::core::path_state::{PathState, PathStateRegistry};
use crate::core::path_utils;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/* What a directory looks like right before it is walked. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryProbe {
    HasEntries,
    Empty,
    AccessDenied,
    /* The directory could not be read for another reason (e.g. it vanished). */
    Unresolvable,
}

#[derive(Debug, Clone)]
pub struct ContentFilter {
    ignored: HashSet<PathBuf>,
    mapped: HashSet<PathBuf>,
    registry: PathStateRegistry,
    ignore_rules: IgnoreRules,
}

impl ContentFilter {
    /*
     * Builds the filter for a rule over `selection`. The explicit ignored and mapped
     * sets are gathered from registry entries on the selected paths, their ancestors
     * and their descendants, as they stand when the rule is created.
     */
    pub fn for_selection(
        registry: &PathStateRegistry,
        ignore_rules: &IgnoreRules,
        selection: &[PathBuf],
    ) -> Self {
        let related = |candidate: &PathBuf| {
            selection
                .iter()
                .any(|sel| candidate.starts_with(sel) || sel.starts_with(candidate))
        };
        let ignored: HashSet<PathBuf> = registry
            .paths_in_state(PathState::Ignored)
            .into_iter()
            .filter(|p| related(p))
            .collect();
        let mapped: HashSet<PathBuf> = registry
            .paths_in_state(PathState::Mapped)
            .into_iter()
            .filter(|p| related(p))
            .collect();
        log::debug!(
            "ContentFilter: Built for {} selected path(s) with {} ignored and {} mapped entries.",
            selection.len(),
            ignored.len(),
            mapped.len()
        );
        ContentFilter {
            ignored,
            mapped,
            registry: registry.clone(),
            ignore_rules: ignore_rules.clone(),
        }
    }

    fn is_flagged(&self, path: &Path) -> bool {
        self.ignored.contains(path)
            || self.mapped.contains(path)
            || self.ignore_rules.matches_path(path)
    }

    /* Returns true when `path` must be excluded. */
    pub fn filter(&self, path: &Path) -> bool {
        if self.is_flagged(path) || self.registry.get(path) != PathState::Normal {
            log::trace!("ContentFilter: Excluding {path:?} (own state).");
            return true;
        }
        if path_utils::is_network_path(path) {
            // Such paths have no decomposable ancestors; they are only checked by themselves.
            return false;
        }
        let mut ancestors: Vec<&Path> = path.ancestors().skip(1).collect();
        ancestors.reverse();
        let excluded = ancestors.into_iter().any(|ancestor| self.is_flagged(ancestor));
        if excluded {
            log::trace!("ContentFilter: Excluding {path:?} (ancestor excluded).");
        }
        excluded
    }
}

pub fn probe_directory(path: &Path) -> DirectoryProbe {
    match fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                DirectoryProbe::HasEntries
            } else {
                DirectoryProbe::Empty
            }
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => DirectoryProbe::AccessDenied,
        Err(e) => {
            log::debug!("ContentFilter: Could not probe directory {path:?}: {e}");
            DirectoryProbe::Unresolvable
        }
    }
}
