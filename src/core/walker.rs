/*
 * Drives a classification visitor over the selected source paths. Each selected
 * path is walked depth-first with `walkdir`, entries sorted by file name, and the
 * visitor receives pre-visit, file and post-visit callbacks in that order.
 *
 * The walk never fails as a whole. Directories that cannot be opened and entries
 * that cannot be read are recorded as `WalkIssue`s and skipped. Cancellation is
 * checked before every entry; a cancelled walk returns without calling `end`.
 */
use crate::core::visitor::{ClassificationVisitor, SharedVisitor, VisitAction};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

/* Cooperative cancellation flag shared between a job's owner and its walk. */
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkIssue {
    AccessDenied(PathBuf),
    IoFailure { path: PathBuf, message: String },
    InvalidPath(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    pub files_visited: usize,
    pub directories_visited: usize,
    pub packages: usize,
    pub issues: Vec<WalkIssue>,
    pub cancelled: bool,
}

impl WalkOutcome {
    /* True when the walk ran to completion without any skipped entry. */
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.issues.is_empty()
    }
}

fn with_visitor<R>(
    visitor: &SharedVisitor,
    f: impl FnOnce(&mut (dyn ClassificationVisitor + 'static)) -> R,
) -> R {
    let mut guard = visitor
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut *guard)
}

/*
 * Walks every path of `selection` in order and feeds `visitor`. The visitor is locked
 * per callback only, so consumers can drain finished previews while the walk runs.
 */
pub fn walk_selection(
    selection: &[PathBuf],
    visitor: &SharedVisitor,
    cancel: &CancelToken,
) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();
    for start in selection {
        if !walk_one(start, visitor, cancel, &mut outcome) {
            outcome.cancelled = true;
            log::debug!("Walker: Walk cancelled while in {start:?}.");
            outcome.packages = with_visitor(visitor, |v| v.count());
            return outcome;
        }
    }
    with_visitor(visitor, |v| v.end());
    outcome.packages = with_visitor(visitor, |v| v.count());
    log::debug!(
        "Walker: Finished {} selected path(s): {} files, {} directories, {} issue(s).",
        selection.len(),
        outcome.files_visited,
        outcome.directories_visited,
        outcome.issues.len()
    );
    outcome
}

fn record_error(err: &walkdir::Error, outcome: &mut WalkOutcome) -> Option<PathBuf> {
    let path = err.path().map(Path::to_path_buf);
    let issue = match (&path, err.io_error()) {
        (Some(p), Some(io_err)) if io_err.kind() == io::ErrorKind::PermissionDenied => {
            WalkIssue::AccessDenied(p.clone())
        }
        (Some(p), _) => WalkIssue::IoFailure {
            path: p.clone(),
            message: err.to_string(),
        },
        (None, _) => WalkIssue::InvalidPath(PathBuf::new()),
    };
    log::warn!("Walker: Skipping entry after error: {err}");
    outcome.issues.push(issue);
    path
}

/* Returns false when the walk was cancelled. */
fn walk_one(
    start: &Path,
    visitor: &SharedVisitor,
    cancel: &CancelToken,
    outcome: &mut WalkOutcome,
) -> bool {
    let mut open_dirs: Vec<(PathBuf, usize)> = Vec::new();
    let mut entries = WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let Some(next) = entries.next() else {
            break;
        };
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                close_dirs_at_or_below(err.depth(), &mut open_dirs, visitor);
                if let Some(path) = record_error(&err, outcome) {
                    with_visitor(visitor, |v| v.visit_file_failed(&path));
                }
                continue;
            }
        };

        let depth = entry.depth();
        close_dirs_at_or_below(depth, &mut open_dirs, visitor);
        let path = entry.path();

        if entry.file_type().is_dir() {
            outcome.directories_visited += 1;
            match with_visitor(visitor, |v| v.pre_visit_directory(path)) {
                VisitAction::Continue => open_dirs.push((path.to_path_buf(), depth)),
                VisitAction::SkipSubtree => entries.skip_current_dir(),
                VisitAction::AccessDenied => {
                    outcome.issues.push(WalkIssue::AccessDenied(path.to_path_buf()));
                    entries.skip_current_dir();
                }
            }
        } else {
            outcome.files_visited += 1;
            with_visitor(visitor, |v| v.visit_file(path));
        }
    }

    close_dirs_at_or_below(0, &mut open_dirs, visitor);
    true
}

/* Sends post-visit callbacks for every open directory at `depth` or deeper. */
fn close_dirs_at_or_below(
    depth: usize,
    open_dirs: &mut Vec<(PathBuf, usize)>,
    visitor: &SharedVisitor,
) {
    while let Some((_, open_depth)) = open_dirs.last() {
        if *open_depth < depth {
            break;
        }
        if let Some((dir, _)) = open_dirs.pop() {
            with_visitor(visitor, |v| v.post_visit_directory(&dir));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content_filter::ContentFilter;
    use crate::core::ignore_rules::IgnoreRules;
    use crate::core::path_state::{PathState, PathStateRegistry};
    use crate::core::visitor::{
        ClassificationKind, MIN_PROGRESS_INTERVAL, PerFileVisitor, VisitorCore, create_visitor,
    };
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::{Builder, tempdir};

    fn visitor_for(
        kind: ClassificationKind,
        registry: &PathStateRegistry,
        rules: &IgnoreRules,
        selection: &[PathBuf],
    ) -> SharedVisitor {
        let filter = ContentFilter::for_selection(registry, rules, selection);
        let core = VisitorCore::new(filter, registry.clone(), None, MIN_PROGRESS_INTERVAL);
        create_visitor(kind, core)
    }

    fn run(
        kind: ClassificationKind,
        registry: &PathStateRegistry,
        selection: &[PathBuf],
    ) -> (SharedVisitor, WalkOutcome) {
        let visitor = visitor_for(kind, registry, &IgnoreRules::new(), selection);
        let outcome = walk_selection(selection, &visitor, &CancelToken::new());
        (visitor, outcome)
    }

    // root
    // ├── top.txt
    // ├── a
    // │   ├── a1.txt
    // │   └── b
    // │       └── b1.txt
    // └── c
    //     └── c1.txt
    fn setup_nested(base: &Path) -> io::Result<PathBuf> {
        let root = base.join("root");
        fs::create_dir_all(root.join("a").join("b"))?;
        fs::create_dir_all(root.join("c"))?;
        fs::write(root.join("top.txt"), "t")?;
        fs::write(root.join("a").join("a1.txt"), "a")?;
        fs::write(root.join("a").join("b").join("b1.txt"), "b")?;
        fs::write(root.join("c").join("c1.txt"), "c")?;
        Ok(root)
    }

    #[test]
    fn test_per_file_on_directory_with_empty_subdirectory() -> io::Result<()> {
        // Arrange
        let dir = tempdir()?;
        let a = dir.path().join("a");
        fs::create_dir_all(a.join("empty"))?;
        fs::write(a.join("f1"), "1")?;
        fs::write(a.join("f2"), "2")?;
        let registry = PathStateRegistry::new();

        // Act
        let (visitor, outcome) = run(ClassificationKind::PerFile, &registry, &[a.clone()]);

        // Assert
        let previews = visitor.lock().unwrap().drain_available();
        let names: Vec<&str> = previews.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["f1", "f2"]);
        assert!(previews.iter().all(|p| !p.contains(&a.join("empty"))));
        assert_eq!(registry.get(&a.join("empty")), PathState::Normal);
        assert!(outcome.is_complete_success());
        assert_eq!(outcome.packages, 2);
        Ok(())
    }

    #[test]
    fn test_per_file_and_whole_selection_counts_on_same_tree() -> io::Result<()> {
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;

        let (per_file, _) = run(ClassificationKind::PerFile, &PathStateRegistry::new(), &[root.clone()]);
        let (whole, _) = run(
            ClassificationKind::WholeSelection,
            &PathStateRegistry::new(),
            &[root.clone()],
        );

        assert_eq!(per_file.lock().unwrap().count(), 4);
        let mut whole = whole.lock().unwrap();
        assert_eq!(whole.count(), 1);
        let preview = whole.next_package().unwrap();
        assert_eq!(preview.file_count(), 4);
        assert!(preview.contains(&root.join("a").join("b").join("b1.txt")));
        Ok(())
    }

    #[test]
    fn test_whole_selection_maps_all_captured_paths() -> io::Result<()> {
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;
        let registry = PathStateRegistry::new();

        let (visitor, _) = run(ClassificationKind::WholeSelection, &registry, &[root.clone()]);

        let preview = visitor.lock().unwrap().next_package().unwrap();
        for path in preview.content_paths() {
            assert_eq!(registry.get(&path), PathState::Mapped, "{path:?} should be mapped");
        }
        assert_eq!(registry.get(&root), PathState::Mapped);
        Ok(())
    }

    #[test]
    fn test_per_folder_level_zero_packages_only_the_selection() -> io::Result<()> {
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;

        let (visitor, _) = run(
            ClassificationKind::PerFolder { max_level: 0 },
            &PathStateRegistry::new(),
            &[root.clone()],
        );

        let previews = visitor.lock().unwrap().drain_available();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].name(), "root");
        assert_eq!(previews[0].file_count(), 4);
        Ok(())
    }

    #[test]
    fn test_per_folder_level_one_packages_direct_subfolders() -> io::Result<()> {
        // Arrange
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;

        // Act
        let (visitor, _) = run(
            ClassificationKind::PerFolder { max_level: 1 },
            &PathStateRegistry::new(),
            &[root.clone()],
        );

        // Assert
        let previews = visitor.lock().unwrap().drain_available();
        let names: Vec<&str> = previews.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["a", "c", "root"], "Children are emitted before the selection");
        let a = &previews[0];
        assert_eq!(a.file_count(), 2, "b is folded into a, not packaged on its own");
        let whole = &previews[2];
        assert!(whole.contains(&root.join("a").join("a1.txt")), "Levels overlap");
        Ok(())
    }

    #[test]
    fn test_per_folder_deeper_levels_overlap_with_ancestors() -> io::Result<()> {
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;

        let (visitor, _) = run(
            ClassificationKind::PerFolder { max_level: 2 },
            &PathStateRegistry::new(),
            &[root.clone()],
        );

        let previews = visitor.lock().unwrap().drain_available();
        let names: Vec<&str> = previews.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["b", "a", "c", "root"]);
        let b1 = root.join("a").join("b").join("b1.txt");
        assert!(previews[0].contains(&b1));
        assert!(previews[1].contains(&b1), "b is also kept inside a");
        assert_eq!(previews[1].file_count(), 2);
        Ok(())
    }

    #[test]
    fn test_ignored_and_pattern_matched_content_is_skipped() -> io::Result<()> {
        // The default temp dir prefix is itself a dotfile name.
        let dir = Builder::new().prefix("sip").tempdir()?;
        let root = setup_nested(dir.path())?;
        fs::create_dir_all(root.join(".hidden"))?;
        fs::write(root.join(".hidden").join("secret"), "s")?;
        let registry = PathStateRegistry::new();
        registry.ignore_path(&root.join("a"));
        let rules = IgnoreRules::from_patterns(&["^\\..*".to_string()]);
        let selection = vec![root.clone()];
        let visitor = visitor_for(ClassificationKind::PerFile, &registry, &rules, &selection);

        walk_selection(&selection, &visitor, &CancelToken::new());

        let names: HashSet<String> = visitor
            .lock()
            .unwrap()
            .drain_available()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        let expected: HashSet<String> =
            ["top.txt", "c1.txt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
        Ok(())
    }

    #[test]
    fn test_second_rule_does_not_reclassify_mapped_content() -> io::Result<()> {
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;
        let registry = PathStateRegistry::new();
        run(ClassificationKind::PerFolder { max_level: 1 }, &registry, &[root.join("a")]);

        let (second, _) = run(ClassificationKind::PerFile, &registry, &[root.clone()]);

        let names: Vec<String> = second
            .lock()
            .unwrap()
            .drain_available()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["c1.txt".to_string(), "top.txt".to_string()]);
        Ok(())
    }

    #[test]
    fn test_cancelled_walk_does_not_call_end() -> io::Result<()> {
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;
        let selection = vec![root];
        let visitor = visitor_for(
            ClassificationKind::WholeSelection,
            &PathStateRegistry::new(),
            &IgnoreRules::new(),
            &selection,
        );
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = walk_selection(&selection, &visitor, &cancel);

        assert!(outcome.cancelled);
        assert!(!outcome.is_complete_success());
        let guard = visitor.lock().unwrap();
        assert!(!guard.is_ended());
        assert_eq!(guard.count(), 0);
        Ok(())
    }

    #[test]
    fn test_selected_file_is_packaged_by_every_kind() -> io::Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("lonely.txt");
        fs::write(&file, "x")?;
        for kind in [
            ClassificationKind::WholeSelection,
            ClassificationKind::PerFile,
            ClassificationKind::PerFolder { max_level: 3 },
        ] {
            let (visitor, outcome) = run(kind, &PathStateRegistry::new(), &[file.clone()]);
            assert_eq!(visitor.lock().unwrap().count(), 1, "{kind} should package the file");
            assert_eq!(outcome.files_visited, 1);
        }
        Ok(())
    }

    /* Refuses to open one directory, the way an unreadable folder is reported. */
    struct DenyingVisitor {
        inner: PerFileVisitor,
        denied: PathBuf,
    }

    impl ClassificationVisitor for DenyingVisitor {
        fn core(&self) -> &VisitorCore {
            self.inner.core()
        }

        fn core_mut(&mut self) -> &mut VisitorCore {
            self.inner.core_mut()
        }

        fn pre_visit_directory(&mut self, path: &Path) -> VisitAction {
            if path == self.denied {
                return VisitAction::AccessDenied;
            }
            self.inner.pre_visit_directory(path)
        }

        fn post_visit_directory(&mut self, path: &Path) {
            self.inner.post_visit_directory(path);
        }

        fn visit_file(&mut self, path: &Path) {
            self.inner.visit_file(path);
        }

        fn end(&mut self) {
            self.inner.end();
        }
    }

    fn package_names(visitor: &SharedVisitor) -> Vec<String> {
        visitor
            .lock()
            .unwrap()
            .drain_available()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    #[test]
    fn test_access_denied_directory_is_skipped_and_recorded() -> io::Result<()> {
        // Arrange
        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;
        let denied = root.join("a");
        let selection = vec![root.clone()];
        let registry = PathStateRegistry::new();
        let filter = ContentFilter::for_selection(&registry, &IgnoreRules::new(), &selection);
        let core = VisitorCore::new(filter, registry.clone(), None, MIN_PROGRESS_INTERVAL);
        let visitor: SharedVisitor = Arc::new(Mutex::new(DenyingVisitor {
            inner: PerFileVisitor::new(core),
            denied: denied.clone(),
        }));

        // Act
        let outcome = walk_selection(&selection, &visitor, &CancelToken::new());

        // Assert
        assert_eq!(outcome.issues, vec![WalkIssue::AccessDenied(denied.clone())]);
        assert!(!outcome.cancelled);
        assert!(visitor.lock().unwrap().is_ended(), "The walk continues past the denied folder");
        assert_eq!(package_names(&visitor), vec!["c1.txt", "top.txt"]);
        assert_eq!(registry.get(&denied.join("a1.txt")), PathState::Normal);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_reported_as_access_denied() -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let root = setup_nested(dir.path())?;
        let locked = root.join("c");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))?;
        if fs::read_dir(&locked).is_ok() {
            // Permission bits do not bind a privileged user.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;
            return Ok(());
        }

        let (visitor, outcome) = run(ClassificationKind::PerFile, &PathStateRegistry::new(), &[root]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))?;

        assert_eq!(outcome.issues, vec![WalkIssue::AccessDenied(locked)]);
        assert_eq!(package_names(&visitor), vec!["a1.txt", "b1.txt", "top.txt"]);
        Ok(())
    }

    #[test]
    fn test_missing_selection_is_reported_not_fatal() {
        let missing = PathBuf::from("this_path_does_not_exist_for_walker_test");
        let (visitor, outcome) = run(ClassificationKind::PerFile, &PathStateRegistry::new(), &[missing]);
        assert_eq!(outcome.issues.len(), 1);
        assert!(matches!(outcome.issues[0], WalkIssue::IoFailure { .. }));
        assert!(visitor.lock().unwrap().is_ended());
    }
}
