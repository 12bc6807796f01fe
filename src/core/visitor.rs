/*
 * Classification visitors turn a filesystem walk into package previews. The walk
 * itself is driven by `walker::walk_selection`; a visitor only reacts to the
 * directory/file callbacks and accumulates previews that consumers drain with
 * `has_next`/`next_package`.
 *
 * Three strategies are provided:
 * - `WholeSelectionVisitor`: everything walked becomes one package, emitted at `end`.
 * - `PerFileVisitor`: every file becomes its own package as soon as it is visited.
 * - `PerFolderVisitor`: every directory down to `max_level` becomes a package. A
 *   directory is also kept inside its parent's tree, so packages from different
 *   levels can share content.
 *
 * Every strategy shares a `VisitorCore` holding the filter, the registry handle,
 * the outbox of previews and the throttled progress channel.
 */
use crate::core::content_filter::{ContentFilter, DirectoryProbe, probe_directory};
use crate::core::events::{SubscriptionId, Subscribers};
use crate::core::package_preview::{DEFAULT_REPRESENTATION, MetadataRef, PackagePreview};
use crate::core::path_state::{PathStateRegistry, RuleId};
use crate::core::tree_node::ContentTreeNode;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationKind {
    WholeSelection,
    PerFile,
    PerFolder { max_level: usize },
}

impl std::fmt::Display for ClassificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationKind::WholeSelection => write!(f, "whole selection"),
            ClassificationKind::PerFile => write!(f, "per file"),
            ClassificationKind::PerFolder { max_level } => write!(f, "per folder (level {max_level})"),
        }
    }
}

/* Decision returned from `pre_visit_directory`. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Continue,
    SkipSubtree,
    /* The directory could not be opened; it is skipped like an excluded one. */
    AccessDenied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkProgress {
    pub files_visited: usize,
    pub directories_visited: usize,
    pub packages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitorEvent {
    Progress { rule: RuleId, progress: WalkProgress },
    Done { rule: RuleId, packages: usize },
}

/* Limits progress notifications to one per interval. */
#[derive(Debug)]
struct ProgressThrottle {
    interval: Duration,
    last_report: Instant,
}

impl ProgressThrottle {
    fn new(interval: Duration) -> Self {
        ProgressThrottle {
            interval: interval.max(MIN_PROGRESS_INTERVAL),
            last_report: Instant::now(),
        }
    }

    fn ready(&mut self) -> bool {
        if self.last_report.elapsed() >= self.interval {
            self.last_report = Instant::now();
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub struct VisitorCore {
    id: RuleId,
    filter: ContentFilter,
    registry: PathStateRegistry,
    metadata: Option<MetadataRef>,
    outbox: VecDeque<PackagePreview>,
    delivered: usize,
    progress: WalkProgress,
    throttle: ProgressThrottle,
    events: Subscribers<VisitorEvent>,
    ended: bool,
}

impl VisitorCore {
    pub fn new(
        filter: ContentFilter,
        registry: PathStateRegistry,
        metadata: Option<MetadataRef>,
        progress_interval: Duration,
    ) -> Self {
        VisitorCore {
            id: RuleId::next(),
            filter,
            registry,
            metadata,
            outbox: VecDeque::new(),
            delivered: 0,
            progress: WalkProgress::default(),
            throttle: ProgressThrottle::new(progress_interval),
            events: Subscribers::new(),
            ended: false,
        }
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    fn directory_action(&mut self, path: &Path) -> VisitAction {
        self.progress.directories_visited += 1;
        self.report_progress();
        if self.filter.filter(path) {
            return VisitAction::SkipSubtree;
        }
        match probe_directory(path) {
            DirectoryProbe::Empty => {
                log::trace!("ClassificationVisitor: Skipping empty directory {path:?}.");
                VisitAction::SkipSubtree
            }
            DirectoryProbe::AccessDenied => {
                log::warn!("ClassificationVisitor: Access denied to {path:?}, skipping it.");
                VisitAction::AccessDenied
            }
            DirectoryProbe::HasEntries | DirectoryProbe::Unresolvable => VisitAction::Continue,
        }
    }

    /* Returns true when the file should be captured. */
    fn accept_file(&mut self, path: &Path) -> bool {
        self.progress.files_visited += 1;
        self.report_progress();
        !self.filter.filter(path)
    }

    fn report_progress(&mut self) {
        if self.throttle.ready() {
            self.events.notify(&VisitorEvent::Progress {
                rule: self.id,
                progress: self.progress,
            });
        }
    }

    /* Wraps `root` into a preview, marks its content as mapped and queues it. */
    fn emit(&mut self, root: ContentTreeNode) {
        let preview = PackagePreview::with_root(root, self.id, self.metadata.clone());
        self.emit_preview(preview);
    }

    fn emit_preview(&mut self, preview: PackagePreview) {
        self.registry.map_all(&preview.content_paths(), self.id);
        log::debug!(
            "ClassificationVisitor: {} produced {} '{}' with {} file(s).",
            self.id,
            preview.id(),
            preview.name(),
            preview.file_count()
        );
        self.outbox.push_back(preview);
        self.progress.packages += 1;
    }

    fn finish(&mut self) {
        self.ended = true;
        self.events.notify(&VisitorEvent::Done {
            rule: self.id,
            packages: self.count(),
        });
    }

    fn count(&self) -> usize {
        self.delivered + self.outbox.len()
    }
}

/*
 * Callback interface invoked by the walker, plus the consumer-facing drain methods.
 * Only the walk callbacks differ between strategies; the rest is provided on top of
 * the shared `VisitorCore`.
 */
pub trait ClassificationVisitor: Send {
    fn core(&self) -> &VisitorCore;
    fn core_mut(&mut self) -> &mut VisitorCore;

    fn pre_visit_directory(&mut self, path: &Path) -> VisitAction;
    fn post_visit_directory(&mut self, path: &Path);
    fn visit_file(&mut self, path: &Path);
    fn end(&mut self);

    fn visit_file_failed(&mut self, path: &Path) {
        log::warn!(
            "ClassificationVisitor: {} could not visit {path:?}, continuing.",
            self.core().id
        );
    }

    fn id(&self) -> RuleId {
        self.core().id
    }

    fn has_next(&self) -> bool {
        !self.core().outbox.is_empty()
    }

    fn next_package(&mut self) -> Option<PackagePreview> {
        let core = self.core_mut();
        let preview = core.outbox.pop_front()?;
        core.delivered += 1;
        Some(preview)
    }

    /* Drains every preview produced since the last call, in discovery order. */
    fn drain_available(&mut self) -> Vec<PackagePreview> {
        let mut previews = Vec::new();
        while let Some(preview) = self.next_package() {
            previews.push(preview);
        }
        previews
    }

    /* Total previews produced so far, delivered or pending. */
    fn count(&self) -> usize {
        self.core().count()
    }

    fn is_ended(&self) -> bool {
        self.core().ended
    }

    fn progress(&self) -> WalkProgress {
        self.core().progress
    }

    fn subscribe(&self, callback: Box<dyn Fn(&VisitorEvent) + Send + Sync>) -> SubscriptionId {
        self.core().events.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core().events.unsubscribe(id)
    }
}

pub type SharedVisitor = Arc<Mutex<dyn ClassificationVisitor>>;

/* Builds the visitor for `kind` around an already prepared core. */
pub fn create_visitor(kind: ClassificationKind, core: VisitorCore) -> SharedVisitor {
    log::debug!("ClassificationVisitor: Creating {kind} visitor {}.", core.id);
    match kind {
        ClassificationKind::WholeSelection => Arc::new(Mutex::new(WholeSelectionVisitor::new(core))),
        ClassificationKind::PerFile => Arc::new(Mutex::new(PerFileVisitor::new(core))),
        ClassificationKind::PerFolder { max_level } => {
            Arc::new(Mutex::new(PerFolderVisitor::new(core, max_level)))
        }
    }
}

/*
 * Pops the node for a finished directory. Returns `None` when the directory ended
 * up with no content (everything inside was filtered).
 */
fn pop_finished(stack: &mut Vec<ContentTreeNode>, path: &Path) -> Option<ContentTreeNode> {
    let node = stack.pop()?;
    if node.path() != path {
        log::error!(
            "ClassificationVisitor: Directory stack out of sync, expected {:?} but closing {path:?}.",
            node.path()
        );
    }
    if node.has_children() { Some(node) } else { None }
}

pub struct WholeSelectionVisitor {
    core: VisitorCore,
    stack: Vec<ContentTreeNode>,
    roots: Vec<ContentTreeNode>,
}

impl WholeSelectionVisitor {
    pub fn new(core: VisitorCore) -> Self {
        WholeSelectionVisitor {
            core,
            stack: Vec::new(),
            roots: Vec::new(),
        }
    }
}

impl ClassificationVisitor for WholeSelectionVisitor {
    fn core(&self) -> &VisitorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut VisitorCore {
        &mut self.core
    }

    fn pre_visit_directory(&mut self, path: &Path) -> VisitAction {
        let action = self.core.directory_action(path);
        if action == VisitAction::Continue {
            self.stack.push(ContentTreeNode::directory(path.to_path_buf()));
        }
        action
    }

    fn post_visit_directory(&mut self, path: &Path) {
        let Some(node) = pop_finished(&mut self.stack, path) else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.add(node),
            None => self.roots.push(node),
        }
    }

    fn visit_file(&mut self, path: &Path) {
        if !self.core.accept_file(path) {
            return;
        }
        match self.stack.last_mut() {
            Some(parent) => parent.add_path(path.to_path_buf()),
            None => self.roots.push(ContentTreeNode::file(path.to_path_buf())),
        }
    }

    fn end(&mut self) {
        let mut roots = std::mem::take(&mut self.roots).into_iter();
        if let Some(first) = roots.next() {
            let mut preview =
                PackagePreview::new(first.name(), self.core.id, self.core.metadata.clone());
            preview.add_content(DEFAULT_REPRESENTATION, first);
            for root in roots {
                preview.add_content(DEFAULT_REPRESENTATION, root);
            }
            preview.clear_modified();
            self.core.emit_preview(preview);
        } else {
            log::debug!("ClassificationVisitor: {} found nothing to package.", self.core.id);
        }
        self.core.finish();
    }
}

pub struct PerFileVisitor {
    core: VisitorCore,
}

impl PerFileVisitor {
    pub fn new(core: VisitorCore) -> Self {
        PerFileVisitor { core }
    }
}

impl ClassificationVisitor for PerFileVisitor {
    fn core(&self) -> &VisitorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut VisitorCore {
        &mut self.core
    }

    fn pre_visit_directory(&mut self, path: &Path) -> VisitAction {
        self.core.directory_action(path)
    }

    fn post_visit_directory(&mut self, _path: &Path) {}

    fn visit_file(&mut self, path: &Path) {
        if self.core.accept_file(path) {
            self.core.emit(ContentTreeNode::file(path.to_path_buf()));
        }
    }

    fn end(&mut self) {
        self.core.finish();
    }
}

pub struct PerFolderVisitor {
    core: VisitorCore,
    max_level: usize,
    stack: Vec<ContentTreeNode>,
    /* Component count of the current walk start. */
    base_depth: usize,
}

impl PerFolderVisitor {
    pub fn new(core: VisitorCore, max_level: usize) -> Self {
        PerFolderVisitor {
            core,
            max_level,
            stack: Vec::new(),
            base_depth: 0,
        }
    }

    /* The selected directory itself is level 0, its subdirectories level 1, and so on. */
    fn relative_level(&self, path: &Path) -> usize {
        path.components().count().saturating_sub(self.base_depth)
    }
}

impl ClassificationVisitor for PerFolderVisitor {
    fn core(&self) -> &VisitorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut VisitorCore {
        &mut self.core
    }

    fn pre_visit_directory(&mut self, path: &Path) -> VisitAction {
        let action = self.core.directory_action(path);
        if action == VisitAction::Continue {
            if self.stack.is_empty() {
                self.base_depth = path.components().count();
            }
            self.stack.push(ContentTreeNode::directory(path.to_path_buf()));
        }
        action
    }

    fn post_visit_directory(&mut self, path: &Path) {
        let Some(node) = pop_finished(&mut self.stack, path) else {
            return;
        };
        let level = self.relative_level(path);
        match self.stack.last_mut() {
            Some(parent) => {
                if level <= self.max_level {
                    let copy = node.deep_copy();
                    parent.add(node);
                    self.core.emit(copy);
                } else {
                    parent.add(node);
                }
            }
            None => self.core.emit(node),
        }
    }

    fn visit_file(&mut self, path: &Path) {
        if !self.core.accept_file(path) {
            return;
        }
        match self.stack.last_mut() {
            Some(parent) => parent.add_path(path.to_path_buf()),
            // A file selected on its own is packaged by itself.
            None => self.core.emit(ContentTreeNode::file(path.to_path_buf())),
        }
    }

    fn end(&mut self) {
        if !self.stack.is_empty() {
            log::error!(
                "ClassificationVisitor: {} ended with {} unclosed directories.",
                self.core.id,
                self.stack.len()
            );
            self.stack.clear();
        }
        self.core.finish();
    }
}
