/*
 * A classification session over one opened source. The session owns the injected
 * path-state registry, the global ignore rules, the scheduler that runs submitted
 * rules, and the directory enumerators handed out to the browser. It is the single
 * entry point a UI or command-line driver talks to.
 *
 * Previews drained through `poll_packages` stay owned by the session so later user
 * actions (ignoring a path) can be applied to them.
 */
use crate::core::{
    ClassificationKind, ClassifierSettings, ConfigError, ConfigManagerOperations, ContentFilter,
    EntryKind, IgnoreRules, JobState, LazyDirectoryEnumerator, MetadataRef, PackagePreview,
    PathState, PathStateRegistry, RuleId, SharedVisitor, VisitorCore, VisitorScheduler,
    WalkOutcome, create_visitor,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/* How long `reset` waits for a cancelled walk to stop before clearing the registry. */
const RESET_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumeratorId(pub u64);

#[derive(Debug)]
pub enum SessionError {
    UnknownRule(RuleId),
    UnknownEnumerator(EnumeratorId),
    SchedulerUnavailable(io::Error),
    InvalidPattern(regex::Error),
    Config(ConfigError),
}

impl From<regex::Error> for SessionError {
    fn from(err: regex::Error) -> Self {
        SessionError::InvalidPattern(err)
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Config(err)
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::UnknownRule(rule) => write!(f, "No rule {rule} in this session"),
            SessionError::UnknownEnumerator(id) => {
                write!(f, "No directory enumerator {} in this session", id.0)
            }
            SessionError::SchedulerUnavailable(e) => {
                write!(f, "Could not start the classification worker: {e}")
            }
            SessionError::InvalidPattern(e) => write!(f, "Invalid ignore pattern: {e}"),
            SessionError::Config(e) => write!(f, "Settings error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::SchedulerUnavailable(e) => Some(e),
            SessionError::InvalidPattern(e) => Some(e),
            SessionError::Config(e) => Some(e),
            SessionError::UnknownRule(_) | SessionError::UnknownEnumerator(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub struct ClassificationSession {
    app_name: String,
    config_manager: Arc<dyn ConfigManagerOperations>,
    settings: ClassifierSettings,
    registry: PathStateRegistry,
    ignore_rules: IgnoreRules,
    scheduler: VisitorScheduler,
    visitors: HashMap<RuleId, SharedVisitor>,
    previews: Vec<PackagePreview>,
    enumerators: HashMap<EnumeratorId, LazyDirectoryEnumerator>,
    next_enumerator_id: u64,
}

impl ClassificationSession {
    /*
     * Opens a session with the settings stored for `app_name`. Settings that cannot be
     * loaded are reported and replaced by the defaults; only a worker thread that
     * cannot be started is fatal.
     */
    pub fn new(app_name: &str, config_manager: Arc<dyn ConfigManagerOperations>) -> Result<Self> {
        let settings = match config_manager.load_settings(app_name) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("ClassificationSession: Could not load settings ({e}), using defaults.");
                ClassifierSettings::default()
            }
        };
        let scheduler = VisitorScheduler::new().map_err(SessionError::SchedulerUnavailable)?;
        log::debug!(
            "ClassificationSession: Opened with {} ignore pattern(s).",
            settings.ignore_patterns.len()
        );
        Ok(ClassificationSession {
            app_name: app_name.to_string(),
            config_manager,
            ignore_rules: settings.ignore_rules(),
            settings,
            registry: PathStateRegistry::new(),
            scheduler,
            visitors: HashMap::new(),
            previews: Vec::new(),
            enumerators: HashMap::new(),
            next_enumerator_id: 1,
        })
    }

    pub fn registry(&self) -> &PathStateRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &VisitorScheduler {
        &self.scheduler
    }

    /* Writes the current settings, including ignore patterns added in this session. */
    pub fn save_settings(&self) -> Result<()> {
        self.config_manager
            .save_settings(&self.app_name, &self.settings)?;
        Ok(())
    }

    /* Builds a visitor for `kind` over `sources` and queues it. */
    pub fn submit_rule(
        &mut self,
        sources: Vec<PathBuf>,
        kind: ClassificationKind,
        metadata: Option<MetadataRef>,
    ) -> RuleId {
        let filter = ContentFilter::for_selection(&self.registry, &self.ignore_rules, &sources);
        let core = VisitorCore::new(
            filter,
            self.registry.clone(),
            metadata,
            self.settings.progress_interval(),
        );
        let visitor = create_visitor(kind, core);
        let rule = self.scheduler.submit(sources, Arc::clone(&visitor));
        log::debug!("ClassificationSession: Submitted {rule} ({kind}).");
        self.visitors.insert(rule, visitor);
        rule
    }

    pub fn visitor(&self, rule: RuleId) -> Option<&SharedVisitor> {
        self.visitors.get(&rule)
    }

    /*
     * Drains the previews `rule` produced since the last poll. The returned slice holds
     * only the newly delivered previews, in discovery order.
     */
    pub fn poll_packages(&mut self, rule: RuleId) -> Result<&[PackagePreview]> {
        let visitor = self
            .visitors
            .get(&rule)
            .ok_or(SessionError::UnknownRule(rule))?;
        let fresh = visitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain_available();
        let start = self.previews.len();
        self.previews.extend(fresh);
        Ok(&self.previews[start..])
    }

    pub fn cancel_rule(&self, rule: RuleId) -> bool {
        self.scheduler.cancel(rule)
    }

    pub fn rule_state(&self, rule: RuleId) -> JobState {
        self.scheduler.state_of(rule)
    }

    pub fn rule_outcome(&self, rule: RuleId) -> Option<WalkOutcome> {
        self.scheduler.outcome_of(rule)
    }

    pub fn wait_for_rule(&self, rule: RuleId, timeout: Duration) -> JobState {
        self.scheduler.wait_for(rule, timeout)
    }

    /* Every preview delivered so far, removed ones included. */
    pub fn packages(&self) -> &[PackagePreview] {
        &self.previews
    }

    pub fn packages_of(&self, rule: RuleId) -> impl Iterator<Item = &PackagePreview> {
        self.previews.iter().filter(move |p| p.rule() == rule)
    }

    /*
     * Marks `path` as ignored. Content at or below `path` is first dropped from every
     * delivered preview and the dropped paths are reverted to NORMAL. Returns false if
     * the path is still mapped by content that was not delivered or was mapped by
     * hand; such a path has to be unmapped first and nothing is changed.
     */
    pub fn ignore_path(&mut self, path: &Path) -> bool {
        let delivered = self
            .previews
            .iter()
            .any(|p| !p.is_removed() && p.contains(path));
        if self.registry.get(path) == PathState::Mapped && !delivered {
            log::warn!(
                "ClassificationSession: {path:?} is mapped outside the delivered previews, not ignoring it."
            );
            return false;
        }
        let mut released = HashSet::new();
        for preview in self.previews.iter_mut().filter(|p| !p.is_removed()) {
            let mut targets: HashSet<PathBuf> = preview
                .content_paths()
                .into_iter()
                .filter(|p| p.starts_with(path))
                .collect();
            if targets.is_empty() {
                continue;
            }
            targets.insert(path.to_path_buf());
            released.extend(preview.ignore_content(&targets));
        }
        if !released.is_empty() {
            log::debug!(
                "ClassificationSession: Ignoring {path:?} released {} path(s) from previews.",
                released.len()
            );
            self.registry.set_all(&released, PathState::Normal);
        }
        self.registry.ignore_path(path)
    }

    pub fn unignore_path(&self, path: &Path) -> bool {
        self.registry.unignore_path(path)
    }

    pub fn map_path(&self, path: &Path, rule: RuleId) -> bool {
        self.registry.map_path(path, rule)
    }

    pub fn unmap_path(&self, path: &Path, rule: RuleId) -> bool {
        self.registry.unmap_path(path, rule)
    }

    /* Adds a global ignore pattern; it applies to rules submitted afterwards. */
    pub fn add_ignore_pattern(&mut self, pattern: &str) -> Result<()> {
        self.ignore_rules.add_pattern(pattern)?;
        if !self.settings.ignore_patterns.iter().any(|p| p == pattern) {
            self.settings.ignore_patterns.push(pattern.to_string());
        }
        Ok(())
    }

    pub fn remove_ignore_pattern(&mut self, pattern: &str) -> bool {
        self.settings.ignore_patterns.retain(|p| p != pattern);
        self.ignore_rules.remove_pattern(pattern)
    }

    pub fn browse_directory(&mut self, path: PathBuf) -> EnumeratorId {
        let id = EnumeratorId(self.next_enumerator_id);
        self.next_enumerator_id += 1;
        log::debug!("ClassificationSession: Browsing {path:?} as enumerator {}.", id.0);
        self.enumerators
            .insert(id, LazyDirectoryEnumerator::new(path, self.settings.show_files));
        id
    }

    pub fn load_more_entries(&mut self, id: EnumeratorId) -> Result<BTreeMap<PathBuf, EntryKind>> {
        Ok(self.enumerator_mut(id)?.load_more())
    }

    pub fn enumerator_mut(&mut self, id: EnumeratorId) -> Result<&mut LazyDirectoryEnumerator> {
        self.enumerators
            .get_mut(&id)
            .ok_or(SessionError::UnknownEnumerator(id))
    }

    pub fn close_enumerator(&mut self, id: EnumeratorId) -> bool {
        self.enumerators.remove(&id).is_some()
    }

    pub fn set_show_files(&mut self, show_files: bool) {
        self.settings.show_files = show_files;
        for enumerator in self.enumerators.values_mut() {
            enumerator.set_show_files(show_files);
        }
    }

    /*
     * Starts over on the same source: running and queued rules are cancelled,
     * delivered previews are removed and every path returns to NORMAL.
     */
    pub fn reset(&mut self) {
        log::debug!(
            "ClassificationSession: Resetting ({} rule(s), {} preview(s)).",
            self.visitors.len(),
            self.previews.len()
        );
        for rule in self.visitors.keys() {
            self.scheduler.cancel(*rule);
        }
        if !self.scheduler.wait_idle(RESET_WAIT) {
            log::error!("ClassificationSession: A cancelled walk is still running during reset.");
        }
        self.visitors.clear();
        for preview in &mut self.previews {
            preview.set_removed();
        }
        self.previews.clear();
        self.enumerators.clear();
        self.registry.reset();
    }
}
