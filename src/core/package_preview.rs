/*
 * An in-memory description of one future archival package, before it is serialized
 * by an external collaborator. A preview groups captured content trees into named
 * representations and keeps an optional set of documentation trees.
 *
 * The preview subscribes to the change hubs of every tree it holds, so a structural
 * change anywhere in its content sets `modified`. Once `removed` is set the preview is
 * finished and must not be reused; further mutations are ignored.
 */
use crate::core::events::{SubscriptionId, Subscribers};
use crate::core::path_state::RuleId;
use crate::core::tree_node::{ContentTreeNode, NodeChange};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const DEFAULT_REPRESENTATION: &str = "rep1";

static NEXT_PACKAGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(u64);

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pkg-{}", self.0)
    }
}

/*
 * Opaque reference to the metadata template chosen for a rule. Rendering the template
 * is done elsewhere; the core only carries the reference along with each preview.
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEvent {
    Modified(PackageId),
    Removed(PackageId),
}

#[derive(Debug)]
pub struct Representation {
    name: String,
    roots: BTreeMap<PathBuf, ContentTreeNode>,
}

impl Representation {
    fn new(name: &str) -> Self {
        Representation {
            name: name.to_string(),
            roots: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roots(&self) -> impl Iterator<Item = &ContentTreeNode> {
        self.roots.values()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[derive(Debug)]
pub struct PackagePreview {
    id: PackageId,
    name: String,
    rule: RuleId,
    metadata: Option<MetadataRef>,
    representations: Vec<Representation>,
    documentation: BTreeMap<PathBuf, ContentTreeNode>,
    modified: Arc<AtomicBool>,
    removed: bool,
    events: Subscribers<PackageEvent>,
    tree_subscriptions: Vec<(Subscribers<NodeChange>, SubscriptionId)>,
}

impl PackagePreview {
    pub fn new(name: String, rule: RuleId, metadata: Option<MetadataRef>) -> Self {
        let id = PackageId(NEXT_PACKAGE_ID.fetch_add(1, Ordering::Relaxed));
        log::trace!("PackagePreview: Created {id} '{name}' for {rule}.");
        PackagePreview {
            id,
            name,
            rule,
            metadata,
            representations: Vec::new(),
            documentation: BTreeMap::new(),
            modified: Arc::new(AtomicBool::new(false)),
            removed: false,
            events: Subscribers::new(),
            tree_subscriptions: Vec::new(),
        }
    }

    /* A preview named after the root it holds, with that root as its only content. */
    pub fn with_root(root: ContentTreeNode, rule: RuleId, metadata: Option<MetadataRef>) -> Self {
        let mut preview = PackagePreview::new(root.name(), rule, metadata);
        preview.add_content(DEFAULT_REPRESENTATION, root);
        preview.clear_modified();
        preview
    }

    /* Acknowledges the changes seen so far, e.g. once a consumer has re-rendered. */
    pub fn clear_modified(&self) {
        self.modified.store(false, Ordering::SeqCst);
    }

    pub fn id(&self) -> PackageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> RuleId {
        self.rule
    }

    pub fn metadata(&self) -> Option<&MetadataRef> {
        self.metadata.as_ref()
    }

    pub fn representations(&self) -> &[Representation] {
        &self.representations
    }

    pub fn documentation(&self) -> impl Iterator<Item = &ContentTreeNode> {
        self.documentation.values()
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PackageEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /* Forwards structural changes of `node`'s tree into this preview's state. */
    fn watch(&mut self, node: &ContentTreeNode) {
        let modified = Arc::clone(&self.modified);
        let events = self.events.clone();
        let id = self.id;
        let hub = node.change_hub();
        let subscription = node.subscribe(move |_change| {
            modified.store(true, Ordering::SeqCst);
            events.notify(&PackageEvent::Modified(id));
        });
        self.tree_subscriptions.push((hub, subscription));
    }

    fn mark_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
        self.events.notify(&PackageEvent::Modified(self.id));
    }

    pub fn add_content(&mut self, representation: &str, root: ContentTreeNode) {
        if self.removed {
            log::warn!("PackagePreview: Ignoring content added to removed {}.", self.id);
            return;
        }
        self.watch(&root);
        let index = match self
            .representations
            .iter()
            .position(|r| r.name == representation)
        {
            Some(index) => index,
            None => {
                self.representations.push(Representation::new(representation));
                self.representations.len() - 1
            }
        };
        self.representations[index]
            .roots
            .insert(root.path().to_path_buf(), root);
        self.mark_modified();
    }

    pub fn add_documentation(&mut self, root: ContentTreeNode) {
        if self.removed {
            log::warn!("PackagePreview: Ignoring documentation added to removed {}.", self.id);
            return;
        }
        self.watch(&root);
        self.documentation.insert(root.path().to_path_buf(), root);
        self.mark_modified();
    }

    fn all_roots(&self) -> impl Iterator<Item = &ContentTreeNode> {
        self.representations
            .iter()
            .flat_map(|r| r.roots.values())
            .chain(self.documentation.values())
    }

    /* Every path captured by this preview, documentation included. */
    pub fn content_paths(&self) -> HashSet<PathBuf> {
        let mut paths = HashSet::new();
        for root in self.all_roots() {
            paths.extend(root.full_tree_paths());
        }
        paths
    }

    /* Number of leaf entries in the representations. */
    pub fn file_count(&self) -> usize {
        self.representations
            .iter()
            .flat_map(|r| r.roots.values())
            .map(|root| {
                if root.has_children() {
                    root.leaf_paths().len()
                } else {
                    1
                }
            })
            .sum()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.all_roots()
            .any(|root| root.full_tree_paths().contains(path))
    }

    pub fn flatten(&mut self) {
        if self.removed {
            return;
        }
        for representation in &mut self.representations {
            for root in representation.roots.values_mut() {
                root.flatten();
            }
        }
    }

    /*
     * Drops the captured content at `targets` from every tree of this preview. Whole
     * roots are dropped when targeted directly. A preview left without representation
     * content is marked removed. Returns every path that left the preview.
     */
    pub fn ignore_content(&mut self, targets: &HashSet<PathBuf>) -> HashSet<PathBuf> {
        let mut removed = HashSet::new();
        if self.removed {
            return removed;
        }
        let mut roots_dropped = false;
        for representation in &mut self.representations {
            removed.extend(ignore_in_roots(&mut representation.roots, targets, &mut roots_dropped));
        }
        self.representations.retain(|r| !r.is_empty());
        removed.extend(ignore_in_roots(&mut self.documentation, targets, &mut roots_dropped));
        if roots_dropped {
            self.mark_modified();
        }
        if self.representations.is_empty() {
            log::debug!("PackagePreview: {} lost all content and is removed.", self.id);
            self.set_removed();
        }
        removed
    }

    pub fn set_removed(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        for (hub, subscription) in self.tree_subscriptions.drain(..) {
            hub.unsubscribe(subscription);
        }
        self.events.notify(&PackageEvent::Removed(self.id));
    }
}

fn ignore_in_roots(
    roots: &mut BTreeMap<PathBuf, ContentTreeNode>,
    targets: &HashSet<PathBuf>,
    roots_dropped: &mut bool,
) -> HashSet<PathBuf> {
    let mut removed = HashSet::new();
    let direct: Vec<PathBuf> = roots
        .keys()
        .filter(|p| targets.contains(*p))
        .cloned()
        .collect();
    for path in direct {
        if let Some(root) = roots.remove(&path) {
            removed.extend(root.full_tree_paths());
            *roots_dropped = true;
        }
    }
    for root in roots.values_mut() {
        removed.extend(root.ignore_content(targets));
    }
    removed
}
