/*
 * A captured snapshot of a filesystem subtree, as it will be placed in a package.
 * Each node owns its children exclusively; children are kept in a path-ordered map.
 * A node with children is a directory; a childless node is either a file or a
 * directory that was empty when it was captured.
 *
 * Structural changes (add, remove, flatten) are announced through a `Subscribers`
 * hub that is shared by the whole tree, so a package holding the root learns about
 * changes made anywhere below it.
 */
use crate::core::events::{SubscriptionId, Subscribers};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeChange {
    Added(PathBuf),
    Removed(PathBuf),
    Flattened(PathBuf),
}

#[derive(Debug)]
pub struct ContentTreeNode {
    path: PathBuf,
    kind: NodeKind,
    children: BTreeMap<PathBuf, ContentTreeNode>,
    changes: Subscribers<NodeChange>,
}

impl ContentTreeNode {
    pub fn new(path: PathBuf, kind: NodeKind) -> Self {
        ContentTreeNode {
            path,
            kind,
            children: BTreeMap::new(),
            changes: Subscribers::new(),
        }
    }

    pub fn file(path: PathBuf) -> Self {
        Self::new(path, NodeKind::File)
    }

    pub fn directory(path: PathBuf) -> Self {
        Self::new(path, NodeKind::Directory)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory || !self.children.is_empty()
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn children(&self) -> impl Iterator<Item = &ContentTreeNode> {
        self.children.values()
    }

    pub fn child(&self, path: &Path) -> Option<&ContentTreeNode> {
        self.children.get(path)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&NodeChange) + Send + Sync + 'static,
    {
        self.changes.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }

    pub(crate) fn change_hub(&self) -> Subscribers<NodeChange> {
        self.changes.clone()
    }

    /* Copies the subtree onto a fresh change hub with no subscribers. */
    pub fn deep_copy(&self) -> ContentTreeNode {
        let mut copy = ContentTreeNode::new(self.path.clone(), self.kind);
        for (path, child) in &self.children {
            let mut child_copy = child.deep_copy();
            child_copy.changes = copy.changes.clone();
            copy.children.insert(path.clone(), child_copy);
        }
        copy
    }

    /* Moves `self` and its subtree onto another change hub. */
    fn attach_to(&mut self, hub: &Subscribers<NodeChange>) {
        self.changes = hub.clone();
        for child in self.children.values_mut() {
            child.attach_to(hub);
        }
    }

    /* Adds a file node for `path`. An existing child with the same path is replaced. */
    pub fn add_path(&mut self, path: PathBuf) {
        self.add(ContentTreeNode::file(path));
    }

    pub fn add(&mut self, mut node: ContentTreeNode) {
        node.attach_to(&self.changes);
        let added = node.path.clone();
        self.children.insert(added.clone(), node);
        self.changes.notify(&NodeChange::Added(added));
    }

    /* Removes the direct child at `path`, returning it detached from this tree. */
    pub fn remove(&mut self, path: &Path) -> Option<ContentTreeNode> {
        let mut removed = self.children.remove(path)?;
        removed.attach_to(&Subscribers::new());
        self.changes.notify(&NodeChange::Removed(path.to_path_buf()));
        Some(removed)
    }

    /* Own path plus the paths of all descendants. */
    pub fn full_tree_paths(&self) -> HashSet<PathBuf> {
        let mut paths = HashSet::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths(&self, out: &mut HashSet<PathBuf>) {
        out.insert(self.path.clone());
        for child in self.children.values() {
            child.collect_paths(out);
        }
    }

    /* Paths of all leaf nodes below this node (this node's own path excluded). */
    pub fn leaf_paths(&self) -> Vec<PathBuf> {
        let mut leaves = Vec::new();
        for child in self.children.values() {
            if child.has_children() {
                leaves.extend(child.leaf_paths());
            } else {
                leaves.push(child.path.clone());
            }
        }
        leaves
    }

    /*
     * Collapses the subtree so every file becomes a direct child of this node.
     * Directory nodes below this one disappear, including empty ones.
     */
    pub fn flatten(&mut self) {
        let children = std::mem::take(&mut self.children);
        for (_, child) in children {
            for file in child.into_files() {
                self.children.insert(file.path.clone(), file);
            }
        }
        self.changes.notify(&NodeChange::Flattened(self.path.clone()));
    }

    fn into_files(self) -> Vec<ContentTreeNode> {
        if self.kind == NodeKind::File {
            return vec![self];
        }
        let mut files = Vec::new();
        for (_, child) in self.children {
            files.extend(child.into_files());
        }
        files
    }

    /*
     * Removes every descendant whose path is in `targets`, together with its subtree.
     * Returns all paths that left the tree so their registry state can be reverted.
     */
    pub fn ignore_content(&mut self, targets: &HashSet<PathBuf>) -> HashSet<PathBuf> {
        let mut removed = HashSet::new();
        let direct: Vec<PathBuf> = self
            .children
            .keys()
            .filter(|p| targets.contains(*p))
            .cloned()
            .collect();
        for path in direct {
            if let Some(node) = self.remove(&path) {
                removed.extend(node.full_tree_paths());
            }
        }
        for child in self.children.values_mut() {
            removed.extend(child.ignore_content(targets));
        }
        removed
    }
}
