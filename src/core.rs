/*
 * This module consolidates the platform-agnostic classification engine: the
 * path-state registry and the content filter derived from it, the captured content
 * trees and package previews built from them, the classification visitors with the
 * walker and scheduler that drive them, the lazy directory enumerator used for
 * browsing, and the persisted settings. Key types are re-exported here.
 */
pub mod config;
pub mod content_filter;
pub mod events;
pub mod ignore_rules;
pub mod lazy_dir;
pub mod package_preview;
pub mod path_state;
pub mod path_utils;
pub mod scheduler;
pub mod tree_node;
pub mod visitor;
pub mod walker;

pub use config::{ClassifierSettings, ConfigError, ConfigManagerOperations, CoreConfigManager};

pub use content_filter::{ContentFilter, DirectoryProbe, probe_directory};

pub use events::{SubscriptionId, Subscribers};

pub use ignore_rules::IgnoreRules;

pub use lazy_dir::{BATCH_SIZE, EntryKind, LazyDirectoryEnumerator};

pub use package_preview::{
    DEFAULT_REPRESENTATION, MetadataRef, PackageEvent, PackageId, PackagePreview, Representation,
};

pub use path_state::{PathState, PathStateRegistry, RuleId};

pub use scheduler::{JobState, JobStateChange, VisitorScheduler};

pub use tree_node::{ContentTreeNode, NodeChange, NodeKind};

pub use visitor::{
    ClassificationKind, ClassificationVisitor, MIN_PROGRESS_INTERVAL, SharedVisitor, VisitAction,
    VisitorCore, VisitorEvent, WalkProgress, create_visitor,
};

pub use walker::{CancelToken, WalkIssue, WalkOutcome, walk_selection};
