/*
 * The global name-pattern ignore list. Each rule is a regular expression matched
 * against a single path segment (a file or directory name, never a whole path).
 * The list is shared by every content filter of the session; cloning the handle
 * shares the underlying list.
 */
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Arc<RwLock<Vec<Regex>>>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    /*
     * Builds the rule list from textual patterns, typically read from the settings file.
     * Blank entries and `#` comments are skipped. Patterns that fail to compile are
     * logged and dropped so one bad entry cannot disable the whole list.
     */
    pub fn from_patterns(patterns: &[String]) -> Self {
        let rules = IgnoreRules::new();
        for pattern in patterns {
            let trimmed = pattern.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Err(err) = rules.add_pattern(trimmed) {
                log::warn!("IgnoreRules: Invalid ignore pattern '{pattern}': {err}");
            }
        }
        rules
    }

    pub fn add_pattern(&self, pattern: &str) -> Result<(), regex::Error> {
        let compiled = Regex::new(pattern)?;
        let mut patterns = self
            .patterns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if patterns.iter().all(|existing| existing.as_str() != pattern) {
            log::debug!("IgnoreRules: Added pattern '{pattern}'.");
            patterns.push(compiled);
        }
        Ok(())
    }

    pub fn remove_pattern(&self, pattern: &str) -> bool {
        let mut patterns = self
            .patterns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = patterns.len();
        patterns.retain(|existing| existing.as_str() != pattern);
        before != patterns.len()
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.patterns
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|r| r.is_match(name))
    }

    /* Matches the final segment of `path`. Paths without a file name never match. */
    pub fn matches_path(&self, path: &Path) -> bool {
        match path.file_name() {
            Some(name) => self.matches_name(&name.to_string_lossy()),
            None => false,
        }
    }
}
