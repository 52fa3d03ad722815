//! Mapping between workspace paths and remote keys.

use std::path::{Component, Path, PathBuf};

/// Lexical bijection between paths under a workspace root and keys under a
/// remote prefix.
///
/// `<root>/.codex/a/b.txt` maps to `<prefix>/.codex/a/b.txt` and back. No
/// normalization happens beyond joining with `/`; keys are case-sensitive.
#[derive(Debug, Clone)]
pub struct KeyMapping {
    root: PathBuf,
    prefix: String,
}

impl KeyMapping {
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Prefix used for remote listings, always ending in `/`.
    pub fn listing_prefix(&self) -> String {
        format!("{}/", self.prefix)
    }

    /// Remote key for a local path, or `None` if the path is outside the
    /// root or not valid UTF-8.
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!("{}/{}", self.prefix, parts.join("/")))
    }

    /// Relative part of a key below the prefix.
    ///
    /// Returns `None` for keys outside the prefix, for the prefix itself and
    /// for pseudo-directory markers (keys ending in `/`).
    pub fn relative_key<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rel = key.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        if rel.is_empty() || rel.ends_with('/') {
            return None;
        }
        Some(rel)
    }

    /// Local path for a remote key, or `None` if the key never maps to a
    /// transferable file.
    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        let rel = self.relative_key(key)?;
        let mut path = self.root.clone();
        for segment in rel.split('/') {
            // Empty segments come from "a//b"; ".." would escape the root.
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
            path.push(segment);
        }
        Some(path)
    }
}
