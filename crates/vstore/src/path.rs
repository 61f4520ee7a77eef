//! Immutable, hierarchical path addressing.
//!
//! A [`Path`] is an ordered sequence of non-empty name components plus an
//! index flag distinguishing a container address (`/a/b/`) from a leaf
//! address (`/a/b`). Paths are value types: equality and hashing fold each
//! component case-insensitively, but the original casing of the most
//! recently constructed instance is what gets rendered back out.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{StoreError, StoreResult};

/// A hierarchical, slash-addressed path.
#[derive(Debug, Clone, Default)]
pub struct Path {
    components: Vec<String>,
    is_index: bool,
}

impl Path {
    /// The root path: zero components, index flag set.
    pub fn root() -> Self {
        Path { components: Vec::new(), is_index: true }
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn is_index(&self) -> bool {
        self.is_index
    }

    /// Number of directory steps: for an index path every component is a
    /// step down; for a leaf path the final component is the leaf itself.
    pub fn depth(&self) -> usize {
        if self.is_index {
            self.components.len()
        } else {
            self.components.len().saturating_sub(1)
        }
    }

    /// Total number of components (leaf or not).
    pub fn length(&self) -> usize {
        self.components.len()
    }

    /// The last component, or `""` at the root.
    pub fn name(&self) -> &str {
        self.components.last().map(String::as_str).unwrap_or("")
    }

    /// The `i`-th component (0-indexed), or `None` out of range.
    pub fn name_at(&self, i: usize) -> Option<&str> {
        self.components.get(i).map(String::as_str)
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Parse a `/`-separated string. A trailing `/` marks an index path.
    /// `..` components are resolved greedily against the accumulated parent;
    /// a `..` past the root stays at the root. Empty components anywhere
    /// other than a single trailing slash are a syntax error.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        if trimmed.is_empty() {
            return Ok(Path::root());
        }
        let is_index = trimmed.ends_with('/');
        let body = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Path::root());
        }

        let mut stack: Vec<String> = Vec::new();
        for seg in body.split('/') {
            match seg {
                "" => return Err(StoreError::PathSyntax(raw.to_string())),
                "." => continue,
                ".." => {
                    stack.pop();
                }
                name => stack.push(name.to_string()),
            }
        }
        Ok(Path { components: stack, is_index })
    }

    /// Resolve `rel` relative to `parent`. A non-index parent resolves
    /// against its own parent first (you can't descend from a leaf).
    pub fn resolve(parent: &Path, rel: &str) -> StoreResult<Self> {
        let base = if parent.is_index { parent.clone() } else { parent.parent() };
        let relative = Path::parse(rel)?;
        let mut components = base.components;
        components.extend(relative.components);
        Ok(Path { components, is_index: relative.is_index })
    }

    /// The containing index path. The parent of the root is the root.
    pub fn parent(&self) -> Path {
        if self.components.is_empty() {
            return Path::root();
        }
        let mut components = self.components.clone();
        components.pop();
        Path { components, is_index: true }
    }

    /// A child of this path. If `self` is not an index, the child is
    /// rooted at `self`'s parent instead (descending from a leaf makes no
    /// sense, so we fall back one level).
    pub fn child(&self, name: &str, is_index: bool) -> Path {
        let mut base = if self.is_index { self.clone() } else { self.parent() };
        base.components.push(name.to_string());
        base.is_index = is_index;
        base
    }

    /// Same parent, same index flag, new last component.
    pub fn sibling(&self, name: &str) -> Path {
        let mut parent = self.parent();
        parent.components.push(name.to_string());
        parent.is_index = self.is_index;
        parent
    }

    /// True if `self` is addressed under `other` (prefix match on
    /// components up to `other`'s length). If the lengths are equal the
    /// index flags must also agree. If `other` is strictly shorter it must
    /// itself be an index — nothing can live "under" a leaf.
    pub fn starts_with(&self, other: &Path) -> bool {
        if other.components.len() > self.components.len() {
            return false;
        }
        if !Self::components_eq_ci(&self.components[..other.components.len()], &other.components) {
            return false;
        }
        if other.components.len() == self.components.len() {
            self.is_index == other.is_index
        } else {
            other.is_index
        }
    }

    /// The relative path of `self` under `other`. Caller should ensure
    /// `starts_with(other)` holds; out-of-range prefixes just clamp.
    pub fn remove_prefix(&self, other: &Path) -> Path {
        let n = other.components.len().min(self.components.len());
        Path {
            components: self.components[n..].to_vec(),
            is_index: self.is_index,
        }
    }

    fn components_eq_ci(a: &[String], b: &[String]) -> bool {
        a.len() == b.len()
            && a.iter().zip(b.iter()).all(|(x, y)| x.eq_ignore_ascii_case(y))
    }

    /// Rebase `relative` (itself root-relative) underneath `prefix` — the
    /// inverse of [`Path::remove_prefix`]. Used to turn a backend-local
    /// object path back into an absolute path once it's known which mount
    /// or overlay it came from.
    pub fn rebased_under(prefix: &Path, relative: &Path) -> Path {
        let mut components = prefix.components.clone();
        components.extend(relative.components.iter().cloned());
        Path { components, is_index: relative.is_index }
    }

    /// True under `/files/*`, `/lib/*`, or `/storage/*` — the binary-path
    /// prefixes whose subtrees hold raw files rather than structured
    /// dictionaries, so backends must not extension-normalize object names
    /// or apply extension-fallback leaf resolution under them.
    pub fn is_binary_path(&self) -> bool {
        matches!(
            self.components.first().map(|c| c.to_ascii_lowercase()).as_deref(),
            Some("files") | Some("lib") | Some("storage")
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{c}")?;
        }
        if self.is_index && !self.components.is_empty() {
            write!(f, "/")?;
        }
        Ok(())
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.is_index == other.is_index && Self::components_eq_ci(&self.components, &other.components)
    }
}
impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_index.hash(state);
        for c in &self.components {
            c.to_lowercase().hash(state);
        }
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let a: Vec<String> = self.components.iter().map(|c| c.to_lowercase()).collect();
        let b: Vec<String> = other.components.iter().map(|c| c.to_lowercase()).collect();
        a.cmp(&b).then(self.is_index.cmp(&other.is_index))
    }
}
impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_root() {
        let p = Path::parse("/").unwrap();
        assert!(p.is_root());
        assert!(p.is_index());
        assert_eq!(p.to_string(), "/");
    }

    #[test]
    fn parses_index_and_leaf() {
        let idx = Path::parse("/a/b/").unwrap();
        assert!(idx.is_index());
        assert_eq!(idx.to_string(), "/a/b/");

        let leaf = Path::parse("/a/b").unwrap();
        assert!(!leaf.is_index());
        assert_eq!(leaf.to_string(), "/a/b");
    }

    #[test]
    fn rejects_embedded_empty_components() {
        assert!(Path::parse("/a//b").is_err());
    }

    #[test]
    fn dotdot_resolves_greedily_and_clamps_at_root() {
        let p = Path::parse("/a/b/../../../c").unwrap();
        assert_eq!(p.to_string(), "/c");
    }

    #[test]
    fn case_insensitive_equality_and_hash() {
        let a = Path::parse("/Storage/Plugin/").unwrap();
        let b = Path::parse("/storage/plugin/").unwrap();
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        let mut ha = DefaultHasher::new();
        a.hash(&mut ha);
        let mut hb = DefaultHasher::new();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn starts_with_and_remove_prefix() {
        let p = Path::parse("/a/b/c").unwrap();
        let q = Path::parse("/a/b/").unwrap();
        assert!(p.starts_with(&q));
        let rel = p.remove_prefix(&q);
        assert_eq!(rel.to_string(), "/c");
        assert_eq!(rel.length() + q.length(), p.length());
    }

    #[test]
    fn starts_with_rejects_under_a_leaf() {
        let p = Path::parse("/a/b/c").unwrap();
        let leaf = Path::parse("/a/b").unwrap();
        assert!(!p.starts_with(&leaf));
    }

    #[test]
    fn sibling_preserves_index_flag() {
        let idx = Path::parse("/a/b/").unwrap();
        let s = idx.sibling("c");
        assert!(s.is_index());
        assert_eq!(s.to_string(), "/a/c/");
    }

    #[test]
    fn child_from_leaf_falls_back_to_parent() {
        let leaf = Path::parse("/a/b").unwrap();
        let c = leaf.child("c", false);
        assert_eq!(c.to_string(), "/a/c");
    }

    #[test]
    fn is_binary_path_matches_known_prefixes_case_insensitively() {
        assert!(Path::parse("/files/report.xml").unwrap().is_binary_path());
        assert!(Path::parse("/Lib/alpha").unwrap().is_binary_path());
        assert!(Path::parse("/storage/local/").unwrap().is_binary_path());
        assert!(!Path::parse("/type/alpha").unwrap().is_binary_path());
        assert!(!Path::root().is_binary_path());
    }

    #[test]
    fn depth_counts_directory_steps() {
        assert_eq!(Path::parse("/a/b/").unwrap().depth(), 2);
        assert_eq!(Path::parse("/a/b").unwrap().depth(), 1);
        assert_eq!(Path::root().depth(), 0);
    }
}
