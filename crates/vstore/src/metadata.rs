//! Descriptor of a resolved entry.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::path::Path;

/// What kind of entry a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Index,
    Object,
    Binary,
}

/// A resolved entry's descriptor: category, optional class tag (for
/// objects), the canonical path, the set of backend mount paths that
/// contributed to it, and optional MIME/modified/size.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub category: Category,
    pub class_tag: Option<String>,
    pub path: Path,
    pub backends: BTreeSet<Path>,
    pub mime_type: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

impl Metadata {
    pub fn new(category: Category, path: Path) -> Self {
        Metadata {
            category,
            class_tag: None,
            path,
            backends: BTreeSet::new(),
            mime_type: None,
            modified: None,
            size: None,
        }
    }

    pub fn with_backend(mut self, backend_path: Path) -> Self {
        self.backends.insert(backend_path);
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Merge two descriptors for the same path: `self` is the base, `other`
    /// contributes its backend set (unioned), and the max of modified/size.
    pub fn merge(&self, other: &Self) -> Self {
        let mut backends = self.backends.clone();
        backends.extend(other.backends.iter().cloned());
        Metadata {
            category: self.category,
            class_tag: self.class_tag.clone().or_else(|| other.class_tag.clone()),
            path: self.path.clone(),
            backends,
            mime_type: self.mime_type.clone().or_else(|| other.mime_type.clone()),
            modified: match (self.modified, other.modified) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, None) => a,
                (None, b) => b,
            },
            size: match (self.size, other.size) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, None) => a,
                (None, b) => b,
            },
        }
    }

    /// Rebase this descriptor's path to be relative to `overlay`.
    pub fn rebased(mut self, overlay: &Path) -> Self {
        self.path = self.path.remove_prefix(overlay);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn merge_unions_backends_and_takes_max() {
        let p = Path::parse("/type/alpha").unwrap();
        let b1 = Path::parse("/storage/one/").unwrap();
        let b2 = Path::parse("/storage/two/").unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let a = Metadata::new(Category::Object, p.clone())
            .with_backend(b1.clone())
            .with_modified(t1)
            .with_size(10);
        let b = Metadata::new(Category::Object, p.clone())
            .with_backend(b2.clone())
            .with_modified(t2)
            .with_size(20);

        let merged = a.merge(&b);
        assert_eq!(merged.backends.len(), 2);
        assert_eq!(merged.modified, Some(t2));
        assert_eq!(merged.size, Some(20));
    }
}
