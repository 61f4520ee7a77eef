//! Mergeable listings of named sub-indices and objects at one level.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A sorted, case-insensitively deduplicated set of names. Internally keyed
/// by the lower-cased form so lookups and merges fold case, while the
/// canonical casing iteration yields is whichever insert most recently
/// touched that fold key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiNameSet {
    by_fold: BTreeMap<String, String>,
}

impl CiNameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.by_fold.insert(name.to_lowercase(), name);
    }

    pub fn remove(&mut self, name: &str) {
        self.by_fold.remove(&name.to_lowercase());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_fold.contains_key(&name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.by_fold.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_fold.len()
    }

    /// Iterate canonical names, sorted by their case-folded form.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.by_fold.values().map(String::as_str)
    }

    pub fn merge(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for name in other.iter() {
            out.insert(name);
        }
        out
    }
}

impl FromIterator<String> for CiNameSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

/// A container value: the sub-indices and objects immediately beneath one
/// path, plus an optional last-modified timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub indices: CiNameSet,
    pub objects: CiNameSet,
    pub modified: Option<DateTime<Utc>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible (non-hidden, i.e. not `.`-prefixed) names in each set.
    pub fn visible_indices(&self) -> Vec<&str> {
        self.indices.iter().filter(|n| !n.starts_with('.')).collect()
    }

    pub fn visible_objects(&self) -> Vec<&str> {
        self.objects.iter().filter(|n| !n.starts_with('.')).collect()
    }

    /// Union of both name sets, max of timestamps. Associative and
    /// commutative on the name sets (property 5).
    pub fn merge(&self, other: &Self) -> Self {
        Index {
            indices: self.indices.merge(&other.indices),
            objects: self.objects.merge(&other.objects),
            modified: match (self.modified, other.modified) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, None) => a,
                (None, b) => b,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn idx(indices: &[&str], objects: &[&str], modified: Option<DateTime<Utc>>) -> Index {
        Index {
            indices: indices.iter().map(|s| s.to_string()).collect(),
            objects: objects.iter().map(|s| s.to_string()).collect(),
            modified,
        }
    }

    #[test]
    fn merge_is_commutative_and_associative_on_names() {
        let a = idx(&["a", "B"], &["x"], None);
        let b = idx(&["b", "C"], &["y"], None);
        let c = idx(&["D"], &["z"], None);

        let ab = a.merge(&b);
        let ba = b.merge(&a);
        assert_eq!(ab.indices, ba.indices);
        assert_eq!(ab.objects, ba.objects);

        let left = a.merge(&b).merge(&c);
        let right = a.merge(&b.merge(&c));
        assert_eq!(left.indices, right.indices);
        assert_eq!(left.objects, right.objects);
    }

    #[test]
    fn merge_dedupes_case_insensitively() {
        let a = idx(&["Alpha"], &[], None);
        let b = idx(&["alpha"], &[], None);
        let merged = a.merge(&b);
        assert_eq!(merged.indices.len(), 1);
    }

    #[test]
    fn merge_takes_max_modified() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let a = idx(&[], &[], Some(t1));
        let b = idx(&[], &[], Some(t2));
        assert_eq!(a.merge(&b).modified, Some(t2));
    }

    #[test]
    fn hidden_names_excluded_from_visible() {
        let i = idx(&[".secret", "visible"], &[".hiddenobj", "obj"], None);
        assert_eq!(i.visible_indices(), vec!["visible"]);
        assert_eq!(i.visible_objects(), vec!["obj"]);
    }
}
