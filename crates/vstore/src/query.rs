//! Fluent, depth-first, lazily-streaming traversal over object paths.

use std::sync::Arc;

use crate::backend::LoadedValue;
use crate::error::StoreResult;
use crate::index::Index;
use crate::metadata::Metadata;
use crate::path::Path;

/// What `Query` needs from whatever it traverses. `RootStorage` is the only
/// implementor, but the seam keeps traversal testable against a bare
/// backend or an in-memory fixture.
pub trait Queryable: Send + Sync {
    fn query_index(&self, path: &Path) -> StoreResult<Option<Index>>;
    fn query_lookup(&self, path: &Path) -> StoreResult<Option<Metadata>>;
    fn query_load(&self, path: &Path) -> StoreResult<Option<LoadedValue>>;
}

type PredicateFn = dyn Fn(&Path) -> bool + Send + Sync;

/// A builder over a base storage and base path. Cloning a `Query` is cheap
/// (the predicate/permission closures are reference-counted).
#[derive(Clone)]
pub struct Query {
    storage: Arc<dyn Queryable>,
    base: Path,
    include_hidden: bool,
    max_depth: Option<usize>,
    extension: Option<String>,
    predicates: Vec<Arc<PredicateFn>>,
    permission: Option<Arc<PredicateFn>>,
}

impl Query {
    pub fn new(storage: Arc<dyn Queryable>, base: Path) -> Self {
        Query {
            storage,
            base,
            include_hidden: false,
            max_depth: None,
            extension: None,
            predicates: Vec::new(),
            permission: None,
        }
    }

    pub fn include_hidden(mut self, yes: bool) -> Self {
        self.include_hidden = yes;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }

    /// AND-composed with any previously added predicate.
    pub fn filter(mut self, f: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.predicates.push(Arc::new(f));
        self
    }

    pub fn permission(mut self, f: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.permission = Some(Arc::new(f));
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        if let Some(ext) = &self.extension {
            if !path.name().ends_with(ext.as_str()) {
                return false;
            }
        }
        if let Some(perm) = &self.permission {
            if !perm(path) {
                return false;
            }
        }
        self.predicates.iter().all(|p| p(path))
    }

    /// Streams matching leaf paths, depth-first.
    pub fn paths(&self) -> QueryIter<'_> {
        let mut iter = QueryIter { query: self, frames: Vec::new() };
        if let Ok(Some(idx)) = self.storage.query_index(&self.base) {
            iter.frames.push(Frame::new(self.base.clone(), 0, idx, self.include_hidden));
        }
        iter
    }

    /// Streams `(path, metadata)` pairs, dropping paths whose lookup
    /// returns nothing (removed between traversal and lookup).
    pub fn metadata(&self) -> impl Iterator<Item = (Path, Metadata)> + '_ {
        self.paths().filter_map(move |p| {
            let m = self.storage.query_lookup(&p).ok().flatten()?;
            Some((p, m))
        })
    }

    /// Streams `(path, value)` pairs for every path whose load succeeds.
    pub fn objects(&self) -> impl Iterator<Item = (Path, LoadedValue)> + '_ {
        self.paths().filter_map(move |p| {
            let v = self.storage.query_load(&p).ok().flatten()?;
            Some((p, v))
        })
    }

    /// Metadata whose class tag equals `class_tag`.
    pub fn typed(&self, class_tag: &str) -> impl Iterator<Item = (Path, Metadata)> + '_ {
        let class_tag = class_tag.to_string();
        self.metadata().filter(move |(_, m)| m.class_tag.as_deref() == Some(class_tag.as_str()))
    }
}

struct Frame {
    index_path: Path,
    depth: usize,
    sub_indices: std::vec::IntoIter<String>,
    objects: std::vec::IntoIter<String>,
}

impl Frame {
    fn new(index_path: Path, depth: usize, idx: Index, include_hidden: bool) -> Self {
        let sub_indices: Vec<String> = if include_hidden {
            idx.indices.iter().map(str::to_string).collect()
        } else {
            idx.visible_indices().into_iter().map(str::to_string).collect()
        };
        let objects: Vec<String> = if include_hidden {
            idx.objects.iter().map(str::to_string).collect()
        } else {
            idx.visible_objects().into_iter().map(str::to_string).collect()
        };
        Frame { index_path, depth, sub_indices: sub_indices.into_iter(), objects: objects.into_iter() }
    }
}

/// Lazy depth-first walk: an explicit frame stack stands in for the
/// recursion so traversal can pause between `next()` calls rather than
/// materializing the whole tree up front.
pub struct QueryIter<'a> {
    query: &'a Query,
    frames: Vec<Frame>,
}

impl<'a> Iterator for QueryIter<'a> {
    type Item = Path;

    fn next(&mut self) -> Option<Path> {
        loop {
            let frame = self.frames.last_mut()?;
            if let Some(name) = frame.objects.next() {
                let leaf = frame.index_path.child(&name, false);
                if self.query.accepts(&leaf) {
                    return Some(leaf);
                }
                continue;
            }
            if let Some(name) = frame.sub_indices.next() {
                let within_depth = match self.query.max_depth {
                    Some(max) => frame.depth < max,
                    None => true,
                };
                if within_depth {
                    let child_path = frame.index_path.child(&name, true);
                    if let Ok(Some(child_idx)) = self.query.storage.query_index(&child_path) {
                        let depth = frame.depth + 1;
                        self.frames.push(Frame::new(child_path, depth, child_idx, self.query.include_hidden));
                    }
                }
                continue;
            }
            self.frames.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Category;
    use crate::value::{Dictionary, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Fixture {
        indices: HashMap<Path, Index>,
        objects: Mutex<HashMap<Path, Dictionary>>,
    }

    impl Queryable for Fixture {
        fn query_index(&self, path: &Path) -> StoreResult<Option<Index>> {
            Ok(self.indices.get(path).cloned())
        }
        fn query_lookup(&self, path: &Path) -> StoreResult<Option<Metadata>> {
            Ok(self.objects.lock().unwrap().get(path).map(|d| {
                let mut m = Metadata::new(Category::Object, path.clone());
                m.class_tag = d.get("type").and_then(Value::as_str).map(str::to_string);
                m
            }))
        }
        fn query_load(&self, path: &Path) -> StoreResult<Option<LoadedValue>> {
            Ok(self.objects.lock().unwrap().get(path).cloned().map(LoadedValue::Dictionary))
        }
    }

    fn dict(ty: &str) -> Dictionary {
        let mut d = Dictionary::new();
        d.insert("type".into(), Value::String(ty.into()));
        d
    }

    fn fixture() -> Fixture {
        let root = Path::root();
        let type_dir = Path::parse("/type/").unwrap();
        let nested_dir = Path::parse("/type/nested/").unwrap();

        let mut root_idx = Index::new();
        root_idx.indices.insert("type");
        let mut type_idx = Index::new();
        type_idx.objects.insert("alpha");
        type_idx.objects.insert(".hidden");
        type_idx.indices.insert("nested");
        let mut nested_idx = Index::new();
        nested_idx.objects.insert("beta");

        let mut indices = HashMap::new();
        indices.insert(root, root_idx);
        indices.insert(type_dir, type_idx);
        indices.insert(nested_dir, nested_idx);

        let mut objects = HashMap::new();
        objects.insert(Path::parse("/type/alpha").unwrap(), dict("widget"));
        objects.insert(Path::parse("/type/.hidden").unwrap(), dict("widget"));
        objects.insert(Path::parse("/type/nested/beta").unwrap(), dict("gadget"));

        Fixture { indices, objects: Mutex::new(objects) }
    }

    #[test]
    fn streams_leaves_depth_first_and_skips_hidden() {
        let q = Query::new(Arc::new(fixture()), Path::root());
        let paths: Vec<String> = q.paths().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/type/alpha", "/type/nested/beta"]);
    }

    #[test]
    fn include_hidden_surfaces_dot_prefixed_names() {
        let q = Query::new(Arc::new(fixture()), Path::root()).include_hidden(true);
        let paths: Vec<String> = q.paths().map(|p| p.to_string()).collect();
        assert!(paths.contains(&"/type/.hidden".to_string()));
    }

    #[test]
    fn max_depth_stops_recursion() {
        let q = Query::new(Arc::new(fixture()), Path::root()).max_depth(1);
        let paths: Vec<String> = q.paths().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/type/alpha"]);
    }

    #[test]
    fn typed_filters_by_class_tag() {
        let q = Query::new(Arc::new(fixture()), Path::root());
        let typed: Vec<String> = q.typed("gadget").map(|(p, _)| p.to_string()).collect();
        assert_eq!(typed, vec!["/type/nested/beta"]);
    }
}
