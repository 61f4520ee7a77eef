//! Per-backend memory overlay holding activated `StorableObject`s, with
//! passivation/eviction. Modeled as a memory backend keyed by
//! object paths (extension-stripped), implemented directly against a map
//! rather than through the full [`crate::backend::Backend`] trait — a
//! cache never needs ancestor-index bookkeeping, only leaf entries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex as PMutex, RwLock};

use crate::backend::{BinaryHandle, LoadedValue, StoreValue};
use crate::error::StoreResult;
use crate::index::Index;
use crate::metadata::{Category, Metadata};
use crate::object::StorableObject;
use crate::path::Path;

enum CachedEntry {
    Dictionary(crate::value::Dictionary),
    Binary(BinaryHandle),
    Object(Arc<PMutex<dyn StorableObject>>),
}

/// The memory overlay fronting one eligible, mounted backend.
pub struct Cache {
    backend_path: Path,
    entries: RwLock<HashMap<Path, CachedEntry>>,
}

impl Cache {
    pub fn new(backend_path: Path) -> Self {
        Cache { backend_path, entries: RwLock::new(HashMap::new()) }
    }

    pub fn lookup(&self, object_path: &Path) -> StoreResult<Option<Metadata>> {
        let entries = self.entries.read();
        Ok(entries.get(object_path).map(|e| match e {
            CachedEntry::Dictionary(d) => {
                let mut m = Metadata::new(Category::Object, object_path.clone())
                    .with_backend(self.backend_path.clone());
                m.class_tag = d.get("type").and_then(crate::value::Value::as_str).map(str::to_string);
                m
            }
            CachedEntry::Binary(b) => Metadata::new(Category::Binary, object_path.clone())
                .with_backend(self.backend_path.clone())
                .with_size(b.size()),
            CachedEntry::Object(o) => {
                let guard = o.lock();
                let mut m = Metadata::new(Category::Object, object_path.clone())
                    .with_backend(self.backend_path.clone());
                m.class_tag = Some(guard.type_tag().to_string());
                m
            }
        }))
    }

    /// Returns the cached value, activating it first if it is a
    /// `StorableObject`.
    pub fn load(&self, object_path: &Path) -> StoreResult<Option<LoadedValue>> {
        let entries = self.entries.read();
        Ok(match entries.get(object_path) {
            Some(CachedEntry::Dictionary(d)) => Some(LoadedValue::Dictionary(d.clone())),
            Some(CachedEntry::Binary(b)) => Some(LoadedValue::Binary(b.clone())),
            Some(CachedEntry::Object(o)) => {
                o.lock().activate();
                Some(LoadedValue::Object(o.clone()))
            }
            None => None,
        })
    }

    /// Insert or replace the cached entry at `object_path`, passivating the
    /// incoming object first (it is leaving active use back into the cache)
    /// and destroying any prior object whose identity doesn't survive the
    /// replacement.
    pub fn store(&self, object_path: &Path, value: StoreValue) -> StoreResult<()> {
        if let StoreValue::Object(obj) = &value {
            obj.lock().passivate();
        }
        self.insert(object_path, value)
    }

    /// Insert a cache entry for an object that was just constructed and
    /// activated for the caller, without passivating it. Used when a first
    /// load seeds the cache with the very object it is about to return —
    /// `store` would passivate that same `Arc`, handing the caller back an
    /// object it had just activated.
    pub fn seed(&self, object_path: &Path, value: StoreValue) -> StoreResult<()> {
        self.insert(object_path, value)
    }

    fn insert(&self, object_path: &Path, value: StoreValue) -> StoreResult<()> {
        let new_entry = match value {
            StoreValue::Dictionary(d) => CachedEntry::Dictionary(d),
            StoreValue::Binary(b) => CachedEntry::Binary(b),
            StoreValue::Object(obj) => CachedEntry::Object(obj),
        };

        let mut entries = self.entries.write();
        let prior = entries.insert(object_path.clone(), new_entry);
        if let Some(prior_entry) = prior {
            if let CachedEntry::Object(prior_obj) = prior_entry {
                let same_identity = matches!(
                    entries.get(object_path),
                    Some(CachedEntry::Object(new_obj)) if Arc::ptr_eq(new_obj, &prior_obj)
                );
                if !same_identity {
                    let mut guard = prior_obj.lock();
                    guard.passivate();
                    guard.destroy();
                }
            }
        }
        Ok(())
    }

    /// For each cached path at or under `p`: evict (passivate then
    /// destroy) if it's non-storable, `force` is set, or the object
    /// reports itself inactive; otherwise only passivate.
    pub fn remove(&self, p: &Path, force: bool) -> StoreResult<()> {
        let mut entries = self.entries.write();
        let targets: Vec<Path> = entries.keys().filter(|path| path.starts_with(p)).cloned().collect();
        for path in targets {
            match entries.get(&path) {
                Some(CachedEntry::Object(o)) => {
                    let evict = force || !o.lock().is_active();
                    if evict {
                        if let Some(CachedEntry::Object(o)) = entries.remove(&path) {
                            let mut guard = o.lock();
                            guard.passivate();
                            guard.destroy();
                        }
                    } else {
                        o.lock().passivate();
                    }
                }
                Some(_) => {
                    entries.remove(&path);
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Paths of cached `StorableObject`s with `isModified() == true`.
    pub fn list_modified(&self, p: &Path) -> Vec<Path> {
        self.entries
            .read()
            .iter()
            .filter(|(path, entry)| {
                path.starts_with(p)
                    && matches!(entry, CachedEntry::Object(o) if o.lock().is_modified())
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn backend_path(&self) -> &Path {
        &self.backend_path
    }

    /// A virtual index view of this cache's own entries directly under
    /// `prefix`: immediate children become object names, and deeper entries
    /// contribute their next path component as a sub-index name. Used to
    /// fold cached-but-not-yet-persisted objects into an overlay's merged
    /// index alongside the backend's own listing.
    pub fn synthesize_index(&self, prefix: &Path) -> Index {
        let entries = self.entries.read();
        let mut idx = Index::new();
        for path in entries.keys() {
            if !path.starts_with(prefix) || path == prefix {
                continue;
            }
            let rel = path.remove_prefix(prefix);
            match rel.length() {
                0 => {}
                1 => idx.objects.insert(rel.name()),
                _ => idx.indices.insert(rel.name_at(0).unwrap_or("").to_string()),
            }
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::DictionaryObject;
    use crate::value::{Dictionary, Value};

    fn widget(id: &str) -> Arc<PMutex<dyn StorableObject>> {
        let mut d = Dictionary::new();
        d.insert("id".into(), Value::String(id.into()));
        d.insert("type".into(), Value::String("widget".into()));
        Arc::new(PMutex::new(DictionaryObject::new(d)))
    }

    #[test]
    fn load_activates_storable_object() {
        let cache = Cache::new(Path::parse("/storage/m1/").unwrap());
        let obj = widget("w1");
        cache.store(&Path::parse("/type/w1").unwrap(), StoreValue::Object(obj.clone())).unwrap();
        assert!(!obj.lock().is_active());

        let loaded = cache.load(&Path::parse("/type/w1").unwrap()).unwrap().unwrap();
        match loaded {
            LoadedValue::Object(o) => assert!(o.lock().is_active()),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn seed_does_not_passivate_the_freshly_activated_object() {
        let cache = Cache::new(Path::parse("/storage/m1/").unwrap());
        let obj = widget("w1");
        obj.lock().activate();
        cache.seed(&Path::parse("/type/w1").unwrap(), StoreValue::Object(obj.clone())).unwrap();
        assert!(obj.lock().is_active());
    }

    #[test]
    fn store_replacing_different_object_destroys_old() {
        let cache = Cache::new(Path::parse("/storage/m1/").unwrap());
        let path = Path::parse("/type/w1").unwrap();
        let old = widget("w1");
        cache.store(&path, StoreValue::Object(old.clone())).unwrap();
        let new = widget("w1");
        cache.store(&path, StoreValue::Object(new)).unwrap();

        // old was passivated then destroyed
        let guard = old.lock();
        assert!(!guard.is_active());
    }

    #[test]
    fn remove_force_evicts_active_objects() {
        let cache = Cache::new(Path::parse("/storage/m1/").unwrap());
        let path = Path::parse("/type/w1").unwrap();
        let obj = widget("w1");
        obj.lock().activate();
        cache.store(&path, StoreValue::Object(obj.clone())).unwrap();
        cache.remove(&Path::root(), true).unwrap();
        assert!(cache.lookup(&path).unwrap().is_none());
    }

    #[test]
    fn remove_without_force_only_passivates_active_objects() {
        let cache = Cache::new(Path::parse("/storage/m1/").unwrap());
        let path = Path::parse("/type/w1").unwrap();
        let obj = widget("w1");
        obj.lock().activate();
        cache.store(&path, StoreValue::Object(obj.clone())).unwrap();
        cache.remove(&Path::root(), false).unwrap();
        assert!(cache.lookup(&path).unwrap().is_some());
        assert!(!obj.lock().is_active());
    }

    #[test]
    fn list_modified_finds_dirty_objects() {
        let cache = Cache::new(Path::parse("/storage/m1/").unwrap());
        let clean_path = Path::parse("/type/w1").unwrap();
        let dirty_path = Path::parse("/type/w2").unwrap();

        let mut dirty_dict = Dictionary::new();
        dirty_dict.insert("id".into(), Value::String("w2".into()));
        dirty_dict.insert("type".into(), Value::String("widget".into()));
        let dirty_concrete = Arc::new(PMutex::new(DictionaryObject::new(dirty_dict)));
        let dirty_erased: Arc<PMutex<dyn StorableObject>> = dirty_concrete.clone();

        cache.store(&clean_path, StoreValue::Object(widget("w1"))).unwrap();
        cache.store(&dirty_path, StoreValue::Object(dirty_erased)).unwrap();
        cache.load(&dirty_path).unwrap();
        dirty_concrete.lock().mark_modified();

        let modified = cache.list_modified(&Path::root());
        assert_eq!(modified, vec![dirty_path]);
    }
}
