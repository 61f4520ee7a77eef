//! In-memory backend: a plain map of indices and objects. Used both as a
//! mountable backend in its own right and internally by [`crate::cache::Cache`]
//! (keyed by extension-stripped object paths).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex as PMutex, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::index::Index;
use crate::metadata::{Category, Metadata};
use crate::object::StorableObject;
use crate::path::Path;

use super::{Backend, BackendKind, BinaryHandle, LoadedValue, MountInfo, MountInfoCell, StoreValue};

enum StoredEntry {
    Dict(crate::value::Dictionary),
    Binary(BinaryHandle),
    Object(Arc<PMutex<dyn StorableObject>>),
}

pub struct MemoryBackend {
    info: MountInfoCell,
    indices: RwLock<HashMap<Path, Index>>,
    entries: RwLock<HashMap<Path, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new(id: impl Into<String>) -> Self {
        MemoryBackend {
            info: MountInfoCell::new(MountInfo::unmounted(id, BackendKind::Memory)),
            indices: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn storageinfo_path() -> Path {
        Path::parse("/.storageinfo").unwrap()
    }

    fn register(&self, path: &Path) {
        let mut cur = path.clone();
        loop {
            if cur.is_root() {
                break;
            }
            let parent = cur.parent();
            {
                let mut indices = self.indices.write();
                let entry = indices.entry(parent.clone()).or_insert_with(Index::new);
                if cur.is_index() {
                    entry.indices.insert(cur.name());
                } else {
                    entry.objects.insert(cur.name());
                }
                entry.modified = Some(Utc::now());
            }
            if parent.is_root() {
                break;
            }
            cur = parent;
        }
    }

    fn unregister(&self, path: &Path) {
        let mut cur = path.clone();
        loop {
            if cur.is_root() {
                break;
            }
            let parent = cur.parent();
            let mut drop_parent = false;
            {
                let mut indices = self.indices.write();
                if let Some(entry) = indices.get_mut(&parent) {
                    if cur.is_index() {
                        entry.indices.remove(&cur.name());
                    } else {
                        entry.objects.remove(&cur.name());
                    }
                    entry.modified = Some(Utc::now());
                    if entry.indices.is_empty() && entry.objects.is_empty() && !parent.is_root() {
                        drop_parent = true;
                    }
                }
            }
            if drop_parent {
                self.indices.write().remove(&parent);
            }
            if parent.is_root() {
                break;
            }
            cur = parent;
        }
    }
}

impl Backend for MemoryBackend {
    fn mount_info(&self) -> MountInfo {
        self.info.get()
    }

    fn set_mount_info(&self, info: MountInfo) {
        self.info.set(info)
    }

    fn lookup(&self, path: &Path) -> StoreResult<Option<Metadata>> {
        if *path == Self::storageinfo_path() {
            let mount_time = self.info.get().mount_time;
            return Ok(Some(
                Metadata::new(Category::Object, path.clone()).with_modified(
                    chrono::DateTime::from_timestamp_millis(mount_time as i64).unwrap_or_else(Utc::now),
                ),
            ));
        }
        if path.is_index() {
            let indices = self.indices.read();
            if path.is_root() || indices.contains_key(path) {
                let idx = indices.get(path).cloned().unwrap_or_default();
                let mut m = Metadata::new(Category::Index, path.clone());
                m.modified = idx.modified;
                return Ok(Some(m));
            }
            return Ok(None);
        }
        let entries = self.entries.read();
        match entries.get(path) {
            Some(StoredEntry::Dict(d)) => {
                let mut m = Metadata::new(Category::Object, path.clone());
                m.class_tag = d.get("type").and_then(crate::value::Value::as_str).map(str::to_string);
                Ok(Some(m))
            }
            Some(StoredEntry::Binary(b)) => {
                let mut m = Metadata::new(Category::Binary, path.clone()).with_size(b.size());
                m.mime_type = b.mime_type.clone();
                m.modified = b.modified;
                Ok(Some(m))
            }
            Some(StoredEntry::Object(o)) => {
                let guard = o.lock();
                let mut m = Metadata::new(Category::Object, path.clone());
                m.class_tag = Some(guard.type_tag().to_string());
                Ok(Some(m))
            }
            None => Ok(None),
        }
    }

    fn load(&self, path: &Path) -> StoreResult<Option<LoadedValue>> {
        if *path == Self::storageinfo_path() {
            return Ok(Some(LoadedValue::Dictionary(self.info.get().descriptor())));
        }
        if path.is_index() {
            let indices = self.indices.read();
            if path.is_root() {
                return Ok(Some(indices.get(path).cloned().unwrap_or_default()));
            }
            return Ok(indices.get(path).cloned().map(LoadedValue::Index));
        }
        let entries = self.entries.read();
        Ok(match entries.get(path) {
            Some(StoredEntry::Dict(d)) => Some(LoadedValue::Dictionary(d.clone())),
            Some(StoredEntry::Binary(b)) => Some(LoadedValue::Binary(b.clone())),
            Some(StoredEntry::Object(o)) => Some(LoadedValue::Object(o.clone())),
            None => None,
        })
    }

    fn store(&self, path: &Path, data: StoreValue) -> StoreResult<()> {
        if !self.info.get().read_write {
            return Err(StoreError::ReadOnly(path.to_string()));
        }
        if path.is_index() || *path == Self::storageinfo_path() {
            return Err(StoreError::ReadOnly(path.to_string()));
        }
        let entry = match data {
            StoreValue::Dictionary(d) => StoredEntry::Dict(d),
            StoreValue::Binary(b) => StoredEntry::Binary(b),
            StoreValue::Object(o) => StoredEntry::Object(o),
        };
        self.entries.write().insert(path.clone(), entry);
        self.register(path);
        Ok(())
    }

    fn remove(&self, path: &Path) -> StoreResult<()> {
        if !self.info.get().read_write {
            return Err(StoreError::ReadOnly(path.to_string()));
        }
        if path.is_root() {
            self.entries.write().clear();
            self.indices.write().clear();
            return Ok(());
        }
        if path.is_index() {
            let prefix = path.clone();
            let mut entries = self.entries.write();
            entries.retain(|p, _| !p.starts_with(&prefix));
            drop(entries);
            let mut indices = self.indices.write();
            indices.retain(|p, _| !(p.starts_with(&prefix) && p != &prefix));
            indices.remove(&prefix);
            drop(indices);
            self.unregister(path);
        } else {
            self.entries.write().remove(path);
            self.unregister(path);
        }
        Ok(())
    }

    fn destroy(&self) {
        self.entries.write().clear();
        self.indices.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Dictionary, Value};

    fn rw_backend() -> MemoryBackend {
        let b = MemoryBackend::new("mem1");
        let mut info = b.mount_info();
        info.read_write = true;
        info.mount_path = Path::parse("/storage/mem1/").unwrap();
        b.set_mount_info(info);
        b
    }

    fn dict(id: &str) -> Dictionary {
        let mut d = Dictionary::new();
        d.insert("id".into(), Value::String(id.into()));
        d.insert("type".into(), Value::String("type".into()));
        d
    }

    #[test]
    fn store_registers_ancestors() {
        let b = rw_backend();
        b.store(&Path::parse("/type/alpha").unwrap(), StoreValue::Dictionary(dict("alpha"))).unwrap();

        let root_idx = b.load(&Path::root()).unwrap().unwrap();
        match root_idx {
            LoadedValue::Index(i) => assert!(i.indices.contains("type")),
            _ => panic!("expected index"),
        }
        let type_idx = b.load(&Path::parse("/type/").unwrap()).unwrap().unwrap();
        match type_idx {
            LoadedValue::Index(i) => assert!(i.objects.contains("alpha")),
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn remove_cleans_up_empty_ancestors() {
        let b = rw_backend();
        let p = Path::parse("/type/alpha").unwrap();
        b.store(&p, StoreValue::Dictionary(dict("alpha"))).unwrap();
        b.remove(&p).unwrap();

        let root_idx = b.load(&Path::root()).unwrap().unwrap();
        match root_idx {
            LoadedValue::Index(i) => assert!(!i.indices.contains("type")),
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn storeinfo_is_read_only() {
        let b = rw_backend();
        let res = b.store(
            &Path::parse("/.storageinfo").unwrap(),
            StoreValue::Dictionary(dict("x")),
        );
        assert!(matches!(res, Err(StoreError::ReadOnly(_))));
    }

    #[test]
    fn read_only_backend_rejects_store() {
        let b = MemoryBackend::new("ro");
        let res = b.store(&Path::parse("/a").unwrap(), StoreValue::Dictionary(dict("a")));
        assert!(matches!(res, Err(StoreError::ReadOnly(_))));
    }
}
