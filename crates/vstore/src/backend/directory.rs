//! Directory backend: each index is a real directory, each object a
//! recognized data file or arbitrary binary. Writes are crash-safe
//! (serialize to a temp sibling, then rename).

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::index::Index;
use crate::metadata::{Category, Metadata};
use crate::path::Path;
use crate::serializer::{self, RECOGNIZED_EXTENSIONS};
use crate::value::Value;

use super::{Backend, BackendKind, BinaryHandle, LoadedValue, MountInfo, MountInfoCell, StoreValue};

pub struct DirectoryBackend {
    info: MountInfoCell,
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn open(id: impl Into<String>, root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::Io(format!("{} is not a directory", root.display())));
        }
        Ok(DirectoryBackend { info: MountInfoCell::new(MountInfo::unmounted(id, BackendKind::Directory)), root })
    }

    fn storageinfo_path() -> Path {
        Path::parse("/.storageinfo").unwrap()
    }

    fn fs_dir(&self, index_path: &Path) -> PathBuf {
        let mut p = self.root.clone();
        for c in index_path.components() {
            p.push(c);
        }
        p
    }

    /// Resolve a leaf path to an on-disk file, trying the literal name
    /// first and then each recognized extension. Binary-path subtrees
    /// (`/files/*`, `/lib/*`, `/storage/*`) skip the extension fallback
    /// entirely — a literal match there is always treated as raw binary.
    fn resolve_leaf(&self, path: &Path) -> Option<(PathBuf, Option<&'static str>)> {
        let dir = self.fs_dir(&path.parent());
        let literal = dir.join(path.name());
        if path.is_binary_path() {
            return literal.is_file().then_some((literal, None));
        }
        if literal.is_file() {
            let ext = RECOGNIZED_EXTENSIONS.iter().copied().find(|e| path.name().ends_with(e));
            return Some((literal, ext));
        }
        for ext in RECOGNIZED_EXTENSIONS {
            let candidate = dir.join(format!("{}{}", path.name(), ext));
            if candidate.is_file() {
                return Some((candidate, Some(ext)));
            }
        }
        None
    }

    fn mtime(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
        meta.modified().ok().map(DateTime::<Utc>::from)
    }
}

impl Backend for DirectoryBackend {
    fn mount_info(&self) -> MountInfo {
        self.info.get()
    }

    fn set_mount_info(&self, info: MountInfo) {
        self.info.set(info)
    }

    fn lookup(&self, path: &Path) -> StoreResult<Option<Metadata>> {
        if *path == Self::storageinfo_path() {
            let info = self.info.get();
            return Ok(Some(
                Metadata::new(Category::Object, path.clone()).with_modified(
                    DateTime::from_timestamp_millis(info.mount_time as i64).unwrap_or_else(Utc::now),
                ),
            ));
        }
        if path.is_index() {
            let dir = self.fs_dir(path);
            if !dir.is_dir() {
                return Ok(None);
            }
            let meta = fs::metadata(&dir)?;
            let mut m = Metadata::new(Category::Index, path.clone());
            m.modified = Self::mtime(&meta);
            return Ok(Some(m));
        }
        match self.resolve_leaf(path) {
            None => Ok(None),
            Some((fs_path, Some(_ext))) => {
                let meta = fs::metadata(&fs_path)?;
                let mut m = Metadata::new(Category::Object, path.clone()).with_size(meta.len());
                m.modified = Self::mtime(&meta);
                m.mime_type = Some(mime_for_extension(&fs_path));
                Ok(Some(m))
            }
            Some((fs_path, None)) => {
                let meta = fs::metadata(&fs_path)?;
                let mime = mime_guess::from_path(&fs_path).first_raw().unwrap_or("application/octet-stream");
                let mut m = Metadata::new(Category::Binary, path.clone()).with_size(meta.len()).with_mime(mime);
                m.modified = Self::mtime(&meta);
                Ok(Some(m))
            }
        }
    }

    fn load(&self, path: &Path) -> StoreResult<Option<LoadedValue>> {
        if *path == Self::storageinfo_path() {
            return Ok(Some(LoadedValue::Dictionary(self.info.get().descriptor())));
        }
        if path.is_index() {
            let dir = self.fs_dir(path);
            if !dir.is_dir() {
                return Ok(None);
            }
            let mut idx = Index::new();
            let mut latest: Option<DateTime<Utc>> = None;
            let binary_subtree = path.is_binary_path();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let ft = entry.file_type()?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if ft.is_dir() {
                    idx.indices.insert(name);
                } else if binary_subtree {
                    idx.objects.insert(name);
                } else {
                    idx.objects.insert(serializer::object_name(&name).to_string());
                }
                if let Ok(meta) = entry.metadata() {
                    if let Some(m) = Self::mtime(&meta) {
                        latest = Some(latest.map_or(m, |l| l.max(m)));
                    }
                }
            }
            idx.modified = latest;
            return Ok(Some(LoadedValue::Index(idx)));
        }
        match self.resolve_leaf(path) {
            None => Ok(None),
            Some((fs_path, Some(_ext))) => {
                let bytes = fs::read(&fs_path)?;
                let filename = fs_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                let dict = serializer::deserialize(filename, &bytes)?;
                Ok(Some(LoadedValue::Dictionary(dict)))
            }
            Some((fs_path, None)) => {
                let bytes = fs::read(&fs_path)?;
                let meta = fs::metadata(&fs_path)?;
                let mime = mime_guess::from_path(&fs_path).first_raw().map(str::to_string);
                Ok(Some(LoadedValue::Binary(BinaryHandle::new(bytes, mime, Self::mtime(&meta)))))
            }
        }
    }

    fn store(&self, path: &Path, data: StoreValue) -> StoreResult<()> {
        if !self.info.get().read_write {
            return Err(StoreError::ReadOnly(path.to_string()));
        }
        if path.is_index() || *path == Self::storageinfo_path() {
            return Err(StoreError::ReadOnly(path.to_string()));
        }
        let dir = self.fs_dir(&path.parent());
        fs::create_dir_all(&dir)?;

        let (bytes, filename) = match data {
            StoreValue::Dictionary(d) => {
                let mime = d.get("_contentType").and_then(Value::as_str).map(str::to_string);
                let name = serializer::serialized_name(path.name(), mime.as_deref());
                (serializer::serialize(&name, &d)?, name)
            }
            StoreValue::Object(obj) => {
                let d = obj.lock().serialize();
                let mime = d.get("_contentType").and_then(Value::as_str).map(str::to_string);
                let name = serializer::serialized_name(path.name(), mime.as_deref());
                (serializer::serialize(&name, &d)?, name)
            }
            StoreValue::Binary(b) => (b.bytes, path.name().to_string()),
        };

        // Remove a stale file under a different extension at this object path.
        for ext in RECOGNIZED_EXTENSIONS {
            let stale = dir.join(format!("{}{}", path.name(), ext));
            if stale.file_name().and_then(|n| n.to_str()) != Some(filename.as_str()) && stale.is_file() {
                let _ = fs::remove_file(&stale);
            }
        }

        let target = dir.join(&filename);
        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        fs::write(tmp.path(), &bytes)?;
        tmp.persist(&target).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> StoreResult<()> {
        if !self.info.get().read_write {
            return Err(StoreError::ReadOnly(path.to_string()));
        }
        if path.is_root() {
            for entry in fs::read_dir(&self.root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
            return Ok(());
        }
        if path.is_index() {
            let dir = self.fs_dir(path);
            if dir.is_dir() {
                fs::remove_dir_all(&dir)?;
            }
        } else if let Some((fs_path, _)) = self.resolve_leaf(path) {
            fs::remove_file(&fs_path)?;
        }

        let mut ancestor = path.parent();
        while !ancestor.is_root() {
            let dir = self.fs_dir(&ancestor);
            match fs::read_dir(&dir) {
                Ok(mut it) if it.next().is_none() => {
                    fs::remove_dir(&dir)?;
                }
                _ => break,
            }
            ancestor = ancestor.parent();
        }
        Ok(())
    }

    fn destroy(&self) {}
}

fn mime_for_extension(fs_path: &FsPath) -> String {
    let name = fs_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    match RECOGNIZED_EXTENSIONS.iter().find(|e| name.ends_with(*e)) {
        Some(&".json") => "application/json".to_string(),
        Some(&".xml") => "application/xml".to_string(),
        Some(&".yaml") => "application/yaml".to_string(),
        _ => "text/x-java-properties".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dictionary;

    fn rw(dir: &tempfile::TempDir) -> DirectoryBackend {
        let b = DirectoryBackend::open("d1", dir.path()).unwrap();
        let mut info = b.mount_info();
        info.read_write = true;
        b.set_mount_info(info);
        b
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let b = rw(&dir);
        let mut d = Dictionary::new();
        d.insert("x".into(), Value::Int(1));
        b.store(&Path::parse("/a").unwrap(), StoreValue::Dictionary(d.clone())).unwrap();

        let loaded = b.load(&Path::parse("/a").unwrap()).unwrap().unwrap();
        assert_eq!(loaded.into_dictionary().unwrap().get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn extension_fallback_resolves_json_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("type")).unwrap();
        fs::write(dir.path().join("type/alpha.json"), b"{\"value\":42}").unwrap();
        let b = DirectoryBackend::open("d1", dir.path()).unwrap();

        let loaded = b.load(&Path::parse("/type/alpha").unwrap()).unwrap().unwrap();
        let d = loaded.into_dictionary().unwrap();
        assert_eq!(d.get("value"), Some(&Value::Int(42)));

        let meta = b.lookup(&Path::parse("/type/alpha").unwrap()).unwrap().unwrap();
        assert!(meta.mime_type.unwrap().starts_with("application/json"));

        let idx_meta = b.lookup(&Path::parse("/type/").unwrap()).unwrap().unwrap();
        assert_eq!(idx_meta.category, Category::Index);
    }

    #[test]
    fn binary_path_prefix_skips_extension_normalization() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("files")).unwrap();
        fs::write(dir.path().join("files/report.xml"), b"not xml, just bytes").unwrap();
        let b = DirectoryBackend::open("d1", dir.path()).unwrap();

        let idx = b.load(&Path::parse("/files/").unwrap()).unwrap().unwrap();
        let idx = match idx {
            LoadedValue::Index(i) => i,
            _ => panic!("expected index"),
        };
        assert!(idx.objects.contains("report.xml"));
        assert!(!idx.objects.contains("report"));

        let loaded = b.load(&Path::parse("/files/report.xml").unwrap()).unwrap().unwrap();
        match loaded {
            LoadedValue::Binary(bin) => assert_eq!(bin.bytes, b"not xml, just bytes"),
            _ => panic!("expected a binary, not a deserialized dictionary"),
        }
    }

    #[test]
    fn read_only_rejects_store() {
        let dir = tempfile::tempdir().unwrap();
        let b = DirectoryBackend::open("d1", dir.path()).unwrap();
        let res = b.store(&Path::parse("/a").unwrap(), StoreValue::Dictionary(Dictionary::new()));
        assert!(matches!(res, Err(StoreError::ReadOnly(_))));
    }

    #[test]
    fn remove_cleans_up_empty_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let b = rw(&dir);
        b.store(&Path::parse("/a/b").unwrap(), StoreValue::Dictionary(Dictionary::new())).unwrap();
        b.remove(&Path::parse("/a/b").unwrap()).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn storageinfo_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let b = rw(&dir);
        let res = b.store(&Path::parse("/.storageinfo").unwrap(), StoreValue::Dictionary(Dictionary::new()));
        assert!(matches!(res, Err(StoreError::ReadOnly(_))));
    }
}
