//! Read-only archive backend. On open, the zip file is walked once and an
//! `Index` is materialized at every directory level.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path as FsPath;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::error::{StoreError, StoreResult};
use crate::index::Index;
use crate::metadata::{Category, Metadata};
use crate::path::Path;
use crate::serializer::{self, RECOGNIZED_EXTENSIONS};

use super::{Backend, BackendKind, BinaryHandle, LoadedValue, MountInfo, MountInfoCell};

struct ArchiveEntry {
    bytes: Vec<u8>,
    modified: Option<DateTime<Utc>>,
}

pub struct ArchiveBackend {
    info: MountInfoCell,
    archive_mtime: DateTime<Utc>,
    entries: HashMap<Path, ArchiveEntry>,
    indices: HashMap<Path, Index>,
}

impl ArchiveBackend {
    pub fn open(id: impl Into<String>, archive_path: impl AsRef<FsPath>) -> StoreResult<Self> {
        let archive_path = archive_path.as_ref();
        let file = File::open(archive_path)?;
        let archive_mtime = file
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        let mut zip = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut entries: HashMap<Path, ArchiveEntry> = HashMap::new();
        let mut indices: HashMap<Path, Index> = HashMap::new();
        indices.insert(Path::root(), Index::new());

        for i in 0..zip.len() {
            let mut zfile = zip.by_index(i).map_err(|e| StoreError::Io(e.to_string()))?;
            let raw_name = zfile.name().to_string();
            let is_dir = zfile.is_dir() || raw_name.ends_with('/');
            let path = Path::parse(&format!("/{raw_name}"))?;
            let modified = zip_time_to_chrono(zfile.last_modified());

            if is_dir {
                let entry = indices.entry(path.clone()).or_insert_with(Index::new);
                entry.modified = modified.or(entry.modified);
            } else {
                let mut bytes = Vec::with_capacity(zfile.size() as usize);
                zfile.read_to_end(&mut bytes).map_err(|e| StoreError::Io(e.to_string()))?;
                entries.insert(path.clone(), ArchiveEntry { bytes, modified });
            }
            register(&mut indices, &path, modified);
        }

        for idx in indices.values_mut() {
            if idx.modified.is_none() {
                idx.modified = Some(archive_mtime);
            }
        }

        Ok(ArchiveBackend {
            info: MountInfoCell::new(MountInfo::unmounted(id, BackendKind::Archive)),
            archive_mtime,
            entries,
            indices,
        })
    }

    fn storageinfo_path() -> Path {
        Path::parse("/.storageinfo").unwrap()
    }

    /// Resolve a leaf path to an archived entry, trying the literal name
    /// first and then each recognized extension. Binary-path subtrees
    /// (`/files/*`, `/lib/*`, `/storage/*`) skip the extension fallback
    /// entirely — a literal match there is always treated as raw binary.
    fn resolve_leaf(&self, path: &Path) -> Option<(&Path, &ArchiveEntry, Option<&'static str>)> {
        if path.is_binary_path() {
            return self.entries.get_key_value(path).map(|(p, e)| (p, e, None));
        }
        if let Some(entry) = self.entries.get(path) {
            let ext = RECOGNIZED_EXTENSIONS.iter().copied().find(|e| path.name().ends_with(e));
            return self.entries.get_key_value(path).map(|(p, e)| (p, e, ext)).or(Some((path, entry, ext)));
        }
        for ext in RECOGNIZED_EXTENSIONS {
            let candidate = path.sibling(&format!("{}{}", path.name(), ext));
            if let Some((p, e)) = self.entries.get_key_value(&candidate) {
                return Some((p, e, Some(ext)));
            }
        }
        None
    }
}

/// Register `path`'s name in each ancestor index's appropriate set, and
/// bubble `modified` up as the max so far (called once per entry during
/// the single pass over the archive).
fn register(indices: &mut HashMap<Path, Index>, path: &Path, modified: Option<DateTime<Utc>>) {
    let mut cur = path.clone();
    loop {
        if cur.is_root() {
            break;
        }
        let parent = cur.parent();
        let entry = indices.entry(parent.clone()).or_insert_with(Index::new);
        if cur.is_index() {
            entry.indices.insert(cur.name());
        } else if cur.is_binary_path() {
            entry.objects.insert(cur.name().to_string());
        } else {
            entry.objects.insert(serializer::object_name(&cur.name()).to_string());
        }
        if let Some(m) = modified {
            entry.modified = Some(entry.modified.map_or(m, |e| e.max(m)));
        }
        if parent.is_root() {
            break;
        }
        cur = parent;
    }
}

fn zip_time_to_chrono(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?;
    let time = date.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    Utc.from_local_datetime(&time).single()
}

impl Backend for ArchiveBackend {
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
                Metadata::new(Category::Object, path.clone())
                    .with_modified(DateTime::from_timestamp_millis(info.mount_time as i64).unwrap_or(self.archive_mtime)),
            ));
        }
        if path.is_index() {
            return Ok(self.indices.get(path).map(|idx| {
                let mut m = Metadata::new(Category::Index, path.clone());
                m.modified = idx.modified;
                m
            }));
        }
        Ok(self.resolve_leaf(path).map(|(_, entry, ext)| {
            if let Some(ext) = ext {
                let mime = match ext {
                    ".json" => "application/json",
                    ".xml" => "application/xml",
                    ".yaml" => "application/yaml",
                    _ => "text/x-java-properties",
                };
                Metadata::new(Category::Object, path.clone())
                    .with_mime(mime)
                    .with_size(entry.bytes.len() as u64)
            } else {
                let mut m = Metadata::new(Category::Binary, path.clone()).with_size(entry.bytes.len() as u64);
                m.modified = entry.modified;
                m
            }
        }))
    }

    fn load(&self, path: &Path) -> StoreResult<Option<LoadedValue>> {
        if *path == Self::storageinfo_path() {
            return Ok(Some(LoadedValue::Dictionary(self.info.get().descriptor())));
        }
        if path.is_index() {
            return Ok(self.indices.get(path).cloned().map(LoadedValue::Index));
        }
        Ok(match self.resolve_leaf(path) {
            Some((p, entry, Some(_ext))) => {
                let name = p.name().to_string();
                let dict = serializer::deserialize(&name, &entry.bytes)?;
                Some(LoadedValue::Dictionary(dict))
            }
            Some((_, entry, None)) => Some(LoadedValue::Binary(BinaryHandle::new(
                entry.bytes.clone(),
                None,
                entry.modified,
            ))),
            None => None,
        })
    }

    fn store(&self, path: &Path, _data: super::StoreValue) -> StoreResult<()> {
        Err(StoreError::ReadOnly(path.to_string()))
    }

    fn remove(&self, path: &Path) -> StoreResult<()> {
        Err(StoreError::ReadOnly(path.to_string()))
    }

    fn destroy(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(path: &FsPath) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("type/alpha.json", opts).unwrap();
        zip.write_all(b"{\"value\":7}").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn read_only_store_and_remove_fail() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("a.zip");
        build_zip(&zip_path);
        let b = ArchiveBackend::open("z1", &zip_path).unwrap();
        assert!(matches!(
            b.store(&Path::parse("/x").unwrap(), super::super::StoreValue::Dictionary(Default::default())),
            Err(StoreError::ReadOnly(_))
        ));
        assert!(matches!(b.remove(&Path::parse("/x").unwrap()), Err(StoreError::ReadOnly(_))));
    }

    #[test]
    fn load_resolves_via_extension_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("a.zip");
        build_zip(&zip_path);
        let b = ArchiveBackend::open("z1", &zip_path).unwrap();

        let loaded = b.load(&Path::parse("/type/alpha").unwrap()).unwrap().unwrap();
        let d = loaded.into_dictionary().unwrap();
        assert_eq!(d.get("value"), Some(&crate::value::Value::Int(7)));

        let idx = b.lookup(&Path::parse("/type/").unwrap()).unwrap().unwrap();
        assert_eq!(idx.category, Category::Index);
    }

    #[test]
    fn binary_path_prefix_skips_extension_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("a.zip");
        let file = File::create(&zip_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("files/report.xml", opts).unwrap();
        zip.write_all(b"not xml, just bytes").unwrap();
        zip.finish().unwrap();

        let b = ArchiveBackend::open("z1", &zip_path).unwrap();

        let idx = b.load(&Path::parse("/files/").unwrap()).unwrap().unwrap();
        match idx {
            LoadedValue::Index(i) => {
                assert!(i.objects.contains("report.xml"));
                assert!(!i.objects.contains("report"));
            }
            _ => panic!("expected index"),
        }

        let loaded = b.load(&Path::parse("/files/report.xml").unwrap()).unwrap().unwrap();
        match loaded {
            LoadedValue::Binary(bin) => assert_eq!(bin.bytes, b"not xml, just bytes"),
            _ => panic!("expected a binary, not a deserialized dictionary"),
        }
    }
}
