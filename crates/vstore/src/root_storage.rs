//! `RootStorage`: the composition root. Owns the mount table, the
//! per-backend caches, and the background cache-clean thread, and is the
//! one place that decides whether a path belongs to the flat `/storage/`
//! admin namespace or to the priority-merged overlay namespace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::{Mutex as PMutex, RwLock};

use crate::backend::{Backend, LoadedValue, StoreValue};
use crate::cache::Cache;
use crate::error::{StoreError, StoreResult};
use crate::index::Index;
use crate::metadata::Metadata;
use crate::mount::{MountRecord, MountTable};
use crate::object::{NullFactory, ObjectFactory};
use crate::path::Path;
use crate::query::{Query, Queryable};
use crate::value::{sterilize, Dictionary, Value};

static STORAGE_ROOT: Lazy<Path> = Lazy::new(|| Path::parse("/storage/").unwrap());
static STORAGEINFO_PATH: Lazy<Path> = Lazy::new(|| Path::parse("/.storageinfo").unwrap());

/// A handle on the background cache-clean loop, stopped cooperatively
/// rather than killed — the thread only ever checks `shutdown` between
/// sweeps, never mid-sweep.
struct Cleaner {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Composes a mount table, per-backend caches, and a background cleaner
/// into a single namespace. Every public method here is a dispatch: it
/// decides which backend(s) a path concerns, then
/// delegates to them under as short a lock hold as it can manage — real
/// I/O never happens while the mount-table lock is held.
pub struct RootStorage {
    mounts: PMutex<MountTable>,
    /// The root's own bookkeeping: visibility placeholders for `/storage/`
    /// mount points, modeled as a private, always-read-write memory
    /// backend rather than a bespoke structure, since it needs exactly the
    /// ancestor-index maintenance `MemoryBackend` already provides.
    local: crate::backend::memory::MemoryBackend,
    factory: RwLock<Arc<dyn ObjectFactory>>,
    cleaner: PMutex<Option<Cleaner>>,
    shutting_down: AtomicBool,
}

impl RootStorage {
    pub fn new(factory: Arc<dyn ObjectFactory>) -> Self {
        let local = crate::backend::memory::MemoryBackend::new("root-local");
        let mut info = local.mount_info();
        info.read_write = true;
        local.set_mount_info(info);
        RootStorage {
            mounts: PMutex::new(MountTable::new()),
            local,
            factory: RwLock::new(factory),
            cleaner: PMutex::new(None),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn new_default() -> Self {
        Self::new(Arc::new(NullFactory))
    }

    pub fn set_factory(&self, factory: Arc<dyn ObjectFactory>) {
        *self.factory.write() = factory;
    }

    // ---- mount lifecycle -------------------------------------------

    /// Mount `backend` at `path`, an index somewhere under `/storage/`.
    /// Unmounted, read-only, uncached, with no overlay until `remount`
    /// says otherwise.
    pub fn mount(&self, backend: Arc<dyn Backend>, path: Path) -> StoreResult<()> {
        if !path.is_index() || !path.starts_with(&STORAGE_ROOT) {
            return Err(StoreError::MountConflict(format!("{path} is not an index under /storage/")));
        }
        {
            let mounts = self.mounts.lock();
            if mounts.contains(&path) {
                return Err(StoreError::MountConflict(format!("{path} is already mounted")));
            }
        }
        if self.local.lookup(&path)?.is_some() {
            return Err(StoreError::MountConflict(format!("{path} collides with an existing entry")));
        }

        let mount_time = crate::backend::next_mount_time();
        let mut info = backend.mount_info();
        info.read_write = false;
        info.mount_path = path.clone();
        info.mount_time = mount_time;
        info.overlay_path = None;
        info.overlay_prio = -1;
        backend.set_mount_info(info.clone());

        let record = MountRecord {
            id: info.id.clone(),
            backend: backend.clone(),
            mount_path: path.clone(),
            read_write: false,
            overlay_path: None,
            overlay_prio: -1,
            mount_time,
            cache: None,
        };
        self.mounts.lock().insert(record);
        self.refresh_placeholder(&path)?;
        tracing::info!(path = %path, id = %info.id, "mounted backend");
        Ok(())
    }

    /// Change read-write/cache/overlay settings on an already-mounted
    /// backend, re-sorting the table for its (possibly new) priority.
    pub fn remount(
        &self,
        path: &Path,
        read_write: bool,
        cached: bool,
        overlay: Option<Path>,
        prio: i32,
    ) -> StoreResult<()> {
        let mount_time = crate::backend::next_mount_time();
        let backend = {
            let mut mounts = self.mounts.lock();
            let rec = mounts
                .get_mut(path)
                .ok_or_else(|| StoreError::MountConflict(format!("no mount at {path}")))?;
            rec.read_write = read_write;
            rec.overlay_path = overlay.clone();
            rec.overlay_prio = prio;
            rec.mount_time = mount_time;
            rec.cache = if cached { Some(Arc::new(Cache::new(path.clone()))) } else { None };
            let backend = rec.backend.clone();
            mounts.resort();
            backend
        };

        let mut info = backend.mount_info();
        info.read_write = read_write;
        info.overlay_path = overlay;
        info.overlay_prio = prio;
        info.mount_time = mount_time;
        backend.set_mount_info(info);

        self.refresh_placeholder(path)?;
        tracing::info!(path = %path, read_write, prio, "remounted backend");
        Ok(())
    }

    pub fn unmount(&self, path: &Path) -> StoreResult<()> {
        let record = self
            .mounts
            .lock()
            .remove(path)
            .ok_or_else(|| StoreError::MountConflict(format!("no mount at {path}")))?;
        if let Some(cache) = &record.cache {
            cache.remove(&Path::root(), true)?;
        }
        let placeholder = path.child(".storageinfo", false);
        let _ = self.local.remove(&placeholder);
        record.backend.destroy();
        tracing::info!(path = %path, "unmounted backend");
        Ok(())
    }

    /// Unmount everything, reverse of mount order, logging (not
    /// propagating) any individual failure.
    pub fn unmount_all(&self) {
        let paths: Vec<Path> = {
            let mounts = self.mounts.lock();
            mounts.iter_reverse().map(|r| r.mount_path.clone()).collect()
        };
        for path in paths {
            if let Err(e) = self.unmount(&path) {
                tracing::error!(path = %path, error = %e, "failed to unmount during shutdown");
            }
        }
    }

    fn refresh_placeholder(&self, mount_path: &Path) -> StoreResult<()> {
        let placeholder = mount_path.child(".storageinfo", false);
        self.local.store(&placeholder, StoreValue::Dictionary(Dictionary::new()))
    }

    // ---- dispatch ----------------------------------------------------

    fn under_storage(p: &Path) -> bool {
        p.starts_with(&STORAGE_ROOT)
    }

    pub fn lookup(&self, p: &Path) -> StoreResult<Option<Metadata>> {
        if Self::under_storage(p) {
            self.lookup_under_storage(p)
        } else {
            self.lookup_overlay(p)
        }
    }

    pub fn load(&self, p: &Path) -> StoreResult<Option<LoadedValue>> {
        if *p == *STORAGEINFO_PATH {
            return Ok(Some(LoadedValue::Dictionary(self.root_descriptor())));
        }
        if Self::under_storage(p) {
            self.load_under_storage(p)
        } else {
            self.load_overlay(p)
        }
    }

    pub fn store(&self, p: &Path, value: StoreValue) -> StoreResult<()> {
        if *p == *STORAGEINFO_PATH {
            return Err(StoreError::ReadOnly(p.to_string()));
        }
        if Self::under_storage(p) {
            self.store_under_storage(p, value)
        } else {
            self.store_overlay(p, value)
        }
    }

    pub fn remove(&self, p: &Path) -> StoreResult<()> {
        if *p == *STORAGEINFO_PATH {
            return Err(StoreError::ReadOnly(p.to_string()));
        }
        if Self::under_storage(p) {
            self.remove_under_storage(p)
        } else {
            self.remove_overlay(p)
        }
    }

    fn rebase(mut m: Metadata, p: &Path, backend_root: &Path) -> Metadata {
        m.path = p.clone();
        m.backends.insert(backend_root.clone());
        m
    }

    /// The (mount path, backend, cache) of whichever mounted backend's
    /// path prefixes `p`, if any — the single lookup every `/storage/`
    /// dispatch needs before it can drop the mount-table lock.
    fn mount_for_storage_path(&self, p: &Path) -> Option<(Path, Arc<dyn Backend>, Option<Arc<Cache>>)> {
        let mounts = self.mounts.lock();
        mounts.find_by_mount_prefix(p).map(|r| (r.mount_path.clone(), r.backend.clone(), r.cache.clone()))
    }

    fn lookup_under_storage(&self, p: &Path) -> StoreResult<Option<Metadata>> {
        let (mount_path, backend, cache) = match self.mount_for_storage_path(p) {
            Some(found) => found,
            None => return self.local.lookup(p),
        };
        let local = p.remove_prefix(&mount_path);
        if let Some(cache) = &cache {
            if let Some(m) = cache.lookup(&local)? {
                return Ok(Some(Self::rebase(m, p, &mount_path)));
            }
        }
        if let Some(m) = backend.lookup(&local)? {
            return Ok(Some(Self::rebase(m, p, &mount_path)));
        }
        self.local.lookup(p)
    }

    fn load_under_storage(&self, p: &Path) -> StoreResult<Option<LoadedValue>> {
        let (mount_path, backend, cache) = match self.mount_for_storage_path(p) {
            Some(found) => found,
            None => return self.local.load(p),
        };
        let local = p.remove_prefix(&mount_path);
        if let Some(cache) = &cache {
            if let Some(v) = cache.load(&local)? {
                return Ok(Some(v));
            }
        }
        backend.load(&local)
    }

    fn store_under_storage(&self, p: &Path, value: StoreValue) -> StoreResult<()> {
        let (mount_path, backend, cache) = match self.mount_for_storage_path(p) {
            Some(found) => found,
            None => return Err(StoreError::NoWritableStorage),
        };
        let local = p.remove_prefix(&mount_path);
        if let Some(cache) = &cache {
            cache.store(&local, value.clone())?;
        }
        backend.store(&local, value)
    }

    fn remove_under_storage(&self, p: &Path) -> StoreResult<()> {
        let (mount_path, backend, cache) = match self.mount_for_storage_path(p) {
            Some(found) => found,
            None => return Err(StoreError::NoWritableStorage),
        };
        let local = p.remove_prefix(&mount_path);
        if let Some(cache) = &cache {
            cache.remove(&local, true)?;
        }
        backend.remove(&local)
    }

    fn overlay_snapshot(&self, p: &Path) -> Vec<(Path, bool, Arc<dyn Backend>, Option<Arc<Cache>>)> {
        let mounts = self.mounts.lock();
        mounts
            .overlays_for(p)
            .map(|r| (r.overlay_path.clone().expect("overlays_for only yields overlaid mounts"), r.read_write, r.backend.clone(), r.cache.clone()))
            .collect()
    }

    fn lookup_overlay(&self, p: &Path) -> StoreResult<Option<Metadata>> {
        let mut result = if p.is_index() { self.local.lookup(p)? } else { None };
        for (overlay_path, _read_write, backend, cache) in self.overlay_snapshot(p) {
            let local = p.remove_prefix(&overlay_path);
            let cache_meta = match &cache {
                Some(c) => c.lookup(&local)?,
                None => None,
            };
            let backend_meta = backend.lookup(&local)?;
            let contribution = match (cache_meta, backend_meta) {
                (Some(c), Some(b)) => Some(c.merge(&b)),
                (Some(c), None) => Some(c),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };
            if let Some(contribution) = contribution {
                result = Some(match result {
                    Some(r) => r.merge(&contribution),
                    None => contribution,
                });
            }
        }
        if let Some(r) = &mut result {
            r.path = p.clone();
        }
        Ok(result)
    }

    fn load_overlay(&self, p: &Path) -> StoreResult<Option<LoadedValue>> {
        if p.is_index() {
            return self.load_overlay_index(p);
        }
        for (overlay_path, _read_write, backend, cache) in self.overlay_snapshot(p) {
            let local = p.remove_prefix(&overlay_path);
            if let Some(cache) = &cache {
                if let Some(v) = cache.load(&local)? {
                    return Ok(Some(v));
                }
            }
            if let Some(loaded) = backend.load(&local)? {
                match loaded {
                    LoadedValue::Dictionary(dict) if cache.is_some() => {
                        let result = self.init_object(&local, dict);
                        if let Some(c) = &cache {
                            let to_store = match &result {
                                LoadedValue::Object(o) => StoreValue::Object(o.clone()),
                                LoadedValue::Dictionary(d) => StoreValue::Dictionary(d.clone()),
                                _ => unreachable!("init_object only returns Object or Dictionary"),
                            };
                            c.seed(&local, to_store)?;
                        }
                        return Ok(Some(result));
                    }
                    other => return Ok(Some(other)),
                }
            }
        }
        Ok(None)
    }

    fn load_overlay_index(&self, p: &Path) -> StoreResult<Option<LoadedValue>> {
        let mut result = match self.local.load(p)? {
            Some(LoadedValue::Index(i)) => Some(i),
            _ => None,
        };
        for (overlay_path, _read_write, backend, cache) in self.overlay_snapshot(p) {
            let local = p.remove_prefix(&overlay_path);
            let backend_idx = match backend.load(&local)? {
                Some(LoadedValue::Index(i)) => Some(i),
                _ => None,
            };
            let cache_idx = cache.as_ref().map(|c| c.synthesize_index(&local));
            let contribution = match (cache_idx, backend_idx) {
                (Some(c), Some(b)) => Some(c.merge(&b)),
                (Some(c), None) => Some(c),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };
            if let Some(contribution) = contribution {
                result = Some(match result {
                    Some(r) => r.merge(&contribution),
                    None => contribution,
                });
            }
        }
        if result.is_none() && p.is_root() {
            result = Some(Index::new());
        }
        Ok(result.map(LoadedValue::Index))
    }

    fn store_overlay(&self, p: &Path, value: StoreValue) -> StoreResult<()> {
        let mut wrote = false;
        for (overlay_path, read_write, backend, cache) in self.overlay_snapshot(p) {
            let local = p.remove_prefix(&overlay_path);
            if !wrote && read_write {
                if let Some(cache) = &cache {
                    cache.store(&local, value.clone())?;
                }
                backend.store(&local, value.clone())?;
                wrote = true;
            } else if let Some(cache) = &cache {
                cache.remove(&local, true)?;
            }
        }
        if !wrote {
            return Err(StoreError::NoWritableStorage);
        }
        Ok(())
    }

    fn remove_overlay(&self, p: &Path) -> StoreResult<()> {
        let mut removed = false;
        for (overlay_path, read_write, backend, cache) in self.overlay_snapshot(p) {
            let local = p.remove_prefix(&overlay_path);
            if let Some(cache) = &cache {
                cache.remove(&local, true)?;
            }
            if !removed && read_write {
                backend.remove(&local)?;
                removed = true;
            }
        }
        Ok(())
    }

    // ---- object initialization ---------------------------------------

    /// `sub_path` is already backend-local (extension-stripped). Its id is
    /// set to the path below the overlay with the leading type segment
    /// dropped, then the factory is consulted; a constructor failure is
    /// recorded on `_error` rather than propagated, so a single broken
    /// object doesn't take the whole load down.
    fn init_object(&self, sub_path: &Path, mut dict: Dictionary) -> LoadedValue {
        dict.insert("id".to_string(), Value::String(Self::sub_id(sub_path)));
        let type_tag = dict.get("type").and_then(Value::as_str).unwrap_or("").to_string();
        let factory = self.factory.read().clone();
        match factory.construct(&type_tag, dict.clone()) {
            Some(obj) => {
                let init_result = obj.lock().init();
                match init_result {
                    Ok(()) => {
                        obj.lock().activate();
                        LoadedValue::Object(obj)
                    }
                    Err(e) => {
                        dict.insert("_error".to_string(), Value::String(e.to_string()));
                        LoadedValue::Dictionary(dict)
                    }
                }
            }
            None => LoadedValue::Dictionary(dict),
        }
    }

    fn sub_id(sub_path: &Path) -> String {
        let comps = sub_path.components();
        if comps.len() <= 1 {
            sub_path.name().to_string()
        } else {
            comps[1..].join("/")
        }
    }

    // ---- root descriptor -----------------------------------------------

    fn root_descriptor(&self) -> Dictionary {
        let mounts = self.mounts.lock();
        let mut d = Dictionary::new();
        d.insert("id".to_string(), Value::String("root".to_string()));
        d.insert("type".to_string(), Value::String("storage/root".to_string()));
        d.insert("readWrite".to_string(), Value::Bool(true));
        d.insert("mountPath".to_string(), Value::String("/".to_string()));
        d.insert("mountTime".to_string(), Value::String("0".to_string()));
        d.insert("mountOverlayPath".to_string(), Value::Null);
        d.insert("mountOverlayPrio".to_string(), Value::Int(-1));
        let storages: Vec<Value> = mounts.iter().map(|r| Value::Dict(r.backend.mount_info().descriptor())).collect();
        d.insert("storages".to_string(), Value::Array(storages));
        sterilize(&d)
    }

    // ---- background cache cleaning ------------------------------------

    /// Sweep every cached backend: persist every modified cached object
    /// back through this root storage's own `store`, then evict
    /// (`force == true` only on shutdown).
    pub fn cache_clean(&self, force: bool) {
        let snapshot: Vec<(Path, Option<Path>, Arc<Cache>)> = {
            let mounts = self.mounts.lock();
            mounts
                .iter()
                .filter_map(|r| r.cache.clone().map(|c| (r.mount_path.clone(), r.overlay_path.clone(), c)))
                .collect()
        };
        for (mount_path, overlay_path, cache) in snapshot {
            if let Some(overlay_path) = &overlay_path {
                for obj_path in cache.list_modified(&Path::root()) {
                    let abs = Path::rebased_under(overlay_path, &obj_path);
                    match cache.load(&obj_path) {
                        Ok(Some(LoadedValue::Object(o))) => {
                            if let Err(e) = self.store(&abs, StoreValue::Object(o)) {
                                tracing::warn!(path = %abs, backend = %mount_path, error = %e, "cache persistence failed during clean sweep");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(path = %abs, backend = %mount_path, error = %e, "cache re-load failed during clean sweep");
                        }
                    }
                }
            }
            if let Err(e) = cache.remove(&Path::root(), force) {
                tracing::warn!(backend = %mount_path, error = %e, "cache eviction failed during clean sweep");
            }
        }
    }

    /// Start the background sweep thread. A no-op if one is already
    /// running. Requires `Arc<Self>` since the thread outlives any single
    /// call frame.
    pub fn start_cleaner(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.cleaner.lock();
        if slot.is_some() {
            return;
        }
        let (tx, rx) = channel::<()>();
        let storage = self.clone();
        let handle = std::thread::Builder::new()
            .name("vstore-cache-clean".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => storage.cache_clean(false),
                }
            })
            .expect("failed to spawn cache-clean thread");
        *slot = Some(Cleaner { shutdown: tx, handle });
    }

    /// Stop the sweep thread (if running) and run one final forced sweep.
    pub fn stop_cleaner(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cleaner) = self.cleaner.lock().take() {
            let _ = cleaner.shutdown.send(());
            let _ = cleaner.handle.join();
        }
        self.cache_clean(true);
    }

    pub fn query(self: &Arc<Self>, base: Path) -> Query {
        Query::new(self.clone() as Arc<dyn Queryable>, base)
    }
}

impl Queryable for RootStorage {
    fn query_index(&self, path: &Path) -> StoreResult<Option<Index>> {
        match self.load(path)? {
            Some(LoadedValue::Index(i)) => Ok(Some(i)),
            _ => Ok(None),
        }
    }

    fn query_lookup(&self, path: &Path) -> StoreResult<Option<Metadata>> {
        self.lookup(path)
    }

    fn query_load(&self, path: &Path) -> StoreResult<Option<LoadedValue>> {
        self.load(path)
    }
}

impl Drop for RootStorage {
    fn drop(&mut self) {
        self.stop_cleaner();
    }
}
