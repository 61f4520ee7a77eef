//! The uniform backend capability: `lookup`/`load`/`store`/`remove` over a
//! namespace, with three variants (directory, archive, memory).

pub mod archive;
pub mod directory;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as PMutex;
use parking_lot::RwLock;

use crate::error::StoreResult;
use crate::index::Index;
use crate::metadata::Metadata;
use crate::object::StorableObject;
use crate::path::Path;
use crate::value::Dictionary;

/// The three backend variants this store knows how to mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Directory,
    Archive,
    Memory,
}

impl BackendKind {
    pub fn type_tag(&self) -> &'static str {
        match self {
            BackendKind::Directory => "dir",
            BackendKind::Archive => "zip",
            BackendKind::Memory => "memory",
        }
    }
}

/// A process-global monotonic counter, seeded from the wall clock, whose
/// only contract is strict monotonicity — used for mount timestamps so
/// that equal-priority mounts still have a deterministic tie-break.
static MOUNT_CLOCK: AtomicU64 = AtomicU64::new(0);

pub fn next_mount_time() -> u64 {
    if MOUNT_CLOCK.load(Ordering::Relaxed) == 0 {
        let seed = Utc::now().timestamp_millis().max(1) as u64;
        let _ = MOUNT_CLOCK.compare_exchange(0, seed, Ordering::Relaxed, Ordering::Relaxed);
    }
    MOUNT_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Mutable mount-time state a backend needs to answer its own
/// `/.storageinfo` descriptor. Mount path/read-write/overlay/priority are
/// conceptually properties of the *mount record*; they are mirrored here
/// (behind a lock, set by `RootStorage` under its mount-table lock) purely
/// so a backend can self-describe without reaching back into the root.
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub id: String,
    pub kind: BackendKind,
    pub read_write: bool,
    pub mount_path: Path,
    pub mount_time: u64,
    pub overlay_path: Option<Path>,
    pub overlay_prio: i32,
}

impl MountInfo {
    pub fn unmounted(id: impl Into<String>, kind: BackendKind) -> Self {
        MountInfo {
            id: id.into(),
            kind,
            read_write: false,
            mount_path: Path::root(),
            mount_time: 0,
            overlay_path: None,
            overlay_prio: -1,
        }
    }

    /// The storage descriptor dictionary surfaced at `/.storageinfo`.
    pub fn descriptor(&self) -> Dictionary {
        use crate::value::Value;
        let mut d = Dictionary::new();
        d.insert("id".into(), Value::String(self.id.clone()));
        d.insert("type".into(), Value::String(format!("storage/{}", self.kind.type_tag())));
        d.insert("readWrite".into(), Value::Bool(self.read_write));
        d.insert("mountPath".into(), Value::String(self.mount_path.to_string()));
        d.insert("mountTime".into(), Value::String(self.mount_time.to_string()));
        d.insert(
            "mountOverlayPath".into(),
            match &self.overlay_path {
                Some(p) => Value::String(p.to_string()),
                None => Value::Null,
            },
        );
        d.insert("mountOverlayPrio".into(), Value::Int(self.overlay_prio as i64));
        d
    }
}

/// A value ready to be written through `Backend::store`. Cloneable so
/// `RootStorage` can mirror one write into a cache and a backend (or into
/// several overlapping overlays) without re-threading ownership.
#[derive(Clone)]
pub enum StoreValue {
    Dictionary(Dictionary),
    Binary(BinaryHandle),
    Object(Arc<PMutex<dyn StorableObject>>),
}

/// A value read back through `Backend::load` / `Cache::load`.
pub enum LoadedValue {
    Index(Index),
    Dictionary(Dictionary),
    Binary(BinaryHandle),
    Object(Arc<PMutex<dyn StorableObject>>),
}

impl LoadedValue {
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            LoadedValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_dictionary(self) -> Option<Dictionary> {
        match self {
            LoadedValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<PMutex<dyn StorableObject>>> {
        match self {
            LoadedValue::Object(o) => Some(o),
            _ => None,
        }
    }
}

/// A binary entry: content bytes plus mime, size, last-modified, and a
/// content hash. Streams are modeled as owned byte buffers rather than
/// `Read` trait objects — every backend here can produce bytes
/// synchronously, and the concurrency model is thread-blocking rather than
/// async, so there is no benefit to a lazy reader abstraction.
#[derive(Debug, Clone)]
pub struct BinaryHandle {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub content_hash: String,
}

impl BinaryHandle {
    pub fn new(bytes: Vec<u8>, mime_type: Option<String>, modified: Option<DateTime<Utc>>) -> Self {
        let content_hash = hash_bytes(&bytes);
        BinaryHandle { bytes, mime_type, modified, content_hash }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The uniform capability every backend provides. `lookup` is
/// non-mutating; `store`/`remove` require the mount's read-write flag.
pub trait Backend: Send + Sync {
    fn mount_info(&self) -> MountInfo;
    fn set_mount_info(&self, info: MountInfo);

    fn lookup(&self, path: &Path) -> StoreResult<Option<Metadata>>;
    fn load(&self, path: &Path) -> StoreResult<Option<LoadedValue>>;
    fn store(&self, path: &Path, data: StoreValue) -> StoreResult<()>;
    fn remove(&self, path: &Path) -> StoreResult<()>;

    /// Release any owned state. Memory backends drop their maps without
    /// invoking lifecycle hooks on contained objects — that is the cache's
    /// job, not the backend's.
    fn destroy(&self);
}

/// Shared helper every concrete backend embeds to answer the `MountInfo`
/// half of the `Backend` contract identically.
pub(crate) struct MountInfoCell(RwLock<MountInfo>);

impl MountInfoCell {
    pub fn new(info: MountInfo) -> Self {
        MountInfoCell(RwLock::new(info))
    }

    pub fn get(&self) -> MountInfo {
        self.0.read().clone()
    }

    pub fn set(&self, info: MountInfo) {
        *self.0.write() = info;
    }
}
