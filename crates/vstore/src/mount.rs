//! Ordered mount records with priority/time tie-break, overlay lookup.

use std::sync::Arc;

use crate::backend::Backend;
use crate::cache::Cache;
use crate::path::Path;

/// One mounted backend: its namespace position, read-write flag, and
/// optional overlay projection into another namespace (typically root).
pub struct MountRecord {
    pub id: String,
    pub backend: Arc<dyn Backend>,
    pub mount_path: Path,
    pub read_write: bool,
    pub overlay_path: Option<Path>,
    pub overlay_prio: i32,
    pub mount_time: u64,
    pub cache: Option<Arc<Cache>>,
}

impl MountRecord {
    pub fn overlays(&self, p: &Path) -> bool {
        match &self.overlay_path {
            Some(o) => p.starts_with(o),
            None => false,
        }
    }

    /// `p`, addressed through this mount's overlay, rebased to the backend's
    /// own root-relative namespace. The same formula applies to paths
    /// addressed directly under `/storage/`,
    /// using `mount_path` instead of `overlay_path` — every backend always
    /// sees paths relative to its own root, never prefixed by where it is
    /// mounted or overlaid.
    pub fn overlay_local_path(&self, p: &Path) -> Path {
        let overlay = self.overlay_path.as_ref().expect("overlay_local_path requires an overlay");
        p.remove_prefix(overlay)
    }

    pub fn mount_local_path(&self, p: &Path) -> Path {
        p.remove_prefix(&self.mount_path)
    }

    /// The inverse of `overlay_local_path`: a backend-local object path,
    /// rebased back to an absolute path under this mount's overlay. Used by
    /// the cache-clean sweep to persist a cached object back through the
    /// root storage's own `store`.
    pub fn overlay_absolute_path(&self, local: &Path) -> Path {
        let overlay = self.overlay_path.as_ref().expect("overlay_absolute_path requires an overlay");
        Path::rebased_under(overlay, local)
    }
}

/// Mounts ordered by priority (desc), then mount time (asc) — higher
/// priority first, and on a tie the earlier mount wins.
#[derive(Default)]
pub struct MountTable {
    records: Vec<MountRecord>,
}

impl MountTable {
    pub fn new() -> Self {
        MountTable { records: Vec::new() }
    }

    pub fn insert(&mut self, record: MountRecord) {
        self.records.push(record);
        self.sort();
    }

    pub fn remove(&mut self, mount_path: &Path) -> Option<MountRecord> {
        let idx = self.records.iter().position(|r| r.mount_path == *mount_path)?;
        Some(self.records.remove(idx))
    }

    pub fn contains(&self, mount_path: &Path) -> bool {
        self.records.iter().any(|r| r.mount_path == *mount_path)
    }

    pub fn get(&self, mount_path: &Path) -> Option<&MountRecord> {
        self.records.iter().find(|r| r.mount_path == *mount_path)
    }

    pub fn get_mut(&mut self, mount_path: &Path) -> Option<&mut MountRecord> {
        self.records.iter_mut().find(|r| r.mount_path == *mount_path)
    }

    /// The mount whose mount path is a prefix of `p` (used for dispatch
    /// under `/storage/...`).
    pub fn find_by_mount_prefix(&self, p: &Path) -> Option<&MountRecord> {
        self.records
            .iter()
            .filter(|r| p.starts_with(&r.mount_path))
            .max_by_key(|r| r.mount_path.length())
    }

    /// Mounts whose overlay projects into `p`'s namespace, already in
    /// priority order.
    pub fn overlays_for(&self, p: &Path) -> impl Iterator<Item = &MountRecord> {
        self.records.iter().filter(move |r| r.overlays(p))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MountRecord> {
        self.records.iter()
    }

    /// Unmount order: reverse of mount order.
    pub fn iter_reverse(&self) -> impl Iterator<Item = &MountRecord> {
        self.records.iter().rev()
    }

    /// Re-sort after mutating a record's priority/mount-time in place
    /// (used by `remount`, which updates a record rather than
    /// reinserting it).
    pub fn resort(&mut self) {
        self.sort();
    }

    fn sort(&mut self) {
        self.records.sort_by(|a, b| {
            b.overlay_prio.cmp(&a.overlay_prio).then(a.mount_time.cmp(&b.mount_time))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn record(id: &str, prio: i32, mount_time: u64, overlay: Option<&str>) -> MountRecord {
        MountRecord {
            id: id.to_string(),
            backend: Arc::new(MemoryBackend::new(id)),
            mount_path: Path::parse(&format!("/storage/{id}/")).unwrap(),
            read_write: true,
            overlay_path: overlay.map(|o| Path::parse(o).unwrap()),
            overlay_prio: prio,
            mount_time,
            cache: None,
        }
    }

    #[test]
    fn orders_by_priority_desc_then_mount_time_asc() {
        let mut table = MountTable::new();
        table.insert(record("low", 5, 2, Some("/")));
        table.insert(record("high", 10, 1, Some("/")));
        table.insert(record("tie", 10, 0, Some("/")));

        let ids: Vec<&str> = table.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["tie", "high", "low"]);
    }

    #[test]
    fn find_by_mount_prefix_picks_longest_match() {
        let mut table = MountTable::new();
        table.insert(record("m1", 0, 0, None));
        let found = table.find_by_mount_prefix(&Path::parse("/storage/m1/type/alpha").unwrap());
        assert_eq!(found.unwrap().id, "m1");
        assert!(table.find_by_mount_prefix(&Path::parse("/storage/other/x").unwrap()).is_none());
    }

    #[test]
    fn overlay_local_path_strips_overlay_prefix() {
        let r = record("m1", 0, 0, Some("/"));
        let local = r.overlay_local_path(&Path::parse("/type/alpha").unwrap());
        assert_eq!(local.to_string(), "/type/alpha");
    }

    #[test]
    fn mount_local_path_strips_mount_prefix() {
        let r = record("m1", 0, 0, Some("/"));
        let local = r.mount_local_path(&Path::parse("/storage/m1/type/alpha").unwrap());
        assert_eq!(local.to_string(), "/type/alpha");
    }
}
