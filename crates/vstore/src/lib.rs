//! A hierarchical, multi-backend virtual object store.
//!
//! Callers address content by slash-separated [`path::Path`]s. Backend
//! providers (directories, read-only archives, in-memory maps) are mounted
//! under `/storage/<id>/` and, optionally, overlaid into a shared root
//! namespace at a given priority so the same logical path can resolve
//! through several backends in a defined order. A lifecycle-aware
//! [`cache::Cache`] sits in front of each overlaid backend, holding
//! activated [`object::StorableObject`]s until the periodic cleaner
//! persists and evicts them.
//!
//! [`root_storage::RootStorage`] is the single entry point: it owns the
//! mount table, the per-backend caches, and the background cleaner, and
//! dispatches `lookup`/`load`/`store`/`remove` to whichever backend(s) a
//! path concerns.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod metadata;
pub mod mount;
pub mod object;
pub mod path;
pub mod query;
pub mod root_storage;
pub mod serializer;
pub mod value;

pub use backend::{Backend, BackendKind, BinaryHandle, LoadedValue, MountInfo, StoreValue};
pub use backend::archive::ArchiveBackend;
pub use backend::directory::DirectoryBackend;
pub use backend::memory::MemoryBackend;
pub use cache::Cache;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use index::{CiNameSet, Index};
pub use metadata::{Category, Metadata};
pub use object::{DictionaryObject, FnFactory, NullFactory, ObjectFactory, StorableObject};
pub use path::Path;
pub use query::{Query, Queryable};
pub use root_storage::RootStorage;
pub use value::{Dictionary, Value};
