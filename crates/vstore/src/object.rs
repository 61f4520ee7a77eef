//! `StorableObject`: the base for cached, lifecycle-aware domain objects.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex as PMutex;

use crate::error::StoreResult;
use crate::value::{strip_computed_for_persist, Dictionary, Value};

/// A cacheable domain value with init/activate/passivate/destroy lifecycle.
///
/// This replaces the source hierarchy's deep inheritance
/// (`Storage -> MemoryStorage -> RootStorage`-style base classes) with a
/// capability trait: any type that can hold a dictionary and react to
/// lifecycle transitions qualifies, without needing a common base class.
pub trait StorableObject: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;
    fn type_tag(&self) -> &str;
    fn is_active(&self) -> bool;
    fn is_modified(&self) -> bool;

    /// Called once after construction, before the object is ever handed to
    /// a caller. Failure is reported via `_error` on the dictionary, not as
    /// an exception at the API boundary — callers of `init` itself still
    /// get the `Result` so the root storage can decide what to do.
    fn init(&mut self) -> StoreResult<()>;

    /// Called whenever the object transitions into active use (including
    /// on every cache `load`). Sets the computed `_activatedTime` key.
    fn activate(&mut self);

    /// Called before eviction or replacement.
    fn passivate(&mut self);

    /// Called at most once, when the object is finally dropped from cache.
    fn destroy(&mut self);

    /// A shallow dictionary snapshot of current state.
    fn serialize(&self) -> Dictionary;
}

/// A generic `StorableObject` backed directly by a dictionary, with no
/// domain-specific behavior — used by tests and by any registered type that
/// doesn't need custom lifecycle logic beyond the defaults.
#[derive(Debug, Clone)]
pub struct DictionaryObject {
    dict: Dictionary,
    active: bool,
    modified: bool,
    destroyed: bool,
}

impl DictionaryObject {
    pub fn new(dict: Dictionary) -> Self {
        DictionaryObject { dict, active: false, modified: false, destroyed: false }
    }

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.dict.insert(key.into(), value);
        self.modified = true;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.dict.get(key)
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl StorableObject for DictionaryObject {
    fn id(&self) -> &str {
        self.dict.get("id").and_then(Value::as_str).unwrap_or("")
    }

    fn type_tag(&self) -> &str {
        self.dict.get("type").and_then(Value::as_str).unwrap_or("")
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn init(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn activate(&mut self) {
        self.active = true;
        self.dict.insert(
            "_activatedTime".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    fn passivate(&mut self) {
        self.active = false;
        self.modified = false;
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }

    fn serialize(&self) -> Dictionary {
        strip_computed_for_persist(&self.dict)
    }
}

/// Constructs `StorableObject` instances for a declared `type` value. The
/// concrete mapping of type name to constructor is an external concern —
/// the domain object factory; this trait is the seam.
///
/// Returns the object pre-wrapped in the `Arc<Mutex<_>>` the cache and root
/// storage share it by — the factory is the one place that still knows the
/// object's concrete type, so it's the only place that can perform the
/// unsizing coercion to `dyn StorableObject`.
pub trait ObjectFactory: Send + Sync {
    fn construct(&self, type_tag: &str, dict: Dictionary) -> Option<Arc<PMutex<dyn StorableObject>>>;
}

/// A factory with no registered types: every dictionary passes through
/// unchanged rather than being wrapped in a domain object.
#[derive(Debug, Default)]
pub struct NullFactory;

impl ObjectFactory for NullFactory {
    fn construct(&self, _type_tag: &str, _dict: Dictionary) -> Option<Arc<PMutex<dyn StorableObject>>> {
        None
    }
}

/// A factory backed by a single constructor function — enough for the demo
/// CLI and tests to register one or two concrete `StorableObject` types
/// without building a full plugin registry.
pub struct FnFactory<F>(pub F)
where
    F: Fn(&str, Dictionary) -> Option<Arc<PMutex<dyn StorableObject>>> + Send + Sync;

impl<F> ObjectFactory for FnFactory<F>
where
    F: Fn(&str, Dictionary) -> Option<Arc<PMutex<dyn StorableObject>>> + Send + Sync,
{
    fn construct(&self, type_tag: &str, dict: Dictionary) -> Option<Arc<PMutex<dyn StorableObject>>> {
        (self.0)(type_tag, dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> DictionaryObject {
        let mut d = Dictionary::new();
        d.insert("id".into(), Value::String("w1".into()));
        d.insert("type".into(), Value::String("widget".into()));
        DictionaryObject::new(d)
    }

    #[test]
    fn activate_sets_activated_time_and_active_flag() {
        let mut o = widget();
        assert!(!o.is_active());
        o.activate();
        assert!(o.is_active());
        assert!(o.get("_activatedTime").is_some());
    }

    #[test]
    fn passivate_then_destroy_ordering_is_caller_enforced() {
        let mut o = widget();
        o.activate();
        o.mark_modified();
        assert!(o.is_modified());
        o.passivate();
        assert!(!o.is_active());
        assert!(!o.is_modified());
        o.destroy();
        assert!(o.was_destroyed());
    }

    #[test]
    fn serialize_strips_computed_keeps_hidden() {
        let mut o = widget();
        o.activate();
        o.set(".secret", Value::String("s".into()));
        let snap = o.serialize();
        assert!(snap.contains_key(".secret"));
        assert!(!snap.contains_key("_activatedTime"));
    }
}
