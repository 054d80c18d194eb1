//! Dict values

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{DictRef, Value, ValueRef};
use crate::error::{GrtError, GrtResult};
use crate::types::{SimpleTypeSpec, Type};

/// String keyed map with a declared content type
///
/// Keys iterate in sorted order.
pub struct Dict {
    content: SimpleTypeSpec,
    allow_null: bool,
    entries: RwLock<BTreeMap<String, ValueRef>>,
}

impl Dict {
    pub(crate) fn new(content: SimpleTypeSpec, allow_null: bool) -> Self {
        Self {
            content,
            allow_null,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Declared content type
    pub fn content_type(&self) -> &SimpleTypeSpec {
        &self.content
    }

    /// Whether null values are accepted by checked sets
    pub fn allow_null(&self) -> bool {
        self.allow_null
    }

    /// Number of keys
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Value for `key`, null when absent
    pub fn get(&self, key: &str) -> ValueRef {
        self.entries.read().get(key).cloned().unwrap_or_default()
    }

    /// True if `key` is present (possibly holding null)
    pub fn has_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Store without validation; returns the previous value
    pub fn set(&self, key: impl Into<String>, value: ValueRef) -> ValueRef {
        self.entries
            .write()
            .insert(key.into(), value)
            .unwrap_or_default()
    }

    /// Store after validating against the content type
    pub fn set_checked(&self, key: impl Into<String>, value: ValueRef) -> GrtResult<ValueRef> {
        value.check_assignable(&self.content, self.allow_null)?;
        Ok(self.set(key, value))
    }

    /// Remove `key`, returning its value
    pub fn remove(&self, key: &str) -> ValueRef {
        self.entries.write().remove(key).unwrap_or_default()
    }

    /// Sorted keys
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Snapshot of all entries in key order
    pub fn entries(&self) -> Vec<(String, ValueRef)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove all keys
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

// ============================================================================
// DictRef
// ============================================================================

impl DictRef {
    /// New dict accepting anything
    pub fn new() -> Self {
        Self::with_content(SimpleTypeSpec::default())
    }

    /// New dict with a content type; null values allowed
    pub fn with_content(content: SimpleTypeSpec) -> Self {
        Self::with_null_policy(content, true)
    }

    /// New dict with an explicit null policy
    pub fn with_null_policy(content: SimpleTypeSpec, allow_null: bool) -> Self {
        Self::wrap(ValueRef::from_value(Value::Dict(Dict::new(content, allow_null))))
    }

    /// The dict payload
    pub fn inner(&self) -> GrtResult<&Dict> {
        match self.payload()? {
            Value::Dict(dict) => Ok(dict),
            other => Err(GrtError::type_error(Type::Dict, other.value_type())),
        }
    }

    /// Number of keys, 0 for null
    pub fn count(&self) -> usize {
        self.inner().map_or(0, Dict::count)
    }

    /// Value for `key`, null if absent or the dict is null
    pub fn get(&self, key: &str) -> ValueRef {
        self.inner().map(|d| d.get(key)).unwrap_or_default()
    }

    /// Presence check
    pub fn has_key(&self, key: &str) -> bool {
        self.inner().map_or(false, |d| d.has_key(key))
    }

    /// Store a value (checked against the content type)
    pub fn set(&self, key: impl Into<String>, value: impl Into<ValueRef>) -> GrtResult<ValueRef> {
        self.inner()?.set_checked(key, value.into())
    }

    /// Remove a key
    pub fn remove(&self, key: &str) -> GrtResult<ValueRef> {
        Ok(self.inner()?.remove(key))
    }

    /// Sorted keys
    pub fn keys(&self) -> Vec<String> {
        self.inner().map(Dict::keys).unwrap_or_default()
    }

    /// Entries in key order
    pub fn entries(&self) -> Vec<(String, ValueRef)> {
        self.inner().map(Dict::entries).unwrap_or_default()
    }

    /// String at `key`; `default` when absent, error on another type
    pub fn get_string(&self, key: &str, default: &str) -> GrtResult<String> {
        let value = self.get(key);
        if !value.is_valid() {
            return Ok(default.to_string());
        }
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GrtError::type_error(Type::String, value.value_type()))
    }

    /// Integer at `key`; `default` when absent, error on another type
    pub fn get_int(&self, key: &str, default: i64) -> GrtResult<i64> {
        let value = self.get(key);
        if !value.is_valid() {
            return Ok(default);
        }
        value
            .as_int()
            .ok_or_else(|| GrtError::type_error(Type::Integer, value.value_type()))
    }

    /// Double at `key`; `default` when absent, error on another type
    pub fn get_double(&self, key: &str, default: f64) -> GrtResult<f64> {
        let value = self.get(key);
        if !value.is_valid() {
            return Ok(default);
        }
        value
            .as_double()
            .ok_or_else(|| GrtError::type_error(Type::Double, value.value_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let dict = DictRef::new();
        dict.set("host", "localhost").unwrap();
        dict.set("port", 3306).unwrap();
        assert!(dict.has_key("host"));
        assert_eq!(dict.count(), 2);
        assert_eq!(dict.keys(), vec!["host".to_string(), "port".to_string()]);
        assert_eq!(dict.remove("host").unwrap().as_str(), Some("localhost"));
        assert!(!dict.has_key("host"));
        assert!(!dict.get("host").is_valid());
    }

    #[test]
    fn test_typed_getters() {
        let dict = DictRef::new();
        dict.set("name", "conn").unwrap();
        dict.set("port", 3306).unwrap();
        dict.set("ratio", 0.5).unwrap();

        assert_eq!(dict.get_string("name", "").unwrap(), "conn");
        assert_eq!(dict.get_int("port", 0).unwrap(), 3306);
        assert_eq!(dict.get_double("ratio", 0.0).unwrap(), 0.5);
        assert_eq!(dict.get_int("missing", 42).unwrap(), 42);

        assert!(matches!(
            dict.get_int("name", 0),
            Err(GrtError::TypeMismatch { .. })
        ));
        assert!(matches!(
            dict.get_string("port", ""),
            Err(GrtError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_content_type_enforced() {
        let dict = DictRef::with_content(SimpleTypeSpec::new(Type::String));
        dict.set("a", "ok").unwrap();
        assert!(dict.set("b", 1).is_err());
        assert_eq!(dict.count(), 1);
    }
}
